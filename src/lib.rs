//! kernelctx: templated map/reduce compute kernels
//!
//! A [`Context`] wraps one compute device. It synthesizes element-wise
//! **map** and tree **reduce** kernels from OpenCL C templates, tracks the
//! buffers it transfers to the device, and drives reductions that need more
//! than one pass.
//!
//! # Architecture
//!
//! ```text
//! Context ── registry ── transfers
//!    │
//!    ├── kernel::template ── map / reduce builders ── Kernel::invoke
//!    │
//!    └── runtime::ComputeDevice
//!            └── simulated: lexer → parser → check → interp
//! ```
//!
//! # Example
//!
//! ```
//! use kernelctx::{Context, HostArray};
//!
//! let mut ctx = Context::new()?;
//! let sum = ctx.reduce(&HostArray::from(vec![3u32, 7, 2]), "a + b", None, None)?;
//! assert_eq!(sum, 12.0);
//!
//! let out = ctx.map(&["x"], "x[i] + 1", &[HostArray::from(vec![5i32, 9, 2])])?;
//! assert_eq!(out, HostArray::from(vec![6i32, 10, 3]));
//! # Ok::<(), kernelctx::KernelError>(())
//! ```

pub mod ast;
pub mod check;
pub mod common;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod interp;
pub mod kernel;
pub mod lexer;
pub mod parser;
pub mod registry;
pub mod runtime;
pub mod types;

pub use config::ContextConfig;
pub use context::Context;
pub use error::{KernelError, Result};
pub use kernel::{
    Kernel, KernelArg, KernelTemplate, MapKernel, Placeholder, ReductionKernel, Substitutions,
    TemplateError,
};
pub use registry::{BufferMeta, BufferRegistry};
pub use runtime::{
    BufferId, ComputeDevice, DeviceInfo, DeviceType, Platform, SimulatedDevice, SimulatedPlatform,
    WorkSize,
};
pub use types::{ElementType, HostArray, NumericValue, ScalarTag};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
