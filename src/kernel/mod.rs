//! Compiled kernels and the builders that generate them
//!
//! A [`Kernel`] is one entry point of a built program. Calling
//! [`Kernel::invoke`] binds arguments positionally and enqueues an NDRange
//! dispatch. The [`map`] and [`reduce`] builders render their kernel source
//! from templates (see [`template`]) and compile it through the [`Context`].

pub mod map;
pub mod reduce;
pub mod template;

pub use map::MapKernel;
pub use reduce::ReductionKernel;
pub use template::{KernelTemplate, Placeholder, Substitutions, TemplateError};

use tracing::debug;

use crate::context::Context;
use crate::error::Result;
use crate::runtime::{ArgValue, BufferId, KernelId, ProgramId, WorkSize};
use crate::types::NumericValue;

/// One positional kernel argument
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelArg {
    /// Device buffer, passed opaquely
    Buffer(BufferId),
    /// Scalar with an explicit element type
    Number(NumericValue),
    /// Scalar whose type the device infers from the parameter
    Untyped(f64),
}

impl KernelArg {
    fn to_arg_value(self) -> ArgValue {
        match self {
            KernelArg::Buffer(id) => ArgValue::Buffer(id),
            KernelArg::Number(n) => ArgValue::Scalar {
                value: n.value(),
                tag: Some(n.tag()),
            },
            KernelArg::Untyped(value) => ArgValue::Scalar { value, tag: None },
        }
    }
}

impl From<BufferId> for KernelArg {
    fn from(id: BufferId) -> Self {
        KernelArg::Buffer(id)
    }
}

impl From<NumericValue> for KernelArg {
    fn from(n: NumericValue) -> Self {
        KernelArg::Number(n)
    }
}

impl From<f64> for KernelArg {
    fn from(value: f64) -> Self {
        KernelArg::Untyped(value)
    }
}

impl From<f32> for KernelArg {
    fn from(value: f32) -> Self {
        KernelArg::Number(NumericValue::float(value))
    }
}

impl From<i32> for KernelArg {
    fn from(value: i32) -> Self {
        KernelArg::Number(NumericValue::int32(value))
    }
}

impl From<u32> for KernelArg {
    fn from(value: u32) -> Self {
        KernelArg::Number(NumericValue::uint32(value))
    }
}

/// A built kernel entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kernel {
    entry: String,
    program: ProgramId,
    kernel: KernelId,
    param_count: usize,
}

impl Kernel {
    pub(crate) fn new(entry: String, program: ProgramId, kernel: KernelId, param_count: usize) -> Self {
        Self {
            entry,
            program,
            kernel,
            param_count,
        }
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn program(&self) -> ProgramId {
        self.program
    }

    pub fn id(&self) -> KernelId {
        self.kernel
    }

    pub fn param_count(&self) -> usize {
        self.param_count
    }

    /// Bind `args` to slots `0..args.len()` and enqueue a dispatch
    ///
    /// Typed numbers are bound with their tag; buffers and untyped values are
    /// bound without one. The dispatch is not waited on.
    pub fn invoke(
        &self,
        ctx: &mut Context,
        work: impl Into<WorkSize>,
        args: &[KernelArg],
    ) -> Result<()> {
        let work = work.into();
        let device = ctx.device_mut();
        for (index, arg) in args.iter().enumerate() {
            device.set_kernel_arg(self.kernel, index, arg.to_arg_value())?;
        }
        debug!(
            kernel = %self.entry,
            global = ?work.global,
            local = ?work.local,
            args = args.len(),
            "invoking kernel"
        );
        device.enqueue_nd_range(self.kernel, &work)?;
        Ok(())
    }
}
