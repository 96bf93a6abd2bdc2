//! Compute device contract
//!
//! The orchestration layer talks to a device only through [`ComputeDevice`]
//! and discovers devices through [`Platform`]. The contract mirrors an
//! OpenCL-style host API:
//! - buffer creation with an access mode and byte size
//! - non-blocking enqueue of buffer writes, reads and NDRange dispatches
//!   on a single in-order queue, plus an explicit `finish`
//! - program creation from source, build, build diagnostics and kernel
//!   extraction by entry-point name
//! - positional kernel-argument binding, optionally typed
//! - explicit release of buffers, programs and kernels

pub mod simulated;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ScalarTag;

pub use simulated::{SimulatedDevice, SimulatedPlatform};

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

handle_type!(
    /// Opaque device buffer handle
    BufferId,
    "buffer"
);
handle_type!(
    /// Opaque program handle
    ProgramId,
    "program"
);
handle_type!(
    /// Opaque kernel handle
    KernelId,
    "kernel"
);

/// Device category requested at context creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Whatever the platform considers its default device
    Default,
    Cpu,
    Gpu,
    Accelerator,
    All,
}

impl DeviceType {
    /// Whether a device of kind `actual` satisfies this request
    pub fn matches(self, actual: DeviceType) -> bool {
        match self {
            DeviceType::Default | DeviceType::All => true,
            requested => requested == actual,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Default => write!(f, "default"),
            DeviceType::Cpu => write!(f, "CPU"),
            DeviceType::Gpu => write!(f, "GPU"),
            DeviceType::Accelerator => write!(f, "accelerator"),
            DeviceType::All => write!(f, "any"),
        }
    }
}

/// Access mode of a device buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemAccess {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// Device properties
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub device_type: DeviceType,
    pub compute_units: u32,
    pub max_work_group_size: usize,
    pub max_work_item_dimensions: usize,
    pub local_mem_size: usize,
    pub global_mem_size: u64,
}

/// NDRange work sizes for one dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkSize {
    pub global: Vec<usize>,
    pub local: Vec<usize>,
}

impl WorkSize {
    pub fn new(global: impl Into<Dims>, local: impl Into<Dims>) -> Self {
        Self {
            global: global.into().0,
            local: local.into().0,
        }
    }

    /// 1D dispatch covering `len` items, rounded up to a multiple of `local`
    pub fn covering(len: usize, local: usize) -> Self {
        Self::new(len.div_ceil(local) * local, local)
    }

    pub fn dimensions(&self) -> usize {
        self.global.len()
    }

    pub fn total_items(&self) -> usize {
        self.global.iter().product()
    }

    pub fn items_per_group(&self) -> usize {
        self.local.iter().product()
    }

    /// Number of work-groups along each dimension
    pub fn num_groups(&self) -> Vec<usize> {
        self.global
            .iter()
            .zip(&self.local)
            .map(|(g, l)| g / l)
            .collect()
    }

    /// Validate the work sizes against device limits
    pub fn validate(&self, info: &DeviceInfo) -> Result<(), GpuError> {
        let dims = self.global.len();
        if dims == 0 || dims > info.max_work_item_dimensions {
            return Err(GpuError::InvalidWorkSize(format!(
                "{} dimensions requested, device supports 1..={}",
                dims, info.max_work_item_dimensions
            )));
        }
        if self.local.len() != dims {
            return Err(GpuError::InvalidWorkSize(format!(
                "global size has {} dimensions but local size has {}",
                dims,
                self.local.len()
            )));
        }
        for (axis, (&g, &l)) in self.global.iter().zip(&self.local).enumerate() {
            if g == 0 || l == 0 {
                return Err(GpuError::InvalidWorkSize(format!(
                    "zero work size in dimension {}",
                    axis
                )));
            }
            if g % l != 0 {
                return Err(GpuError::InvalidWorkSize(format!(
                    "global size {} is not a multiple of local size {} in dimension {}",
                    g, l, axis
                )));
            }
        }
        let per_group = self.items_per_group();
        if per_group > info.max_work_group_size {
            return Err(GpuError::InvalidWorkSize(format!(
                "work-group size ({}) exceeds maximum ({})",
                per_group, info.max_work_group_size
            )));
        }
        Ok(())
    }
}

/// `(global, local)` pairs, e.g. `(64, 32)` or `([8, 8], [4, 4])`
impl<G: Into<Dims>, L: Into<Dims>> From<(G, L)> for WorkSize {
    fn from((global, local): (G, L)) -> Self {
        WorkSize::new(global, local)
    }
}

/// Work-size dimensions; a bare scalar becomes a one-element list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dims(pub Vec<usize>);

impl From<usize> for Dims {
    fn from(n: usize) -> Self {
        Dims(vec![n])
    }
}

impl<const N: usize> From<[usize; N]> for Dims {
    fn from(dims: [usize; N]) -> Self {
        Dims(dims.to_vec())
    }
}

impl From<Vec<usize>> for Dims {
    fn from(dims: Vec<usize>) -> Self {
        Dims(dims)
    }
}

impl From<&[usize]> for Dims {
    fn from(dims: &[usize]) -> Self {
        Dims(dims.to_vec())
    }
}

/// Value bound to one kernel-argument slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArgValue {
    Buffer(BufferId),
    /// Scalar with an explicit type, or `None` to let the device infer it
    Scalar { value: f64, tag: Option<ScalarTag> },
}

/// Program build status, numbered as in OpenCL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BuildStatus {
    Success,
    None,
    Error,
    InProgress,
}

impl BuildStatus {
    pub fn code(self) -> i32 {
        match self {
            BuildStatus::Success => 0,
            BuildStatus::None => -1,
            BuildStatus::Error => -2,
            BuildStatus::InProgress => -3,
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Build diagnostics for one program on one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub status: BuildStatus,
    pub log: String,
}

/// Device-side failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GpuError {
    #[error("no compute device found")]
    DeviceNotFound,
    #[error("invalid buffer {0}")]
    InvalidBuffer(BufferId),
    #[error("buffer size must be > 0")]
    InvalidBufferSize,
    #[error("access of {len} bytes at offset {offset} exceeds buffer size {size}")]
    BufferTooSmall {
        offset: usize,
        len: usize,
        size: usize,
    },
    #[error("invalid program {0}")]
    InvalidProgram(ProgramId),
    #[error("program build failed")]
    BuildFailed,
    #[error("program {0} has not been built successfully")]
    ProgramNotBuilt(ProgramId),
    #[error("no kernel named `{0}` in program")]
    KernelNotFound(String),
    #[error("invalid kernel {0}")]
    InvalidKernel(KernelId),
    #[error("argument index {index} out of range, kernel takes {count} arguments")]
    InvalidArgIndex { index: usize, count: usize },
    #[error("argument {index}: {message}")]
    InvalidArgValue { index: usize, message: String },
    #[error("argument {index} of size {given} bytes does not match parameter size {expected}")]
    InvalidArgSize {
        index: usize,
        given: usize,
        expected: usize,
    },
    #[error("kernel argument {0} has not been set")]
    ArgNotSet(usize),
    #[error("invalid work size: {0}")]
    InvalidWorkSize(String),
    #[error("out-of-bounds access to `{name}` at index {index} (length {len})")]
    OutOfBounds {
        name: String,
        index: i64,
        len: usize,
    },
    #[error("kernel execution failed: {0}")]
    Execution(String),
}

/// A compute device with one in-order command queue
pub trait ComputeDevice: Send {
    fn info(&self) -> &DeviceInfo;

    fn create_buffer(&mut self, access: MemAccess, size: usize) -> Result<BufferId, GpuError>;

    fn release_buffer(&mut self, buffer: BufferId) -> Result<(), GpuError>;

    /// Enqueue a write of `data` at byte `offset`. The data is copied at
    /// enqueue time; the write may complete later.
    fn enqueue_write_buffer(
        &mut self,
        buffer: BufferId,
        offset: usize,
        data: &[u8],
    ) -> Result<(), GpuError>;

    /// Enqueue a read into `dst` from byte `offset`. `dst` holds the data
    /// once the call returns; callers still `finish` to order the read
    /// against every earlier command.
    fn enqueue_read_buffer(
        &mut self,
        buffer: BufferId,
        offset: usize,
        dst: &mut [u8],
    ) -> Result<(), GpuError>;

    /// Enqueue an NDRange dispatch with the kernel's current arguments
    fn enqueue_nd_range(&mut self, kernel: KernelId, work: &WorkSize) -> Result<(), GpuError>;

    /// Block until every enqueued command has completed
    fn finish(&mut self) -> Result<(), GpuError>;

    fn create_program(&mut self, source: &str) -> Result<ProgramId, GpuError>;

    fn build_program(&mut self, program: ProgramId, options: &str) -> Result<(), GpuError>;

    fn build_info(&self, program: ProgramId) -> Result<BuildInfo, GpuError>;

    /// Drop the host's reference to a program. Kernels already created
    /// from it stay valid.
    fn release_program(&mut self, program: ProgramId) -> Result<(), GpuError>;

    fn create_kernel(&mut self, program: ProgramId, entry: &str) -> Result<KernelId, GpuError>;

    /// Free a kernel. Dispatches already enqueued still run.
    fn release_kernel(&mut self, kernel: KernelId) -> Result<(), GpuError>;

    fn kernel_param_count(&self, kernel: KernelId) -> Result<usize, GpuError>;

    fn set_kernel_arg(
        &mut self,
        kernel: KernelId,
        index: usize,
        value: ArgValue,
    ) -> Result<(), GpuError>;
}

/// Device discovery
pub trait Platform {
    fn name(&self) -> &str;

    /// Devices of the requested type, in platform order
    fn devices(&self, device_type: DeviceType) -> Vec<DeviceInfo>;

    fn open(&self, device: &DeviceInfo) -> Result<Box<dyn ComputeDevice>, GpuError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> DeviceInfo {
        DeviceInfo {
            name: "test".to_string(),
            device_type: DeviceType::Cpu,
            compute_units: 1,
            max_work_group_size: 256,
            max_work_item_dimensions: 3,
            local_mem_size: 32 * 1024,
            global_mem_size: 1 << 30,
        }
    }

    #[test]
    fn test_scalar_dims_coerce_to_lists() {
        let work = WorkSize::new(64usize, 8usize);
        assert_eq!(work.global, vec![64]);
        assert_eq!(work.local, vec![8]);
        assert_eq!(work.num_groups(), vec![8]);
    }

    #[test]
    fn test_multi_dimensional() {
        let work = WorkSize::new([32usize, 16], [8usize, 4]);
        assert_eq!(work.dimensions(), 2);
        assert_eq!(work.total_items(), 512);
        assert_eq!(work.items_per_group(), 32);
        assert!(work.validate(&info()).is_ok());

        let work = WorkSize::new(vec![8usize, 8, 8], vec![2usize, 2, 2]);
        assert_eq!(work.num_groups(), vec![4, 4, 4]);
    }

    #[test]
    fn test_covering_rounds_up() {
        assert_eq!(WorkSize::covering(30, 8), WorkSize::new(32usize, 8usize));
        assert_eq!(WorkSize::covering(32, 8), WorkSize::new(32usize, 8usize));
    }

    #[test]
    fn test_validation() {
        let info = info();
        assert!(WorkSize::new(30usize, 8usize).validate(&info).is_err());
        assert!(WorkSize::new([8usize, 8], 8usize).validate(&info).is_err());
        assert!(WorkSize::new(1024usize, 512usize).validate(&info).is_err());
        assert!(WorkSize::new(0usize, 1usize).validate(&info).is_err());
    }

    #[test]
    fn test_device_type_matching() {
        assert!(DeviceType::Default.matches(DeviceType::Cpu));
        assert!(DeviceType::Cpu.matches(DeviceType::Cpu));
        assert!(!DeviceType::Gpu.matches(DeviceType::Cpu));
    }

    #[test]
    fn test_build_status_codes() {
        assert_eq!(BuildStatus::Error.code(), -2);
        assert_eq!(BuildStatus::Success.to_string(), "0");
    }
}
