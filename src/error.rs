//! Errors surfaced to callers of the kernel context

use miette::Diagnostic;
use thiserror::Error;

use crate::kernel::template::TemplateError;
use crate::runtime::{BufferId, BuildStatus, GpuError};

pub type Result<T> = std::result::Result<T, KernelError>;

#[derive(Debug, Error, Diagnostic)]
pub enum KernelError {
    #[error("compute device unavailable: {0}")]
    #[diagnostic(
        code(context::unsupported_environment),
        help("check that a compute device of the configured type is present")
    )]
    UnsupportedEnvironment(String),

    #[error("failed to build kernel `{entry}` (build status {status}):\n{log}")]
    #[diagnostic(code(compile::build_failure))]
    BuildFailure {
        entry: String,
        status: BuildStatus,
        log: String,
    },

    #[error("cannot infer element type of buffer {0}: it was not transferred through this context")]
    #[diagnostic(
        code(registry::unknown_buffer),
        help("pass a pre-allocated destination array to `transfer_from_device`")
    )]
    UnknownBufferType(BufferId),

    #[error("cannot reduce an empty input")]
    #[diagnostic(code(reduce::invalid_length))]
    InvalidReductionLength,

    #[error("work-group size {0} is not a power of two greater than one")]
    #[diagnostic(
        code(reduce::invalid_work_group_size),
        help("the halving steps of the tree reduction only visit every slot for power-of-two sizes")
    )]
    InvalidWorkGroupSize(usize),

    #[error(transparent)]
    #[diagnostic(code(compile::template))]
    Template(#[from] TemplateError),

    #[error("invalid argument: {0}")]
    #[diagnostic(code(kernel::invalid_argument))]
    InvalidArgument(String),

    #[error("device error: {0}")]
    #[diagnostic(code(device::error))]
    Device(#[from] GpuError),

    #[error("config error: {0}")]
    #[diagnostic(code(config::invalid))]
    Config(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(io::error))]
    Io(#[from] std::io::Error),
}

impl KernelError {
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        KernelError::InvalidArgument(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        KernelError::Config(msg.into())
    }

    /// Build log text, if this is a build failure
    pub fn build_log(&self) -> Option<&str> {
        match self {
            KernelError::BuildFailure { log, .. } => Some(log),
            _ => None,
        }
    }
}
