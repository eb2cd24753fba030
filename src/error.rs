//! Error taxonomy for the offload pipeline
//!
//! Discovery and build errors abort pipeline assembly. Compute errors abort
//! the single invocation that raised them; the stage publishes nothing for it.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Status codes carried by [`ComputeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Device memory could not be allocated
    OutOfMemory,
    /// Buffer size is zero where not allowed, mismatched, or over the device limit
    InvalidBufferSize,
    /// Kernel arguments or dispatch rejected by device validation
    InvalidKernelArgs,
    /// Requested range does not fit the device's dispatch limits
    InvalidWorkSize,
    /// Read-back mapping of the result buffer failed
    MapFailed,
}

impl ErrorCode {
    /// Numeric value reported alongside the symbolic name.
    pub fn value(&self) -> i32 {
        match self {
            ErrorCode::OutOfMemory => -4,
            ErrorCode::InvalidBufferSize => -61,
            ErrorCode::InvalidKernelArgs => -52,
            ErrorCode::InvalidWorkSize => -54,
            ErrorCode::MapFailed => -12,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::OutOfMemory => "OUT_OF_MEMORY",
            ErrorCode::InvalidBufferSize => "INVALID_BUFFER_SIZE",
            ErrorCode::InvalidKernelArgs => "INVALID_KERNEL_ARGS",
            ErrorCode::InvalidWorkSize => "INVALID_WORK_SIZE",
            ErrorCode::MapFailed => "MAP_FAILURE",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.value())
    }
}

/// Device discovery failures. Exactly one of these is returned when no
/// device could be selected and opened.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("No compute platform found")]
    NoPlatform,

    #[error("No compute device found")]
    NoDevice,
}

/// Which part of the build rejected the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    /// Source text could not be used at all
    Source,
    /// Shader module failed to parse or validate
    Compile,
    /// Entry point could not be extracted into a pipeline
    Link,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStage::Source => write!(f, "source"),
            BuildStage::Compile => write!(f, "compile"),
            BuildStage::Link => write!(f, "link"),
        }
    }
}

/// Kernel compilation or link failure. The log is never empty.
#[derive(Debug, Error)]
#[error("kernel build failed at {stage} stage:\n{log}")]
pub struct BuildError {
    pub stage: BuildStage,
    pub log: String,
}

impl BuildError {
    pub fn new(stage: BuildStage, log: impl Into<String>) -> Self {
        let mut log = log.into();
        if log.trim().is_empty() {
            log = format!("{stage} stage reported an error without diagnostics");
        }
        Self { stage, log }
    }

    pub fn log(&self) -> &str {
        &self.log
    }
}

/// Runtime failure while allocating, binding, dispatching or reading back.
#[derive(Debug, Clone, Error)]
#[error("compute error {code}: {message}")]
pub struct ComputeError {
    pub code: ErrorCode,
    pub message: String,
}

impl ComputeError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Port wiring mistakes made while assembling a graph.
#[derive(Debug, Error)]
pub enum WiringError {
    #[error("sink already has an upstream source")]
    SinkAlreadyConnected,
}

/// Top-level error for pipeline assembly and the binary.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error(transparent)]
    Wiring(#[from] WiringError),

    #[error("failed to read kernel source {}: {source}", path.display())]
    KernelSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration {}: {message}", path.display())]
    Config { path: PathBuf, message: String },
}

impl Error {
    /// Symbolic code printed with startup diagnostics.
    pub fn code_name(&self) -> &'static str {
        match self {
            Error::Discovery(DiscoveryError::NoPlatform) => "NO_PLATFORM",
            Error::Discovery(DiscoveryError::NoDevice) => "NO_DEVICE",
            Error::Build(_) => "BUILD_PROGRAM_FAILURE",
            Error::Compute(e) => e.code.name(),
            Error::Wiring(_) => "WIRING",
            Error::KernelSource { .. } => "KERNEL_SOURCE",
            Error::Config { .. } => "CONFIG",
        }
    }

    /// Numeric code printed with startup diagnostics.
    pub fn code_value(&self) -> i32 {
        match self {
            Error::Discovery(DiscoveryError::NoPlatform) => -1001,
            Error::Discovery(DiscoveryError::NoDevice) => -1,
            Error::Build(_) => -11,
            Error::Compute(e) => e.code.value(),
            Error::Wiring(_) => -100,
            Error::KernelSource { .. } => -101,
            Error::Config { .. } => -102,
        }
    }

    /// Process exit status for this error; always non-zero.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config { .. } => 2,
            Error::Discovery(_) => 3,
            Error::KernelSource { .. } | Error::Build(_) => 4,
            Error::Compute(_) => 5,
            Error::Wiring(_) => 6,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_error_log_never_empty() {
        let err = BuildError::new(BuildStage::Compile, "   ");
        assert!(!err.log().trim().is_empty());
        assert!(err.log().contains("compile"));

        let err = BuildError::new(BuildStage::Link, "missing entry point `add`");
        assert_eq!(err.log(), "missing entry point `add`");
    }

    #[test]
    fn test_discovery_codes_are_distinct() {
        let platform = Error::from(DiscoveryError::NoPlatform);
        let device = Error::from(DiscoveryError::NoDevice);
        assert_ne!(platform.code_value(), device.code_value());
        assert_eq!(platform.code_name(), "NO_PLATFORM");
        assert_eq!(device.code_name(), "NO_DEVICE");
    }

    #[test]
    fn test_exit_codes_non_zero() {
        let errors = [
            Error::from(DiscoveryError::NoDevice),
            Error::from(BuildError::new(BuildStage::Source, "empty")),
            Error::from(ComputeError::new(ErrorCode::MapFailed, "lost")),
            Error::from(WiringError::SinkAlreadyConnected),
        ];
        for err in &errors {
            assert_ne!(err.exit_code(), 0, "{err}");
        }
    }

    #[test]
    fn test_compute_error_display_carries_code() {
        let err = ComputeError::new(ErrorCode::OutOfMemory, "buffer C");
        let text = err.to_string();
        assert!(text.contains("OUT_OF_MEMORY"));
        assert!(text.contains("-4"));
    }
}
