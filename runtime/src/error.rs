//! Error types for pipeline runs.

use std::path::PathBuf;

use snafu::Snafu;

use crate::pipeline::PipelineStage;

/// Result type for runtime operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that abort an offload run.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Device backend call failed.
    #[snafu(display("{stage}: {source}"))]
    Device { source: offload_device::Error, stage: PipelineStage },

    /// A run needs at least one input buffer.
    #[snafu(display("no input buffers supplied"))]
    NoInputs,

    /// Host buffers must hold at least one element.
    #[snafu(display("buffer must contain at least one element"))]
    EmptyBuffer,

    #[snafu(display("input {index} has {actual} elements, expected {expected}"))]
    ElementCountMismatch { index: usize, expected: usize, actual: usize },

    /// The kernel's buffer arguments hold a different element type than the host buffers.
    #[snafu(display("kernel argument {index} is declared '{declared}' but the host buffers hold '{element}'"))]
    ElementTypeMismatch { index: usize, declared: String, element: &'static str },

    /// Kernel source file could not be read.
    #[snafu(display("failed to read kernel source '{}': {source}", path.display()))]
    KernelSourceIo { source: std::io::Error, path: PathBuf },

    /// Device output disagrees with the host reference.
    #[snafu(display("verification failed at element {index}: expected {expected}, got {actual}"))]
    VerificationFailed { index: usize, expected: String, actual: String },

    #[snafu(display("invalid pipeline configuration: {reason}"))]
    InvalidConfig { reason: String },
}

impl Error {
    /// The wrapped device error, if the failure came from the backend.
    pub fn device_error(&self) -> Option<&offload_device::Error> {
        match self {
            Error::Device { source, .. } => Some(source),
            _ => None,
        }
    }
}
