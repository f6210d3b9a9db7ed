use snafu::Snafu;

use crate::descriptor::{AccessMode, DeviceType};
use crate::handle::ResourceKind;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The host has no usable accelerator runtime.
    #[snafu(display("no accelerator platform available"))]
    NoPlatformAvailable,

    /// Platform exposes no device matching the requested type.
    #[snafu(display("no {filter} device available on platform '{platform}'"))]
    NoDeviceAvailable { platform: String, filter: DeviceType },

    #[snafu(display("context creation failed (code {code}): {reason}"))]
    ContextCreationFailed { code: i32, reason: String },

    #[snafu(display("command queue creation failed (code {code}): {reason}"))]
    QueueCreationFailed { code: i32, reason: String },

    /// Device memory exhausted or allocation rejected by the driver.
    #[snafu(display("allocation of {size} bytes failed: {reason}"))]
    AllocationFailed { size: usize, reason: String },

    /// Failed to copy data between host and device.
    #[snafu(display("transfer failed: {reason}"))]
    TransferFailed { reason: String },

    /// Host access that contradicts the buffer's access mode.
    #[snafu(display("cannot {operation} a {mode} buffer"))]
    InvalidAccessMode { mode: AccessMode, operation: &'static str },

    /// Program build failed. `log` is the compiler output, unmodified.
    #[snafu(display("program build failed:\n{log}"))]
    BuildFailed { log: String },

    #[snafu(display("kernel entry point '{name}' not found"))]
    EntryPointNotFound { name: String },

    #[snafu(display("argument index {index} out of range for kernel '{kernel}' with arity {arity}"))]
    InvalidArgumentIndex { kernel: String, index: usize, arity: usize },

    #[snafu(display("dispatch failed: {reason}"))]
    DispatchFailed { reason: String },

    /// Handle was never issued by this backend or has already been released.
    #[snafu(display("unknown {kind} handle {id}"))]
    UnknownHandle { kind: ResourceKind, id: u64 },

    /// Invalid backend specification.
    #[snafu(display("invalid backend: {backend}"))]
    InvalidBackend { backend: String },
}
