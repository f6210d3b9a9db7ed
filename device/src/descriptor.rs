//! Platform/device descriptors and buffer access modes.

use snafu::ensure;

use crate::error::{InvalidAccessModeSnafu, Result};
use crate::handle::{BufferHandle, DeviceId, PlatformId};

/// Device type filter used during enumeration.
///
/// Parsing is case-insensitive:
/// - "gpu" -> DeviceType::Gpu
/// - "CPU" -> DeviceType::Cpu
/// - "accelerator" / "acc" -> DeviceType::Accelerator
/// - "any" / "all" -> DeviceType::Any
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DeviceType {
    Gpu,
    Cpu,
    #[strum(to_string = "accelerator", serialize = "acc")]
    Accelerator,
    #[default]
    #[strum(to_string = "any", serialize = "all")]
    Any,
}

impl DeviceType {
    /// Whether a device of type `self` passes `filter`.
    pub fn matches(self, filter: DeviceType) -> bool {
        filter == DeviceType::Any || self == filter
    }
}

/// How a device buffer may be accessed. Fixed at allocation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum AccessMode {
    /// Kernel reads, host writes.
    #[strum(serialize = "read-only")]
    ReadOnly,
    /// Kernel writes, host reads after the kernel has written it.
    #[strum(serialize = "write-only")]
    WriteOnly,
    #[strum(serialize = "read-write")]
    ReadWrite,
}

impl AccessMode {
    /// Whether a kernel is allowed to store into the buffer.
    pub fn kernel_writable(self) -> bool {
        matches!(self, AccessMode::WriteOnly | AccessMode::ReadWrite)
    }

    /// Validate a host-to-device upload.
    pub fn check_host_write(self) -> Result<()> {
        ensure!(self != AccessMode::WriteOnly, InvalidAccessModeSnafu { mode: self, operation: "upload into" });
        Ok(())
    }

    /// Validate a device-to-host read-back.
    ///
    /// `kernel_written` tells whether a dispatch that bound this buffer has completed.
    pub fn check_host_read(self, kernel_written: bool) -> Result<()> {
        match self {
            AccessMode::ReadOnly => InvalidAccessModeSnafu { mode: self, operation: "read back" }.fail(),
            AccessMode::WriteOnly if !kernel_written => {
                InvalidAccessModeSnafu { mode: self, operation: "read back (not yet written by a kernel)" }.fail()
            }
            _ => Ok(()),
        }
    }
}

/// Whether a transfer call returns only after the copy completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferMode {
    #[default]
    Blocking,
    /// Submission only; completion is observed through `finish`.
    NonBlocking,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformDescriptor {
    pub id: PlatformId,
    pub name: String,
    pub vendor: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub platform: PlatformId,
    pub name: String,
    pub device_type: DeviceType,
    /// Largest work-group size accepted by `enqueue_dispatch`.
    pub max_work_group_size: usize,
    /// Device memory in bytes.
    pub global_mem_size: u64,
}

/// Device-resident allocation returned by `allocate_buffer`.
///
/// Plain descriptor: release goes through the owning backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceBuffer {
    handle: BufferHandle,
    size_bytes: usize,
    access_mode: AccessMode,
}

impl DeviceBuffer {
    pub fn new(handle: BufferHandle, size_bytes: usize, access_mode: AccessMode) -> Self {
        Self { handle, size_bytes, access_mode }
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn access_mode(&self) -> AccessMode {
        self.access_mode
    }
}
