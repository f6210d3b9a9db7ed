//! The device backend seam.
//!
//! Everything vendor-specific (platform discovery, contexts, queues, device
//! memory, program compilation, dispatch) sits behind [`DeviceBackend`]. The
//! pipeline only ever talks to this trait.
//!
//! # Ownership
//!
//! The backend owns every object it hands out. Callers hold typed handles and
//! must return each one through [`DeviceBackend::release`] exactly once; the
//! [`Scoped`](crate::Scoped) guard does that on drop.
//!
//! # Ordering
//!
//! Operations submitted to one queue complete in program order. Blocking
//! transfers return after the copy finished; dispatches and non-blocking
//! transfers are complete once [`DeviceBackend::finish`] returns.

use std::fmt;

use snafu::ensure;

use crate::descriptor::{AccessMode, DeviceBuffer, DeviceDescriptor, DeviceType, PlatformDescriptor, TransferMode};
use crate::error::{DispatchFailedSnafu, Result};
use crate::handle::{
    ContextHandle, DeviceId, KernelHandle, PlatformId, ProgramHandle, QueueHandle, Resource, ResourceCounts,
};

/// Accelerator compute API as seen by the host.
///
/// Implementations use interior mutability so a backend can be shared as
/// `Arc<dyn DeviceBackend>`.
pub trait DeviceBackend: Send + Sync + fmt::Debug {
    /// Backend name (for logging).
    fn name(&self) -> &str;

    /// List platforms. Fails with `NoPlatformAvailable` when there are none.
    fn enumerate_platforms(&self) -> Result<Vec<PlatformDescriptor>>;

    /// List devices of `platform` passing `filter`. Fails with `NoDeviceAvailable` when empty.
    fn enumerate_devices(&self, platform: PlatformId, filter: DeviceType) -> Result<Vec<DeviceDescriptor>>;

    /// Bind `devices` into one execution context.
    fn create_context(&self, devices: &[DeviceId]) -> Result<ContextHandle>;

    /// Create an in-order queue targeting `device` within `context`.
    fn create_command_queue(&self, context: ContextHandle, device: DeviceId) -> Result<QueueHandle>;

    /// Allocate `size_bytes` of device memory with a fixed access mode.
    fn allocate_buffer(&self, context: ContextHandle, size_bytes: usize, access: AccessMode) -> Result<DeviceBuffer>;

    /// Upload `data` into `buffer`. `data.len()` must equal the buffer size.
    fn write_buffer(&self, queue: QueueHandle, buffer: &DeviceBuffer, data: &[u8], mode: TransferMode) -> Result<()>;

    /// Blocking read-back of `buffer` into `data`. `data.len()` must equal the buffer size.
    fn read_buffer(&self, queue: QueueHandle, buffer: &DeviceBuffer, data: &mut [u8]) -> Result<()>;

    /// Compile `source` for `devices`. Fails with `BuildFailed` carrying the compiler log.
    fn compile_program(
        &self,
        context: ContextHandle,
        devices: &[DeviceId],
        source: &str,
        options: &str,
    ) -> Result<ProgramHandle>;

    /// Look up the kernel named `entry_point` in `program`.
    fn create_kernel(&self, program: ProgramHandle, entry_point: &str) -> Result<KernelHandle>;

    /// Number of arguments the kernel declares.
    fn kernel_arity(&self, kernel: KernelHandle) -> Result<usize>;

    /// Element type the kernel declares for buffer argument `index`, as spelled in
    /// OpenCL C (`"int"`, `"float"`). `None` when the backend cannot tell.
    fn argument_element_type(&self, kernel: KernelHandle, index: usize) -> Result<Option<String>>;

    /// Bind `buffer` to argument `index`. Fails with `InvalidArgumentIndex` past the arity.
    fn set_kernel_argument(&self, kernel: KernelHandle, index: usize, buffer: &DeviceBuffer) -> Result<()>;

    /// Launch `global` work-items in groups of `local` (backend's choice when `None`).
    fn enqueue_dispatch(&self, queue: QueueHandle, kernel: KernelHandle, global: usize, local: Option<usize>)
    -> Result<()>;

    /// Wait until everything submitted to `queue` has completed.
    fn finish(&self, queue: QueueHandle) -> Result<()>;

    /// Release a handle. Releasing an unknown or already released handle fails with `UnknownHandle`.
    fn release(&self, resource: Resource) -> Result<()>;

    /// Objects currently alive.
    fn live_resources(&self) -> ResourceCounts;
}

/// Validate an NDRange request against a device limit.
///
/// An explicit `local` must be non-zero, divide `global` evenly and fit the
/// device; work is never truncated to make it fit.
pub fn validate_work_size(global: usize, local: Option<usize>, max_work_group_size: usize) -> Result<()> {
    ensure!(global > 0, DispatchFailedSnafu { reason: "global work size must be non-zero" });

    if let Some(local) = local {
        ensure!(local > 0, DispatchFailedSnafu { reason: "local work size must be non-zero" });
        ensure!(
            global % local == 0,
            DispatchFailedSnafu {
                reason: format!("local work size {local} does not evenly divide global work size {global}")
            }
        );
        ensure!(
            local <= max_work_group_size,
            DispatchFailedSnafu {
                reason: format!("local work size {local} exceeds device maximum {max_work_group_size}")
            }
        );
    }

    Ok(())
}

/// Pick a work-group size when the caller leaves it to the backend.
///
/// Returns the largest divisor of `global` not above `max_work_group_size`.
pub fn default_local_size(global: usize, max_work_group_size: usize) -> usize {
    let limit = max_work_group_size.clamp(1, global.max(1));
    (1..=limit).rev().find(|candidate| global % candidate == 0).unwrap_or(1)
}
