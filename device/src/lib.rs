//! Device abstraction for the offload pipeline.
//!
//! The [`DeviceBackend`] trait models the host side of an accelerator compute
//! API: platform and device discovery, contexts and command queues, device
//! memory, program compilation and NDRange dispatch. Two implementations ship
//! with the crate:
//!
//! - [`HostBackend`]: runs kernels written in a subset of OpenCL C on the
//!   calling thread. Always available; used by tests.
//! - `OpenClBackend` (feature `opencl`): the vendor OpenCL runtime.
//!
//! Backends are shared through the process-wide [`registry`].

pub mod backend;
pub mod descriptor;
pub mod error;
pub mod handle;
pub mod host;
#[cfg(feature = "opencl")]
pub mod opencl;
pub mod registry;
pub mod scoped;

#[cfg(test)]
mod test;

pub use backend::{DeviceBackend, default_local_size, validate_work_size};
pub use descriptor::{AccessMode, DeviceBuffer, DeviceDescriptor, DeviceType, PlatformDescriptor, TransferMode};
pub use error::{Error, Result};
pub use handle::{
    BufferHandle, ContextHandle, DeviceId, KernelHandle, PlatformId, ProgramHandle, QueueHandle, Resource,
    ResourceCounts, ResourceKind,
};
pub use host::HostBackend;
#[cfg(feature = "opencl")]
pub use opencl::OpenClBackend;
pub use registry::{BackendKind, BackendRegistry, registry};
pub use scoped::{Releasable, Scoped, ScopedBuffer, ScopedContext, ScopedKernel, ScopedProgram, ScopedQueue};
