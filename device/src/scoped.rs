//! Scoped acquisition of backend objects.

use std::ops::Deref;

use crate::backend::DeviceBackend;
use crate::descriptor::DeviceBuffer;
use crate::handle::{ContextHandle, KernelHandle, ProgramHandle, QueueHandle, Resource};

/// Anything that maps onto a single releasable backend object.
pub trait Releasable {
    fn resource(&self) -> Resource;
}

macro_rules! releasable_handle {
    ($($handle:ty),* $(,)?) => {
        $(
            impl Releasable for $handle {
                fn resource(&self) -> Resource {
                    Resource::from(*self)
                }
            }
        )*
    };
}

releasable_handle!(ContextHandle, QueueHandle, ProgramHandle, KernelHandle);

impl Releasable for DeviceBuffer {
    fn resource(&self) -> Resource {
        Resource::Buffer(self.handle())
    }
}

/// Owns a backend object and releases it when dropped.
///
/// Guards declared later drop first, so kernels go before programs, buffers
/// before queues and everything before the context.
#[derive(Debug)]
pub struct Scoped<'b, T: Releasable> {
    backend: &'b dyn DeviceBackend,
    value: T,
}

impl<'b, T: Releasable> Scoped<'b, T> {
    pub fn new(backend: &'b dyn DeviceBackend, value: T) -> Self {
        tracing::trace!(resource = %value.resource(), backend = backend.name(), "acquired");
        Self { backend, value }
    }

    pub fn get(&self) -> &T {
        &self.value
    }
}

impl<T: Releasable> Deref for Scoped<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Releasable> Drop for Scoped<'_, T> {
    fn drop(&mut self) {
        let resource = self.value.resource();
        match self.backend.release(resource) {
            Ok(()) => tracing::trace!(%resource, "released"),
            Err(error) => tracing::warn!(%resource, %error, "failed to release device resource"),
        }
    }
}

pub type ScopedContext<'b> = Scoped<'b, ContextHandle>;
pub type ScopedQueue<'b> = Scoped<'b, QueueHandle>;
pub type ScopedBuffer<'b> = Scoped<'b, DeviceBuffer>;
pub type ScopedProgram<'b> = Scoped<'b, ProgramHandle>;
pub type ScopedKernel<'b> = Scoped<'b, KernelHandle>;
