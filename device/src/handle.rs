//! Typed handles for backend-owned objects.
//!
//! Backends hand out opaque `u64` identifiers wrapped in one newtype per object
//! kind, so a buffer handle can never be passed where a kernel is expected.
//! Every releasable handle converts into a [`Resource`], the unit accepted by
//! [`DeviceBackend::release`](crate::DeviceBackend::release).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }
    };
}

define_handle!(
    /// Identifies a platform (vendor runtime instance).
    PlatformId,
    "platform"
);
define_handle!(
    /// Identifies a device exposed by a platform.
    DeviceId,
    "device"
);
define_handle!(ContextHandle, "context");
define_handle!(QueueHandle, "queue");
define_handle!(BufferHandle, "buffer");
define_handle!(ProgramHandle, "program");
define_handle!(KernelHandle, "kernel");

/// Kind of a releasable backend object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum ResourceKind {
    Context,
    Queue,
    Buffer,
    Program,
    Kernel,
}

/// A releasable backend object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Context(ContextHandle),
    Queue(QueueHandle),
    Buffer(BufferHandle),
    Program(ProgramHandle),
    Kernel(KernelHandle),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Context(_) => ResourceKind::Context,
            Resource::Queue(_) => ResourceKind::Queue,
            Resource::Buffer(_) => ResourceKind::Buffer,
            Resource::Program(_) => ResourceKind::Program,
            Resource::Kernel(_) => ResourceKind::Kernel,
        }
    }

    pub fn raw(&self) -> u64 {
        match self {
            Resource::Context(h) => h.raw(),
            Resource::Queue(h) => h.raw(),
            Resource::Buffer(h) => h.raw(),
            Resource::Program(h) => h.raw(),
            Resource::Kernel(h) => h.raw(),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind(), self.raw())
    }
}

impl From<ContextHandle> for Resource {
    fn from(h: ContextHandle) -> Self {
        Resource::Context(h)
    }
}

impl From<QueueHandle> for Resource {
    fn from(h: QueueHandle) -> Self {
        Resource::Queue(h)
    }
}

impl From<BufferHandle> for Resource {
    fn from(h: BufferHandle) -> Self {
        Resource::Buffer(h)
    }
}

impl From<ProgramHandle> for Resource {
    fn from(h: ProgramHandle) -> Self {
        Resource::Program(h)
    }
}

impl From<KernelHandle> for Resource {
    fn from(h: KernelHandle) -> Self {
        Resource::Kernel(h)
    }
}

/// Live object counts reported by [`DeviceBackend::live_resources`](crate::DeviceBackend::live_resources).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceCounts {
    pub contexts: usize,
    pub queues: usize,
    pub buffers: usize,
    pub programs: usize,
    pub kernels: usize,
}

impl ResourceCounts {
    pub fn total(&self) -> usize {
        self.contexts + self.queues + self.buffers + self.programs + self.kernels
    }

    pub fn get(&self, kind: ResourceKind) -> usize {
        match kind {
            ResourceKind::Context => self.contexts,
            ResourceKind::Queue => self.queues,
            ResourceKind::Buffer => self.buffers,
            ResourceKind::Program => self.programs,
            ResourceKind::Kernel => self.kernels,
        }
    }

    pub fn get_mut(&mut self, kind: ResourceKind) -> &mut usize {
        match kind {
            ResourceKind::Context => &mut self.contexts,
            ResourceKind::Queue => &mut self.queues,
            ResourceKind::Buffer => &mut self.buffers,
            ResourceKind::Program => &mut self.programs,
            ResourceKind::Kernel => &mut self.kernels,
        }
    }
}

/// Monotonic source of raw handle values. Zero is never issued.
#[derive(Debug, Default)]
pub struct HandleSource {
    next: AtomicU64,
}

impl HandleSource {
    pub const fn new() -> Self {
        Self { next: AtomicU64::new(0) }
    }

    pub fn next_raw(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}
