use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::backend::DeviceBackend;
use crate::error::{InvalidBackendSnafu, Result};
use crate::host::HostBackend;

/// Backend implementation selector.
///
/// Parsing is case-insensitive:
/// - "host" / "cpu" -> BackendKind::Host
/// - "opencl" / "cl" -> BackendKind::OpenCl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display, strum::EnumString, strum::EnumIter)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BackendKind {
    /// Reference interpreter, always available.
    #[default]
    #[strum(to_string = "host", serialize = "cpu")]
    Host,
    /// Vendor OpenCL runtime (requires the `opencl` feature).
    #[strum(to_string = "opencl", serialize = "cl")]
    OpenCl,
}

impl BackendKind {
    /// Parse a backend name, reporting unknown names as `InvalidBackend`.
    pub fn parse(s: &str) -> Result<Self> {
        Self::from_str(s.trim()).map_err(|_| InvalidBackendSnafu { backend: s }.build())
    }

    /// Select backend from environment variable `OFFLOAD_BACKEND`.
    ///
    /// Unset selects the host backend; an unrecognised value is an error.
    pub fn from_env() -> Result<Self> {
        match std::env::var("OFFLOAD_BACKEND") {
            Ok(value) => Self::parse(&value),
            Err(_) => Ok(BackendKind::default()),
        }
    }

    /// Whether this build can construct the backend.
    pub fn is_available(self) -> bool {
        match self {
            BackendKind::Host => true,
            BackendKind::OpenCl => cfg!(feature = "opencl"),
        }
    }
}

/// Process-wide cache of backend instances, one per kind.
pub struct BackendRegistry {
    backends: RwLock<HashMap<BackendKind, Arc<dyn DeviceBackend>>>,
}

impl BackendRegistry {
    fn new() -> Self {
        Self { backends: RwLock::new(HashMap::new()) }
    }

    /// Get or create the backend for `kind`.
    pub fn get(&self, kind: BackendKind) -> Result<Arc<dyn DeviceBackend>> {
        // Fast path: read lock
        {
            let backends = self.backends.read();
            if let Some(backend) = backends.get(&kind) {
                return Ok(Arc::clone(backend));
            }
        }

        let mut backends = self.backends.write();

        // Double-check after acquiring write lock
        if let Some(backend) = backends.get(&kind) {
            return Ok(Arc::clone(backend));
        }

        let backend = create_backend(kind)?;
        tracing::debug!(backend = %kind, "backend initialised");
        backends.insert(kind, Arc::clone(&backend));
        Ok(backend)
    }

    /// Get a backend by name ("host", "opencl", ...).
    pub fn get_by_name(&self, name: &str) -> Result<Arc<dyn DeviceBackend>> {
        self.get(BackendKind::parse(name)?)
    }
}

fn create_backend(kind: BackendKind) -> Result<Arc<dyn DeviceBackend>> {
    match kind {
        BackendKind::Host => Ok(Arc::new(HostBackend::default())),
        #[cfg(feature = "opencl")]
        BackendKind::OpenCl => Ok(Arc::new(crate::opencl::OpenClBackend::new())),
        #[cfg(not(feature = "opencl"))]
        BackendKind::OpenCl => InvalidBackendSnafu { backend: "opencl (built without the `opencl` feature)" }.fail(),
    }
}

/// Global backend registry instance.
static REGISTRY: Lazy<BackendRegistry> = Lazy::new(BackendRegistry::new);

/// Get the global backend registry.
pub fn registry() -> &'static BackendRegistry {
    &REGISTRY
}

/// Backend selected by `OFFLOAD_BACKEND`.
pub fn from_env() -> Result<Arc<dyn DeviceBackend>> {
    registry().get(BackendKind::from_env()?)
}

/// Convenience function to get the shared host backend.
pub fn host() -> Result<Arc<dyn DeviceBackend>> {
    registry().get(BackendKind::Host)
}
