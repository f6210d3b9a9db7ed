//! Kernel programs: source text plus the entry point to launch.

use std::borrow::Cow;
use std::path::Path;

use offload_device::{ContextHandle, DeviceBackend, DeviceId, ScopedKernel, ScopedProgram};
use snafu::ResultExt;

use crate::error::{KernelSourceIoSnafu, Result};

/// Kernel source text, either embedded or loaded at run time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSource(Cow<'static, str>);

impl KernelSource {
    pub const fn from_static(source: &'static str) -> Self {
        Self(Cow::Borrowed(source))
    }

    /// Read a `.cl` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).context(KernelSourceIoSnafu { path })?;
        tracing::debug!(path = %path.display(), bytes = source.len(), "loaded kernel source");
        Ok(Self(Cow::Owned(source)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for KernelSource {
    fn from(source: String) -> Self {
        Self(Cow::Owned(source))
    }
}

impl From<&'static str> for KernelSource {
    fn from(source: &'static str) -> Self {
        Self::from_static(source)
    }
}

/// Device code and the name of the kernel function to dispatch.
///
/// The entry point takes the read-only inputs first, followed by the
/// write-only outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelProgram {
    source: KernelSource,
    entry_point: Cow<'static, str>,
}

impl KernelProgram {
    pub const fn from_static(source: &'static str, entry_point: &'static str) -> Self {
        Self { source: KernelSource::from_static(source), entry_point: Cow::Borrowed(entry_point) }
    }

    pub fn new(source: impl Into<KernelSource>, entry_point: impl Into<String>) -> Self {
        Self { source: source.into(), entry_point: Cow::Owned(entry_point.into()) }
    }

    pub fn from_file(path: impl AsRef<Path>, entry_point: impl Into<String>) -> Result<Self> {
        Ok(Self::new(KernelSource::from_file(path)?, entry_point))
    }

    pub fn source(&self) -> &str {
        self.source.as_str()
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Replace the source. Needs exclusive access, so no compiled form of
    /// this program can be alive at the same time.
    pub fn set_source(&mut self, source: impl Into<KernelSource>) {
        self.source = source.into();
    }

    /// Compile for `devices` of `context`.
    pub fn compile<'p, 'b>(
        &'p self,
        backend: &'b dyn DeviceBackend,
        context: ContextHandle,
        devices: &[DeviceId],
        options: &str,
    ) -> offload_device::Result<CompiledProgram<'p, 'b>> {
        let handle = backend.compile_program(context, devices, self.source(), options)?;
        tracing::debug!(entry_point = self.entry_point(), program = %handle, "program built");
        Ok(CompiledProgram {
            program: self,
            handle: ScopedProgram::new(backend, handle),
            backend,
            context,
            devices: devices.to_vec(),
        })
    }
}

/// A program built for a particular context.
///
/// Borrows its [`KernelProgram`] and releases the backend program on drop.
#[derive(Debug)]
pub struct CompiledProgram<'p, 'b> {
    program: &'p KernelProgram,
    handle: ScopedProgram<'b>,
    backend: &'b dyn DeviceBackend,
    context: ContextHandle,
    devices: Vec<DeviceId>,
}

impl<'p, 'b> CompiledProgram<'p, 'b> {
    pub fn program(&self) -> &'p KernelProgram {
        self.program
    }

    pub fn handle(&self) -> &ScopedProgram<'b> {
        &self.handle
    }

    /// Whether this build can run on `device` within `context`.
    pub fn is_valid_for(&self, context: ContextHandle, device: DeviceId) -> bool {
        self.context == context && self.devices.contains(&device)
    }

    /// Instantiate the entry point.
    pub fn create_kernel(&self) -> offload_device::Result<ScopedKernel<'b>> {
        let kernel = self.backend.create_kernel(*self.handle.get(), self.program.entry_point())?;
        Ok(ScopedKernel::new(self.backend, kernel))
    }
}

/// Built-in kernels.
pub mod kernels {
    use super::KernelProgram;

    /// `c[i] = a[i] + b[i]`, entry point `vecadd`.
    pub const VECADD: KernelProgram = KernelProgram::from_static(
        r#"__kernel void vecadd(__global const int *a,
                     __global const int *b,
                     __global int *c)
{
    int idx = get_global_id(0);
    c[idx] = a[idx] + b[idx];
}
"#,
        "vecadd",
    );

    /// `c[i] = a[i] - b[i]`, entry point `vecsub`.
    pub const VECSUB: KernelProgram = KernelProgram::from_static(
        r#"__kernel void vecsub(__global const int *a,
                     __global const int *b,
                     __global int *c)
{
    int idx = get_global_id(0);
    c[idx] = a[idx] - b[idx];
}
"#,
        "vecsub",
    );
}
