//! The offload pipeline.
//!
//! One run walks the fixed sequence
//!
//! ```text
//! Init → PlatformSelected → ContextReady → BuffersAllocated → DataUploaded
//!      → KernelBuilt → ArgsBound → Dispatched → ResultsRetrieved [→ Verified]
//! ```
//!
//! and stops at the first failure. Every device object is held by a
//! [`Scoped`](offload_device::Scoped) guard, so whatever was acquired is
//! released on every exit path, in reverse order of acquisition.

use std::sync::Arc;

use offload_device::error::{NoDeviceAvailableSnafu, NoPlatformAvailableSnafu};
use offload_device::{AccessMode, DeviceBackend, DeviceId, ScopedBuffer, ScopedContext, ScopedQueue, TransferMode};
use snafu::{OptionExt, ResultExt, ensure};

use crate::buffer::{Element, HostBuffer};
use crate::config::PipelineConfig;
use crate::error::{
    DeviceSnafu, ElementCountMismatchSnafu, ElementTypeMismatchSnafu, EmptyBufferSnafu, Error, NoInputsSnafu, Result,
    VerificationFailedSnafu,
};
use crate::kernel::KernelProgram;
use crate::verify::{Verdict, verify_detailed};

/// Steps of a run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PipelineStage {
    Init,
    PlatformSelected,
    ContextReady,
    BuffersAllocated,
    DataUploaded,
    KernelBuilt,
    ArgsBound,
    Dispatched,
    ResultsRetrieved,
    Verified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum PipelineStatus {
    Success,
    Failure,
}

/// Outcome of one run.
///
/// On success `stage` is the last stage reached; on failure it is the stage
/// that could not be completed and `error` holds the cause.
#[derive(Debug)]
pub struct PipelineResult<T: Element = i32> {
    pub outputs: Vec<HostBuffer<T>>,
    pub status: PipelineStatus,
    pub stage: PipelineStage,
    pub error: Option<Error>,
}

impl<T: Element> PipelineResult<T> {
    fn success(outputs: Vec<HostBuffer<T>>, stage: PipelineStage) -> Self {
        Self { outputs, status: PipelineStatus::Success, stage, error: None }
    }

    fn failure(outputs: Vec<HostBuffer<T>>, error: Error) -> Self {
        let stage = match &error {
            Error::Device { stage, .. } => *stage,
            Error::ElementTypeMismatch { .. } => PipelineStage::ArgsBound,
            Error::VerificationFailed { .. } => PipelineStage::Verified,
            _ => PipelineStage::Init,
        };
        Self { outputs, status: PipelineStatus::Failure, stage, error: Some(error) }
    }

    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Success
    }

    /// Human-readable failure description. Compiler logs are included verbatim.
    pub fn diagnostic(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }

    /// The backend error behind a failure, if any.
    pub fn device_error(&self) -> Option<&offload_device::Error> {
        self.error.as_ref().and_then(Error::device_error)
    }

    pub fn into_result(self) -> Result<Vec<HostBuffer<T>>> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.outputs),
        }
    }
}

/// Drives a [`DeviceBackend`] through one kernel invocation per run.
#[derive(Debug, Clone)]
pub struct OffloadPipeline {
    backend: Arc<dyn DeviceBackend>,
    config: PipelineConfig,
}

impl OffloadPipeline {
    pub fn new(backend: Arc<dyn DeviceBackend>, config: PipelineConfig) -> Self {
        Self { backend, config }
    }

    /// Backend from `OFFLOAD_BACKEND`, configuration from the other `OFFLOAD_*` variables.
    pub fn from_env() -> Result<Self> {
        let backend = offload_device::registry::from_env().context(DeviceSnafu { stage: PipelineStage::Init })?;
        Ok(Self::new(backend, PipelineConfig::from_env()?))
    }

    pub fn backend(&self) -> &dyn DeviceBackend {
        self.backend.as_ref()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run `kernel` over `element_count` work-items.
    ///
    /// `inputs` are bound to the leading kernel arguments in order, followed by
    /// `config.output_count` write-only outputs that are returned as fresh
    /// host buffers.
    #[tracing::instrument(
        skip_all,
        fields(backend = self.backend.name(), kernel = kernel.entry_point(), element_count = element_count)
    )]
    pub fn run<T: Element>(
        &self,
        inputs: &[&HostBuffer<T>],
        kernel: &KernelProgram,
        element_count: usize,
    ) -> PipelineResult<T> {
        match self.execute(inputs, kernel, element_count) {
            Ok(outputs) => {
                tracing::debug!(outputs = outputs.len(), "offload run complete");
                PipelineResult::success(outputs, PipelineStage::ResultsRetrieved)
            }
            Err(error) => {
                tracing::warn!(%error, "offload run failed");
                PipelineResult::failure(Vec::new(), error)
            }
        }
    }

    /// [`run`](Self::run), then check every output against `reference`.
    ///
    /// `reference` recomputes the whole expected output from the inputs; a
    /// reference error fails the run at [`PipelineStage::Verified`].
    pub fn run_and_verify<T, F>(
        &self,
        inputs: &[&HostBuffer<T>],
        kernel: &KernelProgram,
        element_count: usize,
        reference: F,
    ) -> PipelineResult<T>
    where
        T: Element,
        F: Fn(&[&HostBuffer<T>]) -> Result<HostBuffer<T>>,
    {
        let result = self.run(inputs, kernel, element_count);
        if !result.is_success() {
            return result;
        }

        let mismatch = result.outputs.iter().find_map(|output| match verify_detailed(output, inputs, &reference) {
            Err(error) => Some(error),
            Ok(Verdict::Match) => None,
            Ok(Verdict::Mismatch { index, expected, actual }) => Some(
                VerificationFailedSnafu { index, expected: format!("{expected:?}"), actual: format!("{actual:?}") }
                    .build(),
            ),
            Ok(Verdict::LengthMismatch { expected, actual }) => Some(
                VerificationFailedSnafu {
                    index: expected.min(actual),
                    expected: format!("{expected} elements"),
                    actual: format!("{actual} elements"),
                }
                .build(),
            ),
        });

        match mismatch {
            Some(error) => {
                tracing::warn!(%error, "device output rejected");
                PipelineResult { stage: PipelineStage::Verified, ..PipelineResult::failure(result.outputs, error) }
            }
            None => {
                tracing::debug!("device output verified");
                PipelineResult::success(result.outputs, PipelineStage::Verified)
            }
        }
    }

    fn execute<T: Element>(
        &self,
        inputs: &[&HostBuffer<T>],
        kernel: &KernelProgram,
        element_count: usize,
    ) -> Result<Vec<HostBuffer<T>>> {
        self.config.validate()?;
        ensure!(!inputs.is_empty(), NoInputsSnafu);
        ensure!(element_count > 0, EmptyBufferSnafu);
        for (index, input) in inputs.iter().enumerate() {
            ensure!(
                input.element_count() == element_count,
                ElementCountMismatchSnafu { index, expected: element_count, actual: input.element_count() }
            );
        }

        let backend = self.backend.as_ref();
        let size_bytes = inputs[0].size_bytes();

        let stage = PipelineStage::PlatformSelected;
        let platform = backend
            .enumerate_platforms()
            .and_then(|platforms| platforms.into_iter().next().context(NoPlatformAvailableSnafu))
            .context(DeviceSnafu { stage })?;
        let devices = backend
            .enumerate_devices(platform.id, self.config.device_type)
            .context(DeviceSnafu { stage })?;
        let primary = devices
            .first()
            .context(NoDeviceAvailableSnafu { platform: platform.name.as_str(), filter: self.config.device_type })
            .context(DeviceSnafu { stage })?;
        let device_ids: Vec<DeviceId> = devices.iter().map(|device| device.id).collect();
        tracing::debug!(
            platform = %platform.name,
            device = %primary.name,
            devices = device_ids.len(),
            "platform selected"
        );

        // One queue on the first device; any further devices only join the context.
        let stage = PipelineStage::ContextReady;
        let context =
            ScopedContext::new(backend, backend.create_context(&device_ids).context(DeviceSnafu { stage })?);
        let queue = ScopedQueue::new(
            backend,
            backend.create_command_queue(*context, primary.id).context(DeviceSnafu { stage })?,
        );

        let stage = PipelineStage::BuffersAllocated;
        let allocate = |access: AccessMode| {
            backend
                .allocate_buffer(*context, size_bytes, access)
                .map(|buffer| ScopedBuffer::new(backend, buffer))
                .context(DeviceSnafu { stage })
        };
        let input_buffers =
            inputs.iter().map(|_| allocate(AccessMode::ReadOnly)).collect::<Result<Vec<_>>>()?;
        let output_buffers =
            (0..self.config.output_count).map(|_| allocate(AccessMode::WriteOnly)).collect::<Result<Vec<_>>>()?;
        tracing::debug!(
            inputs = input_buffers.len(),
            outputs = output_buffers.len(),
            element = T::NAME,
            size_bytes,
            "buffers allocated"
        );

        let stage = PipelineStage::DataUploaded;
        let mode = self.config.transfer_mode();
        for (buffer, input) in input_buffers.iter().zip(inputs) {
            backend.write_buffer(*queue, buffer, input.as_bytes(), mode).context(DeviceSnafu { stage })?;
        }
        if mode == TransferMode::NonBlocking {
            backend.finish(*queue).context(DeviceSnafu { stage })?;
        }

        let stage = PipelineStage::KernelBuilt;
        let compiled = kernel
            .compile(backend, *context, &device_ids, &self.config.build_options)
            .context(DeviceSnafu { stage })?;
        let device_kernel = compiled.create_kernel().context(DeviceSnafu { stage })?;

        let stage = PipelineStage::ArgsBound;
        let arity = backend.kernel_arity(*device_kernel).context(DeviceSnafu { stage })?;
        let bound = input_buffers.len() + output_buffers.len();
        if arity != bound {
            tracing::warn!(arity, bound, entry_point = kernel.entry_point(), "kernel arity differs from bound buffers");
        }
        for index in 0..arity.min(bound) {
            let declared = backend.argument_element_type(*device_kernel, index).context(DeviceSnafu { stage })?;
            if let Some(declared) = declared {
                ensure!(declared == T::NAME, ElementTypeMismatchSnafu { index, declared, element: T::NAME });
            }
        }
        for (index, buffer) in input_buffers.iter().chain(&output_buffers).enumerate() {
            backend.set_kernel_argument(*device_kernel, index, buffer).context(DeviceSnafu { stage })?;
        }

        let stage = PipelineStage::Dispatched;
        backend
            .enqueue_dispatch(*queue, *device_kernel, element_count, self.config.local_work_size)
            .context(DeviceSnafu { stage })?;
        backend.finish(*queue).context(DeviceSnafu { stage })?;

        let stage = PipelineStage::ResultsRetrieved;
        output_buffers
            .iter()
            .map(|buffer| -> Result<HostBuffer<T>> {
                let mut output = HostBuffer::<T>::zeroed(element_count)?;
                backend.read_buffer(*queue, buffer, output.as_bytes_mut()).context(DeviceSnafu { stage })?;
                Ok(output)
            })
            .collect()
    }
}
