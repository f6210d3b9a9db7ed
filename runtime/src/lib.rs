//! Host-orchestrated offload of element-wise kernels.
//!
//! [`OffloadPipeline`] moves [`HostBuffer`]s into device memory, builds and
//! launches a [`KernelProgram`] over one work-item per element, reads the
//! outputs back into fresh host buffers and optionally checks them against a
//! host reference with the [`verify`] module.
//!
//! ```no_run
//! use offload_runtime::{HostBuffer, OffloadPipeline, PipelineConfig, kernels, verify};
//!
//! let backend = offload_device::registry::host()?;
//! let pipeline = OffloadPipeline::new(backend, PipelineConfig::default());
//!
//! let a = HostBuffer::new(vec![0, 1, 2, 3])?;
//! let b = HostBuffer::new(vec![0, 1, 2, 3])?;
//! let result = pipeline.run_and_verify(&[&a, &b], &kernels::VECADD, 4, verify::reference::wrapping_add);
//! assert_eq!(result.into_result()?[0].as_slice(), &[0, 2, 4, 6]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod kernel;
pub mod pipeline;
pub mod verify;

#[cfg(test)]
mod test;

pub use buffer::{Element, HostBuffer};
pub use config::PipelineConfig;
pub use error::*;
pub use kernel::{CompiledProgram, KernelProgram, KernelSource, kernels};
pub use pipeline::{OffloadPipeline, PipelineResult, PipelineStage, PipelineStatus};
pub use verify::{Verdict, verify, verify_detailed};
