//! Pipeline configuration.
//!
//! Built with [`PipelineConfig::builder`] or read from the environment:
//!
//! | Variable | Values | Default |
//! |---|---|---|
//! | `OFFLOAD_DEVICE_TYPE` | `gpu`, `cpu`, `accelerator`, `any` | `any` |
//! | `OFFLOAD_LOCAL_SIZE` | work-group size | backend's choice |
//! | `OFFLOAD_OUTPUTS` | number of output buffers | `1` |
//! | `OFFLOAD_BUILD_OPTIONS` | compiler flags | empty |
//! | `OFFLOAD_NONBLOCKING` | `1`/`true` for non-blocking uploads | blocking |

use std::str::FromStr;

use bon::bon;
use offload_device::{DeviceType, TransferMode};
use snafu::ensure;

use crate::error::{InvalidConfigSnafu, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Device type filter applied to the first platform.
    pub device_type: DeviceType,
    /// Work-group size; `None` lets the backend choose.
    pub local_work_size: Option<usize>,
    /// Number of write-only output buffers bound after the inputs.
    pub output_count: usize,
    /// Upload mode. Non-blocking uploads are awaited with `finish` before dispatch.
    pub blocking_transfers: bool,
    pub build_options: String,
}

#[bon]
impl PipelineConfig {
    #[builder]
    pub fn builder(
        #[builder(default)] device_type: DeviceType,
        local_work_size: Option<usize>,
        #[builder(default = 1)] output_count: usize,
        #[builder(default = true)] blocking_transfers: bool,
        #[builder(default, into)] build_options: String,
    ) -> Self {
        Self { device_type, local_work_size, output_count, blocking_transfers, build_options }
    }

    /// Read the configuration from `OFFLOAD_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let device_type = parse_var(&lookup, "OFFLOAD_DEVICE_TYPE")?.unwrap_or_default();
        let local_work_size = parse_var(&lookup, "OFFLOAD_LOCAL_SIZE")?;
        let output_count = parse_var(&lookup, "OFFLOAD_OUTPUTS")?.unwrap_or(1);
        let blocking_transfers = !lookup("OFFLOAD_NONBLOCKING")
            .is_some_and(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"));
        let build_options = lookup("OFFLOAD_BUILD_OPTIONS").unwrap_or_default();

        let config = Self::builder()
            .device_type(device_type)
            .maybe_local_work_size(local_work_size)
            .output_count(output_count)
            .blocking_transfers(blocking_transfers)
            .build_options(build_options)
            .build();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.output_count > 0, InvalidConfigSnafu { reason: "at least one output buffer is required" });
        ensure!(
            self.local_work_size != Some(0),
            InvalidConfigSnafu { reason: "local work size must be non-zero" }
        );
        Ok(())
    }

    pub fn transfer_mode(&self) -> TransferMode {
        if self.blocking_transfers { TransferMode::Blocking } else { TransferMode::NonBlocking }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().parse() {
        Ok(value) => Ok(Some(value)),
        Err(_) => InvalidConfigSnafu { reason: format!("{key}: cannot parse '{raw}'") }.fail(),
    }
}
