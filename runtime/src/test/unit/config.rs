use std::collections::HashMap;

use offload_device::{DeviceType, TransferMode};
use test_case::test_case;

use crate::{Error, PipelineConfig};

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn test_defaults() {
    let config = PipelineConfig::default();
    assert_eq!(config.device_type, DeviceType::Any);
    assert_eq!(config.local_work_size, None);
    assert_eq!(config.output_count, 1);
    assert!(config.blocking_transfers);
    assert!(config.build_options.is_empty());
    assert_eq!(config.transfer_mode(), TransferMode::Blocking);
    assert_eq!(PipelineConfig::from_lookup(lookup(&[])).unwrap(), config);
}

#[test]
fn test_builder() {
    let config = PipelineConfig::builder()
        .device_type(DeviceType::Gpu)
        .local_work_size(64)
        .output_count(2)
        .blocking_transfers(false)
        .build_options("-cl-fast-relaxed-math")
        .build();
    assert_eq!(config.local_work_size, Some(64));
    assert_eq!(config.build_options, "-cl-fast-relaxed-math");
    assert_eq!(config.transfer_mode(), TransferMode::NonBlocking);
}

#[test]
fn test_from_lookup() {
    let config = PipelineConfig::from_lookup(lookup(&[
        ("OFFLOAD_DEVICE_TYPE", "GPU"),
        ("OFFLOAD_LOCAL_SIZE", " 128 "),
        ("OFFLOAD_OUTPUTS", "2"),
        ("OFFLOAD_BUILD_OPTIONS", "-Werror"),
    ]))
    .unwrap();
    assert_eq!(config.device_type, DeviceType::Gpu);
    assert_eq!(config.local_work_size, Some(128));
    assert_eq!(config.output_count, 2);
    assert_eq!(config.build_options, "-Werror");
}

#[test_case("1", false; "one")]
#[test_case("TRUE", false; "true_uppercase")]
#[test_case("yes", false; "yes")]
#[test_case("0", true; "zero")]
#[test_case("off", true; "off")]
fn test_nonblocking_flag(value: &str, blocking: bool) {
    let config = PipelineConfig::from_lookup(lookup(&[("OFFLOAD_NONBLOCKING", value)])).unwrap();
    assert_eq!(config.blocking_transfers, blocking);
}

#[test_case("OFFLOAD_DEVICE_TYPE", "fpga"; "unknown_device_type")]
#[test_case("OFFLOAD_LOCAL_SIZE", "-4"; "negative_local_size")]
#[test_case("OFFLOAD_LOCAL_SIZE", "0"; "zero_local_size")]
#[test_case("OFFLOAD_OUTPUTS", "0"; "no_outputs")]
#[test_case("OFFLOAD_OUTPUTS", "many"; "unparsable_outputs")]
fn test_from_lookup_rejects(key: &str, value: &str) {
    let err = PipelineConfig::from_lookup(lookup(&[(key, value)])).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig { .. }), "unexpected error: {err}");
}

#[test]
fn test_invalid_config_message() {
    let err = PipelineConfig::from_lookup(lookup(&[("OFFLOAD_DEVICE_TYPE", "fpga")])).unwrap_err();
    assert_eq!(err.to_string(), "invalid pipeline configuration: OFFLOAD_DEVICE_TYPE: cannot parse 'fpga'");
}
