use std::str::FromStr;

use test_case::test_case;

use crate::handle::HandleSource;
use crate::{
    AccessMode, BufferHandle, DeviceType, Error, Resource, ResourceCounts, ResourceKind, default_local_size,
    validate_work_size,
};

#[test_case("gpu", DeviceType::Gpu; "gpu")]
#[test_case("CPU", DeviceType::Cpu; "cpu_uppercase")]
#[test_case("accelerator", DeviceType::Accelerator; "accelerator")]
#[test_case("acc", DeviceType::Accelerator; "acc_alias")]
#[test_case("any", DeviceType::Any; "any")]
#[test_case("All", DeviceType::Any; "all_alias")]
fn test_device_type_parse(input: &str, expected: DeviceType) {
    assert_eq!(DeviceType::from_str(input).unwrap(), expected);
}

#[test]
fn test_device_type_parse_invalid() {
    assert!(DeviceType::from_str("fpga").is_err());
}

#[test]
fn test_device_type_display() {
    assert_eq!(DeviceType::Accelerator.to_string(), "accelerator");
    assert_eq!(DeviceType::Any.to_string(), "any");
    assert_eq!(DeviceType::default(), DeviceType::Any);
}

#[test]
fn test_device_type_matches() {
    assert!(DeviceType::Gpu.matches(DeviceType::Any));
    assert!(DeviceType::Gpu.matches(DeviceType::Gpu));
    assert!(!DeviceType::Cpu.matches(DeviceType::Gpu));
}

#[test]
fn test_access_mode_host_write() {
    assert!(AccessMode::ReadOnly.check_host_write().is_ok());
    assert!(AccessMode::ReadWrite.check_host_write().is_ok());
    let err = AccessMode::WriteOnly.check_host_write().unwrap_err();
    assert!(matches!(err, Error::InvalidAccessMode { mode: AccessMode::WriteOnly, .. }));
    assert_eq!(err.to_string(), "cannot upload into a write-only buffer");
}

#[test]
fn test_access_mode_host_read() {
    assert!(AccessMode::ReadOnly.check_host_read(true).is_err());
    assert!(AccessMode::WriteOnly.check_host_read(false).is_err());
    assert!(AccessMode::WriteOnly.check_host_read(true).is_ok());
    assert!(AccessMode::ReadWrite.check_host_read(false).is_ok());
}

#[test]
fn test_access_mode_kernel_writable() {
    assert!(!AccessMode::ReadOnly.kernel_writable());
    assert!(AccessMode::WriteOnly.kernel_writable());
    assert!(AccessMode::ReadWrite.kernel_writable());
}

#[test_case(1024, None, 256; "backend_chooses")]
#[test_case(1024, Some(256), 256; "divides")]
#[test_case(1, Some(1), 1; "single_item")]
fn test_validate_work_size_ok(global: usize, local: Option<usize>, max: usize) {
    assert!(validate_work_size(global, local, max).is_ok());
}

#[test_case(0, None, 256; "empty_range")]
#[test_case(1000, Some(0), 256; "zero_local")]
#[test_case(1000, Some(48), 256; "not_dividing")]
#[test_case(1024, Some(512), 256; "over_device_limit")]
fn test_validate_work_size_rejects(global: usize, local: Option<usize>, max: usize) {
    let err = validate_work_size(global, local, max).unwrap_err();
    assert!(matches!(err, Error::DispatchFailed { .. }), "unexpected error: {err}");
}

#[test_case(1024, 256, 256; "power_of_two")]
#[test_case(1000, 256, 250; "largest_divisor")]
#[test_case(7, 256, 7; "small_range")]
#[test_case(13, 4, 1; "prime")]
fn test_default_local_size(global: usize, max: usize, expected: usize) {
    assert_eq!(default_local_size(global, max), expected);
}

#[test]
fn test_handle_source_never_issues_zero() {
    let source = HandleSource::new();
    let first = source.next_raw();
    let second = source.next_raw();
    assert_eq!(first, 1);
    assert_eq!(second, 2);
}

#[test]
fn test_resource_display_and_kind() {
    let resource = Resource::from(BufferHandle::from_raw(7));
    assert_eq!(resource.kind(), ResourceKind::Buffer);
    assert_eq!(resource.to_string(), "buffer#7");
    assert_eq!(BufferHandle::from_raw(7).to_string(), "buffer#7");
}

#[test]
fn test_resource_counts() {
    let mut counts = ResourceCounts::default();
    *counts.get_mut(ResourceKind::Kernel) += 2;
    *counts.get_mut(ResourceKind::Buffer) += 3;
    assert_eq!(counts.get(ResourceKind::Kernel), 2);
    assert_eq!(counts.total(), 5);
}
