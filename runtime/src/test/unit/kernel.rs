use std::path::PathBuf;

use offload_device::{DeviceBackend, DeviceId, DeviceType, HostBackend, Scoped};

use crate::{Error, KernelProgram, KernelSource, kernels};

fn scratch_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("offload-{}-{name}", std::process::id()))
}

#[test]
fn test_builtin_kernels() {
    assert_eq!(kernels::VECADD.entry_point(), "vecadd");
    assert!(kernels::VECADD.source().contains("__kernel void vecadd("));
    assert_eq!(kernels::VECSUB.entry_point(), "vecsub");
}

#[test]
fn test_source_from_file() {
    let path = scratch_path("vector_add_kernel.cl");
    std::fs::write(&path, kernels::VECADD.source()).unwrap();

    let program = KernelProgram::from_file(&path, "vecadd").unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(program.source(), kernels::VECADD.source());
    assert_eq!(program, kernels::VECADD);
}

#[test]
fn test_source_from_missing_file() {
    let path = scratch_path("missing.cl");
    let err = KernelSource::from_file(&path).unwrap_err();
    assert!(matches!(err, Error::KernelSourceIo { path: ref p, .. } if *p == path));
    assert!(err.to_string().starts_with("failed to read kernel source"));
}

#[test]
fn test_set_source() {
    let mut program = KernelProgram::new("__kernel void k(void) {}", "k");
    program.set_source(String::from("__kernel void k(void) { return; }"));
    assert_eq!(program.source(), "__kernel void k(void) { return; }");
    assert_eq!(program.entry_point(), "k");
}

#[test]
fn test_compiled_program_validity() {
    let backend = HostBackend::builder().device_count(2).build();
    let platform = backend.enumerate_platforms().unwrap()[0].id;
    let devices: Vec<DeviceId> =
        backend.enumerate_devices(platform, DeviceType::Any).unwrap().iter().map(|d| d.id).collect();
    let context = Scoped::new(&backend, backend.create_context(&devices[..1]).unwrap());
    let other = Scoped::new(&backend, backend.create_context(&devices).unwrap());

    let program = kernels::VECADD;
    {
        let compiled = program.compile(&backend, *context, &devices[..1], "").unwrap();
        assert!(compiled.is_valid_for(*context, devices[0]));
        assert!(!compiled.is_valid_for(*context, devices[1]));
        assert!(!compiled.is_valid_for(*other, devices[0]));
        assert_eq!(compiled.program().entry_point(), "vecadd");

        let kernel = compiled.create_kernel().unwrap();
        assert_eq!(backend.kernel_arity(*kernel).unwrap(), 3);
        assert_eq!(backend.argument_element_type(*kernel, 2).unwrap().as_deref(), Some("int"));
        assert!(matches!(
            backend.argument_element_type(*kernel, 3),
            Err(offload_device::Error::InvalidArgumentIndex { index: 3, arity: 3, .. })
        ));
        assert_eq!(backend.live_resources().programs, 1);
        assert_eq!(backend.live_resources().kernels, 1);
    }
    assert_eq!(backend.live_resources().programs, 0);
    assert_eq!(backend.live_resources().kernels, 0);
}

#[test]
fn test_compiled_program_missing_entry_point() {
    let backend = HostBackend::default();
    let platform = backend.enumerate_platforms().unwrap()[0].id;
    let device = backend.enumerate_devices(platform, DeviceType::Any).unwrap()[0].id;
    let context = Scoped::new(&backend, backend.create_context(&[device]).unwrap());

    let program = KernelProgram::new(kernels::VECADD.source().to_string(), "vec_add");
    let compiled = program.compile(&backend, *context, &[device], "").unwrap();
    let err = compiled.create_kernel().unwrap_err();
    assert!(matches!(err, offload_device::Error::EntryPointNotFound { ref name } if name == "vec_add"));
}
