use crate::host::HOST_PLATFORM_NAME;
use crate::{
    AccessMode, ContextHandle, DeviceBackend, DeviceId, DeviceType, Error, HostBackend, QueueHandle, Resource,
    ResourceKind, Scoped, TransferMode,
};

const VECADD: &str = r#"
__kernel void vecadd(__global const int *a, __global const int *b, __global int *c) {
    int i = get_global_id(0);
    c[i] = a[i] + b[i];
}
"#;

fn open(backend: &HostBackend) -> (DeviceId, ContextHandle, QueueHandle) {
    let platform = backend.enumerate_platforms().unwrap()[0].id;
    let device = backend.enumerate_devices(platform, DeviceType::Any).unwrap()[0].id;
    let context = backend.create_context(&[device]).unwrap();
    let queue = backend.create_command_queue(context, device).unwrap();
    (device, context, queue)
}

fn bytes(values: &[i32]) -> Vec<u8> {
    bytemuck::cast_slice(values).to_vec()
}

fn ints(bytes: &[u8]) -> Vec<i32> {
    bytemuck::pod_collect_to_vec(bytes)
}

/// Run `entry` over `global` work-items. Inputs are bound first (read-only),
/// followed by `outputs` write-only buffers of `global` elements.
fn run_kernel(
    backend: &HostBackend,
    source: &str,
    entry: &str,
    inputs: &[&[i32]],
    outputs: usize,
    global: usize,
    local: Option<usize>,
) -> crate::Result<Vec<Vec<i32>>> {
    let (device, context, queue) = open(backend);
    let context = Scoped::new(backend, context);
    let queue = Scoped::new(backend, queue);

    let mut buffers = Vec::new();
    for input in inputs {
        let buffer = Scoped::new(backend, backend.allocate_buffer(*context, input.len() * 4, AccessMode::ReadOnly)?);
        backend.write_buffer(*queue, &buffer, &bytes(input), TransferMode::Blocking)?;
        buffers.push(buffer);
    }
    for _ in 0..outputs {
        buffers.push(Scoped::new(backend, backend.allocate_buffer(*context, global * 4, AccessMode::WriteOnly)?));
    }

    let program = Scoped::new(backend, backend.compile_program(*context, &[device], source, "")?);
    let kernel = Scoped::new(backend, backend.create_kernel(*program, entry)?);
    for (index, buffer) in buffers.iter().enumerate() {
        backend.set_kernel_argument(*kernel, index, buffer)?;
    }
    backend.enqueue_dispatch(*queue, *kernel, global, local)?;
    backend.finish(*queue)?;

    let mut results = Vec::new();
    for buffer in &buffers[inputs.len()..] {
        let mut out = vec![0u8; buffer.size_bytes()];
        backend.read_buffer(*queue, buffer, &mut out)?;
        results.push(ints(&out));
    }
    Ok(results)
}

#[test]
fn test_single_platform() {
    let backend = HostBackend::default();
    let platforms = backend.enumerate_platforms().unwrap();
    assert_eq!(platforms.len(), 1);
    assert_eq!(platforms[0].name, HOST_PLATFORM_NAME);
}

#[test]
fn test_device_filtering() {
    let backend = HostBackend::builder().device_count(3).device_type(DeviceType::Gpu).build();
    let platform = backend.enumerate_platforms().unwrap()[0].id;

    assert_eq!(backend.enumerate_devices(platform, DeviceType::Any).unwrap().len(), 3);
    assert_eq!(backend.enumerate_devices(platform, DeviceType::Gpu).unwrap().len(), 3);

    let err = backend.enumerate_devices(platform, DeviceType::Cpu).unwrap_err();
    assert!(matches!(err, Error::NoDeviceAvailable { filter: DeviceType::Cpu, .. }));
}

#[test]
fn test_no_devices() {
    let backend = HostBackend::builder().device_count(0).build();
    let platform = backend.enumerate_platforms().unwrap()[0].id;
    let err = backend.enumerate_devices(platform, DeviceType::Any).unwrap_err();
    assert!(matches!(err, Error::NoDeviceAvailable { .. }));
}

#[test]
fn test_context_creation_failures() {
    let backend = HostBackend::default();
    assert!(matches!(backend.create_context(&[]).unwrap_err(), Error::ContextCreationFailed { .. }));
    assert!(matches!(
        backend.create_context(&[DeviceId::from_raw(42)]).unwrap_err(),
        Error::ContextCreationFailed { code: -33, .. }
    ));
    assert_eq!(backend.live_resources().total(), 0);
}

#[test]
fn test_queue_requires_context_member() {
    let backend = HostBackend::builder().device_count(2).build();
    let context = backend.create_context(&[DeviceId::from_raw(0)]).unwrap();
    let err = backend.create_command_queue(context, DeviceId::from_raw(1)).unwrap_err();
    assert!(matches!(err, Error::QueueCreationFailed { .. }));
    backend.release(Resource::Context(context)).unwrap();
}

#[test]
fn test_allocation_limits() {
    let backend = HostBackend::builder().memory_limit(64).build();
    let (_, context, _) = open(&backend);

    let err = backend.allocate_buffer(context, 0, AccessMode::ReadWrite).unwrap_err();
    assert!(matches!(err, Error::AllocationFailed { size: 0, .. }));

    let first = backend.allocate_buffer(context, 48, AccessMode::ReadWrite).unwrap();
    let err = backend.allocate_buffer(context, 32, AccessMode::ReadWrite).unwrap_err();
    assert!(matches!(err, Error::AllocationFailed { size: 32, .. }));

    // Released memory becomes available again.
    backend.release(first.handle().into()).unwrap();
    let second = backend.allocate_buffer(context, 64, AccessMode::ReadWrite).unwrap();
    assert_eq!(second.size_bytes(), 64);
}

#[test]
fn test_access_mode_enforced_on_transfers() {
    let backend = HostBackend::default();
    let (_, context, queue) = open(&backend);
    let read_only = backend.allocate_buffer(context, 16, AccessMode::ReadOnly).unwrap();
    let write_only = backend.allocate_buffer(context, 16, AccessMode::WriteOnly).unwrap();
    let mut out = [0u8; 16];

    let err = backend.write_buffer(queue, &write_only, &[0; 16], TransferMode::Blocking).unwrap_err();
    assert!(matches!(err, Error::InvalidAccessMode { mode: AccessMode::WriteOnly, .. }));

    let err = backend.read_buffer(queue, &read_only, &mut out).unwrap_err();
    assert!(matches!(err, Error::InvalidAccessMode { mode: AccessMode::ReadOnly, .. }));

    // Not yet written by any kernel.
    let err = backend.read_buffer(queue, &write_only, &mut out).unwrap_err();
    assert!(matches!(err, Error::InvalidAccessMode { mode: AccessMode::WriteOnly, .. }));
}

#[test]
fn test_transfer_size_mismatch() {
    let backend = HostBackend::default();
    let (_, context, queue) = open(&backend);
    let buffer = backend.allocate_buffer(context, 16, AccessMode::ReadWrite).unwrap();

    let err = backend.write_buffer(queue, &buffer, &[0; 12], TransferMode::Blocking).unwrap_err();
    assert!(matches!(err, Error::TransferFailed { .. }));

    let mut out = [0u8; 20];
    let err = backend.read_buffer(queue, &buffer, &mut out).unwrap_err();
    assert!(matches!(err, Error::TransferFailed { .. }));
}

#[test]
fn test_read_write_round_trip() {
    let backend = HostBackend::default();
    let (_, context, queue) = open(&backend);
    let buffer = backend.allocate_buffer(context, 12, AccessMode::ReadWrite).unwrap();

    backend.write_buffer(queue, &buffer, &bytes(&[5, -6, 7]), TransferMode::NonBlocking).unwrap();
    backend.finish(queue).unwrap();
    let mut out = [0u8; 12];
    backend.read_buffer(queue, &buffer, &mut out).unwrap();
    assert_eq!(ints(&out), vec![5, -6, 7]);
}

#[test]
fn test_vecadd() {
    let backend = HostBackend::default();
    let results = run_kernel(&backend, VECADD, "vecadd", &[&[0, 1, 2, 3], &[0, 1, 2, 3]], 1, 4, None).unwrap();
    assert_eq!(results, vec![vec![0, 2, 4, 6]]);
    assert_eq!(backend.live_resources().total(), 0);
}

#[test]
fn test_vecadd_wraps() {
    let backend = HostBackend::default();
    let results = run_kernel(&backend, VECADD, "vecadd", &[&[i32::MAX, -1], &[1, i32::MIN]], 1, 2, Some(2)).unwrap();
    assert_eq!(results, vec![vec![i32::MIN, i32::MAX]]);
}

#[test]
fn test_work_item_builtins() {
    let source = r#"
        __kernel void ids(__global int *global_id, __global int *local_id, __global int *group_id,
                          __global int *sizes) {
            int gid = get_global_id(0);
            global_id[gid] = gid;
            local_id[gid] = get_local_id(0);
            group_id[gid] = get_group_id(0);
            sizes[gid] = get_global_size(0) * 1000 + get_local_size(0) * 10 + get_num_groups(0);
        }
    "#;
    let backend = HostBackend::default();
    let results = run_kernel(&backend, source, "ids", &[], 4, 6, Some(3)).unwrap();
    assert_eq!(results[0], vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(results[1], vec![0, 1, 2, 0, 1, 2]);
    assert_eq!(results[2], vec![0, 0, 0, 1, 1, 1]);
    assert_eq!(results[3], vec![6032; 6]);
}

#[test]
fn test_build_failure_carries_log() {
    let backend = HostBackend::default();
    let (device, context, _) = open(&backend);
    let err = backend
        .compile_program(context, &[device], "__kernel void broken(__global int *a) { a[0] = ; }", "")
        .unwrap_err();
    let Error::BuildFailed { log } = err else { panic!("expected BuildFailed, got {err}") };
    assert!(log.starts_with("1:48: error: expected expression, found ';'"), "log was: {log}");
    assert!(log.ends_with("1 error generated."));
    assert_eq!(backend.live_resources().programs, 0);
}

#[test]
fn test_entry_point_not_found() {
    let backend = HostBackend::default();
    let (device, context, _) = open(&backend);
    let program = backend.compile_program(context, &[device], VECADD, "").unwrap();
    let err = backend.create_kernel(program, "vecmul").unwrap_err();
    assert!(matches!(err, Error::EntryPointNotFound { ref name } if name == "vecmul"));
}

#[test]
fn test_argument_index_out_of_range() {
    let backend = HostBackend::default();
    let (device, context, _) = open(&backend);
    let program = backend.compile_program(context, &[device], VECADD, "").unwrap();
    let kernel = backend.create_kernel(program, "vecadd").unwrap();
    let buffer = backend.allocate_buffer(context, 16, AccessMode::ReadOnly).unwrap();

    assert_eq!(backend.kernel_arity(kernel).unwrap(), 3);
    let err = backend.set_kernel_argument(kernel, 3, &buffer).unwrap_err();
    assert!(matches!(err, Error::InvalidArgumentIndex { index: 3, arity: 3, .. }));
}

#[test]
fn test_dispatch_with_unbound_argument() {
    let backend = HostBackend::default();
    let (device, context, queue) = open(&backend);
    let program = backend.compile_program(context, &[device], VECADD, "").unwrap();
    let kernel = backend.create_kernel(program, "vecadd").unwrap();
    let buffer = backend.allocate_buffer(context, 16, AccessMode::ReadOnly).unwrap();
    backend.set_kernel_argument(kernel, 0, &buffer).unwrap();

    let err = backend.enqueue_dispatch(queue, kernel, 4, None).unwrap_err();
    assert!(matches!(err, Error::DispatchFailed { .. }));
}

#[test]
fn test_dispatch_rejects_non_dividing_local_size() {
    let backend = HostBackend::default();
    let err = run_kernel(&backend, VECADD, "vecadd", &[&[1; 10], &[1; 10]], 1, 10, Some(4)).unwrap_err();
    assert!(matches!(err, Error::DispatchFailed { .. }));
    assert_eq!(backend.live_resources().total(), 0);
}

#[test]
fn test_dispatch_rejects_local_size_over_device_limit() {
    let backend = HostBackend::builder().max_work_group_size(8).build();
    let err = run_kernel(&backend, VECADD, "vecadd", &[&[1; 32], &[1; 32]], 1, 32, Some(16)).unwrap_err();
    assert!(matches!(err, Error::DispatchFailed { .. }));
}

#[test]
fn test_out_of_bounds_access_aborts_dispatch() {
    let backend = HostBackend::default();
    // Inputs are shorter than the NDRange.
    let err = run_kernel(&backend, VECADD, "vecadd", &[&[1, 2], &[3, 4]], 1, 4, None).unwrap_err();
    let Error::DispatchFailed { reason } = err else { panic!("expected DispatchFailed, got {err}") };
    assert!(reason.contains("out-of-bounds"), "reason was: {reason}");
    assert_eq!(backend.live_resources().total(), 0);
}

#[test]
fn test_division_by_zero_aborts_dispatch() {
    let source = "__kernel void div(__global const int *a, __global int *out) { out[0] = 1 / a[0]; }";
    let backend = HostBackend::default();
    let err = run_kernel(&backend, source, "div", &[&[0]], 1, 1, None).unwrap_err();
    assert!(matches!(err, Error::DispatchFailed { .. }));
}

#[test]
fn test_store_into_read_only_buffer_aborts_dispatch() {
    // `a` is not declared const, but the buffer bound to it is read-only.
    let source = "__kernel void poke(__global int *a) { a[get_global_id(0)] = 1; }";
    let backend = HostBackend::default();
    let err = run_kernel(&backend, source, "poke", &[&[0, 0]], 0, 2, None).unwrap_err();
    let Error::DispatchFailed { reason } = err else { panic!("expected DispatchFailed, got {err}") };
    assert!(reason.contains("read-only"), "reason was: {reason}");
}

#[test]
fn test_read_write_buffer_updated_in_place() {
    let source = "__kernel void twice(__global int *a) { a[get_global_id(0)] *= 2; }";
    let backend = HostBackend::default();
    let (device, context, queue) = open(&backend);
    let buffer = backend.allocate_buffer(context, 12, AccessMode::ReadWrite).unwrap();
    backend.write_buffer(queue, &buffer, &bytes(&[1, 2, 3]), TransferMode::Blocking).unwrap();

    let program = backend.compile_program(context, &[device], source, "").unwrap();
    let kernel = backend.create_kernel(program, "twice").unwrap();
    backend.set_kernel_argument(kernel, 0, &buffer).unwrap();
    backend.enqueue_dispatch(queue, kernel, 3, None).unwrap();
    backend.enqueue_dispatch(queue, kernel, 3, None).unwrap();

    let mut out = [0u8; 12];
    backend.read_buffer(queue, &buffer, &mut out).unwrap();
    assert_eq!(ints(&out), vec![4, 8, 12]);
}

#[test]
fn test_release_exactly_once() {
    let backend = HostBackend::default();
    let (_, context, queue) = open(&backend);
    let counts = backend.live_resources();
    assert_eq!((counts.contexts, counts.queues), (1, 1));

    backend.release(queue.into()).unwrap();
    let err = backend.release(queue.into()).unwrap_err();
    assert!(matches!(err, Error::UnknownHandle { kind: ResourceKind::Queue, .. }));

    backend.release(context.into()).unwrap();
    assert_eq!(backend.live_resources().total(), 0);
}

#[test]
fn test_scoped_guards_release_on_drop() {
    let backend = HostBackend::default();
    {
        let (_, context, queue) = open(&backend);
        let context = Scoped::new(&backend, context);
        let _queue = Scoped::new(&backend, queue);
        let _buffer = Scoped::new(&backend, backend.allocate_buffer(*context, 4, AccessMode::ReadOnly).unwrap());
        assert_eq!(backend.live_resources().total(), 3);
    }
    assert_eq!(backend.live_resources().total(), 0);
}

#[test]
fn test_handles_are_unique() {
    let backend = HostBackend::default();
    let (_, context, _) = open(&backend);
    let a = backend.allocate_buffer(context, 4, AccessMode::ReadOnly).unwrap();
    let b = backend.allocate_buffer(context, 4, AccessMode::ReadOnly).unwrap();
    assert_ne!(a.handle(), b.handle());
}
