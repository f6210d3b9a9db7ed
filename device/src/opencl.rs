//! OpenCL backend built on `opencl3`.
//!
//! Handles index into tables of owned `opencl3` objects; dropping an entry
//! releases the underlying CL object. Queues are created on the context's
//! default device (the first device the context was created with).

use std::collections::HashMap;
use std::ptr;

use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::{CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU, CL_DEVICE_TYPE_GPU, Device};
use opencl3::error_codes::ClError;
use opencl3::kernel::Kernel;
use opencl3::memory::{Buffer, CL_MEM_READ_ONLY, CL_MEM_READ_WRITE, CL_MEM_WRITE_ONLY, ClMem};
use opencl3::platform::{Platform, get_platforms};
use opencl3::program::Program;
use opencl3::types::{CL_BLOCKING, CL_NON_BLOCKING, cl_device_type, cl_uint};
use parking_lot::Mutex;
use snafu::{OptionExt, ensure};

use crate::backend::{DeviceBackend, validate_work_size};
use crate::descriptor::{AccessMode, DeviceBuffer, DeviceDescriptor, DeviceType, PlatformDescriptor, TransferMode};
use crate::error::*;
use crate::handle::{
    BufferHandle, ContextHandle, DeviceId, HandleSource, KernelHandle, PlatformId, ProgramHandle, QueueHandle,
    Resource, ResourceCounts, ResourceKind,
};

const CL_INVALID_DEVICE: i32 = -33;

fn type_mask(filter: DeviceType) -> cl_device_type {
    match filter {
        DeviceType::Gpu => CL_DEVICE_TYPE_GPU,
        DeviceType::Cpu => CL_DEVICE_TYPE_CPU,
        DeviceType::Accelerator => CL_DEVICE_TYPE_ACCELERATOR,
        DeviceType::Any => CL_DEVICE_TYPE_ALL,
    }
}

fn device_type(bits: cl_device_type) -> DeviceType {
    if bits & CL_DEVICE_TYPE_GPU != 0 {
        DeviceType::Gpu
    } else if bits & CL_DEVICE_TYPE_ACCELERATOR != 0 {
        DeviceType::Accelerator
    } else if bits & CL_DEVICE_TYPE_CPU != 0 {
        DeviceType::Cpu
    } else {
        DeviceType::Any
    }
}

/// `"int*"` -> `"int"`.
fn pointee(type_name: &str) -> &str {
    type_name.trim_end_matches('\0').trim_end().trim_end_matches('*').trim()
}

fn reason(error: ClError) -> String {
    format!("{error} ({})", error.0)
}

struct ContextEntry {
    context: Context,
    devices: Vec<DeviceId>,
}

struct QueueEntry {
    queue: CommandQueue,
    context: ContextHandle,
    /// Host copies backing non-blocking writes, dropped on `finish`.
    pending: Vec<Vec<u8>>,
}

struct BufferEntry {
    buffer: Buffer<u8>,
    context: ContextHandle,
    access: AccessMode,
    kernel_written: bool,
}

struct KernelEntry {
    kernel: Kernel,
    name: String,
    args: Vec<Option<BufferHandle>>,
}

#[derive(Default)]
struct ClState {
    platforms: Vec<Platform>,
    /// Devices seen during enumeration; `DeviceId` is the index.
    devices: Vec<(Device, DeviceDescriptor)>,
    contexts: HashMap<ContextHandle, ContextEntry>,
    queues: HashMap<QueueHandle, QueueEntry>,
    buffers: HashMap<BufferHandle, BufferEntry>,
    programs: HashMap<ProgramHandle, Program>,
    kernels: HashMap<KernelHandle, KernelEntry>,
}

impl ClState {
    fn device(&self, id: DeviceId) -> Option<&(Device, DeviceDescriptor)> {
        usize::try_from(id.raw()).ok().and_then(|index| self.devices.get(index))
    }

    fn context(&self, handle: ContextHandle) -> Result<&ContextEntry> {
        self.contexts.get(&handle).context(UnknownHandleSnafu { kind: ResourceKind::Context, id: handle.raw() })
    }

    fn queue(&self, handle: QueueHandle) -> Result<&QueueEntry> {
        self.queues.get(&handle).context(UnknownHandleSnafu { kind: ResourceKind::Queue, id: handle.raw() })
    }

    fn buffer(&self, handle: BufferHandle) -> Result<&BufferEntry> {
        self.buffers.get(&handle).context(UnknownHandleSnafu { kind: ResourceKind::Buffer, id: handle.raw() })
    }

    fn kernel(&self, handle: KernelHandle) -> Result<&KernelEntry> {
        self.kernels.get(&handle).context(UnknownHandleSnafu { kind: ResourceKind::Kernel, id: handle.raw() })
    }

    fn check_transfer(&self, queue: QueueHandle, buffer: &DeviceBuffer, len: usize) -> Result<()> {
        let context = self.queue(queue)?.context;
        let entry = self.buffer(buffer.handle())?;
        ensure!(
            entry.context == context,
            TransferFailedSnafu { reason: format!("{} does not belong to the context of {queue}", buffer.handle()) }
        );
        ensure!(
            len == buffer.size_bytes(),
            TransferFailedSnafu {
                reason: format!("host slice is {len} bytes but {} is {} bytes", buffer.handle(), buffer.size_bytes())
            }
        );
        Ok(())
    }
}

/// Backend driving the vendor OpenCL runtime.
pub struct OpenClBackend {
    handles: HandleSource,
    state: Mutex<ClState>,
}

impl std::fmt::Debug for OpenClBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenClBackend").finish_non_exhaustive()
    }
}

impl OpenClBackend {
    pub fn new() -> Self {
        Self { handles: HandleSource::new(), state: Mutex::new(ClState::default()) }
    }
}

impl Default for OpenClBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceBackend for OpenClBackend {
    fn name(&self) -> &str {
        "opencl"
    }

    fn enumerate_platforms(&self) -> Result<Vec<PlatformDescriptor>> {
        let platforms = get_platforms().unwrap_or_default();
        ensure!(!platforms.is_empty(), NoPlatformAvailableSnafu);

        let descriptors = platforms
            .iter()
            .enumerate()
            .map(|(index, platform)| PlatformDescriptor {
                id: PlatformId::from_raw(index as u64),
                name: platform.name().unwrap_or_default(),
                vendor: platform.vendor().unwrap_or_default(),
                version: platform.version().unwrap_or_default(),
            })
            .collect();
        self.state.lock().platforms = platforms;
        Ok(descriptors)
    }

    fn enumerate_devices(&self, platform: PlatformId, filter: DeviceType) -> Result<Vec<DeviceDescriptor>> {
        let mut state = self.state.lock();
        let Some(cl_platform) = usize::try_from(platform.raw()).ok().and_then(|index| state.platforms.get(index))
        else {
            return NoDeviceAvailableSnafu { platform: platform.to_string(), filter }.fail();
        };
        let platform_name = cl_platform.name().unwrap_or_default();
        // CL_DEVICE_NOT_FOUND surfaces as an error; treat it as an empty list.
        let ids = cl_platform.get_devices(type_mask(filter)).unwrap_or_default();

        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((_, known)) = state.devices.iter().find(|(device, _)| device.id() == id) {
                found.push(known.clone());
                continue;
            }
            let device = Device::new(id);
            let descriptor = DeviceDescriptor {
                id: DeviceId::from_raw(state.devices.len() as u64),
                platform,
                name: device.name().unwrap_or_default().trim().to_string(),
                device_type: device_type(device.dev_type().unwrap_or(0)),
                max_work_group_size: device.max_work_group_size().unwrap_or(1),
                global_mem_size: device.global_mem_size().unwrap_or(0),
            };
            tracing::debug!(device = %descriptor.name, kind = %descriptor.device_type, "found OpenCL device");
            state.devices.push((device, descriptor.clone()));
            found.push(descriptor);
        }

        ensure!(!found.is_empty(), NoDeviceAvailableSnafu { platform: platform_name, filter });
        Ok(found)
    }

    fn create_context(&self, devices: &[DeviceId]) -> Result<ContextHandle> {
        let mut state = self.state.lock();
        let mut ids = Vec::with_capacity(devices.len());
        for device in devices {
            let (cl_device, _) = state.device(*device).context(ContextCreationFailedSnafu {
                code: CL_INVALID_DEVICE,
                reason: format!("unknown {device}"),
            })?;
            ids.push(cl_device.id());
        }

        let context = Context::from_devices(&ids, &[], None, ptr::null_mut())
            .map_err(|e| Error::ContextCreationFailed { code: e.0, reason: reason(e) })?;

        let handle = ContextHandle::from_raw(self.handles.next_raw());
        state.contexts.insert(handle, ContextEntry { context, devices: devices.to_vec() });
        tracing::trace!(%handle, devices = devices.len(), "context created");
        Ok(handle)
    }

    fn create_command_queue(&self, context: ContextHandle, device: DeviceId) -> Result<QueueHandle> {
        let mut state = self.state.lock();
        let entry = state.context(context)?;
        ensure!(
            entry.devices.first() == Some(&device),
            QueueCreationFailedSnafu {
                code: CL_INVALID_DEVICE,
                reason: format!("queues are only created on the default device of {context}")
            }
        );

        #[allow(deprecated)]
        let queue = CommandQueue::create_default(&entry.context, 0)
            .map_err(|e| Error::QueueCreationFailed { code: e.0, reason: reason(e) })?;

        let handle = QueueHandle::from_raw(self.handles.next_raw());
        state.queues.insert(handle, QueueEntry { queue, context, pending: Vec::new() });
        tracing::trace!(%handle, %device, "command queue created");
        Ok(handle)
    }

    fn allocate_buffer(&self, context: ContextHandle, size_bytes: usize, access: AccessMode) -> Result<DeviceBuffer> {
        let mut state = self.state.lock();
        let entry = state.context(context)?;
        ensure!(size_bytes > 0, AllocationFailedSnafu { size: size_bytes, reason: "zero-sized buffer" });

        let flags = match access {
            AccessMode::ReadOnly => CL_MEM_READ_ONLY,
            AccessMode::WriteOnly => CL_MEM_WRITE_ONLY,
            AccessMode::ReadWrite => CL_MEM_READ_WRITE,
        };
        let buffer = unsafe { Buffer::<u8>::create(&entry.context, flags, size_bytes, ptr::null_mut()) }
            .map_err(|e| Error::AllocationFailed { size: size_bytes, reason: reason(e) })?;

        let handle = BufferHandle::from_raw(self.handles.next_raw());
        state.buffers.insert(handle, BufferEntry { buffer, context, access, kernel_written: false });
        tracing::trace!(%handle, size_bytes, %access, "buffer allocated");
        Ok(DeviceBuffer::new(handle, size_bytes, access))
    }

    fn write_buffer(&self, queue: QueueHandle, buffer: &DeviceBuffer, data: &[u8], mode: TransferMode) -> Result<()> {
        let mut state = self.state.lock();
        state.check_transfer(queue, buffer, data.len())?;
        state.buffer(buffer.handle())?.access.check_host_write()?;

        let ClState { queues, buffers, .. } = &mut *state;
        let (Some(queue_entry), Some(target)) = (queues.get_mut(&queue), buffers.get_mut(&buffer.handle())) else {
            return UnknownHandleSnafu { kind: ResourceKind::Buffer, id: buffer.handle().raw() }.fail();
        };

        match mode {
            TransferMode::Blocking => {
                unsafe { queue_entry.queue.enqueue_write_buffer(&mut target.buffer, CL_BLOCKING, 0, data, &[]) }
                    .map_err(|e| Error::TransferFailed { reason: reason(e) })?;
            }
            TransferMode::NonBlocking => {
                // The staging copy must outlive the transfer; it is kept until `finish`.
                let staging = data.to_vec();
                unsafe {
                    queue_entry.queue.enqueue_write_buffer(&mut target.buffer, CL_NON_BLOCKING, 0, &staging, &[])
                }
                .map_err(|e| Error::TransferFailed { reason: reason(e) })?;
                queue_entry.pending.push(staging);
            }
        }
        tracing::trace!(buffer = %buffer.handle(), bytes = data.len(), ?mode, "buffer write enqueued");
        Ok(())
    }

    fn read_buffer(&self, queue: QueueHandle, buffer: &DeviceBuffer, data: &mut [u8]) -> Result<()> {
        let state = self.state.lock();
        state.check_transfer(queue, buffer, data.len())?;
        let source = state.buffer(buffer.handle())?;
        source.access.check_host_read(source.kernel_written)?;

        unsafe { state.queue(queue)?.queue.enqueue_read_buffer(&source.buffer, CL_BLOCKING, 0, data, &[]) }
            .map_err(|e| Error::TransferFailed { reason: reason(e) })?;
        tracing::trace!(buffer = %buffer.handle(), bytes = data.len(), "buffer read");
        Ok(())
    }

    fn compile_program(
        &self,
        context: ContextHandle,
        devices: &[DeviceId],
        source: &str,
        options: &str,
    ) -> Result<ProgramHandle> {
        let mut state = self.state.lock();
        let entry = state.context(context)?;
        if let Some(outsider) = devices.iter().find(|id| !entry.devices.contains(id)) {
            return BuildFailedSnafu { log: format!("error: {outsider} is not part of {context}") }.fail();
        }

        // The error string is the driver's build log.
        let program = Program::create_and_build_from_source(&entry.context, source, options)
            .map_err(|log| Error::BuildFailed { log })?;

        let handle = ProgramHandle::from_raw(self.handles.next_raw());
        state.programs.insert(handle, program);
        tracing::trace!(%handle, "program built");
        Ok(handle)
    }

    fn create_kernel(&self, program: ProgramHandle, entry_point: &str) -> Result<KernelHandle> {
        let mut state = self.state.lock();
        let program = state
            .programs
            .get(&program)
            .context(UnknownHandleSnafu { kind: ResourceKind::Program, id: program.raw() })?;
        let kernel = Kernel::create(program, entry_point)
            .map_err(|_| EntryPointNotFoundSnafu { name: entry_point }.build())?;
        let arity = kernel.num_args().map_err(|e| Error::DispatchFailed { reason: reason(e) })? as usize;

        let handle = KernelHandle::from_raw(self.handles.next_raw());
        state.kernels.insert(handle, KernelEntry { kernel, name: entry_point.to_string(), args: vec![None; arity] });
        tracing::trace!(%handle, entry_point, arity, "kernel created");
        Ok(handle)
    }

    fn kernel_arity(&self, kernel: KernelHandle) -> Result<usize> {
        Ok(self.state.lock().kernel(kernel)?.args.len())
    }

    fn argument_element_type(&self, kernel: KernelHandle, index: usize) -> Result<Option<String>> {
        let state = self.state.lock();
        let entry = state.kernel(kernel)?;
        let arity = entry.args.len();
        ensure!(index < arity, InvalidArgumentIndexSnafu { kernel: entry.name.clone(), index, arity });
        // Argument info is only kept when the program was built with `-cl-kernel-arg-info`.
        match entry.kernel.get_arg_type_name(index as cl_uint) {
            Ok(name) => Ok(Some(pointee(&name).to_string())),
            Err(error) => {
                tracing::debug!(kernel = %entry.name, index, error = %reason(error), "argument type unavailable");
                Ok(None)
            }
        }
    }

    fn set_kernel_argument(&self, kernel: KernelHandle, index: usize, buffer: &DeviceBuffer) -> Result<()> {
        let mut state = self.state.lock();
        let ClState { buffers, kernels, .. } = &mut *state;
        let mem = buffers
            .get(&buffer.handle())
            .context(UnknownHandleSnafu { kind: ResourceKind::Buffer, id: buffer.handle().raw() })?
            .buffer
            .get();
        let entry =
            kernels.get_mut(&kernel).context(UnknownHandleSnafu { kind: ResourceKind::Kernel, id: kernel.raw() })?;
        let arity = entry.args.len();
        ensure!(index < arity, InvalidArgumentIndexSnafu { kernel: entry.name.clone(), index, arity });

        unsafe { entry.kernel.set_arg(index as u32, &mem) }
            .map_err(|e| Error::DispatchFailed { reason: format!("binding argument {index}: {}", reason(e)) })?;
        entry.args[index] = Some(buffer.handle());
        Ok(())
    }

    fn enqueue_dispatch(
        &self,
        queue: QueueHandle,
        kernel: KernelHandle,
        global: usize,
        local: Option<usize>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let context = state.queue(queue)?.context;
        let max_work_group_size = state
            .context(context)?
            .devices
            .first()
            .and_then(|id| state.device(*id))
            .map_or(1, |(_, descriptor)| descriptor.max_work_group_size);
        validate_work_size(global, local, max_work_group_size)?;

        let entry = state.kernel(kernel)?;
        let mut bound = Vec::with_capacity(entry.args.len());
        for (position, arg) in entry.args.iter().copied().enumerate() {
            bound.push(arg.with_context(|| DispatchFailedSnafu {
                reason: format!("argument {position} of kernel '{}' is not bound", entry.name),
            })?);
        }

        let global_sizes = [global];
        let local_sizes = local.map(|l| [l]);
        let local_ptr = local_sizes.as_ref().map_or(ptr::null(), |sizes| sizes.as_ptr());
        unsafe {
            state.queue(queue)?.queue.enqueue_nd_range_kernel(
                entry.kernel.get(),
                1,
                ptr::null(),
                global_sizes.as_ptr(),
                local_ptr,
                &[],
            )
        }
        .map_err(|e| Error::DispatchFailed { reason: reason(e) })?;
        tracing::debug!(kernel = %entry.name, global, ?local, "dispatched");

        for handle in bound {
            if let Some(buffer) = state.buffers.get_mut(&handle)
                && buffer.access.kernel_writable()
            {
                buffer.kernel_written = true;
            }
        }
        Ok(())
    }

    fn finish(&self, queue: QueueHandle) -> Result<()> {
        let mut state = self.state.lock();
        let entry = state
            .queues
            .get_mut(&queue)
            .context(UnknownHandleSnafu { kind: ResourceKind::Queue, id: queue.raw() })?;
        entry.queue.finish().map_err(|e| Error::DispatchFailed { reason: reason(e) })?;
        entry.pending.clear();
        Ok(())
    }

    fn release(&self, resource: Resource) -> Result<()> {
        let mut state = self.state.lock();
        let found = match resource {
            Resource::Context(h) => state.contexts.remove(&h).is_some(),
            Resource::Queue(h) => match state.queues.remove(&h) {
                Some(entry) => {
                    // Staging copies may still be in flight.
                    if let Err(error) = entry.queue.finish() {
                        tracing::warn!(%resource, %error, "finish before queue release failed");
                    }
                    true
                }
                None => false,
            },
            Resource::Buffer(h) => state.buffers.remove(&h).is_some(),
            Resource::Program(h) => state.programs.remove(&h).is_some(),
            Resource::Kernel(h) => state.kernels.remove(&h).is_some(),
        };
        ensure!(found, UnknownHandleSnafu { kind: resource.kind(), id: resource.raw() });
        tracing::trace!(%resource, "released");
        Ok(())
    }

    fn live_resources(&self) -> ResourceCounts {
        let state = self.state.lock();
        ResourceCounts {
            contexts: state.contexts.len(),
            queues: state.queues.len(),
            buffers: state.buffers.len(),
            programs: state.programs.len(),
            kernels: state.kernels.len(),
        }
    }
}
