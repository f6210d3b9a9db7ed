//! Reference backend executing kernels on the calling thread.
//!
//! Exposes one platform with a configurable number of identical devices.
//! Programs are compiled by the [`lang`] front-end and dispatched by
//! interpreting each work-item in order, one work-group after another.
//! Transfers are synchronous, so non-blocking writes have already completed
//! when they return and `finish` only validates the queue.

pub mod lang;

use std::collections::HashMap;
use std::sync::Arc;

use bon::bon;
use parking_lot::Mutex;
use smallvec::SmallVec;
use snafu::{OptionExt, ensure};

use crate::backend::{DeviceBackend, default_local_size, validate_work_size};
use crate::descriptor::{AccessMode, DeviceBuffer, DeviceDescriptor, DeviceType, PlatformDescriptor, TransferMode};
use crate::error::*;
use crate::handle::{
    BufferHandle, ContextHandle, DeviceId, HandleSource, KernelHandle, PlatformId, ProgramHandle, QueueHandle,
    Resource, ResourceCounts, ResourceKind,
};
use lang::{Interpreter, Memory, Module, WorkItem};

pub const HOST_PLATFORM_NAME: &str = "Offload Host";

// OpenCL status codes reported for host-side failures.
const CL_INVALID_VALUE: i32 = -30;
const CL_INVALID_DEVICE: i32 = -33;

#[derive(Debug)]
struct ContextState {
    devices: Vec<DeviceId>,
}

#[derive(Debug)]
struct QueueState {
    context: ContextHandle,
    device: DeviceId,
}

#[derive(Debug)]
struct BufferState {
    context: ContextHandle,
    access: AccessMode,
    data: Vec<u8>,
    kernel_written: bool,
}

#[derive(Debug)]
struct ProgramState {
    module: Arc<Module>,
}

#[derive(Debug)]
struct KernelState {
    module: Arc<Module>,
    index: usize,
    args: SmallVec<[Option<BufferHandle>; 4]>,
}

#[derive(Debug, Default)]
struct HostState {
    contexts: HashMap<ContextHandle, ContextState>,
    queues: HashMap<QueueHandle, QueueState>,
    buffers: HashMap<BufferHandle, BufferState>,
    programs: HashMap<ProgramHandle, ProgramState>,
    kernels: HashMap<KernelHandle, KernelState>,
    allocated_bytes: usize,
}

impl HostState {
    fn context(&self, handle: ContextHandle) -> Result<&ContextState> {
        self.contexts.get(&handle).context(UnknownHandleSnafu { kind: ResourceKind::Context, id: handle.raw() })
    }

    fn queue(&self, handle: QueueHandle) -> Result<&QueueState> {
        self.queues.get(&handle).context(UnknownHandleSnafu { kind: ResourceKind::Queue, id: handle.raw() })
    }

    fn buffer(&self, handle: BufferHandle) -> Result<&BufferState> {
        self.buffers.get(&handle).context(UnknownHandleSnafu { kind: ResourceKind::Buffer, id: handle.raw() })
    }

    fn buffer_mut(&mut self, handle: BufferHandle) -> Result<&mut BufferState> {
        self.buffers.get_mut(&handle).context(UnknownHandleSnafu { kind: ResourceKind::Buffer, id: handle.raw() })
    }

    fn program(&self, handle: ProgramHandle) -> Result<&ProgramState> {
        self.programs.get(&handle).context(UnknownHandleSnafu { kind: ResourceKind::Program, id: handle.raw() })
    }

    fn kernel(&self, handle: KernelHandle) -> Result<&KernelState> {
        self.kernels.get(&handle).context(UnknownHandleSnafu { kind: ResourceKind::Kernel, id: handle.raw() })
    }

    fn kernel_mut(&mut self, handle: KernelHandle) -> Result<&mut KernelState> {
        self.kernels.get_mut(&handle).context(UnknownHandleSnafu { kind: ResourceKind::Kernel, id: handle.raw() })
    }

    /// A transfer must target a buffer of the queue's own context.
    fn transfer_target(&self, queue: QueueHandle, buffer: &DeviceBuffer, len: usize) -> Result<ContextHandle> {
        let context = self.queue(queue)?.context;
        let state = self.buffer(buffer.handle())?;
        ensure!(
            state.context == context,
            TransferFailedSnafu { reason: format!("{} does not belong to the context of {queue}", buffer.handle()) }
        );
        ensure!(
            len == state.data.len(),
            TransferFailedSnafu {
                reason: format!("host slice is {len} bytes but {} is {} bytes", buffer.handle(), state.data.len())
            }
        );
        Ok(context)
    }
}

/// CPU backend that interprets kernels written in the [`lang`] subset.
#[derive(Debug)]
pub struct HostBackend {
    platform: PlatformDescriptor,
    devices: Vec<DeviceDescriptor>,
    memory_limit: usize,
    handles: HandleSource,
    state: Mutex<HostState>,
}

#[bon]
impl HostBackend {
    /// Create a host backend with builder pattern.
    #[builder]
    pub fn builder(
        #[builder(default = 1)] device_count: usize,
        #[builder(default = DeviceType::Cpu)] device_type: DeviceType,
        #[builder(default = 1 << 30)] memory_limit: usize,
        #[builder(default = 1024)] max_work_group_size: usize,
    ) -> Self {
        let platform_id = PlatformId::from_raw(0);
        let platform = PlatformDescriptor {
            id: platform_id,
            name: HOST_PLATFORM_NAME.to_string(),
            vendor: "offload".to_string(),
            version: format!("OpenCL C subset {}", env!("CARGO_PKG_VERSION")),
        };
        let devices = (0..device_count)
            .map(|i| DeviceDescriptor {
                id: DeviceId::from_raw(i as u64),
                platform: platform_id,
                name: format!("host-{i}"),
                device_type,
                max_work_group_size: max_work_group_size.max(1),
                global_mem_size: memory_limit as u64,
            })
            .collect();

        Self { platform, devices, memory_limit, handles: HandleSource::new(), state: Mutex::new(HostState::default()) }
    }

    fn device(&self, id: DeviceId) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|device| device.id == id)
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl DeviceBackend for HostBackend {
    fn name(&self) -> &str {
        "host"
    }

    fn enumerate_platforms(&self) -> Result<Vec<PlatformDescriptor>> {
        Ok(vec![self.platform.clone()])
    }

    fn enumerate_devices(&self, platform: PlatformId, filter: DeviceType) -> Result<Vec<DeviceDescriptor>> {
        let devices: Vec<_> = if platform == self.platform.id {
            self.devices.iter().filter(|device| device.device_type.matches(filter)).cloned().collect()
        } else {
            Vec::new()
        };
        ensure!(!devices.is_empty(), NoDeviceAvailableSnafu { platform: self.platform.name.clone(), filter });
        Ok(devices)
    }

    fn create_context(&self, devices: &[DeviceId]) -> Result<ContextHandle> {
        ensure!(
            !devices.is_empty(),
            ContextCreationFailedSnafu { code: CL_INVALID_VALUE, reason: "no devices given" }
        );
        if let Some(missing) = devices.iter().find(|id| self.device(**id).is_none()) {
            return ContextCreationFailedSnafu { code: CL_INVALID_DEVICE, reason: format!("unknown {missing}") }
                .fail();
        }

        let handle = ContextHandle::from_raw(self.handles.next_raw());
        self.state.lock().contexts.insert(handle, ContextState { devices: devices.to_vec() });
        tracing::trace!(%handle, devices = devices.len(), "context created");
        Ok(handle)
    }

    fn create_command_queue(&self, context: ContextHandle, device: DeviceId) -> Result<QueueHandle> {
        let mut state = self.state.lock();
        ensure!(
            state.context(context)?.devices.contains(&device),
            QueueCreationFailedSnafu { code: CL_INVALID_DEVICE, reason: format!("{device} is not part of {context}") }
        );

        let handle = QueueHandle::from_raw(self.handles.next_raw());
        state.queues.insert(handle, QueueState { context, device });
        tracing::trace!(%handle, %device, "command queue created");
        Ok(handle)
    }

    fn allocate_buffer(&self, context: ContextHandle, size_bytes: usize, access: AccessMode) -> Result<DeviceBuffer> {
        let mut state = self.state.lock();
        state.context(context)?;
        ensure!(size_bytes > 0, AllocationFailedSnafu { size: size_bytes, reason: "zero-sized buffer" });

        let available = self.memory_limit.saturating_sub(state.allocated_bytes);
        ensure!(
            size_bytes <= available,
            AllocationFailedSnafu {
                size: size_bytes,
                reason: format!("device memory exhausted ({available} of {} bytes free)", self.memory_limit)
            }
        );

        let handle = BufferHandle::from_raw(self.handles.next_raw());
        state.allocated_bytes += size_bytes;
        state.buffers.insert(handle, BufferState { context, access, data: vec![0; size_bytes], kernel_written: false });
        tracing::trace!(%handle, size_bytes, %access, "buffer allocated");
        Ok(DeviceBuffer::new(handle, size_bytes, access))
    }

    fn write_buffer(&self, queue: QueueHandle, buffer: &DeviceBuffer, data: &[u8], mode: TransferMode) -> Result<()> {
        let mut state = self.state.lock();
        state.transfer_target(queue, buffer, data.len())?;
        let target = state.buffer_mut(buffer.handle())?;
        target.access.check_host_write()?;
        target.data.copy_from_slice(data);
        tracing::trace!(buffer = %buffer.handle(), bytes = data.len(), ?mode, "buffer written");
        Ok(())
    }

    fn read_buffer(&self, queue: QueueHandle, buffer: &DeviceBuffer, data: &mut [u8]) -> Result<()> {
        let state = self.state.lock();
        state.transfer_target(queue, buffer, data.len())?;
        let source = state.buffer(buffer.handle())?;
        source.access.check_host_read(source.kernel_written)?;
        data.copy_from_slice(&source.data);
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
        {
            let state = self.state.lock();
            let members = &state.context(context)?.devices;
            if let Some(outsider) = devices.iter().find(|id| !members.contains(id)) {
                return BuildFailedSnafu { log: format!("error: {outsider} is not part of {context}") }.fail();
            }
        }
        if !options.trim().is_empty() {
            tracing::debug!(options, "build options are ignored by the host compiler");
        }

        let module = lang::parse(source)
            .map_err(|diagnostics| Error::BuildFailed { log: lang::build_log(&diagnostics) })?;

        let handle = ProgramHandle::from_raw(self.handles.next_raw());
        tracing::trace!(%handle, kernels = module.kernels.len(), "program built");
        self.state.lock().programs.insert(handle, ProgramState { module: Arc::new(module) });
        Ok(handle)
    }

    fn create_kernel(&self, program: ProgramHandle, entry_point: &str) -> Result<KernelHandle> {
        let mut state = self.state.lock();
        let module = Arc::clone(&state.program(program)?.module);
        let index = module.kernel_index(entry_point).context(EntryPointNotFoundSnafu { name: entry_point })?;
        let arity = module.kernels[index].arity();

        let handle = KernelHandle::from_raw(self.handles.next_raw());
        state.kernels.insert(handle, KernelState { module, index, args: SmallVec::from_elem(None, arity) });
        tracing::trace!(%handle, entry_point, arity, "kernel created");
        Ok(handle)
    }

    fn kernel_arity(&self, kernel: KernelHandle) -> Result<usize> {
        Ok(self.state.lock().kernel(kernel)?.args.len())
    }

    fn argument_element_type(&self, kernel: KernelHandle, index: usize) -> Result<Option<String>> {
        let state = self.state.lock();
        let kernel = state.kernel(kernel)?;
        let arity = kernel.args.len();
        ensure!(
            index < arity,
            InvalidArgumentIndexSnafu { kernel: kernel.module.kernels[kernel.index].name.clone(), index, arity }
        );
        // The kernel language only has `int` buffers.
        Ok(Some("int".to_string()))
    }

    fn set_kernel_argument(&self, kernel: KernelHandle, index: usize, buffer: &DeviceBuffer) -> Result<()> {
        let mut state = self.state.lock();
        state.buffer(buffer.handle())?;
        let kernel = state.kernel_mut(kernel)?;
        let arity = kernel.args.len();
        ensure!(
            index < arity,
            InvalidArgumentIndexSnafu { kernel: kernel.module.kernels[kernel.index].name.clone(), index, arity }
        );
        kernel.args[index] = Some(buffer.handle());
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
        let device = state.queue(queue)?.device;
        let max_work_group_size = self.device(device).map_or(1, |d| d.max_work_group_size);
        validate_work_size(global, local, max_work_group_size)?;
        let local = local.unwrap_or_else(|| default_local_size(global, max_work_group_size));

        let (module, index, args) = {
            let kernel = state.kernel(kernel)?;
            (Arc::clone(&kernel.module), kernel.index, kernel.args.clone())
        };
        let def = &module.kernels[index];

        // Parameters aliasing one buffer share a slot.
        let mut distinct: SmallVec<[BufferHandle; 4]> = SmallVec::new();
        let mut bindings = Vec::with_capacity(args.len());
        let mut writable = Vec::with_capacity(args.len());
        for (position, arg) in args.iter().copied().enumerate() {
            let handle = arg.with_context(|| {
                let (param, kernel) = (&def.params[position].name, &def.name);
                let reason = format!("argument {position} ('{param}') of kernel '{kernel}' is not bound");
                DispatchFailedSnafu { reason }
            })?;
            let buffer = state.buffer(handle)?;
            ensure!(
                buffer.data.len() % size_of::<i32>() == 0,
                DispatchFailedSnafu {
                    reason: format!("{handle} holds {} bytes, not a whole number of int elements", buffer.data.len())
                }
            );
            writable.push(buffer.access.kernel_writable());
            let slot = distinct.iter().position(|h| *h == handle).unwrap_or_else(|| {
                distinct.push(handle);
                distinct.len() - 1
            });
            bindings.push(slot);
        }

        let mut buffers = distinct
            .iter()
            .map(|handle| state.buffer(*handle).map(|b| bytemuck::pod_collect_to_vec::<u8, i32>(&b.data)))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(kernel = %def.name, global, local, buffers = buffers.len(), "dispatching");
        let mut interpreter = Interpreter::new(def);
        let mut memory = Memory { buffers: &mut buffers, bindings: &bindings, writable: &writable };
        for group_id in 0..global / local {
            for local_id in 0..local {
                let global_id = group_id * local + local_id;
                let item = WorkItem { global_id, global_size: global, local_id, local_size: local, group_id };
                if let Err(fault) = interpreter.run(&item, &mut memory) {
                    let reason = format!("kernel '{}' work-item {global_id}: {fault}", def.name);
                    return DispatchFailedSnafu { reason }.fail();
                }
            }
        }

        for (handle, values) in distinct.iter().zip(&buffers) {
            let target = state.buffer_mut(*handle)?;
            if target.access.kernel_writable() {
                target.data.copy_from_slice(bytemuck::cast_slice(values.as_slice()));
                target.kernel_written = true;
            }
        }
        Ok(())
    }

    fn finish(&self, queue: QueueHandle) -> Result<()> {
        self.state.lock().queue(queue)?;
        Ok(())
    }

    fn release(&self, resource: Resource) -> Result<()> {
        let mut state = self.state.lock();
        let found = match resource {
            Resource::Context(h) => state.contexts.remove(&h).is_some(),
            Resource::Queue(h) => state.queues.remove(&h).is_some(),
            Resource::Buffer(h) => match state.buffers.remove(&h) {
                Some(buffer) => {
                    state.allocated_bytes -= buffer.data.len();
                    true
                }
                None => false,
            },
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
