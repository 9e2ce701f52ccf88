use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ash::vk;
use crossbeam_channel::{Receiver, Sender};
use slotmap::{Key, SlotMap, new_key_type};
use vela_gfx::barrier::{BarrierBatch, BufferBarrier, ImageBarrier};
use vela_gfx::command::RenderCommand;
use vela_gfx::handle::next_owner_id;
use vela_gfx::resource_desc::{
    EngineBufferCreationFlags, EngineImageCreationFlags, GpuAccelerationStructureDesc, GpuBufferDesc, GpuImageDesc,
    GpuSamplerDesc, align_up, format_byte_size,
};
use vela_gfx::resource_state::{BufferResourceState, ImageResourceState};
use vela_gfx::{
    BackendAccelerationStructureId, BackendBufferId, BackendImageId, BackendSamplerId, DeviceLimits, GfxBackend,
    RenderHandle, RenderHandleReference, RenderHandleType, ResolvedBuffer, ResolvedImage, ResourceError,
    WeakRenderHandleReference,
};

new_key_type! {
    struct ResourceKey;
}

#[inline]
fn key(handle: RenderHandle) -> ResourceKey {
    handle.key_data().into()
}

#[derive(Clone, Copy, Debug)]
enum BackendObject {
    Buffer(BackendBufferId),
    Image(BackendImageId),
    Sampler(BackendSamplerId),
    AccelerationStructure(BackendAccelerationStructureId),
}

/// 等待销毁的后端对象
///
/// deferred 的对象在 `frame_id + buffering_count <= current_frame` 时销毁，
/// 其余对象在 GPU 完成 `frame_id` 后销毁。
struct PendingDestroy {
    object: BackendObject,
    frame_id: u64,
    deferred: bool,
}

/// ring buffer 的轮转状态
struct RingState {
    /// 每个 slot 的字节数，已经按设备要求对齐
    stride: u64,
    slot: u32,
    last_map_frame: u64,
    /// 每个 slot 最后可能被 GPU 读取的帧
    slot_in_use_until: Vec<u64>,
}

struct BufferEntry {
    name: Option<String>,
    desc: GpuBufferDesc,
    backend: BackendBufferId,
    ring: Option<RingState>,
    mapped: bool,
}

struct ResourceEntry<D, B> {
    name: Option<String>,
    desc: D,
    backend: B,
}

struct NamedHandle {
    handle: RenderHandle,
    reference: WeakRenderHandleReference,
}

enum StagingCopy {
    Image(Vec<vk::BufferImageCopy>),
    ScaledImage(vk::Extent3D),
    Buffer(Vec<vk::BufferCopy>),
}

/// 在下一帧开始时执行的上传
struct StagingOp {
    staging: RenderHandleReference,
    dst: RenderHandleReference,
    copy: StagingCopy,
}

#[derive(Default)]
struct ResourceState {
    frame_id: u64,

    buffers: SlotMap<ResourceKey, BufferEntry>,
    images: SlotMap<ResourceKey, ResourceEntry<GpuImageDesc, BackendImageId>>,
    samplers: SlotMap<ResourceKey, ResourceEntry<GpuSamplerDesc, BackendSamplerId>>,
    acceleration_structures:
        SlotMap<ResourceKey, ResourceEntry<GpuAccelerationStructureDesc, BackendAccelerationStructureId>>,

    names: HashMap<String, NamedHandle>,

    pending_destroy: Vec<PendingDestroy>,
    staging_ops: Vec<StagingOp>,
    /// 已经录制到当前帧的 staging buffer，帧结束时释放
    recorded_staging: Vec<RenderHandleReference>,
}

/// 初始数据
///
/// `regions` 非空时按 region 拷贝；否则 `extent` 与 image 尺寸一致时整体拷贝，
/// 不一致时需要 image 带有 `SCALE` 标记。
pub struct ImageUpload<'a> {
    pub data: &'a [u8],
    pub extent: vk::Extent3D,
    pub regions: Vec<vk::BufferImageCopy>,
}
impl<'a> ImageUpload<'a> {
    pub fn full(data: &'a [u8], width: u32, height: u32) -> Self {
        Self {
            data,
            extent: vk::Extent3D { width, height, depth: 1 },
            regions: Vec::new(),
        }
    }

    pub fn with_regions(data: &'a [u8], regions: Vec<vk::BufferImageCopy>) -> Self {
        Self {
            data,
            extent: vk::Extent3D::default(),
            regions,
        }
    }
}

/// GPU 资源管理器
///
/// 持有名字、句柄到后端资源的映射，负责创建、原地重建、映射和延迟销毁。
///
/// 所有接口都使用 `&self`，内部用一把锁保护句柄表和待处理列表，
/// 因此多个渲染图可以并行录制。句柄只在发放它的管理器中有效。
///
/// 创建失败时 `create_*` 记录日志并返回无效的引用，`try_create_*` 返回错误。
pub struct GpuResourceManager {
    owner: u32,
    backend: Arc<dyn GfxBackend>,
    limits: DeviceLimits,
    buffering_count: u32,
    validation: bool,

    release_tx: Sender<RenderHandle>,
    release_rx: Receiver<RenderHandle>,

    state: Mutex<ResourceState>,

    /// 是否处于渲染节点的执行窗口（PreExecuteFrame / ExecuteFrame）
    in_render_window: AtomicBool,
    backend_access_locked: AtomicBool,
}
// new & init
impl GpuResourceManager {
    pub fn new(backend: Arc<dyn GfxBackend>, buffering_count: u32, validation: bool) -> Self {
        let (release_tx, release_rx) = crossbeam_channel::unbounded();
        let limits = backend.limits();
        Self {
            owner: next_owner_id(),
            backend,
            limits,
            buffering_count: buffering_count.max(1),
            validation,
            release_tx,
            release_rx,
            state: Mutex::new(ResourceState::default()),
            in_render_window: AtomicBool::new(false),
            backend_access_locked: AtomicBool::new(false),
        }
    }

    fn state(&self) -> MutexGuard<'_, ResourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
// getters
impl GpuResourceManager {
    #[inline]
    pub fn owner_id(&self) -> u32 {
        self.owner
    }

    #[inline]
    pub fn buffering_count(&self) -> u32 {
        self.buffering_count
    }

    #[inline]
    pub fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    #[inline]
    pub fn backend(&self) -> &Arc<dyn GfxBackend> {
        &self.backend
    }

    #[inline]
    pub fn validation_enabled(&self) -> bool {
        self.validation
    }

    pub fn frame_id(&self) -> u64 {
        self.state().frame_id
    }

    /// 句柄来自本管理器，并且资源仍然存在
    pub fn is_valid(&self, handle: RenderHandle) -> bool {
        if !handle.is_valid() || handle.owner() != self.owner {
            return false;
        }
        let state = self.state();
        match handle.kind() {
            RenderHandleType::GpuBuffer => state.buffers.contains_key(key(handle)),
            RenderHandleType::GpuImage => state.images.contains_key(key(handle)),
            RenderHandleType::GpuSampler => state.samplers.contains_key(key(handle)),
            RenderHandleType::GpuAccelerationStructure => state.acceleration_structures.contains_key(key(handle)),
            _ => false,
        }
    }

    pub fn get_buffer_handle(&self, name: &str) -> Option<RenderHandleReference> {
        self.lookup(name, RenderHandleType::GpuBuffer)
    }

    pub fn get_image_handle(&self, name: &str) -> Option<RenderHandleReference> {
        self.lookup(name, RenderHandleType::GpuImage)
    }

    pub fn get_sampler_handle(&self, name: &str) -> Option<RenderHandleReference> {
        self.lookup(name, RenderHandleType::GpuSampler)
    }

    pub fn get_acceleration_structure_handle(&self, name: &str) -> Option<RenderHandleReference> {
        self.lookup(name, RenderHandleType::GpuAccelerationStructure)
    }

    fn lookup(&self, name: &str, kind: RenderHandleType) -> Option<RenderHandleReference> {
        let state = self.state();
        Self::lookup_locked(&state, name, kind)
    }

    fn lookup_locked(state: &ResourceState, name: &str, kind: RenderHandleType) -> Option<RenderHandleReference> {
        let named = state.names.get(name)?;
        if named.handle.kind() != kind {
            return None;
        }
        named.reference.upgrade()
    }

    pub fn get_buffer_descriptor(&self, handle: RenderHandle) -> Option<GpuBufferDesc> {
        self.check_handle(handle, RenderHandleType::GpuBuffer).ok()?;
        self.state().buffers.get(key(handle)).map(|b| b.desc)
    }

    pub fn get_image_descriptor(&self, handle: RenderHandle) -> Option<GpuImageDesc> {
        self.check_handle(handle, RenderHandleType::GpuImage).ok()?;
        self.state().images.get(key(handle)).map(|i| i.desc)
    }

    pub fn get_sampler_descriptor(&self, handle: RenderHandle) -> Option<GpuSamplerDesc> {
        self.check_handle(handle, RenderHandleType::GpuSampler).ok()?;
        self.state().samplers.get(key(handle)).map(|s| s.desc)
    }

    pub fn get_name(&self, handle: RenderHandle) -> Option<String> {
        let state = self.state();
        let k = key(handle);
        match handle.kind() {
            RenderHandleType::GpuBuffer => state.buffers.get(k)?.name.clone(),
            RenderHandleType::GpuImage => state.images.get(k)?.name.clone(),
            RenderHandleType::GpuSampler => state.samplers.get(k)?.name.clone(),
            RenderHandleType::GpuAccelerationStructure => state.acceleration_structures.get(k)?.name.clone(),
            _ => None,
        }
    }

    pub fn live_resource_count(&self) -> usize {
        let state = self.state();
        state.buffers.len() + state.images.len() + state.samplers.len() + state.acceleration_structures.len()
    }

    pub fn pending_destroy_count(&self) -> usize {
        self.state().pending_destroy.len()
    }

    fn check_handle(&self, handle: RenderHandle, kind: RenderHandleType) -> Result<(), ResourceError> {
        if !handle.is_valid() || handle.kind() != kind {
            return Err(ResourceError::InvalidHandle(handle));
        }
        if handle.owner() != self.owner {
            if self.validation {
                log::error!("handle {handle:?} used with resource manager {}", self.owner);
            }
            return Err(ResourceError::ForeignHandle(handle));
        }
        Ok(())
    }
}
// frame
impl GpuResourceManager {
    pub fn begin_frame(&self, frame_id: u64) {
        self.state().frame_id = frame_id;
    }

    /// 进入或离开渲染节点的执行窗口，窗口之外只有 `MAP_OUTSIDE_RENDERER` 的 buffer 可以映射
    pub fn set_render_window(&self, active: bool) {
        self.in_render_window.store(active, Ordering::Release);
    }

    /// 锁定后不再创建或销毁后端对象，调用方可以安全地直接访问后端资源
    pub fn set_lock_resource_backend_access(&self, locked: bool) {
        self.backend_access_locked.store(locked, Ordering::Release);
        log::info!("resource backend access {}", if locked { "locked" } else { "unlocked" });
    }

    #[inline]
    pub fn is_backend_access_locked(&self) -> bool {
        self.backend_access_locked.load(Ordering::Acquire)
    }

    fn check_unlocked(&self) -> Result<(), ResourceError> {
        if self.is_backend_access_locked() {
            return Err(ResourceError::BackendAccessLocked);
        }
        Ok(())
    }

    /// 取出所有等待执行的上传，生成的命令需要在任何节点之前提交
    pub fn take_staging_commands(&self) -> Vec<RenderCommand> {
        let mut state = self.state();
        let ops = std::mem::take(&mut state.staging_ops);
        let mut commands = Vec::with_capacity(ops.len() * 3);
        for op in ops {
            let src = op.staging.handle();
            let dst = op.dst.handle();
            match op.copy {
                StagingCopy::Buffer(regions) => {
                    commands.push(RenderCommand::CopyBuffer { src, dst, regions });
                    let mut after = BarrierBatch::default();
                    after.add_buffer_barrier(BufferBarrier::new(
                        dst,
                        BufferResourceState::TRANSFER_DST,
                        BufferResourceState::ALL_READ,
                    ));
                    commands.push(RenderCommand::Barriers(after));
                }
                copy => {
                    let mut before = BarrierBatch::default();
                    before.add_image_barrier(ImageBarrier::new(
                        dst,
                        ImageResourceState::UNDEFINED,
                        ImageResourceState::TRANSFER_DST,
                    ));
                    commands.push(RenderCommand::Barriers(before));
                    match copy {
                        StagingCopy::Image(regions) => {
                            commands.push(RenderCommand::CopyBufferToImage { src, dst, regions });
                        }
                        StagingCopy::ScaledImage(src_extent) => commands.push(RenderCommand::BlitBufferToImage {
                            src,
                            src_extent,
                            dst,
                            filter: vk::Filter::NEAREST,
                        }),
                        StagingCopy::Buffer(_) => {}
                    }
                    let mut after = BarrierBatch::default();
                    after.add_image_barrier(ImageBarrier::new(
                        dst,
                        ImageResourceState::TRANSFER_DST,
                        ImageResourceState::SHADER_READ_FRAGMENT,
                    ));
                    commands.push(RenderCommand::Barriers(after));
                }
            }
            state.recorded_staging.push(op.staging);
        }
        commands
    }

    /// 帧结束：处理引用计数归零的资源，销毁已经不再被 GPU 使用的后端对象
    pub fn end_frame(&self) {
        let _span = tracy_client::span!("GpuResourceManager::end_frame");
        let mut state = self.state();

        // 本帧录制的 staging buffer 可以释放了
        let recorded = std::mem::take(&mut state.recorded_staging);
        drop(recorded);

        self.drain_released(&mut state);
        if self.is_backend_access_locked() {
            return;
        }

        let current_frame_id = state.frame_id;
        let completed_frame_id = self.backend.completed_frame();
        let buffering_count = self.buffering_count as u64;
        let backend = &self.backend;
        state.pending_destroy.retain(|pending| {
            let ready = if pending.deferred {
                pending.frame_id + buffering_count <= current_frame_id
            } else {
                pending.frame_id <= completed_frame_id
            };
            if ready {
                destroy_backend_object(backend.as_ref(), pending.object);
            }
            !ready
        });
    }

    /// 等待 GPU 空闲并立即销毁所有待销毁的对象
    pub fn wait_for_idle(&self) {
        let _span = tracy_client::span!("GpuResourceManager::wait_for_idle");
        self.backend.wait_idle();

        let mut state = self.state();
        let recorded = std::mem::take(&mut state.recorded_staging);
        drop(recorded);
        self.drain_released(&mut state);
        for pending in state.pending_destroy.drain(..) {
            destroy_backend_object(self.backend.as_ref(), pending.object);
        }
    }

    fn drain_released(&self, state: &mut ResourceState) {
        while let Ok(handle) = self.release_rx.try_recv() {
            self.release(state, handle);
        }
    }

    fn release(&self, state: &mut ResourceState, handle: RenderHandle) {
        let frame_id = state.frame_id;
        let k = key(handle);
        let (name, object, deferred) = match handle.kind() {
            RenderHandleType::GpuBuffer => match state.buffers.remove(k) {
                Some(entry) => (entry.name, BackendObject::Buffer(entry.backend), entry.desc.is_deferred_destroy()),
                None => return,
            },
            RenderHandleType::GpuImage => match state.images.remove(k) {
                Some(entry) => (
                    entry.name,
                    BackendObject::Image(entry.backend),
                    entry.desc.engine_creation_flags.contains(EngineImageCreationFlags::DEFERRED_DESTROY),
                ),
                None => return,
            },
            RenderHandleType::GpuSampler => match state.samplers.remove(k) {
                Some(entry) => (entry.name, BackendObject::Sampler(entry.backend), false),
                None => return,
            },
            RenderHandleType::GpuAccelerationStructure => match state.acceleration_structures.remove(k) {
                Some(entry) => (
                    entry.name,
                    BackendObject::AccelerationStructure(entry.backend),
                    entry.desc.buffer_desc.is_deferred_destroy(),
                ),
                None => return,
            },
            _ => return,
        };

        if let Some(name) = name {
            // 同名资源可能已经被重新创建
            if state.names.get(&name).is_some_and(|n| n.handle == handle) {
                state.names.remove(&name);
            }
        }
        log::debug!("release {handle:?} at frame {frame_id}, deferred: {deferred}");
        state.pending_destroy.push(PendingDestroy {
            object,
            frame_id,
            deferred,
        });
    }
}
// buffer
impl GpuResourceManager {
    fn ring_alignment(&self, desc: &GpuBufferDesc) -> u64 {
        let mut alignment = 1;
        if desc.usage_flags.intersects(vk::BufferUsageFlags::UNIFORM_BUFFER) {
            alignment = alignment.max(self.limits.min_uniform_buffer_offset_alignment);
        }
        if desc.usage_flags.intersects(vk::BufferUsageFlags::STORAGE_BUFFER) {
            alignment = alignment.max(self.limits.min_storage_buffer_offset_alignment);
        }
        alignment
    }

    /// ring buffer 为 `align_up(byte_size) * buffering_count`
    fn new_ring_state(&self, desc: &GpuBufferDesc) -> Option<RingState> {
        desc.is_ring_buffer().then(|| RingState {
            stride: align_up(desc.byte_size, self.ring_alignment(desc)),
            slot: 0,
            last_map_frame: 0,
            slot_in_use_until: vec![0; self.buffering_count as usize],
        })
    }

    fn allocate_buffer(
        &self,
        name: &str,
        desc: &GpuBufferDesc,
    ) -> Result<(BackendBufferId, Option<RingState>), ResourceError> {
        desc.validate(name)?;
        self.check_unlocked()?;
        let ring = self.new_ring_state(desc);
        let byte_size = match &ring {
            Some(ring) => ring.stride * self.buffering_count as u64,
            None => desc.byte_size,
        };
        let backend = self.backend.create_buffer(desc, byte_size)?;
        Ok((backend, ring))
    }

    /// 创建 buffer；同名且仍然存活的 buffer 会被原地重建，返回同一个句柄
    pub fn try_create_buffer(
        &self,
        name: Option<&str>,
        desc: &GpuBufferDesc,
    ) -> Result<RenderHandleReference, ResourceError> {
        let _span = tracy_client::span!("GpuResourceManager::create_buffer");
        // 名字查找、后端分配和注册在同一次加锁中完成，同名的并发创建只分配一次
        let mut state = self.state();
        if let Some(existing) = name.and_then(|n| Self::lookup_locked(&state, n, RenderHandleType::GpuBuffer)) {
            let unchanged = state.buffers.get(key(existing.handle())).map(|b| &b.desc) == Some(desc);
            drop(state);
            if !unchanged {
                self.try_recreate_buffer(&existing, desc)?;
            }
            return Ok(existing);
        }

        let (backend, ring) = self.allocate_buffer(name.unwrap_or("<anonymous>"), desc)?;
        let k = state.buffers.insert(BufferEntry {
            name: name.map(str::to_string),
            desc: *desc,
            backend,
            ring,
            mapped: false,
        });
        Ok(self.register(&mut state, name, RenderHandle::new(RenderHandleType::GpuBuffer, self.owner, k.data())))
    }

    pub fn create_buffer(&self, name: &str, desc: &GpuBufferDesc) -> RenderHandleReference {
        self.try_create_buffer(Some(name), desc).unwrap_or_else(|err| {
            log::error!("failed to create buffer '{name}': {err}");
            RenderHandleReference::invalid()
        })
    }

    pub fn create_anonymous_buffer(&self, desc: &GpuBufferDesc) -> RenderHandleReference {
        self.try_create_buffer(None, desc).unwrap_or_else(|err| {
            log::error!("failed to create anonymous buffer: {err}");
            RenderHandleReference::invalid()
        })
    }

    /// host visible 的 buffer 直接写入（ring buffer 的每个 slot 都写入），
    /// 否则通过 staging buffer 在下一帧开始时上传
    pub fn try_create_buffer_with_data(
        &self,
        name: Option<&str>,
        desc: &GpuBufferDesc,
        data: &[u8],
    ) -> Result<RenderHandleReference, ResourceError> {
        if data.len() as u64 > desc.byte_size {
            return Err(ResourceError::OutOfBounds {
                offset: 0,
                size: data.len() as u64,
                capacity: desc.byte_size,
            });
        }

        if desc.is_host_visible() {
            let buffer = self.try_create_buffer(name, desc)?;
            let state = self.state();
            let entry = state.buffers.get(key(buffer.handle())).ok_or(ResourceError::InvalidHandle(buffer.handle()))?;
            let slots = entry.ring.as_ref().map(|r| (r.stride, self.buffering_count)).unwrap_or((0, 1));
            for slot in 0..slots.1 {
                self.write_backend_buffer(entry.backend, slot as u64 * slots.0, data)?;
            }
            return Ok(buffer);
        }

        let mut device_desc = *desc;
        device_desc.usage_flags |= vk::BufferUsageFlags::TRANSFER_DST;
        let buffer = self.try_create_buffer(name, &device_desc)?;
        let staging = self.create_staging_buffer(data)?;
        self.state().staging_ops.push(StagingOp {
            staging,
            dst: buffer.clone(),
            copy: StagingCopy::Buffer(vec![vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: data.len() as u64,
            }]),
        });
        Ok(buffer)
    }

    pub fn create_buffer_with_data(&self, name: &str, desc: &GpuBufferDesc, data: &[u8]) -> RenderHandleReference {
        self.try_create_buffer_with_data(Some(name), desc, data).unwrap_or_else(|err| {
            log::error!("failed to create buffer '{name}' with data: {err}");
            RenderHandleReference::invalid()
        })
    }

    /// 用新的描述替换句柄背后的后端对象，句柄保持不变
    ///
    /// 旧对象按旧描述的 DEFERRED_DESTROY 标记延迟销毁。
    pub fn try_recreate_buffer(&self, handle: &RenderHandleReference, desc: &GpuBufferDesc) -> Result<(), ResourceError> {
        let handle = handle.handle();
        self.check_handle(handle, RenderHandleType::GpuBuffer)?;
        let name = self.get_name(handle).unwrap_or_else(|| "<anonymous>".to_string());
        {
            let state = self.state();
            let entry = state.buffers.get(key(handle)).ok_or(ResourceError::InvalidHandle(handle))?;
            if entry.mapped {
                return Err(ResourceError::AlreadyMapped(handle));
            }
        }

        let (backend, ring) = self.allocate_buffer(&name, desc)?;
        let mut state = self.state();
        let frame_id = state.frame_id;
        let Some(entry) = state.buffers.get_mut(key(handle)) else {
            self.backend.destroy_buffer(backend);
            return Err(ResourceError::InvalidHandle(handle));
        };
        let old = std::mem::replace(&mut entry.backend, backend);
        let deferred = entry.desc.is_deferred_destroy();
        entry.desc = *desc;
        entry.ring = ring;
        log::debug!("recreated buffer '{name}' ({handle:?}), {} bytes", desc.byte_size);
        state.pending_destroy.push(PendingDestroy {
            object: BackendObject::Buffer(old),
            frame_id,
            deferred,
        });
        Ok(())
    }

    pub fn recreate_buffer(&self, handle: &RenderHandleReference, desc: &GpuBufferDesc) -> bool {
        match self.try_recreate_buffer(handle, desc) {
            Ok(()) => true,
            Err(err) => {
                log::error!("failed to recreate buffer {:?}: {err}", handle.handle());
                false
            }
        }
    }

    fn create_staging_buffer(&self, data: &[u8]) -> Result<RenderHandleReference, ResourceError> {
        let staging = self.try_create_buffer(None, &GpuBufferDesc::staging(data.len() as u64))?;
        let backend = self
            .state()
            .buffers
            .get(key(staging.handle()))
            .map(|b| b.backend)
            .ok_or(ResourceError::InvalidHandle(staging.handle()))?;
        self.write_backend_buffer(backend, 0, data)?;
        Ok(staging)
    }

    fn write_backend_buffer(&self, buffer: BackendBufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        let ptr = self.backend.map_buffer(buffer)?;
        // SAFETY: 调用方保证 offset + data.len() 在分配范围内
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr().add(offset as usize), data.len());
        }
        self.backend.unmap_buffer(buffer);
        Ok(())
    }

    /// 映射 buffer，返回的 guard 在 drop 时解除映射
    ///
    /// ring buffer 在每帧第一次映射时轮转到下一个 slot，如果该 slot 仍可能被在飞的帧读取，
    /// 会阻塞等待对应的帧完成。不要跨帧缓存映射得到的指针。
    pub fn map_buffer(&self, handle: RenderHandle) -> Result<MappedBuffer<'_>, ResourceError> {
        let ptr = self.map_buffer_memory(handle)?;
        let len = self.get_buffer_descriptor(handle).map(|d| d.byte_size).unwrap_or(0) as usize;
        Ok(MappedBuffer {
            manager: self,
            handle,
            ptr,
            len,
        })
    }

    /// 返回当前帧可写区域的起始地址，需要配对调用 `unmap_buffer`
    pub fn map_buffer_memory(&self, handle: RenderHandle) -> Result<NonNull<u8>, ResourceError> {
        self.check_handle(handle, RenderHandleType::GpuBuffer)?;
        let in_render_window = self.in_render_window.load(Ordering::Acquire);

        let mut state = self.state();
        let frame_id = state.frame_id;
        let entry = state.buffers.get_mut(key(handle)).ok_or(ResourceError::InvalidHandle(handle))?;
        let backend = entry.backend;
        if !entry.desc.is_host_visible() {
            return Err(ResourceError::NotMappable(handle));
        }
        if self.validation
            && !in_render_window
            && !entry.desc.engine_creation_flags.contains(EngineBufferCreationFlags::MAP_OUTSIDE_RENDERER)
        {
            log::error!("buffer {:?} mapped outside the render node execution window", entry.name);
            return Err(ResourceError::MapOutsideRenderer(handle));
        }
        if entry.mapped {
            return Err(ResourceError::AlreadyMapped(handle));
        }

        let mut offset = 0;
        let mut wait_frame = 0;
        if let Some(ring) = entry.ring.as_mut() {
            if ring.last_map_frame != frame_id {
                let previous = ring.slot as usize;
                ring.slot_in_use_until[previous] = frame_id.saturating_sub(1);
                ring.slot = (ring.slot + 1) % self.buffering_count;
                ring.last_map_frame = frame_id;
                wait_frame = ring.slot_in_use_until[ring.slot as usize];
            }
            offset = ring.slot as u64 * ring.stride;
        }
        // 先占住映射状态，等待期间其他调用方不能映射或重建这个 buffer
        entry.mapped = true;
        drop(state);

        if wait_frame > self.backend.completed_frame() {
            let _span = tracy_client::span!("GpuResourceManager::wait_ring_slot");
            self.backend.wait_for_frame(wait_frame);
        }

        // 等待期间句柄可能已经被释放
        let mut state = self.state();
        let entry = match state.buffers.get_mut(key(handle)) {
            Some(entry) if entry.backend == backend => entry,
            _ => return Err(ResourceError::InvalidHandle(handle)),
        };
        match self.backend.map_buffer(backend) {
            // SAFETY: offset 为 slot * stride，小于分配的大小
            Ok(base) => Ok(unsafe { base.add(offset as usize) }),
            Err(err) => {
                entry.mapped = false;
                Err(err)
            }
        }
    }

    pub fn unmap_buffer(&self, handle: RenderHandle) {
        let mut state = self.state();
        if let Some(entry) = state.buffers.get_mut(key(handle)) {
            if handle.owner() == self.owner && entry.mapped {
                entry.mapped = false;
                self.backend.unmap_buffer(entry.backend);
            }
        }
    }
}
// image
impl GpuResourceManager {
    fn validate_image(&self, name: &str, desc: &GpuImageDesc) -> Result<(), ResourceError> {
        desc.validate(name)?;
        let max = self.limits.max_image_dimension_2d;
        if desc.width > max || desc.height > max {
            return Err(ResourceError::InvalidDimensions {
                name: name.to_string(),
                details: format!("{}x{} exceeds the device limit {max}", desc.width, desc.height),
            });
        }
        Ok(())
    }

    pub fn try_create_image(
        &self,
        name: Option<&str>,
        desc: &GpuImageDesc,
    ) -> Result<RenderHandleReference, ResourceError> {
        let _span = tracy_client::span!("GpuResourceManager::create_image");
        let mut state = self.state();
        if let Some(existing) = name.and_then(|n| Self::lookup_locked(&state, n, RenderHandleType::GpuImage)) {
            let unchanged = state.images.get(key(existing.handle())).map(|i| &i.desc) == Some(desc);
            drop(state);
            if !unchanged {
                self.try_recreate_image(&existing, desc)?;
            }
            return Ok(existing);
        }

        self.validate_image(name.unwrap_or("<anonymous>"), desc)?;
        self.check_unlocked()?;
        let backend = self.backend.create_image(desc)?;
        let k = state.images.insert(ResourceEntry {
            name: name.map(str::to_string),
            desc: *desc,
            backend,
        });
        Ok(self.register(&mut state, name, RenderHandle::new(RenderHandleType::GpuImage, self.owner, k.data())))
    }

    pub fn create_image(&self, name: &str, desc: &GpuImageDesc) -> RenderHandleReference {
        self.try_create_image(Some(name), desc).unwrap_or_else(|err| {
            log::error!("failed to create image '{name}': {err}");
            RenderHandleReference::invalid()
        })
    }

    pub fn create_anonymous_image(&self, desc: &GpuImageDesc) -> RenderHandleReference {
        self.try_create_image(None, desc).unwrap_or_else(|err| {
            log::error!("failed to create anonymous image: {err}");
            RenderHandleReference::invalid()
        })
    }

    /// 创建 image 并在下一帧开始时上传初始数据
    pub fn try_create_image_with_data(
        &self,
        name: Option<&str>,
        desc: &GpuImageDesc,
        upload: &ImageUpload<'_>,
    ) -> Result<RenderHandleReference, ResourceError> {
        let display_name = name.unwrap_or("<anonymous>");
        self.validate_image(display_name, desc)?;
        let texel = format_byte_size(desc.format).unwrap_or(0) as u64;
        let extent = upload.extent;

        let copy = if !upload.regions.is_empty() {
            StagingCopy::Image(upload.regions.clone())
        } else {
            let required = texel * extent.width as u64 * extent.height as u64 * extent.depth.max(1) as u64;
            if (upload.data.len() as u64) < required || required == 0 {
                return Err(ResourceError::OutOfBounds {
                    offset: 0,
                    size: required,
                    capacity: upload.data.len() as u64,
                });
            }
            let same_extent =
                extent.width == desc.width && extent.height == desc.height && extent.depth.max(1) == desc.depth;
            if same_extent {
                StagingCopy::Image(vec![vk::BufferImageCopy {
                    image_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    image_extent: desc.extent(),
                    ..Default::default()
                }])
            } else if desc.engine_creation_flags.contains(EngineImageCreationFlags::SCALE) {
                StagingCopy::ScaledImage(extent)
            } else {
                return Err(ResourceError::InvalidDimensions {
                    name: display_name.to_string(),
                    details: format!(
                        "initial data is {}x{} but the image is {}x{} and SCALE is not set",
                        extent.width, extent.height, desc.width, desc.height
                    ),
                });
            }
        };

        let mut upload_desc = *desc;
        upload_desc.usage_flags |= vk::ImageUsageFlags::TRANSFER_DST;
        let image = self.try_create_image(name, &upload_desc)?;
        let staging = self.create_staging_buffer(upload.data)?;
        self.state().staging_ops.push(StagingOp {
            staging,
            dst: image.clone(),
            copy,
        });
        Ok(image)
    }

    pub fn create_image_with_data(
        &self,
        name: &str,
        desc: &GpuImageDesc,
        upload: &ImageUpload<'_>,
    ) -> RenderHandleReference {
        self.try_create_image_with_data(Some(name), desc, upload).unwrap_or_else(|err| {
            log::error!("failed to create image '{name}' with data: {err}");
            RenderHandleReference::invalid()
        })
    }

    pub fn try_recreate_image(&self, handle: &RenderHandleReference, desc: &GpuImageDesc) -> Result<(), ResourceError> {
        let handle = handle.handle();
        self.check_handle(handle, RenderHandleType::GpuImage)?;
        let name = self.get_name(handle).unwrap_or_else(|| "<anonymous>".to_string());
        self.validate_image(&name, desc)?;
        self.check_unlocked()?;

        let backend = self.backend.create_image(desc)?;
        let mut state = self.state();
        let frame_id = state.frame_id;
        let Some(entry) = state.images.get_mut(key(handle)) else {
            self.backend.destroy_image(backend);
            return Err(ResourceError::InvalidHandle(handle));
        };
        let old = std::mem::replace(&mut entry.backend, backend);
        let deferred = entry.desc.engine_creation_flags.contains(EngineImageCreationFlags::DEFERRED_DESTROY);
        entry.desc = *desc;
        log::debug!("recreated image '{name}' ({handle:?}), {}x{}", desc.width, desc.height);
        state.pending_destroy.push(PendingDestroy {
            object: BackendObject::Image(old),
            frame_id,
            deferred,
        });
        Ok(())
    }

    pub fn recreate_image(&self, handle: &RenderHandleReference, desc: &GpuImageDesc) -> bool {
        match self.try_recreate_image(handle, desc) {
            Ok(()) => true,
            Err(err) => {
                log::error!("failed to recreate image {:?}: {err}", handle.handle());
                false
            }
        }
    }
}
// sampler & acceleration structure
impl GpuResourceManager {
    pub fn try_create_sampler(
        &self,
        name: Option<&str>,
        desc: &GpuSamplerDesc,
    ) -> Result<RenderHandleReference, ResourceError> {
        let mut state = self.state();
        if let Some(existing) = name.and_then(|n| Self::lookup_locked(&state, n, RenderHandleType::GpuSampler)) {
            if state.samplers.get(key(existing.handle())).map(|s| &s.desc) == Some(desc) {
                return Ok(existing);
            }
        }
        desc.validate(name.unwrap_or("<anonymous>"))?;
        self.check_unlocked()?;
        let backend = self.backend.create_sampler(desc)?;
        let k = state.samplers.insert(ResourceEntry {
            name: name.map(str::to_string),
            desc: *desc,
            backend,
        });
        Ok(self.register(&mut state, name, RenderHandle::new(RenderHandleType::GpuSampler, self.owner, k.data())))
    }

    pub fn create_sampler(&self, name: &str, desc: &GpuSamplerDesc) -> RenderHandleReference {
        self.try_create_sampler(Some(name), desc).unwrap_or_else(|err| {
            log::error!("failed to create sampler '{name}': {err}");
            RenderHandleReference::invalid()
        })
    }

    pub fn try_create_acceleration_structure(
        &self,
        name: Option<&str>,
        desc: &GpuAccelerationStructureDesc,
    ) -> Result<RenderHandleReference, ResourceError> {
        desc.validate(name.unwrap_or("<anonymous>"))?;
        self.check_unlocked()?;
        let backend = self.backend.create_acceleration_structure(desc)?;
        let mut state = self.state();
        let k = state.acceleration_structures.insert(ResourceEntry {
            name: name.map(str::to_string),
            desc: *desc,
            backend,
        });
        let handle = RenderHandle::new(RenderHandleType::GpuAccelerationStructure, self.owner, k.data());
        Ok(self.register(&mut state, name, handle))
    }

    pub fn create_acceleration_structure(
        &self,
        name: &str,
        desc: &GpuAccelerationStructureDesc,
    ) -> RenderHandleReference {
        self.try_create_acceleration_structure(Some(name), desc).unwrap_or_else(|err| {
            log::error!("failed to create acceleration structure '{name}': {err}");
            RenderHandleReference::invalid()
        })
    }

    fn register(&self, state: &mut ResourceState, name: Option<&str>, handle: RenderHandle) -> RenderHandleReference {
        let reference = RenderHandleReference::new(handle, self.release_tx.clone());
        if let Some(name) = name {
            let shadowed = state.names.insert(
                name.to_string(),
                NamedHandle {
                    handle,
                    reference: reference.downgrade(),
                },
            );
            if let Some(shadowed) = shadowed.filter(|s| s.reference.is_alive()) {
                log::warn!("resource name '{name}' now refers to {handle:?} instead of {:?}", shadowed.handle);
            }
        }
        reference
    }
}
// resolve
impl GpuResourceManager {
    /// 当前帧可见的 buffer 范围，ring buffer 解析到当前 slot
    pub fn resolve_buffer(&self, handle: RenderHandle) -> Option<ResolvedBuffer> {
        self.check_handle(handle, RenderHandleType::GpuBuffer).ok()?;
        let state = self.state();
        let entry = state.buffers.get(key(handle))?;
        let offset = entry.ring.as_ref().map(|r| r.slot as u64 * r.stride).unwrap_or(0);
        Some(ResolvedBuffer {
            id: entry.backend,
            offset,
            size: entry.desc.byte_size,
        })
    }

    pub fn resolve_image(&self, handle: RenderHandle) -> Option<ResolvedImage> {
        self.check_handle(handle, RenderHandleType::GpuImage).ok()?;
        let state = self.state();
        let entry = state.images.get(key(handle))?;
        Some(ResolvedImage {
            id: entry.backend,
            desc: entry.desc,
        })
    }

    pub fn resolve_sampler(&self, handle: RenderHandle) -> Option<BackendSamplerId> {
        self.check_handle(handle, RenderHandleType::GpuSampler).ok()?;
        self.state().samplers.get(key(handle)).map(|s| s.backend)
    }

    pub fn resolve_acceleration_structure(&self, handle: RenderHandle) -> Option<BackendAccelerationStructureId> {
        self.check_handle(handle, RenderHandleType::GpuAccelerationStructure).ok()?;
        self.state().acceleration_structures.get(key(handle)).map(|a| a.backend)
    }
}
impl Drop for GpuResourceManager {
    fn drop(&mut self) {
        let _span = tracy_client::span!("GpuResourceManager::destroy_all");
        self.backend.wait_idle();

        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        state.staging_ops.clear();
        state.recorded_staging.clear();
        state.names.clear();

        let backend = self.backend.as_ref();
        for pending in state.pending_destroy.drain(..) {
            destroy_backend_object(backend, pending.object);
        }
        for (_, buffer) in state.buffers.drain() {
            backend.destroy_buffer(buffer.backend);
        }
        for (_, image) in state.images.drain() {
            backend.destroy_image(image.backend);
        }
        for (_, sampler) in state.samplers.drain() {
            backend.destroy_sampler(sampler.backend);
        }
        for (_, acceleration_structure) in state.acceleration_structures.drain() {
            backend.destroy_acceleration_structure(acceleration_structure.backend);
        }
    }
}

fn destroy_backend_object(backend: &dyn GfxBackend, object: BackendObject) {
    match object {
        BackendObject::Buffer(id) => backend.destroy_buffer(id),
        BackendObject::Image(id) => backend.destroy_image(id),
        BackendObject::Sampler(id) => backend.destroy_sampler(id),
        BackendObject::AccelerationStructure(id) => backend.destroy_acceleration_structure(id),
    }
}

/// 映射后的 buffer 内存，drop 时解除映射
pub struct MappedBuffer<'a> {
    manager: &'a GpuResourceManager,
    handle: RenderHandle,
    ptr: NonNull<u8>,
    len: usize,
}
impl MappedBuffer<'_> {
    #[inline]
    pub fn handle(&self) -> RenderHandle {
        self.handle
    }

    /// 按字节偏移写入一组 POD 数据
    pub fn write_slice<T: bytemuck::Pod>(&mut self, byte_offset: usize, data: &[T]) -> Result<(), ResourceError> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let capacity = self.len;
        let dst = self.get_mut(byte_offset..byte_offset + bytes.len()).ok_or(ResourceError::OutOfBounds {
            offset: byte_offset as u64,
            size: bytes.len() as u64,
            capacity: capacity as u64,
        })?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    pub fn write<T: bytemuck::Pod>(&mut self, byte_offset: usize, value: &T) -> Result<(), ResourceError> {
        self.write_slice(byte_offset, std::slice::from_ref(value))
    }
}
impl Deref for MappedBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: ptr 指向当前 slot 的起始位置，至少有 len 个字节，并且映射期间不会被释放
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}
impl DerefMut for MappedBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: 同上，AlreadyMapped 检查保证同一时间只有一个可写映射
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}
impl Drop for MappedBuffer<'_> {
    fn drop(&mut self) {
        self.manager.unmap_buffer(self.handle);
    }
}
