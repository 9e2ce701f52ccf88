use std::sync::Arc;

use ash::vk;
use slotmap::{Key, SlotMap, new_key_type};
use vela_gfx::descriptor::{DescriptorBufferInfo, DescriptorCategory, DescriptorCounts, DescriptorImageInfo, DescriptorWrite};
use vela_gfx::handle::next_owner_id;
use vela_gfx::pipeline_layout::{DescriptorSetLayout, DescriptorSetLayoutBinding, PipelineLayout};
use vela_gfx::resource_desc::is_depth_format;
use vela_gfx::{BackendDescriptorPoolId, BackendDescriptorSetId, GfxBackend, RenderHandle, RenderHandleType};

use crate::descriptor_set_binder::{BoundResource, DescriptorSetBinder, DescriptorSetLayoutBindingResources};
use crate::error::DescriptorError;
use crate::gpu_resource_manager::GpuResourceManager;

new_key_type! {
    struct DescriptorSetKey;
}

#[inline]
fn key(handle: RenderHandle) -> DescriptorSetKey {
    handle.key_data().into()
}

/// 带有 buffering_count 份后端拷贝的 descriptor set
///
/// 内容变化时写入下一份拷贝，正在被 GPU 读取的拷贝不会被覆盖。
struct BufferedDescriptorSet {
    layout: DescriptorSetLayout,
    copies: Vec<BackendDescriptorSetId>,
    current: usize,
    /// 最后一次写入的内容，用于去掉重复的更新
    last_writes: Option<Vec<DescriptorWrite>>,
    written_frame: u64,
}

/// 只在创建它的那一帧有效
struct OneFrameDescriptorSet {
    layout: DescriptorSetLayout,
    set: BackendDescriptorSetId,
    frame_id: u64,
}

enum DescriptorSetEntry {
    Buffered(BufferedDescriptorSet),
    OneFrame(OneFrameDescriptorSet),
}
impl DescriptorSetEntry {
    fn layout(&self) -> &DescriptorSetLayout {
        match self {
            DescriptorSetEntry::Buffered(set) => &set.layout,
            DescriptorSetEntry::OneFrame(set) => &set.layout,
        }
    }
}

/// 预留的 pool 以及已经使用的部分
struct ReservedPool {
    pool: BackendDescriptorPoolId,
    /// 每份拷贝的容量（未乘 buffering_count）
    capacity: DescriptorCounts,
    used: DescriptorCounts,
    max_sets: u32,
    used_sets: u32,
}
impl ReservedPool {
    fn can_allocate(&self, required: &DescriptorCounts, set_count: u32) -> bool {
        let mut used = self.used.clone();
        used.merge(required);
        self.capacity.covers(&used) && self.used_sets + set_count <= self.max_sets
    }
}

/// 单个渲染节点的 descriptor set 管理器
///
/// 节点在 init 时调用一次 `reset_and_reserve`，传入节点将要创建的所有 set 的需求之和，
/// 之后所有 set 都从这个 pool 中分配，整个渲染图生命周期内不再增长。
pub struct DescriptorSetManager {
    owner: u32,
    backend: Arc<dyn GfxBackend>,
    buffering_count: u32,
    validation: bool,
    /// 在预留的基础上额外允许分配的 set 数量
    headroom: u32,
    min_uniform_buffer_offset_alignment: u64,
    min_storage_buffer_offset_alignment: u64,

    frame_id: u64,
    reserved: Option<ReservedPool>,
    /// 每个 ring index 一个 pool，在对应帧开始时 reset
    one_frame_pools: Vec<ReservedPool>,
    sets: SlotMap<DescriptorSetKey, DescriptorSetEntry>,
    /// 被替换的 pool，等到 GPU 不再使用后销毁
    retired_pools: Vec<(BackendDescriptorPoolId, u64)>,

    descriptor_set_updates: u32,
    skipped_updates: u32,
}
// new & init
impl DescriptorSetManager {
    pub fn new(backend: Arc<dyn GfxBackend>, buffering_count: u32, validation: bool, headroom: u32) -> Self {
        let limits = backend.limits();
        Self {
            owner: next_owner_id(),
            backend,
            buffering_count: buffering_count.max(1),
            validation,
            headroom,
            min_uniform_buffer_offset_alignment: limits.min_uniform_buffer_offset_alignment,
            min_storage_buffer_offset_alignment: limits.min_storage_buffer_offset_alignment,
            frame_id: 0,
            reserved: None,
            one_frame_pools: Vec::new(),
            sets: SlotMap::with_key(),
            retired_pools: Vec::new(),
            descriptor_set_updates: 0,
            skipped_updates: 0,
        }
    }

    /// 按 `counts` 预留 pool，已经创建的 descriptor set 全部失效
    pub fn reset_and_reserve(&mut self, counts: &DescriptorCounts) {
        let _span = tracy_client::span!("DescriptorSetManager::reset_and_reserve");
        self.sets.retain(|_, entry| matches!(entry, DescriptorSetEntry::OneFrame(_)));
        if let Some(old) = self.reserved.take() {
            self.retired_pools.push((old.pool, self.frame_id));
        }
        if counts.is_empty() {
            return;
        }

        let bc = self.buffering_count;
        let max_sets = counts.total() * bc + self.headroom;
        match self.backend.create_descriptor_pool(&counts.scaled(bc), max_sets) {
            Ok(pool) => {
                log::debug!("reserved descriptor pool: {} descriptors x {bc}, {max_sets} sets", counts.total());
                self.reserved = Some(ReservedPool {
                    pool,
                    capacity: counts.clone(),
                    used: DescriptorCounts::default(),
                    max_sets,
                    used_sets: 0,
                });
            }
            Err(err) => log::error!("failed to create descriptor pool: {err}"),
        }
    }

    /// 预留每帧重置的 one frame descriptor set 预算
    pub fn reserve_one_frame(&mut self, counts: &DescriptorCounts) {
        for old in self.one_frame_pools.drain(..) {
            self.retired_pools.push((old.pool, self.frame_id));
        }
        self.sets.retain(|_, entry| matches!(entry, DescriptorSetEntry::Buffered(_)));
        if counts.is_empty() {
            return;
        }

        let max_sets = counts.total() + self.headroom;
        for ring_index in 0..self.buffering_count {
            match self.backend.create_descriptor_pool(counts, max_sets) {
                Ok(pool) => self.one_frame_pools.push(ReservedPool {
                    pool,
                    capacity: counts.clone(),
                    used: DescriptorCounts::default(),
                    max_sets,
                    used_sets: 0,
                }),
                Err(err) => {
                    log::error!("failed to create one frame descriptor pool {ring_index}: {err}");
                    break;
                }
            }
        }
    }

    pub fn begin_frame(&mut self, frame_id: u64) {
        self.frame_id = frame_id;
        self.sets.retain(|_, entry| match entry {
            DescriptorSetEntry::OneFrame(set) => set.frame_id == frame_id,
            DescriptorSetEntry::Buffered(_) => true,
        });

        // renderer 在开始帧 F 之前已经等待了 F - buffering_count，对应的 pool 可以复用
        if !self.one_frame_pools.is_empty() {
            let ring_index = (frame_id % self.one_frame_pools.len() as u64) as usize;
            let pool = &mut self.one_frame_pools[ring_index];
            self.backend.reset_descriptor_pool(pool.pool);
            pool.used = DescriptorCounts::default();
            pool.used_sets = 0;
        }

        let bc = self.buffering_count as u64;
        let backend = &self.backend;
        self.retired_pools.retain(|(pool, retired_frame)| {
            let ready = retired_frame + bc <= frame_id;
            if ready {
                backend.destroy_descriptor_pool(*pool);
            }
            !ready
        });
    }
}
// getters
impl DescriptorSetManager {
    #[inline]
    pub fn owner_id(&self) -> u32 {
        self.owner
    }

    #[inline]
    pub fn buffering_count(&self) -> u32 {
        self.buffering_count
    }

    pub fn descriptor_set_count(&self) -> usize {
        self.sets.len()
    }

    pub fn is_valid(&self, handle: RenderHandle) -> bool {
        handle.kind() == RenderHandleType::DescriptorSet
            && handle.owner() == self.owner
            && self.sets.contains_key(key(handle))
    }

    pub fn descriptor_set_layout(&self, handle: RenderHandle) -> Option<&DescriptorSetLayout> {
        self.entry(handle).map(DescriptorSetEntry::layout)
    }

    /// 当前帧应当绑定的后端 descriptor set
    pub fn resolve(&self, handle: RenderHandle) -> Option<BackendDescriptorSetId> {
        match self.entry(handle)? {
            DescriptorSetEntry::Buffered(set) => set.copies.get(set.current).copied(),
            DescriptorSetEntry::OneFrame(set) => Some(set.set),
        }
    }

    /// 取出自上次调用以来（写入次数，被去重跳过的次数）
    pub fn take_update_stats(&mut self) -> (u32, u32) {
        let stats = (self.descriptor_set_updates, self.skipped_updates);
        self.descriptor_set_updates = 0;
        self.skipped_updates = 0;
        stats
    }

    fn entry(&self, handle: RenderHandle) -> Option<&DescriptorSetEntry> {
        if handle.kind() != RenderHandleType::DescriptorSet || handle.owner() != self.owner {
            return None;
        }
        self.sets.get(key(handle))
    }
}
// create
impl DescriptorSetManager {
    /// 按 `pipeline_layout` 中第 `set_index` 个 set 的布局分配 descriptor set
    ///
    /// 失败时记录日志并返回无效句柄。
    pub fn create_descriptor_set(&mut self, set_index: u32, pipeline_layout: &PipelineLayout) -> RenderHandle {
        self.try_create_descriptor_set(set_index, pipeline_layout).unwrap_or_else(|err| {
            log::error!("failed to create descriptor set {set_index}: {err}");
            RenderHandle::INVALID
        })
    }

    pub fn try_create_descriptor_set(
        &mut self,
        set_index: u32,
        pipeline_layout: &PipelineLayout,
    ) -> Result<RenderHandle, DescriptorError> {
        let layout = pipeline_layout
            .descriptor_set_layout(set_index)
            .ok_or(DescriptorError::BindingNotFound { binding: set_index })?
            .clone();
        let mut required = DescriptorCounts::default();
        required.add_set_layout(&layout);

        let bc = self.buffering_count;
        let reserved = self
            .reserved
            .as_mut()
            .filter(|r| r.can_allocate(&required, bc))
            .ok_or(DescriptorError::PoolExhausted { set_index })?;

        let mut copies = Vec::with_capacity(bc as usize);
        for _ in 0..bc {
            match self.backend.allocate_descriptor_set(reserved.pool, &layout) {
                Ok(set) => copies.push(set),
                Err(err) => {
                    log::error!("backend rejected descriptor set allocation: {err}");
                    return Err(DescriptorError::PoolExhausted { set_index });
                }
            }
        }
        reserved.used.merge(&required);
        reserved.used_sets += bc;

        let k = self.sets.insert(DescriptorSetEntry::Buffered(BufferedDescriptorSet {
            layout,
            copies,
            current: 0,
            last_writes: None,
            written_frame: 0,
        }));
        Ok(RenderHandle::new(RenderHandleType::DescriptorSet, self.owner, k.data()))
    }

    /// 只在当前帧有效的 descriptor set，从 `reserve_one_frame` 的预算中分配
    pub fn create_one_frame_descriptor_set(&mut self, set_index: u32, pipeline_layout: &PipelineLayout) -> RenderHandle {
        self.try_create_one_frame_descriptor_set(set_index, pipeline_layout).unwrap_or_else(|err| {
            log::error!("failed to create one frame descriptor set {set_index}: {err}");
            RenderHandle::INVALID
        })
    }

    pub fn try_create_one_frame_descriptor_set(
        &mut self,
        set_index: u32,
        pipeline_layout: &PipelineLayout,
    ) -> Result<RenderHandle, DescriptorError> {
        let layout = pipeline_layout
            .descriptor_set_layout(set_index)
            .ok_or(DescriptorError::BindingNotFound { binding: set_index })?
            .clone();
        let mut required = DescriptorCounts::default();
        required.add_set_layout(&layout);

        if self.one_frame_pools.is_empty() {
            return Err(DescriptorError::PoolExhausted { set_index });
        }
        let ring_index = (self.frame_id % self.one_frame_pools.len() as u64) as usize;
        let pool = &mut self.one_frame_pools[ring_index];
        if !pool.can_allocate(&required, 1) {
            return Err(DescriptorError::PoolExhausted { set_index });
        }
        let set = self
            .backend
            .allocate_descriptor_set(pool.pool, &layout)
            .map_err(|_| DescriptorError::PoolExhausted { set_index })?;
        pool.used.merge(&required);
        pool.used_sets += 1;

        let k = self.sets.insert(DescriptorSetEntry::OneFrame(OneFrameDescriptorSet {
            layout,
            set,
            frame_id: self.frame_id,
        }));
        Ok(RenderHandle::new(RenderHandleType::DescriptorSet, self.owner, k.data()))
    }

    /// binder 的 binding 列表来自调用方（通常就是该 set 的 layout）
    pub fn create_descriptor_set_binder(
        &self,
        handle: RenderHandle,
        bindings: &[DescriptorSetLayoutBinding],
    ) -> DescriptorSetBinder {
        DescriptorSetBinder::new(handle, bindings)
    }

    /// 使用创建 set 时的 layout 创建 binder
    pub fn create_binder(&self, handle: RenderHandle) -> Option<DescriptorSetBinder> {
        let layout = self.descriptor_set_layout(handle)?;
        Some(DescriptorSetBinder::new(handle, &layout.bindings))
    }
}
// update
impl DescriptorSetManager {
    /// 将 binder 快照写入后端
    ///
    /// 与上一次写入完全相同的更新会被跳过并返回 `Ok(false)`。
    /// 内容变化时每帧最多轮转一次到下一份拷贝，同一帧内的多次更新写入同一份拷贝。
    pub fn apply_update(
        &mut self,
        resources: &DescriptorSetLayoutBindingResources,
        gpu: &GpuResourceManager,
    ) -> Result<bool, DescriptorError> {
        let handle = resources.set;
        if let Some(binding) = resources.first_unbound() {
            return Err(DescriptorError::IncompleteBindings { set: handle, binding });
        }
        let writes = self.resolve_writes(resources, gpu)?;

        let frame_id = self.frame_id;
        let bc = self.buffering_count as usize;
        if handle.kind() != RenderHandleType::DescriptorSet || handle.owner() != self.owner {
            return Err(DescriptorError::InvalidHandle(handle));
        }
        let entry = self.sets.get_mut(key(handle)).ok_or(DescriptorError::InvalidHandle(handle))?;

        let target = match entry {
            DescriptorSetEntry::OneFrame(set) => set.set,
            DescriptorSetEntry::Buffered(set) => {
                if set.last_writes.as_ref() == Some(&writes) {
                    self.skipped_updates += 1;
                    return Ok(false);
                }
                if set.written_frame != frame_id {
                    set.current = (set.current + 1) % bc;
                    set.written_frame = frame_id;
                }
                let target = set.copies[set.current % set.copies.len()];
                set.last_writes = Some(writes.clone());
                target
            }
        };

        self.backend.write_descriptor_set(target, &writes);
        self.descriptor_set_updates += 1;
        Ok(true)
    }

    fn resolve_writes(
        &self,
        resources: &DescriptorSetLayoutBindingResources,
        gpu: &GpuResourceManager,
    ) -> Result<Vec<DescriptorWrite>, DescriptorError> {
        let mut writes = Vec::with_capacity(resources.bindings.len());
        for binding in &resources.bindings {
            let binding_index = binding.binding.binding;
            let descriptor_type = binding.binding.descriptor_type;
            let bound = binding.resources.iter().flatten();

            let write = match DescriptorCategory::of(descriptor_type) {
                DescriptorCategory::Buffer => {
                    let alignment = self.offset_alignment(descriptor_type);
                    let mut infos = Vec::with_capacity(binding.resources.len());
                    for resource in bound {
                        let BoundResource::Buffer { handle, byte_offset } = *resource else {
                            return Err(DescriptorError::TypeMismatch {
                                binding: binding_index,
                                expected: descriptor_type,
                            });
                        };
                        let resolved = gpu.resolve_buffer(handle).ok_or(DescriptorError::InvalidHandle(handle))?;
                        let offset = resolved.offset + byte_offset;
                        if self.validation && alignment > 1 && offset % alignment != 0 {
                            log::error!("binding {binding_index}: offset {offset} not aligned to {alignment}");
                            return Err(DescriptorError::MisalignedDynamicOffset {
                                binding: binding_index,
                                offset,
                                alignment,
                            });
                        }
                        infos.push(DescriptorBufferInfo {
                            buffer: resolved.id,
                            offset,
                            range: resolved.size.saturating_sub(byte_offset),
                        });
                    }
                    DescriptorWrite::buffers(binding_index, descriptor_type, infos)
                }
                DescriptorCategory::Image => {
                    let mut infos = Vec::with_capacity(binding.resources.len());
                    for resource in bound {
                        let BoundResource::Image { handle, sampler } = *resource else {
                            return Err(DescriptorError::TypeMismatch {
                                binding: binding_index,
                                expected: descriptor_type,
                            });
                        };
                        let image = gpu.resolve_image(handle).ok_or(DescriptorError::InvalidHandle(handle))?;
                        let sampler = match sampler {
                            Some(sampler) => {
                                Some(gpu.resolve_sampler(sampler).ok_or(DescriptorError::InvalidHandle(sampler))?)
                            }
                            None => None,
                        };
                        let image_layout = if descriptor_type == vk::DescriptorType::STORAGE_IMAGE {
                            vk::ImageLayout::GENERAL
                        } else if is_depth_format(image.desc.format) {
                            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
                        } else {
                            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                        };
                        infos.push(DescriptorImageInfo {
                            image: Some(image.id),
                            sampler,
                            image_layout,
                        });
                    }
                    DescriptorWrite::images(binding_index, descriptor_type, infos)
                }
                DescriptorCategory::Sampler => {
                    let mut infos = Vec::with_capacity(binding.resources.len());
                    for resource in bound {
                        let BoundResource::Sampler { handle } = *resource else {
                            return Err(DescriptorError::TypeMismatch {
                                binding: binding_index,
                                expected: descriptor_type,
                            });
                        };
                        let sampler = gpu.resolve_sampler(handle).ok_or(DescriptorError::InvalidHandle(handle))?;
                        infos.push(DescriptorImageInfo {
                            image: None,
                            sampler: Some(sampler),
                            image_layout: vk::ImageLayout::UNDEFINED,
                        });
                    }
                    DescriptorWrite::images(binding_index, descriptor_type, infos)
                }
                DescriptorCategory::AccelerationStructure => {
                    let mut acceleration_structures = Vec::with_capacity(binding.resources.len());
                    for resource in bound {
                        let BoundResource::AccelerationStructure { handle } = *resource else {
                            return Err(DescriptorError::TypeMismatch {
                                binding: binding_index,
                                expected: descriptor_type,
                            });
                        };
                        acceleration_structures.push(
                            gpu.resolve_acceleration_structure(handle).ok_or(DescriptorError::InvalidHandle(handle))?,
                        );
                    }
                    DescriptorWrite::acceleration_structures(binding_index, acceleration_structures)
                }
            };
            writes.push(write);
        }
        Ok(writes)
    }

    fn offset_alignment(&self, descriptor_type: vk::DescriptorType) -> u64 {
        match descriptor_type {
            vk::DescriptorType::UNIFORM_BUFFER | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC => {
                self.min_uniform_buffer_offset_alignment
            }
            vk::DescriptorType::STORAGE_BUFFER | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC => {
                self.min_storage_buffer_offset_alignment
            }
            _ => 1,
        }
    }
}
impl Drop for DescriptorSetManager {
    fn drop(&mut self) {
        // 调用方负责在销毁前等待 GPU 空闲
        self.sets.clear();
        if let Some(reserved) = self.reserved.take() {
            self.backend.destroy_descriptor_pool(reserved.pool);
        }
        for pool in self.one_frame_pools.drain(..) {
            self.backend.destroy_descriptor_pool(pool.pool);
        }
        for (pool, _) in self.retired_pools.drain(..) {
            self.backend.destroy_descriptor_pool(pool);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_gfx::HeadlessBackend;
    use vela_gfx::resource_desc::{GpuBufferDesc, GpuImageDesc, GpuSamplerDesc};

    fn ubo_image_layout() -> PipelineLayout {
        let mut layout = PipelineLayout {
            descriptor_set_count: 1,
            ..Default::default()
        };
        layout.descriptor_set_layouts[0].bindings = vec![
            DescriptorSetLayoutBinding::new(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX),
            DescriptorSetLayoutBinding::new(
                1,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
            ),
        ];
        layout
    }

    struct Fixture {
        backend: Arc<HeadlessBackend>,
        gpu: GpuResourceManager,
        manager: DescriptorSetManager,
    }

    fn fixture(buffering_count: u32) -> Fixture {
        let backend = Arc::new(HeadlessBackend::new());
        let gpu = GpuResourceManager::new(backend.clone(), buffering_count, true);
        let manager = DescriptorSetManager::new(backend.clone(), buffering_count, true, 0);
        Fixture { backend, gpu, manager }
    }

    #[test]
    fn test_reservation_limits_allocation() {
        let mut f = fixture(2);
        let layout = ubo_image_layout();
        let counts = DescriptorCounts::from_pipeline_layout(&layout);
        f.manager.reset_and_reserve(&counts);

        let first = f.manager.create_descriptor_set(0, &layout);
        assert!(f.manager.is_valid(first));
        // 只预留了一个 set 的量
        let second = f.manager.create_descriptor_set(0, &layout);
        assert!(!second.is_valid());
        assert!(matches!(
            f.manager.try_create_descriptor_set(0, &layout),
            Err(DescriptorError::PoolExhausted { set_index: 0 })
        ));
        assert!(!f.manager.create_descriptor_set(3, &layout).is_valid());
        assert_eq!(f.backend.stats().descriptor_sets_allocated, 2);
    }

    #[test]
    fn test_stable_bindings_are_written_once() {
        let mut f = fixture(3);
        let layout = ubo_image_layout();
        f.manager.reset_and_reserve(&DescriptorCounts::from_pipeline_layout(&layout));
        let set = f.manager.create_descriptor_set(0, &layout);

        let ubo = f.gpu.create_buffer(
            "ubo",
            &GpuBufferDesc {
                usage_flags: vk::BufferUsageFlags::UNIFORM_BUFFER,
                byte_size: 64,
                ..Default::default()
            },
        );
        let image = f.gpu.create_image(
            "albedo",
            &GpuImageDesc::new_2d(4, 4, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::SAMPLED),
        );
        let sampler = f.gpu.create_sampler("linear", &GpuSamplerDesc::default());

        let mut binder = f.manager.create_binder(set).unwrap();
        binder.bind_buffer(0, ubo.handle(), 0).unwrap();
        binder.bind_image(1, image.handle(), Some(sampler.handle())).unwrap();

        let mut written = 0;
        for frame in 1..=5 {
            f.manager.begin_frame(frame);
            let snapshot = binder.get_descriptor_set_layout_binding_resources();
            if f.manager.apply_update(&snapshot, &f.gpu).unwrap() {
                written += 1;
            }
        }
        assert_eq!(written, 1);
        assert_eq!(f.backend.stats().descriptor_set_updates, 1);
        assert_eq!(f.manager.take_update_stats(), (1, 4));
    }

    #[test]
    fn test_changed_bindings_rotate_copies() {
        let mut f = fixture(2);
        let mut layout = PipelineLayout::default();
        layout.descriptor_set_count = 1;
        layout.descriptor_set_layouts[0].bindings =
            vec![DescriptorSetLayoutBinding::new(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX)];
        f.manager.reset_and_reserve(&DescriptorCounts::from_pipeline_layout(&layout));
        let set = f.manager.create_descriptor_set(0, &layout);

        // ring buffer 每帧解析到不同的 slot，descriptor 每帧都会变化
        let ubo = f.gpu.create_buffer("per_frame", &GpuBufferDesc::dynamic_uniform(64));
        let mut binder = f.manager.create_binder(set).unwrap();
        binder.bind_buffer(0, ubo.handle(), 0).unwrap();
        f.gpu.set_render_window(true);

        let mut resolved = Vec::new();
        for frame in 1..=3 {
            f.gpu.begin_frame(frame);
            f.manager.begin_frame(frame);
            drop(f.gpu.map_buffer(ubo.handle()).unwrap());
            let snapshot = binder.get_descriptor_set_layout_binding_resources();
            assert!(f.manager.apply_update(&snapshot, &f.gpu).unwrap());
            // 同一帧内重复更新不会再写
            assert!(!f.manager.apply_update(&snapshot, &f.gpu).unwrap());
            resolved.push(f.manager.resolve(set));
        }
        assert_ne!(resolved[0], resolved[1]);
        assert_eq!(resolved[0], resolved[2]);
    }

    #[test]
    fn test_incomplete_and_misaligned_updates() {
        let mut f = fixture(2);
        let layout = ubo_image_layout();
        f.manager.reset_and_reserve(&DescriptorCounts::from_pipeline_layout(&layout));
        let set = f.manager.create_descriptor_set(0, &layout);
        let ubo = f.gpu.create_buffer(
            "ubo",
            &GpuBufferDesc {
                usage_flags: vk::BufferUsageFlags::UNIFORM_BUFFER,
                byte_size: 1024,
                ..Default::default()
            },
        );

        let mut binder = f.manager.create_binder(set).unwrap();
        binder.bind_buffer(0, ubo.handle(), 16).unwrap();
        let snapshot = binder.get_descriptor_set_layout_binding_resources();
        assert_eq!(
            f.manager.apply_update(&snapshot, &f.gpu),
            Err(DescriptorError::IncompleteBindings { set, binding: 1 })
        );

        let image = f.gpu.create_image(
            "albedo",
            &GpuImageDesc::new_2d(4, 4, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::SAMPLED),
        );
        let sampler = f.gpu.create_sampler("linear", &GpuSamplerDesc::default());
        binder.bind_image(1, image.handle(), Some(sampler.handle())).unwrap();
        let snapshot = binder.get_descriptor_set_layout_binding_resources();
        assert!(matches!(
            f.manager.apply_update(&snapshot, &f.gpu),
            Err(DescriptorError::MisalignedDynamicOffset { offset: 16, .. })
        ));
        assert_eq!(f.backend.stats().descriptor_set_updates, 0);
    }

    #[test]
    fn test_one_frame_sets_expire() {
        let mut f = fixture(2);
        let layout = ubo_image_layout();
        f.manager.reserve_one_frame(&DescriptorCounts::from_pipeline_layout(&layout));

        f.manager.begin_frame(1);
        let set = f.manager.create_one_frame_descriptor_set(0, &layout);
        assert!(f.manager.is_valid(set));
        assert!(!f.manager.create_one_frame_descriptor_set(0, &layout).is_valid());

        f.manager.begin_frame(2);
        assert!(!f.manager.is_valid(set));
        assert!(f.manager.create_one_frame_descriptor_set(0, &layout).is_valid());
    }
}
