//! 纯 CPU 的后端
//!
//! buffer 和 image 使用真实的字节存储，拷贝和缩放命令在 CPU 上执行，
//! 其余命令只做统计。可以配置 GPU 延迟（帧数），用来观察 ring buffer 轮转、
//! 延迟销毁以及 descriptor 更新去重。

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard, PoisonError};

use ash::vk;
use slotmap::{DefaultKey, Key, KeyData, SlotMap};

use crate::backend::{
    BackendAccelerationStructureId, BackendBufferId, BackendDescriptorPoolId, BackendDescriptorSetId,
    BackendImageId, BackendPipelineId, BackendResolver, BackendSamplerId, DeviceLimits, GfxBackend, PipelineDesc,
};
use crate::command::RenderCommand;
use crate::descriptor::{DescriptorCounts, DescriptorWrite};
use crate::error::ResourceError;
use crate::pipeline_layout::DescriptorSetLayout;
use crate::resource_desc::{
    GpuAccelerationStructureDesc, GpuBufferDesc, GpuImageDesc, GpuSamplerDesc, format_byte_size,
};

/// 累计统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub buffers_created: u32,
    pub buffers_destroyed: u32,
    pub images_created: u32,
    pub images_destroyed: u32,
    pub samplers_created: u32,
    pub samplers_destroyed: u32,
    pub acceleration_structures_created: u32,
    pub acceleration_structures_destroyed: u32,
    pub pipelines_created: u32,
    pub descriptor_pools_created: u32,
    pub descriptor_sets_allocated: u32,
    /// `write_descriptor_set` 的调用次数
    pub descriptor_set_updates: u32,
    /// 单个 binding 的写入次数
    pub descriptor_writes: u32,
    pub buffer_maps: u32,
    pub submissions: u32,
    pub draws: u32,
    pub dispatches: u32,
    pub barriers: u32,
    pub copies: u32,
    /// `wait_for_frame` 真正发生等待的次数
    pub frame_waits: u32,
    /// 提交时无法解析的句柄
    pub unresolved_handles: u32,
}

struct HeadlessBuffer {
    desc: GpuBufferDesc,
    data: Vec<u8>,
}

struct HeadlessImage {
    desc: GpuImageDesc,
    data: Vec<u8>,
}

struct HeadlessDescriptorPool {
    capacity: DescriptorCounts,
    used: DescriptorCounts,
    max_sets: u32,
    sets: Vec<DefaultKey>,
}

struct HeadlessDescriptorSet {
    writes: HashMap<u32, DescriptorWrite>,
}

#[derive(Default)]
struct HeadlessState {
    buffers: SlotMap<DefaultKey, HeadlessBuffer>,
    images: SlotMap<DefaultKey, HeadlessImage>,
    samplers: SlotMap<DefaultKey, GpuSamplerDesc>,
    acceleration_structures: SlotMap<DefaultKey, GpuAccelerationStructureDesc>,
    descriptor_pools: SlotMap<DefaultKey, HeadlessDescriptorPool>,
    descriptor_sets: SlotMap<DefaultKey, HeadlessDescriptorSet>,
    pipelines: SlotMap<DefaultKey, PipelineDesc>,

    submitted_frame: u64,
    completed_frame: u64,
    stats: HeadlessStats,
}

#[inline]
fn key(id: u64) -> DefaultKey {
    KeyData::from_ffi(id).into()
}

#[inline]
fn id(key: DefaultKey) -> u64 {
    key.data().as_ffi()
}

pub struct HeadlessBackend {
    limits: DeviceLimits,
    /// 帧结束后还需要经过多少帧 GPU 才完成
    latency: u64,
    state: Mutex<HeadlessState>,
}
impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}
// new & init
impl HeadlessBackend {
    pub fn new() -> Self {
        Self::with_limits(DeviceLimits::default())
    }

    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self {
            limits,
            latency: 0,
            state: Mutex::new(HeadlessState::default()),
        }
    }

    /// 帧 F 在 `end_frame(F + latency)` 时才被视为完成
    pub fn with_latency(mut self, latency: u64) -> Self {
        self.latency = latency;
        self
    }

    fn state(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
// getters
impl HeadlessBackend {
    pub fn stats(&self) -> HeadlessStats {
        self.state().stats
    }

    pub fn live_buffer_count(&self) -> usize {
        self.state().buffers.len()
    }

    pub fn live_image_count(&self) -> usize {
        self.state().images.len()
    }

    pub fn read_buffer(&self, buffer: BackendBufferId) -> Option<Vec<u8>> {
        self.state().buffers.get(key(buffer.0)).map(|b| b.data.clone())
    }

    pub fn read_image(&self, image: BackendImageId) -> Option<Vec<u8>> {
        self.state().images.get(key(image.0)).map(|i| i.data.clone())
    }

    /// descriptor set 每个 binding 最后一次写入的内容，按 binding 排序
    pub fn descriptor_set_writes(&self, set: BackendDescriptorSetId) -> Option<Vec<DescriptorWrite>> {
        let state = self.state();
        let set = state.descriptor_sets.get(key(set.0))?;
        let mut writes: Vec<_> = set.writes.values().cloned().collect();
        writes.sort_by_key(|w| w.dst_binding);
        Some(writes)
    }
}

impl GfxBackend for HeadlessBackend {
    fn name(&self) -> &str {
        "headless"
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&self, desc: &GpuBufferDesc, byte_size: u64) -> Result<BackendBufferId, ResourceError> {
        if byte_size == 0 {
            return Err(ResourceError::Backend("zero sized buffer allocation".to_string()));
        }
        let mut state = self.state();
        state.stats.buffers_created += 1;
        let key = state.buffers.insert(HeadlessBuffer {
            desc: *desc,
            data: vec![0; byte_size as usize],
        });
        Ok(BackendBufferId(id(key)))
    }

    fn destroy_buffer(&self, buffer: BackendBufferId) {
        let mut state = self.state();
        if state.buffers.remove(key(buffer.0)).is_some() {
            state.stats.buffers_destroyed += 1;
        }
    }

    fn map_buffer(&self, buffer: BackendBufferId) -> Result<NonNull<u8>, ResourceError> {
        let mut state = self.state();
        state.stats.buffer_maps += 1;
        let buffer = state
            .buffers
            .get_mut(key(buffer.0))
            .ok_or_else(|| ResourceError::Backend(format!("unknown buffer {buffer:?}")))?;
        if !buffer.desc.is_host_visible() {
            return Err(ResourceError::Backend("buffer memory is not host visible".to_string()));
        }
        NonNull::new(buffer.data.as_mut_ptr()).ok_or_else(|| ResourceError::Backend("null mapping".to_string()))
    }

    fn unmap_buffer(&self, _buffer: BackendBufferId) {
        // 持久映射
    }

    fn create_image(&self, desc: &GpuImageDesc) -> Result<BackendImageId, ResourceError> {
        let byte_size = desc.base_level_byte_size().ok_or(ResourceError::UnsupportedFormat {
            name: String::new(),
            format: desc.format,
        })?;
        let mut state = self.state();
        state.stats.images_created += 1;
        let key = state.images.insert(HeadlessImage {
            desc: *desc,
            data: vec![0; byte_size as usize],
        });
        Ok(BackendImageId(id(key)))
    }

    fn destroy_image(&self, image: BackendImageId) {
        let mut state = self.state();
        if state.images.remove(key(image.0)).is_some() {
            state.stats.images_destroyed += 1;
        }
    }

    fn create_sampler(&self, desc: &GpuSamplerDesc) -> Result<BackendSamplerId, ResourceError> {
        let mut state = self.state();
        state.stats.samplers_created += 1;
        Ok(BackendSamplerId(id(state.samplers.insert(*desc))))
    }

    fn destroy_sampler(&self, sampler: BackendSamplerId) {
        let mut state = self.state();
        if state.samplers.remove(key(sampler.0)).is_some() {
            state.stats.samplers_destroyed += 1;
        }
    }

    fn create_acceleration_structure(
        &self,
        desc: &GpuAccelerationStructureDesc,
    ) -> Result<BackendAccelerationStructureId, ResourceError> {
        let mut state = self.state();
        state.stats.acceleration_structures_created += 1;
        Ok(BackendAccelerationStructureId(id(state.acceleration_structures.insert(*desc))))
    }

    fn destroy_acceleration_structure(&self, acceleration_structure: BackendAccelerationStructureId) {
        let mut state = self.state();
        if state.acceleration_structures.remove(key(acceleration_structure.0)).is_some() {
            state.stats.acceleration_structures_destroyed += 1;
        }
    }

    fn create_descriptor_pool(
        &self,
        counts: &DescriptorCounts,
        max_sets: u32,
    ) -> Result<BackendDescriptorPoolId, ResourceError> {
        let mut state = self.state();
        state.stats.descriptor_pools_created += 1;
        let key = state.descriptor_pools.insert(HeadlessDescriptorPool {
            capacity: counts.clone(),
            used: DescriptorCounts::default(),
            max_sets,
            sets: Vec::new(),
        });
        Ok(BackendDescriptorPoolId(id(key)))
    }

    fn destroy_descriptor_pool(&self, pool: BackendDescriptorPoolId) {
        let mut state = self.state();
        if let Some(pool) = state.descriptor_pools.remove(key(pool.0)) {
            for set in pool.sets {
                state.descriptor_sets.remove(set);
            }
        }
    }

    fn reset_descriptor_pool(&self, pool: BackendDescriptorPoolId) {
        let mut state = self.state();
        let HeadlessState {
            descriptor_pools,
            descriptor_sets,
            ..
        } = &mut *state;
        if let Some(pool) = descriptor_pools.get_mut(key(pool.0)) {
            for set in pool.sets.drain(..) {
                descriptor_sets.remove(set);
            }
            pool.used = DescriptorCounts::default();
        }
    }

    fn allocate_descriptor_set(
        &self,
        pool: BackendDescriptorPoolId,
        layout: &DescriptorSetLayout,
    ) -> Result<BackendDescriptorSetId, ResourceError> {
        let mut state = self.state();
        let pool_key = key(pool.0);
        let pool = state
            .descriptor_pools
            .get_mut(pool_key)
            .ok_or_else(|| ResourceError::Backend(format!("unknown descriptor pool {pool:?}")))?;

        let mut used = pool.used.clone();
        used.add_set_layout(layout);
        if pool.sets.len() as u32 >= pool.max_sets || !pool.capacity.covers(&used) {
            return Err(ResourceError::Backend("descriptor pool exhausted".to_string()));
        }
        pool.used = used;

        let set_key = state.descriptor_sets.insert(HeadlessDescriptorSet {
            writes: HashMap::new(),
        });
        if let Some(pool) = state.descriptor_pools.get_mut(pool_key) {
            pool.sets.push(set_key);
        }
        state.stats.descriptor_sets_allocated += 1;
        Ok(BackendDescriptorSetId(id(set_key)))
    }

    fn write_descriptor_set(&self, set: BackendDescriptorSetId, writes: &[DescriptorWrite]) {
        let mut state = self.state();
        let Some(set) = state.descriptor_sets.get_mut(key(set.0)) else {
            log::warn!("write to unknown descriptor set {set:?}");
            return;
        };
        for write in writes {
            set.writes.insert(write.dst_binding, write.clone());
        }
        state.stats.descriptor_set_updates += 1;
        state.stats.descriptor_writes += writes.len() as u32;
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> Result<BackendPipelineId, ResourceError> {
        let mut state = self.state();
        state.stats.pipelines_created += 1;
        Ok(BackendPipelineId(id(state.pipelines.insert(desc.clone()))))
    }

    fn destroy_pipeline(&self, pipeline: BackendPipelineId) {
        self.state().pipelines.remove(key(pipeline.0));
    }

    fn submit(
        &self,
        frame_id: u64,
        commands: &[RenderCommand],
        resolver: &dyn BackendResolver,
    ) -> Result<(), ResourceError> {
        let _span = tracy_client::span!("HeadlessBackend::submit");
        let mut state = self.state();
        state.stats.submissions += 1;
        state.submitted_frame = state.submitted_frame.max(frame_id);

        for command in commands {
            match command {
                RenderCommand::BindPipeline { pipeline } => {
                    if resolver.pipeline(*pipeline).is_none() {
                        state.stats.unresolved_handles += 1;
                    }
                }
                RenderCommand::BindDescriptorSets { sets, .. } => {
                    let unresolved = sets.iter().filter(|s| resolver.descriptor_set(**s).is_none()).count();
                    state.stats.unresolved_handles += unresolved as u32;
                }
                RenderCommand::Draw { .. } | RenderCommand::DrawIndexed { .. } => state.stats.draws += 1,
                RenderCommand::Dispatch { .. } => state.stats.dispatches += 1,
                RenderCommand::Barriers(batch) => state.stats.barriers += batch.len() as u32,
                RenderCommand::CopyBuffer { src, dst, regions } => {
                    let (Some(src), Some(dst)) = (resolver.buffer(*src), resolver.buffer(*dst)) else {
                        state.stats.unresolved_handles += 1;
                        continue;
                    };
                    for region in regions {
                        let bytes = read_bytes(&state, src.id, src.offset + region.src_offset, region.size)?;
                        write_bytes(&mut state, dst.id, dst.offset + region.dst_offset, &bytes)?;
                    }
                    state.stats.copies += 1;
                }
                RenderCommand::CopyBufferToImage { src, dst, regions } => {
                    let (Some(src), Some(dst)) = (resolver.buffer(*src), resolver.image(*dst)) else {
                        state.stats.unresolved_handles += 1;
                        continue;
                    };
                    for region in regions {
                        copy_buffer_to_image(&mut state, src.id, src.offset, dst.id, region)?;
                    }
                    state.stats.copies += 1;
                }
                RenderCommand::BlitBufferToImage {
                    src,
                    src_extent,
                    dst,
                    filter: _,
                } => {
                    let (Some(src), Some(dst)) = (resolver.buffer(*src), resolver.image(*dst)) else {
                        state.stats.unresolved_handles += 1;
                        continue;
                    };
                    blit_buffer_to_image(&mut state, src.id, src.offset, *src_extent, dst.id)?;
                    state.stats.copies += 1;
                }
                RenderCommand::BindVertexBuffers { buffers, .. } => {
                    let unresolved = buffers.iter().filter(|(b, _)| resolver.buffer(*b).is_none()).count();
                    state.stats.unresolved_handles += unresolved as u32;
                }
                RenderCommand::BindIndexBuffer { buffer, .. } => {
                    if resolver.buffer(*buffer).is_none() {
                        state.stats.unresolved_handles += 1;
                    }
                }
                RenderCommand::BeginDebugLabel { .. }
                | RenderCommand::EndDebugLabel
                | RenderCommand::PushConstants { .. }
                | RenderCommand::BeginRenderPass { .. }
                | RenderCommand::EndRenderPass => {}
            }
        }
        Ok(())
    }

    fn end_frame(&self, frame_id: u64) {
        let mut state = self.state();
        state.submitted_frame = state.submitted_frame.max(frame_id);
        let completed = frame_id.saturating_sub(self.latency);
        state.completed_frame = state.completed_frame.max(completed);
    }

    fn completed_frame(&self) -> u64 {
        self.state().completed_frame
    }

    fn wait_for_frame(&self, frame_id: u64) {
        let mut state = self.state();
        if state.completed_frame >= frame_id {
            return;
        }
        // 不能等待一个还没有提交的帧
        let target = frame_id.min(state.submitted_frame);
        if target > state.completed_frame {
            state.completed_frame = target;
            state.stats.frame_waits += 1;
        }
    }

    fn wait_idle(&self) {
        let mut state = self.state();
        state.completed_frame = state.submitted_frame;
    }
}

fn out_of_bounds(offset: u64, size: u64, capacity: usize) -> ResourceError {
    ResourceError::OutOfBounds {
        offset,
        size,
        capacity: capacity as u64,
    }
}

fn read_bytes(
    state: &HeadlessState,
    buffer: BackendBufferId,
    offset: u64,
    size: u64,
) -> Result<Vec<u8>, ResourceError> {
    let buffer = state
        .buffers
        .get(key(buffer.0))
        .ok_or_else(|| ResourceError::Backend(format!("unknown buffer {buffer:?}")))?;
    let range = offset as usize..(offset + size) as usize;
    buffer
        .data
        .get(range)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| out_of_bounds(offset, size, buffer.data.len()))
}

fn write_bytes(
    state: &mut HeadlessState,
    buffer: BackendBufferId,
    offset: u64,
    bytes: &[u8],
) -> Result<(), ResourceError> {
    let buffer = state
        .buffers
        .get_mut(key(buffer.0))
        .ok_or_else(|| ResourceError::Backend(format!("unknown buffer {buffer:?}")))?;
    let capacity = buffer.data.len();
    let dst = buffer
        .data
        .get_mut(offset as usize..offset as usize + bytes.len())
        .ok_or_else(|| out_of_bounds(offset, bytes.len() as u64, capacity))?;
    dst.copy_from_slice(bytes);
    Ok(())
}

/// 只支持 mip 0
fn copy_buffer_to_image(
    state: &mut HeadlessState,
    src: BackendBufferId,
    src_offset: u64,
    dst: BackendImageId,
    region: &vk::BufferImageCopy,
) -> Result<(), ResourceError> {
    if region.image_subresource.mip_level != 0 {
        log::debug!("headless backend skips copies into mip {}", region.image_subresource.mip_level);
        return Ok(());
    }
    let HeadlessState { buffers, images, .. } = state;
    let buffer = buffers
        .get(key(src.0))
        .ok_or_else(|| ResourceError::Backend(format!("unknown buffer {src:?}")))?;
    let image = images
        .get_mut(key(dst.0))
        .ok_or_else(|| ResourceError::Backend(format!("unknown image {dst:?}")))?;

    let texel = format_byte_size(image.desc.format).unwrap_or(0) as usize;
    let (width, height, depth) = (image.desc.width as usize, image.desc.height as usize, image.desc.depth as usize);
    let extent = region.image_extent;
    let offset = region.image_offset;
    let row_length = if region.buffer_row_length == 0 { extent.width } else { region.buffer_row_length } as usize;
    let image_height =
        if region.buffer_image_height == 0 { extent.height } else { region.buffer_image_height } as usize;
    let layer_size = width * height * depth * texel;
    let row_bytes = extent.width as usize * texel;

    for layer in 0..region.image_subresource.layer_count as usize {
        let dst_layer = region.image_subresource.base_array_layer as usize + layer;
        for z in 0..extent.depth as usize {
            for y in 0..extent.height as usize {
                let src_start = src_offset as usize
                    + region.buffer_offset as usize
                    + ((layer * extent.depth as usize + z) * image_height + y) * row_length * texel;
                let dst_start = dst_layer * layer_size
                    + (((z + offset.z as usize) * height + y + offset.y as usize) * width + offset.x as usize) * texel;

                let src_row = buffer
                    .data
                    .get(src_start..src_start + row_bytes)
                    .ok_or_else(|| out_of_bounds(src_start as u64, row_bytes as u64, buffer.data.len()))?;
                let capacity = image.data.len();
                let dst_row = image
                    .data
                    .get_mut(dst_start..dst_start + row_bytes)
                    .ok_or_else(|| out_of_bounds(dst_start as u64, row_bytes as u64, capacity))?;
                dst_row.copy_from_slice(src_row);
            }
        }
    }
    Ok(())
}

/// 最近邻缩放，写入 layer 0 的 mip 0
fn blit_buffer_to_image(
    state: &mut HeadlessState,
    src: BackendBufferId,
    src_offset: u64,
    src_extent: vk::Extent3D,
    dst: BackendImageId,
) -> Result<(), ResourceError> {
    let HeadlessState { buffers, images, .. } = state;
    let buffer = buffers
        .get(key(src.0))
        .ok_or_else(|| ResourceError::Backend(format!("unknown buffer {src:?}")))?;
    let image = images
        .get_mut(key(dst.0))
        .ok_or_else(|| ResourceError::Backend(format!("unknown image {dst:?}")))?;

    let texel = format_byte_size(image.desc.format).unwrap_or(0) as usize;
    let (dst_w, dst_h) = (image.desc.width as usize, image.desc.height as usize);
    let (src_w, src_h) = (src_extent.width.max(1) as usize, src_extent.height.max(1) as usize);

    for y in 0..dst_h {
        let sy = y * src_h / dst_h;
        for x in 0..dst_w {
            let sx = x * src_w / dst_w;
            let src_start = src_offset as usize + (sy * src_w + sx) * texel;
            let dst_start = (y * dst_w + x) * texel;
            let src_texel = buffer
                .data
                .get(src_start..src_start + texel)
                .ok_or_else(|| out_of_bounds(src_start as u64, texel as u64, buffer.data.len()))?;
            image.data[dst_start..dst_start + texel].copy_from_slice(src_texel);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::RenderHandle;
    use crate::pipeline_layout::DescriptorSetLayoutBinding;
    use crate::backend::{ResolvedBuffer, ResolvedImage};

    /// 测试用：所有句柄都解析到同一组对象
    struct FixedResolver {
        buffer: Option<ResolvedBuffer>,
        image: Option<ResolvedImage>,
    }
    impl BackendResolver for FixedResolver {
        fn buffer(&self, _: RenderHandle) -> Option<ResolvedBuffer> {
            self.buffer
        }
        fn image(&self, _: RenderHandle) -> Option<ResolvedImage> {
            self.image
        }
        fn sampler(&self, _: RenderHandle) -> Option<BackendSamplerId> {
            None
        }
        fn descriptor_set(&self, _: RenderHandle) -> Option<BackendDescriptorSetId> {
            None
        }
        fn pipeline(&self, _: RenderHandle) -> Option<BackendPipelineId> {
            None
        }
    }

    #[test]
    fn test_map_and_read_buffer() {
        let backend = HeadlessBackend::new();
        let desc = GpuBufferDesc::staging(8);
        let buffer = backend.create_buffer(&desc, 8).unwrap();
        let ptr = backend.map_buffer(buffer).unwrap();
        unsafe { std::ptr::copy_nonoverlapping([1u8, 2, 3, 4].as_ptr(), ptr.as_ptr().add(2), 4) };
        backend.unmap_buffer(buffer);
        assert_eq!(backend.read_buffer(buffer).unwrap(), vec![0, 0, 1, 2, 3, 4, 0, 0]);

        let device_local = GpuBufferDesc {
            usage_flags: vk::BufferUsageFlags::STORAGE_BUFFER,
            byte_size: 4,
            ..Default::default()
        };
        let buffer = backend.create_buffer(&device_local, 4).unwrap();
        assert!(backend.map_buffer(buffer).is_err());
    }

    #[test]
    fn test_frame_latency() {
        let backend = HeadlessBackend::new().with_latency(2);
        backend.end_frame(1);
        backend.end_frame(2);
        assert_eq!(backend.completed_frame(), 0);
        backend.end_frame(3);
        assert_eq!(backend.completed_frame(), 1);

        backend.wait_for_frame(3);
        assert_eq!(backend.completed_frame(), 3);
        assert_eq!(backend.stats().frame_waits, 1);

        // 已经完成的帧不需要等待
        backend.wait_for_frame(2);
        assert_eq!(backend.stats().frame_waits, 1);
    }

    #[test]
    fn test_descriptor_pool_budget() {
        let backend = HeadlessBackend::new();
        let mut counts = DescriptorCounts::default();
        counts.add(vk::DescriptorType::UNIFORM_BUFFER, 2);
        let pool = backend.create_descriptor_pool(&counts, 4).unwrap();

        let layout = DescriptorSetLayout {
            set: 0,
            bindings: vec![DescriptorSetLayoutBinding::new(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::VERTEX,
            )],
        };
        assert!(backend.allocate_descriptor_set(pool, &layout).is_ok());
        assert!(backend.allocate_descriptor_set(pool, &layout).is_ok());
        assert!(backend.allocate_descriptor_set(pool, &layout).is_err());

        backend.reset_descriptor_pool(pool);
        assert!(backend.allocate_descriptor_set(pool, &layout).is_ok());
        assert_eq!(backend.stats().descriptor_sets_allocated, 3);
    }

    #[test]
    fn test_copy_and_blit_into_image() {
        let backend = HeadlessBackend::new();
        let staging = backend.create_buffer(&GpuBufferDesc::staging(4), 4).unwrap();
        let ptr = backend.map_buffer(staging).unwrap();
        unsafe { std::ptr::copy_nonoverlapping([10u8, 20, 30, 40].as_ptr(), ptr.as_ptr(), 4) };

        let desc = GpuImageDesc::new_2d(
            4,
            2,
            vk::Format::R8_UNORM,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        );
        let image = backend.create_image(&desc).unwrap();
        let resolver = FixedResolver {
            buffer: Some(ResolvedBuffer {
                id: staging,
                offset: 0,
                size: 4,
            }),
            image: Some(ResolvedImage { id: image, desc }),
        };

        // 2x2 的数据缩放到 4x2
        let blit = RenderCommand::BlitBufferToImage {
            src: RenderHandle::INVALID,
            src_extent: vk::Extent3D {
                width: 2,
                height: 2,
                depth: 1,
            },
            dst: RenderHandle::INVALID,
            filter: vk::Filter::NEAREST,
        };
        backend.submit(1, &[blit], &resolver).unwrap();
        assert_eq!(backend.read_image(image).unwrap(), vec![10, 10, 20, 20, 30, 30, 40, 40]);

        // 把 4 个字节写入第二行
        let copy = RenderCommand::CopyBufferToImage {
            src: RenderHandle::INVALID,
            dst: RenderHandle::INVALID,
            regions: vec![vk::BufferImageCopy {
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D { x: 0, y: 1, z: 0 },
                image_extent: vk::Extent3D {
                    width: 4,
                    height: 1,
                    depth: 1,
                },
                ..Default::default()
            }],
        };
        backend.submit(2, &[copy], &resolver).unwrap();
        assert_eq!(backend.read_image(image).unwrap(), vec![10, 10, 20, 20, 10, 20, 30, 40]);
        assert_eq!(backend.stats().copies, 2);
    }
}
