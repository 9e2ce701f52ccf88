//! 后端边界
//!
//! 渲染图只通过 `GfxBackend` 访问具体图形 API。资源在后端中以 id 表示，
//! 渲染图内部使用 `RenderHandle`，提交命令时通过 `BackendResolver` 把句柄解析为 id。

use std::ptr::NonNull;

use ash::vk;

use crate::command::RenderCommand;
use crate::descriptor::{DescriptorCounts, DescriptorWrite};
use crate::error::ResourceError;
use crate::handle::RenderHandle;
use crate::pipeline_layout::{DescriptorSetLayout, PipelineLayout};
use crate::resource_desc::{GpuAccelerationStructureDesc, GpuBufferDesc, GpuImageDesc, GpuSamplerDesc};

macro_rules! backend_id {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u64);
        )*
    };
}

backend_id! {
    BackendBufferId;
    BackendImageId;
    BackendSamplerId;
    BackendAccelerationStructureId;
    BackendDescriptorPoolId;
    BackendDescriptorSetId;
    BackendPipelineId;
}

/// 设备限制
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceLimits {
    /// uniform buffer 绑定偏移的最小对齐
    pub min_uniform_buffer_offset_alignment: u64,
    pub min_storage_buffer_offset_alignment: u64,
    /// 单次绑定 uniform buffer 的最大字节数
    pub max_uniform_buffer_range: u64,
    pub max_image_dimension_2d: u32,
    pub max_bound_descriptor_sets: u32,
}
impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            min_uniform_buffer_offset_alignment: 256,
            min_storage_buffer_offset_alignment: 64,
            max_uniform_buffer_range: 65536,
            max_image_dimension_2d: 16384,
            max_bound_descriptor_sets: 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineDesc {
    pub name: String,
    pub bind_point: vk::PipelineBindPoint,
    pub layout: PipelineLayout,
    /// (constant id, value)
    pub specialization_data: Vec<(u32, u32)>,
}

/// 句柄解析结果：buffer id 以及当前帧可见的字节范围
///
/// ring buffer 会解析到当前帧的 slot。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedBuffer {
    pub id: BackendBufferId,
    pub offset: u64,
    pub size: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedImage {
    pub id: BackendImageId,
    pub desc: GpuImageDesc,
}

/// 提交时将 `RenderHandle` 解析为后端对象
pub trait BackendResolver {
    fn buffer(&self, handle: RenderHandle) -> Option<ResolvedBuffer>;
    fn image(&self, handle: RenderHandle) -> Option<ResolvedImage>;
    fn sampler(&self, handle: RenderHandle) -> Option<BackendSamplerId>;
    fn descriptor_set(&self, handle: RenderHandle) -> Option<BackendDescriptorSetId>;
    fn pipeline(&self, handle: RenderHandle) -> Option<BackendPipelineId>;
}

/// 具体图形 API（Vulkan / GLES / headless）需要实现的接口
///
/// 所有方法使用 `&self`，实现内部自行同步；
/// frame id 由渲染器分配，从 1 开始单调递增，0 表示“还没有任何帧”。
pub trait GfxBackend: Send + Sync {
    fn name(&self) -> &str;

    fn limits(&self) -> DeviceLimits;

    // buffer
    /// `byte_size` 为实际分配的大小（ring buffer 已经乘以 buffering count）
    fn create_buffer(&self, desc: &GpuBufferDesc, byte_size: u64) -> Result<BackendBufferId, ResourceError>;
    fn destroy_buffer(&self, buffer: BackendBufferId);
    /// 返回持久映射内存的起始地址，直到 `unmap_buffer` 或销毁前有效
    fn map_buffer(&self, buffer: BackendBufferId) -> Result<NonNull<u8>, ResourceError>;
    fn unmap_buffer(&self, buffer: BackendBufferId);

    // image / sampler / acceleration structure
    fn create_image(&self, desc: &GpuImageDesc) -> Result<BackendImageId, ResourceError>;
    fn destroy_image(&self, image: BackendImageId);
    fn create_sampler(&self, desc: &GpuSamplerDesc) -> Result<BackendSamplerId, ResourceError>;
    fn destroy_sampler(&self, sampler: BackendSamplerId);
    fn create_acceleration_structure(
        &self,
        desc: &GpuAccelerationStructureDesc,
    ) -> Result<BackendAccelerationStructureId, ResourceError>;
    fn destroy_acceleration_structure(&self, acceleration_structure: BackendAccelerationStructureId);

    // descriptor
    fn create_descriptor_pool(
        &self,
        counts: &DescriptorCounts,
        max_sets: u32,
    ) -> Result<BackendDescriptorPoolId, ResourceError>;
    fn destroy_descriptor_pool(&self, pool: BackendDescriptorPoolId);
    /// 释放 pool 中分配的所有 set
    fn reset_descriptor_pool(&self, pool: BackendDescriptorPoolId);
    fn allocate_descriptor_set(
        &self,
        pool: BackendDescriptorPoolId,
        layout: &DescriptorSetLayout,
    ) -> Result<BackendDescriptorSetId, ResourceError>;
    fn write_descriptor_set(&self, set: BackendDescriptorSetId, writes: &[DescriptorWrite]);

    // pipeline
    fn create_pipeline(&self, desc: &PipelineDesc) -> Result<BackendPipelineId, ResourceError>;
    fn destroy_pipeline(&self, pipeline: BackendPipelineId);

    // frame
    fn submit(
        &self,
        frame_id: u64,
        commands: &[RenderCommand],
        resolver: &dyn BackendResolver,
    ) -> Result<(), ResourceError>;
    /// 当前帧的所有提交已经完成
    fn end_frame(&self, frame_id: u64);
    /// GPU 已经完成的最大 frame id
    fn completed_frame(&self) -> u64;
    /// 阻塞直到 `frame_id` 的 GPU 工作完成
    fn wait_for_frame(&self, frame_id: u64);
    fn wait_idle(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = DeviceLimits::default();
        assert!(limits.min_uniform_buffer_offset_alignment.is_power_of_two());
        assert_eq!(limits.max_uniform_buffer_range, 65536);
    }
}
