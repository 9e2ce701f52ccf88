//! 提交命令时使用的句柄解析器

use std::collections::HashMap;

use vela_gfx::backend::{
    BackendDescriptorSetId, BackendPipelineId, BackendResolver, BackendSamplerId, ResolvedBuffer, ResolvedImage,
};
use vela_gfx::handle::RenderHandle;

use crate::descriptor_set_manager::DescriptorSetManager;
use crate::gpu_resource_manager::GpuResourceManager;
use crate::shader_manager::ShaderManager;

/// 一帧内所有管理器的只读视图
///
/// descriptor set 按句柄的 owner 找到所属节点的 `DescriptorSetManager`。
pub struct FrameResolver<'a> {
    gpu_resource_manager: &'a GpuResourceManager,
    shader_manager: &'a ShaderManager,
    descriptor_set_managers: HashMap<u32, &'a DescriptorSetManager>,
}
impl<'a> FrameResolver<'a> {
    pub fn new(gpu_resource_manager: &'a GpuResourceManager, shader_manager: &'a ShaderManager) -> Self {
        Self {
            gpu_resource_manager,
            shader_manager,
            descriptor_set_managers: HashMap::new(),
        }
    }

    pub fn add_descriptor_set_manager(&mut self, manager: &'a DescriptorSetManager) {
        self.descriptor_set_managers.insert(manager.owner_id(), manager);
    }

    pub fn with_descriptor_set_managers(mut self, managers: impl IntoIterator<Item = &'a DescriptorSetManager>) -> Self {
        for manager in managers {
            self.add_descriptor_set_manager(manager);
        }
        self
    }
}
impl BackendResolver for FrameResolver<'_> {
    fn buffer(&self, handle: RenderHandle) -> Option<ResolvedBuffer> {
        self.gpu_resource_manager.resolve_buffer(handle)
    }

    fn image(&self, handle: RenderHandle) -> Option<ResolvedImage> {
        self.gpu_resource_manager.resolve_image(handle)
    }

    fn sampler(&self, handle: RenderHandle) -> Option<BackendSamplerId> {
        self.gpu_resource_manager.resolve_sampler(handle)
    }

    fn descriptor_set(&self, handle: RenderHandle) -> Option<BackendDescriptorSetId> {
        self.descriptor_set_managers.get(&handle.owner())?.resolve(handle)
    }

    fn pipeline(&self, handle: RenderHandle) -> Option<BackendPipelineId> {
        self.shader_manager.resolve_pipeline(handle)
    }
}
