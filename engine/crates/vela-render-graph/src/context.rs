use vela_gfx::{RenderHandle, RenderHandleReference};
use vela_render_interface::{DescriptorSetManager, GpuResourceManager, RenderDataStoreManager, ShaderManager};

use crate::desc::{NodeResource, NodeResourceKind};

/// 一帧中所有渲染图共享的管理器
#[derive(Clone, Copy)]
pub struct RenderGraphShare<'a> {
    pub gpu_resource_manager: &'a GpuResourceManager,
    pub shader_manager: &'a ShaderManager,
    pub render_data_store_manager: &'a RenderDataStoreManager,
    pub frame_id: u64,
    pub validation: bool,
}

/// 节点在生命周期方法中可以访问的一切
///
/// descriptor set manager 属于节点自己，其他管理器在节点之间共享。
pub struct RenderNodeContext<'a> {
    share: RenderGraphShare<'a>,
    descriptor_set_manager: &'a mut DescriptorSetManager,
    graph_name: &'a str,
    node_name: &'a str,
    params: &'a serde_json::Value,
    inputs: &'a [NodeResource],
    outputs: &'a [NodeResource],
}
// new & init
impl<'a> RenderNodeContext<'a> {
    pub fn new(
        share: RenderGraphShare<'a>,
        descriptor_set_manager: &'a mut DescriptorSetManager,
        graph_name: &'a str,
        node_name: &'a str,
        params: &'a serde_json::Value,
        inputs: &'a [NodeResource],
        outputs: &'a [NodeResource],
    ) -> Self {
        Self {
            share,
            descriptor_set_manager,
            graph_name,
            node_name,
            params,
            inputs,
            outputs,
        }
    }
}
// getters
impl<'a> RenderNodeContext<'a> {
    #[inline]
    pub fn gpu_resource_manager(&self) -> &'a GpuResourceManager {
        self.share.gpu_resource_manager
    }

    #[inline]
    pub fn shader_manager(&self) -> &'a ShaderManager {
        self.share.shader_manager
    }

    #[inline]
    pub fn render_data_store_manager(&self) -> &'a RenderDataStoreManager {
        self.share.render_data_store_manager
    }

    #[inline]
    pub fn descriptor_set_manager(&mut self) -> &mut DescriptorSetManager {
        &mut *self.descriptor_set_manager
    }

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.share.frame_id
    }

    #[inline]
    pub fn buffering_count(&self) -> u32 {
        self.share.gpu_resource_manager.buffering_count()
    }

    #[inline]
    pub fn validation_enabled(&self) -> bool {
        self.share.validation
    }

    #[inline]
    pub fn graph_name(&self) -> &'a str {
        self.graph_name
    }

    #[inline]
    pub fn node_name(&self) -> &'a str {
        self.node_name
    }

    #[inline]
    pub fn params(&self) -> &'a serde_json::Value {
        self.params
    }

    pub fn param_str(&self, key: &str) -> Option<&'a str> {
        self.params.get(key)?.as_str()
    }

    #[inline]
    pub fn inputs(&self) -> &'a [NodeResource] {
        self.inputs
    }

    #[inline]
    pub fn outputs(&self) -> &'a [NodeResource] {
        self.outputs
    }
}
// tools
impl RenderNodeContext<'_> {
    /// 节点私有资源的名字，避免不同节点、不同渲染图实例之间重名
    pub fn local_name(&self, suffix: &str) -> String {
        format!("{}_{}_{}", self.graph_name, self.node_name, suffix)
    }

    /// 按名字查找资源的当前句柄，不存在时返回 `RenderHandle::INVALID`
    pub fn resolve(&self, resource: &NodeResource) -> RenderHandle {
        self.resolve_reference(resource.kind, &resource.name)
            .map(|r| r.handle())
            .unwrap_or_default()
    }

    pub fn resolve_reference(&self, kind: NodeResourceKind, name: &str) -> Option<RenderHandleReference> {
        let gpu = self.share.gpu_resource_manager;
        match kind {
            NodeResourceKind::Image => gpu.get_image_handle(name),
            NodeResourceKind::Buffer => gpu.get_buffer_handle(name),
        }
    }

    pub fn find_input(&self, name: &str) -> Option<&NodeResource> {
        self.inputs.iter().find(|r| r.name == name)
    }

    pub fn find_output(&self, name: &str) -> Option<&NodeResource> {
        self.outputs.iter().find(|r| r.name == name)
    }
}
