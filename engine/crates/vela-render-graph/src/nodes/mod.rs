//! 内置渲染节点

mod compute_generic;
mod material_objects;
mod shadows_blur;

pub use compute_generic::RenderNodeComputeGeneric;
pub use material_objects::{ObjectBufferKind, RenderNodeDefaultMaterialObjects};
pub use shadows_blur::RenderNodeDefaultShadowsBlur;

/// 按 local size 计算 dispatch 的 group 数量
pub(crate) fn group_count(extent: [u32; 3], local_size: [u32; 3]) -> [u32; 3] {
    std::array::from_fn(|i| extent[i].max(1).div_ceil(local_size[i].max(1)))
}

#[cfg(test)]
pub(crate) mod test_utils {
    use std::sync::Arc;

    use ash::vk;
    use vela_gfx::{GfxBackend, HeadlessBackend, RenderHandleReference};
    use vela_render_interface::{DescriptorSetManager, GpuResourceManager, RenderDataStoreManager, ShaderManager};
    use vela_shader_reflect::writer::{BlobBinding, ReflectionBlobBuilder};

    use crate::context::{RenderGraphShare, RenderNodeContext};
    use crate::desc::NodeResource;

    /// 单个节点测试用的环境
    pub struct NodeHarness {
        pub backend: Arc<HeadlessBackend>,
        pub gpu: GpuResourceManager,
        pub shaders: ShaderManager,
        pub stores: RenderDataStoreManager,
        pub descriptor_set_manager: DescriptorSetManager,
        pub params: serde_json::Value,
        pub inputs: Vec<NodeResource>,
        pub outputs: Vec<NodeResource>,
        pub frame_id: u64,
        /// 测试中创建的资源，名字表只持有弱引用
        pub resources: Vec<RenderHandleReference>,
    }
    impl NodeHarness {
        pub fn new(buffering_count: u32) -> Self {
            let backend = Arc::new(HeadlessBackend::new());
            Self {
                gpu: GpuResourceManager::new(backend.clone(), buffering_count, true),
                shaders: ShaderManager::new(backend.clone()),
                stores: RenderDataStoreManager::new(),
                descriptor_set_manager: DescriptorSetManager::new(backend.clone(), buffering_count, true, 0),
                backend,
                params: serde_json::Value::Null,
                inputs: Vec::new(),
                outputs: Vec::new(),
                frame_id: 0,
                resources: Vec::new(),
            }
        }

        pub fn begin_frame(&mut self) {
            self.frame_id += 1;
            self.gpu.begin_frame(self.frame_id);
            self.descriptor_set_manager.begin_frame(self.frame_id);
            self.gpu.set_render_window(true);
        }

        pub fn end_frame(&mut self) {
            self.gpu.set_render_window(false);
            self.backend.end_frame(self.frame_id);
            self.gpu.end_frame();
        }

        pub fn ctx(&mut self) -> RenderNodeContext<'_> {
            let share = RenderGraphShare {
                gpu_resource_manager: &self.gpu,
                shader_manager: &self.shaders,
                render_data_store_manager: &self.stores,
                frame_id: self.frame_id,
                validation: true,
            };
            RenderNodeContext::new(
                share,
                &mut self.descriptor_set_manager,
                "graph",
                "node",
                &self.params,
                &self.inputs,
                &self.outputs,
            )
        }
    }

    /// 带一个 combined image sampler 和一个 storage image 的 compute shader
    pub fn blur_like_shader(push_constant_size: Option<u16>, local_size: [u32; 3]) -> Vec<u8> {
        let mut builder = ReflectionBlobBuilder::new(1, vk::ShaderStageFlags::COMPUTE.as_raw() as u16);
        builder.push_constant = push_constant_size;
        builder.sets = Some(vec![(
            0,
            vec![
                BlobBinding::new(0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER.as_raw() as u16),
                BlobBinding::new(1, vk::DescriptorType::STORAGE_IMAGE.as_raw() as u16),
            ],
        )]);
        builder.local_size = Some(local_size);
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_count() {
        assert_eq!(group_count([100, 60, 1], [8, 8, 1]), [13, 8, 1]);
        assert_eq!(group_count([64, 32, 1], [8, 8, 1]), [8, 4, 1]);
        // local size 缺失时按 1 处理
        assert_eq!(group_count([5, 5, 1], [0, 0, 0]), [5, 5, 1]);
    }
}
