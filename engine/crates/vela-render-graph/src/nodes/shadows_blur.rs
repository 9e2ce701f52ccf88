//! 阴影图的两遍可分离模糊
//!
//! 第一遍从阴影图读取写入同尺寸的临时 image，第二遍从临时 image 读取写回阴影图。
//! 临时 image 是节点私有资源，不在渲染图的依赖跟踪中，因此它的 barrier 由节点自己添加。
//! 没有投射阴影的光源时节点不执行。

use ash::vk;
use glam::Vec2;
use uuid::Uuid;
use vela_gfx::RenderHandle;
use vela_gfx::barrier::infer_image_aspect;
use vela_gfx::handle::RenderHandleReference;
use vela_gfx::resource_desc::{GpuImageDesc, GpuSamplerDesc};
use vela_gfx::resource_state::{ImageResourceState, ImageSubresourceRange};
use vela_render_interface::{DescriptorError, DescriptorSetBinder, LightDataStore, RenderCommandList};

use crate::context::RenderNodeContext;
use crate::desc::{NodeResourceKind, NodeResourceState};
use crate::error::NodeError;
use crate::node::{ExecuteFlags, RenderNode, RenderNodeType};
use crate::nodes::group_count;

const DEFAULT_SHADER: &str = "shadow_blur";
const DEFAULT_IMAGE: &str = "shadow_map";

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
struct BlurPushConstant {
    direction: Vec2,
    texel_size: Vec2,
}

#[derive(Default)]
pub struct RenderNodeDefaultShadowsBlur {
    valid: bool,
    image_name: String,
    light_store_name: String,
    /// 阴影图进入和离开本节点时的状态
    image_state: ImageResourceState,

    pipeline: RenderHandle,
    local_size: [u32; 3],
    has_push_constant: bool,
    sampler: RenderHandleReference,
    /// [水平, 竖直]
    binders: Vec<DescriptorSetBinder>,

    shadow_image: RenderHandle,
    temp_image: RenderHandleReference,
    extent: (u32, u32),
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
    shadow_caster_count: u32,
}
impl RenderNodeType for RenderNodeDefaultShadowsBlur {
    const UID: Uuid = Uuid::from_u128(0x0c5d_83e2_47a1_4f6c_9b3e_d2a8_6f14_c702);
    const TYPE_NAME: &'static str = "RenderNodeDefaultShadowsBlur";
}
// getters
impl RenderNodeDefaultShadowsBlur {
    pub fn temp_image(&self) -> RenderHandle {
        self.temp_image.handle()
    }

    pub fn shadow_caster_count(&self) -> u32 {
        self.shadow_caster_count
    }
}
// tools
impl RenderNodeDefaultShadowsBlur {
    fn bind_pass(
        binder: &mut DescriptorSetBinder,
        src: RenderHandle,
        dst: RenderHandle,
        sampler: RenderHandle,
    ) -> Result<(), DescriptorError> {
        binder.bind_image(0, src, Some(sampler))?;
        binder.bind_image(1, dst, None)
    }

    /// 每帧都提交，原地重建后句柄不变但后端对象已经变化，由 descriptor set manager 去重
    fn update_descriptor_sets(&mut self, cmd_list: &mut RenderCommandList) -> Result<(), DescriptorError> {
        let shadow = self.shadow_image;
        let temp = self.temp_image.handle();
        let sampler = self.sampler.handle();
        if let [horizontal, vertical] = self.binders.as_mut_slice() {
            Self::bind_pass(horizontal, shadow, temp, sampler)?;
            Self::bind_pass(vertical, temp, shadow, sampler)?;
        }
        for binder in &mut self.binders {
            cmd_list.update_descriptor_set(binder.get_descriptor_set_layout_binding_resources())?;
            binder.clear_dirty();
        }
        Ok(())
    }

    fn dispatch_pass(&self, cmd_list: &mut RenderCommandList, binder: &DescriptorSetBinder, direction: Vec2) {
        let (width, height) = self.extent;
        cmd_list.bind_descriptor_set(0, binder.descriptor_set_handle());
        if self.has_push_constant {
            let push_constant = BlurPushConstant {
                direction,
                texel_size: Vec2::new(1.0 / width as f32, 1.0 / height as f32),
            };
            cmd_list.push_constants(vk::ShaderStageFlags::COMPUTE, 0, &push_constant);
        }
        let [x, y, z] = group_count([width, height, 1], self.local_size);
        cmd_list.dispatch(x, y, z);
    }
}
impl RenderNode for RenderNodeDefaultShadowsBlur {
    fn init_node(&mut self, ctx: &mut RenderNodeContext<'_>) -> Result<(), NodeError> {
        self.valid = false;
        let shader_name = ctx.param_str("shader").unwrap_or(DEFAULT_SHADER);
        self.image_name = ctx
            .param_str("image")
            .or_else(|| ctx.inputs().first().map(|r| r.name.as_str()))
            .unwrap_or(DEFAULT_IMAGE)
            .to_string();
        self.light_store_name = ctx.param_str("data_store").unwrap_or(LightDataStore::DEFAULT_NAME).to_string();
        // 同时是输入和输出时，渲染图按输出状态转换
        self.image_state = ctx
            .find_output(&self.image_name)
            .or_else(|| ctx.find_input(&self.image_name))
            .and_then(|r| match r.state {
                NodeResourceState::Image(state) => Some(state),
                NodeResourceState::Buffer(_) => None,
            })
            .unwrap_or(ImageResourceState::SHADER_READ_FRAGMENT);

        let shaders = ctx.shader_manager();
        let shader = shaders.get_shader_handle(shader_name);
        let layout = shaders
            .get_reflection_pipeline_layout(shader)
            .ok_or_else(|| NodeError::ShaderNotFound(shader_name.to_string()))?;
        let set_layout = layout
            .descriptor_set_layout(0)
            .filter(|set| set.bindings.len() >= 2)
            .ok_or_else(|| NodeError::InvalidParams(format!("shader '{shader_name}' needs 2 bindings in set 0")))?;
        let mut counts = vela_gfx::descriptor::DescriptorCounts::default();
        counts.add_set_layout(set_layout);
        counts.add_set_layout(set_layout);

        let pipeline_name = ctx.local_name("pipeline");
        self.pipeline = shaders.create_pipeline(&pipeline_name, shader, vk::PipelineBindPoint::COMPUTE, &[]);
        if !self.pipeline.is_valid() {
            return Err(NodeError::PipelineCreation(pipeline_name));
        }
        self.local_size = shaders.get_local_size(shader);
        self.has_push_constant = layout.has_push_constant();

        let sampler_name = ctx.local_name("sampler");
        self.sampler = ctx.gpu_resource_manager().create_sampler(&sampler_name, &GpuSamplerDesc::clamp_linear());
        if !self.sampler.is_valid() {
            return Err(NodeError::ResourceCreation(sampler_name));
        }

        let dsm = ctx.descriptor_set_manager();
        dsm.reset_and_reserve(&counts);
        self.binders.clear();
        for _ in 0..2 {
            let set = dsm.try_create_descriptor_set(0, &layout)?;
            let binder = dsm.create_binder(set).ok_or(DescriptorError::BindingNotFound { binding: 0 })?;
            self.binders.push(binder);
        }

        self.valid = true;
        Ok(())
    }

    fn pre_execute_frame(&mut self, ctx: &mut RenderNodeContext<'_>) {
        self.shadow_caster_count = ctx
            .render_data_store_manager()
            .get::<LightDataStore>(&self.light_store_name)
            .map(LightDataStore::shadow_caster_count)
            .unwrap_or(0);

        let gpu = ctx.gpu_resource_manager();
        let shadow_image = ctx
            .resolve_reference(NodeResourceKind::Image, &self.image_name)
            .map(|r| r.handle())
            .unwrap_or_default();
        self.shadow_image = shadow_image;
        let Some(shadow_desc) = gpu.get_image_descriptor(shadow_image) else {
            return;
        };

        let extent = (shadow_desc.width, shadow_desc.height);
        if self.temp_image.is_valid() && extent == self.extent && shadow_desc.format == self.format {
            return;
        }
        let temp_desc = GpuImageDesc::new_2d(
            shadow_desc.width,
            shadow_desc.height,
            shadow_desc.format,
            vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED,
        );
        let created = if self.temp_image.is_valid() {
            gpu.recreate_image(&self.temp_image, &temp_desc)
        } else {
            self.temp_image = gpu.create_image(&ctx.local_name("temp"), &temp_desc);
            self.temp_image.is_valid()
        };
        if created {
            self.extent = extent;
            self.format = shadow_desc.format;
            self.aspect = infer_image_aspect(shadow_desc.format);
        } else {
            log::error!("[{}] failed to create blur image {}x{}", ctx.node_name(), extent.0, extent.1);
        }
    }

    fn execute_flags(&self) -> ExecuteFlags {
        let ready = self.valid
            && self.shadow_caster_count > 0
            && self.shadow_image.is_valid()
            && self.temp_image.is_valid();
        if ready { ExecuteFlags::empty() } else { ExecuteFlags::DO_NOT_EXECUTE }
    }

    fn execute_frame(&mut self, ctx: &mut RenderNodeContext<'_>, cmd_list: &mut RenderCommandList) {
        if let Err(err) = self.update_descriptor_sets(cmd_list) {
            log::error!("[{}] skipping blur: {err}", ctx.node_name());
            return;
        }
        let (Some(horizontal), Some(vertical)) = (self.binders.first(), self.binders.get(1)) else {
            return;
        };
        let range = ImageSubresourceRange::whole(self.aspect);
        let shadow = self.shadow_image;
        let temp = self.temp_image.handle();

        cmd_list.bind_pipeline(self.pipeline);

        // 阴影图 -> 临时 image
        cmd_list.custom_image_barrier(temp, ImageResourceState::UNDEFINED, ImageResourceState::STORAGE_WRITE_COMPUTE, range);
        cmd_list.custom_image_barrier(shadow, self.image_state, ImageResourceState::SHADER_READ_COMPUTE, range);
        cmd_list.add_custom_barrier_point();
        self.dispatch_pass(cmd_list, horizontal, Vec2::X);

        // 临时 image -> 阴影图
        cmd_list.custom_image_barrier(
            temp,
            ImageResourceState::STORAGE_WRITE_COMPUTE,
            ImageResourceState::SHADER_READ_COMPUTE,
            range,
        );
        cmd_list.custom_image_barrier(
            shadow,
            ImageResourceState::SHADER_READ_COMPUTE,
            ImageResourceState::STORAGE_WRITE_COMPUTE,
            range,
        );
        cmd_list.add_custom_barrier_point();
        self.dispatch_pass(cmd_list, vertical, Vec2::Y);

        cmd_list.custom_image_barrier(shadow, ImageResourceState::STORAGE_WRITE_COMPUTE, self.image_state, range);
        cmd_list.add_custom_barrier_point();
    }
}

#[cfg(test)]
mod tests {
    use vela_gfx::command::RenderCommand;
    use vela_render_interface::render_data_store::LightUniform;

    use super::*;
    use crate::desc::{NodeResource, NodeResourceDesc};
    use crate::nodes::test_utils::{NodeHarness, blur_like_shader};

    fn harness_with_shadow_map() -> NodeHarness {
        let mut harness = NodeHarness::new(2);
        harness.shaders.create_shader(DEFAULT_SHADER, &[&blur_like_shader(Some(16), [8, 8, 1])]);
        let shadow_map = harness.gpu.create_image(
            DEFAULT_IMAGE,
            &GpuImageDesc::new_2d(
                100,
                60,
                vk::Format::R16G16_SFLOAT,
                vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE,
            ),
        );
        harness.resources.push(shadow_map);
        let desc = NodeResourceDesc::image(DEFAULT_IMAGE, "shader_read_fragment");
        harness.inputs = vec![NodeResource::parse("blur", &desc, false).unwrap()];
        harness.outputs = vec![NodeResource::parse("blur", &desc, true).unwrap()];
        harness.stores.register(Box::new(LightDataStore::default()));
        harness
    }

    #[test]
    fn test_missing_shader() {
        let mut harness = NodeHarness::new(2);
        let mut node = RenderNodeDefaultShadowsBlur::default();
        let err = node.init_node(&mut harness.ctx()).unwrap_err();
        assert_eq!(err, NodeError::ShaderNotFound(DEFAULT_SHADER.to_string()));
        assert_eq!(node.execute_flags(), ExecuteFlags::DO_NOT_EXECUTE);
    }

    #[test]
    fn test_skipped_without_shadow_casters() {
        let mut harness = harness_with_shadow_map();
        let mut node = RenderNodeDefaultShadowsBlur::default();
        node.init_node(&mut harness.ctx()).unwrap();

        harness.begin_frame();
        node.pre_execute_frame(&mut harness.ctx());
        assert!(node.temp_image().is_valid());
        assert_eq!(node.shadow_caster_count(), 0);
        assert_eq!(node.execute_flags(), ExecuteFlags::DO_NOT_EXECUTE);
        harness.end_frame();
    }

    #[test]
    fn test_two_pass_blur() {
        let mut harness = harness_with_shadow_map();
        let mut node = RenderNodeDefaultShadowsBlur::default();
        node.init_node(&mut harness.ctx()).unwrap();
        assert!(harness.gpu.get_image_handle(DEFAULT_IMAGE).is_some());

        harness.begin_frame();
        harness
            .stores
            .get_mut::<LightDataStore>(LightDataStore::DEFAULT_NAME)
            .unwrap()
            .lights
            .push(LightUniform {
                flags: [0, 1, 0, 0],
                ..Default::default()
            });
        node.pre_execute_frame(&mut harness.ctx());
        assert_eq!(node.execute_flags(), ExecuteFlags::empty());
        assert!(harness.gpu.get_image_handle("graph_node_temp").is_some());

        let mut cmd_list = RenderCommandList::new("blur", true);
        node.execute_frame(&mut harness.ctx(), &mut cmd_list);
        assert_eq!(cmd_list.draw_or_dispatch_count(), 2);
        assert_eq!(cmd_list.descriptor_updates().len(), 2);
        // 阴影图从片段采样到计算采样布局不变，不需要 barrier
        assert_eq!(cmd_list.barrier_count(), 4);
        let dispatches: Vec<_> = cmd_list
            .commands()
            .iter()
            .filter_map(|c| match c {
                RenderCommand::Dispatch { group_count } => Some(*group_count),
                _ => None,
            })
            .collect();
        assert_eq!(dispatches, vec![[13, 8, 1], [13, 8, 1]]);

        let (_, updates) = cmd_list.take();
        for update in &updates {
            assert!(harness.descriptor_set_manager.apply_update(update, &harness.gpu).unwrap());
        }
        harness.end_frame();

        // 第二帧绑定的资源没有变化，更新在 descriptor set manager 中被跳过
        harness.begin_frame();
        node.pre_execute_frame(&mut harness.ctx());
        node.execute_frame(&mut harness.ctx(), &mut cmd_list);
        assert_eq!(cmd_list.draw_or_dispatch_count(), 2);
        let (_, updates) = cmd_list.take();
        assert_eq!(updates.len(), 2);
        for update in &updates {
            assert!(!harness.descriptor_set_manager.apply_update(update, &harness.gpu).unwrap());
        }
        harness.end_frame();
    }

    #[test]
    fn test_temp_image_follows_shadow_map_size() {
        let mut harness = harness_with_shadow_map();
        harness
            .stores
            .get_mut::<LightDataStore>(LightDataStore::DEFAULT_NAME)
            .unwrap()
            .lights
            .push(LightUniform {
                flags: [0, 1, 0, 0],
                ..Default::default()
            });
        let mut node = RenderNodeDefaultShadowsBlur::default();
        node.init_node(&mut harness.ctx()).unwrap();
        harness.begin_frame();
        node.pre_execute_frame(&mut harness.ctx());
        let temp = node.temp_image();

        let shadow = harness.gpu.get_image_handle(DEFAULT_IMAGE).unwrap();
        assert!(harness.gpu.recreate_image(
            &shadow,
            &GpuImageDesc::new_2d(
                200,
                120,
                vk::Format::R16G16_SFLOAT,
                vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE,
            ),
        ));
        node.pre_execute_frame(&mut harness.ctx());
        // 句柄不变，描述更新
        assert_eq!(node.temp_image(), temp);
        let desc = harness.gpu.get_image_descriptor(temp).unwrap();
        assert_eq!((desc.width, desc.height), (200, 120));

        let mut cmd_list = RenderCommandList::new("blur", true);
        node.execute_frame(&mut harness.ctx(), &mut cmd_list);
        assert_eq!(cmd_list.descriptor_updates().len(), 2);
        harness.end_frame();
    }

    #[test]
    fn test_recreate_same_extent_rewrites_descriptors() {
        let mut harness = harness_with_shadow_map();
        let mut node = RenderNodeDefaultShadowsBlur::default();
        node.init_node(&mut harness.ctx()).unwrap();

        let mut cmd_list = RenderCommandList::new("blur", true);
        harness.begin_frame();
        node.pre_execute_frame(&mut harness.ctx());
        node.execute_frame(&mut harness.ctx(), &mut cmd_list);
        let (_, updates) = cmd_list.take();
        for update in &updates {
            assert!(harness.descriptor_set_manager.apply_update(update, &harness.gpu).unwrap());
        }
        harness.end_frame();

        // 尺寸不变只换格式：句柄不变，后端 image 变了
        let shadow = harness.gpu.get_image_handle(DEFAULT_IMAGE).unwrap();
        let old_backend = harness.gpu.resolve_image(shadow.handle()).unwrap().id;
        let temp = node.temp_image();
        assert!(harness.gpu.recreate_image(
            &shadow,
            &GpuImageDesc::new_2d(
                100,
                60,
                vk::Format::R32G32_SFLOAT,
                vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE,
            ),
        ));
        assert_ne!(harness.gpu.resolve_image(shadow.handle()).unwrap().id, old_backend);

        harness.begin_frame();
        node.pre_execute_frame(&mut harness.ctx());
        assert_eq!(node.temp_image(), temp);
        assert_eq!(harness.gpu.get_image_descriptor(temp).unwrap().format, vk::Format::R32G32_SFLOAT);
        node.execute_frame(&mut harness.ctx(), &mut cmd_list);
        let (_, updates) = cmd_list.take();
        assert_eq!(updates.len(), 2);
        for update in &updates {
            assert!(harness.descriptor_set_manager.apply_update(update, &harness.gpu).unwrap());
        }
        harness.end_frame();
    }
}
