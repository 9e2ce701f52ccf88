//! 通用 compute 节点：由参数指定 shader、资源绑定和 dispatch 大小
//!
//! ```json
//! {
//!     "shader": "tonemap",
//!     "bindings": [
//!         { "set": 0, "binding": 0, "resource": "hdr_color" },
//!         { "set": 0, "binding": 1, "resource": "ldr_color" }
//!     ],
//!     "dispatch_image": "ldr_color"
//! }
//! ```
//!
//! 没有 `bindings` 时按 (set, binding) 顺序依次绑定节点的输入和输出。
//! `dispatch_image` 按 image 尺寸和 shader 的 local size 计算 group 数量，否则使用 `group_count`。

use ash::vk;
use serde::Deserialize;
use uuid::Uuid;
use vela_gfx::RenderHandle;
use vela_gfx::descriptor::DescriptorCategory;
use vela_gfx::handle::RenderHandleReference;
use vela_gfx::pipeline_layout::{MAX_DESCRIPTOR_SET_COUNT, PipelineLayout};
use vela_gfx::resource_desc::GpuSamplerDesc;
use vela_render_interface::{DescriptorError, DescriptorSetBinder, GpuResourceManager, RenderCommandList, ShaderManager};

use crate::context::RenderNodeContext;
use crate::error::NodeError;
use crate::node::{ExecuteFlags, RenderNode, RenderNodeType};
use crate::nodes::group_count;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ComputeGenericParams {
    shader: String,
    bindings: Vec<BindingParams>,
    /// combined image sampler 使用的 sampler，缺省时节点自己创建 clamp linear sampler
    sampler: Option<String>,
    group_count: Option<[u32; 3]>,
    dispatch_image: Option<String>,
    /// (constant id, value)
    specialization: Vec<(u32, u32)>,
}

#[derive(Debug, Deserialize)]
struct BindingParams {
    #[serde(default)]
    set: u32,
    binding: u32,
    resource: String,
    #[serde(default)]
    offset: u64,
}

#[derive(Debug)]
struct BindingSlot {
    set: u32,
    binding: u32,
    category: DescriptorCategory,
    /// 为空的 sampler binding 使用节点的 sampler
    resource: String,
    offset: u64,
    needs_sampler: bool,
}

#[derive(Default)]
pub struct RenderNodeComputeGeneric {
    valid: bool,
    pipeline: RenderHandle,
    local_size: [u32; 3],
    slots: Vec<BindingSlot>,
    binders: Vec<(u32, DescriptorSetBinder)>,
    sampler: RenderHandleReference,
    group_count: Option<[u32; 3]>,
    dispatch_image: Option<String>,
}
impl RenderNodeType for RenderNodeComputeGeneric {
    const UID: Uuid = Uuid::from_u128(0x93e4_0b7a_1c52_4d9f_8e61_7a3c_05bd_2e43);
    const TYPE_NAME: &'static str = "RenderNodeComputeGeneric";
}
// init
impl RenderNodeComputeGeneric {
    fn parse_params(params: &serde_json::Value) -> Result<ComputeGenericParams, NodeError> {
        if params.is_null() {
            return Ok(ComputeGenericParams::default());
        }
        ComputeGenericParams::deserialize(params).map_err(|err| NodeError::InvalidParams(err.to_string()))
    }

    fn explicit_slots(layout: &PipelineLayout, bindings: &[BindingParams]) -> Result<Vec<BindingSlot>, NodeError> {
        bindings
            .iter()
            .map(|b| {
                let layout_binding = layout
                    .descriptor_set_layout(b.set)
                    .and_then(|set| set.bindings.iter().find(|lb| lb.binding == b.binding))
                    .ok_or_else(|| {
                        NodeError::InvalidParams(format!("shader has no set {} binding {}", b.set, b.binding))
                    })?;
                Ok(BindingSlot {
                    set: b.set,
                    binding: b.binding,
                    category: DescriptorCategory::of(layout_binding.descriptor_type),
                    resource: b.resource.clone(),
                    offset: b.offset,
                    needs_sampler: layout_binding.descriptor_type == vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                })
            })
            .collect()
    }

    /// 输入在前、输出在后，同名资源只绑定一次
    fn automatic_slots(layout: &PipelineLayout, ctx: &RenderNodeContext<'_>) -> Result<Vec<BindingSlot>, NodeError> {
        let mut resources = Vec::new();
        for resource in ctx.inputs().iter().chain(ctx.outputs()) {
            if !resources.contains(&resource.name.as_str()) {
                resources.push(resource.name.as_str());
            }
        }
        let mut resources = resources.into_iter();

        let mut slots = Vec::new();
        for set in 0..MAX_DESCRIPTOR_SET_COUNT as u32 {
            let Some(set_layout) = layout.descriptor_set_layout(set) else {
                continue;
            };
            let mut bindings: Vec<_> = set_layout.bindings.iter().collect();
            bindings.sort_by_key(|b| b.binding);
            for layout_binding in bindings {
                let category = DescriptorCategory::of(layout_binding.descriptor_type);
                let resource = match category {
                    DescriptorCategory::Sampler => String::new(),
                    _ => resources
                        .next()
                        .ok_or_else(|| {
                            NodeError::InvalidParams(format!(
                                "no input or output left for set {set} binding {}",
                                layout_binding.binding
                            ))
                        })?
                        .to_string(),
                };
                slots.push(BindingSlot {
                    set,
                    binding: layout_binding.binding,
                    category,
                    resource,
                    offset: 0,
                    needs_sampler: layout_binding.descriptor_type == vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                });
            }
        }
        Ok(slots)
    }
}
// tools
impl RenderNodeComputeGeneric {
    fn lookup(&self, gpu: &GpuResourceManager, slot: &BindingSlot) -> Option<RenderHandle> {
        let reference = match slot.category {
            DescriptorCategory::Buffer => gpu.get_buffer_handle(&slot.resource),
            DescriptorCategory::Image => gpu.get_image_handle(&slot.resource),
            DescriptorCategory::Sampler if slot.resource.is_empty() => Some(self.sampler.clone()),
            DescriptorCategory::Sampler => gpu.get_sampler_handle(&slot.resource),
            DescriptorCategory::AccelerationStructure => gpu.get_acceleration_structure_handle(&slot.resource),
        };
        reference.map(|r| r.handle()).filter(|h| h.is_valid())
    }

    /// 绑定所有资源并提交更新；有资源不存在时返回 false，本帧跳过
    fn bind_resources(&mut self, ctx: &RenderNodeContext<'_>, cmd_list: &mut RenderCommandList) -> bool {
        let gpu = ctx.gpu_resource_manager();
        let mut handles = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            match self.lookup(gpu, slot) {
                Some(handle) => handles.push(handle),
                None => {
                    log::warn!("[{}] resource '{}' not found, skipping dispatch", ctx.node_name(), slot.resource);
                    return false;
                }
            }
        }

        if let Err(err) = self.apply_bindings(&handles, cmd_list) {
            log::error!("[{}] descriptor binding failed: {err}", ctx.node_name());
            return false;
        }
        true
    }

    fn apply_bindings(
        &mut self,
        handles: &[RenderHandle],
        cmd_list: &mut RenderCommandList,
    ) -> Result<(), DescriptorError> {
        let sampler = self.sampler.handle();
        for (slot, &handle) in self.slots.iter().zip(handles) {
            let Some((_, binder)) = self.binders.iter_mut().find(|(set, _)| *set == slot.set) else {
                continue;
            };
            match slot.category {
                DescriptorCategory::Buffer => binder.bind_buffer(slot.binding, handle, slot.offset)?,
                DescriptorCategory::Image => {
                    binder.bind_image(slot.binding, handle, slot.needs_sampler.then_some(sampler))?
                }
                DescriptorCategory::Sampler => binder.bind_sampler(slot.binding, handle)?,
                DescriptorCategory::AccelerationStructure => binder.bind_acceleration_structure(slot.binding, handle)?,
            }
        }
        // 每帧提交，内容没变时由 descriptor set manager 跳过
        for (_, binder) in &mut self.binders {
            cmd_list.update_descriptor_set(binder.get_descriptor_set_layout_binding_resources())?;
            binder.clear_dirty();
        }
        Ok(())
    }

    fn dispatch_size(&self, gpu: &GpuResourceManager) -> Option<[u32; 3]> {
        match &self.dispatch_image {
            Some(name) => {
                let image = gpu.get_image_handle(name)?;
                let desc = gpu.get_image_descriptor(image.handle())?;
                Some(group_count([desc.width, desc.height, desc.depth], self.local_size))
            }
            None => Some(self.group_count.unwrap_or([1, 1, 1])),
        }
    }
}
impl RenderNode for RenderNodeComputeGeneric {
    fn init_node(&mut self, ctx: &mut RenderNodeContext<'_>) -> Result<(), NodeError> {
        self.valid = false;
        let params = Self::parse_params(ctx.params())?;
        if params.shader.is_empty() {
            return Err(NodeError::InvalidParams("missing 'shader'".to_string()));
        }

        let shaders = ctx.shader_manager();
        let shader = shaders.get_shader_handle(&params.shader);
        let layout = shaders
            .get_reflection_pipeline_layout(shader)
            .ok_or_else(|| NodeError::ShaderNotFound(params.shader.clone()))?;

        self.slots = if params.bindings.is_empty() {
            Self::automatic_slots(&layout, ctx)?
        } else {
            Self::explicit_slots(&layout, &params.bindings)?
        };
        for set in 0..MAX_DESCRIPTOR_SET_COUNT as u32 {
            let Some(set_layout) = layout.descriptor_set_layout(set) else {
                continue;
            };
            if let Some(unbound) = set_layout
                .bindings
                .iter()
                .find(|b| !self.slots.iter().any(|s| s.set == set && s.binding == b.binding))
            {
                return Err(NodeError::InvalidParams(format!("set {set} binding {} has no resource", unbound.binding)));
            }
        }

        let pipeline_name = ctx.local_name("pipeline");
        self.pipeline =
            shaders.create_pipeline(&pipeline_name, shader, vk::PipelineBindPoint::COMPUTE, &params.specialization);
        if !self.pipeline.is_valid() {
            return Err(NodeError::PipelineCreation(pipeline_name));
        }
        self.local_size = shaders.get_local_size(shader);

        if self.slots.iter().any(|s| s.needs_sampler || s.resource.is_empty()) {
            let gpu = ctx.gpu_resource_manager();
            self.sampler = match &params.sampler {
                Some(name) => gpu
                    .get_sampler_handle(name)
                    .ok_or_else(|| NodeError::ResourceNotFound(name.clone()))?,
                None => {
                    let name = ctx.local_name("sampler");
                    let sampler = gpu.create_sampler(&name, &GpuSamplerDesc::clamp_linear());
                    if !sampler.is_valid() {
                        return Err(NodeError::ResourceCreation(name));
                    }
                    sampler
                }
            };
        }

        let dsm = ctx.descriptor_set_manager();
        dsm.reset_and_reserve(&ShaderManager::descriptor_counts(&layout));
        self.binders.clear();
        for set in 0..MAX_DESCRIPTOR_SET_COUNT as u32 {
            if layout.descriptor_set_layout(set).is_none() {
                continue;
            }
            let handle = dsm.try_create_descriptor_set(set, &layout)?;
            let binder = dsm.create_binder(handle).ok_or(DescriptorError::BindingNotFound { binding: set })?;
            self.binders.push((set, binder));
        }

        self.group_count = params.group_count;
        self.dispatch_image = params.dispatch_image;
        self.valid = true;
        Ok(())
    }

    fn pre_execute_frame(&mut self, _ctx: &mut RenderNodeContext<'_>) {}

    fn execute_flags(&self) -> ExecuteFlags {
        if self.valid { ExecuteFlags::empty() } else { ExecuteFlags::DO_NOT_EXECUTE }
    }

    fn execute_frame(&mut self, ctx: &mut RenderNodeContext<'_>, cmd_list: &mut RenderCommandList) {
        let Some([x, y, z]) = self.dispatch_size(ctx.gpu_resource_manager()) else {
            log::warn!("[{}] dispatch image not found", ctx.node_name());
            return;
        };
        if !self.bind_resources(ctx, cmd_list) {
            return;
        }

        cmd_list.bind_pipeline(self.pipeline);
        for (set, binder) in &self.binders {
            cmd_list.bind_descriptor_set(*set, binder.descriptor_set_handle());
        }
        cmd_list.dispatch(x, y, z);
    }
}

#[cfg(test)]
mod tests {
    use vela_gfx::command::RenderCommand;
    use vela_gfx::resource_desc::GpuImageDesc;

    use super::*;
    use crate::desc::{NodeResource, NodeResourceDesc};
    use crate::nodes::test_utils::{NodeHarness, blur_like_shader};

    fn tonemap_harness() -> NodeHarness {
        let mut harness = NodeHarness::new(2);
        harness.shaders.create_shader("tonemap", &[&blur_like_shader(None, [8, 8, 1])]);
        let hdr = harness.gpu.create_image(
            "hdr",
            &GpuImageDesc::new_2d(64, 32, vk::Format::R16G16B16A16_SFLOAT, vk::ImageUsageFlags::SAMPLED),
        );
        let ldr = harness.gpu.create_image(
            "ldr",
            &GpuImageDesc::new_2d(64, 32, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::STORAGE),
        );
        harness.resources.extend([hdr, ldr]);
        harness.inputs = vec![NodeResource::parse("tonemap", &NodeResourceDesc::image("hdr", "shader_read_compute"), false).unwrap()];
        harness.outputs = vec![NodeResource::parse("tonemap", &NodeResourceDesc::image("ldr", "storage_write"), true).unwrap()];
        harness
    }

    #[test]
    fn test_automatic_bindings_and_dispatch_size() {
        let mut harness = tonemap_harness();
        harness.params = serde_json::json!({ "shader": "tonemap", "dispatch_image": "ldr" });
        let mut node = RenderNodeComputeGeneric::default();
        node.init_node(&mut harness.ctx()).unwrap();
        assert_eq!(node.slots.iter().map(|s| s.resource.as_str()).collect::<Vec<_>>(), vec!["hdr", "ldr"]);

        for expect_write in [true, false] {
            harness.begin_frame();
            let mut cmd_list = RenderCommandList::new("tonemap", true);
            node.execute_frame(&mut harness.ctx(), &mut cmd_list);
            assert!(cmd_list.commands().iter().any(|c| matches!(c, RenderCommand::Dispatch { group_count: [8, 4, 1] })));

            let (_, updates) = cmd_list.take();
            assert_eq!(updates.len(), 1);
            // 第二帧内容相同，不会写入后端
            let written = harness.descriptor_set_manager.apply_update(&updates[0], &harness.gpu).unwrap();
            assert_eq!(written, expect_write);
            harness.end_frame();
        }
    }

    #[test]
    fn test_explicit_bindings() {
        let mut harness = tonemap_harness();
        harness.params = serde_json::json!({
            "shader": "tonemap",
            "bindings": [
                { "binding": 1, "resource": "ldr" },
                { "binding": 0, "resource": "hdr" }
            ],
            "group_count": [2, 3, 1]
        });
        let mut node = RenderNodeComputeGeneric::default();
        node.init_node(&mut harness.ctx()).unwrap();

        harness.begin_frame();
        let mut cmd_list = RenderCommandList::new("tonemap", true);
        node.execute_frame(&mut harness.ctx(), &mut cmd_list);
        assert!(cmd_list.commands().iter().any(|c| matches!(c, RenderCommand::Dispatch { group_count: [2, 3, 1] })));
        harness.end_frame();
    }

    #[test]
    fn test_invalid_params() {
        let mut harness = tonemap_harness();
        let mut node = RenderNodeComputeGeneric::default();
        assert!(matches!(node.init_node(&mut harness.ctx()), Err(NodeError::InvalidParams(_))));

        harness.params = serde_json::json!({ "shader": "does_not_exist" });
        assert_eq!(
            node.init_node(&mut harness.ctx()).unwrap_err(),
            NodeError::ShaderNotFound("does_not_exist".to_string())
        );

        // binding 1 没有资源
        harness.params = serde_json::json!({
            "shader": "tonemap",
            "bindings": [{ "binding": 0, "resource": "hdr" }]
        });
        assert!(matches!(node.init_node(&mut harness.ctx()), Err(NodeError::InvalidParams(_))));

        harness.params = serde_json::json!({
            "shader": "tonemap",
            "bindings": [{ "set": 2, "binding": 0, "resource": "hdr" }]
        });
        assert!(matches!(node.init_node(&mut harness.ctx()), Err(NodeError::InvalidParams(_))));
        assert_eq!(node.execute_flags(), ExecuteFlags::DO_NOT_EXECUTE);
    }

    #[test]
    fn test_missing_resource_skips_frame() {
        let mut harness = tonemap_harness();
        harness.params = serde_json::json!({
            "shader": "tonemap",
            "bindings": [
                { "binding": 0, "resource": "hdr" },
                { "binding": 1, "resource": "not_created_yet" }
            ]
        });
        let mut node = RenderNodeComputeGeneric::default();
        node.init_node(&mut harness.ctx()).unwrap();

        harness.begin_frame();
        let mut cmd_list = RenderCommandList::new("tonemap", true);
        node.execute_frame(&mut harness.ctx(), &mut cmd_list);
        assert!(cmd_list.is_empty());
        assert!(cmd_list.descriptor_updates().is_empty());
        harness.end_frame();
    }
}
