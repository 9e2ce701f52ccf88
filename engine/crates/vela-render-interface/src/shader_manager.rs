use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ash::vk;
use itertools::Itertools;
use slotmap::{Key, SlotMap, new_key_type};
use vela_gfx::descriptor::DescriptorCounts;
use vela_gfx::handle::next_owner_id;
use vela_gfx::pipeline_layout::{DescriptorSetLayout, MAX_DESCRIPTOR_SET_COUNT, PipelineLayout};
use vela_gfx::{BackendPipelineId, GfxBackend, PipelineDesc, RenderHandle, RenderHandleType};
use vela_shader_reflect::{ShaderReflectionData, SpecializationConstant, VertexInputDeclaration};

new_key_type! {
    struct ShaderKey;
    struct PipelineKey;
}

/// 所有 stage 合并之后的反射数据
struct ShaderEntry {
    name: String,
    stage_flags: vk::ShaderStageFlags,
    pipeline_layout: PipelineLayout,
    specialization_constants: Vec<SpecializationConstant>,
    vertex_input_declaration: VertexInputDeclaration,
    local_size: [u32; 3],
}

struct PipelineEntry {
    shader: RenderHandle,
    backend: BackendPipelineId,
}

#[derive(Default)]
struct ShaderState {
    shaders: SlotMap<ShaderKey, ShaderEntry>,
    shader_names: HashMap<String, RenderHandle>,
    pipelines: SlotMap<PipelineKey, PipelineEntry>,
    pipeline_names: HashMap<String, RenderHandle>,
}

/// shader 与 pipeline 的管理器
///
/// shader 以名字注册，每个 stage 提供一份反射 blob；各 stage 的 pipeline layout 在注册时合并并缓存。
/// shader 和 pipeline 的生命周期与管理器相同。
pub struct ShaderManager {
    owner: u32,
    backend: Arc<dyn GfxBackend>,
    state: Mutex<ShaderState>,
}
// new & init
impl ShaderManager {
    pub fn new(backend: Arc<dyn GfxBackend>) -> Self {
        Self {
            owner: next_owner_id(),
            backend,
            state: Mutex::new(ShaderState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ShaderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
// shader
impl ShaderManager {
    /// 注册 shader，`stage_blobs` 中每一项是一个 stage 的反射数据
    ///
    /// 任意一个 blob 的 header 无效时注册失败，返回无效句柄。同名 shader 会被替换，句柄不变。
    pub fn create_shader(&self, name: &str, stage_blobs: &[&[u8]]) -> RenderHandle {
        let _span = tracy_client::span!("ShaderManager::create_shader");
        if stage_blobs.is_empty() {
            log::error!("shader '{name}' has no stages");
            return RenderHandle::INVALID;
        }

        let mut entry = ShaderEntry {
            name: name.to_string(),
            stage_flags: vk::ShaderStageFlags::empty(),
            pipeline_layout: PipelineLayout::default(),
            specialization_constants: Vec::new(),
            vertex_input_declaration: VertexInputDeclaration::default(),
            local_size: [0; 3],
        };
        for (stage_index, blob) in stage_blobs.iter().enumerate() {
            let reflection = ShaderReflectionData::new(blob);
            if !reflection.is_valid() {
                log::error!("shader '{name}': reflection data of stage {stage_index} is invalid");
                return RenderHandle::INVALID;
            }

            let stage = reflection.shader_stage_flags();
            entry.stage_flags |= stage;
            merge_pipeline_layout(name, &mut entry.pipeline_layout, &reflection.get_pipeline_layout());
            entry.specialization_constants.extend(reflection.get_specialization_constants());
            if stage.contains(vk::ShaderStageFlags::VERTEX) {
                entry.vertex_input_declaration = reflection.get_vertex_input_declaration();
            }
            if stage.contains(vk::ShaderStageFlags::COMPUTE) {
                entry.local_size = reflection.get_local_size();
            }
        }

        let mut state = self.state();
        if let Some(&handle) = state.shader_names.get(name) {
            if let Some(existing) = state.shaders.get_mut(handle.key_data().into()) {
                *existing = entry;
                log::info!("shader '{name}' reloaded");
                return handle;
            }
        }
        let k = state.shaders.insert(entry);
        let handle = RenderHandle::new(RenderHandleType::Shader, self.owner, k.data());
        state.shader_names.insert(name.to_string(), handle);
        log::debug!("shader '{name}' registered as {handle:?}");
        handle
    }

    pub fn get_shader_handle(&self, name: &str) -> RenderHandle {
        self.state().shader_names.get(name).copied().unwrap_or_default()
    }

    fn with_shader<R>(&self, handle: RenderHandle, f: impl FnOnce(&ShaderEntry) -> R) -> Option<R> {
        if handle.kind() != RenderHandleType::Shader || handle.owner() != self.owner {
            return None;
        }
        let state = self.state();
        state.shaders.get(handle.key_data().into()).map(f)
    }

    pub fn is_valid(&self, handle: RenderHandle) -> bool {
        self.with_shader(handle, |_| ()).is_some()
    }

    pub fn get_shader_name(&self, handle: RenderHandle) -> Option<String> {
        self.with_shader(handle, |s| s.name.clone())
    }

    pub fn get_shader_stage_flags(&self, handle: RenderHandle) -> vk::ShaderStageFlags {
        self.with_shader(handle, |s| s.stage_flags).unwrap_or_default()
    }

    /// 所有 stage 合并后的 pipeline layout
    pub fn get_reflection_pipeline_layout(&self, handle: RenderHandle) -> Option<PipelineLayout> {
        self.with_shader(handle, |s| s.pipeline_layout.clone())
    }

    pub fn get_specialization_constants(&self, handle: RenderHandle) -> Vec<SpecializationConstant> {
        self.with_shader(handle, |s| s.specialization_constants.clone()).unwrap_or_default()
    }

    pub fn get_vertex_input_declaration(&self, handle: RenderHandle) -> VertexInputDeclaration {
        self.with_shader(handle, |s| s.vertex_input_declaration.clone()).unwrap_or_default()
    }

    /// compute shader 的 workgroup 大小，非 compute shader 返回 `[0; 3]`
    pub fn get_local_size(&self, handle: RenderHandle) -> [u32; 3] {
        self.with_shader(handle, |s| s.local_size).unwrap_or_default()
    }

    /// pipeline layout 中所有 set 的 descriptor 需求
    pub fn descriptor_counts(pipeline_layout: &PipelineLayout) -> DescriptorCounts {
        DescriptorCounts::from_pipeline_layout(pipeline_layout)
    }
}
// pipeline
impl ShaderManager {
    /// 使用 shader 的反射 layout 创建 pipeline；同名 pipeline 已存在时直接返回
    pub fn create_pipeline(
        &self,
        name: &str,
        shader: RenderHandle,
        bind_point: vk::PipelineBindPoint,
        specialization_data: &[(u32, u32)],
    ) -> RenderHandle {
        let _span = tracy_client::span!("ShaderManager::create_pipeline");
        if let Some(&handle) = self.state().pipeline_names.get(name) {
            return handle;
        }
        let Some(layout) = self.get_reflection_pipeline_layout(shader) else {
            log::error!("pipeline '{name}': invalid shader handle {shader:?}");
            return RenderHandle::INVALID;
        };

        let desc = PipelineDesc {
            name: name.to_string(),
            bind_point,
            layout,
            specialization_data: specialization_data.to_vec(),
        };
        let backend = match self.backend.create_pipeline(&desc) {
            Ok(backend) => backend,
            Err(err) => {
                log::error!("failed to create pipeline '{name}': {err}");
                return RenderHandle::INVALID;
            }
        };

        let mut state = self.state();
        let k = state.pipelines.insert(PipelineEntry { shader, backend });
        let handle = RenderHandle::new(RenderHandleType::Pipeline, self.owner, k.data());
        state.pipeline_names.insert(name.to_string(), handle);
        handle
    }

    pub fn get_pipeline_handle(&self, name: &str) -> RenderHandle {
        self.state().pipeline_names.get(name).copied().unwrap_or_default()
    }

    pub fn get_pipeline_shader(&self, pipeline: RenderHandle) -> Option<RenderHandle> {
        if pipeline.kind() != RenderHandleType::Pipeline || pipeline.owner() != self.owner {
            return None;
        }
        self.state().pipelines.get(pipeline.key_data().into()).map(|p| p.shader)
    }

    pub fn resolve_pipeline(&self, pipeline: RenderHandle) -> Option<BackendPipelineId> {
        if pipeline.kind() != RenderHandleType::Pipeline || pipeline.owner() != self.owner {
            return None;
        }
        self.state().pipelines.get(pipeline.key_data().into()).map(|p| p.backend)
    }
}
impl Drop for ShaderManager {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, pipeline) in state.pipelines.drain() {
            self.backend.destroy_pipeline(pipeline.backend);
        }
    }
}

/// 将一个 stage 的 layout 合并进已有的 layout
///
/// 同一 binding 的 stage flags 取并集、数量取最大值；descriptor type 冲突时整个 set 被清空。
fn merge_pipeline_layout(shader_name: &str, dst: &mut PipelineLayout, src: &PipelineLayout) {
    if src.has_push_constant() {
        dst.push_constant.shader_stage_flags |= src.push_constant.shader_stage_flags;
        dst.push_constant.byte_size = dst.push_constant.byte_size.max(src.push_constant.byte_size);
    }

    for set_index in 0..MAX_DESCRIPTOR_SET_COUNT {
        let src_set = &src.descriptor_set_layouts[set_index];
        if src_set.bindings.is_empty() {
            continue;
        }
        let dst_set = &mut dst.descriptor_set_layouts[set_index];
        dst_set.set = set_index as u32;
        if let Err(binding) = merge_set_layout(dst_set, src_set) {
            log::error!("shader '{shader_name}': set {set_index} binding {binding} has conflicting descriptor types");
            dst_set.bindings.clear();
        }
    }
    dst.descriptor_set_count = dst.descriptor_set_layouts.iter().filter(|l| !l.bindings.is_empty()).count() as u32;
}

fn merge_set_layout(dst: &mut DescriptorSetLayout, src: &DescriptorSetLayout) -> Result<(), u32> {
    for binding in &src.bindings {
        match dst.bindings.iter_mut().find(|b| b.binding == binding.binding) {
            Some(existing) if existing.descriptor_type != binding.descriptor_type => return Err(binding.binding),
            Some(existing) => {
                existing.shader_stage_flags |= binding.shader_stage_flags;
                existing.descriptor_count = existing.descriptor_count.max(binding.descriptor_count);
                existing.additional_flags |= binding.additional_flags;
            }
            None => dst.bindings.push(*binding),
        }
    }
    dst.bindings = dst.bindings.iter().copied().sorted_by_key(|b| b.binding).collect();
    Ok(())
}
