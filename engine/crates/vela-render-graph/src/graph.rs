//! 渲染图
//!
//! 按节点声明的输入 / 输出排序，按排序结果依次调用节点的生命周期方法，
//! 并根据声明的资源状态在节点之间自动插入 barrier。
//! 同一个描述可以为不同相机创建多个实例，实例名作为节点私有资源名的前缀。

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use vela_gfx::barrier::{BarrierBatch, BufferBarrier, ImageBarrier, infer_image_aspect};
use vela_gfx::command::RenderCommand;
use vela_gfx::descriptor::DescriptorCounts;
use vela_gfx::resource_desc::EngineImageCreationFlags;
use vela_gfx::resource_state::{ImageResourceState, ImageSubresourceRange};
use vela_gfx::{GfxBackend, RenderHandle};
use vela_render_interface::{DescriptorSetManager, GpuResourceManager, RenderCommandList};

use crate::context::{RenderGraphShare, RenderNodeContext};
use crate::dependency::DependencyAnalyzer;
use crate::desc::{NodeResource, NodeResourceKind, NodeResourceState, RenderNodeGraphDesc};
use crate::error::GraphError;
use crate::node::{ExecuteFlags, RenderNode, RenderNodeState};
use crate::registry::RenderNodeRegistry;

/// 一帧中渲染图的统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GraphFrameStats {
    pub nodes_executed: u32,
    pub nodes_skipped: u32,
    /// 真正写入后端的 descriptor set 更新
    pub descriptor_sets_written: u32,
    /// 内容没有变化而被跳过的更新
    pub descriptor_updates_skipped: u32,
    pub descriptor_update_errors: u32,
    pub barriers_recorded: u32,
    pub draw_or_dispatch_count: u32,
}
impl GraphFrameStats {
    pub fn accumulate(&mut self, other: &GraphFrameStats) {
        self.nodes_executed += other.nodes_executed;
        self.nodes_skipped += other.nodes_skipped;
        self.descriptor_sets_written += other.descriptor_sets_written;
        self.descriptor_updates_skipped += other.descriptor_updates_skipped;
        self.descriptor_update_errors += other.descriptor_update_errors;
        self.barriers_recorded += other.barriers_recorded;
        self.draw_or_dispatch_count += other.draw_or_dispatch_count;
    }
}

struct RenderNodeEntry {
    name: String,
    type_name: String,
    /// 销毁后为 None
    node: Option<Box<dyn RenderNode>>,
    state: RenderNodeState,
    params: serde_json::Value,
    inputs: Vec<NodeResource>,
    outputs: Vec<NodeResource>,
    descriptor_set_manager: DescriptorSetManager,
    command_list: RenderCommandList,
}

pub struct RenderNodeGraph {
    /// 实例名
    name: String,
    desc_name: String,
    /// 已经按依赖排好序
    nodes: Vec<RenderNodeEntry>,
    /// 渲染图跟踪的资源状态，跨帧保留
    resource_states: HashMap<String, NodeResourceState>,
}
// new & init
impl RenderNodeGraph {
    /// 从描述创建渲染图，节点此时还没有初始化
    ///
    /// `instance_name` 为空时使用描述中的名字。
    pub fn new(
        desc: &RenderNodeGraphDesc,
        instance_name: Option<&str>,
        registry: &RenderNodeRegistry,
        backend: &Arc<dyn GfxBackend>,
        buffering_count: u32,
        validation: bool,
        descriptor_pool_headroom: u32,
    ) -> Result<Self, GraphError> {
        let _span = tracy_client::span!("RenderNodeGraph::new");
        let name = instance_name.unwrap_or(&desc.name).to_string();

        let mut entries = Vec::with_capacity(desc.nodes.len());
        for node_desc in &desc.nodes {
            if entries.iter().any(|e: &RenderNodeEntry| e.name == node_desc.name) {
                return Err(GraphError::DuplicateNodeName(node_desc.name.clone()));
            }
            let node = registry
                .create(&node_desc.type_name)
                .ok_or_else(|| GraphError::UnknownNodeType(node_desc.type_name.clone()))?;
            let inputs = node_desc
                .inputs
                .iter()
                .map(|r| NodeResource::parse(&node_desc.name, r, false))
                .collect::<Result<Vec<_>, _>>()?;
            let outputs = node_desc
                .outputs
                .iter()
                .map(|r| NodeResource::parse(&node_desc.name, r, true))
                .collect::<Result<Vec<_>, _>>()?;

            entries.push(RenderNodeEntry {
                command_list: RenderCommandList::new(format!("{name}::{}", node_desc.name), validation),
                name: node_desc.name.clone(),
                type_name: node_desc.type_name.clone(),
                node: Some(node),
                state: RenderNodeState::Uninitialized,
                params: node_desc.params.clone(),
                inputs,
                outputs,
                descriptor_set_manager: DescriptorSetManager::new(
                    backend.clone(),
                    buffering_count,
                    validation,
                    descriptor_pool_headroom,
                ),
            });
        }

        let order = Self::execution_order(&entries)?;
        let mut slots: Vec<Option<RenderNodeEntry>> = entries.into_iter().map(Some).collect();
        let nodes: Vec<RenderNodeEntry> = order.iter().filter_map(|&i| slots[i].take()).collect();

        log::info!(
            "render node graph '{name}' created from '{}': [{}]",
            desc.name,
            nodes.iter().map(|n| n.name.as_str()).collect::<Vec<_>>().join(" -> ")
        );
        Ok(Self {
            name,
            desc_name: desc.name.clone(),
            nodes,
            resource_states: HashMap::new(),
        })
    }

    /// 资源名编号后做依赖分析和拓扑排序
    fn execution_order(entries: &[RenderNodeEntry]) -> Result<Vec<usize>, GraphError> {
        fn intern<'n>(ids: &mut IndexMap<&'n str, u32>, name: &'n str) -> u32 {
            let next = ids.len() as u32;
            *ids.entry(name).or_insert(next)
        }

        let mut resource_ids: IndexMap<&str, u32> = IndexMap::new();
        let mut reads = Vec::with_capacity(entries.len());
        let mut writes = Vec::with_capacity(entries.len());
        for entry in entries {
            let r: Vec<u32> = entry.inputs.iter().map(|res| intern(&mut resource_ids, &res.name)).collect();
            let w: Vec<u32> = entry.outputs.iter().map(|res| intern(&mut resource_ids, &res.name)).collect();
            reads.push(r);
            writes.push(w);
        }

        // 同一资源有多个 writer 时，后面的 writer 需要读取它，否则无法确定 reader 读取的是哪一个结果
        let mut first_writer: HashMap<u32, usize> = HashMap::new();
        for (node, w) in writes.iter().enumerate() {
            for &resource in w {
                match first_writer.get(&resource) {
                    None => {
                        first_writer.insert(resource, node);
                    }
                    Some(&first) if first != node && !reads[node].contains(&resource) => {
                        let resource_name = resource_ids
                            .get_index(resource as usize)
                            .map(|(name, _)| name.to_string())
                            .unwrap_or_default();
                        return Err(GraphError::DuplicateOutput {
                            resource: resource_name,
                            first: entries[first].name.clone(),
                            second: entries[node].name.clone(),
                        });
                    }
                    Some(_) => {}
                }
            }
        }

        DependencyAnalyzer::analyze(&reads, &writes)
            .topological_sort()
            .map_err(|cycle| GraphError::CycleDetected(cycle.iter().map(|&i| entries[i].name.clone()).collect()))
    }

    /// 初始化所有尚未初始化的节点，失败的节点标记为 invalid，不影响其他节点
    pub fn init(&mut self, share: RenderGraphShare<'_>) {
        let _span = tracy_client::span!("RenderNodeGraph::init");
        for entry in &mut self.nodes {
            if entry.state != RenderNodeState::Uninitialized {
                continue;
            }
            let RenderNodeEntry {
                name,
                type_name,
                node,
                state,
                params,
                inputs,
                outputs,
                descriptor_set_manager,
                ..
            } = entry;
            let Some(node) = node.as_mut() else {
                continue;
            };
            let mut ctx = RenderNodeContext::new(share, descriptor_set_manager, &self.name, name, params, inputs, outputs);
            *state = match node.init_node(&mut ctx) {
                Ok(()) => {
                    log::debug!("[{}] node '{name}' ({type_name}) initialized", self.name);
                    RenderNodeState::Valid
                }
                Err(err) => {
                    log::error!("[{}] node '{name}' ({type_name}) failed to initialize: {err}", self.name);
                    RenderNodeState::Invalid
                }
            };
        }
    }
}
// getters
impl RenderNodeGraph {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 创建该实例的描述名
    #[inline]
    pub fn desc_name(&self) -> &str {
        &self.desc_name
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// 执行顺序
    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    pub fn node_state(&self, node_name: &str) -> Option<RenderNodeState> {
        self.nodes.iter().find(|n| n.name == node_name).map(|n| n.state)
    }

    pub fn node_type_name(&self, node_name: &str) -> Option<&str> {
        self.nodes.iter().find(|n| n.name == node_name).map(|n| n.type_name.as_str())
    }

    pub fn descriptor_set_managers(&self) -> impl Iterator<Item = &DescriptorSetManager> {
        self.nodes.iter().map(|n| &n.descriptor_set_manager)
    }

    pub fn tracked_state(&self, resource: &str) -> Option<NodeResourceState> {
        self.resource_states.get(resource).copied()
    }
}
// frame
impl RenderNodeGraph {
    /// 所有节点的 `pre_execute_frame`，在任何节点的 `execute_frame` 之前完成
    pub fn pre_execute(&mut self, share: RenderGraphShare<'_>) {
        let _span = tracy_client::span!("RenderNodeGraph::pre_execute");
        for entry in &mut self.nodes {
            entry.descriptor_set_manager.begin_frame(share.frame_id);
            if entry.state != RenderNodeState::Valid {
                continue;
            }
            let RenderNodeEntry {
                name,
                node,
                params,
                inputs,
                outputs,
                descriptor_set_manager,
                ..
            } = entry;
            let Some(node) = node.as_mut() else {
                continue;
            };
            let mut ctx = RenderNodeContext::new(share, descriptor_set_manager, &self.name, name, params, inputs, outputs);
            node.pre_execute_frame(&mut ctx);
        }
    }

    /// 按顺序录制所有节点，并把节点的 descriptor 更新写入各自的 descriptor set manager
    pub fn execute(&mut self, share: RenderGraphShare<'_>) -> (Vec<RenderCommand>, GraphFrameStats) {
        let _span = tracy_client::span!("RenderNodeGraph::execute");
        let gpu = share.gpu_resource_manager;
        let mut stats = GraphFrameStats::default();
        let mut commands = Vec::new();

        self.reset_frame_border_states(gpu);

        for entry in &mut self.nodes {
            let RenderNodeEntry {
                name,
                node,
                state,
                params,
                inputs,
                outputs,
                descriptor_set_manager,
                command_list,
                ..
            } = entry;
            let Some(node) = node.as_mut().filter(|_| *state == RenderNodeState::Valid) else {
                stats.nodes_skipped += 1;
                continue;
            };
            if node.execute_flags().contains(ExecuteFlags::DO_NOT_EXECUTE) {
                stats.nodes_skipped += 1;
                continue;
            }

            command_list.barrier(Self::automatic_barriers(&mut self.resource_states, inputs, outputs, gpu));
            command_list.begin_debug_label(name.as_str());
            {
                let mut ctx =
                    RenderNodeContext::new(share, descriptor_set_manager, &self.name, name, params, inputs, outputs);
                node.execute_frame(&mut ctx, command_list);
            }
            command_list.add_custom_barrier_point();
            command_list.end_debug_label();

            stats.nodes_executed += 1;
            stats.barriers_recorded += command_list.barrier_count();
            stats.draw_or_dispatch_count += command_list.draw_or_dispatch_count();

            let (node_commands, updates) = command_list.take();
            for update in &updates {
                match descriptor_set_manager.apply_update(update, gpu) {
                    Ok(true) => stats.descriptor_sets_written += 1,
                    Ok(false) => stats.descriptor_updates_skipped += 1,
                    Err(err) => {
                        stats.descriptor_update_errors += 1;
                        log::error!("[{}] node '{name}': descriptor update failed: {err}", self.name);
                    }
                }
            }
            commands.extend(node_commands);
        }

        (commands, stats)
    }

    /// 节点之间的 barrier：从渲染图跟踪的状态转换到节点声明的状态
    ///
    /// 同一节点同时读写一个资源时以输出状态为准。
    fn automatic_barriers(
        resource_states: &mut HashMap<String, NodeResourceState>,
        inputs: &[NodeResource],
        outputs: &[NodeResource],
        gpu: &GpuResourceManager,
    ) -> BarrierBatch {
        let mut usage: IndexMap<&str, (bool, &NodeResource)> = IndexMap::new();
        for resource in inputs {
            usage.entry(resource.name.as_str()).or_insert((false, resource));
        }
        for resource in outputs {
            usage.insert(resource.name.as_str(), (true, resource));
        }

        let mut batch = BarrierBatch::default();
        for (name, (is_write, resource)) in usage {
            let handle = match resource.kind {
                NodeResourceKind::Image => gpu.get_image_handle(name),
                NodeResourceKind::Buffer => gpu.get_buffer_handle(name),
            }
            .map(|r| r.handle())
            .unwrap_or_default();
            if !handle.is_valid() {
                continue;
            }

            let current = *resource_states.entry(name.to_string()).or_insert(resource.initial_state);
            let layout_changed = match (current, resource.state) {
                (NodeResourceState::Image(src), NodeResourceState::Image(dst)) => {
                    let range = Self::whole_image_range(gpu, handle);
                    batch.add_image_barrier(ImageBarrier::new(handle, src, dst).with_range(range));
                    src.layout != dst.layout
                }
                (NodeResourceState::Buffer(src), NodeResourceState::Buffer(dst)) => {
                    batch.add_buffer_barrier(BufferBarrier::new(handle, src, dst));
                    false
                }
                _ => {
                    log::warn!("resource '{name}' declared as both image and buffer");
                    continue;
                }
            };
            if is_write || layout_changed {
                resource_states.insert(name.to_string(), resource.state);
            }
        }
        batch
    }

    fn whole_image_range(gpu: &GpuResourceManager, image: RenderHandle) -> ImageSubresourceRange {
        gpu.get_image_descriptor(image)
            .map(|desc| ImageSubresourceRange::whole(infer_image_aspect(desc.format)))
            .unwrap_or_default()
    }

    /// `RESET_STATE_ON_FRAME_BORDERS` 的 image 每帧从 UNDEFINED 开始
    fn reset_frame_border_states(&mut self, gpu: &GpuResourceManager) {
        for (name, state) in &mut self.resource_states {
            if !matches!(state, NodeResourceState::Image(_)) {
                continue;
            }
            let resets = gpu
                .get_image_handle(name)
                .and_then(|r| gpu.get_image_descriptor(r.handle()))
                .is_some_and(|desc| {
                    desc.engine_creation_flags
                        .contains(EngineImageCreationFlags::RESET_STATE_ON_FRAME_BORDERS)
                });
            if resets {
                *state = NodeResourceState::Image(ImageResourceState::UNDEFINED);
            }
        }
    }
}
// destroy
impl RenderNodeGraph {
    /// 释放所有节点，节点持有的资源引用随之释放，由资源管理器按各自的销毁策略回收
    pub fn destroy(&mut self) {
        for entry in &mut self.nodes {
            entry.node = None;
            entry.state = RenderNodeState::Destroyed;
            entry.command_list.reset();
            entry.descriptor_set_manager.reset_and_reserve(&DescriptorCounts::default());
        }
        log::info!("render node graph '{}' destroyed", self.name);
    }
}

#[cfg(test)]
mod tests {
    use ash::vk;
    use uuid::Uuid;
    use vela_gfx::HeadlessBackend;
    use vela_gfx::resource_desc::GpuImageDesc;
    use vela_render_interface::{RenderDataStoreManager, ShaderManager};

    use super::*;
    use crate::desc::RenderNodeGraphLoader;
    use crate::error::NodeError;
    use crate::node::RenderNodeType;
    use crate::nodes::{ObjectBufferKind, RenderNodeDefaultMaterialObjects};

    /// 每帧画一个三角形，`"fail": true` 时初始化失败
    #[derive(Default)]
    struct TestNode;
    impl RenderNodeType for TestNode {
        const UID: Uuid = Uuid::from_u128(0x7e57);
        const TYPE_NAME: &'static str = "TestNode";
    }
    impl RenderNode for TestNode {
        fn init_node(&mut self, ctx: &mut RenderNodeContext<'_>) -> Result<(), NodeError> {
            if ctx.params().get("fail").and_then(|v| v.as_bool()).unwrap_or(false) {
                return Err(NodeError::InvalidParams("fail".to_string()));
            }
            Ok(())
        }

        fn pre_execute_frame(&mut self, _ctx: &mut RenderNodeContext<'_>) {}

        fn execute_flags(&self) -> ExecuteFlags {
            ExecuteFlags::empty()
        }

        fn execute_frame(&mut self, _ctx: &mut RenderNodeContext<'_>, cmd_list: &mut RenderCommandList) {
            cmd_list.draw(3, 1, 0, 0);
        }
    }

    struct Env {
        backend: Arc<dyn GfxBackend>,
        gpu: GpuResourceManager,
        shaders: ShaderManager,
        stores: RenderDataStoreManager,
        registry: RenderNodeRegistry,
    }
    impl Env {
        fn new() -> Self {
            let backend: Arc<dyn GfxBackend> = Arc::new(HeadlessBackend::new());
            let mut registry = RenderNodeRegistry::with_builtin_nodes();
            assert!(registry.register::<TestNode>());
            Self {
                gpu: GpuResourceManager::new(backend.clone(), 2, true),
                shaders: ShaderManager::new(backend.clone()),
                stores: RenderDataStoreManager::new(),
                registry,
                backend,
            }
        }

        fn share(&self, frame_id: u64) -> RenderGraphShare<'_> {
            RenderGraphShare {
                gpu_resource_manager: &self.gpu,
                shader_manager: &self.shaders,
                render_data_store_manager: &self.stores,
                frame_id,
                validation: true,
            }
        }

        fn graph(&self, json: &str, instance_name: Option<&str>) -> Result<RenderNodeGraph, GraphError> {
            let desc = RenderNodeGraphLoader::load_str(json).unwrap();
            RenderNodeGraph::new(&desc, instance_name, &self.registry, &self.backend, 2, true, 0)
        }

        fn run_frame(&self, graph: &mut RenderNodeGraph, frame_id: u64) -> GraphFrameStats {
            self.gpu.begin_frame(frame_id);
            self.gpu.set_render_window(true);
            graph.pre_execute(self.share(frame_id));
            let (_, stats) = graph.execute(self.share(frame_id));
            self.gpu.set_render_window(false);
            self.backend.end_frame(frame_id);
            self.gpu.end_frame();
            stats
        }
    }

    #[test]
    fn test_execution_order_follows_resources() {
        let env = Env::new();
        let graph = env
            .graph(
                r#"{
                    "name": "main",
                    "nodes": [
                        { "type": "TestNode", "name": "post", "inputs": [{ "name": "lit" }], "outputs": [{ "name": "final" }] },
                        { "type": "TestNode", "name": "gbuffer", "outputs": [{ "name": "albedo" }] },
                        { "type": "TestNode", "name": "lighting", "inputs": [{ "name": "albedo" }], "outputs": [{ "name": "lit" }] },
                        { "type": "TestNode", "name": "ui" }
                    ]
                }"#,
                None,
            )
            .unwrap();
        assert_eq!(graph.node_names(), vec!["gbuffer", "lighting", "post", "ui"]);
        assert_eq!(graph.name(), "main");
        assert_eq!(graph.node_type_name("ui"), Some("TestNode"));
    }

    #[test]
    fn test_build_errors() {
        let env = Env::new();
        let err = env
            .graph(r#"{ "name": "g", "nodes": [{ "type": "NoSuchNode", "name": "a" }] }"#, None)
            .err()
            .unwrap();
        assert!(matches!(err, GraphError::UnknownNodeType(ty) if ty == "NoSuchNode"));

        let err = env
            .graph(
                r#"{ "name": "g", "nodes": [
                    { "type": "TestNode", "name": "a", "outputs": [{ "name": "color" }] },
                    { "type": "TestNode", "name": "b", "outputs": [{ "name": "color" }] }
                ] }"#,
                None,
            )
            .err()
            .unwrap();
        assert!(matches!(err, GraphError::DuplicateOutput { ref resource, .. } if resource == "color"));

        let err = env
            .graph(
                r#"{ "name": "g", "nodes": [
                    { "type": "TestNode", "name": "x", "inputs": [{ "name": "r2" }], "outputs": [{ "name": "r1" }] },
                    { "type": "TestNode", "name": "y", "inputs": [{ "name": "r1" }], "outputs": [{ "name": "r2" }] }
                ] }"#,
                None,
            )
            .err()
            .unwrap();
        assert!(matches!(err, GraphError::CycleDetected(nodes) if nodes == vec!["x", "y"]));

        let err = env
            .graph(
                r#"{ "name": "g", "nodes": [
                    { "type": "TestNode", "name": "a" },
                    { "type": "TestNode", "name": "a" }
                ] }"#,
                None,
            )
            .err()
            .unwrap();
        assert!(matches!(err, GraphError::DuplicateNodeName(name) if name == "a"));
    }

    #[test]
    fn test_read_write_chain_allows_second_writer() {
        let env = Env::new();
        let graph = env
            .graph(
                r#"{ "name": "g", "nodes": [
                    { "type": "TestNode", "name": "present", "inputs": [{ "name": "color" }] },
                    { "type": "TestNode", "name": "opaque", "outputs": [{ "name": "color" }] },
                    { "type": "TestNode", "name": "overlay", "inputs": [{ "name": "color" }], "outputs": [{ "name": "color" }] }
                ] }"#,
                None,
            )
            .unwrap();
        // 只读的节点依赖最后一个 writer
        assert_eq!(graph.node_names(), vec!["opaque", "overlay", "present"]);
    }

    #[test]
    fn test_invalid_node_is_skipped() {
        let env = Env::new();
        let mut graph = env
            .graph(
                r#"{ "name": "g", "nodes": [
                    { "type": "TestNode", "name": "broken", "params": { "fail": true } },
                    { "type": "TestNode", "name": "ok" }
                ] }"#,
                None,
            )
            .unwrap();
        assert_eq!(graph.node_state("broken"), Some(RenderNodeState::Uninitialized));
        graph.init(env.share(0));
        assert_eq!(graph.node_state("broken"), Some(RenderNodeState::Invalid));
        assert_eq!(graph.node_state("ok"), Some(RenderNodeState::Valid));

        for frame_id in 1..=3 {
            let stats = env.run_frame(&mut graph, frame_id);
            assert_eq!(stats.nodes_executed, 1);
            assert_eq!(stats.nodes_skipped, 1);
            assert_eq!(stats.draw_or_dispatch_count, 1);
        }

        graph.destroy();
        assert_eq!(graph.node_state("ok"), Some(RenderNodeState::Destroyed));
        let stats = env.run_frame(&mut graph, 4);
        assert_eq!(stats.nodes_executed, 0);
    }

    #[test]
    fn test_automatic_barriers() {
        let env = Env::new();
        let color = env.gpu.create_image(
            "color",
            &GpuImageDesc::new_2d(
                32,
                32,
                vk::Format::R8G8B8A8_UNORM,
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            ),
        );
        assert!(color.is_valid());
        let mut graph = env
            .graph(
                r#"{ "name": "g", "nodes": [
                    { "type": "TestNode", "name": "draw", "outputs": [{ "name": "color" }] },
                    { "type": "TestNode", "name": "sample", "inputs": [{ "name": "color", "state": "shader_read_fragment" }] },
                    { "type": "TestNode", "name": "missing", "inputs": [{ "name": "not_created" }] }
                ] }"#,
                None,
            )
            .unwrap();
        graph.init(env.share(0));

        // UNDEFINED -> COLOR_ATTACHMENT -> SHADER_READ，不存在的资源不产生 barrier
        let stats = env.run_frame(&mut graph, 1);
        assert_eq!(stats.barriers_recorded, 2);
        assert_eq!(
            graph.tracked_state("color"),
            Some(NodeResourceState::Image(ImageResourceState::SHADER_READ_FRAGMENT))
        );

        // 状态跨帧保留：SHADER_READ -> COLOR_ATTACHMENT -> SHADER_READ
        let stats = env.run_frame(&mut graph, 2);
        assert_eq!(stats.barriers_recorded, 2);
        assert_eq!(graph.tracked_state("not_created"), None);
    }

    #[test]
    fn test_frame_border_reset() {
        let env = Env::new();
        let mut desc = GpuImageDesc::new_2d(16, 16, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::SAMPLED);
        desc.engine_creation_flags = EngineImageCreationFlags::RESET_STATE_ON_FRAME_BORDERS;
        let _scratch = env.gpu.create_image("scratch", &desc);
        let _stable = env.gpu.create_image(
            "stable",
            &GpuImageDesc::new_2d(16, 16, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::SAMPLED),
        );
        let mut graph = env
            .graph(
                r#"{ "name": "g", "nodes": [
                    { "type": "TestNode", "name": "read", "inputs": [
                        { "name": "scratch", "state": "shader_read_compute" },
                        { "name": "stable", "state": "shader_read_compute" }
                    ] }
                ] }"#,
                None,
            )
            .unwrap();
        graph.init(env.share(0));

        let stats = env.run_frame(&mut graph, 1);
        assert_eq!(stats.barriers_recorded, 2);
        // 只有 scratch 重新从 UNDEFINED 开始，只读到只读不需要 barrier
        for frame_id in 2..=3 {
            let stats = env.run_frame(&mut graph, frame_id);
            assert_eq!(stats.barriers_recorded, 1);
        }
        assert_eq!(
            graph.tracked_state("scratch"),
            Some(NodeResourceState::Image(ImageResourceState::SHADER_READ_COMPUTE))
        );
    }

    #[test]
    fn test_instances_use_separate_local_resources() {
        let env = Env::new();
        let json = r#"{ "name": "scene", "nodes": [{ "type": "RenderNodeDefaultMaterialObjects", "name": "objects" }] }"#;
        let mut cam0 = env.graph(json, Some("cam0")).unwrap();
        let mut cam1 = env.graph(json, Some("cam1")).unwrap();
        cam0.init(env.share(0));
        cam1.init(env.share(0));

        assert_eq!(cam0.desc_name(), "scene");
        assert_eq!(cam1.name(), "cam1");
        let mesh0 = env.gpu.get_buffer_handle(&format!("cam0_objects_{}", ObjectBufferKind::Mesh.suffix()));
        let mesh1 = env.gpu.get_buffer_handle(&format!("cam1_objects_{}", ObjectBufferKind::Mesh.suffix()));
        assert_ne!(mesh0.unwrap().handle(), mesh1.unwrap().handle());
        assert_eq!(cam0.node_type_name("objects"), Some(RenderNodeDefaultMaterialObjects::TYPE_NAME));
    }
}
