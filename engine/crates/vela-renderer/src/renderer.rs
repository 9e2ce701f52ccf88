use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use rayon::prelude::*;
use vela_gfx::GfxBackend;
use vela_gfx::command::RenderCommand;
use vela_render_graph::{
    GraphError, GraphFrameStats, RenderGraphShare, RenderNodeGraph, RenderNodeGraphDesc, RenderNodeGraphLoader,
    RenderNodeRegistry,
};
use vela_render_interface::{FrameCounter, FrameResolver, GpuResourceManager, RenderDataStoreManager, ShaderManager};

use crate::settings::RendererSettings;

/// 一帧的统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderFrameStats {
    pub frame_id: u64,
    pub graph_count: u32,
    /// 所有渲染图的统计之和
    pub graphs: GraphFrameStats,
    pub staging_command_count: u32,
    pub command_count: u32,
    pub submitted: bool,
}

/// 渲染器
///
/// 持有后端和所有管理器，按帧驱动渲染图。
///
/// # 帧流程
/// ```ignore
/// // 等待 ring 中同一位置的上一帧
/// // 初始化新建的渲染图节点
/// // 所有节点 pre_execute_frame
/// // 所有节点 execute_frame（可选并行）
/// // staging 命令 + 节点命令一起提交
/// // 结束帧，回收资源
/// ```
pub struct Renderer {
    settings: RendererSettings,
    backend: Arc<dyn GfxBackend>,

    gpu_resource_manager: GpuResourceManager,
    shader_manager: ShaderManager,
    render_data_store_manager: RenderDataStoreManager,
    registry: RenderNodeRegistry,

    frame_counter: FrameCounter,
    /// 按创建顺序执行
    graphs: Vec<RenderNodeGraph>,
    last_frame_stats: RenderFrameStats,
}
// new & init
impl Renderer {
    pub fn new(backend: Arc<dyn GfxBackend>, settings: RendererSettings) -> Self {
        let _span = tracy_client::span!("Renderer::new");
        let settings = settings.sanitized();
        let buffering_count = settings.buffering_count;

        log::info!(
            "renderer created on '{}' backend, buffering count: {buffering_count}, validation: {}",
            backend.name(),
            settings.validation
        );
        Self {
            gpu_resource_manager: GpuResourceManager::new(backend.clone(), buffering_count, settings.validation),
            shader_manager: ShaderManager::new(backend.clone()),
            render_data_store_manager: RenderDataStoreManager::new(),
            registry: RenderNodeRegistry::with_builtin_nodes(),
            frame_counter: FrameCounter::new(buffering_count),
            graphs: Vec::new(),
            last_frame_stats: RenderFrameStats::default(),
            backend,
            settings,
        }
    }

    pub fn from_settings_file(backend: Arc<dyn GfxBackend>, path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let settings = RendererSettings::load(path)
            .with_context(|| format!("failed to load renderer settings from {}", path.display()))?;
        Ok(Self::new(backend, settings))
    }
}
// getters
impl Renderer {
    #[inline]
    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    #[inline]
    pub fn backend(&self) -> &Arc<dyn GfxBackend> {
        &self.backend
    }

    #[inline]
    pub fn gpu_resource_manager(&self) -> &GpuResourceManager {
        &self.gpu_resource_manager
    }

    #[inline]
    pub fn shader_manager(&self) -> &ShaderManager {
        &self.shader_manager
    }

    #[inline]
    pub fn render_data_store_manager(&self) -> &RenderDataStoreManager {
        &self.render_data_store_manager
    }

    #[inline]
    pub fn render_data_store_manager_mut(&mut self) -> &mut RenderDataStoreManager {
        &mut self.render_data_store_manager
    }

    #[inline]
    pub fn registry(&self) -> &RenderNodeRegistry {
        &self.registry
    }

    /// 在创建渲染图之前注册自定义节点
    #[inline]
    pub fn registry_mut(&mut self) -> &mut RenderNodeRegistry {
        &mut self.registry
    }

    #[inline]
    pub fn frame_counter(&self) -> &FrameCounter {
        &self.frame_counter
    }

    #[inline]
    pub fn last_frame_stats(&self) -> RenderFrameStats {
        self.last_frame_stats
    }

    pub fn graph(&self, name: &str) -> Option<&RenderNodeGraph> {
        self.graphs.iter().find(|g| g.name() == name)
    }

    pub fn graph_names(&self) -> Vec<&str> {
        self.graphs.iter().map(RenderNodeGraph::name).collect()
    }
}
// graph
impl Renderer {
    /// 从描述创建渲染图实例，节点在下一帧开始时初始化
    ///
    /// 同一描述可以用不同的 `instance_name` 为多个相机创建实例；同名实例会被替换。
    pub fn create_graph(&mut self, desc: &RenderNodeGraphDesc, instance_name: Option<&str>) -> Result<(), GraphError> {
        let graph = RenderNodeGraph::new(
            desc,
            instance_name,
            &self.registry,
            &self.backend,
            self.settings.buffering_count,
            self.settings.validation,
            self.settings.descriptor_pool_headroom,
        )?;
        if self.remove_graph(graph.name()) {
            log::info!("render node graph '{}' replaced", graph.name());
        }
        self.graphs.push(graph);
        Ok(())
    }

    pub fn load_graph_file(&mut self, path: impl AsRef<Path>, instance_name: Option<&str>) -> Result<(), GraphError> {
        let desc = RenderNodeGraphLoader::load_file(path)?;
        self.create_graph(&desc, instance_name)
    }

    /// 节点持有的资源按各自的销毁策略在之后的帧中回收
    pub fn remove_graph(&mut self, name: &str) -> bool {
        let Some(index) = self.graphs.iter().position(|g| g.name() == name) else {
            return false;
        };
        let mut graph = self.graphs.remove(index);
        graph.destroy();
        true
    }
}
// frame
impl Renderer {
    pub fn render_frame(&mut self) -> RenderFrameStats {
        let _span = tracy_client::span!("Renderer::render_frame");
        let frame_id = self.frame_counter.next_frame();

        // 等待 ring 中同一位置的帧完成，之后可以安全地复用它的资源
        {
            let _span = tracy_client::span!("wait frame");
            let wait_frame_id = self.frame_counter.frame_to_wait();
            if wait_frame_id > 0 {
                self.backend.wait_for_frame(wait_frame_id);
            }
        }

        self.gpu_resource_manager.begin_frame(frame_id);
        self.render_data_store_manager.pre_render();

        let share = RenderGraphShare {
            gpu_resource_manager: &self.gpu_resource_manager,
            shader_manager: &self.shader_manager,
            render_data_store_manager: &self.render_data_store_manager,
            frame_id,
            validation: self.settings.validation,
        };
        for graph in &mut self.graphs {
            graph.init(share);
        }

        self.gpu_resource_manager.set_render_window(true);
        for graph in &mut self.graphs {
            graph.pre_execute(share);
        }
        let recorded: Vec<(Vec<RenderCommand>, GraphFrameStats)> = if self.settings.parallel_graph_recording {
            self.graphs.par_iter_mut().map(|graph| graph.execute(share)).collect()
        } else {
            self.graphs.iter_mut().map(|graph| graph.execute(share)).collect()
        };
        self.gpu_resource_manager.set_render_window(false);

        // staging 上传在所有节点之前执行
        let mut commands = self.gpu_resource_manager.take_staging_commands();
        let mut stats = RenderFrameStats {
            frame_id,
            graph_count: self.graphs.len() as u32,
            staging_command_count: commands.len() as u32,
            ..Default::default()
        };
        for (graph_commands, graph_stats) in recorded {
            stats.graphs.accumulate(&graph_stats);
            commands.extend(graph_commands);
        }
        stats.command_count = commands.len() as u32;

        {
            let _span = tracy_client::span!("submit");
            let resolver = FrameResolver::new(&self.gpu_resource_manager, &self.shader_manager)
                .with_descriptor_set_managers(self.graphs.iter().flat_map(|g| g.descriptor_set_managers()));
            match self.backend.submit(frame_id, &commands, &resolver) {
                Ok(()) => stats.submitted = true,
                Err(err) => log::error!("{} submit failed: {err}", self.frame_counter.frame_name()),
            }
        }

        self.backend.end_frame(frame_id);
        self.gpu_resource_manager.end_frame();
        self.render_data_store_manager.post_render();

        self.last_frame_stats = stats;
        tracy_client::frame_mark();
        stats
    }

    /// 等待 GPU 空闲并回收所有待销毁的资源
    pub fn wait_for_idle(&self) {
        self.gpu_resource_manager.wait_for_idle();
    }

    /// 锁定期间资源管理器不再创建或销毁后端对象
    pub fn set_lock_resource_backend_access(&self, locked: bool) {
        self.gpu_resource_manager.set_lock_resource_backend_access(locked);
    }
}
// destroy
impl Renderer {
    pub fn destroy(mut self) {
        let _span = tracy_client::span!("Renderer::destroy");
        self.backend.wait_idle();
        for graph in &mut self.graphs {
            graph.destroy();
        }
        self.graphs.clear();
        self.gpu_resource_manager.wait_for_idle();
        log::info!("renderer destroyed after {} frames", self.frame_counter.frame_id());
    }
}

#[cfg(test)]
mod tests {
    use vela_gfx::HeadlessBackend;
    use vela_render_graph::RenderNodeGraphLoader;

    use super::*;

    fn settings(buffering_count: u32) -> RendererSettings {
        RendererSettings {
            buffering_count,
            validation: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_waits_for_ring_slot() {
        // latency 不超过 buffering count 时不需要真正等待
        let backend = Arc::new(HeadlessBackend::new().with_latency(1));
        let mut renderer = Renderer::new(backend.clone(), settings(2));
        for expected in 1..=4 {
            assert_eq!(renderer.render_frame().frame_id, expected);
        }
        assert_eq!(backend.stats().frame_waits, 0);
        assert_eq!(backend.stats().submissions, 4);

        let backend = Arc::new(HeadlessBackend::new().with_latency(2));
        let mut renderer = Renderer::new(backend.clone(), settings(2));
        for _ in 0..4 {
            renderer.render_frame();
        }
        // 第 3、4 帧分别等待第 1、2 帧
        assert_eq!(backend.stats().frame_waits, 2);
        assert_eq!(renderer.frame_counter().frame_id(), 4);
    }

    #[test]
    fn test_settings_are_sanitized() {
        let renderer = Renderer::new(Arc::new(HeadlessBackend::new()), settings(0));
        assert_eq!(renderer.settings().buffering_count, 1);
        assert_eq!(renderer.gpu_resource_manager().buffering_count(), 1);
        assert_eq!(renderer.frame_counter().buffering_count(), 1);
    }

    #[test]
    fn test_graph_instances() {
        let mut renderer = Renderer::new(Arc::new(HeadlessBackend::new()), settings(2));
        let desc = RenderNodeGraphLoader::load_str(
            r#"{ "name": "main", "nodes": [{ "type": "RenderNodeDefaultMaterialObjects", "name": "objects" }] }"#,
        )
        .unwrap();

        renderer.create_graph(&desc, None).unwrap();
        renderer.create_graph(&desc, Some("cam1")).unwrap();
        // 同名实例被替换
        renderer.create_graph(&desc, Some("cam1")).unwrap();
        assert_eq!(renderer.graph_names(), vec!["main", "cam1"]);
        assert_eq!(renderer.graph("cam1").map(RenderNodeGraph::desc_name), Some("main"));

        let stats = renderer.render_frame();
        assert_eq!(stats.graph_count, 2);
        assert_eq!(stats.graphs.nodes_executed, 2);
        assert!(stats.submitted);
        assert_eq!(renderer.last_frame_stats(), stats);

        assert!(renderer.remove_graph("main"));
        assert!(!renderer.remove_graph("main"));
        assert_eq!(renderer.graph_names(), vec!["cam1"]);
    }

    #[test]
    fn test_unknown_node_type() {
        let mut renderer = Renderer::new(Arc::new(HeadlessBackend::new()), settings(2));
        let desc =
            RenderNodeGraphLoader::load_str(r#"{ "name": "main", "nodes": [{ "type": "Missing", "name": "a" }] }"#)
                .unwrap();
        assert!(matches!(renderer.create_graph(&desc, None), Err(GraphError::UnknownNodeType(_))));
        assert!(renderer.graph_names().is_empty());
    }

    #[test]
    fn test_from_settings_file() {
        let backend: Arc<dyn GfxBackend> = Arc::new(HeadlessBackend::new());
        let path = std::env::temp_dir().join(format!("vela_renderer_settings_{}.toml", std::process::id()));
        std::fs::write(&path, "buffering_count = 2\nparallel_graph_recording = true\n").unwrap();
        let renderer = Renderer::from_settings_file(backend.clone(), &path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(renderer.settings().buffering_count, 2);
        assert!(renderer.settings().parallel_graph_recording);

        let err = Renderer::from_settings_file(backend, path.with_extension("missing")).err().unwrap();
        assert!(err.to_string().contains("failed to load renderer settings"));
    }
}
