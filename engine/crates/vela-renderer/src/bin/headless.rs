//! 离屏运行一个小的渲染图：材质数据上传、阴影模糊和 tonemap
//!
//! ```text
//! vela-headless [settings.toml] [frame count]
//! ```

use std::sync::Arc;

use anyhow::{Context, bail};
use ash::vk;
use glam::{Mat4, Vec4};
use vela_crate_tools::LogContext;
use vela_gfx::{HeadlessBackend, RenderHandleReference};
use vela_gfx::resource_desc::GpuImageDesc;
use vela_render_graph::RenderNodeGraphLoader;
use vela_render_interface::render_data_store::{LightUniform, MaterialUniform, MeshUniform};
use vela_render_interface::{DefaultMaterialDataStore, LightDataStore};
use vela_renderer::{Renderer, RendererSettings};
use vela_shader_reflect::{BlobBinding, ReflectionBlobBuilder};

const GRAPH: &str = r#"{
    "name": "headless",
    "nodes": [
        { "type": "RenderNodeDefaultMaterialObjects", "name": "objects" },
        {
            "type": "RenderNodeDefaultShadowsBlur",
            "name": "shadow_blur",
            "inputs": [{ "name": "shadow_map", "state": "shader_read_fragment" }],
            "outputs": [{ "name": "shadow_map", "state": "shader_read_fragment" }]
        },
        {
            "type": "RenderNodeComputeGeneric",
            "name": "tonemap",
            "inputs": [{ "name": "hdr", "state": "shader_read_compute" }],
            "outputs": [{ "name": "ldr", "state": "storage_write" }],
            "params": { "shader": "tonemap", "dispatch_image": "ldr" }
        }
    ]
}"#;

/// 一个 combined image sampler 加一个 storage image 的 compute shader
fn compute_shader_blob(push_constant_size: Option<u16>) -> Vec<u8> {
    let mut builder = ReflectionBlobBuilder::new(1, vk::ShaderStageFlags::COMPUTE.as_raw() as u16);
    builder.push_constant = push_constant_size;
    builder.sets = Some(vec![(
        0,
        vec![
            BlobBinding::new(0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER.as_raw() as u16),
            BlobBinding::new(1, vk::DescriptorType::STORAGE_IMAGE.as_raw() as u16),
        ],
    )]);
    builder.local_size = Some([8, 8, 1]);
    builder.build()
}

/// 返回场景持有的 image，名字表只保存弱引用
fn setup_scene(renderer: &mut Renderer) -> anyhow::Result<Vec<RenderHandleReference>> {
    let shaders = renderer.shader_manager();
    if !shaders.create_shader("tonemap", &[&compute_shader_blob(None)]).is_valid() {
        bail!("failed to create shader 'tonemap'");
    }
    if !shaders.create_shader("shadow_blur", &[&compute_shader_blob(Some(16))]).is_valid() {
        bail!("failed to create shader 'shadow_blur'");
    }

    let gpu = renderer.gpu_resource_manager();
    let images = [
        ("hdr", vk::Format::R16G16B16A16_SFLOAT, vk::ImageUsageFlags::SAMPLED),
        ("ldr", vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::STORAGE),
        (
            "shadow_map",
            vk::Format::R16G16_SFLOAT,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE,
        ),
    ];
    let mut scene_images = Vec::with_capacity(images.len());
    for (name, format, usage) in images {
        let image = gpu.create_image(name, &GpuImageDesc::new_2d(1280, 720, format, usage));
        if !image.is_valid() {
            bail!("failed to create image '{name}'");
        }
        scene_images.push(image);
    }

    let stores = renderer.render_data_store_manager_mut();
    stores.register(Box::new(DefaultMaterialDataStore::default()));
    stores.register(Box::new(LightDataStore::default()));
    Ok(scene_images)
}

/// 模拟场景每帧提交的数据，数量逐渐增长
fn fill_frame_data(renderer: &mut Renderer, frame_index: u32) {
    let stores = renderer.render_data_store_manager_mut();
    if let Some(store) = stores.get_mut::<DefaultMaterialDataStore>(DefaultMaterialDataStore::DEFAULT_NAME) {
        let object_count = 16 * (frame_index + 1);
        for i in 0..object_count {
            let world = Mat4::from_translation([i as f32, 0.0, 0.0].into());
            store.meshes.push(MeshUniform {
                world_from_model: world,
                prev_world_from_model: world,
            });
        }
        store.materials.push(MaterialUniform {
            base_color: Vec4::ONE,
            ..Default::default()
        });
    }
    if let Some(store) = stores.get_mut::<LightDataStore>(LightDataStore::DEFAULT_NAME) {
        store.lights.push(LightUniform {
            direction: Vec4::new(0.0, -1.0, 0.0, 0.0),
            flags: [0, 1, 0, 0],
            ..Default::default()
        });
    }
}

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let settings = match args.next() {
        Some(path) => {
            RendererSettings::load(&path).with_context(|| format!("failed to load renderer settings from {path}"))?
        }
        None => RendererSettings::default(),
    };
    let frame_count: u32 = match args.next() {
        Some(count) => count.parse().with_context(|| format!("invalid frame count '{count}'"))?,
        None => 8,
    };

    let _log = LogContext::install(settings.log.clone());
    tracy_client::Client::start();
    tracy_client::set_thread_name!("RenderThread");

    let backend = Arc::new(HeadlessBackend::new().with_latency(1));
    let mut renderer = Renderer::new(backend.clone(), settings);
    let scene_images = setup_scene(&mut renderer)?;

    let desc = RenderNodeGraphLoader::load_str(GRAPH)?;
    renderer.create_graph(&desc, Some("camera_main"))?;
    renderer.create_graph(&desc, Some("camera_shadow"))?;

    for frame_index in 0..frame_count {
        fill_frame_data(&mut renderer, frame_index);
        let stats = renderer.render_frame();
        log::info!(
            "frame {}: {} nodes executed, {} skipped, {} descriptor sets written, {} commands",
            stats.frame_id,
            stats.graphs.nodes_executed,
            stats.graphs.nodes_skipped,
            stats.graphs.descriptor_sets_written,
            stats.command_count
        );
    }

    drop(scene_images);
    renderer.destroy();
    let stats = backend.stats();
    log::info!(
        "backend: {} submissions, {} dispatches, {} barriers, {} frame waits",
        stats.submissions,
        stats.dispatches,
        stats.barriers,
        stats.frame_waits
    );
    Ok(())
}
