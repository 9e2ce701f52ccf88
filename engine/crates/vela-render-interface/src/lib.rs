//! 渲染节点与 GPU 之间的接口层
//!
//! - `gpu_resource_manager`: buffer / image / sampler / 加速结构的创建、映射和延迟销毁
//! - `descriptor_set_manager` / `descriptor_set_binder`: 按 pipeline layout 分配 descriptor set，绑定资源并去重更新
//! - `render_command_list`: 节点录制命令的地方
//! - `shader_manager`: shader 反射数据与 pipeline
//! - `render_data_store`: 场景侧提供给节点的数据

pub mod descriptor_set_binder;
pub mod descriptor_set_manager;
pub mod error;
pub mod frame_counter;
pub mod gpu_resource_manager;
pub mod render_command_list;
pub mod render_data_store;
pub mod resolver;
pub mod shader_manager;

pub use descriptor_set_binder::{BoundResource, DescriptorSetBinder, DescriptorSetLayoutBindingResources};
pub use descriptor_set_manager::DescriptorSetManager;
pub use error::DescriptorError;
pub use frame_counter::FrameCounter;
pub use gpu_resource_manager::{GpuResourceManager, ImageUpload, MappedBuffer};
pub use render_command_list::RenderCommandList;
pub use render_data_store::{
    DefaultMaterialDataStore, LightDataStore, ObjectCounts, RenderDataStore, RenderDataStoreManager,
};
pub use resolver::FrameResolver;
pub use shader_manager::ShaderManager;
