//! Vela GFX 层
//!
//! 渲染图和具体图形 API 之间的边界：
//!
//! - `resource_desc`: buffer / image / sampler / 加速结构的创建描述（纯数据）
//! - `handle`: 轻量句柄 `RenderHandle` 和带引用计数的 `RenderHandleReference`
//! - `pipeline_layout`: 从 shader 反射得到的 descriptor set 布局
//! - `resource_state` / `barrier`: 资源状态以及 barrier 描述
//! - `command`: 录制好的渲染命令
//! - `backend`: 后端 trait，由 Vulkan / GLES 等实现
//! - `headless`: 纯 CPU 的后端实现，用于离屏运行和测试

pub mod backend;
pub mod barrier;
pub mod command;
pub mod descriptor;
pub mod error;
pub mod handle;
pub mod headless;
pub mod pipeline_layout;
pub mod resource_desc;
pub mod resource_state;

pub use backend::{
    BackendAccelerationStructureId, BackendBufferId, BackendDescriptorPoolId, BackendDescriptorSetId,
    BackendImageId, BackendPipelineId, BackendResolver, BackendSamplerId, DeviceLimits, GfxBackend, PipelineDesc,
    ResolvedBuffer, ResolvedImage,
};
pub use headless::HeadlessBackend;
pub use error::ResourceError;
pub use handle::{RenderHandle, RenderHandleReference, RenderHandleType, WeakRenderHandleReference};
