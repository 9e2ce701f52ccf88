//! Vela 渲染器
//!
//! 把后端、资源管理器和渲染图实例组合在一起，按帧驱动：
//!
//! - `settings`: TOML 配置
//! - `renderer`: 帧循环与渲染图实例管理

pub mod renderer;
pub mod settings;

pub use renderer::{RenderFrameStats, Renderer};
pub use settings::RendererSettings;

pub use vela_gfx as gfx;
pub use vela_render_graph as render_graph;
pub use vela_render_interface as render_interface;
