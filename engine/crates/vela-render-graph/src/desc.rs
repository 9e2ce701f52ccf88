//! 渲染图的 JSON 描述
//!
//! ```json
//! {
//!   "name": "main",
//!   "nodes": [
//!     {
//!       "type": "RenderNodeDefaultShadowsBlur",
//!       "name": "shadow_blur",
//!       "inputs": [{ "name": "shadow_map", "state": "shader_read_compute" }],
//!       "outputs": [{ "name": "shadow_map", "state": "shader_read" }],
//!       "params": { "shader": "shadow_blur" }
//!     }
//!   ]
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use vela_gfx::resource_state::{BufferResourceState, ImageResourceState};

use crate::error::GraphError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeResourceKind {
    #[default]
    Image,
    Buffer,
}

/// 节点声明的输入或输出资源，按名字在 `GpuResourceManager` 中查找
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeResourceDesc {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: NodeResourceKind,
    /// 节点执行时资源需要处于的状态，名字见 `ImageResourceState::from_name` / `BufferResourceState::from_name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// 渲染图第一次使用该资源之前的状态，默认 undefined
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_state: Option<String>,
}
impl NodeResourceDesc {
    pub fn image(name: impl Into<String>, state: &str) -> Self {
        Self {
            name: name.into(),
            kind: NodeResourceKind::Image,
            state: Some(state.to_string()),
            initial_state: None,
        }
    }

    pub fn buffer(name: impl Into<String>, state: &str) -> Self {
        Self {
            name: name.into(),
            kind: NodeResourceKind::Buffer,
            state: Some(state.to_string()),
            initial_state: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RenderNodeDesc {
    /// 注册表中的类型名
    #[serde(rename = "type")]
    pub type_name: String,
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<NodeResourceDesc>,
    #[serde(default)]
    pub outputs: Vec<NodeResourceDesc>,
    /// 节点自己解释的参数
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RenderNodeGraphDesc {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<RenderNodeDesc>,
}

/// 解析后的资源状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeResourceState {
    Image(ImageResourceState),
    Buffer(BufferResourceState),
}
impl NodeResourceState {
    pub fn is_write(&self) -> bool {
        match self {
            NodeResourceState::Image(state) => state.is_write(),
            NodeResourceState::Buffer(state) => state.is_write(),
        }
    }

    fn parse(kind: NodeResourceKind, name: &str) -> Option<Self> {
        match kind {
            NodeResourceKind::Image => ImageResourceState::from_name(name).map(Self::Image),
            NodeResourceKind::Buffer => BufferResourceState::from_name(name).map(Self::Buffer),
        }
    }

    fn undefined(kind: NodeResourceKind) -> Self {
        match kind {
            NodeResourceKind::Image => Self::Image(ImageResourceState::UNDEFINED),
            NodeResourceKind::Buffer => Self::Buffer(BufferResourceState::UNDEFINED),
        }
    }
}

/// 解析了状态名的资源声明
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeResource {
    pub name: String,
    pub kind: NodeResourceKind,
    pub state: NodeResourceState,
    pub initial_state: NodeResourceState,
}
impl NodeResource {
    pub(crate) fn parse(node: &str, desc: &NodeResourceDesc, is_output: bool) -> Result<Self, GraphError> {
        let default_state = match (desc.kind, is_output) {
            (NodeResourceKind::Image, false) => "shader_read",
            (NodeResourceKind::Image, true) => "color_attachment",
            (NodeResourceKind::Buffer, false) => "uniform",
            (NodeResourceKind::Buffer, true) => "storage_read_write",
        };
        let parse = |name: &str| {
            NodeResourceState::parse(desc.kind, name).ok_or_else(|| GraphError::UnknownResourceState {
                node: node.to_string(),
                resource: desc.name.clone(),
                state: name.to_string(),
            })
        };
        let state = parse(desc.state.as_deref().unwrap_or(default_state))?;
        let initial_state = match desc.initial_state.as_deref() {
            Some(name) => parse(name)?,
            None => NodeResourceState::undefined(desc.kind),
        };
        Ok(Self {
            name: desc.name.clone(),
            kind: desc.kind,
            state,
            initial_state,
        })
    }
}

pub struct RenderNodeGraphLoader;
impl RenderNodeGraphLoader {
    pub fn load_str(content: &str) -> Result<RenderNodeGraphDesc, GraphError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn load_file(path: impl AsRef<Path>) -> Result<RenderNodeGraphDesc, GraphError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| GraphError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let desc = Self::load_str(&content)?;
        log::info!("render node graph '{}' loaded from {}: {} nodes", desc.name, path.display(), desc.nodes.len());
        Ok(desc)
    }
}
