use std::fmt;

use vela_render_interface::DescriptorError;

/// 节点初始化失败的原因，节点之后一直保持 invalid
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    ShaderNotFound(String),
    /// 输入 / 输出 / 参数中引用的资源不存在
    ResourceNotFound(String),
    ResourceCreation(String),
    InvalidParams(String),
    PipelineCreation(String),
    Descriptor(DescriptorError),
}
impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::ShaderNotFound(name) => write!(f, "shader '{name}' not found"),
            NodeError::ResourceNotFound(name) => write!(f, "resource '{name}' not found"),
            NodeError::ResourceCreation(name) => write!(f, "failed to create resource '{name}'"),
            NodeError::InvalidParams(details) => write!(f, "invalid node params: {details}"),
            NodeError::PipelineCreation(name) => write!(f, "failed to create pipeline '{name}'"),
            NodeError::Descriptor(err) => write!(f, "descriptor error: {err}"),
        }
    }
}
impl std::error::Error for NodeError {}
impl From<DescriptorError> for NodeError {
    fn from(err: DescriptorError) -> Self {
        NodeError::Descriptor(err)
    }
}

/// 渲染图描述加载和构建时的错误
#[derive(Debug)]
pub enum GraphError {
    UnknownNodeType(String),
    /// 依赖中存在环，列出环上的节点
    CycleDetected(Vec<String>),
    /// 两个节点写入同一资源，且后者没有读取它
    DuplicateOutput {
        resource: String,
        first: String,
        second: String,
    },
    DuplicateNodeName(String),
    UnknownResourceState {
        node: String,
        resource: String,
        state: String,
    },
    Parse(serde_json::Error),
    Io {
        path: String,
        source: std::io::Error,
    },
}
impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::UnknownNodeType(name) => write!(f, "unknown render node type '{name}'"),
            GraphError::CycleDetected(nodes) => write!(f, "cycle detected between nodes [{}]", nodes.join(", ")),
            GraphError::DuplicateOutput {
                resource,
                first,
                second,
            } => write!(f, "resource '{resource}' is written by both '{first}' and '{second}'"),
            GraphError::DuplicateNodeName(name) => write!(f, "duplicate render node name '{name}'"),
            GraphError::UnknownResourceState { node, resource, state } => {
                write!(f, "node '{node}': unknown state '{state}' for resource '{resource}'")
            }
            GraphError::Parse(err) => write!(f, "failed to parse render node graph: {err}"),
            GraphError::Io { path, source } => write!(f, "failed to read render node graph '{path}': {source}"),
        }
    }
}
impl std::error::Error for GraphError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GraphError::Parse(err) => Some(err),
            GraphError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}
impl From<serde_json::Error> for GraphError {
    fn from(err: serde_json::Error) -> Self {
        GraphError::Parse(err)
    }
}
