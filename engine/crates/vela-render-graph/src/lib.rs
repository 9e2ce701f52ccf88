//! 渲染节点与渲染图
//!
//! - `node`: 节点的生命周期接口
//! - `registry`: 按 uuid 和类型名注册节点类型
//! - `desc`: JSON 形式的渲染图描述
//! - `dependency`: 根据读写关系建立依赖并拓扑排序
//! - `graph`: 渲染图实例，负责节点调度和自动 barrier
//! - `nodes`: 内置节点

pub mod context;
pub mod dependency;
pub mod desc;
pub mod error;
pub mod graph;
pub mod node;
pub mod nodes;
pub mod registry;

pub use context::{RenderGraphShare, RenderNodeContext};
pub use desc::{NodeResource, NodeResourceDesc, NodeResourceKind, NodeResourceState, RenderNodeDesc, RenderNodeGraphDesc, RenderNodeGraphLoader};
pub use error::{GraphError, NodeError};
pub use graph::{GraphFrameStats, RenderNodeGraph};
pub use node::{ExecuteFlags, RenderNode, RenderNodeState, RenderNodeType};
pub use registry::{RenderNodeRegistry, RenderNodeTypeInfo};
