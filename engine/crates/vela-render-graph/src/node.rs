//! 渲染节点的生命周期
//!
//! `Uninitialized → Valid | Invalid → (pre_execute_frame → execute_frame)* → Destroyed`
//!
//! - `init_node`: 只调用一次，查找资源和 shader、创建 pipeline 与 descriptor set。失败后节点在整个生命周期内保持 invalid
//! - `pre_execute_frame`: 每帧在所有节点的 `execute_frame` 之前调用，根据对象数量、image 尺寸等重新分配资源
//! - `execute_flags`: 返回 `DO_NOT_EXECUTE` 时本帧跳过该节点，节点仍然留在图中
//! - `execute_frame`: 录制命令，不创建资源

use bitflags::bitflags;
use uuid::Uuid;
use vela_render_interface::RenderCommandList;

use crate::context::RenderNodeContext;
use crate::error::NodeError;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ExecuteFlags: u32 {
        const DO_NOT_EXECUTE = 1 << 0;
    }
}

/// 所有渲染节点需要实现的四个方法
pub trait RenderNode: Send {
    fn init_node(&mut self, ctx: &mut RenderNodeContext<'_>) -> Result<(), NodeError>;

    fn pre_execute_frame(&mut self, ctx: &mut RenderNodeContext<'_>);

    fn execute_flags(&self) -> ExecuteFlags;

    /// 本帧资源失效等临时错误只跳过命令录制并输出日志，不中断整个 command list
    fn execute_frame(&mut self, ctx: &mut RenderNodeContext<'_>, cmd_list: &mut RenderCommandList);
}

/// 可以注册到 `RenderNodeRegistry` 中的节点类型
pub trait RenderNodeType: RenderNode + Default + 'static {
    /// 稳定的类型 id，不随类型名变化
    const UID: Uuid;
    const TYPE_NAME: &'static str;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RenderNodeState {
    #[default]
    Uninitialized,
    Valid,
    /// 初始化失败，只有重新创建渲染图才会再次尝试
    Invalid,
    Destroyed,
}
