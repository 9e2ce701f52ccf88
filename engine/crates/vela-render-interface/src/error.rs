use std::fmt;

use ash::vk;
use vela_gfx::RenderHandle;

/// descriptor set 创建、绑定和更新时的错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    /// 更新时仍有 binding 没有绑定资源
    IncompleteBindings { set: RenderHandle, binding: u32 },
    /// layout 中不存在该 binding，或者数组下标越界
    BindingNotFound { binding: u32 },
    /// 绑定的资源类型和 layout 中的 descriptor type 不一致
    TypeMismatch { binding: u32, expected: vk::DescriptorType },
    /// 超出了 `reset_and_reserve` 预留的容量
    PoolExhausted { set_index: u32 },
    InvalidHandle(RenderHandle),
    /// uniform / storage buffer 的绑定偏移没有满足设备的对齐要求
    MisalignedDynamicOffset { binding: u32, offset: u64, alignment: u64 },
}
impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorError::IncompleteBindings { set, binding } => {
                write!(f, "descriptor set {set:?} updated with binding {binding} unbound")
            }
            DescriptorError::BindingNotFound { binding } => write!(f, "binding {binding} is not part of the layout"),
            DescriptorError::TypeMismatch { binding, expected } => {
                write!(f, "binding {binding} expects a {expected:?} resource")
            }
            DescriptorError::PoolExhausted { set_index } => {
                write!(f, "descriptor set {set_index} exceeds the reserved descriptor counts")
            }
            DescriptorError::InvalidHandle(handle) => write!(f, "invalid descriptor set handle {handle:?}"),
            DescriptorError::MisalignedDynamicOffset {
                binding,
                offset,
                alignment,
            } => write!(f, "binding {binding} uses offset {offset} which is not aligned to {alignment}"),
        }
    }
}
impl std::error::Error for DescriptorError {}
