use std::fmt;

use ash::vk;

use crate::handle::RenderHandle;

/// GPU 资源创建、映射、查询时的错误
///
/// 资源管理器对外的默认策略是记录日志并返回无效句柄，
/// `try_*` 系列接口则直接返回此错误。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// buffer 大小为 0
    ZeroSizedBuffer { name: String },
    /// 格式未知或不被支持
    UnsupportedFormat { name: String, format: vk::Format },
    /// 宽高深、mip、layer 为 0 或超过设备上限
    InvalidDimensions { name: String, details: String },
    /// usage / memory property 的组合不被支持
    UnsupportedUsage { name: String, details: String },
    /// 句柄无效或者资源已经被销毁
    InvalidHandle(RenderHandle),
    /// 句柄来自另一个资源管理器
    ForeignHandle(RenderHandle),
    /// 资源不是 host visible 的，无法映射
    NotMappable(RenderHandle),
    /// 在渲染器执行窗口之外映射了没有 MAP_OUTSIDE_RENDERER 标记的 buffer
    MapOutsideRenderer(RenderHandle),
    /// 资源已经处于映射状态
    AlreadyMapped(RenderHandle),
    /// 访问越界
    OutOfBounds { offset: u64, size: u64, capacity: u64 },
    /// 后端访问被锁定（`set_lock_resource_backend_access`）
    BackendAccessLocked,
    /// 后端返回的错误
    Backend(String),
}
impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::ZeroSizedBuffer { name } => write!(f, "buffer '{name}' has zero byte size"),
            ResourceError::UnsupportedFormat { name, format } => {
                write!(f, "image '{name}' uses unsupported format {format:?}")
            }
            ResourceError::InvalidDimensions { name, details } => {
                write!(f, "resource '{name}' has invalid dimensions: {details}")
            }
            ResourceError::UnsupportedUsage { name, details } => {
                write!(f, "resource '{name}' has unsupported usage: {details}")
            }
            ResourceError::InvalidHandle(handle) => write!(f, "invalid or destroyed handle {handle:?}"),
            ResourceError::ForeignHandle(handle) => {
                write!(f, "handle {handle:?} was issued by another resource manager")
            }
            ResourceError::NotMappable(handle) => write!(f, "resource {handle:?} is not host visible"),
            ResourceError::MapOutsideRenderer(handle) => write!(
                f,
                "resource {handle:?} mapped outside the render node execution window without MAP_OUTSIDE_RENDERER"
            ),
            ResourceError::AlreadyMapped(handle) => write!(f, "resource {handle:?} is already mapped"),
            ResourceError::OutOfBounds { offset, size, capacity } => {
                write!(f, "access [{offset}, {offset}+{size}) exceeds capacity {capacity}")
            }
            ResourceError::BackendAccessLocked => write!(f, "resource backend access is locked"),
            ResourceError::Backend(msg) => write!(f, "backend error: {msg}"),
        }
    }
}
impl std::error::Error for ResourceError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = ResourceError::ZeroSizedBuffer {
            name: "ubo".to_string(),
        };
        assert_eq!(err.to_string(), "buffer 'ubo' has zero byte size");

        let err = ResourceError::OutOfBounds {
            offset: 16,
            size: 32,
            capacity: 40,
        };
        assert_eq!(err.to_string(), "access [16, 16+32) exceeds capacity 40");
    }
}
