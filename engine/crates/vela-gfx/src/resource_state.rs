//! 资源状态
//!
//! 一个状态由 pipeline stage、access mask（image 还有 layout）组成，
//! 节点的输入输出声明和自定义 barrier 都以状态对来描述。

use ash::vk;

const fn stages(a: vk::PipelineStageFlags2, b: vk::PipelineStageFlags2) -> vk::PipelineStageFlags2 {
    vk::PipelineStageFlags2::from_raw(a.as_raw() | b.as_raw())
}

const fn access(a: vk::AccessFlags2, b: vk::AccessFlags2) -> vk::AccessFlags2 {
    vk::AccessFlags2::from_raw(a.as_raw() | b.as_raw())
}

/// 会产生写入的 access，用于判断是否需要 barrier
const WRITE_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
    vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw()
        | vk::AccessFlags2::SHADER_WRITE.as_raw()
        | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags2::TRANSFER_WRITE.as_raw()
        | vk::AccessFlags2::HOST_WRITE.as_raw()
        | vk::AccessFlags2::MEMORY_WRITE.as_raw()
        | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR.as_raw(),
);

/// 作为 barrier src 时无意义的读 access
const READ_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
    vk::AccessFlags2::SHADER_SAMPLED_READ.as_raw()
        | vk::AccessFlags2::SHADER_STORAGE_READ.as_raw()
        | vk::AccessFlags2::SHADER_READ.as_raw()
        | vk::AccessFlags2::UNIFORM_READ.as_raw()
        | vk::AccessFlags2::TRANSFER_READ.as_raw()
        | vk::AccessFlags2::MEMORY_READ.as_raw()
        | vk::AccessFlags2::COLOR_ATTACHMENT_READ.as_raw()
        | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ.as_raw(),
);

/// image 的使用状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageResourceState {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}
impl Default for ImageResourceState {
    fn default() -> Self {
        Self::UNDEFINED
    }
}
// new & 常量定义
impl ImageResourceState {
    #[inline]
    pub const fn new(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2, layout: vk::ImageLayout) -> Self {
        Self { stage, access, layout }
    }

    /// 初始状态，内容可以被丢弃
    pub const UNDEFINED: Self =
        Self::new(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE, vk::ImageLayout::UNDEFINED);

    pub const GENERAL: Self = Self::new(
        vk::PipelineStageFlags2::ALL_COMMANDS,
        access(vk::AccessFlags2::MEMORY_READ, vk::AccessFlags2::MEMORY_WRITE),
        vk::ImageLayout::GENERAL,
    );

    pub const COLOR_ATTACHMENT_WRITE: Self = Self::new(
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    );

    pub const DEPTH_ATTACHMENT_WRITE: Self = Self::new(
        stages(vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS, vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS),
        vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    );

    /// 片段着色器采样
    pub const SHADER_READ_FRAGMENT: Self = Self::new(
        vk::PipelineStageFlags2::FRAGMENT_SHADER,
        vk::AccessFlags2::SHADER_SAMPLED_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );

    /// 计算着色器采样
    pub const SHADER_READ_COMPUTE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        vk::AccessFlags2::SHADER_SAMPLED_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );

    pub const STORAGE_WRITE_COMPUTE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        vk::AccessFlags2::SHADER_STORAGE_WRITE,
        vk::ImageLayout::GENERAL,
    );

    pub const STORAGE_READ_WRITE_COMPUTE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        access(vk::AccessFlags2::SHADER_STORAGE_READ, vk::AccessFlags2::SHADER_STORAGE_WRITE),
        vk::ImageLayout::GENERAL,
    );

    pub const TRANSFER_SRC: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    );

    pub const TRANSFER_DST: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    );

    pub const PRESENT: Self =
        Self::new(vk::PipelineStageFlags2::BOTTOM_OF_PIPE, vk::AccessFlags2::NONE, vk::ImageLayout::PRESENT_SRC_KHR);
}
// tools
impl ImageResourceState {
    #[inline]
    pub fn is_write(&self) -> bool {
        self.access.intersects(WRITE_ACCESS)
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        !self.is_write()
    }

    /// 作为 barrier src 时只保留写 access
    #[inline]
    pub fn src_access(&self) -> vk::AccessFlags2 {
        self.access & !READ_ACCESS
    }

    /// 从 JSON 图描述中的状态名解析
    pub fn from_name(name: &str) -> Option<Self> {
        let state = match name {
            "undefined" => Self::UNDEFINED,
            "general" => Self::GENERAL,
            "color_attachment" => Self::COLOR_ATTACHMENT_WRITE,
            "depth_attachment" => Self::DEPTH_ATTACHMENT_WRITE,
            "shader_read" | "shader_read_fragment" => Self::SHADER_READ_FRAGMENT,
            "shader_read_compute" => Self::SHADER_READ_COMPUTE,
            "storage_write" => Self::STORAGE_WRITE_COMPUTE,
            "storage_read_write" => Self::STORAGE_READ_WRITE_COMPUTE,
            "transfer_src" => Self::TRANSFER_SRC,
            "transfer_dst" => Self::TRANSFER_DST,
            "present" => Self::PRESENT,
            _ => return None,
        };
        Some(state)
    }
}

/// buffer 的使用状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferResourceState {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
}
impl Default for BufferResourceState {
    fn default() -> Self {
        Self::UNDEFINED
    }
}
// new & 常量定义
impl BufferResourceState {
    #[inline]
    pub const fn new(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2) -> Self {
        Self { stage, access }
    }

    pub const UNDEFINED: Self = Self::new(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE);

    pub const VERTEX_BUFFER: Self =
        Self::new(vk::PipelineStageFlags2::VERTEX_INPUT, vk::AccessFlags2::VERTEX_ATTRIBUTE_READ);

    pub const INDEX_BUFFER: Self = Self::new(vk::PipelineStageFlags2::INDEX_INPUT, vk::AccessFlags2::INDEX_READ);

    pub const UNIFORM_READ: Self = Self::new(
        stages(vk::PipelineStageFlags2::VERTEX_SHADER, vk::PipelineStageFlags2::FRAGMENT_SHADER),
        vk::AccessFlags2::UNIFORM_READ,
    );

    pub const UNIFORM_COMPUTE: Self =
        Self::new(vk::PipelineStageFlags2::COMPUTE_SHADER, vk::AccessFlags2::UNIFORM_READ);

    pub const STORAGE_READ_COMPUTE: Self =
        Self::new(vk::PipelineStageFlags2::COMPUTE_SHADER, vk::AccessFlags2::SHADER_STORAGE_READ);

    pub const STORAGE_READ_WRITE_COMPUTE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        access(vk::AccessFlags2::SHADER_STORAGE_READ, vk::AccessFlags2::SHADER_STORAGE_WRITE),
    );

    pub const INDIRECT_BUFFER: Self =
        Self::new(vk::PipelineStageFlags2::DRAW_INDIRECT, vk::AccessFlags2::INDIRECT_COMMAND_READ);

    pub const TRANSFER_SRC: Self = Self::new(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_READ);

    pub const TRANSFER_DST: Self = Self::new(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE);

    /// 任意阶段的读取，用于上传完成后的保守 barrier
    pub const ALL_READ: Self = Self::new(vk::PipelineStageFlags2::ALL_COMMANDS, vk::AccessFlags2::MEMORY_READ);

    /// CPU 写入（ring buffer / MAP_OUTSIDE_RENDERER）
    pub const HOST_WRITE: Self = Self::new(vk::PipelineStageFlags2::HOST, vk::AccessFlags2::HOST_WRITE);
}
// tools
impl BufferResourceState {
    #[inline]
    pub fn is_write(&self) -> bool {
        self.access.intersects(WRITE_ACCESS)
    }

    #[inline]
    pub fn src_access(&self) -> vk::AccessFlags2 {
        self.access & !READ_ACCESS
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let state = match name {
            "undefined" => Self::UNDEFINED,
            "vertex" => Self::VERTEX_BUFFER,
            "index" => Self::INDEX_BUFFER,
            "uniform" => Self::UNIFORM_READ,
            "uniform_compute" => Self::UNIFORM_COMPUTE,
            "storage_read" => Self::STORAGE_READ_COMPUTE,
            "storage_read_write" => Self::STORAGE_READ_WRITE_COMPUTE,
            "indirect" => Self::INDIRECT_BUFFER,
            "transfer_src" => Self::TRANSFER_SRC,
            "transfer_dst" => Self::TRANSFER_DST,
            "host_write" => Self::HOST_WRITE,
            _ => return None,
        };
        Some(state)
    }
}

/// image 的子资源范围
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageSubresourceRange {
    pub aspect_mask: vk::ImageAspectFlags,
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}
impl Default for ImageSubresourceRange {
    fn default() -> Self {
        Self {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        }
    }
}
impl ImageSubresourceRange {
    /// 指定 aspect 的整个 image
    pub fn whole(aspect_mask: vk::ImageAspectFlags) -> Self {
        Self {
            aspect_mask,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_detection() {
        assert!(ImageResourceState::COLOR_ATTACHMENT_WRITE.is_write());
        assert!(ImageResourceState::STORAGE_READ_WRITE_COMPUTE.is_write());
        assert!(ImageResourceState::SHADER_READ_FRAGMENT.is_read_only());
        assert!(BufferResourceState::HOST_WRITE.is_write());
        assert!(!BufferResourceState::UNIFORM_READ.is_write());
    }

    #[test]
    fn test_src_access_drops_reads() {
        let state = ImageResourceState::STORAGE_READ_WRITE_COMPUTE;
        assert_eq!(state.src_access(), vk::AccessFlags2::SHADER_STORAGE_WRITE);
        assert_eq!(ImageResourceState::SHADER_READ_COMPUTE.src_access(), vk::AccessFlags2::NONE);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(ImageResourceState::from_name("transfer_dst"), Some(ImageResourceState::TRANSFER_DST));
        assert_eq!(BufferResourceState::from_name("uniform"), Some(BufferResourceState::UNIFORM_READ));
        assert_eq!(ImageResourceState::from_name("nonsense"), None);
    }
}
