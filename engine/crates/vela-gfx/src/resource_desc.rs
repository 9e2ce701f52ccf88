//! GPU 资源创建描述
//!
//! 纯数据，不包含任何行为。usage / memory property 直接使用 vk 的 flags，
//! 引擎自身的创建标记使用 `bitflags`。

use ash::vk;
use bitflags::bitflags;

use crate::error::ResourceError;

bitflags! {
    /// 引擎层的 buffer 创建标记
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct EngineBufferCreationFlags: u32 {
        /// 状态在帧之间可变，需要动态 barrier 跟踪
        const DYNAMIC_BARRIERS = 1 << 0;
        /// 每帧轮转的 ring buffer，实际分配 `byte_size * buffering_count`
        const DYNAMIC_RING_BUFFER = 1 << 1;
        /// 仅用于一次性 staging
        const SINGLE_SHOT_STAGING = 1 << 2;
        /// 允许后端做内存优化（例如 lazily allocated）
        const ENABLE_MEMORY_OPTIMIZATIONS = 1 << 3;
        /// 立即创建，而不是等到帧边界
        const CREATE_IMMEDIATE = 1 << 4;
        /// 最后一个引用释放后，延迟到 GPU 完成当前帧再销毁
        const DEFERRED_DESTROY = 1 << 5;
        /// 允许在渲染节点执行窗口之外 map / unmap
        const MAP_OUTSIDE_RENDERER = 1 << 6;
    }
}

bitflags! {
    /// 引擎层的 image 创建标记
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct EngineImageCreationFlags: u32 {
        const DYNAMIC_BARRIERS = 1 << 0;
        /// 每帧开始时将状态重置为 UNDEFINED
        const RESET_STATE_ON_FRAME_BORDERS = 1 << 1;
        const GENERATE_MIPS = 1 << 2;
        /// 初始数据和 image 尺寸不一致时进行缩放
        const SCALE = 1 << 3;
        const DEFERRED_DESTROY = 1 << 4;
    }
}

/// buffer 创建描述
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GpuBufferDesc {
    pub usage_flags: vk::BufferUsageFlags,
    pub memory_property_flags: vk::MemoryPropertyFlags,
    pub engine_creation_flags: EngineBufferCreationFlags,
    /// 单份数据的大小；ring buffer 的总大小由资源管理器按对齐和 buffering count 计算
    pub byte_size: vk::DeviceSize,
}
impl Default for GpuBufferDesc {
    fn default() -> Self {
        Self {
            usage_flags: vk::BufferUsageFlags::empty(),
            memory_property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            engine_creation_flags: EngineBufferCreationFlags::empty(),
            byte_size: 0,
        }
    }
}
impl GpuBufferDesc {
    /// 每帧 CPU 写入的 uniform buffer
    pub fn dynamic_uniform(byte_size: vk::DeviceSize) -> Self {
        Self {
            usage_flags: vk::BufferUsageFlags::UNIFORM_BUFFER,
            memory_property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            engine_creation_flags: EngineBufferCreationFlags::DYNAMIC_RING_BUFFER
                | EngineBufferCreationFlags::DEFERRED_DESTROY,
            byte_size,
        }
    }

    /// host visible 的 staging buffer
    pub fn staging(byte_size: vk::DeviceSize) -> Self {
        Self {
            usage_flags: vk::BufferUsageFlags::TRANSFER_SRC,
            memory_property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            engine_creation_flags: EngineBufferCreationFlags::SINGLE_SHOT_STAGING
                | EngineBufferCreationFlags::CREATE_IMMEDIATE
                | EngineBufferCreationFlags::MAP_OUTSIDE_RENDERER,
            byte_size,
        }
    }

    #[inline]
    pub fn is_ring_buffer(&self) -> bool {
        self.engine_creation_flags.contains(EngineBufferCreationFlags::DYNAMIC_RING_BUFFER)
    }

    #[inline]
    pub fn is_host_visible(&self) -> bool {
        self.memory_property_flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }

    #[inline]
    pub fn is_deferred_destroy(&self) -> bool {
        self.engine_creation_flags.contains(EngineBufferCreationFlags::DEFERRED_DESTROY)
    }

    /// 只检查描述自身的一致性，和设备相关的检查在资源管理器中进行
    pub fn validate(&self, name: &str) -> Result<(), ResourceError> {
        if self.byte_size == 0 {
            return Err(ResourceError::ZeroSizedBuffer { name: name.to_string() });
        }
        if self.usage_flags.is_empty() {
            return Err(ResourceError::UnsupportedUsage {
                name: name.to_string(),
                details: "empty usage flags".to_string(),
            });
        }
        let needs_host_access = self.engine_creation_flags.intersects(
            EngineBufferCreationFlags::DYNAMIC_RING_BUFFER | EngineBufferCreationFlags::MAP_OUTSIDE_RENDERER,
        );
        if needs_host_access && !self.is_host_visible() {
            return Err(ResourceError::UnsupportedUsage {
                name: name.to_string(),
                details: "ring buffers and MAP_OUTSIDE_RENDERER buffers must be HOST_VISIBLE".to_string(),
            });
        }
        Ok(())
    }
}

/// image 创建描述
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GpuImageDesc {
    pub image_type: vk::ImageType,
    pub image_view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub image_tiling: vk::ImageTiling,
    pub usage_flags: vk::ImageUsageFlags,
    pub memory_property_flags: vk::MemoryPropertyFlags,
    pub create_flags: vk::ImageCreateFlags,
    pub engine_creation_flags: EngineImageCreationFlags,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_count: u32,
    pub layer_count: u32,
    pub sample_count_flags: vk::SampleCountFlags,
}
impl Default for GpuImageDesc {
    fn default() -> Self {
        Self {
            image_type: vk::ImageType::TYPE_2D,
            image_view_type: vk::ImageViewType::TYPE_2D,
            format: vk::Format::UNDEFINED,
            image_tiling: vk::ImageTiling::OPTIMAL,
            usage_flags: vk::ImageUsageFlags::empty(),
            memory_property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            create_flags: vk::ImageCreateFlags::empty(),
            engine_creation_flags: EngineImageCreationFlags::empty(),
            width: 0,
            height: 0,
            depth: 1,
            mip_count: 1,
            layer_count: 1,
            sample_count_flags: vk::SampleCountFlags::TYPE_1,
        }
    }
}
impl GpuImageDesc {
    pub fn new_2d(width: u32, height: u32, format: vk::Format, usage_flags: vk::ImageUsageFlags) -> Self {
        Self {
            format,
            usage_flags,
            width,
            height,
            ..Default::default()
        }
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent3D {
        vk::Extent3D {
            width: self.width,
            height: self.height,
            depth: self.depth,
        }
    }

    /// 最高 mip、所有 layer 的字节数
    pub fn base_level_byte_size(&self) -> Option<u64> {
        let texel = format_byte_size(self.format)? as u64;
        Some(texel * self.width as u64 * self.height as u64 * self.depth as u64 * self.layer_count as u64)
    }

    pub fn validate(&self, name: &str) -> Result<(), ResourceError> {
        if format_byte_size(self.format).is_none() {
            return Err(ResourceError::UnsupportedFormat {
                name: name.to_string(),
                format: self.format,
            });
        }
        if self.width == 0 || self.height == 0 || self.depth == 0 {
            return Err(ResourceError::InvalidDimensions {
                name: name.to_string(),
                details: format!("{}x{}x{}", self.width, self.height, self.depth),
            });
        }
        if self.mip_count == 0 || self.layer_count == 0 {
            return Err(ResourceError::InvalidDimensions {
                name: name.to_string(),
                details: format!("mips: {}, layers: {}", self.mip_count, self.layer_count),
            });
        }
        if self.usage_flags.is_empty() {
            return Err(ResourceError::UnsupportedUsage {
                name: name.to_string(),
                details: "empty usage flags".to_string(),
            });
        }
        if is_depth_format(self.format) && self.usage_flags.contains(vk::ImageUsageFlags::STORAGE) {
            return Err(ResourceError::UnsupportedUsage {
                name: name.to_string(),
                details: "depth formats cannot be used as storage images".to_string(),
            });
        }
        Ok(())
    }
}

/// sampler 创建描述
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GpuSamplerDesc {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode_u: vk::SamplerAddressMode,
    pub address_mode_v: vk::SamplerAddressMode,
    pub address_mode_w: vk::SamplerAddressMode,
    pub mip_lod_bias: f32,
    pub enable_anisotropy: bool,
    pub max_anisotropy: f32,
    pub enable_compare_op: bool,
    pub compare_op: vk::CompareOp,
    pub min_lod: f32,
    pub max_lod: f32,
    pub border_color: vk::BorderColor,
}
impl Default for GpuSamplerDesc {
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode_u: vk::SamplerAddressMode::REPEAT,
            address_mode_v: vk::SamplerAddressMode::REPEAT,
            address_mode_w: vk::SamplerAddressMode::REPEAT,
            mip_lod_bias: 0.0,
            enable_anisotropy: false,
            max_anisotropy: 1.0,
            enable_compare_op: false,
            compare_op: vk::CompareOp::NEVER,
            min_lod: 0.0,
            max_lod: vk::LOD_CLAMP_NONE,
            border_color: vk::BorderColor::FLOAT_OPAQUE_BLACK,
        }
    }
}
impl GpuSamplerDesc {
    pub fn clamp_linear() -> Self {
        Self {
            address_mode_u: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_v: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_w: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            ..Default::default()
        }
    }

    pub fn validate(&self, name: &str) -> Result<(), ResourceError> {
        if self.min_lod > self.max_lod {
            return Err(ResourceError::InvalidDimensions {
                name: name.to_string(),
                details: format!("min_lod {} > max_lod {}", self.min_lod, self.max_lod),
            });
        }
        if self.enable_anisotropy && self.max_anisotropy < 1.0 {
            return Err(ResourceError::UnsupportedUsage {
                name: name.to_string(),
                details: "max_anisotropy must be >= 1 when anisotropy is enabled".to_string(),
            });
        }
        Ok(())
    }
}

/// 加速结构创建描述
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GpuAccelerationStructureDesc {
    pub acceleration_structure_type: vk::AccelerationStructureTypeKHR,
    /// 存放加速结构的 buffer
    pub buffer_desc: GpuBufferDesc,
}
impl GpuAccelerationStructureDesc {
    pub fn validate(&self, name: &str) -> Result<(), ResourceError> {
        self.buffer_desc.validate(name)?;
        if !self.buffer_desc.usage_flags.contains(vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR) {
            return Err(ResourceError::UnsupportedUsage {
                name: name.to_string(),
                details: "buffer needs ACCELERATION_STRUCTURE_STORAGE_KHR usage".to_string(),
            });
        }
        Ok(())
    }
}

/// 单个 texel 的字节数，返回 `None` 表示当前不支持该格式（包括所有压缩格式）
pub fn format_byte_size(format: vk::Format) -> Option<u32> {
    let size = match format {
        vk::Format::R8_UNORM | vk::Format::R8_SNORM | vk::Format::R8_UINT | vk::Format::R8_SRGB | vk::Format::S8_UINT => {
            1
        }
        vk::Format::R8G8_UNORM
        | vk::Format::R8G8_UINT
        | vk::Format::R16_UNORM
        | vk::Format::R16_SFLOAT
        | vk::Format::R16_UINT
        | vk::Format::D16_UNORM => 2,
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::R8G8B8A8_SNORM
        | vk::Format::R8G8B8A8_UINT
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::A2B10G10R10_UNORM_PACK32
        | vk::Format::B10G11R11_UFLOAT_PACK32
        | vk::Format::R16G16_SFLOAT
        | vk::Format::R16G16_UNORM
        | vk::Format::R32_SFLOAT
        | vk::Format::R32_UINT
        | vk::Format::R32_SINT
        | vk::Format::D32_SFLOAT
        | vk::Format::X8_D24_UNORM_PACK32
        | vk::Format::D24_UNORM_S8_UINT => 4,
        vk::Format::D32_SFLOAT_S8_UINT => 5,
        vk::Format::R16G16B16A16_SFLOAT
        | vk::Format::R16G16B16A16_UNORM
        | vk::Format::R32G32_SFLOAT
        | vk::Format::R32G32_UINT => 8,
        vk::Format::R32G32B32_SFLOAT => 12,
        vk::Format::R32G32B32A32_SFLOAT | vk::Format::R32G32B32A32_UINT => 16,
        _ => return None,
    };
    Some(size)
}

pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::D32_SFLOAT
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// 向上对齐到 `alignment` 的整数倍，`alignment` 为 0 时原样返回
#[inline]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 { value } else { value.div_ceil(alignment) * alignment }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_sized_buffer_rejected() {
        let desc = GpuBufferDesc {
            usage_flags: vk::BufferUsageFlags::UNIFORM_BUFFER,
            ..Default::default()
        };
        assert_eq!(
            desc.validate("empty"),
            Err(ResourceError::ZeroSizedBuffer {
                name: "empty".to_string()
            })
        );
    }

    #[test]
    fn test_ring_buffer_requires_host_visible() {
        let mut desc = GpuBufferDesc::dynamic_uniform(256);
        assert!(desc.validate("ubo").is_ok());

        desc.memory_property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        assert!(matches!(desc.validate("ubo"), Err(ResourceError::UnsupportedUsage { .. })));
    }

    #[test]
    fn test_image_format_and_dimensions() {
        let desc = GpuImageDesc::new_2d(0, 4, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::SAMPLED);
        assert!(matches!(desc.validate("img"), Err(ResourceError::InvalidDimensions { .. })));

        let desc = GpuImageDesc::new_2d(4, 4, vk::Format::BC1_RGB_UNORM_BLOCK, vk::ImageUsageFlags::SAMPLED);
        assert!(matches!(desc.validate("img"), Err(ResourceError::UnsupportedFormat { .. })));

        let desc = GpuImageDesc::new_2d(4, 4, vk::Format::D32_SFLOAT, vk::ImageUsageFlags::STORAGE);
        assert!(matches!(desc.validate("img"), Err(ResourceError::UnsupportedUsage { .. })));

        let desc = GpuImageDesc::new_2d(4, 2, vk::Format::R16G16B16A16_SFLOAT, vk::ImageUsageFlags::SAMPLED);
        assert!(desc.validate("img").is_ok());
        assert_eq!(desc.base_level_byte_size(), Some(64));
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up(13, 0), 13);
    }
}
