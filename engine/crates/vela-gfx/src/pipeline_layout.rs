//! Pipeline layout
//!
//! 由 shader 反射数据得到，加载 shader 时计算一次并缓存，之后只读。

use ash::vk;
use bitflags::bitflags;

/// 一个 pipeline 最多使用的 descriptor set 数量
pub const MAX_DESCRIPTOR_SET_COUNT: usize = 4;

bitflags! {
    /// 反射数据中携带的 image 维度以及 image 标记
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct AdditionalDescriptorFlags: u32 {
        const IMAGE_DIMENSION_1D = 1 << 0;
        const IMAGE_DIMENSION_2D = 1 << 1;
        const IMAGE_DIMENSION_3D = 1 << 2;
        const IMAGE_DIMENSION_CUBE = 1 << 3;
        const IMAGE_DIMENSION_BUFFER = 1 << 4;
        const IMAGE_DIMENSION_SUBPASS = 1 << 5;

        const IMAGE_DEPTH = 1 << 8;
        const IMAGE_ARRAY = 1 << 9;
        const IMAGE_MULTISAMPLE = 1 << 10;
        const IMAGE_SAMPLED = 1 << 11;
        const IMAGE_LOAD_STORE = 1 << 12;
    }
}
impl AdditionalDescriptorFlags {
    /// 反射数据中的 image-dimension 字节，0 表示非 image
    pub fn from_dimension_byte(dimension: u8) -> Option<Self> {
        let flags = match dimension {
            0 => Self::empty(),
            1 => Self::IMAGE_DIMENSION_1D,
            2 => Self::IMAGE_DIMENSION_2D,
            3 => Self::IMAGE_DIMENSION_3D,
            4 => Self::IMAGE_DIMENSION_CUBE,
            5 => Self::IMAGE_DIMENSION_BUFFER,
            6 => Self::IMAGE_DIMENSION_SUBPASS,
            _ => return None,
        };
        Some(flags)
    }

    /// 反射数据中的 image-flags 字节：depth / array / multisample / sampled / load-store 依次占 bit 0..=4
    pub fn from_image_flags_byte(image_flags: u8) -> Option<Self> {
        if image_flags & !0x1f != 0 {
            return None;
        }
        Some(Self::from_bits_truncate((image_flags as u32) << 8))
    }
}

/// set 中的一个 binding
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorSetLayoutBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub descriptor_count: u32,
    pub shader_stage_flags: vk::ShaderStageFlags,
    pub additional_flags: AdditionalDescriptorFlags,
}
impl DescriptorSetLayoutBinding {
    pub fn new(binding: u32, descriptor_type: vk::DescriptorType, shader_stage_flags: vk::ShaderStageFlags) -> Self {
        Self {
            binding,
            descriptor_type,
            descriptor_count: 1,
            shader_stage_flags,
            additional_flags: AdditionalDescriptorFlags::empty(),
        }
    }
}

/// 一个 descriptor set 的布局，bindings 按 binding index 升序
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DescriptorSetLayout {
    pub set: u32,
    pub bindings: Vec<DescriptorSetLayoutBinding>,
}
impl DescriptorSetLayout {
    pub fn binding(&self, binding: u32) -> Option<&DescriptorSetLayoutBinding> {
        self.bindings.iter().find(|b| b.binding == binding)
    }

    /// 所有 binding 的 descriptor 总数
    pub fn descriptor_count(&self) -> u32 {
        self.bindings.iter().map(|b| b.descriptor_count).sum()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PushConstant {
    pub shader_stage_flags: vk::ShaderStageFlags,
    pub byte_size: u32,
}

/// 一个 shader 程序期望的全部 descriptor set 和 push constant
///
/// `descriptor_set_count == 0` 表示没有任何 binding（反射数据损坏时也是这个结果）。
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PipelineLayout {
    pub descriptor_set_count: u32,
    pub descriptor_set_layouts: [DescriptorSetLayout; MAX_DESCRIPTOR_SET_COUNT],
    pub push_constant: PushConstant,
}
impl PipelineLayout {
    /// set index 有效且包含 binding
    pub fn descriptor_set_layout(&self, set: u32) -> Option<&DescriptorSetLayout> {
        let layout = self.descriptor_set_layouts.get(set as usize)?;
        (!layout.bindings.is_empty()).then_some(layout)
    }

    pub fn has_push_constant(&self) -> bool {
        self.push_constant.byte_size > 0
    }
}
