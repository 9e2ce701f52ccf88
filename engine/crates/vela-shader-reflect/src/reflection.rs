//! 反射数据格式
//!
//! ```text
//! header (16 bytes, little-endian)
//!   tag[4]       'r' 'f' 'l' version(0 | 1)
//!   type         u16  shader stage flags
//!   offsets[5]   u16  push constants / specialization constants / descriptor sets / inputs / local size
//! ```
//!
//! 段的大小没有直接存储：将 5 个 offset 升序排列，相邻 offset 之差即为段大小，
//! 最后一个段延伸到 blob 末尾。offset 为 0 表示该段不存在。

use ash::vk;
use vela_gfx::pipeline_layout::{
    AdditionalDescriptorFlags, DescriptorSetLayout, DescriptorSetLayoutBinding, MAX_DESCRIPTOR_SET_COUNT,
    PipelineLayout, PushConstant,
};
use vela_gfx::resource_desc::format_byte_size;

use crate::reader::ByteReader;

pub const REFLECTION_HEADER_SIZE: usize = 16;

const TAG: [u8; 3] = [b'r', b'f', b'l'];
pub(crate) const SEGMENT_COUNT: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Segment {
    PushConstants = 0,
    SpecializationConstants = 1,
    DescriptorSets = 2,
    Inputs = 3,
    LocalSize = 4,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SpecializationConstantType {
    #[default]
    Invalid,
    Bool,
    UInt32,
    Int32,
    Float,
}
impl SpecializationConstantType {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Bool,
            2 => Self::UInt32,
            3 => Self::Int32,
            4 => Self::Float,
            _ => Self::Invalid,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SpecializationConstant {
    pub shader_stage: vk::ShaderStageFlags,
    pub id: u32,
    pub constant_type: SpecializationConstantType,
    /// 在特化数据中的字节偏移，每个常量占 4 字节
    pub offset: u32,
}

/// 顶点输入属性，binding 等于 location
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexInputDescription {
    pub location: u32,
    pub binding: u32,
    pub format: vk::Format,
    pub offset: u32,
}

/// 由顶点输入属性推导出的完整顶点输入声明：每个属性一个 binding，紧密排列
#[derive(Clone, Debug, Default)]
pub struct VertexInputDeclaration {
    pub binding_descriptions: Vec<vk::VertexInputBindingDescription>,
    pub attribute_descriptions: Vec<VertexInputDescription>,
}

/// 反射数据的只读视图
#[derive(Clone, Copy, Debug)]
pub struct ShaderReflectionData<'a> {
    bytes: &'a [u8],
    offsets: [usize; SEGMENT_COUNT],
    sizes: [usize; SEGMENT_COUNT],
}
// new & init
impl<'a> ShaderReflectionData<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        let mut data = Self {
            bytes,
            offsets: [0; SEGMENT_COUNT],
            sizes: [0; SEGMENT_COUNT],
        };
        if data.is_valid() {
            data.compute_segments();
        }
        data
    }

    fn compute_segments(&mut self) {
        let mut reader = ByteReader::new(&self.bytes[6..REFLECTION_HEADER_SIZE]);
        for offset in &mut self.offsets {
            *offset = reader.read_u16().unwrap_or(0) as usize;
        }

        let mut sorted = self.offsets;
        sorted.sort_unstable();
        for (segment, &offset) in self.offsets.iter().enumerate() {
            if offset == 0 {
                continue;
            }
            let end = sorted.iter().copied().find(|&o| o > offset).unwrap_or(self.bytes.len());
            self.sizes[segment] = end.saturating_sub(offset);
        }
    }
}
// getters
impl<'a> ShaderReflectionData<'a> {
    /// tag 为 `'r' 'f' 'l' version` 且 version 为 0 或 1，并且至少包含完整的 header
    pub fn is_valid(&self) -> bool {
        self.bytes.len() >= REFLECTION_HEADER_SIZE && self.bytes[..3] == TAG && self.bytes[3] <= 1
    }

    pub fn version(&self) -> Option<u8> {
        self.is_valid().then(|| self.bytes[3])
    }

    pub fn shader_stage_flags(&self) -> vk::ShaderStageFlags {
        if !self.is_valid() {
            return vk::ShaderStageFlags::empty();
        }
        let stage = u16::from_le_bytes([self.bytes[4], self.bytes[5]]);
        vk::ShaderStageFlags::from_raw(stage as u32)
    }

    /// 段的字节，已经按 blob 的实际长度截断；段不存在或 blob 无效时返回 `None`
    fn segment(&self, segment: Segment) -> Option<&'a [u8]> {
        if !self.is_valid() {
            return None;
        }
        let offset = self.offsets[segment as usize];
        if offset == 0 || offset >= self.bytes.len() {
            return None;
        }
        let end = (offset + self.sizes[segment as usize]).min(self.bytes.len());
        Some(&self.bytes[offset..end])
    }

    /// 解析 descriptor set 布局以及 push constant
    ///
    /// 任意一次读取失败、set index 越界、image dimension / flags 字节非法时，
    /// 整个布局退化为 0 个 set。调用方应当把 0 视为“没有 binding”。
    /// 同一个 set index 重复出现时合并 binding，`descriptor_set_count` 只统计含有 binding 的 set。
    pub fn get_pipeline_layout(&self) -> PipelineLayout {
        let mut layout = PipelineLayout {
            push_constant: self.get_push_constants(),
            ..Default::default()
        };
        let Some(bytes) = self.segment(Segment::DescriptorSets) else {
            return layout;
        };
        let stage = self.shader_stage_flags();
        let with_image_info = self.version() == Some(1);

        match parse_descriptor_sets(bytes, stage, with_image_info) {
            Some((count, set_layouts)) => {
                layout.descriptor_set_count = count;
                layout.descriptor_set_layouts = set_layouts;
            }
            None => {
                log::error!("malformed descriptor set segment in shader reflection data, ignoring all bindings");
            }
        }
        layout
    }

    pub fn get_specialization_constants(&self) -> Vec<SpecializationConstant> {
        let Some(bytes) = self.segment(Segment::SpecializationConstants) else {
            return Vec::new();
        };
        let stage = self.shader_stage_flags();
        let parse = || -> Option<Vec<SpecializationConstant>> {
            let mut reader = ByteReader::new(bytes);
            let count = reader.read_u32()? as usize;
            // 每个常量 8 字节，先检查再分配
            if reader.remaining() < count.checked_mul(8)? {
                return None;
            }
            let mut constants = Vec::with_capacity(count);
            for index in 0..count {
                let id = reader.read_u32()?;
                let constant_type = SpecializationConstantType::from_raw(reader.read_u32()?);
                constants.push(SpecializationConstant {
                    shader_stage: stage,
                    id,
                    constant_type,
                    offset: (index * 4) as u32,
                });
            }
            Some(constants)
        };
        parse().unwrap_or_default()
    }

    pub fn get_input_descriptions(&self) -> Vec<VertexInputDescription> {
        let Some(bytes) = self.segment(Segment::Inputs) else {
            return Vec::new();
        };
        let parse = || -> Option<Vec<VertexInputDescription>> {
            let mut reader = ByteReader::new(bytes);
            let count = reader.read_u16()? as usize;
            if reader.remaining() < count * 4 {
                return None;
            }
            let mut inputs = Vec::with_capacity(count);
            for _ in 0..count {
                let location = reader.read_u16()? as u32;
                let format = vk::Format::from_raw(reader.read_u16()? as i32);
                inputs.push(VertexInputDescription {
                    location,
                    binding: location,
                    format,
                    offset: 0,
                });
            }
            Some(inputs)
        };
        parse().unwrap_or_default()
    }

    /// 每个输入属性使用独立的 binding，stride 为格式的大小；不支持的格式会被跳过
    pub fn get_vertex_input_declaration(&self) -> VertexInputDeclaration {
        let mut declaration = VertexInputDeclaration::default();
        for input in self.get_input_descriptions() {
            let Some(stride) = format_byte_size(input.format) else {
                log::warn!("vertex input at location {} has unsupported format {:?}", input.location, input.format);
                continue;
            };
            declaration.binding_descriptions.push(vk::VertexInputBindingDescription {
                binding: input.binding,
                stride,
                input_rate: vk::VertexInputRate::VERTEX,
            });
            declaration.attribute_descriptions.push(input);
        }
        declaration
    }

    /// compute shader 的 workgroup 大小，不存在时为 0
    pub fn get_local_size(&self) -> [u32; 3] {
        let Some(bytes) = self.segment(Segment::LocalSize) else {
            return [0; 3];
        };
        let mut reader = ByteReader::new(bytes);
        let mut parse = || Some([reader.read_u32()?, reader.read_u32()?, reader.read_u32()?]);
        parse().unwrap_or([0; 3])
    }

    pub fn get_push_constants(&self) -> PushConstant {
        let Some(bytes) = self.segment(Segment::PushConstants) else {
            return PushConstant::default();
        };
        let mut reader = ByteReader::new(bytes);
        let byte_size = match reader.read_u8() {
            Some(0) | None => return PushConstant::default(),
            Some(_) => match reader.read_u16() {
                Some(size) => size as u32,
                None => return PushConstant::default(),
            },
        };
        PushConstant {
            shader_stage_flags: self.shader_stage_flags(),
            byte_size,
        }
    }
}

/// 旧版本编译器把 acceleration structure 的枚举值截断成了 16 位
fn remap_descriptor_type(raw: u16) -> vk::DescriptorType {
    let acceleration_structure = vk::DescriptorType::ACCELERATION_STRUCTURE_KHR;
    if raw as i32 > vk::DescriptorType::INPUT_ATTACHMENT.as_raw()
        && raw as i32 == (acceleration_structure.as_raw() & 0xffff)
    {
        return acceleration_structure;
    }
    vk::DescriptorType::from_raw(raw as i32)
}

fn parse_descriptor_sets(
    bytes: &[u8],
    stage: vk::ShaderStageFlags,
    with_image_info: bool,
) -> Option<(u32, [DescriptorSetLayout; MAX_DESCRIPTOR_SET_COUNT])> {
    let mut reader = ByteReader::new(bytes);
    let mut set_layouts: [DescriptorSetLayout; MAX_DESCRIPTOR_SET_COUNT] = Default::default();

    let set_count = reader.read_u16()?;
    for _ in 0..set_count {
        let set = reader.read_u16()? as usize;
        if set >= MAX_DESCRIPTOR_SET_COUNT {
            log::error!("descriptor set index {set} exceeds the maximum of {MAX_DESCRIPTOR_SET_COUNT}");
            return None;
        }

        let binding_count = reader.read_u16()?;
        let mut bindings = Vec::with_capacity(binding_count as usize);
        for _ in 0..binding_count {
            let binding = reader.read_u16()? as u32;
            let descriptor_type = remap_descriptor_type(reader.read_u16()?);
            let descriptor_count = reader.read_u16()? as u32;
            let additional_flags = if with_image_info {
                let dimension = AdditionalDescriptorFlags::from_dimension_byte(reader.read_u8()?)?;
                let image_flags = AdditionalDescriptorFlags::from_image_flags_byte(reader.read_u8()?)?;
                dimension | image_flags
            } else {
                AdditionalDescriptorFlags::empty()
            };
            bindings.push(DescriptorSetLayoutBinding {
                binding,
                descriptor_type,
                descriptor_count,
                shader_stage_flags: stage,
                additional_flags,
            });
        }
        // 同一个 set 出现多次时合并 binding
        let layout = &mut set_layouts[set];
        layout.set = set as u32;
        layout.bindings.extend(bindings);
    }
    let non_empty = set_layouts.iter().filter(|l| !l.bindings.is_empty()).count() as u32;
    Some((non_empty, set_layouts))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::writer::{BlobBinding as TestBinding, ReflectionBlobBuilder as BlobBuilder};

    fn material_shader(version: u8) -> BlobBuilder {
        BlobBuilder {
            version,
            stage: vk::ShaderStageFlags::FRAGMENT.as_raw() as u16,
            push_constant: Some(16),
            spec_constants: Some(vec![(0, 1), (7, 4)]),
            sets: Some(vec![(
                0,
                vec![
                    TestBinding {
                        binding: 0,
                        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER.as_raw() as u16,
                        count: 1,
                        dimension: 0,
                        image_flags: 0,
                    },
                    TestBinding {
                        binding: 1,
                        descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER.as_raw() as u16,
                        count: 1,
                        dimension: 2,
                        image_flags: 0b1000,
                    },
                ],
            )]),
            inputs: Some(vec![
                (0, vk::Format::R32G32B32_SFLOAT.as_raw() as u16),
                (1, vk::Format::R32G32_SFLOAT.as_raw() as u16),
            ]),
            local_size: Some([8, 4, 1]),
        }
    }

    #[test]
    fn test_header_validation() {
        let blob = material_shader(1).build();
        assert!(ShaderReflectionData::new(&blob).is_valid());

        let mut bad_tag = blob.clone();
        bad_tag[1] = b'x';
        assert!(!ShaderReflectionData::new(&bad_tag).is_valid());

        let mut bad_version = blob.clone();
        bad_version[3] = 2;
        assert!(!ShaderReflectionData::new(&bad_version).is_valid());

        assert!(!ShaderReflectionData::new(&blob[..REFLECTION_HEADER_SIZE - 1]).is_valid());
        assert!(!ShaderReflectionData::new(&[]).is_valid());
    }

    #[test]
    fn test_uniform_buffer_and_sampled_image_layout() {
        for version in [0, 1] {
            let blob = material_shader(version).build();
            let data = ShaderReflectionData::new(&blob);
            let layout = data.get_pipeline_layout();

            assert_eq!(layout.descriptor_set_count, 1);
            let bindings = &layout.descriptor_set_layouts[0].bindings;
            assert_eq!(bindings.len(), 2);
            assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
            assert_eq!(bindings[1].descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
            assert_eq!(bindings[1].shader_stage_flags, vk::ShaderStageFlags::FRAGMENT);
            assert_eq!(layout.push_constant.byte_size, 16);
            assert_eq!(layout.push_constant.shader_stage_flags, vk::ShaderStageFlags::FRAGMENT);

            let expected_flags = if version == 1 {
                AdditionalDescriptorFlags::IMAGE_DIMENSION_2D | AdditionalDescriptorFlags::IMAGE_SAMPLED
            } else {
                AdditionalDescriptorFlags::empty()
            };
            assert_eq!(bindings[1].additional_flags, expected_flags);
        }
    }

    #[test]
    fn test_round_trip_segments() {
        for version in [0, 1] {
            let blob = material_shader(version).build();
            let data = ShaderReflectionData::new(&blob);

            let constants = data.get_specialization_constants();
            assert_eq!(constants.len(), 2);
            assert_eq!((constants[0].id, constants[0].constant_type), (0, SpecializationConstantType::Bool));
            assert_eq!((constants[1].id, constants[1].constant_type), (7, SpecializationConstantType::Float));
            assert_eq!(constants[1].offset, 4);

            let inputs = data.get_input_descriptions();
            assert_eq!(inputs.len(), 2);
            assert_eq!(inputs[1].location, 1);
            assert_eq!(inputs[1].binding, 1);
            assert_eq!(inputs[1].format, vk::Format::R32G32_SFLOAT);

            let declaration = data.get_vertex_input_declaration();
            assert_eq!(declaration.binding_descriptions[0].stride, 12);
            assert_eq!(declaration.binding_descriptions[1].stride, 8);

            assert_eq!(data.get_local_size(), [8, 4, 1]);
        }
    }

    #[test]
    fn test_absent_segments_are_empty() {
        let blob = BlobBuilder {
            version: 0,
            stage: vk::ShaderStageFlags::VERTEX.as_raw() as u16,
            ..Default::default()
        }
        .build();
        let data = ShaderReflectionData::new(&blob);
        assert!(data.is_valid());
        assert_eq!(data.get_pipeline_layout(), PipelineLayout::default());
        assert!(data.get_specialization_constants().is_empty());
        assert!(data.get_input_descriptions().is_empty());
        assert_eq!(data.get_local_size(), [0; 3]);
        assert_eq!(data.get_push_constants(), PushConstant::default());
    }

    #[test]
    fn test_truncated_prefixes_never_read_out_of_bounds() {
        for version in [0, 1] {
            let blob = material_shader(version).build();
            let full = ShaderReflectionData::new(&blob);
            let full_layout = full.get_pipeline_layout();
            let full_constants = full.get_specialization_constants();
            let full_inputs = full.get_input_descriptions();
            let full_local_size = full.get_local_size();
            let full_push = full.get_push_constants();

            for len in 0..blob.len() {
                let data = ShaderReflectionData::new(&blob[..len]);
                if len < REFLECTION_HEADER_SIZE {
                    assert!(!data.is_valid());
                    continue;
                }

                let layout = data.get_pipeline_layout();
                assert!(
                    layout.descriptor_set_count == 0 || layout.descriptor_set_layouts == full_layout.descriptor_set_layouts
                );
                let constants = data.get_specialization_constants();
                assert!(constants.is_empty() || constants == full_constants);
                let inputs = data.get_input_descriptions();
                assert!(inputs.is_empty() || inputs == full_inputs);
                let local_size = data.get_local_size();
                assert!(local_size == [0; 3] || local_size == full_local_size);
                let push = data.get_push_constants();
                assert!(push == PushConstant::default() || push == full_push);
            }
        }
    }

    #[test]
    fn test_out_of_range_set_index_zeroes_layout() {
        let mut builder = material_shader(0);
        builder.sets = Some(vec![(
            MAX_DESCRIPTOR_SET_COUNT as u16,
            vec![TestBinding {
                binding: 0,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER.as_raw() as u16,
                count: 1,
                dimension: 0,
                image_flags: 0,
            }],
        )]);
        let blob = builder.build();
        let data = ShaderReflectionData::new(&blob);

        let first = data.get_pipeline_layout();
        let second = data.get_pipeline_layout();
        assert_eq!(first.descriptor_set_count, 0);
        assert!(first.descriptor_set_layouts.iter().all(|l| l.bindings.is_empty()));
        assert_eq!(first, second);
        // 其他段不受影响
        assert_eq!(data.get_local_size(), [8, 4, 1]);
    }

    #[test]
    fn test_repeated_set_index_merges_bindings() {
        let uniform = |binding| TestBinding {
            binding,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER.as_raw() as u16,
            count: 1,
            dimension: 0,
            image_flags: 0,
        };
        let mut builder = material_shader(0);
        builder.sets = Some(vec![(1, vec![uniform(0)]), (2, vec![]), (1, vec![uniform(3)])]);
        let blob = builder.build();
        let layout = ShaderReflectionData::new(&blob).get_pipeline_layout();

        // 空的 set 2 不计数
        assert_eq!(layout.descriptor_set_count, 1);
        let set = &layout.descriptor_set_layouts[1];
        assert_eq!(set.set, 1);
        assert_eq!(set.bindings.iter().map(|b| b.binding).collect::<Vec<_>>(), vec![0, 3]);
        assert!(layout.descriptor_set_layouts[2].bindings.is_empty());
    }

    #[test]
    fn test_invalid_dimension_byte_zeroes_layout() {
        let mut builder = material_shader(1);
        if let Some(sets) = builder.sets.as_mut() {
            sets[0].1[1].dimension = 9;
        }
        let blob = builder.build();
        assert_eq!(ShaderReflectionData::new(&blob).get_pipeline_layout().descriptor_set_count, 0);
    }

    #[test]
    fn test_truncated_acceleration_structure_type_is_remapped() {
        let truncated = (vk::DescriptorType::ACCELERATION_STRUCTURE_KHR.as_raw() & 0xffff) as u16;
        assert_eq!(truncated, 5104);
        assert_eq!(remap_descriptor_type(truncated), vk::DescriptorType::ACCELERATION_STRUCTURE_KHR);
        assert_eq!(
            remap_descriptor_type(vk::DescriptorType::INPUT_ATTACHMENT.as_raw() as u16),
            vk::DescriptorType::INPUT_ATTACHMENT
        );
        assert_eq!(remap_descriptor_type(6), vk::DescriptorType::UNIFORM_BUFFER);
    }
}
