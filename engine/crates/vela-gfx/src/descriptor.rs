//! descriptor pool 预算以及写入描述

use ash::vk;

use crate::backend::{BackendAccelerationStructureId, BackendBufferId, BackendImageId, BackendSamplerId};
use crate::pipeline_layout::{DescriptorSetLayout, PipelineLayout};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorTypeCount {
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
}

/// descriptor 类型到数量的列表，用于一次性预留 descriptor pool 的容量
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DescriptorCounts {
    pub counts: Vec<DescriptorTypeCount>,
}
impl DescriptorCounts {
    /// 同类型的数量会被合并
    pub fn add(&mut self, descriptor_type: vk::DescriptorType, count: u32) {
        if count == 0 {
            return;
        }
        match self.counts.iter_mut().find(|c| c.descriptor_type == descriptor_type) {
            Some(c) => c.count += count,
            None => self.counts.push(DescriptorTypeCount { descriptor_type, count }),
        }
    }

    pub fn add_set_layout(&mut self, layout: &DescriptorSetLayout) {
        for binding in &layout.bindings {
            self.add(binding.descriptor_type, binding.descriptor_count);
        }
    }

    /// pipeline layout 中所有 set 的需求之和
    pub fn from_pipeline_layout(layout: &PipelineLayout) -> Self {
        let mut counts = Self::default();
        for set_layout in &layout.descriptor_set_layouts {
            counts.add_set_layout(set_layout);
        }
        counts
    }

    pub fn merge(&mut self, other: &DescriptorCounts) {
        for c in &other.counts {
            self.add(c.descriptor_type, c.count);
        }
    }

    /// 所有计数乘以 `factor`
    pub fn scaled(&self, factor: u32) -> Self {
        Self {
            counts: self
                .counts
                .iter()
                .map(|c| DescriptorTypeCount {
                    descriptor_type: c.descriptor_type,
                    count: c.count * factor,
                })
                .collect(),
        }
    }

    pub fn count_of(&self, descriptor_type: vk::DescriptorType) -> u32 {
        self.counts
            .iter()
            .find(|c| c.descriptor_type == descriptor_type)
            .map(|c| c.count)
            .unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().map(|c| c.count).sum()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// `other` 的每一项都不超过 self
    pub fn covers(&self, other: &DescriptorCounts) -> bool {
        other.counts.iter().all(|c| self.count_of(c.descriptor_type) >= c.count)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorBufferInfo {
    pub buffer: BackendBufferId,
    pub offset: vk::DeviceSize,
    pub range: vk::DeviceSize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorImageInfo {
    /// 纯 sampler binding 时为 None
    pub image: Option<BackendImageId>,
    pub sampler: Option<BackendSamplerId>,
    pub image_layout: vk::ImageLayout,
}

/// 对 descriptor set 中一个 binding 的写入
///
/// `buffer_infos` / `image_infos` / `acceleration_structures` 三者只能有一个非空，
/// 由 `descriptor_type` 决定使用哪一个。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorWrite {
    pub dst_binding: u32,
    pub dst_array_element: u32,
    pub descriptor_type: vk::DescriptorType,

    pub buffer_infos: Vec<DescriptorBufferInfo>,
    pub image_infos: Vec<DescriptorImageInfo>,
    pub acceleration_structures: Vec<BackendAccelerationStructureId>,
}
impl DescriptorWrite {
    pub fn buffers(binding: u32, descriptor_type: vk::DescriptorType, buffer_infos: Vec<DescriptorBufferInfo>) -> Self {
        Self {
            dst_binding: binding,
            dst_array_element: 0,
            descriptor_type,
            buffer_infos,
            image_infos: Vec::new(),
            acceleration_structures: Vec::new(),
        }
    }

    pub fn images(binding: u32, descriptor_type: vk::DescriptorType, image_infos: Vec<DescriptorImageInfo>) -> Self {
        Self {
            dst_binding: binding,
            dst_array_element: 0,
            descriptor_type,
            buffer_infos: Vec::new(),
            image_infos,
            acceleration_structures: Vec::new(),
        }
    }

    pub fn acceleration_structures(binding: u32, acceleration_structures: Vec<BackendAccelerationStructureId>) -> Self {
        Self {
            dst_binding: binding,
            dst_array_element: 0,
            descriptor_type: vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
            buffer_infos: Vec::new(),
            image_infos: Vec::new(),
            acceleration_structures,
        }
    }

    pub fn descriptor_count(&self) -> u32 {
        (self.buffer_infos.len() + self.image_infos.len() + self.acceleration_structures.len()) as u32
    }
}

/// descriptor type 对应的资源类别
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorCategory {
    Buffer,
    Image,
    Sampler,
    AccelerationStructure,
}
impl DescriptorCategory {
    pub fn of(descriptor_type: vk::DescriptorType) -> Self {
        match descriptor_type {
            vk::DescriptorType::UNIFORM_BUFFER
            | vk::DescriptorType::STORAGE_BUFFER
            | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
            | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
            | vk::DescriptorType::UNIFORM_TEXEL_BUFFER
            | vk::DescriptorType::STORAGE_TEXEL_BUFFER => Self::Buffer,
            vk::DescriptorType::SAMPLER => Self::Sampler,
            vk::DescriptorType::ACCELERATION_STRUCTURE_KHR => Self::AccelerationStructure,
            _ => Self::Image,
        }
    }
}
