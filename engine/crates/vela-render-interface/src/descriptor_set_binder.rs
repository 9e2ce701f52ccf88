use ash::vk;
use vela_gfx::RenderHandle;
use vela_gfx::descriptor::DescriptorCategory;
use vela_gfx::pipeline_layout::DescriptorSetLayoutBinding;

use crate::error::DescriptorError;

/// 绑定到某个 binding（数组元素）上的资源
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BoundResource {
    Buffer { handle: RenderHandle, byte_offset: u64 },
    /// sampler 只在 `COMBINED_IMAGE_SAMPLER` 时使用
    Image { handle: RenderHandle, sampler: Option<RenderHandle> },
    Sampler { handle: RenderHandle },
    AccelerationStructure { handle: RenderHandle },
}

/// 一个 binding 以及每个数组元素上绑定的资源
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindingResources {
    pub binding: DescriptorSetLayoutBinding,
    /// 长度为 `descriptor_count`，None 表示尚未绑定
    pub resources: Vec<Option<BoundResource>>,
}
impl BindingResources {
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.resources.iter().all(Option::is_some)
    }
}

/// binder 的快照，作为 `RenderCommandList::update_descriptor_set` 的参数
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DescriptorSetLayoutBindingResources {
    pub set: RenderHandle,
    pub bindings: Vec<BindingResources>,
}
impl DescriptorSetLayoutBindingResources {
    pub fn is_complete(&self) -> bool {
        self.bindings.iter().all(BindingResources::is_complete)
    }

    /// 第一个仍有未绑定元素的 binding
    pub fn first_unbound(&self) -> Option<u32> {
        self.bindings.iter().find(|b| !b.is_complete()).map(|b| b.binding.binding)
    }
}

/// 记录 descriptor set 每个 binding 当前绑定的资源
///
/// binder 只属于创建它的节点，不在节点之间共享。
/// layout 中声明的每个 binding 都需要在更新前绑定，否则更新会被拒绝。
pub struct DescriptorSetBinder {
    set: RenderHandle,
    slots: Vec<BindingResources>,
    dirty: bool,
}
// new & init
impl DescriptorSetBinder {
    pub fn new(set: RenderHandle, bindings: &[DescriptorSetLayoutBinding]) -> Self {
        let mut slots: Vec<_> = bindings
            .iter()
            .map(|binding| BindingResources {
                binding: *binding,
                resources: vec![None; binding.descriptor_count.max(1) as usize],
            })
            .collect();
        slots.sort_by_key(|s| s.binding.binding);
        Self {
            set,
            slots,
            dirty: true,
        }
    }
}
// getters
impl DescriptorSetBinder {
    #[inline]
    pub fn descriptor_set_handle(&self) -> RenderHandle {
        self.set
    }

    /// 自上次 `clear_dirty` 以来绑定是否发生过变化
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub fn binding_count(&self) -> usize {
        self.slots.len()
    }

    pub fn bound_resource(&self, binding: u32, array_element: u32) -> Option<BoundResource> {
        let slot = self.slots.iter().find(|s| s.binding.binding == binding)?;
        slot.resources.get(array_element as usize).copied().flatten()
    }

    pub fn get_descriptor_set_layout_binding_resources(&self) -> DescriptorSetLayoutBindingResources {
        DescriptorSetLayoutBindingResources {
            set: self.set,
            bindings: self.slots.clone(),
        }
    }
}
// bind
impl DescriptorSetBinder {
    pub fn bind_buffer(&mut self, binding: u32, handle: RenderHandle, byte_offset: u64) -> Result<(), DescriptorError> {
        self.bind_buffer_array_element(binding, 0, handle, byte_offset)
    }

    pub fn bind_buffer_array_element(
        &mut self,
        binding: u32,
        array_element: u32,
        handle: RenderHandle,
        byte_offset: u64,
    ) -> Result<(), DescriptorError> {
        self.bind(
            binding,
            array_element,
            DescriptorCategory::Buffer,
            BoundResource::Buffer { handle, byte_offset },
        )
    }

    /// `sampler` 只用于 `COMBINED_IMAGE_SAMPLER`
    pub fn bind_image(
        &mut self,
        binding: u32,
        handle: RenderHandle,
        sampler: Option<RenderHandle>,
    ) -> Result<(), DescriptorError> {
        self.bind_image_array_element(binding, 0, handle, sampler)
    }

    pub fn bind_image_array_element(
        &mut self,
        binding: u32,
        array_element: u32,
        handle: RenderHandle,
        sampler: Option<RenderHandle>,
    ) -> Result<(), DescriptorError> {
        let expected = self.binding_type(binding)?;
        if expected == vk::DescriptorType::COMBINED_IMAGE_SAMPLER && sampler.is_none() {
            return Err(DescriptorError::TypeMismatch { binding, expected });
        }
        let sampler = sampler.filter(|_| expected == vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        self.bind(
            binding,
            array_element,
            DescriptorCategory::Image,
            BoundResource::Image { handle, sampler },
        )
    }

    pub fn bind_sampler(&mut self, binding: u32, handle: RenderHandle) -> Result<(), DescriptorError> {
        self.bind(binding, 0, DescriptorCategory::Sampler, BoundResource::Sampler { handle })
    }

    pub fn bind_acceleration_structure(&mut self, binding: u32, handle: RenderHandle) -> Result<(), DescriptorError> {
        self.bind(
            binding,
            0,
            DescriptorCategory::AccelerationStructure,
            BoundResource::AccelerationStructure { handle },
        )
    }

    /// 清空所有绑定，之后需要重新绑定每个 binding
    pub fn clear_bindings(&mut self) {
        for slot in &mut self.slots {
            slot.resources.iter_mut().for_each(|r| *r = None);
        }
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    fn binding_type(&self, binding: u32) -> Result<vk::DescriptorType, DescriptorError> {
        self.slots
            .iter()
            .find(|s| s.binding.binding == binding)
            .map(|s| s.binding.descriptor_type)
            .ok_or(DescriptorError::BindingNotFound { binding })
    }

    fn bind(
        &mut self,
        binding: u32,
        array_element: u32,
        category: DescriptorCategory,
        resource: BoundResource,
    ) -> Result<(), DescriptorError> {
        let slot = self
            .slots
            .iter_mut()
            .find(|s| s.binding.binding == binding)
            .ok_or(DescriptorError::BindingNotFound { binding })?;
        let expected = slot.binding.descriptor_type;
        if DescriptorCategory::of(expected) != category {
            return Err(DescriptorError::TypeMismatch { binding, expected });
        }
        let element = slot
            .resources
            .get_mut(array_element as usize)
            .ok_or(DescriptorError::BindingNotFound { binding })?;
        if *element != Some(resource) {
            *element = Some(resource);
            self.dirty = true;
        }
        Ok(())
    }
}
