//! Barrier 描述
//!
//! 以 `RenderHandle` 指代资源，后端在提交时再解析为真实对象。

use ash::vk;

use crate::handle::RenderHandle;
use crate::resource_desc::is_depth_format;
use crate::resource_state::{BufferResourceState, ImageResourceState, ImageSubresourceRange};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: RenderHandle,
    pub src_state: ImageResourceState,
    pub dst_state: ImageResourceState,
    pub range: ImageSubresourceRange,
}
impl ImageBarrier {
    pub fn new(image: RenderHandle, src_state: ImageResourceState, dst_state: ImageResourceState) -> Self {
        Self {
            image,
            src_state,
            dst_state,
            range: ImageSubresourceRange::default(),
        }
    }

    #[inline]
    pub fn with_range(mut self, range: ImageSubresourceRange) -> Self {
        self.range = range;
        self
    }

    /// layout 变化或任意一侧有写操作时需要 barrier，只读到只读可以跳过
    pub fn needs_barrier(&self) -> bool {
        self.src_state.layout != self.dst_state.layout || self.src_state.is_write() || self.dst_state.is_write()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferBarrier {
    pub buffer: RenderHandle,
    pub src_state: BufferResourceState,
    pub dst_state: BufferResourceState,
    pub offset: vk::DeviceSize,
    /// `vk::WHOLE_SIZE` 表示整个 buffer
    pub size: vk::DeviceSize,
}
impl BufferBarrier {
    pub fn new(buffer: RenderHandle, src_state: BufferResourceState, dst_state: BufferResourceState) -> Self {
        Self {
            buffer,
            src_state,
            dst_state,
            offset: 0,
            size: vk::WHOLE_SIZE,
        }
    }

    #[inline]
    pub fn with_range(mut self, offset: vk::DeviceSize, size: vk::DeviceSize) -> Self {
        self.offset = offset;
        self.size = size;
        self
    }

    pub fn needs_barrier(&self) -> bool {
        self.src_state.is_write() || self.dst_state.is_write()
    }
}

/// 一个 barrier point 上的全部 barrier
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BarrierBatch {
    pub image_barriers: Vec<ImageBarrier>,
    pub buffer_barriers: Vec<BufferBarrier>,
}
impl BarrierBatch {
    /// 不需要的 barrier 直接丢弃
    pub fn add_image_barrier(&mut self, barrier: ImageBarrier) {
        if barrier.needs_barrier() {
            self.image_barriers.push(barrier);
        }
    }

    pub fn add_buffer_barrier(&mut self, barrier: BufferBarrier) {
        if barrier.needs_barrier() {
            self.buffer_barriers.push(barrier);
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.image_barriers.is_empty() && self.buffer_barriers.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.image_barriers.len() + self.buffer_barriers.len()
    }
}

/// 根据 format 推断 aspect
pub fn infer_image_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        f if is_depth_format(f) => vk::ImageAspectFlags::DEPTH,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_to_read_is_skipped() {
        let handle = RenderHandle::INVALID;
        let barrier = ImageBarrier::new(
            handle,
            ImageResourceState::SHADER_READ_FRAGMENT,
            ImageResourceState::SHADER_READ_COMPUTE,
        );
        assert!(!barrier.needs_barrier());

        let mut batch = BarrierBatch::default();
        batch.add_image_barrier(barrier);
        batch.add_buffer_barrier(BufferBarrier::new(
            handle,
            BufferResourceState::UNIFORM_READ,
            BufferResourceState::UNIFORM_COMPUTE,
        ));
        assert!(batch.is_empty());
    }

    #[test]
    fn test_layout_change_or_write_needs_barrier() {
        let handle = RenderHandle::INVALID;
        assert!(
            ImageBarrier::new(handle, ImageResourceState::UNDEFINED, ImageResourceState::SHADER_READ_FRAGMENT)
                .needs_barrier()
        );
        assert!(
            BufferBarrier::new(handle, BufferResourceState::TRANSFER_DST, BufferResourceState::UNIFORM_READ)
                .needs_barrier()
        );
    }

    #[test]
    fn test_infer_aspect() {
        assert_eq!(infer_image_aspect(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            infer_image_aspect(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(infer_image_aspect(vk::Format::R8G8B8A8_UNORM), vk::ImageAspectFlags::COLOR);
    }
}
