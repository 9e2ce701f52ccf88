//! 录制后的渲染命令
//!
//! 命令中的资源都以 `RenderHandle` 表示，提交时由后端解析。

use ash::vk;

use crate::barrier::BarrierBatch;
use crate::handle::RenderHandle;

#[derive(Clone, Debug)]
pub enum RenderCommand {
    BeginDebugLabel {
        name: String,
    },
    EndDebugLabel,

    BindPipeline {
        pipeline: RenderHandle,
    },
    BindDescriptorSets {
        first_set: u32,
        sets: Vec<RenderHandle>,
    },
    PushConstants {
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: Vec<u8>,
    },
    BindVertexBuffers {
        first_binding: u32,
        buffers: Vec<(RenderHandle, vk::DeviceSize)>,
    },
    BindIndexBuffer {
        buffer: RenderHandle,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    },

    BeginRenderPass {
        color_attachments: Vec<RenderHandle>,
        depth_attachment: Option<RenderHandle>,
        render_area: vk::Rect2D,
    },
    EndRenderPass,

    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    Dispatch {
        group_count: [u32; 3],
    },

    /// 一个 barrier point
    Barriers(BarrierBatch),

    CopyBuffer {
        src: RenderHandle,
        dst: RenderHandle,
        regions: Vec<vk::BufferCopy>,
    },
    /// image 需要处于 TRANSFER_DST
    CopyBufferToImage {
        src: RenderHandle,
        dst: RenderHandle,
        regions: Vec<vk::BufferImageCopy>,
    },
    /// 将 buffer 中紧密排列、尺寸为 `src_extent` 的数据缩放写入整个 image
    BlitBufferToImage {
        src: RenderHandle,
        src_extent: vk::Extent3D,
        dst: RenderHandle,
        filter: vk::Filter,
    },
}
impl RenderCommand {
    #[inline]
    pub fn is_draw_or_dispatch(&self) -> bool {
        matches!(self, Self::Draw { .. } | Self::DrawIndexed { .. } | Self::Dispatch { .. })
    }
}
