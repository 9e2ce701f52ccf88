use ash::vk;
use vela_gfx::RenderHandle;
use vela_gfx::barrier::{BarrierBatch, BufferBarrier, ImageBarrier};
use vela_gfx::command::RenderCommand;
use vela_gfx::resource_state::{BufferResourceState, ImageResourceState, ImageSubresourceRange};

use crate::descriptor_set_binder::DescriptorSetLayoutBindingResources;
use crate::error::DescriptorError;

/// 渲染节点在 `execute_frame` 中录制命令的地方
///
/// 命令中的资源以句柄表示，提交时再解析为后端对象。
/// descriptor set 的更新会被收集起来，在提交前统一写入（同一帧内最后一次更新生效）。
pub struct RenderCommandList {
    name: String,
    validation: bool,

    commands: Vec<RenderCommand>,
    /// `custom_*_barrier` 收集的 barrier，`add_custom_barrier_point` 时写入命令
    pending_barriers: BarrierBatch,
    descriptor_updates: Vec<DescriptorSetLayoutBindingResources>,

    barrier_count: u32,
    draw_or_dispatch_count: u32,
}
// new & init
impl RenderCommandList {
    pub fn new(name: impl Into<String>, validation: bool) -> Self {
        Self {
            name: name.into(),
            validation,
            commands: Vec::new(),
            pending_barriers: BarrierBatch::default(),
            descriptor_updates: Vec::new(),
            barrier_count: 0,
            draw_or_dispatch_count: 0,
        }
    }
}
// getters
impl RenderCommandList {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn commands(&self) -> &[RenderCommand] {
        &self.commands
    }

    #[inline]
    pub fn descriptor_updates(&self) -> &[DescriptorSetLayoutBindingResources] {
        &self.descriptor_updates
    }

    #[inline]
    pub fn barrier_count(&self) -> u32 {
        self.barrier_count
    }

    #[inline]
    pub fn draw_or_dispatch_count(&self) -> u32 {
        self.draw_or_dispatch_count
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.descriptor_updates.is_empty()
    }

    #[inline]
    pub fn has_pending_barriers(&self) -> bool {
        !self.pending_barriers.is_empty()
    }
}
// descriptor
impl RenderCommandList {
    /// 提交 binder 的快照
    ///
    /// 开启 validation 时，仍有未绑定的 binding 会被拒绝。
    pub fn update_descriptor_set(
        &mut self,
        resources: DescriptorSetLayoutBindingResources,
    ) -> Result<(), DescriptorError> {
        if self.validation {
            if let Some(binding) = resources.first_unbound() {
                log::error!(
                    "[{}] descriptor set {:?} updated with binding {binding} unbound",
                    self.name,
                    resources.set
                );
                return Err(DescriptorError::IncompleteBindings {
                    set: resources.set,
                    binding,
                });
            }
        }
        match self.descriptor_updates.iter_mut().find(|u| u.set == resources.set) {
            Some(existing) => *existing = resources,
            None => self.descriptor_updates.push(resources),
        }
        Ok(())
    }

    pub fn bind_descriptor_set(&mut self, set_index: u32, set: RenderHandle) {
        self.bind_descriptor_sets(set_index, &[set]);
    }

    pub fn bind_descriptor_sets(&mut self, first_set: u32, sets: &[RenderHandle]) {
        self.commands.push(RenderCommand::BindDescriptorSets {
            first_set,
            sets: sets.to_vec(),
        });
    }
}
// barrier
impl RenderCommandList {
    /// 直接写入一个 barrier point
    pub fn barrier(&mut self, batch: BarrierBatch) {
        if batch.is_empty() {
            return;
        }
        self.barrier_count += batch.len() as u32;
        self.commands.push(RenderCommand::Barriers(batch));
    }

    /// 为渲染图自动依赖跟踪之外的资源（例如节点内部的临时 image）添加 barrier
    pub fn custom_image_barrier(
        &mut self,
        image: RenderHandle,
        src_state: ImageResourceState,
        dst_state: ImageResourceState,
        range: ImageSubresourceRange,
    ) {
        self.pending_barriers
            .add_image_barrier(ImageBarrier::new(image, src_state, dst_state).with_range(range));
    }

    pub fn custom_buffer_barrier(
        &mut self,
        buffer: RenderHandle,
        src_state: BufferResourceState,
        dst_state: BufferResourceState,
    ) {
        self.pending_barriers.add_buffer_barrier(BufferBarrier::new(buffer, src_state, dst_state));
    }

    /// 将之前添加的 custom barrier 写入命令流
    pub fn add_custom_barrier_point(&mut self) {
        let batch = std::mem::take(&mut self.pending_barriers);
        self.barrier(batch);
    }

    fn flush_forgotten_barriers(&mut self) {
        if self.has_pending_barriers() {
            if self.validation {
                log::warn!("[{}] custom barriers recorded without add_custom_barrier_point", self.name);
            }
            self.add_custom_barrier_point();
        }
    }
}
// draw & dispatch
impl RenderCommandList {
    pub fn begin_debug_label(&mut self, name: impl Into<String>) {
        self.commands.push(RenderCommand::BeginDebugLabel { name: name.into() });
    }

    pub fn end_debug_label(&mut self) {
        self.commands.push(RenderCommand::EndDebugLabel);
    }

    pub fn bind_pipeline(&mut self, pipeline: RenderHandle) {
        self.commands.push(RenderCommand::BindPipeline { pipeline });
    }

    pub fn push_constants<T: bytemuck::Pod>(&mut self, stages: vk::ShaderStageFlags, offset: u32, data: &T) {
        self.commands.push(RenderCommand::PushConstants {
            stages,
            offset,
            data: bytemuck::bytes_of(data).to_vec(),
        });
    }

    pub fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[(RenderHandle, vk::DeviceSize)]) {
        self.commands.push(RenderCommand::BindVertexBuffers {
            first_binding,
            buffers: buffers.to_vec(),
        });
    }

    pub fn bind_index_buffer(&mut self, buffer: RenderHandle, offset: vk::DeviceSize, index_type: vk::IndexType) {
        self.commands.push(RenderCommand::BindIndexBuffer {
            buffer,
            offset,
            index_type,
        });
    }

    pub fn begin_render_pass(
        &mut self,
        color_attachments: &[RenderHandle],
        depth_attachment: Option<RenderHandle>,
        render_area: vk::Rect2D,
    ) {
        self.flush_forgotten_barriers();
        self.commands.push(RenderCommand::BeginRenderPass {
            color_attachments: color_attachments.to_vec(),
            depth_attachment,
            render_area,
        });
    }

    pub fn end_render_pass(&mut self) {
        self.commands.push(RenderCommand::EndRenderPass);
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.flush_forgotten_barriers();
        self.draw_or_dispatch_count += 1;
        self.commands.push(RenderCommand::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.flush_forgotten_barriers();
        self.draw_or_dispatch_count += 1;
        self.commands.push(RenderCommand::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        });
    }

    pub fn dispatch(&mut self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
        self.flush_forgotten_barriers();
        self.draw_or_dispatch_count += 1;
        self.commands.push(RenderCommand::Dispatch {
            group_count: [group_count_x, group_count_y, group_count_z],
        });
    }

    pub fn copy_buffer(&mut self, src: RenderHandle, dst: RenderHandle, regions: &[vk::BufferCopy]) {
        self.flush_forgotten_barriers();
        self.commands.push(RenderCommand::CopyBuffer {
            src,
            dst,
            regions: regions.to_vec(),
        });
    }

    pub fn copy_buffer_to_image(&mut self, src: RenderHandle, dst: RenderHandle, regions: &[vk::BufferImageCopy]) {
        self.flush_forgotten_barriers();
        self.commands.push(RenderCommand::CopyBufferToImage {
            src,
            dst,
            regions: regions.to_vec(),
        });
    }
}
// tools
impl RenderCommandList {
    /// 取出录制的命令和 descriptor 更新，命令列表可以在下一帧复用
    pub fn take(&mut self) -> (Vec<RenderCommand>, Vec<DescriptorSetLayoutBindingResources>) {
        self.add_custom_barrier_point();
        self.barrier_count = 0;
        self.draw_or_dispatch_count = 0;
        (std::mem::take(&mut self.commands), std::mem::take(&mut self.descriptor_updates))
    }

    pub fn reset(&mut self) {
        self.commands.clear();
        self.descriptor_updates.clear();
        self.pending_barriers = BarrierBatch::default();
        self.barrier_count = 0;
        self.draw_or_dispatch_count = 0;
    }
}
