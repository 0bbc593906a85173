use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use super::device::DeviceShared;
use super::resource::{Buffer, Image};

/// Structure that wraps around the raw vulkan CommandPool object.
pub(crate) struct CommandPool {
    pub(crate) raw: vk::CommandPool,
    device: Arc<DeviceShared>,
}

impl CommandPool {
    pub(crate) fn new(device: Arc<DeviceShared>, queue_family_index: u32) -> Result<Self> {
        let command_pool_info =
            vk::CommandPoolCreateInfo::default().queue_family_index(queue_family_index);

        let raw = unsafe {
            let command_pool = device.raw.create_command_pool(&command_pool_info, None)?;
            device
                .raw
                .reset_command_pool(command_pool, vk::CommandPoolResetFlags::empty())?;
            command_pool
        };

        Ok(Self { raw, device })
    }

    pub(crate) fn allocate_command_buffers(
        &self,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.raw)
            .level(level)
            .command_buffer_count(count);
        let command_buffers = unsafe { self.device.raw.allocate_command_buffers(&allocate_info)? };
        Ok(command_buffers)
    }

    pub(crate) fn reset(&self) -> Result<()> {
        unsafe {
            self.device
                .raw
                .reset_command_pool(self.raw, vk::CommandPoolResetFlags::empty())?
        }
        Ok(())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.device.raw.destroy_command_pool(self.raw, None) }
    }
}

/// Handles command buffer creation and usage, one pool per in-flight frame slot.
pub(crate) struct CommandBufferManager {
    device: Arc<DeviceShared>,
    command_pools: Vec<CommandPool>,
    command_buffers: Vec<CommandBuffer>,
}

impl CommandBufferManager {
    /// Creates a manager instance and allocates one primary command buffer per pool.
    pub(crate) fn new(
        device: Arc<DeviceShared>,
        queue_family_index: u32,
        num_command_pools: u32,
    ) -> Result<Self> {
        let command_pools = (0..num_command_pools)
            .map(|_| CommandPool::new(device.clone(), queue_family_index))
            .collect::<Result<Vec<_>>>()?;

        let command_buffers = command_pools
            .iter()
            .map(|pool| {
                Ok(CommandBuffer::new_from_vulkan_handle(
                    pool.allocate_command_buffers(vk::CommandBufferLevel::PRIMARY, 1)?[0],
                    device.clone(),
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            device,
            command_pools,
            command_buffers,
        })
    }

    pub(crate) fn reset_pool(&mut self, pool_index: usize) -> Result<()> {
        self.command_pools[pool_index].reset()
    }

    pub(crate) fn command_buffer_at(&self, pool_index: usize) -> CommandBuffer {
        self.command_buffers[pool_index].clone()
    }

    pub(crate) fn allocate_secondary(
        &self,
        pool_index: usize,
        count: u32,
    ) -> Result<Vec<CommandBuffer>> {
        Ok(self.command_pools[pool_index]
            .allocate_command_buffers(vk::CommandBufferLevel::SECONDARY, count)?
            .into_iter()
            .map(|raw| CommandBuffer::new_from_vulkan_handle(raw, self.device.clone()))
            .collect())
    }
}

/// Does not own the pool it was allocated from: the frame ring owns pools and resets them
/// wholesale once a frame slot is reused, per the slot-owns-its-resources rule (§4.4).
#[derive(Clone)]
pub struct CommandBuffer {
    pub(crate) raw: vk::CommandBuffer,
    device: Arc<DeviceShared>,
}

impl CommandBuffer {
    pub(crate) fn new_from_vulkan_handle(raw: vk::CommandBuffer, device: Arc<DeviceShared>) -> Self {
        Self { raw, device }
    }

    pub fn begin(&self) -> Result<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .raw
                .begin_command_buffer(self.raw, &begin_info)?
        };

        Ok(())
    }

    pub fn end(&self) -> Result<()> {
        unsafe {
            self.device.raw.end_command_buffer(self.raw)?;
        }

        Ok(())
    }

    /// Opens a traditional render pass instance (§4.3): one call per subpass chain, not per
    /// merged pass.
    pub fn begin_render_pass(
        &self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
        clear_values: &[vk::ClearValue],
    ) {
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(clear_values);
        unsafe {
            self.device.raw.cmd_begin_render_pass(
                self.raw,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }
    }

    /// Advances to the next subpass within the chain currently open on this command buffer.
    pub fn next_subpass(&self) {
        unsafe {
            self.device
                .raw
                .cmd_next_subpass(self.raw, vk::SubpassContents::INLINE);
        }
    }

    pub fn end_render_pass(&self) {
        unsafe {
            self.device.raw.cmd_end_render_pass(self.raw);
        }
    }

    /// Image layout transition / queue ownership transfer barrier.
    pub fn pipeline_image_barrier(&self, image_memory_barriers: &[vk::ImageMemoryBarrier2]) {
        let dependency_info =
            vk::DependencyInfo::default().image_memory_barriers(image_memory_barriers);
        unsafe {
            self.device
                .raw
                .cmd_pipeline_barrier2(self.raw, &dependency_info);
        }
    }

    /// Execution-only barrier: no layout transition and no queue ownership transfer, used
    /// when a catch only needs to order stages against each other (§4.6).
    pub fn pipeline_execution_barrier(&self, memory_barriers: &[vk::MemoryBarrier2]) {
        let dependency_info = vk::DependencyInfo::default().memory_barriers(memory_barriers);
        unsafe {
            self.device
                .raw
                .cmd_pipeline_barrier2(self.raw, &dependency_info);
        }
    }

    pub fn bind_vertex_buffers(&self, first_binding: u32, buffers: &[&Buffer], offsets: &[u64]) {
        let raw_buffers = buffers.iter().map(|buffer| buffer.raw).collect::<Vec<_>>();
        unsafe {
            self.device.raw.cmd_bind_vertex_buffers2(
                self.raw,
                first_binding,
                &raw_buffers,
                offsets,
                None,
                None,
            )
        }
    }

    pub fn bind_index_buffer(&self, buffer: &Buffer, offset: u64) {
        unsafe {
            self.device.raw.cmd_bind_index_buffer(
                self.raw,
                buffer.raw,
                offset,
                vk::IndexType::UINT16,
            );
        }
    }

    pub fn set_viewport_scissor(&self, extent: vk::Extent2D) {
        let viewport = vk::Viewport::default()
            .width(extent.width as f32)
            .height(extent.height as f32)
            .min_depth(0.0)
            .max_depth(1.0);
        let scissor = vk::Rect2D::default().extent(extent);
        unsafe {
            self.device
                .raw
                .cmd_set_viewport(self.raw, 0, std::slice::from_ref(&viewport));
            self.device
                .raw
                .cmd_set_scissor(self.raw, 0, std::slice::from_ref(&scissor));
        }
    }

    pub fn draw(&self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            self.device.raw.cmd_draw(
                self.raw,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
    }

    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.raw.cmd_draw_indexed(
                self.raw,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    pub fn draw_indirect(&self, buffer: &Buffer, offset: u64, draw_count: u32, stride: u32) {
        unsafe {
            self.device
                .raw
                .cmd_draw_indirect(self.raw, buffer.raw, offset, draw_count, stride)
        }
    }

    pub fn draw_indirect_count(
        &self,
        buffer: &Buffer,
        buffer_offset: u64,
        count_buffer: &Buffer,
        count_buffer_offset: u64,
        max_draw_count: u32,
        stride: u32,
    ) {
        unsafe {
            self.device.raw.cmd_draw_indirect_count(
                self.raw,
                buffer.raw,
                buffer_offset,
                count_buffer.raw,
                count_buffer_offset,
                max_draw_count,
                stride,
            )
        }
    }

    pub fn draw_indexed_indirect(&self, buffer: &Buffer, offset: u64, draw_count: u32, stride: u32) {
        unsafe {
            self.device
                .raw
                .cmd_draw_indexed_indirect(self.raw, buffer.raw, offset, draw_count, stride)
        }
    }

    pub fn draw_indexed_indirect_count(
        &self,
        buffer: &Buffer,
        buffer_offset: u64,
        count_buffer: &Buffer,
        count_buffer_offset: u64,
        max_draw_count: u32,
        stride: u32,
    ) {
        unsafe {
            self.device.raw.cmd_draw_indexed_indirect_count(
                self.raw,
                buffer.raw,
                buffer_offset,
                count_buffer.raw,
                count_buffer_offset,
                max_draw_count,
                stride,
            )
        }
    }

    pub fn copy_buffer_to_image(&self, buffer: &Buffer, image: &Image, buffer_offset: u64) {
        let region = vk::BufferImageCopy2::default()
            .buffer_offset(buffer_offset)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(image.extent);

        let info = vk::CopyBufferToImageInfo2::default()
            .src_buffer(buffer.raw)
            .dst_image(image.raw)
            .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .regions(std::slice::from_ref(&region));

        unsafe {
            self.device.raw.cmd_copy_buffer_to_image2(self.raw, &info);
        }
    }

    pub(crate) fn execute_secondary(&self, secondary: &[CommandBuffer]) {
        let raws = secondary.iter().map(|cb| cb.raw).collect::<Vec<_>>();
        unsafe {
            self.device.raw.cmd_execute_commands(self.raw, &raws);
        }
    }
}
