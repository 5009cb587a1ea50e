// Drawing environment
//
// One pre-recorded command buffer per framebuffer plus the frame semaphore
// pair. Everything here references the current framebuffers, so it is
// thrown away and recorded again on every swapchain rebuild.

use ash::vk;
use std::sync::Arc;

use crate::backend::{FrameSync, GpuBuffer, PipelineBundle, RenderError, Result, VulkanDevice};

/// Long-lived pool the draw command buffers are allocated from.
pub struct CommandPool {
    device: Arc<VulkanDevice>,
    pool: vk::CommandPool,
}

impl CommandPool {
    pub fn new(device: Arc<VulkanDevice>) -> Result<Self> {
        let pool_info =
            vk::CommandPoolCreateInfo::default().queue_family_index(device.graphics_queue_family);
        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .map_err(RenderError::creation("graphics command pool"))?;
        Ok(Self { device, pool })
    }

    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Also frees any command buffers still allocated from it. Idempotent.
    pub fn destroy(&mut self) {
        if self.pool != vk::CommandPool::null() {
            unsafe { self.device.device.destroy_command_pool(self.pool, None) };
            self.pool = vk::CommandPool::null();
        }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// What the recorded commands draw with.
pub struct DrawInputs<'a> {
    pub vertex_buffer: &'a GpuBuffer,
    pub index_buffer: &'a GpuBuffer,
    pub descriptor_set: vk::DescriptorSet,
    pub clear_color: [f32; 4],
}

pub struct DrawingEnvironment {
    device: Arc<VulkanDevice>,
    pool: vk::CommandPool,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub sync: FrameSync,
}

impl DrawingEnvironment {
    /// Allocate one command buffer per framebuffer from `pool` and record
    /// the draw into each.
    pub fn new(
        device: Arc<VulkanDevice>,
        pool: vk::CommandPool,
        pipeline: &PipelineBundle,
        inputs: &DrawInputs<'_>,
    ) -> Result<Self> {
        let sync = FrameSync::new(device.clone())?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(pipeline.framebuffers.len() as u32);

        let command_buffers = unsafe { device.device.allocate_command_buffers(&alloc_info) }
            .map_err(RenderError::creation("draw command buffers"))?;

        let environment = Self {
            device,
            pool,
            command_buffers,
            sync,
        };
        environment.record(pipeline, inputs)?;

        log::info!(
            "Recorded {} draw command buffers",
            environment.command_buffers.len()
        );
        Ok(environment)
    }

    fn record(&self, pipeline: &PipelineBundle, inputs: &DrawInputs<'_>) -> Result<()> {
        let device = &self.device.device;
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: inputs.clear_color,
            },
        }];
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: pipeline.extent,
        };

        for (&cmd, &framebuffer) in self.command_buffers.iter().zip(&pipeline.framebuffers) {
            unsafe {
                device
                    .begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default())
                    .map_err(RenderError::creation("draw command recording"))?;

                let render_pass_info = vk::RenderPassBeginInfo::default()
                    .render_pass(pipeline.render_pass)
                    .framebuffer(framebuffer)
                    .render_area(render_area)
                    .clear_values(&clear_values);

                device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
                device.cmd_bind_vertex_buffers(cmd, 0, &[inputs.vertex_buffer.handle()], &[0]);
                device.cmd_bind_index_buffer(
                    cmd,
                    inputs.index_buffer.handle(),
                    0,
                    inputs.index_buffer.index_type(),
                );
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    pipeline.layout,
                    0,
                    &[inputs.descriptor_set],
                    &[],
                );
                device.cmd_draw_indexed(cmd, inputs.index_buffer.index_count(), 1, 0, 0, 0);
                device.cmd_end_render_pass(cmd);

                device
                    .end_command_buffer(cmd)
                    .map_err(RenderError::creation("draw command recording"))?;
            }
        }

        Ok(())
    }

    pub fn command_buffer(&self, image_index: u32) -> Option<vk::CommandBuffer> {
        self.command_buffers.get(image_index as usize).copied()
    }

    /// Free the command buffers and destroy the semaphores. Idempotent.
    pub fn destroy(&mut self) {
        if !self.command_buffers.is_empty() {
            unsafe {
                self.device
                    .device
                    .free_command_buffers(self.pool, &self.command_buffers)
            };
            self.command_buffers.clear();
        }
        self.sync.destroy();
    }
}

impl Drop for DrawingEnvironment {
    fn drop(&mut self) {
        self.destroy();
    }
}
