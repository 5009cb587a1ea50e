// Synchronous one-shot transfers
//
// Every upload and layout transition goes through `TransferContext::submit_once`:
// allocate -> begin (one-time) -> record one command -> end -> submit with a
// fresh fence -> wait -> free. Only one transfer is ever in flight; callers
// needing several issue them back to back.

use ash::vk;
use std::sync::Arc;

use super::error::{RenderError, Result};
use super::VulkanDevice;

/// Owns the transient command pool used for setup-time transfers.
pub struct TransferContext {
    device: Arc<VulkanDevice>,
    pool: vk::CommandPool,
}

impl TransferContext {
    pub fn new(device: Arc<VulkanDevice>) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.graphics_queue_family)
            // TRANSIENT: each buffer lives for exactly one submission
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .map_err(RenderError::creation("transfer command pool"))?;

        log::debug!("Created transfer command pool");
        Ok(Self { device, pool })
    }

    /// Record a single command with `record` and block until the GPU has
    /// executed it. The command buffer and fence are released on every path.
    pub fn submit_once<F>(&self, label: &str, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        if self.pool == vk::CommandPool::null() {
            return Err(RenderError::InvalidState(format!(
                "transfer '{label}' issued after the transfer pool was destroyed"
            )));
        }

        log::trace!("Begin transfer: {}", label);
        let device = &self.device.device;
        let mut scope = OneShot::allocate(device, self.pool)?;

        unsafe {
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device
                .begin_command_buffer(scope.cmd, &begin_info)
                .map_err(|result| RenderError::TransferSubmissionFailed {
                    stage: "begin",
                    result,
                })?;

            record(device, scope.cmd);

            device
                .end_command_buffer(scope.cmd)
                .map_err(|result| RenderError::TransferSubmissionFailed {
                    stage: "end",
                    result,
                })?;

            scope.fence = device
                .create_fence(&vk::FenceCreateInfo::default(), None)
                .map_err(RenderError::creation("transfer fence"))?;

            let command_buffers = [scope.cmd];
            let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
            device
                .queue_submit(self.device.graphics_queue, &[submit_info], scope.fence)
                .map_err(|result| RenderError::TransferSubmissionFailed {
                    stage: "submit",
                    result,
                })?;

            // Unbounded: transfers only run during setup
            device
                .wait_for_fences(&[scope.fence], true, u64::MAX)
                .map_err(|result| RenderError::TransferSubmissionFailed {
                    stage: "fence wait",
                    result,
                })?;
        }

        log::trace!("End transfer: {}", label);
        Ok(())
    }

    /// Destroy the pool. Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.pool != vk::CommandPool::null() {
            unsafe { self.device.device.destroy_command_pool(self.pool, None) };
            self.pool = vk::CommandPool::null();
        }
    }
}

impl Drop for TransferContext {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Command buffer + fence for one submission, released on drop.
struct OneShot<'a> {
    device: &'a ash::Device,
    pool: vk::CommandPool,
    cmd: vk::CommandBuffer,
    fence: vk::Fence,
}

impl<'a> OneShot<'a> {
    fn allocate(device: &'a ash::Device, pool: vk::CommandPool) -> Result<Self> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { device.allocate_command_buffers(&alloc_info) }.map_err(|result| {
            RenderError::TransferSubmissionFailed {
                stage: "command buffer allocation",
                result,
            }
        })?;

        Ok(Self {
            device,
            pool,
            cmd: buffers[0],
            fence: vk::Fence::null(),
        })
    }
}

impl Drop for OneShot<'_> {
    fn drop(&mut self) {
        unsafe {
            self.device.free_command_buffers(self.pool, &[self.cmd]);
            if self.fence != vk::Fence::null() {
                self.device.destroy_fence(self.fence, None);
            }
        }
    }
}
