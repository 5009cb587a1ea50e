// Synchronization primitives
//
// One semaphore pair per frame: the acquire signals image_acquired, the draw
// submission waits on it and signals render_finished, present waits on that.
// The CPU side is serialized with a queue idle wait before each acquire, so
// no fence is needed.

use ash::vk;
use std::sync::Arc;

use super::error::{RenderError, Result};
use super::VulkanDevice;

pub struct FrameSync {
    device: Arc<VulkanDevice>,
    pub image_acquired: vk::Semaphore,
    pub render_finished: vk::Semaphore,
}

impl FrameSync {
    pub fn new(device: Arc<VulkanDevice>) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();

        let mut sync = Self {
            device,
            image_acquired: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
        };

        unsafe {
            sync.image_acquired = sync
                .device
                .device
                .create_semaphore(&semaphore_info, None)
                .map_err(RenderError::creation("image acquired semaphore"))?;
            sync.render_finished = sync
                .device
                .device
                .create_semaphore(&semaphore_info, None)
                .map_err(RenderError::creation("render finished semaphore"))?;
        }

        Ok(sync)
    }

    pub fn destroy(&mut self) {
        unsafe {
            if self.image_acquired != vk::Semaphore::null() {
                self.device.device.destroy_semaphore(self.image_acquired, None);
                self.image_acquired = vk::Semaphore::null();
            }
            if self.render_finished != vk::Semaphore::null() {
                self.device.device.destroy_semaphore(self.render_finished, None);
                self.render_finished = vk::Semaphore::null();
            }
        }
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        self.destroy();
    }
}
