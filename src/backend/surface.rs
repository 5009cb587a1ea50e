// Window surface
//
// The presentable surface and the queries the swapchain needs against it.
// Owned by VulkanDevice so it is destroyed after the logical device and
// before the instance.

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use super::error::{RenderError, Result};

pub struct Surface {
    loader: ash::khr::surface::Instance,
    handle: vk::SurfaceKHR,
}

impl Surface {
    pub(super) fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<Self> {
        let handle = unsafe { ash_window::create_surface(entry, instance, display, window, None) }
            .map_err(RenderError::creation("window surface"))?;
        let loader = ash::khr::surface::Instance::new(entry, instance);

        Ok(Self { loader, handle })
    }

    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, queue_family: u32) -> bool {
        unsafe {
            self.loader.get_physical_device_surface_support(
                physical_device,
                queue_family,
                self.handle,
            )
        }
        .unwrap_or(false)
    }

    pub fn capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<vk::SurfaceCapabilitiesKHR> {
        Ok(unsafe {
            self.loader
                .get_physical_device_surface_capabilities(physical_device, self.handle)
        }?)
    }

    pub fn formats(&self, physical_device: vk::PhysicalDevice) -> Result<Vec<vk::SurfaceFormatKHR>> {
        Ok(unsafe {
            self.loader
                .get_physical_device_surface_formats(physical_device, self.handle)
        }?)
    }

    pub fn present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::PresentModeKHR>> {
        Ok(unsafe {
            self.loader
                .get_physical_device_surface_present_modes(physical_device, self.handle)
        }?)
    }

    pub(super) fn destroy(&mut self) {
        if self.handle != vk::SurfaceKHR::null() {
            unsafe { self.loader.destroy_surface(self.handle, None) };
            self.handle = vk::SurfaceKHR::null();
        }
    }
}

/// Pick the swapchain extent: the surface's fixed extent when it reports one,
/// otherwise the window size clamped to what the surface allows.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 16,
                height: 16,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            ..Default::default()
        }
    }

    #[test]
    fn fixed_extent_wins() {
        let extent = choose_extent(&caps((800, 600)), 1920, 1080);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn free_extent_is_clamped() {
        let extent = choose_extent(&caps((u32::MAX, u32::MAX)), 8000, 4);
        assert_eq!((extent.width, extent.height), (4096, 16));

        let extent = choose_extent(&caps((u32::MAX, u32::MAX)), 640, 480);
        assert_eq!((extent.width, extent.height), (640, 480));
    }
}
