// Descriptor resources
//
// A single set binds the per-frame uniform block and the texture:
//   binding 0: uniform buffer, vertex stage
//   binding 1: combined image sampler, fragment stage
// None of it depends on the swapchain, so it survives rebuilds.

use ash::vk;
use std::sync::Arc;

use super::buffer::GpuBuffer;
use super::error::{RenderError, Result};
use super::VulkanDevice;

pub const UNIFORM_BINDING: u32 = 0;
pub const SAMPLER_BINDING: u32 = 1;

/// Layout bindings shared by the set layout and the pool sizing.
pub fn layout_bindings() -> [vk::DescriptorSetLayoutBinding<'static>; 2] {
    [
        vk::DescriptorSetLayoutBinding::default()
            .binding(UNIFORM_BINDING)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX),
        vk::DescriptorSetLayoutBinding::default()
            .binding(SAMPLER_BINDING)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT),
    ]
}

/// One descriptor per binding, enough for a single set.
pub fn pool_sizes() -> Vec<vk::DescriptorPoolSize> {
    layout_bindings()
        .iter()
        .map(|b| vk::DescriptorPoolSize {
            ty: b.descriptor_type,
            descriptor_count: b.descriptor_count,
        })
        .collect()
}

pub struct Descriptors {
    device: Arc<VulkanDevice>,
    pub pool: vk::DescriptorPool,
    pub layout: vk::DescriptorSetLayout,
    pub set: vk::DescriptorSet,
}

impl Descriptors {
    /// Create the layout and pool, then allocate the set.
    pub fn new(device: Arc<VulkanDevice>) -> Result<Self> {
        let mut descriptors = Self {
            device,
            pool: vk::DescriptorPool::null(),
            layout: vk::DescriptorSetLayout::null(),
            set: vk::DescriptorSet::null(),
        };

        let bindings = layout_bindings();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        descriptors.layout = unsafe {
            descriptors
                .device
                .device
                .create_descriptor_set_layout(&layout_info, None)
        }
        .map_err(RenderError::creation("descriptor set layout"))?;

        let sizes = pool_sizes();
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&sizes)
            .max_sets(1);
        descriptors.pool = unsafe {
            descriptors
                .device
                .device
                .create_descriptor_pool(&pool_info, None)
        }
        .map_err(RenderError::creation("descriptor pool"))?;

        let set_layouts = [descriptors.layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(descriptors.pool)
            .set_layouts(&set_layouts);
        let sets = unsafe {
            descriptors
                .device
                .device
                .allocate_descriptor_sets(&alloc_info)
        }
        .map_err(RenderError::creation("descriptor set"))?;
        descriptors.set = sets[0];

        log::debug!("Created descriptor set");
        Ok(descriptors)
    }

    /// Point the set at the uniform buffer and the sampled texture.
    pub fn write(
        &self,
        uniform: &GpuBuffer,
        view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> Result<()> {
        if self.set == vk::DescriptorSet::null() {
            return Err(RenderError::InvalidState(
                "descriptor write after destroy".into(),
            ));
        }

        let buffer_info = [vk::DescriptorBufferInfo {
            buffer: uniform.handle(),
            offset: 0,
            range: uniform.capacity(),
        }];
        let image_info = [vk::DescriptorImageInfo {
            sampler,
            image_view: view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];

        let writes = [
            vk::WriteDescriptorSet::default()
                .dst_set(self.set)
                .dst_binding(UNIFORM_BINDING)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info),
            vk::WriteDescriptorSet::default()
                .dst_set(self.set)
                .dst_binding(SAMPLER_BINDING)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(&image_info),
        ];

        unsafe { self.device.device.update_descriptor_sets(&writes, &[]) };
        Ok(())
    }

    /// The set is freed with its pool. Idempotent.
    pub fn destroy(&mut self) {
        unsafe {
            if self.pool != vk::DescriptorPool::null() {
                self.device.device.destroy_descriptor_pool(self.pool, None);
                self.pool = vk::DescriptorPool::null();
                self.set = vk::DescriptorSet::null();
            }
            if self.layout != vk::DescriptorSetLayout::null() {
                self.device
                    .device
                    .destroy_descriptor_set_layout(self.layout, None);
                self.layout = vk::DescriptorSetLayout::null();
            }
        }
    }
}

impl Drop for Descriptors {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bindings_match_shader_interface() {
        let bindings = layout_bindings();
        assert_eq!(bindings[0].binding, 0);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(bindings[0].stage_flags, vk::ShaderStageFlags::VERTEX);
        assert_eq!(bindings[1].binding, 1);
        assert_eq!(
            bindings[1].descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        assert_eq!(bindings[1].stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_pool_has_one_descriptor_per_binding() {
        let sizes = pool_sizes();
        assert_eq!(sizes.len(), 2);
        assert!(sizes.iter().all(|s| s.descriptor_count == 1));
    }
}
