// GPU images (textures)
//
// An image carries the layout it was last transitioned to. Transitions are
// limited to the edges a texture upload needs; anything else is rejected
// before any GPU work is recorded.

use ash::vk;
use std::sync::Arc;

use super::buffer::GpuBuffer;
use super::error::{RenderError, Result};
use super::memory::select_memory_type;
use super::transfer::TransferContext;
use super::VulkanDevice;

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Layouts a texture moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageLayout {
    Undefined,
    TransferDstOptimal,
    ShaderReadOnlyOptimal,
}

impl ImageLayout {
    pub const ALL: [ImageLayout; 3] = [
        ImageLayout::Undefined,
        ImageLayout::TransferDstOptimal,
        ImageLayout::ShaderReadOnlyOptimal,
    ];

    pub fn to_vk(self) -> vk::ImageLayout {
        match self {
            ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
            ImageLayout::TransferDstOptimal => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ImageLayout::ShaderReadOnlyOptimal => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}

/// Access and stage masks for one pipeline barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// The supported layout edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutTransition {
    /// Fresh image becomes a copy target.
    UndefinedToTransferDst,
    /// Uploaded pixels become readable by the fragment shader.
    TransferDstToShaderRead,
}

impl LayoutTransition {
    pub fn resolve(old: ImageLayout, new: ImageLayout) -> Result<Self> {
        match (old, new) {
            (ImageLayout::Undefined, ImageLayout::TransferDstOptimal) => {
                Ok(Self::UndefinedToTransferDst)
            }
            (ImageLayout::TransferDstOptimal, ImageLayout::ShaderReadOnlyOptimal) => {
                Ok(Self::TransferDstToShaderRead)
            }
            _ => Err(RenderError::UnsupportedLayoutTransition { old, new }),
        }
    }

    pub fn layouts(self) -> (ImageLayout, ImageLayout) {
        match self {
            Self::UndefinedToTransferDst => {
                (ImageLayout::Undefined, ImageLayout::TransferDstOptimal)
            }
            Self::TransferDstToShaderRead => {
                (ImageLayout::TransferDstOptimal, ImageLayout::ShaderReadOnlyOptimal)
            }
        }
    }

    pub fn masks(self) -> BarrierMasks {
        match self {
            Self::UndefinedToTransferDst => BarrierMasks {
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::TRANSFER_WRITE,
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stage: vk::PipelineStageFlags::TRANSFER,
            },
            Self::TransferDstToShaderRead => BarrierMasks {
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::SHADER_READ,
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            },
        }
    }
}

/// Bytes per texel for the uncompressed color formats images are uploaded in.
pub fn texel_size(format: vk::Format) -> Option<vk::DeviceSize> {
    match format {
        vk::Format::R8_UNORM | vk::Format::R8_SRGB => Some(1),
        vk::Format::R8G8_UNORM | vk::Format::R8G8_SRGB => Some(2),
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB => Some(4),
        vk::Format::R16G16B16A16_SFLOAT => Some(8),
        vk::Format::R32G32B32A32_SFLOAT => Some(16),
        _ => None,
    }
}

/// Reject a `width` x `height` region at `offset` that leaves the image.
pub fn check_region(
    image_width: u32,
    image_height: u32,
    offset: vk::Offset3D,
    width: u32,
    height: u32,
) -> Result<()> {
    let fits = |start: i32, len: u32, limit: u32| {
        u32::try_from(start)
            .ok()
            .and_then(|start| start.checked_add(len))
            .is_some_and(|end| end <= limit)
    };

    if offset.z == 0 && fits(offset.x, width, image_width) && fits(offset.y, height, image_height)
    {
        Ok(())
    } else {
        Err(RenderError::ImageRegionOutOfBounds {
            offset,
            width,
            height,
            image_width,
            image_height,
        })
    }
}

/// Image + dedicated memory + optional view and sampler.
pub struct GpuImage {
    device: Arc<VulkanDevice>,
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub tiling: vk::ImageTiling,
    layout: ImageLayout,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: Option<vk::ImageView>,
    sampler: Option<vk::Sampler>,
}

impl GpuImage {
    /// Create a 2D image and bind freshly allocated memory. Starts Undefined.
    pub fn create(
        device: Arc<VulkanDevice>,
        width: u32,
        height: u32,
        format: vk::Format,
        tiling: vk::ImageTiling,
        usage: vk::ImageUsageFlags,
        memory_properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.device.create_image(&image_info, None) }
            .map_err(RenderError::creation("image"))?;

        // From here on the struct owns the handle, so errors clean up via Drop
        let mut created = Self {
            device,
            width,
            height,
            format,
            tiling,
            layout: ImageLayout::Undefined,
            image,
            memory: vk::DeviceMemory::null(),
            view: None,
            sampler: None,
        };
        created.allocate(memory_properties)?;

        log::debug!("Created {}x{} image ({:?})", width, height, format);
        Ok(created)
    }

    fn allocate(&mut self, memory_properties: vk::MemoryPropertyFlags) -> Result<()> {
        let device = &self.device;
        let requirements = unsafe { device.device.get_image_memory_requirements(self.image) };

        let memory_type_index = select_memory_type(
            &device.memory_properties,
            requirements.memory_type_bits,
            memory_properties,
        )?;

        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        self.memory = unsafe { device.device.allocate_memory(&alloc_info, None) }.map_err(
            |result| RenderError::AllocationFailed {
                size: requirements.size,
                result,
            },
        )?;

        unsafe { device.device.bind_image_memory(self.image, self.memory, 0) }
            .map_err(RenderError::creation("image memory binding"))?;

        Ok(())
    }

    pub fn layout(&self) -> ImageLayout {
        self.layout
    }

    pub fn handle(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> Option<vk::ImageView> {
        self.view
    }

    pub fn sampler(&self) -> Option<vk::Sampler> {
        self.sampler
    }

    /// Move the image from its current layout to `new_layout` with a single
    /// pipeline barrier. The stored layout changes only once the barrier has
    /// completed on the GPU.
    pub fn transition_layout(
        &mut self,
        transfer: &TransferContext,
        new_layout: ImageLayout,
    ) -> Result<()> {
        let transition = LayoutTransition::resolve(self.layout, new_layout)?;
        let masks = transition.masks();
        let (old, new) = transition.layouts();

        let barrier = vk::ImageMemoryBarrier::default()
            .src_access_mask(masks.src_access)
            .dst_access_mask(masks.dst_access)
            .old_layout(old.to_vk())
            .new_layout(new.to_vk())
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(COLOR_RANGE);

        transfer.submit_once("image layout transition", |device, cmd| unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                masks.src_stage,
                masks.dst_stage,
                vk::DependencyFlags::BY_REGION,
                &[],
                &[],
                &[barrier],
            );
        })?;

        log::debug!("Image layout {:?} -> {:?}", old, new);
        self.layout = new;
        Ok(())
    }

    /// Copy `width` x `height` tightly packed texels out of `staging` into
    /// this image at `dst_offset`. The region must lie inside the image and
    /// `staging` must hold at least the texels it covers.
    pub fn copy_from_buffer(
        &mut self,
        staging: &GpuBuffer,
        transfer: &TransferContext,
        width: u32,
        height: u32,
        dst_offset: vk::Offset3D,
    ) -> Result<()> {
        if self.layout != ImageLayout::TransferDstOptimal {
            return Err(RenderError::WrongImageLayout {
                expected: ImageLayout::TransferDstOptimal,
                actual: self.layout,
            });
        }
        check_region(self.width, self.height, dst_offset, width, height)?;

        let texel = texel_size(self.format).ok_or_else(|| {
            RenderError::InvalidState(format!("no texel size known for {:?}", self.format))
        })?;
        let required = vk::DeviceSize::from(width) * vk::DeviceSize::from(height) * texel;
        if required == 0 {
            return Ok(());
        }
        if staging.is_empty() || staging.size() < required {
            return Err(RenderError::CopyOutOfBounds {
                size: required,
                offset: 0,
                capacity: staging.size(),
            });
        }

        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: dst_offset,
            image_extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
        };

        let source = staging.handle();
        let image = self.image;
        transfer.submit_once("buffer to image copy", |device, cmd| unsafe {
            device.cmd_copy_buffer_to_image(
                cmd,
                source,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        })
    }

    /// Create the 2D color view. Call once the image holds its final pixels.
    pub fn create_view(&mut self) -> Result<vk::ImageView> {
        if let Some(view) = self.view {
            return Ok(view);
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(self.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.format)
            .components(vk::ComponentMapping::default())
            .subresource_range(COLOR_RANGE);

        let view = unsafe { self.device.device.create_image_view(&view_info, None) }
            .map_err(RenderError::creation("image view"))?;
        self.view = Some(view);
        Ok(view)
    }

    /// Create a linear, repeating sampler. Anisotropy is used when the device
    /// enabled it.
    pub fn create_sampler(&mut self) -> Result<vk::Sampler> {
        if let Some(sampler) = self.sampler {
            return Ok(sampler);
        }

        let anisotropy = self.device.sampler_anisotropy;
        let max_anisotropy = self
            .device
            .properties
            .limits
            .max_sampler_anisotropy
            .min(16.0);

        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(anisotropy)
            .max_anisotropy(if anisotropy { max_anisotropy } else { 1.0 })
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false);

        let sampler = unsafe { self.device.device.create_sampler(&sampler_info, None) }
            .map_err(RenderError::creation("sampler"))?;
        self.sampler = Some(sampler);
        Ok(sampler)
    }

    pub fn is_destroyed(&self) -> bool {
        self.image == vk::Image::null()
    }

    /// Release sampler, view, memory, then the image. Idempotent.
    pub fn destroy(&mut self) {
        let device = &self.device.device;
        unsafe {
            if let Some(sampler) = self.sampler.take() {
                device.destroy_sampler(sampler, None);
            }
            if let Some(view) = self.view.take() {
                device.destroy_image_view(view, None);
            }
            if self.memory != vk::DeviceMemory::null() {
                device.free_memory(self.memory, None);
                self.memory = vk::DeviceMemory::null();
            }
            if self.image != vk::Image::null() {
                device.destroy_image(self.image, None);
                self.image = vk::Image::null();
            }
        }
        self.layout = ImageLayout::Undefined;
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_to_transfer_dst_masks() {
        let transition =
            LayoutTransition::resolve(ImageLayout::Undefined, ImageLayout::TransferDstOptimal)
                .unwrap();
        assert_eq!(transition, LayoutTransition::UndefinedToTransferDst);
        assert_eq!(
            transition.masks(),
            BarrierMasks {
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::TRANSFER_WRITE,
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stage: vk::PipelineStageFlags::TRANSFER,
            }
        );
    }

    #[test]
    fn transfer_dst_to_shader_read_masks() {
        let transition = LayoutTransition::resolve(
            ImageLayout::TransferDstOptimal,
            ImageLayout::ShaderReadOnlyOptimal,
        )
        .unwrap();
        assert_eq!(transition, LayoutTransition::TransferDstToShaderRead);
        assert_eq!(
            transition.masks(),
            BarrierMasks {
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::SHADER_READ,
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            }
        );
    }

    #[test]
    fn every_other_pair_is_rejected() {
        let supported = [
            (ImageLayout::Undefined, ImageLayout::TransferDstOptimal),
            (ImageLayout::TransferDstOptimal, ImageLayout::ShaderReadOnlyOptimal),
        ];

        for old in ImageLayout::ALL {
            for new in ImageLayout::ALL {
                let result = LayoutTransition::resolve(old, new);
                if supported.contains(&(old, new)) {
                    assert_eq!(result.unwrap().layouts(), (old, new));
                } else {
                    match result {
                        Err(RenderError::UnsupportedLayoutTransition { old: o, new: n }) => {
                            assert_eq!((o, n), (old, new));
                        }
                        other => panic!("{old:?} -> {new:?} should be rejected, got {other:?}"),
                    }
                }
            }
        }
    }

    fn offset(x: i32, y: i32) -> vk::Offset3D {
        vk::Offset3D { x, y, z: 0 }
    }

    #[test]
    fn region_inside_image_is_accepted() {
        assert!(check_region(4, 4, offset(0, 0), 4, 4).is_ok());
        assert!(check_region(4, 4, offset(2, 2), 2, 2).is_ok());
        assert!(check_region(64, 32, offset(63, 31), 1, 1).is_ok());
    }

    #[test]
    fn region_leaving_image_is_rejected() {
        for (at, width, height) in [
            (offset(3, 3), 2, 2),
            (offset(0, 0), 5, 4),
            (offset(0, 1), 4, 4),
            (offset(-1, 0), 1, 1),
            (offset(1, 1), u32::MAX, 1),
            (vk::Offset3D { x: 0, y: 0, z: 1 }, 1, 1),
        ] {
            assert!(matches!(
                check_region(4, 4, at, width, height),
                Err(RenderError::ImageRegionOutOfBounds { .. })
            ));
        }
    }

    #[test]
    fn texel_sizes_for_upload_formats() {
        assert_eq!(texel_size(vk::Format::R8G8B8A8_SRGB), Some(4));
        assert_eq!(texel_size(vk::Format::B8G8R8A8_UNORM), Some(4));
        assert_eq!(texel_size(vk::Format::R8_UNORM), Some(1));
        assert_eq!(texel_size(vk::Format::BC1_RGB_UNORM_BLOCK), None);
    }

    #[test]
    fn layouts_map_to_vulkan() {
        assert_eq!(ImageLayout::Undefined.to_vk(), vk::ImageLayout::UNDEFINED);
        assert_eq!(
            ImageLayout::TransferDstOptimal.to_vk(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        );
        assert_eq!(
            ImageLayout::ShaderReadOnlyOptimal.to_vk(),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
    }
}
