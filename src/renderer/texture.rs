// Texture loading
//
// Decode -> staging -> Undefined to TransferDst -> copy -> TransferDst to
// ShaderReadOnly -> view + sampler. Each GPU step is its own synchronous
// transfer.

use ash::vk;
use std::path::Path;
use std::sync::Arc;

use crate::backend::{GpuBuffer, GpuImage, ImageLayout, RenderError, Result, TransferContext, VulkanDevice};

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Decode an image file into tightly packed RGBA8 texels.
pub fn decode_rgba(path: &Path) -> Result<(u32, u32, Vec<u8>)> {
    let decoded = image::open(path).map_err(|source| RenderError::ImageDecode {
        path: path.to_path_buf(),
        source,
    })?;
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok((width, height, rgba.into_raw()))
}

/// Upload RGBA8 texels through `staging` into a sampled device-local image.
/// `staging` is recreated to hold the pixels and left holding them. Fails
/// with `CopyOutOfBounds` when `pixels` is shorter than `width * height * 4`.
pub fn upload_rgba(
    device: Arc<VulkanDevice>,
    transfer: &TransferContext,
    staging: &mut GpuBuffer,
    width: u32,
    height: u32,
    pixels: &[u8],
) -> Result<GpuImage> {
    staging.reset_with(pixels, 0)?;

    let mut texture = GpuImage::create(
        device,
        width,
        height,
        TEXTURE_FORMAT,
        vk::ImageTiling::OPTIMAL,
        vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;

    texture.transition_layout(transfer, ImageLayout::TransferDstOptimal)?;
    staging.copy_to_image(&mut texture, transfer, width, height, vk::Offset3D::default())?;
    texture.transition_layout(transfer, ImageLayout::ShaderReadOnlyOptimal)?;

    texture.create_view()?;
    texture.create_sampler()?;

    log::info!("Uploaded {}x{} texture", width, height);
    Ok(texture)
}

/// Load the texture at `path` onto the GPU.
pub fn load_texture(
    device: Arc<VulkanDevice>,
    transfer: &TransferContext,
    staging: &mut GpuBuffer,
    path: &Path,
) -> Result<GpuImage> {
    let (width, height, pixels) = decode_rgba(path)?;
    log::debug!("Decoded {:?}: {}x{}", path, width, height);
    upload_rgba(device, transfer, staging, width, height, &pixels)
}
