//! Integration test: synchronous transfers on a real device
//!
//! Uploads through a staging buffer, copies on the GPU (at zero and non-zero
//! offsets) and reads the result back through a host-visible mirror. Needs a Vulkan driver; every test
//! returns early when no device can be created.
//!
//! Run with: cargo test --test gpu_transfer -- --nocapture

use ash::vk;
use quad_renderer::backend::{
    BufferKind, GpuBuffer, GpuImage, ImageLayout, RenderError, TransferContext, VulkanDevice,
};
use quad_renderer::mesh::{Vertex, QUAD_INDICES, QUAD_VERTICES};
use quad_renderer::renderer::texture;
use std::sync::Arc;

fn gpu() -> Option<(Arc<VulkanDevice>, TransferContext)> {
    let device = match VulkanDevice::headless("gpu-transfer-test", false) {
        Ok(device) => device,
        Err(e) => {
            println!("Skipping: no Vulkan device ({})", e);
            return None;
        }
    };
    let transfer = TransferContext::new(device.clone()).expect("transfer pool");
    Some((device, transfer))
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + 7) as u8).collect()
}

/// staging -> device-local -> readback
fn round_trip(device: &Arc<VulkanDevice>, transfer: &TransferContext, bytes: &[u8]) -> Vec<u8> {
    let len = bytes.len() as vk::DeviceSize;
    let staging = GpuBuffer::with_data(device.clone(), BufferKind::Staging, bytes, 0).unwrap();
    let mut local = GpuBuffer::new(device.clone(), BufferKind::Vertex, len).unwrap();
    let mut mirror = GpuBuffer::new(device.clone(), BufferKind::Readback, len).unwrap();

    staging.copy_to(&mut local, transfer, 0, 0).unwrap();
    local.copy_to(&mut mirror, transfer, 0, 0).unwrap();
    assert_eq!(local.size(), len);
    assert_eq!(mirror.size(), len);

    mirror.read_bytes().unwrap()
}

#[test]
fn test_round_trip_is_byte_identical() {
    let Some((device, transfer)) = gpu() else {
        return;
    };

    for len in [0usize, 1, 4096, 1023, 77] {
        let bytes = pattern(len);
        assert_eq!(round_trip(&device, &transfer, &bytes), bytes, "length {}", len);
    }
}

#[test]
fn test_quad_upload_records_size_and_stride() {
    let Some((device, transfer)) = gpu() else {
        return;
    };

    let vertex_bytes: &[u8] = bytemuck::cast_slice(&QUAD_VERTICES);
    let index_bytes: &[u8] = bytemuck::cast_slice(&QUAD_INDICES);

    let mut staging =
        GpuBuffer::with_data(device.clone(), BufferKind::Staging, vertex_bytes, Vertex::STRIDE)
            .unwrap();
    let mut vertices =
        GpuBuffer::new(device.clone(), BufferKind::Vertex, vertex_bytes.len() as u64).unwrap();
    staging.copy_to(&mut vertices, &transfer, 0, 0).unwrap();
    Vertex::describe(&mut vertices);

    assert_eq!(vertices.size(), vertex_bytes.len() as u64);
    assert_eq!(vertices.stride(), Vertex::STRIDE);
    assert_eq!(vertices.binding_description().stride, 28);
    let offsets: Vec<u32> = vertices
        .attribute_descriptions()
        .iter()
        .map(|a| a.offset)
        .collect();
    assert_eq!(offsets, vec![0, 8, 20]);

    // Same staging buffer, recycled for the indices
    staging.reset_with(index_bytes, 0).unwrap();
    let mut indices =
        GpuBuffer::new(device.clone(), BufferKind::Index, index_bytes.len() as u64).unwrap();
    staging.copy_to(&mut indices, &transfer, 0, 0).unwrap();

    assert_eq!(indices.size(), 24);
    assert_eq!(indices.stride(), 0);
    assert_eq!(indices.index_count(), 6);
}

#[test]
fn test_copy_past_capacity_is_rejected() {
    let Some((device, transfer)) = gpu() else {
        return;
    };

    let staging =
        GpuBuffer::with_data(device.clone(), BufferKind::Staging, &pattern(64), 0).unwrap();
    let mut small = GpuBuffer::new(device.clone(), BufferKind::Vertex, 32).unwrap();

    let result = staging.copy_to(&mut small, &transfer, 0, 0);
    assert!(matches!(result, Err(RenderError::CopyOutOfBounds { .. })));
    assert_eq!(small.size(), 0);
}

#[test]
fn test_offset_copies_round_trip() {
    let Some((device, transfer)) = gpu() else {
        return;
    };

    let bytes = pattern(32);
    let staging = GpuBuffer::with_data(device.clone(), BufferKind::Staging, &bytes, 0).unwrap();
    let mut local = GpuBuffer::new(device.clone(), BufferKind::Vertex, 64).unwrap();
    let mut mirror = GpuBuffer::new(device.clone(), BufferKind::Readback, 32).unwrap();

    // Into the middle of the device buffer, then back out from the same place
    staging.copy_to(&mut local, &transfer, 0, 16).unwrap();
    assert_eq!(local.size(), 32);
    local.copy_to(&mut mirror, &transfer, 16, 0).unwrap();

    assert_eq!(mirror.read_bytes().unwrap(), bytes);
}

#[test]
fn test_offset_past_capacity_is_rejected() {
    let Some((device, transfer)) = gpu() else {
        return;
    };

    let staging =
        GpuBuffer::with_data(device.clone(), BufferKind::Staging, &pattern(32), 0).unwrap();
    let mut local = GpuBuffer::new(device.clone(), BufferKind::Vertex, 64).unwrap();

    for dst_offset in [40, u64::MAX] {
        let result = staging.copy_to(&mut local, &transfer, 0, dst_offset);
        assert!(matches!(result, Err(RenderError::CopyOutOfBounds { .. })));
    }
    let result = staging.copy_to(&mut local, &transfer, u64::MAX - 8, 0);
    assert!(matches!(result, Err(RenderError::CopyOutOfBounds { .. })));
    assert_eq!(local.size(), 0);
}

fn upload_target(device: &Arc<VulkanDevice>, transfer: &TransferContext) -> GpuImage {
    let mut image = GpuImage::create(
        device.clone(),
        4,
        4,
        vk::Format::R8G8B8A8_UNORM,
        vk::ImageTiling::OPTIMAL,
        vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )
    .unwrap();
    image
        .transition_layout(transfer, ImageLayout::TransferDstOptimal)
        .unwrap();
    image
}

#[test]
fn test_image_copy_checks_staging_size() {
    let Some((device, transfer)) = gpu() else {
        return;
    };
    let mut image = upload_target(&device, &transfer);

    // 4x4 RGBA8 needs 64 bytes
    let short =
        GpuBuffer::with_data(device.clone(), BufferKind::Staging, &pattern(16), 0).unwrap();
    let result = image.copy_from_buffer(&short, &transfer, 4, 4, vk::Offset3D::default());
    assert!(matches!(
        result,
        Err(RenderError::CopyOutOfBounds { size: 64, capacity: 16, .. })
    ));

    let empty = GpuBuffer::empty(device.clone(), BufferKind::Staging);
    let result = image.copy_from_buffer(&empty, &transfer, 1, 1, vk::Offset3D::default());
    assert!(matches!(result, Err(RenderError::CopyOutOfBounds { .. })));

    assert_eq!(image.layout(), ImageLayout::TransferDstOptimal);
}

#[test]
fn test_image_copy_at_offset() {
    let Some((device, transfer)) = gpu() else {
        return;
    };
    let mut image = upload_target(&device, &transfer);
    let staging =
        GpuBuffer::with_data(device.clone(), BufferKind::Staging, &pattern(2 * 2 * 4), 0)
            .unwrap();

    let corner = vk::Offset3D { x: 2, y: 2, z: 0 };
    image
        .copy_from_buffer(&staging, &transfer, 2, 2, corner)
        .unwrap();

    let outside = vk::Offset3D { x: 3, y: 3, z: 0 };
    let result = image.copy_from_buffer(&staging, &transfer, 2, 2, outside);
    assert!(matches!(
        result,
        Err(RenderError::ImageRegionOutOfBounds { .. })
    ));
}

#[test]
fn test_short_pixel_slice_is_rejected() {
    let Some((device, transfer)) = gpu() else {
        return;
    };

    let mut staging = GpuBuffer::empty(device.clone(), BufferKind::Staging);
    let result = texture::upload_rgba(device.clone(), &transfer, &mut staging, 4, 4, &[0u8; 16]);
    assert!(matches!(result, Err(RenderError::CopyOutOfBounds { .. })));
}

#[test]
fn test_destroy_and_reset_twice() {
    let Some((device, _transfer)) = gpu() else {
        return;
    };

    let mut buffer =
        GpuBuffer::with_data(device.clone(), BufferKind::Staging, &pattern(16), 0).unwrap();
    buffer.destroy();
    buffer.destroy();
    assert!(buffer.is_empty());
    buffer.reset();
    buffer.reset();

    let mut image = GpuImage::create(
        device.clone(),
        4,
        4,
        vk::Format::R8G8B8A8_UNORM,
        vk::ImageTiling::OPTIMAL,
        vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )
    .unwrap();
    image.destroy();
    image.destroy();
    assert!(image.is_destroyed());
}

#[test]
fn test_image_follows_upload_sequence() {
    let Some((device, transfer)) = gpu() else {
        return;
    };

    let staging =
        GpuBuffer::with_data(device.clone(), BufferKind::Staging, &pattern(4 * 4 * 4), 0)
            .unwrap();
    let mut image = GpuImage::create(
        device.clone(),
        4,
        4,
        vk::Format::R8G8B8A8_UNORM,
        vk::ImageTiling::OPTIMAL,
        vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )
    .unwrap();
    assert_eq!(image.layout(), ImageLayout::Undefined);

    // Copy before the transition is refused
    let early = image.copy_from_buffer(&staging, &transfer, 4, 4, vk::Offset3D::default());
    assert!(matches!(early, Err(RenderError::WrongImageLayout { .. })));

    // Skipping TransferDst is not a supported edge
    let skip = image.transition_layout(&transfer, ImageLayout::ShaderReadOnlyOptimal);
    assert!(matches!(
        skip,
        Err(RenderError::UnsupportedLayoutTransition { .. })
    ));
    assert_eq!(image.layout(), ImageLayout::Undefined);

    image
        .transition_layout(&transfer, ImageLayout::TransferDstOptimal)
        .unwrap();
    assert_eq!(image.layout(), ImageLayout::TransferDstOptimal);

    staging
        .copy_to_image(&mut image, &transfer, 4, 4, vk::Offset3D::default())
        .unwrap();

    image
        .transition_layout(&transfer, ImageLayout::ShaderReadOnlyOptimal)
        .unwrap();
    assert_eq!(image.layout(), ImageLayout::ShaderReadOnlyOptimal);

    image.create_view().unwrap();
    image.create_sampler().unwrap();
    assert!(image.view().is_some());
    assert!(image.sampler().is_some());
}

#[test]
fn test_transfer_after_pool_destroyed_fails() {
    let Some((_device, mut transfer)) = gpu() else {
        return;
    };

    transfer.destroy();
    transfer.destroy();

    let result = transfer.submit_once("noop", |_, _| {});
    assert!(matches!(result, Err(RenderError::InvalidState(_))));
}
