// Buffers for staging, vertex, index, and uniform data
//
// Each GpuBuffer owns its handle and a dedicated allocation. Host-visible
// kinds (staging, uniform, readback) are written/read through a full-range
// map; device-local kinds (vertex, index) are only filled by GPU copies.

use ash::vk;
use std::sync::Arc;

use super::error::{RenderError, Result};
use super::image::GpuImage;
use super::memory::select_memory_type;
use super::transfer::TransferContext;
use super::VulkanDevice;

/// What a buffer is used for. Decides usage flags and memory placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Transient host-visible source for uploads
    Staging,
    Vertex,
    Index,
    /// Persistent, rewritten by the host every frame
    Uniform,
    /// Host-visible copy target for reading device data back
    Readback,
}

impl BufferKind {
    pub fn usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferKind::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
            BufferKind::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | vk::BufferUsageFlags::TRANSFER_SRC
            }
            BufferKind::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | vk::BufferUsageFlags::TRANSFER_SRC
            }
            BufferKind::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferKind::Readback => vk::BufferUsageFlags::TRANSFER_DST,
        }
    }

    pub fn memory_properties(self) -> vk::MemoryPropertyFlags {
        match self {
            BufferKind::Vertex | BufferKind::Index => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            BufferKind::Staging | BufferKind::Uniform | BufferKind::Readback => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
        }
    }
}

/// One interleaved vertex attribute, all components 32-bit floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    pub binding: u32,
    pub location: u32,
    pub offset: u32,
    pub components: u32,
}

impl VertexAttribute {
    pub fn format(&self) -> vk::Format {
        match self.components {
            1 => vk::Format::R32_SFLOAT,
            2 => vk::Format::R32G32_SFLOAT,
            3 => vk::Format::R32G32B32_SFLOAT,
            _ => vk::Format::R32G32B32A32_SFLOAT,
        }
    }
}

/// Append an attribute after the ones already declared for `binding`.
pub fn push_attribute(
    attributes: &mut Vec<VertexAttribute>,
    binding: u32,
    location: u32,
    components: u32,
) {
    assert!(
        (1..=4).contains(&components),
        "vertex attributes have 1 to 4 float components, got {components}"
    );

    let offset = attributes
        .iter()
        .filter(|a| a.binding == binding)
        .map(|a| a.components * std::mem::size_of::<f32>() as u32)
        .sum();

    attributes.push(VertexAttribute {
        binding,
        location,
        offset,
        components,
    });
}

/// `size` bytes starting at `offset` must end within `capacity`.
pub fn check_range(
    size: vk::DeviceSize,
    offset: vk::DeviceSize,
    capacity: vk::DeviceSize,
) -> Result<()> {
    match offset.checked_add(size) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(RenderError::CopyOutOfBounds {
            size,
            offset,
            capacity,
        }),
    }
}

pub struct GpuBuffer {
    device: Arc<VulkanDevice>,
    kind: BufferKind,
    usage: vk::BufferUsageFlags,
    memory_properties: vk::MemoryPropertyFlags,
    /// Bytes the handle was created with
    capacity: vk::DeviceSize,
    /// Bytes of meaningful content
    size: vk::DeviceSize,
    /// Bytes per element; zero for unstructured data
    stride: vk::DeviceSize,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    attributes: Vec<VertexAttribute>,
}

impl GpuBuffer {
    /// A buffer with no device resources yet.
    pub fn empty(device: Arc<VulkanDevice>, kind: BufferKind) -> Self {
        Self {
            device,
            kind,
            usage: kind.usage(),
            memory_properties: kind.memory_properties(),
            capacity: 0,
            size: 0,
            stride: 0,
            buffer: vk::Buffer::null(),
            memory: vk::DeviceMemory::null(),
            attributes: Vec::new(),
        }
    }

    /// Create and allocate a buffer of `capacity` bytes.
    pub fn new(device: Arc<VulkanDevice>, kind: BufferKind, capacity: vk::DeviceSize) -> Result<Self> {
        let mut buffer = Self::empty(device, kind);
        buffer.create(kind.usage(), capacity)?;
        buffer.allocate(kind.memory_properties())?;
        Ok(buffer)
    }

    /// Host-visible buffer holding a copy of `bytes`.
    pub fn with_data(
        device: Arc<VulkanDevice>,
        kind: BufferKind,
        bytes: &[u8],
        stride: vk::DeviceSize,
    ) -> Result<Self> {
        let mut buffer = Self::new(device, kind, bytes.len() as vk::DeviceSize)?;
        buffer.map_and_write(bytes)?;
        buffer.stride = stride;
        Ok(buffer)
    }

    /// Create the buffer handle. Zero-sized buffers get no handle.
    pub fn create(&mut self, usage: vk::BufferUsageFlags, size: vk::DeviceSize) -> Result<()> {
        self.destroy();
        self.usage = usage;
        self.capacity = size;
        self.size = 0;

        if size == 0 {
            return Ok(());
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        self.buffer = unsafe { self.device.device.create_buffer(&buffer_info, None) }.map_err(
            |result| RenderError::BufferCreationFailed {
                size,
                usage,
                result,
            },
        )?;

        Ok(())
    }

    /// Allocate memory with `memory_properties` and bind it at offset 0.
    pub fn allocate(&mut self, memory_properties: vk::MemoryPropertyFlags) -> Result<()> {
        self.memory_properties = memory_properties;

        if self.buffer == vk::Buffer::null() {
            return Ok(());
        }
        if self.memory != vk::DeviceMemory::null() {
            return Err(RenderError::InvalidState(format!(
                "{:?} buffer already has memory bound",
                self.kind
            )));
        }

        let device = &self.device;
        let requirements = unsafe { device.device.get_buffer_memory_requirements(self.buffer) };

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

        unsafe { device.device.bind_buffer_memory(self.buffer, self.memory, 0) }
            .map_err(RenderError::creation("buffer memory binding"))?;

        Ok(())
    }

    pub fn is_host_visible(&self) -> bool {
        self.memory_properties
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }

    /// Copy `bytes` into the start of the buffer through a temporary mapping.
    ///
    /// # Panics
    /// If the buffer's memory is not host-visible.
    pub fn map_and_write(&mut self, bytes: &[u8]) -> Result<()> {
        assert!(
            self.is_host_visible(),
            "map_and_write on device-local {:?} buffer",
            self.kind
        );

        let len = bytes.len() as vk::DeviceSize;
        if len > self.capacity {
            return Err(RenderError::CopyOutOfBounds {
                size: len,
                offset: 0,
                capacity: self.capacity,
            });
        }

        if len > 0 {
            let device = &self.device.device;
            unsafe {
                let ptr = device
                    .map_memory(self.memory, 0, self.capacity, vk::MemoryMapFlags::empty())?
                    .cast::<u8>();
                ptr.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
                device.unmap_memory(self.memory);
            }
        }

        self.size = len;
        Ok(())
    }

    /// Read the recorded contents back to the host.
    ///
    /// # Panics
    /// If the buffer's memory is not host-visible.
    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        assert!(
            self.is_host_visible(),
            "read_bytes on device-local {:?} buffer",
            self.kind
        );

        let mut out = vec![0u8; self.size as usize];
        if self.size > 0 {
            let device = &self.device.device;
            unsafe {
                let ptr = device
                    .map_memory(self.memory, 0, self.capacity, vk::MemoryMapFlags::empty())?
                    .cast::<u8>();
                ptr.copy_to_nonoverlapping(out.as_mut_ptr(), out.len());
                device.unmap_memory(self.memory);
            }
        }
        Ok(out)
    }

    /// Copy this buffer's contents into `dst` on the GPU and wait for it.
    /// On success `dst` records the copied size and this buffer's stride.
    pub fn copy_to(
        &self,
        dst: &mut GpuBuffer,
        transfer: &TransferContext,
        src_offset: vk::DeviceSize,
        dst_offset: vk::DeviceSize,
    ) -> Result<()> {
        let size = self.size;
        check_range(size, src_offset, self.capacity)?;
        check_range(size, dst_offset, dst.capacity)?;

        if size > 0 {
            let region = vk::BufferCopy {
                src_offset,
                dst_offset,
                size,
            };
            let (src, target) = (self.buffer, dst.buffer);
            transfer.submit_once("buffer copy", |device, cmd| unsafe {
                device.cmd_copy_buffer(cmd, src, target, &[region]);
            })?;
        }

        log::debug!(
            "Copied {} bytes {:?} -> {:?} (stride {})",
            size,
            self.kind,
            dst.kind,
            self.stride
        );
        dst.size = size;
        dst.stride = self.stride;
        Ok(())
    }

    /// Copy pixel data from this buffer into `dst`, which must already be in
    /// TransferDstOptimal layout.
    pub fn copy_to_image(
        &self,
        dst: &mut GpuImage,
        transfer: &TransferContext,
        width: u32,
        height: u32,
        dst_offset: vk::Offset3D,
    ) -> Result<()> {
        dst.copy_from_buffer(self, transfer, width, height, dst_offset)
    }

    /// Declare the next interleaved attribute of this vertex buffer.
    pub fn set_attribute(&mut self, binding: u32, location: u32, components: u32) {
        push_attribute(&mut self.attributes, binding, location, components);
    }

    pub fn binding_description(&self) -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: self.stride as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions(&self) -> Vec<vk::VertexInputAttributeDescription> {
        self.attributes
            .iter()
            .map(|a| vk::VertexInputAttributeDescription {
                location: a.location,
                binding: a.binding,
                format: a.format(),
                offset: a.offset,
            })
            .collect()
    }

    /// Number of u32 indices held by an index buffer.
    pub fn index_count(&self) -> u32 {
        (self.size / std::mem::size_of::<u32>() as vk::DeviceSize) as u32
    }

    pub fn index_type(&self) -> vk::IndexType {
        vk::IndexType::UINT32
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn capacity(&self) -> vk::DeviceSize {
        self.capacity
    }

    pub fn stride(&self) -> vk::DeviceSize {
        self.stride
    }

    pub fn is_empty(&self) -> bool {
        self.buffer == vk::Buffer::null()
    }

    /// Free memory, then destroy the handle. Safe on an empty buffer.
    pub fn destroy(&mut self) {
        let device = &self.device.device;
        unsafe {
            if self.memory != vk::DeviceMemory::null() {
                device.free_memory(self.memory, None);
                self.memory = vk::DeviceMemory::null();
            }
            if self.buffer != vk::Buffer::null() {
                device.destroy_buffer(self.buffer, None);
                self.buffer = vk::Buffer::null();
            }
        }
        self.capacity = 0;
        self.size = 0;
    }

    /// Tear the buffer down, keeping its kind for later reuse.
    pub fn reset(&mut self) {
        self.destroy();
        self.stride = 0;
        self.attributes.clear();
    }

    /// Tear down and recreate with `bytes` as the new contents. Used to cycle
    /// one staging buffer through several uploads.
    pub fn reset_with(&mut self, bytes: &[u8], stride: vk::DeviceSize) -> Result<()> {
        self.reset();
        self.create(self.kind.usage(), bytes.len() as vk::DeviceSize)?;
        self.allocate(self.kind.memory_properties())?;
        self.map_and_write(bytes)?;
        self.stride = stride;
        Ok(())
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_attribute_offsets_accumulate() {
        let mut attributes = Vec::new();
        push_attribute(&mut attributes, 0, 0, 2);
        push_attribute(&mut attributes, 0, 1, 3);
        push_attribute(&mut attributes, 0, 2, 2);

        let offsets: Vec<u32> = attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 8, 20]);

        let formats: Vec<vk::Format> = attributes.iter().map(|a| a.format()).collect();
        assert_eq!(
            formats,
            vec![
                vk::Format::R32G32_SFLOAT,
                vk::Format::R32G32B32_SFLOAT,
                vk::Format::R32G32_SFLOAT,
            ]
        );
    }

    #[test]
    fn offsets_are_per_binding() {
        let mut attributes = Vec::new();
        push_attribute(&mut attributes, 0, 0, 3);
        push_attribute(&mut attributes, 1, 1, 4);
        push_attribute(&mut attributes, 0, 2, 1);

        assert_eq!(attributes[1].offset, 0);
        assert_eq!(attributes[2].offset, 12);
    }

    #[test]
    #[should_panic(expected = "1 to 4")]
    fn rejects_wide_attributes() {
        push_attribute(&mut Vec::new(), 0, 0, 5);
    }

    #[test]
    fn ranges_within_capacity_pass() {
        assert!(check_range(64, 0, 64).is_ok());
        assert!(check_range(32, 16, 64).is_ok());
        assert!(check_range(0, 64, 64).is_ok());
    }

    #[test]
    fn ranges_past_capacity_or_overflowing_fail() {
        for (size, offset, capacity) in [
            (33, 32, 64),
            (1, 64, 64),
            (8, u64::MAX, 64),
            (u64::MAX, 1, u64::MAX),
        ] {
            match check_range(size, offset, capacity) {
                Err(RenderError::CopyOutOfBounds {
                    size: s,
                    offset: o,
                    capacity: c,
                }) => assert_eq!((s, o, c), (size, offset, capacity)),
                other => panic!("{size} bytes at {offset} should be rejected, got {other:?}"),
            }
        }
    }

    #[test]
    fn only_transfer_kinds_are_host_visible() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE;
        assert!(BufferKind::Staging.memory_properties().contains(host));
        assert!(BufferKind::Uniform.memory_properties().contains(host));
        assert!(BufferKind::Readback.memory_properties().contains(host));
        assert!(!BufferKind::Vertex.memory_properties().contains(host));
        assert!(!BufferKind::Index.memory_properties().contains(host));
    }

    #[test]
    fn device_local_kinds_accept_copies() {
        for kind in [BufferKind::Vertex, BufferKind::Index, BufferKind::Readback] {
            assert!(kind.usage().contains(vk::BufferUsageFlags::TRANSFER_DST));
        }
        assert!(BufferKind::Staging
            .usage()
            .contains(vk::BufferUsageFlags::TRANSFER_SRC));
    }
}
