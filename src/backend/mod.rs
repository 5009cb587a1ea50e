// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash. Each wrapper owns its handles and memory and has
// exactly one idempotent destroy path that also runs on Drop.

pub mod buffer;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod image;
pub mod memory;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod transfer;

pub use buffer::{BufferKind, GpuBuffer};
pub use descriptor::Descriptors;
pub use device::VulkanDevice;
pub use error::{RenderError, Result};
pub use image::{GpuImage, ImageLayout, LayoutTransition};
pub use memory::select_memory_type;
pub use pipeline::{PipelineBundle, PipelineDesc};
pub use surface::Surface;
pub use swapchain::{AcquireOutcome, PresentOutcome, Swapchain};
pub use sync::FrameSync;
pub use transfer::TransferContext;
