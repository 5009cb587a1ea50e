// Renderer error taxonomy
//
// Setup-time variants are fatal and propagate to main. Frame-time variants
// (FrameSubmitFailed, PresentFailed) are logged by the frame loop and the
// frame is dropped. PresentationStale is the only recoverable condition.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

use super::image::ImageLayout;

#[derive(Error, Debug)]
pub enum RenderError {
    /// Raw Vulkan failure with no more specific classification.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    #[error("Failed to load Vulkan library: {0}")]
    Loader(#[from] ash::LoadingError),

    #[error("Window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    #[error("No suitable GPU found: {0}")]
    NoSuitableDevice(String),

    /// The device rejected a create call.
    #[error("Failed to create {what}: {result}")]
    ResourceCreationFailed {
        what: &'static str,
        result: vk::Result,
    },

    #[error("Buffer creation failed ({size} bytes, usage {usage:?}): {result}")]
    BufferCreationFailed {
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        result: vk::Result,
    },

    #[error("Memory allocation of {size} bytes failed: {result}")]
    AllocationFailed {
        size: vk::DeviceSize,
        result: vk::Result,
    },

    #[error("No memory type in filter {type_bits:#034b} supports {required:?}")]
    NoSuitableMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error("Unsupported image layout transition {old:?} -> {new:?}")]
    UnsupportedLayoutTransition { old: ImageLayout, new: ImageLayout },

    #[error("Image must be in {expected:?} layout, found {actual:?}")]
    WrongImageLayout {
        expected: ImageLayout,
        actual: ImageLayout,
    },

    #[error("Copy of {size} bytes at offset {offset} exceeds buffer capacity {capacity}")]
    CopyOutOfBounds {
        size: vk::DeviceSize,
        offset: vk::DeviceSize,
        capacity: vk::DeviceSize,
    },

    #[error(
        "Copy region {width}x{height} at {offset:?} exceeds {image_width}x{image_height} image"
    )]
    ImageRegionOutOfBounds {
        offset: vk::Offset3D,
        width: u32,
        height: u32,
        image_width: u32,
        image_height: u32,
    },

    #[error("Transfer submission failed during {stage}: {result}")]
    TransferSubmissionFailed {
        stage: &'static str,
        result: vk::Result,
    },

    /// Acquire/present reported the surface out of date and it could not be
    /// rebuilt within the configured number of attempts.
    #[error("Presentation surface is out of date")]
    PresentationStale,

    #[error("Frame submission failed: {0}")]
    FrameSubmitFailed(vk::Result),

    #[error("Present failed: {0}")]
    PresentFailed(vk::Result),

    #[error("Failed to load shader {path:?}: {reason}")]
    ShaderLoad { path: PathBuf, reason: String },

    #[error("Failed to decode image {path:?}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl RenderError {
    /// Shorthand for mapping a failed `vkCreate*` call.
    pub fn creation(what: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::ResourceCreationFailed { what, result }
    }
}

pub type Result<T> = std::result::Result<T, RenderError>;
