// =============================================================================
// QUAD RENDERER - Single-device Vulkan renderer core
// =============================================================================
//
// LAYERS:
//   backend   thin ash wrappers: device, memory, buffers, images, transfers,
//             swapchain, pipeline, descriptors
//   frame     swapchain lifecycle state machine and the per-frame sequence
//   renderer  owns the resources and implements the frame target
//
// FRAME FLOW:
//   1. Write uniforms
//   2. Wait for the graphics queue to go idle
//   3. Acquire (rebuild the swapchain bundle while out of date)
//   4. Submit the pre-recorded command buffer
//   5. Present

pub mod backend;
pub mod config;
pub mod frame;
pub mod mesh;
pub mod renderer;

pub use backend::{RenderError, Result};
pub use config::Config;
pub use frame::FrameOutcome;
pub use renderer::Renderer;
