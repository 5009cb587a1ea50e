// =============================================================================
// RENDERER - Owns every GPU resource and drives the frame loop
// =============================================================================
//
// Construction order:
//   device -> command pools -> geometry buffers -> texture -> descriptors
//   -> swapchain -> pipeline -> drawing environment
//
// Shutdown order:
//   texture -> descriptors -> buffers -> drawing environment -> pipeline
//   -> command pools -> swapchain -> device -> surface -> instance

pub mod drawing;
pub mod texture;
pub mod uniforms;

use ash::vk;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use winit::window::Window;

use crate::backend::{
    AcquireOutcome, BufferKind, Descriptors, GpuBuffer, GpuImage, PipelineBundle, PipelineDesc,
    PresentOutcome, RenderError, Result, Swapchain, TransferContext, VulkanDevice,
};
use crate::config::Config;
use crate::frame::{FrameLoop, FrameOutcome, FrameTarget, RebuildStep};
use crate::mesh::{Vertex, QUAD_INDICES, QUAD_VERTICES};
use drawing::{CommandPool, DrawInputs, DrawingEnvironment};
use uniforms::Uniforms;

/// Settings the rebuild steps read again on every rebuild.
struct SurfaceSettings {
    present_mode: vk::PresentModeKHR,
    clear_color: [f32; 4],
    vertex_shader: PathBuf,
    fragment_shader: PathBuf,
}

/// Everything a frame touches. Implements the GPU side of the frame loop.
pub struct FrameResources {
    device: Arc<VulkanDevice>,
    window: Arc<Window>,
    settings: SurfaceSettings,
    started: Instant,

    texture: GpuImage,
    descriptors: Descriptors,
    uniform_buffer: GpuBuffer,
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,

    drawing: Option<DrawingEnvironment>,
    pipeline: Option<PipelineBundle>,
    graphics_pool: CommandPool,
    transfer: TransferContext,
    swapchain: Option<Swapchain>,
}

impl FrameResources {
    fn swapchain(&self) -> Result<&Swapchain> {
        self.swapchain
            .as_ref()
            .ok_or_else(|| RenderError::InvalidState("no swapchain".into()))
    }

    fn drawing(&self) -> Result<&DrawingEnvironment> {
        self.drawing
            .as_ref()
            .ok_or_else(|| RenderError::InvalidState("no drawing environment".into()))
    }

    fn create_swapchain(&mut self) -> Result<()> {
        let surface = self
            .device
            .surface()
            .ok_or_else(|| RenderError::InvalidState("device has no surface".into()))?;
        let extent = self.surface_extent();

        self.swapchain = Some(Swapchain::new(
            self.device.clone(),
            surface,
            self.settings.present_mode,
            extent.width,
            extent.height,
        )?);
        Ok(())
    }

    fn create_pipeline(&mut self) -> Result<()> {
        let swapchain = self.swapchain()?;
        let attributes = self.vertex_buffer.attribute_descriptions();
        let desc = PipelineDesc {
            vertex_shader: &self.settings.vertex_shader,
            fragment_shader: &self.settings.fragment_shader,
            descriptor_set_layout: self.descriptors.layout,
            vertex_binding: self.vertex_buffer.binding_description(),
            vertex_attributes: &attributes,
        };

        let bundle = PipelineBundle::new(
            self.device.clone(),
            swapchain.format,
            swapchain.extent,
            &swapchain.image_views,
            &desc,
        )?;
        self.pipeline = Some(bundle);
        Ok(())
    }

    fn create_drawing_environment(&mut self) -> Result<()> {
        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or_else(|| RenderError::InvalidState("no pipeline".into()))?;
        let inputs = DrawInputs {
            vertex_buffer: &self.vertex_buffer,
            index_buffer: &self.index_buffer,
            descriptor_set: self.descriptors.set,
            clear_color: self.settings.clear_color,
        };

        let environment = DrawingEnvironment::new(
            self.device.clone(),
            self.graphics_pool.handle(),
            pipeline,
            &inputs,
        )?;
        self.drawing = Some(environment);
        Ok(())
    }

    /// Texture, descriptors, then buffers.
    fn destroy_assets(&mut self) {
        self.texture.destroy();
        self.descriptors.destroy();
        self.uniform_buffer.destroy();
        self.vertex_buffer.destroy();
        self.index_buffer.destroy();
    }

    fn destroy_command_pools(&mut self) {
        self.graphics_pool.destroy();
        self.transfer.destroy();
    }
}

impl FrameTarget for FrameResources {
    fn update_uniforms(&mut self) -> Result<()> {
        let extent = self.surface_extent();
        let aspect = if extent.height == 0 {
            1.0
        } else {
            extent.width as f32 / extent.height as f32
        };
        let uniforms = Uniforms::at(self.started.elapsed().as_secs_f32(), aspect);
        self.uniform_buffer.map_and_write(uniforms.as_bytes())
    }

    fn wait_queue_idle(&mut self) -> Result<()> {
        self.device.wait_queue_idle()
    }

    fn surface_extent(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    fn acquire(&mut self) -> Result<AcquireOutcome> {
        let semaphore = self.drawing()?.sync.image_acquired;
        self.swapchain()?.acquire_next_image(semaphore)
    }

    fn submit(&mut self, image_index: u32) -> Result<()> {
        let drawing = self.drawing()?;
        let cmd = drawing.command_buffer(image_index).ok_or_else(|| {
            RenderError::InvalidState(format!("no command buffer for image {image_index}"))
        })?;

        let wait_semaphores = [drawing.sync.image_acquired];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [drawing.sync.render_finished];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .device
                .queue_submit(self.device.graphics_queue, &[submit_info], vk::Fence::null())
        }
        .map_err(RenderError::FrameSubmitFailed)
    }

    fn present(&mut self, image_index: u32) -> Result<PresentOutcome> {
        let render_finished = self.drawing()?.sync.render_finished;
        self.swapchain()?
            .present(self.device.graphics_queue, image_index, &[render_finished])
    }

    fn apply(&mut self, step: RebuildStep) -> Result<()> {
        match step {
            RebuildStep::DestroyDrawingEnvironment => {
                // Recorded command buffers may still be pending
                self.device.wait_idle()?;
                self.drawing = None;
            }
            RebuildStep::DestroyPipeline => self.pipeline = None,
            RebuildStep::DestroySwapchain => self.swapchain = None,
            RebuildStep::CreateSwapchain => self.create_swapchain()?,
            RebuildStep::CreatePipeline => self.create_pipeline()?,
            RebuildStep::CreateDrawingEnvironment => self.create_drawing_environment()?,
        }
        Ok(())
    }
}

/// Frames presented since the last report.
struct FpsCounter {
    frames: u32,
    total_frames: u64,
    last_report: Instant,
    started: Instant,
}

impl FpsCounter {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            frames: 0,
            total_frames: 0,
            last_report: now,
            started: now,
        }
    }

    fn frame_presented(&mut self) {
        self.frames += 1;
        self.total_frames += 1;

        let elapsed = self.last_report.elapsed().as_secs_f32();
        if elapsed >= 1.0 {
            log::info!("{:.0} FPS", self.frames as f32 / elapsed);
            self.frames = 0;
            self.last_report = Instant::now();
        }
    }

    fn report(&self) {
        let elapsed = self.started.elapsed().as_secs_f32();
        if elapsed > 0.0 {
            log::info!(
                "Presented {} frames, average {:.1} FPS",
                self.total_frames,
                self.total_frames as f32 / elapsed
            );
        }
    }
}

pub struct Renderer {
    frame_loop: FrameLoop,
    resources: FrameResources,
    fps: FpsCounter,
}

impl Renderer {
    /// Bring up the device, upload the quad and its texture, then build the
    /// swapchain bundle. Any failure here is fatal.
    pub fn new(config: &Config, window: Arc<Window>) -> Result<Self> {
        // Step 1: Device, queue and surface
        let device = VulkanDevice::with_window(
            &config.window.title,
            config.debug.validation_layers,
            window.as_ref(),
        )?;

        // Step 2: Command pools
        let graphics_pool = CommandPool::new(device.clone())?;
        let transfer = TransferContext::new(device.clone())?;

        // Step 3: Geometry, texture and uniforms. One staging buffer is
        // recycled for every upload.
        let (vertex_buffer, index_buffer, texture, uniform_buffer) =
            upload_assets(&device, &transfer, config)?;

        // Step 4: Descriptor set pointing at the uniform buffer and texture
        let descriptors = Descriptors::new(device.clone())?;
        let (view, sampler) = texture_binding(&texture)?;
        descriptors.write(&uniform_buffer, view, sampler)?;

        let mut renderer = Self {
            frame_loop: FrameLoop::new(config.frame.max_rebuild_attempts),
            resources: FrameResources {
                device,
                window,
                settings: SurfaceSettings {
                    present_mode: config.present_mode(),
                    clear_color: config.graphics.clear_color,
                    vertex_shader: config.assets.vertex_shader.clone(),
                    fragment_shader: config.assets.fragment_shader.clone(),
                },
                started: Instant::now(),
                texture,
                descriptors,
                uniform_buffer,
                vertex_buffer,
                index_buffer,
                drawing: None,
                pipeline: None,
                graphics_pool,
                transfer,
                swapchain: None,
            },
            fps: FpsCounter::new(),
        };

        // Step 5: Swapchain, pipeline, drawing environment
        renderer.frame_loop.initialize(&mut renderer.resources)?;

        log::info!("Renderer ready");
        Ok(renderer)
    }

    /// Render one frame. Only setup-class failures come back as errors;
    /// dropped frames are logged inside the frame loop. `Deferred` means the
    /// window has no area and nothing was drawn.
    pub fn draw(&mut self) -> Result<FrameOutcome> {
        let outcome = self.frame_loop.draw(&mut self.resources)?;
        if outcome == FrameOutcome::Presented {
            self.fps.frame_presented();
        }
        Ok(outcome)
    }

    /// Schedule a rebuild, e.g. after the window was resized.
    pub fn invalidate(&mut self) {
        self.frame_loop.invalidate();
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        self.fps.report();

        if let Err(e) = self.resources.device.wait_idle() {
            log::warn!("wait_idle before shutdown failed: {}", e);
        }

        self.resources.destroy_assets();
        let torn_down = self
            .frame_loop
            .teardown_with(&mut self.resources, FrameResources::destroy_command_pools);
        if let Err(e) = torn_down {
            log::error!("Swapchain teardown failed: {}", e);
        }
        // Covers a teardown that stopped early
        self.resources.destroy_command_pools();

        log::info!("Cleanup complete");
    }
}

fn texture_binding(texture: &GpuImage) -> Result<(vk::ImageView, vk::Sampler)> {
    match (texture.view(), texture.sampler()) {
        (Some(view), Some(sampler)) => Ok((view, sampler)),
        _ => Err(RenderError::InvalidState(
            "texture has no view or sampler".into(),
        )),
    }
}

/// Upload the quad and the texture, and create the uniform buffer.
fn upload_assets(
    device: &Arc<VulkanDevice>,
    transfer: &TransferContext,
    config: &Config,
) -> Result<(GpuBuffer, GpuBuffer, GpuImage, GpuBuffer)> {
    let vertex_bytes: &[u8] = bytemuck::cast_slice(&QUAD_VERTICES);
    let index_bytes: &[u8] = bytemuck::cast_slice(&QUAD_INDICES);

    let mut staging =
        GpuBuffer::with_data(device.clone(), BufferKind::Staging, vertex_bytes, Vertex::STRIDE)?;
    let mut vertex_buffer =
        GpuBuffer::new(device.clone(), BufferKind::Vertex, staging.size())?;
    staging.copy_to(&mut vertex_buffer, transfer, 0, 0)?;
    Vertex::describe(&mut vertex_buffer);

    staging.reset_with(index_bytes, 0)?;
    let mut index_buffer = GpuBuffer::new(device.clone(), BufferKind::Index, staging.size())?;
    staging.copy_to(&mut index_buffer, transfer, 0, 0)?;

    let texture = texture::load_texture(
        device.clone(),
        transfer,
        &mut staging,
        &config.assets.texture,
    )?;
    staging.reset();

    let uniform_buffer = GpuBuffer::new(device.clone(), BufferKind::Uniform, Uniforms::SIZE)?;

    log::info!(
        "Uploaded {} vertices and {} indices",
        vertex_buffer.size() / Vertex::STRIDE,
        index_buffer.index_count()
    );
    Ok((vertex_buffer, index_buffer, texture, uniform_buffer))
}
