// Frame loop and swapchain lifecycle
//
// The swapchain bundle (swapchain, pipeline resources, drawing environment)
// moves between Absent, Ready and Invalidated. Every transition is an ordered
// list of RebuildSteps applied to a FrameTarget, so the destroy/create order
// is fixed in one place and can be checked against a recording target.

use ash::vk;

use crate::backend::{AcquireOutcome, PresentOutcome, RenderError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainState {
    /// Nothing created yet, or torn down at shutdown
    Absent,
    Ready,
    /// The surface reported out of date; rebuild before the next acquire
    Invalidated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildStep {
    /// Recorded command buffers and the frame semaphores
    DestroyDrawingEnvironment,
    /// Framebuffers, pipeline, pipeline layout, render pass
    DestroyPipeline,
    DestroySwapchain,
    /// Against the current surface extent
    CreateSwapchain,
    CreatePipeline,
    CreateDrawingEnvironment,
}

pub const INITIAL_SEQUENCE: [RebuildStep; 3] = [
    RebuildStep::CreateSwapchain,
    RebuildStep::CreatePipeline,
    RebuildStep::CreateDrawingEnvironment,
];

pub const REBUILD_SEQUENCE: [RebuildStep; 6] = [
    RebuildStep::DestroyDrawingEnvironment,
    RebuildStep::DestroyPipeline,
    RebuildStep::DestroySwapchain,
    RebuildStep::CreateSwapchain,
    RebuildStep::CreatePipeline,
    RebuildStep::CreateDrawingEnvironment,
];

pub const TEARDOWN_SEQUENCE: [RebuildStep; 3] = [
    RebuildStep::DestroyDrawingEnvironment,
    RebuildStep::DestroyPipeline,
    RebuildStep::DestroySwapchain,
];

/// The GPU-facing half of a frame. The renderer implements this over real
/// Vulkan objects; tests implement it with a recorder.
pub trait FrameTarget {
    /// Write this frame's uniform block into host-visible memory.
    fn update_uniforms(&mut self) -> Result<()>;

    /// Block until the graphics queue has finished all submitted work.
    fn wait_queue_idle(&mut self) -> Result<()>;

    /// Current drawable size of the window surface.
    fn surface_extent(&self) -> vk::Extent2D;

    /// Acquire the next image, signalling the "image acquired" semaphore.
    fn acquire(&mut self) -> Result<AcquireOutcome>;

    /// Submit the pre-recorded commands for `image_index`.
    fn submit(&mut self, image_index: u32) -> Result<()>;

    fn present(&mut self, image_index: u32) -> Result<PresentOutcome>;

    fn apply(&mut self, step: RebuildStep) -> Result<()>;
}

/// What happened to a single call to `FrameLoop::draw`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// Submit or present failed; logged and skipped, the bundle is rebuilt
    /// before the next acquire
    Dropped,
    /// The surface has no area (minimized); nothing was acquired
    Deferred,
}

pub struct FrameLoop {
    state: SwapchainState,
    max_rebuild_attempts: u32,
}

impl FrameLoop {
    /// `max_rebuild_attempts` bounds how many rebuilds a single frame may
    /// run while acquire keeps reporting out of date.
    pub fn new(max_rebuild_attempts: u32) -> Self {
        Self {
            state: SwapchainState::Absent,
            max_rebuild_attempts: max_rebuild_attempts.max(1),
        }
    }

    pub fn state(&self) -> SwapchainState {
        self.state
    }

    /// Absent -> Ready.
    pub fn initialize<T: FrameTarget>(&mut self, target: &mut T) -> Result<()> {
        if self.state != SwapchainState::Absent {
            return Err(RenderError::InvalidState(format!(
                "initialize called in state {:?}",
                self.state
            )));
        }

        for step in INITIAL_SEQUENCE {
            target.apply(step)?;
        }
        self.state = SwapchainState::Ready;
        Ok(())
    }

    /// Mark the bundle stale, e.g. after a window resize. The rebuild runs at
    /// the start of the next draw.
    pub fn invalidate(&mut self) {
        if self.state == SwapchainState::Ready {
            log::debug!("Swapchain invalidated");
            self.state = SwapchainState::Invalidated;
        }
    }

    /// Invalidated -> Ready. A failing step is fatal and leaves the state
    /// Invalidated.
    pub fn rebuild<T: FrameTarget>(&mut self, target: &mut T) -> Result<()> {
        if self.state != SwapchainState::Invalidated {
            return Err(RenderError::InvalidState(format!(
                "rebuild called in state {:?}",
                self.state
            )));
        }

        let extent = target.surface_extent();
        log::info!("Rebuilding swapchain at {}x{}", extent.width, extent.height);
        for step in REBUILD_SEQUENCE {
            log::trace!("Rebuild step: {:?}", step);
            target.apply(step)?;
        }
        self.state = SwapchainState::Ready;
        Ok(())
    }

    /// Render one frame: uniforms, queue idle, acquire (rebuilding while the
    /// surface is out of date), submit, present.
    pub fn draw<T: FrameTarget>(&mut self, target: &mut T) -> Result<FrameOutcome> {
        if self.state == SwapchainState::Absent {
            return Err(RenderError::InvalidState(
                "draw called before initialize".into(),
            ));
        }

        target.update_uniforms()?;
        target.wait_queue_idle()?;

        let mut rebuilds = 0;
        let image_index = loop {
            if self.state == SwapchainState::Invalidated {
                let extent = target.surface_extent();
                if extent.width == 0 || extent.height == 0 {
                    log::trace!("Surface has zero extent, deferring frame");
                    return Ok(FrameOutcome::Deferred);
                }
                if rebuilds == self.max_rebuild_attempts {
                    return Err(RenderError::PresentationStale);
                }
                rebuilds += 1;
                self.rebuild(target)?;
            }

            match target.acquire()? {
                AcquireOutcome::Acquired(index) => break index,
                AcquireOutcome::OutOfDate => {
                    log::debug!("Acquire reported out of date");
                    self.state = SwapchainState::Invalidated;
                }
            }
        };

        // A failed submit or present leaves a semaphore signalled with no
        // waiter; the rebuild recreates the pair before the next acquire.
        if let Err(e) = target.submit(image_index) {
            log::error!("Dropping frame: {}", e);
            self.state = SwapchainState::Invalidated;
            return Ok(FrameOutcome::Dropped);
        }

        match target.present(image_index) {
            Ok(PresentOutcome::Presented) => Ok(FrameOutcome::Presented),
            Ok(PresentOutcome::OutOfDate) => {
                log::debug!("Present reported out of date");
                self.state = SwapchainState::Invalidated;
                Ok(FrameOutcome::Dropped)
            }
            Err(e) => {
                log::error!("Dropping frame: {}", e);
                self.state = SwapchainState::Invalidated;
                Ok(FrameOutcome::Dropped)
            }
        }
    }

    /// Destroy the bundle in reverse order. Does nothing when already Absent.
    pub fn teardown<T: FrameTarget>(&mut self, target: &mut T) -> Result<()> {
        self.teardown_with(target, |_| {})
    }

    /// Like `teardown`, running `before_swapchain` once the drawing
    /// environment and pipeline are gone but the swapchain still exists.
    pub fn teardown_with<T, F>(&mut self, target: &mut T, before_swapchain: F) -> Result<()>
    where
        T: FrameTarget,
        F: FnOnce(&mut T),
    {
        if self.state == SwapchainState::Absent {
            return Ok(());
        }

        let mut before_swapchain = Some(before_swapchain);
        for step in TEARDOWN_SEQUENCE {
            if step == RebuildStep::DestroySwapchain {
                if let Some(hook) = before_swapchain.take() {
                    hook(target);
                }
            }
            target.apply(step)?;
        }
        self.state = SwapchainState::Absent;
        Ok(())
    }
}
