// =============================================================================
// QUAD RENDERER - Window and event loop
// =============================================================================
//
// Opens a window, hands it to the renderer and redraws continuously.
// Resizes mark the swapchain stale; the next frame rebuilds it.

use anyhow::{Context, Result};
use quad_renderer::{Config, FrameOutcome, Renderer};
use std::fs::File;
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowAttributes, WindowId},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();

    init_logging(&config)?;
    log::info!("Starting quad renderer");
    log::info!(
        "Window: {}x{}, present mode {}",
        config.window.width,
        config.window.height,
        config.graphics.present_mode
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Info level unless RUST_LOG says otherwise, optionally into a file
fn init_logging(config: &Config) -> Result<()> {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();

    if config.debug.log_to_file {
        let file = File::create(&config.debug.log_file)
            .with_context(|| format!("Failed to create log file {:?}", config.debug.log_file))?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Decides whether the event loop keeps asking for frames. Redraws pause
/// while the window has no area and resume on the next non-zero resize.
#[derive(Debug, Default)]
struct RedrawPacing {
    paused: bool,
}

impl RedrawPacing {
    fn frame_finished(&mut self, outcome: FrameOutcome) {
        if outcome == FrameOutcome::Deferred && !self.paused {
            log::debug!("Window has no area, pausing redraws");
            self.paused = true;
        }
    }

    /// Returns true when redraws resumed.
    fn resized(&mut self, width: u32, height: u32) -> bool {
        if self.paused && width > 0 && height > 0 {
            log::debug!("Window restored, resuming redraws");
            self.paused = false;
            return true;
        }
        false
    }

    fn wants_redraw(&self) -> bool {
        !self.paused
    }
}

struct App {
    config: Config,
    /// Declared before the window so it is dropped first
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    pacing: RedrawPacing,
    /// Error that ended the event loop
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            renderer: None,
            window: None,
            pacing: RedrawPacing::default(),
            fatal: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        self.fatal = Some(error);
        // Tear down GPU state while the window still exists
        self.renderer = None;
        event_loop.exit();
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        match Renderer::new(&self.config, window.clone()) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                self.fail(
                    event_loop,
                    anyhow::Error::new(e).context("Failed to initialize Vulkan"),
                );
                return;
            }
        }

        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.renderer = None;
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.invalidate();
                }
                if self.pacing.resized(size.width, size.height) {
                    if let Some(ref window) = self.window {
                        window.request_redraw();
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                let Some(renderer) = self.renderer.as_mut() else {
                    return;
                };
                match renderer.draw() {
                    Ok(outcome) => self.pacing.frame_finished(outcome),
                    Err(e) => {
                        self.fail(event_loop, anyhow::Error::new(e).context("Render error"))
                    }
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    self.renderer = None;
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Redraw continuously unless paused; the loop then sleeps until the
    /// next window event
    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if !self.pacing.wants_redraw() {
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        }
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}
