//! strand - Main Entry Point
//!
//! Opens a window and runs the frame ring against it, clearing the
//! swapchain to the configured colour every frame. Settings come from
//! `strand.toml` in the working directory when present.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use strand_core::{FpsCounter, RendererConfig, Timer};
use strand_platform::Window;
use strand_renderer::RenderTarget;
use strand_rhi::device::Device;
use strand_rhi::instance::Instance;

const CONFIG_PATH: &str = "strand.toml";

/// Everything that exists only while a window is open.
///
/// Field order is drop order: the render target goes before the device,
/// and the device (which owns the surface) before the window.
struct Graphics {
    target: RenderTarget,
    device: Arc<Device>,
    window: Window,
}

impl Graphics {
    fn new(event_loop: &ActiveEventLoop, config: &RendererConfig) -> Result<Self> {
        let window = Window::new(event_loop, &config.window)?;
        let extensions = window.required_extensions()?;
        let instance = Instance::new(c"strand", config.validation, &extensions)
            .context("Failed to create Vulkan instance")?;
        let surface = window.create_surface(instance.entry(), instance.handle())?;
        let device = Device::new(instance, surface).context("Failed to create device")?;
        let target = RenderTarget::new(device.backend(), config, window.extent())
            .context("Failed to create render target")?;

        Ok(Self {
            target,
            device,
            window,
        })
    }

    fn draw(&mut self) -> Result<()> {
        let Some(mut frame) = self.target.begin_frame()? else {
            return Ok(());
        };
        let clear = self.target.clear_color();
        self.target.begin_render_pass(&mut frame, clear)?;
        self.target.end_render_pass(&mut frame)?;
        self.target.end_frame(frame)?;
        Ok(())
    }
}

struct App {
    config: RendererConfig,
    graphics: Option<Graphics>,
    timer: Timer,
    fps: FpsCounter,
}

impl App {
    fn new(config: RendererConfig) -> Self {
        Self {
            config,
            graphics: None,
            timer: Timer::new(),
            fps: FpsCounter::new(Duration::from_secs(1)),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.graphics.is_some() {
            return;
        }
        match Graphics::new(event_loop, &self.config) {
            Ok(graphics) => {
                info!(
                    "Initialization complete on {}, entering main loop",
                    graphics.device.physical().device_name()
                );
                self.graphics = Some(graphics);
                self.timer.reset();
            }
            Err(e) => {
                error!("Failed to initialize graphics: {:?}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(graphics) = self.graphics.as_mut() else {
            return;
        };
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                let stats = graphics.target.stats();
                info!(
                    "Presented {} frames, {} rebuilds, {} dropped, {} blocking waits",
                    stats.frames_presented,
                    stats.rebuilds,
                    stats.dropped_frames,
                    stats.blocking_waits
                );
                self.graphics = None;
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                info!("Window resized to {}x{}", size.width, size.height);
                graphics.window.resize(size.width, size.height);
                graphics.target.resize(size.width, size.height);
            }
            WindowEvent::RedrawRequested => {
                let delta = self.timer.tick();
                if let Err(e) = graphics.draw() {
                    error!("Render error: {:?}", e);
                    event_loop.exit();
                    return;
                }
                if let Some(fps) = self.fps.frame(delta) {
                    graphics
                        .window
                        .set_title(&format!("{} - {:.0} fps", self.config.window.title, fps));
                    info!("{:.1} fps", fps);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref graphics) = self.graphics
            && !graphics.window.is_minimized()
        {
            graphics.window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    strand_core::init_logging();
    info!("Starting strand");

    let config = match RendererConfig::load_or_default(CONFIG_PATH) {
        Ok(config) => config,
        Err(e) => {
            warn!("Ignoring {}: {}", CONFIG_PATH, e);
            RendererConfig::default()
        }
    };
    info!(
        "{} frames in flight, retained capacity {}",
        config.frames_in_flight, config.retained_capacity
    );

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    Ok(())
}
