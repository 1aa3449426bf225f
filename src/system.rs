// =============================================================================
// SYSTEM - window, surface and event loop
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::ActiveEventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowAttributes, WindowId},
};
use crate::backend::Controller;
use crate::compositor::Compositor;
use crate::config::Config;

/// Drop order: compositor (and with it the device), then the surface, then
/// the instance.
pub struct App {
    config: Config,

    window: Option<Arc<Window>>,
    controller: Option<Arc<Controller>>,
    surface: Option<vk::SurfaceKHR>,
    compositor: Option<Compositor>,

    /// First fatal error, reported by `main` after the loop exits
    error: Option<anyhow::Error>,

    /// Window has zero size - skip rendering
    is_minimized: bool,

    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    pub fn new(config: Config) -> Self {
        let now = Instant::now();
        Self {
            config,
            window: None,
            controller: None,
            surface: None,
            compositor: None,
            error: None,
            is_minimized: false,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    pub fn take_error(&mut self) -> Option<anyhow::Error> {
        self.error.take()
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:?}", error);
        if self.error.is_none() {
            self.error = Some(error);
        }
        event_loop.exit();
    }

    fn init_vulkan(&mut self, window: &Window) -> Result<()> {
        log::info!("Initializing Vulkan...");

        let display_handle = window.raw_display_handle();
        let extensions = ash_window::enumerate_required_extensions(display_handle)
            .context("Failed to query surface extensions")?;

        let enable_validation = cfg!(debug_assertions) && self.config.debug.validation_layers;
        let controller = Controller::new(&self.config.window.title, extensions, enable_validation)?;
        self.controller = Some(controller.clone());

        let surface = unsafe {
            ash_window::create_surface(
                &controller.entry,
                &controller.instance,
                display_handle,
                window.raw_window_handle(),
                None,
            )
        }
        .context("Failed to create window surface")?;
        self.surface = Some(surface);

        let device = controller.setup_device(surface)?;

        let size = window.inner_size();
        self.is_minimized = size.width == 0 || size.height == 0;

        let compositor = Compositor::new(device, surface, &self.config, size.width, size.height)?;
        self.compositor = Some(compositor);

        log::info!("Vulkan initialized successfully!");
        Ok(())
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_resizable(self.config.window.resizable)
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

        if let Err(e) = self.init_vulkan(&window) {
            self.fail(event_loop, e.context("Failed to initialize Vulkan"));
            return;
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);

                self.is_minimized = size.width == 0 || size.height == 0;
                if let Some(ref mut compositor) = self.compositor {
                    compositor.resize(size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => {
                if self.is_minimized {
                    return;
                }
                let Some(ref mut compositor) = self.compositor else {
                    return;
                };

                match compositor.draw() {
                    Ok(true) => self.update_fps(),
                    Ok(false) => {}
                    Err(e) => self.fail(event_loop, e.context("Render error")),
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Keep redrawing continuously
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        // Waits for the device and releases every device-level object
        self.compositor = None;

        if let (Some(surface), Some(controller)) = (self.surface.take(), self.controller.as_ref()) {
            unsafe { controller.surface_loader.destroy_surface(surface, None) };
        }
        self.controller = None;

        log::info!("Cleanup complete");
    }
}
