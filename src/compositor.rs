// =============================================================================
// COMPOSITOR - ties the wave step, the transfers and the draw into a frame
// =============================================================================
//
// FRAME FLOW (one frame in flight):
//
//   fence wait/reset
//     └─> compute step ──compute_finished──> dynamic transfer
//                                               └──transfer_finished──┐
//   acquire image ──image_available──────────────────────────────────>├─> draw ──render_finished──> present
//                                                                     (signals fence)

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use crate::backend::{Commands, FrameSync, Swapchain, VulkanDevice};
use crate::compute::Compute;
use crate::config::Config;
use crate::renderer::Renderer;

/// Field order matters: renderer and compute release their resources before
/// the swapchain goes away.
pub struct Compositor {
    renderer: Renderer,
    compute: Compute,
    swapchain: Option<Swapchain>,
    sync: FrameSync,

    device: Arc<VulkanDevice>,
    surface: vk::SurfaceKHR,
    present_mode: vk::PresentModeKHR,
    width: u32,
    height: u32,
    needs_recreate: bool,
}

impl Compositor {
    pub fn new(
        device: Arc<VulkanDevice>,
        surface: vk::SurfaceKHR,
        config: &Config,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let present_mode = config.present_mode();
        let swapchain = Swapchain::new(device.clone(), surface, present_mode, width, height)?;

        let commands = Commands::new(device.clone());
        let mut compute = Compute::new(commands.clone(), config)?;

        if config.debug.inspect_first_step {
            compute.dispatch_once_for_inspection()?;
        }

        let mut renderer = Renderer::new(commands, config, &compute, &swapchain)?;
        let sync = FrameSync::new(&device)?;

        // Static data and the first state of the height field, before any frame
        if let Err(e) = submit_initial_transfers(&device, &renderer) {
            if let Err(idle) = device.wait_idle() {
                log::error!("Failed to wait for device idle: {:?}", idle);
            }
            sync.destroy(&device.device);
            return Err(e);
        }
        renderer.release_static_staging();

        log::info!("Compositor ready");

        Ok(Self {
            renderer,
            compute,
            swapchain: Some(swapchain),
            sync,
            device,
            surface,
            present_mode,
            width,
            height,
            needs_recreate: false,
        })
    }

    /// Render one frame. Returns `false` when nothing was presented.
    pub fn draw(&mut self) -> Result<bool> {
        if self.needs_recreate {
            self.recreate_swapchain()?;
        }
        if self.needs_recreate || self.width == 0 || self.height == 0 {
            return Ok(false);
        }

        let device = self.device.clone();
        let swapchain = self.swapchain.as_ref().context("Swapchain not initialized")?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Wait for the previous frame
        // ─────────────────────────────────────────────────────────────────────
        self.sync.wait_and_reset(&device.device)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Wave step
        // ─────────────────────────────────────────────────────────────────────
        let compute_cmd = [self.compute.step()];
        let compute_signal = [self.sync.compute_finished];
        let compute_submit = vk::SubmitInfo::builder()
            .command_buffers(&compute_cmd)
            .signal_semaphores(&compute_signal);

        unsafe {
            device.device.queue_submit(device.compute_queue, &[compute_submit.build()], vk::Fence::null())
                .context("Failed to submit compute step")?;
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Copy uniforms and simulation output into render buffers
        // ─────────────────────────────────────────────────────────────────────
        self.renderer.update_uniforms(swapchain.extent)?;

        let transfer_cmd = [self.renderer.dynamic_transfer];
        let transfer_wait = [self.sync.compute_finished];
        let transfer_stages = [vk::PipelineStageFlags::TRANSFER];
        let transfer_signal = [self.sync.transfer_finished];
        let transfer_submit = vk::SubmitInfo::builder()
            .wait_semaphores(&transfer_wait)
            .wait_dst_stage_mask(&transfer_stages)
            .command_buffers(&transfer_cmd)
            .signal_semaphores(&transfer_signal);

        unsafe {
            device.device.queue_submit(device.graphics_queue, &[transfer_submit.build()], vk::Fence::null())
                .context("Failed to submit dynamic transfer")?;
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Acquire the next swapchain image
        // ─────────────────────────────────────────────────────────────────────
        let image_index = match swapchain.acquire_next_image(u64::MAX, self.sync.image_available)? {
            Some((index, suboptimal)) => {
                if suboptimal {
                    self.needs_recreate = true;
                }
                index
            }
            None => {
                // Nothing will draw this frame: consume transfer_finished and
                // re-signal the fence so the next wait does not block forever
                let wait = [self.sync.transfer_finished];
                let stages = [vk::PipelineStageFlags::ALL_COMMANDS];
                let empty_submit = vk::SubmitInfo::builder()
                    .wait_semaphores(&wait)
                    .wait_dst_stage_mask(&stages);
                unsafe {
                    device.device.queue_submit(
                        device.graphics_queue,
                        &[empty_submit.build()],
                        self.sync.in_flight_fence,
                    )?;
                }
                self.needs_recreate = true;
                return Ok(false);
            }
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Draw into the acquired image
        // ─────────────────────────────────────────────────────────────────────
        let draw_cmd = [self.renderer.draw_command_buffer(image_index)?];
        let draw_wait = [self.sync.image_available, self.sync.transfer_finished];
        let draw_stages = [
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::VERTEX_INPUT,
        ];
        let draw_signal = [self.sync.render_finished];
        let draw_submit = vk::SubmitInfo::builder()
            .wait_semaphores(&draw_wait)
            .wait_dst_stage_mask(&draw_stages)
            .command_buffers(&draw_cmd)
            .signal_semaphores(&draw_signal);

        unsafe {
            device.device.queue_submit(
                device.graphics_queue,
                &[draw_submit.build()],
                self.sync.in_flight_fence,
            )
            .context("Failed to submit draw")?;
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 6: Present
        // ─────────────────────────────────────────────────────────────────────
        if swapchain.present(device.graphics_queue, image_index, &draw_signal)? {
            self.needs_recreate = true;
        }

        Ok(true)
    }

    /// Record a new window size; the swapchain is rebuilt before the next frame
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.needs_recreate = true;
    }

    fn recreate_swapchain(&mut self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Ok(());
        }

        self.device.wait_idle()?;

        // The surface can only have one swapchain at a time
        self.swapchain = None;
        let swapchain = Swapchain::new(
            self.device.clone(),
            self.surface,
            self.present_mode,
            self.width,
            self.height,
        )?;

        self.renderer.rebuild_for_swapchain(&swapchain)?;
        self.swapchain = Some(swapchain);
        self.needs_recreate = false;

        Ok(())
    }
}

fn submit_initial_transfers(device: &VulkanDevice, renderer: &Renderer) -> Result<()> {
    let command_buffers = [renderer.static_transfer, renderer.dynamic_transfer];
    let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
    unsafe {
        device.device.queue_submit(device.graphics_queue, &[submit_info.build()], vk::Fence::null())
            .context("Failed to submit initial transfers")?;
    }
    device.wait_idle()
}

impl Drop for Compositor {
    fn drop(&mut self) {
        log::info!("Destroying compositor...");

        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for device idle: {:?}", e);
        }
        self.sync.destroy(&self.device.device);
    }
}
