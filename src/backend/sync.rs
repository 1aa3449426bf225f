// Synchronization primitives
//
// One frame is in flight at a time: the compute step, the transfer of its
// results and the draw are chained with semaphores, and the fence guards the
// host-side writes of the next frame.

use ash::vk;
use anyhow::{Context, Result};
use super::VulkanDevice;

#[derive(Debug, Default)]
pub struct FrameSync {
    /// Swapchain image is ready to be rendered to
    pub image_available: vk::Semaphore,
    /// Wave step finished writing its output buffers
    pub compute_finished: vk::Semaphore,
    /// Heights, normals and uniforms copied into render buffers
    pub transfer_finished: vk::Semaphore,
    /// Draw finished, image can be presented
    pub render_finished: vk::Semaphore,
    /// Signalled by the draw submission
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder()
            .flags(vk::FenceCreateFlags::SIGNALED); // Start signaled

        let device = &device.device;
        let mut sync = Self::default();
        let created: Result<()> = unsafe {
            (|| {
                sync.image_available = device.create_semaphore(&semaphore_info, None)?;
                sync.compute_finished = device.create_semaphore(&semaphore_info, None)?;
                sync.transfer_finished = device.create_semaphore(&semaphore_info, None)?;
                sync.render_finished = device.create_semaphore(&semaphore_info, None)?;
                sync.in_flight_fence = device
                    .create_fence(&fence_info, None)
                    .context("Failed to create frame fence")?;
                Ok(())
            })()
        };

        if let Err(e) = created {
            sync.destroy(device);
            return Err(e).context("Failed to create frame sync objects");
        }
        Ok(sync)
    }

    /// Block until the previous frame's draw completed, then re-arm the fence
    pub fn wait_and_reset(&self, device: &ash::Device) -> Result<()> {
        unsafe {
            device
                .wait_for_fences(&[self.in_flight_fence], true, u64::MAX)
                .context("Failed waiting for frame fence")?;
            device.reset_fences(&[self.in_flight_fence])?;
        }
        Ok(())
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.compute_finished, None);
            device.destroy_semaphore(self.transfer_finished, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unfilled_sync_holds_null_handles() {
        let sync = FrameSync::default();
        assert_eq!(sync.image_available, vk::Semaphore::null());
        assert_eq!(sync.render_finished, vk::Semaphore::null());
        assert_eq!(sync.in_flight_fence, vk::Fence::null());
    }
}
