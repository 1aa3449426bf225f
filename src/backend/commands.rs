// Buffer and image helpers shared by the renderer and the compute step
//
// Every resource gets its own VkDeviceMemory; memory types are picked by a
// linear scan over the types the driver reports.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use super::VulkanDevice;

/// A buffer together with its backing memory. The default holds null
/// handles, which `destroy` accepts.
#[derive(Debug, Clone, Copy, Default)]
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl GpuBuffer {
    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// An image together with its backing memory
#[derive(Debug, Clone, Copy, Default)]
pub struct GpuImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub format: vk::Format,
}

impl GpuImage {
    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// Resource creation bound to one logical device
#[derive(Clone)]
pub struct Commands {
    pub device: Arc<VulkanDevice>,
}

impl Commands {
    pub fn new(device: Arc<VulkanDevice>) -> Self {
        Self { device }
    }

    /// Create a buffer and bind freshly allocated memory to it
    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<GpuBuffer> {
        let device = &self.device.device;

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None) }
            .context("Failed to create buffer")?;

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let memory = match self.allocate(requirements, properties) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e).with_context(|| format!("Buffer usage {:?}", usage));
            }
        };

        let gpu_buffer = GpuBuffer { buffer, memory, size };
        if let Err(e) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
            gpu_buffer.destroy(device);
            return Err(e).context("Failed to bind buffer memory");
        }

        Ok(gpu_buffer)
    }

    /// Create a host-visible buffer and fill it with `data`
    pub fn create_buffer_with_data<T: bytemuck::Pod>(
        &self,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<GpuBuffer> {
        let size = std::mem::size_of_val(data) as vk::DeviceSize;

        let buffer = self.create_buffer(
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        if let Err(e) = self.upload(&buffer, data) {
            buffer.destroy(&self.device.device);
            return Err(e);
        }

        Ok(buffer)
    }

    /// Create a 2D single-mip image and bind freshly allocated memory to it
    pub fn create_image(
        &self,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<GpuImage> {
        let device = &self.device.device;

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.create_image(&image_info, None) }
            .context("Failed to create image")?;

        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let memory = match self.allocate(requirements, properties) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e).with_context(|| format!("Image format {:?}", format));
            }
        };

        let gpu_image = GpuImage { image, memory, format };
        if let Err(e) = unsafe { device.bind_image_memory(image, memory, 0) } {
            gpu_image.destroy(device);
            return Err(e).context("Failed to bind image memory");
        }

        Ok(gpu_image)
    }

    pub fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect_mask: vk::ImageAspectFlags,
    ) -> Result<vk::ImageView> {
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        unsafe { self.device.device.create_image_view(&view_info, None) }
            .context("Failed to create image view")
    }

    /// Copy `data` into a host-visible buffer
    pub fn upload<T: bytemuck::Pod>(&self, buffer: &GpuBuffer, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let size = bytes.len() as vk::DeviceSize;

        if size > buffer.size {
            anyhow::bail!("Upload of {} bytes exceeds buffer size {}", size, buffer.size);
        }
        if size == 0 {
            return Ok(());
        }

        unsafe {
            let ptr = self
                .device
                .device
                .map_memory(buffer.memory, 0, size, vk::MemoryMapFlags::empty())
                .context("Failed to map buffer memory")? as *mut u8;

            ptr.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
            self.device.device.unmap_memory(buffer.memory);
        }

        Ok(())
    }

    /// Read `count` elements back from a host-visible buffer
    pub fn read_back<T: bytemuck::Pod>(&self, buffer: &GpuBuffer, count: usize) -> Result<Vec<T>> {
        let size = (count * std::mem::size_of::<T>()) as vk::DeviceSize;

        if size > buffer.size {
            anyhow::bail!("Read of {} bytes exceeds buffer size {}", size, buffer.size);
        }

        let mut out = vec![T::zeroed(); count];
        if size == 0 {
            return Ok(out);
        }

        unsafe {
            let ptr = self
                .device
                .device
                .map_memory(buffer.memory, 0, size, vk::MemoryMapFlags::empty())
                .context("Failed to map buffer memory")? as *const u8;

            let dst: &mut [u8] = bytemuck::cast_slice_mut(&mut out);
            dst.as_mut_ptr().copy_from_nonoverlapping(ptr, dst.len());
            self.device.device.unmap_memory(buffer.memory);
        }

        Ok(out)
    }

    fn allocate(
        &self,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<vk::DeviceMemory> {
        let memory_type_index = find_memory_type(
            self.device.memory_properties(),
            requirements.memory_type_bits,
            properties,
        )?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        unsafe { self.device.device.allocate_memory(&alloc_info, None) }
            .context("Failed to allocate device memory")
    }

    /// Record, submit and wait for a one-off command buffer
    pub fn submit_and_wait(
        &self,
        pool: vk::CommandPool,
        queue: vk::Queue,
        record: impl FnOnce(vk::CommandBuffer),
    ) -> Result<()> {
        let device = &self.device.device;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let cmd = unsafe { device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate one-off command buffer")?[0];

        let result = (|| -> Result<()> {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { device.begin_command_buffer(cmd, &begin_info) }?;
            record(cmd);
            unsafe { device.end_command_buffer(cmd) }?;

            let command_buffers = [cmd];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
            unsafe {
                device.queue_submit(queue, &[submit_info.build()], vk::Fence::null())?;
                device.queue_wait_idle(queue)?;
            }
            Ok(())
        })();

        unsafe { device.free_command_buffers(pool, &[cmd]) };
        result
    }
}

/// Find the first memory type allowed by `type_bits` that has every flag in
/// `required`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    for i in 0..memory_properties.memory_type_count {
        let has_type = (type_bits & (1 << i)) != 0;
        let has_properties = memory_properties.memory_types[i as usize]
            .property_flags
            .contains(required);

        if has_type && has_properties {
            return Ok(i);
        }
    }

    anyhow::bail!(
        "No memory type matches bits {:#b} with properties {:?}",
        type_bits,
        required
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, &property_flags) in flags.iter().enumerate() {
            props.memory_types[i] = vk::MemoryType {
                property_flags,
                heap_index: 0,
            };
        }
        props
    }

    const HOST: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
        vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
    );

    #[test]
    fn default_resources_hold_null_handles() {
        let buffer = GpuBuffer::default();
        assert_eq!(buffer.buffer, vk::Buffer::null());
        assert_eq!(buffer.memory, vk::DeviceMemory::null());
        assert_eq!(buffer.size, 0);

        let image = GpuImage::default();
        assert_eq!(image.image, vk::Image::null());
        assert_eq!(image.memory, vk::DeviceMemory::null());
        assert_eq!(image.format, vk::Format::UNDEFINED);
    }

    #[test]
    fn picks_first_matching_type() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            HOST,
            HOST | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);

        assert_eq!(find_memory_type(&props, 0b111, HOST).unwrap(), 1);
        assert_eq!(
            find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn respects_type_bits() {
        let props = memory_properties(&[HOST, HOST]);
        assert_eq!(find_memory_type(&props, 0b10, HOST).unwrap(), 1);
    }

    #[test]
    fn superset_of_flags_matches() {
        let props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL | HOST]);
        assert_eq!(find_memory_type(&props, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap(), 0);
    }

    #[test]
    fn no_match_is_an_error() {
        let props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        assert!(find_memory_type(&props, 0b1, HOST).is_err());
        // Bits beyond memory_type_count are ignored
        assert!(find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL).is_err());
    }

    #[test]
    fn empty_requirements_match_any_allowed_type() {
        let props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL, HOST]);
        assert_eq!(find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::empty()).unwrap(), 1);
    }
}
