// =============================================================================
// RENDERER - graphics side of the frame
// =============================================================================
//
// Owns everything needed to draw the grid:
//
//   static transfer   vertex/index staging  -> device-local vertex/index
//   dynamic transfer  uniform staging       -> device-local uniform buffer
//                     compute outputs       -> height/normal vertex buffers
//   draw              one pre-recorded command buffer per swapchain image
//
// Extent-dependent objects (render pass, pipeline, depth image, framebuffers,
// draw command buffers) are rebuilt with `rebuild_for_swapchain`.

use anyhow::{Context, Result};
use ash::vk;
use crate::backend::{pipeline, shader, Commands, GpuBuffer, GpuImage, Swapchain};
use crate::camera::SceneUniforms;
use crate::compute::Compute;
use crate::config::{CameraConfig, Config};
use crate::mesh::GridMesh;

/// Objects that depend on the swapchain extent or format
#[derive(Default)]
struct SwapchainTargets {
    render_pass: vk::RenderPass,
    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,
    depth_image: GpuImage,
    depth_view: vk::ImageView,
    framebuffers: Vec<vk::Framebuffer>,
    /// Indexed by swapchain image
    draw_command_buffers: Vec<vk::CommandBuffer>,
}

pub struct Renderer {
    commands: Commands,
    camera: CameraConfig,
    clear_color: [f32; 4],
    index_count: u32,

    command_pool: vk::CommandPool,
    pub static_transfer: vk::CommandBuffer,
    pub dynamic_transfer: vk::CommandBuffer,

    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    /// Freed once the static transfer has completed
    static_staging: Option<[GpuBuffer; 2]>,
    uniform_staging: GpuBuffer,
    uniform_buffer: GpuBuffer,
    height_buffer: GpuBuffer,
    normal_buffer: GpuBuffer,

    descriptor_set_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set: vk::DescriptorSet,

    vert_shader: vk::ShaderModule,
    frag_shader: vk::ShaderModule,

    targets: Option<SwapchainTargets>,
}

impl Renderer {
    pub fn new(
        commands: Commands,
        config: &Config,
        compute: &Compute,
        swapchain: &Swapchain,
    ) -> Result<Self> {
        let device = commands.device.clone();

        device.controller.check_format_features(
            pipeline::DEPTH_FORMAT,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )?;

        let mesh = GridMesh::new(config.grid.width, config.grid.height, config.grid.spacing);
        log::info!(
            "Grid mesh: {} vertices, {} indices",
            mesh.vertex_count(),
            mesh.index_count()
        );

        // Handles start null; Drop releases whatever was created if a later
        // step fails
        let mut renderer = Self {
            commands,
            camera: config.camera,
            clear_color: config.graphics.clear_color,
            index_count: mesh.index_count(),
            command_pool: vk::CommandPool::null(),
            static_transfer: vk::CommandBuffer::null(),
            dynamic_transfer: vk::CommandBuffer::null(),
            vertex_buffer: GpuBuffer::default(),
            index_buffer: GpuBuffer::default(),
            static_staging: None,
            uniform_staging: GpuBuffer::default(),
            uniform_buffer: GpuBuffer::default(),
            height_buffer: GpuBuffer::default(),
            normal_buffer: GpuBuffer::default(),
            descriptor_set_layout: vk::DescriptorSetLayout::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_set: vk::DescriptorSet::null(),
            vert_shader: vk::ShaderModule::null(),
            frag_shader: vk::ShaderModule::null(),
            targets: None,
        };

        renderer.command_pool = unsafe {
            let pool_info = vk::CommandPoolCreateInfo::builder()
                .queue_family_index(device.queue_family);
            device.device.create_command_pool(&pool_info, None)
                .context("Failed to create graphics command pool")?
        };

        // ─────────────────────────────────────────────────────────────────────
        // Buffers
        // ─────────────────────────────────────────────────────────────────────
        let commands = renderer.commands.clone();
        let vertex_staging = commands
            .create_buffer_with_data(vk::BufferUsageFlags::TRANSFER_SRC, &mesh.vertices)?;
        let index_staging = match commands
            .create_buffer_with_data(vk::BufferUsageFlags::TRANSFER_SRC, &mesh.indices)
        {
            Ok(buffer) => buffer,
            Err(e) => {
                vertex_staging.destroy(&device.device);
                return Err(e);
            }
        };
        renderer.static_staging = Some([vertex_staging, index_staging]);

        renderer.vertex_buffer = commands.create_buffer(
            vertex_staging.size,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        renderer.index_buffer = commands.create_buffer(
            index_staging.size,
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        let uniform_size = std::mem::size_of::<SceneUniforms>() as vk::DeviceSize;
        renderer.uniform_staging = commands.create_buffer(
            uniform_size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        renderer.uniform_buffer = commands.create_buffer(
            uniform_size,
            vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        renderer.height_buffer = commands.create_buffer(
            compute.output_heights.size,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        renderer.normal_buffer = commands.create_buffer(
            compute.output_normals.size,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        // ─────────────────────────────────────────────────────────────────────
        // Descriptor set: binding 0 = scene uniforms
        // ─────────────────────────────────────────────────────────────────────
        let layout_bindings = [vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .build()];

        renderer.descriptor_set_layout = unsafe {
            let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&layout_bindings);
            device.device.create_descriptor_set_layout(&layout_info, None)
                .context("Failed to create descriptor set layout")?
        };

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
        }];
        renderer.descriptor_pool = unsafe {
            let pool_info = vk::DescriptorPoolCreateInfo::builder()
                .max_sets(1)
                .pool_sizes(&pool_sizes);
            device.device.create_descriptor_pool(&pool_info, None)
                .context("Failed to create descriptor pool")?
        };

        renderer.descriptor_set = unsafe {
            let set_layouts = [renderer.descriptor_set_layout];
            let alloc_info = vk::DescriptorSetAllocateInfo::builder()
                .descriptor_pool(renderer.descriptor_pool)
                .set_layouts(&set_layouts);
            device.device.allocate_descriptor_sets(&alloc_info)
                .context("Failed to allocate descriptor set")?[0]
        };

        let uniform_info = [vk::DescriptorBufferInfo {
            buffer: renderer.uniform_buffer.buffer,
            offset: 0,
            range: uniform_size,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(renderer.descriptor_set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&uniform_info)
            .build();
        unsafe { device.device.update_descriptor_sets(&[write], &[]) };

        // ─────────────────────────────────────────────────────────────────────
        // Shaders stay loaded so pipelines can be rebuilt on resize
        // ─────────────────────────────────────────────────────────────────────
        renderer.vert_shader = shader::load_shader_module(
            &device.device,
            &config.shaders.path("grid.vert.spv"),
        )?;
        renderer.frag_shader = shader::load_shader_module(
            &device.device,
            &config.shaders.path("grid.frag.spv"),
        )?;

        let transfers = unsafe {
            let alloc_info = vk::CommandBufferAllocateInfo::builder()
                .command_pool(renderer.command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(2);
            device.device.allocate_command_buffers(&alloc_info)
                .context("Failed to allocate transfer command buffers")?
        };
        renderer.static_transfer = transfers[0];
        renderer.dynamic_transfer = transfers[1];

        renderer.record_static_transfer()?;
        renderer.record_dynamic_transfer(compute)?;
        renderer.update_uniforms(swapchain.extent)?;
        renderer.rebuild_for_swapchain(swapchain)?;

        Ok(renderer)
    }

    pub fn draw_command_buffer(&self, image_index: u32) -> Result<vk::CommandBuffer> {
        self.targets
            .as_ref()
            .and_then(|t| t.draw_command_buffers.get(image_index as usize).copied())
            .with_context(|| format!("No draw command buffer for image {}", image_index))
    }

    /// Write this frame's uniforms into the staging buffer.
    ///
    /// The dynamic transfer must not be executing.
    pub fn update_uniforms(&self, extent: vk::Extent2D) -> Result<()> {
        let uniforms = SceneUniforms::new(&self.camera, extent.width, extent.height);
        self.commands.upload(&self.uniform_staging, std::slice::from_ref(&uniforms))
    }

    /// Drop the static staging buffers once the static transfer has run
    pub fn release_static_staging(&mut self) {
        if let Some(staging) = self.static_staging.take() {
            for buffer in staging {
                buffer.destroy(&self.commands.device.device);
            }
            log::debug!("Released static staging buffers");
        }
    }

    /// Recreate everything that depends on the swapchain. The device must be
    /// idle.
    pub fn rebuild_for_swapchain(&mut self, swapchain: &Swapchain) -> Result<()> {
        self.destroy_targets();

        // Partial targets are kept so destroy_targets releases them
        let mut targets = SwapchainTargets::default();
        let result = self.create_targets(&mut targets, swapchain);
        self.targets = Some(targets);
        result
    }

    fn create_targets(&self, targets: &mut SwapchainTargets, swapchain: &Swapchain) -> Result<()> {
        let device = self.commands.device.clone();
        let extent = swapchain.extent;

        targets.render_pass = pipeline::create_render_pass(&device, swapchain.format)?;
        (targets.pipeline, targets.pipeline_layout) = pipeline::create_graphics_pipeline(
            &device,
            targets.render_pass,
            extent,
            self.vert_shader,
            self.frag_shader,
            self.descriptor_set_layout,
        )?;

        targets.depth_image = self.commands.create_image(
            extent,
            pipeline::DEPTH_FORMAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        targets.depth_view = self.commands.create_image_view(
            targets.depth_image.image,
            targets.depth_image.format,
            vk::ImageAspectFlags::DEPTH,
        )?;

        targets.framebuffers = pipeline::create_framebuffers(
            &device,
            &swapchain.image_views,
            targets.depth_view,
            targets.render_pass,
            extent,
        )?;

        targets.draw_command_buffers = unsafe {
            let alloc_info = vk::CommandBufferAllocateInfo::builder()
                .command_pool(self.command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(targets.framebuffers.len() as u32);
            device.device.allocate_command_buffers(&alloc_info)
                .context("Failed to allocate draw command buffers")?
        };
        self.record_draw_command_buffers(targets, extent)?;

        log::info!(
            "Recorded {} draw command buffers for {}x{}",
            targets.draw_command_buffers.len(),
            extent.width,
            extent.height
        );
        Ok(())
    }

    fn record_static_transfer(&self) -> Result<()> {
        let device = &self.commands.device.device;
        let [vertex_staging, index_staging] =
            self.static_staging.context("Static staging buffers already released")?;
        let cmd = self.static_transfer;

        unsafe {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(cmd, &begin_info)?;

            device.cmd_copy_buffer(
                cmd,
                vertex_staging.buffer,
                self.vertex_buffer.buffer,
                &[vk::BufferCopy { src_offset: 0, dst_offset: 0, size: vertex_staging.size }],
            );
            device.cmd_copy_buffer(
                cmd,
                index_staging.buffer,
                self.index_buffer.buffer,
                &[vk::BufferCopy { src_offset: 0, dst_offset: 0, size: index_staging.size }],
            );

            let barrier = vk::MemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::VERTEX_ATTRIBUTE_READ | vk::AccessFlags::INDEX_READ)
                .build();
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::VERTEX_INPUT,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );

            device.end_command_buffer(cmd)?;
        }
        Ok(())
    }

    /// Recorded once: the source and destination buffers never change
    fn record_dynamic_transfer(&self, compute: &Compute) -> Result<()> {
        let device = &self.commands.device.device;
        let cmd = self.dynamic_transfer;

        let copies = [
            (self.uniform_staging, self.uniform_buffer),
            (compute.output_heights, self.height_buffer),
            (compute.output_normals, self.normal_buffer),
        ];

        unsafe {
            let begin_info = vk::CommandBufferBeginInfo::builder();
            device.begin_command_buffer(cmd, &begin_info)?;

            for (src, dst) in copies {
                device.cmd_copy_buffer(
                    cmd,
                    src.buffer,
                    dst.buffer,
                    &[vk::BufferCopy { src_offset: 0, dst_offset: 0, size: src.size.min(dst.size) }],
                );
            }

            device.end_command_buffer(cmd)?;
        }
        Ok(())
    }

    fn record_draw_command_buffers(&self, targets: &SwapchainTargets, extent: vk::Extent2D) -> Result<()> {
        let device = &self.commands.device.device;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue { float32: self.clear_color },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            },
        ];

        let vertex_buffers = [
            self.vertex_buffer.buffer,
            self.height_buffer.buffer,
            self.normal_buffer.buffer,
        ];
        let offsets = [0; 3];

        for (&cmd, &framebuffer) in targets.draw_command_buffers.iter().zip(&targets.framebuffers) {
            unsafe {
                let begin_info = vk::CommandBufferBeginInfo::builder();
                device.begin_command_buffer(cmd, &begin_info)?;

                let render_pass_info = vk::RenderPassBeginInfo::builder()
                    .render_pass(targets.render_pass)
                    .framebuffer(framebuffer)
                    .render_area(vk::Rect2D {
                        offset: vk::Offset2D { x: 0, y: 0 },
                        extent,
                    })
                    .clear_values(&clear_values);

                device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);

                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, targets.pipeline);
                device.cmd_bind_vertex_buffers(cmd, 0, &vertex_buffers, &offsets);
                device.cmd_bind_index_buffer(cmd, self.index_buffer.buffer, 0, vk::IndexType::UINT32);
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    targets.pipeline_layout,
                    0,
                    &[self.descriptor_set],
                    &[],
                );
                device.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);

                device.cmd_end_render_pass(cmd);
                device.end_command_buffer(cmd)?;
            }
        }
        Ok(())
    }

    fn destroy_targets(&mut self) {
        let Some(targets) = self.targets.take() else {
            return;
        };
        let device = &self.commands.device.device;

        unsafe {
            if !targets.draw_command_buffers.is_empty() {
                device.free_command_buffers(self.command_pool, &targets.draw_command_buffers);
            }
            for &framebuffer in &targets.framebuffers {
                device.destroy_framebuffer(framebuffer, None);
            }
            device.destroy_image_view(targets.depth_view, None);
            device.destroy_pipeline(targets.pipeline, None);
            device.destroy_pipeline_layout(targets.pipeline_layout, None);
            device.destroy_render_pass(targets.render_pass, None);
        }
        targets.depth_image.destroy(device);
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.destroy_targets();
        self.release_static_staging();

        let device = &self.commands.device.device;
        unsafe {
            device.destroy_shader_module(self.vert_shader, None);
            device.destroy_shader_module(self.frag_shader, None);
            device.destroy_descriptor_pool(self.descriptor_pool, None);
            device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
            device.destroy_command_pool(self.command_pool, None);
        }

        for buffer in [
            self.normal_buffer,
            self.height_buffer,
            self.uniform_buffer,
            self.uniform_staging,
            self.index_buffer,
            self.vertex_buffer,
        ] {
            buffer.destroy(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unfilled_targets_are_safe_to_release() {
        let targets = SwapchainTargets::default();
        assert_eq!(targets.render_pass, vk::RenderPass::null());
        assert_eq!(targets.pipeline, vk::Pipeline::null());
        assert_eq!(targets.depth_view, vk::ImageView::null());
        assert_eq!(targets.depth_image.image, vk::Image::null());
        assert!(targets.framebuffers.is_empty());
        // destroy_targets skips vkFreeCommandBuffers for an empty list
        assert!(targets.draw_command_buffers.is_empty());
    }
}
