// =============================================================================
// WAVE SIMULATION - compute pipeline evolving the height field
// =============================================================================
//
// The heights live in one storage buffer holding two slices of N floats:
// the current state and the previous one. A step integrates the discrete
// wave equation into the previous slice, so the slices swap roles every
// step. Two command buffers are recorded up front, one per parity.
//
//   pass 0:  prev[i] = (2 cur[i] - prev[i] + c² (Σ neighbours - 4 cur[i])) · damping
//   pass 1:  out_heights[i] = prev[i], out_normals[i] = central differences
//
// The renderer copies out_heights / out_normals into its vertex buffers.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use crate::backend::{pipeline, shader, Commands, GpuBuffer};
use crate::config::{Config, GridConfig, WaveConfig};

/// Must match local_size_x / local_size_y in shaders/wave.comp
pub const WORKGROUP_SIZE: u32 = 16;

/// Upper bound on grid vertices; keeps every index and buffer offset in u32
pub const MAX_GRID_VERTICES: u32 = 1 << 24;

/// Largest Courant number the explicit 2D scheme tolerates
pub const MAX_COURANT: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Simulation constants derived from the configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveParams {
    /// speed · dt / spacing
    pub courant: f32,
    pub courant_squared: f32,
    pub damping: f32,
    pub spacing: f32,
}

impl WaveParams {
    pub fn new(wave: &WaveConfig, grid: &GridConfig) -> Self {
        let courant = wave.speed * wave.time_step / grid.spacing;
        Self {
            courant,
            courant_squared: courant * courant,
            damping: wave.damping,
            spacing: grid.spacing,
        }
    }

    pub fn check_stability(&self) -> Result<()> {
        if !self.courant.is_finite() || self.courant > MAX_COURANT {
            anyhow::bail!(
                "Wave settings are unstable: speed * time_step / spacing = {:.4} exceeds {:.4}",
                self.courant,
                MAX_COURANT
            );
        }
        Ok(())
    }
}

/// Push constant block of shaders/wave.comp
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct WavePushConstants {
    pub width: u32,
    pub height: u32,
    pub current_offset: u32,
    pub previous_offset: u32,
    pub pass: u32,
    pub courant_squared: f32,
    pub damping: f32,
    pub spacing: f32,
}

impl WavePushConstants {
    /// Constants for one pass. Parity 0 reads slice 0 and writes slice 1,
    /// parity 1 the other way round.
    pub fn for_pass(grid: &GridConfig, params: &WaveParams, parity: usize, pass: u32) -> Self {
        let slice = grid.width * grid.height;
        let (current_offset, previous_offset) = if parity == 0 { (0, slice) } else { (slice, 0) };

        Self {
            width: grid.width,
            height: grid.height,
            current_offset,
            previous_offset,
            pass,
            courant_squared: params.courant_squared,
            damping: params.damping,
            spacing: params.spacing,
        }
    }
}

/// `width * height`, or `None` when it overflows or exceeds `MAX_GRID_VERTICES`
pub fn grid_vertex_count(grid: &GridConfig) -> Option<u32> {
    grid.width
        .checked_mul(grid.height)
        .filter(|&count| count <= MAX_GRID_VERTICES)
}

pub fn workgroup_count(size: u32) -> u32 {
    size.div_ceil(WORKGROUP_SIZE)
}

/// Fail if the device cannot run a 16x16 workgroup, dispatch the whole grid
/// or bind the height and normal buffers
pub fn check_dispatch_limits(grid: &GridConfig, limits: &vk::PhysicalDeviceLimits) -> Result<()> {
    let vertex_count = grid_vertex_count(grid)
        .with_context(|| format!("Grid {}x{} is too large", grid.width, grid.height))?
        as u64;
    // Two height slices or one vec4 per vertex, whichever is larger
    let largest_binding = vertex_count * 16;
    if largest_binding > limits.max_storage_buffer_range as u64 {
        anyhow::bail!(
            "Grid {}x{} needs a {} byte storage buffer, device limit is {}",
            grid.width,
            grid.height,
            largest_binding,
            limits.max_storage_buffer_range
        );
    }

    let invocations = WORKGROUP_SIZE * WORKGROUP_SIZE;
    if limits.max_compute_work_group_invocations < invocations
        || limits.max_compute_work_group_size[0] < WORKGROUP_SIZE
        || limits.max_compute_work_group_size[1] < WORKGROUP_SIZE
    {
        anyhow::bail!(
            "Device supports {} invocations per workgroup, wave step needs {}x{}",
            limits.max_compute_work_group_invocations,
            WORKGROUP_SIZE,
            WORKGROUP_SIZE
        );
    }

    let groups = [workgroup_count(grid.width), workgroup_count(grid.height)];
    if groups[0] > limits.max_compute_work_group_count[0]
        || groups[1] > limits.max_compute_work_group_count[1]
    {
        anyhow::bail!(
            "Grid {}x{} needs {:?} workgroups, device limit is {:?}",
            grid.width,
            grid.height,
            groups,
            limits.max_compute_work_group_count
        );
    }
    Ok(())
}

/// Gaussian drop centred on the grid, zero on the border
pub fn initial_heights(grid: &GridConfig, wave: &WaveConfig) -> Vec<f32> {
    let centre_x = (grid.width - 1) as f32 * 0.5;
    let centre_z = (grid.height - 1) as f32 * 0.5;
    let radius_squared = (wave.drop_radius * wave.drop_radius).max(f32::EPSILON);

    (0..grid.height)
        .flat_map(|row| (0..grid.width).map(move |col| (row, col)))
        .map(|(row, col)| {
            let on_border = row == 0 || col == 0 || row == grid.height - 1 || col == grid.width - 1;
            if on_border {
                return 0.0;
            }
            let dx = col as f32 - centre_x;
            let dz = row as f32 - centre_z;
            wave.drop_amplitude * (-(dx * dx + dz * dz) / radius_squared).exp()
        })
        .collect()
}

/// Summary of a height field, for logging
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeightStats {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
}

impl HeightStats {
    pub fn from_slice(heights: &[f32]) -> Option<Self> {
        if heights.is_empty() {
            return None;
        }

        let (min, max, sum) = heights.iter().fold(
            (f32::INFINITY, f32::NEG_INFINITY, 0.0f64),
            |(min, max, sum), &h| (min.min(h), max.max(h), sum + h as f64),
        );

        Some(Self {
            min,
            max,
            mean: (sum / heights.len() as f64) as f32,
        })
    }
}

pub struct Compute {
    commands: Commands,
    grid: GridConfig,
    params: WaveParams,

    command_pool: vk::CommandPool,
    /// Indexed by parity
    command_buffers: [vk::CommandBuffer; 2],
    parity: usize,

    /// Two slices of N floats
    heights: GpuBuffer,
    pub output_heights: GpuBuffer,
    pub output_normals: GpuBuffer,

    descriptor_set_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set: vk::DescriptorSet,
    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,
}

impl Compute {
    pub fn new(commands: Commands, config: &Config) -> Result<Self> {
        let grid = config.grid;
        let params = WaveParams::new(&config.wave, &grid);
        params.check_stability()?;

        log::info!(
            "Creating wave simulation: {}x{} grid, courant {:.3}, damping {}",
            grid.width,
            grid.height,
            params.courant,
            params.damping
        );

        let device = commands.device.clone();
        let vertex_count = grid_vertex_count(&grid).with_context(|| {
            format!("Grid {}x{} exceeds {} vertices", grid.width, grid.height, MAX_GRID_VERTICES)
        })?;
        check_dispatch_limits(&grid, &device.controller.properties.limits)?;

        let vertex_count = vertex_count as vk::DeviceSize;
        let float_size = std::mem::size_of::<f32>() as vk::DeviceSize;

        // Every handle starts null; Drop releases whatever was created if a
        // later step fails
        let mut compute = Self {
            commands,
            grid,
            params,
            command_pool: vk::CommandPool::null(),
            command_buffers: [vk::CommandBuffer::null(); 2],
            parity: 0,
            heights: GpuBuffer::default(),
            output_heights: GpuBuffer::default(),
            output_normals: GpuBuffer::default(),
            descriptor_set_layout: vk::DescriptorSetLayout::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_set: vk::DescriptorSet::null(),
            pipeline: vk::Pipeline::null(),
            pipeline_layout: vk::PipelineLayout::null(),
        };

        compute.command_pool = unsafe {
            let pool_info = vk::CommandPoolCreateInfo::builder()
                .queue_family_index(device.queue_family);
            device.device.create_command_pool(&pool_info, None)
                .context("Failed to create compute command pool")?
        };

        // ─────────────────────────────────────────────────────────────────────
        // Storage buffers
        // ─────────────────────────────────────────────────────────────────────
        compute.heights = compute.commands.create_buffer(
            2 * vertex_count * float_size,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        compute.output_heights = compute.commands.create_buffer(
            vertex_count * float_size,
            vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_SRC
                | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        compute.output_normals = compute.commands.create_buffer(
            vertex_count * 4 * float_size,
            vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_SRC
                | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        // ─────────────────────────────────────────────────────────────────────
        // Descriptors: binding 0 heights, 1 output heights, 2 output normals
        // ─────────────────────────────────────────────────────────────────────
        let layout_bindings: Vec<_> = (0..3)
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
                    .build()
            })
            .collect();

        compute.descriptor_set_layout = unsafe {
            let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&layout_bindings);
            device.device.create_descriptor_set_layout(&layout_info, None)
                .context("Failed to create compute descriptor set layout")?
        };

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: 3,
        }];
        compute.descriptor_pool = unsafe {
            let pool_info = vk::DescriptorPoolCreateInfo::builder()
                .max_sets(1)
                .pool_sizes(&pool_sizes);
            device.device.create_descriptor_pool(&pool_info, None)
                .context("Failed to create compute descriptor pool")?
        };

        compute.descriptor_set = unsafe {
            let set_layouts = [compute.descriptor_set_layout];
            let alloc_info = vk::DescriptorSetAllocateInfo::builder()
                .descriptor_pool(compute.descriptor_pool)
                .set_layouts(&set_layouts);
            device.device.allocate_descriptor_sets(&alloc_info)
                .context("Failed to allocate compute descriptor set")?[0]
        };

        let buffer_infos = [compute.heights, compute.output_heights, compute.output_normals].map(|b| {
            [vk::DescriptorBufferInfo {
                buffer: b.buffer,
                offset: 0,
                range: vk::WHOLE_SIZE,
            }]
        });
        let writes: Vec<_> = buffer_infos
            .iter()
            .enumerate()
            .map(|(binding, info)| {
                vk::WriteDescriptorSet::builder()
                    .dst_set(compute.descriptor_set)
                    .dst_binding(binding as u32)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(info)
                    .build()
            })
            .collect();
        unsafe { device.device.update_descriptor_sets(&writes, &[]) };

        // ─────────────────────────────────────────────────────────────────────
        // Pipeline
        // ─────────────────────────────────────────────────────────────────────
        let shader_module = shader::load_shader_module(
            &device.device,
            &config.shaders.path("wave.comp.spv"),
        )?;
        let pipeline_result = pipeline::create_compute_pipeline(
            &device,
            shader_module,
            compute.descriptor_set_layout,
            std::mem::size_of::<WavePushConstants>() as u32,
        );
        unsafe { device.device.destroy_shader_module(shader_module, None) };
        (compute.pipeline, compute.pipeline_layout) = pipeline_result?;

        compute.command_buffers = unsafe {
            let alloc_info = vk::CommandBufferAllocateInfo::builder()
                .command_pool(compute.command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(2);
            let buffers = device.device.allocate_command_buffers(&alloc_info)
                .context("Failed to allocate compute command buffers")?;
            [buffers[0], buffers[1]]
        };

        compute.record_command_buffers()?;
        compute.upload_initial_state(&config.wave)?;

        log::info!(
            "Wave simulation ready: {}x{} workgroups per pass",
            workgroup_count(grid.width),
            workgroup_count(grid.height)
        );

        Ok(compute)
    }

    /// Command buffer for the next step; flips the ping-pong parity
    pub fn step(&mut self) -> vk::CommandBuffer {
        let cmd = self.command_buffers[self.parity];
        self.parity ^= 1;
        cmd
    }

    /// Run one step synchronously and log statistics of the resulting heights.
    ///
    /// Only valid while no frame is in flight.
    pub fn dispatch_once_for_inspection(&mut self) -> Result<HeightStats> {
        let device = self.commands.device.clone();
        let vertex_count = (self.grid.width * self.grid.height) as usize;

        let cmd = self.step();
        let command_buffers = [cmd];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
        unsafe {
            device.device.queue_submit(device.compute_queue, &[submit_info.build()], vk::Fence::null())
                .context("Failed to submit inspection step")?;
            device.device.queue_wait_idle(device.compute_queue)?;
        }

        let readback = self.commands.create_buffer(
            self.output_heights.size,
            vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;

        let output_heights = self.output_heights;
        let copied = self.commands.submit_and_wait(self.command_pool, device.compute_queue, |cmd| unsafe {
            let barrier = vk::MemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::SHADER_WRITE)
                .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
                .build();
            device.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: output_heights.size,
            };
            device.device.cmd_copy_buffer(cmd, output_heights.buffer, readback.buffer, &[region]);
        });

        let heights = copied.and_then(|_| self.commands.read_back::<f32>(&readback, vertex_count));
        readback.destroy(&device.device);

        let stats = HeightStats::from_slice(&heights?).context("Empty height field")?;
        log::info!(
            "Height field after one step: min {:.4}, max {:.4}, mean {:.6}",
            stats.min,
            stats.max,
            stats.mean
        );
        Ok(stats)
    }

    fn record_command_buffers(&self) -> Result<()> {
        let device = &self.commands.device.device;
        let groups_x = workgroup_count(self.grid.width);
        let groups_y = workgroup_count(self.grid.height);

        for (parity, &cmd) in self.command_buffers.iter().enumerate() {
            unsafe {
                let begin_info = vk::CommandBufferBeginInfo::builder();
                device.begin_command_buffer(cmd, &begin_info)?;

                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, self.pipeline);
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::COMPUTE,
                    self.pipeline_layout,
                    0,
                    &[self.descriptor_set],
                    &[],
                );

                // Pass 0: integrate
                let integrate = WavePushConstants::for_pass(&self.grid, &self.params, parity, 0);
                device.cmd_push_constants(
                    cmd,
                    self.pipeline_layout,
                    vk::ShaderStageFlags::COMPUTE,
                    0,
                    bytemuck::bytes_of(&integrate),
                );
                device.cmd_dispatch(cmd, groups_x, groups_y, 1);

                // Pass 1 reads neighbours written by other invocations of pass 0
                let barrier = vk::BufferMemoryBarrier::builder()
                    .src_access_mask(vk::AccessFlags::SHADER_WRITE)
                    .dst_access_mask(vk::AccessFlags::SHADER_READ)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .buffer(self.heights.buffer)
                    .offset(0)
                    .size(vk::WHOLE_SIZE)
                    .build();
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::COMPUTE_SHADER,
                    vk::PipelineStageFlags::COMPUTE_SHADER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[barrier],
                    &[],
                );

                // Pass 1: outputs
                let outputs = WavePushConstants::for_pass(&self.grid, &self.params, parity, 1);
                device.cmd_push_constants(
                    cmd,
                    self.pipeline_layout,
                    vk::ShaderStageFlags::COMPUTE,
                    0,
                    bytemuck::bytes_of(&outputs),
                );
                device.cmd_dispatch(cmd, groups_x, groups_y, 1);

                device.end_command_buffer(cmd)?;
            }
        }

        log::debug!("Recorded {} compute command buffers", self.command_buffers.len());
        Ok(())
    }

    /// Fill both slices with the drop so the surface starts at rest, and seed
    /// the outputs so the first transfer has something valid to copy
    fn upload_initial_state(&self, wave: &WaveConfig) -> Result<()> {
        let device = self.commands.device.clone();

        let drop = initial_heights(&self.grid, wave);
        let both_slices: Vec<f32> = drop.iter().chain(drop.iter()).copied().collect();
        let up_normals = vec![[0.0f32, 1.0, 0.0, 0.0]; drop.len()];

        let height_staging = self
            .commands
            .create_buffer_with_data(vk::BufferUsageFlags::TRANSFER_SRC, &both_slices)?;
        let normal_staging = match self
            .commands
            .create_buffer_with_data(vk::BufferUsageFlags::TRANSFER_SRC, &up_normals)
        {
            Ok(buffer) => buffer,
            Err(e) => {
                height_staging.destroy(&device.device);
                return Err(e);
            }
        };

        let (heights, output_heights, output_normals) =
            (self.heights, self.output_heights, self.output_normals);

        let result = self.commands.submit_and_wait(self.command_pool, device.compute_queue, |cmd| unsafe {
            device.device.cmd_copy_buffer(
                cmd,
                height_staging.buffer,
                heights.buffer,
                &[vk::BufferCopy { src_offset: 0, dst_offset: 0, size: heights.size }],
            );
            device.device.cmd_copy_buffer(
                cmd,
                height_staging.buffer,
                output_heights.buffer,
                &[vk::BufferCopy { src_offset: 0, dst_offset: 0, size: output_heights.size }],
            );
            device.device.cmd_copy_buffer(
                cmd,
                normal_staging.buffer,
                output_normals.buffer,
                &[vk::BufferCopy { src_offset: 0, dst_offset: 0, size: output_normals.size }],
            );

            let barrier = vk::MemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(
                    vk::AccessFlags::SHADER_READ
                        | vk::AccessFlags::SHADER_WRITE
                        | vk::AccessFlags::TRANSFER_READ,
                )
                .build();
            device.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::COMPUTE_SHADER | vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        });

        height_staging.destroy(&device.device);
        normal_staging.destroy(&device.device);
        result.context("Failed to upload initial wave state")
    }
}

impl Drop for Compute {
    fn drop(&mut self) {
        let device = &self.commands.device.device;
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_descriptor_pool(self.descriptor_pool, None);
            device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
            // Also frees the command buffers
            device.destroy_command_pool(self.command_pool, None);
        }
        self.output_normals.destroy(device);
        self.output_heights.destroy(device);
        self.heights.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn courant_number_from_config() {
        let wave = WaveConfig {
            speed: 2.0,
            time_step: 0.1,
            ..Default::default()
        };
        let grid = GridConfig {
            spacing: 0.5,
            ..Default::default()
        };

        let params = WaveParams::new(&wave, &grid);
        assert_relative_eq!(params.courant, 0.4);
        assert_relative_eq!(params.courant_squared, 0.16);
        assert_relative_eq!(params.spacing, 0.5);
        params.check_stability().unwrap();
    }

    #[test]
    fn defaults_are_stable() {
        WaveParams::new(&WaveConfig::default(), &GridConfig::default())
            .check_stability()
            .unwrap();
    }

    #[test]
    fn too_fast_wave_is_rejected() {
        let wave = WaveConfig {
            speed: 50.0,
            time_step: 0.1,
            ..Default::default()
        };
        let err = WaveParams::new(&wave, &GridConfig::default())
            .check_stability()
            .unwrap_err();
        assert!(err.to_string().contains("unstable"));
    }

    #[test]
    fn bound_is_inclusive() {
        let grid = GridConfig {
            spacing: 1.0,
            ..Default::default()
        };
        let wave = WaveConfig {
            speed: MAX_COURANT,
            time_step: 1.0,
            ..Default::default()
        };
        WaveParams::new(&wave, &grid).check_stability().unwrap();
    }

    #[test]
    fn push_constants_match_shader_block() {
        assert_eq!(std::mem::size_of::<WavePushConstants>(), 32);
        assert_eq!(std::mem::offset_of!(WavePushConstants, courant_squared), 20);
    }

    #[test]
    fn parity_swaps_slices() {
        let grid = GridConfig {
            width: 8,
            height: 4,
            spacing: 1.0,
        };
        let params = WaveParams::new(&WaveConfig::default(), &grid);

        let even = WavePushConstants::for_pass(&grid, &params, 0, 0);
        assert_eq!((even.current_offset, even.previous_offset), (0, 32));

        let odd = WavePushConstants::for_pass(&grid, &params, 1, 1);
        assert_eq!((odd.current_offset, odd.previous_offset), (32, 0));
        assert_eq!(odd.pass, 1);
        assert_eq!((odd.width, odd.height), (8, 4));
    }

    #[test]
    fn workgroups_cover_grid() {
        assert_eq!(workgroup_count(1), 1);
        assert_eq!(workgroup_count(16), 1);
        assert_eq!(workgroup_count(17), 2);
        assert_eq!(workgroup_count(64), 4);
    }

    #[test]
    fn grid_vertex_count_rejects_overflow_and_cap() {
        let grid = |width, height| GridConfig { width, height, spacing: 1.0 };
        assert_eq!(grid_vertex_count(&grid(64, 32)), Some(2048));
        assert_eq!(grid_vertex_count(&grid(4096, 4096)), Some(MAX_GRID_VERTICES));
        assert_eq!(grid_vertex_count(&grid(4097, 4096)), None);
        assert_eq!(grid_vertex_count(&grid(70_000, 70_000)), None);
    }

    #[test]
    fn storage_buffer_range_limits_grid() {
        let limits = vk::PhysicalDeviceLimits {
            max_compute_work_group_invocations: 256,
            max_compute_work_group_size: [256, 256, 64],
            max_compute_work_group_count: [65535, 65535, 65535],
            max_storage_buffer_range: 64 * 64 * 16,
            ..Default::default()
        };
        let fits = GridConfig { width: 64, height: 64, spacing: 1.0 };
        check_dispatch_limits(&fits, &limits).unwrap();

        let too_big = GridConfig { width: 65, ..fits };
        let err = check_dispatch_limits(&too_big, &limits).unwrap_err();
        assert!(err.to_string().contains("storage buffer"));

        let huge = GridConfig { width: 70_000, height: 70_000, ..fits };
        assert!(check_dispatch_limits(&huge, &limits).is_err());
    }

    #[test]
    fn dispatch_limits() {
        let mut limits = vk::PhysicalDeviceLimits {
            max_storage_buffer_range: u32::MAX,
            max_compute_work_group_invocations: 256,
            max_compute_work_group_size: [256, 256, 64],
            max_compute_work_group_count: [4, 65535, 65535],
            ..Default::default()
        };
        let grid = GridConfig {
            width: 64,
            height: 64,
            spacing: 1.0,
        };
        check_dispatch_limits(&grid, &limits).unwrap();

        let wide = GridConfig { width: 65, ..grid };
        assert!(check_dispatch_limits(&wide, &limits).is_err());

        limits.max_compute_work_group_invocations = 128;
        assert!(check_dispatch_limits(&grid, &limits).is_err());
    }

    #[test]
    fn drop_peaks_in_centre_with_zero_border() {
        let grid = GridConfig {
            width: 9,
            height: 9,
            spacing: 1.0,
        };
        let wave = WaveConfig::default();
        let heights = initial_heights(&grid, &wave);

        assert_eq!(heights.len(), 81);
        assert_relative_eq!(heights[4 * 9 + 4], wave.drop_amplitude);

        for i in 0..9 {
            assert_eq!(heights[i], 0.0);
            assert_eq!(heights[8 * 9 + i], 0.0);
            assert_eq!(heights[i * 9], 0.0);
            assert_eq!(heights[i * 9 + 8], 0.0);
        }

        let stats = HeightStats::from_slice(&heights).unwrap();
        assert_relative_eq!(stats.max, wave.drop_amplitude);
        assert_eq!(stats.min, 0.0);
    }

    #[test]
    fn height_stats() {
        let stats = HeightStats::from_slice(&[-1.0, 0.5, 2.0, 0.5]).unwrap();
        assert_eq!(stats.min, -1.0);
        assert_eq!(stats.max, 2.0);
        assert_relative_eq!(stats.mean, 0.5);

        assert!(HeightStats::from_slice(&[]).is_none());
    }
}
