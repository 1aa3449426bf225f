// Shader module loading
//
// SPIR-V is compiled ahead of time by build.rs and read from disk at
// startup.

use anyhow::{Context, Result};
use ash::vk;
use std::path::Path;

/// Load a SPIR-V file and create a shader module from it
pub fn load_shader_module(device: &ash::Device, path: &Path) -> Result<vk::ShaderModule> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open shader file {:?} (was glslc run?)", path))?;

    let code = ash::util::read_spv(&mut file)
        .with_context(|| format!("Invalid SPIR-V in {:?}", path))?;

    create_shader_module(device, &code)
        .with_context(|| format!("Shader {:?}", path))
}

pub fn create_shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    unsafe { device.create_shader_module(&create_info, None) }
        .context("Failed to create shader module")
}
