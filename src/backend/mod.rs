// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash: instance/device ownership, resource helpers,
// pipelines, presentation and frame synchronization.

pub mod commands;
pub mod controller;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use commands::{Commands, GpuBuffer, GpuImage};
pub use controller::{Controller, VulkanDevice};
pub use swapchain::Swapchain;
pub use sync::FrameSync;
