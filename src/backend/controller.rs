// Vulkan Controller - instance, GPU selection and logical device
//
// Responsibilities:
// - Instance creation with extension/layer checks and validation output
// - Physical device selection (prefer discrete GPU)
// - Queue family selection (graphics + compute + present in one family)
// - Logical device + queue creation
// - Capability queries (memory, surface formats, present modes, transforms)

use anyhow::{Context, Result};
use ash::{vk, Entry};
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance-level Vulkan state.
///
/// Lives behind an `Arc` so the logical device and the surface owner can keep
/// the instance alive until they have released their handles.
pub struct Controller {
    pub entry: Entry,
    pub instance: ash::Instance,
    pub surface_loader: ash::extensions::khr::Surface,
    pub physical_device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    queue_families: Vec<vk::QueueFamilyProperties>,
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl Controller {
    /// Create the instance and pick a physical device.
    ///
    /// `required_extensions` are the surface extensions the windowing system
    /// needs; creation fails if any of them is missing.
    pub fn new(
        app_name: &str,
        required_extensions: &[*const c_char],
        enable_validation: bool,
    ) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan instance: {}", app_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        let (instance, validation_enabled) =
            Self::create_instance(&entry, app_name, required_extensions, enable_validation)?;

        let debug_utils = if validation_enabled {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let physical_device = Self::pick_physical_device(&instance)?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

        log::info!(
            "Selected GPU: {} ({:?})",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy(),
            properties.device_type
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::debug!(
            "Storage buffer offset alignment: {}",
            properties.limits.min_storage_buffer_offset_alignment
        );

        let surface_loader = ash::extensions::khr::Surface::new(&entry, &instance);

        Ok(Arc::new(Self {
            entry,
            instance,
            surface_loader,
            physical_device,
            properties,
            memory_properties,
            queue_families,
            debug_utils,
        }))
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        required_extensions: &[*const c_char],
        enable_validation: bool,
    ) -> Result<(ash::Instance, bool)> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = CString::new("Wavefield")?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        let available = entry
            .enumerate_instance_extension_properties(None)
            .context("Failed to enumerate instance extensions")?;
        let available_names: Vec<&CStr> = available
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) })
            .collect();

        for &required in required_extensions {
            let name = unsafe { CStr::from_ptr(required) };
            if !available_names.contains(&name) {
                anyhow::bail!("Instance extension {:?} not supported", name);
            }
        }

        let mut extensions = required_extensions.to_vec();

        // Validation needs both the layer and the debug utils extension
        let debug_utils_name = ash::extensions::ext::DebugUtils::name();
        let layers = entry
            .enumerate_instance_layer_properties()
            .context("Failed to enumerate instance layers")?;
        let layer_available = layers
            .iter()
            .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER);

        let validation_enabled = enable_validation
            && layer_available
            && available_names.contains(&debug_utils_name);

        if enable_validation && !validation_enabled {
            log::warn!("Validation requested but {:?} is not available", VALIDATION_LAYER);
        }

        let layer_names = if validation_enabled {
            extensions.push(debug_utils_name.as_ptr());
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok((instance, validation_enabled))
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(instance: &ash::Instance) -> Result<vk::PhysicalDevice> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;

        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        log::info!("Device count: {}", devices.len());

        let mut best_device = None;
        let mut best_score = 0;

        for device in devices {
            let props = unsafe { instance.get_physical_device_properties(device) };
            let families =
                unsafe { instance.get_physical_device_queue_family_properties(device) };

            if !families.iter().any(supports_graphics_and_compute) {
                log::debug!("Skipping device without a graphics+compute queue family");
                continue;
            }

            if !Self::supports_swapchain(instance, device)? {
                log::debug!("Skipping device without {:?}", ash::extensions::khr::Swapchain::name());
                continue;
            }

            let score = device_type_score(props.device_type);
            if score > best_score {
                best_score = score;
                best_device = Some(device);
            }
        }

        best_device.ok_or_else(|| anyhow::anyhow!("No suitable GPU found"))
    }

    fn supports_swapchain(instance: &ash::Instance, device: vk::PhysicalDevice) -> Result<bool> {
        let extensions = unsafe { instance.enumerate_device_extension_properties(device) }
            .context("Failed to enumerate device extensions")?;
        let swapchain = ash::extensions::khr::Swapchain::name();

        Ok(extensions
            .iter()
            .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == swapchain))
    }

    /// Create the logical device for a surface.
    ///
    /// Picks the first queue family that can do graphics, compute and present,
    /// and asks it for a second queue for compute when it has one.
    pub fn setup_device(self: &Arc<Self>, surface: vk::SurfaceKHR) -> Result<Arc<VulkanDevice>> {
        for (i, family) in self.queue_families.iter().enumerate() {
            log::debug!(
                "Queue family {}: {} queues, flags {:?}",
                i,
                family.queue_count,
                family.queue_flags
            );
        }

        let mut present_error = None;
        let queue_family = select_queue_family(&self.queue_families, |index| {
            match unsafe {
                self.surface_loader.get_physical_device_surface_support(
                    self.physical_device,
                    index,
                    surface,
                )
            } {
                Ok(supported) => supported,
                Err(e) => {
                    present_error = Some(e);
                    false
                }
            }
        });

        let queue_family = match (queue_family, present_error) {
            (Some(family), _) => family,
            (None, Some(e)) => return Err(e).context("Failed to query surface support"),
            (None, None) => anyhow::bail!("Surface presentation not supported by any queue family"),
        };

        let layout = QueueLayout::for_family(&self.queue_families[queue_family as usize]);
        let queue_priorities = vec![1.0; layout.queue_count as usize];

        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family)
            .queue_priorities(&queue_priorities)
            .build();

        let extensions = [ash::extensions::khr::Swapchain::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe {
            self.instance
                .create_device(self.physical_device, &create_info, None)
        }
        .context("Failed to create logical device")?;

        let graphics_queue = unsafe { device.get_device_queue(queue_family, layout.graphics_index) };
        let compute_queue = unsafe { device.get_device_queue(queue_family, layout.compute_index) };

        log::info!(
            "Logical device created: family {}, {} queue(s)",
            queue_family,
            layout.queue_count
        );

        Ok(Arc::new(VulkanDevice {
            device,
            queue_family,
            graphics_queue,
            compute_queue,
            controller: Arc::clone(self),
        }))
    }

    /// Query surface capabilities and require an identity transform
    pub fn configure(&self, surface: vk::SurfaceKHR) -> Result<vk::SurfaceCapabilitiesKHR> {
        let capabilities = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, surface)
        }
        .context("Failed to query surface capabilities")?;

        log::debug!("Surface capabilities: {:?}", capabilities);

        if !capabilities
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            anyhow::bail!("Identity surface transform not supported");
        }

        Ok(capabilities)
    }

    pub fn surface_formats(&self, surface: vk::SurfaceKHR) -> Result<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.physical_device, surface)
        }
        .context("Failed to query surface formats")
    }

    pub fn present_modes(&self, surface: vk::SurfaceKHR) -> Result<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.physical_device, surface)
        }
        .context("Failed to query present modes")
    }

    /// Fail unless `format` supports `features` with optimal tiling
    pub fn check_format_features(
        &self,
        format: vk::Format,
        features: vk::FormatFeatureFlags,
    ) -> Result<()> {
        let props = unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        };

        if !props.optimal_tiling_features.contains(features) {
            anyhow::bail!("Format {:?} lacks optimal tiling features {:?}", format, features);
        }
        Ok(())
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan instance...");

        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Logical device and its queues
pub struct VulkanDevice {
    pub device: ash::Device,
    pub queue_family: u32,
    /// Used for transfers, drawing and presentation
    pub graphics_queue: vk::Queue,
    /// Same family as `graphics_queue`; may be the same queue
    pub compute_queue: vk::Queue,
    pub controller: Arc<Controller>,
}

impl VulkanDevice {
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.controller.memory_properties
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("vkDeviceWaitIdle failed")?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();
        unsafe {
            self.device.destroy_device(None);
        }
    }
}

/// Which queues to request from the chosen family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLayout {
    pub queue_count: u32,
    pub graphics_index: u32,
    pub compute_index: u32,
}

impl QueueLayout {
    pub fn for_family(family: &vk::QueueFamilyProperties) -> Self {
        if family.queue_count >= 2 {
            Self {
                queue_count: 2,
                graphics_index: 0,
                compute_index: 1,
            }
        } else {
            Self {
                queue_count: 1,
                graphics_index: 0,
                compute_index: 0,
            }
        }
    }
}

fn supports_graphics_and_compute(family: &vk::QueueFamilyProperties) -> bool {
    family.queue_count > 0
        && family
            .queue_flags
            .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
}

/// First family with graphics + compute that can also present
pub fn select_queue_family(
    families: &[vk::QueueFamilyProperties],
    mut can_present: impl FnMut(u32) -> bool,
) -> Option<u32> {
    families
        .iter()
        .enumerate()
        .filter(|(_, family)| supports_graphics_and_compute(family))
        .map(|(i, _)| i as u32)
        .find(|&i| can_present(i))
}

/// Higher is better; 0 is never picked
pub fn device_type_score(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 10,
        _ => 1,
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, queue_count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count,
            ..Default::default()
        }
    }

    #[test]
    fn discrete_gpu_scores_highest() {
        let discrete = device_type_score(vk::PhysicalDeviceType::DISCRETE_GPU);
        let integrated = device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU);
        let cpu = device_type_score(vk::PhysicalDeviceType::CPU);
        assert!(discrete > integrated);
        assert!(integrated > cpu);
        assert!(cpu > 0);
    }

    #[test]
    fn queue_family_needs_graphics_compute_and_present() {
        let families = [
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 4),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 0),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 16),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 1),
        ];

        assert_eq!(select_queue_family(&families, |_| true), Some(2));
        assert_eq!(select_queue_family(&families, |i| i == 3), Some(3));
        assert_eq!(select_queue_family(&families, |i| i == 0), None);
    }

    #[test]
    fn compute_gets_its_own_queue_when_available() {
        let wide = family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 16);
        assert_eq!(
            QueueLayout::for_family(&wide),
            QueueLayout {
                queue_count: 2,
                graphics_index: 0,
                compute_index: 1
            }
        );

        let single = family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 1);
        let layout = QueueLayout::for_family(&single);
        assert_eq!(layout.queue_count, 1);
        assert_eq!(layout.compute_index, layout.graphics_index);
    }
}
