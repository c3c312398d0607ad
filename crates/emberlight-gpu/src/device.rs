//! Device bootstrap and ownership root.
//!
//! [`Device`] owns the instance, presentation surface, logical device, the
//! single graphics/present queue, the command pool and the cached capability
//! snapshot. Everything else in the layer borrows from it and must not
//! outlive it. Teardown runs in reverse acquisition order.

use crate::capabilities::{select_depth_format, DeviceCapabilities};
use crate::command::{execute_single_time_commands, CommandPool};
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, select_physical_device, DebugMessenger};
use crate::surface::{select_surface_format, SurfaceContext};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

/// The GPU context every other component is built from.
pub struct Device {
    // Entry must be kept alive for the lifetime of the device
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    debug: Option<DebugMessenger>,
    surface: SurfaceContext,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    capabilities: DeviceCapabilities,
    queue_family: u32,
    queue: vk::Queue,
    command_pool: CommandPool,
    color_format: vk::Format,
    color_space: vk::ColorSpaceKHR,
    depth_format: vk::Format,
}

impl Device {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get the presentation surface.
    pub fn surface(&self) -> &SurfaceContext {
        &self.surface
    }

    /// Get the capability snapshot.
    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    /// Get the graphics/present queue.
    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    /// Get the graphics/present queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Get the command pool.
    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }

    /// Negotiated surface color format.
    pub fn color_format(&self) -> vk::Format {
        self.color_format
    }

    /// Negotiated surface color space.
    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.color_space
    }

    /// Selected depth-stencil format.
    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    /// Wait for the device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }

    /// Record, submit and complete a one-shot command buffer on the
    /// graphics queue, blocking until the queue is idle.
    pub fn execute_one_time<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        unsafe { execute_single_time_commands(&self.device, &self.command_pool, self.queue, f) }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Reverse acquisition order: pool, device, messenger, surface,
            // instance.
            self.command_pool.destroy(&self.device);
            self.device.destroy_device(None);
            if let Some(debug) = &self.debug {
                debug.destroy();
            }
            self.surface.destroy();
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for creating a [`Device`].
pub struct DeviceBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for DeviceBuilder {
    fn default() -> Self {
        Self {
            app_name: "Emberlight".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl DeviceBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Build the device against a window's surface.
    ///
    /// Bootstrap order: instance, debug messenger, surface, physical device,
    /// capability snapshot, surface-format negotiation, queue-family
    /// selection, depth format, logical device + queue + command pool. Any
    /// native failure aborts construction; there is no partial device.
    pub fn build<W>(self, window: &W) -> Result<Device>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        // Load Vulkan entry point
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;

        let instance =
            unsafe { create_instance(&entry, &self.app_name, self.enable_validation) }?;

        let debug = if self.enable_validation {
            Some(unsafe { DebugMessenger::new(&entry, &instance) }?)
        } else {
            None
        };

        let surface = unsafe { SurfaceContext::new(&entry, &instance, window) }?;

        let physical_device = unsafe { select_physical_device(&instance) }?;
        let capabilities = unsafe { DeviceCapabilities::query(&instance, physical_device) };
        tracing::info!("Selected GPU: {}", capabilities.summary());

        let surface_caps = unsafe { surface.capabilities(physical_device) }?;
        let surface_format = select_surface_format(&surface_caps.formats);

        let queue_family =
            unsafe { select_queue_family(&instance, physical_device, &surface) }?;

        let depth_format = unsafe { select_depth_format(&instance, physical_device) }?;

        let (device, queue) =
            unsafe { create_device(&instance, physical_device, &capabilities, queue_family) }?;

        let command_pool = unsafe { CommandPool::new(&device, queue_family) }?;

        Ok(Device {
            entry,
            instance,
            debug,
            surface,
            physical_device,
            device,
            capabilities,
            queue_family,
            queue,
            command_pool,
            color_format: surface_format.format,
            color_space: surface_format.color_space,
            depth_format,
        })
    }
}

/// Find the first queue family supporting both graphics and present.
///
/// # Safety
/// The instance, physical device and surface must be valid.
unsafe fn select_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface: &SurfaceContext,
) -> Result<u32> {
    let families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if !family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            continue;
        }
        if unsafe { surface.supports_present(physical_device, i) }? {
            return Ok(i);
        }
    }

    Err(GpuError::NoSuitableQueueFamily)
}

/// Create the logical device and retrieve the single queue.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    capabilities: &DeviceCapabilities,
    queue_family: u32,
) -> Result<(ash::Device, vk::Queue)> {
    let queue_priority = 1.0_f32;
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(std::slice::from_ref(&queue_priority))];

    let extensions = [ash::khr::swapchain::NAME];
    let extension_names: Vec<*const i8> = extensions.iter().map(|ext| ext.as_ptr()).collect();

    // Enable only the features the layer's samplers rely on.
    let features = vk::PhysicalDeviceFeatures::default()
        .sampler_anisotropy(capabilities.supports_anisotropy());

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .enabled_features(&features);

    let device = unsafe { instance.create_device(physical_device, &device_create_info, None) }
        .map_err(GpuError::from)?;

    let queue = unsafe { device.get_device_queue(queue_family, 0) };

    Ok((device, queue))
}
