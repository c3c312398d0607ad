//! Presentation surface management.
//!
//! Wraps Vulkan surface creation and capability queries, hiding the
//! raw-window-handle plumbing from the rest of the layer. The window itself
//! belongs to the application; the layer only consumes its handles.

use crate::error::{GpuError, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

/// The presentation surface and its extension loader.
///
/// Owned by [`crate::device::Device`] and destroyed during its teardown,
/// after the logical device and before the instance.
pub struct SurfaceContext {
    surface: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl SurfaceContext {
    /// Create a surface from a window's raw handles.
    ///
    /// # Safety
    /// The entry and instance must be valid and the window must outlive the
    /// returned surface.
    pub unsafe fn new<W>(entry: &ash::Entry, instance: &ash::Instance, window: &W) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("failed to get display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("failed to get window handle: {e}")))?;

        let surface = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display.as_raw(),
                window_handle.as_raw(),
                None,
            )
        }
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;

        let loader = ash::khr::surface::Instance::new(entry, instance);

        Ok(Self { surface, loader })
    }

    /// Get the raw surface handle.
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Whether the given queue family can present to this surface.
    ///
    /// # Safety
    /// The physical device must be valid.
    pub unsafe fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> Result<bool> {
        let supported = unsafe {
            self.loader.get_physical_device_surface_support(
                physical_device,
                queue_family,
                self.surface,
            )?
        };
        Ok(supported)
    }

    /// Query surface capabilities, formats, and present modes.
    ///
    /// # Safety
    /// The physical device must be valid.
    pub unsafe fn capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<SurfaceCapabilities> {
        unsafe {
            let capabilities = self
                .loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)?;

            let formats = self
                .loader
                .get_physical_device_surface_formats(physical_device, self.surface)?;

            let present_modes = self
                .loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)?;

            Ok(SurfaceCapabilities {
                capabilities,
                formats,
                present_modes,
            })
        }
    }

    /// Destroy the surface.
    ///
    /// # Safety
    /// The surface must not be in use; every swapchain created against it
    /// must already be destroyed.
    pub unsafe fn destroy(&self) {
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}

/// Surface capabilities query result.
pub struct SurfaceCapabilities {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Negotiate the color format and color space to render in.
///
/// A single UNDEFINED entry is the surface's way of accepting any format;
/// fall back to a fixed default in that case. Otherwise prefer BGRA UNORM,
/// then take whatever the surface lists first.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    if available.len() == 1 && available[0].format == vk::Format::UNDEFINED {
        return vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: available[0].color_space,
        };
    }

    for format in available {
        if format.format == vk::Format::B8G8R8A8_UNORM {
            return *format;
        }
    }

    available[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_sentinel_falls_back_to_default_format() {
        let available = [vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        let chosen = select_surface_format(&available);
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn preferred_format_wins_over_listing_order() {
        let available = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(
            select_surface_format(&available).format,
            vk::Format::B8G8R8A8_UNORM
        );
    }

    #[test]
    fn first_format_is_the_fallback() {
        let available = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::R16G16B16A16_SFLOAT,
                color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            },
        ];
        assert_eq!(
            select_surface_format(&available).format,
            vk::Format::R8G8B8A8_SRGB
        );
    }
}
