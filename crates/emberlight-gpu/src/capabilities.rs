//! GPU capability detection.

use crate::error::{GpuError, Result};
use ash::vk;
use std::ffi::CStr;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Cached capability snapshot of the selected physical device.
///
/// Queried once at device bootstrap; resource creation consults this table
/// instead of re-querying the driver.
#[derive(Debug, Clone)]
pub struct DeviceCapabilities {
    /// GPU vendor
    pub vendor: GpuVendor,
    /// Device name
    pub device_name: String,
    /// Vulkan API version
    pub api_version: u32,
    /// Driver version
    pub driver_version: u32,
    /// Supported feature flags
    pub features: vk::PhysicalDeviceFeatures,
    /// Device limits
    pub limits: vk::PhysicalDeviceLimits,
    /// Memory heap and type table
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl DeviceCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let features = unsafe { instance.get_physical_device_features(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        let vendor = GpuVendor::from_vendor_id(properties.vendor_id);
        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        Self {
            vendor,
            device_name,
            api_version: properties.api_version,
            driver_version: properties.driver_version,
            features,
            limits: properties.limits,
            memory_properties,
        }
    }

    /// Find a memory type satisfying `type_bits` and the requested properties.
    ///
    /// `type_bits` comes from `vkGetBufferMemoryRequirements` /
    /// `vkGetImageMemoryRequirements`; bit `i` allows memory type `i`.
    pub fn find_memory_type(
        &self,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        let count = self.memory_properties.memory_type_count as usize;
        for (i, memory_type) in self.memory_properties.memory_types[..count]
            .iter()
            .enumerate()
        {
            if type_bits & (1 << i) != 0 && memory_type.property_flags.contains(required) {
                return Ok(i as u32);
            }
        }
        Err(GpuError::AllocationFailed(format!(
            "no memory type matches bits {type_bits:#x} with {required:?}"
        )))
    }

    /// Whether sampler anisotropy can be enabled on this device.
    pub fn supports_anisotropy(&self) -> bool {
        self.features.sampler_anisotropy == vk::TRUE
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}) - Vulkan {}.{}.{}",
            self.device_name,
            self.vendor,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
        )
    }
}

/// Select a depth format with optimal-tiling depth-stencil attachment support.
///
/// Highest-precision candidates first; failing all of them is fatal for the
/// demos, which always render with a depth buffer available.
///
/// # Safety
/// The instance and physical device must be valid.
pub unsafe fn select_depth_format(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<vk::Format> {
    let candidates = [
        vk::Format::D32_SFLOAT,
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D24_UNORM_S8_UINT,
    ];

    for format in candidates {
        let props =
            unsafe { instance.get_physical_device_format_properties(physical_device, format) };
        if props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        {
            return Ok(format);
        }
    }

    Err(GpuError::UnsupportedFormat(
        "no depth format with optimal-tiling attachment support".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
    }

    fn fake_memory_table() -> DeviceCapabilities {
        let mut memory_properties = vk::PhysicalDeviceMemoryProperties::default();
        memory_properties.memory_type_count = 3;
        memory_properties.memory_types[0] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            heap_index: 0,
        };
        memory_properties.memory_types[1] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
            heap_index: 1,
        };
        memory_properties.memory_types[2] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE,
            heap_index: 1,
        };

        DeviceCapabilities {
            vendor: GpuVendor::Other(0),
            device_name: String::new(),
            api_version: vk::API_VERSION_1_3,
            driver_version: 0,
            features: vk::PhysicalDeviceFeatures::default(),
            limits: vk::PhysicalDeviceLimits::default(),
            memory_properties,
        }
    }

    #[test]
    fn memory_type_respects_type_bits_and_flags() {
        let caps = fake_memory_table();

        let host_visible = caps
            .find_memory_type(
                0b111,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )
            .unwrap();
        assert_eq!(host_visible, 1);

        // Type bits exclude index 1, so only the non-coherent type matches.
        let masked = caps
            .find_memory_type(0b100, vk::MemoryPropertyFlags::HOST_VISIBLE)
            .unwrap();
        assert_eq!(masked, 2);

        assert!(caps
            .find_memory_type(0b001, vk::MemoryPropertyFlags::HOST_VISIBLE)
            .is_err());
    }
}
