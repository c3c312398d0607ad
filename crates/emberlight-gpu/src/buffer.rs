//! Device-memory-backed buffers.
//!
//! Two flavors exist: host-visible staging buffers (mappable, used for
//! per-frame uniform updates and upload sources) and device-local buffers
//! (populated once through an ephemeral staging copy, used for static vertex
//! and index data). Each buffer owns exactly one device-memory allocation.

use crate::device::Device;
use crate::error::{GpuError, Result};
use crate::handle::OwningHandle;
use ash::vk;

/// A buffer and its dedicated memory allocation.
pub struct Buffer {
    buffer: OwningHandle<vk::Buffer>,
    memory: OwningHandle<vk::DeviceMemory>,
    size: vk::DeviceSize,
    host_visible: bool,
}

impl Buffer {
    /// Create a host-visible, host-coherent buffer, optionally populated.
    ///
    /// When `data` is given its length must equal `size`.
    pub fn staging(
        device: &Device,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        data: Option<&[u8]>,
    ) -> Result<Self> {
        let buffer = Self::create(
            device,
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            true,
        )?;

        if let Some(data) = data {
            buffer.update(device, data)?;
        }

        Ok(buffer)
    }

    /// Create a device-local buffer populated from `data`.
    ///
    /// An ephemeral staging buffer is filled with the data and a one-shot
    /// transfer is submitted; the call blocks until the queue is idle so the
    /// staging buffer is free to drop on return. The resulting buffer is
    /// never mappable.
    pub fn device_local(
        device: &Device,
        usage: vk::BufferUsageFlags,
        data: &[u8],
    ) -> Result<Self> {
        let size = data.len() as vk::DeviceSize;
        let dst = Self::create(
            device,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            false,
        )?;

        let staging = Self::staging(
            device,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            Some(data),
        )?;

        let ash_device = device.device();
        device.execute_one_time(|cmd| {
            let region = vk::BufferCopy::default().size(size);
            unsafe {
                ash_device.cmd_copy_buffer(cmd, staging.handle(), dst.handle(), &[region]);
            }
        })?;
        // The queue is idle here; dropping the staging buffer is safe.
        drop(staging);

        Ok(dst)
    }

    /// Overwrite the buffer's full contents.
    ///
    /// Maps the whole range, copies `data`, unmaps. The data length must
    /// equal the buffer size; there is no partial-range update.
    pub fn update(&self, device: &Device, data: &[u8]) -> Result<()> {
        if !self.host_visible {
            return Err(GpuError::InvalidState(
                "device-local buffer is not mappable".to_string(),
            ));
        }
        if data.len() as vk::DeviceSize != self.size {
            return Err(GpuError::InvalidState(format!(
                "update length {} does not match buffer size {}",
                data.len(),
                self.size
            )));
        }

        let ash_device = device.device();
        unsafe {
            let ptr = ash_device.map_memory(
                self.memory.raw(),
                0,
                vk::WHOLE_SIZE,
                vk::MemoryMapFlags::empty(),
            )?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
            ash_device.unmap_memory(self.memory.raw());
        }

        Ok(())
    }

    /// Get the raw buffer handle.
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.raw()
    }

    /// Get the buffer size in bytes.
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    fn create(
        device: &Device,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
        host_visible: bool,
    ) -> Result<Self> {
        if size == 0 {
            return Err(GpuError::InvalidState(
                "buffer size must be non-zero".to_string(),
            ));
        }

        let ash_device = device.device();

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            let raw = ash_device.create_buffer(&buffer_info, None)?;
            OwningHandle::device_scoped(raw, ash_device, |d, b| unsafe {
                d.destroy_buffer(b, None);
            })
        };

        let requirements = unsafe { ash_device.get_buffer_memory_requirements(buffer.raw()) };
        let memory = allocate_memory(device, &requirements, memory_flags)?;

        unsafe {
            ash_device.bind_buffer_memory(buffer.raw(), memory.raw(), 0)?;
        }

        Ok(Self {
            buffer,
            memory,
            size,
            host_visible,
        })
    }
}

/// Allocate one dedicated device-memory block for a resource.
///
/// Every resource owns its own allocation; there is no sub-allocating pool.
pub(crate) fn allocate_memory(
    device: &Device,
    requirements: &vk::MemoryRequirements,
    flags: vk::MemoryPropertyFlags,
) -> Result<OwningHandle<vk::DeviceMemory>> {
    let memory_type_index = device
        .capabilities()
        .find_memory_type(requirements.memory_type_bits, flags)?;

    let alloc_info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    let ash_device = device.device();
    let memory = unsafe {
        let raw = ash_device
            .allocate_memory(&alloc_info, None)
            .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;
        OwningHandle::device_scoped(raw, ash_device, |d, m| unsafe {
            d.free_memory(m, None);
        })
    };

    Ok(memory)
}
