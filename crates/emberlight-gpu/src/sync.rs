//! Synchronization primitives.

use crate::error::Result;
use crate::handle::OwningHandle;
use ash::vk;

/// Create a semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    let semaphore = unsafe { device.create_semaphore(&create_info, None)? };
    Ok(semaphore)
}

/// The two semaphores ordering a swapchain's frame cycle.
///
/// One pair is shared across all swapchain steps: the frame loop blocks on
/// queue idle after every submission, so at most one frame's worth of GPU
/// work is ever in flight and the semaphores are never re-waited while
/// pending.
pub struct FrameSemaphores {
    /// Signaled by acquire when a presentable image is available.
    image_acquired: OwningHandle<vk::Semaphore>,
    /// Signaled by the frame submission, waited on by present.
    render_complete: OwningHandle<vk::Semaphore>,
}

impl FrameSemaphores {
    /// Create the semaphore pair.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        unsafe {
            let image_acquired =
                OwningHandle::device_scoped(create_semaphore(device)?, device, |d, s| unsafe {
                    d.destroy_semaphore(s, None);
                });
            let render_complete =
                OwningHandle::device_scoped(create_semaphore(device)?, device, |d, s| unsafe {
                    d.destroy_semaphore(s, None);
                });

            Ok(Self {
                image_acquired,
                render_complete,
            })
        }
    }

    /// Semaphore signaled when a swapchain image has been acquired.
    pub fn image_acquired(&self) -> vk::Semaphore {
        self.image_acquired.raw()
    }

    /// Semaphore signaled when the frame's rendering is complete.
    pub fn render_complete(&self) -> vk::Semaphore {
        self.render_complete.raw()
    }
}
