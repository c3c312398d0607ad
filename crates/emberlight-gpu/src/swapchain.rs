//! Swapchain management and the per-frame acquire/submit/present cycle.
//!
//! The swapchain owns one step per presentable image: the image's view, a
//! framebuffer built against the render pass, and a pre-recorded command
//! buffer that is replayed every frame. Uniform data changes out-of-band
//! through mapped buffers, so the recorded commands never need re-recording.
//!
//! One semaphore pair is shared across all steps. That is sound only because
//! [`Swapchain::present_next`] blocks on queue idle after every submission,
//! keeping at most one frame in flight.

use crate::command::{begin_command_buffer, end_command_buffer, submit_command_buffers};
use crate::device::Device;
use crate::error::{GpuError, Result};
use crate::handle::OwningHandle;
use crate::image::Image;
use crate::renderpass::RenderPass;
use crate::sync::FrameSemaphores;
use ash::vk;

/// Per-image resources of one swapchain step.
///
/// Field order is teardown order: the framebuffer references the view, the
/// view references the image owned by the swapchain itself.
pub struct SwapStep {
    command_buffer: OwningHandle<vk::CommandBuffer>,
    framebuffer: OwningHandle<vk::Framebuffer>,
    view: OwningHandle<vk::ImageView>,
    image: vk::Image,
}

impl SwapStep {
    /// The step's pre-recorded command buffer.
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer.raw()
    }

    /// The step's framebuffer.
    pub fn framebuffer(&self) -> vk::Framebuffer {
        self.framebuffer.raw()
    }

    /// The presentable image; owned by the swapchain, not the step.
    pub fn image(&self) -> vk::Image {
        self.image
    }
}

/// The present-surface image chain and its frame cycle.
///
/// Teardown follows field order: steps, the shared depth target, the
/// semaphores, then the swapchain handle itself.
pub struct Swapchain {
    steps: Vec<SwapStep>,
    depth: Option<Image>,
    semaphores: FrameSemaphores,
    swapchain: OwningHandle<vk::SwapchainKHR>,
    loader: ash::khr::swapchain::Device,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain with per-image framebuffers for `render_pass`.
    ///
    /// Image count, present mode and extent are negotiated against the
    /// surface; a shared depth target is created iff the render pass
    /// declares a depth attachment. Pass the previous swapchain when
    /// rebuilding so the driver can retire it; the retired object still
    /// destroys its own handle on drop.
    pub fn new(
        device: &Device,
        render_pass: &RenderPass,
        width: u32,
        height: u32,
        vsync: bool,
        old_swapchain: Option<&Swapchain>,
    ) -> Result<Self> {
        let ash_device = device.device();
        let loader = ash::khr::swapchain::Device::new(device.instance(), ash_device);

        let surface_caps = unsafe { device.surface().capabilities(device.physical_device()) }?;
        let image_count = negotiate_image_count(&surface_caps.capabilities);
        let present_mode = select_present_mode(&surface_caps.present_modes, vsync);
        let extent = calculate_extent(&surface_caps.capabilities, width, height);

        tracing::debug!(
            image_count,
            ?present_mode,
            width = extent.width,
            height = extent.height,
            "Creating swapchain"
        );

        let queue_families = [device.queue_family()];
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(device.surface().handle())
            .min_image_count(image_count)
            .image_format(device.color_format())
            .image_color_space(device.color_space())
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .queue_family_indices(&queue_families)
            .pre_transform(surface_caps.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(
                old_swapchain.map_or(vk::SwapchainKHR::null(), |old| old.swapchain.raw()),
            );

        let swapchain = unsafe {
            let raw = loader
                .create_swapchain(&create_info, None)
                .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;
            let deleter_loader = loader.clone();
            OwningHandle::new(raw, move |s| unsafe {
                deleter_loader.destroy_swapchain(s, None);
            })
        };

        let images = unsafe { loader.get_swapchain_images(swapchain.raw())? };

        let depth = if render_pass.depth_format().is_some() {
            Some(Image::depth_target(device, extent.width, extent.height)?)
        } else {
            None
        };

        let command_buffers = unsafe {
            device
                .command_pool()
                .allocate_command_buffers(ash_device, images.len() as u32)?
        };

        let mut steps = Vec::with_capacity(images.len());
        for (&image, &command_buffer) in images.iter().zip(&command_buffers) {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(device.color_format())
                .components(vk::ComponentMapping::default())
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .base_mip_level(0)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(1),
                );

            let view = unsafe {
                let raw = ash_device.create_image_view(&view_info, None)?;
                OwningHandle::device_scoped(raw, ash_device, |d, v| unsafe {
                    d.destroy_image_view(v, None);
                })
            };

            let mut attachments = vec![view.raw()];
            if let Some(depth) = &depth {
                attachments.push(depth.view());
            }

            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass.handle())
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            let framebuffer = unsafe {
                let raw = ash_device.create_framebuffer(&framebuffer_info, None)?;
                OwningHandle::device_scoped(raw, ash_device, |d, f| unsafe {
                    d.destroy_framebuffer(f, None);
                })
            };

            let command_buffer = unsafe {
                OwningHandle::pool_scoped(
                    command_buffer,
                    ash_device,
                    device.command_pool().handle(),
                    |d, pool, cb| unsafe { d.free_command_buffers(pool, &[cb]) },
                )
            };

            steps.push(SwapStep {
                command_buffer,
                framebuffer,
                view,
                image,
            });
        }

        let semaphores = unsafe { FrameSemaphores::new(ash_device) }?;

        Ok(Self {
            steps,
            depth,
            semaphores,
            swapchain,
            loader,
            format: device.color_format(),
            extent,
        })
    }

    /// Number of swapchain steps.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Access a step by image index.
    pub fn step(&self, index: usize) -> &SwapStep {
        &self.steps[index]
    }

    /// Framebuffer of the step at `index`.
    pub fn framebuffer(&self, index: usize) -> vk::Framebuffer {
        self.steps[index].framebuffer()
    }

    /// The swapchain's color format.
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// The swapchain's extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Record every step's command buffer, once, after construction.
    ///
    /// The callback runs once per step with that step's command buffer
    /// already in the recording state; recording is closed when it returns.
    /// Frames replay these buffers without re-recording.
    pub fn record_command_buffers<F>(&self, device: &Device, mut issue_commands: F) -> Result<()>
    where
        F: FnMut(vk::CommandBuffer, usize) -> Result<()>,
    {
        let ash_device = device.device();
        for (index, step) in self.steps.iter().enumerate() {
            let cmd = step.command_buffer();
            unsafe {
                begin_command_buffer(ash_device, cmd, vk::CommandBufferUsageFlags::empty())?;
            }
            issue_commands(cmd, index)?;
            unsafe {
                end_command_buffer(ash_device, cmd)?;
            }
        }
        Ok(())
    }

    /// Block until a presentable image is available and return its index.
    ///
    /// The returned flag reports a suboptimal surface; `ERROR_OUT_OF_DATE`
    /// surfaces as an error so the caller can rebuild the swapchain.
    pub fn acquire_next_step(&self) -> Result<(u32, bool)> {
        let result = unsafe {
            self.loader.acquire_next_image(
                self.swapchain.raw(),
                u64::MAX,
                self.semaphores.image_acquired(),
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => Ok((index, suboptimal)),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Submit the step's pre-recorded commands and present the image.
    ///
    /// The submission waits on image-acquired plus any caller-supplied
    /// semaphores and signals render-complete; the present waits on
    /// render-complete. The call then blocks on queue idle, which is what
    /// keeps the shared semaphore pair and the out-of-band uniform updates
    /// sound. A pipelined implementation would replace only this method.
    ///
    /// Returns whether the surface reported itself suboptimal.
    pub fn present_next(
        &self,
        device: &Device,
        step: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let ash_device = device.device();
        let queue = device.queue();

        let mut waits = vec![self.semaphores.image_acquired()];
        waits.extend_from_slice(wait_semaphores);
        let wait_stages = vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT; waits.len()];
        let signal = [self.semaphores.render_complete()];
        let command_buffers = [self.steps[step as usize].command_buffer()];

        unsafe {
            submit_command_buffers(
                ash_device,
                queue,
                &command_buffers,
                &waits,
                &wait_stages,
                &signal,
            )?;
        }

        let swapchains = [self.swapchain.raw()];
        let image_indices = [step];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&signal)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let suboptimal = match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(suboptimal) => suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => true,
            Err(e) => return Err(GpuError::from(e)),
        };

        // One frame in flight: the CPU waits out the GPU here every frame.
        unsafe {
            ash_device.queue_wait_idle(queue)?;
        }

        Ok(suboptimal)
    }
}

/// Negotiate the image count: one more than the surface minimum, clamped to
/// the maximum when the surface reports one (zero means unbounded).
pub fn negotiate_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut image_count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && image_count > capabilities.max_image_count {
        image_count = capabilities.max_image_count;
    }
    image_count
}

/// Select the best present mode.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        // FIFO is always supported
        vk::PresentModeKHR::FIFO
    } else {
        // Prefer mailbox (triple buffering without tearing)
        for &mode in available {
            if mode == vk::PresentModeKHR::MAILBOX {
                return mode;
            }
        }
        // Fall back to immediate
        for &mode in available {
            if mode == vk::PresentModeKHR::IMMEDIATE {
                return mode;
            }
        }
        // Fall back to FIFO (always supported)
        vk::PresentModeKHR::FIFO
    }
}

/// Calculate the swapchain extent.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired_width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired_height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_count_is_min_plus_one_clamped_to_max() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(negotiate_image_count(&caps), 3);

        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 8,
            ..Default::default()
        };
        assert_eq!(negotiate_image_count(&caps), 4);
    }

    #[test]
    fn zero_max_image_count_means_unbounded() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(negotiate_image_count(&caps), 3);
    }

    #[test]
    fn vsync_always_selects_fifo() {
        let available = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            select_present_mode(&available, true),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn without_vsync_mailbox_beats_immediate() {
        let available = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(
            select_present_mode(&available, false),
            vk::PresentModeKHR::MAILBOX
        );

        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            select_present_mode(&available, false),
            vk::PresentModeKHR::IMMEDIATE
        );

        let available = [vk::PresentModeKHR::FIFO];
        assert_eq!(
            select_present_mode(&available, false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn fixed_surface_extent_wins_over_request() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..Default::default()
        };
        let extent = calculate_extent(&caps, 1920, 1080);
        assert_eq!(extent.width, 800);
        assert_eq!(extent.height, 600);
    }

    #[test]
    fn flexible_surface_extent_clamps_the_request() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 640,
                height: 480,
            },
            max_image_extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
            ..Default::default()
        };
        let extent = calculate_extent(&caps, 1920, 1080);
        assert_eq!(extent.width, 1280);
        assert_eq!(extent.height, 720);

        let extent = calculate_extent(&caps, 100, 100);
        assert_eq!(extent.width, 640);
        assert_eq!(extent.height, 480);
    }
}
