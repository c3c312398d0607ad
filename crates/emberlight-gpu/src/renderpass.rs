//! Render pass construction and scoped recording.
//!
//! A [`RenderPassConfig`] accumulates attachment descriptions declaratively
//! and compiles them into an immutable [`RenderPass`] with one subpass and a
//! fixed pair of external dependencies, so the pass composes with whatever
//! precedes and follows it without caller-specified barriers.

use crate::device::Device;
use crate::error::Result;
use crate::handle::OwningHandle;
use ash::vk;

/// Declarative builder for render-pass attachments.
///
/// Color attachments take the index at which they were added; the optional
/// depth attachment is always appended after every color attachment no
/// matter when it was declared. Clear values follow the same order.
#[derive(Default)]
pub struct RenderPassConfig {
    color_attachments: Vec<vk::AttachmentDescription>,
    color_clears: Vec<[f32; 4]>,
    depth_format: Option<vk::Format>,
}

impl RenderPassConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a color attachment cleared on load and stored on completion.
    pub fn with_color_attachment(
        mut self,
        format: vk::Format,
        final_layout: vk::ImageLayout,
    ) -> Self {
        self.color_attachments.push(
            vk::AttachmentDescription::default()
                .format(format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(final_layout),
        );
        self.color_clears.push([0.0, 0.0, 0.0, 1.0]);
        self
    }

    /// Set the clear color of the most recently added color attachment.
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        if let Some(clear) = self.color_clears.last_mut() {
            *clear = color;
        }
        self
    }

    /// Declare the depth attachment. A render pass has at most one; a later
    /// call replaces the earlier format.
    pub fn with_depth_attachment(mut self, format: vk::Format) -> Self {
        self.depth_format = Some(format);
        self
    }

    /// Number of attachments the built pass will have.
    pub fn attachment_count(&self) -> usize {
        self.color_attachments.len() + usize::from(self.depth_format.is_some())
    }

    /// Clear values in attachment order: colors in call order, depth last.
    pub fn clear_values(&self) -> Vec<vk::ClearValue> {
        let mut clears: Vec<vk::ClearValue> = self
            .color_clears
            .iter()
            .map(|&float32| vk::ClearValue {
                color: vk::ClearColorValue { float32 },
            })
            .collect();
        if self.depth_format.is_some() {
            clears.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            });
        }
        clears
    }

    /// Attachment descriptions in final order: colors first, depth last.
    fn attachments(&self) -> Vec<vk::AttachmentDescription> {
        let mut attachments = self.color_attachments.clone();
        if let Some(format) = self.depth_format {
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            );
        }
        attachments
    }

    /// Compile the accumulated state into an immutable render pass.
    pub fn build(self, device: &Device) -> Result<RenderPass> {
        let ash_device = device.device();

        let attachments = self.attachments();
        let color_count = self.color_attachments.len();

        let color_refs: Vec<vk::AttachmentReference> = (0..color_count)
            .map(|i| {
                vk::AttachmentReference::default()
                    .attachment(i as u32)
                    .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            })
            .collect();

        let depth_ref = vk::AttachmentReference::default()
            .attachment(color_count as u32)
            .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if self.depth_format.is_some() {
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }
        let subpasses = [subpass];

        // External barrier pair: whatever came before the pass is made
        // visible to attachment writes, and attachment writes are made
        // visible to whatever follows.
        let dependencies = [
            vk::SubpassDependency::default()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(vk::PipelineStageFlags::BOTTOM_OF_PIPE)
                .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .src_access_mask(vk::AccessFlags::MEMORY_READ)
                .dst_access_mask(
                    vk::AccessFlags::COLOR_ATTACHMENT_READ
                        | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                )
                .dependency_flags(vk::DependencyFlags::BY_REGION),
            vk::SubpassDependency::default()
                .src_subpass(0)
                .dst_subpass(vk::SUBPASS_EXTERNAL)
                .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .dst_stage_mask(vk::PipelineStageFlags::BOTTOM_OF_PIPE)
                .src_access_mask(
                    vk::AccessFlags::COLOR_ATTACHMENT_READ
                        | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                )
                .dst_access_mask(vk::AccessFlags::MEMORY_READ)
                .dependency_flags(vk::DependencyFlags::BY_REGION),
        ];

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let handle = unsafe {
            let raw = ash_device.create_render_pass(&create_info, None)?;
            OwningHandle::device_scoped(raw, ash_device, |d, rp| unsafe {
                d.destroy_render_pass(rp, None);
            })
        };

        Ok(RenderPass {
            handle,
            clear_values: self.clear_values(),
            color_count,
            depth_format: self.depth_format,
        })
    }
}

/// An immutable render pass and its per-attachment clear values.
pub struct RenderPass {
    handle: OwningHandle<vk::RenderPass>,
    clear_values: Vec<vk::ClearValue>,
    color_count: usize,
    depth_format: Option<vk::Format>,
}

impl RenderPass {
    /// Get the raw render-pass handle.
    pub fn handle(&self) -> vk::RenderPass {
        self.handle.raw()
    }

    /// Clear values in attachment order.
    pub fn clear_values(&self) -> &[vk::ClearValue] {
        &self.clear_values
    }

    /// Number of color attachments.
    pub fn color_count(&self) -> usize {
        self.color_count
    }

    /// Depth attachment format, if the pass declares one.
    pub fn depth_format(&self) -> Option<vk::Format> {
        self.depth_format
    }

    /// Open a render-pass recording region on a command buffer.
    ///
    /// Every `begin` must be matched by exactly one [`RenderPass::end`] on
    /// the same command buffer before it is submitted.
    ///
    /// # Safety
    /// The command buffer must be in the recording state and the framebuffer
    /// must have been created against this render pass.
    pub unsafe fn begin(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
    ) {
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.handle.raw())
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&self.clear_values);

        unsafe {
            device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
        }
    }

    /// Close the recording region opened by [`RenderPass::begin`].
    ///
    /// # Safety
    /// Must pair with a prior `begin` on the same command buffer.
    pub unsafe fn end(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        unsafe {
            device.cmd_end_render_pass(cmd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_values_follow_attachment_order() {
        let config = RenderPassConfig::new()
            .with_depth_attachment(vk::Format::D32_SFLOAT)
            .with_color_attachment(vk::Format::B8G8R8A8_UNORM, vk::ImageLayout::PRESENT_SRC_KHR)
            .with_clear_color([0.1, 0.2, 0.3, 1.0])
            .with_color_attachment(
                vk::Format::R16G16B16A16_SFLOAT,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );

        assert_eq!(config.attachment_count(), 3);

        let clears = config.clear_values();
        assert_eq!(clears.len(), 3);
        // Colors first in call order, synthesized depth clear last.
        unsafe {
            assert_eq!(clears[0].color.float32, [0.1, 0.2, 0.3, 1.0]);
            assert_eq!(clears[1].color.float32, [0.0, 0.0, 0.0, 1.0]);
            assert_eq!(clears[2].depth_stencil.depth, 1.0);
            assert_eq!(clears[2].depth_stencil.stencil, 0);
        }

        // Depth is appended last even though it was declared first.
        let attachments = config.attachments();
        assert_eq!(attachments[0].format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(attachments[1].format, vk::Format::R16G16B16A16_SFLOAT);
        assert_eq!(attachments[2].format, vk::Format::D32_SFLOAT);
        assert_eq!(
            attachments[2].final_layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn color_only_pass_has_no_depth_clear() {
        let config = RenderPassConfig::new()
            .with_color_attachment(vk::Format::B8G8R8A8_UNORM, vk::ImageLayout::PRESENT_SRC_KHR);

        assert_eq!(config.attachment_count(), 1);
        assert_eq!(config.clear_values().len(), 1);
    }

    #[test]
    fn empty_config_builds_empty_clear_list() {
        let config = RenderPassConfig::new();
        assert_eq!(config.attachment_count(), 0);
        assert!(config.clear_values().is_empty());
    }
}
