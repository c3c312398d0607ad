//! Graphics pipeline construction.
//!
//! [`PipelineConfig`] accumulates vertex layout, fixed-function and
//! descriptor-layout state in caller-chosen order and compiles it into a
//! single immutable [`Pipeline`]. Viewport and scissor are always dynamic so
//! one pipeline serves any framebuffer size.

use crate::device::Device;
use crate::error::{GpuError, Result};
use crate::handle::OwningHandle;
use crate::renderpass::RenderPass;
use ash::vk;
use std::collections::HashSet;

/// Builder for a graphics pipeline.
///
/// Vertex attributes and bindings are index-addressed sparse tables: setting
/// location or binding `n` grows the table to `n + 1` entries and leaves any
/// skipped slot zero-valued.
pub struct PipelineConfig<'a> {
    vertex_shader: &'a [u32],
    fragment_shader: &'a [u32],
    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    declared_bindings: HashSet<u32>,
    declared_attributes: HashSet<u32>,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    topology: vk::PrimitiveTopology,
    cull_mode: vk::CullModeFlags,
    front_face: vk::FrontFace,
    depth_test: bool,
    depth_write: bool,
    alpha_blend: bool,
}

impl<'a> PipelineConfig<'a> {
    /// Start a config from compiled vertex and fragment shader words.
    pub fn new(vertex_shader: &'a [u32], fragment_shader: &'a [u32]) -> Self {
        Self {
            vertex_shader,
            fragment_shader,
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            declared_bindings: HashSet::new(),
            declared_attributes: HashSet::new(),
            set_layouts: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: true,
            depth_write: true,
            alpha_blend: false,
        }
    }

    /// Declare a vertex buffer binding slot with per-vertex input rate.
    pub fn with_vertex_binding(mut self, binding: u32, stride: u32) -> Self {
        let slot = binding as usize;
        if self.vertex_bindings.len() <= slot {
            self.vertex_bindings
                .resize(slot + 1, vk::VertexInputBindingDescription::default());
        }
        self.vertex_bindings[slot] = vk::VertexInputBindingDescription {
            binding,
            stride,
            input_rate: vk::VertexInputRate::VERTEX,
        };
        self.declared_bindings.insert(binding);
        self
    }

    /// Declare a vertex attribute at a shader input location.
    pub fn with_vertex_attribute(
        mut self,
        location: u32,
        binding: u32,
        format: vk::Format,
        offset: u32,
    ) -> Self {
        let slot = location as usize;
        if self.vertex_attributes.len() <= slot {
            self.vertex_attributes
                .resize(slot + 1, vk::VertexInputAttributeDescription::default());
        }
        self.vertex_attributes[slot] = vk::VertexInputAttributeDescription {
            location,
            binding,
            format,
            offset,
        };
        self.declared_attributes.insert(location);
        self
    }

    /// Append a descriptor set layout; layouts bind at draw time in the
    /// exact order they were added.
    pub fn with_descriptor_set_layout(mut self, layout: vk::DescriptorSetLayout) -> Self {
        self.set_layouts.push(layout);
        self
    }

    /// Set the primitive topology (default: triangle list).
    pub fn with_topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Set the cull mode (default: back faces).
    pub fn with_cull_mode(mut self, cull_mode: vk::CullModeFlags) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    /// Set the front-face winding (default: counter-clockwise).
    pub fn with_front_face(mut self, front_face: vk::FrontFace) -> Self {
        self.front_face = front_face;
        self
    }

    /// Enable or disable depth testing and depth writes.
    pub fn with_depth(mut self, test: bool, write: bool) -> Self {
        self.depth_test = test;
        self.depth_write = write;
        self
    }

    /// Enable standard alpha blending on every color attachment.
    pub fn with_alpha_blend(mut self, enable: bool) -> Self {
        self.alpha_blend = enable;
        self
    }

    /// Check that every declared attribute references a declared binding.
    ///
    /// Gap-fill entries are skipped; they exist only to keep the tables
    /// index-addressed.
    fn validate(&self) -> Result<()> {
        for &location in &self.declared_attributes {
            let attribute = &self.vertex_attributes[location as usize];
            if !self.declared_bindings.contains(&attribute.binding) {
                return Err(GpuError::PipelineCreation(format!(
                    "vertex attribute at location {} references undeclared binding {}",
                    location, attribute.binding
                )));
            }
        }
        Ok(())
    }

    /// Compile the accumulated state into a pipeline.
    ///
    /// The render pass is borrowed for creation only; the pipeline holds no
    /// reference to it afterwards but must not outlive the device.
    pub fn build(self, device: &Device, render_pass: &RenderPass) -> Result<Pipeline> {
        self.validate()?;

        let ash_device = device.device();

        // Shader modules exist only for the duration of this call.
        let vert_info = vk::ShaderModuleCreateInfo::default().code(self.vertex_shader);
        let vert_module = unsafe {
            let raw = ash_device
                .create_shader_module(&vert_info, None)
                .map_err(|e| GpuError::PipelineCreation(format!("vertex module: {e}")))?;
            OwningHandle::device_scoped(raw, ash_device, |d, m| unsafe {
                d.destroy_shader_module(m, None);
            })
        };

        let frag_info = vk::ShaderModuleCreateInfo::default().code(self.fragment_shader);
        let frag_module = unsafe {
            let raw = ash_device
                .create_shader_module(&frag_info, None)
                .map_err(|e| GpuError::PipelineCreation(format!("fragment module: {e}")))?;
            OwningHandle::device_scoped(raw, ash_device, |d, m| unsafe {
                d.destroy_shader_module(m, None);
            })
        };

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert_module.raw())
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag_module.raw())
                .name(c"main"),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(self.topology)
            .primitive_restart_enable(false);

        // Viewport and scissor are set per command buffer.
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face)
            .depth_bias_enable(false)
            .line_width(1.0);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(self.depth_test)
            .depth_write_enable(self.depth_write)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let blend_attachment = if self.alpha_blend {
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD)
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        } else {
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(false)
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        };
        let blend_attachments = vec![blend_attachment; render_pass.color_count()];

        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let layout_info =
            vk::PipelineLayoutCreateInfo::default().set_layouts(&self.set_layouts);

        let layout = unsafe {
            let raw = ash_device
                .create_pipeline_layout(&layout_info, None)
                .map_err(|e| GpuError::PipelineCreation(e.to_string()))?;
            OwningHandle::device_scoped(raw, ash_device, |d, l| unsafe {
                d.destroy_pipeline_layout(l, None);
            })
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout.raw())
            .render_pass(render_pass.handle())
            .subpass(0);

        let pipeline = unsafe {
            let raw = ash_device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_pipelines, e)| GpuError::PipelineCreation(e.to_string()))?[0];
            OwningHandle::device_scoped(raw, ash_device, |d, p| unsafe {
                d.destroy_pipeline(p, None);
            })
        };

        Ok(Pipeline { pipeline, layout })
    }
}

/// An immutable compiled pipeline and its layout.
pub struct Pipeline {
    pipeline: OwningHandle<vk::Pipeline>,
    layout: OwningHandle<vk::PipelineLayout>,
}

impl Pipeline {
    /// Get the raw pipeline handle.
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline.raw()
    }

    /// Get the pipeline layout, used to bind descriptor sets at draw time.
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout.raw()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_CODE: &[u32] = &[];

    #[test]
    fn sparse_tables_grow_to_max_index_plus_one() {
        let config = PipelineConfig::new(NO_CODE, NO_CODE)
            .with_vertex_binding(0, 32)
            .with_vertex_attribute(0, 0, vk::Format::R32G32B32_SFLOAT, 0)
            .with_vertex_attribute(4, 0, vk::Format::R32G32_SFLOAT, 24);

        assert_eq!(config.vertex_attributes.len(), 5);
        assert_eq!(config.vertex_bindings.len(), 1);

        // Skipped slots stay zero-valued.
        for gap in 1..4 {
            let entry = &config.vertex_attributes[gap];
            assert_eq!(entry.format, vk::Format::UNDEFINED);
            assert_eq!(entry.offset, 0);
        }
        assert_eq!(config.vertex_attributes[4].location, 4);
        assert_eq!(config.vertex_attributes[4].offset, 24);
    }

    #[test]
    fn bindings_declared_out_of_order_land_at_their_index() {
        let config = PipelineConfig::new(NO_CODE, NO_CODE)
            .with_vertex_binding(2, 16)
            .with_vertex_binding(0, 12);

        assert_eq!(config.vertex_bindings.len(), 3);
        assert_eq!(config.vertex_bindings[0].stride, 12);
        assert_eq!(config.vertex_bindings[1].stride, 0);
        assert_eq!(config.vertex_bindings[2].stride, 16);
    }

    #[test]
    fn attribute_referencing_undeclared_binding_fails_validation() {
        let config = PipelineConfig::new(NO_CODE, NO_CODE)
            .with_vertex_binding(0, 32)
            .with_vertex_attribute(0, 1, vk::Format::R32G32B32_SFLOAT, 0);

        assert!(config.validate().is_err());
    }

    #[test]
    fn gap_attributes_do_not_trip_binding_validation() {
        let config = PipelineConfig::new(NO_CODE, NO_CODE)
            .with_vertex_binding(1, 32)
            .with_vertex_attribute(3, 1, vk::Format::R32G32B32_SFLOAT, 0);

        // Locations 0..=2 are zero-filled gaps referencing binding 0, which
        // is undeclared; only declared attributes are validated.
        assert!(config.validate().is_ok());
    }

    #[test]
    fn defaults_match_fixed_function_contract() {
        let config = PipelineConfig::new(NO_CODE, NO_CODE);
        assert_eq!(config.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(config.front_face, vk::FrontFace::COUNTER_CLOCKWISE);
        assert_eq!(config.cull_mode, vk::CullModeFlags::BACK);
        assert!(config.depth_test);
        assert!(config.depth_write);
    }
}
