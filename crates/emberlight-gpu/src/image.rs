//! Device-memory-backed images: sampled textures and depth targets.
//!
//! Texture creation consumes already-decoded pixel data from the decoder
//! boundary: a flat byte buffer plus one region of metadata per mip level
//! and cube face. 2D and cube textures share a single upload path differing
//! only in array-layer count, view type and the cube-compatible flag.

use crate::buffer::{allocate_memory, Buffer};
use crate::device::Device;
use crate::error::{GpuError, Result};
use crate::handle::OwningHandle;
use ash::vk;

/// One upload region supplied by the decoder: a single mip level of a
/// single face.
#[derive(Debug, Clone, Copy)]
pub struct TextureRegion {
    /// Mip level this region fills.
    pub mip_level: u32,
    /// Cube face (array layer) this region fills; 0 for 2D textures.
    pub face: u32,
    /// Level width in texels.
    pub width: u32,
    /// Level height in texels.
    pub height: u32,
    /// Byte offset of the region's data within the pixel buffer.
    pub offset: u64,
}

/// Fully-materialized texture data at the decoder boundary.
///
/// The pixel buffer and region list come straight from a file decoder; the
/// layer never streams or re-decodes.
pub struct TextureData<'a> {
    /// Raw texel bytes for every region.
    pub pixels: &'a [u8],
    /// Texel format of the pixel data.
    pub format: vk::Format,
    /// Base level width.
    pub width: u32,
    /// Base level height.
    pub height: u32,
    /// Number of mip levels present.
    pub mip_levels: u32,
    /// Number of faces: 1 for 2D, 6 for cube maps.
    pub faces: u32,
    /// One entry per mip level per face.
    pub regions: Vec<TextureRegion>,
}

impl TextureData<'_> {
    /// Check that the region list covers exactly levels × faces and that
    /// every region addresses a declared level and face.
    fn validate(&self) -> Result<()> {
        let expected = self.mip_levels as usize * self.faces as usize;
        if self.regions.len() != expected {
            return Err(GpuError::InvalidState(format!(
                "expected {expected} upload regions ({} levels x {} faces), got {}",
                self.mip_levels,
                self.faces,
                self.regions.len()
            )));
        }
        for region in &self.regions {
            if region.mip_level >= self.mip_levels || region.face >= self.faces {
                return Err(GpuError::InvalidState(format!(
                    "region addresses level {} face {} outside {}x{}",
                    region.mip_level, region.face, self.mip_levels, self.faces
                )));
            }
        }
        if self.pixels.is_empty() {
            return Err(GpuError::InvalidState("texture has no pixel data".to_string()));
        }
        Ok(())
    }
}

/// Build one buffer-to-image copy per upload region.
fn copy_regions(data: &TextureData<'_>) -> Vec<vk::BufferImageCopy> {
    data.regions
        .iter()
        .map(|region| {
            vk::BufferImageCopy::default()
                .buffer_offset(region.offset)
                .image_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .mip_level(region.mip_level)
                        .base_array_layer(region.face)
                        .layer_count(1),
                )
                .image_extent(vk::Extent3D {
                    width: region.width,
                    height: region.height,
                    depth: 1,
                })
        })
        .collect()
}

/// Derive the access masks and pipeline stages for a layout transition.
///
/// Only the transitions this layer records are representable; anything else
/// is a programming error.
fn barrier_masks(
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> Result<(
    vk::AccessFlags,
    vk::AccessFlags,
    vk::PipelineStageFlags,
    vk::PipelineStageFlags,
)> {
    match (old_layout, new_layout) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Ok((
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        )),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
            Ok((
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            ))
        }
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => Ok((
            vk::AccessFlags::empty(),
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )),
        _ => Err(GpuError::InvalidState(format!(
            "unsupported layout transition {old_layout:?} -> {new_layout:?}"
        ))),
    }
}

/// Aspect mask for a depth format.
fn depth_aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
    let has_stencil = matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    );
    if has_stencil {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

/// An image, its dedicated memory, view and sampler.
///
/// `layout` always reflects the last transition recorded for the image;
/// transitions are recorded on the same command buffer as the commands that
/// depend on them, so submission order alone establishes correctness.
pub struct Image {
    image: OwningHandle<vk::Image>,
    memory: OwningHandle<vk::DeviceMemory>,
    view: OwningHandle<vk::ImageView>,
    sampler: OwningHandle<vk::Sampler>,
    layout: vk::ImageLayout,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl Image {
    /// Create a sampled 2D texture from decoded pixel data.
    pub fn texture_2d(device: &Device, data: &TextureData<'_>) -> Result<Self> {
        if data.faces != 1 {
            return Err(GpuError::InvalidState(format!(
                "2D texture must have one face, got {}",
                data.faces
            )));
        }
        Self::upload(device, data, vk::ImageViewType::TYPE_2D)
    }

    /// Create a sampled cube-map texture from decoded pixel data.
    pub fn cube(device: &Device, data: &TextureData<'_>) -> Result<Self> {
        if data.faces != 6 {
            return Err(GpuError::InvalidState(format!(
                "cube texture must have six faces, got {}",
                data.faces
            )));
        }
        Self::upload(device, data, vk::ImageViewType::CUBE)
    }

    /// Create a depth-stencil render target.
    ///
    /// The image stays in UNDEFINED layout; the render pass's depth
    /// attachment performs the transition on first use. Depth targets carry
    /// no sampler.
    pub fn depth_target(device: &Device, width: u32, height: u32) -> Result<Self> {
        let ash_device = device.device();
        let format = device.depth_format();
        let extent = vk::Extent2D { width, height };

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let (image, memory) = create_bound_image(device, &image_info)?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image.raw())
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(depth_aspect_mask(format))
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

        Ok(Self {
            image,
            memory,
            view,
            sampler: OwningHandle::null(),
            layout: vk::ImageLayout::UNDEFINED,
            format,
            extent,
        })
    }

    /// Get the raw image handle.
    pub fn handle(&self) -> vk::Image {
        self.image.raw()
    }

    /// Get the image view.
    pub fn view(&self) -> vk::ImageView {
        self.view.raw()
    }

    /// Get the sampler; null for depth targets.
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler.raw()
    }

    /// The layout established by the last recorded transition.
    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }

    /// Get the texel format.
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Get the base-level extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn upload(
        device: &Device,
        data: &TextureData<'_>,
        view_type: vk::ImageViewType,
    ) -> Result<Self> {
        data.validate()?;

        let ash_device = device.device();
        let cube = view_type == vk::ImageViewType::CUBE;

        let flags = if cube {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };

        let image_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .format(data.format)
            .extent(vk::Extent3D {
                width: data.width,
                height: data.height,
                depth: 1,
            })
            .mip_levels(data.mip_levels)
            .array_layers(data.faces)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let (image, memory) = create_bound_image(device, &image_info)?;

        let staging = Buffer::staging(
            device,
            data.pixels.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            Some(data.pixels),
        )?;

        let all_subresources = vk::ImageSubresourceRange::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .base_mip_level(0)
            .level_count(data.mip_levels)
            .base_array_layer(0)
            .layer_count(data.faces);

        let regions = copy_regions(data);
        let raw_image = image.raw();

        // Transition, copy and transition back on one command buffer so the
        // copy can never observe the image before the first barrier.
        let (to_dst_src, to_dst_dst, to_dst_src_stage, to_dst_dst_stage) =
            barrier_masks(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)?;
        let (to_read_src, to_read_dst, to_read_src_stage, to_read_dst_stage) = barrier_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;

        device.execute_one_time(|cmd| {
            let to_transfer = vk::ImageMemoryBarrier::default()
                .src_access_mask(to_dst_src)
                .dst_access_mask(to_dst_dst)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(raw_image)
                .subresource_range(all_subresources);

            let to_shader_read = vk::ImageMemoryBarrier::default()
                .src_access_mask(to_read_src)
                .dst_access_mask(to_read_dst)
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(raw_image)
                .subresource_range(all_subresources);

            unsafe {
                ash_device.cmd_pipeline_barrier(
                    cmd,
                    to_dst_src_stage,
                    to_dst_dst_stage,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[to_transfer],
                );
                ash_device.cmd_copy_buffer_to_image(
                    cmd,
                    staging.handle(),
                    raw_image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &regions,
                );
                ash_device.cmd_pipeline_barrier(
                    cmd,
                    to_read_src_stage,
                    to_read_dst_stage,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[to_shader_read],
                );
            }
        })?;
        // Queue is idle; the staging buffer may drop.
        drop(staging);

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image.raw())
            .view_type(view_type)
            .format(data.format)
            .components(vk::ComponentMapping::default())
            .subresource_range(all_subresources);

        let view = unsafe {
            let raw = ash_device.create_image_view(&view_info, None)?;
            OwningHandle::device_scoped(raw, ash_device, |d, v| unsafe {
                d.destroy_image_view(v, None);
            })
        };

        let sampler = create_sampler(device, data.mip_levels)?;

        Ok(Self {
            image,
            memory,
            view,
            sampler,
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            format: data.format,
            extent: vk::Extent2D {
                width: data.width,
                height: data.height,
            },
        })
    }
}

fn create_bound_image(
    device: &Device,
    image_info: &vk::ImageCreateInfo<'_>,
) -> Result<(OwningHandle<vk::Image>, OwningHandle<vk::DeviceMemory>)> {
    let ash_device = device.device();

    let image = unsafe {
        let raw = ash_device.create_image(image_info, None)?;
        OwningHandle::device_scoped(raw, ash_device, |d, i| unsafe {
            d.destroy_image(i, None);
        })
    };

    let requirements = unsafe { ash_device.get_image_memory_requirements(image.raw()) };
    let memory = allocate_memory(device, &requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;

    unsafe {
        ash_device.bind_image_memory(image.raw(), memory.raw(), 0)?;
    }

    Ok((image, memory))
}

fn create_sampler(device: &Device, mip_levels: u32) -> Result<OwningHandle<vk::Sampler>> {
    let ash_device = device.device();
    let caps = device.capabilities();

    let mut sampler_info = vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .min_lod(0.0)
        .max_lod(mip_levels as f32)
        .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE);

    if caps.supports_anisotropy() {
        sampler_info = sampler_info
            .anisotropy_enable(true)
            .max_anisotropy(caps.limits.max_sampler_anisotropy);
    }

    let sampler = unsafe {
        let raw = ash_device.create_sampler(&sampler_info, None)?;
        OwningHandle::device_scoped(raw, ash_device, |d, s| unsafe {
            d.destroy_sampler(s, None);
        })
    };

    Ok(sampler)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(level: u32, face: u32, width: u32, height: u32, offset: u64) -> TextureRegion {
        TextureRegion {
            mip_level: level,
            face,
            width,
            height,
            offset,
        }
    }

    fn cube_data(pixels: &[u8]) -> TextureData<'_> {
        let mut regions = Vec::new();
        let mut offset = 0;
        for face in 0..6 {
            for level in 0..2 {
                let size = if level == 0 { 16 } else { 4 };
                regions.push(region(level, face, 4 >> level, 4 >> level, offset));
                offset += size;
            }
        }
        TextureData {
            pixels,
            format: vk::Format::R8G8B8A8_UNORM,
            width: 4,
            height: 4,
            mip_levels: 2,
            faces: 6,
            regions,
        }
    }

    #[test]
    fn one_copy_region_per_level_and_face() {
        let pixels = vec![0u8; 120];
        let data = cube_data(&pixels);
        assert!(data.validate().is_ok());

        let regions = copy_regions(&data);
        assert_eq!(regions.len(), 12);

        // Spot-check the second face's base level.
        let r = &regions[2];
        assert_eq!(r.image_subresource.base_array_layer, 1);
        assert_eq!(r.image_subresource.mip_level, 0);
        assert_eq!(r.image_subresource.layer_count, 1);
        assert_eq!(r.buffer_offset, 20);
        assert_eq!(r.image_extent.width, 4);
    }

    #[test]
    fn region_count_mismatch_is_rejected() {
        let pixels = vec![0u8; 16];
        let data = TextureData {
            pixels: &pixels,
            format: vk::Format::R8G8B8A8_UNORM,
            width: 2,
            height: 2,
            mip_levels: 2,
            faces: 1,
            regions: vec![region(0, 0, 2, 2, 0)],
        };
        assert!(data.validate().is_err());
    }

    #[test]
    fn region_outside_declared_levels_is_rejected() {
        let pixels = vec![0u8; 16];
        let data = TextureData {
            pixels: &pixels,
            format: vk::Format::R8G8B8A8_UNORM,
            width: 2,
            height: 2,
            mip_levels: 1,
            faces: 1,
            regions: vec![region(1, 0, 1, 1, 0)],
        };
        assert!(data.validate().is_err());
    }

    #[test]
    fn barrier_masks_cover_recorded_transitions() {
        let (src, dst, _, _) = barrier_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert_eq!(src, vk::AccessFlags::empty());
        assert_eq!(dst, vk::AccessFlags::TRANSFER_WRITE);

        let (src, dst, src_stage, dst_stage) = barrier_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(src, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(dst, vk::AccessFlags::SHADER_READ);
        assert_eq!(src_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);

        assert!(barrier_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )
        .is_ok());

        assert!(barrier_masks(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::UNDEFINED,
        )
        .is_err());
    }

    #[test]
    fn depth_aspect_includes_stencil_only_when_present() {
        assert_eq!(
            depth_aspect_mask(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            depth_aspect_mask(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }
}
