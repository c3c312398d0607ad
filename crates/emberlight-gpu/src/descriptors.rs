//! Descriptor set management.

use crate::buffer::Buffer;
use crate::device::Device;
use crate::error::{GpuError, Result};
use crate::handle::OwningHandle;
use crate::image::Image;
use ash::vk;

/// Descriptor set layout builder with index-addressed bindings.
///
/// Bindings are stored at their declared index; declaring index `n` grows
/// the table to `n + 1` entries, filling any gap with zeroed (unused)
/// entries whose descriptor count is zero.
pub struct DescriptorSetLayoutBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'a>>,
}

impl<'a> DescriptorSetLayoutBuilder<'a> {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Declare a binding at an explicit index.
    pub fn binding(
        mut self,
        index: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        let slot = index as usize;
        if self.bindings.len() <= slot {
            self.bindings
                .resize(slot + 1, vk::DescriptorSetLayoutBinding::default());
        }
        self.bindings[slot] = vk::DescriptorSetLayoutBinding::default()
            .binding(index)
            .descriptor_type(descriptor_type)
            .descriptor_count(count)
            .stage_flags(stage_flags);
        self
    }

    /// Declare a uniform buffer binding.
    pub fn uniform_buffer(self, index: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(index, vk::DescriptorType::UNIFORM_BUFFER, 1, stage_flags)
    }

    /// Declare a combined image sampler binding.
    pub fn sampled_image(self, index: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(
            index,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            1,
            stage_flags,
        )
    }

    /// Number of binding table entries, gap fills included.
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// Compile the accumulated bindings into an immutable layout.
    pub fn build(self, device: &Device) -> Result<OwningHandle<vk::DescriptorSetLayout>> {
        let ash_device = device.device();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&self.bindings);

        let layout = unsafe {
            let raw = ash_device.create_descriptor_set_layout(&layout_info, None)?;
            OwningHandle::device_scoped(raw, ash_device, |d, l| unsafe {
                d.destroy_descriptor_set_layout(l, None);
            })
        };
        Ok(layout)
    }
}

impl Default for DescriptorSetLayoutBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-capacity descriptor pool.
///
/// Capacity is set once at construction; exhaustion is a configuration bug
/// surfaced as an error, never retried.
pub struct DescriptorPool {
    pool: OwningHandle<vk::DescriptorPool>,
}

impl DescriptorPool {
    /// Create a pool sized for `max_sets` sets drawing from `pool_sizes`.
    pub fn new(
        device: &Device,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<Self> {
        let ash_device = device.device();
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = unsafe {
            let raw = ash_device.create_descriptor_pool(&create_info, None)?;
            OwningHandle::device_scoped(raw, ash_device, |d, p| unsafe {
                d.destroy_descriptor_pool(p, None);
            })
        };
        Ok(Self { pool })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool.raw()
    }

    /// Allocate one descriptor set against a layout.
    pub fn allocate_set(
        &self,
        device: &Device,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool.raw())
            .set_layouts(&layouts);

        let sets = unsafe {
            device
                .device()
                .allocate_descriptor_sets(&alloc_info)
                .map_err(|e| match e {
                    vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => {
                        GpuError::DescriptorPoolExhausted(e.to_string())
                    }
                    other => GpuError::Vulkan(other),
                })?
        };
        Ok(sets[0])
    }
}

/// One pending descriptor write: a target set and binding plus exactly one
/// payload.
struct WriteItem {
    set: vk::DescriptorSet,
    binding: u32,
    buffer: Option<vk::DescriptorBufferInfo>,
    image: Option<vk::DescriptorImageInfo>,
}

impl WriteItem {
    /// Descriptor type inferred from which payload was populated.
    fn inferred_type(&self) -> vk::DescriptorType {
        debug_assert!(self.buffer.is_some() != self.image.is_some());
        if self.buffer.is_some() {
            vk::DescriptorType::UNIFORM_BUFFER
        } else {
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        }
    }
}

/// Accumulates descriptor writes and applies them in one batched update.
#[derive(Default)]
pub struct DescriptorSetUpdater {
    items: Vec<WriteItem>,
}

impl DescriptorSetUpdater {
    /// Create an empty updater.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a whole-buffer uniform write.
    pub fn for_uniform_buffer(
        mut self,
        set: vk::DescriptorSet,
        binding: u32,
        buffer: &Buffer,
    ) -> Self {
        self.items.push(WriteItem {
            set,
            binding,
            buffer: Some(
                vk::DescriptorBufferInfo::default()
                    .buffer(buffer.handle())
                    .offset(0)
                    .range(buffer.size()),
            ),
            image: None,
        });
        self
    }

    /// Queue a combined image-sampler write for a shader-readable texture.
    pub fn for_texture(mut self, set: vk::DescriptorSet, binding: u32, image: &Image) -> Self {
        self.items.push(WriteItem {
            set,
            binding,
            buffer: None,
            image: Some(
                vk::DescriptorImageInfo::default()
                    .sampler(image.sampler())
                    .image_view(image.view())
                    .image_layout(image.layout()),
            ),
        });
        self
    }

    /// Apply every queued write in a single native update call.
    pub fn update_sets(self, device: &Device) {
        if self.items.is_empty() {
            return;
        }

        let writes: Vec<vk::WriteDescriptorSet<'_>> = self
            .items
            .iter()
            .map(|item| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(item.set)
                    .dst_binding(item.binding)
                    .descriptor_type(item.inferred_type());
                match (&item.buffer, &item.image) {
                    (Some(buffer), None) => write.buffer_info(std::slice::from_ref(buffer)),
                    (None, Some(image)) => write.image_info(std::slice::from_ref(image)),
                    _ => unreachable!("write item must carry exactly one payload"),
                }
            })
            .collect();

        unsafe {
            device.device().update_descriptor_sets(&writes, &[]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_gaps_are_filled_with_unused_entries() {
        let builder = DescriptorSetLayoutBuilder::new()
            .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .sampled_image(3, vk::ShaderStageFlags::FRAGMENT);

        assert_eq!(builder.binding_count(), 4);

        let bindings = &builder.bindings;
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(bindings[0].descriptor_count, 1);
        // Gap entries stay zeroed and are ignored by the driver.
        assert_eq!(bindings[1].descriptor_count, 0);
        assert_eq!(bindings[2].descriptor_count, 0);
        assert_eq!(bindings[3].binding, 3);
        assert_eq!(
            bindings[3].descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
    }

    #[test]
    fn redeclaring_an_index_overwrites_in_place() {
        let builder = DescriptorSetLayoutBuilder::new()
            .uniform_buffer(1, vk::ShaderStageFlags::VERTEX)
            .sampled_image(1, vk::ShaderStageFlags::FRAGMENT);

        assert_eq!(builder.binding_count(), 2);
        assert_eq!(
            builder.bindings[1].descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
    }

    #[test]
    fn write_items_infer_type_from_payload() {
        let buffer_item = WriteItem {
            set: vk::DescriptorSet::null(),
            binding: 0,
            buffer: Some(vk::DescriptorBufferInfo::default()),
            image: None,
        };
        assert_eq!(
            buffer_item.inferred_type(),
            vk::DescriptorType::UNIFORM_BUFFER
        );

        let image_item = WriteItem {
            set: vk::DescriptorSet::null(),
            binding: 1,
            buffer: None,
            image: Some(vk::DescriptorImageInfo::default()),
        };
        assert_eq!(
            image_item.inferred_type(),
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
    }
}
