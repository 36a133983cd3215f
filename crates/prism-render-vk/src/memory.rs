// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ash::vk;
use prism_render::RenderSize;

pub(crate) fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    (0..props.memory_type_count)
        .find(|&i| {
            (type_bits & (1 << i)) != 0
                && props.memory_types[i as usize]
                    .property_flags
                    .contains(required)
        })
        .ok_or_else(|| anyhow!("No memory type with {required:?} in mask {type_bits:#b}"))
}

pub(crate) unsafe fn pick_depth_format(instance: &ash::Instance, phys: vk::PhysicalDevice) -> vk::Format {
    // Prefer 32f → 24+S8 → 32f+S8 → 16
    let candidates = [
        vk::Format::D32_SFLOAT,
        vk::Format::D24_UNORM_S8_UINT,
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D16_UNORM,
    ];
    for &fmt in &candidates {
        let props = instance.get_physical_device_format_properties(phys, fmt);
        if props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        {
            return fmt;
        }
    }
    vk::Format::D32_SFLOAT // mandatory for depth attachments on 1.x desktop parts
}

/// Per-frame depth image, sized for one extent.
pub(crate) struct DepthTarget {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub extent: RenderSize,
}

impl DepthTarget {
    pub(crate) unsafe fn new(
        device: &ash::Device,
        memory_props: &vk::PhysicalDeviceMemoryProperties,
        format: vk::Format,
        extent: RenderSize,
    ) -> Result<Self> {
        let img_ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = device
            .create_image(&img_ci, None)
            .context("Create depth image failed")?;

        let mem_req = device.get_image_memory_requirements(image);
        let memory = find_memory_type(
            memory_props,
            mem_req.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .and_then(|memory_type_index| {
            let alloc = vk::MemoryAllocateInfo {
                s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
                allocation_size: mem_req.size,
                memory_type_index,
                ..Default::default()
            };
            Ok(device.allocate_memory(&alloc, None)?)
        });
        let memory = match memory {
            Ok(memory) => memory,
            Err(e) => {
                device.destroy_image(image, None);
                return Err(e.context("Allocate depth memory failed"));
            }
        };

        let view = device.bind_image_memory(image, memory, 0).and_then(|()| {
            let view_ci = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::DEPTH,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            device.create_image_view(&view_ci, None)
        });
        let view = match view {
            Ok(view) => view,
            Err(e) => {
                device.destroy_image(image, None);
                device.free_memory(memory, None);
                return Err(e).context("Create depth view failed");
            }
        };

        Ok(Self {
            image,
            memory,
            view,
            extent,
        })
    }

    pub(crate) unsafe fn destroy(self, device: &ash::Device) {
        device.destroy_image_view(self.view, None);
        device.destroy_image(self.image, None);
        device.free_memory(self.memory, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut p = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, &f) in flags.iter().enumerate() {
            p.memory_types[i].property_flags = f;
        }
        p
    }

    #[test]
    fn picks_first_allowed_type_with_flags() {
        let p = props(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);
        let local = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        assert_eq!(find_memory_type(&p, 0b111, local).unwrap(), 1);
        assert_eq!(find_memory_type(&p, 0b100, local).unwrap(), 2);
    }

    #[test]
    fn missing_type_is_an_error_not_a_panic() {
        let p = props(&[vk::MemoryPropertyFlags::HOST_VISIBLE]);
        assert!(find_memory_type(&p, 0b1, vk::MemoryPropertyFlags::DEVICE_LOCAL).is_err());
        // Bits past the reported count are ignored.
        assert!(find_memory_type(&p, 0b10, vk::MemoryPropertyFlags::empty()).is_err());
    }
}
