// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::vk;
use prism_render::{ApiVersion, DeviceCandidate, DeviceKind, QueueCaps, QueueFamilyInfo};
use tracing::debug;

use crate::feature_table::FeatureBlocks;
use crate::instance::VkInstance;

pub type VkCandidate = DeviceCandidate<vk::PhysicalDevice>;

/// Snapshots every physical device, testing each queue family's present
/// support against the instance's surface.
pub(crate) unsafe fn enumerate_candidates(instance: &VkInstance) -> Result<Vec<VkCandidate>> {
    let devices = instance
        .raw
        .enumerate_physical_devices()
        .context("vkEnumeratePhysicalDevices failed")?;
    debug!("{} physical device(s) found", devices.len());

    devices
        .into_iter()
        .map(|phys| snapshot(instance, phys))
        .collect()
}

unsafe fn snapshot(instance: &VkInstance, phys: vk::PhysicalDevice) -> Result<VkCandidate> {
    let raw = &instance.raw;
    let props = raw.get_physical_device_properties(phys);
    let name = props
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "<unnamed device>".to_string());

    let memory = raw.get_physical_device_memory_properties(phys);
    let extensions = raw
        .enumerate_device_extension_properties(phys)
        .with_context(|| format!("Enumerate extensions of {name} failed"))?
        .iter()
        .filter_map(|e| e.extension_name_as_c_str().ok())
        .map(|e| e.to_string_lossy().into_owned())
        .collect();

    let families = raw.get_physical_device_queue_family_properties(phys);
    let mut queue_families = Vec::with_capacity(families.len());
    for (index, family) in (0u32..).zip(families.iter()) {
        let supports_present = instance
            .surface_loader
            .get_physical_device_surface_support(phys, index, instance.surface)
            .with_context(|| format!("Query present support of {name} family {index} failed"))?;
        queue_families.push(QueueFamilyInfo {
            index,
            caps: queue_caps(family.queue_flags),
            queue_count: family.queue_count,
            supports_present,
        });
    }

    Ok(DeviceCandidate {
        handle: phys,
        kind: device_kind(props.device_type),
        api_version: ApiVersion::new(
            vk::api_version_major(props.api_version),
            vk::api_version_minor(props.api_version),
        ),
        device_local_memory: device_local_bytes(&memory),
        extensions,
        features: FeatureBlocks::query(raw, phys).supported(),
        queue_families,
        name,
    })
}

pub(crate) fn device_kind(ty: vk::PhysicalDeviceType) -> DeviceKind {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => DeviceKind::Discrete,
        vk::PhysicalDeviceType::INTEGRATED_GPU => DeviceKind::Integrated,
        vk::PhysicalDeviceType::VIRTUAL_GPU => DeviceKind::Virtual,
        vk::PhysicalDeviceType::CPU => DeviceKind::Cpu,
        _ => DeviceKind::Other,
    }
}

pub(crate) fn queue_caps(flags: vk::QueueFlags) -> QueueCaps {
    let mut caps = QueueCaps::empty();
    caps.set(QueueCaps::GRAPHICS, flags.contains(vk::QueueFlags::GRAPHICS));
    caps.set(QueueCaps::COMPUTE, flags.contains(vk::QueueFlags::COMPUTE));
    // Graphics and compute queues may transfer without advertising it.
    caps.set(
        QueueCaps::TRANSFER,
        flags.intersects(vk::QueueFlags::TRANSFER | vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
    );
    caps
}

pub(crate) fn device_local_bytes(memory: &vk::PhysicalDeviceMemoryProperties) -> u64 {
    memory.memory_heaps[..memory.memory_heap_count as usize]
        .iter()
        .filter(|h| h.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|h| h.size)
        .sum()
}
