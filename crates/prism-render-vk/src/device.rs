// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, CString};

use anyhow::{bail, Context, Result};
use ash::vk;
use prism_render::SelectedDevice;
use tracing::{info, warn};

use crate::feature_table::FeatureBlocks;

#[derive(Clone, Copy, Debug)]
pub struct Queue {
    pub raw: vk::Queue,
    pub family: u32,
}

/// The logical device and one queue per role. Roles that share a family
/// share the queue. Dropping waits for the device to go idle first.
pub struct LogicalDevice {
    pub(crate) raw: ash::Device,
    pub graphics: Queue,
    pub compute: Queue,
    pub present: Queue,
}

impl LogicalDevice {
    pub(crate) unsafe fn new(
        instance: &ash::Instance,
        selected: &SelectedDevice<vk::PhysicalDevice>,
    ) -> Result<Self> {
        // Duplicate family indices in the create infos are rejected by drivers.
        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = selected
            .queues
            .unique_families()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();

        let extension_names = selected
            .enabled
            .extensions
            .iter()
            .map(|e| CString::new(e.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .context("Extension name contains a NUL byte")?;
        let extension_ptrs: Vec<*const c_char> =
            extension_names.iter().map(|e| e.as_ptr()).collect();

        let mut blocks = FeatureBlocks::default();
        let unknown = blocks.enable(&selected.enabled.features);
        if !unknown.is_empty() {
            let names: Vec<String> = unknown.iter().map(|f| f.to_string()).collect();
            bail!("No Vulkan mapping for features [{}]", names.join(", "));
        }
        let mut features2 = blocks.chain();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs)
            .push_next(&mut features2);

        let raw = instance
            .create_device(selected.candidate.handle, &create_info, None)
            .context("vkCreateDevice failed")?;

        let qa = selected.queues;
        let graphics = Queue {
            raw: raw.get_device_queue(qa.graphics, 0),
            family: qa.graphics,
        };
        let compute = Queue {
            raw: raw.get_device_queue(qa.compute, 0),
            family: qa.compute,
        };
        let present = Queue {
            raw: raw.get_device_queue(qa.present, 0),
            family: qa.present,
        };

        info!(
            "logical device ready: {} queue famil{} (graphics {}, compute {}, present {}), {} extension(s)",
            queue_infos.len(),
            if queue_infos.len() == 1 { "y" } else { "ies" },
            qa.graphics,
            qa.compute,
            qa.present,
            extension_ptrs.len()
        );

        Ok(Self {
            raw,
            graphics,
            compute,
            present,
        })
    }

    pub fn raw(&self) -> &ash::Device {
        &self.raw
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.raw.device_wait_idle() }.context("vkDeviceWaitIdle failed")
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        if let Err(e) = self.wait_idle() {
            warn!("{e:#}; destroying device anyway");
        }
        unsafe { self.raw.destroy_device(None) };
    }
}
