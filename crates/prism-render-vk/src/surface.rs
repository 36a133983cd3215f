// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ash::vk;
use prism_render::{
    ImageSharing, PresentModePreference, QueueAssignment, RenderSize, SurfaceFormatPreference,
};
use tracing::info;

use crate::instance::VkInstance;

/// Chosen once per device; only the extent changes across swapchain rebuilds.
#[derive(Clone, Debug)]
pub struct SurfaceLayout {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub sharing_mode: vk::SharingMode,
    /// Empty for exclusive sharing.
    pub queue_family_indices: Vec<u32>,
}

pub(crate) unsafe fn select_layout(
    instance: &VkInstance,
    phys: vk::PhysicalDevice,
    queues: &QueueAssignment,
    format_pref: SurfaceFormatPreference,
    mode_pref: PresentModePreference,
) -> Result<SurfaceLayout> {
    let formats = instance
        .surface_loader
        .get_physical_device_surface_formats(phys, instance.surface)
        .context("Query surface formats failed")?;
    let modes = instance
        .surface_loader
        .get_physical_device_surface_present_modes(phys, instance.surface)
        .context("Query surface present modes failed")?;

    let format = choose_surface_format(&formats, format_pref)
        .ok_or_else(|| anyhow!("Surface reports no formats"))?;
    let present_mode = choose_present_mode(&modes, mode_pref);
    let (sharing_mode, queue_family_indices) = sharing(queues);

    info!(
        "surface layout: {:?}/{:?}, {:?}, {:?} sharing",
        format.format, format.color_space, present_mode, sharing_mode
    );

    Ok(SurfaceLayout {
        format,
        present_mode,
        sharing_mode,
        queue_family_indices,
    })
}

pub(crate) fn choose_surface_format(
    available: &[vk::SurfaceFormatKHR],
    pref: SurfaceFormatPreference,
) -> Option<vk::SurfaceFormatKHR> {
    let wanted: [vk::Format; 2] = match pref {
        SurfaceFormatPreference::Srgb => [vk::Format::B8G8R8A8_SRGB, vk::Format::R8G8B8A8_SRGB],
        SurfaceFormatPreference::Linear => [vk::Format::B8G8R8A8_UNORM, vk::Format::R8G8B8A8_UNORM],
    };
    wanted
        .into_iter()
        .find_map(|w| {
            available
                .iter()
                .copied()
                .find(|f| f.format == w && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        })
        .or_else(|| available.first().copied())
}

pub(crate) fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    pref: PresentModePreference,
) -> vk::PresentModeKHR {
    let order: &[vk::PresentModeKHR] = match pref {
        PresentModePreference::LowLatency => &[
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO_RELAXED,
        ],
        PresentModePreference::Fifo => &[],
    };
    order
        .iter()
        .copied()
        .find(|m| available.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub(crate) fn sharing(queues: &QueueAssignment) -> (vk::SharingMode, Vec<u32>) {
    match queues.image_sharing() {
        ImageSharing::Exclusive => (vk::SharingMode::EXCLUSIVE, Vec::new()),
        ImageSharing::Concurrent(families) => (vk::SharingMode::CONCURRENT, families),
    }
}

/// The surface's extent, or the window size clamped to the surface limits
/// when the surface leaves it to the swapchain (`u32::MAX` sentinel).
pub(crate) fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> RenderSize {
    if caps.current_extent.width != u32::MAX {
        RenderSize::new(caps.current_extent.width, caps.current_extent.height)
    } else {
        RenderSize::new(
            want.width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            want.height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        )
    }
}
