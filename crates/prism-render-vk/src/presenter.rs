// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::khr::{surface, swapchain};
use ash::prelude::VkResult;
use ash::vk;
use prism_render::{
    AcquireStatus, PresentBackend, PresentStatus, RenderSize, SurfaceCapabilities, SwapchainDesc,
};
use tracing::warn;

use crate::device::LogicalDevice;
use crate::instance::VkInstance;
use crate::surface::{extent_from_caps, SurfaceLayout};

/// Native swapchain calls for one surface, with the invariant layout baked in.
pub struct VkPresenter {
    device: ash::Device,
    loader: swapchain::Device,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
    present_queue: vk::Queue,
    layout: SurfaceLayout,
    size_hint: RenderSize,
}

impl VkPresenter {
    pub(crate) fn new(
        instance: &VkInstance,
        device: &LogicalDevice,
        phys: vk::PhysicalDevice,
        layout: SurfaceLayout,
        size_hint: RenderSize,
    ) -> Self {
        Self {
            device: device.raw.clone(),
            loader: swapchain::Device::new(&instance.raw, &device.raw),
            surface_loader: instance.surface_loader.clone(),
            surface: instance.surface,
            phys,
            present_queue: device.present.raw,
            layout,
            size_hint,
        }
    }

    pub fn layout(&self) -> &SurfaceLayout {
        &self.layout
    }

    /// Window size, used only when the surface leaves the extent undefined.
    pub fn set_size_hint(&mut self, size: RenderSize) {
        self.size_hint = size;
    }
}

pub(crate) fn classify_acquire(result: VkResult<(u32, bool)>) -> Result<AcquireStatus> {
    match result {
        Ok((index, false)) => Ok(AcquireStatus::Acquired(index)),
        // SUBOPTIMAL: the image is acquired and the semaphore signal is pending.
        Ok((_, true)) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireStatus::Stale),
        Err(vk::Result::NOT_READY) => Ok(AcquireStatus::NotReady),
        Err(vk::Result::TIMEOUT) => Ok(AcquireStatus::Timeout),
        Err(e) => Err(e).context("vkAcquireNextImageKHR failed"),
    }
}

pub(crate) fn classify_present(result: VkResult<bool>) -> Result<PresentStatus> {
    match result {
        Ok(false) => Ok(PresentStatus::Presented),
        Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::Stale),
        Err(e) => Err(e).context("vkQueuePresentKHR failed"),
    }
}

impl PresentBackend for VkPresenter {
    type Handle = vk::SwapchainKHR;
    type Image = vk::Image;
    type View = vk::ImageView;
    type Semaphore = vk::Semaphore;
    type Fence = vk::Fence;
    type Transform = vk::SurfaceTransformFlagsKHR;

    fn surface_capabilities(&mut self) -> Result<SurfaceCapabilities<Self::Transform>> {
        let caps = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.phys, self.surface)
        }
        .context("vkGetPhysicalDeviceSurfaceCapabilitiesKHR failed")?;

        Ok(SurfaceCapabilities {
            min_image_count: caps.min_image_count,
            max_image_count: (caps.max_image_count != 0).then_some(caps.max_image_count),
            current_extent: extent_from_caps(&caps, self.size_hint),
            current_transform: caps.current_transform,
        })
    }

    fn create_swapchain(
        &mut self,
        desc: &SwapchainDesc<Self::Transform>,
        old: Option<&vk::SwapchainKHR>,
    ) -> Result<vk::SwapchainKHR> {
        let info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(desc.image_count)
            .image_format(self.layout.format.format)
            .image_color_space(self.layout.format.color_space)
            .image_extent(vk::Extent2D {
                width: desc.extent.width,
                height: desc.extent.height,
            })
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(self.layout.sharing_mode)
            .queue_family_indices(&self.layout.queue_family_indices)
            .pre_transform(desc.transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(self.layout.present_mode)
            .clipped(true)
            .old_swapchain(old.copied().unwrap_or_default());

        Ok(unsafe { self.loader.create_swapchain(&info, None) }?)
    }

    fn swapchain_images(&mut self, handle: &vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        Ok(unsafe { self.loader.get_swapchain_images(*handle) }?)
    }

    fn create_view(&mut self, image: vk::Image) -> Result<vk::ImageView> {
        let info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format: self.layout.format.format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        Ok(unsafe { self.device.create_image_view(&info, None) }?)
    }

    fn retire(&mut self, handle: vk::SwapchainKHR, views: Vec<vk::ImageView>) {
        unsafe {
            // In-flight frames may still reference these views.
            if let Err(e) = self.device.device_wait_idle() {
                warn!("vkDeviceWaitIdle failed before swapchain teardown: {e}");
            }
            for view in views {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(handle, None);
        }
    }

    fn acquire_next_image(
        &mut self,
        handle: &vk::SwapchainKHR,
        timeout: u64,
        semaphore: Option<vk::Semaphore>,
        fence: Option<vk::Fence>,
    ) -> Result<AcquireStatus> {
        classify_acquire(unsafe {
            self.loader.acquire_next_image(
                *handle,
                timeout,
                semaphore.unwrap_or_default(),
                fence.unwrap_or_default(),
            )
        })
    }

    fn present(
        &mut self,
        handle: &vk::SwapchainKHR,
        index: u32,
        wait: Option<vk::Semaphore>,
    ) -> Result<PresentStatus> {
        let wait: Vec<vk::Semaphore> = wait.into_iter().collect();
        let swapchains = [*handle];
        let indices = [index];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);

        classify_present(unsafe { self.loader.queue_present(self.present_queue, &info) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_results_are_classified() {
        assert_eq!(classify_acquire(Ok((2, false))).unwrap(), AcquireStatus::Acquired(2));
        assert_eq!(classify_acquire(Ok((2, true))).unwrap(), AcquireStatus::Stale);
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquireStatus::Stale
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::NOT_READY)).unwrap(),
            AcquireStatus::NotReady
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::TIMEOUT)).unwrap(),
            AcquireStatus::Timeout
        );
    }

    #[test]
    fn hard_acquire_failures_propagate() {
        for code in [
            vk::Result::ERROR_DEVICE_LOST,
            vk::Result::ERROR_SURFACE_LOST_KHR,
            vk::Result::ERROR_OUT_OF_HOST_MEMORY,
        ] {
            let err = classify_acquire(Err(code)).unwrap_err();
            assert_eq!(err.downcast_ref::<vk::Result>(), Some(&code));
            assert!(err.to_string().contains("vkAcquireNextImageKHR"));
        }
    }

    #[test]
    fn present_results_are_classified() {
        assert_eq!(classify_present(Ok(false)).unwrap(), PresentStatus::Presented);
        assert_eq!(classify_present(Ok(true)).unwrap(), PresentStatus::Stale);
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            PresentStatus::Stale
        );
        assert!(classify_present(Err(vk::Result::ERROR_DEVICE_LOST)).is_err());
    }
}
