// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::vk;
use prism_render::{
    select_device, EnabledFeatures, FrameOf, QueueAssignment, RenderConfig, RenderSize, Swapchain,
    DEFAULT_IMAGE_COUNT,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::info;

use crate::device::{LogicalDevice, Queue};
use crate::instance::VkInstance;
use crate::physical;
use crate::presenter::VkPresenter;
use crate::surface::{self, SurfaceLayout};

pub type VkFrame = FrameOf<VkPresenter>;

/// Instance, surface, device, queues and swapchain for one window.
///
/// STRICT TEARDOWN ORDER is the field order:
/// 1) swapchain (waits for the device to go idle, then views + handle)
/// 2) device (waits idle, then destroys)
/// 3) instance (surface, debug messenger, instance)
pub struct DeviceContext {
    swapchain: Swapchain<VkPresenter>,
    device: LogicalDevice,
    phys: vk::PhysicalDevice,
    device_name: String,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    queues: QueueAssignment,
    enabled: EnabledFeatures,
    instance: VkInstance,
}

impl DeviceContext {
    pub fn create(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: &RenderConfig,
    ) -> Result<Self> {
        let instance = VkInstance::new(window, display, config)
            .context("Create instance and surface failed")?;

        unsafe {
            let candidates = physical::enumerate_candidates(&instance)
                .context("Enumerate physical devices failed")?;
            let selected = select_device(candidates, &config.features)
                .context("Select physical device failed")?;
            let phys = selected.candidate.handle;

            let device = LogicalDevice::new(&instance.raw, &selected)
                .with_context(|| format!("Create logical device on {} failed", selected.candidate.name))?;

            let layout = surface::select_layout(
                &instance,
                phys,
                &selected.queues,
                config.surface_format,
                config.present_mode,
            )
            .context("Select surface layout failed")?;

            let presenter = VkPresenter::new(&instance, &device, phys, layout, size);
            let swapchain = Swapchain::new(presenter).with_image_count(DEFAULT_IMAGE_COUNT);
            let memory_properties = instance.raw.get_physical_device_memory_properties(phys);

            info!(
                "device context ready on {} ({} feature(s), {} extension(s))",
                selected.candidate.name,
                selected.enabled.features.len(),
                selected.enabled.extensions.len()
            );

            Ok(Self {
                swapchain,
                device,
                phys,
                device_name: selected.candidate.name,
                memory_properties,
                queues: selected.queues,
                enabled: selected.enabled,
                instance,
            })
        }
    }

    /// See [`Swapchain::acquire`]. Out-of-date and suboptimal surfaces are
    /// rebuilt internally; `extent_changed` on the result reports it.
    pub fn acquire(
        &mut self,
        signal: Option<vk::Semaphore>,
        fence: Option<vk::Fence>,
        timeout: u64,
    ) -> Result<VkFrame> {
        self.swapchain.acquire(signal, fence, timeout)
    }

    pub fn present(&mut self, index: u32, wait: Option<vk::Semaphore>) -> Result<()> {
        self.swapchain.present(index, wait)
    }

    pub fn set_size_hint(&mut self, size: RenderSize) {
        self.swapchain.backend_mut().set_size_hint(size);
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance.raw
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.phys
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn device(&self) -> &ash::Device {
        self.device.raw()
    }

    pub fn graphics_queue(&self) -> Queue {
        self.device.graphics
    }

    pub fn compute_queue(&self) -> Queue {
        self.device.compute
    }

    pub fn present_queue(&self) -> Queue {
        self.device.present
    }

    pub fn queue_assignment(&self) -> &QueueAssignment {
        &self.queues
    }

    pub fn enabled_features(&self) -> &EnabledFeatures {
        &self.enabled
    }

    pub fn surface_layout(&self) -> &SurfaceLayout {
        self.swapchain.backend().layout()
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// `None` until the first acquire, and while a rebuild is pending.
    pub fn extent(&self) -> Option<RenderSize> {
        self.swapchain.extent()
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }
}
