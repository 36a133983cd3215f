// SPDX-License-Identifier: CEPL-1.0
use std::fmt;

use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

pub mod candidate;
pub mod cycle;
pub mod features;
pub mod queues;
pub mod select;
pub mod swapchain;

pub use candidate::{DeviceCandidate, DeviceKind, QueueCaps, QueueFamilyInfo};
pub use cycle::Cycle;
pub use features::{ApiVersion, EnabledFeatures, Feature, FeatureBlock, FeatureRequest, FeatureSet};
pub use queues::{ImageSharing, QueueAssignment};
pub use select::{select_device, RejectReason, RejectedDevice, SelectedDevice, SelectionError};
pub use swapchain::{
    clamp_image_count, AcquireStatus, Frame, FrameOf, PresentBackend, PresentStatus,
    SurfaceCapabilities, Swapchain, SwapchainDesc, SwapchainError, DEFAULT_IMAGE_COUNT,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for RenderSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentModePreference {
    /// Mailbox, then relaxed FIFO, then FIFO.
    #[default]
    LowLatency,
    Fifo,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SurfaceFormatPreference {
    #[default]
    Srgb,
    Linear,
}

/// Everything a renderer needs at construction besides the window.
#[derive(Clone, Debug)]
pub struct RenderConfig {
    pub app_name: String,
    pub app_version: (u32, u32, u32),
    pub engine_name: String,
    pub engine_version: (u32, u32, u32),
    pub features: FeatureRequest,
    /// Frame slots in the ring, at least 1.
    pub frames_in_flight: usize,
    pub present_mode: PresentModePreference,
    pub surface_format: SurfaceFormatPreference,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            app_name: "Prism".to_string(),
            app_version: (0, 1, 0),
            engine_name: "prism".to_string(),
            engine_version: (0, 1, 0),
            features: FeatureRequest::default(),
            frames_in_flight: 3,
            present_mode: PresentModePreference::default(),
            surface_format: SurfaceFormatPreference::default(),
        }
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: &RenderConfig,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Window size notification. Only decides whether to skip frames; the
    /// surface's own extent drives swapchain rebuilds.
    fn resize(&mut self, size: RenderSize) -> Result<()>;
    fn render(&mut self) -> Result<()>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
}
