// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
pub use winit;

use tracing::debug;
use winit::dpi::LogicalSize;
use winit::window::{Fullscreen, WindowAttributes};

/// Initial window setup. Size is in logical pixels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Prism".to_string(),
            width: 800,
            height: 600,
            resizable: true,
            fullscreen: false,
        }
    }
}

impl WindowConfig {
    pub fn attributes(&self) -> WindowAttributes {
        debug!(
            "window attributes: \"{}\" {}x{} resizable={} fullscreen={}",
            self.title, self.width, self.height, self.resizable, self.fullscreen
        );
        let attrs = WindowAttributes::default()
            .with_title(self.title.clone())
            .with_inner_size(LogicalSize::new(self.width.max(1), self.height.max(1)))
            .with_resizable(self.resizable);
        if self.fullscreen {
            // Borderless on whichever monitor the window lands on.
            attrs.with_fullscreen(Some(Fullscreen::Borderless(None)))
        } else {
            attrs
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_follow_config() {
        let cfg = WindowConfig {
            title: "demo".into(),
            width: 1024,
            height: 0,
            resizable: false,
            fullscreen: true,
        };
        let attrs = cfg.attributes();
        assert_eq!(attrs.title, "demo");
        assert!(!attrs.resizable);
        assert!(attrs.fullscreen.is_some());
        assert_eq!(
            attrs.inner_size,
            Some(LogicalSize::new(1024u32, 1u32).into())
        );
    }

    #[test]
    fn windowed_by_default() {
        let attrs = WindowConfig::default().attributes();
        assert!(attrs.fullscreen.is_none());
        assert!(attrs.resizable);
    }
}
