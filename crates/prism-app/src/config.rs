// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use prism_platform::WindowConfig;
use prism_render::{
    Feature, FeatureRequest, PresentModePreference, RenderConfig, SurfaceFormatPreference,
};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub app: AppInfoCfg,
    pub render: RenderCfg,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
    pub fullscreen: bool,
}

impl Default for WindowCfg {
    fn default() -> Self {
        let w = WindowConfig::default();
        Self {
            title: w.title,
            width: w.width,
            height: w.height,
            resizable: w.resizable,
            fullscreen: w.fullscreen,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct AppInfoCfg {
    pub name: String,
    /// major, minor, patch
    pub version: [u32; 3],
}

impl Default for AppInfoCfg {
    fn default() -> Self {
        Self {
            name: "Prism".to_string(),
            version: [0, 1, 0],
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeCfg {
    #[default]
    LowLatency,
    Fifo,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceFormatCfg {
    #[default]
    Srgb,
    Linear,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub frames_in_flight: usize,
    pub present_mode: PresentModeCfg,
    pub surface_format: SurfaceFormatCfg,
    pub validation: bool,
    pub features: FeaturesCfg,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            frames_in_flight: 3,
            present_mode: PresentModeCfg::LowLatency,
            surface_format: SurfaceFormatCfg::Srgb,
            validation: cfg!(debug_assertions),
            features: FeaturesCfg::default(),
        }
    }
}

/// Optional hardware features; all on by default.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct FeaturesCfg {
    pub sampler_anisotropy: bool,
    pub texture_compression_bc: bool,
    pub pipeline_statistics_query: bool,
    pub shader_float16: bool,
    pub require_hardware_acceleration: bool,
}

impl Default for FeaturesCfg {
    fn default() -> Self {
        Self {
            sampler_anisotropy: true,
            texture_compression_bc: true,
            pipeline_statistics_query: true,
            shader_float16: true,
            require_hardware_acceleration: true,
        }
    }
}

impl FeaturesCfg {
    fn request(&self, validation: bool) -> FeatureRequest {
        let toggles = [
            (self.sampler_anisotropy, Feature::SAMPLER_ANISOTROPY),
            (self.texture_compression_bc, Feature::TEXTURE_COMPRESSION_BC),
            (self.pipeline_statistics_query, Feature::PIPELINE_STATISTICS_QUERY),
            (self.shader_float16, Feature::SHADER_FLOAT16),
        ];
        toggles
            .into_iter()
            .filter(|(on, _)| !on)
            .fold(FeatureRequest::default(), |req, (_, f)| req.without_feature(f))
            .with_validation(validation)
            .with_hardware_acceleration(self.require_hardware_acceleration)
    }
}

fn default_clear() -> [f32; 4] {
    [0.02, 0.02, 0.04, 1.0]
}

/// Command-line values that win over the file.
#[derive(Debug, Default, Clone, Copy)]
pub struct Overrides {
    pub validation: Option<bool>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// A missing file yields defaults; an unreadable or malformed one is an error.
pub fn load_cfg(path: &Path) -> Result<AppCfg> {
    let text = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("{} not found, using defaults", path.display());
            return Ok(AppCfg::default());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Read config {} failed", path.display()))
        }
    };
    let cfg = toml::from_str::<AppCfg>(&text)
        .with_context(|| format!("Parse config {} failed", path.display()))?;
    info!("loaded config from {}", path.display());
    Ok(cfg)
}

impl AppCfg {
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(v) = overrides.validation {
            self.render.validation = v;
        }
        if let Some(w) = overrides.width {
            self.window.width = w;
        }
        if let Some(h) = overrides.height {
            self.window.height = h;
        }
    }

    pub fn window_config(&self) -> WindowConfig {
        WindowConfig {
            title: self.window.title.clone(),
            width: self.window.width,
            height: self.window.height,
            resizable: self.window.resizable,
            fullscreen: self.window.fullscreen,
        }
    }

    pub fn to_render_config(&self) -> RenderConfig {
        let [major, minor, patch] = self.app.version;
        RenderConfig {
            app_name: self.app.name.clone(),
            app_version: (major, minor, patch),
            features: self.render.features.request(self.render.validation),
            frames_in_flight: self.render.frames_in_flight.max(1),
            present_mode: match self.render.present_mode {
                PresentModeCfg::LowLatency => PresentModePreference::LowLatency,
                PresentModeCfg::Fifo => PresentModePreference::Fifo,
            },
            surface_format: match self.render.surface_format {
                SurfaceFormatCfg::Srgb => SurfaceFormatPreference::Srgb,
                SurfaceFormatCfg::Linear => SurfaceFormatPreference::Linear,
            },
            ..RenderConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg: AppCfg = toml::from_str("").unwrap();
        assert_eq!(cfg, AppCfg::default());
        assert_eq!(cfg.window.title, "Prism");
        assert_eq!((cfg.window.width, cfg.window.height), (800, 600));
        assert_eq!(cfg.render.frames_in_flight, 3);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let cfg: AppCfg = toml::from_str(
            r#"
            [window]
            title = "demo"

            [render]
            present_mode = "fifo"
            surface_format = "linear"

            [render.features]
            shader_float16 = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.window.title, "demo");
        assert_eq!(cfg.window.width, 800);
        assert_eq!(cfg.render.present_mode, PresentModeCfg::Fifo);
        assert_eq!(cfg.render.clear_color, default_clear());
        assert!(!cfg.render.features.shader_float16);
        assert!(cfg.render.features.sampler_anisotropy);

        let rc = cfg.to_render_config();
        assert_eq!(rc.present_mode, PresentModePreference::Fifo);
        assert_eq!(rc.surface_format, SurfaceFormatPreference::Linear);
        assert!(!rc.features.features().contains(&Feature::SHADER_FLOAT16));
        assert!(rc.features.features().contains(&Feature::DYNAMIC_RENDERING));
    }

    #[test]
    fn render_config_carries_app_identity_and_toggles() {
        let mut cfg = AppCfg::default();
        cfg.app.name = "viewer".into();
        cfg.app.version = [2, 3, 4];
        cfg.render.frames_in_flight = 0;
        cfg.render.features.require_hardware_acceleration = false;
        cfg.apply(Overrides {
            validation: Some(true),
            width: Some(1024),
            height: None,
        });

        let rc = cfg.to_render_config();
        assert_eq!(rc.app_name, "viewer");
        assert_eq!(rc.app_version, (2, 3, 4));
        assert_eq!(rc.frames_in_flight, 1);
        assert!(rc.features.validation());
        assert!(!rc.features.requires_hardware_acceleration());
        assert_eq!(cfg.window_config().width, 1024);
        assert_eq!(cfg.window_config().height, 600);
    }

    #[test]
    fn missing_file_is_defaults_but_bad_toml_is_an_error() {
        let dir = std::env::temp_dir().join(format!("prism-cfg-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let missing = dir.join("absent.toml");
        assert_eq!(load_cfg(&missing).unwrap(), AppCfg::default());

        let bad = dir.join("bad.toml");
        fs::write(&bad, "[window\ntitle = 3").unwrap();
        let err = load_cfg(&bad).unwrap_err();
        assert!(err.to_string().starts_with("Parse config"));

        fs::remove_dir_all(&dir).unwrap();
    }
}
