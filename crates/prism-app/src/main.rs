// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use prism_core::{init_tracing, log_error_chain};
use prism_render::{RenderConfig, RenderSize, Renderer};
use prism_render_vk::VkRenderer;
use tracing::info;

use prism_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

mod config;

use config::{load_cfg, AppCfg, Overrides};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file; missing means defaults
    #[arg(long, default_value = "prism.toml")]
    config: PathBuf,
    /// Force the validation layer on
    #[arg(long, conflicts_with = "no_validation")]
    validation: bool,
    /// Force the validation layer off
    #[arg(long)]
    no_validation: bool,
    /// Initial window width
    #[arg(long)]
    width: Option<u32>,
    /// Initial window height
    #[arg(long)]
    height: Option<u32>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            validation: match (self.validation, self.no_validation) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            },
            width: self.width,
            height: self.height,
        }
    }
}

struct App {
    cfg: AppCfg,
    render_config: RenderConfig,
    // Dropped before the window it renders into.
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    render_size: RenderSize,

    exiting: bool,
    paused: bool,
    occluded: bool,
    frames: u32,
    last_fps_instant: Instant,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        let render_config = cfg.to_render_config();
        Self {
            cfg,
            render_config,
            renderer: None,
            window: None,
            render_size: RenderSize::default(),
            exiting: false,
            paused: false,
            occluded: false,
            frames: 0,
            last_fps_instant: Instant::now(),
            fatal: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = event_loop
            .create_window(self.cfg.window_config().attributes())
            .context("Create window failed")?;

        let size = window.inner_size();
        self.render_size = RenderSize::new(size.width, size.height);

        let mut renderer = VkRenderer::new(&window, &window, self.render_size, &self.render_config)
            .context("Create Vulkan renderer failed")?;
        renderer.set_clear_color(self.cfg.render.clear_color);

        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        self.record_fatal(err);
        self.shutdown(event_loop);
    }

    /// Keeps the first fatal error for `main` to return. Later ones are
    /// only logged.
    fn record_fatal(&mut self, err: anyhow::Error) {
        if self.fatal.is_some() {
            log_error_chain(&err);
        } else {
            self.fatal = Some(err);
        }
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn update_paused(&mut self, why: &str) {
        let now_paused = self.occluded || self.render_size.is_empty();
        if self.paused != now_paused {
            self.paused = now_paused;
            info!("{why} → paused={}", self.paused);
            if !self.paused {
                if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        }
        self.update_paused("resumed");
        if !self.paused {
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize::new(new_size.width, new_size.height);
                if let Some(renderer) = &mut self.renderer {
                    if let Err(e) = renderer.resize(self.render_size) {
                        self.fail(event_loop, e);
                        return;
                    }
                }
                self.update_paused(&format!("Resized → {}", self.render_size));
            }

            WindowEvent::Occluded(occluded) => {
                self.occluded = occluded;
                self.update_paused(&format!("Occluded={occluded}"));
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }
                let Some(renderer) = &mut self.renderer else {
                    return;
                };
                match renderer.render() {
                    Ok(()) => self.frames = self.frames.saturating_add(1),
                    Err(e) => self.fail(event_loop, e.context("Render frame failed")),
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        if self.paused {
            // window-size=0 or occluded → sleep
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing("info");
    let args = Args::parse();

    let mut cfg = load_cfg(&args.config)?;
    cfg.apply(args.overrides());

    let event_loop: EventLoop<()> = EventLoop::new().context("Create event loop failed")?;
    let mut app = App::new(cfg);
    event_loop.run_app(&mut app).context("Event loop failed")?;

    match app.fatal.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_flags_map_to_overrides() {
        let args = Args::try_parse_from(["prism"]).unwrap();
        assert_eq!(args.config, PathBuf::from("prism.toml"));
        assert_eq!(args.overrides().validation, None);

        let args = Args::try_parse_from(["prism", "--no-validation", "--width", "640"]).unwrap();
        assert_eq!(args.overrides().validation, Some(false));
        assert_eq!(args.overrides().width, Some(640));

        let args = Args::try_parse_from(["prism", "--validation"]).unwrap();
        assert_eq!(args.overrides().validation, Some(true));
    }

    #[test]
    fn conflicting_validation_flags_are_rejected() {
        assert!(Args::try_parse_from(["prism", "--validation", "--no-validation"]).is_err());
    }

    #[test]
    fn first_fatal_error_is_kept_for_main() {
        let mut app = App::new(AppCfg::default());
        assert!(app.fatal.is_none());

        app.record_fatal(anyhow::anyhow!("Create Vulkan renderer failed"));
        app.record_fatal(anyhow::anyhow!("Render frame failed"));

        let kept = app.fatal.take().unwrap();
        assert_eq!(kept.to_string(), "Create Vulkan renderer failed");
    }
}
