//! Hello Triangle - Main Entry Point
//!
//! Opens a window, draws one triangle every frame and keeps the swapchain in
//! step with the window until it is closed.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::WindowId;

use triangle_core::{AppConfig, FpsCounter, ShaderPaths, Timer, WindowConfig};
use triangle_platform::Window;
use triangle_renderer::{FrameManager, FrameOutcome, FramebufferSource, Renderer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum LogLevel {
    Off,
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "triangle", version, about = "Draws a triangle with Vulkan")]
struct Cli {
    /// Initial window width in pixels
    #[arg(long)]
    width: Option<u32>,
    /// Initial window height in pixels
    #[arg(long)]
    height: Option<u32>,
    /// Window title
    #[arg(long)]
    title: Option<String>,
    /// Directory holding vert.spv and frag.spv
    #[arg(long)]
    shader_dir: Option<PathBuf>,
    /// Enable the Khronos validation layer (default in debug builds)
    #[arg(long, overrides_with = "no_validation")]
    validation: bool,
    /// Disable the Khronos validation layer
    #[arg(long, overrides_with = "validation")]
    no_validation: bool,
    /// Log level used when RUST_LOG is not set
    #[arg(long, value_enum, default_value_t)]
    log_level: LogLevel,
}

impl Cli {
    fn into_config(self) -> AppConfig {
        let mut config = AppConfig::default();
        if let Some(width) = self.width {
            config.window.width = width;
        }
        if let Some(height) = self.height {
            config.window.height = height;
        }
        if let Some(title) = self.title {
            config.window.title = title;
        }
        if let Some(dir) = self.shader_dir {
            config.shaders = ShaderPaths::in_dir(dir);
        }
        if self.validation {
            config.validation = true;
        } else if self.no_validation {
            config.validation = false;
        }
        config.log_level = self.log_level.as_str().to_string();
        config
    }
}

/// Window state fed by winit callbacks.
struct App {
    window_config: WindowConfig,
    window: Option<Window>,
    resized: bool,
    close_requested: bool,
    error: Option<triangle_core::Error>,
}

impl App {
    fn new(window_config: WindowConfig) -> Self {
        Self {
            window_config,
            window: None,
            resized: false,
            close_requested: false,
            error: None,
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        match Window::new(event_loop, &self.window_config) {
            Ok(window) => self.window = Some(window),
            Err(e) => {
                self.error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                self.close_requested = true;
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                debug!("Window resized to {}x{}", size.width, size.height);
                self.resized = true;
            }
            _ => {}
        }
    }
}

/// Drives winit between frames and serves the window to the frame loop.
struct EventPump<'a> {
    event_loop: &'a mut EventLoop<()>,
    app: &'a mut App,
    exited: bool,
}

impl<'a> EventPump<'a> {
    fn new(event_loop: &'a mut EventLoop<()>, app: &'a mut App) -> Self {
        Self {
            event_loop,
            app,
            exited: false,
        }
    }

    /// Dispatches pending events, blocking up to `timeout` (forever for
    /// `None`). Returns `false` once the application should stop.
    fn pump(&mut self, timeout: Option<Duration>) -> bool {
        if let PumpStatus::Exit(code) = self.event_loop.pump_app_events(timeout, &mut *self.app) {
            debug!("Event loop exited with code {}", code);
            self.exited = true;
        }
        !self.exited && !self.app.close_requested
    }
}

impl FramebufferSource for EventPump<'_> {
    fn framebuffer_size(&self) -> (u32, u32) {
        self.app
            .window
            .as_ref()
            .map_or((0, 0), Window::framebuffer_size)
    }

    fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.app.resized)
    }

    fn wait_events(&mut self) -> bool {
        self.pump(None)
    }
}

fn render_loop(
    frames: &mut FrameManager,
    renderer: &mut Renderer,
    pump: &mut EventPump<'_>,
) -> Result<u64> {
    let mut fps = FpsCounter::new(Duration::from_secs(1));
    let mut presented = 0u64;

    while pump.pump(Some(Duration::ZERO)) {
        match frames
            .draw_frame(renderer, pump)
            .context("frame rendering failed")?
        {
            FrameOutcome::Presented => {
                presented += 1;
                if let Some(stats) = fps.frame() {
                    debug!(
                        "{:.1} fps ({:.2} ms/frame, {} frames)",
                        stats.fps, stats.avg_frame_ms, stats.frames
                    );
                }
            }
            FrameOutcome::Recreated => {}
            FrameOutcome::Closing => break,
        }
    }

    Ok(presented)
}

fn run(config: AppConfig) -> Result<()> {
    config.validate().context("invalid configuration")?;
    triangle_core::init_logging(&config.log_level).context("failed to initialize logging")?;

    info!("Starting Hello Triangle");
    let timer = Timer::new();

    let mut event_loop = EventLoop::new().context("failed to create event loop")?;
    let mut app = App::new(config.window.clone());

    while app.window.is_none() {
        let status = event_loop.pump_app_events(Some(Duration::ZERO), &mut app);
        if let Some(e) = app.error.take() {
            return Err(e).context("failed to create window");
        }
        if let PumpStatus::Exit(_) = status {
            info!("Event loop exited before the window opened");
            return Ok(());
        }
    }

    let window = app
        .window
        .as_ref()
        .context("window missing after start-up")?;
    let mut renderer = Renderer::new(window, &config).context("failed to initialize Vulkan")?;
    let mut frames = FrameManager::new();

    info!("Initialization complete, entering main loop");

    let mut pump = EventPump::new(&mut event_loop, &mut app);
    let presented = render_loop(&mut frames, &mut renderer, &mut pump)?;

    info!(
        "Presented {} frames in {:.1}s with {} swapchain recreation(s)",
        presented,
        timer.elapsed().as_secs_f64(),
        frames.recreations()
    );

    Ok(())
}

fn main() -> ExitCode {
    let config = Cli::parse().into_config();

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use clap::CommandFactory;

    use super::*;

    fn parse(args: &[&str]) -> AppConfig {
        Cli::try_parse_from(std::iter::once("triangle").chain(args.iter().copied()))
            .unwrap()
            .into_config()
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_args_gives_defaults() {
        assert_eq!(parse(&[]), AppConfig::default());
    }

    #[test]
    fn test_window_overrides() {
        let config = parse(&["--width", "1280", "--height", "720", "--title", "tri"]);
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.window.title, "tri");
    }

    #[test]
    fn test_shader_dir() {
        let config = parse(&["--shader-dir", "build/spv"]);
        assert_eq!(config.shaders.vertex, Path::new("build/spv/vert.spv"));
        assert_eq!(config.shaders.fragment, Path::new("build/spv/frag.spv"));
    }

    #[test]
    fn test_validation_flags() {
        assert!(parse(&["--validation"]).validation);
        assert!(!parse(&["--no-validation"]).validation);
        // The last flag wins.
        assert!(parse(&["--no-validation", "--validation"]).validation);
        assert!(!parse(&["--validation", "--no-validation"]).validation);
    }

    #[test]
    fn test_log_level() {
        assert_eq!(parse(&["--log-level", "debug"]).log_level, "debug");
        assert!(Cli::try_parse_from(["triangle", "--log-level", "loud"]).is_err());
    }

    #[test]
    fn test_zero_width_fails_validation() {
        assert!(parse(&["--width", "0"]).validate().is_err());
    }
}
