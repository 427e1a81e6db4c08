use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use winit::window::Window;

use crate::config::{Config, Settings};
use crate::decode::{self, DecoderOptions, DecoderTask, OpenOptions};
use crate::driver::{Driver, DriverAction, DriverState, LifecycleEvent, SurfaceProvider};
use crate::handoff;
use crate::render::{FrameRenderer, RenderTask};

const TITLE_REFRESH: Duration = Duration::from_millis(500);

/// Builds a `FrameRenderer` for the current window whenever a surface appears.
#[derive(Default)]
pub struct WindowSurfaces {
    window: Option<Arc<Window>>,
}

impl SurfaceProvider for WindowSurfaces {
    type Presenter = FrameRenderer;

    fn create(&mut self) -> Result<FrameRenderer> {
        let window = self.window.clone().context("no window to present to")?;
        let size = window.inner_size();
        let mut renderer = FrameRenderer::new(window)?;
        renderer.resize(size.width, size.height);
        Ok(renderer)
    }

    fn resize(&mut self, presenter: &mut FrameRenderer, width: u32, height: u32) {
        presenter.resize(width, height);
    }

    fn reconfigure(&mut self, presenter: &mut FrameRenderer) {
        presenter.recover();
    }
}

/// Everything one playback session owns.
pub struct App {
    pub config: Config,
    source_name: String,
    driver: Driver<WindowSurfaces>,
    last_title: Option<Instant>,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        let open = OpenOptions {
            stream_index: config.stream_index,
            decode_format: Some(config.decode_format),
            target_size: config.target_size,
        };
        let source = decode::open_source(&config.source, &open)
            .with_context(|| format!("opening {}", config.source))?;

        let (publisher, subscriber) = handoff::slot();
        let options = DecoderOptions {
            pace: config.pace,
            target_size: config.target_size,
            ..Default::default()
        };
        let decoder = DecoderTask::spawn(source, publisher, options)
            .context("spawning decoder thread")?;
        let source_name = decoder.info().name.clone();
        let render = RenderTask::new(subscriber, config.frame_wait);

        Ok(Self {
            config,
            source_name,
            driver: Driver::new(WindowSurfaces::default(), render, decoder),
            last_title: None,
        })
    }

    /// The window outlives surfaces; it is attached once.
    pub fn attach_window(&mut self, window: Arc<Window>) {
        self.driver.provider_mut().window = Some(window);
    }

    pub fn handle(&mut self, event: LifecycleEvent) -> DriverAction {
        self.driver.handle(event)
    }

    pub fn state(&self) -> DriverState {
        self.driver.state()
    }

    /// Window title with live stats, refreshed at most twice a second.
    pub fn title(&mut self, now: Instant) -> Option<String> {
        if self
            .last_title
            .is_some_and(|t| now.saturating_duration_since(t) < TITLE_REFRESH)
        {
            return None;
        }
        self.last_title = Some(now);
        let mut title = match self.driver.stats() {
            Some(stats) => stats.title(&self.source_name),
            None => self.source_name.clone(),
        };
        match self.driver.state() {
            DriverState::Paused => title.push_str(" [paused]"),
            DriverState::Failed => title.push_str(" [stopped]"),
            _ => {}
        }
        Some(format!("Lumen: {title}"))
    }

    pub fn shutdown(&mut self) {
        self.driver.shutdown();
    }

    /// Settings to persist for the next run.
    pub fn settings(&self, window_size: Option<(u32, u32)>, fullscreen: bool) -> Settings {
        Settings {
            window_size: window_size.unwrap_or(self.config.window_size),
            last_source: Some(self.config.source.clone()),
            frame_wait_ms: self.config.frame_wait.as_millis() as u64,
            fullscreen,
            ..Settings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(source: &str) -> Config {
        Config {
            source: source.into(),
            target_size: None,
            stream_index: 0,
            decode_format: crate::media::PixelFormat::Rgba8,
            frame_wait: Duration::from_millis(2),
            pace: true,
            window_size: (640, 360),
            fullscreen: false,
            verbose: false,
        }
    }

    #[test]
    fn builds_session_from_pattern_source() {
        let mut app = App::new(config("pattern:64x32@30")).unwrap();
        assert_eq!(app.state(), DriverState::Idle);

        let now = Instant::now();
        let title = app.title(now).unwrap();
        assert!(title.starts_with("Lumen: pattern 64x32@30"));
        // Throttled
        assert!(app.title(now + Duration::from_millis(10)).is_none());

        app.shutdown();
        assert_eq!(app.state(), DriverState::Destroyed);
    }

    #[test]
    fn surface_without_window_exits() {
        let mut app = App::new(config("pattern:")).unwrap();
        assert_eq!(app.handle(LifecycleEvent::SurfaceCreated), DriverAction::Exit);
    }

    #[test]
    fn unknown_source_reports_context() {
        let err = App::new(config("camera:x")).err().unwrap();
        assert!(format!("{err:#}").starts_with("opening camera:x"));
    }

    #[test]
    fn remembers_source_for_next_run() {
        let app = App::new(config("pattern:")).unwrap();
        let settings = app.settings(Some((800, 600)), true);
        assert_eq!(settings.last_source.as_deref(), Some("pattern:"));
        assert_eq!(settings.window_size, (800, 600));
        assert_eq!(settings.frame_wait_ms, 2);
        assert!(settings.fullscreen);
    }
}
