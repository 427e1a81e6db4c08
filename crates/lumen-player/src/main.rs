mod app;
mod config;
mod decode;
mod driver;
mod gpu;
mod handoff;
mod logging;
mod media;
mod render;
mod stats;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Fullscreen, Window, WindowAttributes, WindowId};

use app::App;
use config::{Cli, Config, Settings};
use driver::{DriverAction, DriverState, InputEvent, LifecycleEvent};

struct LumenApp {
    app: App,
    window: Option<Arc<Window>>,
}

impl LumenApp {
    fn new(app: App) -> Self {
        Self { app, window: None }
    }

    fn dispatch(&mut self, event_loop: &ActiveEventLoop, event: LifecycleEvent) {
        let action = self.app.handle(event);
        self.apply(event_loop, action);
    }

    fn apply(&mut self, event_loop: &ActiveEventLoop, action: DriverAction) {
        match action {
            DriverAction::RequestRedraw => {
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            DriverAction::ToggleFullscreen => {
                if let Some(window) = &self.window {
                    if window.fullscreen().is_some() {
                        window.set_fullscreen(None);
                    } else {
                        window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                    }
                }
            }
            DriverAction::Exit => {
                self.save_settings();
                event_loop.exit();
                return;
            }
            DriverAction::None => {}
        }

        // Redraws drive presentation; otherwise sleep until the next event
        event_loop.set_control_flow(match self.app.state() {
            DriverState::Presenting => ControlFlow::Poll,
            _ => ControlFlow::Wait,
        });
    }

    fn save_settings(&self) {
        let (size, fullscreen) = match &self.window {
            Some(w) => {
                let size = w.inner_size();
                let fullscreen = w.fullscreen().is_some();
                // Keep the windowed size when leaving from fullscreen
                let size = (!fullscreen).then_some((size.width, size.height));
                (size, fullscreen)
            }
            None => (None, self.app.config.fullscreen),
        };
        if let Err(e) = self.app.settings(size, fullscreen).save() {
            log::warn!("Failed to save settings: {e}");
        }
    }
}

impl ApplicationHandler for LumenApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            let (w, h) = self.app.config.window_size;
            let mut attrs = WindowAttributes::default()
                .with_title("Lumen")
                .with_inner_size(winit::dpi::PhysicalSize::new(w, h));
            if self.app.config.fullscreen {
                attrs = attrs.with_fullscreen(Some(Fullscreen::Borderless(None)));
            }

            let window = match event_loop.create_window(attrs) {
                Ok(window) => Arc::new(window),
                Err(e) => {
                    log::error!("Failed to create window: {e}");
                    self.dispatch(event_loop, LifecycleEvent::AppDestroyed);
                    return;
                }
            };
            self.app.attach_window(window.clone());
            self.window = Some(window);
        }

        // A new surface on every resume; the decoder is already running
        self.dispatch(event_loop, LifecycleEvent::SurfaceCreated);
    }

    fn suspended(&mut self, event_loop: &ActiveEventLoop) {
        self.dispatch(event_loop, LifecycleEvent::SurfaceDestroyed);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                self.dispatch(event_loop, LifecycleEvent::AppDestroyed);
            }
            WindowEvent::Resized(size) => {
                self.dispatch(
                    event_loop,
                    LifecycleEvent::SurfaceResized {
                        width: size.width,
                        height: size.height,
                    },
                );
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => {
                let input = match key {
                    KeyCode::Space => InputEvent::TogglePause,
                    KeyCode::KeyF => InputEvent::ToggleFullscreen,
                    KeyCode::Escape => InputEvent::Quit,
                    _ => return,
                };
                self.dispatch(event_loop, LifecycleEvent::Input(input));
            }
            WindowEvent::RedrawRequested => {
                self.dispatch(event_loop, LifecycleEvent::RedrawRequested);
                if let (Some(window), Some(title)) = (&self.window, self.app.title(Instant::now()))
                {
                    window.set_title(&title);
                }
            }
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.app.shutdown();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let settings = Settings::load();
    let config = Config::resolve(cli, &settings)?;
    log::info!("Playing {}", config.source);

    let app = App::new(config)?;

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut lumen = LumenApp::new(app);
    event_loop.run_app(&mut lumen)?;

    Ok(())
}
