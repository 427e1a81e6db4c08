//! Presentation driver: turns platform lifecycle events into render work.
//!
//! The driver owns the render state (created per surface), the render task
//! (the slot's consumer) and the decoder handle. Surface churn only ever
//! touches the render state; the decoder keeps running across it.

use std::time::Instant;

use crate::decode::{DecoderEvent, DecoderHandle};
use crate::render::{FramePresenter, PresentError, RenderTask, TickOutcome};
use crate::stats::{PlaybackStats, StatsSnapshot};

/// Every event the platform binding forwards to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    SurfaceCreated,
    SurfaceResized { width: u32, height: u32 },
    SurfaceDestroyed,
    RedrawRequested,
    Input(InputEvent),
    AppDestroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    TogglePause,
    ToggleFullscreen,
    Quit,
}

/// What the binding should do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverAction {
    /// Schedule another `RedrawRequested`.
    RequestRedraw,
    ToggleFullscreen,
    Exit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// No surface to draw on.
    Idle,
    Presenting,
    Paused,
    /// Decoding failed. The last frame stays on screen.
    Failed,
    Destroyed,
}

/// Creates and maintains per-surface render state.
pub trait SurfaceProvider {
    type Presenter: FramePresenter;

    fn create(&mut self) -> anyhow::Result<Self::Presenter>;

    fn resize(&mut self, presenter: &mut Self::Presenter, width: u32, height: u32);

    /// Reconfigure after the surface went out of date.
    fn reconfigure(&mut self, presenter: &mut Self::Presenter);
}

pub struct Driver<P: SurfaceProvider> {
    provider: P,
    presenter: Option<P::Presenter>,
    render: Option<RenderTask>,
    decoder: Option<DecoderHandle>,
    state: DriverState,
    paused: bool,
    surface_size: Option<(u32, u32)>,
    stats: PlaybackStats,
}

impl<P: SurfaceProvider> Driver<P> {
    pub fn new(provider: P, render: RenderTask, decoder: DecoderHandle) -> Self {
        Self {
            provider,
            presenter: None,
            render: Some(render),
            decoder: Some(decoder),
            state: DriverState::Idle,
            paused: false,
            surface_size: None,
            stats: PlaybackStats::new(Instant::now()),
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    pub fn has_surface(&self) -> bool {
        self.presenter.is_some()
    }

    pub fn decoder(&self) -> Option<&DecoderHandle> {
        self.decoder.as_ref()
    }

    pub fn stats(&self) -> Option<StatsSnapshot> {
        let render = self.render.as_ref()?;
        let decoder = self.decoder.as_ref()?;
        Some(self.stats.snapshot(render.slot_stats(), decoder.stats()))
    }

    /// Single entry point for platform events.
    pub fn handle(&mut self, event: LifecycleEvent) -> DriverAction {
        if self.state == DriverState::Destroyed {
            return match event {
                LifecycleEvent::AppDestroyed | LifecycleEvent::Input(InputEvent::Quit) => {
                    DriverAction::Exit
                }
                _ => DriverAction::None,
            };
        }

        match event {
            LifecycleEvent::SurfaceCreated => self.surface_created(),
            LifecycleEvent::SurfaceResized { width, height } => self.surface_resized(width, height),
            LifecycleEvent::SurfaceDestroyed => self.surface_destroyed(),
            LifecycleEvent::RedrawRequested => self.redraw(),
            LifecycleEvent::Input(InputEvent::TogglePause) => self.toggle_pause(),
            LifecycleEvent::Input(InputEvent::ToggleFullscreen) => DriverAction::ToggleFullscreen,
            LifecycleEvent::Input(InputEvent::Quit) | LifecycleEvent::AppDestroyed => {
                self.shutdown();
                DriverAction::Exit
            }
        }
    }

    fn surface_created(&mut self) -> DriverAction {
        if self.presenter.is_none() {
            match self.create_presenter() {
                Ok(presenter) => self.presenter = Some(presenter),
                Err(e) => {
                    log::error!("Failed to create render state: {e:#}");
                    self.shutdown();
                    return DriverAction::Exit;
                }
            }
        }

        if self.state == DriverState::Failed {
            // One draw so the window is not left with garbage
            self.draw_only();
            return DriverAction::None;
        }
        self.state = if self.paused {
            DriverState::Paused
        } else {
            DriverState::Presenting
        };
        log::debug!("Surface created, state {:?}", self.state);
        DriverAction::RequestRedraw
    }

    fn create_presenter(&mut self) -> anyhow::Result<P::Presenter> {
        let mut presenter = self.provider.create()?;
        if let Some((w, h)) = self.surface_size {
            self.provider.resize(&mut presenter, w, h);
        }
        Ok(presenter)
    }

    fn surface_resized(&mut self, width: u32, height: u32) -> DriverAction {
        self.surface_size = Some((width, height));
        let Some(presenter) = self.presenter.as_mut() else {
            return DriverAction::None;
        };
        self.provider.resize(presenter, width, height);
        match self.state {
            DriverState::Presenting | DriverState::Paused => DriverAction::RequestRedraw,
            _ => DriverAction::None,
        }
    }

    fn surface_destroyed(&mut self) -> DriverAction {
        self.presenter = None;
        if matches!(self.state, DriverState::Presenting | DriverState::Paused) {
            self.state = DriverState::Idle;
        }
        log::debug!("Surface destroyed, decoder left running");
        DriverAction::None
    }

    fn toggle_pause(&mut self) -> DriverAction {
        self.paused = !self.paused;
        log::info!("{}", if self.paused { "Paused" } else { "Resumed" });
        match self.state {
            DriverState::Presenting if self.paused => {
                self.state = DriverState::Paused;
                DriverAction::None
            }
            DriverState::Paused if !self.paused => {
                self.state = DriverState::Presenting;
                DriverAction::RequestRedraw
            }
            _ => DriverAction::None,
        }
    }

    /// Returns true if the decoder has failed.
    fn poll_decoder(&mut self) -> bool {
        let Some(decoder) = self.decoder.as_mut() else {
            return false;
        };
        let mut failed = false;
        for event in decoder.poll_events() {
            match event {
                DecoderEvent::Started(info) => log::debug!("Decoding {}", info.name),
                DecoderEvent::Looped { count } => log::debug!("Source looped ({count})"),
                DecoderEvent::Failed(failure) => {
                    log::error!("Playback stopped: {failure}");
                    failed = true;
                }
                DecoderEvent::Stopped => {}
            }
        }
        failed
    }

    fn redraw(&mut self) -> DriverAction {
        if self.poll_decoder() {
            self.state = DriverState::Failed;
        }

        match self.state {
            DriverState::Presenting => self.tick(),
            DriverState::Paused | DriverState::Failed => {
                self.draw_only();
                DriverAction::None
            }
            DriverState::Idle | DriverState::Destroyed => DriverAction::None,
        }
    }

    fn tick(&mut self) -> DriverAction {
        let (Some(render), Some(presenter)) = (self.render.as_mut(), self.presenter.as_mut())
        else {
            return DriverAction::None;
        };

        let now = Instant::now();
        match render.tick(presenter) {
            Ok(outcome) => {
                self.stats.record(outcome, now);
                if let (TickOutcome::Presented { .. }, Some(snapshot)) = (outcome, self.stats()) {
                    self.stats.maybe_log(now, &snapshot);
                }
                DriverAction::RequestRedraw
            }
            Err(e) => self.present_failed(e),
        }
    }

    fn draw_only(&mut self) {
        let (Some(render), Some(presenter)) = (self.render.as_ref(), self.presenter.as_mut())
        else {
            return;
        };
        if let Err(e) = render.redraw(presenter) {
            if e.is_recoverable() {
                self.recover(&e);
            } else {
                log::warn!("Redraw failed: {e}");
            }
        }
    }

    /// Presentation-only recovery. The decoder and slot are not touched.
    fn present_failed(&mut self, error: PresentError) -> DriverAction {
        match error {
            PresentError::SurfaceLost | PresentError::Outdated => {
                self.recover(&error);
                DriverAction::RequestRedraw
            }
            PresentError::OutOfMemory => {
                log::error!("GPU out of memory, exiting");
                self.shutdown();
                DriverAction::Exit
            }
            PresentError::Other(reason) => {
                log::warn!("Present failed: {reason}");
                DriverAction::RequestRedraw
            }
        }
    }

    fn recover(&mut self, error: &PresentError) {
        log::warn!("{error}, rebuilding render state");
        match error {
            PresentError::Outdated => {
                if let Some(presenter) = self.presenter.as_mut() {
                    self.provider.reconfigure(presenter);
                }
            }
            _ => {
                self.presenter = None;
                match self.create_presenter() {
                    Ok(presenter) => self.presenter = Some(presenter),
                    Err(e) => {
                        log::error!("Failed to rebuild render state: {e:#}");
                        self.state = DriverState::Idle;
                    }
                }
            }
        }
    }

    /// Tear down in dependency order: render state, decoder, then the slot.
    pub fn shutdown(&mut self) {
        if self.state == DriverState::Destroyed {
            return;
        }
        self.presenter = None;
        if let Some(mut decoder) = self.decoder.take() {
            decoder.stop();
        }
        self.render = None;
        self.state = DriverState::Destroyed;
        log::info!("Playback shut down");
    }
}

impl<P: SurfaceProvider> Drop for Driver<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    use super::*;
    use crate::decode::{
        DecoderOptions, DecoderTask, FrameSource, PatternOptions, PatternSource, SourceError,
        SourceInfo,
    };
    use crate::handoff::slot;
    use crate::media::Frame;
    use crate::render::tests::RecordingPresenter;

    #[derive(Default)]
    struct Log {
        created: usize,
        resized: Vec<(u32, u32)>,
        reconfigured: usize,
        fail_create: bool,
    }

    /// Hands out recording presenters and remembers what it was asked.
    #[derive(Clone, Default)]
    struct FakeProvider(Rc<RefCell<Log>>);

    impl SurfaceProvider for FakeProvider {
        type Presenter = RecordingPresenter;

        fn create(&mut self) -> anyhow::Result<RecordingPresenter> {
            let mut log = self.0.borrow_mut();
            if log.fail_create {
                anyhow::bail!("no adapter");
            }
            log.created += 1;
            Ok(RecordingPresenter::default())
        }

        fn resize(&mut self, _: &mut RecordingPresenter, width: u32, height: u32) {
            self.0.borrow_mut().resized.push((width, height));
        }

        fn reconfigure(&mut self, _: &mut RecordingPresenter) {
            self.0.borrow_mut().reconfigured += 1;
        }
    }

    /// Yields one frame, then fails.
    struct FailingSource {
        info: SourceInfo,
        served: bool,
    }

    impl FrameSource for FailingSource {
        fn info(&self) -> &SourceInfo {
            &self.info
        }

        fn next_frame(&mut self) -> Result<Frame, SourceError> {
            if std::mem::replace(&mut self.served, true) {
                return Err(SourceError::fatal("read_frame", "corrupt packet"));
            }
            Ok(Frame::new(vec![0; 4], 1, 1, self.info.format).unwrap())
        }

        fn rewind(&mut self) -> Result<(), SourceError> {
            Ok(())
        }
    }

    fn pattern(frames: u64) -> PatternSource {
        PatternSource::new(PatternOptions {
            width: 8,
            height: 8,
            fps: 500.0,
            frames,
        })
        .unwrap()
    }

    fn driver_for<S: FrameSource + 'static>(source: S) -> (Driver<FakeProvider>, FakeProvider) {
        let (publisher, subscriber) = slot();
        let decoder = DecoderTask::spawn(source, publisher, DecoderOptions::default()).unwrap();
        let provider = FakeProvider::default();
        let render = RenderTask::new(subscriber, Duration::from_millis(20));
        (Driver::new(provider.clone(), render, decoder), provider)
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn starts_idle_and_presents_after_surface_created() {
        let (mut driver, provider) = driver_for(pattern(u64::MAX));
        assert_eq!(driver.state(), DriverState::Idle);
        assert_eq!(driver.handle(LifecycleEvent::RedrawRequested), DriverAction::None);

        assert_eq!(
            driver.handle(LifecycleEvent::SurfaceCreated),
            DriverAction::RequestRedraw
        );
        assert_eq!(driver.state(), DriverState::Presenting);
        assert_eq!(provider.0.borrow().created, 1);

        wait_for(|| {
            driver.handle(LifecycleEvent::RedrawRequested);
            driver.presenter.as_ref().is_some_and(|p| !p.uploads.is_empty())
        });
    }

    #[test]
    fn surface_churn_keeps_decode_position() {
        let (mut driver, provider) = driver_for(pattern(u64::MAX));
        driver.handle(LifecycleEvent::SurfaceCreated);
        wait_for(|| driver.decoder().is_some_and(|d| d.stats().position > 5));

        driver.handle(LifecycleEvent::SurfaceDestroyed);
        assert_eq!(driver.state(), DriverState::Idle);
        assert!(!driver.has_surface());
        let before = driver.decoder().map(|d| d.stats()).unwrap();

        // Decoding continues without a surface
        wait_for(|| driver.decoder().is_some_and(|d| d.stats().position > before.position));
        assert!(driver.decoder().is_some_and(|d| d.is_running()));

        driver.handle(LifecycleEvent::SurfaceCreated);
        let after = driver.decoder().map(|d| d.stats()).unwrap();
        assert!(after.position >= before.position);
        assert_eq!(after.loops, 0);
        assert_eq!(provider.0.borrow().created, 2);
    }

    #[test]
    fn resize_is_replayed_onto_new_render_state() {
        let (mut driver, provider) = driver_for(pattern(u64::MAX));
        driver.handle(LifecycleEvent::SurfaceResized { width: 640, height: 480 });
        assert!(provider.0.borrow().resized.is_empty());

        driver.handle(LifecycleEvent::SurfaceCreated);
        assert_eq!(
            driver.handle(LifecycleEvent::SurfaceResized { width: 800, height: 600 }),
            DriverAction::RequestRedraw
        );
        assert_eq!(provider.0.borrow().resized, vec![(640, 480), (800, 600)]);
    }

    #[test]
    fn pause_stops_uploads_without_touching_decoder() {
        let (mut driver, _) = driver_for(pattern(u64::MAX));
        driver.handle(LifecycleEvent::SurfaceCreated);
        wait_for(|| {
            driver.handle(LifecycleEvent::RedrawRequested);
            driver.presenter.as_ref().is_some_and(|p| !p.uploads.is_empty())
        });

        driver.handle(LifecycleEvent::Input(InputEvent::TogglePause));
        assert_eq!(driver.state(), DriverState::Paused);
        let uploads = driver.presenter.as_ref().map(|p| p.uploads.len()).unwrap();
        let frames = driver.decoder().map(|d| d.stats().frames).unwrap();

        for _ in 0..5 {
            assert_eq!(driver.handle(LifecycleEvent::RedrawRequested), DriverAction::None);
        }
        assert_eq!(driver.presenter.as_ref().map(|p| p.uploads.len()), Some(uploads));
        wait_for(|| driver.decoder().is_some_and(|d| d.stats().frames > frames));

        assert_eq!(
            driver.handle(LifecycleEvent::Input(InputEvent::TogglePause)),
            DriverAction::RequestRedraw
        );
        assert_eq!(driver.state(), DriverState::Presenting);
    }

    #[test]
    fn decoder_failure_stops_redraw_requests() {
        let info = SourceInfo {
            name: "broken".into(),
            width: 1,
            height: 1,
            fps: 100.0,
            format: crate::media::PixelFormat::Rgba8,
            duration_secs: None,
            live: false,
        };
        let (mut driver, _) = driver_for(FailingSource { info, served: false });
        driver.handle(LifecycleEvent::SurfaceCreated);

        wait_for(|| {
            driver.handle(LifecycleEvent::RedrawRequested);
            driver.state() == DriverState::Failed
        });
        assert_eq!(driver.handle(LifecycleEvent::RedrawRequested), DriverAction::None);

        // Surface churn after failure keeps the failed state
        driver.handle(LifecycleEvent::SurfaceDestroyed);
        assert_eq!(driver.handle(LifecycleEvent::SurfaceCreated), DriverAction::None);
        assert_eq!(driver.state(), DriverState::Failed);
    }

    #[test]
    fn lost_surface_rebuilds_render_state_only() {
        let (mut driver, provider) = driver_for(pattern(u64::MAX));
        driver.handle(LifecycleEvent::SurfaceCreated);
        let frames = driver.decoder().map(|d| d.stats().frames).unwrap();

        if let Some(p) = driver.presenter.as_mut() {
            p.fail_next_draw = Some(PresentError::SurfaceLost);
        }
        assert_eq!(
            driver.handle(LifecycleEvent::RedrawRequested),
            DriverAction::RequestRedraw
        );
        assert_eq!(provider.0.borrow().created, 2);
        assert!(driver.decoder().is_some_and(|d| d.is_running()));
        wait_for(|| driver.decoder().is_some_and(|d| d.stats().frames > frames));

        if let Some(p) = driver.presenter.as_mut() {
            p.fail_next_draw = Some(PresentError::Outdated);
        }
        driver.handle(LifecycleEvent::RedrawRequested);
        assert_eq!(provider.0.borrow().reconfigured, 1);
        assert_eq!(provider.0.borrow().created, 2);
    }

    #[test]
    fn out_of_memory_exits() {
        let (mut driver, _) = driver_for(pattern(u64::MAX));
        driver.handle(LifecycleEvent::SurfaceCreated);
        if let Some(p) = driver.presenter.as_mut() {
            p.fail_next_draw = Some(PresentError::OutOfMemory);
        }
        assert_eq!(driver.handle(LifecycleEvent::RedrawRequested), DriverAction::Exit);
        assert_eq!(driver.state(), DriverState::Destroyed);
    }

    #[test]
    fn failed_surface_creation_exits() {
        let (mut driver, provider) = driver_for(pattern(u64::MAX));
        provider.0.borrow_mut().fail_create = true;
        assert_eq!(driver.handle(LifecycleEvent::SurfaceCreated), DriverAction::Exit);
        assert_eq!(driver.state(), DriverState::Destroyed);
    }

    #[test]
    fn app_destroyed_tears_down_in_order_and_is_idempotent() {
        let (mut driver, _) = driver_for(pattern(u64::MAX));
        driver.handle(LifecycleEvent::SurfaceCreated);

        assert_eq!(driver.handle(LifecycleEvent::AppDestroyed), DriverAction::Exit);
        assert_eq!(driver.state(), DriverState::Destroyed);
        assert!(!driver.has_surface());
        assert!(driver.decoder().is_none());
        assert!(driver.stats().is_none());

        assert_eq!(driver.handle(LifecycleEvent::AppDestroyed), DriverAction::Exit);
        assert_eq!(driver.handle(LifecycleEvent::SurfaceCreated), DriverAction::None);
        assert_eq!(driver.handle(LifecycleEvent::RedrawRequested), DriverAction::None);
    }

    #[test]
    fn fullscreen_and_quit_are_forwarded() {
        let (mut driver, _) = driver_for(pattern(4));
        assert_eq!(
            driver.handle(LifecycleEvent::Input(InputEvent::ToggleFullscreen)),
            DriverAction::ToggleFullscreen
        );
        assert_eq!(
            driver.handle(LifecycleEvent::Input(InputEvent::Quit)),
            DriverAction::Exit
        );
        assert_eq!(driver.state(), DriverState::Destroyed);
    }
}
