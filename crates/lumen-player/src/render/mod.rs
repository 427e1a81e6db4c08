//! Render side: pull the newest frame from the slot and hand it to a presenter.

pub mod frame_renderer;

use std::time::Duration;

use thiserror::Error;

use crate::handoff::{SlotStats, Subscriber};
use crate::media::Frame;

pub use frame_renderer::{FrameRenderer, compute_letterbox};

/// Default bound on how long a tick waits for a new frame.
pub const DEFAULT_FRAME_WAIT: Duration = Duration::from_millis(2);

/// Upper bound on the tick wait: one refresh at 60 Hz.
pub const MAX_FRAME_WAIT: Duration = Duration::from_millis(16);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PresentError {
    /// The surface is gone and must be re-created.
    #[error("surface lost")]
    SurfaceLost,
    /// The surface no longer matches the window and must be reconfigured.
    #[error("surface outdated")]
    Outdated,
    #[error("out of GPU memory")]
    OutOfMemory,
    #[error("{0}")]
    Other(String),
}

impl PresentError {
    /// Errors fixed by reconfiguring or re-creating the surface.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PresentError::SurfaceLost | PresentError::Outdated)
    }
}

/// Whatever puts frames on screen. Only used from the render thread.
pub trait FramePresenter {
    /// Copy an RGBA frame into presenter-owned storage.
    fn upload(&mut self, frame: &Frame) -> Result<(), PresentError>;

    /// Draw the most recently uploaded frame (or black before the first).
    fn draw(&mut self) -> Result<(), PresentError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A new frame was uploaded and drawn.
    Presented { seq: u64 },
    /// No new frame; the previous content was redrawn.
    Idle,
}

/// Consumer half of the pipeline.
pub struct RenderTask {
    subscriber: Subscriber<Frame>,
    frame_wait: Duration,
    last_presented: Option<u64>,
    presented: u64,
}

impl RenderTask {
    pub fn new(subscriber: Subscriber<Frame>, frame_wait: Duration) -> Self {
        Self {
            subscriber,
            frame_wait,
            last_presented: None,
            presented: 0,
        }
    }

    /// One display refresh: take the newest frame if any, upload it, draw.
    ///
    /// The slot lock is released before the presenter is called, so a slow
    /// upload never blocks the decoder.
    pub fn tick(&mut self, presenter: &mut dyn FramePresenter) -> Result<TickOutcome, PresentError> {
        let Some(taken) = self.subscriber.take_timeout(self.frame_wait) else {
            presenter.draw()?;
            return Ok(TickOutcome::Idle);
        };

        debug_assert!(self.last_presented.is_none_or(|last| taken.seq > last));

        presenter.upload(&taken.item)?;
        presenter.draw()?;
        self.last_presented = Some(taken.seq);
        self.presented += 1;
        Ok(TickOutcome::Presented { seq: taken.seq })
    }

    /// Redraw without consuming. Used while paused and after a surface
    /// comes back.
    pub fn redraw(&self, presenter: &mut dyn FramePresenter) -> Result<(), PresentError> {
        presenter.draw()
    }

    pub fn last_presented(&self) -> Option<u64> {
        self.last_presented
    }

    /// Frames presented by this task.
    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn slot_stats(&self) -> SlotStats {
        self.subscriber.stats()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::handoff::slot;
    use crate::media::PixelFormat;

    /// Presenter that records what it was asked to do.
    #[derive(Default)]
    pub(crate) struct RecordingPresenter {
        pub uploads: Vec<u64>,
        pub draws: usize,
        pub fail_next_draw: Option<PresentError>,
    }

    impl FramePresenter for RecordingPresenter {
        fn upload(&mut self, frame: &Frame) -> Result<(), PresentError> {
            self.uploads.push(frame.seq);
            Ok(())
        }

        fn draw(&mut self) -> Result<(), PresentError> {
            if let Some(err) = self.fail_next_draw.take() {
                return Err(err);
            }
            self.draws += 1;
            Ok(())
        }
    }

    fn frame() -> Frame {
        Frame::new(vec![0; 4], 1, 1, PixelFormat::Rgba8).unwrap()
    }

    fn publish(publisher: &crate::handoff::Publisher<Frame>) -> u64 {
        publisher.publish_with(|seq| Frame { seq, ..frame() })
    }

    #[test]
    fn tick_sees_only_the_newest_frame() {
        let (publisher, subscriber) = slot();
        let mut task = RenderTask::new(subscriber, Duration::ZERO);
        let mut presenter = RecordingPresenter::default();

        publish(&publisher);
        publish(&publisher);
        let newest = publish(&publisher);

        assert_eq!(
            task.tick(&mut presenter).unwrap(),
            TickOutcome::Presented { seq: newest }
        );
        assert_eq!(presenter.uploads, vec![newest]);
        assert_eq!(task.slot_stats().overwritten, 2);
    }

    #[test]
    fn second_tick_without_publish_does_not_upload() {
        let (publisher, subscriber) = slot();
        let mut task = RenderTask::new(subscriber, Duration::from_millis(1));
        let mut presenter = RecordingPresenter::default();

        publish(&publisher);
        assert!(matches!(
            task.tick(&mut presenter).unwrap(),
            TickOutcome::Presented { .. }
        ));
        let before = task.slot_stats();
        assert_eq!(task.tick(&mut presenter).unwrap(), TickOutcome::Idle);

        assert_eq!(presenter.uploads.len(), 1);
        assert_eq!(presenter.draws, 2);
        assert_eq!(task.slot_stats(), before);
    }

    #[test]
    fn presented_sequence_is_strictly_increasing() {
        let (publisher, subscriber) = slot();
        let mut task = RenderTask::new(subscriber, Duration::ZERO);
        let mut presenter = RecordingPresenter::default();

        for round in 0..50 {
            for _ in 0..(round % 3) {
                publish(&publisher);
            }
            task.tick(&mut presenter).unwrap();
        }

        assert!(!presenter.uploads.is_empty());
        assert!(presenter.uploads.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(task.presented() as usize, presenter.uploads.len());
    }

    #[test]
    fn present_errors_are_returned_and_frame_is_not_recorded() {
        let (publisher, subscriber) = slot();
        let mut task = RenderTask::new(subscriber, Duration::ZERO);
        let mut presenter = RecordingPresenter {
            fail_next_draw: Some(PresentError::SurfaceLost),
            ..Default::default()
        };

        publish(&publisher);
        assert_eq!(task.tick(&mut presenter), Err(PresentError::SurfaceLost));
        assert_eq!(task.last_presented(), None);
        // The decoder side is untouched
        assert!(publisher.has_subscriber());
    }

    #[test]
    fn recoverable_errors() {
        assert!(PresentError::SurfaceLost.is_recoverable());
        assert!(PresentError::Outdated.is_recoverable());
        assert!(!PresentError::OutOfMemory.is_recoverable());
        assert!(!PresentError::Other("x".into()).is_recoverable());
    }
}
