use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::media::{Frame, PixelFormat};

/// Stream metadata known once a source is open.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    /// Human-readable name (file name, URL or device).
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Nominal frame rate. Used for pacing when frames carry no timestamp
    /// and for spacing loop restarts.
    pub fps: f64,
    /// Layout of frames returned by `next_frame`.
    pub format: PixelFormat,
    pub duration_secs: Option<f64>,
    /// Live sources (cameras) are never paced by the decoder.
    pub live: bool,
}

/// Longest interval `frame_interval` reports, however low the rate.
pub const MAX_FRAME_INTERVAL: Duration = Duration::from_secs(60);

impl SourceInfo {
    pub fn frame_interval(&self) -> Duration {
        let fps = if self.fps.is_finite() && self.fps > 0.0 {
            self.fps
        } else {
            30.0
        };
        Duration::try_from_secs_f64(1.0 / fps)
            .map_or(MAX_FRAME_INTERVAL, |d| d.min(MAX_FRAME_INTERVAL))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// No data yet. Retry.
    #[error("no data available yet")]
    WouldBlock,
    /// The source ran out. The decoder rewinds and keeps going.
    #[error("end of stream")]
    EndOfStream,
    /// Unrecoverable: the decoder stops and reports it.
    #[error("{op} failed: {reason}")]
    Fatal { op: &'static str, reason: String },
}

impl SourceError {
    pub fn fatal(op: &'static str, reason: impl fmt::Display) -> Self {
        SourceError::Fatal {
            op,
            reason: reason.to_string(),
        }
    }
}

/// Closes a source's input from another thread so a blocked read returns.
#[derive(Clone)]
pub struct Interrupter(Arc<dyn Fn() + Send + Sync>);

impl Interrupter {
    pub fn new(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn interrupt(&self) {
        (self.0)();
    }
}

impl fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Interrupter")
    }
}

/// Anything the decoder task can pull frames from.
///
/// Implementations own all demux/codec/conversion state; nothing here is
/// shared with the render side.
pub trait FrameSource: Send {
    fn info(&self) -> &SourceInfo;

    /// Produce the next decoded frame in the source's native layout.
    fn next_frame(&mut self) -> Result<Frame, SourceError>;

    /// Seek back to the first frame and drop any buffered codec state.
    fn rewind(&mut self) -> Result<(), SourceError>;

    /// Handle that unblocks a pending `next_frame` during teardown.
    fn interrupter(&self) -> Option<Interrupter> {
        None
    }
}

impl FrameSource for Box<dyn FrameSource> {
    fn info(&self) -> &SourceInfo {
        (**self).info()
    }

    fn next_frame(&mut self) -> Result<Frame, SourceError> {
        (**self).next_frame()
    }

    fn rewind(&mut self) -> Result<(), SourceError> {
        (**self).rewind()
    }

    fn interrupter(&self) -> Option<Interrupter> {
        (**self).interrupter()
    }
}
