//! The decoder thread: pull, pace, convert, publish. Loops on end of stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use thiserror::Error;

use super::source::{FrameSource, Interrupter, SourceError, SourceInfo};
use crate::handoff::Publisher;
use crate::media::{self, Frame};

/// Longest pacing sleep for one frame. Guards against timestamp jumps.
const MAX_PACE_WAIT: Duration = Duration::from_secs(5);

/// Progress events (`Started`, `Looped`) queued for an owner that is not
/// polling. Later ones are dropped; `DecoderStats::loops` stays exact.
const EVENT_BACKLOG: usize = 16;

#[derive(Debug, Clone)]
pub struct DecoderOptions {
    /// Sleep until each frame's presentation time. Off decodes flat out.
    pub pace: bool,
    /// Scale every frame to this size before publishing.
    pub target_size: Option<(u32, u32)>,
    /// Backoff between retries after `WouldBlock`.
    pub retry_backoff: Duration,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            pace: true,
            target_size: None,
            retry_backoff: Duration::from_millis(1),
        }
    }
}

/// A decode failure as the presentation driver sees it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{op}: {reason}")]
pub struct DecodeFailure {
    pub op: String,
    pub reason: String,
}

impl DecodeFailure {
    fn new(op: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            op: op.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecoderEvent {
    Started(SourceInfo),
    Looped { count: u64 },
    Failed(DecodeFailure),
    Stopped,
}

/// Snapshot of the decoder's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Frames published since the task started (across loops).
    pub frames: u64,
    /// Frames published since the last loop restart.
    pub position: u64,
    pub retries: u64,
    pub loops: u64,
}

#[derive(Default)]
struct Counters {
    frames: AtomicU64,
    position: AtomicU64,
    retries: AtomicU64,
    loops: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DecoderStats {
        DecoderStats {
            frames: self.frames.load(Ordering::Relaxed),
            position: self.position.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            loops: self.loops.load(Ordering::Relaxed),
        }
    }
}

/// Owner-side handle to a running decoder thread.
pub struct DecoderHandle {
    info: SourceInfo,
    events: Receiver<DecoderEvent>,
    /// `Failed` and `Stopped` only, so they are never dropped.
    terminal: Receiver<DecoderEvent>,
    stop: Arc<AtomicBool>,
    /// Dropping this wakes the thread out of a pacing sleep.
    wake: Option<Sender<()>>,
    interrupter: Option<Interrupter>,
    counters: Arc<Counters>,
    failure: Option<DecodeFailure>,
    thread: Option<JoinHandle<()>>,
}

pub struct DecoderTask;

impl DecoderTask {
    /// Start decoding `source` into `publisher` on a dedicated thread.
    pub fn spawn<S>(
        source: S,
        publisher: Publisher<Frame>,
        options: DecoderOptions,
    ) -> std::io::Result<DecoderHandle>
    where
        S: FrameSource + 'static,
    {
        let info = source.info().clone();
        let interrupter = source.interrupter();
        let (event_tx, event_rx) = crossbeam_channel::bounded(EVENT_BACKLOG);
        let (terminal_tx, terminal_rx) = crossbeam_channel::bounded(2);
        let (wake_tx, wake_rx) = crossbeam_channel::bounded::<()>(1);
        let stop = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());

        let worker = Worker {
            source,
            publisher,
            options,
            stop: stop.clone(),
            wake: wake_rx,
            events: event_tx,
            terminal: terminal_tx,
            counters: counters.clone(),
        };

        let thread = thread::Builder::new()
            .name("lumen-decoder".into())
            .spawn(move || worker.run())?;

        log::info!(
            "Decoder started: {} ({}x{} @ {:.2} fps, {:?})",
            info.name,
            info.width,
            info.height,
            info.fps,
            info.format
        );

        Ok(DecoderHandle {
            info,
            events: event_rx,
            terminal: terminal_rx,
            stop,
            wake: Some(wake_tx),
            interrupter,
            counters,
            failure: None,
            thread: Some(thread),
        })
    }
}

impl DecoderHandle {
    pub fn info(&self) -> &SourceInfo {
        &self.info
    }

    /// Drain pending events without blocking. Failures are remembered.
    pub fn poll_events(&mut self) -> Vec<DecoderEvent> {
        let mut events: Vec<_> = self.events.try_iter().collect();
        let terminal: Vec<_> = self.terminal.try_iter().collect();
        if !terminal.is_empty() {
            // Progress sent before the thread finished goes first
            events.extend(self.events.try_iter());
            events.extend(terminal);
        }
        for event in &events {
            if let DecoderEvent::Failed(failure) = event {
                self.failure = Some(failure.clone());
            }
        }
        events
    }

    /// The fatal error that ended decoding, if any.
    pub fn failure(&mut self) -> Option<&DecodeFailure> {
        self.poll_events();
        self.failure.as_ref()
    }

    pub fn is_running(&self) -> bool {
        if self.stop.load(Ordering::Relaxed) {
            return false;
        }
        match &self.thread {
            Some(h) => !h.is_finished(),
            None => false,
        }
    }

    pub fn stats(&self) -> DecoderStats {
        self.counters.snapshot()
    }

    /// Request a stop, unblock any pending read and join the thread.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.wake.take();
        if let Some(interrupter) = &self.interrupter {
            interrupter.interrupt();
        }
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::error!("Decoder thread panicked during shutdown");
            }
            log::info!("Decoder stopped: {}", self.info.name);
        }
    }
}

impl Drop for DecoderHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sleeps until each frame's presentation time, relative to an epoch that
/// restarts on every loop.
struct Pacer {
    epoch: Instant,
    interval: Duration,
    index: u64,
    last_deadline: Option<Instant>,
}

impl Pacer {
    fn new(interval: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            interval,
            index: 0,
            last_deadline: None,
        }
    }

    fn deadline(&mut self, frame: &Frame) -> Instant {
        let index = u32::try_from(self.index).unwrap_or(u32::MAX);
        let offset = frame
            .pts
            .unwrap_or_else(|| self.interval.saturating_mul(index));
        self.index += 1;
        // Unrepresentable deadlines are still bounded by MAX_PACE_WAIT
        let deadline = self
            .epoch
            .checked_add(offset)
            .unwrap_or_else(|| self.epoch + MAX_PACE_WAIT);
        self.last_deadline = Some(deadline);
        deadline
    }

    /// The next loop starts one frame interval after the last frame shown.
    fn restart(&mut self) {
        let now = Instant::now();
        self.epoch = match self.last_deadline.and_then(|last| last.checked_add(self.interval)) {
            Some(next) => next.max(now),
            None => now,
        };
        self.index = 0;
        self.last_deadline = None;
    }
}

struct Worker<S> {
    source: S,
    publisher: Publisher<Frame>,
    options: DecoderOptions,
    stop: Arc<AtomicBool>,
    wake: Receiver<()>,
    events: Sender<DecoderEvent>,
    terminal: Sender<DecoderEvent>,
    counters: Arc<Counters>,
}

impl<S: FrameSource> Worker<S> {
    fn run(mut self) {
        let name = self.source.info().name.clone();
        let _ = self
            .events
            .try_send(DecoderEvent::Started(self.source.info().clone()));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.decode_loop()));
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                let msg = if let Some(s) = e.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = e.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".into()
                };
                Err(DecodeFailure::new("decode", format!("decoder panicked: {msg}")))
            }
        };

        match outcome {
            Ok(()) => {
                log::debug!("Decoder loop for {name} exited");
            }
            Err(failure) => {
                log::error!("Decoding {name} failed in {}: {}", failure.op, failure.reason);
                let _ = self.terminal.send(DecoderEvent::Failed(failure));
            }
        }
        let _ = self.terminal.send(DecoderEvent::Stopped);
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst) || !self.publisher.has_subscriber()
    }

    /// Sleep for `d` unless a stop is requested first. Returns false on stop.
    fn sleep(&self, d: Duration) -> bool {
        match self.wake.recv_timeout(d) {
            Err(RecvTimeoutError::Timeout) => !self.stopping(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    fn decode_loop(&mut self) -> Result<(), DecodeFailure> {
        let info = self.source.info().clone();
        let pace = self.options.pace && !info.live;
        let mut pacer = Pacer::new(info.frame_interval());
        let mut since_rewind: u64 = 0;

        while !self.stopping() {
            match self.source.next_frame() {
                Ok(frame) => {
                    since_rewind += 1;
                    if pace {
                        let deadline = pacer.deadline(&frame);
                        let wait = deadline.saturating_duration_since(Instant::now());
                        if !wait.is_zero() && !self.sleep(wait.min(MAX_PACE_WAIT)) {
                            break;
                        }
                    }

                    let frame = self.prepare(frame)?;
                    self.publisher.publish_with(move |seq| Frame { seq, ..frame });
                    self.counters.frames.fetch_add(1, Ordering::Relaxed);
                    self.counters.position.fetch_add(1, Ordering::Relaxed);
                }
                Err(SourceError::WouldBlock) => {
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    if !self.sleep(self.options.retry_backoff) {
                        break;
                    }
                }
                Err(SourceError::EndOfStream) => {
                    // Teardown closes the input, which reads as end of stream.
                    if self.stopping() {
                        break;
                    }
                    if since_rewind == 0 {
                        return Err(DecodeFailure::new("rewind", "source produced no frames"));
                    }
                    self.source
                        .rewind()
                        .map_err(|e| DecodeFailure::new("rewind", e))?;
                    since_rewind = 0;
                    pacer.restart();
                    self.counters.position.store(0, Ordering::Relaxed);
                    let count = self.counters.loops.fetch_add(1, Ordering::Relaxed) + 1;
                    log::debug!("{} looped ({count})", info.name);
                    let _ = self.events.try_send(DecoderEvent::Looped { count });
                }
                Err(SourceError::Fatal { op, reason }) => {
                    if self.stopping() {
                        break;
                    }
                    return Err(DecodeFailure::new(op, reason));
                }
            }
        }
        Ok(())
    }

    fn prepare(&self, frame: Frame) -> Result<Frame, DecodeFailure> {
        let frame = media::to_rgba(frame).map_err(|e| DecodeFailure::new("convert", e))?;
        match self.options.target_size {
            Some((w, h)) => media::scale_to(frame, w, h).map_err(|e| DecodeFailure::new("scale", e)),
            None => Ok(frame),
        }
    }
}
