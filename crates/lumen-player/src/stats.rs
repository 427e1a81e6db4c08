use std::time::{Duration, Instant};

use crate::decode::DecoderStats;
use crate::handoff::SlotStats;
use crate::render::TickOutcome;

/// How often a playback summary is logged.
const LOG_INTERVAL: Duration = Duration::from_secs(10);
/// Window for the presented-frames-per-second estimate.
const FPS_WINDOW: Duration = Duration::from_secs(1);

/// Render-side playback counters.
#[derive(Debug)]
pub struct PlaybackStats {
    presented: u64,
    idle_ticks: u64,
    window_start: Instant,
    window_frames: u64,
    fps: f64,
    last_log: Instant,
}

/// Everything worth showing about playback at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub presented: u64,
    pub idle_ticks: u64,
    pub present_fps: f64,
    /// Frames the decoder published that were never shown.
    pub dropped: u64,
    pub decoded: u64,
    pub loops: u64,
}

impl PlaybackStats {
    pub fn new(now: Instant) -> Self {
        Self {
            presented: 0,
            idle_ticks: 0,
            window_start: now,
            window_frames: 0,
            fps: 0.0,
            last_log: now,
        }
    }

    pub fn record(&mut self, outcome: TickOutcome, now: Instant) {
        match outcome {
            TickOutcome::Presented { .. } => {
                self.presented += 1;
                self.window_frames += 1;
            }
            TickOutcome::Idle => self.idle_ticks += 1,
        }

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= FPS_WINDOW {
            self.fps = self.window_frames as f64 / elapsed.as_secs_f64();
            self.window_frames = 0;
            self.window_start = now;
        }
    }

    pub fn snapshot(&self, slot: SlotStats, decoder: DecoderStats) -> StatsSnapshot {
        StatsSnapshot {
            presented: self.presented,
            idle_ticks: self.idle_ticks,
            present_fps: self.fps,
            dropped: slot.overwritten,
            decoded: decoder.frames,
            loops: decoder.loops,
        }
    }

    /// Log a summary if the interval has passed. Returns whether it did.
    pub fn maybe_log(&mut self, now: Instant, snapshot: &StatsSnapshot) -> bool {
        if now.saturating_duration_since(self.last_log) < LOG_INTERVAL {
            return false;
        }
        self.last_log = now;
        log::info!(
            "Playback: {} presented ({:.1} fps), {} decoded, {} dropped, {} idle ticks, {} loops",
            snapshot.presented,
            snapshot.present_fps,
            snapshot.decoded,
            snapshot.dropped,
            snapshot.idle_ticks,
            snapshot.loops
        );
        true
    }
}

impl StatsSnapshot {
    /// Window title text.
    pub fn title(&self, name: &str) -> String {
        format!(
            "{name} | {:.0} fps | dropped {} | loop {}",
            self.present_fps, self.dropped, self.loops
        )
    }
}
