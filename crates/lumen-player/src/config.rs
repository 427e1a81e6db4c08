use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::media::PixelFormat;
use crate::render::{DEFAULT_FRAME_WAIT, MAX_FRAME_WAIT};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no source given and no previous source remembered")]
    NoSource,
    #[error("--width and --height must be given together and be non-zero")]
    InvalidSize,
    #[error("settings I/O at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DecodeFormat {
    Rgba,
    #[value(name = "yuv420p")]
    Yuv420p,
}

impl From<DecodeFormat> for PixelFormat {
    fn from(f: DecodeFormat) -> Self {
        match f {
            DecodeFormat::Rgba => PixelFormat::Rgba8,
            DecodeFormat::Yuv420p => PixelFormat::I420,
        }
    }
}

/// Loop a video, image or test pattern in a window.
#[derive(Debug, Parser)]
#[command(name = "lumen", version, about)]
pub struct Cli {
    /// File, URL, `pattern:[WxH@FPS]` or `camera:N`. Defaults to the last one played.
    pub source: Option<String>,

    /// Scale decoded frames to this width (requires --height).
    #[arg(long)]
    pub width: Option<u32>,

    /// Scale decoded frames to this height (requires --width).
    #[arg(long)]
    pub height: Option<u32>,

    /// Which video stream of the input to play.
    #[arg(long, default_value_t = 0)]
    pub stream_index: usize,

    /// Pixel format requested from ffmpeg.
    #[arg(long, value_enum, default_value_t = DecodeFormat::Rgba)]
    pub decode_format: DecodeFormat,

    /// How long a render tick waits for a new frame, in milliseconds (at most 16).
    #[arg(long)]
    pub frame_wait_ms: Option<u64>,

    /// Decode as fast as possible instead of at the stream's rate.
    #[arg(long)]
    pub no_pace: bool,

    /// Start fullscreen.
    #[arg(long)]
    pub fullscreen: bool,

    /// Debug logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Persisted between runs in `<config dir>/lumen/settings.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_window_size")]
    pub window_size: (u32, u32),
    #[serde(default)]
    pub last_source: Option<String>,
    #[serde(default = "default_frame_wait_ms")]
    pub frame_wait_ms: u64,
    #[serde(default)]
    pub fullscreen: bool,
}

fn default_version() -> u32 {
    1
}

fn default_window_size() -> (u32, u32) {
    (1280, 720)
}

fn default_frame_wait_ms() -> u64 {
    DEFAULT_FRAME_WAIT.as_millis() as u64
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            window_size: default_window_size(),
            last_source: None,
            frame_wait_ms: default_frame_wait_ms(),
            fullscreen: false,
        }
    }
}

impl Settings {
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("lumen").join("settings.json"))
    }

    /// Missing or unreadable settings fall back to defaults.
    pub fn load() -> Self {
        Self::path().map(|p| Self::load_from(&p)).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Self {
        let Ok(json) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&json).unwrap_or_else(|e| {
            log::warn!("Ignoring corrupt settings {}: {e}", path.display());
            Self::default()
        })
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        match Self::path() {
            Some(path) => self.save_to(&path),
            None => Ok(()),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Effective configuration: CLI flags over persisted settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub source: String,
    pub target_size: Option<(u32, u32)>,
    pub stream_index: usize,
    pub decode_format: PixelFormat,
    pub frame_wait: Duration,
    pub pace: bool,
    pub window_size: (u32, u32),
    pub fullscreen: bool,
    pub verbose: bool,
}

impl Config {
    pub fn resolve(cli: Cli, settings: &Settings) -> Result<Self, ConfigError> {
        let source = cli
            .source
            .or_else(|| settings.last_source.clone())
            .ok_or(ConfigError::NoSource)?;

        let target_size = match (cli.width, cli.height) {
            (None, None) => None,
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => return Err(ConfigError::InvalidSize),
        };

        let frame_wait_ms = cli.frame_wait_ms.unwrap_or(settings.frame_wait_ms);
        let mut frame_wait = Duration::from_millis(frame_wait_ms);
        if frame_wait > MAX_FRAME_WAIT {
            log::warn!(
                "Frame wait {}ms is too long, using {}ms",
                frame_wait.as_millis(),
                MAX_FRAME_WAIT.as_millis()
            );
            frame_wait = MAX_FRAME_WAIT;
        }

        Ok(Self {
            source,
            target_size,
            stream_index: cli.stream_index,
            decode_format: cli.decode_format.into(),
            frame_wait,
            pace: !cli.no_pace,
            window_size: target_size.unwrap_or(settings.window_size),
            fullscreen: cli.fullscreen || settings.fullscreen,
            verbose: cli.verbose,
        })
    }
}
