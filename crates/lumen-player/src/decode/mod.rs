//! Frame sources and the decoder thread that drains them into the slot.

pub mod ffmpeg;
pub mod image;
pub mod pattern;
pub mod source;
pub mod task;
#[cfg(feature = "webcam")]
pub mod webcam;

use std::path::Path;

pub use self::image::ImageSource;
pub use ffmpeg::{FfmpegOptions, FfmpegSource, ffmpeg_available};
pub use pattern::{PatternOptions, PatternSource};
pub use source::{FrameSource, Interrupter, SourceError, SourceInfo};
pub use task::{DecodeFailure, DecoderEvent, DecoderHandle, DecoderOptions, DecoderStats, DecoderTask};

use crate::media::PixelFormat;

/// Supported image extensions (lowercase).
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp"];

/// How to open a source string.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    pub stream_index: usize,
    /// Decode format requested from ffmpeg. Other sources ignore it.
    pub decode_format: Option<PixelFormat>,
    /// Presentation size. Passed to ffmpeg's scaler and the camera.
    pub target_size: Option<(u32, u32)>,
}

/// What a source string refers to.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceKind {
    Pattern(PatternOptions),
    Camera(u32),
    Image(String),
    Stream(String),
}

/// Classify a source string without opening anything.
///
/// - `pattern:` or `pattern:WxH@FPS`: synthetic colour bars
/// - `camera:N`: webcam device N
/// - a path with an image extension: still image or animated GIF
/// - anything else: handed to ffmpeg (files, `http(s)://`, `rtmp://`)
pub fn classify(spec: &str) -> Result<SourceKind, SourceError> {
    if let Some(rest) = spec.strip_prefix("pattern:") {
        return parse_pattern_spec(rest).map(SourceKind::Pattern);
    }
    if spec == "pattern" {
        return Ok(SourceKind::Pattern(PatternOptions::default()));
    }
    if let Some(index) = spec.strip_prefix("camera:") {
        let index = index
            .parse()
            .map_err(|_| SourceError::fatal("open", format!("bad camera index '{index}'")))?;
        return Ok(SourceKind::Camera(index));
    }

    let is_url = spec.contains("://");
    let ext = Path::new(spec)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);
    match ext {
        Some(ext) if !is_url && IMAGE_EXTENSIONS.contains(&ext.as_str()) => {
            Ok(SourceKind::Image(spec.to_string()))
        }
        _ => Ok(SourceKind::Stream(spec.to_string())),
    }
}

fn parse_pattern_spec(rest: &str) -> Result<PatternOptions, SourceError> {
    pattern::parse_pattern(rest).map_err(|e| SourceError::fatal("open", e))
}

/// Open a source string as a boxed `FrameSource`.
pub fn open_source(spec: &str, options: &OpenOptions) -> Result<Box<dyn FrameSource>, SourceError> {
    match classify(spec)? {
        SourceKind::Pattern(pattern) => Ok(Box::new(PatternSource::new(pattern)?)),
        SourceKind::Image(path) => Ok(Box::new(ImageSource::open(Path::new(&path))?)),
        SourceKind::Camera(index) => open_camera(index, options),
        SourceKind::Stream(input) => {
            if !ffmpeg_available() {
                return Err(SourceError::fatal(
                    "open",
                    "ffmpeg/ffprobe not found on PATH",
                ));
            }
            let ffmpeg = FfmpegOptions {
                stream_index: options.stream_index,
                format: options.decode_format.unwrap_or(PixelFormat::Rgba8),
                target_size: options.target_size,
            };
            Ok(Box::new(FfmpegSource::open(&input, ffmpeg)?))
        }
    }
}

#[cfg(feature = "webcam")]
fn open_camera(index: u32, options: &OpenOptions) -> Result<Box<dyn FrameSource>, SourceError> {
    Ok(Box::new(webcam::WebcamSource::open(index, options.target_size)?))
}

#[cfg(not(feature = "webcam"))]
fn open_camera(index: u32, _options: &OpenOptions) -> Result<Box<dyn FrameSource>, SourceError> {
    Err(SourceError::fatal(
        "open",
        format!("camera:{index} needs the `webcam` feature"),
    ))
}
