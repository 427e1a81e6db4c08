use std::time::Duration;

use super::source::{FrameSource, SourceError, SourceInfo};
use crate::media::frame::chroma_size;
use crate::media::{Frame, PixelFormat};

/// SMPTE-ish bars in limited-range YUV (BT.601): white, yellow, cyan,
/// green, magenta, red, blue, black.
const BARS: [[u8; 3]; 8] = [
    [235, 128, 128],
    [210, 16, 146],
    [170, 166, 16],
    [145, 54, 34],
    [106, 202, 222],
    [81, 90, 240],
    [41, 240, 110],
    [16, 128, 128],
];

/// Accepted pattern frame rates.
const FPS_RANGE: std::ops::RangeInclusive<f64> = 0.1..=1000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternOptions {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Frames before end of stream. The bars scroll one full width per loop.
    pub frames: u64,
}

impl Default for PatternOptions {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
            fps: 30.0,
            frames: 150,
        }
    }
}

/// Synthetic I420 source: colour bars scrolling left to right.
pub struct PatternSource {
    info: SourceInfo,
    frames: u64,
    index: u64,
}

impl PatternSource {
    pub fn new(options: PatternOptions) -> Result<Self, SourceError> {
        if options.width == 0 || options.height == 0 {
            return Err(SourceError::fatal(
                "open",
                format!("invalid pattern size {}x{}", options.width, options.height),
            ));
        }
        if !FPS_RANGE.contains(&options.fps) {
            return Err(SourceError::fatal(
                "open",
                format!(
                    "invalid pattern rate {} (expected {}..={})",
                    options.fps,
                    FPS_RANGE.start(),
                    FPS_RANGE.end()
                ),
            ));
        }
        let frames = options.frames.max(1);
        Ok(Self {
            info: SourceInfo {
                name: format!(
                    "pattern {}x{}@{}",
                    options.width, options.height, options.fps
                ),
                width: options.width,
                height: options.height,
                fps: options.fps,
                format: PixelFormat::I420,
                duration_secs: Some(frames as f64 / options.fps),
                live: false,
            },
            frames,
            index: 0,
        })
    }

    /// Horizontal scroll in pixels for frame `index`.
    fn offset(&self, index: u64) -> u32 {
        let w = u64::from(self.info.width);
        ((index * w / self.frames) % w) as u32
    }

    fn render(&self, index: u64) -> Vec<u8> {
        let (w, h) = (self.info.width, self.info.height);
        let (cw, ch) = chroma_size(w, h);
        let offset = self.offset(index);

        let bar_at = |x: u32, width: u32| {
            let shifted = (x + width - offset * width / w) % width;
            BARS[(shifted as usize * BARS.len()) / width as usize]
        };

        let mut data = Vec::with_capacity(Frame::byte_len_for(PixelFormat::I420, w, h));
        for _ in 0..h {
            data.extend((0..w).map(|x| bar_at(x, w)[0]));
        }
        for plane in 1..3 {
            for _ in 0..ch {
                data.extend((0..cw).map(|x| bar_at(x, cw)[plane]));
            }
        }
        data
    }
}

impl FrameSource for PatternSource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Frame, SourceError> {
        if self.index >= self.frames {
            return Err(SourceError::EndOfStream);
        }
        let index = self.index;
        self.index += 1;

        let frame = Frame::new(
            self.render(index),
            self.info.width,
            self.info.height,
            PixelFormat::I420,
        )
        .map_err(|e| SourceError::fatal("read_frame", e))?;
        Ok(frame.with_pts(Duration::from_secs_f64(index as f64 / self.info.fps)))
    }

    fn rewind(&mut self) -> Result<(), SourceError> {
        self.index = 0;
        Ok(())
    }
}

/// Parse `WxH@FPS`, `WxH` or an empty string into pattern options.
pub fn parse_pattern(spec: &str) -> Result<PatternOptions, String> {
    let mut options = PatternOptions::default();
    let spec = spec.trim();
    if spec.is_empty() {
        return Ok(options);
    }

    let (size, fps) = match spec.split_once('@') {
        Some((size, fps)) => (size, Some(fps)),
        None => (spec, None),
    };

    let (w, h) = size
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got '{size}'"))?;
    options.width = w.parse().map_err(|_| format!("bad width '{w}'"))?;
    options.height = h.parse().map_err(|_| format!("bad height '{h}'"))?;

    if let Some(fps) = fps {
        options.fps = fps.parse().map_err(|_| format!("bad frame rate '{fps}'"))?;
        if !FPS_RANGE.contains(&options.fps) {
            return Err(format!(
                "frame rate {fps} outside {}..={}",
                FPS_RANGE.start(),
                FPS_RANGE.end()
            ));
        }
        // One loop is always five seconds of bars
        options.frames = (options.fps * 5.0).round().max(1.0) as u64;
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::to_rgba;

    fn small() -> PatternSource {
        PatternSource::new(PatternOptions {
            width: 16,
            height: 8,
            fps: 10.0,
            frames: 4,
        })
        .unwrap()
    }

    #[test]
    fn emits_i420_frames_with_timestamps() {
        let mut src = small();
        let frame = src.next_frame().unwrap();
        assert_eq!(frame.format, PixelFormat::I420);
        assert_eq!(frame.pts, Some(Duration::ZERO));
        assert_eq!(
            src.next_frame().unwrap().pts,
            Some(Duration::from_millis(100))
        );
    }

    #[test]
    fn ends_after_frame_count_and_rewinds() {
        let mut src = small();
        for _ in 0..4 {
            src.next_frame().unwrap();
        }
        assert_eq!(src.next_frame(), Err(SourceError::EndOfStream));
        src.rewind().unwrap();
        assert_eq!(src.next_frame().unwrap().pts, Some(Duration::ZERO));
    }

    #[test]
    fn bars_scroll_between_frames() {
        let mut src = small();
        let a = src.next_frame().unwrap();
        let b = src.next_frame().unwrap();
        assert_ne!(a.data, b.data);
    }

    #[test]
    fn first_bar_converts_to_near_white() {
        let mut src = small();
        let rgba = to_rgba(src.next_frame().unwrap()).unwrap();
        assert!(rgba.data[0..3].iter().all(|&c| c > 250));
        assert_eq!(rgba.data[3], 255);
    }

    #[test]
    fn odd_sizes_are_valid_frames() {
        let mut src = PatternSource::new(PatternOptions {
            width: 7,
            height: 5,
            fps: 1.0,
            frames: 1,
        })
        .unwrap();
        assert!(src.next_frame().is_ok());
    }

    #[test]
    fn rejects_zero_size_and_rate() {
        let zero = PatternOptions {
            width: 0,
            ..Default::default()
        };
        assert!(PatternSource::new(zero).is_err());
        let still = PatternOptions {
            fps: 0.0,
            ..Default::default()
        };
        assert!(PatternSource::new(still).is_err());
    }

    #[test]
    fn parses_pattern_specs() {
        assert_eq!(parse_pattern("").unwrap(), PatternOptions::default());
        let o = parse_pattern("320x240").unwrap();
        assert_eq!((o.width, o.height, o.fps), (320, 240, 30.0));
        let o = parse_pattern("1920x1080@60").unwrap();
        assert_eq!((o.width, o.height, o.fps, o.frames), (1920, 1080, 60.0, 300));
        assert!(parse_pattern("wide").is_err());
        assert!(parse_pattern("10x10@fast").is_err());
    }

    #[test]
    fn rejects_rates_outside_range() {
        assert!(parse_pattern("8x8@0.00000000000000000001").is_err());
        assert!(parse_pattern("8x8@1e9").is_err());
        assert!(parse_pattern("8x8@NaN").is_err());
        let tiny = PatternOptions {
            fps: 1e-20,
            ..Default::default()
        };
        assert!(PatternSource::new(tiny).is_err());
        assert_eq!(parse_pattern("8x8@0.1").unwrap().frames, 1);
    }
}
