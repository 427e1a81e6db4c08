use std::fs::File;
use std::path::Path;
use std::time::Duration;

use super::source::{FrameSource, SourceError, SourceInfo};
use crate::media::{Frame, PixelFormat};

/// Frame rate reported for a single still image. Each loop republishes it
/// one interval later, so a still costs one upload per second.
const STILL_FPS: f64 = 1.0;

/// Minimum GIF frame delay. Browsers clamp zero delays the same way.
const MIN_GIF_DELAY_MS: u32 = 20;

/// Pre-decoded still image or animated GIF.
pub struct ImageSource {
    info: SourceInfo,
    frames: Vec<Frame>,
    cursor: usize,
}

impl ImageSource {
    /// Load an image or animated GIF from a file path.
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image")
            .to_string();

        if ext == "gif" {
            let (frames, delays_ms) = load_gif(path)?;
            Self::animated(name, frames, &delays_ms)
        } else {
            let frame = load_still(path)?;
            Ok(Self::still(name, frame))
        }
    }

    pub fn still(name: String, frame: Frame) -> Self {
        let info = SourceInfo {
            name,
            width: frame.width,
            height: frame.height,
            fps: STILL_FPS,
            format: frame.format,
            duration_secs: None,
            live: false,
        };
        Self {
            info,
            frames: vec![frame.with_pts(Duration::ZERO)],
            cursor: 0,
        }
    }

    /// Frames carry cumulative delays as their timestamps.
    pub fn animated(
        name: String,
        frames: Vec<Frame>,
        delays_ms: &[u32],
    ) -> Result<Self, SourceError> {
        let Some(first) = frames.first() else {
            return Err(SourceError::fatal("open", "GIF has no frames"));
        };
        let (width, height, format) = (first.width, first.height, first.format);

        let mut elapsed_ms = 0u64;
        let frames: Vec<Frame> = frames
            .into_iter()
            .zip(delays_ms.iter().chain(std::iter::repeat(&MIN_GIF_DELAY_MS)))
            .map(|(frame, &delay)| {
                let pts = Duration::from_millis(elapsed_ms);
                elapsed_ms += u64::from(delay.max(MIN_GIF_DELAY_MS));
                frame.with_pts(pts)
            })
            .collect();

        let total_secs = elapsed_ms as f64 / 1000.0;
        let fps = frames.len() as f64 / total_secs;

        let info = SourceInfo {
            name,
            width,
            height,
            fps,
            format,
            duration_secs: Some(total_secs),
            live: false,
        };
        Ok(Self {
            info,
            frames,
            cursor: 0,
        })
    }
}

impl FrameSource for ImageSource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Frame, SourceError> {
        let frame = self
            .frames
            .get(self.cursor)
            .cloned()
            .ok_or(SourceError::EndOfStream)?;
        self.cursor += 1;
        Ok(frame)
    }

    fn rewind(&mut self) -> Result<(), SourceError> {
        self.cursor = 0;
        Ok(())
    }
}

/// Static image (PNG, JPEG, etc.) via the `image` crate.
fn load_still(path: &Path) -> Result<Frame, SourceError> {
    let img = image::open(path)
        .map_err(|e| SourceError::fatal("open", format!("{}: {e}", path.display())))?;
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();
    Frame::new(rgba.into_raw(), w, h, PixelFormat::Rgba8).map_err(|e| SourceError::fatal("open", e))
}

/// Decode every GIF frame onto a running canvas. Returns frames and delays in ms.
fn load_gif(path: &Path) -> Result<(Vec<Frame>, Vec<u32>), SourceError> {
    let file = File::open(path)
        .map_err(|e| SourceError::fatal("open", format!("{}: {e}", path.display())))?;
    let mut options = gif::DecodeOptions::new();
    options.set_color_output(gif::ColorOutput::RGBA);
    let mut reader = options
        .read_info(file)
        .map_err(|e| SourceError::fatal("open", format!("GIF header: {e}")))?;

    let width = u32::from(reader.width());
    let height = u32::from(reader.height());
    let mut canvas = vec![0u8; (width * height * 4) as usize];

    let mut frames = Vec::new();
    let mut delays_ms = Vec::new();

    while let Some(frame) = reader
        .read_next_frame()
        .map_err(|e| SourceError::fatal("read_frame", format!("GIF frame: {e}")))?
    {
        // Centiseconds
        delays_ms.push(u32::from(frame.delay) * 10);

        composite(
            &mut canvas,
            width,
            height,
            &frame.buffer,
            (u32::from(frame.left), u32::from(frame.top)),
            (u32::from(frame.width), u32::from(frame.height)),
        );

        let decoded = Frame::new(canvas.clone(), width, height, PixelFormat::Rgba8)
            .map_err(|e| SourceError::fatal("read_frame", e))?;
        frames.push(decoded);
    }

    log::info!(
        "Loaded GIF {}: {}x{}, {} frames",
        path.display(),
        width,
        height,
        frames.len()
    );

    Ok((frames, delays_ms))
}

/// Copy a partial RGBA patch onto the canvas, skipping transparent pixels.
fn composite(
    canvas: &mut [u8],
    width: u32,
    height: u32,
    patch: &[u8],
    (left, top): (u32, u32),
    (pw, ph): (u32, u32),
) {
    for y in 0..ph {
        let dst_y = top + y;
        if dst_y >= height {
            break;
        }
        for x in 0..pw {
            let dst_x = left + x;
            if dst_x >= width {
                break;
            }
            let src_idx = ((y * pw + x) * 4) as usize;
            let Some(src) = patch.get(src_idx..src_idx + 4) else {
                return;
            };
            if src[3] > 0 {
                let dst_idx = ((dst_y * width + dst_x) * 4) as usize;
                canvas[dst_idx..dst_idx + 4].copy_from_slice(src);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, rgba: [u8; 4]) -> Frame {
        let data = rgba.repeat((w * h) as usize);
        Frame::new(data, w, h, PixelFormat::Rgba8).unwrap()
    }

    #[test]
    fn still_yields_one_frame_then_end_of_stream() {
        let mut src = ImageSource::still("x.png".into(), solid(2, 2, [1, 2, 3, 255]));
        assert_eq!(src.info().fps, STILL_FPS);
        assert!(src.next_frame().is_ok());
        assert_eq!(src.next_frame(), Err(SourceError::EndOfStream));
        src.rewind().unwrap();
        assert!(src.next_frame().is_ok());
    }

    #[test]
    fn gif_delays_become_timestamps() {
        let frames = vec![solid(1, 1, [0; 4]), solid(1, 1, [1; 4]), solid(1, 1, [2; 4])];
        let mut src = ImageSource::animated("a.gif".into(), frames, &[100, 0, 50]).unwrap();

        let pts: Vec<_> = (0..3).map(|_| src.next_frame().unwrap().pts.unwrap()).collect();
        assert_eq!(
            pts,
            vec![
                Duration::ZERO,
                Duration::from_millis(100),
                Duration::from_millis(120)
            ]
        );
        // 100 + 20 (clamped) + 50
        assert_eq!(src.info().duration_secs, Some(0.17));
        assert!((src.info().fps - 3.0 / 0.17).abs() < 1e-6);
    }

    #[test]
    fn empty_gif_is_fatal() {
        assert!(matches!(
            ImageSource::animated("e.gif".into(), Vec::new(), &[]),
            Err(SourceError::Fatal { .. })
        ));
    }

    #[test]
    fn composite_respects_offset_and_alpha() {
        let mut canvas = vec![0u8; 3 * 3 * 4];
        // 2x1 patch: opaque red, transparent
        let patch = [255, 0, 0, 255, 9, 9, 9, 0];
        composite(&mut canvas, 3, 3, &patch, (1, 1), (2, 1));

        let px = |x: usize, y: usize| &canvas[(y * 3 + x) * 4..(y * 3 + x) * 4 + 4];
        assert_eq!(px(1, 1), [255, 0, 0, 255]);
        assert_eq!(px(2, 1), [0, 0, 0, 0]);
        assert_eq!(px(0, 0), [0, 0, 0, 0]);
    }

    #[test]
    fn composite_clips_at_canvas_edge() {
        let mut canvas = vec![0u8; 2 * 2 * 4];
        let patch = [7u8; 3 * 3 * 4];
        composite(&mut canvas, 2, 2, &patch, (1, 1), (3, 3));
        assert_eq!(&canvas[12..16], &[7, 7, 7, 7]);
        assert_eq!(&canvas[0..4], &[0, 0, 0, 0]);
    }

    #[test]
    fn loads_png_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.png");
        image::RgbaImage::from_pixel(4, 3, image::Rgba([10, 20, 30, 255]))
            .save(&path)
            .unwrap();

        let mut src = ImageSource::open(&path).unwrap();
        assert_eq!((src.info().width, src.info().height), (4, 3));
        assert_eq!(src.info().name, "tiny.png");
        let frame = src.next_frame().unwrap();
        assert_eq!(&frame.data[0..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn missing_file_is_fatal() {
        assert!(ImageSource::open(Path::new("/nonexistent/none.png")).is_err());
    }
}
