use std::time::Duration;

use thiserror::Error;

/// Pixel layouts a source may hand to the decoder task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Packed RGBA, 8 bits per channel. The renderer only accepts this.
    Rgba8,
    /// Packed BGRA, as delivered by most camera backends.
    Bgra8,
    /// Planar YUV 4:2:0: full-size Y plane followed by quarter-size U and V.
    I420,
}

impl PixelFormat {
    /// Bytes per pixel of the first (or only) plane.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => 4,
            PixelFormat::I420 => 1,
        }
    }

    /// Name used on the ffmpeg command line.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            PixelFormat::Rgba8 => "rgba",
            PixelFormat::Bgra8 => "bgra",
            PixelFormat::I420 => "yuv420p",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame buffer is {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },
    #[error("stride {stride} is smaller than a {width}px row of {format:?}")]
    Stride {
        stride: u32,
        width: u32,
        format: PixelFormat,
    },
    #[error("zero-sized frame ({width}x{height})")]
    Empty { width: u32, height: u32 },
}

/// A raw decoded frame owned by whoever holds it.
///
/// `stride` describes the first plane. For `I420` the chroma planes are
/// tightly packed at `ceil(width / 2)` bytes per row.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    /// Presentation time relative to the start of the stream.
    pub pts: Option<Duration>,
    /// Assigned by the frame slot on publish. Zero until then.
    pub seq: u64,
}

impl Frame {
    /// Build a tightly packed frame, validating the buffer length.
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self, FrameError> {
        let stride = width * format.bytes_per_pixel();
        Self::with_stride(data, width, height, stride, format)
    }

    pub fn with_stride(
        data: Vec<u8>,
        width: u32,
        height: u32,
        stride: u32,
        format: PixelFormat,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::Empty { width, height });
        }
        if stride < width * format.bytes_per_pixel() {
            return Err(FrameError::Stride {
                stride,
                width,
                format,
            });
        }
        let expected = Self::byte_len_with_stride(format, width, height, stride);
        if data.len() != expected {
            return Err(FrameError::BufferSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            stride,
            format,
            pts: None,
            seq: 0,
        })
    }

    pub fn with_pts(mut self, pts: Duration) -> Self {
        self.pts = Some(pts);
        self
    }

    /// Size in bytes of a tightly packed frame.
    pub fn byte_len_for(format: PixelFormat, width: u32, height: u32) -> usize {
        Self::byte_len_with_stride(format, width, height, width * format.bytes_per_pixel())
    }

    fn byte_len_with_stride(format: PixelFormat, width: u32, height: u32, stride: u32) -> usize {
        let luma = stride as usize * height as usize;
        match format {
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => luma,
            PixelFormat::I420 => {
                let (cw, ch) = chroma_size(width, height);
                luma + 2 * (cw as usize * ch as usize)
            }
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_rgba(&self) -> bool {
        self.format == PixelFormat::Rgba8 && self.stride == self.width * 4
    }
}

/// Chroma plane dimensions for 4:2:0 subsampling (rounded up).
pub fn chroma_size(width: u32, height: u32) -> (u32, u32) {
    (width.div_ceil(2), height.div_ceil(2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba_length_is_validated() {
        let err = Frame::new(vec![0; 15], 2, 2, PixelFormat::Rgba8).unwrap_err();
        assert_eq!(
            err,
            FrameError::BufferSize {
                expected: 16,
                actual: 15
            }
        );
        assert!(Frame::new(vec![0; 16], 2, 2, PixelFormat::Rgba8).is_ok());
    }

    #[test]
    fn i420_odd_dimensions_round_chroma_up() {
        // 3x3 luma + 2 * (2x2) chroma
        assert_eq!(Frame::byte_len_for(PixelFormat::I420, 3, 3), 9 + 8);
        assert!(Frame::new(vec![0; 17], 3, 3, PixelFormat::I420).is_ok());
    }

    #[test]
    fn padded_stride_accepted() {
        let frame = Frame::with_stride(vec![0; 24], 2, 2, 12, PixelFormat::Rgba8).unwrap();
        assert!(!frame.is_rgba());
        assert_eq!(frame.seq, 0);
    }

    #[test]
    fn short_stride_rejected() {
        let err = Frame::with_stride(vec![0; 8], 2, 2, 4, PixelFormat::Bgra8).unwrap_err();
        assert!(matches!(err, FrameError::Stride { stride: 4, .. }));
    }

    #[test]
    fn empty_frame_rejected() {
        assert!(matches!(
            Frame::new(vec![], 0, 4, PixelFormat::Rgba8),
            Err(FrameError::Empty { .. })
        ));
    }
}
