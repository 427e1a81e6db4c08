//! CPU pixel conversion and scaling on the decoder thread.
//!
//! Everything here produces tightly packed `Rgba8`, the only layout the
//! renderer uploads.

use image::RgbaImage;
use image::imageops::{self, FilterType};

use super::frame::{Frame, FrameError, PixelFormat, chroma_size};

/// Convert any supported frame to tightly packed RGBA.
pub fn to_rgba(frame: Frame) -> Result<Frame, FrameError> {
    if frame.is_rgba() {
        return Ok(frame);
    }

    let (width, height) = frame.dimensions();
    let mut out = vec![0u8; Frame::byte_len_for(PixelFormat::Rgba8, width, height)];

    match frame.format {
        PixelFormat::Rgba8 => repack(&frame, &mut out, false),
        PixelFormat::Bgra8 => repack(&frame, &mut out, true),
        PixelFormat::I420 => i420_to_rgba(&frame, &mut out),
    }

    let mut converted = Frame::new(out, width, height, PixelFormat::Rgba8)?;
    converted.pts = frame.pts;
    converted.seq = frame.seq;
    Ok(converted)
}

fn repack(frame: &Frame, out: &mut [u8], swap_rb: bool) {
    let row_bytes = frame.width as usize * 4;
    for (y, dst_row) in out.chunks_exact_mut(row_bytes).enumerate() {
        let start = y * frame.stride as usize;
        let src_row = &frame.data[start..start + row_bytes];
        dst_row.copy_from_slice(src_row);
        if swap_rb {
            for px in dst_row.chunks_exact_mut(4) {
                px.swap(0, 2);
            }
        }
    }
}

/// BT.601 limited range (studio swing luma, centred chroma).
fn i420_to_rgba(frame: &Frame, out: &mut [u8]) {
    let width = frame.width as usize;
    let height = frame.height as usize;
    let stride = frame.stride as usize;
    let (cw, ch) = chroma_size(frame.width, frame.height);
    let (cw, ch) = (cw as usize, ch as usize);

    let y_plane = &frame.data[..stride * height];
    let u_plane = &frame.data[stride * height..stride * height + cw * ch];
    let v_plane = &frame.data[stride * height + cw * ch..];

    for row in 0..height {
        for col in 0..width {
            let y = f32::from(y_plane[row * stride + col]) / 255.0;
            let c = (row / 2) * cw + col / 2;
            let u = f32::from(u_plane[c]) / 255.0 - 0.5;
            let v = f32::from(v_plane[c]) / 255.0 - 0.5;

            let y = 1.164 * (y - 0.0625);
            let r = y + 1.596 * v;
            let g = y - 0.391 * u - 0.813 * v;
            let b = y + 2.018 * u;

            let i = (row * width + col) * 4;
            out[i] = unit_to_u8(r);
            out[i + 1] = unit_to_u8(g);
            out[i + 2] = unit_to_u8(b);
            out[i + 3] = 255;
        }
    }
}

fn unit_to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Resize an RGBA frame to the target presentation size.
pub fn scale_to(frame: Frame, width: u32, height: u32) -> Result<Frame, FrameError> {
    if frame.dimensions() == (width, height) {
        return Ok(frame);
    }
    let frame = to_rgba(frame)?;
    let (pts, seq) = (frame.pts, frame.seq);
    let (src_w, src_h) = frame.dimensions();
    let len = frame.data.len();

    let Some(img) = RgbaImage::from_raw(src_w, src_h, frame.data) else {
        return Err(FrameError::BufferSize {
            expected: Frame::byte_len_for(PixelFormat::Rgba8, src_w, src_h),
            actual: len,
        });
    };
    let resized = imageops::resize(&img, width, height, FilterType::Triangle);

    let mut scaled = Frame::new(resized.into_raw(), width, height, PixelFormat::Rgba8)?;
    scaled.pts = pts;
    scaled.seq = seq;
    Ok(scaled)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn i420(width: u32, height: u32, y: u8, u: u8, v: u8) -> Frame {
        let (cw, ch) = chroma_size(width, height);
        let mut data = vec![y; (width * height) as usize];
        data.extend(std::iter::repeat_n(u, (cw * ch) as usize));
        data.extend(std::iter::repeat_n(v, (cw * ch) as usize));
        Frame::new(data, width, height, PixelFormat::I420).unwrap()
    }

    fn close(a: u8, b: u8) -> bool {
        a.abs_diff(b) <= 2
    }

    #[test]
    fn i420_black_and_white() {
        let black = to_rgba(i420(2, 2, 16, 128, 128)).unwrap();
        assert!(black.data.chunks(4).all(|p| p[0] <= 2 && p[1] <= 2 && p[2] <= 2 && p[3] == 255));

        let white = to_rgba(i420(2, 2, 235, 128, 128)).unwrap();
        assert!(white.data.chunks(4).all(|p| p[0] >= 253 && p[1] >= 253 && p[2] >= 253));
    }

    #[test]
    fn i420_red_has_dominant_red_channel() {
        // BT.601 limited-range pure red
        let red = to_rgba(i420(2, 2, 81, 90, 240)).unwrap();
        let px = &red.data[0..4];
        assert!(close(px[0], 255), "r = {}", px[0]);
        assert!(px[1] < 10, "g = {}", px[1]);
        assert!(px[2] < 10, "b = {}", px[2]);
    }

    #[test]
    fn i420_odd_size_converts() {
        let frame = to_rgba(i420(3, 3, 128, 128, 128)).unwrap();
        assert_eq!(frame.data.len(), 3 * 3 * 4);
    }

    #[test]
    fn bgra_swaps_channels() {
        let frame = Frame::new(vec![1, 2, 3, 4], 1, 1, PixelFormat::Bgra8).unwrap();
        let rgba = to_rgba(frame).unwrap();
        assert_eq!(rgba.data, vec![3, 2, 1, 4]);
        assert_eq!(rgba.format, PixelFormat::Rgba8);
    }

    #[test]
    fn padded_rgba_is_repacked() {
        // 1px wide rows padded to 8 bytes
        let data = vec![1, 2, 3, 4, 0, 0, 0, 0, 5, 6, 7, 8, 0, 0, 0, 0];
        let frame = Frame::with_stride(data, 1, 2, 8, PixelFormat::Rgba8).unwrap();
        let rgba = to_rgba(frame).unwrap();
        assert_eq!(rgba.data, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(rgba.stride, 4);
    }

    #[test]
    fn conversion_keeps_timing() {
        let frame = i420(2, 2, 16, 128, 128).with_pts(Duration::from_millis(40));
        let rgba = to_rgba(frame).unwrap();
        assert_eq!(rgba.pts, Some(Duration::from_millis(40)));
    }

    #[test]
    fn scale_changes_dimensions() {
        let frame = Frame::new(vec![200; 4 * 4 * 4], 4, 4, PixelFormat::Rgba8).unwrap();
        let scaled = scale_to(frame, 2, 3).unwrap();
        assert_eq!(scaled.dimensions(), (2, 3));
        assert_eq!(scaled.data.len(), 2 * 3 * 4);
        assert!(scaled.data.iter().all(|&b| close(b, 200)));
    }

    #[test]
    fn scale_to_same_size_is_identity() {
        let frame = Frame::new(vec![9; 16], 2, 2, PixelFormat::Rgba8).unwrap();
        let scaled = scale_to(frame.clone(), 2, 2).unwrap();
        assert_eq!(scaled, frame);
    }
}
