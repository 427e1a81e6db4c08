use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use nokhwa::Camera;
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, CameraInfo, FrameFormat, RequestedFormat,
    RequestedFormatType, Resolution,
};

use super::source::{FrameSource, Interrupter, SourceError, SourceInfo};
use crate::media::{Frame, PixelFormat};

/// How long `next_frame` waits on the capture thread before `WouldBlock`.
const FRAME_POLL: Duration = Duration::from_millis(100);
const MAX_CONSECUTIVE_PANICS: u32 = 10;

type Captured = Result<Frame, String>;

fn requested_format(resolution: Option<(u32, u32)>) -> RequestedFormat<'static> {
    match resolution {
        Some((w, h)) => RequestedFormat::new::<RgbAFormat>(RequestedFormatType::Closest(
            CameraFormat::new(Resolution::new(w, h), FrameFormat::MJPEG, 30),
        )),
        None => RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestResolution),
    }
}

/// Live camera feed. `Camera` is not `Send`, so it lives on its own capture
/// thread and frames cross over a small channel.
pub struct WebcamSource {
    info: SourceInfo,
    frames: Receiver<Captured>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WebcamSource {
    /// Validates the camera can be opened before spawning the capture thread.
    pub fn open(device_index: u32, resolution: Option<(u32, u32)>) -> Result<Self, SourceError> {
        let name = list_devices()
            .unwrap_or_default()
            .into_iter()
            .find(|(idx, _)| *idx == device_index)
            .map(|(_, name)| name)
            .unwrap_or_else(|| format!("Camera {device_index}"));

        // Open, check, close; the capture thread reopens it.
        let (width, height, fps) = {
            let mut camera = Camera::new(
                CameraIndex::Index(device_index),
                requested_format(resolution),
            )
            .map_err(|e| open_error(device_index, e))?;
            camera
                .open_stream()
                .map_err(|e| open_error(device_index, e))?;
            let r = camera.resolution();
            let fps = camera.frame_rate();
            let _ = camera.stop_stream();
            (r.width(), r.height(), f64::from(fps))
        };

        log::info!("Webcam validated: {width}x{height} on device {device_index}");

        let (tx, rx) = crossbeam_channel::bounded(2);
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();

        let thread = std::thread::Builder::new()
            .name("lumen-webcam".into())
            .spawn(move || {
                let panic_tx = tx.clone();
                if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    capture_thread(device_index, resolution, tx, flag);
                })) {
                    let msg = if let Some(s) = e.downcast_ref::<&str>() {
                        s.to_string()
                    } else if let Some(s) = e.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "unknown panic".into()
                    };
                    log::error!("Webcam capture thread panicked: {msg}");
                    let _ = panic_tx.try_send(Err(format!("capture thread panicked: {msg}")));
                }
            })
            .map_err(|e| SourceError::fatal("spawn capture thread", e))?;

        Ok(Self {
            info: SourceInfo {
                name,
                width,
                height,
                fps: if fps > 0.0 { fps } else { 30.0 },
                format: PixelFormat::Rgba8,
                duration_secs: None,
                live: true,
            },
            frames: rx,
            shutdown,
            thread: Some(thread),
        })
    }
}

impl FrameSource for WebcamSource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Frame, SourceError> {
        match self.frames.recv_timeout(FRAME_POLL) {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(reason)) => Err(SourceError::fatal("capture", reason)),
            Err(RecvTimeoutError::Timeout) => Err(SourceError::WouldBlock),
            Err(RecvTimeoutError::Disconnected) => {
                Err(SourceError::fatal("capture", "capture thread exited"))
            }
        }
    }

    /// Live feeds never end.
    fn rewind(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    fn interrupter(&self) -> Option<Interrupter> {
        let shutdown = self.shutdown.clone();
        Some(Interrupter::new(move || shutdown.store(true, Ordering::Relaxed)))
    }
}

impl Drop for WebcamSource {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// List available webcam devices. Returns Vec of (index, human_name).
pub fn list_devices() -> Result<Vec<(u32, String)>, String> {
    let cameras =
        nokhwa::query(ApiBackend::Auto).map_err(|e| format!("Failed to query cameras: {e}"))?;
    Ok(cameras
        .into_iter()
        .map(|info: CameraInfo| {
            let idx = match info.index() {
                CameraIndex::Index(i) => *i,
                CameraIndex::String(_) => 0,
            };
            (idx, info.human_name().to_string())
        })
        .collect())
}

fn camera_error_message(device_index: u32, err: &str) -> String {
    if err.contains("Device or resource busy") {
        format!("Camera {device_index} is in use by another application")
    } else {
        format!("Failed to open camera {device_index}: {err}")
    }
}

fn open_error(device_index: u32, e: impl std::fmt::Display) -> SourceError {
    SourceError::fatal("open camera", camera_error_message(device_index, &e.to_string()))
}

fn capture_thread(
    device_index: u32,
    resolution: Option<(u32, u32)>,
    tx: Sender<Captured>,
    shutdown: Arc<AtomicBool>,
) {
    let opened = Camera::new(CameraIndex::Index(device_index), requested_format(resolution))
        .and_then(|mut camera| camera.open_stream().map(|()| camera));
    let mut camera = match opened {
        Ok(c) => c,
        Err(e) => {
            let _ = tx.try_send(Err(camera_error_message(device_index, &e.to_string())));
            return;
        }
    };

    let mut consecutive_panics: u32 = 0;

    while !shutdown.load(Ordering::Relaxed) {
        let buffer = match camera.frame() {
            Ok(buffer) => buffer,
            Err(e) => {
                if !shutdown.load(Ordering::Relaxed) {
                    log::warn!("Webcam frame error: {e}");
                    std::thread::sleep(Duration::from_millis(10));
                }
                continue;
            }
        };

        let res = buffer.resolution();
        // Corrupted MJPEG can panic inside the jpeg decoder
        let decoded = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            buffer.decode_image::<RgbAFormat>()
        }));
        match decoded {
            Ok(Ok(img)) => {
                consecutive_panics = 0;
                match Frame::new(img.into_raw(), res.width(), res.height(), PixelFormat::Rgba8) {
                    // Drop the frame if the decoder task is behind
                    Ok(frame) => {
                        let _ = tx.try_send(Ok(frame));
                    }
                    Err(e) => log::warn!("Discarding webcam frame: {e}"),
                }
            }
            Ok(Err(e)) => log::warn!("Failed to decode webcam frame: {e}"),
            Err(_) => {
                consecutive_panics += 1;
                log::warn!(
                    "Skipped corrupted webcam frame ({consecutive_panics}/{MAX_CONSECUTIVE_PANICS})"
                );
                if consecutive_panics >= MAX_CONSECUTIVE_PANICS {
                    let _ = tx.try_send(Err("camera produces only corrupted frames".into()));
                    break;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }

    let _ = camera.stop_stream();
    log::info!("Webcam capture stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_device_message() {
        let msg = camera_error_message(2, "open: Device or resource busy");
        assert_eq!(msg, "Camera 2 is in use by another application");
        let msg = camera_error_message(0, "no such device");
        assert!(msg.starts_with("Failed to open camera 0"));
    }
}
