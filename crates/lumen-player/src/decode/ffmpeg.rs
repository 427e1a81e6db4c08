//! Streaming decode through an `ffmpeg` subprocess.
//!
//! - `ffprobe` reads stream metadata (dimensions, fps, duration) at open time
//! - `ffmpeg -f rawvideo` writes one raw frame after another to a pipe
//! - Rewinding kills the process and starts a new one from position 0,
//!   which also throws away everything the codec had buffered
//!
//! Anything ffmpeg can open works: local files, `http(s)://`, `rtmp://`.

use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::source::{FrameSource, Interrupter, SourceError, SourceInfo};
use crate::logging::RepeatFilter;
use crate::media::{Frame, PixelFormat};

/// Check if ffmpeg/ffprobe are available on the system. Cached per process.
pub fn ffmpeg_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| {
        ["ffprobe", "ffmpeg"].iter().all(|tool| {
            Command::new(tool)
                .arg("-version")
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|s| s.success())
                .unwrap_or(false)
        })
    })
}

/// Video metadata from ffprobe.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMeta {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration_secs: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct FfmpegOptions {
    /// Index among the input's video streams (`-map 0:v:N`).
    pub stream_index: usize,
    /// Layout ffmpeg writes to the pipe. `Rgba8` or `I420`.
    pub format: PixelFormat,
    /// Let ffmpeg's scaler resize to this size.
    pub target_size: Option<(u32, u32)>,
}

impl Default for FfmpegOptions {
    fn default() -> Self {
        Self {
            stream_index: 0,
            format: PixelFormat::Rgba8,
            target_size: None,
        }
    }
}

/// Probe video metadata using ffprobe.
pub fn probe_video(input: &str, stream_index: usize) -> Result<VideoMeta, SourceError> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
            "-select_streams",
            &format!("v:{stream_index}"),
        ])
        .arg(input)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .map_err(|e| SourceError::fatal("ffprobe", format!("failed to execute: {e}")))?;

    if !output.status.success() {
        return Err(SourceError::fatal(
            "ffprobe",
            format!("{input}: {}", output.status),
        ));
    }

    parse_probe(&output.stdout).map_err(|e| SourceError::fatal("ffprobe", e))
}

fn parse_probe(stdout: &[u8]) -> Result<VideoMeta, String> {
    let json: serde_json::Value = serde_json::from_slice(stdout)
        .map_err(|e| format!("Failed to parse ffprobe JSON: {e}"))?;

    let streams = json["streams"]
        .as_array()
        .ok_or("No streams in ffprobe output")?;

    let video_stream = streams
        .iter()
        .find(|s| s["codec_type"].as_str() == Some("video"))
        .ok_or("No video stream found")?;

    let width = video_stream["width"].as_u64().ok_or("Missing width")? as u32;
    let height = video_stream["height"].as_u64().ok_or("Missing height")? as u32;
    if width == 0 || height == 0 {
        return Err(format!("Invalid video size {width}x{height}"));
    }

    // avg_frame_rate is 0/0 for some live streams; r_frame_rate is always set
    let fps = ["avg_frame_rate", "r_frame_rate"]
        .iter()
        .filter_map(|key| video_stream[*key].as_str())
        .map(parse_frame_rate)
        .find(|fps| *fps > 0.0)
        .unwrap_or(30.0);

    let duration_secs = json["format"]["duration"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .or_else(|| {
            video_stream["duration"]
                .as_str()
                .and_then(|s| s.parse::<f64>().ok())
        });

    Ok(VideoMeta {
        width,
        height,
        fps,
        duration_secs,
    })
}

fn parse_frame_rate(rate: &str) -> f64 {
    if let Some((num, den)) = rate.split_once('/') {
        let n: f64 = num.parse().unwrap_or(0.0);
        let d: f64 = den.parse().unwrap_or(0.0);
        if d > 0.0 { n / d } else { 0.0 }
    } else {
        rate.parse().unwrap_or(0.0)
    }
}

/// Outcome of topping up a partially filled frame buffer.
#[derive(Debug, PartialEq, Eq)]
enum Fill {
    Frame,
    /// End of input exactly at a frame boundary.
    Eof,
    /// End of input mid-frame, with this many bytes read.
    Truncated(usize),
    /// Nothing more for now; `filled` keeps what was read.
    WouldBlock,
}

/// Read into `buf[*filled..]` until it holds a whole frame.
fn fill_frame<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    filled: &mut usize,
) -> std::io::Result<Fill> {
    while *filled < buf.len() {
        match reader.read(&mut buf[*filled..]) {
            Ok(0) if *filled == 0 => return Ok(Fill::Eof),
            Ok(0) => {
                let got = *filled;
                *filled = 0;
                return Ok(Fill::Truncated(got));
            }
            Ok(n) => *filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(Fill::WouldBlock),
            Err(e) => return Err(e),
        }
    }
    *filled = 0;
    Ok(Fill::Frame)
}

/// Arguments for `ffmpeg` writing raw `format` frames of `size` to stdout.
fn ffmpeg_args(input: &str, options: &FfmpegOptions, size: (u32, u32)) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-loglevel", "error", "-i", input]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.extend([
        "-map".into(),
        format!("0:v:{}", options.stream_index),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        options.format.ffmpeg_name().into(),
    ]);
    if options.target_size.is_some() {
        args.extend(["-s".into(), format!("{}x{}", size.0, size.1)]);
    }
    args.push("pipe:1".into());
    args
}

type Launcher = Box<dyn Fn() -> Command + Send>;

/// Decodes one video stream through a long-running ffmpeg process.
pub struct FfmpegSource {
    input: String,
    info: SourceInfo,
    launch: Launcher,
    child: Arc<Mutex<Option<Child>>>,
    /// Set by the interrupter; the EOF that follows is not an error.
    interrupted: Arc<AtomicBool>,
    stdout: Option<ChildStdout>,
    buf: Vec<u8>,
    filled: usize,
    frame_index: u64,
}

impl FfmpegSource {
    pub fn open(input: &str, options: FfmpegOptions) -> Result<Self, SourceError> {
        if !matches!(options.format, PixelFormat::Rgba8 | PixelFormat::I420) {
            return Err(SourceError::fatal(
                "open",
                format!("unsupported decode format {:?}", options.format),
            ));
        }

        let meta = probe_video(input, options.stream_index)?;
        let (width, height) = options.target_size.unwrap_or((meta.width, meta.height));

        log::info!(
            "Probed {input}: {}x{} @ {:.2} fps{}",
            meta.width,
            meta.height,
            meta.fps,
            meta.duration_secs
                .map(|d| format!(", {d:.1}s"))
                .unwrap_or_default()
        );

        let info = SourceInfo {
            name: display_name(input),
            width,
            height,
            fps: meta.fps,
            format: options.format,
            duration_secs: meta.duration_secs,
            live: false,
        };

        let args = ffmpeg_args(input, &options, (width, height));
        Self::with_launcher(input, info, move || {
            let mut cmd = Command::new("ffmpeg");
            cmd.args(&args);
            cmd
        })
    }

    /// Run `launch()` for raw frames laid out as `info` describes. Every
    /// rewind launches it again.
    fn with_launcher(
        input: &str,
        info: SourceInfo,
        launch: impl Fn() -> Command + Send + 'static,
    ) -> Result<Self, SourceError> {
        let frame_len = Frame::byte_len_for(info.format, info.width, info.height);
        let mut source = Self {
            input: input.to_string(),
            info,
            launch: Box::new(launch),
            child: Arc::new(Mutex::new(None)),
            interrupted: Arc::new(AtomicBool::new(false)),
            stdout: None,
            buf: vec![0u8; frame_len],
            filled: 0,
            frame_index: 0,
        };
        source.spawn()?;
        Ok(source)
    }

    fn spawn(&mut self) -> Result<(), SourceError> {
        let mut child = (self.launch)()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SourceError::fatal("spawn ffmpeg", e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SourceError::fatal("spawn ffmpeg", "no stdout pipe"))?;

        if let Some(stderr) = child.stderr.take() {
            let _ = thread::Builder::new()
                .name("lumen-ffmpeg-log".into())
                .spawn(move || {
                    let mut filter = RepeatFilter::new();
                    for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                        for msg in filter.push(line.trim_end()) {
                            log::warn!("ffmpeg: {msg}");
                        }
                    }
                    for msg in filter.flush() {
                        log::warn!("ffmpeg: {msg}");
                    }
                });
        }

        *self.child.lock() = Some(child);
        self.interrupted.store(false, Ordering::SeqCst);
        self.stdout = Some(stdout);
        self.filled = 0;
        self.frame_index = 0;
        Ok(())
    }

    fn kill(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.lock().take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    /// Called on EOF at a frame boundary: clean exit is end of stream,
    /// anything else is a failure.
    fn reap(&mut self) -> SourceError {
        self.stdout = None;
        let Some(mut child) = self.child.lock().take() else {
            return SourceError::EndOfStream;
        };
        let status = child.wait();
        if self.interrupted.load(Ordering::SeqCst) {
            return SourceError::EndOfStream;
        }
        match status {
            Ok(status) if status.success() => SourceError::EndOfStream,
            Ok(status) => SourceError::fatal("ffmpeg", format!("{}: {status}", self.input)),
            Err(e) => SourceError::fatal("ffmpeg", e),
        }
    }
}

impl FrameSource for FfmpegSource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Frame, SourceError> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Err(SourceError::EndOfStream);
        };

        // Partial reads survive a WouldBlock; the next call resumes.
        match fill_frame(stdout, &mut self.buf, &mut self.filled) {
            Ok(Fill::Frame) => {}
            Ok(Fill::Eof) => return Err(self.reap()),
            Ok(Fill::Truncated(got)) => {
                return Err(SourceError::fatal(
                    "read_frame",
                    format!("truncated frame: {got} of {} bytes", self.buf.len()),
                ));
            }
            Ok(Fill::WouldBlock) => return Err(SourceError::WouldBlock),
            Err(e) => return Err(SourceError::fatal("read_frame", e)),
        }

        let frame = Frame::new(
            self.buf.clone(),
            self.info.width,
            self.info.height,
            self.info.format,
        )
        .map_err(|e| SourceError::fatal("read_frame", e))?;

        let secs = self.frame_index as f64 / self.info.fps.max(1e-3);
        self.frame_index += 1;
        Ok(match Duration::try_from_secs_f64(secs) {
            Ok(pts) => frame.with_pts(pts),
            Err(_) => frame,
        })
    }

    fn rewind(&mut self) -> Result<(), SourceError> {
        self.kill();
        self.spawn()
    }

    fn interrupter(&self) -> Option<Interrupter> {
        let child = self.child.clone();
        let interrupted = self.interrupted.clone();
        Some(Interrupter::new(move || {
            interrupted.store(true, Ordering::SeqCst);
            if let Some(child) = child.lock().as_mut() {
                let _ = child.kill();
            }
        }))
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Last path segment for files, the whole string for URLs.
fn display_name(input: &str) -> String {
    if input.contains("://") {
        return input.to_string();
    }
    std::path::Path::new(input)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(input)
        .to_string()
}
