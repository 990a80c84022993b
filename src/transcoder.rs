// Turns ConversionSettings into an ffmpeg invocation and runs it.
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info, trace, warn};
use serde::Deserialize;

use crate::ToolPaths;
use crate::error::{CompressError, Result};
use crate::options::{
    AudioBitrate, AudioCodec, ConversionSettings, FrameRate, QualityTarget, Resolution, VideoCodec, CRF_RANGE,
};

pub const DEFAULT_PRESET: &str = "medium";
/// Floor for a computed file-size bitrate so very long sources still encode.
const MIN_VIDEO_KBPS: u32 = 100;
/// Ceiling for the same, reached by large targets on very short sources.
const MAX_VIDEO_KBPS: u32 = 100_000;
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateControl {
    Crf(u8),
    Bitrate { kbps: u32 },
}

/// Everything ffmpeg needs, with the quality target already resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodePlan {
    pub video_codec: VideoCodec,
    pub rate: RateControl,
    pub resolution: Resolution,
    pub frame_rate: FrameRate,
    pub audio_codec: AudioCodec,
    pub audio_bitrate: AudioBitrate,
    pub duration_secs: Option<f64>,
}

impl TranscodePlan {
    pub fn new(settings: &ConversionSettings, duration_secs: Option<f64>) -> Result<TranscodePlan> {
        let rate = match settings.quality_target()? {
            QualityTarget::Bitrate(b) => RateControl::Bitrate { kbps: b.kbps() },
            QualityTarget::Crf(crf) => RateControl::Crf(crf),
            QualityTarget::Percentage(p) => RateControl::Crf(percentage_to_crf(p)),
            QualityTarget::FilesizeMb(mb) => {
                let secs = duration_secs
                    .filter(|d| *d > 0.0)
                    .ok_or(CompressError::MissingDuration)?;
                RateControl::Bitrate {
                    kbps: filesize_to_kbps(mb, secs, settings.audio_bitrate.kbps()),
                }
            }
        };
        Ok(TranscodePlan {
            video_codec: settings.video_codec,
            rate,
            resolution: settings.resolution,
            frame_rate: settings.frame_rate,
            audio_codec: settings.audio_codec,
            audio_bitrate: settings.audio_bitrate,
            duration_secs,
        })
    }
}

/// Linear map of a quality percentage onto the CRF scale: 100% is the best
/// CRF, 1% the worst.
pub fn percentage_to_crf(percentage: u8) -> u8 {
    let (best, worst) = CRF_RANGE;
    let p = u32::from(percentage.clamp(1, 100));
    let span = worst - best;
    (worst - ((p - 1) * span + 49) / 99) as u8
}

/// Video bitrate that makes `duration_secs` of output land near `size_mb`
/// once the audio track is accounted for.
pub fn filesize_to_kbps(size_mb: u32, duration_secs: f64, audio_kbps: u32) -> u32 {
    let total_kbits = f64::from(size_mb) * 8.0 * 1024.0 * 1024.0 / 1000.0;
    let video = total_kbits / duration_secs - f64::from(audio_kbps);
    if video < f64::from(MIN_VIDEO_KBPS) {
        MIN_VIDEO_KBPS
    } else if video > f64::from(MAX_VIDEO_KBPS) {
        MAX_VIDEO_KBPS
    } else {
        video as u32
    }
}

/// Bounds the output by `resolution` without upscaling, keeping the aspect
/// ratio and even dimensions.
pub fn scale_filter(resolution: Resolution) -> String {
    let (w, h) = resolution.dimensions();
    format!(
        "scale=w='min({},iw)':h='min({},ih)':force_original_aspect_ratio=decrease,scale=trunc(iw/2)*2:trunc(ih/2)*2",
        w, h
    )
}

pub fn build_ffmpeg_args(input_path: &Path, output_path: &Path, plan: &TranscodePlan) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-nostdin".into(),
        "-y".into(),
        "-i".into(),
        input_path.to_string_lossy().into_owned(),
        "-c:v".into(),
        plan.video_codec.as_str().into(),
    ];

    match plan.rate {
        RateControl::Crf(crf) => {
            args.extend(["-crf".into(), crf.to_string()]);
        }
        RateControl::Bitrate { kbps } => {
            let rate = format!("{}k", kbps);
            args.extend([
                "-b:v".into(),
                rate.clone(),
                "-maxrate".into(),
                rate,
                "-bufsize".into(),
                format!("{}k", kbps.saturating_mul(2)),
            ]);
        }
    }

    args.extend(["-preset".into(), DEFAULT_PRESET.into()]);

    match plan.video_codec {
        VideoCodec::H264 => args.extend(["-pix_fmt".into(), "yuv420p".into()]),
        VideoCodec::H265 => args.extend(["-tag:v".into(), "hvc1".into()]),
    }

    args.extend([
        "-vf".into(),
        scale_filter(plan.resolution),
        "-r".into(),
        plan.frame_rate.as_str().into(),
        "-c:a".into(),
        plan.audio_codec.as_str().into(),
        "-b:a".into(),
        plan.audio_bitrate.as_str().into(),
        "-progress".into(),
        "pipe:1".into(),
        "-nostats".into(),
        output_path.to_string_lossy().into_owned(),
    ]);
    args
}

#[derive(Deserialize)]
struct ProbeOutput {
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

pub fn parse_probe_duration(json: &str) -> Result<Option<f64>> {
    let parsed: ProbeOutput = serde_json::from_str(json)?;
    Ok(parsed
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0))
}

/// Source duration in seconds, or `None` when ffprobe cannot tell.
pub fn probe_duration(tools: &ToolPaths, input_path: &Path) -> Result<Option<f64>> {
    let output = Command::new(&tools.ffprobe)
        .args(["-v", "error", "-show_entries", "format=duration", "-of", "json"])
        .arg(input_path.as_os_str())
        .output()
        .map_err(|e| CompressError::FFprobe(format!("Failed to execute {:?}: {}", tools.ffprobe, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CompressError::FFprobe(format!(
            "ffprobe exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    let duration = parse_probe_duration(&String::from_utf8_lossy(&output.stdout))?;
    debug!("Probed duration of {:?}: {:?}", input_path, duration);
    Ok(duration)
}

/// Follows `-progress` output and reports whole percentages.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    duration_us: Option<f64>,
    percent: u8,
}

fn parse_clock_us(value: &str) -> Option<f64> {
    let mut parts = value.trim().split(':');
    let h: f64 = parts.next()?.parse().ok()?;
    let m: f64 = parts.next()?.parse().ok()?;
    let s: f64 = parts.next()?.parse().ok()?;
    Some(((h * 60.0 + m) * 60.0 + s) * 1_000_000.0)
}

impl ProgressTracker {
    pub fn new(duration_secs: Option<f64>) -> Self {
        ProgressTracker {
            duration_us: duration_secs.filter(|d| *d > 0.0).map(|d| d * 1_000_000.0),
            percent: 0,
        }
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    /// Feeds one `key=value` line. Returns the new percentage when it moved.
    pub fn update(&mut self, line: &str) -> Option<u8> {
        let (key, value) = line.trim().split_once('=')?;
        let next = match key {
            // out_time_ms is reported in microseconds as well.
            "out_time_us" | "out_time_ms" => self.percent_of(value.trim().parse().ok()?),
            "out_time" => self.percent_of(parse_clock_us(value)?),
            "progress" if value.trim() == "end" => 100,
            _ => return None,
        };
        if next > self.percent {
            self.percent = next;
            Some(next)
        } else {
            None
        }
    }

    fn percent_of(&self, elapsed_us: f64) -> u8 {
        match self.duration_us {
            Some(total) if elapsed_us > 0.0 => ((elapsed_us / total) * 100.0).min(100.0) as u8,
            _ => self.percent,
        }
    }
}

pub fn transcode_video(
    tools: &ToolPaths,
    input_path: &Path,
    output_path: &Path,
    plan: &TranscodePlan,
    cancel: &AtomicBool,
    mut on_progress: impl FnMut(u8),
) -> Result<()> {
    if !input_path.exists() {
        let err_msg = format!("Input file not found: {:?}", input_path);
        error!("{}", err_msg);
        return Err(std::io::Error::new(ErrorKind::NotFound, err_msg).into());
    }

    info!("Starting transcoding: {:?} -> {:?}", input_path, output_path);
    debug!("Transcode plan: {:?}", plan);

    if let Some(parent_dir) = output_path.parent() {
        if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
            std::fs::create_dir_all(parent_dir)?;
            info!("Created output directory: {:?}", parent_dir);
        }
    }

    let args = build_ffmpeg_args(input_path, output_path, plan);
    let mut cmd = Command::new(&tools.ffmpeg);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    trace!("Executing FFMPEG command: {:?}", cmd);

    let mut child = cmd
        .spawn()
        .map_err(|e| CompressError::FFmpeg(format!("Failed to execute {:?}: {}", tools.ffmpeg, e)))?;

    // Drained on its own thread so a chatty encoder never blocks on a full pipe.
    let stderr_reader = child.stderr.take().map(|mut stderr| {
        std::thread::spawn(move || {
            let mut buf = String::new();
            if let Err(e) = stderr.read_to_string(&mut buf) {
                debug!("Failed to read ffmpeg stderr: {}", e);
            }
            buf
        })
    });

    let mut tracker = ProgressTracker::new(plan.duration_secs);
    if let Some(stdout) = child.stdout.take() {
        for line in BufReader::new(stdout).lines().map_while(std::result::Result::ok) {
            if cancel.load(Ordering::Relaxed) {
                warn!("Cancelling ffmpeg for {:?}", input_path);
                if let Err(e) = child.kill() {
                    debug!("Failed to kill ffmpeg: {}", e);
                }
                if let Err(e) = child.wait() {
                    debug!("Failed to reap ffmpeg after kill: {}", e);
                }
                return Err(CompressError::Cancelled);
            }
            if let Some(pct) = tracker.update(&line) {
                on_progress(pct);
            }
        }
    }

    let status = child.wait()?;
    let stderr = stderr_reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();

    if cancel.load(Ordering::Relaxed) {
        return Err(CompressError::Cancelled);
    }

    if status.success() {
        if tracker.percent() < 100 {
            on_progress(100);
        }
        info!("Transcoding successful: {:?} -> {:?}", input_path, output_path);
        Ok(())
    } else {
        let lines: Vec<&str> = stderr.lines().collect();
        let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
        let err_msg = format!("ffmpeg exited with {}: {}", status, tail.trim());
        error!("{}", err_msg);
        Err(CompressError::FFmpeg(err_msg))
    }
}
