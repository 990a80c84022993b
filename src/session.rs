// Hosts one conversion at a time: owns the settings and the upload state the
// views render, and pushes engine progress back into that state.
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ToolPaths;
use crate::error::{CompressError, Result};
use crate::options::ConversionSettings;
use crate::transcoder::{TranscodePlan, probe_duration, transcode_video};
use crate::uploader::{MediaFile, UploadState};

pub const OUTPUT_SUFFIX: &str = "-compressed";
pub const OUTPUT_EXTENSION: &str = "mp4";

pub fn output_path_for(file: &MediaFile, output_dir: &Path) -> PathBuf {
    let stem = Path::new(&file.name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "video".to_string());
    output_dir.join(format!("{}{}.{}", stem, OUTPUT_SUFFIX, OUTPUT_EXTENSION))
}

pub struct ConversionSession {
    settings: ConversionSettings,
    upload: UploadState,
    tools: ToolPaths,
    cancel: Arc<AtomicBool>,
    engine_ready: bool,
}

impl ConversionSession {
    pub fn new(tools: ToolPaths) -> Self {
        ConversionSession {
            settings: ConversionSettings::default(),
            upload: UploadState::default(),
            tools,
            cancel: Arc::new(AtomicBool::new(false)),
            engine_ready: false,
        }
    }

    pub fn settings(&self) -> &ConversionSettings {
        &self.settings
    }

    pub fn replace_settings(&mut self, settings: ConversionSettings) {
        self.settings = settings;
    }

    pub fn upload_state(&self) -> &UploadState {
        &self.upload
    }

    pub fn select_file(&mut self, file: Option<MediaFile>) {
        self.upload.file = file;
        self.upload.error = None;
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.upload.error = Some(message.into());
    }

    pub fn clear_error(&mut self) {
        self.upload.error = None;
    }

    /// Flag checked by a running conversion; setting it stops ffmpeg.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Checks the encoder can be started, showing the engine-loading state meanwhile.
    pub async fn load_engine(&mut self, observer: &mut dyn FnMut(&UploadState)) -> Result<()> {
        if self.engine_ready {
            return Ok(());
        }
        self.upload.is_loading_engine = true;
        observer(&self.upload);

        let ffmpeg = self.tools.ffmpeg.clone();
        let check = tokio::task::spawn_blocking(move || {
            Command::new(&ffmpeg)
                .arg("-version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map_err(|e| CompressError::FFmpeg(format!("FFmpeg is not available ({:?}): {}", ffmpeg, e)))
                .and_then(|status| {
                    if status.success() {
                        Ok(())
                    } else {
                        Err(CompressError::FFmpeg(format!("FFmpeg version check failed with {}", status)))
                    }
                })
        })
        .await
        .map_err(|e| CompressError::FFmpeg(format!("Engine check task failed: {}", e)))
        .and_then(|r| r);

        self.upload.is_loading_engine = false;
        if check.is_ok() {
            info!("FFmpeg engine ready at {:?}", self.tools.ffmpeg);
            self.engine_ready = true;
        }
        observer(&self.upload);
        check
    }

    /// Converts the selected file with the current settings into `output_dir`.
    /// Failures are also left in the upload state for display.
    pub async fn convert(
        &mut self,
        output_dir: &Path,
        observer: &mut dyn FnMut(&UploadState),
    ) -> Result<PathBuf> {
        let result = self.run_conversion(output_dir, observer).await;

        self.upload.loading = false;
        self.upload.is_loading_engine = false;
        if let Err(e) = &result {
            error!("Conversion failed: {}", e);
            self.upload.error = Some(e.to_string());
        }
        observer(&self.upload);
        result
    }

    async fn run_conversion(
        &mut self,
        output_dir: &Path,
        observer: &mut dyn FnMut(&UploadState),
    ) -> Result<PathBuf> {
        let file = self.upload.file.clone().ok_or(CompressError::NoFileSelected)?;
        let input_path = file.path.clone().ok_or(CompressError::NoFileSelected)?;
        let job_id = Uuid::new_v4().to_string();
        self.upload.error = None;
        self.cancel.store(false, Ordering::Relaxed);

        self.load_engine(observer).await?;

        self.upload.loading = true;
        self.upload.progress = 0;
        observer(&self.upload);

        let tools = self.tools.clone();
        let probe_input = input_path.clone();
        let duration = match tokio::task::spawn_blocking(move || probe_duration(&tools, &probe_input)).await {
            Ok(Ok(d)) => d,
            Ok(Err(e)) => {
                warn!("[Job {}] Could not probe duration: {}", job_id, e);
                None
            }
            Err(e) => {
                warn!("[Job {}] Duration probe task failed: {}", job_id, e);
                None
            }
        };

        // The settings are handed off as a snapshot; later edits don't affect this run.
        let plan = TranscodePlan::new(&self.settings, duration)?;
        let output_path = output_path_for(&file, output_dir);
        info!("[Job {}] Converting {:?} -> {:?}", job_id, input_path, output_path);
        debug!("[Job {}] Settings: {:?}", job_id, self.settings);

        let (tx, mut rx) = mpsc::unbounded_channel::<u8>();
        let tools = self.tools.clone();
        let cancel = self.cancel.clone();
        let task_output = output_path.clone();
        let handle = tokio::task::spawn_blocking(move || {
            transcode_video(&tools, &input_path, &task_output, &plan, &cancel, |pct| {
                if tx.send(pct).is_err() {
                    debug!("Progress receiver dropped at {}%", pct);
                }
            })
        });

        while let Some(pct) = rx.recv().await {
            self.upload.progress = pct;
            observer(&self.upload);
        }

        match handle.await {
            Ok(Ok(())) => {
                info!("[Job {}] Successfully converted.", job_id);
                Ok(output_path)
            }
            Ok(Err(e)) => Err(e),
            Err(join_err) => Err(CompressError::FFmpeg(format!(
                "[Job {}] Transcoding task failed (panic/cancellation): {}",
                job_id, join_err
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::SettingKey;

    fn missing_tools(dir: &Path) -> ToolPaths {
        ToolPaths {
            ffmpeg: dir.join("no-such-ffmpeg"),
            ffprobe: dir.join("no-such-ffprobe"),
        }
    }

    #[test]
    fn test_output_path_for() {
        let file = MediaFile::new("holiday.mov", "video/quicktime");
        assert_eq!(
            output_path_for(&file, Path::new("out")),
            PathBuf::from("out/holiday-compressed.mp4")
        );
        let unnamed = MediaFile::new("", "video/mp4");
        assert_eq!(
            output_path_for(&unnamed, Path::new("out")),
            PathBuf::from("out/video-compressed.mp4")
        );
    }

    #[test]
    fn test_select_file_clears_error_and_settings_replace() {
        let mut session = ConversionSession::new(ToolPaths::default());
        session.set_error("old failure");
        session.select_file(Some(MediaFile::new("a.mp4", "video/mp4")));
        assert!(session.upload_state().error.is_none());

        let next = session
            .settings()
            .with_setting(SettingKey::CompressionMethod, "crf")
            .unwrap();
        session.replace_settings(next.clone());
        assert_eq!(session.settings(), &next);

        session.set_error("x");
        session.clear_error();
        assert!(session.upload_state().error.is_none());
    }

    #[tokio::test]
    async fn test_convert_without_file_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = ConversionSession::new(missing_tools(dir.path()));
        let err = session.convert(dir.path(), &mut |_| {}).await.unwrap_err();
        assert!(matches!(err, CompressError::NoFileSelected));
        let state = session.upload_state();
        assert_eq!(state.error.as_deref(), Some("Please select a video file first"));
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn test_missing_engine_surfaces_error_after_loading_state() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"x").unwrap();

        let mut session = ConversionSession::new(missing_tools(dir.path()));
        session.select_file(Some(MediaFile::from_path(&input).unwrap()));

        let mut seen = Vec::new();
        let err = session
            .convert(&dir.path().join("out"), &mut |s| seen.push(s.clone()))
            .await
            .unwrap_err();

        assert!(matches!(err, CompressError::FFmpeg(_)));
        assert!(seen.first().is_some_and(|s| s.is_loading_engine));
        let last = session.upload_state();
        assert!(!last.is_loading_engine);
        assert!(!last.loading);
        assert!(last.error.as_deref().is_some_and(|e| e.starts_with("FFmpeg error")));
    }

    #[cfg(unix)]
    fn fake_tools(dir: &Path, ffmpeg_body: &str) -> ToolPaths {
        use std::os::unix::fs::PermissionsExt;

        let write = |name: &str, body: &str| {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        };
        ToolPaths {
            ffmpeg: write(
                "ffmpeg",
                &format!("if [ \"$1\" = \"-version\" ]; then exit 0; fi\n{}", ffmpeg_body),
            ),
            ffprobe: write("ffprobe", r#"echo '{"format":{"duration":"10.0"}}'"#),
        }
    }

    #[cfg(unix)]
    fn session_with_clip(dir: &Path, ffmpeg_body: &str) -> ConversionSession {
        let input = dir.join("clip.mp4");
        std::fs::write(&input, b"x").unwrap();
        let mut session = ConversionSession::new(fake_tools(dir, ffmpeg_body));
        session.select_file(Some(MediaFile::from_path(&input).unwrap()));
        session
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_convert_reports_progress_and_output_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_with_clip(
            dir.path(),
            "echo out_time_us=5000000\necho out_time_us=10000000\necho progress=end",
        );

        let mut seen = Vec::new();
        let out_dir = dir.path().join("out");
        let path = session
            .convert(&out_dir, &mut |s| seen.push(s.clone()))
            .await
            .unwrap();

        assert_eq!(path, out_dir.join("clip-compressed.mp4"));
        let progress: Vec<u8> = seen.iter().map(|s| s.progress).collect();
        assert_eq!(progress, vec![0, 0, 0, 50, 100, 100]);
        assert!(seen[0].is_loading_engine);
        assert!(seen[2].loading && !seen[2].is_loading_engine);

        let last = session.upload_state();
        assert_eq!(last.progress, 100);
        assert!(!last.loading);
        assert!(last.error.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_convert_cancelled_mid_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_with_clip(
            dir.path(),
            "echo out_time_us=5000000\nsleep 1\necho out_time_us=6000000\necho progress=end",
        );

        let cancel = session.cancel_handle();
        let mut seen = Vec::new();
        let err = session
            .convert(dir.path(), &mut |s| {
                if s.progress >= 50 {
                    cancel.store(true, Ordering::Relaxed);
                }
                seen.push(s.progress);
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CompressError::Cancelled));
        assert!(!seen.contains(&60));
        let last = session.upload_state();
        assert_eq!(last.error.as_deref(), Some("Conversion cancelled"));
        assert!(!last.loading);
    }
}
