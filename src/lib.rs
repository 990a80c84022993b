use std::path::PathBuf;

use log::{debug, info};

pub mod error;
pub mod form;
pub mod options;
pub mod session;
pub mod transcoder;
pub mod uploader;

pub use error::{CompressError, Result};
pub use form::{Presentation, SettingsForm};
pub use options::{ConversionSettings, SettingKey};
pub use session::ConversionSession;
pub use uploader::{MediaFile, UploadState, VideoUploader};

const FFMPEG_PATH_ENV_VAR: &str = "FFMPEG_PATH";
const FFPROBE_PATH_ENV_VAR: &str = "FFPROBE_PATH";
const DEFAULT_FFMPEG: &str = "ffmpeg";
const DEFAULT_FFPROBE: &str = "ffprobe";

// Helper to get a tool path from the environment or fall back to a PATH lookup
pub fn resolve_tool(env_var: &str, default_name: &str) -> PathBuf {
    match std::env::var(env_var) {
        Ok(path) if !path.is_empty() => {
            debug!("Using {} from {}: {}", default_name, env_var, path);
            PathBuf::from(path)
        }
        _ => PathBuf::from(default_name),
    }
}

/// Where the encoder binaries live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl ToolPaths {
    pub fn from_env() -> Self {
        ToolPaths {
            ffmpeg: resolve_tool(FFMPEG_PATH_ENV_VAR, DEFAULT_FFMPEG),
            ffprobe: resolve_tool(FFPROBE_PATH_ENV_VAR, DEFAULT_FFPROBE),
        }
    }
}

impl Default for ToolPaths {
    fn default() -> Self {
        ToolPaths {
            ffmpeg: PathBuf::from(DEFAULT_FFMPEG),
            ffprobe: PathBuf::from(DEFAULT_FFPROBE),
        }
    }
}

type RefreshCallback = Box<dyn FnMut() -> bool>;

/// Hook for "a new version is available" notices from the hosting shell.
/// Holds at most one subscriber; the subscriber decides whether to reload.
#[derive(Default)]
pub struct UpdatePrompt {
    subscriber: Option<RefreshCallback>,
}

impl UpdatePrompt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any previous subscriber.
    pub fn subscribe(&mut self, on_need_refresh: impl FnMut() -> bool + 'static) {
        self.subscriber = Some(Box::new(on_need_refresh));
    }

    /// Returns true when the subscriber accepted the reload.
    pub fn need_refresh(&mut self) -> bool {
        let accepted = self.subscriber.as_mut().is_some_and(|cb| cb());
        info!("New version available; reload {}", if accepted { "accepted" } else { "declined" });
        accepted
    }
}
