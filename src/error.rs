use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompressError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value '{value}' for setting '{key}'")]
    InvalidSetting { key: String, value: String },

    #[error("Please select a video file first")]
    NoFileSelected,

    #[error("Source duration unknown; cannot target a file size")]
    MissingDuration,

    #[error("FFmpeg error: {0}")]
    FFmpeg(String),

    #[error("FFprobe error: {0}")]
    FFprobe(String),

    #[error("Conversion cancelled")]
    Cancelled,
}

impl CompressError {
    pub fn invalid_setting(key: impl Into<String>, value: impl Into<String>) -> Self {
        CompressError::InvalidSetting {
            key: key.into(),
            value: value.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CompressError>;
