use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CompressError, Result};

pub const DEFAULT_TARGET_PERCENTAGE: &str = "100";
pub const DEFAULT_TARGET_FILESIZE: &str = "100";
pub const DEFAULT_CRF_VALUE: &str = "23";

pub const PERCENTAGE_RANGE: (u32, u32) = (1, 100);
pub const FILESIZE_RANGE_MB: (u32, u32) = (1, 10240);
pub const CRF_RANGE: (u32, u32) = (18, 51);

// Each option enum serializes to the value the engine receives and carries the
// label the form shows for it.
macro_rules! option_enum {
    (
        $(#[$meta:meta])*
        $name:ident ($key:literal) {
            $($variant:ident => $wire:literal, $label:literal;)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $wire,)+
                }
            }

            pub fn label(self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = CompressError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    other => Err(CompressError::invalid_setting($key, other)),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

option_enum! {
    /// Which single quality control drives the encode.
    CompressionMethod("compressionMethod") {
        Bitrate => "bitrate", "Target a max bitrate";
        Percentage => "percentage", "Target a quality percentage";
        Filesize => "filesize", "Target a file size (MB)";
        Crf => "crf", "Target a video quality (CRF)";
    }
}

option_enum! {
    VideoBitrate("videoBitrate") {
        Kbps300 => "300k", "300 Kbps";
        Kbps1000 => "1000k", "1 Mbps";
        Kbps2500 => "2500k", "2.5 Mbps";
        Kbps5000 => "5000k", "5 Mbps";
        Kbps8000 => "8000k", "8 Mbps";
    }
}

option_enum! {
    /// Encoder identifiers handed to ffmpeg.
    VideoCodec("videoCodec") {
        H264 => "libx264", "H.264";
        H265 => "libx265", "H.265";
    }
}

option_enum! {
    AudioCodec("audioCodec") {
        Aac => "aac", "AAC";
        Mp3 => "mp3", "MP3";
    }
}

option_enum! {
    AudioBitrate("audioBitrate") {
        Kbps64 => "64k", "64 kbps";
        Kbps96 => "96k", "96 kbps";
        Kbps128 => "128k", "128 kbps";
        Kbps192 => "192k", "192 kbps";
        Kbps256 => "256k", "256 kbps";
    }
}

option_enum! {
    FrameRate("frameRate") {
        Fps24 => "24", "24 fps";
        Fps30 => "30", "30 fps";
        Fps60 => "60", "60 fps";
    }
}

option_enum! {
    /// Upper bound on output dimensions. Scaling keeps the source aspect ratio
    /// and never enlarges a smaller source.
    Resolution("resolution") {
        P1080 => "1920x1080", "1080p (1920px)";
        P720 => "1280x720", "720p (1280px)";
        P480 => "854x480", "480p (854px)";
    }
}

// Rates are stored as "<n>k" so the numeric part is everything before the suffix.
fn kbps_of(wire: &str) -> u32 {
    wire.trim_end_matches('k').parse().unwrap_or(0)
}

impl VideoBitrate {
    pub fn kbps(self) -> u32 {
        kbps_of(self.as_str())
    }
}

impl AudioBitrate {
    pub fn kbps(self) -> u32 {
        kbps_of(self.as_str())
    }
}

impl FrameRate {
    pub fn fps(self) -> u32 {
        match self {
            FrameRate::Fps24 => 24,
            FrameRate::Fps30 => 30,
            FrameRate::Fps60 => 60,
        }
    }
}

impl Resolution {
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Resolution::P1080 => (1920, 1080),
            Resolution::P720 => (1280, 720),
            Resolution::P480 => (854, 480),
        }
    }
}

/// Names of the editable fields, as they appear in serialized settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    CompressionMethod,
    TargetPercentage,
    TargetFilesize,
    CrfValue,
    VideoBitrate,
    VideoCodec,
    AudioCodec,
    AudioBitrate,
    FrameRate,
    Resolution,
}

impl SettingKey {
    pub const ALL: &'static [SettingKey] = &[
        SettingKey::CompressionMethod,
        SettingKey::TargetPercentage,
        SettingKey::TargetFilesize,
        SettingKey::CrfValue,
        SettingKey::VideoBitrate,
        SettingKey::VideoCodec,
        SettingKey::AudioCodec,
        SettingKey::AudioBitrate,
        SettingKey::FrameRate,
        SettingKey::Resolution,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SettingKey::CompressionMethod => "compressionMethod",
            SettingKey::TargetPercentage => "targetPercentage",
            SettingKey::TargetFilesize => "targetFilesize",
            SettingKey::CrfValue => "crfValue",
            SettingKey::VideoBitrate => "videoBitrate",
            SettingKey::VideoCodec => "videoCodec",
            SettingKey::AudioCodec => "audioCodec",
            SettingKey::AudioBitrate => "audioBitrate",
            SettingKey::FrameRate => "frameRate",
            SettingKey::Resolution => "resolution",
        }
    }
}

impl FromStr for SettingKey {
    type Err = CompressError;

    // Accepts the camelCase field name or its snake_case spelling.
    fn from_str(s: &str) -> Result<Self> {
        let folded: String = s.chars().filter(|c| *c != '_').collect();
        SettingKey::ALL
            .iter()
            .copied()
            .find(|key| key.as_str().eq_ignore_ascii_case(&folded))
            .ok_or_else(|| CompressError::invalid_setting("key", s))
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authoritative quality target, resolved from the active compression method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityTarget {
    Bitrate(VideoBitrate),
    Percentage(u8),
    FilesizeMb(u32),
    Crf(u8),
}

/// Desired output of a conversion. Edits produce a new value; nothing mutates
/// a snapshot someone else may hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversionSettings {
    pub compression_method: CompressionMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_percentage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_filesize: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crf_value: Option<String>,
    pub video_bitrate: VideoBitrate,
    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,
    pub audio_bitrate: AudioBitrate,
    pub frame_rate: FrameRate,
    pub resolution: Resolution,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        ConversionSettings {
            compression_method: CompressionMethod::Bitrate,
            target_percentage: None,
            target_filesize: None,
            crf_value: None,
            video_bitrate: VideoBitrate::Kbps2500,
            video_codec: VideoCodec::H264,
            audio_codec: AudioCodec::Aac,
            audio_bitrate: AudioBitrate::Kbps128,
            frame_rate: FrameRate::Fps30,
            resolution: Resolution::P1080,
        }
    }
}

fn or_default<'a>(value: &'a Option<String>, fallback: &'static str) -> &'a str {
    match value.as_deref() {
        Some(v) if !v.is_empty() => v,
        _ => fallback,
    }
}

fn parse_in_range(key: SettingKey, raw: &str, (min, max): (u32, u32)) -> Result<u32> {
    raw.trim()
        .parse::<u32>()
        .ok()
        .filter(|v| (min..=max).contains(v))
        .ok_or_else(|| CompressError::invalid_setting(key.as_str(), raw))
}

impl ConversionSettings {
    /// Returns a copy with `key` replaced by the raw control value.
    ///
    /// The string-encoded targets are stored verbatim; range checks happen when
    /// the target is resolved. Enum fields only accept their option values.
    pub fn with_setting(&self, key: SettingKey, value: &str) -> Result<ConversionSettings> {
        let mut next = self.clone();
        match key {
            SettingKey::CompressionMethod => next.compression_method = value.parse()?,
            SettingKey::TargetPercentage => next.target_percentage = Some(value.to_string()),
            SettingKey::TargetFilesize => next.target_filesize = Some(value.to_string()),
            SettingKey::CrfValue => next.crf_value = Some(value.to_string()),
            SettingKey::VideoBitrate => next.video_bitrate = value.parse()?,
            SettingKey::VideoCodec => next.video_codec = value.parse()?,
            SettingKey::AudioCodec => next.audio_codec = value.parse()?,
            SettingKey::AudioBitrate => next.audio_bitrate = value.parse()?,
            SettingKey::FrameRate => next.frame_rate = value.parse()?,
            SettingKey::Resolution => next.resolution = value.parse()?,
        }
        Ok(next)
    }

    /// Current raw value of a field, with the form defaults applied.
    pub fn value_of(&self, key: SettingKey) -> &str {
        match key {
            SettingKey::CompressionMethod => self.compression_method.as_str(),
            SettingKey::TargetPercentage => self.effective_percentage(),
            SettingKey::TargetFilesize => self.effective_filesize(),
            SettingKey::CrfValue => self.effective_crf(),
            SettingKey::VideoBitrate => self.video_bitrate.as_str(),
            SettingKey::VideoCodec => self.video_codec.as_str(),
            SettingKey::AudioCodec => self.audio_codec.as_str(),
            SettingKey::AudioBitrate => self.audio_bitrate.as_str(),
            SettingKey::FrameRate => self.frame_rate.as_str(),
            SettingKey::Resolution => self.resolution.as_str(),
        }
    }

    pub fn effective_percentage(&self) -> &str {
        or_default(&self.target_percentage, DEFAULT_TARGET_PERCENTAGE)
    }

    pub fn effective_filesize(&self) -> &str {
        or_default(&self.target_filesize, DEFAULT_TARGET_FILESIZE)
    }

    pub fn effective_crf(&self) -> &str {
        or_default(&self.crf_value, DEFAULT_CRF_VALUE)
    }

    pub fn quality_target(&self) -> Result<QualityTarget> {
        let target = match self.compression_method {
            CompressionMethod::Bitrate => QualityTarget::Bitrate(self.video_bitrate),
            CompressionMethod::Percentage => {
                let v = parse_in_range(SettingKey::TargetPercentage, self.effective_percentage(), PERCENTAGE_RANGE)?;
                QualityTarget::Percentage(v as u8)
            }
            CompressionMethod::Filesize => {
                let v = parse_in_range(SettingKey::TargetFilesize, self.effective_filesize(), FILESIZE_RANGE_MB)?;
                QualityTarget::FilesizeMb(v)
            }
            CompressionMethod::Crf => {
                let v = parse_in_range(SettingKey::CrfValue, self.effective_crf(), CRF_RANGE)?;
                QualityTarget::Crf(v as u8)
            }
        };
        Ok(target)
    }

    pub fn from_json_file(path: &Path) -> Result<ConversionSettings> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
