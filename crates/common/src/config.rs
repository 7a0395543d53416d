//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::clock::{DEFAULT_TICK_HZ, END_GRACE_SECS};
use crate::error::{NeoncutError, NeoncutResult};

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Output surface and encoder settings.
    pub output: OutputConfig,

    /// Playback and scheduling behavior.
    pub playback: PlaybackConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Reference output parameters shared by preview and export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Reference frame width in pixels (16:9 with `height`).
    pub width: u32,

    /// Reference frame height in pixels.
    pub height: u32,

    /// Clock tick rate and capture frame rate.
    pub fps: u32,

    /// Mixer output sample rate.
    pub sample_rate: u32,

    /// Mixer output channel count (interleaved).
    pub channels: u16,

    /// Export container.
    pub format: ContainerFormat,

    /// Video bitrate in kbps.
    pub video_bitrate_kbps: u32,

    /// Audio bitrate in kbps.
    pub audio_bitrate_kbps: u32,
}

/// Container written by the export encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    /// VP9 video + Opus audio.
    Webm,
    /// H.264 video + AAC audio.
    Mp4,
}

impl ContainerFormat {
    /// File extension without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Webm => "webm",
            Self::Mp4 => "mp4",
        }
    }

    /// MIME type of the finished artifact.
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Webm => "video/webm",
            Self::Mp4 => "video/mp4",
        }
    }

    /// Parse a user-supplied format name.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "webm" => Some(Self::Webm),
            "mp4" | "mp4-h264" => Some(Self::Mp4),
            _ => None,
        }
    }
}

/// How the tick loop is paced against the wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pacing {
    /// One tick per `1/fps` seconds of wall time.
    RealTime,
    /// Ticks run back to back. Timestamps are still derived from the clock.
    Unthrottled,
}

/// Where narration tracks sit on the shared time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrationPlacement {
    /// Every narration track starts at global time zero.
    Overlapping,
    /// Narration tracks play back to back in list order.
    Sequential,
}

/// Playback behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Pacing used by export runs.
    pub export_pacing: Pacing,

    /// Narration placement policy.
    pub narration_placement: NarrationPlacement,

    /// Maximum drift between a video decoder and the clock before a seek.
    pub seek_tolerance_secs: f64,

    /// How long playback keeps running past the last frame.
    pub end_grace_secs: f64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "neoncut=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output: OutputConfig::default(),
            playback: PlaybackConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: DEFAULT_TICK_HZ,
            sample_rate: 48_000,
            channels: 2,
            format: ContainerFormat::Webm,
            video_bitrate_kbps: 5000,
            audio_bitrate_kbps: 128,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            export_pacing: Pacing::RealTime,
            narration_placement: NarrationPlacement::Overlapping,
            seek_tolerance_secs: 0.3,
            end_grace_secs: END_GRACE_SECS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> NeoncutResult<Self> {
        Self::load_from(&config_file_path())
    }

    /// Load config from `path`. A missing or unparseable file yields the
    /// defaults; values that parse but are out of range are an error.
    pub fn load_from(path: &Path) -> NeoncutResult<Self> {
        let mut config = Self::default();
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(parsed) => config = parsed,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", path, e);
                }
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Check every section.
    pub fn validate(&self) -> NeoncutResult<()> {
        self.output.validate()?;
        self.playback.validate()
    }
}

impl OutputConfig {
    /// Reject sizes and rates the renderer and mixer cannot run with.
    pub fn validate(&self) -> NeoncutResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(NeoncutError::config(format!(
                "output size must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.fps == 0 {
            return Err(NeoncutError::config("output fps must be positive"));
        }
        if self.sample_rate == 0 {
            return Err(NeoncutError::config("output sample_rate must be positive"));
        }
        if self.channels == 0 {
            return Err(NeoncutError::config("output channels must be at least 1"));
        }
        Ok(())
    }
}

impl PlaybackConfig {
    pub fn validate(&self) -> NeoncutResult<()> {
        for (name, value) in [
            ("seek_tolerance_secs", self.seek_tolerance_secs),
            ("end_grace_secs", self.end_grace_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(NeoncutError::config(format!(
                    "playback {name} must be a non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("neoncut").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_surface() {
        let config = AppConfig::default();
        assert_eq!(config.output.width, 1280);
        assert_eq!(config.output.height, 720);
        assert_eq!(config.output.fps, 30);
        assert_eq!(config.playback.narration_placement, NarrationPlacement::Overlapping);
        assert!((config.playback.seek_tolerance_secs - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"playback":{"narration_placement":"sequential"}}"#).unwrap();
        assert_eq!(config.playback.narration_placement, NarrationPlacement::Sequential);
        assert_eq!(config.playback.export_pacing, Pacing::RealTime);
        assert_eq!(config.output.format, ContainerFormat::Webm);
    }

    #[test]
    fn test_zero_channels_rejected() {
        let mut config = AppConfig::default();
        config.output.channels = 0;
        assert!(matches!(config.validate(), Err(NeoncutError::Config { .. })));

        let mut config = AppConfig::default();
        config.output.sample_rate = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.output.width = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.playback.end_grace_secs = f64::NAN;
        assert!(config.validate().is_err());

        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_load_from_rejects_invalid_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"output":{"channels":0}}"#).unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, NeoncutError::Config { .. }));
        assert!(err.to_string().contains("channels"));
    }

    #[test]
    fn test_load_from_falls_back_on_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.output.channels, 2);

        let missing = AppConfig::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(missing.output.fps, 30);
    }

    #[test]
    fn test_container_format_parse() {
        assert_eq!(ContainerFormat::parse("WEBM"), Some(ContainerFormat::Webm));
        assert_eq!(ContainerFormat::parse("mp4-h264"), Some(ContainerFormat::Mp4));
        assert_eq!(ContainerFormat::parse("gif"), None);
        assert_eq!(ContainerFormat::Mp4.extension(), "mp4");
    }
}
