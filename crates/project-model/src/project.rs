//! Project snapshot and boundary validation.
//!
//! A project snapshot is the complete editor state handed to the engine:
//! the timeline, the watermark, and narration sync settings. Validation
//! happens here so the renderer and mixer can trust their input.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use neoncut_common::NeoncutError;

use crate::media::{MediaKind, MAX_INTENSITY, MIN_INTENSITY};
use crate::timeline::Timeline;
use crate::watermark::{
    WatermarkSettings, WATERMARK_MARGIN_RANGE, WATERMARK_OPACITY_RANGE, WATERMARK_SIZE_RANGE,
};

/// Shortest image duration narration auto-sync will assign.
pub const MIN_SYNCED_IMAGE_SECS: f64 = 0.5;

/// Auto-sync only rewrites durations when the target moves by more than this.
pub const AUTO_SYNC_EPSILON_SECS: f64 = 0.01;

/// Errors raised at the Timeline Model boundary.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("item {id}: duration must be a positive finite number, got {duration}")]
    InvalidDuration { id: String, duration: f64 },

    #[error("item {id}: intensity must be in [1, 10], got {intensity}")]
    InvalidIntensity { id: String, intensity: u8 },

    #[error("track {id}: volume must be in [0, 1], got {volume}")]
    InvalidVolume { id: String, volume: f32 },

    #[error("watermark {field} must be in [{min}, {max}], got {value}")]
    InvalidWatermark {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("duplicate id: {id}")]
    DuplicateId { id: String },

    #[error("no entity with id {id}")]
    NotFound { id: String },

    #[error("index {index} out of range for {len} items")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid snapshot: {0}")]
    Parse(#[from] serde_json::Error),
}

impl From<ModelError> for NeoncutError {
    fn from(e: ModelError) -> Self {
        NeoncutError::timeline(e.to_string())
    }
}

/// Narration-driven image timing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrationSettings {
    /// Stretch image durations so the visual track covers the narration.
    #[serde(alias = "autoSync")]
    pub auto_sync: bool,

    /// Duration applied to every image item, in seconds.
    #[serde(alias = "imageDuration")]
    pub image_duration: f64,
}

impl Default for NarrationSettings {
    fn default() -> Self {
        Self {
            auto_sync: false,
            image_duration: 5.0,
        }
    }
}

/// The full editor state the engine renders from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectState {
    #[serde(flatten)]
    pub timeline: Timeline,

    #[serde(alias = "visualIdentity")]
    pub watermark: WatermarkSettings,

    #[serde(alias = "narrationSettings")]
    pub narration_settings: NarrationSettings,
}

impl ProjectState {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            timeline,
            ..Default::default()
        }
    }

    /// Parse a snapshot from JSON. Unknown fields are ignored.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a snapshot from disk. The file is never written back.
    pub fn load_snapshot(path: &Path) -> Result<Self, ModelError> {
        let json = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, ModelError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject the snapshot on the first boundary violation.
    pub fn validate(&self) -> Result<(), ModelError> {
        match self.issues().into_iter().next() {
            Some(issue) => Err(issue),
            None => Ok(()),
        }
    }

    /// Every boundary violation, in timeline order.
    pub fn issues(&self) -> Vec<ModelError> {
        let mut issues = Vec::new();
        let mut seen = HashSet::new();

        for item in &self.timeline.items {
            if !seen.insert(item.id.as_str()) {
                issues.push(ModelError::DuplicateId {
                    id: item.id.clone(),
                });
            }
            if !item.duration.is_finite() || item.duration <= 0.0 {
                issues.push(ModelError::InvalidDuration {
                    id: item.id.clone(),
                    duration: item.duration,
                });
            }
            if !(MIN_INTENSITY..=MAX_INTENSITY).contains(&item.intensity) {
                issues.push(ModelError::InvalidIntensity {
                    id: item.id.clone(),
                    intensity: item.intensity,
                });
            }
        }

        for track in self.timeline.audio_tracks() {
            if !seen.insert(track.id.as_str()) {
                issues.push(ModelError::DuplicateId {
                    id: track.id.clone(),
                });
            }
            if !(0.0..=1.0).contains(&track.volume) {
                issues.push(ModelError::InvalidVolume {
                    id: track.id.clone(),
                    volume: track.volume,
                });
            }
        }

        let watermark = &self.watermark;
        for (field, value, (min, max)) in [
            ("size", watermark.size, WATERMARK_SIZE_RANGE),
            ("opacity", watermark.opacity, WATERMARK_OPACITY_RANGE),
            ("margin", watermark.margin, WATERMARK_MARGIN_RANGE),
        ] {
            if !(min..=max).contains(&value) {
                issues.push(ModelError::InvalidWatermark {
                    field,
                    value,
                    min,
                    max,
                });
            }
        }

        issues
    }

    /// Image duration that makes the visual track cover the narration, or
    /// `None` when there is nothing to sync.
    pub fn synced_image_duration(&self) -> Option<f64> {
        let narration_total = self.timeline.narration_duration_secs();
        let (images, video_total) =
            self.timeline
                .items
                .iter()
                .fold((0usize, 0.0f64), |(images, video), item| match item.kind {
                    MediaKind::Image => (images + 1, video),
                    MediaKind::Video => (images, video + item.duration),
                });

        if images == 0 || narration_total <= 0.0 {
            return None;
        }
        let remaining = (narration_total - video_total).max(0.0);
        Some((remaining / images as f64).max(MIN_SYNCED_IMAGE_SECS))
    }

    /// Re-run narration auto-sync. Returns `true` when image durations
    /// changed.
    pub fn auto_sync(&mut self) -> bool {
        if !self.narration_settings.auto_sync {
            return false;
        }
        let Some(per_image) = self.synced_image_duration() else {
            return false;
        };
        if (self.narration_settings.image_duration - per_image).abs() <= AUTO_SYNC_EPSILON_SECS {
            return false;
        }
        self.narration_settings.image_duration = (per_image * 100.0).round() / 100.0;
        self.set_image_durations(per_image);
        true
    }

    /// Manually set the image duration. Ignored while auto-sync is on.
    pub fn set_image_duration(&mut self, secs: f64) -> bool {
        if self.narration_settings.auto_sync {
            return false;
        }
        self.narration_settings.image_duration = secs;
        self.set_image_durations(secs);
        true
    }

    /// Toggle auto-sync, syncing immediately when switched on.
    pub fn set_auto_sync(&mut self, enabled: bool) {
        self.narration_settings.auto_sync = enabled;
        if enabled {
            self.auto_sync();
        }
    }

    fn set_image_durations(&mut self, secs: f64) {
        for item in &mut self.timeline.items {
            if item.kind == MediaKind::Image {
                item.duration = secs;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioTrack;
    use crate::media::MediaItem;

    fn project() -> ProjectState {
        let mut timeline = Timeline::new();
        timeline.push_item(MediaItem::image("a", "a.png", 5.0));
        timeline.push_item(MediaItem::video("v", "clip.mp4", 4.0));
        timeline.push_item(MediaItem::image("b", "b.png", 5.0));
        ProjectState::new(timeline)
    }

    #[test]
    fn test_valid_project_passes() {
        assert!(project().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_positive_duration() {
        let mut state = project();
        state.timeline.items[0].duration = 0.0;
        state.timeline.items[1].duration = f64::NAN;
        let issues = state.issues();
        assert_eq!(
            issues
                .iter()
                .filter(|e| matches!(e, ModelError::InvalidDuration { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn test_rejects_duplicate_ids_across_lists() {
        let mut state = project();
        state
            .timeline
            .push_audio(AudioTrack::narration("a", "voice.mp3", 3.0));
        assert!(matches!(
            state.validate(),
            Err(ModelError::DuplicateId { id }) if id == "a"
        ));
    }

    #[test]
    fn test_rejects_out_of_range_settings() {
        let mut state = project();
        state.timeline.items[0].intensity = 11;
        state
            .timeline
            .push_audio(AudioTrack::music("m", "bed.mp3", 30.0).with_volume(1.5));
        state.watermark.size = 60.0;
        let issues = state.issues();
        assert!(issues
            .iter()
            .any(|e| matches!(e, ModelError::InvalidIntensity { intensity: 11, .. })));
        assert!(issues
            .iter()
            .any(|e| matches!(e, ModelError::InvalidVolume { .. })));
        assert!(issues
            .iter()
            .any(|e| matches!(e, ModelError::InvalidWatermark { field: "size", .. })));
    }

    #[test]
    fn test_auto_sync_spreads_remaining_narration_over_images() {
        let mut state = project();
        state
            .timeline
            .push_audio(AudioTrack::narration("n1", "one.mp3", 10.0));
        state
            .timeline
            .push_audio(AudioTrack::narration("n2", "two.mp3", 11.0));
        state.set_auto_sync(true);

        // (21 - 4) / 2 images
        assert_eq!(state.narration_settings.image_duration, 8.5);
        assert_eq!(state.timeline.items[0].duration, 8.5);
        assert_eq!(state.timeline.items[1].duration, 4.0);
        assert_eq!(state.timeline.total_duration_secs(), 21.0);
        assert!(!state.auto_sync());
    }

    #[test]
    fn test_auto_sync_respects_minimum() {
        let mut state = project();
        state
            .timeline
            .push_audio(AudioTrack::narration("n1", "short.mp3", 2.0));
        state.set_auto_sync(true);
        assert_eq!(state.timeline.items[0].duration, MIN_SYNCED_IMAGE_SECS);
    }

    #[test]
    fn test_auto_sync_needs_narration_and_images() {
        let mut state = project();
        state.narration_settings.auto_sync = true;
        assert!(!state.auto_sync());
        assert_eq!(state.timeline.items[0].duration, 5.0);
    }

    #[test]
    fn test_manual_image_duration_blocked_by_auto_sync() {
        let mut state = project();
        assert!(state.set_image_duration(3.0));
        assert_eq!(state.timeline.total_duration_secs(), 10.0);
        state.narration_settings.auto_sync = true;
        assert!(!state.set_image_duration(1.0));
    }

    #[test]
    fn test_parses_editor_snapshot() {
        let json = r#"{
            "timeline": [
                {"id":"a","type":"image","url":"a.png","name":"a","duration":2,"effect":"none","filter":"none","transition":"none","intensity":1},
                {"id":"b","type":"image","url":"b.png","name":"b","duration":3,"effect":"zoom-in","filter":"none","transition":"fade","intensity":5}
            ],
            "narration": [{"id":"n","url":"n.mp3","name":"n","volume":1,"type":"narration","duration":4}],
            "backgroundMusic": [{"id":"m","url":"m.mp3","name":"m","volume":0.3,"type":"music","duration":60}],
            "narrationSettings": {"autoSync": false, "imageDuration": 5},
            "visualIdentity": {"logoUrl": null, "enabled": false, "position": "top-left", "size": 15, "opacity": 80, "margin": 5}
        }"#;
        let state = ProjectState::from_json(json).unwrap();
        assert_eq!(state.timeline.items.len(), 2);
        assert_eq!(state.timeline.music.len(), 1);
        assert_eq!(state.timeline.total_duration_secs(), 5.0);
        assert!(state.validate().is_ok());
    }

    #[test]
    fn test_model_error_converts_to_timeline_error() {
        let err: NeoncutError = ModelError::NotFound { id: "x".into() }.into();
        assert!(matches!(err, NeoncutError::Timeline { .. }));
    }
}
