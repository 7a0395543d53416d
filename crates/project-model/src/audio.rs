//! Narration and music tracks.

use serde::{Deserialize, Serialize};

/// One narration or music track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioTrack {
    /// Stable identity. Decoded buffers are cached by this.
    pub id: String,

    /// Path or URL of the audio resource.
    #[serde(alias = "url")]
    pub source: String,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Linear gain in `[0, 1]`.
    pub volume: f32,

    #[serde(rename = "type")]
    pub kind: AudioKind,

    /// Reported duration in seconds. Informational only: the decoded
    /// buffer length is what the mixer uses.
    #[serde(default)]
    pub duration: f64,
}

/// Which list a track belongs to, and how it is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioKind {
    /// Plays once.
    Narration,
    /// Loops for as long as playback runs.
    Music,
}

impl AudioTrack {
    pub fn new(
        id: impl Into<String>,
        kind: AudioKind,
        source: impl Into<String>,
        volume: f32,
        duration: f64,
    ) -> Self {
        let source = source.into();
        let name = source
            .rsplit(|c: char| c == '/' || c == '\\')
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            id: id.into(),
            source,
            name,
            volume,
            kind,
            duration,
        }
    }

    pub fn narration(id: impl Into<String>, source: impl Into<String>, duration: f64) -> Self {
        Self::new(id, AudioKind::Narration, source, 1.0, duration)
    }

    pub fn music(id: impl Into<String>, source: impl Into<String>, duration: f64) -> Self {
        Self::new(id, AudioKind::Music, source, 1.0, duration)
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn loops(&self) -> bool {
        self.kind == AudioKind::Music
    }
}
