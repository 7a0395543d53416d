//! Visual timeline entries.

use serde::{Deserialize, Serialize};

/// Lowest accepted zoom intensity.
pub const MIN_INTENSITY: u8 = 1;
/// Highest accepted zoom intensity.
pub const MAX_INTENSITY: u8 = 10;

/// Zoom speed contributed by each intensity step.
pub const ZOOM_SPEED_PER_INTENSITY: f64 = 0.2;

/// One image or video on the visual timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    /// Stable identity. Caches are keyed by this.
    pub id: String,

    #[serde(rename = "type")]
    pub kind: MediaKind,

    /// Path or URL of the media resource.
    #[serde(alias = "url")]
    pub source: String,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// How long the item stays on screen, in seconds.
    pub duration: f64,

    #[serde(default)]
    pub effect: ZoomEffect,

    #[serde(default)]
    pub filter: ColorFilter,

    #[serde(default)]
    pub transition: Transition,

    /// Zoom speed multiplier in `[1, 10]`.
    #[serde(default = "default_intensity")]
    pub intensity: u8,
}

fn default_intensity() -> u8 {
    MIN_INTENSITY
}

/// Media kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

/// Zoom motion applied across an item's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ZoomEffect {
    #[default]
    None,
    ZoomIn,
    ZoomOut,
    /// Zoom in on even positions, out on odd positions.
    ZoomAlternating,
}

impl ZoomEffect {
    /// Resolve alternation for the item at `index` (0-based position in the
    /// visual sequence). Never returns `ZoomAlternating`.
    pub fn resolve(self, index: usize) -> ZoomEffect {
        match self {
            ZoomEffect::ZoomAlternating if index % 2 == 0 => ZoomEffect::ZoomIn,
            ZoomEffect::ZoomAlternating => ZoomEffect::ZoomOut,
            other => other,
        }
    }
}

/// Whole-layer color treatment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColorFilter {
    #[default]
    None,
    Grayscale,
    Sepia,
    Invert,
    Warm,
    Cool,
}

/// Entry/exit transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    #[default]
    None,
    Fade,
}

impl MediaItem {
    /// Create an item with no effect, filter, or transition.
    pub fn new(
        id: impl Into<String>,
        kind: MediaKind,
        source: impl Into<String>,
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
            kind,
            source,
            name,
            duration,
            effect: ZoomEffect::None,
            filter: ColorFilter::None,
            transition: Transition::None,
            intensity: MIN_INTENSITY,
        }
    }

    pub fn image(id: impl Into<String>, source: impl Into<String>, duration: f64) -> Self {
        Self::new(id, MediaKind::Image, source, duration)
    }

    pub fn video(id: impl Into<String>, source: impl Into<String>, duration: f64) -> Self {
        Self::new(id, MediaKind::Video, source, duration)
    }

    pub fn with_effect(mut self, effect: ZoomEffect) -> Self {
        self.effect = effect;
        self
    }

    pub fn with_filter(mut self, filter: ColorFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transition = transition;
        self
    }

    pub fn with_intensity(mut self, intensity: u8) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }

    /// Zoom span reached over the item's lifetime: `0.2 × intensity`.
    ///
    /// An intensity of zero is treated as one.
    pub fn zoom_speed(&self) -> f64 {
        ZOOM_SPEED_PER_INTENSITY * f64::from(self.intensity.max(MIN_INTENSITY))
    }
}

/// Style fields that can be applied to every item at once.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ItemStyle {
    pub effect: Option<ZoomEffect>,
    pub filter: Option<ColorFilter>,
    pub transition: Option<Transition>,
    pub intensity: Option<u8>,
}

impl ItemStyle {
    /// Return `item` with every set field replaced.
    pub fn apply(&self, item: &MediaItem) -> MediaItem {
        MediaItem {
            effect: self.effect.unwrap_or(item.effect),
            filter: self.filter.unwrap_or(item.filter),
            transition: self.transition.unwrap_or(item.transition),
            intensity: self.intensity.unwrap_or(item.intensity),
            ..item.clone()
        }
    }
}
