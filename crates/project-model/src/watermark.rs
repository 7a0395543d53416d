//! Watermark (logo overlay) settings.
//!
//! All sizes are percentages of the output frame so placement is
//! independent of the render resolution.

use serde::{Deserialize, Serialize};

/// Accepted range for `size` (percent of frame width).
pub const WATERMARK_SIZE_RANGE: (f64, f64) = (5.0, 50.0);
/// Accepted range for `opacity` (percent).
pub const WATERMARK_OPACITY_RANGE: (f64, f64) = (10.0, 100.0);
/// Accepted range for `margin` (percent of the frame dimension).
pub const WATERMARK_MARGIN_RANGE: (f64, f64) = (0.0, 20.0);

/// Logo overlay drawn on top of every frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatermarkSettings {
    /// Path or URL of the logo image.
    #[serde(alias = "logoUrl")]
    pub logo: Option<String>,

    pub enabled: bool,

    pub position: WatermarkPosition,

    /// Logo width as a percentage of frame width.
    pub size: f64,

    /// Opacity percentage.
    pub opacity: f64,

    /// Offset from the anchored edges, as a percentage of the frame width
    /// (horizontal) and height (vertical).
    pub margin: f64,
}

/// Corner the logo is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WatermarkPosition {
    #[default]
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Default for WatermarkSettings {
    fn default() -> Self {
        Self {
            logo: None,
            enabled: false,
            position: WatermarkPosition::TopLeft,
            size: 15.0,
            opacity: 80.0,
            margin: 5.0,
        }
    }
}

impl WatermarkSettings {
    /// Whether a logo should be drawn at all.
    pub fn is_active(&self) -> bool {
        self.enabled && self.logo.is_some()
    }

    /// Opacity as a `[0, 1]` alpha multiplier.
    pub fn alpha(&self) -> f64 {
        (self.opacity / 100.0).clamp(0.0, 1.0)
    }
}
