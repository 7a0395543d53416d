//! Frame compositor.
//!
//! Rendering is split in two: [`compose`] is a pure function from a
//! timeline snapshot and a clock position to a [`FrameComposition`] (which
//! item is on screen, at what zoom, opacity, and filter, and where the
//! watermark goes). [`FrameRenderer`] turns that plan into pixels using
//! the cached media handles.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;

use neoncut_common::cache::AssetCache;
use neoncut_common::clock::DriftMeasurement;
use neoncut_project_model::{
    ColorFilter, MediaKind, Timeline, Transition, WatermarkPosition, WatermarkSettings, ZoomEffect,
};

use crate::media::{MediaHandle, MediaLoader};
use crate::raster;

/// Reference output width.
pub const REFERENCE_WIDTH: u32 = 1280;
/// Reference output height.
pub const REFERENCE_HEIGHT: u32 = 720;
/// Length of each fade ramp, in seconds.
pub const FADE_SECS: f64 = 0.5;
/// Default decoder drift tolerated before a forced seek.
pub const SEEK_TOLERANCE_SECS: f64 = 0.3;

/// A single frame's composition instructions.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameComposition {
    /// Clock time in seconds.
    pub time_secs: f64,

    /// What fills the frame under the watermark.
    pub content: FrameContent,

    /// Watermark placement, when one is drawn.
    pub watermark: Option<WatermarkPlacement>,
}

/// Frame content below the watermark.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameContent {
    /// Empty timeline: the cleared frame.
    Blank,
    /// Past the end of a non-empty timeline.
    EndCard,
    /// The active item.
    Media(MediaLayer),
}

/// Draw instructions for the active item.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaLayer {
    /// Position in the visual sequence.
    pub index: usize,
    pub item_id: String,
    pub kind: MediaKind,
    /// Seconds since the item started.
    pub elapsed_secs: f64,
    /// Fraction of the item's duration elapsed, in `[0, 1)`.
    pub progress: f64,
    /// Zoom resolved for this position (never alternating).
    pub effect: ZoomEffect,
    pub scale: f64,
    pub opacity: f64,
    pub filter: ColorFilter,
}

/// Watermark rectangle in output pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatermarkPlacement {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub opacity: f64,
}

/// Zoom scale for a resolved effect at `progress` with span `speed`.
pub fn zoom_scale(effect: ZoomEffect, progress: f64, speed: f64) -> f64 {
    match effect {
        ZoomEffect::ZoomIn => 1.0 + progress * speed,
        ZoomEffect::ZoomOut => (1.0 + speed) - progress * speed,
        ZoomEffect::None | ZoomEffect::ZoomAlternating => 1.0,
    }
}

/// Layer opacity for a transition. The fade-in ramp is checked first, so
/// it wins when the ramps overlap on short items.
pub fn fade_opacity(transition: Transition, elapsed_secs: f64, duration_secs: f64) -> f64 {
    match transition {
        Transition::None => 1.0,
        Transition::Fade => {
            if elapsed_secs < FADE_SECS {
                elapsed_secs / FADE_SECS
            } else if elapsed_secs > duration_secs - FADE_SECS {
                (duration_secs - elapsed_secs) / FADE_SECS
            } else {
                1.0
            }
        }
    }
}

/// Watermark rectangle for a logo of `logo_width` x `logo_height` on a
/// `frame_width` x `frame_height` frame.
pub fn watermark_placement(
    settings: &WatermarkSettings,
    logo_width: u32,
    logo_height: u32,
    frame_width: u32,
    frame_height: u32,
) -> Option<WatermarkPlacement> {
    if !settings.is_active() || logo_width == 0 || logo_height == 0 {
        return None;
    }
    let (fw, fh) = (f64::from(frame_width), f64::from(frame_height));
    let aspect = f64::from(logo_width) / f64::from(logo_height);
    let width = fw * settings.size / 100.0;
    let height = width / aspect;
    let margin_x = fw * settings.margin / 100.0;
    let margin_y = fh * settings.margin / 100.0;

    let (x, y) = match settings.position {
        WatermarkPosition::TopLeft => (margin_x, margin_y),
        WatermarkPosition::TopRight => (fw - width - margin_x, margin_y),
        WatermarkPosition::BottomLeft => (margin_x, fh - height - margin_y),
        WatermarkPosition::BottomRight => (fw - width - margin_x, fh - height - margin_y),
    };

    Some(WatermarkPlacement {
        x,
        y,
        width,
        height,
        opacity: settings.alpha(),
    })
}

/// Plan the frame at clock time `t`.
///
/// `logo_size` is the loaded logo's pixel size, or `None` when no logo is
/// ready.
pub fn compose(
    timeline: &Timeline,
    watermark: &WatermarkSettings,
    t: f64,
    logo_size: Option<(u32, u32)>,
    frame_size: (u32, u32),
) -> FrameComposition {
    let content = match timeline.active_at(t) {
        Some(active) => {
            let item = active.item;
            let elapsed_secs = active.elapsed_secs(t);
            let progress = active.progress(t);
            let effect = item.effect.resolve(active.index);
            FrameContent::Media(MediaLayer {
                index: active.index,
                item_id: item.id.clone(),
                kind: item.kind,
                elapsed_secs,
                progress,
                effect,
                scale: zoom_scale(effect, progress, item.zoom_speed()),
                opacity: fade_opacity(item.transition, elapsed_secs, item.duration),
                filter: item.filter,
            })
        }
        None if timeline.total_duration_secs() > 0.0 && t >= timeline.total_duration_secs() => {
            FrameContent::EndCard
        }
        None => FrameContent::Blank,
    };

    let watermark = logo_size.and_then(|(w, h)| {
        watermark_placement(watermark, w, h, frame_size.0, frame_size.1)
    });

    FrameComposition {
        time_secs: t,
        content,
        watermark,
    }
}

/// Renders composition plans into RGBA frames.
///
/// Owns the media-handle and logo caches; nothing else reads or seeks the
/// handles.
pub struct FrameRenderer {
    width: u32,
    height: u32,
    fps: u32,
    seek_tolerance_secs: f64,
    video_wait: Duration,
    media: AssetCache<MediaHandle>,
    logos: AssetCache<Arc<RgbaImage>>,
}

impl FrameRenderer {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            fps: fps.max(1),
            seek_tolerance_secs: SEEK_TOLERANCE_SECS,
            video_wait: Duration::ZERO,
            media: AssetCache::new("media"),
            logos: AssetCache::new("logo"),
        }
    }

    pub fn with_seek_tolerance(mut self, secs: f64) -> Self {
        self.seek_tolerance_secs = secs.max(0.0);
        self
    }

    /// How long a render may wait for a video frame. Zero means a frame
    /// that is not ready is skipped.
    pub fn set_video_wait(&mut self, wait: Duration) {
        self.video_wait = wait;
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Start loading every item and the logo not yet cached; evict
    /// handles whose item left the timeline.
    pub fn preload(
        &mut self,
        timeline: &Timeline,
        watermark: &WatermarkSettings,
        loader: &Arc<dyn MediaLoader>,
    ) -> usize {
        let mut started = 0;
        for item in &timeline.items {
            let loader = Arc::clone(loader);
            let item_owned = item.clone();
            let (w, h, fps) = (self.width, self.height, self.fps);
            if self
                .media
                .request(&item.id, move || loader.load(&item_owned, w, h, fps))
            {
                started += 1;
            }
        }
        let live: HashSet<&str> = timeline.items.iter().map(|i| i.id.as_str()).collect();
        self.media.retain_ids(&live);

        let mut live_logos = HashSet::new();
        if let Some(logo) = &watermark.logo {
            live_logos.insert(logo.as_str());
            let loader = Arc::clone(loader);
            let source = logo.clone();
            if self
                .logos
                .request(logo, move || loader.load_image(&source).map(Arc::new))
            {
                started += 1;
            }
        }
        self.logos.retain_ids(&live_logos);

        if started > 0 {
            tracing::debug!(started, "Media preload started");
        }
        started
    }

    /// Move finished loads into the caches.
    pub fn poll(&mut self) -> usize {
        self.media.poll() + self.logos.poll()
    }

    /// Block until every requested load has settled.
    pub fn wait_for_media(&mut self) {
        self.media.wait_idle();
        self.logos.wait_idle();
    }

    /// Cache an already-loaded handle for `item_id`.
    pub fn insert_handle(&mut self, item_id: &str, handle: MediaHandle) {
        self.media.insert_ready(item_id, handle);
    }

    pub fn pending_loads(&self) -> usize {
        self.media.pending() + self.logos.pending()
    }

    fn logo(&self, watermark: &WatermarkSettings) -> Option<Arc<RgbaImage>> {
        watermark
            .logo
            .as_deref()
            .and_then(|source| self.logos.get(source))
            .cloned()
    }

    /// Plan the frame at `t` against the current cache contents.
    pub fn plan(&self, timeline: &Timeline, watermark: &WatermarkSettings, t: f64) -> FrameComposition {
        let logo_size = self.logo(watermark).map(|logo| logo.dimensions());
        compose(timeline, watermark, t, logo_size, (self.width, self.height))
    }

    /// Render the frame at clock time `t`.
    pub fn render(&mut self, timeline: &Timeline, watermark: &WatermarkSettings, t: f64) -> RgbaImage {
        let composition = self.plan(timeline, watermark, t);
        self.rasterize(&composition, watermark)
    }

    /// Draw a composition plan.
    pub fn rasterize(
        &mut self,
        composition: &FrameComposition,
        watermark: &WatermarkSettings,
    ) -> RgbaImage {
        let mut canvas = raster::blank_frame(self.width, self.height);

        match &composition.content {
            FrameContent::Blank => {}
            FrameContent::EndCard => raster::draw_end_card(&mut canvas),
            FrameContent::Media(layer) => {
                if let Some(media) = self.media_frame(layer) {
                    raster::draw_media_layer(
                        &mut canvas,
                        &media,
                        layer.scale,
                        layer.opacity,
                        layer.filter,
                    );
                }
            }
        }

        if let (Some(placement), Some(logo)) = (composition.watermark, self.logo(watermark)) {
            raster::draw_logo(
                &mut canvas,
                &logo,
                placement.x,
                placement.y,
                placement.width,
                placement.height,
                placement.opacity,
            );
        }

        canvas
    }

    /// The pixels for the active item, seeking its video decoder when it
    /// has drifted from the item's elapsed time.
    fn media_frame(&mut self, layer: &MediaLayer) -> Option<Arc<RgbaImage>> {
        let tolerance = self.seek_tolerance_secs;
        let wait = self.video_wait;
        match self.media.get_mut(&layer.item_id)? {
            MediaHandle::Image(image) => Some(Arc::clone(image)),
            MediaHandle::Video(decoder) => {
                // Until the first frame after a seek lands, the decoder's
                // position is only the seek target. Reseek only if the clock
                // has since moved back before it.
                if let Some(target) = decoder.pending_seek_secs() {
                    if layer.elapsed_secs + tolerance >= target {
                        return decoder.frame_at(layer.elapsed_secs, wait);
                    }
                }
                let drift = DriftMeasurement {
                    reference_secs: layer.elapsed_secs,
                    measured_secs: decoder.position_secs(),
                };
                if drift.exceeds_threshold_secs(tolerance) {
                    tracing::trace!(
                        item = %layer.item_id,
                        drift_ms = drift.drift_ms(),
                        "Seeking video decoder"
                    );
                    if let Err(e) = decoder.seek(layer.elapsed_secs) {
                        tracing::warn!(item = %layer.item_id, error = %e, "Video seek failed");
                        return None;
                    }
                }
                decoder.frame_at(layer.elapsed_secs, wait)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neoncut_project_model::MediaItem;

    fn scenario() -> Timeline {
        let mut timeline = Timeline::new();
        timeline.push_item(MediaItem::image("a", "a.png", 2.0));
        timeline.push_item(
            MediaItem::image("b", "b.png", 3.0)
                .with_effect(ZoomEffect::ZoomIn)
                .with_intensity(5),
        );
        timeline
    }

    #[test]
    fn test_active_item_zoom_scenario() {
        let plan = compose(
            &scenario(),
            &WatermarkSettings::default(),
            2.5,
            None,
            (REFERENCE_WIDTH, REFERENCE_HEIGHT),
        );
        let FrameContent::Media(layer) = plan.content else {
            panic!("expected media");
        };
        assert_eq!(layer.item_id, "b");
        assert!((layer.progress - 0.1667).abs() < 1e-4);
        assert!((layer.scale - 1.1667).abs() < 1e-4);
        assert_eq!(layer.opacity, 1.0);
    }

    #[test]
    fn test_end_card_after_last_item() {
        let plan = compose(
            &scenario(),
            &WatermarkSettings::default(),
            5.0,
            None,
            (REFERENCE_WIDTH, REFERENCE_HEIGHT),
        );
        assert_eq!(plan.content, FrameContent::EndCard);
    }

    #[test]
    fn test_empty_timeline_is_blank() {
        for t in [0.0, 0.5, 1.0, 100.0] {
            let plan = compose(
                &Timeline::new(),
                &WatermarkSettings::default(),
                t,
                None,
                (REFERENCE_WIDTH, REFERENCE_HEIGHT),
            );
            assert_eq!(plan.content, FrameContent::Blank);
        }
    }

    #[test]
    fn test_alternating_zoom_by_index() {
        let mut timeline = Timeline::new();
        for id in ["a", "b"] {
            timeline.push_item(
                MediaItem::image(id, "x.png", 1.0).with_effect(ZoomEffect::ZoomAlternating),
            );
        }
        let first = compose(&timeline, &WatermarkSettings::default(), 0.0, None, (16, 9));
        let second = compose(&timeline, &WatermarkSettings::default(), 1.0, None, (16, 9));
        let (FrameContent::Media(first), FrameContent::Media(second)) =
            (first.content, second.content)
        else {
            panic!("expected media");
        };
        assert_eq!(first.effect, ZoomEffect::ZoomIn);
        assert_eq!(first.scale, 1.0);
        assert_eq!(second.effect, ZoomEffect::ZoomOut);
        assert!((second.scale - 1.2).abs() < 1e-12);
    }

    #[test]
    fn test_fade_ramps() {
        assert_eq!(fade_opacity(Transition::Fade, 0.0, 3.0), 0.0);
        assert_eq!(fade_opacity(Transition::Fade, 0.25, 3.0), 0.5);
        assert_eq!(fade_opacity(Transition::Fade, 0.5, 3.0), 1.0);
        assert!((fade_opacity(Transition::Fade, 2.75, 3.0) - 0.5).abs() < 1e-12);
        assert_eq!(fade_opacity(Transition::None, 0.0, 3.0), 1.0);
    }

    #[test]
    fn test_fade_in_wins_on_short_items() {
        // Duration 0.6: at 0.4 both ramps apply; fade-in is evaluated first.
        assert!((fade_opacity(Transition::Fade, 0.4, 0.6) - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_watermark_bottom_right_scenario() {
        let settings = WatermarkSettings {
            logo: Some("logo.png".into()),
            enabled: true,
            position: WatermarkPosition::BottomRight,
            size: 20.0,
            opacity: 50.0,
            margin: 5.0,
        };
        let placement = watermark_placement(&settings, 400, 200, 1280, 720).unwrap();
        assert_eq!(placement.width, 256.0);
        assert_eq!(placement.height, 128.0);
        assert_eq!(placement.x, 960.0);
        assert_eq!(placement.y, 720.0 - 128.0 - 36.0);
        assert_eq!(placement.opacity, 0.5);
    }

    #[test]
    fn test_item_filter_leaves_logo_untouched() {
        use crate::media::MemoryMediaLoader;
        use image::Rgba;

        let red = Rgba([255, 0, 0, 255]);
        let loader: Arc<dyn MediaLoader> = Arc::new(
            MemoryMediaLoader::new()
                .with_image("clip.png", RgbaImage::from_pixel(100, 50, Rgba([30, 60, 200, 255])))
                .with_image("logo.png", RgbaImage::from_pixel(20, 20, red)),
        );
        let watermark = WatermarkSettings {
            logo: Some("logo.png".into()),
            enabled: true,
            position: WatermarkPosition::TopLeft,
            size: 20.0,
            opacity: 100.0,
            margin: 0.0,
        };

        for filter in [ColorFilter::Grayscale, ColorFilter::Sepia] {
            let mut timeline = Timeline::new();
            timeline.push_item(MediaItem::image("a", "clip.png", 3.0).with_filter(filter));
            let mut renderer = FrameRenderer::new(100, 50, 30);
            renderer.preload(&timeline, &watermark, &loader);
            renderer.wait_for_media();

            let frame = renderer.render(&timeline, &watermark, 1.0);
            assert_eq!(*frame.get_pixel(5, 5), red, "{filter:?} reached the logo");
            assert_eq!(*frame.get_pixel(19, 19), red);

            let media = frame.get_pixel(70, 35).0;
            assert_ne!(media, [30, 60, 200, 255], "{filter:?} was not applied");
            if filter == ColorFilter::Grayscale {
                assert!(media[0] == media[1] && media[1] == media[2]);
            }
        }
    }

    #[test]
    fn test_watermark_needs_enabled_logo() {
        let mut settings = WatermarkSettings {
            logo: Some("logo.png".into()),
            ..Default::default()
        };
        assert!(watermark_placement(&settings, 10, 10, 1280, 720).is_none());
        settings.enabled = true;
        let placement = watermark_placement(&settings, 10, 10, 1280, 720).unwrap();
        assert_eq!((placement.x, placement.y), (64.0, 36.0));
    }
}
