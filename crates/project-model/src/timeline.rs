//! The timeline: an ordered visual sequence plus two audio lists.
//!
//! Visual items are laid end to end on a shared time axis: item `i` covers
//! the half-open interval `[start_i, start_i + duration_i)` where `start_i`
//! is the sum of the durations before it. Audio list order does not place
//! tracks on the axis; the mixer decides placement.

use serde::{Deserialize, Serialize};

use crate::audio::{AudioKind, AudioTrack};
use crate::media::{ItemStyle, MediaItem};
use crate::project::ModelError;

/// The editable sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeline {
    /// Visual items in playback order.
    #[serde(alias = "timeline")]
    pub items: Vec<MediaItem>,

    /// Narration tracks.
    pub narration: Vec<AudioTrack>,

    /// Background music tracks.
    #[serde(alias = "backgroundMusic")]
    pub music: Vec<AudioTrack>,
}

/// Placement of one visual item on the time axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub index: usize,
    pub start_secs: f64,
    pub end_secs: f64,
}

impl Segment {
    pub fn duration_secs(&self) -> f64 {
        self.end_secs - self.start_secs
    }

    /// Half-open containment test.
    pub fn contains(&self, t: f64) -> bool {
        t >= self.start_secs && t < self.end_secs
    }
}

/// The item on screen at a given time.
#[derive(Debug, Clone, Copy)]
pub struct ActiveItem<'a> {
    /// Position in the visual sequence.
    pub index: usize,
    pub item: &'a MediaItem,
    /// Where the item starts on the time axis.
    pub start_secs: f64,
}

impl ActiveItem<'_> {
    /// Seconds since the item started.
    pub fn elapsed_secs(&self, t: f64) -> f64 {
        t - self.start_secs
    }

    /// Fraction of the item's duration that has passed, in `[0, 1)`.
    pub fn progress(&self, t: f64) -> f64 {
        if self.item.duration <= 0.0 {
            return 0.0;
        }
        self.elapsed_secs(t) / self.item.duration
    }
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of visual item durations.
    pub fn total_duration_secs(&self) -> f64 {
        self.items.iter().map(|item| item.duration).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Placement of every visual item, in order.
    pub fn segments(&self) -> impl Iterator<Item = Segment> + '_ {
        self.items
            .iter()
            .enumerate()
            .scan(0.0_f64, |start, (index, item)| {
                let segment = Segment {
                    index,
                    start_secs: *start,
                    end_secs: *start + item.duration,
                };
                *start += item.duration;
                Some(segment)
            })
    }

    /// The first item whose interval contains `t`, if any.
    pub fn active_at(&self, t: f64) -> Option<ActiveItem<'_>> {
        self.segments()
            .find(|segment| segment.contains(t))
            .map(|segment| ActiveItem {
                index: segment.index,
                item: &self.items[segment.index],
                start_secs: segment.start_secs,
            })
    }

    pub fn item(&self, id: &str) -> Option<&MediaItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }

    /// Append a visual item.
    pub fn push_item(&mut self, item: MediaItem) {
        self.items.push(item);
    }

    /// Remove a visual item by identity.
    pub fn remove_item(&mut self, id: &str) -> Option<MediaItem> {
        let index = self.position_of(id)?;
        Some(self.items.remove(index))
    }

    /// Replace a visual item wholesale, keeping its position.
    pub fn replace_item(&mut self, id: &str, item: MediaItem) -> Result<(), ModelError> {
        let index = self.position_of(id).ok_or_else(|| ModelError::NotFound {
            id: id.to_string(),
        })?;
        self.items[index] = item;
        Ok(())
    }

    /// Move the item at `from` so it ends up at `to`.
    pub fn move_item(&mut self, from: usize, to: usize) -> Result<(), ModelError> {
        let len = self.items.len();
        for index in [from, to] {
            if index >= len {
                return Err(ModelError::IndexOutOfRange { index, len });
            }
        }
        let item = self.items.remove(from);
        self.items.insert(to, item);
        Ok(())
    }

    pub fn clear_items(&mut self) {
        self.items.clear();
    }

    /// Apply the same style to every visual item.
    pub fn apply_to_all(&mut self, style: &ItemStyle) {
        self.items = self.items.iter().map(|item| style.apply(item)).collect();
    }

    /// Tracks of one kind.
    pub fn tracks(&self, kind: AudioKind) -> &[AudioTrack] {
        match kind {
            AudioKind::Narration => &self.narration,
            AudioKind::Music => &self.music,
        }
    }

    fn tracks_mut(&mut self, kind: AudioKind) -> &mut Vec<AudioTrack> {
        match kind {
            AudioKind::Narration => &mut self.narration,
            AudioKind::Music => &mut self.music,
        }
    }

    /// Every audio track: narration first, then music.
    pub fn audio_tracks(&self) -> impl Iterator<Item = &AudioTrack> + '_ {
        self.narration.iter().chain(self.music.iter())
    }

    /// Append a track to the list matching its kind.
    pub fn push_audio(&mut self, track: AudioTrack) {
        self.tracks_mut(track.kind).push(track);
    }

    /// Remove an audio track from whichever list holds it.
    pub fn remove_audio(&mut self, id: &str) -> Option<AudioTrack> {
        for kind in [AudioKind::Narration, AudioKind::Music] {
            let list = self.tracks_mut(kind);
            if let Some(index) = list.iter().position(|track| track.id == id) {
                return Some(list.remove(index));
            }
        }
        None
    }

    /// Replace an audio track wholesale. A kind change moves the track to
    /// the end of the other list.
    pub fn replace_audio(&mut self, id: &str, track: AudioTrack) -> Result<(), ModelError> {
        for kind in [AudioKind::Narration, AudioKind::Music] {
            let list = self.tracks_mut(kind);
            if let Some(index) = list.iter().position(|existing| existing.id == id) {
                if track.kind == kind {
                    list[index] = track;
                } else {
                    list.remove(index);
                    self.push_audio(track);
                }
                return Ok(());
            }
        }
        Err(ModelError::NotFound { id: id.to_string() })
    }

    pub fn clear_audio(&mut self, kind: AudioKind) {
        self.tracks_mut(kind).clear();
    }

    /// Sum of reported narration durations.
    pub fn narration_duration_secs(&self) -> f64 {
        self.narration.iter().map(|track| track.duration).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{ColorFilter, ZoomEffect};
    use proptest::prelude::*;

    fn two_items() -> Timeline {
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
    fn test_total_duration_is_sum_of_items() {
        assert_eq!(two_items().total_duration_secs(), 5.0);
        assert_eq!(Timeline::new().total_duration_secs(), 0.0);
    }

    #[test]
    fn test_active_item_uses_half_open_intervals() {
        let timeline = two_items();
        assert_eq!(timeline.active_at(0.0).unwrap().item.id, "a");
        assert_eq!(timeline.active_at(1.999).unwrap().item.id, "a");
        let boundary = timeline.active_at(2.0).unwrap();
        assert_eq!(boundary.item.id, "b");
        assert_eq!(boundary.index, 1);
        assert!(timeline.active_at(5.0).is_none());
    }

    #[test]
    fn test_active_item_progress() {
        let timeline = two_items();
        let active = timeline.active_at(2.5).unwrap();
        assert_eq!(active.item.id, "b");
        assert!((active.elapsed_secs(2.5) - 0.5).abs() < 1e-12);
        assert!((active.progress(2.5) - 0.5 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_replace_and_remove_by_identity() {
        let mut timeline = two_items();
        let replacement = MediaItem::image("a", "a2.png", 4.0).with_filter(ColorFilter::Cool);
        timeline.replace_item("a", replacement).unwrap();
        assert_eq!(timeline.items[0].source, "a2.png");
        assert_eq!(timeline.total_duration_secs(), 7.0);

        assert!(matches!(
            timeline.replace_item("zzz", MediaItem::image("zzz", "z.png", 1.0)),
            Err(ModelError::NotFound { .. })
        ));

        let removed = timeline.remove_item("a").unwrap();
        assert_eq!(removed.id, "a");
        assert_eq!(timeline.items.len(), 1);
        assert!(timeline.remove_item("a").is_none());
    }

    #[test]
    fn test_move_item_reorders_time_axis() {
        let mut timeline = two_items();
        timeline.move_item(1, 0).unwrap();
        assert_eq!(timeline.active_at(0.0).unwrap().item.id, "b");
        assert_eq!(timeline.active_at(3.0).unwrap().item.id, "a");
        assert!(matches!(
            timeline.move_item(0, 2),
            Err(ModelError::IndexOutOfRange { index: 2, len: 2 })
        ));
    }

    #[test]
    fn test_apply_to_all() {
        let mut timeline = two_items();
        timeline.apply_to_all(&ItemStyle {
            filter: Some(ColorFilter::Grayscale),
            ..Default::default()
        });
        assert!(timeline
            .items
            .iter()
            .all(|item| item.filter == ColorFilter::Grayscale));
        assert_eq!(timeline.items[1].effect, ZoomEffect::ZoomIn);
    }

    #[test]
    fn test_audio_lists_are_independent() {
        let mut timeline = Timeline::new();
        timeline.push_audio(AudioTrack::narration("n1", "voice.mp3", 10.0));
        timeline.push_audio(AudioTrack::music("m1", "bed.mp3", 60.0));
        assert_eq!(timeline.tracks(AudioKind::Narration).len(), 1);
        assert_eq!(timeline.tracks(AudioKind::Music).len(), 1);
        assert_eq!(timeline.audio_tracks().count(), 2);

        let as_music = AudioTrack::music("n1", "voice.mp3", 10.0);
        timeline.replace_audio("n1", as_music).unwrap();
        assert!(timeline.narration.is_empty());
        assert_eq!(timeline.music.len(), 2);

        assert!(timeline.remove_audio("m1").is_some());
        timeline.clear_audio(AudioKind::Music);
        assert_eq!(timeline.audio_tracks().count(), 0);
    }

    proptest! {
        #[test]
        fn prop_segments_partition_the_timeline(
            durations in proptest::collection::vec(0.05f64..20.0, 1..12),
            fraction in 0.0f64..1.0,
        ) {
            let mut timeline = Timeline::new();
            for (i, duration) in durations.iter().enumerate() {
                timeline.push_item(MediaItem::image(format!("i{i}"), "x.png", *duration));
            }
            let total = timeline.total_duration_secs();
            let t = fraction * total;

            let containing = timeline.segments().filter(|s| s.contains(t)).count();
            prop_assert_eq!(containing, 1);
            prop_assert!(timeline.active_at(t).is_some());

            let segments: Vec<Segment> = timeline.segments().collect();
            prop_assert_eq!(segments[0].start_secs, 0.0);
            for pair in segments.windows(2) {
                prop_assert_eq!(pair[0].end_secs, pair[1].start_secs);
            }
            prop_assert!((segments[segments.len() - 1].end_secs - total).abs() < 1e-9);
        }
    }
}
