//! The audio mixer.
//!
//! Scheduling is edge-triggered: [`AudioMixer::schedule_from_time`] runs
//! once per play, resume, or export start and replaces every voice. Mixing
//! is per tick: [`AudioMixer::mix_window`] renders the next window of
//! output from the scheduled voices.

use std::collections::HashSet;
use std::sync::Arc;

use neoncut_common::cache::AssetCache;
use neoncut_common::config::NarrationPlacement;
use neoncut_project_model::{AudioKind, AudioTrack, Timeline};

use crate::buffer::{AudioChunk, DecodedAudio, MixFormat};
use crate::decode::AudioDecoder;

/// Loop phase for a looping track resumed at clock time `t`.
pub fn music_offset(t: f64, buffer_secs: f64) -> f64 {
    if buffer_secs <= 0.0 {
        return 0.0;
    }
    t.rem_euclid(buffer_secs)
}

/// Where a one-shot track starting at `start_secs` should begin when
/// playback resumes at `t`: `(offset into the buffer, delay before it
/// sounds)`, or `None` when it has already finished.
pub fn one_shot_window(t: f64, start_secs: f64, buffer_secs: f64) -> Option<(f64, f64)> {
    if t < start_secs {
        Some((0.0, start_secs - t))
    } else if t < start_secs + buffer_secs {
        Some((t - start_secs, 0.0))
    } else {
        None
    }
}

/// A voice as scheduled, for inspection and logging.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledVoice {
    pub track_id: String,
    pub kind: AudioKind,
    pub gain: f32,
    /// Position inside the track's own buffer where playback starts.
    pub offset_secs: f64,
    /// Clock seconds until the voice starts sounding.
    pub delay_secs: f64,
    pub looping: bool,
}

struct Voice {
    track_id: String,
    gain: f32,
    looping: bool,
    buffer: Arc<DecodedAudio>,
    /// Read position in buffer frames.
    position: f64,
    /// Buffer frames consumed per output frame.
    step: f64,
    /// Output frames of silence before the voice starts.
    delay_frames: u64,
}

impl Voice {
    /// Add this voice into `out`. Returns `false` once a one-shot voice
    /// has run out of samples.
    fn render_into(&mut self, out: &mut [f32], channels: u16) -> bool {
        let len = self.buffer.frames();
        if len == 0 || channels == 0 {
            return false;
        }
        let total_frames = out.len() / usize::from(channels);
        let skip = self.delay_frames.min(total_frames as u64) as usize;
        self.delay_frames -= skip as u64;

        for frame in skip..total_frames {
            if self.position >= len as f64 {
                if !self.looping {
                    return false;
                }
                self.position %= len as f64;
            }
            let index = self.position as usize;
            for channel in 0..channels {
                out[frame * usize::from(channels) + usize::from(channel)] +=
                    self.gain * self.buffer.sample(index, channel);
            }
            self.position += self.step;
        }
        self.looping || self.position < len as f64
    }
}

/// Owns the decoded-buffer cache and every sounding voice.
pub struct AudioMixer {
    format: MixFormat,
    placement: NarrationPlacement,
    buffers: AssetCache<Arc<DecodedAudio>>,
    voices: Vec<Voice>,
    anchor_secs: f64,
    mixed_frames: u64,
}

impl AudioMixer {
    pub fn new(format: MixFormat, placement: NarrationPlacement) -> Self {
        Self {
            format,
            placement,
            buffers: AssetCache::new("audio"),
            voices: Vec::new(),
            anchor_secs: 0.0,
            mixed_frames: 0,
        }
    }

    pub fn format(&self) -> MixFormat {
        self.format
    }

    pub fn placement(&self) -> NarrationPlacement {
        self.placement
    }

    /// Start decoding every track not yet cached and evict buffers whose
    /// track left the timeline. Returns how many decodes were started.
    pub fn preload(&mut self, timeline: &Timeline, decoder: &Arc<dyn AudioDecoder>) -> usize {
        let mut started = 0;
        for track in timeline.audio_tracks() {
            let decoder = Arc::clone(decoder);
            let source = track.source.clone();
            if self
                .buffers
                .request(&track.id, move || decoder.decode(&source).map(Arc::new))
            {
                started += 1;
            }
        }

        let live: HashSet<&str> = timeline.audio_tracks().map(|t| t.id.as_str()).collect();
        let evicted = self.buffers.retain_ids(&live);
        if !evicted.is_empty() {
            self.voices
                .retain(|voice| live.contains(voice.track_id.as_str()));
        }

        if started > 0 {
            tracing::debug!(started, decoder = decoder.name(), "Audio preload started");
        }
        started
    }

    /// Move finished decodes into the cache.
    pub fn poll(&mut self) -> usize {
        self.buffers.poll()
    }

    /// Block until every requested decode has settled.
    pub fn wait_for_buffers(&mut self) {
        self.buffers.wait_idle();
    }

    /// Cache an already-decoded buffer for `track_id`.
    pub fn insert_buffer(&mut self, track_id: &str, audio: DecodedAudio) {
        self.buffers.insert_ready(track_id, Arc::new(audio));
    }

    /// Decoded length of a cached track.
    pub fn buffer_secs(&self, track_id: &str) -> Option<f64> {
        self.buffers.get(track_id).map(|b| b.duration_secs())
    }

    pub fn pending_decodes(&self) -> usize {
        self.buffers.pending()
    }

    /// Stop every voice and restart playback of all tracks from clock
    /// position `t`.
    pub fn schedule_from_time(&mut self, timeline: &Timeline, t: f64) -> Vec<ScheduledVoice> {
        self.stop_all();
        self.poll();
        self.anchor_secs = t;
        self.mixed_frames = 0;

        let mut scheduled = Vec::new();
        let mut narration_start = 0.0;
        for track in &timeline.narration {
            let start = match self.placement {
                NarrationPlacement::Overlapping => 0.0,
                NarrationPlacement::Sequential => narration_start,
            };
            // Undecoded tracks still occupy their reported length in sequence.
            narration_start +=
                self.buffer_secs(&track.id).unwrap_or(track.duration.max(0.0));

            let Some(buffer) = self.buffers.get(&track.id).cloned() else {
                continue;
            };
            if let Some((offset, delay)) = one_shot_window(t, start, buffer.duration_secs()) {
                scheduled.push(self.start_voice(track, buffer, offset, delay));
            }
        }

        for track in &timeline.music {
            let Some(buffer) = self.buffers.get(&track.id).cloned() else {
                continue;
            };
            if buffer.is_empty() {
                continue;
            }
            let offset = music_offset(t, buffer.duration_secs());
            scheduled.push(self.start_voice(track, buffer, offset, 0.0));
        }

        tracing::debug!(
            t,
            voices = scheduled.len(),
            placement = ?self.placement,
            "Scheduled audio"
        );
        scheduled
    }

    fn start_voice(
        &mut self,
        track: &AudioTrack,
        buffer: Arc<DecodedAudio>,
        offset_secs: f64,
        delay_secs: f64,
    ) -> ScheduledVoice {
        let rate = f64::from(buffer.sample_rate());
        self.voices.push(Voice {
            track_id: track.id.clone(),
            gain: track.volume,
            looping: track.loops(),
            position: (offset_secs * rate).round(),
            step: rate / f64::from(self.format.sample_rate.max(1)),
            delay_frames: self.format.secs_to_frames(delay_secs),
            buffer,
        });
        ScheduledVoice {
            track_id: track.id.clone(),
            kind: track.kind,
            gain: track.volume,
            offset_secs,
            delay_secs,
            looping: track.loops(),
        }
    }

    /// Render the next `frames` output frames.
    ///
    /// A format without channels or sample rate mixes nothing; sessions
    /// reject such formats before a mixer is built.
    pub fn mix_window(&mut self, frames: usize) -> AudioChunk {
        let start_secs = if self.format.sample_rate == 0 {
            self.anchor_secs
        } else {
            self.anchor_secs + self.mixed_frames as f64 / f64::from(self.format.sample_rate)
        };
        let mut chunk = AudioChunk::silence(start_secs, self.format, frames);
        let channels = self.format.channels;

        self.voices
            .retain_mut(|voice| voice.render_into(&mut chunk.samples, channels));

        for sample in &mut chunk.samples {
            *sample = sample.clamp(-1.0, 1.0);
        }
        self.mixed_frames += frames as u64;
        chunk
    }

    /// Stop and discard every voice.
    pub fn stop_all(&mut self) {
        if !self.voices.is_empty() {
            tracing::debug!(voices = self.voices.len(), "Stopping audio");
        }
        self.voices.clear();
    }

    /// Number of voices still sounding or waiting to start.
    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::MemoryAudioDecoder;
    use neoncut_project_model::AudioTrack;

    const RATE: u32 = 100;

    fn format() -> MixFormat {
        MixFormat::new(RATE, 1)
    }

    /// Mono buffer whose sample `i` is `value`.
    fn constant(value: f32, secs: f64) -> DecodedAudio {
        let frames = (secs * f64::from(RATE)) as usize;
        DecodedAudio::new(vec![value; frames], 1, RATE).unwrap()
    }

    /// Mono buffer whose sample `i` is `i / frames`.
    fn ramp(secs: f64) -> DecodedAudio {
        let frames = (secs * f64::from(RATE)) as usize;
        let samples = (0..frames).map(|i| i as f32 / frames as f32).collect();
        DecodedAudio::new(samples, 1, RATE).unwrap()
    }

    fn mixer() -> AudioMixer {
        AudioMixer::new(format(), NarrationPlacement::Overlapping)
    }

    #[test]
    fn test_music_offset_is_clock_mod_buffer() {
        assert!((music_offset(25.0, 10.0) - 5.0).abs() < 1e-12);
        assert!((music_offset(3.0, 10.0) - 3.0).abs() < 1e-12);
        assert_eq!(music_offset(3.0, 0.0), 0.0);
    }

    #[test]
    fn test_music_loops_and_narration_starts_at_clock_time() {
        let mut timeline = Timeline::new();
        timeline.push_audio(AudioTrack::narration("n", "voice.wav", 4.0));
        timeline.push_audio(AudioTrack::music("m", "bed.wav", 2.0).with_volume(0.5));

        let mut mixer = mixer();
        mixer.insert_buffer("n", constant(0.25, 4.0));
        mixer.insert_buffer("m", ramp(2.0));

        let voices = mixer.schedule_from_time(&timeline, 3.0);
        assert_eq!(voices.len(), 2);
        let narration = voices.iter().find(|v| v.track_id == "n").unwrap();
        assert!((narration.offset_secs - 3.0).abs() < 1e-12);
        assert!(!narration.looping);
        let music = voices.iter().find(|v| v.track_id == "m").unwrap();
        assert!((music.offset_secs - 1.0).abs() < 1e-12);
        assert_eq!(music.gain, 0.5);
        assert!(music.looping);
    }

    #[test]
    fn test_narration_past_its_end_is_not_scheduled() {
        let mut timeline = Timeline::new();
        timeline.push_audio(AudioTrack::narration("n", "voice.wav", 2.0));
        let mut mixer = mixer();
        mixer.insert_buffer("n", constant(0.25, 2.0));
        assert!(mixer.schedule_from_time(&timeline, 2.0).is_empty());
        assert!(mixer.mix_window(10).is_silent());
    }

    #[test]
    fn test_overlapping_narration_sums_every_track() {
        let mut timeline = Timeline::new();
        timeline.push_audio(AudioTrack::narration("a", "a.wav", 1.0));
        timeline.push_audio(AudioTrack::narration("b", "b.wav", 1.0));
        let mut mixer = mixer();
        mixer.insert_buffer("a", constant(0.25, 1.0));
        mixer.insert_buffer("b", constant(0.25, 1.0));
        mixer.schedule_from_time(&timeline, 0.0);
        let chunk = mixer.mix_window(10);
        assert!(chunk.samples.iter().all(|s| (*s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_sequential_narration_waits_for_its_turn() {
        let mut timeline = Timeline::new();
        timeline.push_audio(AudioTrack::narration("a", "a.wav", 1.0));
        timeline.push_audio(AudioTrack::narration("b", "b.wav", 1.0));
        let mut mixer = AudioMixer::new(format(), NarrationPlacement::Sequential);
        mixer.insert_buffer("a", constant(0.25, 1.0));
        mixer.insert_buffer("b", constant(0.5, 1.0));

        let voices = mixer.schedule_from_time(&timeline, 0.5);
        let b = voices.iter().find(|v| v.track_id == "b").unwrap();
        assert!((b.delay_secs - 0.5).abs() < 1e-12);
        assert_eq!(b.offset_secs, 0.0);

        let first = mixer.mix_window(50);
        assert!(first.samples.iter().all(|s| (*s - 0.25).abs() < 1e-6));
        let second = mixer.mix_window(50);
        assert!(second.samples.iter().all(|s| (*s - 0.5).abs() < 1e-6));
        assert!((second.start_secs - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_undecoded_track_is_silent() {
        let mut timeline = Timeline::new();
        timeline.push_audio(AudioTrack::music("m", "bed.mp3", 60.0));
        let mut mixer = mixer();
        assert!(mixer.schedule_from_time(&timeline, 0.0).is_empty());
        assert!(mixer.mix_window(30).is_silent());
    }

    #[test]
    fn test_failed_decode_is_dropped_from_mix() {
        let mut timeline = Timeline::new();
        timeline.push_audio(AudioTrack::music("ok", "ok.wav", 1.0));
        timeline.push_audio(AudioTrack::music("bad", "missing.wav", 1.0));
        let decoder: Arc<dyn AudioDecoder> =
            Arc::new(MemoryAudioDecoder::new().with("ok.wav", constant(0.1, 1.0)));

        let mut mixer = mixer();
        assert_eq!(mixer.preload(&timeline, &decoder), 2);
        mixer.wait_for_buffers();
        assert_eq!(mixer.preload(&timeline, &decoder), 0);

        let voices = mixer.schedule_from_time(&timeline, 0.0);
        assert_eq!(voices.len(), 1);
        assert_eq!(voices[0].track_id, "ok");
    }

    #[test]
    fn test_reschedule_replaces_voices() {
        let mut timeline = Timeline::new();
        timeline.push_audio(AudioTrack::music("m", "bed.wav", 1.0));
        let mut mixer = mixer();
        mixer.insert_buffer("m", ramp(1.0));
        let first = mixer.schedule_from_time(&timeline, 0.3);
        let second = mixer.schedule_from_time(&timeline, 0.3);
        assert_eq!(first, second);
        assert_eq!(mixer.active_voices(), 1);
        mixer.stop_all();
        assert_eq!(mixer.active_voices(), 0);
    }

    #[test]
    fn test_removed_track_is_evicted_and_stopped() {
        let mut timeline = Timeline::new();
        timeline.push_audio(AudioTrack::music("m", "bed.wav", 1.0));
        let decoder: Arc<dyn AudioDecoder> =
            Arc::new(MemoryAudioDecoder::new().with("bed.wav", constant(0.1, 1.0)));
        let mut mixer = mixer();
        mixer.preload(&timeline, &decoder);
        mixer.wait_for_buffers();
        mixer.schedule_from_time(&timeline, 0.0);
        assert_eq!(mixer.active_voices(), 1);

        timeline.clear_audio(AudioKind::Music);
        mixer.preload(&timeline, &decoder);
        assert_eq!(mixer.active_voices(), 0);
        assert!(mixer.buffer_secs("m").is_none());
    }

    #[test]
    fn test_format_without_channels_mixes_nothing() {
        let mut timeline = Timeline::new();
        timeline.push_audio(AudioTrack::music("bed", "bed.wav", 1.0));
        let mut mixer = AudioMixer::new(MixFormat::new(1000, 0), NarrationPlacement::Overlapping);
        mixer.insert_buffer("bed", DecodedAudio::new(vec![0.5; 100], 1, 1000).unwrap());
        mixer.schedule_from_time(&timeline, 0.0);

        let chunk = mixer.mix_window(10);
        assert!(chunk.samples.is_empty());
        assert_eq!(chunk.start_secs, 0.0);

        let mut mixer = AudioMixer::new(MixFormat::new(0, 2), NarrationPlacement::Overlapping);
        mixer.insert_buffer("bed", DecodedAudio::new(vec![0.5; 100], 1, 1000).unwrap());
        mixer.schedule_from_time(&timeline, 0.25);
        let chunk = mixer.mix_window(10);
        assert!(chunk.start_secs.is_finite());
    }

    #[test]
    fn test_output_is_clipped() {
        let mut timeline = Timeline::new();
        timeline.push_audio(AudioTrack::music("a", "a.wav", 1.0));
        timeline.push_audio(AudioTrack::music("b", "b.wav", 1.0));
        let mut mixer = mixer();
        mixer.insert_buffer("a", constant(0.8, 1.0));
        mixer.insert_buffer("b", constant(0.8, 1.0));
        mixer.schedule_from_time(&timeline, 0.0);
        assert_eq!(mixer.mix_window(5).peak(), 1.0);
    }
}
