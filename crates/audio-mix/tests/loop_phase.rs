//! Resuming playback mid-timeline must sound the same as never stopping.

use neoncut_audio_mix::{music_offset, AudioMixer, DecodedAudio, MixFormat};
use neoncut_common::config::NarrationPlacement;
use neoncut_project_model::{AudioTrack, Timeline};
use proptest::prelude::*;

const RATE: u32 = 1_000;

fn timeline_with_music() -> Timeline {
    let mut timeline = Timeline::new();
    timeline.push_audio(AudioTrack::music("bed", "bed.wav", 0.0));
    timeline
}

fn ramp(frames: usize) -> DecodedAudio {
    let samples = (0..frames).map(|i| (i + 1) as f32 / (frames + 1) as f32).collect();
    DecodedAudio::new(samples, 1, RATE).unwrap()
}

fn mixer_with(buffer: DecodedAudio) -> AudioMixer {
    let mut mixer = AudioMixer::new(MixFormat::new(RATE, 1), NarrationPlacement::Overlapping);
    mixer.insert_buffer("bed", buffer);
    mixer
}

proptest! {
    #[test]
    fn prop_resumed_loop_matches_continuous_playback(
        len in 10usize..400,
        resume_frame in 0usize..5_000,
        window in 1usize..200,
    ) {
        let timeline = timeline_with_music();

        let mut continuous = mixer_with(ramp(len));
        continuous.schedule_from_time(&timeline, 0.0);
        let _ = continuous.mix_window(resume_frame);
        let expected = continuous.mix_window(window);

        let mut resumed = mixer_with(ramp(len));
        let t = resume_frame as f64 / f64::from(RATE);
        resumed.schedule_from_time(&timeline, t);
        let actual = resumed.mix_window(window);

        prop_assert_eq!(expected.samples, actual.samples);
    }

    #[test]
    fn prop_music_offset_stays_inside_buffer(
        t in 0.0f64..10_000.0,
        buffer_secs in 0.01f64..600.0,
    ) {
        let offset = music_offset(t, buffer_secs);
        prop_assert!(offset >= 0.0);
        prop_assert!(offset < buffer_secs);
    }
}

#[test]
fn test_chunk_timestamps_follow_clock() {
    let timeline = timeline_with_music();
    let mut mixer = mixer_with(ramp(100));
    mixer.schedule_from_time(&timeline, 2.0);
    let first = mixer.mix_window(500);
    let second = mixer.mix_window(500);
    assert!((first.start_secs - 2.0).abs() < 1e-12);
    assert!((second.start_secs - 2.5).abs() < 1e-12);
}
