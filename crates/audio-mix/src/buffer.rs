//! Decoded sample buffers and mixed output chunks.

use serde::{Deserialize, Serialize};

use neoncut_common::error::{NeoncutError, NeoncutResult};

/// Sample layout of the mixer output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixFormat {
    /// Output sample rate in Hz.
    pub sample_rate: u32,

    /// Interleaved output channels.
    pub channels: u16,
}

impl Default for MixFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
        }
    }
}

impl MixFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Convert seconds to output frames, rounding to the nearest frame.
    pub fn secs_to_frames(&self, secs: f64) -> u64 {
        (secs.max(0.0) * f64::from(self.sample_rate)).round() as u64
    }
}

/// A fully decoded audio resource. Never mutated once cached.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Interleaved samples normalized to `[-1, 1]`.
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
}

impl DecodedAudio {
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> NeoncutResult<Self> {
        if channels == 0 || sample_rate == 0 {
            return Err(NeoncutError::decode(format!(
                "invalid layout: {channels} channels at {sample_rate} Hz"
            )));
        }
        if samples.len() % usize::from(channels) != 0 {
            return Err(NeoncutError::decode(format!(
                "sample count {} is not divisible by channel count {channels}",
                samples.len()
            )));
        }
        Ok(Self {
            samples,
            channels,
            sample_rate,
        })
    }

    /// Silent buffer of the given length.
    pub fn silence(duration_secs: f64, channels: u16, sample_rate: u32) -> Self {
        let frames = (duration_secs.max(0.0) * f64::from(sample_rate)).round() as usize;
        Self {
            samples: vec![0.0; frames * usize::from(channels.max(1))],
            channels: channels.max(1),
            sample_rate: sample_rate.max(1),
        }
    }

    /// Mono sine tone, used for test material and diagnostics.
    pub fn sine(frequency: f32, duration_secs: f64, sample_rate: u32) -> Self {
        let frames = (duration_secs.max(0.0) * f64::from(sample_rate)).round() as usize;
        let samples = (0..frames)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                (2.0 * std::f32::consts::PI * frequency * t).sin()
            })
            .collect();
        Self {
            samples,
            channels: 1,
            sample_rate: sample_rate.max(1),
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples per channel.
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels)
    }

    /// Authoritative playback length.
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample for output channel `channel` at `frame`. Mono sources feed
    /// every output channel; extra output channels repeat the last source
    /// channel.
    pub fn sample(&self, frame: usize, channel: u16) -> f32 {
        let source_channel = channel.min(self.channels - 1);
        self.samples
            .get(frame * usize::from(self.channels) + usize::from(source_channel))
            .copied()
            .unwrap_or(0.0)
    }
}

/// One window of mixed, interleaved output.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Clock time of the first frame.
    pub start_secs: f64,
    pub format: MixFormat,
    pub samples: Vec<f32>,
}

impl AudioChunk {
    pub fn silence(start_secs: f64, format: MixFormat, frames: usize) -> Self {
        Self {
            start_secs,
            format,
            samples: vec![0.0; frames * usize::from(format.channels)],
        }
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.format.channels.max(1))
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / f64::from(self.format.sample_rate)
    }

    /// Largest absolute sample value.
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
    }

    pub fn is_silent(&self) -> bool {
        self.peak() == 0.0
    }

    /// Little-endian `f32` bytes, the layout ffmpeg reads as `f32le`.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

/// Destination for mixed audio in preview mode.
pub trait AudioSink: Send {
    /// Accept the next mixed window.
    fn push_audio(&mut self, chunk: AudioChunk) -> NeoncutResult<()>;

    /// Drop anything queued but not yet played.
    fn flush(&mut self) {}
}
