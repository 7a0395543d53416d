//! Audio decoding backends.
//!
//! Decoders turn a track source into a [`DecodedAudio`] buffer. They run on
//! cache loader threads, never on the tick path.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};

use hound::{SampleFormat, WavReader};

use neoncut_common::error::{NeoncutError, NeoncutResult};
use neoncut_common::process::{command_exists, drain_stderr, join_stderr, tail_lines};

use crate::buffer::{DecodedAudio, MixFormat};

/// Turns a track source into samples.
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, source: &str) -> NeoncutResult<DecodedAudio>;

    /// Backend name.
    fn name(&self) -> &str;
}

/// Decode WAV files in-process.
pub fn decode_wav(path: &Path) -> NeoncutResult<DecodedAudio> {
    let reader = WavReader::open(path)
        .map_err(|e| NeoncutError::decode(format!("{}: {e}", path.display())))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| NeoncutError::decode(format!("{}: {e}", path.display())))?,
        SampleFormat::Int => {
            let max_val = (1u64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<_, _>>()
                .map_err(|e| NeoncutError::decode(format!("{}: {e}", path.display())))?
        }
    };

    DecodedAudio::new(samples, spec.channels, spec.sample_rate)
}

/// Decodes anything ffmpeg understands into interleaved `f32le` at the
/// mixer's output layout. WAV files skip the subprocess.
#[derive(Debug, Clone)]
pub struct FfmpegAudioDecoder {
    format: MixFormat,
}

impl FfmpegAudioDecoder {
    pub fn new(format: MixFormat) -> Self {
        Self { format }
    }

    pub fn is_available() -> bool {
        command_exists("ffmpeg")
    }

    fn decode_with_ffmpeg(&self, source: &str) -> NeoncutResult<DecodedAudio> {
        let channels = self.format.channels.to_string();
        let rate = self.format.sample_rate.to_string();
        let mut child = Command::new("ffmpeg")
            .args(["-v", "error", "-nostdin", "-i", source, "-vn"])
            .args(["-f", "f32le", "-ac", &channels, "-ar", &rate, "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| NeoncutError::decode(format!("Failed to start ffmpeg: {e}")))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| NeoncutError::decode("Failed to capture ffmpeg stderr"))?;
        let stderr_task = drain_stderr(stderr);

        let mut bytes = Vec::new();
        child
            .stdout
            .take()
            .ok_or_else(|| NeoncutError::decode("Failed to capture ffmpeg stdout"))?
            .read_to_end(&mut bytes)?;

        let status = child
            .wait()
            .map_err(|e| NeoncutError::decode(format!("Failed to wait on ffmpeg: {e}")))?;
        let stderr_output = join_stderr(stderr_task);
        if !status.success() {
            return Err(NeoncutError::decode(format!(
                "ffmpeg could not decode {source} (status {status}): {}",
                tail_lines(&stderr_output, 4)
            )));
        }

        let samples = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        DecodedAudio::new(samples, self.format.channels, self.format.sample_rate)
    }
}

impl AudioDecoder for FfmpegAudioDecoder {
    fn decode(&self, source: &str) -> NeoncutResult<DecodedAudio> {
        let path = Path::new(source);
        let is_wav = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));

        if is_wav && path.exists() {
            return decode_wav(path);
        }
        self.decode_with_ffmpeg(source)
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

/// Serves pre-built buffers by source. Unknown sources fail to decode.
#[derive(Debug, Clone, Default)]
pub struct MemoryAudioDecoder {
    buffers: HashMap<String, DecodedAudio>,
}

impl MemoryAudioDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: impl Into<String>, audio: DecodedAudio) -> Self {
        self.insert(source, audio);
        self
    }

    pub fn insert(&mut self, source: impl Into<String>, audio: DecodedAudio) {
        self.buffers.insert(source.into(), audio);
    }
}

impl AudioDecoder for MemoryAudioDecoder {
    fn decode(&self, source: &str) -> NeoncutResult<DecodedAudio> {
        self.buffers
            .get(source)
            .cloned()
            .ok_or_else(|| NeoncutError::decode(format!("no audio registered for {source}")))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_wav_int16() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..800 {
            writer.write_sample(i16::MAX / 2).unwrap();
        }
        writer.finalize().unwrap();

        let audio = decode_wav(&path).unwrap();
        assert_eq!(audio.channels(), 1);
        assert_eq!(audio.frames(), 800);
        assert!((audio.duration_secs() - 0.1).abs() < 1e-9);
        assert!((audio.samples()[0] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_decode_wav_missing_file_is_decode_error() {
        let err = decode_wav(Path::new("/nonexistent/voice.wav")).unwrap_err();
        assert!(matches!(err, NeoncutError::Decode { .. }));
    }

    #[test]
    fn test_memory_decoder_unknown_source() {
        let decoder = MemoryAudioDecoder::new().with("a.mp3", DecodedAudio::silence(1.0, 2, 100));
        assert!(decoder.decode("a.mp3").is_ok());
        assert!(decoder.decode("b.mp3").is_err());
    }
}
