//! Frame and capture sinks.
//!
//! Preview wires a [`FrameSink`] plus a live [`AudioSink`]; export wires a
//! single [`CaptureSink`] that takes both frames and mixed audio.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::{Arc, Mutex};

use image::RgbaImage;
use serde::Serialize;

use neoncut_audio_mix::{AudioChunk, MixFormat};
use neoncut_common::config::{ContainerFormat, OutputConfig};
use neoncut_common::error::{NeoncutError, NeoncutResult};

/// One rendered frame.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Frames emitted since the session started.
    pub index: u64,
    /// Clock time the frame was rendered at.
    pub time_secs: f64,
    pub image: Arc<RgbaImage>,
}

/// Destination for rendered frames in preview mode.
pub trait FrameSink: Send {
    fn push_frame(&mut self, frame: VideoFrame) -> NeoncutResult<()>;
}

/// Capture parameters handed to a sink before the first frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub audio: MixFormat,
    pub container: ContainerFormat,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
    /// Suggested file name for the finished artifact.
    pub file_name: String,
}

impl CaptureSpec {
    pub fn from_output(output: &OutputConfig) -> Self {
        Self {
            width: output.width,
            height: output.height,
            fps: output.fps,
            audio: MixFormat::new(output.sample_rate, output.channels),
            container: output.format,
            video_bitrate_kbps: output.video_bitrate_kbps,
            audio_bitrate_kbps: output.audio_bitrate_kbps,
            file_name: default_file_name(output.format),
        }
    }
}

/// `neoncut-export-<unix millis>.<ext>`
pub fn default_file_name(format: ContainerFormat) -> String {
    format!(
        "neoncut-export-{}.{}",
        chrono::Utc::now().timestamp_millis(),
        format.extension()
    )
}

/// Whether an artifact covers the whole timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Complete,
    /// Export was cancelled; the artifact holds what was captured.
    Partial,
}

/// A finished export.
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    /// Encoded container bytes.
    pub bytes: Vec<u8>,
    pub format: ContainerFormat,
    pub file_name: String,
    pub duration_secs: f64,
    pub frames: u64,
    pub status: ArtifactStatus,
}

impl ExportArtifact {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    pub fn is_complete(&self) -> bool {
        self.status == ArtifactStatus::Complete
    }

    /// Persist the artifact.
    pub fn write_to(&self, path: &Path) -> NeoncutResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, &self.bytes)?;
        Ok(())
    }
}

/// Receives frames and mixed audio during export.
pub trait CaptureSink: Send {
    /// Acquire the encoder. Called before any clock state changes.
    fn begin(&mut self, spec: &CaptureSpec) -> NeoncutResult<()>;

    fn push_frame(&mut self, frame: &VideoFrame) -> NeoncutResult<()>;

    fn push_audio(&mut self, chunk: &AudioChunk) -> NeoncutResult<()>;

    /// Finalize with everything captured so far.
    fn finish(&mut self, status: ArtifactStatus) -> NeoncutResult<ExportArtifact>;

    /// Discard partial output.
    fn abort(&mut self);

    /// Sink name.
    fn name(&self) -> &str;
}

/// Frame as recorded by [`MemoryCaptureSink`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapturedFrame {
    pub index: u64,
    pub time_secs: f64,
    /// Hash of the frame's pixels.
    pub digest: u64,
}

/// Everything a [`MemoryCaptureSink`] saw.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CaptureLog {
    pub began: bool,
    pub finished: bool,
    pub aborted: bool,
    pub frames: Vec<CapturedFrame>,
    pub audio_frames: u64,
    pub audio_peak: f32,
    /// Start time of every audio chunk.
    pub audio_starts: Vec<f64>,
}

/// When a [`MemoryCaptureSink`] should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePoint {
    #[default]
    Never,
    Begin,
    /// Fail on the frame with this index.
    Frame(u64),
}

/// Records capture activity in memory. Clones share one log.
#[derive(Debug, Clone, Default)]
pub struct MemoryCaptureSink {
    log: Arc<Mutex<CaptureLog>>,
    spec: Option<CaptureSpec>,
    fail: FailurePoint,
}

impl MemoryCaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_at(fail: FailurePoint) -> Self {
        Self {
            fail,
            ..Self::default()
        }
    }

    /// Snapshot of the log.
    pub fn log(&self) -> CaptureLog {
        self.log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn with_log<R>(&self, f: impl FnOnce(&mut CaptureLog) -> R) -> R {
        match self.log.lock() {
            Ok(mut log) => f(&mut log),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

/// Hash of an image's pixels.
pub fn frame_digest(image: &RgbaImage) -> u64 {
    let mut hasher = DefaultHasher::new();
    image.dimensions().hash(&mut hasher);
    image.as_raw().hash(&mut hasher);
    hasher.finish()
}

impl CaptureSink for MemoryCaptureSink {
    fn begin(&mut self, spec: &CaptureSpec) -> NeoncutResult<()> {
        if self.fail == FailurePoint::Begin {
            return Err(NeoncutError::capture("memory sink refused to start"));
        }
        self.spec = Some(spec.clone());
        self.with_log(|log| log.began = true);
        Ok(())
    }

    fn push_frame(&mut self, frame: &VideoFrame) -> NeoncutResult<()> {
        if self.fail == FailurePoint::Frame(frame.index) {
            return Err(NeoncutError::capture(format!(
                "memory sink failed at frame {}",
                frame.index
            )));
        }
        let digest = frame_digest(&frame.image);
        self.with_log(|log| {
            log.frames.push(CapturedFrame {
                index: frame.index,
                time_secs: frame.time_secs,
                digest,
            })
        });
        Ok(())
    }

    fn push_audio(&mut self, chunk: &AudioChunk) -> NeoncutResult<()> {
        self.with_log(|log| {
            log.audio_frames += chunk.frames() as u64;
            log.audio_peak = log.audio_peak.max(chunk.peak());
            log.audio_starts.push(chunk.start_secs);
        });
        Ok(())
    }

    fn finish(&mut self, status: ArtifactStatus) -> NeoncutResult<ExportArtifact> {
        let spec = self
            .spec
            .clone()
            .ok_or_else(|| NeoncutError::invalid_state("finish called before begin"))?;
        let log = self.with_log(|log| {
            log.finished = true;
            log.clone()
        });
        let frames = log.frames.len() as u64;
        Ok(ExportArtifact {
            bytes: serde_json::to_vec_pretty(&log)?,
            format: spec.container,
            file_name: spec.file_name,
            duration_secs: frames as f64 / f64::from(spec.fps.max(1)),
            frames,
            status,
        })
    }

    fn abort(&mut self) {
        self.with_log(|log| log.aborted = true);
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Publishes the latest frame on a `watch` channel.
pub struct WatchFrameSink {
    tx: Arc<tokio::sync::watch::Sender<Option<VideoFrame>>>,
}

impl WatchFrameSink {
    pub fn new(tx: Arc<tokio::sync::watch::Sender<Option<VideoFrame>>>) -> Self {
        Self { tx }
    }

    /// A sink and the receiver that observes it.
    pub fn channel() -> (Self, tokio::sync::watch::Receiver<Option<VideoFrame>>) {
        let (tx, rx) = tokio::sync::watch::channel(None);
        (Self::new(Arc::new(tx)), rx)
    }
}

impl FrameSink for WatchFrameSink {
    fn push_frame(&mut self, frame: VideoFrame) -> NeoncutResult<()> {
        // No receivers left is not an error for a preview.
        self.tx.send_replace(Some(frame));
        Ok(())
    }
}

/// Forwards mixed audio to an mpsc channel consumed by an output device.
pub struct ChannelAudioSink {
    tx: tokio::sync::mpsc::UnboundedSender<AudioChunk>,
}

impl ChannelAudioSink {
    pub fn new(tx: tokio::sync::mpsc::UnboundedSender<AudioChunk>) -> Self {
        Self { tx }
    }
}

impl neoncut_audio_mix::AudioSink for ChannelAudioSink {
    fn push_audio(&mut self, chunk: AudioChunk) -> NeoncutResult<()> {
        self.tx
            .send(chunk)
            .map_err(|_| NeoncutError::audio("audio output closed"))
    }
}

/// Discards audio.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAudioSink;

impl neoncut_audio_mix::AudioSink for NullAudioSink {
    fn push_audio(&mut self, _chunk: AudioChunk) -> NeoncutResult<()> {
        Ok(())
    }
}
