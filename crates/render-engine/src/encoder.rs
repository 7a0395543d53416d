//! ffmpeg-backed capture sink.
//!
//! Frames stream as raw RGBA into an ffmpeg child that encodes the video
//! track; a writer thread owns the child's stdin so a slow encoder never
//! blocks the caller. Mixed audio goes to a float WAV next to it. `finish` closes the
//! encoder and muxes both into the requested container.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;

use image::RgbaImage;

use neoncut_audio_mix::AudioChunk;
use neoncut_common::config::ContainerFormat;
use neoncut_common::error::{NeoncutError, NeoncutResult};
use neoncut_common::process::{command_exists, drain_stderr, join_stderr, tail_lines};

use crate::sink::{ArtifactStatus, CaptureSink, CaptureSpec, ExportArtifact, VideoFrame};

const STDERR_TAIL_LINES: usize = 20;

/// Frames buffered between the tick and the encoder's stdin.
const FRAME_QUEUE: usize = 8;

/// Video encoder arguments for `container`.
pub fn video_codec_args(container: ContainerFormat, bitrate_kbps: u32) -> Vec<String> {
    let bitrate = format!("{}k", bitrate_kbps.max(1000));
    match container {
        ContainerFormat::Mp4 => vec![
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "medium".to_string(),
            "-profile:v".to_string(),
            "high".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-b:v".to_string(),
            bitrate,
        ],
        ContainerFormat::Webm => vec![
            "-c:v".to_string(),
            "libvpx-vp9".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-b:v".to_string(),
            bitrate,
        ],
    }
}

/// Audio encoder arguments for `container`, plus container flags.
pub fn audio_codec_args(container: ContainerFormat, bitrate_kbps: u32) -> Vec<String> {
    let bitrate = format!("{}k", bitrate_kbps.max(64));
    match container {
        ContainerFormat::Mp4 => vec![
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            bitrate,
            "-movflags".to_string(),
            "+faststart".to_string(),
        ],
        ContainerFormat::Webm => vec![
            "-c:a".to_string(),
            "libopus".to_string(),
            "-b:a".to_string(),
            bitrate,
        ],
    }
}

/// Arguments for the video-only encode reading RGBA frames from stdin.
fn encode_args(spec: &CaptureSpec, output: &Path) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-v".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgba".to_string(),
        "-s".to_string(),
        format!("{}x{}", spec.width, spec.height),
        "-r".to_string(),
        spec.fps.to_string(),
        "-i".to_string(),
        "-".to_string(),
        "-an".to_string(),
    ];
    args.extend(video_codec_args(spec.container, spec.video_bitrate_kbps));
    args.push(output.display().to_string());
    args
}

/// Arguments for the final mux of the encoded video with the WAV.
fn mux_args(spec: &CaptureSpec, video: &Path, audio: &Path, output: &Path) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-v".to_string(),
        "error".to_string(),
        "-i".to_string(),
        video.display().to_string(),
        "-i".to_string(),
        audio.display().to_string(),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-map".to_string(),
        "1:a:0".to_string(),
        "-c:v".to_string(),
        "copy".to_string(),
    ];
    args.extend(audio_codec_args(spec.container, spec.audio_bitrate_kbps));
    args.push("-shortest".to_string());
    args.push(output.display().to_string());
    args
}

/// Writes raw frames to `W` on a dedicated thread.
struct FrameWriter {
    tx: Option<SyncSender<Arc<RgbaImage>>>,
    handle: Option<JoinHandle<io::Result<u64>>>,
}

impl FrameWriter {
    fn spawn<W: Write + Send + 'static>(mut writer: W) -> NeoncutResult<Self> {
        let (tx, rx) = sync_channel::<Arc<RgbaImage>>(FRAME_QUEUE);
        let handle = std::thread::Builder::new()
            .name("frame-writer".to_string())
            .spawn(move || -> io::Result<u64> {
                let mut written = 0;
                for frame in rx {
                    writer.write_all(frame.as_raw())?;
                    written += 1;
                }
                writer.flush()?;
                Ok(written)
            })?;
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// Queue a frame. Waits only when the queue is full.
    fn send(&mut self, frame: Arc<RgbaImage>) -> NeoncutResult<()> {
        let queued = match &self.tx {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        };
        if queued {
            return Ok(());
        }
        // The thread exited early; its result says why.
        self.close()?;
        Err(NeoncutError::capture("frame writer is closed"))
    }

    /// Stop accepting frames, drain the queue, and drop the writer.
    /// Returns how many frames were written.
    fn close(&mut self) -> NeoncutResult<u64> {
        drop(self.tx.take());
        let Some(handle) = self.handle.take() else {
            return Ok(0);
        };
        match handle.join() {
            Ok(Ok(written)) => Ok(written),
            Ok(Err(e)) => Err(NeoncutError::capture(format!("Failed to write frame: {e}"))),
            Err(_) => Err(NeoncutError::capture("frame writer panicked")),
        }
    }
}

struct EncoderProcess {
    child: Child,
    writer: FrameWriter,
    stderr: Option<JoinHandle<String>>,
}

struct ActiveCapture {
    spec: CaptureSpec,
    work_dir: PathBuf,
    video_path: PathBuf,
    audio_path: PathBuf,
    encoder: EncoderProcess,
    wav: Option<hound::WavWriter<BufWriter<File>>>,
    frames: u64,
}

/// Capture sink that encodes through an `ffmpeg` child process.
#[derive(Default)]
pub struct FfmpegCaptureSink {
    active: Option<ActiveCapture>,
}

impl FfmpegCaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `ffmpeg` is on `PATH`.
    pub fn is_available() -> bool {
        command_exists("ffmpeg")
    }

    fn active_mut(&mut self) -> NeoncutResult<&mut ActiveCapture> {
        self.active
            .as_mut()
            .ok_or_else(|| NeoncutError::invalid_state("capture sink has not begun"))
    }
}

fn spawn_encoder(args: &[String]) -> NeoncutResult<EncoderProcess> {
    tracing::debug!(?args, "Running ffmpeg encoder");
    let mut child = Command::new("ffmpeg")
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| NeoncutError::capture(format!("Failed to start ffmpeg: {e}")))?;

    let stderr = child.stderr.take().map(drain_stderr);
    let writer = match child.stdin.take().map(FrameWriter::spawn) {
        Some(Ok(writer)) => writer,
        Some(Err(e)) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e);
        }
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(NeoncutError::capture("Failed to capture ffmpeg stdin"));
        }
    };
    tracing::info!(pid = child.id(), "ffmpeg encoder started");
    Ok(EncoderProcess {
        child,
        writer,
        stderr,
    })
}

fn run_ffmpeg(args: &[String]) -> NeoncutResult<()> {
    tracing::debug!(?args, "Running ffmpeg");
    let output = Command::new("ffmpeg")
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| NeoncutError::export(format!("Failed to start ffmpeg: {e}")))?;
    if !output.status.success() {
        return Err(NeoncutError::export(format!(
            "ffmpeg mux failed (status {}): {}",
            output.status,
            tail_lines(&String::from_utf8_lossy(&output.stderr), STDERR_TAIL_LINES)
        )));
    }
    Ok(())
}

impl ActiveCapture {
    fn close_encoder(&mut self) -> NeoncutResult<()> {
        // Closing stdin signals end of stream.
        let written = self.encoder.writer.close();
        let status = self
            .encoder
            .child
            .wait()
            .map_err(|e| NeoncutError::export(format!("Failed to wait on ffmpeg: {e}")))?;
        let stderr_output = self.encoder.stderr.take().map(join_stderr).unwrap_or_default();
        if !status.success() {
            return Err(NeoncutError::export(format!(
                "ffmpeg encode failed (status {status}): {}",
                tail_lines(&stderr_output, STDERR_TAIL_LINES)
            )));
        }
        written.map(|frames| {
            tracing::debug!(frames, "Encoder input closed");
        })
    }

    fn close_audio(&mut self) -> NeoncutResult<()> {
        if let Some(wav) = self.wav.take() {
            wav.finalize()
                .map_err(|e| NeoncutError::export(format!("Failed to finalize audio: {e}")))?;
        }
        Ok(())
    }

    /// Close both streams, mux them, and read back the container bytes.
    fn finalize(&mut self) -> NeoncutResult<Vec<u8>> {
        self.close_encoder()?;
        self.close_audio()?;
        let output = self
            .work_dir
            .join(format!("output.{}", self.spec.container.extension()));
        run_ffmpeg(&mux_args(
            &self.spec,
            &self.video_path,
            &self.audio_path,
            &output,
        ))?;
        Ok(std::fs::read(&output)?)
    }

    fn cleanup(&self) {
        if let Err(e) = std::fs::remove_dir_all(&self.work_dir) {
            tracing::debug!(dir = %self.work_dir.display(), error = %e, "Capture cleanup failed");
        }
    }

    fn kill(&mut self) {
        // Killing the child breaks the pipe, which unblocks the writer.
        let _ = self.encoder.child.kill();
        let _ = self.encoder.child.wait();
        let _ = self.encoder.writer.close();
        if let Some(handle) = self.encoder.stderr.take() {
            join_stderr(handle);
        }
        self.wav = None;
    }
}

impl CaptureSink for FfmpegCaptureSink {
    fn begin(&mut self, spec: &CaptureSpec) -> NeoncutResult<()> {
        if self.active.is_some() {
            return Err(NeoncutError::invalid_state("capture already in progress"));
        }
        if !Self::is_available() {
            return Err(NeoncutError::capture(
                "No capture encoder found (expected ffmpeg in PATH)",
            ));
        }

        let work_dir = std::env::temp_dir().join(format!(
            "neoncut-capture-{}-{}",
            std::process::id(),
            chrono::Utc::now().timestamp_millis()
        ));
        std::fs::create_dir_all(&work_dir).map_err(|e| {
            NeoncutError::capture(format!("Failed to create {}: {e}", work_dir.display()))
        })?;

        let ext = spec.container.extension();
        let video_path = work_dir.join(format!("video.{ext}"));
        let audio_path = work_dir.join("audio.wav");

        let wav = hound::WavWriter::create(
            &audio_path,
            hound::WavSpec {
                channels: spec.audio.channels,
                sample_rate: spec.audio.sample_rate,
                bits_per_sample: 32,
                sample_format: hound::SampleFormat::Float,
            },
        )
        .map_err(|e| NeoncutError::capture(format!("Failed to open audio capture: {e}")));
        let wav = match wav {
            Ok(wav) => wav,
            Err(e) => {
                let _ = std::fs::remove_dir_all(&work_dir);
                return Err(e);
            }
        };

        let encoder = match spawn_encoder(&encode_args(spec, &video_path)) {
            Ok(encoder) => encoder,
            Err(e) => {
                let _ = std::fs::remove_dir_all(&work_dir);
                return Err(e);
            }
        };

        tracing::info!(
            width = spec.width,
            height = spec.height,
            fps = spec.fps,
            format = ?spec.container,
            "Capture started"
        );
        self.active = Some(ActiveCapture {
            spec: spec.clone(),
            work_dir,
            video_path,
            audio_path,
            encoder,
            wav: Some(wav),
            frames: 0,
        });
        Ok(())
    }

    fn push_frame(&mut self, frame: &VideoFrame) -> NeoncutResult<()> {
        let active = self.active_mut()?;
        let expected = (active.spec.width, active.spec.height);
        if frame.image.dimensions() != expected {
            return Err(NeoncutError::capture(format!(
                "frame is {:?}, encoder expects {:?}",
                frame.image.dimensions(),
                expected
            )));
        }
        active.encoder.writer.send(Arc::clone(&frame.image))?;
        active.frames += 1;
        Ok(())
    }

    fn push_audio(&mut self, chunk: &AudioChunk) -> NeoncutResult<()> {
        let active = self.active_mut()?;
        let wav = active
            .wav
            .as_mut()
            .ok_or_else(|| NeoncutError::capture("audio capture is closed"))?;
        for &sample in &chunk.samples {
            wav.write_sample(sample)
                .map_err(|e| NeoncutError::capture(format!("Failed to write audio: {e}")))?;
        }
        Ok(())
    }

    fn finish(&mut self, status: ArtifactStatus) -> NeoncutResult<ExportArtifact> {
        let mut active = self
            .active
            .take()
            .ok_or_else(|| NeoncutError::invalid_state("capture sink has not begun"))?;

        let result = active.finalize();

        if result.is_err() {
            active.kill();
        }
        active.cleanup();
        let bytes = result?;

        let duration_secs = active.frames as f64 / f64::from(active.spec.fps.max(1));
        tracing::info!(
            frames = active.frames,
            bytes = bytes.len(),
            duration_secs,
            ?status,
            "Capture finalized"
        );
        Ok(ExportArtifact {
            bytes,
            format: active.spec.container,
            file_name: active.spec.file_name.clone(),
            duration_secs,
            frames: active.frames,
            status,
        })
    }

    fn abort(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.kill();
            active.cleanup();
            tracing::info!(frames = active.frames, "Capture aborted");
        }
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

impl Drop for FfmpegCaptureSink {
    fn drop(&mut self) {
        self.abort();
    }
}
