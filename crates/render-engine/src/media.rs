//! Media handles: decoded stills and seekable video decoders.
//!
//! Handles are produced off the tick path by a [`MediaLoader`] and cached
//! by item identity. A handle that is still loading, or whose decoder has
//! no frame ready, is skipped for that tick.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::mpsc::{sync_channel, Receiver, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbaImage;

use neoncut_common::error::{NeoncutError, NeoncutResult};
use neoncut_common::process::command_exists;
use neoncut_project_model::{MediaItem, MediaKind};

/// Decoded frames buffered ahead of the clock.
const VIDEO_READ_AHEAD: usize = 8;

/// A seekable source of video frames.
///
/// Only the compositor seeks.
pub trait VideoDecoder: Send {
    /// Presentation time of the most recently returned frame.
    fn position_secs(&self) -> f64;

    /// Restart decoding at `secs`.
    fn seek(&mut self, secs: f64) -> NeoncutResult<()>;

    /// Advance to the latest frame at or before `secs`, waiting at most
    /// `wait` for one to arrive. `None` when nothing is ready.
    fn frame_at(&mut self, secs: f64, wait: Duration) -> Option<Arc<RgbaImage>>;

    /// Target of a seek whose first frame has not arrived yet.
    ///
    /// While a seek is in flight `position_secs` reports the target, not a
    /// decoded frame, so drift against it means nothing.
    fn pending_seek_secs(&self) -> Option<f64> {
        None
    }
}

/// A loaded media resource.
pub enum MediaHandle {
    Image(Arc<RgbaImage>),
    Video(Box<dyn VideoDecoder>),
}

impl std::fmt::Debug for MediaHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaHandle::Image(image) => f
                .debug_tuple("Image")
                .field(&image.dimensions())
                .finish(),
            MediaHandle::Video(decoder) => f
                .debug_struct("Video")
                .field("position_secs", &decoder.position_secs())
                .finish(),
        }
    }
}

/// Opens media sources.
pub trait MediaLoader: Send + Sync {
    fn load_image(&self, source: &str) -> NeoncutResult<RgbaImage>;

    /// Open a decoder producing frames at the output size and rate.
    fn open_video(
        &self,
        source: &str,
        width: u32,
        height: u32,
        fps: u32,
    ) -> NeoncutResult<Box<dyn VideoDecoder>>;

    fn load(&self, item: &MediaItem, width: u32, height: u32, fps: u32) -> NeoncutResult<MediaHandle> {
        match item.kind {
            MediaKind::Image => Ok(MediaHandle::Image(Arc::new(self.load_image(&item.source)?))),
            MediaKind::Video => Ok(MediaHandle::Video(
                self.open_video(&item.source, width, height, fps)?,
            )),
        }
    }
}

/// Loads stills with the `image` crate and decodes video through ffmpeg.
#[derive(Debug, Clone, Default)]
pub struct FsMediaLoader;

impl FsMediaLoader {
    pub fn new() -> Self {
        Self
    }
}

impl MediaLoader for FsMediaLoader {
    fn load_image(&self, source: &str) -> NeoncutResult<RgbaImage> {
        let path = Path::new(source);
        if !path.exists() {
            return Err(NeoncutError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        Ok(image::open(path)?.into_rgba8())
    }

    fn open_video(
        &self,
        source: &str,
        width: u32,
        height: u32,
        fps: u32,
    ) -> NeoncutResult<Box<dyn VideoDecoder>> {
        Ok(Box::new(FfmpegVideoDecoder::open(source, width, height, fps)?))
    }
}

/// Frames arriving from a decoder thread, stamped against the clock.
///
/// The last frame shown is kept across restarts so a seek never blanks
/// the picture while the new position spins up.
#[derive(Debug)]
pub struct FrameQueue {
    frames: Option<Receiver<Arc<RgbaImage>>>,
    frame_secs: f64,
    /// Timestamp of the next frame the channel will yield.
    next_secs: f64,
    position_secs: f64,
    pending_seek: Option<f64>,
    current: Option<Arc<RgbaImage>>,
}

impl FrameQueue {
    pub fn new(fps: u32) -> Self {
        Self {
            frames: None,
            frame_secs: 1.0 / f64::from(fps.max(1)),
            next_secs: 0.0,
            position_secs: 0.0,
            pending_seek: None,
            current: None,
        }
    }

    /// Switch to a new stream whose first frame is at `secs`.
    pub fn restart(&mut self, frames: Receiver<Arc<RgbaImage>>, secs: f64) {
        self.frames = Some(frames);
        self.next_secs = secs;
        self.position_secs = secs;
        self.pending_seek = Some(secs);
    }

    /// Drop the current stream.
    pub fn close(&mut self) {
        self.frames = None;
    }

    pub fn position_secs(&self) -> f64 {
        self.position_secs
    }

    pub fn pending_seek_secs(&self) -> Option<f64> {
        self.pending_seek
    }

    /// Consume every frame stamped at or before `secs`. Returns the newest
    /// one, or the last frame shown when nothing new has arrived.
    pub fn advance(&mut self, secs: f64, wait: Duration) -> Option<Arc<RgbaImage>> {
        let deadline = Instant::now() + wait;
        while self.next_secs <= secs + 1e-9 {
            let Some(rx) = &self.frames else {
                break;
            };
            let next = match rx.try_recv() {
                Ok(frame) => Some(frame),
                Err(TryRecvError::Empty) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    rx.recv_timeout(remaining).ok()
                }
                Err(TryRecvError::Disconnected) => None,
            };
            let Some(frame) = next else {
                break;
            };
            self.position_secs = self.next_secs;
            self.next_secs += self.frame_secs;
            self.pending_seek = None;
            self.current = Some(frame);
        }
        self.current.clone()
    }
}

/// Streams raw RGBA frames out of an ffmpeg child process.
///
/// A reader thread fills a bounded channel; the tick path only ever
/// drains what has already arrived.
pub struct FfmpegVideoDecoder {
    source: String,
    width: u32,
    height: u32,
    fps: u32,
    child: Option<Child>,
    queue: FrameQueue,
}

impl FfmpegVideoDecoder {
    pub fn open(source: &str, width: u32, height: u32, fps: u32) -> NeoncutResult<Self> {
        if !command_exists("ffmpeg") {
            return Err(NeoncutError::decode("ffmpeg not found in PATH"));
        }
        let mut decoder = Self {
            source: source.to_string(),
            width,
            height,
            fps: fps.max(1),
            child: None,
            queue: FrameQueue::new(fps),
        };
        decoder.spawn_at(0.0)?;
        Ok(decoder)
    }

    fn spawn_at(&mut self, secs: f64) -> NeoncutResult<()> {
        self.kill();
        let size = format!("{}x{}", self.width, self.height);
        let mut child = Command::new("ffmpeg")
            .args(["-v", "error", "-nostdin"])
            .args(["-ss", &format!("{secs:.3}"), "-i", &self.source])
            .args(["-an", "-f", "rawvideo", "-pix_fmt", "rgba"])
            .args(["-s", &size, "-r", &self.fps.to_string(), "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| NeoncutError::decode(format!("Failed to start ffmpeg: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| NeoncutError::decode("Failed to capture ffmpeg stdout"))?;

        let (tx, rx) = sync_channel(VIDEO_READ_AHEAD);
        let (width, height) = (self.width, self.height);
        std::thread::Builder::new()
            .name("video-decode".to_string())
            .spawn(move || read_frames(stdout, width, height, |frame| tx.send(frame).is_ok()))?;

        tracing::debug!(source = %self.source, secs, "Video decoder started");
        self.child = Some(child);
        self.queue.restart(rx, secs);
        Ok(())
    }

    fn kill(&mut self) {
        self.queue.close();
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Read fixed-size RGBA frames until EOF or until `emit` returns `false`.
fn read_frames(
    mut stdout: ChildStdout,
    width: u32,
    height: u32,
    mut emit: impl FnMut(Arc<RgbaImage>) -> bool,
) {
    let frame_len = width as usize * height as usize * 4;
    loop {
        let mut buf = vec![0u8; frame_len];
        if stdout.read_exact(&mut buf).is_err() {
            return;
        }
        let Some(frame) = RgbaImage::from_raw(width, height, buf) else {
            return;
        };
        if !emit(Arc::new(frame)) {
            return;
        }
    }
}

impl VideoDecoder for FfmpegVideoDecoder {
    fn position_secs(&self) -> f64 {
        self.queue.position_secs()
    }

    fn seek(&mut self, secs: f64) -> NeoncutResult<()> {
        self.spawn_at(secs.max(0.0))
    }

    fn frame_at(&mut self, secs: f64, wait: Duration) -> Option<Arc<RgbaImage>> {
        self.queue.advance(secs, wait)
    }

    fn pending_seek_secs(&self) -> Option<f64> {
        self.queue.pending_seek_secs()
    }
}

impl Drop for FfmpegVideoDecoder {
    fn drop(&mut self) {
        self.kill();
    }
}

/// In-memory frame sequence, for tests and generated content.
#[derive(Debug, Clone)]
pub struct FrameSequenceDecoder {
    frames: Vec<Arc<RgbaImage>>,
    fps: f64,
    position_secs: f64,
    seeks: usize,
}

impl FrameSequenceDecoder {
    pub fn new(frames: Vec<Arc<RgbaImage>>, fps: f64) -> Self {
        Self {
            frames,
            fps: fps.max(1.0),
            position_secs: 0.0,
            seeks: 0,
        }
    }

    /// How many times the decoder was asked to seek.
    pub fn seek_count(&self) -> usize {
        self.seeks
    }
}

impl VideoDecoder for FrameSequenceDecoder {
    fn position_secs(&self) -> f64 {
        self.position_secs
    }

    fn seek(&mut self, secs: f64) -> NeoncutResult<()> {
        self.seeks += 1;
        self.position_secs = secs.max(0.0);
        Ok(())
    }

    fn frame_at(&mut self, secs: f64, _wait: Duration) -> Option<Arc<RgbaImage>> {
        if self.frames.is_empty() {
            return None;
        }
        let index = ((secs.max(0.0) * self.fps).floor() as usize).min(self.frames.len() - 1);
        self.position_secs = index as f64 / self.fps;
        Some(Arc::clone(&self.frames[index]))
    }
}

/// Serves pre-built media by source.
#[derive(Debug, Clone, Default)]
pub struct MemoryMediaLoader {
    images: HashMap<String, Arc<RgbaImage>>,
    videos: HashMap<String, (Vec<Arc<RgbaImage>>, f64)>,
}

impl MemoryMediaLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, source: impl Into<String>, image: RgbaImage) -> Self {
        self.images.insert(source.into(), Arc::new(image));
        self
    }

    pub fn with_video(
        mut self,
        source: impl Into<String>,
        frames: Vec<RgbaImage>,
        fps: f64,
    ) -> Self {
        let frames = frames.into_iter().map(Arc::new).collect();
        self.videos.insert(source.into(), (frames, fps));
        self
    }
}

impl MediaLoader for MemoryMediaLoader {
    fn load_image(&self, source: &str) -> NeoncutResult<RgbaImage> {
        self.images
            .get(source)
            .map(|image| image.as_ref().clone())
            .ok_or_else(|| NeoncutError::decode(format!("no image registered for {source}")))
    }

    fn open_video(
        &self,
        source: &str,
        _width: u32,
        _height: u32,
        _fps: u32,
    ) -> NeoncutResult<Box<dyn VideoDecoder>> {
        let (frames, fps) = self
            .videos
            .get(source)
            .ok_or_else(|| NeoncutError::decode(format!("no video registered for {source}")))?;
        Ok(Box::new(FrameSequenceDecoder::new(frames.clone(), *fps)))
    }
}
