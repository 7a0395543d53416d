//! Playback session: one clock driving one render + mix pass per tick.
//!
//! Preview and export share this tick. They differ only in the
//! [`SessionOutput`] attached to the session, and a session holds exactly
//! one output, so live audio and capture can never both receive the same
//! mix.

use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;

use neoncut_audio_mix::{AudioDecoder, AudioMixer, AudioSink, MixFormat};
use neoncut_common::clock::{PlaybackClock, TickOutcome};
use neoncut_common::config::AppConfig;
use neoncut_common::error::{NeoncutError, NeoncutResult};
use neoncut_project_model::ProjectState;

use crate::compositor::FrameRenderer;
use crate::media::MediaLoader;
use crate::sink::{CaptureSink, FrameSink, VideoFrame};

/// What the session is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Playing,
    Exporting,
}

/// Where rendered frames and mixed audio go.
pub enum SessionOutput {
    /// Live display plus the audio output device.
    Preview {
        frames: Box<dyn FrameSink>,
        audio: Box<dyn AudioSink>,
    },
    /// An encoder.
    Capture(Box<dyn CaptureSink>),
}

impl SessionOutput {
    fn running_state(&self) -> SessionState {
        match self {
            SessionOutput::Preview { .. } => SessionState::Playing,
            SessionOutput::Capture(_) => SessionState::Exporting,
        }
    }
}

impl std::fmt::Debug for SessionOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionOutput::Preview { .. } => f.write_str("SessionOutput::Preview"),
            SessionOutput::Capture(sink) => write!(f, "SessionOutput::Capture({})", sink.name()),
        }
    }
}

/// Run blocking session work from async code.
///
/// On a multi-threaded runtime the worker hands its other tasks off first;
/// anywhere else `f` runs inline.
pub fn run_blocking<R>(f: impl FnOnce() -> R) -> R {
    use tokio::runtime::{Handle, RuntimeFlavor};
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

/// Output frames for audio window `k` since the last reschedule, so that
/// windows sum to exactly `rate` frames per second of clock time.
pub fn audio_window_frames(window: u64, sample_rate: u32, tick_hz: u32) -> usize {
    let rate = u64::from(sample_rate);
    let hz = u64::from(tick_hz.max(1));
    let edge = |k: u64| (k * rate + hz / 2) / hz;
    (edge(window + 1) - edge(window)) as usize
}

/// Owns the clock, the compositor, the mixer, and the attached output for
/// one project snapshot.
pub struct PlaybackSession {
    project: ProjectState,
    clock: PlaybackClock,
    renderer: FrameRenderer,
    mixer: AudioMixer,
    media_loader: Arc<dyn MediaLoader>,
    audio_decoder: Arc<dyn AudioDecoder>,
    output: Option<SessionOutput>,
    state: SessionState,
    frames_emitted: u64,
    audio_window: u64,
}

impl PlaybackSession {
    /// Build a session for `project`. Fails with `NeoncutError::Config` when
    /// the output format or playback settings are unusable.
    pub fn new(
        project: ProjectState,
        config: &AppConfig,
        media_loader: Arc<dyn MediaLoader>,
        audio_decoder: Arc<dyn AudioDecoder>,
    ) -> NeoncutResult<Self> {
        config.validate()?;
        let output = &config.output;
        let mut clock =
            PlaybackClock::new(output.fps).with_grace(config.playback.end_grace_secs);
        clock.set_total_duration(project.timeline.total_duration_secs());

        let renderer = FrameRenderer::new(output.width, output.height, output.fps)
            .with_seek_tolerance(config.playback.seek_tolerance_secs);
        let mixer = AudioMixer::new(
            MixFormat::new(output.sample_rate, output.channels),
            config.playback.narration_placement,
        );

        let mut session = Self {
            project,
            clock,
            renderer,
            mixer,
            media_loader,
            audio_decoder,
            output: None,
            state: SessionState::Idle,
            frames_emitted: 0,
            audio_window: 0,
        };
        session.preload();
        Ok(session)
    }

    pub fn project(&self) -> &ProjectState {
        &self.project
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }

    pub fn time_secs(&self) -> f64 {
        self.clock.time_secs()
    }

    pub fn total_duration_secs(&self) -> f64 {
        self.clock.total_duration_secs()
    }

    pub fn frame_size(&self) -> (u32, u32) {
        self.renderer.size()
    }

    pub fn mix_format(&self) -> MixFormat {
        self.mixer.format()
    }

    /// Frames emitted since the output was attached.
    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    pub fn active_voices(&self) -> usize {
        self.mixer.active_voices()
    }

    /// See [`FrameRenderer::set_video_wait`].
    pub fn set_video_wait(&mut self, wait: Duration) {
        self.renderer.set_video_wait(wait);
    }

    fn preload(&mut self) {
        self.renderer
            .preload(&self.project.timeline, &self.project.watermark, &self.media_loader);
        self.mixer.preload(&self.project.timeline, &self.audio_decoder);
    }

    /// Block until every media load and audio decode has settled.
    pub fn wait_for_assets(&mut self) {
        self.renderer.wait_for_media();
        self.mixer.wait_for_buffers();
    }

    /// Move finished loads and decodes into the caches without blocking.
    pub fn poll_assets(&mut self) -> usize {
        self.renderer.poll() + self.mixer.poll()
    }

    /// Pending media loads plus pending audio decodes.
    pub fn pending_assets(&self) -> usize {
        self.renderer.pending_loads() + self.mixer.pending_decodes()
    }

    /// Swap in a new project snapshot. Caches keep entries for items that
    /// survive; a running session reschedules audio from the current
    /// position.
    pub fn update_project(&mut self, project: ProjectState) -> NeoncutResult<()> {
        if self.state == SessionState::Exporting {
            return Err(NeoncutError::invalid_state(
                "project cannot change during export",
            ));
        }
        self.project = project;
        self.clock
            .set_total_duration(self.project.timeline.total_duration_secs());
        self.preload();
        if self.state == SessionState::Playing {
            self.reschedule_audio();
        }
        Ok(())
    }

    /// Attach an output. Only an idle session accepts one; the previous
    /// output, if any, is returned.
    pub fn attach(&mut self, output: SessionOutput) -> NeoncutResult<Option<SessionOutput>> {
        if self.state != SessionState::Idle {
            return Err(NeoncutError::invalid_state(format!(
                "cannot attach {output:?} while {:?}",
                self.state
            )));
        }
        self.frames_emitted = 0;
        Ok(self.output.replace(output))
    }

    /// Pause and hand back the output.
    pub fn detach(&mut self) -> Option<SessionOutput> {
        if self.state != SessionState::Idle {
            self.pause();
        }
        self.output.take()
    }

    /// Start the clock, schedule audio from the current position, and emit
    /// the frame at that position. Returns the start position.
    pub fn play(&mut self) -> NeoncutResult<f64> {
        if self.state != SessionState::Idle {
            return Err(NeoncutError::invalid_state(format!(
                "session is already {:?}",
                self.state
            )));
        }
        let running = self
            .output
            .as_ref()
            .map(SessionOutput::running_state)
            .ok_or_else(|| NeoncutError::invalid_state("no output attached"))?;

        let t = self.clock.play();
        self.state = running;
        self.reschedule_audio();
        tracing::info!(t, state = ?self.state, "Playback started");

        if let Err(e) = self.emit(t) {
            self.halt();
            return Err(e);
        }
        Ok(t)
    }

    /// Stop the clock and keep the position.
    pub fn pause(&mut self) {
        self.clock.pause();
        self.halt();
    }

    /// Stop the clock and rewind to zero.
    pub fn stop(&mut self) {
        self.clock.stop();
        self.halt();
    }

    /// Move the clock. A playing session restarts audio from `t` and emits
    /// the frame there. Not allowed during export.
    pub fn seek(&mut self, t: f64) -> NeoncutResult<()> {
        match self.state {
            SessionState::Exporting => Err(NeoncutError::invalid_state("cannot seek during export")),
            SessionState::Idle => {
                self.clock.seek(t);
                Ok(())
            }
            SessionState::Playing => {
                self.clock.seek(t);
                self.reschedule_audio();
                self.emit(self.clock.time_secs())
            }
        }
    }

    /// Advance one tick, rendering and mixing the new position into the
    /// output.
    pub fn tick(&mut self) -> NeoncutResult<TickOutcome> {
        if self.state == SessionState::Idle {
            return Ok(TickOutcome::Idle);
        }
        let outcome = self.clock.tick();
        match outcome {
            TickOutcome::Advanced { time_secs } => {
                self.renderer.poll();
                if self.mixer.poll() > 0 {
                    // Newly decoded tracks join at the current phase.
                    self.reschedule_audio_at(time_secs);
                }
                self.emit(time_secs)?;
            }
            TickOutcome::Finished => {
                tracing::info!(frames = self.frames_emitted, "Playback finished");
                self.halt();
            }
            TickOutcome::Idle => self.halt(),
        }
        Ok(outcome)
    }

    /// Render the frame at `t` without touching the clock or the output.
    pub fn render_still(&mut self, t: f64) -> RgbaImage {
        self.renderer.poll();
        self.renderer
            .render(&self.project.timeline, &self.project.watermark, t)
    }

    fn halt(&mut self) {
        self.mixer.stop_all();
        if self.state != SessionState::Idle {
            tracing::debug!(t = self.clock.time_secs(), "Session idle");
        }
        self.state = SessionState::Idle;
    }

    fn reschedule_audio(&mut self) {
        self.reschedule_audio_at(self.clock.time_secs());
    }

    fn reschedule_audio_at(&mut self, t: f64) {
        self.mixer.schedule_from_time(&self.project.timeline, t);
        self.audio_window = 0;
    }

    fn emit(&mut self, t: f64) -> NeoncutResult<()> {
        let image = self
            .renderer
            .render(&self.project.timeline, &self.project.watermark, t);
        let frame = VideoFrame {
            index: self.frames_emitted,
            time_secs: t,
            image: Arc::new(image),
        };

        let format = self.mixer.format();
        let frames = audio_window_frames(self.audio_window, format.sample_rate, self.clock.tick_hz());
        let chunk = self.mixer.mix_window(frames);
        self.audio_window += 1;

        match self.output.as_mut() {
            Some(SessionOutput::Preview { frames, audio }) => {
                frames.push_frame(frame)?;
                audio.push_audio(chunk)?;
            }
            Some(SessionOutput::Capture(sink)) => {
                sink.push_frame(&frame)?;
                sink.push_audio(&chunk)?;
            }
            None => return Err(NeoncutError::invalid_state("no output attached")),
        }
        self.frames_emitted += 1;
        Ok(())
    }
}
