//! Export pipeline.
//!
//! Export drives the same session tick as preview with a capture sink
//! attached, paced against the wall clock unless told otherwise. The sink
//! is acquired before the clock is touched, so a failed acquisition leaves
//! the session exactly as it was. An idle preview output is set aside for
//! the run and reattached afterwards.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use neoncut_common::clock::{FramePacer, TickOutcome};
use neoncut_common::config::{AppConfig, ContainerFormat, Pacing};
use neoncut_common::error::{NeoncutError, NeoncutResult};

use crate::session::{run_blocking, PlaybackSession, SessionOutput, SessionState};
use crate::sink::{default_file_name, ArtifactStatus, CaptureSink, CaptureSpec, ExportArtifact};

/// How long export waits for media loads and audio decodes by default.
pub const ASSET_TIMEOUT: Duration = Duration::from_secs(30);

const ASSET_POLL: Duration = Duration::from_millis(10);

/// Progress callback for export runs.
pub type ProgressCallback = Box<dyn Fn(ExportProgress) + Send>;

/// Export progress report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportProgress {
    /// Percent complete. Stays at or below 99 until the artifact exists.
    pub percent: u8,

    /// Clock position of the last captured frame.
    pub time_secs: f64,

    /// Frames captured so far.
    pub frames: u64,

    /// Current stage.
    pub stage: ExportStage,
}

/// Stages of an export run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStage {
    Preparing,
    Rendering,
    Finalizing,
    Complete,
    Failed,
    Cancelled,
}

/// Percent reported while rendering: `min(99, round(t / total * 100))`.
///
/// A timeline without duration reports 0 until finalized.
pub fn export_progress_percent(time_secs: f64, total_duration_secs: f64) -> u8 {
    if total_duration_secs.is_nan() || total_duration_secs <= 0.0 || !time_secs.is_finite() {
        return 0;
    }
    (time_secs / total_duration_secs * 100.0).round().clamp(0.0, 99.0) as u8
}

/// Settings for one export run.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub container: ContainerFormat,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
    pub pacing: Pacing,
    /// Artifact file name; generated from the current time when unset.
    pub file_name: Option<String>,
    /// How long a tick may wait for a video frame.
    pub video_wait: Duration,
    /// How long to wait for assets before giving up.
    pub asset_timeout: Duration,
    cancel: Arc<AtomicBool>,
}

impl ExportOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        let pacing = config.playback.export_pacing;
        Self {
            container: config.output.format,
            video_bitrate_kbps: config.output.video_bitrate_kbps,
            audio_bitrate_kbps: config.output.audio_bitrate_kbps,
            pacing,
            file_name: None,
            video_wait: default_video_wait(pacing, config.output.fps),
            asset_timeout: ASSET_TIMEOUT,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_container(mut self, container: ContainerFormat) -> Self {
        self.container = container;
        self
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn with_asset_timeout(mut self, timeout: Duration) -> Self {
        self.asset_timeout = timeout;
        self
    }

    /// Shared flag; setting it cancels the run at the next tick. Set
    /// before capture starts, the run fails with `NeoncutError::Cancelled`.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

fn default_video_wait(pacing: Pacing, fps: u32) -> Duration {
    match pacing {
        Pacing::RealTime => Duration::from_secs_f64(0.5 / f64::from(fps.max(1))),
        Pacing::Unthrottled => Duration::from_secs(2),
    }
}

struct Reporter {
    callback: Option<ProgressCallback>,
    last_percent: u8,
}

impl Reporter {
    fn report(&mut self, stage: ExportStage, percent: u8, time_secs: f64, frames: u64) {
        // Never move backwards.
        self.last_percent = self.last_percent.max(percent);
        if let Some(cb) = &self.callback {
            cb(ExportProgress {
                percent: self.last_percent,
                time_secs,
                frames,
                stage,
            });
        }
    }
}

/// Export the session's project through `sink`.
///
/// The session must be idle. On success the returned artifact is
/// [`ArtifactStatus::Complete`]; a cancelled run returns whatever was
/// captured as [`ArtifactStatus::Partial`]. Any error mid-run aborts the
/// sink and discards its output.
///
/// Assets still loading after `options.asset_timeout` fail the run with a
/// render error before the sink is touched.
pub async fn export_project(
    session: &mut PlaybackSession,
    mut sink: Box<dyn CaptureSink>,
    options: ExportOptions,
    progress: Option<ProgressCallback>,
) -> NeoncutResult<ExportArtifact> {
    let mut reporter = Reporter {
        callback: progress,
        last_percent: 0,
    };
    reporter.report(ExportStage::Preparing, 0, 0.0, 0);

    if session.state() != SessionState::Idle {
        reporter.report(ExportStage::Failed, 0, session.time_secs(), 0);
        return Err(NeoncutError::invalid_state(format!(
            "cannot export while {:?}",
            session.state()
        )));
    }

    if let Err(e) = settle_assets(session, &options).await {
        let stage = match e {
            NeoncutError::Cancelled => ExportStage::Cancelled,
            _ => ExportStage::Failed,
        };
        tracing::warn!(error = %e, "Export stopped while preparing");
        reporter.report(stage, 0, session.time_secs(), 0);
        return Err(e);
    }

    let (width, height) = session.frame_size();
    let spec = CaptureSpec {
        width,
        height,
        fps: session.clock().tick_hz(),
        audio: session.mix_format(),
        container: options.container,
        video_bitrate_kbps: options.video_bitrate_kbps,
        audio_bitrate_kbps: options.audio_bitrate_kbps,
        file_name: options
            .file_name
            .clone()
            .unwrap_or_else(|| default_file_name(options.container)),
    };

    tracing::info!(
        sink = sink.name(),
        format = ?spec.container,
        total_secs = session.total_duration_secs(),
        pacing = ?options.pacing,
        "Starting export"
    );

    if let Err(e) = sink.begin(&spec) {
        tracing::error!(sink = sink.name(), error = %e, "Capture sink unavailable");
        reporter.report(ExportStage::Failed, 0, session.time_secs(), 0);
        return Err(e);
    }

    let previous = session.detach();
    session.set_video_wait(options.video_wait);
    let result = run_capture(session, sink, &options, &mut reporter).await;
    session.set_video_wait(Duration::ZERO);
    if let Some(previous) = previous {
        if let Err(e) = session.attach(previous) {
            tracing::warn!(error = %e, "Failed to restore session output");
        }
    }

    match &result {
        Ok(artifact) => tracing::info!(
            file = %artifact.file_name,
            frames = artifact.frames,
            bytes = artifact.bytes.len(),
            status = ?artifact.status,
            "Export finished"
        ),
        Err(e) => tracing::error!(error = %e, "Export failed"),
    }
    result
}

async fn settle_assets(session: &mut PlaybackSession, options: &ExportOptions) -> NeoncutResult<()> {
    let deadline = tokio::time::Instant::now() + options.asset_timeout;
    loop {
        session.poll_assets();
        let pending = session.pending_assets();
        if pending == 0 {
            return Ok(());
        }
        if options.is_cancelled() {
            return Err(NeoncutError::Cancelled);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(NeoncutError::render(format!(
                "timed out after {:?} waiting for {pending} assets",
                options.asset_timeout
            )));
        }
        tracing::trace!(pending, "Waiting for assets");
        tokio::time::sleep(ASSET_POLL).await;
    }
}

fn take_sink(session: &mut PlaybackSession) -> NeoncutResult<Box<dyn CaptureSink>> {
    match session.detach() {
        Some(SessionOutput::Capture(sink)) => Ok(sink),
        Some(other) => Err(NeoncutError::invalid_state(format!(
            "expected capture output, found {other:?}"
        ))),
        None => Err(NeoncutError::invalid_state("capture output was lost")),
    }
}

async fn run_capture(
    session: &mut PlaybackSession,
    sink: Box<dyn CaptureSink>,
    options: &ExportOptions,
    reporter: &mut Reporter,
) -> NeoncutResult<ExportArtifact> {
    let total = session.total_duration_secs();
    session.seek(0.0)?;
    session.attach(SessionOutput::Capture(sink))?;

    if let Err(e) = run_blocking(|| session.play()) {
        return Err(abort(session, reporter, e));
    }
    reporter.report(ExportStage::Rendering, 0, 0.0, session.frames_emitted());

    let mut pacer = FramePacer::new(options.pacing, session.clock().tick_hz());
    let mut last_time = 0.0;
    loop {
        if options.is_cancelled() {
            return finish_cancelled(session, reporter, last_time);
        }
        pacer.wait().await;
        if options.is_cancelled() {
            return finish_cancelled(session, reporter, last_time);
        }

        match run_blocking(|| session.tick()) {
            Ok(TickOutcome::Advanced { time_secs }) => {
                last_time = time_secs;
                reporter.report(
                    ExportStage::Rendering,
                    export_progress_percent(time_secs, total),
                    time_secs,
                    session.frames_emitted(),
                );
            }
            Ok(TickOutcome::Finished) | Ok(TickOutcome::Idle) => break,
            Err(e) => return Err(abort(session, reporter, e)),
        }
    }

    let frames = session.frames_emitted();
    reporter.report(ExportStage::Finalizing, 0, last_time, frames);
    let mut sink = take_sink(session)?;
    match run_blocking(|| sink.finish(ArtifactStatus::Complete)) {
        Ok(artifact) => {
            reporter.report(ExportStage::Complete, 100, last_time, artifact.frames);
            Ok(artifact)
        }
        Err(e) => {
            reporter.report(ExportStage::Failed, 0, last_time, frames);
            Err(e)
        }
    }
}

fn finish_cancelled(
    session: &mut PlaybackSession,
    reporter: &mut Reporter,
    last_time: f64,
) -> NeoncutResult<ExportArtifact> {
    let frames = session.frames_emitted();
    tracing::info!(frames, t = last_time, "Export cancelled");
    session.stop();
    let mut sink = take_sink(session)?;
    let result = run_blocking(|| sink.finish(ArtifactStatus::Partial));
    let stage = if result.is_ok() {
        ExportStage::Cancelled
    } else {
        ExportStage::Failed
    };
    reporter.report(stage, 0, last_time, frames);
    result
}

fn abort(session: &mut PlaybackSession, reporter: &mut Reporter, error: NeoncutError) -> NeoncutError {
    let frames = session.frames_emitted();
    let t = session.time_secs();
    session.stop();
    if let Some(SessionOutput::Capture(mut sink)) = session.detach() {
        sink.abort();
    }
    reporter.report(ExportStage::Failed, 0, t, frames);
    error
}
