//! Interactive preview driver.
//!
//! A [`PreviewPlayer`] owns a [`PlaybackSession`] on a tokio task and runs
//! the session tick at the configured pace while playing. Frames go out on
//! a `watch` channel, mixed audio on an mpsc channel consumed by whatever
//! plays it. Controls arrive as [`PreviewCommand`]s through a
//! [`PreviewHandle`].

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use neoncut_audio_mix::AudioChunk;
use neoncut_common::clock::{FramePacer, TickOutcome};
use neoncut_common::config::Pacing;
use neoncut_common::error::{NeoncutError, NeoncutResult};
use neoncut_project_model::ProjectState;

use crate::session::{run_blocking, PlaybackSession, SessionOutput, SessionState};
use crate::sink::{ChannelAudioSink, VideoFrame, WatchFrameSink};

/// Control messages for a running preview.
#[derive(Debug)]
pub enum PreviewCommand {
    /// Start from the current position (from zero when at the end).
    Play,
    /// Stop and keep the position.
    Pause,
    /// Stop and rewind to zero.
    Stop,
    Seek(f64),
    /// Swap the project snapshot.
    Update(Box<ProjectState>),
    Shutdown,
}

/// Latest preview state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviewStatus {
    pub state: SessionState,
    pub time_secs: f64,
    pub total_duration_secs: f64,
}

/// Drives a session for interactive preview.
pub struct PreviewPlayer {
    session: PlaybackSession,
    commands: mpsc::UnboundedReceiver<PreviewCommand>,
    frames: Arc<watch::Sender<Option<VideoFrame>>>,
    status: watch::Sender<PreviewStatus>,
    pacer: FramePacer,
    still_index: u64,
}

/// Client side of a spawned [`PreviewPlayer`].
pub struct PreviewHandle {
    commands: mpsc::UnboundedSender<PreviewCommand>,
    frames: watch::Receiver<Option<VideoFrame>>,
    status: watch::Receiver<PreviewStatus>,
    task: JoinHandle<PlaybackSession>,
}

impl PreviewPlayer {
    /// Attach preview outputs to `session` and run it on a new task.
    ///
    /// Mixed audio is sent to `audio`; the session must be idle.
    pub fn spawn(
        mut session: PlaybackSession,
        audio: mpsc::UnboundedSender<AudioChunk>,
        pacing: Pacing,
    ) -> NeoncutResult<PreviewHandle> {
        let (frame_tx, frame_rx) = watch::channel(None);
        let frame_tx = Arc::new(frame_tx);
        session.attach(SessionOutput::Preview {
            frames: Box::new(WatchFrameSink::new(Arc::clone(&frame_tx))),
            audio: Box::new(ChannelAudioSink::new(audio)),
        })?;

        let (status_tx, status_rx) = watch::channel(status_of(&session));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let tick_hz = session.clock().tick_hz();

        let mut player = PreviewPlayer {
            session,
            commands: command_rx,
            frames: frame_tx,
            status: status_tx,
            pacer: FramePacer::new(pacing, tick_hz),
            still_index: 0,
        };
        player.publish_still();

        let task = tokio::spawn(player.run());
        Ok(PreviewHandle {
            commands: command_tx,
            frames: frame_rx,
            status: status_rx,
            task,
        })
    }

    async fn run(mut self) -> PlaybackSession {
        tracing::debug!("Preview started");
        loop {
            let playing = self.session.state() == SessionState::Playing;
            tokio::select! {
                command = self.commands.recv() => match command {
                    None | Some(PreviewCommand::Shutdown) => break,
                    Some(command) => run_blocking(|| self.handle(command)),
                },
                _ = self.pacer.wait(), if playing => run_blocking(|| self.tick()),
            }
            self.publish_status();
        }
        self.session.detach();
        tracing::debug!("Preview stopped");
        self.session
    }

    fn handle(&mut self, command: PreviewCommand) {
        tracing::debug!(?command, "Preview command");
        match command {
            PreviewCommand::Play => {
                if self.session.state() == SessionState::Playing {
                    return;
                }
                self.pacer.reset();
                if let Err(e) = self.session.play() {
                    tracing::warn!(error = %e, "Preview play failed");
                }
            }
            PreviewCommand::Pause => {
                self.session.pause();
                self.publish_still();
            }
            PreviewCommand::Stop => {
                self.session.stop();
                self.publish_still();
            }
            PreviewCommand::Seek(t) => {
                if let Err(e) = self.session.seek(t) {
                    tracing::warn!(t, error = %e, "Preview seek failed");
                }
                if self.session.state() == SessionState::Idle {
                    self.publish_still();
                }
            }
            PreviewCommand::Update(project) => {
                if let Err(e) = self.session.update_project(*project) {
                    tracing::warn!(error = %e, "Preview update rejected");
                }
                if self.session.state() == SessionState::Idle {
                    self.publish_still();
                }
            }
            PreviewCommand::Shutdown => {}
        }
    }

    fn tick(&mut self) {
        match self.session.tick() {
            Ok(TickOutcome::Finished) => self.publish_still(),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Preview tick failed; pausing");
                self.session.pause();
            }
        }
    }

    fn publish_still(&mut self) {
        let t = self.session.time_secs();
        let image = self.session.render_still(t);
        self.frames.send_replace(Some(VideoFrame {
            index: self.still_index,
            time_secs: t,
            image: Arc::new(image),
        }));
        self.still_index += 1;
    }

    fn publish_status(&self) {
        self.status.send_replace(status_of(&self.session));
    }
}

fn status_of(session: &PlaybackSession) -> PreviewStatus {
    PreviewStatus {
        state: session.state(),
        time_secs: session.time_secs(),
        total_duration_secs: session.total_duration_secs(),
    }
}

impl PreviewHandle {
    fn send(&self, command: PreviewCommand) -> NeoncutResult<()> {
        self.commands
            .send(command)
            .map_err(|_| NeoncutError::invalid_state("preview player has stopped"))
    }

    pub fn play(&self) -> NeoncutResult<()> {
        self.send(PreviewCommand::Play)
    }

    pub fn pause(&self) -> NeoncutResult<()> {
        self.send(PreviewCommand::Pause)
    }

    pub fn stop(&self) -> NeoncutResult<()> {
        self.send(PreviewCommand::Stop)
    }

    pub fn seek(&self, t: f64) -> NeoncutResult<()> {
        self.send(PreviewCommand::Seek(t))
    }

    pub fn update(&self, project: ProjectState) -> NeoncutResult<()> {
        self.send(PreviewCommand::Update(Box::new(project)))
    }

    /// Receiver for displayed frames.
    pub fn frames(&self) -> watch::Receiver<Option<VideoFrame>> {
        self.frames.clone()
    }

    /// Receiver for status updates.
    pub fn status_updates(&self) -> watch::Receiver<PreviewStatus> {
        self.status.clone()
    }

    pub fn status(&self) -> PreviewStatus {
        *self.status.borrow()
    }

    /// Stop the player and take the session back, with its output detached.
    pub async fn shutdown(self) -> NeoncutResult<PlaybackSession> {
        // A closed channel means the task already ended.
        let _ = self.commands.send(PreviewCommand::Shutdown);
        self.task
            .await
            .map_err(|e| NeoncutError::render(format!("preview task failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MemoryMediaLoader;
    use neoncut_audio_mix::MemoryAudioDecoder;
    use neoncut_common::config::{AppConfig, OutputConfig};
    use neoncut_project_model::{MediaItem, Timeline};
    use std::time::Duration;

    fn session(duration: f64) -> PlaybackSession {
        let mut timeline = Timeline::new();
        timeline.push_item(MediaItem::image("a", "a.png", duration));
        let config = AppConfig {
            output: OutputConfig {
                width: 16,
                height: 9,
                sample_rate: 3000,
                ..OutputConfig::default()
            },
            ..AppConfig::default()
        };
        PlaybackSession::new(
            ProjectState::new(timeline),
            &config,
            Arc::new(MemoryMediaLoader::new()),
            Arc::new(MemoryAudioDecoder::new()),
        )
        .unwrap()
    }

    async fn wait_status(
        handle: &PreviewHandle,
        predicate: impl FnMut(&PreviewStatus) -> bool,
    ) -> PreviewStatus {
        let mut updates = handle.status_updates();
        let status = tokio::time::timeout(Duration::from_secs(10), updates.wait_for(predicate))
            .await
            .expect("timed out waiting for preview status")
            .expect("preview player dropped");
        *status
    }

    #[tokio::test]
    async fn test_publishes_still_on_spawn() {
        let (audio_tx, _audio_rx) = mpsc::unbounded_channel();
        let handle = PreviewPlayer::spawn(session(1.0), audio_tx, Pacing::Unthrottled).unwrap();
        let frame = handle.frames().borrow().clone().unwrap();
        assert_eq!(frame.time_secs, 0.0);
        assert_eq!(frame.image.dimensions(), (16, 9));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_play_runs_to_end_and_rewinds() {
        let (audio_tx, mut audio_rx) = mpsc::unbounded_channel();
        let handle = PreviewPlayer::spawn(session(1.0), audio_tx, Pacing::Unthrottled).unwrap();
        handle.play().unwrap();

        // Frame at t = 0 plus one per tick until t reaches 2.0.
        for _ in 0..60 {
            tokio::time::timeout(Duration::from_secs(10), audio_rx.recv())
                .await
                .expect("timed out waiting for audio")
                .expect("audio channel closed");
        }
        let done = wait_status(&handle, |s| s.state == SessionState::Idle && s.time_secs == 0.0).await;
        assert_eq!(done.total_duration_secs, 1.0);

        let session = handle.shutdown().await.unwrap();
        assert!(!session.has_output());
        assert!(audio_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_seek_while_idle_publishes_still() {
        let (audio_tx, _audio_rx) = mpsc::unbounded_channel();
        let handle = PreviewPlayer::spawn(session(3.0), audio_tx, Pacing::Unthrottled).unwrap();
        let mut frames = handle.frames();
        handle.seek(1.5).unwrap();
        tokio::time::timeout(
            Duration::from_secs(10),
            frames.wait_for(|f| f.as_ref().is_some_and(|f| f.time_secs == 1.5)),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(handle.status().state, SessionState::Idle);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_commands_fail_after_shutdown() {
        let (audio_tx, _audio_rx) = mpsc::unbounded_channel();
        let handle = PreviewPlayer::spawn(session(1.0), audio_tx, Pacing::Unthrottled).unwrap();
        let commands = handle.commands.clone();
        handle.shutdown().await.unwrap();
        assert!(commands.send(PreviewCommand::Play).is_err());
    }
}
