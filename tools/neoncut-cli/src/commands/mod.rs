pub mod check;
pub mod export;
pub mod frame;
pub mod info;
pub mod validate;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use neoncut_audio_mix::{FfmpegAudioDecoder, MixFormat};
use neoncut_common::config::AppConfig;
use neoncut_project_model::ProjectState;
use neoncut_render_engine::{FsMediaLoader, PlaybackSession};

/// Load a snapshot and resolve its relative sources against the
/// snapshot's directory.
pub fn load_snapshot(path: &Path) -> anyhow::Result<ProjectState> {
    let mut project = ProjectState::load_snapshot(path)
        .map_err(|e| anyhow::anyhow!("Failed to load snapshot: {e}"))?;
    if let Some(base) = path.parent() {
        resolve_sources(&mut project, base);
    }
    Ok(project)
}

fn resolve(source: &mut String, base: &Path) {
    if source.is_empty() || source.contains("://") || Path::new(source.as_str()).is_absolute() {
        return;
    }
    let resolved: PathBuf = base.join(source.as_str());
    *source = resolved.display().to_string();
}

/// Rewrite relative media, audio, and logo paths to sit under `base`.
pub fn resolve_sources(project: &mut ProjectState, base: &Path) {
    let timeline = &mut project.timeline;
    for item in &mut timeline.items {
        resolve(&mut item.source, base);
    }
    for track in timeline.narration.iter_mut().chain(timeline.music.iter_mut()) {
        resolve(&mut track.source, base);
    }
    if let Some(logo) = project.watermark.logo.as_mut() {
        resolve(logo, base);
    }
}

/// Session backed by the filesystem and ffmpeg.
pub fn open_session(project: ProjectState, config: &AppConfig) -> anyhow::Result<PlaybackSession> {
    let format = MixFormat::new(config.output.sample_rate, config.output.channels);
    PlaybackSession::new(
        project,
        config,
        Arc::new(FsMediaLoader::new()),
        Arc::new(FfmpegAudioDecoder::new(format)),
    )
    .map_err(|e| anyhow::anyhow!("Failed to open session: {e}"))
}
