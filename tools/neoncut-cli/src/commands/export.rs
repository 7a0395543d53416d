//! Export a timeline snapshot to video.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use neoncut_common::config::{AppConfig, ContainerFormat, Pacing};
use neoncut_render_engine::{
    export_project, CaptureSink, ExportOptions, ExportProgress, ExportStage, FfmpegCaptureSink,
    MemoryCaptureSink,
};

use super::{load_snapshot, open_session};

pub async fn run(
    path: PathBuf,
    output: Option<PathBuf>,
    format: Option<String>,
    fast: bool,
    dry_run: bool,
    config: AppConfig,
) -> anyhow::Result<()> {
    println!("Exporting snapshot at: {}", path.display());

    let project = load_snapshot(&path)?;
    project
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid snapshot: {e}"))?;

    let container = match format.as_deref() {
        None => output
            .as_ref()
            .and_then(|p| p.extension())
            .and_then(|ext| ContainerFormat::parse(&ext.to_string_lossy()))
            .unwrap_or(config.output.format),
        Some(name) => ContainerFormat::parse(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown format: {name}. Use: webm, mp4"))?,
    };

    let mut options = ExportOptions::from_config(&config).with_container(container);
    if fast {
        options = options.with_pacing(Pacing::Unthrottled);
    }
    if let Some(name) = output
        .as_ref()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
    {
        options = options.with_file_name(name);
    }

    let total = project.timeline.total_duration_secs();
    println!("  Format: {container:?}");
    println!(
        "  Resolution: {}x{} @ {}fps",
        config.output.width, config.output.height, config.output.fps
    );
    println!("  Duration: {total:.2}s (+{:.1}s end card)", config.playback.end_grace_secs);
    if !fast && !dry_run {
        println!("  Real-time export; use --fast to render ahead.");
    }

    let sink: Box<dyn CaptureSink> = if dry_run {
        Box::new(MemoryCaptureSink::new())
    } else {
        Box::new(FfmpegCaptureSink::new())
    };

    let cancel = options.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, finishing partial export");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let progress_cb: Box<dyn Fn(ExportProgress) + Send> = Box::new(|p| {
        if p.stage == ExportStage::Rendering || p.stage == ExportStage::Complete {
            print!(
                "\r  Progress: {:>3}% (t={:.2}s, {} frames)  ",
                p.percent, p.time_secs, p.frames
            );
            let _ = std::io::stdout().flush();
        }
    });

    let mut session = open_session(project, &config)?;
    let artifact = match export_project(&mut session, sink, options, Some(progress_cb)).await {
        Ok(artifact) => artifact,
        Err(e) => {
            println!();
            return Err(anyhow::anyhow!("Export failed: {e}"));
        }
    };
    println!();

    if dry_run {
        println!(
            "Dry run complete: {} frames, {:.2}s, {:?}",
            artifact.frames, artifact.duration_secs, artifact.status
        );
        return Ok(());
    }

    let output_path = output.unwrap_or_else(|| PathBuf::from(&artifact.file_name));
    artifact.write_to(&output_path)?;
    if artifact.is_complete() {
        println!("Export complete: {}", output_path.display());
    } else {
        println!("Export cancelled; partial output: {}", output_path.display());
    }
    println!(
        "  {} frames, {:.2}s, {} bytes ({})",
        artifact.frames,
        artifact.duration_secs,
        artifact.bytes.len(),
        artifact.mime_type()
    );

    Ok(())
}
