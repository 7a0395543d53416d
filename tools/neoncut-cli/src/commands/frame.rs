//! Render a single still.

use std::path::PathBuf;
use std::time::Duration;

use neoncut_common::config::AppConfig;

use super::{load_snapshot, open_session};

pub fn run(path: PathBuf, at: f64, output: PathBuf, config: &AppConfig) -> anyhow::Result<()> {
    if !at.is_finite() || at < 0.0 {
        return Err(anyhow::anyhow!("--at must be a non-negative number of seconds"));
    }
    let project = load_snapshot(&path)?;
    project
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid snapshot: {e}"))?;

    let mut session = open_session(project, config)?;
    session.wait_for_assets();
    session.set_video_wait(Duration::from_secs(2));

    let image = session.render_still(at);
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    image.save(&output)?;

    let (width, height) = image.dimensions();
    println!(
        "Rendered t={at:.3}s ({width}x{height}) to {}",
        output.display()
    );
    Ok(())
}
