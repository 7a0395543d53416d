//! Validate a timeline snapshot.

use std::path::PathBuf;

use super::load_snapshot;

pub fn run(path: PathBuf) -> anyhow::Result<()> {
    println!("Validating snapshot at: {}", path.display());

    let project = load_snapshot(&path)?;
    let timeline = &project.timeline;
    println!("  Items: {}", timeline.items.len());
    println!(
        "  Audio: {} narration, {} music",
        timeline.narration.len(),
        timeline.music.len()
    );
    println!("  Duration: {:.2}s", timeline.total_duration_secs());

    let issues = project.issues();
    if issues.is_empty() {
        println!("\nSnapshot is valid.");
        return Ok(());
    }

    println!("\nValidation issues:");
    for issue in &issues {
        println!("  - {issue}");
    }
    Err(anyhow::anyhow!("{} issue(s) found", issues.len()))
}
