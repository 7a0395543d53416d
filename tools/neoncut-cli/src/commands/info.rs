//! Show timeline contents.

use std::path::PathBuf;

use super::load_snapshot;

pub fn run(path: PathBuf, json: bool) -> anyhow::Result<()> {
    let project = load_snapshot(&path)?;

    if json {
        let out = project
            .to_json()
            .map_err(|e| anyhow::anyhow!("Failed to serialize snapshot: {e}"))?;
        println!("{out}");
        return Ok(());
    }

    let timeline = &project.timeline;
    println!("Snapshot: {}", path.display());
    println!("  Total duration: {:.2}s", timeline.total_duration_secs());
    println!();

    println!("Visual timeline ({} items):", timeline.items.len());
    for segment in timeline.segments() {
        let item = &timeline.items[segment.index];
        println!(
            "  [{:>2}] {:<12} {:?} {:>7.2}s - {:>7.2}s  effect={:?} x{} filter={:?} transition={:?}",
            segment.index,
            item.id,
            item.kind,
            segment.start_secs,
            segment.end_secs,
            item.effect,
            item.intensity,
            item.filter,
            item.transition,
        );
    }
    println!();

    println!("Narration ({} tracks):", timeline.narration.len());
    for track in &timeline.narration {
        println!(
            "  {:<12} {:.2}s  volume={:.2}  {}",
            track.id, track.duration, track.volume, track.source
        );
    }
    println!("Music ({} tracks):", timeline.music.len());
    for track in &timeline.music {
        println!(
            "  {:<12} {:.2}s  volume={:.2}  {}",
            track.id, track.duration, track.volume, track.source
        );
    }
    println!();

    let watermark = &project.watermark;
    println!("Watermark:");
    match (&watermark.logo, watermark.enabled) {
        (Some(logo), true) => println!(
            "  {logo} at {:?}, size {}%, opacity {}%, margin {}%",
            watermark.position, watermark.size, watermark.opacity, watermark.margin
        ),
        (Some(_), false) => println!("  Disabled"),
        (None, _) => println!("  None"),
    }

    let narration = &project.narration_settings;
    println!(
        "Narration sync: {} (image duration {:.2}s)",
        if narration.auto_sync { "auto" } else { "manual" },
        narration.image_duration
    );

    Ok(())
}
