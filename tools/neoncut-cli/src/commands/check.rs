//! Check for external tools.

use neoncut_common::config::AppConfig;
use neoncut_common::process::command_exists;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("NeonCut System Check");
    println!("{}", "=".repeat(50));

    let ffmpeg = command_exists("ffmpeg");
    let ffprobe = command_exists("ffprobe");
    report("ffmpeg", ffmpeg, "required for export, video, and non-WAV audio");
    report("ffprobe", ffprobe, "optional");

    println!();
    let output = &config.output;
    println!("Output:");
    println!(
        "  {}x{} @ {}fps, {} Hz x{} audio",
        output.width, output.height, output.fps, output.sample_rate, output.channels
    );
    println!(
        "  Format: {:?} (video {}k, audio {}k)",
        output.format, output.video_bitrate_kbps, output.audio_bitrate_kbps
    );
    println!(
        "  Export pacing: {:?}, narration: {:?}",
        config.playback.export_pacing, config.playback.narration_placement
    );

    println!();
    if ffmpeg {
        println!("All required tools are available. NeonCut is ready.");
    } else {
        println!("ffmpeg is missing; stills and --dry-run exports still work.");
    }
    Ok(())
}

fn report(name: &str, available: bool, note: &str) {
    let tag = if available { "[OK]  " } else { "[WARN]" };
    let state = if available { "found" } else { "not found" };
    println!("{tag} {name}: {state} ({note})");
}
