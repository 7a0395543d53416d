//! NeonCut CLI: inspect, render, and export timeline snapshots.
//!
//! Usage:
//!   neoncut info <SNAPSHOT>                Show timeline contents
//!   neoncut validate <SNAPSHOT>            Check a snapshot against the model rules
//!   neoncut frame <SNAPSHOT> --at <SECS>   Render a single still
//!   neoncut export <SNAPSHOT>              Export the timeline to video
//!   neoncut check                          Check for external tools

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "neoncut",
    about = "Timeline compositing and synchronized export",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show timeline contents
    Info {
        /// Path to the timeline snapshot (JSON)
        path: PathBuf,

        /// Print the normalized snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a snapshot against the model rules
    Validate {
        /// Path to the timeline snapshot (JSON)
        path: PathBuf,
    },

    /// Render the frame at one clock position to an image
    Frame {
        /// Path to the timeline snapshot (JSON)
        path: PathBuf,

        /// Clock position in seconds
        #[arg(long, default_value = "0")]
        at: f64,

        /// Output image path
        #[arg(short, long, default_value = "frame.png")]
        output: PathBuf,
    },

    /// Export the timeline to video
    Export {
        /// Path to the timeline snapshot (JSON)
        path: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Container format: webm|mp4
        #[arg(long)]
        format: Option<String>,

        /// Render as fast as possible instead of in real time
        #[arg(long)]
        fast: bool,

        /// Run the pipeline into an in-memory sink and write nothing
        #[arg(long)]
        dry_run: bool,
    },

    /// Check for external tools
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = neoncut_common::config::AppConfig::load()
        .map_err(|e| anyhow::anyhow!("Failed to load config: {e}"))?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    neoncut_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Info { path, json } => commands::info::run(path, json),
        Commands::Validate { path } => commands::validate::run(path),
        Commands::Frame { path, at, output } => commands::frame::run(path, at, output, &config),
        Commands::Export {
            path,
            output,
            format,
            fast,
            dry_run,
        } => commands::export::run(path, output, format, fast, dry_run, config).await,
        Commands::Check => commands::check::run(&config),
    }
}
