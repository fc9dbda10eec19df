//! vcap CLI
//!
//! Capture V4L2 frames and dump them to stdout or show them on a DRM plane.
//!
//! # Usage
//!
//! ```bash
//! # Grab 120 frames and discard them
//! vcap capture
//!
//! # Pipe raw frames somewhere else
//! vcap capture -o -c 0 | ffplay -f rawvideo -pixel_format yuyv422 -video_size 640x480 -
//!
//! # Show the capture on the monitor until Ctrl+C
//! vcap -v capture -v -c 0
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// vcap - V4L2 capture to stdout or a DRM plane
#[derive(Parser)]
#[command(name = "vcap")]
#[command(version)]
#[command(about = "V4L2 capture to stdout or a DRM display plane", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture frames
    #[command(alias = "cap")]
    Capture(commands::CaptureArgs),

    /// Show capture device and display information
    Info(commands::InfoArgs),

    /// Manage the configuration file
    Config(commands::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let level = match cli.verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    // Logs go to stderr; stdout may carry frames.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Capture(args) => commands::capture(args).await?,
        Commands::Info(args) => commands::info(args).await?,
        Commands::Config(args) => commands::config(args).await?,
    }

    Ok(())
}
