//! Capture command - stream frames to stdout or a display plane

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio::signal;
use tracing::{info, warn};
use vcap_core::capture::{CapturePool, V4l2Capture, V4l2Driver};
use vcap_core::config::{CaptureConfig, ConfigFile, OutputMode, Resolution};
use vcap_core::display::{DisplayRequest, DrmCard};
use vcap_core::formats;
use vcap_core::pipeline::{
    ByteSink, FrameCount, FrameSink, IndexMapping, Pipeline, PipelineStats, SurfaceSink,
};

/// Arguments for the capture command
#[derive(Args)]
pub struct CaptureArgs {
    /// Video device node
    #[arg(short, long)]
    device: Option<PathBuf>,

    /// Write frames to stdout
    #[arg(short, long)]
    output: bool,

    /// Show frames on the display (takes precedence over --output)
    #[arg(short = 'v', long)]
    video: bool,

    /// Number of frames to grab (0 is continuous)
    #[arg(short, long)]
    count: Option<u64>,

    /// Resolution as WIDTHxHEIGHT
    #[arg(short, long)]
    resolution: Option<Resolution>,

    /// Frame rate
    #[arg(short, long)]
    framerate: Option<u32>,

    /// DRM card path or driver name
    #[arg(long)]
    card: Option<String>,

    /// Pixel format (YUYV, UYVY, RGB565, RGB888, XRGB8888, ARGB8888)
    #[arg(long)]
    format: Option<String>,

    /// Scanout row pitch in bytes (0 = derive from width)
    #[arg(long)]
    stride: Option<u32>,

    /// Capture buffers to request
    #[arg(long)]
    buffers: Option<u32>,

    /// Config file to read instead of the default
    #[arg(long)]
    config: Option<PathBuf>,
}

impl CaptureArgs {
    /// Merge command-line flags over the config file
    fn resolve(&self) -> Result<CaptureConfig> {
        let file = match &self.config {
            Some(path) => ConfigFile::load_from(path.clone())?,
            None => ConfigFile::load_or_default(),
        };
        let mut config = file.to_capture_config()?;

        if let Some(device) = &self.device {
            config.device = device.clone();
        }
        if self.video {
            config.output = OutputMode::Display;
        } else if self.output {
            config.output = OutputMode::Stdout;
        }
        if let Some(count) = self.count {
            config.frame_count = count;
        }
        if let Some(resolution) = self.resolution {
            config.resolution = resolution;
        }
        if let Some(fps) = self.framerate {
            config.frame_rate = fps;
        }
        if let Some(card) = &self.card {
            config.card = card.clone();
        }
        if let Some(format) = &self.format {
            config.format = formats::parse_fourcc(format)
                .ok_or_else(|| anyhow::anyhow!("Unknown pixel format '{}'", format))?;
        }
        if let Some(stride) = self.stride {
            config.stride = stride;
        }
        if let Some(buffers) = self.buffers {
            config.capture_buffers = buffers;
            config.min_buffers = config.min_buffers.min(buffers);
        }

        config.validate_strict().map_err(|e| anyhow::anyhow!(e))?;
        Ok(config)
    }
}

/// Run a capture session
pub async fn capture(args: CaptureArgs) -> Result<()> {
    let config = args.resolve()?;

    // stdout may carry frames, so everything human-readable goes to stderr.
    eprintln!("vcap - Starting Capture\n");
    eprintln!("Configuration:");
    eprintln!("  Device:      {}", config.device.display());
    eprintln!("  Output:      {}", config.output);
    eprintln!("  Resolution:  {}", config.resolution);
    eprintln!("  Framerate:   {} fps", config.frame_rate);
    eprintln!("  Format:      {}", formats::format_name(config.format));
    if config.frame_count == 0 {
        eprintln!("  Frames:      continuous");
    } else {
        eprintln!("  Frames:      {}", config.frame_count);
    }
    if config.output == OutputMode::Display {
        eprintln!("  Card:        {}", config.card);
        match config.effective_stride() {
            Some(stride) => eprintln!("  Stride:      {} bytes", stride),
            None => eprintln!("  Stride:      overflow"),
        }
    }
    eprintln!();

    for warning in config.validate() {
        warn!("{}", warning);
    }

    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    let mut session = tokio::task::spawn_blocking(move || run_session(&config, flag));

    let stats = tokio::select! {
        result = &mut session => result.context("Capture task panicked")??,
        interrupted = signal::ctrl_c() => {
            if let Err(e) = interrupted {
                warn!("Failed to listen for Ctrl+C: {}", e);
            }
            eprintln!("\nReceived interrupt signal...");
            stop.store(true, Ordering::Relaxed);
            session.await.context("Capture task panicked")??
        }
    };

    eprintln!();
    eprintln!("Capture finished: {}", stats);
    Ok(())
}

fn run_session(config: &CaptureConfig, stop: Arc<AtomicBool>) -> Result<PipelineStats> {
    let layout = config.layout()?;
    let capture = V4l2Capture::open(&config.device)?;
    capture
        .configure(
            config.resolution.width,
            config.resolution.height,
            formats::capture_fourcc(config.format),
            config.frame_rate,
        )?
        .ensure_unpadded(layout.bytes_per_pixel())?;

    let mut pool = CapturePool::initialize(
        capture.driver(),
        config.capture_buffers,
        config.min_buffers,
    )?;
    pool.map_all()?;

    match config.output {
        OutputMode::Display => {
            let card = DrmCard::open(&config.card)?;
            let request = DisplayRequest {
                layout,
                format: config.format,
                buffers: config.scanout_buffers.unwrap_or(pool.count()),
                hide_primary: config.hide_primary,
            };
            let sink = SurfaceSink::negotiate(card, &request, IndexMapping::Identity, pool.count())
                .with_context(|| format!("Display negotiation on '{}' failed", config.card))?;

            let (stats, sink) = stream(&capture, pool, sink, config, stop)?;
            sink.into_display().restore()?;
            Ok(stats)
        }
        OutputMode::Stdout => {
            let sink = ByteSink::new(io::stdout().lock());
            let (stats, _) = stream(&capture, pool, sink, config, stop)?;
            Ok(stats)
        }
        OutputMode::Discard => {
            let (stats, _) = stream(&capture, pool, ByteSink::discard(), config, stop)?;
            Ok(stats)
        }
    }
}

fn stream<S: FrameSink>(
    capture: &V4l2Capture,
    mut pool: CapturePool<V4l2Driver>,
    sink: S,
    config: &CaptureConfig,
    stop: Arc<AtomicBool>,
) -> Result<(PipelineStats, S)> {
    pool.enqueue_all()?;
    capture.stream_on()?;

    let mut pipeline = Pipeline::new(pool, sink)
        .with_ready_timeout(config.ready_timeout)
        .with_stop_flag(stop);
    let result = pipeline.run(FrameCount::from(config.frame_count));

    let stopped = capture.stream_off();
    let stats = result?;
    stopped?;
    info!("Capture session complete");

    let (_, sink) = pipeline.into_parts();
    Ok((stats, sink))
}
