//! Info command - show capture and display capabilities

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use vcap_core::capture::{CaptureInfo, V4l2Capture};
use vcap_core::config::{DEFAULT_CARD, DEFAULT_DEVICE};
use vcap_core::display::{self, DrmCard, Inventory};

/// Arguments for the info command
#[derive(Args)]
pub struct InfoArgs {
    /// DRM card path or driver name
    #[arg(long, default_value = DEFAULT_CARD)]
    card: String,

    /// Video device node
    #[arg(short, long, default_value = DEFAULT_DEVICE)]
    device: PathBuf,

    /// Print machine-readable JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Report {
    capture: Section<CaptureInfo>,
    display: Section<DisplayReport>,
}

#[derive(Serialize)]
struct DisplayReport {
    path: String,
    driver: String,
    #[serde(flatten)]
    inventory: Inventory,
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum Section<T> {
    Ok(T),
    Error(String),
}

fn probe_capture(path: &PathBuf) -> Section<CaptureInfo> {
    match V4l2Capture::open(path).and_then(|c| c.info()) {
        Ok(info) => Section::Ok(info),
        Err(e) => Section::Error(e.to_string()),
    }
}

fn probe_display(card: &str) -> Section<DisplayReport> {
    let result = DrmCard::open(card).and_then(|card| {
        let inventory = display::inventory(&card)?;
        Ok(DisplayReport {
            path: card.path().display().to_string(),
            driver: card.driver().to_string(),
            inventory,
        })
    });
    match result {
        Ok(report) => Section::Ok(report),
        Err(e) => Section::Error(e.to_string()),
    }
}

/// Show capture device and display information
pub async fn info(args: InfoArgs) -> Result<()> {
    let report = Report {
        capture: probe_capture(&args.device),
        display: probe_display(&args.card),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("vcap - Device Information\n");

    println!("Capture Device ({}):", args.device.display());
    match &report.capture {
        Section::Ok(caps) => {
            println!("  Driver:     {}", caps.driver);
            println!("  Card:       {}", caps.card);
            println!("  Bus:        {}", caps.bus);
            println!("  Capture:    {}", if caps.video_capture { "yes" } else { "no" });
            println!("  Streaming:  {}", if caps.streaming { "yes" } else { "no" });
        }
        Section::Error(e) => println!("  [!!] {}", e),
    }

    println!();

    println!("Display Device ({}):", args.card);
    match &report.display {
        Section::Ok(display) => {
            println!("  Node:       {}", display.path);
            println!("  Driver:     {}", display.driver);
            println!("  CRTCs:      {:?}", display.inventory.crtcs);

            println!();
            println!("  Connectors:");
            for connector in &display.inventory.connectors {
                println!("    {} ({} modes)", connector.id, connector.modes.len());
                for mode in &connector.modes {
                    println!(
                        "      {:<12} {}x{} @ {} Hz",
                        mode.name, mode.hdisplay, mode.vdisplay, mode.vrefresh
                    );
                }
            }

            println!();
            println!("  Planes:");
            for plane in &display.inventory.planes {
                let attached = plane
                    .crtc
                    .map_or_else(|| "free".to_string(), |c| format!("on CRTC {}", c));
                println!(
                    "    {:<4} {:<8} {:<12} crtcs=0b{:b}  {}",
                    plane.id,
                    plane.role,
                    attached,
                    plane.possible_crtcs,
                    plane.formats.join(" ")
                );
            }
        }
        Section::Error(e) => println!("  [!!] {}", e),
    }

    Ok(())
}
