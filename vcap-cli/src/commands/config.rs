//! Config command - manage configuration files

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use vcap_core::config::{sample_config, ConfigFile};
use vcap_core::formats;

/// Arguments for the config command
#[derive(Args)]
pub struct ConfigArgs {
    /// Config file to operate on instead of the default
    #[arg(long, global = true)]
    file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the path to the config file
    Path,

    /// Show the config file and the settings it resolves to
    Show,

    /// Generate a default config file
    Init {
        /// Force overwrite if file exists
        #[arg(short, long)]
        force: bool,
    },

    /// Print a sample configuration to stdout
    Sample,
}

/// Run config subcommand
pub async fn config(args: ConfigArgs) -> Result<()> {
    let path = args.file.unwrap_or_else(ConfigFile::default_path);

    match args.command {
        ConfigCommand::Path => {
            println!("{}", path.display());
            if path.exists() {
                println!("(file exists)");
            } else {
                println!("(file does not exist)");
            }
        }
        ConfigCommand::Show => {
            if path.exists() {
                let content =
                    std::fs::read_to_string(&path).context("Failed to read config file")?;
                println!("Configuration file: {}\n", path.display());
                println!("{}", content);
            } else {
                println!("No configuration file found at: {}", path.display());
                println!("Create one with:");
                println!("  vcap config init");
                println!();
            }

            let settings = ConfigFile::load_from(path)?
                .to_capture_config()
                .context("Config file does not describe a usable session")?;

            println!("Effective settings:");
            println!("  Device:      {}", settings.device.display());
            println!("  Card:        {}", settings.card);
            println!("  Output:      {}", settings.output);
            println!("  Resolution:  {}", settings.resolution);
            println!("  Framerate:   {} fps", settings.frame_rate);
            println!("  Format:      {}", formats::format_name(settings.format));
            println!(
                "  Buffers:     {} requested, {} minimum",
                settings.capture_buffers, settings.min_buffers
            );
            match settings.effective_stride() {
                Some(stride) => println!("  Stride:      {} bytes", stride),
                None => println!("  Stride:      overflow"),
            }
            println!("  Timeout:     {:?}", settings.ready_timeout);

            if let Err(e) = settings.validate_strict() {
                println!();
                println!("[!!] {}", e);
            }
            for warning in settings.validate() {
                println!("[!]  {}", warning);
            }
        }
        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                println!("Configuration file already exists: {}", path.display());
                println!();
                println!("Use --force to overwrite, or edit the existing file.");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                if !parent.exists() {
                    std::fs::create_dir_all(parent).context("Failed to create config directory")?;
                }
            }

            std::fs::write(&path, sample_config()).context("Failed to write config file")?;

            println!("Created configuration file: {}", path.display());
            println!();
            println!("Edit this file to change the default device, resolution and output.");
        }
        ConfigCommand::Sample => {
            print!("{}", sample_config());
        }
    }

    Ok(())
}
