use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use flashlog::{EventKind, FlashLogConfig};

#[derive(Parser)]
#[command(name = "flog", about = "Inspect and edit a flash event log image")]
pub struct Cli {
    /// Flash image file, created erased if missing
    #[arg(long)]
    pub image: PathBuf,
    /// JSON file with the log geometry (default: 2 KiB region)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    pub log_level: String,
    /// Set the timestamp base before the command runs
    #[arg(long)]
    pub stamp: Option<u32>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Erase the whole log
    Erase,
    /// Print entries newer than a timestamp
    Dump {
        /// Print only entries after this timestamp
        #[arg(long, default_value_t = 0)]
        after: u32,
    },
    /// Append an event
    Inject {
        /// Event type: a number or a reserved kind name such as "nvmem"
        #[arg(value_parser = parse_event_type)]
        event_type: u8,
        /// Payload (hex-encoded, up to 63 bytes)
        payload: Option<String>,
    },
    /// Print the current timestamp
    Stamp,
    /// Show cursor, counters and what recovery did
    Stats,
}

fn parse_event_type(s: &str) -> Result<u8, String> {
    if let Some(hex) = s.strip_prefix("0x") {
        return u8::from_str_radix(hex, 16).map_err(|e| e.to_string());
    }
    if let Ok(value) = s.parse::<u8>() {
        return Ok(value);
    }
    s.parse::<EventKind>().map(u8::from)
}

/// Read the geometry from `path`, or fall back to the defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<FlashLogConfig> {
    let Some(path) = path else {
        return Ok(FlashLogConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: FlashLogConfig = serde_json::from_str(&text)
        .with_context(|| format!("parsing config {}", path.display()))?;
    config.validate()?;
    Ok(config)
}
