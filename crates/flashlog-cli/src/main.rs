mod config;
mod image;

use std::io::Write;
use std::thread;
use std::time::Duration;

use anyhow::bail;
use clap::Parser;
use flashlog::codec::{EntryHeader, HEADER_SIZE, MAX_ENTRY_SIZE};
use flashlog::{EventKind, FlashDriver, FlashLog, MAX_PAYLOAD_SIZE};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{Cli, Command};
use crate::image::FileFlash;

/// Attempts per entry before a dump gives up
const DUMP_RETRIES: usize = 3;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    run(cli, &mut std::io::stdout().lock())
}

/// Open the image, apply `--stamp`, then run the subcommand.
fn run(cli: Cli, out: &mut impl Write) -> anyhow::Result<()> {
    let config = config::load_config(cli.config.as_deref())?;
    let flash = FileFlash::open(&cli.image, config.capacity, config.write_granularity)?;
    let log = FlashLog::init(flash, config)?;

    if let Some(value) = cli.stamp {
        log.set_timestamp_base(value)?;
        info!(value, "Timestamp base set");
    }

    match cli.command {
        Command::Erase => {
            log.erase()?;
            writeln!(out, "log erased")?;
        }
        Command::Dump { after } => {
            if let Err(code) = dump(&log, after, out)? {
                bail!("dump failed: error {code}");
            }
        }
        Command::Inject {
            event_type,
            payload,
        } => {
            let payload = match payload {
                Some(text) => hex::decode(text)?,
                None => Vec::new(),
            };
            if payload.len() > MAX_PAYLOAD_SIZE {
                bail!(
                    "payload is {} bytes, at most {} fit in an entry",
                    payload.len(),
                    MAX_PAYLOAD_SIZE
                );
            }
            log.add_event(event_type, &payload)?;
        }
        Command::Stamp => writeln!(out, "{}", log.current_timestamp()?)?,
        Command::Stats => print_stats(&log, out)?,
    }
    Ok(())
}

/// Print every entry newer than `after`, one per line.
///
/// A failed read is retried; after [`DUMP_RETRIES`] failures in a row the
/// numeric error code is returned.
fn dump<F: FlashDriver>(
    log: &FlashLog<F>,
    mut after: u32,
    out: &mut impl Write,
) -> std::io::Result<Result<(), i32>> {
    let mut buf = [0u8; MAX_ENTRY_SIZE];
    let mut retries = DUMP_RETRIES;

    while retries > 0 {
        retries -= 1;
        let len = match log.dequeue_event(after, &mut buf) {
            Ok(0) => return Ok(Ok(())),
            Ok(len) => len,
            Err(code) => {
                if retries > 0 {
                    thread::sleep(Duration::from_millis(10));
                    continue;
                }
                return Ok(Err(code));
            }
        };

        let Some(header) = EntryHeader::parse(&buf[..len]) else {
            return Ok(Err(flashlog::ErrorCode::Crc.negative()));
        };
        after = header.timestamp;
        write!(out, "{:10}:{:02x}", header.timestamp, header.event_type)?;
        for byte in &buf[HEADER_SIZE..len] {
            write!(out, " {byte:02x}")?;
        }
        writeln!(out)?;
        retries = DUMP_RETRIES;
    }
    Ok(Ok(()))
}

fn print_stats<F: FlashDriver>(log: &FlashLog<F>, out: &mut impl Write) -> anyhow::Result<()> {
    let stats = log.stats()?;
    let report = log.recovery();
    let config = log.config();

    writeln!(out, "base address:      {:#010x}", config.base_address)?;
    writeln!(out, "capacity:          {} bytes", stats.capacity)?;
    writeln!(out, "write cursor:      {}", stats.write_cursor)?;
    writeln!(out, "free:              {} bytes", stats.free_bytes())?;
    writeln!(out, "last timestamp:    {}", stats.last_timestamp)?;
    writeln!(out, "lock failures:     {}", stats.lock_failures)?;
    writeln!(out, "overflow failures: {}", stats.overflow_failures)?;
    writeln!(out, "recovery:          {:?}", report.action)?;
    writeln!(out, "entries at open:   {}", report.entries)?;

    let entries = log.read_all()?;
    for kind in EventKind::ALL {
        let count = entries
            .iter()
            .filter(|e| e.event_type == u8::from(kind))
            .count();
        if count > 0 {
            writeln!(out, "  {:<16} {count}", kind.name())?;
        }
    }
    Ok(())
}
