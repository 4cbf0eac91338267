//! # Flashlog
//!
//! Crash-tolerant, append-only event log for a reserved region of NOR flash.
//!
//! Firmware subsystems record small binary events (type byte, timestamp, up
//! to 63 bytes of payload); a host pulls them out later in timestamp order.
//! The log survives power loss mid-write, compacts itself when the region
//! fills up, and never blocks: a caller that finds the log busy gets an
//! error and the failure is counted and reported into the log later.
//!
//! ## Features
//!
//! - **FlashLog**: append, dequeue, compaction, erase and recovery
//! - **FlashDriver trait**: raw region access, with [`RamFlash`] for tests
//! - **AccessGuard**: non-blocking single-accessor lock
//! - **TimestampAllocator**: strictly increasing, never-erased timestamps
//! - **SharedMemory**: budgeted staging memory borrowed during compaction
//!
//! ## Example
//!
//! ```rust
//! use flashlog::{FlashLog, FlashLogConfig, RamFlash};
//!
//! let config = FlashLogConfig::small();
//! let flash = RamFlash::new(config.capacity, config.write_granularity);
//! let log = FlashLog::init(flash, config).unwrap();
//!
//! log.add_event(0x10, b"boot ok").unwrap();
//!
//! let mut after = 0;
//! while let Some(entry) = log.next_entry(after).unwrap() {
//!     println!("{:10}:{:02x}", entry.timestamp, entry.event_type);
//!     after = entry.timestamp;
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod flash;
pub mod guard;
pub mod log;
pub mod platform;
pub mod shared_mem;
pub mod timestamp;

// Re-exports
pub use codec::{LogEntry, MAX_PAYLOAD_SIZE};
pub use config::FlashLogConfig;
pub use error::{ConfigError, ErrorCode, FlashError, FlashLogError};
pub use event::EventKind;
pub use flash::{AccessControl, FlashDriver, NoAccessControl, RamFlash};
pub use log::{
    CompactionStats, FlashLog, FlashLogBuilder, LogStats, ReadContext, RecoveryAction,
    RecoveryReport,
};
pub use platform::{HostPlatform, Platform};
pub use shared_mem::{MemoryError, SharedMemory};
pub use timestamp::{Clock, ManualClock, SystemClock};
