//! Error types for flashlog
//!
//! Every failure of the log is local and non-fatal. The variants map onto the
//! negative numeric codes returned to host-facing callers through
//! [`FlashLogError::error_code`].

use thiserror::Error;

use crate::shared_mem::MemoryError;

/// Numeric error codes shared with host tooling.
///
/// Values follow the controller firmware's error list, so a host dumping the
/// log over a vendor command sees the same numbers the console prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    Unknown = 1,
    Overflow = 3,
    Inval = 5,
    Busy = 6,
    Crc = 11,
    MemoryAllocation = 17,
}

impl ErrorCode {
    /// The negative form used as a return value.
    pub fn negative(self) -> i32 {
        -(self as i32)
    }
}

/// Errors surfaced by the flash driver collaborator
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FlashError {
    #[error("access of {len} bytes at offset {offset} is outside the {capacity} byte log space")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },
    #[error("write of {len} bytes at offset {offset} is not aligned to {granularity} bytes")]
    Misaligned {
        offset: usize,
        len: usize,
        granularity: usize,
    },
    #[error("power lost after {written} bytes of a {len} byte write")]
    PowerLoss { written: usize, len: usize },
    #[error("flash I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for FlashError {
    fn from(err: std::io::Error) -> Self {
        FlashError::Io(err.to_string())
    }
}

/// Invalid log geometry
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("log capacity must be between 1 and {max} bytes, got {capacity}")]
    Capacity { capacity: usize, max: usize },
    #[error("write granularity {granularity} must be a power of two dividing the capacity {capacity}")]
    Granularity { granularity: usize, capacity: usize },
    #[error("preserve window {window} must be between 1 and the capacity {capacity}")]
    PreserveWindow { window: usize, capacity: usize },
    #[error("{name} high-water mark {mark} exceeds the capacity {capacity}")]
    HighWater {
        name: &'static str,
        mark: usize,
        capacity: usize,
    },
    #[error("flash driver exposes {actual} bytes but the log is configured for {expected}")]
    RegionMismatch { expected: usize, actual: usize },
}

/// Errors returned by log operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FlashLogError {
    /// Lock held, interrupt context, or not initialized yet. Retry later.
    #[error("flash log busy")]
    Busy,

    /// The entry does not fit even after compaction and was dropped.
    #[error("log full: {needed} byte entry does not fit in {available} free bytes")]
    Overflow { needed: usize, available: usize },

    #[error("payload of {size} bytes exceeds the limit of {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    /// An entry failed CRC or bounds validation during a scan.
    #[error("corrupted entry at offset {offset}")]
    Corrupt { offset: usize },

    /// The caller's buffer cannot hold the next entry.
    #[error("entry of {size} bytes does not fit in a {capacity} byte buffer")]
    TooLarge { size: usize, capacity: usize },

    #[error("compaction staging buffer unavailable: {0}")]
    StagingUnavailable(#[from] MemoryError),

    #[error("timestamp {value} is not newer than the last issued {last}")]
    InvalidTimestamp { value: u32, last: u32 },

    #[error("timestamp space exhausted")]
    TimestampExhausted,

    #[error("flash error: {0}")]
    Flash(#[from] FlashError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl FlashLogError {
    /// Map the error onto the host-facing numeric code.
    pub fn code(&self) -> ErrorCode {
        match self {
            FlashLogError::Busy => ErrorCode::Busy,
            FlashLogError::Overflow { .. }
            | FlashLogError::TooLarge { .. }
            | FlashLogError::TimestampExhausted => ErrorCode::Overflow,
            FlashLogError::PayloadTooLarge { .. }
            | FlashLogError::InvalidTimestamp { .. }
            | FlashLogError::Config(_) => ErrorCode::Inval,
            FlashLogError::Corrupt { .. } => ErrorCode::Crc,
            FlashLogError::StagingUnavailable(_) => ErrorCode::MemoryAllocation,
            FlashLogError::Flash(_) => ErrorCode::Unknown,
        }
    }

    /// Negative error code, as returned by [`crate::FlashLog::dequeue_event`].
    pub fn error_code(&self) -> i32 {
        self.code().negative()
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, FlashLogError::Busy)
    }
}
