//! # Entry Codec
//!
//! Byte-exact on-flash entry format.
//!
//! ## Layout
//!
//! ```text
//! [type:1][timestamp:4 LE][size:1][crc:1][payload:size&0x3f][pad:0xff...]
//! ```
//!
//! - **type**: event kind
//! - **timestamp**: allocator-issued, unique across the log
//! - **size**: payload length in bits 0..=5, bits 6..=7 reserved flags
//! - **crc**: CRC-8 (polynomial 0x07) over header and payload, computed with
//!   this byte set to zero
//! - **pad**: filler up to the flash write granularity
//!
//! Erased flash reads `0xff`, so a timestamp field of `0xffffffff` marks the
//! end of written data.
//!
//! ## Security Note
//!
//! CRC-8 detects torn writes and bit rot. It is not an integrity guarantee
//! against a deliberate attacker.

use crate::error::FlashLogError;

/// Header length: type, timestamp, size, crc.
pub const HEADER_SIZE: usize = 7;

/// Largest payload the size field can describe.
pub const MAX_PAYLOAD_SIZE: usize = 63;

/// Largest unpadded entry.
pub const MAX_ENTRY_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE;

/// Payload length bits of the size field.
pub const SIZE_MASK: u8 = 0x3f;

/// Value of an erased flash byte.
pub const ERASED_BYTE: u8 = 0xff;

/// Timestamp field of an unwritten slot.
pub const ERASED_TIMESTAMP: u32 = u32::MAX;

/// Filler appended after the payload. Programming all-ones leaves NOR cells
/// untouched.
pub const PAD_BYTE: u8 = 0xff;

const TYPE_OFFSET: usize = 0;
const TIMESTAMP_OFFSET: usize = 1;
const SIZE_OFFSET: usize = 5;
const CRC_OFFSET: usize = 6;

/// Fixed entry header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    pub event_type: u8,
    pub timestamp: u32,
    /// Raw size byte, flags included
    pub size: u8,
    pub crc: u8,
}

impl EntryHeader {
    /// Parse the header at the start of `bytes`.
    ///
    /// Returns `None` when fewer than [`HEADER_SIZE`] bytes are available.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let header = bytes.get(..HEADER_SIZE)?;
        Some(Self {
            event_type: header[TYPE_OFFSET],
            timestamp: u32::from_le_bytes([
                header[TIMESTAMP_OFFSET],
                header[TIMESTAMP_OFFSET + 1],
                header[TIMESTAMP_OFFSET + 2],
                header[TIMESTAMP_OFFSET + 3],
            ]),
            size: header[SIZE_OFFSET],
            crc: header[CRC_OFFSET],
        })
    }

    /// Payload length from the low bits of the size field
    pub fn payload_len(&self) -> usize {
        (self.size & SIZE_MASK) as usize
    }

    /// Reserved flag bits
    pub fn flags(&self) -> u8 {
        self.size >> 6
    }

    /// Header plus payload, without padding
    pub fn entry_size(&self) -> usize {
        entry_size(self.payload_len())
    }

    /// Whether the timestamp field still reads as erased flash
    pub fn is_erased(&self) -> bool {
        self.timestamp == ERASED_TIMESTAMP
    }
}

/// Unpadded size of an entry carrying `payload_len` bytes.
pub fn entry_size(payload_len: usize) -> usize {
    HEADER_SIZE + payload_len
}

/// On-flash footprint of an entry carrying `payload_len` bytes.
pub fn padded_size(payload_len: usize, granularity: usize) -> usize {
    entry_size(payload_len).next_multiple_of(granularity)
}

/// Serialize an entry, padding it to `granularity`.
pub fn encode(
    event_type: u8,
    timestamp: u32,
    payload: &[u8],
    granularity: usize,
) -> Result<Vec<u8>, FlashLogError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(FlashLogError::PayloadTooLarge {
            size: payload.len(),
            limit: MAX_PAYLOAD_SIZE,
        });
    }

    let mut buf = Vec::with_capacity(padded_size(payload.len(), granularity));
    buf.push(event_type);
    buf.extend_from_slice(&timestamp.to_le_bytes());
    buf.push(payload.len() as u8);
    buf.push(0);
    buf.extend_from_slice(payload);

    buf[CRC_OFFSET] = crc8(&buf);

    buf.resize(padded_size(payload.len(), granularity), PAD_BYTE);
    Ok(buf)
}

/// Check the entry starting at `window[0]`.
///
/// `window` must end where the log space ends (or [`MAX_ENTRY_SIZE`] bytes
/// in, whichever comes first), so an entry whose size field points past it
/// is out of bounds. Nothing beyond the declared entry is read.
pub fn validate(window: &[u8]) -> bool {
    let Some(header) = EntryHeader::parse(window) else {
        return false;
    };

    let size = header.entry_size();
    let Some(entry) = window.get(..size) else {
        return false;
    };

    entry_crc(entry) == header.crc
}

/// CRC of a complete unpadded entry, treating its CRC byte as zero.
fn entry_crc(entry: &[u8]) -> u8 {
    let crc = crc8_update(0, &entry[..CRC_OFFSET]);
    let crc = crc8_update(crc, &[0]);
    crc8_update(crc, &entry[HEADER_SIZE..])
}

/// CRC-8 (polynomial 0x07, zero initial value)
pub fn crc8(data: &[u8]) -> u8 {
    crc8_update(0, data)
}

fn crc8_update(mut crc: u8, data: &[u8]) -> u8 {
    for byte in data {
        crc ^= byte;
        for _ in 0..8 {
            if crc & 0x80 != 0 {
                crc = (crc << 1) ^ 0x07;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// An entry read back from the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub event_type: u8,
    pub timestamp: u32,
    /// Reserved flag bits of the size field
    pub flags: u8,
    pub payload: Vec<u8>,
}

impl LogEntry {
    /// Decode a validated entry (header and payload, padding optional).
    pub fn decode(bytes: &[u8]) -> Result<Self, FlashLogError> {
        if !validate(bytes) {
            return Err(FlashLogError::Corrupt { offset: 0 });
        }
        // validate() guarantees the header and payload are present
        let header = EntryHeader::parse(bytes).ok_or(FlashLogError::Corrupt { offset: 0 })?;
        Ok(Self {
            event_type: header.event_type,
            timestamp: header.timestamp,
            flags: header.flags(),
            payload: bytes[HEADER_SIZE..header.entry_size()].to_vec(),
        })
    }
}
