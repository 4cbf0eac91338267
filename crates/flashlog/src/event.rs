//! Reserved event kinds
//!
//! The type byte is application defined; these values are claimed by the log
//! itself and by the firmware subsystems that report through it.

/// Known event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventKind {
    /// Written into a freshly erased log at boot
    LogStart = 0,
    /// Written after boot found damaged data and compacted
    LogCorrupted = 1,
    TpmI2cError = 2,
    /// One byte: overflow failures since the last report
    LogOverflows = 3,
    /// One byte: lock failures since the last report
    LogLocks = 4,
    Nvmem = 5,
    TpmWipeError = 6,
    TrngStall = 7,
    DcryptoFailure = 8,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        Self::LogStart,
        Self::LogCorrupted,
        Self::TpmI2cError,
        Self::LogOverflows,
        Self::LogLocks,
        Self::Nvmem,
        Self::TpmWipeError,
        Self::TrngStall,
        Self::DcryptoFailure,
    ];

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::LogStart),
            1 => Some(Self::LogCorrupted),
            2 => Some(Self::TpmI2cError),
            3 => Some(Self::LogOverflows),
            4 => Some(Self::LogLocks),
            5 => Some(Self::Nvmem),
            6 => Some(Self::TpmWipeError),
            7 => Some(Self::TrngStall),
            8 => Some(Self::DcryptoFailure),
            _ => None,
        }
    }

    /// Short name for console output
    pub fn name(self) -> &'static str {
        match self {
            Self::LogStart => "log-start",
            Self::LogCorrupted => "log-corrupted",
            Self::TpmI2cError => "tpm-i2c-error",
            Self::LogOverflows => "log-overflows",
            Self::LogLocks => "log-locks",
            Self::Nvmem => "nvmem",
            Self::TpmWipeError => "tpm-wipe-error",
            Self::TrngStall => "trng-stall",
            Self::DcryptoFailure => "dcrypto-failure",
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| format!("unknown event kind: {s}"))
    }
}

impl From<EventKind> for u8 {
    fn from(kind: EventKind) -> u8 {
        kind as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_known_kinds() {
        for value in 0..=8u8 {
            let kind = EventKind::from_u8(value).unwrap();
            assert_eq!(u8::from(kind), value);
        }
        assert_eq!(EventKind::from_u8(9), None);
        assert_eq!(EventKind::from_u8(0xff), None);
    }

    #[test]
    fn test_names() {
        assert_eq!(EventKind::LogLocks.name(), "log-locks");
        assert_eq!(EventKind::LogStart.name(), "log-start");
    }

    #[test]
    fn test_parse_names() {
        for kind in EventKind::ALL {
            assert_eq!(kind.name().parse::<EventKind>(), Ok(kind));
        }
        assert!("log-stop".parse::<EventKind>().is_err());
    }
}
