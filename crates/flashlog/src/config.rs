//! Log geometry and compaction thresholds

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Largest supported log space; read cursors are 16 bits wide.
pub const MAX_CAPACITY: usize = u16::MAX as usize;

/// Flash log configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashLogConfig {
    /// Absolute address of the region, for display only
    pub base_address: u32,
    /// Region length in bytes
    pub capacity: usize,
    /// Minimum program unit of the flash
    pub write_granularity: usize,
    /// Trailing bytes kept by compaction
    pub preserve_window: usize,
    /// Appends compact first once the write cursor passes this mark
    pub runtime_high_water: usize,
    /// Init compacts when existing data extends past this mark
    pub startup_high_water: usize,
}

impl Default for FlashLogConfig {
    fn default() -> Self {
        Self::with_capacity(2048)
    }
}

impl FlashLogConfig {
    /// Derive thresholds from the capacity: keep a quarter, compact at 90%
    /// while running and at 75% on boot.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            base_address: 0,
            capacity,
            write_granularity: 4,
            preserve_window: capacity / 4,
            runtime_high_water: capacity * 9 / 10,
            startup_high_water: capacity * 3 / 4,
        }
    }

    /// One kilobyte region with 4-byte program units
    pub fn small() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_granularity(mut self, granularity: usize) -> Self {
        self.write_granularity = granularity;
        self
    }

    pub fn with_preserve_window(mut self, window: usize) -> Self {
        self.preserve_window = window;
        self
    }

    pub fn with_runtime_high_water(mut self, mark: usize) -> Self {
        self.runtime_high_water = mark;
        self
    }

    pub fn with_startup_high_water(mut self, mark: usize) -> Self {
        self.startup_high_water = mark;
        self
    }

    /// Check the geometry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 || self.capacity > MAX_CAPACITY {
            return Err(ConfigError::Capacity {
                capacity: self.capacity,
                max: MAX_CAPACITY,
            });
        }
        if !self.write_granularity.is_power_of_two()
            || self.capacity % self.write_granularity != 0
        {
            return Err(ConfigError::Granularity {
                granularity: self.write_granularity,
                capacity: self.capacity,
            });
        }
        if self.preserve_window == 0 || self.preserve_window > self.capacity {
            return Err(ConfigError::PreserveWindow {
                window: self.preserve_window,
                capacity: self.capacity,
            });
        }
        for (name, mark) in [
            ("runtime", self.runtime_high_water),
            ("startup", self.startup_high_water),
        ] {
            if mark > self.capacity {
                return Err(ConfigError::HighWater {
                    name,
                    mark,
                    capacity: self.capacity,
                });
            }
        }
        Ok(())
    }
}
