use crate::error::{HostError, HostResult};

/// Largest record the host accepts, in bytes.
pub const MAX_RECORD_SIZE: u32 = 128 * 1024 * 1024;

/// Value reported for the host heap size query.
pub const DEFAULT_HEAP_SIZE_HINT: u32 = 64 * 1024;

/// Host-side limits, fixed when the device is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostConfig {
    /// Number of screens, and therefore of rings, the host serves.
    pub screen_count: u32,
    /// Answer to the host heap size query.
    pub heap_size_hint: u32,
    /// Records longer than this are treated as corruption.
    pub max_record_size: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            screen_count: 1,
            heap_size_hint: DEFAULT_HEAP_SIZE_HINT,
            max_record_size: MAX_RECORD_SIZE,
        }
    }
}

impl HostConfig {
    pub fn validate(&self) -> HostResult<()> {
        if self.screen_count == 0 {
            return Err(HostError::InvalidConfig("at least one screen is required"));
        }
        if self.screen_count > i32::MAX as u32 {
            return Err(HostError::InvalidConfig("screen count does not fit a screen index"));
        }
        if self.max_record_size == 0 || self.max_record_size > MAX_RECORD_SIZE {
            return Err(HostError::InvalidConfig("max record size out of range"));
        }
        Ok(())
    }
}
