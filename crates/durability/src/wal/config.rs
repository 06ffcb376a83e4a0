//! Segment sizing

/// Rotation size used when nothing is configured
pub const DEFAULT_SEGMENT_SIZE: u64 = 64 * 1024 * 1024;

/// Smallest accepted rotation size
pub const MIN_SEGMENT_SIZE: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalConfig {
    /// A segment is sealed before an append would grow it past this size.
    /// A single record larger than this still gets a segment of its own.
    pub segment_size: u64,
}

impl Default for WalConfig {
    fn default() -> Self {
        WalConfig {
            segment_size: DEFAULT_SEGMENT_SIZE,
        }
    }
}

impl WalConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_segment_size(self, segment_size: u64) -> Self {
        WalConfig { segment_size }
    }

    /// 64 KiB segments, so tests rotate.
    pub fn for_testing() -> Self {
        Self::new().with_segment_size(64 * 1024)
    }

    pub fn validate(&self) -> Result<(), WalConfigError> {
        if self.segment_size < MIN_SEGMENT_SIZE {
            return Err(WalConfigError::SegmentSizeTooSmall {
                size: self.segment_size,
                min: MIN_SEGMENT_SIZE,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalConfigError {
    #[error("wal_segment_size {size} is below the minimum of {min} bytes")]
    SegmentSizeTooSmall { size: u64, min: u64 },
}
