use serde::{Deserialize, Serialize};

use crate::error::{LogError, LogResult};
use crate::index::ENTRY_WIDTH;

/// Configuration for a log and the segments it creates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub segment: SegmentConfig,
}

/// Sizing and durability parameters applied to every segment.
///
/// The zero value is valid: byte caps left at zero fall back to the
/// 1024-byte defaults when the log opens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentConfig {
    /// Soft cap on the store file in bytes. A segment whose store reaches
    /// it is considered maxed and is replaced on the next append.
    pub max_store_bytes: u64,
    /// Hard cap on the index file in bytes. The file is pre-extended to
    /// this size at open so the mmap never has to grow.
    pub max_index_bytes: u64,
    /// Base offset assigned to the first segment of a fresh log.
    pub initial_offset: u64,
    /// Flush and sync the store after every append. Off by default; each
    /// append then costs a write barrier.
    pub sync_on_append: bool,
}

impl Config {
    /// Replaces zero byte caps with the 1024-byte defaults.
    pub(crate) fn with_defaults(mut self) -> Self {
        if self.segment.max_store_bytes == 0 {
            self.segment.max_store_bytes = 1024;
        }
        if self.segment.max_index_bytes == 0 {
            self.segment.max_index_bytes = 1024;
        }
        self
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> LogResult<()> {
        if self.segment.max_index_bytes < ENTRY_WIDTH {
            return Err(LogError::Configuration(format!(
                "max_index_bytes must hold at least one {}-byte entry",
                ENTRY_WIDTH
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_zero_caps() {
        let config = Config::default().with_defaults();
        assert_eq!(config.segment.max_store_bytes, 1024);
        assert_eq!(config.segment.max_index_bytes, 1024);
        assert_eq!(config.segment.initial_offset, 0);
        assert!(!config.segment.sync_on_append);
    }

    #[test]
    fn test_defaults_keep_explicit_caps() {
        let mut config = Config::default();
        config.segment.max_store_bytes = 4096;
        let config = config.with_defaults();
        assert_eq!(config.segment.max_store_bytes, 4096);
        assert_eq!(config.segment.max_index_bytes, 1024);
    }

    #[test]
    fn test_validate_rejects_tiny_index_cap() {
        let mut config = Config::default().with_defaults();
        config.segment.max_index_bytes = ENTRY_WIDTH - 1;
        assert!(matches!(
            config.validate(),
            Err(LogError::Configuration(_))
        ));
    }
}
