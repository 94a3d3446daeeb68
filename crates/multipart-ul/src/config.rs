//! Engine tuning

use std::time::Duration;

use crate::error::UploadError;
use crate::types::{DEFAULT_CHUNK_SIZE, MULTIPART_THRESHOLD};

/// What to do with in-flight sibling parts once one part has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SiblingFailurePolicy {
    /// Surface the failure immediately but let dispatched parts finish on their own.
    #[default]
    LetFinish,
    /// Surface the failure and abort every other part transport.
    Cancel,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub chunk_size: u64,
    pub multipart_threshold: u64,
    /// `None` launches every part at once.
    pub max_concurrent_parts: Option<usize>,
    /// Minimum spacing of progress events from one part transport.
    pub progress_interval: Duration,
    /// Recompute elapsed/speed/ETA at least this often.
    pub refresh_interval: Duration,
    /// Upper bound on waiting for transports after cancellation.
    pub cancel_grace: Duration,
    pub sibling_failure: SiblingFailurePolicy,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            multipart_threshold: MULTIPART_THRESHOLD,
            max_concurrent_parts: None,
            progress_interval: Duration::from_millis(20),
            refresh_interval: Duration::from_secs(1),
            cancel_grace: Duration::from_secs(10),
            sibling_failure: SiblingFailurePolicy::LetFinish,
        }
    }
}

impl UploadConfig {
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.chunk_size == 0 {
            return Err(UploadError::Configuration(
                "chunk size must be at least 1 byte".to_string(),
            ));
        }
        if self.multipart_threshold == 0 {
            return Err(UploadError::Configuration(
                "multipart threshold must be at least 1 byte".to_string(),
            ));
        }
        if self.refresh_interval.is_zero() {
            return Err(UploadError::Configuration(
                "refresh interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective part concurrency; a limit of zero is treated as one.
    pub fn part_limit(&self) -> Option<usize> {
        self.max_concurrent_parts.map(|n| n.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_five_mib_parts_without_limit() {
        let config = UploadConfig::default();
        assert_eq!(config.chunk_size, 5 * 1024 * 1024);
        assert_eq!(config.multipart_threshold, 5 * 1024 * 1024);
        assert_eq!(config.part_limit(), None);
        assert_eq!(config.sibling_failure, SiblingFailurePolicy::LetFinish);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_sizes_are_rejected_and_zero_limit_is_clamped() {
        let config = UploadConfig {
            chunk_size: 0,
            ..UploadConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(UploadError::Configuration(_))
        ));

        let config = UploadConfig {
            max_concurrent_parts: Some(0),
            ..UploadConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.part_limit(), Some(1));
    }
}
