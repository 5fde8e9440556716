//! Driver limits and configuration bounds.
//!
//! Every batch, in-flight window and diagnostic buffer has an explicit
//! maximum. Title and nickname bounds match the forum API's validation
//! rules. Content limits are the generator's truncation lengths, tighter
//! than the API's 2000 (post) and 1000 (reply) character maximums.

use crate::error::{Error, Result};

/// Limits applied to a workload run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    // Dispatch limits.
    /// Maximum number of descriptors per batch.
    pub max_batch_size: u32,
    /// Maximum number of in-flight requests within a batch.
    pub max_concurrency: u32,
    /// Maximum number of failure samples kept per stage.
    pub max_failure_samples: u32,

    // Payload limits (characters).
    /// Maximum post title length.
    pub max_title_chars: u32,
    /// Maximum post content length.
    pub max_post_content_chars: u32,
    /// Maximum reply content length.
    pub max_reply_content_chars: u32,
    /// Minimum nickname length.
    pub min_nickname_chars: u32,
    /// Maximum nickname length.
    pub max_nickname_chars: u32,

    // Timeout limits (in microseconds).
    /// Default per-request timeout.
    pub default_timeout_us: u64,
    /// Maximum allowed per-request timeout.
    pub max_timeout_us: u64,
}

impl Limits {
    /// Creates limits with safe defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            // Dispatch: 100k descriptors/batch, 4096 in flight, 1000 samples.
            max_batch_size: 100_000,
            max_concurrency: 4096,
            max_failure_samples: 1000,

            // Title and nickname per server validation; content truncated to
            // 500 chars (the server accepts 2000 for posts, 1000 for replies).
            max_title_chars: 50,
            max_post_content_chars: 500,
            max_reply_content_chars: 500,
            min_nickname_chars: 3,
            max_nickname_chars: 20,

            // Timeouts: 10s default, 5min max.
            default_timeout_us: 10 * 1_000_000,
            max_timeout_us: 5 * 60 * 1_000_000,
        }
    }

    /// Validates that all limits are internally consistent.
    ///
    /// # Errors
    /// Returns an error if any limits are invalid or inconsistent.
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(Error::InvalidArgument {
                name: "max_batch_size",
                reason: "must be positive".to_string(),
            });
        }

        if self.max_concurrency == 0 {
            return Err(Error::InvalidArgument {
                name: "max_concurrency",
                reason: "must be positive".to_string(),
            });
        }

        if self.max_nickname_chars < self.min_nickname_chars {
            return Err(Error::InvertedRange {
                name: "nickname_chars",
                min: u64::from(self.min_nickname_chars),
                max: u64::from(self.max_nickname_chars),
            });
        }

        if self.default_timeout_us > self.max_timeout_us {
            return Err(Error::InvalidArgument {
                name: "default_timeout_us",
                reason: "must be <= max_timeout_us".to_string(),
            });
        }

        Ok(())
    }

    /// Checks a batch size against these limits.
    ///
    /// # Errors
    /// Returns an error if the size is zero or above `max_batch_size`.
    pub fn check_batch_size(&self, batch_size: u64) -> Result<()> {
        Self::check_positive_bounded("batch_size", batch_size, u64::from(self.max_batch_size))
    }

    /// Checks a concurrency ceiling against these limits.
    ///
    /// # Errors
    /// Returns an error if the ceiling is zero or above `max_concurrency`.
    pub fn check_concurrency(&self, concurrency: u64) -> Result<()> {
        Self::check_positive_bounded("concurrency", concurrency, u64::from(self.max_concurrency))
    }

    /// Checks a per-request timeout (in microseconds) against these limits.
    ///
    /// # Errors
    /// Returns an error if the timeout is zero or above `max_timeout_us`.
    pub fn check_timeout_us(&self, timeout_us: u64) -> Result<()> {
        Self::check_positive_bounded("request_timeout", timeout_us, self.max_timeout_us)
    }

    fn check_positive_bounded(limit: &'static str, value: u64, max: u64) -> Result<()> {
        if value == 0 {
            return Err(Error::InvalidArgument {
                name: limit,
                reason: "must be positive".to_string(),
            });
        }
        if value > max {
            return Err(Error::LimitExceeded {
                limit,
                max,
                actual: value,
            });
        }
        Ok(())
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits_are_valid() {
        let limits = Limits::new();
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn test_content_truncation_within_server_maximums() {
        let limits = Limits::default();
        assert_eq!(limits.max_title_chars, 50);
        assert!(limits.max_post_content_chars <= 2000);
        assert!(limits.max_reply_content_chars <= 1000);
    }

    #[test]
    fn test_zero_batch_size_limit() {
        let mut limits = Limits::new();
        limits.max_batch_size = 0;
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_nickname_bounds_inverted() {
        let mut limits = Limits::new();
        limits.min_nickname_chars = 30;
        assert!(matches!(
            limits.validate(),
            Err(Error::InvertedRange { name: "nickname_chars", .. })
        ));
    }

    #[test]
    fn test_check_batch_size() {
        let limits = Limits::new();
        assert!(limits.check_batch_size(1).is_ok());
        assert!(limits.check_batch_size(100_000).is_ok());
        assert!(matches!(
            limits.check_batch_size(0),
            Err(Error::InvalidArgument { name: "batch_size", .. })
        ));
        assert!(matches!(
            limits.check_batch_size(100_001),
            Err(Error::LimitExceeded { actual: 100_001, .. })
        ));
    }

    #[test]
    fn test_check_concurrency() {
        let limits = Limits::new();
        assert!(limits.check_concurrency(500).is_ok());
        assert!(limits.check_concurrency(0).is_err());
        assert!(limits.check_concurrency(5000).is_err());
    }
}
