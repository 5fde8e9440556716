//! Configuration errors for the workload driver.
//!
//! These are raised while validating configuration or building request
//! descriptors, always before any network I/O. They are never retried.

use std::fmt;

/// The result type for configuration-time operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by invalid counts, ranges or generated data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An invalid argument was provided.
    InvalidArgument {
        /// The name of the argument.
        name: &'static str,
        /// Why it was invalid.
        reason: String,
    },

    /// An inclusive range has its bounds swapped.
    InvertedRange {
        /// The name of the range.
        name: &'static str,
        /// Lower bound as given.
        min: u64,
        /// Upper bound as given.
        max: u64,
    },

    /// The payload source produced a username that was already issued.
    DuplicateUsername {
        /// The colliding username.
        username: String,
        /// Index of the descriptor that collided.
        index: u64,
    },

    /// A resource limit was exceeded.
    LimitExceeded {
        /// Which limit was exceeded.
        limit: &'static str,
        /// The maximum allowed value.
        max: u64,
        /// The actual value that exceeded the limit.
        actual: u64,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument { name, reason } => {
                write!(f, "invalid argument '{name}': {reason}")
            }
            Self::InvertedRange { name, min, max } => {
                write!(f, "inverted range '{name}': min {min} > max {max}")
            }
            Self::DuplicateUsername { username, index } => {
                write!(f, "duplicate username '{username}' generated at index {index}")
            }
            Self::LimitExceeded { limit, max, actual } => {
                write!(f, "limit exceeded: {limit} (max={max}, actual={actual})")
            }
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverted_range_display() {
        let err = Error::InvertedRange {
            name: "reply_count",
            min: 3,
            max: 1,
        };
        assert_eq!(format!("{err}"), "inverted range 'reply_count': min 3 > max 1");
    }

    #[test]
    fn test_limit_exceeded_display() {
        let err = Error::LimitExceeded {
            limit: "batch_size",
            max: 1024,
            actual: 2048,
        };
        let msg = format!("{err}");
        assert!(msg.contains("batch_size"));
        assert!(msg.contains("1024"));
        assert!(msg.contains("2048"));
    }

    #[test]
    fn test_duplicate_username_display() {
        let err = Error::DuplicateUsername {
            username: "1870000001".to_string(),
            index: 4,
        };
        assert!(format!("{err}").contains("1870000001"));
    }
}
