//! Driver configuration and built-in profiles.
//!
//! A profile is a complete [`DriverConfig`]: where the server is, how much
//! load to generate, and what to check afterwards. Profiles can be loaded by
//! name or from TOML; every section falls back to defaults.
//!
//! # Example
//!
//! ```ignore
//! use hoyobar_workload::config::{load_profile, DriverConfig};
//!
//! // Load a named profile
//! let config = load_profile("smoke").unwrap();
//!
//! // Or load from a TOML file
//! let config = DriverConfig::from_file("bulk.toml").unwrap();
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use hoyobar_core::{Error, Limits};

use crate::dispatcher::Dispatcher;
use crate::executor::DEFAULT_BASE_URL;
use crate::generator::ReplyRange;
use crate::orchestrator::FailureMode;

/// Where the server is and how long to wait for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// API base URL.
    pub base_url: String,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// How long to wait for the server to come up, in milliseconds (0 = don't wait).
    pub ready_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_ms: 10_000,
            ready_timeout_ms: 0,
        }
    }
}

/// How much load to generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Users to register.
    pub users: u64,
    /// Registered users that author posts and replies.
    pub active_users: u64,
    /// Posts with random authors. Ignored when `posts_per_user > 0`.
    pub posts: u64,
    /// Posts per active user, user-major.
    pub posts_per_user: u64,
    /// Minimum replies per post.
    pub reply_min: u32,
    /// Maximum replies per post.
    pub reply_max: u32,
    /// Descriptors per batch.
    pub batch_size: u64,
    /// In-flight requests per batch.
    pub concurrency: u64,
    /// Random seed.
    pub seed: u64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            users: 100,
            active_users: 100,
            posts: 100,
            posts_per_user: 0,
            reply_min: 0,
            reply_max: 3,
            batch_size: 10_000,
            concurrency: 500,
            seed: 42,
        }
    }
}

/// What to do besides generating load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Failure policy for create stages.
    pub failure_mode: FailureMode,
    /// Run ordering verification after the create stages.
    pub verify: bool,
    /// Page size for list queries (server default when absent).
    pub page_size: Option<u32>,
    /// Posts whose reply lists are checked.
    pub reply_list_checks: usize,
    /// Failures sampled per stage.
    pub failure_sample_limit: usize,
    /// Log every registered user in and check the response.
    pub login: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            failure_mode: FailureMode::CountAndContinue,
            verify: false,
            page_size: None,
            reply_list_checks: 10,
            failure_sample_limit: 10,
            login: false,
        }
    }
}

/// A complete driver profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Profile name.
    pub name: String,
    /// What this profile is for.
    pub description: String,
    /// Server settings.
    pub server: ServerConfig,
    /// Load settings.
    pub load: LoadConfig,
    /// Run settings.
    pub run: RunConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            description: "Default driver profile".to_string(),
            server: ServerConfig::default(),
            load: LoadConfig::default(),
            run: RunConfig::default(),
        }
    }
}

impl DriverConfig {
    /// Load a profile from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;
        Self::from_toml(&contents)
    }

    /// Parse a profile from a TOML string.
    ///
    /// Negative counts fail here, since every count is unsigned.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML cannot be parsed.
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    /// Serialize the profile to a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile cannot be serialized.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize {
            message: e.to_string(),
        })
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }

    /// Reply count range.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvertedRange` if `reply_min > reply_max`.
    pub const fn reply_range(&self) -> hoyobar_core::Result<ReplyRange> {
        ReplyRange::new(self.load.reply_min, self.load.reply_max)
    }

    /// Checks the profile against `limits`. Runs before any network I/O.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting.
    pub fn validate(&self, limits: &Limits) -> hoyobar_core::Result<()> {
        limits.validate()?;
        limits.check_batch_size(self.load.batch_size)?;
        limits.check_concurrency(self.load.concurrency)?;
        limits.check_timeout_us(self.server.request_timeout_ms.saturating_mul(1000))?;
        self.reply_range()?;

        if self.load.active_users > self.load.users {
            return Err(Error::InvalidArgument {
                name: "active_users",
                reason: format!(
                    "{} active users exceed {} registered users",
                    self.load.active_users, self.load.users
                ),
            });
        }
        let posts_planned = self.load.posts > 0 || self.load.posts_per_user > 0;
        if posts_planned && self.load.active_users == 0 {
            return Err(Error::InvalidArgument {
                name: "active_users",
                reason: "posts are planned but no user is active".to_string(),
            });
        }
        if self.run.page_size == Some(0) {
            return Err(Error::InvalidArgument {
                name: "page_size",
                reason: "must be positive".to_string(),
            });
        }
        if self.run.failure_sample_limit > limits.max_failure_samples as usize {
            return Err(Error::LimitExceeded {
                limit: "failure_sample_limit",
                max: u64::from(limits.max_failure_samples),
                actual: self.run.failure_sample_limit as u64,
            });
        }
        Ok(())
    }

    /// Builds the dispatcher for this profile.
    ///
    /// # Errors
    ///
    /// Returns an error if batch size, concurrency or timeout are invalid.
    #[allow(clippy::cast_possible_truncation)] // Bounded by limits before the cast.
    pub fn to_dispatcher(&self, limits: &Limits) -> hoyobar_core::Result<Dispatcher> {
        limits.check_batch_size(self.load.batch_size)?;
        limits.check_concurrency(self.load.concurrency)?;
        Dispatcher::with_limits(
            self.load.concurrency as usize,
            self.load.batch_size as usize,
            self.request_timeout(),
            limits,
        )
    }
}

/// Error type for profile operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading profile file.
    #[error("failed to read profile from {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Parse error in TOML.
    #[error("failed to parse profile: {message}")]
    Parse {
        /// Error message.
        message: String,
    },
    /// Serialize error writing TOML.
    #[error("failed to serialize profile: {message}")]
    Serialize {
        /// Error message.
        message: String,
    },
    /// Profile not found.
    #[error("profile not found: {name}")]
    NotFound {
        /// Profile name.
        name: String,
    },
}

fn smoke() -> DriverConfig {
    DriverConfig {
        name: "smoke".to_string(),
        description: "Small verified run: register, login, post, reply, check ordering".to_string(),
        load: LoadConfig {
            users: 20,
            active_users: 20,
            posts: 0,
            posts_per_user: 2,
            reply_min: 0,
            reply_max: 2,
            batch_size: 50,
            concurrency: 8,
            seed: 42,
        },
        run: RunConfig {
            verify: true,
            login: true,
            reply_list_checks: 5,
            ..RunConfig::default()
        },
        ..DriverConfig::default()
    }
}

fn ordering() -> DriverConfig {
    DriverConfig {
        name: "ordering".to_string(),
        description: "Three users with two posts each, checked page by page".to_string(),
        load: LoadConfig {
            users: 3,
            active_users: 3,
            posts: 0,
            posts_per_user: 2,
            reply_min: 0,
            reply_max: 0,
            batch_size: 10,
            concurrency: 1,
            seed: 42,
        },
        run: RunConfig {
            verify: true,
            login: true,
            page_size: Some(4),
            ..RunConfig::default()
        },
        ..DriverConfig::default()
    }
}

fn bulk() -> DriverConfig {
    DriverConfig {
        name: "bulk".to_string(),
        description: "Populate a server with 1.1M users and posts".to_string(),
        load: LoadConfig {
            users: 1_100_000,
            active_users: 10_000,
            posts: 1_100_000,
            posts_per_user: 0,
            reply_min: 0,
            reply_max: 3,
            batch_size: 10_000,
            concurrency: 500,
            seed: 42,
        },
        ..DriverConfig::default()
    }
}

fn stress() -> DriverConfig {
    DriverConfig {
        name: "stress".to_string(),
        description: "High concurrency to find server limits".to_string(),
        server: ServerConfig {
            request_timeout_ms: 30_000,
            ..ServerConfig::default()
        },
        load: LoadConfig {
            users: 50_000,
            active_users: 5_000,
            posts: 200_000,
            posts_per_user: 0,
            reply_min: 0,
            reply_max: 5,
            batch_size: 20_000,
            concurrency: 2048,
            seed: 42,
        },
        ..DriverConfig::default()
    }
}

/// Built-in driver profiles.
#[must_use]
pub fn builtin_profiles() -> HashMap<&'static str, DriverConfig> {
    HashMap::from([
        ("smoke", smoke()),
        ("ordering", ordering()),
        ("bulk", bulk()),
        ("stress", stress()),
    ])
}

/// Load a built-in profile by name.
///
/// # Errors
///
/// Returns an error if the profile name is not found.
pub fn load_profile(name: &str) -> Result<DriverConfig, ConfigError> {
    builtin_profiles()
        .remove(name)
        .ok_or_else(|| ConfigError::NotFound {
            name: name.to_string(),
        })
}

/// List all available built-in profile names.
#[must_use]
pub fn list_profiles() -> Vec<&'static str> {
    let mut names: Vec<_> = builtin_profiles().keys().copied().collect();
    names.sort_unstable();
    names
}
