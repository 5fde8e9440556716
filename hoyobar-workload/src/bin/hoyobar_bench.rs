//! Forum workload driver binary.
//!
//! Runs a built-in profile or a TOML profile against a forum server and prints
//! a per-stage summary.
//!
//! # Quick check against a local server
//!
//! ```bash
//! hoyobar-bench --profile smoke
//! ```
//!
//! # Bulk population
//!
//! ```bash
//! hoyobar-bench --profile bulk --base-url http://db-host:8080/api --concurrency 256
//! ```
//!
//! # Custom profile
//!
//! ```bash
//! hoyobar-bench --config ./profiles/nightly.toml --verify
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use hoyobar_core::Limits;
use hoyobar_workload::{
    list_profiles, load_profile, DriverConfig, FailureMode, HttpExecutor, Orchestrator, WorkloadError,
};

/// Bounded-concurrency workload driver for the forum API.
#[derive(Parser, Debug)]
#[command(name = "hoyobar-bench")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Built-in profile to start from.
    #[arg(long, default_value = "smoke")]
    profile: String,

    /// TOML profile file. Takes precedence over `--profile`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// List built-in profiles and exit.
    #[arg(long)]
    list_profiles: bool,

    /// Print the effective profile as TOML and exit.
    #[arg(long)]
    print_config: bool,

    /// API base URL.
    #[arg(long)]
    base_url: Option<String>,

    /// Per-request timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Wait up to this many milliseconds for the server before starting.
    #[arg(long)]
    wait_ready_ms: Option<u64>,

    /// Users to register.
    #[arg(long)]
    users: Option<u64>,

    /// Registered users that author posts and replies.
    #[arg(long)]
    active_users: Option<u64>,

    /// Posts with random authors.
    #[arg(long)]
    posts: Option<u64>,

    /// Posts per active user (replaces `--posts` when non-zero).
    #[arg(long)]
    posts_per_user: Option<u64>,

    /// Minimum replies per post.
    #[arg(long)]
    reply_min: Option<u32>,

    /// Maximum replies per post.
    #[arg(long)]
    reply_max: Option<u32>,

    /// Descriptors per batch.
    #[arg(long)]
    batch_size: Option<u64>,

    /// In-flight requests per batch.
    #[arg(long)]
    concurrency: Option<u64>,

    /// Random seed.
    #[arg(long)]
    seed: Option<u64>,

    /// List page size for verification queries.
    #[arg(long)]
    page_size: Option<u32>,

    /// Run ordering verification.
    #[arg(long, conflicts_with = "no_verify")]
    verify: bool,

    /// Skip ordering verification even if the profile enables it.
    #[arg(long)]
    no_verify: bool,

    /// Log every registered user in.
    #[arg(long)]
    login: bool,

    /// Abort a stage at its first failed request.
    #[arg(long)]
    fail_fast: bool,

    /// Hide the per-stage progress bars.
    #[arg(long)]
    no_progress: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: Level,
}

impl Args {
    /// Loads the profile, applies overrides and validates it before any
    /// request is sent.
    fn load_config(&self) -> Result<DriverConfig, WorkloadError> {
        let mut config = match &self.config {
            Some(path) => DriverConfig::from_file(path)?,
            None => load_profile(&self.profile)?,
        };

        if let Some(url) = &self.base_url {
            config.server.base_url.clone_from(url);
        }
        if let Some(ms) = self.timeout_ms {
            config.server.request_timeout_ms = ms;
        }
        if let Some(ms) = self.wait_ready_ms {
            config.server.ready_timeout_ms = ms;
        }

        let load = &mut config.load;
        load.users = self.users.unwrap_or(load.users);
        load.active_users = self.active_users.unwrap_or(load.active_users);
        load.posts = self.posts.unwrap_or(load.posts);
        load.posts_per_user = self.posts_per_user.unwrap_or(load.posts_per_user);
        load.reply_min = self.reply_min.unwrap_or(load.reply_min);
        load.reply_max = self.reply_max.unwrap_or(load.reply_max);
        load.batch_size = self.batch_size.unwrap_or(load.batch_size);
        load.concurrency = self.concurrency.unwrap_or(load.concurrency);
        load.seed = self.seed.unwrap_or(load.seed);

        if self.page_size.is_some() {
            config.run.page_size = self.page_size;
        }
        if self.verify {
            config.run.verify = true;
        } else if self.no_verify {
            config.run.verify = false;
        }
        config.run.login |= self.login;
        if self.fail_fast {
            config.run.failure_mode = FailureMode::FailFast;
        }

        config.validate(&Limits::default())?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.list_profiles {
        for name in list_profiles() {
            let profile = load_profile(name)?;
            println!("{name:<10} {}", profile.description);
        }
        return Ok(());
    }

    // Logs go to stderr; stdout carries the summary.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = args.load_config()?;
    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    info!(
        profile = %config.name,
        base_url = %config.server.base_url,
        users = config.load.users,
        active_users = config.load.active_users,
        batch_size = config.load.batch_size,
        concurrency = config.load.concurrency,
        verify = config.run.verify,
        "Starting workload"
    );

    let executor = HttpExecutor::builder()
        .base_url(&config.server.base_url)
        .request_timeout(config.request_timeout())
        .build()?;

    if config.server.ready_timeout_ms > 0 {
        executor
            .wait_ready(Duration::from_millis(config.server.ready_timeout_ms))
            .await?;
        info!(base_url = %executor.base_url(), "Server is ready");
    }

    let mut orchestrator = Orchestrator::from_config(executor, &config)?.with_progress(!args.no_progress);
    let summary = orchestrator.run().await?;
    summary.print_summary();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use hoyobar_core::Error;
    use hoyobar_workload::ConfigError;

    fn args(flags: &[&str]) -> Args {
        Args::parse_from(std::iter::once("hoyobar-bench").chain(flags.iter().copied()))
    }

    #[test]
    fn test_verify_flags_override_profile() {
        assert!(args(&["--profile", "smoke"]).load_config().unwrap().run.verify);
        assert!(!args(&["--profile", "smoke", "--no-verify"]).load_config().unwrap().run.verify);
        assert!(args(&["--profile", "bulk", "--verify"]).load_config().unwrap().run.verify);
        assert!(Args::try_parse_from(["hoyobar-bench", "--verify", "--no-verify"]).is_err());
    }

    #[test]
    fn test_overrides_applied() {
        let config = args(&["--profile", "bulk", "--users", "10", "--active-users", "4", "--concurrency", "16"])
            .load_config()
            .unwrap();
        assert_eq!(config.load.users, 10);
        assert_eq!(config.load.active_users, 4);
        assert_eq!(config.load.concurrency, 16);
        assert!(config.to_toml().unwrap().contains("concurrency = 16"));
    }

    #[test]
    fn test_load_config_rejects_invalid_profiles() {
        let err = args(&["--profile", "smoke", "--active-users", "0"]).load_config().unwrap_err();
        assert!(matches!(
            err,
            WorkloadError::Config(Error::InvalidArgument { name: "active_users", .. })
        ));

        let err = args(&["--profile", "nope"]).load_config().unwrap_err();
        assert!(matches!(err, WorkloadError::Profile(ConfigError::NotFound { .. })));
    }
}
