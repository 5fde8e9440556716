//! Reusable test scenarios for workload simulation.
//!
//! Scenarios define common fault patterns and run configurations that can be
//! composed to create end-to-end tests against [`SimulatedForum`].
//!
//! [`SimulatedForum`]: crate::simulated_forum::SimulatedForum

use std::time::Duration;

use hoyobar_workload::{
    Dispatcher, FailureMode, Orchestrator, PostPlan, ReplyRange, RunSettings, TaskGenerator,
};

use crate::simulated_forum::SimulatedForum;

/// Common fault injection patterns.
pub mod faults {
    use std::time::Duration;

    use hoyobar_workload::Endpoint;

    use crate::simulated_forum::FaultPlan;

    /// Every third registration is rejected.
    #[must_use]
    pub fn flaky_registration() -> FaultPlan {
        FaultPlan {
            reject_every: Some((Endpoint::Register, 3)),
            ..FaultPlan::default()
        }
    }

    /// Every post creation is rejected.
    #[must_use]
    pub fn posts_down() -> FaultPlan {
        FaultPlan {
            reject_every: Some((Endpoint::CreatePost, 1)),
            ..FaultPlan::default()
        }
    }

    /// Every call is slow enough for requests to overlap.
    #[must_use]
    pub fn slow_server(latency_ms: u64) -> FaultPlan {
        FaultPlan {
            latency: Duration::from_millis(latency_ms),
            ..FaultPlan::default()
        }
    }

    /// Replies never answer.
    #[must_use]
    pub fn stalled_replies() -> FaultPlan {
        FaultPlan {
            stall: Some(Endpoint::Reply),
            ..FaultPlan::default()
        }
    }

    /// List pages come back with their first two entries swapped.
    #[must_use]
    pub fn misordered_lists() -> FaultPlan {
        FaultPlan {
            misorder_lists: true,
            ..FaultPlan::default()
        }
    }

    /// Lists omit their oldest entry.
    #[must_use]
    pub fn truncated_lists() -> FaultPlan {
        FaultPlan {
            truncate_lists: true,
            ..FaultPlan::default()
        }
    }
}

/// Seeds for reproducible testing.
pub mod seeds {
    /// Seeds every randomized scenario is run with.
    pub const REGRESSION_SEEDS: &[u64] = &[42, 12345, 0xDEAD_BEEF, 999, 7777, 0x1337, 1, u64::MAX, 0];
}

/// Per-request timeout used by scenarios.
pub const SCENARIO_TIMEOUT: Duration = Duration::from_secs(2);

/// Run settings for a small population.
#[must_use]
pub fn small_population(users: usize, posts: usize, replies: ReplyRange) -> RunSettings {
    RunSettings {
        users,
        active_users: users,
        posts: PostPlan::Random { count: posts },
        replies,
        ..RunSettings::default()
    }
}

/// Three users with two posts each and no replies, verified with page size 4.
#[must_use]
pub fn three_by_two() -> RunSettings {
    RunSettings {
        users: 3,
        active_users: 3,
        posts: PostPlan::PerUser { per_user: 2 },
        replies: ReplyRange::exactly(0),
        login: true,
        verify: true,
        page_size: Some(4),
        ..RunSettings::default()
    }
}

/// Settings that stop at the first failure.
#[must_use]
pub fn fail_fast(settings: RunSettings) -> RunSettings {
    RunSettings {
        failure_mode: FailureMode::FailFast,
        ..settings
    }
}

/// Builds an orchestrator over `forum`.
///
/// # Panics
///
/// Panics if `concurrency` or `batch_size` is zero or above the limits.
#[must_use]
pub fn orchestrator(
    forum: SimulatedForum,
    settings: RunSettings,
    seed: u64,
    concurrency: usize,
    batch_size: usize,
) -> Orchestrator<SimulatedForum> {
    let dispatcher = Dispatcher::new(concurrency, batch_size, SCENARIO_TIMEOUT).expect("valid dispatcher");
    Orchestrator::new(forum, TaskGenerator::new(seed), dispatcher, settings)
}
