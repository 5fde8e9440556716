//! Stage sequencing.
//!
//! The [`Orchestrator`] runs register → [login] → post → reply → [verify],
//! threading each stage's records into the next. Create stages record their
//! intended order in a [`CreationLedger`] before dispatch; verification
//! compares list endpoints against that ledger.

use std::pin::pin;
use std::time::{Duration, Instant};

use futures::StreamExt;
use hdrhistogram::Histogram;
use indicatif::{ProgressBar, ProgressStyle};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use hoyobar_core::{Limits, PostId, PostRecord, ReplyRecord, UserRecord};

use crate::config::{ConfigError, DriverConfig};
use crate::descriptor::{Failure, FailureKind, Outcome, RequestDescriptor, Stage};
use crate::dispatcher::Dispatcher;
use crate::executor::ApiExecutor;
use crate::generator::{ReplyRange, TaskGenerator};
use crate::ledger::CreationLedger;
use crate::payload::{PayloadSource, SyntheticPayloads};
use crate::report::{latency_histogram, FailureSample, RunSummary, Shortfall, StageReport, VerificationSummary};
use crate::verification::{
    verify_login, verify_ordering, verify_reply_recency, ListOrder, PostListFetcher, ReplyListFetcher, Violation,
};

/// What a create stage does when a request fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Count the failure, keep a sample, and continue.
    #[default]
    CountAndContinue,
    /// Abort the stage at the first failure.
    FailFast,
}

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum WorkloadError {
    /// Invalid counts, ranges or limits.
    #[error("configuration error: {0}")]
    Config(#[from] hoyobar_core::Error),

    /// Profile could not be loaded.
    #[error(transparent)]
    Profile(#[from] ConfigError),

    /// A success response that does not decode.
    #[error("malformed {stage} response for slot {slot}: {message}")]
    Malformed {
        /// Stage of the request.
        stage: Stage,
        /// Slot of the request.
        slot: usize,
        /// Decode error.
        message: String,
    },

    /// Fail-fast mode stopped a stage.
    #[error("{stage} stage aborted at {request}: {cause}")]
    StageAborted {
        /// Stage that was aborted.
        stage: Stage,
        /// Summary of the failed request.
        request: String,
        /// Why it failed.
        cause: Failure,
    },

    /// A stage needs authors but no user is available.
    #[error("{stage} stage has no authors: no active user available")]
    NoAuthors {
        /// Stage that needed authors.
        stage: Stage,
    },

    /// A verification check failed.
    #[error("verification failed: {0}")]
    Verification(#[from] Violation),
}

/// Outcome of one stage.
#[derive(Debug)]
pub struct StageResult<T> {
    /// Stage.
    pub stage: Stage,
    /// Requests issued.
    pub attempted: usize,
    /// Created records, in client-intended (slot) order.
    pub successes: Vec<T>,
    /// Number of failed requests.
    pub errors: usize,
    /// Bounded sample of failures.
    pub failures: Vec<FailureSample>,
    /// Latency histogram in microseconds.
    pub latencies: Histogram<u64>,
    /// Wall-clock duration.
    pub duration: Duration,
    slots: Vec<usize>,
}

impl<T> StageResult<T> {
    /// Successes paired with their slots.
    pub fn with_slots(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots.iter().copied().zip(&self.successes)
    }

    /// Builds the stage report.
    #[must_use]
    pub fn report(&self) -> StageReport {
        StageReport::new(
            self.stage,
            self.attempted,
            self.errors,
            self.failures.clone(),
            &self.latencies,
            self.duration,
        )
    }
}

/// How posts are assigned to authors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostPlan {
    /// `count` posts by uniformly random authors.
    Random {
        /// Total posts.
        count: usize,
    },
    /// `per_user` posts by each author, user-major.
    PerUser {
        /// Posts per author.
        per_user: usize,
    },
}

impl PostPlan {
    const fn is_empty(self) -> bool {
        match self {
            Self::Random { count } => count == 0,
            Self::PerUser { per_user } => per_user == 0,
        }
    }
}

/// Settings for one run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Users to register.
    pub users: usize,
    /// Registered users that author posts and replies.
    pub active_users: usize,
    /// Post assignment.
    pub posts: PostPlan,
    /// Replies per post.
    pub replies: ReplyRange,
    /// Log every registered user in.
    pub login: bool,
    /// Run ordering verification.
    pub verify: bool,
    /// Failure policy.
    pub failure_mode: FailureMode,
    /// List page size (server default when `None`).
    pub page_size: Option<u32>,
    /// Reply lists checked during verification.
    pub reply_list_checks: usize,
    /// Failures sampled per stage.
    pub failure_sample_limit: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            users: 0,
            active_users: 0,
            posts: PostPlan::Random { count: 0 },
            replies: ReplyRange::exactly(0),
            login: false,
            verify: false,
            failure_mode: FailureMode::CountAndContinue,
            page_size: None,
            reply_list_checks: 10,
            failure_sample_limit: 10,
        }
    }
}

impl RunSettings {
    /// Derives run settings from a validated profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the reply range is inverted.
    #[allow(clippy::cast_possible_truncation)] // Counts are bounded by memory anyway.
    pub fn from_config(config: &DriverConfig) -> hoyobar_core::Result<Self> {
        let posts = if config.load.posts_per_user > 0 {
            PostPlan::PerUser {
                per_user: config.load.posts_per_user as usize,
            }
        } else {
            PostPlan::Random {
                count: config.load.posts as usize,
            }
        };
        Ok(Self {
            users: config.load.users as usize,
            active_users: config.load.active_users as usize,
            posts,
            replies: config.reply_range()?,
            login: config.run.login,
            verify: config.run.verify,
            failure_mode: config.run.failure_mode,
            page_size: config.run.page_size,
            reply_list_checks: config.run.reply_list_checks,
            failure_sample_limit: config.run.failure_sample_limit,
        })
    }
}

/// Sequences stages against one executor.
#[derive(Debug)]
pub struct Orchestrator<E, P = SyntheticPayloads> {
    executor: E,
    generator: TaskGenerator<P>,
    dispatcher: Dispatcher,
    ledger: CreationLedger,
    settings: RunSettings,
    progress: bool,
}

/// Per-stage progress bar; `err{n}` counts failed requests.
#[allow(clippy::cast_possible_truncation)] // usize fits in u64.
fn stage_progress(stage: Stage, requests: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(requests as u64);
    if let Ok(style) =
        ProgressStyle::default_bar().template("{prefix:>12} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
    {
        bar.set_style(style.progress_chars("##-"));
    }
    bar.set_prefix(stage.to_string());
    bar.set_message("err0");
    bar
}

impl<E: ApiExecutor> Orchestrator<E> {
    /// Builds an orchestrator for `config`, validating it first.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the profile is invalid.
    pub fn from_config(executor: E, config: &DriverConfig) -> Result<Self, WorkloadError> {
        let limits = Limits::default();
        config.validate(&limits)?;
        let generator = TaskGenerator::new(config.load.seed);
        let dispatcher = config.to_dispatcher(&limits)?;
        let settings = RunSettings::from_config(config)?;
        Ok(Self::new(executor, generator, dispatcher, settings))
    }
}

impl<E: ApiExecutor, P: PayloadSource> Orchestrator<E, P> {
    /// Creates an orchestrator from its parts.
    #[must_use]
    pub fn new(executor: E, generator: TaskGenerator<P>, dispatcher: Dispatcher, settings: RunSettings) -> Self {
        Self {
            executor,
            generator,
            dispatcher,
            ledger: CreationLedger::new(),
            settings,
            progress: false,
        }
    }

    /// Shows a progress bar per stage on stderr.
    #[must_use]
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    /// The executor.
    pub const fn executor(&self) -> &E {
        &self.executor
    }

    /// The dispatcher.
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The creation ledger.
    pub const fn ledger(&self) -> &CreationLedger {
        &self.ledger
    }

    /// The run settings.
    pub const fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Dispatcher for order-sensitive stages: serial when verifying.
    fn ordered_dispatcher(&self) -> Dispatcher {
        if self.settings.verify {
            self.dispatcher.with_concurrency(1)
        } else {
            self.dispatcher.clone()
        }
    }

    /// Dispatches `descriptors` and collects decoded successes in slot order.
    #[allow(clippy::cast_possible_truncation)] // Elapsed stage time fits in u64 microseconds.
    async fn run_stage<T: DeserializeOwned>(
        &self,
        dispatcher: &Dispatcher,
        stage: Stage,
        descriptors: &[RequestDescriptor],
    ) -> Result<StageResult<T>, WorkloadError> {
        let started = Instant::now();
        let mut latencies = latency_histogram();
        let mut records: Vec<Option<T>> = descriptors.iter().map(|_| None).collect();
        let mut errors = 0;
        let mut failures = Vec::new();

        info!(stage = %stage, requests = descriptors.len(), concurrency = dispatcher.concurrency(), "Stage starting");

        let bar = stage_progress(stage, descriptors.len(), self.progress);
        let mut completions = pin!(dispatcher.dispatch(&self.executor, descriptors));
        while let Some(completion) = completions.next().await {
            bar.inc(1);
            latencies.saturating_record(completion.latency_us.max(1));
            let Some(descriptor) = descriptors.get(completion.slot) else {
                continue;
            };

            match completion.outcome {
                Outcome::Success(body) => {
                    let record = descriptor
                        .merge_response::<T>(&body)
                        .map_err(|e| WorkloadError::Malformed {
                            stage,
                            slot: completion.slot,
                            message: e.to_string(),
                        })?;
                    records[completion.slot] = Some(record);
                }
                Outcome::Failure(failure) => {
                    errors += 1;
                    bar.set_message(format!("err{errors}"));
                    if self.settings.failure_mode == FailureMode::FailFast {
                        bar.abandon();
                        warn!(stage = %stage, slot = completion.slot, cause = %failure, "Aborting stage");
                        return Err(WorkloadError::StageAborted {
                            stage,
                            request: descriptor.summary(),
                            cause: failure,
                        });
                    }
                    if failures.len() < self.settings.failure_sample_limit {
                        warn!(
                            stage = %stage,
                            slot = completion.slot,
                            request = %descriptor.summary(),
                            cause = %failure,
                            "Request failed"
                        );
                        failures.push(FailureSample {
                            slot: completion.slot,
                            request: descriptor.summary(),
                            failure,
                        });
                    } else {
                        debug!(stage = %stage, slot = completion.slot, cause = %failure, "Request failed");
                    }
                }
            }
        }

        bar.finish();

        let mut slots = Vec::with_capacity(descriptors.len() - errors);
        let mut successes = Vec::with_capacity(descriptors.len() - errors);
        for (slot, record) in records.into_iter().enumerate() {
            if let Some(record) = record {
                slots.push(slot);
                successes.push(record);
            }
        }

        let result = StageResult {
            stage,
            attempted: descriptors.len(),
            successes,
            errors,
            failures,
            latencies,
            duration: started.elapsed(),
            slots,
        };
        info!(
            stage = %stage,
            attempted = result.attempted,
            succeeded = result.successes.len(),
            failed = result.errors,
            duration_ms = result.duration.as_millis() as u64,
            "Stage complete"
        );
        Ok(result)
    }

    /// Registers `count` users. Returns `count - failures` records.
    ///
    /// # Errors
    ///
    /// Returns an error on a duplicate username, a malformed response, or a
    /// failure in fail-fast mode.
    pub async fn register_users(&mut self, count: usize) -> Result<StageResult<UserRecord>, WorkloadError> {
        let descriptors = self.generator.register(count)?;
        self.run_stage(&self.dispatcher, Stage::Register, &descriptors).await
    }

    /// Logs every user in and checks the response against the registration.
    ///
    /// # Errors
    ///
    /// Returns `Verification(LoginMismatch)` if a response disagrees, in
    /// addition to the errors of [`Self::register_users`].
    pub async fn login_users(&mut self, users: &[UserRecord]) -> Result<StageResult<UserRecord>, WorkloadError> {
        let descriptors = self.generator.login(users)?;
        let result = self.run_stage(&self.dispatcher, Stage::Login, &descriptors).await?;
        for (slot, logged_in) in result.with_slots() {
            if let Some(registered) = users.get(slot) {
                verify_login(registered, logged_in)?;
            }
        }
        Ok(result)
    }

    /// Creates posts authored by `users` per the configured plan.
    ///
    /// Runs serially when verifying so server order equals client order.
    ///
    /// # Errors
    ///
    /// Returns `NoAuthors` if posts are planned but `users` is empty.
    pub async fn create_posts(&mut self, users: &[UserRecord]) -> Result<StageResult<PostRecord>, WorkloadError> {
        if users.is_empty() && !self.settings.posts.is_empty() {
            return Err(WorkloadError::NoAuthors {
                stage: Stage::CreatePost,
            });
        }
        let descriptors = match self.settings.posts {
            PostPlan::Random { count } => self.generator.create_posts(users, count)?,
            PostPlan::PerUser { per_user } => self.generator.create_posts_per_user(users, per_user),
        };

        let reservation = self.ledger.reserve_posts(descriptors.len());
        let dispatcher = self.ordered_dispatcher();
        let result = self.run_stage::<PostRecord>(&dispatcher, Stage::CreatePost, &descriptors).await?;
        for (slot, post) in result.with_slots() {
            self.ledger.fill_post(reservation, slot, post.clone());
        }
        Ok(result)
    }

    /// Replies to `posts` with authors drawn from `users`.
    ///
    /// # Errors
    ///
    /// Returns `NoAuthors` if replies are planned but `users` is empty.
    pub async fn reply_to_posts(
        &mut self,
        posts: &[PostRecord],
        users: &[UserRecord],
    ) -> Result<StageResult<ReplyRecord>, WorkloadError> {
        if users.is_empty() && !posts.is_empty() && self.settings.replies.max() > 0 {
            return Err(WorkloadError::NoAuthors { stage: Stage::Reply });
        }
        let descriptors = self.generator.reply(posts, users, self.settings.replies)?;

        let reservation = self.ledger.reserve_replies(descriptors.len());
        let dispatcher = self.ordered_dispatcher();
        let result = self.run_stage::<ReplyRecord>(&dispatcher, Stage::Reply, &descriptors).await?;
        for (slot, reply) in result.with_slots() {
            self.ledger.fill_reply(reservation, slot, reply.clone());
        }
        Ok(result)
    }

    /// Runs the ordering checks against the ledger.
    ///
    /// 1. Post list by creation time.
    /// 2. Reply lists of up to `reply_list_checks` posts.
    /// 3. Reply to the oldest post, then expect it first by reply time.
    ///
    /// # Errors
    ///
    /// Returns the first violation, or `StageAborted` if the designated reply
    /// cannot be created.
    pub async fn verify(&mut self, users: &[UserRecord]) -> Result<VerificationSummary, WorkloadError> {
        let timeout = self.dispatcher.request_timeout();
        let page_size = self.settings.page_size;
        let mut summary = VerificationSummary::default();

        let expected_posts = self.ledger.expected_posts_most_recent_first();
        let mut fetcher = PostListFetcher::new(&self.executor, ListOrder::CreateTime, page_size, timeout);
        let report = verify_ordering(&expected_posts, &mut fetcher).await?;
        info!(list = %report.list, records = report.records, pages = report.pages, "Ordering verified");
        summary.checks.push(report);

        for post_id in self
            .ledger
            .posts_with_replies()
            .into_iter()
            .take(self.settings.reply_list_checks)
        {
            let expected = self.ledger.expected_replies_most_recent_first(post_id);
            let mut fetcher = ReplyListFetcher::new(&self.executor, post_id, page_size, timeout);
            let report = verify_ordering(&expected, &mut fetcher).await?;
            debug!(list = %report.list, records = report.records, "Ordering verified");
            summary.checks.push(report);
        }

        if let (Some(oldest), Some(author)) = (self.ledger.oldest_post().cloned(), users.first()) {
            let post_id = self.reply_once(&oldest, author).await?;
            verify_reply_recency(&self.executor, post_id, page_size, timeout).await?;
            info!(post = %post_id, "Reply recency verified");
            summary.reply_recency = Some(post_id);
        }

        Ok(summary)
    }

    async fn reply_once(&mut self, post: &PostRecord, author: &UserRecord) -> Result<PostId, WorkloadError> {
        let descriptor = self.generator.reply_once(post, author);
        let reservation = self.ledger.reserve_replies(1);
        let serial = self.dispatcher.with_concurrency(1);
        let result = self
            .run_stage::<ReplyRecord>(&serial, Stage::Reply, std::slice::from_ref(&descriptor))
            .await?;

        match (result.successes.into_iter().next(), result.failures.into_iter().next()) {
            (Some(reply), _) => {
                self.ledger.fill_reply(reservation, 0, reply);
                Ok(post.post_id)
            }
            (None, Some(sample)) => Err(WorkloadError::StageAborted {
                stage: Stage::Reply,
                request: sample.request,
                cause: sample.failure,
            }),
            (None, None) => Err(WorkloadError::StageAborted {
                stage: Stage::Reply,
                request: descriptor.summary(),
                cause: Failure {
                    kind: FailureKind::Application,
                    message: "reply was not created".to_string(),
                },
            }),
        }
    }

    /// Runs every configured stage and returns the summary.
    ///
    /// # Errors
    ///
    /// Returns configuration errors before any request, and verification
    /// violations as soon as they are found.
    #[allow(clippy::cast_possible_truncation)] // duration_ms won't overflow u64.
    pub async fn run(&mut self) -> Result<RunSummary, WorkloadError> {
        let start = Instant::now();
        let mut summary = RunSummary::default();

        let registered = self.register_users(self.settings.users).await?;
        summary.stages.push(registered.report());

        let available = registered.successes.len();
        if available < self.settings.active_users {
            warn!(
                configured = self.settings.active_users,
                available, "Fewer users registered than configured active users"
            );
            summary.shortfall = Some(Shortfall {
                configured: self.settings.active_users,
                available,
            });
        }

        if self.settings.login {
            let logged_in = self.login_users(&registered.successes).await?;
            summary.stages.push(logged_in.report());
        }

        let active = &registered.successes[..available.min(self.settings.active_users)];
        let posts = self.create_posts(active).await?;
        summary.stages.push(posts.report());

        let replies = self.reply_to_posts(&posts.successes, active).await?;
        summary.stages.push(replies.report());

        if self.settings.verify {
            summary.verification = Some(self.verify(active).await?);
        }

        summary.progress = self.dispatcher.counters().snapshot();
        summary.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            failed = summary.total_failed(),
            duration_ms = summary.duration_ms,
            "Run complete"
        );
        Ok(summary)
    }
}
