//! Bounded-concurrency dispatch.
//!
//! A descriptor sequence is cut into contiguous batches. Batches run strictly
//! one after another; inside a batch at most `concurrency` requests are in
//! flight. Completions are yielded lazily, in completion order, each tagged
//! with the slot of the descriptor that produced it.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future;
use futures::stream::{self, Stream, StreamExt};
use tracing::{debug, info};

use hoyobar_core::{Limits, Result};

use crate::descriptor::{Completion, Failure, FailureKind, Outcome, RequestDescriptor};
use crate::executor::ApiExecutor;

/// Splits `len` items into contiguous ranges of `batch_size`.
///
/// The last range holds the remainder. No range is empty and the ranges cover
/// `0..len` exactly. A `batch_size` of zero is treated as one.
#[must_use]
pub fn partition_batches(len: usize, batch_size: usize) -> Vec<Range<usize>> {
    let batch_size = batch_size.max(1);
    (0..len)
        .step_by(batch_size)
        .map(|start| start..(start + batch_size).min(len))
        .collect()
}

/// Shared dispatch counters, readable at any time.
///
/// Counters accumulate across every dispatch that shares them; a progress
/// line with the running totals is logged after each batch.
#[derive(Debug, Default)]
pub struct DispatchCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    in_flight: AtomicU64,
    peak_in_flight: AtomicU64,
}

/// Point-in-time copy of [`DispatchCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchProgress {
    /// Requests started.
    pub submitted: u64,
    /// Requests finished (success or failure).
    pub completed: u64,
    /// Requests finished with a failure.
    pub failed: u64,
    /// Requests currently in flight.
    pub in_flight: u64,
    /// Highest in-flight count observed.
    pub peak_in_flight: u64,
}

impl DispatchCounters {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> DispatchProgress {
        DispatchProgress {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            peak_in_flight: self.peak_in_flight.load(Ordering::Relaxed),
        }
    }

    fn begin(&self) -> InFlight<'_> {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        let now = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::Relaxed);
        InFlight { counters: self }
    }
}

/// Decrements the in-flight count when the request future finishes or is
/// dropped.
struct InFlight<'a> {
    counters: &'a DispatchCounters,
}

impl InFlight<'_> {
    fn finish(self, success: bool) {
        self.counters.completed.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Issues descriptor sequences with a concurrency ceiling.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    concurrency: usize,
    batch_size: usize,
    request_timeout: Duration,
    counters: Arc<DispatchCounters>,
}

impl Dispatcher {
    /// Creates a dispatcher validated against default limits.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is zero or above its limit.
    pub fn new(concurrency: usize, batch_size: usize, request_timeout: Duration) -> Result<Self> {
        Self::with_limits(concurrency, batch_size, request_timeout, &Limits::default())
    }

    /// Creates a dispatcher validated against `limits`.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is zero or above its limit.
    #[allow(clippy::cast_possible_truncation)] // Timeouts are bounded by max_timeout_us.
    pub fn with_limits(
        concurrency: usize,
        batch_size: usize,
        request_timeout: Duration,
        limits: &Limits,
    ) -> Result<Self> {
        limits.check_concurrency(concurrency as u64)?;
        limits.check_batch_size(batch_size as u64)?;
        limits.check_timeout_us(request_timeout.as_micros() as u64)?;
        Ok(Self {
            concurrency,
            batch_size,
            request_timeout,
            counters: Arc::new(DispatchCounters::new()),
        })
    }

    /// Returns a dispatcher with a different ceiling sharing these counters.
    #[must_use]
    pub fn with_concurrency(&self, concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            ..self.clone()
        }
    }

    /// Concurrency ceiling.
    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Batch size.
    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Shared counters.
    #[must_use]
    pub fn counters(&self) -> Arc<DispatchCounters> {
        Arc::clone(&self.counters)
    }

    /// Dispatches `descriptors`, yielding one completion per descriptor.
    ///
    /// A completion's slot is the position of its descriptor in
    /// `descriptors`. Batch `i + 1` starts only after every request of batch `i` finished.
    /// Failures never stop a batch. Dropping the stream cancels in-flight
    /// requests.
    pub fn dispatch<'a, E: ApiExecutor>(
        &'a self,
        executor: &'a E,
        descriptors: &'a [RequestDescriptor],
    ) -> impl Stream<Item = Completion> + 'a {
        let batches = partition_batches(descriptors.len(), self.batch_size);
        let total = batches.len();

        stream::iter(batches.into_iter().enumerate()).flat_map(move |(index, range)| {
            debug!(
                batch = index + 1,
                batches = total,
                size = range.len(),
                concurrency = self.concurrency,
                "Dispatching batch"
            );
            let batch = &descriptors[range.clone()];
            let requests = stream::iter(range.zip(batch))
                .map(move |(slot, descriptor)| self.execute_one(executor, slot, descriptor))
                .buffer_unordered(self.concurrency);

            // Runs once the batch is drained; yields nothing.
            let batch_done = stream::once(async move {
                let progress = self.counters.snapshot();
                info!(
                    batch = index + 1,
                    batches = total,
                    completed = progress.completed,
                    failed = progress.failed,
                    "Batch complete"
                );
            })
            .filter_map(|()| future::ready(None::<Completion>));

            requests.chain(batch_done)
        })
    }

    async fn execute_one<E: ApiExecutor>(
        &self,
        executor: &E,
        slot: usize,
        descriptor: &RequestDescriptor,
    ) -> Completion {
        let in_flight = self.counters.begin();
        let started = executor.now();

        let result = tokio::time::timeout(self.request_timeout, executor.execute(descriptor)).await;
        let outcome = match result {
            Ok(Ok(body)) => Outcome::Success(body),
            Ok(Err(err)) => Outcome::Failure(Failure {
                kind: err.kind(),
                message: err.to_string(),
            }),
            Err(_) => Outcome::Failure(Failure {
                kind: FailureKind::Timeout,
                message: format!("timed out after {:?}", self.request_timeout),
            }),
        };

        let latency_us = executor.now().saturating_sub(started);
        in_flight.finish(outcome.is_success());

        Completion {
            slot,
            stage: descriptor.stage(),
            outcome,
            latency_us,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_even() {
        assert_eq!(partition_batches(6, 3), vec![0..3, 3..6]);
    }

    #[test]
    fn test_partition_remainder() {
        let batches = partition_batches(10_001, 10_000);
        assert_eq!(batches, vec![0..10_000, 10_000..10_001]);
    }

    #[test]
    fn test_partition_small_and_empty() {
        assert_eq!(partition_batches(2, 5), vec![0..2]);
        assert!(partition_batches(0, 5).is_empty());
        assert_eq!(partition_batches(3, 0).len(), 3);
    }

    #[test]
    fn test_partition_covers_input_exactly() {
        for len in 0..50 {
            for batch_size in 1..12 {
                let batches = partition_batches(len, batch_size);
                assert_eq!(batches.len(), len.div_ceil(batch_size));
                let mut next = 0;
                for range in &batches {
                    assert_eq!(range.start, next);
                    assert!(!range.is_empty());
                    assert!(range.len() <= batch_size);
                    next = range.end;
                }
                assert_eq!(next, len);
            }
        }
    }

    #[test]
    fn test_dispatcher_validates_parameters() {
        let timeout = Duration::from_secs(1);
        assert!(Dispatcher::new(0, 10, timeout).is_err());
        assert!(Dispatcher::new(10, 0, timeout).is_err());
        assert!(Dispatcher::new(10, 10, Duration::ZERO).is_err());
        assert!(Dispatcher::new(500, 10_000, timeout).is_ok());
    }

    #[test]
    fn test_with_concurrency_shares_counters() {
        let dispatcher = Dispatcher::new(8, 16, Duration::from_secs(1)).unwrap();
        let serial = dispatcher.with_concurrency(1);
        assert_eq!(serial.concurrency(), 1);
        assert!(Arc::ptr_eq(&dispatcher.counters(), &serial.counters()));
    }

    #[test]
    fn test_counters_track_peak() {
        let counters = DispatchCounters::new();
        let a = counters.begin();
        let b = counters.begin();
        assert_eq!(counters.snapshot().in_flight, 2);
        a.finish(true);
        b.finish(false);
        let progress = counters.snapshot();
        assert_eq!(progress.in_flight, 0);
        assert_eq!(progress.peak_in_flight, 2);
        assert_eq!(progress.completed, 2);
        assert_eq!(progress.failed, 1);
        assert_eq!(progress.submitted, 2);
    }
}
