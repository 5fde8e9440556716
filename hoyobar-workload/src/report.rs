//! Per-stage and end-of-run reports.

use std::time::Duration;

use hdrhistogram::Histogram;

use hoyobar_core::PostId;

use crate::descriptor::{Failure, Stage};
use crate::dispatcher::DispatchProgress;
use crate::verification::VerifyReport;

/// A sampled failure: which request, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureSample {
    /// Slot of the failed descriptor.
    pub slot: usize,
    /// Descriptor summary, without secrets.
    pub request: String,
    /// What went wrong.
    pub failure: Failure,
}

/// Creates an empty latency histogram (microseconds, 3 significant digits).
///
/// # Panics
///
/// Panics if histogram creation fails (should not happen with valid parameters).
#[must_use]
pub fn latency_histogram() -> Histogram<u64> {
    Histogram::<u64>::new(3).expect("histogram creation")
}

/// Summary of one stage.
#[derive(Debug, Clone)]
pub struct StageReport {
    /// Stage.
    pub stage: Stage,
    /// Requests issued.
    pub attempted: usize,
    /// Requests that succeeded.
    pub succeeded: usize,
    /// Requests that failed.
    pub failed: usize,
    /// Bounded sample of failures.
    pub failures: Vec<FailureSample>,

    /// Latency p50 in milliseconds.
    pub latency_p50: f64,
    /// Latency p95 in milliseconds.
    pub latency_p95: f64,
    /// Latency p99 in milliseconds.
    pub latency_p99: f64,
    /// Latency max in milliseconds.
    pub latency_max: f64,

    /// Throughput in requests per second.
    pub throughput_ops: f64,
    /// Stage duration in milliseconds.
    pub duration_ms: u64,
}

impl StageReport {
    /// Builds a report from raw stage measurements.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    #[allow(clippy::cast_possible_truncation)] // duration_ms won't overflow u64.
    pub fn new(
        stage: Stage,
        attempted: usize,
        failed: usize,
        failures: Vec<FailureSample>,
        latencies: &Histogram<u64>,
        duration: Duration,
    ) -> Self {
        let secs = duration.as_secs_f64();
        let throughput_ops = if secs > 0.0 { attempted as f64 / secs } else { 0.0 };
        Self {
            stage,
            attempted,
            succeeded: attempted.saturating_sub(failed),
            failed,
            failures,
            latency_p50: latencies.value_at_percentile(50.0) as f64 / 1000.0,
            latency_p95: latencies.value_at_percentile(95.0) as f64 / 1000.0,
            latency_p99: latencies.value_at_percentile(99.0) as f64 / 1000.0,
            latency_max: latencies.max() as f64 / 1000.0,
            throughput_ops,
            duration_ms: duration.as_millis() as u64,
        }
    }

    fn print(&self) {
        println!(
            "[{}] {} attempted, {} ok, {} failed in {}ms ({:.0} ops/sec)",
            self.stage, self.attempted, self.succeeded, self.failed, self.duration_ms, self.throughput_ops
        );
        println!(
            "  latency: p50={:.2}ms p95={:.2}ms p99={:.2}ms max={:.2}ms",
            self.latency_p50, self.latency_p95, self.latency_p99, self.latency_max
        );
        for sample in &self.failures {
            println!("  - slot {} {}: {}", sample.slot, sample.request, sample.failure);
        }
        if self.failed > self.failures.len() {
            println!("  ... {} more failures not sampled", self.failed - self.failures.len());
        }
    }
}

/// Active users requested versus users actually registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortfall {
    /// Active users configured.
    pub configured: usize,
    /// Users available after registration.
    pub available: usize,
}

/// Results of the verification stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationSummary {
    /// One report per ordering check that passed.
    pub checks: Vec<VerifyReport>,
    /// Post used for the reply-recency check, if it ran.
    pub reply_recency: Option<PostId>,
}

/// Everything a run produced.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Stage reports, in execution order.
    pub stages: Vec<StageReport>,
    /// Verification results, if verification ran.
    pub verification: Option<VerificationSummary>,
    /// Shortfall of active users, if any.
    pub shortfall: Option<Shortfall>,
    /// Final dispatch counters.
    pub progress: DispatchProgress,
    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl RunSummary {
    /// Total failed requests across stages.
    #[must_use]
    pub fn total_failed(&self) -> usize {
        self.stages.iter().map(|s| s.failed).sum()
    }

    /// Report for `stage`, if it ran.
    #[must_use]
    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Prints a human-readable summary.
    pub fn print_summary(&self) {
        println!("=== Workload Summary ===");
        for stage in &self.stages {
            stage.print();
        }
        if let Some(shortfall) = self.shortfall {
            println!(
                "Active users: {} configured, only {} registered",
                shortfall.configured, shortfall.available
            );
        }
        println!(
            "Requests: {} submitted, {} failed, peak in flight {}",
            self.progress.submitted, self.progress.failed, self.progress.peak_in_flight
        );
        match &self.verification {
            Some(verification) => {
                println!("Verification: passed");
                for check in &verification.checks {
                    println!("  - {}: {} records over {} pages", check.list, check.records, check.pages);
                }
                if let Some(post_id) = verification.reply_recency {
                    println!("  - reply recency: {post_id} listed first");
                }
            }
            None => println!("Verification: skipped"),
        }
        println!("Duration: {}ms", self.duration_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::FailureKind;

    #[test]
    fn test_stage_report_counts_and_percentiles() {
        let mut latencies = latency_histogram();
        for us in [1_000, 2_000, 3_000, 4_000] {
            latencies.record(us).unwrap();
        }
        let report = StageReport::new(
            Stage::Register,
            4,
            1,
            vec![FailureSample {
                slot: 2,
                request: "register#2 {}".to_string(),
                failure: Failure {
                    kind: FailureKind::Application,
                    message: "exists".to_string(),
                },
            }],
            &latencies,
            Duration::from_secs(2),
        );

        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 1);
        assert!((report.throughput_ops - 2.0).abs() < f64::EPSILON);
        assert!(report.latency_max >= 3.9 && report.latency_max <= 4.1);
        assert!(report.latency_p50 >= 1.9 && report.latency_p50 <= 2.1);
    }

    #[test]
    fn test_zero_duration_throughput() {
        let report = StageReport::new(Stage::Reply, 0, 0, Vec::new(), &latency_histogram(), Duration::ZERO);
        assert!(report.throughput_ops.abs() < f64::EPSILON);
        assert_eq!(report.succeeded, 0);
    }

    #[test]
    fn test_run_summary_totals() {
        let histogram = latency_histogram();
        let summary = RunSummary {
            stages: vec![
                StageReport::new(Stage::Register, 10, 2, Vec::new(), &histogram, Duration::from_secs(1)),
                StageReport::new(Stage::CreatePost, 5, 1, Vec::new(), &histogram, Duration::from_secs(1)),
            ],
            ..RunSummary::default()
        };
        assert_eq!(summary.total_failed(), 3);
        assert_eq!(summary.stage(Stage::CreatePost).unwrap().attempted, 5);
        assert!(summary.stage(Stage::Reply).is_none());
    }
}
