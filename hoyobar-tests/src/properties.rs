//! Property checkers for workload runs.
//!
//! Properties are laws a run must satisfy whatever the seed, sizes or faults:
//! batches tile the input, every descriptor completes exactly once, the
//! concurrency ceiling is never exceeded, and created counts add up.

use std::fmt;
use std::ops::Range;

use hoyobar_workload::{Completion, StageReport};

// ============================================================================
// Property Violation Types
// ============================================================================

/// A violated workload property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyViolation {
    /// Batches do not cover the input contiguously.
    BatchGap {
        /// Index of the offending batch.
        batch: usize,
        /// Where the batch was expected to start.
        expected_start: usize,
        /// The batch found there.
        actual: Range<usize>,
    },
    /// A batch other than the last is not full, or any batch is empty.
    BatchSize {
        /// Index of the offending batch.
        batch: usize,
        /// Its length.
        len: usize,
    },
    /// Batches end before the input does.
    BatchShort {
        /// Input length.
        len: usize,
        /// End of the last batch.
        covered: usize,
    },
    /// A slot completed zero or several times.
    SlotCompletions {
        /// The slot.
        slot: usize,
        /// How often it completed.
        count: usize,
    },
    /// A completion names a slot outside the input.
    SlotOutOfRange {
        /// The slot.
        slot: usize,
        /// Input length.
        len: usize,
    },
    /// More requests in flight than allowed.
    ConcurrencyExceeded {
        /// Observed peak.
        peak: u64,
        /// Configured ceiling.
        limit: u64,
    },
    /// Successes and failures do not add up to attempts.
    CountsInconsistent {
        /// Stage name.
        stage: &'static str,
        /// Attempted requests.
        attempted: usize,
        /// Succeeded plus failed.
        accounted: usize,
    },
}

impl fmt::Display for PropertyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BatchGap {
                batch,
                expected_start,
                actual,
            } => write!(f, "Batch {batch} is {actual:?}, expected it to start at {expected_start}"),
            Self::BatchSize { batch, len } => write!(f, "Batch {batch} has unexpected length {len}"),
            Self::BatchShort { len, covered } => write!(f, "Batches cover {covered} of {len} items"),
            Self::SlotCompletions { slot, count } => write!(f, "Slot {slot} completed {count} times"),
            Self::SlotOutOfRange { slot, len } => write!(f, "Slot {slot} outside 0..{len}"),
            Self::ConcurrencyExceeded { peak, limit } => {
                write!(f, "Peak in-flight {peak} exceeds ceiling {limit}")
            }
            Self::CountsInconsistent {
                stage,
                attempted,
                accounted,
            } => write!(f, "Stage {stage}: {attempted} attempted but {accounted} accounted for"),
        }
    }
}

// ============================================================================
// Checkers
// ============================================================================

/// Checks that `batches` tile `0..len` with full batches of `batch_size`
/// except possibly the last.
///
/// # Errors
///
/// Returns the first violation found.
pub fn check_partition(batches: &[Range<usize>], len: usize, batch_size: usize) -> Result<(), PropertyViolation> {
    let mut next = 0;
    for (index, batch) in batches.iter().enumerate() {
        if batch.start != next {
            return Err(PropertyViolation::BatchGap {
                batch: index,
                expected_start: next,
                actual: batch.clone(),
            });
        }
        let is_last = index + 1 == batches.len();
        if batch.is_empty() || batch.len() > batch_size || (!is_last && batch.len() != batch_size) {
            return Err(PropertyViolation::BatchSize {
                batch: index,
                len: batch.len(),
            });
        }
        next = batch.end;
    }
    if next != len {
        return Err(PropertyViolation::BatchShort { len, covered: next });
    }
    Ok(())
}

/// Checks that every slot in `0..len` completed exactly once.
///
/// # Errors
///
/// Returns the first violation found.
pub fn check_exactly_once(completions: &[Completion], len: usize) -> Result<(), PropertyViolation> {
    let mut counts = vec![0_usize; len];
    for completion in completions {
        let count = counts
            .get_mut(completion.slot)
            .ok_or(PropertyViolation::SlotOutOfRange {
                slot: completion.slot,
                len,
            })?;
        *count += 1;
    }
    match counts.iter().position(|&count| count != 1) {
        Some(slot) => Err(PropertyViolation::SlotCompletions {
            slot,
            count: counts[slot],
        }),
        None => Ok(()),
    }
}

/// Checks that `peak` in-flight requests stayed within `limit`.
///
/// # Errors
///
/// Returns `ConcurrencyExceeded` if not.
pub const fn check_concurrency(peak: u64, limit: u64) -> Result<(), PropertyViolation> {
    if peak > limit {
        return Err(PropertyViolation::ConcurrencyExceeded { peak, limit });
    }
    Ok(())
}

/// Checks that a stage report accounts for every attempt.
///
/// # Errors
///
/// Returns `CountsInconsistent` if not.
pub fn check_stage_counts(report: &StageReport) -> Result<(), PropertyViolation> {
    let accounted = report.succeeded + report.failed;
    if accounted != report.attempted {
        return Err(PropertyViolation::CountsInconsistent {
            stage: report.stage.name(),
            attempted: report.attempted,
            accounted,
        });
    }
    Ok(())
}
