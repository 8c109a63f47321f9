//! Result aggregation and reporting.
//!
//! Workers complete asynchronously, so results arrive in no particular
//! order; aggregation restores input order, computes summary
//! statistics, and builds the failure manifest: the original input
//! rows of failed jobs only, in input shape, so a follow-up run can
//! target exactly the remainder.

use std::time::Duration;

use ahash::AHashSet;
use chrono::{DateTime, Utc};
use mailfleet_common::tracing::info;
use serde::Serialize;

use crate::error::SendError;
use crate::job::SourceRow;

/// Final disposition of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum JobOutcome {
    /// The message was accepted by the relay.
    Sent,
    /// Every attempt failed; the detail describes the last error.
    Failed(String),
    /// Cancellation stopped the job before it could complete. Distinct
    /// from failure: nothing was wrong with the job itself.
    Interrupted,
}

/// The outcome of one job, produced exactly once per dispatched job.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    sequence_index: usize,
    outcome: JobOutcome,
    elapsed: Duration,
}

impl JobResult {
    pub(crate) fn sent(sequence_index: usize, elapsed: Duration) -> Self {
        Self {
            sequence_index,
            outcome: JobOutcome::Sent,
            elapsed,
        }
    }

    pub(crate) fn failed(sequence_index: usize, elapsed: Duration, error: &SendError) -> Self {
        Self {
            sequence_index,
            outcome: JobOutcome::Failed(error.to_string()),
            elapsed,
        }
    }

    pub(crate) fn interrupted(sequence_index: usize, elapsed: Duration) -> Self {
        Self {
            sequence_index,
            outcome: JobOutcome::Interrupted,
            elapsed,
        }
    }

    /// The job's stable ordinal from the original input.
    #[must_use]
    pub const fn sequence_index(&self) -> usize {
        self.sequence_index
    }

    #[must_use]
    pub const fn outcome(&self) -> &JobOutcome {
        &self.outcome
    }

    #[must_use]
    pub const fn is_sent(&self) -> bool {
        matches!(self.outcome, JobOutcome::Sent)
    }

    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self.outcome, JobOutcome::Interrupted)
    }

    /// Wall-clock time from first attempt to final outcome.
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// Aggregate statistics for one run.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub interrupted: usize,
    /// Wall-clock duration of the whole run.
    pub total_elapsed: Duration,
    /// Mean per-job time over successful sends.
    pub average_send_time: Duration,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Everything a run produces: summary, per-job results in input order,
/// and the re-submittable manifest of failed rows.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub summary: DispatchSummary,
    pub results: Vec<JobResult>,
    /// Original input rows of failed jobs only, in input order. Empty
    /// when nothing failed.
    pub manifest: Vec<SourceRow>,
}

impl DispatchReport {
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.summary.failed > 0
    }

    /// Emit the run summary as log events.
    pub fn log_summary(&self) {
        let summary = &self.summary;
        info!(
            "Summary: total time {:.2}s | average per email {:.2}s",
            summary.total_elapsed.as_secs_f64(),
            summary.average_send_time.as_secs_f64()
        );
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            interrupted = summary.interrupted,
            "Dispatch complete"
        );
        if !self.manifest.is_empty() {
            info!(
                rows = self.manifest.len(),
                "Failed rows recorded for re-submission"
            );
        }
    }
}

/// Assemble the final report from the unordered result stream.
pub(crate) fn build_report(
    mut results: Vec<JobResult>,
    rows: &[SourceRow],
    started_at: DateTime<Utc>,
    total_elapsed: Duration,
) -> DispatchReport {
    results.sort_by_key(JobResult::sequence_index);

    let total = results.len();
    let succeeded = results.iter().filter(|r| r.is_sent()).count();
    let interrupted = results.iter().filter(|r| r.is_interrupted()).count();
    let failed = total - succeeded - interrupted;

    let success_time: Duration = results
        .iter()
        .filter(|r| r.is_sent())
        .map(JobResult::elapsed)
        .sum();
    let average_send_time = if succeeded > 0 {
        success_time / u32::try_from(succeeded).unwrap_or(u32::MAX)
    } else {
        Duration::ZERO
    };

    let failed_indices: AHashSet<usize> = results
        .iter()
        .filter(|r| matches!(r.outcome(), JobOutcome::Failed(_)))
        .map(JobResult::sequence_index)
        .collect();
    let manifest = rows
        .iter()
        .filter(|row| failed_indices.contains(&row.index))
        .cloned()
        .collect();

    DispatchReport {
        summary: DispatchSummary {
            total,
            succeeded,
            failed,
            interrupted,
            total_elapsed,
            average_send_time,
            started_at,
            finished_at: Utc::now(),
        },
        results,
        manifest,
    }
}
