//! Worker execution: a fixed pool of executors draining a shared job
//! queue.
//!
//! Workers are fully independent. The only shared state is the queue
//! cursor (an atomic) and the cancellation token; sessions and per-job
//! state are worker-exclusive, so a slow retry sequence on one worker
//! never blocks another.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use mailfleet_common::{
    CancelToken,
    tracing::{debug, info},
};
use tokio::sync::mpsc;

use crate::{
    config::DispatchConfig,
    connection::ConnectionManager,
    job::Job,
    report::{JobOutcome, JobResult},
    retry::send_with_retry,
};

/// Order-preserving shared job source. Jobs are claimed with an atomic
/// cursor; a claimed job belongs to exactly one worker.
#[derive(Debug, Clone)]
pub(crate) struct JobQueue {
    jobs: Arc<Vec<Job>>,
    next: Arc<AtomicUsize>,
}

impl JobQueue {
    pub(crate) fn new(jobs: Vec<Job>) -> Self {
        Self {
            jobs: Arc::new(jobs),
            next: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Claim the next unprocessed job, or `None` once the queue is
    /// drained.
    fn claim(&self) -> Option<&Job> {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        self.jobs.get(index)
    }
}

/// One worker: claims jobs until the queue is empty, processing each to
/// completion before taking the next.
///
/// After cancellation the worker keeps draining the queue, but only to
/// mark the remaining jobs interrupted, so every submitted job produces
/// exactly one result. The worker's session is closed on the way out
/// whatever happened.
pub(crate) async fn run_worker(
    worker_id: usize,
    queue: JobQueue,
    config: Arc<DispatchConfig>,
    cancel: CancelToken,
    results: mpsc::UnboundedSender<JobResult>,
) {
    let total = queue.len();
    let mut manager = ConnectionManager::new(Arc::clone(&config), cancel.clone(), worker_id);

    while let Some(job) = queue.claim() {
        let result = if cancel.is_cancelled() {
            debug!(
                worker = worker_id,
                recipient = job.recipient(),
                "Cancellation requested; job not started"
            );
            JobResult::interrupted(job.sequence_index(), Duration::ZERO)
        } else {
            send_with_retry(job, &mut manager, &config, &cancel, worker_id).await
        };

        log_progress(job, &result, total);

        if results.send(result).is_err() {
            // Receiver gone; nothing left to report to
            break;
        }
    }

    manager.disconnect().await;
    debug!(worker = worker_id, "Worker finished");
}

fn log_progress(job: &Job, result: &JobResult, total: usize) {
    let outcome = match result.outcome() {
        JobOutcome::Sent => "sent",
        JobOutcome::Failed(_) => "failed",
        JobOutcome::Interrupted => "interrupted",
    };

    info!(
        "[{}/{}] {} {} | attachments={} | time={:.2}s",
        job.sequence_index() + 1,
        total,
        outcome,
        job.recipient(),
        job.attachment_paths().len(),
        result.elapsed().as_secs_f64()
    );
}
