//! Batch dispatch orchestration.

use std::{path::Path, sync::Arc, time::Instant};

use chrono::Utc;
use mailfleet_common::{
    CancelToken, internal,
    tracing::{error, info},
};
use tokio::{sync::mpsc, task::JoinSet};

use crate::{
    config::DispatchConfig,
    connection::ConnectionManager,
    error::DispatchError,
    job::{MessageTemplate, SourceRow, prepare_jobs},
    report::{DispatchReport, build_report},
    validate::validate_attachments,
    worker::{JobQueue, run_worker},
};

/// Runs batches of email jobs against a configured relay.
///
/// One dispatcher holds one validated configuration and one
/// cancellation token. Obtain the token with [`Self::cancel_token`] and
/// hand it to whatever translates operator interrupts (the embedding
/// CLI's signal handler, typically); the dispatcher itself never
/// touches process signals.
#[derive(Debug)]
pub struct Dispatcher {
    config: Arc<DispatchConfig>,
    cancel: CancelToken,
}

impl Dispatcher {
    /// Create a dispatcher, validating the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Config`] for missing or contradictory
    /// settings.
    pub fn new(config: DispatchConfig) -> Result<Self, DispatchError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            cancel: CancelToken::new(),
        })
    }

    /// The shared cancellation token observed by every worker.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Dispatch one batch: prepare jobs from `rows`, validate every
    /// referenced attachment under `attachment_dir`, then send one
    /// message per job through the worker pool.
    ///
    /// Returns only when every job has a final outcome (sent, failed,
    /// or interrupted). Per-job failures never abort the batch; they
    /// are reported through the returned [`DispatchReport`] and its
    /// manifest.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] for fatal problems that abort the
    /// run before any send: unusable input, failed attachment
    /// validation, or an unreachable relay.
    pub async fn run(
        &self,
        rows: Vec<SourceRow>,
        attachment_dir: &Path,
        template: &MessageTemplate,
    ) -> Result<DispatchReport, DispatchError> {
        let started_at = Utc::now();
        let run_started = Instant::now();

        if !attachment_dir.is_dir() {
            return Err(DispatchError::Config(format!(
                "Attachment directory does not exist: {}",
                attachment_dir.display()
            )));
        }

        let jobs = prepare_jobs(&rows, attachment_dir, template, &self.config.bcc_recipients);
        if jobs.is_empty() {
            return Err(DispatchError::Config(
                "No rows with a usable recipient address".into(),
            ));
        }

        let total = jobs.len();
        let total_attachments: usize = jobs.iter().map(|job| job.attachment_paths().len()).sum();
        info!(
            total,
            attachments = total_attachments,
            server = %self.config.address(),
            from = self.config.sender(),
            workers = self.config.max_workers,
            encryption = self.config.use_encryption,
            authentication = self.config.use_authentication,
            "Starting dispatch"
        );
        if self.config.test_mode {
            internal!(level = INFO, "Test mode enabled: no emails will be sent");
        }

        match validate_attachments(&jobs, self.config.attachment_kind) {
            Ok(valid) if valid.is_empty() => {}
            Ok(valid) => info!(files = valid.len(), "All referenced attachments validated"),
            Err(failures) => {
                for failure in &failures {
                    error!("Invalid attachment: {failure}");
                }
                return Err(DispatchError::Validation(failures));
            }
        }

        // Surface an unreachable relay or rejected credentials as one
        // fatal error before any worker starts
        if !self.config.test_mode {
            self.preflight().await?;
        }

        let queue = JobQueue::new(jobs);
        let (results_tx, mut results_rx) = mpsc::unbounded_channel();

        let worker_count = self.config.max_workers.min(total);
        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            workers.spawn(run_worker(
                worker_id,
                queue.clone(),
                Arc::clone(&self.config),
                self.cancel.clone(),
                results_tx.clone(),
            ));
        }
        // Workers hold the only remaining senders; the stream ends when
        // the last one finishes
        drop(results_tx);

        let mut results = Vec::with_capacity(total);
        while let Some(result) = results_rx.recv().await {
            results.push(result);
        }
        while workers.join_next().await.is_some() {}

        if self.cancel.is_cancelled() {
            internal!(level = INFO, "Dispatch interrupted; remaining jobs were not started");
        }

        let report = build_report(results, &rows, started_at, run_started.elapsed());
        report.log_summary();
        Ok(report)
    }

    /// One full handshake and QUIT to prove the relay is reachable and
    /// the credentials are accepted.
    async fn preflight(&self) -> Result<(), DispatchError> {
        let mut manager =
            ConnectionManager::new(Arc::clone(&self.config), self.cancel.clone(), 0);
        manager.acquire(false).await?;
        manager.disconnect().await;
        Ok(())
    }
}
