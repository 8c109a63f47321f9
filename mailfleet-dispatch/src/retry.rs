//! Bounded retry with exponential backoff and jitter.
//!
//! One call to [`send_with_retry`] takes a job from "ready" to a final
//! [`JobResult`], however many attempts that takes. The loop is
//! iterative and the attempt counter is explicit, so the bound is
//! directly testable.

use std::time::{Duration, Instant};

use mailfleet_common::{
    CancelToken,
    tracing::{error, info, warn},
};
use mailfleet_smtp::MessageBuilder;
use rand::Rng;
use tokio::time::timeout;

use crate::{
    config::{DispatchConfig, RetryBackoff},
    connection::ConnectionManager,
    error::{ConnectError, SendError},
    job::Job,
    report::JobResult,
};

/// Delay before retry number `attempt` (0-indexed):
/// `min(max_delay, base_delay * 2^attempt)` plus a random addend of up
/// to `jitter_ms`.
#[must_use]
pub fn backoff_delay(attempt: u32, policy: &RetryBackoff) -> Duration {
    // Saturate rather than overflow on absurd attempt counts
    let delay_ms = if attempt >= 63 {
        policy.max_delay_ms
    } else {
        policy
            .base_delay_ms
            .saturating_mul(1u64 << attempt)
            .min(policy.max_delay_ms)
    };

    let jitter_ms = if policy.jitter_ms == 0 {
        0
    } else {
        rand::rng().random_range(0..=policy.jitter_ms)
    };

    Duration::from_millis(delay_ms.saturating_add(jitter_ms))
}

/// Dispatch one job, retrying transient failures with backoff.
///
/// The message is built once up front; an attachment that cannot be
/// read fails the job immediately (content errors don't heal on
/// retry). Each failed attempt forces a fresh session on the next one.
/// The cancellation token is checked before every attempt and before
/// every backoff sleep; on cancellation the job is reported as
/// interrupted, not failed. Elapsed time is measured from the first
/// attempt.
pub(crate) async fn send_with_retry(
    job: &Job,
    manager: &mut ConnectionManager,
    config: &DispatchConfig,
    cancel: &CancelToken,
    worker_id: usize,
) -> JobResult {
    let started = Instant::now();
    let sequence_index = job.sequence_index();

    if config.test_mode {
        info!(
            worker = worker_id,
            recipient = job.recipient(),
            from = config.sender(),
            subject = job.subject(),
            attachments = job.attachment_paths().len(),
            bcc = job.bcc().len(),
            "Test mode: would send email"
        );
        return JobResult::sent(sequence_index, started.elapsed());
    }

    let message = match build_message(job, config).await {
        Ok(message) => message,
        Err(e) => {
            error!(
                worker = worker_id,
                recipient = job.recipient(),
                error = %e,
                "Failed to assemble message; job abandoned without retry"
            );
            return JobResult::failed(sequence_index, started.elapsed(), &e);
        }
    };

    let mut attempts: u32 = 0;
    let mut force_new = false;

    loop {
        if cancel.is_cancelled() {
            return JobResult::interrupted(sequence_index, started.elapsed());
        }

        attempts += 1;

        match attempt_send(job, &message, manager, config, force_new).await {
            Ok(()) => return JobResult::sent(sequence_index, started.elapsed()),
            Err(SendError::Connect(ConnectError::Interrupted)) => {
                return JobResult::interrupted(sequence_index, started.elapsed());
            }
            Err(e) if e.is_retryable() && attempts < config.max_retries => {
                let delay = backoff_delay(attempts - 1, &config.retry);
                warn!(
                    worker = worker_id,
                    recipient = job.recipient(),
                    attempt = attempts,
                    max_retries = config.max_retries,
                    error = %e,
                    "Send attempt failed; retrying in {:.2}s",
                    delay.as_secs_f64()
                );

                if cancel.is_cancelled() {
                    return JobResult::interrupted(sequence_index, started.elapsed());
                }
                tokio::time::sleep(delay).await;

                // A failed attempt taints the session; start the next
                // one on a fresh connection
                force_new = true;
            }
            Err(e) => {
                error!(
                    worker = worker_id,
                    recipient = job.recipient(),
                    attempts,
                    error = %e,
                    "Job failed"
                );
                return JobResult::failed(sequence_index, started.elapsed(), &e);
            }
        }
    }
}

/// Assemble the MIME message for a job, reading attachments from disk.
async fn build_message(job: &Job, config: &DispatchConfig) -> Result<String, SendError> {
    let mut builder = MessageBuilder::new()
        .from(config.sender())
        .to(job.recipient())
        .subject(job.subject())
        .body(job.body());

    for path in job.attachment_paths() {
        builder = builder.attach_file(path).await?;
    }

    Ok(builder.build()?)
}

/// One complete SMTP transaction for a job on the worker's session.
async fn attempt_send(
    job: &Job,
    message: &str,
    manager: &mut ConnectionManager,
    config: &DispatchConfig,
    force_new: bool,
) -> Result<(), SendError> {
    let handle = manager.acquire(force_new).await?;
    let client = &mut handle.client;

    let command_timeout = Duration::from_secs(config.timeouts.command_secs);
    let data_timeout = Duration::from_secs(config.timeouts.data_secs);

    let response = timeout(command_timeout, client.mail_from(config.sender()))
        .await
        .map_err(|_| SendError::Transient(format!("MAIL FROM timed out after {command_timeout:?}")))??;
    if !response.is_success() {
        return Err(SendError::Transient(format!(
            "Server rejected MAIL FROM: {}",
            response.message()
        )));
    }

    // Envelope recipients: the To address plus every BCC
    for recipient in std::iter::once(job.recipient()).chain(job.bcc().iter().map(String::as_str)) {
        let response = timeout(command_timeout, client.rcpt_to(recipient))
            .await
            .map_err(|_| {
                SendError::Transient(format!("RCPT TO timed out after {command_timeout:?}"))
            })??;
        if !response.is_success() {
            return Err(SendError::Transient(format!(
                "Server rejected RCPT TO {recipient}: {}",
                response.message()
            )));
        }
    }

    let response = timeout(data_timeout, client.data())
        .await
        .map_err(|_| SendError::Transient(format!("DATA timed out after {data_timeout:?}")))??;
    if !(300..400).contains(&response.code) {
        return Err(SendError::Transient(format!(
            "Server rejected DATA: {}",
            response.message()
        )));
    }

    let response = timeout(data_timeout, client.send_data(message))
        .await
        .map_err(|_| {
            SendError::Transient(format!("Message transmission timed out after {data_timeout:?}"))
        })??;
    if !response.is_success() {
        return Err(SendError::Transient(format!(
            "Server rejected message data: {}",
            response.message()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base: u64, max: u64, jitter: u64) -> RetryBackoff {
        RetryBackoff {
            base_delay_ms: base,
            max_delay_ms: max,
            jitter_ms: jitter,
        }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = policy(100, 60_000, 0);

        assert_eq!(backoff_delay(0, &policy), Duration::from_millis(100));
        assert_eq!(backoff_delay(1, &policy), Duration::from_millis(200));
        assert_eq!(backoff_delay(2, &policy), Duration::from_millis(400));
        assert_eq!(backoff_delay(3, &policy), Duration::from_millis(800));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = policy(100, 1500, 0);

        assert_eq!(backoff_delay(3, &policy), Duration::from_millis(800));
        assert_eq!(backoff_delay(4, &policy), Duration::from_millis(1500));
        assert_eq!(backoff_delay(20, &policy), Duration::from_millis(1500));
    }

    #[test]
    fn backoff_survives_huge_attempt_counts() {
        let policy = policy(1000, 90_000, 0);

        assert_eq!(backoff_delay(63, &policy), Duration::from_millis(90_000));
        assert_eq!(backoff_delay(u32::MAX, &policy), Duration::from_millis(90_000));
        // Below the cutoff but with an overflowing multiply
        assert_eq!(backoff_delay(62, &policy), Duration::from_millis(90_000));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = policy(100, 60_000, 50);

        for _ in 0..100 {
            let delay = backoff_delay(1, &policy);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(250));
        }
    }
}
