//! Per-worker SMTP session lifecycle.
//!
//! Each worker owns exactly one [`ConnectionManager`], which in turn
//! owns at most one live session. Handles are never shared between
//! workers, so no locking is involved anywhere in the session path.
//! Sessions are reused across sends and transparently replaced once the
//! refresh threshold is reached or after any send failure.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use mailfleet_common::{
    CancelToken,
    tracing::{debug, info, warn},
};
use mailfleet_smtp::SmtpClient;
use tokio::time::timeout;

use crate::{config::DispatchConfig, error::ConnectError, retry::backoff_delay};

/// A live, authenticated SMTP session owned by a single worker.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub(crate) client: SmtpClient,
    send_count: u32,
    created_at: Instant,
}

impl ConnectionHandle {
    fn new(client: SmtpClient) -> Self {
        Self {
            client,
            send_count: 0,
            created_at: Instant::now(),
        }
    }

    /// Number of sends this session has been acquired for.
    #[must_use]
    pub const fn send_count(&self) -> u32 {
        self.send_count
    }

    /// How long this session has been open.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Creates, reuses, refreshes, and closes one worker's SMTP session.
#[derive(Debug)]
pub struct ConnectionManager {
    config: Arc<DispatchConfig>,
    cancel: CancelToken,
    worker_id: usize,
    handle: Option<ConnectionHandle>,
    generation: u64,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(config: Arc<DispatchConfig>, cancel: CancelToken, worker_id: usize) -> Self {
        Self {
            config,
            cancel,
            worker_id,
            handle: None,
            generation: 0,
        }
    }

    /// How many sessions this manager has established so far.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Get a session ready for one send, establishing or refreshing it
    /// as needed.
    ///
    /// A new session is created when none exists, when `force_new` is
    /// set (callers force one after a send failure), or when the current
    /// session has reached the configured refresh threshold. Session
    /// establishment retries with backoff up to `max_retries` attempts.
    /// The returned handle's send count includes the send it was
    /// acquired for.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::Exhausted`] if no session could be
    /// established, or [`ConnectError::Interrupted`] on cancellation.
    pub async fn acquire(&mut self, force_new: bool) -> Result<&mut ConnectionHandle, ConnectError> {
        let refresh_due = self
            .handle
            .as_ref()
            .is_some_and(|handle| handle.send_count >= self.config.connection_refresh_threshold);

        if refresh_due {
            info!(
                worker = self.worker_id,
                threshold = self.config.connection_refresh_threshold,
                "Refreshing SMTP session after reaching send threshold"
            );
        }

        if force_new || refresh_due || self.handle.is_none() {
            self.disconnect().await;
            let client = self.establish().await?;
            self.generation += 1;
            self.handle = Some(ConnectionHandle::new(client));
        }

        let Some(handle) = self.handle.as_mut() else {
            // A session was installed just above
            return Err(ConnectError::Exhausted {
                attempts: 0,
                last_error: "session handle missing after establish".into(),
            });
        };

        handle.send_count += 1;
        Ok(handle)
    }

    /// Close the current session, if any, with a best-effort QUIT.
    /// Delivery already made it onto the wire by the time this runs, so
    /// QUIT failures are logged and swallowed.
    pub async fn disconnect(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            let quit_timeout = Duration::from_secs(self.config.timeouts.quit_secs);
            match timeout(quit_timeout, handle.client.quit()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    debug!(worker = self.worker_id, "QUIT on session close failed: {e}");
                }
                Err(_) => {
                    debug!(
                        worker = self.worker_id,
                        "QUIT on session close timed out after {quit_timeout:?}"
                    );
                }
            }
        }
    }

    /// Establish a session, retrying with backoff.
    async fn establish(&self) -> Result<SmtpClient, ConnectError> {
        let max_attempts = self.config.max_retries;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if self.cancel.is_cancelled() {
                return Err(ConnectError::Interrupted);
            }

            match self.handshake().await {
                Ok(client) => return Ok(client),
                Err(error) => {
                    last_error = error;

                    if attempt < max_attempts {
                        let delay = backoff_delay(attempt - 1, &self.config.retry);
                        warn!(
                            worker = self.worker_id,
                            attempt,
                            max_attempts,
                            error = %last_error,
                            "SMTP session attempt failed; retrying in {:.2}s",
                            delay.as_secs_f64()
                        );
                        if self.cancel.is_cancelled() {
                            return Err(ConnectError::Interrupted);
                        }
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(ConnectError::Exhausted {
            attempts: max_attempts,
            last_error,
        })
    }

    /// One complete handshake: connect, greeting, EHLO, optional
    /// STARTTLS (with re-EHLO), optional AUTH LOGIN. Each step runs
    /// under its configured timeout.
    async fn handshake(&self) -> Result<SmtpClient, String> {
        let address = self.config.address();
        let timeouts = &self.config.timeouts;
        let connect_timeout = Duration::from_secs(timeouts.connect_secs);
        let command_timeout = Duration::from_secs(timeouts.command_secs);

        let mut client = timeout(
            connect_timeout,
            SmtpClient::connect(&address, self.config.server.clone()),
        )
        .await
        .map_err(|_| format!("Connection to {address} timed out after {connect_timeout:?}"))?
        .map_err(|e| format!("Failed to connect to {address}: {e}"))?
        .accept_invalid_certs(self.config.accept_invalid_certs);

        let greeting = timeout(command_timeout, client.read_greeting())
            .await
            .map_err(|_| format!("Greeting timed out after {command_timeout:?}"))?
            .map_err(|e| format!("Failed to read greeting: {e}"))?;
        if !greeting.is_success() {
            return Err(format!("Server rejected connection: {}", greeting.message()));
        }

        let hostname = &self.config.client_hostname;
        let ehlo = timeout(command_timeout, client.ehlo(hostname))
            .await
            .map_err(|_| format!("EHLO timed out after {command_timeout:?}"))?
            .map_err(|e| format!("EHLO failed: {e}"))?;
        if !ehlo.is_success() {
            return Err(format!("Server rejected EHLO: {}", ehlo.message()));
        }

        if self.config.use_encryption {
            let starttls = timeout(command_timeout, client.starttls())
                .await
                .map_err(|_| format!("STARTTLS timed out after {command_timeout:?}"))?
                .map_err(|e| format!("STARTTLS failed: {e}"))?;
            if !starttls.is_success() {
                return Err(format!("Server rejected STARTTLS: {}", starttls.message()));
            }

            // Re-send EHLO on the encrypted channel (RFC 3207)
            let ehlo = timeout(command_timeout, client.ehlo(hostname))
                .await
                .map_err(|_| format!("EHLO after STARTTLS timed out after {command_timeout:?}"))?
                .map_err(|e| format!("EHLO after STARTTLS failed: {e}"))?;
            if !ehlo.is_success() {
                return Err(format!(
                    "Server rejected EHLO after STARTTLS: {}",
                    ehlo.message()
                ));
            }
        }

        if self.config.use_authentication
            && let Some(credentials) = &self.config.credentials
        {
            timeout(
                command_timeout,
                client.auth_login(&credentials.username, &credentials.password),
            )
            .await
            .map_err(|_| format!("AUTH LOGIN timed out after {command_timeout:?}"))?
            .map_err(|e| e.to_string())?;
        }

        debug!(
            worker = self.worker_id,
            server = %address,
            "SMTP session established"
        );

        Ok(client)
    }
}
