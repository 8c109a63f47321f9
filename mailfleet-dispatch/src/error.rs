//! Typed error handling for dispatch operations.
//!
//! Two distinct families:
//!
//! - [`DispatchError`]: fatal errors that abort the whole run before or
//!   during setup (bad configuration, failed attachment validation, an
//!   unreachable relay). A run never partially dispatches on these.
//! - [`SendError`]: per-job failures. These never abort the batch; they
//!   surface through the job's result and the failure manifest.

use thiserror::Error;

use mailfleet_smtp::ClientError;

use crate::validate::ValidationFailure;

/// Fatal errors that abort the entire run.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Missing or contradictory settings, or no usable input.
    #[error("Configuration error: {0}")]
    Config(String),

    /// One or more referenced attachments failed pre-flight validation.
    /// The batch is aborted before any network activity.
    #[error("Attachment validation failed:\n{}", format_failures(.0))]
    Validation(Vec<ValidationFailure>),

    /// The relay could not be reached or the handshake could not be
    /// completed within the configured attempt budget.
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectError),
}

/// Errors establishing an SMTP session.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Every handshake attempt failed.
    #[error("failed to establish SMTP session after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    /// Cancellation was requested while connecting.
    #[error("connection attempt interrupted")]
    Interrupted,
}

/// Per-job send failures.
#[derive(Debug, Error)]
pub enum SendError {
    /// Network or protocol failure during a send attempt. Retried with
    /// backoff up to the configured attempt budget.
    #[error("{0}")]
    Transient(String),

    /// An attachment could not be read or encoded at send time. Not
    /// retried: content errors don't heal on a fresh connection.
    #[error("attachment error: {0}")]
    Attachment(String),

    /// The worker's session could not be (re-)established.
    #[error(transparent)]
    Connect(#[from] ConnectError),
}

impl SendError {
    /// Returns `true` if another attempt could plausibly succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Categorise SMTP client failures for the retry controller.
///
/// Message construction problems (unreadable attachment, bad filename)
/// are content errors; everything else that the wire can throw at us is
/// treated as transient and retried uniformly; this dispatcher submits
/// to a single configured relay, so there is no permanent/temporary
/// split to route on the way an MTA would.
impl From<ClientError> for SendError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::BuilderError(msg) => Self::Attachment(msg),
            other => Self::Transient(other.to_string()),
        }
    }
}

fn format_failures(failures: &[ValidationFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}
