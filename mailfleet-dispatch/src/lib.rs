//! Concurrent batch email dispatcher.
//!
//! Takes a prepared list of (recipient, attachments) rows and sends one
//! email per row through a bounded pool of workers, each owning a single
//! reusable SMTP session. Provides:
//!
//! - Pre-flight validation of every referenced attachment before any
//!   network activity (all-or-nothing)
//! - Per-worker connection reuse with periodic refresh
//! - Bounded retry with exponential backoff and jitter
//! - Cooperative cancellation observed at every suspension point
//! - Per-job results, summary statistics, and a re-submittable manifest
//!   of failed rows

mod config;
mod connection;
mod dispatcher;
mod error;
mod job;
mod report;
mod retry;
mod validate;
mod worker;

pub use mailfleet_common::CancelToken;

pub use config::{Credentials, DispatchConfig, RetryBackoff, SmtpTimeouts};
pub use connection::{ConnectionHandle, ConnectionManager};
pub use dispatcher::Dispatcher;
pub use error::{ConnectError, DispatchError, SendError};
pub use job::{Job, MessageTemplate, SourceRow, prepare_jobs};
pub use report::{DispatchReport, DispatchSummary, JobOutcome, JobResult};
pub use retry::backoff_delay;
pub use validate::{AttachmentKind, ValidatedAttachment, ValidationFailure, validate_attachments};
