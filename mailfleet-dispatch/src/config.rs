//! Dispatcher configuration.
//!
//! The dispatcher does not read configuration files itself; the
//! embedding layer deserialises [`DispatchConfig`] (e.g. from TOML) and
//! hands it over. Every knob that governs dispatch behaviour lives
//! here: relay endpoint, encryption/authentication, pool sizing, retry
//! policy, connection refresh, and per-operation timeouts.

use serde::Deserialize;

use crate::error::DispatchError;
use crate::validate::AttachmentKind;

/// SMTP credentials for AUTH LOGIN.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Backoff policy for retries (both reconnection and re-send).
///
/// The delay before retry `n` (0-indexed) is
/// `min(max_delay, base_delay * 2^n)` plus a uniformly random addend of
/// up to `jitter_ms`, so that workers hitting the same outage don't
/// retry in lockstep.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryBackoff {
    /// Base delay in milliseconds.
    ///
    /// Default: 1000 (1 second)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds, capping the exponential growth.
    ///
    /// Default: 60000 (1 minute)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Upper bound of the random jitter addend in milliseconds.
    ///
    /// Default: 1000 (1 second)
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

/// SMTP operation timeout configuration.
///
/// Prevents hung connections from stalling a worker indefinitely.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpTimeouts {
    /// Timeout for initial connection establishment.
    ///
    /// Default: 30 seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_secs: u64,

    /// Timeout for individual commands (EHLO, AUTH, MAIL FROM, RCPT TO).
    ///
    /// Default: 30 seconds
    #[serde(default = "default_command_timeout")]
    pub command_secs: u64,

    /// Timeout for DATA and message transmission.
    ///
    /// Longer than other timeouts to accommodate large attachments.
    /// Default: 120 seconds
    #[serde(default = "default_data_timeout")]
    pub data_secs: u64,

    /// Timeout for QUIT.
    ///
    /// Default: 10 seconds
    #[serde(default = "default_quit_timeout")]
    pub quit_secs: u64,
}

impl Default for SmtpTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_timeout(),
            command_secs: default_command_timeout(),
            data_secs: default_data_timeout(),
            quit_secs: default_quit_timeout(),
        }
    }
}

/// Complete dispatcher configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// SMTP relay hostname.
    pub server: String,

    /// SMTP relay port.
    ///
    /// Default: 587
    #[serde(default = "default_port")]
    pub port: u16,

    /// Upgrade the session to TLS via STARTTLS after the first EHLO.
    #[serde(default)]
    pub use_encryption: bool,

    /// Authenticate with AUTH LOGIN after the handshake.
    /// Requires `credentials`.
    #[serde(default)]
    pub use_authentication: bool,

    /// Credentials for AUTH LOGIN.
    #[serde(default)]
    pub credentials: Option<Credentials>,

    /// Envelope sender and From header when not authenticating.
    /// When authenticating, the username takes precedence as sender.
    pub from_address: String,

    /// Blind-copy recipients added to every dispatched message.
    #[serde(default)]
    pub bcc_recipients: Vec<String>,

    /// Hostname announced in EHLO.
    ///
    /// Default: "localhost"
    #[serde(default = "default_client_hostname")]
    pub client_hostname: String,

    /// Number of concurrent workers (bounds simultaneous sessions).
    ///
    /// Default: available parallelism, capped at 8
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Maximum send (and connection) attempts per job.
    ///
    /// Default: 3
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Number of sends after which a worker's session is closed and
    /// re-established, amortising handshake cost while sidestepping
    /// server-side idle/session limits.
    ///
    /// Default: 20
    #[serde(default = "default_connection_refresh_threshold")]
    pub connection_refresh_threshold: u32,

    /// Log intended sends without performing any network I/O.
    #[serde(default)]
    pub test_mode: bool,

    /// Restrict attachments to a known file kind, enforced by signature
    /// during pre-flight validation.
    #[serde(default)]
    pub attachment_kind: AttachmentKind,

    /// Retry backoff policy.
    #[serde(default)]
    pub retry: RetryBackoff,

    /// SMTP operation timeouts.
    #[serde(default)]
    pub timeouts: SmtpTimeouts,

    /// Accept invalid TLS certificates (self-signed test servers only).
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl DispatchConfig {
    /// The `host:port` address of the relay.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }

    /// The address used as envelope sender and From header: the
    /// authentication username when authenticating, `from_address`
    /// otherwise.
    #[must_use]
    pub fn sender(&self) -> &str {
        if self.use_authentication
            && let Some(credentials) = &self.credentials
        {
            &credentials.username
        } else {
            &self.from_address
        }
    }

    /// Check the configuration for fatal problems.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Config`] naming the first problem found.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.server.trim().is_empty() {
            return Err(DispatchError::Config("server must not be empty".into()));
        }
        if self.port == 0 {
            return Err(DispatchError::Config("port must not be zero".into()));
        }
        if !self.from_address.contains('@') {
            return Err(DispatchError::Config(format!(
                "from_address is not a usable address: {}",
                self.from_address
            )));
        }
        if self.use_authentication && self.credentials.is_none() {
            return Err(DispatchError::Config(
                "credentials are required when use_authentication is enabled".into(),
            ));
        }
        if self.max_workers == 0 {
            return Err(DispatchError::Config("max_workers must be at least 1".into()));
        }
        if self.max_retries == 0 {
            return Err(DispatchError::Config("max_retries must be at least 1".into()));
        }
        if self.connection_refresh_threshold == 0 {
            return Err(DispatchError::Config(
                "connection_refresh_threshold must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

const fn default_port() -> u16 {
    587
}

fn default_client_hostname() -> String {
    "localhost".to_string()
}

fn default_max_workers() -> usize {
    num_cpus::get().clamp(1, 8)
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_connection_refresh_threshold() -> u32 {
    20
}

const fn default_base_delay_ms() -> u64 {
    1000
}

const fn default_max_delay_ms() -> u64 {
    60_000
}

const fn default_jitter_ms() -> u64 {
    1000
}

const fn default_connect_timeout() -> u64 {
    30
}

const fn default_command_timeout() -> u64 {
    30
}

const fn default_data_timeout() -> u64 {
    120
}

const fn default_quit_timeout() -> u64 {
    10
}
