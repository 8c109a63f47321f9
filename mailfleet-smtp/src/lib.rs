//! Asynchronous SMTP submission client.
//!
//! This crate provides the wire-level half of the dispatcher: a client
//! that connects to a configured relay, negotiates STARTTLS when asked,
//! authenticates with AUTH LOGIN, and transmits MIME messages built by
//! [`MessageBuilder`].
//!
//! The client is deliberately low-level: one method per SMTP verb, each
//! returning the parsed [`Response`]. Session lifecycle (reuse, refresh,
//! retry) is the caller's concern.
//!
//! # Example
//!
//! ```no_run
//! use mailfleet_smtp::{MessageBuilder, SmtpClient};
//!
//! # async fn example() -> Result<(), mailfleet_smtp::ClientError> {
//! let mut client = SmtpClient::connect("mail.example.com:587", "mail.example.com").await?;
//! client.read_greeting().await?;
//! client.ehlo("dispatch.example.com").await?;
//!
//! let message = MessageBuilder::new()
//!     .from("sender@example.com")
//!     .to("recipient@example.com")
//!     .subject("Hello")
//!     .body("This is the message body")
//!     .build()?;
//!
//! client.mail_from("sender@example.com").await?;
//! client.rcpt_to("recipient@example.com").await?;
//! client.data().await?;
//! client.send_data(&message).await?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod encode;
mod error;
mod message;
mod response;

pub use client::SmtpClient;
pub use error::ClientError;
pub use message::{Attachment, MessageBuilder, guess_content_type};
pub use response::{Response, ResponseLine};
