//! Mock SMTP server for dispatch scenario tests.
//!
//! A configurable server that:
#![allow(dead_code)] // Test utility module - not all methods used in every test
//! - Simulates success, failure, and slow responses per SMTP command
//! - Handles the AUTH LOGIN exchange
//! - Can reject MAIL FROM on the first N sessions only (retry tests)
//! - Tracks accepted connections and received commands for assertions

use std::{
    fmt::Write,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};

/// SMTP command received by the mock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    /// EHLO command with hostname
    Ehlo(String),
    /// AUTH command (mechanism line)
    Auth(String),
    /// A base64 credential line inside an AUTH LOGIN exchange
    AuthData(String),
    /// MAIL FROM command
    MailFrom(String),
    /// RCPT TO command
    RcptTo(String),
    /// DATA command
    Data,
    /// Message content (after DATA)
    MessageContent(Vec<u8>),
    /// QUIT command
    Quit,
    /// Unknown/other command
    Other(String),
}

/// Response configuration for SMTP commands.
#[derive(Debug, Clone)]
pub struct SmtpResponse {
    pub code: u16,
    pub message: String,
}

impl SmtpResponse {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Clone)]
struct MockServerConfig {
    greeting: SmtpResponse,
    ehlo_capabilities: Vec<String>,
    auth_response: SmtpResponse,
    mail_from_response: SmtpResponse,
    rcpt_to_response: SmtpResponse,
    data_response: SmtpResponse,
    data_end_response: SmtpResponse,
    quit_response: SmtpResponse,

    // Failure injection
    response_delay: Option<Duration>,
    data_end_delay: Option<Duration>,
    reject_mail_from_on_first_sessions: usize,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            greeting: SmtpResponse::new(220, "Mock SMTP Server"),
            ehlo_capabilities: vec!["localhost".to_string(), "AUTH LOGIN".to_string()],
            auth_response: SmtpResponse::new(235, "Authentication successful"),
            mail_from_response: SmtpResponse::new(250, "OK"),
            rcpt_to_response: SmtpResponse::new(250, "OK"),
            data_response: SmtpResponse::new(354, "Start mail input; end with <CRLF>.<CRLF>"),
            data_end_response: SmtpResponse::new(250, "OK: Message accepted"),
            quit_response: SmtpResponse::new(221, "Bye"),
            response_delay: None,
            data_end_delay: None,
            reject_mail_from_on_first_sessions: 0,
        }
    }
}

fn ehlo_bytes(capabilities: &[String]) -> Vec<u8> {
    let mut response = String::new();
    let count = capabilities.len();

    for (i, cap) in capabilities.iter().enumerate() {
        if i < count - 1 {
            let _ = write!(&mut response, "250-{cap}\r\n");
        } else {
            let _ = write!(&mut response, "250 {cap}\r\n");
        }
    }

    response.into_bytes()
}

/// Mock SMTP server for testing.
pub struct MockSmtpServer {
    addr: SocketAddr,
    commands_received: Arc<RwLock<Vec<SmtpCommand>>>,
    shutdown: Arc<AtomicBool>,
    connections: Arc<AtomicUsize>,
}

impl MockSmtpServer {
    /// Create a new builder for configuring the mock server.
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder::new()
    }

    /// Start a server with default (all-success) behaviour.
    pub async fn start() -> Result<Self, std::io::Error> {
        Self::builder().build().await
    }

    /// The address the server is listening on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// All commands received so far, across every session.
    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands_received.read().await.clone()
    }

    /// Number of commands received matching `predicate`.
    pub async fn count_commands(&self, predicate: impl Fn(&SmtpCommand) -> bool) -> usize {
        self.commands_received
            .read()
            .await
            .iter()
            .filter(|command| predicate(command))
            .count()
    }

    /// Number of connections accepted so far.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Shut the server down.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    async fn handle_client(
        mut stream: TcpStream,
        session: usize,
        config: Arc<MockServerConfig>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        // 0 = not in AUTH, 1 = expecting username, 2 = expecting password
        let mut auth_state = 0u8;

        writer.write_all(&config.greeting.to_bytes()).await?;
        writer.flush().await?;

        loop {
            line.clear();

            let read_result = timeout(Duration::from_secs(10), reader.read_line(&mut line)).await;
            let Ok(bytes_read) = read_result else {
                // Timed out reading a command
                return Ok(());
            };
            let bytes_read = bytes_read?;
            if bytes_read == 0 {
                // Connection closed
                return Ok(());
            }

            let cmd_line = line.trim();

            // Mid-AUTH, lines are credentials rather than commands
            if auth_state > 0 {
                commands
                    .write()
                    .await
                    .push(SmtpCommand::AuthData(cmd_line.to_string()));

                let response = if auth_state == 1 {
                    auth_state = 2;
                    // base64("Password:")
                    SmtpResponse::new(334, "UGFzc3dvcmQ6").to_bytes()
                } else {
                    auth_state = 0;
                    config.auth_response.to_bytes()
                };
                writer.write_all(&response).await?;
                writer.flush().await?;
                continue;
            }

            let parts: Vec<&str> = cmd_line.splitn(2, ' ').collect();
            let command = parts[0].to_uppercase();

            let (response, smtp_cmd) = match command.as_str() {
                "EHLO" | "HELO" => {
                    let hostname = parts.get(1).unwrap_or(&"").to_string();
                    (
                        ehlo_bytes(&config.ehlo_capabilities),
                        SmtpCommand::Ehlo(hostname),
                    )
                }
                "AUTH" => {
                    auth_state = 1;
                    let mechanism = parts.get(1).unwrap_or(&"").to_string();
                    // base64("Username:")
                    (
                        SmtpResponse::new(334, "VXNlcm5hbWU6").to_bytes(),
                        SmtpCommand::Auth(mechanism),
                    )
                }
                "MAIL" => {
                    let from = parts.get(1).unwrap_or(&"").to_string();
                    let response = if session <= config.reject_mail_from_on_first_sessions {
                        SmtpResponse::new(421, "Service not available, closing channel").to_bytes()
                    } else {
                        config.mail_from_response.to_bytes()
                    };
                    (response, SmtpCommand::MailFrom(from))
                }
                "RCPT" => {
                    let to = parts.get(1).unwrap_or(&"").to_string();
                    (config.rcpt_to_response.to_bytes(), SmtpCommand::RcptTo(to))
                }
                "DATA" => (config.data_response.to_bytes(), SmtpCommand::Data),
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    writer.write_all(&config.quit_response.to_bytes()).await?;
                    writer.flush().await?;
                    return Ok(());
                }
                _ => (
                    SmtpResponse::new(500, "Unknown command").to_bytes(),
                    SmtpCommand::Other(cmd_line.to_string()),
                ),
            };

            commands.write().await.push(smtp_cmd.clone());

            // After a 354, consume message content up to <CRLF>.<CRLF>
            if matches!(smtp_cmd, SmtpCommand::Data) && config.data_response.code == 354 {
                writer.write_all(&response).await?;
                writer.flush().await?;

                let mut message_content = Vec::new();
                let mut data_line = String::new();

                loop {
                    data_line.clear();
                    let bytes_read = reader.read_line(&mut data_line).await?;
                    if bytes_read == 0 {
                        break;
                    }

                    if data_line.trim_end() == "." {
                        commands
                            .write()
                            .await
                            .push(SmtpCommand::MessageContent(message_content.clone()));

                        if let Some(delay) = config.data_end_delay.or(config.response_delay) {
                            tokio::time::sleep(delay).await;
                        }
                        writer
                            .write_all(&config.data_end_response.to_bytes())
                            .await?;
                        writer.flush().await?;
                        break;
                    }

                    message_content.extend_from_slice(data_line.as_bytes());
                }
                continue;
            }

            if let Some(delay) = config.response_delay {
                tokio::time::sleep(delay).await;
            }

            writer.write_all(&response).await?;
            writer.flush().await?;
        }
    }
}

/// Builder for configuring a [`MockSmtpServer`].
pub struct MockSmtpServerBuilder {
    config: MockServerConfig,
}

impl MockSmtpServerBuilder {
    fn new() -> Self {
        Self {
            config: MockServerConfig::default(),
        }
    }

    /// Set the greeting message.
    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.greeting = SmtpResponse::new(code, message);
        self
    }

    /// Set the AUTH LOGIN outcome (the response after the password).
    #[must_use]
    pub fn with_auth_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.auth_response = SmtpResponse::new(code, message);
        self
    }

    /// Set the MAIL FROM response.
    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.mail_from_response = SmtpResponse::new(code, message);
        self
    }

    /// Set the RCPT TO response.
    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.rcpt_to_response = SmtpResponse::new(code, message);
        self
    }

    /// Set the response after message content (after `<CRLF>.<CRLF>`).
    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end_response = SmtpResponse::new(code, message);
        self
    }

    /// Delay every response.
    #[must_use]
    pub const fn with_response_delay(mut self, delay: Duration) -> Self {
        self.config.response_delay = Some(delay);
        self
    }

    /// Delay only the response that acknowledges message content,
    /// keeping a send in flight for a controlled window.
    #[must_use]
    pub const fn with_data_end_delay(mut self, delay: Duration) -> Self {
        self.config.data_end_delay = Some(delay);
        self
    }

    /// Reject MAIL FROM with 421 on the first `sessions` accepted
    /// connections; later sessions behave normally.
    #[must_use]
    pub const fn with_mail_from_rejected_on_first_sessions(mut self, sessions: usize) -> Self {
        self.config.reject_mail_from_on_first_sessions = sessions;
        self
    }

    /// Build and start the mock SMTP server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to a port.
    pub async fn build(self) -> Result<MockSmtpServer, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = Arc::new(self.config);
        let commands = Arc::new(RwLock::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let connections = Arc::new(AtomicUsize::new(0));

        let config_clone = Arc::clone(&config);
        let commands_clone = Arc::clone(&commands);
        let shutdown_clone = Arc::clone(&shutdown);
        let connections_clone = Arc::clone(&connections);

        tokio::spawn(async move {
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    break;
                }

                // Accept with a timeout so the shutdown flag is polled
                let accept_result = timeout(Duration::from_millis(100), listener.accept()).await;

                if let Ok(Ok((stream, _peer))) = accept_result {
                    let session = connections_clone.fetch_add(1, Ordering::Relaxed) + 1;
                    let config = Arc::clone(&config_clone);
                    let commands = Arc::clone(&commands_clone);

                    tokio::spawn(async move {
                        if let Err(e) =
                            MockSmtpServer::handle_client(stream, session, config, commands).await
                        {
                            eprintln!("mock server client error: {e}");
                        }
                    });
                }
            }
        });

        Ok(MockSmtpServer {
            addr,
            commands_received: commands,
            shutdown,
            connections,
        })
    }
}
