//! SMTP send-side adapter
//!
//! Builds plain-text messages with `lettre` and delivers them over a
//! transient, authenticated submission connection. Delivery is a blocking
//! call; run it through [`crate::executor::BoundedExecutor::run_blocking`].

use std::time::Duration;

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::session::Session;

/// Port using implicit TLS instead of STARTTLS
const IMPLICIT_TLS_PORT: u16 = 465;

/// A message ready to be addressed and sent
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl OutgoingMessage {
    /// Build the RFC 5322 message sent from `from`
    ///
    /// Envelope recipients are every `To` and `Cc` address.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if `to` is empty or any address fails to parse
    pub fn build(&self, from: &str) -> AppResult<Message> {
        if self.to.is_empty() {
            return Err(AppError::invalid("at least one recipient is required"));
        }

        let mut builder = Message::builder()
            .from(parse_mailbox(from, "sender")?)
            .subject(self.subject.as_str())
            .header(ContentType::TEXT_PLAIN);
        for to in &self.to {
            builder = builder.to(parse_mailbox(to, "to")?);
        }
        for cc in &self.cc {
            builder = builder.cc(parse_mailbox(cc, "cc")?);
        }

        builder
            .body(self.body.clone())
            .map_err(|e| AppError::InvalidInput(format!("failed to build email: {e}")))
    }
}

fn parse_mailbox(address: &str, field: &str) -> AppResult<Mailbox> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|e| AppError::InvalidInput(format!("invalid {field} address: {e}")))
}

/// Deliver `message` through the session's submission server
///
/// Opens the connection (STARTTLS, or implicit TLS on port 465),
/// authenticates, sends, and closes. Blocks the calling thread.
///
/// # Errors
///
/// - `AuthFailed` if the server rejects the credentials
/// - `Delivery` if the server refuses the message or a recipient
/// - `Timeout` if a socket operation exceeds `socket_timeout`
/// - `Connect` for network or TLS failures
pub fn send(session: &Session, message: &Message, socket_timeout: Duration) -> AppResult<()> {
    let builder = if session.smtp_port == IMPLICIT_TLS_PORT {
        SmtpTransport::relay(&session.smtp_host)
    } else {
        SmtpTransport::starttls_relay(&session.smtp_host)
    }
    .map_err(|e| AppError::Connect(format!("SMTP relay error: {e}")))?;

    let transport = builder
        .port(session.smtp_port)
        .credentials(Credentials::new(
            session.address.clone(),
            session.secret.expose_secret().to_owned(),
        ))
        .timeout(Some(socket_timeout))
        .build();

    let response = transport.send(message).map_err(classify_send_error)?;
    debug!(
        host = %session.smtp_host,
        code = %response.code(),
        "SMTP delivery accepted"
    );
    Ok(())
}

fn classify_send_error(e: lettre::transport::smtp::Error) -> AppError {
    let status = e
        .status()
        .and_then(|code| code.to_string().parse::<u16>().ok());
    let kind = classify(status, e.is_timeout());
    let detail = format!("SMTP send failed: {e}");
    match kind {
        SendFailure::Auth => AppError::AuthFailed(detail),
        SendFailure::Rejected => AppError::Delivery(detail),
        SendFailure::TimedOut => AppError::Timeout(detail),
        SendFailure::Transport => AppError::Connect(detail),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SendFailure {
    Auth,
    Rejected,
    TimedOut,
    Transport,
}

/// Map an SMTP reply code (if the server answered) to a failure kind
fn classify(status: Option<u16>, timed_out: bool) -> SendFailure {
    match status {
        Some(530 | 534 | 535) => SendFailure::Auth,
        Some(code) if (400..600).contains(&code) => SendFailure::Rejected,
        _ if timed_out => SendFailure::TimedOut,
        _ => SendFailure::Transport,
    }
}
