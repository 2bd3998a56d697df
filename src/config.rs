//! Configuration module for mail endpoints and gateway limits
//!
//! All configuration is loaded from environment variables following the pattern
//! `MAIL_GATEWAY_<KEY>`. Nothing here is per-caller: credentials arrive with
//! each connection (see [`crate::session`]), and the endpoint values below are
//! only the defaults a connection may override.

use std::collections::BTreeMap;
use std::env;
use std::env::VarError;
use std::time::Duration;

use crate::errors::{AppError, AppResult};
use crate::models::Folder;

/// Default mail endpoints applied to every resolved session
///
/// Provider hostnames are data: a connection may override each of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailDefaults {
    /// IMAP server hostname
    pub imap_host: String,
    /// IMAP server port (implicit TLS)
    pub imap_port: u16,
    /// SMTP submission hostname
    pub smtp_host: String,
    /// SMTP submission port (STARTTLS)
    pub smtp_port: u16,
}

impl Default for MailDefaults {
    fn default() -> Self {
        Self {
            imap_host: "imap.gmail.com".to_owned(),
            imap_port: 993,
            smtp_host: "smtp.gmail.com".to_owned(),
            smtp_port: 587,
        }
    }
}

/// Server-wide configuration
///
/// Shared read-only with every connection via `Arc`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Endpoint defaults for sessions
    pub defaults: MailDefaults,
    /// Mailbox opened for the `inbox` folder
    pub inbox_mailbox: String,
    /// Mailbox opened for the `sent` folder (provider specific)
    pub sent_mailbox: String,
    /// Deadline for one logical operation, in seconds
    pub operation_timeout_seconds: u64,
    /// Maximum number of messages materialized per search
    pub max_results: usize,
    /// Maximum protocol operations running at once across all connections
    pub max_workers: usize,
    /// Maximum days in one daily-count request
    pub max_count_days: usize,
    /// TCP connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// TLS handshake, greeting and login timeout in milliseconds
    pub greeting_timeout_ms: u64,
    /// Socket I/O timeout in milliseconds
    pub socket_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            defaults: MailDefaults::default(),
            inbox_mailbox: "INBOX".to_owned(),
            sent_mailbox: "[Gmail]/Sent Mail".to_owned(),
            operation_timeout_seconds: 60,
            max_results: 100,
            max_workers: 16,
            max_count_days: 366,
            connect_timeout_ms: 30_000,
            greeting_timeout_ms: 15_000,
            socket_timeout_ms: 60_000,
        }
    }
}

impl ServerConfig {
    /// Load all configuration from environment variables
    ///
    /// Every variable is optional; unset values fall back to
    /// [`ServerConfig::default`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if a variable is set but malformed, or if a
    /// limit is zero.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// MAIL_GATEWAY_IMAP_HOST=outlook.office365.com
    /// MAIL_GATEWAY_SMTP_HOST=smtp.office365.com
    /// MAIL_GATEWAY_SENT_MAILBOX=Sent Items
    /// MAIL_GATEWAY_OPERATION_TIMEOUT_SECONDS=60
    /// ```
    pub fn load_from_env() -> AppResult<Self> {
        let base = Self::default();
        let config = Self {
            defaults: MailDefaults {
                imap_host: string_env("MAIL_GATEWAY_IMAP_HOST", &base.defaults.imap_host)?,
                imap_port: parse_u16_env("MAIL_GATEWAY_IMAP_PORT", base.defaults.imap_port)?,
                smtp_host: string_env("MAIL_GATEWAY_SMTP_HOST", &base.defaults.smtp_host)?,
                smtp_port: parse_u16_env("MAIL_GATEWAY_SMTP_PORT", base.defaults.smtp_port)?,
            },
            inbox_mailbox: string_env("MAIL_GATEWAY_INBOX_MAILBOX", &base.inbox_mailbox)?,
            sent_mailbox: string_env("MAIL_GATEWAY_SENT_MAILBOX", &base.sent_mailbox)?,
            operation_timeout_seconds: parse_u64_env(
                "MAIL_GATEWAY_OPERATION_TIMEOUT_SECONDS",
                base.operation_timeout_seconds,
            )?,
            max_results: parse_usize_env("MAIL_GATEWAY_MAX_RESULTS", base.max_results)?,
            max_workers: parse_usize_env("MAIL_GATEWAY_MAX_WORKERS", base.max_workers)?,
            max_count_days: parse_usize_env("MAIL_GATEWAY_MAX_COUNT_DAYS", base.max_count_days)?,
            connect_timeout_ms: parse_u64_env(
                "MAIL_GATEWAY_CONNECT_TIMEOUT_MS",
                base.connect_timeout_ms,
            )?,
            greeting_timeout_ms: parse_u64_env(
                "MAIL_GATEWAY_GREETING_TIMEOUT_MS",
                base.greeting_timeout_ms,
            )?,
            socket_timeout_ms: parse_u64_env(
                "MAIL_GATEWAY_SOCKET_TIMEOUT_MS",
                base.socket_timeout_ms,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        let limits = [
            ("MAIL_GATEWAY_OPERATION_TIMEOUT_SECONDS", self.operation_timeout_seconds == 0),
            ("MAIL_GATEWAY_MAX_RESULTS", self.max_results == 0),
            ("MAIL_GATEWAY_MAX_WORKERS", self.max_workers == 0),
            ("MAIL_GATEWAY_MAX_COUNT_DAYS", self.max_count_days == 0),
        ];
        match limits.iter().find(|(_, is_zero)| *is_zero) {
            Some((key, _)) => Err(AppError::InvalidInput(format!("{key} must be greater than zero"))),
            None => Ok(()),
        }
    }

    /// Deadline applied to one logical operation
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_seconds)
    }

    /// Resolve a folder to the mailbox name sent on the wire
    ///
    /// Configured names are encoded to IMAP modified UTF-7 so localized
    /// sent-items folders work unchanged.
    pub fn mailbox_for(&self, folder: Folder) -> String {
        let name = match folder {
            Folder::Inbox => &self.inbox_mailbox,
            Folder::Sent => &self.sent_mailbox,
        };
        utf7_imap::encode_utf7_imap(name.clone())
    }
}

/// Connection parameters for the stdio transport
///
/// Stdio has no request URL, so `MAIL_GATEWAY_ADDR` and `MAIL_GATEWAY_ASP`
/// stand in for the `ADDR` and `ASP` query parameters. Values keep the same
/// percent-encoding rules.
pub fn stdio_connection_params() -> BTreeMap<String, String> {
    [("ADDR", "MAIL_GATEWAY_ADDR"), ("ASP", "MAIL_GATEWAY_ASP")]
        .into_iter()
        .filter_map(|(param, key)| env::var(key).ok().map(|v| (param.to_owned(), v)))
        .collect()
}

/// Read a string environment variable, falling back to `default` if unset or blank
fn string_env(key: &str, default: &str) -> AppResult<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_owned()),
        Ok(_) | Err(VarError::NotPresent) => Ok(default.to_owned()),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a `u16` environment variable with default fallback
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `u16`.
fn parse_u16_env(key: &str, default: u16) -> AppResult<u16> {
    match env::var(key) {
        Ok(v) => v.trim().parse::<u16>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u16 environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a `u64` environment variable with default fallback
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `u64`.
fn parse_u64_env(key: &str, default: u64) -> AppResult<u64> {
    match env::var(key) {
        Ok(v) => v.trim().parse::<u64>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u64 environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a `usize` environment variable with default fallback
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `usize`.
fn parse_usize_env(key: &str, default: usize) -> AppResult<usize> {
    match env::var(key) {
        Ok(v) => v.trim().parse::<usize>().map_err(|_| {
            AppError::InvalidInput(format!("invalid usize environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::ServerConfig;
    use crate::models::Folder;

    #[test]
    fn defaults_match_documented_limits() {
        let config = ServerConfig::default();
        assert_eq!(config.operation_timeout().as_secs(), 60);
        assert_eq!(config.max_results, 100);
        assert_eq!(config.defaults.imap_port, 993);
        assert_eq!(config.defaults.smtp_port, 587);
        config.validate().expect("defaults must validate");
    }

    #[test]
    fn folders_map_to_configured_mailboxes() {
        let config = ServerConfig::default();
        assert_eq!(config.mailbox_for(Folder::Inbox), "INBOX");
        assert_eq!(config.mailbox_for(Folder::Sent), "[Gmail]/Sent Mail");
    }

    #[test]
    fn non_ascii_sent_mailbox_is_utf7_encoded() {
        let config = ServerConfig {
            sent_mailbox: "Éléments envoyés".to_owned(),
            ..ServerConfig::default()
        };
        let wire = config.mailbox_for(Folder::Sent);
        assert!(wire.is_ascii());
        assert!(wire.contains('&'));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let config = ServerConfig {
            max_workers: 0,
            ..ServerConfig::default()
        };
        let err = config.validate().expect_err("must fail");
        assert!(err.to_string().contains("MAIL_GATEWAY_MAX_WORKERS"));
    }
}
