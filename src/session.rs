//! Session resolution from connection parameters
//!
//! A [`Session`] is the credential bundle one transport connection carries:
//! address and secret from the `ADDR`/`ASP` query parameters, plus endpoint
//! settings that default to [`MailDefaults`] unless the connection overrides
//! them.

use std::collections::BTreeMap;
use std::fmt;

use secrecy::SecretString;

use crate::config::MailDefaults;
use crate::errors::{AppError, AppResult};

/// Query parameter carrying the mail address
pub const ADDRESS_PARAM: &str = "ADDR";
/// Query parameter carrying the (app) password
pub const SECRET_PARAM: &str = "ASP";

/// Resolved per-connection credentials and endpoints
///
/// Immutable once built. `Debug` output never includes the address or secret.
#[derive(Clone)]
pub struct Session {
    /// Login and sender address
    pub address: String,
    /// Password stored in a type that prevents accidental logging
    pub secret: SecretString,
    /// IMAP server hostname
    pub imap_host: String,
    /// IMAP server port
    pub imap_port: u16,
    /// SMTP submission hostname
    pub smtp_host: String,
    /// SMTP submission port
    pub smtp_port: u16,
}

impl Session {
    /// Build a session from raw (still percent-encoded) connection parameters
    ///
    /// `ADDR` and `ASP` are required. `IMAP_HOST`, `IMAP_PORT`, `SMTP_HOST`
    /// and `SMTP_PORT` optionally override `defaults`.
    ///
    /// # Errors
    ///
    /// - `MissingCredentials` if `ADDR` or `ASP` is absent, blank, or not
    ///   valid percent-encoded UTF-8
    /// - `InvalidInput` if a port override is not a valid port
    pub fn resolve(params: &BTreeMap<String, String>, defaults: &MailDefaults) -> AppResult<Self> {
        let address = required_param(params, ADDRESS_PARAM)?;
        let secret = required_param(params, SECRET_PARAM)?;

        Ok(Self {
            address,
            secret: SecretString::new(secret.into()),
            imap_host: optional_param(params, "IMAP_HOST")?
                .unwrap_or_else(|| defaults.imap_host.clone()),
            imap_port: port_param(params, "IMAP_PORT")?.unwrap_or(defaults.imap_port),
            smtp_host: optional_param(params, "SMTP_HOST")?
                .unwrap_or_else(|| defaults.smtp_host.clone()),
            smtp_port: port_param(params, "SMTP_PORT")?.unwrap_or(defaults.smtp_port),
        })
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("address", &"[REDACTED]")
            .field("secret", &self.secret)
            .field("imap_host", &self.imap_host)
            .field("imap_port", &self.imap_port)
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .finish()
    }
}

/// Split a URL query string into raw key/value pairs
///
/// Keys are percent-decoded; values are kept encoded for [`Session::resolve`].
/// The first occurrence of a key wins.
pub fn parse_query(query: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if let Ok(key) = decode(key) {
            params.entry(key).or_insert_with(|| value.to_owned());
        }
    }
    params
}

/// Percent-decode a query component, treating `+` as a space
fn decode(raw: &str) -> Result<String, std::string::FromUtf8Error> {
    urlencoding::decode(&raw.replace('+', " ")).map(|v| v.into_owned())
}

fn required_param(params: &BTreeMap<String, String>, key: &str) -> AppResult<String> {
    let raw = params
        .get(key)
        .ok_or_else(|| AppError::MissingCredentials(format!("connection parameter {key} is missing")))?;
    let value = decode(raw).map_err(|_| {
        AppError::MissingCredentials(format!("connection parameter {key} is not valid UTF-8"))
    })?;
    if value.trim().is_empty() {
        return Err(AppError::MissingCredentials(format!(
            "connection parameter {key} is empty"
        )));
    }
    Ok(value)
}

fn optional_param(params: &BTreeMap<String, String>, key: &str) -> AppResult<Option<String>> {
    let Some(raw) = params.get(key) else {
        return Ok(None);
    };
    let value = decode(raw)
        .map_err(|_| AppError::InvalidInput(format!("connection parameter {key} is not valid UTF-8")))?;
    let value = value.trim();
    Ok((!value.is_empty()).then(|| value.to_owned()))
}

fn port_param(params: &BTreeMap<String, String>, key: &str) -> AppResult<Option<u16>> {
    optional_param(params, key)?
        .map(|v| {
            v.parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| AppError::InvalidInput(format!("connection parameter {key} is not a valid port")))
        })
        .transpose()
}
