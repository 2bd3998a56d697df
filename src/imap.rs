//! IMAP read-side adapter
//!
//! Provides timeout-bounded wrappers around `async-imap` operations. Every
//! connection is TLS, opens exactly one mailbox read-only, and is owned by a
//! single [`MailboxHandle`] that must be closed with [`Mailbox::close`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_imap::Client;
use async_imap::error::Error as ImapError;
use async_imap::types::Fetch;
use futures::TryStreamExt;
use rustls::ClientConfig;
use rustls::RootCertStore;
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult};
use crate::models::Folder;
use crate::session::Session;

/// Type alias for authenticated IMAP session over TLS
pub type ImapSession = async_imap::Session<tokio_rustls::client::TlsStream<TcpStream>>;

/// Header fields fetched for search summaries
const SUMMARY_FIELDS: &str = "UID BODY.PEEK[HEADER.FIELDS (DATE FROM SUBJECT)]";
/// Full message source without setting `\Seen`
const FULL_MESSAGE: &str = "UID BODY.PEEK[]";

/// One authenticated connection with a mailbox selected read-only
pub struct MailboxHandle {
    session: ImapSession,
    mailbox: String,
    socket_timeout: Duration,
}

/// Connect to the session's IMAP server, authenticate, and examine `folder`
///
/// Performs full connection sequence with timeouts:
/// 1. TCP connect
/// 2. TLS handshake with webpki root certificates
/// 3. Read IMAP greeting
/// 4. LOGIN authentication
/// 5. EXAMINE of the folder's mailbox
///
/// If the mailbox cannot be opened the fresh connection is closed before
/// returning.
///
/// # Errors
///
/// - `Connect` for TCP, TLS, or greeting failures
/// - `AuthFailed` if the server rejects the credentials
/// - `Timeout` if a connection phase exceeds its socket timeout
/// - `Protocol` if the mailbox cannot be examined
pub async fn connect(
    config: &ServerConfig,
    session: &Session,
    folder: Folder,
) -> AppResult<MailboxHandle> {
    let imap = connect_authenticated(config, session).await?;
    let mut handle = MailboxHandle {
        session: imap,
        mailbox: config.mailbox_for(folder),
        socket_timeout: Duration::from_millis(config.socket_timeout_ms),
    };
    match handle.examine().await {
        Ok(()) => Ok(handle),
        Err(e) => {
            handle.close().await;
            Err(e)
        }
    }
}

async fn connect_authenticated(config: &ServerConfig, session: &Session) -> AppResult<ImapSession> {
    let connect_duration = Duration::from_millis(config.connect_timeout_ms);
    let greeting_duration = Duration::from_millis(config.greeting_timeout_ms);

    let tcp = timeout(
        connect_duration,
        TcpStream::connect((session.imap_host.as_str(), session.imap_port)),
    )
    .await
    .map_err(|_| AppError::Timeout("tcp connect timeout".to_owned()))
    .and_then(|r| r.map_err(|e| AppError::Connect(format!("tcp connect failed: {e}"))))?;

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));

    let server_name = ServerName::try_from(session.imap_host.clone())
        .map_err(|_| AppError::Connect("invalid IMAP host for TLS SNI".to_owned()))?;
    let tls_stream = timeout(greeting_duration, connector.connect(server_name, tcp))
        .await
        .map_err(|_| AppError::Timeout("TLS handshake timeout".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Connect(format!("TLS handshake failed: {e}"))))?;

    let mut client = Client::new(tls_stream);
    let greeting = timeout(greeting_duration, client.read_response())
        .await
        .map_err(|_| AppError::Timeout("IMAP greeting timeout".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Connect(format!("IMAP greeting failed: {e}"))))?;

    if greeting.is_none() {
        return Err(AppError::Connect(
            "IMAP server closed connection before greeting".to_owned(),
        ));
    }

    let secret = session.secret.expose_secret();
    let imap = timeout(
        greeting_duration,
        client.login(session.address.as_str(), secret),
    )
    .await
    .map_err(|_| AppError::Timeout("IMAP login timeout".to_owned()))
    .and_then(|r| r.map_err(|(e, _)| login_error(e)))?;

    debug!(host = %session.imap_host, "IMAP session authenticated");
    Ok(imap)
}

/// Classify a LOGIN failure: transport loss is a connect error, anything
/// the server answered is a credential rejection
fn login_error(e: ImapError) -> AppError {
    match e {
        ImapError::Io(_) | ImapError::ConnectionLost => {
            AppError::Connect(format!("IMAP login failed: {e}"))
        }
        other => AppError::AuthFailed(other.to_string()),
    }
}

/// Read operations on one open mailbox
///
/// Implemented by [`MailboxHandle`] for live servers. Every value of an
/// implementing type must end with exactly one [`Mailbox::close`].
pub trait Mailbox: Send {
    /// Mailbox name this handle has open
    fn name(&self) -> &str;

    /// UIDs matching `criteria`, ascending
    fn search(&mut self, criteria: &str) -> impl Future<Output = AppResult<Vec<u32>>> + Send;

    /// Date, From and Subject header block of one message
    fn fetch_headers(&mut self, uid: u32) -> impl Future<Output = AppResult<Vec<u8>>> + Send;

    /// Full message source of one message
    fn fetch_raw(&mut self, uid: u32) -> impl Future<Output = AppResult<Vec<u8>>> + Send;

    /// Log out and drop the connection
    fn close(self) -> impl Future<Output = ()> + Send;

    /// Count messages matching `criteria`
    fn count(&mut self, criteria: &str) -> impl Future<Output = AppResult<usize>> + Send {
        async move { Ok(self.search(criteria).await?.len()) }
    }
}

impl Mailbox for MailboxHandle {
    fn name(&self) -> &str {
        &self.mailbox
    }

    async fn search(&mut self, criteria: &str) -> AppResult<Vec<u32>> {
        MailboxHandle::search(self, criteria).await
    }

    async fn fetch_headers(&mut self, uid: u32) -> AppResult<Vec<u8>> {
        MailboxHandle::fetch_headers(self, uid).await
    }

    async fn fetch_raw(&mut self, uid: u32) -> AppResult<Vec<u8>> {
        MailboxHandle::fetch_raw(self, uid).await
    }

    async fn close(self) {
        MailboxHandle::close(self).await;
    }
}

impl MailboxHandle {
    /// Open the mailbox read-only with `EXAMINE`
    async fn examine(&mut self) -> AppResult<()> {
        let mailbox = self.mailbox.clone();
        timeout(self.socket_timeout, self.session.examine(&mailbox))
            .await
            .map_err(|_| AppError::Timeout(format!("EXAMINE timed out for mailbox '{mailbox}'")))
            .and_then(|r| {
                r.map_err(|e| AppError::Protocol(format!("cannot examine mailbox '{mailbox}': {e}")))
            })?;
        Ok(())
    }

    /// Search for messages matching query
    ///
    /// Runs `UID SEARCH` and returns matching UIDs ascending, the order
    /// servers report them in.
    async fn search(&mut self, criteria: &str) -> AppResult<Vec<u32>> {
        let set = timeout(self.socket_timeout, self.session.uid_search(criteria))
            .await
            .map_err(|_| AppError::Timeout("UID SEARCH timed out".to_owned()))
            .and_then(|r| r.map_err(|e| AppError::Protocol(format!("uid search failed: {e}"))))?;
        let mut uids: Vec<u32> = set.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    /// Fetch full RFC822 message source
    ///
    /// # Errors
    ///
    /// - `Protocol` if the UID does not exist or the fetch fails
    async fn fetch_raw(&mut self, uid: u32) -> AppResult<Vec<u8>> {
        let fetch = self.fetch_one(uid, FULL_MESSAGE).await?;
        let body = fetch
            .body()
            .ok_or_else(|| AppError::Protocol(format!("message uid {uid} has no body")))?;
        Ok(body.to_vec())
    }

    /// Fetch the Date, From and Subject header block
    async fn fetch_headers(&mut self, uid: u32) -> AppResult<Vec<u8>> {
        let fetch = self.fetch_one(uid, SUMMARY_FIELDS).await?;
        let header_bytes = fetch
            .header()
            .or_else(|| fetch.body())
            .ok_or_else(|| AppError::Protocol(format!("headers of message uid {uid} not available")))?;
        Ok(header_bytes.to_vec())
    }

    /// Fetch a single message with custom query
    ///
    /// Runs a `UID FETCH` for a specific UID and returns the first result.
    async fn fetch_one(&mut self, uid: u32, query: &str) -> AppResult<Fetch> {
        let socket_timeout = self.socket_timeout;
        let stream = timeout(
            socket_timeout,
            self.session.uid_fetch(uid.to_string(), query),
        )
        .await
        .map_err(|_| AppError::Timeout("UID FETCH timed out".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Protocol(format!("uid fetch failed: {e}"))))?;
        let fetches: Vec<Fetch> = timeout(socket_timeout, stream.try_collect())
            .await
            .map_err(|_| AppError::Timeout("UID FETCH stream timed out".to_owned()))
            .and_then(|r| {
                r.map_err(|e| AppError::Protocol(format!("uid fetch stream failed: {e}")))
            })?;

        fetches
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Protocol(format!("message uid {uid} not found")))
    }

    /// Log out and drop the connection
    ///
    /// Best effort: failures are logged and swallowed, since a broken
    /// connection cannot be closed cleanly and the caller's result is
    /// already decided.
    async fn close(mut self) {
        match timeout(self.socket_timeout, self.session.logout()).await {
            Ok(Ok(())) => debug!(mailbox = %self.mailbox, "IMAP session closed"),
            Ok(Err(e)) => warn!(mailbox = %self.mailbox, error = %e, "IMAP logout failed"),
            Err(_) => warn!(mailbox = %self.mailbox, "IMAP logout timed out"),
        }
    }
}

/// Parse a message identifier returned by search into a UID
///
/// # Errors
///
/// Returns `InvalidInput` unless the id is a positive integer.
pub fn parse_uid(id: &str) -> AppResult<u32> {
    id.trim()
        .parse::<u32>()
        .ok()
        .filter(|uid| *uid > 0)
        .ok_or_else(|| AppError::InvalidInput(format!("invalid email id '{id}'")))
}
