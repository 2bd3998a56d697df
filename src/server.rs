//! MCP server implementation with tool handlers
//!
//! Implements the `ServerHandler` trait and registers the four mail tools.
//! One [`MailGatewayServer`] exists per transport connection; it resolves that
//! connection's credentials once, owns the resulting [`ConnectionScope`], and
//! renders every outcome as plain text so no mailbox failure escapes to the
//! MCP framework.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use axum::http::request::Parts;
use chrono::NaiveDate;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{ServerCapabilities, ServerInfo};
use rmcp::service::RequestContext;
use rmcp::{RoleServer, ServerHandler, tool, tool_handler, tool_router};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::criteria::{self, DateRange};
use crate::errors::{AppError, AppResult, NO_SESSION_MESSAGE};
use crate::executor::BoundedExecutor;
use crate::format::{format_daily_counts, format_results};
use crate::imap::{self, Mailbox};
use crate::mime;
use crate::models::{
    CountDailyEmailsInput, DailyCount, DayCount, Folder, GetEmailContentInput, MessageContent,
    MessageSummary, SearchEmailsInput, SendEmailInput,
};
use crate::registry::{ConnectionScope, SessionRegistry};
use crate::session::{Session, parse_query};
use crate::smtp::{self, OutgoingMessage};

/// Reply when `send_email` is called without recipients
const NO_RECIPIENT_MESSAGE: &str = "At least one recipient email address is required.";
/// Reply after a successful delivery
const SENT_MESSAGE: &str = "Email sent successfully!";
/// Hint appended to send failures
const SEND_FAILURE_HINT: &str = "Please check:\n1. Email and password are correct\n2. SMTP settings are correct\n3. Less secure app access is enabled (for Gmail)\n4. Using App Password if 2FA is enabled";

/// State shared by every connection
///
/// Cheap to clone; the transport's per-connection factory clones it into
/// each new [`MailGatewayServer`].
#[derive(Debug, Clone)]
pub struct GatewayState {
    config: Arc<ServerConfig>,
    executor: BoundedExecutor,
    registry: Arc<SessionRegistry>,
}

impl GatewayState {
    /// Build shared state from configuration
    pub fn new(config: ServerConfig) -> Self {
        Self {
            executor: BoundedExecutor::from_config(&config),
            config: Arc::new(config),
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    /// Registry of live connection sessions
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }
}

/// Where a connection's credential parameters come from
#[derive(Debug, Clone)]
pub enum CredentialSource {
    /// Query string of the HTTP request that reached the tool
    RequestQuery,
    /// Parameters fixed for the connection's whole life (stdio)
    Fixed(Arc<BTreeMap<String, String>>),
}

/// Per-connection MCP server
///
/// Clones share one connection slot, so the session lives until the
/// transport drops its last handle to this connection's server.
#[derive(Clone)]
pub struct MailGatewayServer {
    state: GatewayState,
    credentials: CredentialSource,
    /// Resolved once per connection; `None` records missing credentials
    connection: Arc<OnceLock<Option<ConnectionScope>>>,
    /// Tool router for dispatching MCP tool calls
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl MailGatewayServer {
    /// Create the server for one new connection
    pub fn for_connection(state: GatewayState, credentials: CredentialSource) -> Self {
        Self {
            state,
            credentials,
            connection: Arc::new(OnceLock::new()),
            tool_router: Self::tool_router(),
        }
    }

    /// Tool: Search messages by date range and keyword
    #[tool(
        name = "search_emails",
        description = "Search emails within a date range and/or with specific keywords. Dates are YYYY-MM-DD; the range defaults to the last 7 days. folder is 'inbox' (default) or 'sent'."
    )]
    async fn search_emails(
        &self,
        Parameters(input): Parameters<SearchEmailsInput>,
        context: RequestContext<RoleServer>,
    ) -> String {
        let started = Instant::now();
        let scope = self.connection(&context);
        finish_tool(
            Tool::SearchEmails,
            started,
            self.search_emails_impl(scope, input, &context.ct).await,
        )
    }

    /// Tool: Get one message with decoded body
    #[tool(
        name = "get_email_content",
        description = "Get the full content of a specific email by its ID from search_emails"
    )]
    async fn get_email_content(
        &self,
        Parameters(input): Parameters<GetEmailContentInput>,
        context: RequestContext<RoleServer>,
    ) -> String {
        let started = Instant::now();
        let scope = self.connection(&context);
        finish_tool(
            Tool::GetEmailContent,
            started,
            self.get_email_content_impl(scope, input, &context.ct).await,
        )
    }

    /// Tool: Count inbox messages per day
    #[tool(
        name = "count_daily_emails",
        description = "Count emails received for each day in a date range (YYYY-MM-DD, inclusive)"
    )]
    async fn count_daily_emails(
        &self,
        Parameters(input): Parameters<CountDailyEmailsInput>,
        context: RequestContext<RoleServer>,
    ) -> String {
        let started = Instant::now();
        let scope = self.connection(&context);
        finish_tool(
            Tool::CountDailyEmails,
            started,
            self.count_daily_emails_impl(scope, input, &context.ct).await,
        )
    }

    /// Tool: Send a plain-text message
    ///
    /// Callers are expected to confirm the details with the user first.
    #[tool(
        name = "send_email",
        description = "CONFIRMATION STEP: Actually send the email after user confirms the details."
    )]
    async fn send_email(
        &self,
        Parameters(input): Parameters<SendEmailInput>,
        context: RequestContext<RoleServer>,
    ) -> String {
        if input.to.is_empty() {
            return NO_RECIPIENT_MESSAGE.to_owned();
        }
        let started = Instant::now();
        let scope = self.connection(&context);
        finish_tool(
            Tool::SendEmail,
            started,
            self.send_email_impl(scope, input, &context.ct).await,
        )
    }
}

/// MCP server handler implementation
///
/// Provides server info and capabilities to MCP client.
#[tool_handler(router = self.tool_router)]
impl ServerHandler for MailGatewayServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build()).with_instructions(
            "Email gateway. Connect with ADDR (address) and ASP (app password) query parameters; search, read, count, and send mail for that account.",
        )
    }
}

/// Connection resolution
impl MailGatewayServer {
    /// This connection's scope, resolving credentials on first use
    fn connection(&self, context: &RequestContext<RoleServer>) -> AppResult<&ConnectionScope> {
        self.connection_with(|| match &self.credentials {
            CredentialSource::RequestQuery => context
                .extensions
                .get::<Parts>()
                .and_then(|parts| parts.uri.query())
                .map(parse_query)
                .unwrap_or_default(),
            CredentialSource::Fixed(params) => params.as_ref().clone(),
        })
    }

    /// Resolve the scope from connection parameters, at most once
    ///
    /// A failed resolution is remembered: every later call on the same
    /// connection reports missing credentials.
    fn connection_with(
        &self,
        params: impl FnOnce() -> BTreeMap<String, String>,
    ) -> AppResult<&ConnectionScope> {
        self.connection
            .get_or_init(|| {
                match Session::resolve(&params(), &self.state.config.defaults) {
                    Ok(session) => Some(self.state.registry.open(session)),
                    Err(e) => {
                        warn!(error = %e, "connection has no usable mail credentials");
                        None
                    }
                }
            })
            .as_ref()
            .ok_or_else(|| {
                AppError::MissingCredentials("connection has no valid credentials".to_owned())
            })
    }

    /// The session registered for this connection
    fn session(&self, scope: &ConnectionScope) -> AppResult<Arc<Session>> {
        self.state.registry.lookup(&scope.id()).ok_or_else(|| {
            AppError::MissingCredentials(format!("session {} has ended", scope.id()))
        })
    }
}

/// Tool implementation methods
///
/// Private methods handle the business logic for each tool and return typed
/// outcomes; [`finish_tool`] turns them into text. `cancel` is the request's
/// cancellation token; every executor submission derives its own from it.
impl MailGatewayServer {
    async fn search_emails_impl(
        &self,
        scope: AppResult<&ConnectionScope>,
        input: SearchEmailsInput,
        cancel: &CancellationToken,
    ) -> AppResult<String> {
        let scope = scope?;
        let criteria = criteria::build_criteria(
            input.start_date.as_deref(),
            input.end_date.as_deref(),
            input.keyword.as_deref(),
        )?;
        info!(session_id = %scope.id(), folder = ?input.folder, "searching mailbox");

        let config = Arc::clone(&self.state.config);
        let session = self.session(scope)?;
        let folder = input.folder;
        let summaries = self
            .state
            .executor
            .run("search_emails", cancel, move |token| {
                search_summaries(config, session, folder, criteria, token)
            })
            .await?;
        Ok(format_results(&summaries))
    }

    async fn get_email_content_impl(
        &self,
        scope: AppResult<&ConnectionScope>,
        input: GetEmailContentInput,
        cancel: &CancellationToken,
    ) -> AppResult<String> {
        let scope = scope?;
        let uid = imap::parse_uid(&input.email_id)?;
        info!(session_id = %scope.id(), uid, "fetching message content");

        let config = Arc::clone(&self.state.config);
        let session = self.session(scope)?;
        let folder = input.folder;
        let content = self
            .state
            .executor
            .run("get_email_content", cancel, move |token| {
                fetch_content(config, session, folder, uid, token)
            })
            .await?;
        Ok(content.to_string())
    }

    async fn count_daily_emails_impl(
        &self,
        scope: AppResult<&ConnectionScope>,
        input: CountDailyEmailsInput,
        cancel: &CancellationToken,
    ) -> AppResult<String> {
        let scope = scope?;
        let range = DateRange::resolve(Some(input.start_date.as_str()), Some(input.end_date.as_str()))?;
        let max_days = self.state.config.max_count_days;
        if range.day_count() > max_days {
            return Err(AppError::InvalidInput(format!(
                "date range spans {} days; at most {max_days} are allowed",
                range.day_count()
            )));
        }
        info!(session_id = %scope.id(), days = range.day_count(), "counting daily emails");

        let config = Arc::clone(&self.state.config);
        let session = self.session(scope)?;
        let counts = count_days(&self.state.executor, &range, cancel, move |day, token| {
            count_on_day(Arc::clone(&config), Arc::clone(&session), day, token)
        })
        .await?;
        Ok(format_daily_counts(&counts))
    }

    async fn send_email_impl(
        &self,
        scope: AppResult<&ConnectionScope>,
        input: SendEmailInput,
        cancel: &CancellationToken,
    ) -> AppResult<String> {
        let scope = scope?;
        let session = self.session(scope)?;
        let message = OutgoingMessage {
            to: input.to,
            cc: input.cc.unwrap_or_default(),
            subject: input.subject,
            body: input.content,
        }
        .build(&session.address)?;
        info!(session_id = %scope.id(), "sending email");

        let socket_timeout = Duration::from_millis(self.state.config.socket_timeout_ms);
        self.state
            .executor
            .run_blocking("send_email", cancel, move || {
                smtp::send(&session, &message, socket_timeout)
            })
            .await?;
        Ok(SENT_MESSAGE.to_owned())
    }
}

/// Search a folder and parse up to `max_results` message headers
///
/// Owns all of its inputs so it can run detached on a worker.
async fn search_summaries(
    config: Arc<ServerConfig>,
    session: Arc<Session>,
    folder: Folder,
    criteria: String,
    cancel: CancellationToken,
) -> AppResult<Vec<MessageSummary>> {
    let mailbox = until_cancelled(&cancel, imap::connect(&config, &session, folder)).await?;
    summarize(mailbox, &criteria, config.max_results, &cancel).await
}

/// Search an open mailbox, then close it whatever the outcome
async fn summarize<M: Mailbox>(
    mut mailbox: M,
    criteria: &str,
    max_results: usize,
    cancel: &CancellationToken,
) -> AppResult<Vec<MessageSummary>> {
    let result = collect_summaries(&mut mailbox, criteria, max_results, cancel).await;
    mailbox.close().await;
    result
}

/// Parse the first `max_results` matches in server order
///
/// Messages whose headers cannot be decoded are skipped. Stops before the
/// next protocol call once `cancel` fires.
async fn collect_summaries<M: Mailbox>(
    mailbox: &mut M,
    criteria: &str,
    max_results: usize,
    cancel: &CancellationToken,
) -> AppResult<Vec<MessageSummary>> {
    let mut uids = until_cancelled(cancel, mailbox.search(criteria)).await?;
    uids.truncate(max_results);

    let mut summaries = Vec::with_capacity(uids.len());
    for uid in uids {
        let header_bytes = until_cancelled(cancel, mailbox.fetch_headers(uid)).await?;
        match mime::parse_summary(&uid.to_string(), &header_bytes) {
            Ok(summary) => summaries.push(summary),
            Err(e) => warn!(mailbox = mailbox.name(), uid, error = %e, "skipping undecodable message"),
        }
    }
    Ok(summaries)
}

/// Fetch and parse one full message
async fn fetch_content(
    config: Arc<ServerConfig>,
    session: Arc<Session>,
    folder: Folder,
    uid: u32,
    cancel: CancellationToken,
) -> AppResult<MessageContent> {
    let mailbox = until_cancelled(&cancel, imap::connect(&config, &session, folder)).await?;
    read_message(mailbox, uid, &cancel).await
}

async fn read_message<M: Mailbox>(
    mut mailbox: M,
    uid: u32,
    cancel: &CancellationToken,
) -> AppResult<MessageContent> {
    let raw = until_cancelled(cancel, mailbox.fetch_raw(uid)).await;
    mailbox.close().await;
    mime::parse_content(&uid.to_string(), &raw?)
}

/// Count inbox messages received on `day` over a dedicated connection
async fn count_on_day(
    config: Arc<ServerConfig>,
    session: Arc<Session>,
    day: NaiveDate,
    cancel: CancellationToken,
) -> AppResult<usize> {
    let criteria = criteria::date_criteria(&DateRange { start: day, end: day })?;
    let mailbox =
        until_cancelled(&cancel, imap::connect(&config, &session, Folder::Inbox)).await?;
    tally(mailbox, &criteria, &cancel).await
}

async fn tally<M: Mailbox>(
    mut mailbox: M,
    criteria: &str,
    cancel: &CancellationToken,
) -> AppResult<usize> {
    let count = until_cancelled(cancel, mailbox.count(criteria)).await;
    mailbox.close().await;
    count
}

/// Await one adapter call unless the submission has been abandoned
///
/// A call already in flight is dropped when `cancel` fires; the caller still
/// owns the mailbox and must close it.
async fn until_cancelled<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = AppResult<T>>,
) -> AppResult<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(AppError::Cancelled("operation abandoned".to_owned())),
        result = call => result,
    }
}

/// Count every day in `range`, each under its own deadline
///
/// A day whose count times out is recorded as [`DayCount::TimedOut`] and the
/// remaining days still run; any other failure aborts the whole report.
async fn count_days<F, Fut>(
    executor: &BoundedExecutor,
    range: &DateRange,
    cancel: &CancellationToken,
    count_one: F,
) -> AppResult<Vec<DailyCount>>
where
    F: Fn(NaiveDate, CancellationToken) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = AppResult<usize>> + Send + 'static,
{
    let mut counts = Vec::with_capacity(range.day_count());
    for day in range.days() {
        let count_one = count_one.clone();
        let outcome = executor
            .run("count_daily_emails", cancel, move |token| count_one(day, token))
            .await;
        let count = match outcome {
            Ok(n) => DayCount::Count(n),
            Err(e) if e.is_timeout() => DayCount::TimedOut,
            Err(e) => return Err(e),
        };
        counts.push(DailyCount { date: day, count });
    }
    Ok(counts)
}

/// Tools exposed to MCP clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tool {
    SearchEmails,
    GetEmailContent,
    CountDailyEmails,
    SendEmail,
}

impl Tool {
    fn name(self) -> &'static str {
        match self {
            Self::SearchEmails => "search_emails",
            Self::GetEmailContent => "get_email_content",
            Self::CountDailyEmails => "count_daily_emails",
            Self::SendEmail => "send_email",
        }
    }

    fn timeout_message(self) -> &'static str {
        match self {
            Self::SearchEmails => {
                "Search operation timed out. Please try with a more specific search criteria."
            }
            Self::GetEmailContent => "Operation timed out while fetching email content.",
            Self::CountDailyEmails => "Operation timed out while counting emails.",
            Self::SendEmail => "Operation timed out while sending email.",
        }
    }
}

/// Turn a tool outcome into the text returned to the client
fn finish_tool(tool: Tool, started: Instant, outcome: AppResult<String>) -> String {
    let duration_ms = duration_ms(started);
    match outcome {
        Ok(text) => {
            info!(tool = tool.name(), duration_ms, "tool completed");
            text
        }
        Err(e) => {
            warn!(tool = tool.name(), duration_ms, error = %e, "tool failed");
            render_error(tool, &e)
        }
    }
}

/// Choose the user-facing wording for a failure
fn render_error(tool: Tool, err: &AppError) -> String {
    match err {
        AppError::MissingCredentials(_) => NO_SESSION_MESSAGE.to_owned(),
        AppError::Timeout(_) => tool.timeout_message().to_owned(),
        _ if tool == Tool::SendEmail => {
            format!("Failed to send email: {err}\n\n{SEND_FAILURE_HINT}")
        }
        _ => err.user_message(),
    }
}

/// Calculate elapsed milliseconds
fn duration_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}
