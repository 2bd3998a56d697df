//! mail-gateway-mcp: Session-scoped IMAP/SMTP MCP gateway
//!
//! Serves mailbox search, retrieval, daily counts and sending over the Model
//! Context Protocol. Each connection authenticates with its own `ADDR`/`ASP`
//! query parameters; sessions live exactly as long as their connection.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading, CLI and transport choice
//! - [`config`]: Environment-driven server settings and endpoint defaults
//! - [`errors`]: Application error model and user-facing wording
//! - [`session`]: Per-connection credential resolution from query parameters
//! - [`registry`]: Live session tracking tied to connection lifetime
//! - [`criteria`]: Date ranges and IMAP search criteria
//! - [`executor`]: Bounded worker pool with hard per-operation deadlines
//! - [`imap`]: IMAP transport/session operations with timeout wrappers
//! - [`smtp`]: Message building and SMTP submission
//! - [`mime`]: Header and body extraction from raw messages
//! - [`format`]: Text reports for tool results
//! - [`models`]: Input DTOs and domain entities
//! - [`server`]: MCP tool handlers with validation and business orchestration
//! - [`http`]: Streamable HTTP router and health route

mod config;
mod criteria;
mod errors;
mod executor;
mod format;
mod http;
mod imap;
mod mime;
mod models;
mod registry;
mod server;
mod session;
mod smtp;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use config::ServerConfig;
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use server::{CredentialSource, GatewayState, MailGatewayServer};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Transport the MCP server is exposed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    /// Streamable HTTP; each connection supplies credentials in its URL
    Http,
    /// Single stdio connection using `MAIL_GATEWAY_ADDR`/`MAIL_GATEWAY_ASP`
    Stdio,
}

#[derive(Debug, Parser)]
#[command(version, about = "Session-scoped IMAP/SMTP gateway for MCP clients")]
struct Cli {
    /// Transport to serve on
    #[arg(long, value_enum, default_value = "http")]
    transport: Transport,
    /// Listen address for the HTTP transport
    #[arg(long, default_value = "0.0.0.0:7047")]
    bind: SocketAddr,
    /// URL path the MCP service is mounted at
    #[arg(long, default_value = "/mcp")]
    path: String,
}

/// Application entry point
///
/// Initializes tracing from environment, loads config, and serves the MCP
/// server on the selected transport.
///
/// # Environment Variables
///
/// See [`ServerConfig::load_from_env`] for full configuration options.
///
/// # Example
///
/// ```no_run
/// MAIL_GATEWAY_OPERATION_TIMEOUT_SECONDS=30 cargo run -- --bind 127.0.0.1:7047
/// # then connect an MCP client to
/// # http://127.0.0.1:7047/mcp?ADDR=user%40gmail.com&ASP=app-password
/// ```
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load_from_env()?;
    let state = GatewayState::new(config);

    match cli.transport {
        Transport::Stdio => {
            let params = Arc::new(config::stdio_connection_params());
            let service =
                MailGatewayServer::for_connection(state, CredentialSource::Fixed(params))
                    .serve(stdio())
                    .await?;
            service.waiting().await?;
        }
        Transport::Http => {
            let shutdown = CancellationToken::new();
            tokio::spawn({
                let shutdown = shutdown.clone();
                async move {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        warn!(error = %e, "failed to listen for ctrl-c");
                    }
                    shutdown.cancel();
                }
            });

            let router = http::build_router(state.clone(), &cli.path);
            http::serve(router, cli.bind, shutdown).await?;
            info!(
                live_sessions = state.registry().live_count(),
                "server stopped"
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Transport};

    #[test]
    fn cli_defaults_to_http_on_mcp_path() {
        let cli = Cli::try_parse_from(["mail-gateway-mcp"]).expect("defaults must parse");
        assert_eq!(cli.transport, Transport::Http);
        assert_eq!(cli.bind.to_string(), "0.0.0.0:7047");
        assert_eq!(cli.path, "/mcp");
    }

    #[test]
    fn cli_accepts_stdio_transport() {
        let cli = Cli::try_parse_from(["mail-gateway-mcp", "--transport", "stdio"])
            .expect("must parse");
        assert_eq!(cli.transport, Transport::Stdio);
    }
}
