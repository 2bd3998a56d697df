//! Streamable HTTP surface
//!
//! Mounts the MCP service under a configurable path next to a health route.
//! The service factory runs once per MCP session, so every session gets its
//! own [`MailGatewayServer`] and therefore its own connection scope.

use std::net::SocketAddr;

use axum::Router;
use axum::routing::get;
use axum::Json;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::{StreamableHttpServerConfig, StreamableHttpService};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::server::{CredentialSource, GatewayState, MailGatewayServer};

/// Body of the health route
const HEALTH_STATUS: &str = "Email Client Server is running";

/// Build the router: `GET /` health plus the MCP service at `mcp_path`
pub fn build_router(state: GatewayState, mcp_path: &str) -> Router {
    let service = StreamableHttpService::new(
        move || {
            Ok(MailGatewayServer::for_connection(
                state.clone(),
                CredentialSource::RequestQuery,
            ))
        },
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig::default(),
    );

    Router::new()
        .route("/", get(health))
        .nest_service(mcp_path, service)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": HEALTH_STATUS }))
}

/// Serve `router` on `bind` until `shutdown` is cancelled
pub async fn serve(
    router: Router,
    bind: SocketAddr,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(address = %listener.local_addr()?, "listening for MCP connections");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled_owned().await })
        .await
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::build_router;
    use crate::config::ServerConfig;
    use crate::server::GatewayState;

    #[tokio::test]
    async fn health_route_reports_running() {
        let router = build_router(GatewayState::new(ServerConfig::default()), "/mcp");
        let response = router
            .oneshot(Request::get("/").body(Body::empty()).expect("valid request"))
            .await
            .expect("router must respond");
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body must read");
        let value: Value = serde_json::from_slice(&body).expect("json body");
        assert_eq!(value["status"], "Email Client Server is running");
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let router = build_router(GatewayState::new(ServerConfig::default()), "/mcp");
        let response = router
            .oneshot(Request::get("/nope").body(Body::empty()).expect("valid request"))
            .await
            .expect("router must respond");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_check_opens_no_session() {
        let state = GatewayState::new(ServerConfig::default());
        let router = build_router(state.clone(), "/mcp");
        router
            .oneshot(
                Request::get("/?ADDR=a%40x.y&ASP=s")
                    .body(Body::empty())
                    .expect("valid request"),
            )
            .await
            .expect("router must respond");
        assert_eq!(state.registry().live_count(), 0);
    }
}
