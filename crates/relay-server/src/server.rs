//! HTTP server assembly: shared state, routes and the serve loop.

use crate::auth::{self, CredentialStore, InMemoryCredentialStore, TokenIssuer};
use crate::config::Config;
use crate::metrics;
use crate::socket;
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, HeaderValue, Method},
    response::IntoResponse,
    routing::get,
    Router,
};
use relay_core::{Gateway, PresenceRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared server state.
pub struct AppState {
    /// The realtime gateway and its presence registry.
    pub gateway: Arc<Gateway>,
    /// User credential storage.
    pub credentials: Arc<dyn CredentialStore>,
    /// Session token issuer.
    pub tokens: TokenIssuer,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create app state with an in-memory credential store.
    ///
    /// # Errors
    ///
    /// Returns an error if no session token secret is configured.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_store(config, Arc::new(InMemoryCredentialStore::new()))
    }

    /// Create app state over an existing credential store.
    ///
    /// # Errors
    ///
    /// Returns an error if no session token secret is configured.
    pub fn with_store(config: Config, credentials: Arc<dyn CredentialStore>) -> Result<Self> {
        let tokens = TokenIssuer::new(
            config.jwt_secret()?.as_bytes(),
            Duration::from_secs(config.auth.token_ttl_secs),
        );
        let registry = Arc::new(PresenceRegistry::new());

        Ok(Self {
            gateway: Arc::new(Gateway::new(registry)),
            credentials,
            tokens,
            config,
        })
    }
}

/// Build the HTTP router.
///
/// # Errors
///
/// Returns an error if the configured client URL is not a valid origin.
pub fn build_router(state: Arc<AppState>) -> Result<Router> {
    let cors = cors_layer(state.config.client_url.as_deref())?;

    Ok(Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route(&state.config.transport.websocket_path, get(socket::ws_handler))
        .nest("/api/auth", auth::routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

/// Run the HTTP/WebSocket server until Ctrl+C.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone())?);

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = build_router(state)?;

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Relay server listening on {}", addr);
    info!(
        "Realtime endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Relay server stopped");
    Ok(())
}

fn cors_layer(client_url: Option<&str>) -> Result<CorsLayer> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE])
        .allow_credentials(true);

    match client_url {
        Some(url) => {
            let origin = HeaderValue::from_str(url)
                .with_context(|| format!("Invalid CLIENT_URL: {url}"))?;
            Ok(layer.allow_origin(origin))
        }
        None => Ok(layer),
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

async fn root_handler() -> &'static str {
    "Server is running!"
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.gateway.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.connections,
        "onlineUsers": stats.online_users,
    }))
}
