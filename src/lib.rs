pub mod api;
pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod db;
pub mod jwt;
pub mod password;
pub mod rate_limit;
pub mod session;

use api::create_api_router;
use axum::Router;
use db::Database;
use jwt::{JwtError, TokenIssuer};
use rate_limit::RateLimitConfig;
use session::SessionEngine;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// Secret for signing access tokens
    pub access_secret: Vec<u8>,
    /// Secret for signing refresh tokens, must differ from the access secret
    pub refresh_secret: Vec<u8>,
    /// Access token lifetime in seconds
    pub access_ttl: u64,
    /// Refresh token lifetime in seconds
    pub refresh_ttl: u64,
    /// bcrypt cost for new password hashes
    pub bcrypt_cost: u32,
    /// Per-IP limiter for register/login/social-auth, shared with the cleanup task
    pub rate_limit: Arc<RateLimitConfig>,
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Result<Router, JwtError> {
    let issuer = Arc::new(TokenIssuer::with_ttls(
        &config.access_secret,
        &config.refresh_secret,
        config.access_ttl,
        config.refresh_ttl,
    )?);

    let sessions = Arc::new(SessionEngine::new(
        config.db.clone(),
        issuer.clone(),
        config.bcrypt_cost,
    ));

    let api_router = create_api_router(
        config.db.clone(),
        issuer,
        sessions,
        config.rate_limit.clone(),
    );

    Ok(Router::new()
        .nest("/api/v1", api_router)
        .fallback(api::not_found)
        .layer(TraceLayer::new_for_http()))
}

/// Run cleanup tasks and spawn background scheduler.
/// Call this before starting the server.
pub async fn init_cleanup(config: &ServerConfig) {
    cleanup::run_cleanup(&config.db, &config.rate_limit).await;
    cleanup::spawn_cleanup_scheduler(config.db.clone(), config.rate_limit.clone());
}

/// Run the server on the given listener. This function blocks until the server exits.
/// Call `init_cleanup` before this to run cleanup on startup.
pub async fn run_server(app: Router, listener: TcpListener) -> Result<(), std::io::Error> {
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr), Box<dyn std::error::Error + Send + Sync>> {
    let app = create_app(&config)?;

    // Run cleanup tasks on startup
    init_cleanup(&config).await;

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        run_server(app, listener).await.ok();
    });

    Ok((handle, local_addr))
}
