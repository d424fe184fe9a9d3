//! Web Server Entry Point
//!
//! Serves the login, auth callback and dashboard pages with one auth client
//! per browser. Uses `anyhow` for startup errors; request-level errors are
//! `auth::AuthError` and never stop the server.

use std::net::SocketAddr;
use std::sync::Arc;

use auth::gateway::GatewayFactory;
use auth::{AuthConfig, BackendKind, ClientRegistry, InMemoryBackend, SupabaseFactory, auth_router};
use axum::{
    Router, http,
    http::{Method, header},
};
use platform::config::{EnvReader, load_dotenv};
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let dotenv_loaded = load_dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "web=info,auth=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let env = EnvReader::process();
    let config = Arc::new(AuthConfig::from_env(&env)?);

    tracing::info!(
        backend = ?config.backend,
        dotenv_loaded,
        request_timeout_secs = config.request_timeout.as_secs(),
        "Configuration loaded"
    );

    let app = match config.backend {
        BackendKind::Supabase => {
            // Tokens rotate on requests, so the refresh cookie always holds the latest one
            let factory = SupabaseFactory::new(&config)?.with_background_refresh(false);
            tracing::info!(auth_url = %factory.auth_url(), "Using hosted auth service");
            app_router(factory, config.clone())
        }
        BackendKind::Memory => {
            let backend = Arc::new(InMemoryBackend::new().with_auto_confirm());
            if let Some(demo) = env.optional("AUTH_DEMO_USER") {
                let (email, password) = demo
                    .split_once(':')
                    .ok_or_else(|| anyhow::anyhow!("AUTH_DEMO_USER must look like email:password"))?;
                backend.add_user(email, password);
                tracing::info!(email = %email, "Demo user added");
            }
            tracing::warn!("Using the in-memory auth backend; accounts are lost on restart");
            app_router(backend, config.clone())
        }
    };

    // CORS configuration
    let allowed_origins: Vec<http::HeaderValue> = env
        .list_or("FRONTEND_ORIGINS", "http://localhost:5173")
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods(AllowMethods::list([
            Method::GET,
            Method::POST,
            Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list([
            header::CONTENT_TYPE,
            header::ACCEPT,
        ]))
        .allow_credentials(true);

    let app = app.layer(TraceLayer::new_for_http()).layer(cors);

    // Start server
    let addr: SocketAddr = env.parse_or("WEB_BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?;
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

fn app_router<F>(factory: F, config: Arc<AuthConfig>) -> Router
where
    F: GatewayFactory,
{
    tracing::info!(
        max_clients = config.max_clients,
        client_idle_ttl_secs = config.client_idle_ttl.as_secs(),
        "Client registry configured"
    );
    auth_router(Arc::new(ClientRegistry::new(factory, config)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
