//! Auth Router

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use std::sync::Arc;

use crate::domain::gateway::GatewayFactory;
use crate::presentation::handlers::{self, WebState};
use crate::presentation::middleware::{require_session, resolve_client};
use crate::presentation::registry::ClientRegistry;

/// Create the web router over a registry of per-browser clients
///
/// `/health` and `/api/auth/verify-token` do not need a browser client and
/// never create one.
pub fn auth_router<F>(registry: Arc<ClientRegistry<F>>) -> Router
where
    F: GatewayFactory,
{
    let state = WebState {
        config: registry.config().clone(),
        registry,
    };

    let protected = Router::new()
        .route("/dashboard", get(handlers::dashboard::<F::Gateway>))
        .route_layer(from_fn(require_session::<F::Gateway>));

    let with_client = Router::new()
        .route("/", get(handlers::home::<F::Gateway>))
        .route(
            "/login",
            get(handlers::login_page::<F::Gateway>).post(handlers::login_submit::<F::Gateway>),
        )
        .route("/logout", post(handlers::logout::<F>))
        .route("/auth/callback", get(handlers::auth_callback::<F::Gateway>))
        .route("/api/auth/status", get(handlers::session_status::<F::Gateway>))
        .route("/api/auth/me", get(handlers::me::<F::Gateway>))
        .merge(protected)
        .route_layer(from_fn_with_state(state.clone(), resolve_client::<F>));

    Router::new()
        .merge(with_client)
        .route("/api/auth/verify-token", post(handlers::verify_token::<F>))
        .route("/health", get(handlers::health::<F>))
        .with_state(state)
}
