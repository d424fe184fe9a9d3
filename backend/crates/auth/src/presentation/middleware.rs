//! Auth Middleware
//!
//! - `resolve_client` attaches the browser's `AuthClient` to the request,
//!   rotates its tokens when they are due and keeps the client-id and
//!   refresh-token cookies in sync.
//! - `require_session` applies the route guard to protected routes.

use std::sync::Arc;

use axum::Extension;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use platform::cookie::{CookieConfig, delete_cookie_header, extract_cookie, set_cookie_header};

use crate::application::client::AuthClient;
use crate::application::config::AuthConfig;
use crate::application::route_guard::GuardDecision;
use crate::domain::gateway::{AuthGateway, GatewayFactory};
use crate::presentation::handlers::WebState;
use crate::presentation::pages;
use crate::presentation::registry::ClientId;

/// The browser's client, stored in request extensions
pub struct CurrentClient<G>
where
    G: AuthGateway + Send + Sync + 'static,
{
    pub id: ClientId,
    pub client: Arc<AuthClient<G>>,
}

impl<G> Clone for CurrentClient<G>
where
    G: AuthGateway + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            client: self.client.clone(),
        }
    }
}

// ============================================================================
// Cookies
// ============================================================================

/// Cookie holding the client id; lives as long as the browser session
pub fn client_cookie(config: &AuthConfig) -> CookieConfig {
    CookieConfig {
        same_site: config.cookie_same_site,
        ..CookieConfig::named(&config.client_cookie_name, config.cookie_secure)
    }
}

/// Cookie holding the refresh token for the next visit
pub fn refresh_cookie(config: &AuthConfig) -> CookieConfig {
    CookieConfig {
        same_site: config.cookie_same_site,
        ..CookieConfig::named(&config.refresh_cookie_name, config.cookie_secure)
    }
    .with_max_age(config.refresh_cookie_ttl.as_secs())
}

fn append_set_cookie(headers: &mut HeaderMap, cookie: &CookieConfig, value: &str) {
    match set_cookie_header(cookie, value) {
        Some(value) => {
            headers.append(header::SET_COOKIE, value);
        }
        None => tracing::warn!(cookie = %cookie.name, "Cookie value is not a valid header"),
    }
}

pub(crate) fn append_delete_cookie(headers: &mut HeaderMap, cookie: &CookieConfig) {
    if let Some(value) = delete_cookie_header(cookie) {
        headers.append(header::SET_COOKIE, value);
    }
}

// ============================================================================
// Client Resolution
// ============================================================================

/// Attach the browser's client, creating it on first sight
pub async fn resolve_client<F>(
    State(state): State<WebState<F>>,
    mut req: Request<Body>,
    next: Next,
) -> Response
where
    F: GatewayFactory,
{
    let config = state.config.clone();
    let raw_id = extract_cookie(req.headers(), &config.client_cookie_name);
    let incoming_refresh = extract_cookie(req.headers(), &config.refresh_cookie_name);

    let resolved = state
        .registry
        .get_or_create(raw_id.as_deref(), incoming_refresh.clone());
    let client = resolved.client.clone();

    req.extensions_mut().insert(CurrentClient {
        id: resolved.id,
        client: client.clone(),
    });

    // Tokens rotate only here; the cookie sync below persists them
    if !client.session().is_loading()
        && let Err(e) = client.refresh_if_due().await
    {
        e.log();
    }

    let mut response = next.run(req).await;

    // Logout already wrote its own cookies
    if client.is_torn_down() {
        return response;
    }

    let headers = response.headers_mut();
    if resolved.created {
        append_set_cookie(headers, &client_cookie(&config), &resolved.id.to_string());
    }

    match (client.refresh_token(), incoming_refresh) {
        (Some(current), incoming) if incoming.as_deref() != Some(current.as_str()) => {
            append_set_cookie(headers, &refresh_cookie(&config), &current);
        }
        (None, Some(_)) if !client.session().is_loading() => {
            append_delete_cookie(headers, &refresh_cookie(&config));
        }
        _ => {}
    }

    response
}

// ============================================================================
// Guard
// ============================================================================

/// Middleware that requires a session
///
/// Waits briefly for the initial session check, then follows the route
/// guard: `Redirect` becomes a 303 to login, `Loading` a neutral page that
/// reloads itself.
pub async fn require_session<G>(
    Extension(current): Extension<CurrentClient<G>>,
    req: Request<Body>,
    next: Next,
) -> Response
where
    G: AuthGateway + Send + Sync + 'static,
{
    let client = &current.client;
    let path = req
        .uri()
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    if client.session().is_loading() {
        client
            .store()
            .wait_until_loaded(client.config().hydration_wait)
            .await;
    }

    match client.decide(&path) {
        GuardDecision::Allow => next.run(req).await,
        GuardDecision::Redirect { location } => {
            tracing::debug!(path = %path, "Unauthenticated request redirected to login");
            Redirect::to(&location).into_response()
        }
        GuardDecision::Loading => (
            [("Refresh", "1"), ("Cache-Control", "no-store")],
            pages::loading_page(),
        )
            .into_response(),
    }
}
