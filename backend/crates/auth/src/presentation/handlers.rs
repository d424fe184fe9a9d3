//! HTTP Handlers

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Form, RawQuery, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum::{Extension, Json};
use chrono::Utc;
use kernel::error::app_error::AppError;

use crate::application::config::AuthConfig;
use crate::domain::entity::UserRecord;
use crate::domain::gateway::{AuthGateway, GatewayFactory};
use crate::domain::value_object::login_flow::{FlowParams, LoginFlow, TokenKind};
use crate::error::{AuthError, AuthResult};
use crate::presentation::dto::{
    HealthResponse, HealthServices, LoginFormRequest, ServiceStatus, SessionStatusResponse,
    VerifyTokenResponse,
};
use crate::presentation::middleware::{
    CurrentClient, append_delete_cookie, client_cookie, refresh_cookie,
};
use crate::presentation::pages::{self, LoginView};
use crate::presentation::registry::ClientRegistry;

/// Shared state for auth handlers
pub struct WebState<F>
where
    F: GatewayFactory,
{
    pub registry: Arc<ClientRegistry<F>>,
    pub config: Arc<AuthConfig>,
}

impl<F> Clone for WebState<F>
where
    F: GatewayFactory,
{
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            config: self.config.clone(),
        }
    }
}

fn flow_params(query: Option<String>) -> FlowParams {
    FlowParams::from_query(query.as_deref().unwrap_or(""))
}

/// Run a factory call under the request timeout
async fn within<T>(limit: Duration, call: impl Future<Output = AuthResult<T>>) -> AuthResult<T> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(AuthError::Timeout))
}

// ============================================================================
// Home
// ============================================================================

/// GET /
pub async fn home<G>(Extension(current): Extension<CurrentClient<G>>) -> Redirect
where
    G: AuthGateway + Send + Sync + 'static,
{
    let client = &current.client;
    let session = client
        .store()
        .wait_until_loaded(client.config().hydration_wait)
        .await;

    // Still loading: the dashboard's guard shows the loading page
    if session.is_authenticated() || session.is_loading() {
        Redirect::to("/dashboard")
    } else {
        Redirect::to(&client.config().login_path)
    }
}

// ============================================================================
// Login
// ============================================================================

/// GET /login
pub async fn login_page<G>(
    Extension(current): Extension<CurrentClient<G>>,
    RawQuery(query): RawQuery,
) -> Response
where
    G: AuthGateway + Send + Sync + 'static,
{
    let mut params = flow_params(query);
    let error = params.error_description.take();
    let flow = LoginFlow::from_params(&params);

    if flow == LoginFlow::Login {
        let client = &current.client;
        let session = client
            .store()
            .wait_until_loaded(client.config().hydration_wait)
            .await;
        if session.is_authenticated() {
            return Redirect::to(params.return_path().as_str()).into_response();
        }
    }

    pages::login_page(
        &flow,
        &LoginView {
            params: Some(&params),
            email: params.email.as_deref(),
            error: error.as_deref(),
            notice: None,
        },
    )
    .into_response()
}

/// POST /login
///
/// The flow comes from the query string the form was served with.
pub async fn login_submit<G>(
    Extension(current): Extension<CurrentClient<G>>,
    RawQuery(query): RawQuery,
    Form(req): Form<LoginFormRequest>,
) -> Response
where
    G: AuthGateway + Send + Sync + 'static,
{
    let mut params = flow_params(query);
    params.error_description = None;
    let flow = LoginFlow::from_params(&params);
    let email = req.email.clone();

    match current
        .client
        .submit(&flow, req.into(), params.return_path())
        .await
    {
        Ok(result) if result.navigates() => {
            Redirect::to(result.redirect.as_str()).into_response()
        }
        Ok(result) => pages::login_page(
            &flow,
            &LoginView {
                params: Some(&params),
                email: Some(&email),
                error: None,
                notice: result.notice(),
            },
        )
        .into_response(),
        Err(e) => render_error(&flow, &params, &email, e),
    }
}

fn render_error(flow: &LoginFlow, params: &FlowParams, email: &str, e: AuthError) -> Response {
    e.log();
    let message = e.user_message();
    (
        e.status_code(),
        pages::login_page(
            flow,
            &LoginView {
                params: Some(params),
                email: Some(email),
                error: Some(&message),
                notice: None,
            },
        ),
    )
        .into_response()
}

// ============================================================================
// Logout
// ============================================================================

/// POST /logout
///
/// The browser's client and cookies go away even when the remote sign-out
/// fails.
pub async fn logout<F>(
    State(state): State<WebState<F>>,
    Extension(current): Extension<CurrentClient<F::Gateway>>,
) -> Response
where
    F: GatewayFactory,
{
    if let Err(e) = current.client.sign_out().await {
        tracing::warn!(error = %e, "Remote sign-out failed, dropping the local session anyway");
    }
    state.registry.remove(&current.id);

    let mut response = Redirect::to(&state.config.login_path).into_response();
    let headers = response.headers_mut();
    append_delete_cookie(headers, &client_cookie(&state.config));
    append_delete_cookie(headers, &refresh_cookie(&state.config));
    response
}

// ============================================================================
// Auth Callback
// ============================================================================

/// GET /auth/callback
///
/// Emailed links land here. A bare request gets a page that moves the
/// fragment into the query. A link carrying a session is adopted: recovery
/// and invite links go on to choose a password, others to their return
/// path. Everything else is forwarded to the login page.
pub async fn auth_callback<G>(
    Extension(current): Extension<CurrentClient<G>>,
    RawQuery(query): RawQuery,
) -> Response
where
    G: AuthGateway + Send + Sync + 'static,
{
    let Some(query) = query.filter(|q| !q.is_empty()) else {
        return pages::callback_page().into_response();
    };

    let mut params = FlowParams::from_query(&query);
    if let Some(refresh_token) = params.refresh_token.take() {
        match current.client.adopt_link_session(&refresh_token).await {
            Ok(_) => {
                let kind = params.flow_type.as_deref().and_then(TokenKind::parse);
                if !matches!(kind, Some(TokenKind::Recovery | TokenKind::Invite)) {
                    return Redirect::to(params.return_path().as_str()).into_response();
                }
                params.link_session = true;
            }
            Err(e) => {
                e.log();
                params
                    .error_description
                    .get_or_insert_with(|| e.user_message());
            }
        }
    }

    let forwarded = params.to_query();
    let location = if forwarded.is_empty() {
        "/login".to_string()
    } else {
        format!("/login?{forwarded}")
    };
    Redirect::to(&location).into_response()
}

// ============================================================================
// Dashboard
// ============================================================================

/// GET /dashboard (behind `require_session`)
pub async fn dashboard<G>(Extension(current): Extension<CurrentClient<G>>) -> Response
where
    G: AuthGateway + Send + Sync + 'static,
{
    let session = current.client.session();
    match session.user() {
        Some(user) => pages::dashboard_page(user).into_response(),
        // Signed out between the guard and here
        None => Redirect::to(&current.client.guard().login_location("/dashboard")).into_response(),
    }
}

// ============================================================================
// Status / Health
// ============================================================================

/// GET /api/auth/status
pub async fn session_status<G>(
    Extension(current): Extension<CurrentClient<G>>,
) -> Json<SessionStatusResponse>
where
    G: AuthGateway + Send + Sync + 'static,
{
    let client = &current.client;
    let session = client
        .store()
        .wait_until_loaded(client.config().hydration_wait)
        .await;
    Json(SessionStatusResponse::from(&session))
}

/// GET /api/auth/me
///
/// The signed-in user, confirmed with the remote service.
pub async fn me<G>(Extension(current): Extension<CurrentClient<G>>) -> AuthResult<Json<UserRecord>>
where
    G: AuthGateway + Send + Sync + 'static,
{
    let client = &current.client;
    client
        .store()
        .wait_until_loaded(client.config().hydration_wait)
        .await;
    client.current_user().await.map(Json)
}

/// POST /api/auth/verify-token
///
/// Checks a bearer access token for API callers without a browser client.
pub async fn verify_token<F>(
    State(state): State<WebState<F>>,
    headers: HeaderMap,
) -> Result<Json<VerifyTokenResponse>, AppError>
where
    F: GatewayFactory,
{
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::unauthorized("Missing bearer token"))?;

    let factory = state.registry.factory();
    match within(state.config.request_timeout, factory.user_for_token(token)).await {
        Ok(user) => Ok(Json(VerifyTokenResponse { valid: true, user })),
        Err(AuthError::InvalidToken | AuthError::NotAuthenticated) => {
            tracing::debug!("Bearer token rejected");
            Err(AppError::unauthorized("Invalid token"))
        }
        Err(e) => {
            e.log();
            Err(e.to_app_error())
        }
    }
}

/// GET /health
///
/// 503 when the auth service does not answer.
pub async fn health<F>(State(state): State<WebState<F>>) -> Response
where
    F: GatewayFactory,
{
    let factory = state.registry.factory();
    let auth = match within(state.config.request_timeout, factory.check_health()).await {
        Ok(()) => ServiceStatus::healthy(),
        Err(e) => {
            tracing::warn!(error = %e, "Auth service health check failed");
            ServiceStatus::unhealthy(e.user_message())
        }
    };

    let healthy = auth.is_healthy();
    let body = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" },
        timestamp: Utc::now().to_rfc3339(),
        clients: state.registry.len(),
        services: HealthServices {
            backend: ServiceStatus::healthy().with_version(env!("CARGO_PKG_VERSION")),
            auth,
        },
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}
