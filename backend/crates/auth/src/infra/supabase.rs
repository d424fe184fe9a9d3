//! Supabase Gateway Implementation
//!
//! Talks to the GoTrue REST API of a hosted Supabase project. Each gateway
//! holds the tokens of one session. With background refresh on, a task
//! refreshes them `refresh_margin` before expiry; otherwise the owner calls
//! `refresh_session` when `refresh_due_in` reaches zero.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use platform::http_client::{HttpClientConfig, build_client};
use reqwest::{Method, RequestBuilder, header};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use url::Url;

use crate::application::config::AuthConfig;
use crate::domain::entity::{AuthTokens, Credentials, NewAccount, UserRecord};
use crate::domain::gateway::{
    AUTH_CHANGE_CAPACITY, AuthChange, AuthGateway, GatewayFactory, SignUpOutcome,
};
use crate::domain::value_object::{
    email::Email,
    login_flow::{FlowToken, TokenKind},
    password::NewPassword,
};
use crate::error::{AuthError, AuthResult};
use crate::infra::gotrue::{
    Endpoint, ErrorBody, PasswordGrantRequest, RecoverRequest, RefreshGrantRequest,
    SessionResponse, SignUpResponse, UpdateUserRequest, VerifyRequest, map_error,
};

/// Wait before retrying a refresh that failed for connectivity reasons
const REFRESH_RETRY_DELAY: Duration = Duration::from_secs(5);

// ============================================================================
// Factory
// ============================================================================

/// Shares one HTTP client between every gateway it creates
#[derive(Clone)]
pub struct SupabaseFactory {
    http: reqwest::Client,
    auth_url: Url,
    anon_key: String,
    refresh_margin: Duration,
    background_refresh: bool,
}

impl SupabaseFactory {
    pub fn new(config: &AuthConfig) -> AuthResult<Self> {
        if config.supabase_anon_key.is_empty() {
            return Err(AuthError::Config("SUPABASE_ANON_KEY is empty".to_string()));
        }
        let http = build_client(&HttpClientConfig::with_timeout(config.request_timeout))?;
        Self::with_client(http, &config.supabase_url, &config.supabase_anon_key, config.refresh_margin)
    }

    pub fn with_client(
        http: reqwest::Client,
        project_url: &str,
        anon_key: &str,
        refresh_margin: Duration,
    ) -> AuthResult<Self> {
        let auth_url = Url::parse(&format!("{}/auth/v1/", project_url.trim_end_matches('/')))
            .map_err(|e| AuthError::Config(format!("invalid SUPABASE_URL: {e}")))?;

        Ok(Self {
            http,
            auth_url,
            anon_key: anon_key.to_string(),
            refresh_margin,
            background_refresh: true,
        })
    }

    /// Whether gateways refresh their tokens from a background task
    ///
    /// Turn off when the refresh token must stay in step with something the
    /// gateway cannot update itself, such as a browser cookie.
    pub fn with_background_refresh(mut self, enabled: bool) -> Self {
        self.background_refresh = enabled;
        self
    }

    pub fn auth_url(&self) -> &Url {
        &self.auth_url
    }

    fn inner(&self) -> Inner {
        let (events, _) = broadcast::channel(AUTH_CHANGE_CAPACITY);
        Inner {
            http: self.http.clone(),
            auth_url: self.auth_url.clone(),
            anon_key: self.anon_key.clone(),
            refresh_margin: self.refresh_margin,
            tokens: Mutex::new(None),
            events,
        }
    }
}

impl GatewayFactory for SupabaseFactory {
    type Gateway = SupabaseGateway;

    fn create(&self) -> SupabaseGateway {
        SupabaseGateway::new(self.clone())
    }

    async fn check_health(&self) -> AuthResult<()> {
        let inner = self.inner();
        let url = inner.url("health", &[])?;
        inner
            .send_raw(inner.request(Method::GET, url, None), Endpoint::Health)
            .await?;
        Ok(())
    }

    async fn user_for_token(&self, access_token: &str) -> AuthResult<UserRecord> {
        let inner = self.inner();
        let url = inner.url("user", &[])?;
        inner
            .send(
                inner.request(Method::GET, url, Some(access_token)),
                Endpoint::User,
            )
            .await
    }
}

impl std::fmt::Debug for SupabaseFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseFactory")
            .field("auth_url", &self.auth_url.as_str())
            .field("refresh_margin", &self.refresh_margin)
            .field("background_refresh", &self.background_refresh)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Client core (shared with the refresh task)
// ============================================================================

struct Inner {
    http: reqwest::Client,
    auth_url: Url,
    anon_key: String,
    refresh_margin: Duration,
    tokens: Mutex<Option<AuthTokens>>,
    events: broadcast::Sender<AuthChange>,
}

impl Inner {
    fn url(&self, path: &str, query: &[(&str, &str)]) -> AuthResult<Url> {
        let mut url = self
            .auth_url
            .join(path)
            .map_err(|e| AuthError::Internal(format!("bad endpoint path {path}: {e}")))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url, bearer: Option<&str>) -> RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .header("apikey", &self.anon_key)
            .header(header::ACCEPT, "application/json");
        match bearer {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send and decode a JSON body, mapping error statuses
    async fn send<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        endpoint: Endpoint,
    ) -> AuthResult<T> {
        let response = self.send_raw(builder, endpoint).await?;
        response.json::<T>().await.map_err(|e| AuthError::Upstream {
            status: None,
            message: format!("unexpected response body from {endpoint:?}: {}", e.without_url()),
        })
    }

    /// Send, map error statuses, return the successful response
    async fn send_raw(
        &self,
        builder: RequestBuilder,
        endpoint: Endpoint,
    ) -> AuthResult<reqwest::Response> {
        let response = builder.send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let raw = response.text().await.unwrap_or_default();
        let err = map_error(status.as_u16(), &ErrorBody::parse(&raw), endpoint);
        tracing::debug!(
            endpoint = ?endpoint,
            status = status.as_u16(),
            error = %err,
            "Auth backend returned an error"
        );
        Err(err)
    }

    fn current_tokens(&self) -> Option<AuthTokens> {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_tokens(&self, tokens: Option<AuthTokens>) {
        *self.tokens.lock().unwrap_or_else(PoisonError::into_inner) = tokens;
    }

    fn publish(&self, change: AuthChange) {
        tracing::debug!(event = change.name(), "Auth state change");
        let _ = self.events.send(change);
    }

    async fn refresh_grant(&self, refresh_token: &str) -> AuthResult<(AuthTokens, UserRecord)> {
        let url = self.url("token", &[("grant_type", "refresh_token")])?;
        let session: SessionResponse = self
            .send(
                self.request(Method::POST, url, None)
                    .json(&RefreshGrantRequest { refresh_token }),
                Endpoint::RefreshGrant,
            )
            .await?;
        Ok(session.into_parts())
    }

    /// Rotate the held tokens; a rejected refresh token ends the session,
    /// anything else leaves it in place for a retry
    async fn refresh_held(&self) -> AuthResult<UserRecord> {
        let tokens = self.current_tokens().ok_or(AuthError::NotAuthenticated)?;

        match self.refresh_grant(&tokens.refresh_token).await {
            Ok((fresh, user)) => {
                self.set_tokens(Some(fresh));
                tracing::debug!(user_id = %user.id, "Access token refreshed");
                self.publish(AuthChange::TokenRefreshed(user.clone()));
                Ok(user)
            }
            Err(e @ (AuthError::InvalidToken | AuthError::NotAuthenticated)) => {
                tracing::info!(error = %e, "Session ended: token refresh failed");
                self.set_tokens(None);
                self.publish(AuthChange::SignedOut);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

/// Keeps the access token of `inner` fresh until the session ends or the
/// gateway is dropped
async fn refresh_loop(inner: Weak<Inner>) {
    loop {
        let due = {
            let Some(inner) = inner.upgrade() else { return };
            let Some(tokens) = inner.current_tokens() else {
                return;
            };
            tokens.refresh_due_in(inner.refresh_margin)
        };

        tokio::time::sleep(due).await;

        let Some(inner) = inner.upgrade() else { return };

        match inner.refresh_held().await {
            Ok(_) => {}
            Err(e) if inner.current_tokens().is_some() => {
                tracing::warn!(error = %e, "Token refresh failed, retrying");
                drop(inner);
                tokio::time::sleep(REFRESH_RETRY_DELAY).await;
            }
            Err(_) => return,
        }
    }
}

// ============================================================================
// Gateway
// ============================================================================

/// GoTrue-backed gateway holding one session
pub struct SupabaseGateway {
    inner: Arc<Inner>,
    background_refresh: bool,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl SupabaseGateway {
    pub fn new(factory: SupabaseFactory) -> Self {
        Self {
            inner: Arc::new(factory.inner()),
            background_refresh: factory.background_refresh,
            refresh_task: Mutex::new(None),
        }
    }

    /// Hold `tokens` and (re)schedule their refresh
    fn install(&self, tokens: AuthTokens) {
        self.inner.set_tokens(Some(tokens));
        if !self.background_refresh {
            return;
        }

        let mut task = self
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = task.take() {
            previous.abort();
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                *task = Some(handle.spawn(refresh_loop(Arc::downgrade(&self.inner))));
            }
            Err(_) => tracing::debug!("No runtime; token refresh not scheduled"),
        }
    }

    /// Forget the session locally
    fn discard(&self) {
        self.inner.set_tokens(None);
        if let Some(task) = self
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }

    fn access_token(&self) -> Option<String> {
        self.inner.current_tokens().map(|t| t.access_token)
    }
}

impl Drop for SupabaseGateway {
    fn drop(&mut self) {
        if let Some(task) = self
            .refresh_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

impl AuthGateway for SupabaseGateway {
    async fn sign_in(&self, credentials: &Credentials) -> AuthResult<UserRecord> {
        let url = self.inner.url("token", &[("grant_type", "password")])?;
        let body = PasswordGrantRequest {
            email: credentials.email.as_str(),
            password: credentials.password.expose(),
        };

        let session: SessionResponse = self
            .inner
            .send(
                self.inner.request(Method::POST, url, None).json(&body),
                Endpoint::PasswordGrant,
            )
            .await?;

        let (tokens, user) = session.into_parts();
        self.install(tokens);
        self.inner.publish(AuthChange::SignedIn(user.clone()));
        Ok(user)
    }

    async fn sign_up(&self, account: &NewAccount) -> AuthResult<SignUpOutcome> {
        let url = self.inner.url("signup", &[])?;
        let body = PasswordGrantRequest {
            email: account.email.as_str(),
            password: account.password.expose(),
        };

        let response: SignUpResponse = self
            .inner
            .send(
                self.inner.request(Method::POST, url, None).json(&body),
                Endpoint::SignUp,
            )
            .await?;

        match response {
            SignUpResponse::Session(session) => {
                let (tokens, user) = session.into_parts();
                self.install(tokens);
                self.inner.publish(AuthChange::SignedIn(user.clone()));
                Ok(SignUpOutcome::SignedIn(user))
            }
            SignUpResponse::User(_) => Ok(SignUpOutcome::ConfirmationSent),
        }
    }

    async fn sign_out(&self) -> AuthResult<()> {
        let Some(access_token) = self.access_token() else {
            return Ok(());
        };

        let url = self.inner.url("logout", &[])?;
        let result = self
            .inner
            .send_raw(
                self.inner.request(Method::POST, url, Some(&access_token)),
                Endpoint::Logout,
            )
            .await;

        match result {
            // An already-invalid token means the remote session is gone anyway
            Ok(_) | Err(AuthError::InvalidToken) | Err(AuthError::NotAuthenticated) => {
                self.discard();
                self.inner.publish(AuthChange::SignedOut);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn current_user(&self) -> AuthResult<Option<UserRecord>> {
        let Some(access_token) = self.access_token() else {
            return Ok(None);
        };

        let url = self.inner.url("user", &[])?;
        let result: AuthResult<UserRecord> = self
            .inner
            .send(
                self.inner.request(Method::GET, url, Some(&access_token)),
                Endpoint::User,
            )
            .await;

        match result {
            Ok(user) => Ok(Some(user)),
            Err(AuthError::InvalidToken) | Err(AuthError::NotAuthenticated) => {
                self.discard();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn restore_session(&self, refresh_token: &str) -> AuthResult<Option<UserRecord>> {
        match self.inner.refresh_grant(refresh_token).await {
            Ok((tokens, user)) => {
                self.install(tokens);
                Ok(Some(user))
            }
            Err(AuthError::InvalidToken) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn request_password_reset(&self, email: &Email, redirect_to: &str) -> AuthResult<()> {
        let url = self.inner.url("recover", &[("redirect_to", redirect_to)])?;
        self.inner
            .send_raw(
                self.inner
                    .request(Method::POST, url, None)
                    .json(&RecoverRequest {
                        email: email.as_str(),
                    }),
                Endpoint::Recover,
            )
            .await?;
        Ok(())
    }

    async fn verify_token(&self, kind: TokenKind, token: &FlowToken) -> AuthResult<UserRecord> {
        let url = self.inner.url("verify", &[])?;
        // An email turns the token into a short OTP code; without one it is a hash
        let body = match token.email() {
            Some(email) => VerifyRequest {
                kind: kind.as_str(),
                token: Some(token.token()),
                token_hash: None,
                email: Some(email.as_str()),
            },
            None => VerifyRequest {
                kind: kind.as_str(),
                token: None,
                token_hash: Some(token.token()),
                email: None,
            },
        };

        let session: SessionResponse = self
            .inner
            .send(
                self.inner.request(Method::POST, url, None).json(&body),
                Endpoint::Verify,
            )
            .await?;

        let (tokens, user) = session.into_parts();
        self.install(tokens);

        let change = match kind {
            TokenKind::Recovery => AuthChange::PasswordRecovery(user.clone()),
            TokenKind::Invite | TokenKind::Signup => AuthChange::SignedIn(user.clone()),
        };
        self.inner.publish(change);
        Ok(user)
    }

    async fn update_password(&self, password: &NewPassword) -> AuthResult<UserRecord> {
        let access_token = self.access_token().ok_or(AuthError::NotAuthenticated)?;

        let url = self.inner.url("user", &[])?;
        let user: UserRecord = self
            .inner
            .send(
                self.inner
                    .request(Method::PUT, url, Some(&access_token))
                    .json(&UpdateUserRequest {
                        password: password.expose(),
                    }),
                Endpoint::UpdateUser,
            )
            .await?;

        self.inner.publish(AuthChange::UserUpdated(user.clone()));
        Ok(user)
    }

    async fn refresh_session(&self) -> AuthResult<UserRecord> {
        let result = self.inner.refresh_held().await;
        if self.inner.current_tokens().is_none() {
            self.discard();
        }
        result
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.inner.events.subscribe()
    }

    fn refresh_token(&self) -> Option<String> {
        self.inner.current_tokens().map(|t| t.refresh_token)
    }

    fn refresh_due_in(&self, margin: Duration) -> Option<Duration> {
        self.inner
            .current_tokens()
            .map(|t| t.refresh_due_in(margin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ANON_KEY: &str = "anon-test-key";

    /// Minimal GoTrue stand-in
    #[derive(Clone, Default)]
    struct FakeGoTrue {
        refreshes: Arc<AtomicUsize>,
        /// expires_in handed out by the password grant
        expires_in: i64,
        slow: bool,
    }

    fn user_json() -> Value {
        json!({ "id": "u-1", "email": "test@example.com", "role": "authenticated" })
    }

    fn session_json(access: &str, refresh: &str, expires_in: i64) -> Value {
        json!({
            "access_token": access,
            "refresh_token": refresh,
            "expires_in": expires_in,
            "token_type": "bearer",
            "user": user_json(),
        })
    }

    fn has_key(headers: &HeaderMap) -> bool {
        headers.get("apikey").and_then(|v| v.to_str().ok()) == Some(ANON_KEY)
    }

    fn bearer(headers: &HeaderMap) -> Option<&str> {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }

    async fn token(
        State(fake): State<FakeGoTrue>,
        Query(query): Query<HashMap<String, String>>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Response {
        if !has_key(&headers) {
            return (StatusCode::UNAUTHORIZED, Json(json!({"message": "No API key found"})))
                .into_response();
        }
        if fake.slow {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        match query.get("grant_type").map(String::as_str) {
            Some("password") => {
                if body["email"] == "test@example.com" && body["password"] == "validpassword123" {
                    Json(session_json("access-1", "refresh-1", fake.expires_in)).into_response()
                } else if body["email"] == "limited@example.com" {
                    (StatusCode::TOO_MANY_REQUESTS, Json(json!({"msg": "Too many requests"})))
                        .into_response()
                } else {
                    (
                        StatusCode::BAD_REQUEST,
                        Json(json!({"error": "invalid_grant", "error_description": "Invalid login credentials"})),
                    )
                        .into_response()
                }
            }
            Some("refresh_token") => {
                if body["refresh_token"] == "refresh-1" || body["refresh_token"] == "refresh-2" {
                    fake.refreshes.fetch_add(1, Ordering::SeqCst);
                    Json(session_json("access-2", "refresh-2", 3600)).into_response()
                } else {
                    (
                        StatusCode::BAD_REQUEST,
                        Json(json!({"error": "invalid_grant", "error_description": "Invalid Refresh Token: Refresh Token Not Found"})),
                    )
                        .into_response()
                }
            }
            _ => StatusCode::BAD_REQUEST.into_response(),
        }
    }

    async fn signup(Json(body): Json<Value>) -> Response {
        match body["email"].as_str() {
            Some("test@example.com") => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({"code": 422, "error_code": "user_already_exists", "msg": "User already registered"})),
            )
                .into_response(),
            Some("auto@example.com") => Json(session_json("access-9", "refresh-9", 3600)).into_response(),
            _ => Json(json!({"id": "u-new", "email": body["email"], "confirmation_sent_at": "2024-01-01T00:00:00Z"}))
                .into_response(),
        }
    }

    async fn user(headers: HeaderMap) -> Response {
        match bearer(&headers) {
            Some("access-1") | Some("access-2") => Json(user_json()).into_response(),
            _ => (
                StatusCode::UNAUTHORIZED,
                Json(json!({"code": 401, "error_code": "bad_jwt", "msg": "invalid JWT"})),
            )
                .into_response(),
        }
    }

    async fn update_user(headers: HeaderMap, Json(body): Json<Value>) -> Response {
        if bearer(&headers).is_none() {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        let mut user = user_json();
        user["password_set"] = json!(body["password"].is_string());
        Json(user).into_response()
    }

    async fn logout(headers: HeaderMap) -> StatusCode {
        match bearer(&headers) {
            Some(_) => StatusCode::NO_CONTENT,
            None => StatusCode::UNAUTHORIZED,
        }
    }

    async fn recover(Query(query): Query<HashMap<String, String>>) -> Response {
        if query.get("redirect_to").map(String::as_str) == Some("http://localhost:3000/auth/callback") {
            Json(json!({})).into_response()
        } else {
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }

    async fn verify(Json(body): Json<Value>) -> Response {
        if body["token_hash"] == "good-hash" || (body["token"] == "123456" && body["email"] == "test@example.com") {
            Json(session_json("access-1", "refresh-1", 3600)).into_response()
        } else {
            (
                StatusCode::FORBIDDEN,
                Json(json!({"code": 403, "error_code": "otp_expired", "msg": "Email link is invalid or has expired"})),
            )
                .into_response()
        }
    }

    async fn health(headers: HeaderMap) -> Response {
        if has_key(&headers) {
            Json(json!({"version": "v2", "name": "GoTrue"})).into_response()
        } else {
            (StatusCode::UNAUTHORIZED, Json(json!({"message": "Invalid API key"}))).into_response()
        }
    }

    async fn spawn_fake(fake: FakeGoTrue) -> String {
        let app = Router::new()
            .route("/auth/v1/token", post(token))
            .route("/auth/v1/signup", post(signup))
            .route("/auth/v1/user", get(user).put(update_user))
            .route("/auth/v1/logout", post(logout))
            .route("/auth/v1/recover", post(recover))
            .route("/auth/v1/verify", post(verify))
            .route("/auth/v1/health", get(health))
            .with_state(fake);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn factory_for(base: &str, timeout: Duration) -> SupabaseFactory {
        let http = build_client(&HttpClientConfig::with_timeout(timeout)).unwrap();
        SupabaseFactory::with_client(http, base, ANON_KEY, Duration::from_secs(60)).unwrap()
    }

    fn gateway_for(base: &str, timeout: Duration) -> SupabaseGateway {
        factory_for(base, timeout).create()
    }

    async fn gateway(fake: FakeGoTrue) -> SupabaseGateway {
        let base = spawn_fake(FakeGoTrue {
            expires_in: if fake.expires_in == 0 { 3600 } else { fake.expires_in },
            ..fake
        })
        .await;
        gateway_for(&base, Duration::from_secs(2))
    }

    fn creds(email: &str, password: &str) -> Credentials {
        Credentials::parse(email, password.to_string()).unwrap()
    }

    #[test]
    fn test_auth_url() {
        let http = reqwest::Client::new();
        let factory =
            SupabaseFactory::with_client(http, "https://abc.supabase.co/", ANON_KEY, Duration::ZERO)
                .unwrap();
        assert_eq!(factory.auth_url().as_str(), "https://abc.supabase.co/auth/v1/");
    }

    #[tokio::test]
    async fn test_sign_in_success() {
        let gateway = gateway(FakeGoTrue::default()).await;
        let mut rx = gateway.subscribe();

        let user = gateway
            .sign_in(&creds("test@example.com", "validpassword123"))
            .await
            .unwrap();
        assert_eq!(user.id, "u-1");
        assert_eq!(gateway.refresh_token().as_deref(), Some("refresh-1"));
        assert!(matches!(rx.recv().await.unwrap(), AuthChange::SignedIn(_)));

        let current = gateway.current_user().await.unwrap();
        assert_eq!(current.unwrap().field("role"), Some(&json!("authenticated")));
    }

    #[tokio::test]
    async fn test_sign_in_wrong_password() {
        let gateway = gateway(FakeGoTrue::default()).await;
        let err = gateway
            .sign_in(&creds("test@example.com", "wrongpassword"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        assert!(gateway.refresh_token().is_none());
    }

    #[tokio::test]
    async fn test_rate_limited() {
        let gateway = gateway(FakeGoTrue::default()).await;
        let err = gateway
            .sign_in(&creds("limited@example.com", "whatever123"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::RateLimited));
    }

    #[tokio::test]
    async fn test_sign_up_outcomes() {
        let gateway = gateway(FakeGoTrue::default()).await;
        let account = |email: &str| {
            NewAccount::parse(
                email,
                "MySecure#Pass2024!".to_string(),
                "MySecure#Pass2024!".to_string(),
            )
            .unwrap()
        };

        assert!(matches!(
            gateway.sign_up(&account("test@example.com")).await,
            Err(AuthError::EmailTaken)
        ));
        assert_eq!(
            gateway.sign_up(&account("new@example.com")).await.unwrap(),
            SignUpOutcome::ConfirmationSent
        );
        assert!(matches!(
            gateway.sign_up(&account("auto@example.com")).await.unwrap(),
            SignUpOutcome::SignedIn(_)
        ));
        assert_eq!(gateway.refresh_token().as_deref(), Some("refresh-9"));
    }

    #[tokio::test]
    async fn test_restore_session() {
        let gateway = gateway(FakeGoTrue::default()).await;
        assert!(gateway.restore_session("refresh-1").await.unwrap().is_some());
        assert_eq!(gateway.refresh_token().as_deref(), Some("refresh-2"));

        let other = gateway_for(
            &spawn_fake(FakeGoTrue::default()).await,
            Duration::from_secs(2),
        );
        assert_eq!(other.restore_session("stale").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_current_user_with_stale_token_clears_session() {
        let gateway = gateway(FakeGoTrue::default()).await;
        gateway.inner.set_tokens(Some(AuthTokens::new(
            "stale-access".into(),
            "stale-refresh".into(),
            3600,
        )));
        assert_eq!(gateway.current_user().await.unwrap(), None);
        assert!(gateway.refresh_token().is_none());
    }

    #[tokio::test]
    async fn test_sign_out() {
        let gateway = gateway(FakeGoTrue::default()).await;
        gateway
            .sign_in(&creds("test@example.com", "validpassword123"))
            .await
            .unwrap();
        gateway.sign_out().await.unwrap();
        assert!(gateway.refresh_token().is_none());
        // Nothing to end the second time
        gateway.sign_out().await.unwrap();
    }

    #[tokio::test]
    async fn test_password_reset_and_verify() {
        let gateway = gateway(FakeGoTrue::default()).await;
        let email = Email::new("test@example.com").unwrap();
        gateway
            .request_password_reset(&email, "http://localhost:3000/auth/callback")
            .await
            .unwrap();

        let hash = FlowToken::new("good-hash", None).unwrap();
        let mut rx = gateway.subscribe();
        gateway.verify_token(TokenKind::Recovery, &hash).await.unwrap();
        assert!(matches!(rx.recv().await.unwrap(), AuthChange::PasswordRecovery(_)));

        let password =
            NewPassword::with_confirmation("N3w#Password!".into(), "N3w#Password!".into()).unwrap();
        let user = gateway.update_password(&password).await.unwrap();
        assert_eq!(user.field("password_set"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_verify_otp_with_email() {
        let gateway = gateway(FakeGoTrue::default()).await;
        let otp = FlowToken::new("123456", Some("test@example.com")).unwrap();
        assert!(gateway.verify_token(TokenKind::Invite, &otp).await.is_ok());

        let expired = FlowToken::new("nope", None).unwrap();
        assert!(matches!(
            gateway.verify_token(TokenKind::Invite, &expired).await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_update_password_requires_session() {
        let gateway = gateway(FakeGoTrue::default()).await;
        let password =
            NewPassword::with_confirmation("N3w#Password!".into(), "N3w#Password!".into()).unwrap();
        assert!(matches!(
            gateway.update_password(&password).await,
            Err(AuthError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn test_background_refresh() {
        let fake = FakeGoTrue {
            expires_in: 1,
            ..FakeGoTrue::default()
        };
        let refreshes = fake.refreshes.clone();
        let gateway = gateway(fake).await;
        let mut rx = gateway.subscribe();

        gateway
            .sign_in(&creds("test@example.com", "validpassword123"))
            .await
            .unwrap();
        assert!(matches!(rx.recv().await.unwrap(), AuthChange::SignedIn(_)));

        // expires_in (1s) is inside the 60s margin: refresh is due at once
        let change = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(change, AuthChange::TokenRefreshed(_)));
        assert!(refreshes.load(Ordering::SeqCst) >= 1);
        assert_eq!(gateway.refresh_token().as_deref(), Some("refresh-2"));
    }

    #[tokio::test]
    async fn test_timeout_is_classified() {
        let base = spawn_fake(FakeGoTrue {
            slow: true,
            ..FakeGoTrue::default()
        })
        .await;
        let gateway = gateway_for(&base, Duration::from_millis(200));
        let err = gateway
            .sign_in(&creds("test@example.com", "validpassword123"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Timeout), "unexpected error: {err:?}");
    }

    #[tokio::test]
    async fn test_unreachable_backend() {
        let gateway = gateway_for("http://127.0.0.1:9", Duration::from_secs(2));
        let err = gateway
            .sign_in(&creds("test@example.com", "validpassword123"))
            .await
            .unwrap_err();
        assert!(err.is_connectivity(), "unexpected error: {err:?}");
    }

    #[tokio::test]
    async fn test_refresh_on_demand_without_background_task() {
        let fake = FakeGoTrue {
            expires_in: 1,
            ..FakeGoTrue::default()
        };
        let refreshes = fake.refreshes.clone();
        let base = spawn_fake(fake).await;
        let gateway = factory_for(&base, Duration::from_secs(2))
            .with_background_refresh(false)
            .create();

        gateway
            .sign_in(&creds("test@example.com", "validpassword123"))
            .await
            .unwrap();
        assert_eq!(gateway.refresh_due_in(Duration::from_secs(60)), Some(Duration::ZERO));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(refreshes.load(Ordering::SeqCst), 0);
        assert_eq!(gateway.refresh_token().as_deref(), Some("refresh-1"));

        let mut rx = gateway.subscribe();
        gateway.refresh_session().await.unwrap();
        assert!(matches!(rx.recv().await.unwrap(), AuthChange::TokenRefreshed(_)));
        assert_eq!(gateway.refresh_token().as_deref(), Some("refresh-2"));
        assert!(gateway.refresh_due_in(Duration::from_secs(60)).unwrap() > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_refresh_session_with_rejected_token_signs_out() {
        let gateway = gateway(FakeGoTrue::default()).await;
        gateway
            .inner
            .set_tokens(Some(AuthTokens::new("a".into(), "stale".into(), 3600)));
        let mut rx = gateway.subscribe();

        assert!(matches!(
            gateway.refresh_session().await,
            Err(AuthError::InvalidToken)
        ));
        assert_eq!(rx.recv().await.unwrap(), AuthChange::SignedOut);
        assert!(gateway.refresh_token().is_none());
        assert_eq!(gateway.refresh_due_in(Duration::from_secs(60)), None);
    }

    #[tokio::test]
    async fn test_health_and_token_lookup() {
        let base = spawn_fake(FakeGoTrue::default()).await;
        let factory = factory_for(&base, Duration::from_secs(2));
        factory.check_health().await.unwrap();

        let user = factory.user_for_token("access-1").await.unwrap();
        assert_eq!(user.id, "u-1");
        assert!(matches!(
            factory.user_for_token("forged").await,
            Err(AuthError::InvalidToken)
        ));

        let http = reqwest::Client::new();
        let wrong_key = SupabaseFactory::with_client(http, &base, "bad", Duration::ZERO).unwrap();
        assert!(matches!(
            wrong_key.check_health().await,
            Err(AuthError::Upstream { status: Some(401), .. })
        ));

        let down = factory_for("http://127.0.0.1:9", Duration::from_secs(2));
        assert!(down.check_health().await.unwrap_err().is_connectivity());
    }
}
