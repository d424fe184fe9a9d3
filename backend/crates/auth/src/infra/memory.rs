//! In-Memory Gateway Implementation
//!
//! A process-local stand-in for the hosted auth service: a user table,
//! token issuance and one-time email tokens. Used by tests and by the
//! `memory` backend of the web binary.
//!
//! "Emails" are recorded in an outbox and logged; nothing is sent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use platform::crypto::{constant_time_eq, random_bytes, random_token, sha256};
use serde_json::json;
use tokio::sync::broadcast;
use uuid::Uuid;

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

/// Default access token lifetime handed out by the memory backend
const ACCESS_TOKEN_TTL_SECS: i64 = 3600;

// ============================================================================
// Backend (shared user table)
// ============================================================================

struct StoredUser {
    id: String,
    email: String,
    salt: Vec<u8>,
    /// `None` for invited users who have not chosen a password yet
    password_hash: Option<[u8; 32]>,
    confirmed: bool,
    created_at: String,
}

impl StoredUser {
    fn record(&self) -> UserRecord {
        UserRecord::new(self.id.clone(), Some(self.email.clone()))
            .with_field("role", json!("authenticated"))
            .with_field("created_at", json!(self.created_at))
    }

    fn set_password(&mut self, password: &str) {
        self.password_hash = Some(hash_password(&self.salt, password));
    }

    fn password_matches(&self, password: &str) -> bool {
        self.password_hash
            .is_some_and(|stored| constant_time_eq(&stored, &hash_password(&self.salt, password)))
    }
}

/// A message the backend would have emailed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub kind: TokenKind,
    pub token: String,
    pub redirect_to: Option<String>,
}

#[derive(Default)]
struct BackendState {
    /// Keyed by lowercased email
    users: HashMap<String, StoredUser>,
    /// access token -> email
    access_tokens: HashMap<String, String>,
    /// refresh token -> email
    refresh_tokens: HashMap<String, String>,
    /// one-time token -> (kind, email)
    one_time: HashMap<String, (TokenKind, String)>,
    outbox: Vec<SentEmail>,
}

/// Shared user table behind every [`InMemoryGateway`]
pub struct InMemoryBackend {
    state: Mutex<BackendState>,
    auto_confirm: AtomicBool,
    offline: AtomicBool,
    latency: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    access_token_ttl: AtomicI64,
}

impl InMemoryBackend {
    /// Sign-ups need email confirmation, like a default hosted project
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BackendState::default()),
            auto_confirm: AtomicBool::new(false),
            offline: AtomicBool::new(false),
            latency: Mutex::new(None),
            calls: AtomicUsize::new(0),
            access_token_ttl: AtomicI64::new(ACCESS_TOKEN_TTL_SECS),
        }
    }

    /// Sign-ups open a session immediately
    pub fn with_auto_confirm(self) -> Self {
        self.auto_confirm.store(true, Ordering::SeqCst);
        self
    }

    /// Add a confirmed user
    pub fn add_user(&self, email: &str, password: &str) -> UserRecord {
        let mut state = self.lock();
        let user = state
            .users
            .entry(email.to_lowercase())
            .or_insert_with(|| new_user(email));
        user.set_password(password);
        user.confirmed = true;
        user.record()
    }

    /// Lifetime in seconds of access tokens issued from now on
    pub fn set_access_token_ttl(&self, secs: i64) {
        self.access_token_ttl.store(secs, Ordering::SeqCst);
    }

    /// Open a session for `email` the way an implicit-flow email link does,
    /// returning the refresh token carried in the link's fragment
    pub fn link_session(&self, email: &str) -> Option<String> {
        self.open_session(email).map(|tokens| tokens.refresh_token)
    }

    /// Access token of a fresh session for `email`, as an API caller holds it
    pub fn issue_access_token(&self, email: &str) -> Option<String> {
        self.open_session(email).map(|tokens| tokens.access_token)
    }

    fn open_session(&self, email: &str) -> Option<AuthTokens> {
        let email = email.to_lowercase();
        let mut state = self.lock();
        let user = state.users.get_mut(&email)?;
        user.confirmed = true;
        Some(self.issue_session(&mut state, &email))
    }

    /// Create an invited user and return the token of the invite email
    pub fn invite(&self, email: &str) -> String {
        let mut state = self.lock();
        state
            .users
            .entry(email.to_lowercase())
            .or_insert_with(|| new_user(email));
        issue_one_time(&mut state, TokenKind::Invite, email, None)
    }

    /// Everything "emailed" so far
    pub fn sent_emails(&self) -> Vec<SentEmail> {
        self.lock().outbox.clone()
    }

    /// Token of the latest email of `kind` sent to `email`
    pub fn last_token(&self, email: &str, kind: TokenKind) -> Option<String> {
        let email = email.to_lowercase();
        self.lock()
            .outbox
            .iter()
            .rev()
            .find(|m| m.to == email && m.kind == kind)
            .map(|m| m.token.clone())
    }

    /// Number of remote calls made so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Delay every call, to simulate a slow or hung service
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Fail every call with a network error
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Invalidate every token of `email`, as an admin action would
    pub fn revoke_sessions(&self, email: &str) {
        let email = email.to_lowercase();
        let mut state = self.lock();
        state.access_tokens.retain(|_, owner| *owner != email);
        state.refresh_tokens.retain(|_, owner| *owner != email);
    }

    pub fn gateway(self: &Arc<Self>) -> InMemoryGateway {
        InMemoryGateway::new(self.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count the call, then apply simulated latency and outages
    async fn remote_call(&self) -> AuthResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(AuthError::Network("connection refused".to_string()));
        }
        Ok(())
    }

    fn issue_session(&self, state: &mut BackendState, email: &str) -> AuthTokens {
        let ttl = self.access_token_ttl.load(Ordering::SeqCst);
        let tokens = AuthTokens::new(random_token(32), random_token(32), ttl);
        state
            .access_tokens
            .insert(tokens.access_token.clone(), email.to_string());
        state
            .refresh_tokens
            .insert(tokens.refresh_token.clone(), email.to_string());
        tokens
    }

    // ------------------------------------------------------------------------
    // Endpoints
    // ------------------------------------------------------------------------

    async fn password_grant(
        &self,
        email: &Email,
        password: &str,
    ) -> AuthResult<(AuthTokens, UserRecord)> {
        self.remote_call().await?;
        let mut state = self.lock();

        let user = state
            .users
            .get(email.as_str())
            .filter(|u| u.password_matches(password))
            .ok_or(AuthError::InvalidCredentials)?;

        if !user.confirmed {
            return Err(AuthError::EmailNotConfirmed);
        }

        let record = user.record();
        let tokens = self.issue_session(&mut state, email.as_str());
        Ok((tokens, record))
    }

    async fn refresh_grant(&self, refresh_token: &str) -> AuthResult<(AuthTokens, UserRecord)> {
        self.remote_call().await?;
        let mut state = self.lock();

        // Refresh tokens rotate: each one is good for a single use
        let email = state
            .refresh_tokens
            .remove(refresh_token)
            .ok_or(AuthError::InvalidToken)?;
        let record = state
            .users
            .get(&email)
            .map(StoredUser::record)
            .ok_or(AuthError::InvalidToken)?;

        let tokens = self.issue_session(&mut state, &email);
        Ok((tokens, record))
    }

    async fn sign_up(
        &self,
        email: &Email,
        password: &str,
    ) -> AuthResult<(Option<AuthTokens>, UserRecord)> {
        self.remote_call().await?;
        let mut state = self.lock();

        if state
            .users
            .get(email.as_str())
            .is_some_and(|u| u.password_hash.is_some())
        {
            return Err(AuthError::EmailTaken);
        }

        let auto_confirm = self.auto_confirm.load(Ordering::SeqCst);
        let user = state
            .users
            .entry(email.as_str().to_string())
            .or_insert_with(|| new_user(email.as_str()));
        user.set_password(password);
        user.confirmed = auto_confirm;
        let record = user.record();

        if auto_confirm {
            let tokens = self.issue_session(&mut state, email.as_str());
            Ok((Some(tokens), record))
        } else {
            issue_one_time(&mut state, TokenKind::Signup, email.as_str(), None);
            Ok((None, record))
        }
    }

    async fn logout(&self, access_token: &str) -> AuthResult<()> {
        self.remote_call().await?;
        let mut state = self.lock();

        let Some(email) = state.access_tokens.remove(access_token) else {
            return Err(AuthError::InvalidToken);
        };
        state.access_tokens.retain(|_, owner| *owner != email);
        state.refresh_tokens.retain(|_, owner| *owner != email);
        Ok(())
    }

    async fn user(&self, access_token: &str) -> AuthResult<UserRecord> {
        self.remote_call().await?;
        let state = self.lock();

        state
            .access_tokens
            .get(access_token)
            .and_then(|email| state.users.get(email))
            .map(StoredUser::record)
            .ok_or(AuthError::InvalidToken)
    }

    async fn recover(&self, email: &Email, redirect_to: &str) -> AuthResult<()> {
        self.remote_call().await?;
        let mut state = self.lock();

        // Unknown addresses get the same answer, so the form leaks nothing
        if state.users.contains_key(email.as_str()) {
            issue_one_time(
                &mut state,
                TokenKind::Recovery,
                email.as_str(),
                Some(redirect_to.to_string()),
            );
        }
        Ok(())
    }

    async fn verify(
        &self,
        kind: TokenKind,
        token: &FlowToken,
    ) -> AuthResult<(AuthTokens, UserRecord)> {
        self.remote_call().await?;
        let mut state = self.lock();

        let Some((issued_kind, email)) = state.one_time.remove(token.token()) else {
            return Err(AuthError::InvalidToken);
        };
        let email_matches = token.email().is_none_or(|e| e.as_str() == email);
        if issued_kind != kind || !email_matches {
            return Err(AuthError::InvalidToken);
        }

        let user = state.users.get_mut(&email).ok_or(AuthError::InvalidToken)?;
        user.confirmed = true;
        let record = user.record();

        let tokens = self.issue_session(&mut state, &email);
        Ok((tokens, record))
    }

    async fn update_password(&self, access_token: &str, password: &str) -> AuthResult<UserRecord> {
        self.remote_call().await?;
        let mut state = self.lock();

        let email = state
            .access_tokens
            .get(access_token)
            .cloned()
            .ok_or(AuthError::NotAuthenticated)?;
        let user = state.users.get_mut(&email).ok_or(AuthError::NotAuthenticated)?;
        user.set_password(password);
        Ok(user.record())
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayFactory for Arc<InMemoryBackend> {
    type Gateway = InMemoryGateway;

    fn create(&self) -> InMemoryGateway {
        self.gateway()
    }

    async fn check_health(&self) -> AuthResult<()> {
        self.remote_call().await
    }

    async fn user_for_token(&self, access_token: &str) -> AuthResult<UserRecord> {
        self.user(access_token).await
    }
}

fn new_user(email: &str) -> StoredUser {
    StoredUser {
        id: Uuid::new_v4().to_string(),
        email: email.to_lowercase(),
        salt: random_bytes(16),
        password_hash: None,
        confirmed: false,
        created_at: Utc::now().to_rfc3339(),
    }
}

fn hash_password(salt: &[u8], password: &str) -> [u8; 32] {
    let mut input = salt.to_vec();
    input.extend_from_slice(password.as_bytes());
    sha256(&input)
}

fn issue_one_time(
    state: &mut BackendState,
    kind: TokenKind,
    email: &str,
    redirect_to: Option<String>,
) -> String {
    let token = random_token(24);
    let email = email.to_lowercase();
    state
        .one_time
        .insert(token.clone(), (kind, email.clone()));

    tracing::info!(
        to = %email,
        kind = %kind,
        redirect_to = redirect_to.as_deref().unwrap_or("/login"),
        "Memory backend email queued"
    );

    state.outbox.push(SentEmail {
        to: email,
        kind,
        token: token.clone(),
        redirect_to,
    });
    token
}

// ============================================================================
// Gateway (one per application instance)
// ============================================================================

/// Gateway over an [`InMemoryBackend`], holding one session
pub struct InMemoryGateway {
    backend: Arc<InMemoryBackend>,
    tokens: Mutex<Option<AuthTokens>>,
    events: broadcast::Sender<AuthChange>,
}

impl InMemoryGateway {
    pub fn new(backend: Arc<InMemoryBackend>) -> Self {
        let (events, _) = broadcast::channel(AUTH_CHANGE_CAPACITY);
        Self {
            backend,
            tokens: Mutex::new(None),
            events,
        }
    }

    pub fn backend(&self) -> &Arc<InMemoryBackend> {
        &self.backend
    }

    /// Simulate the remote session expiring out-of-band
    pub fn expire_session(&self) {
        let previous = self.take_tokens();
        if let Some(tokens) = previous {
            let mut state = self.backend.lock();
            state.access_tokens.remove(&tokens.access_token);
            state.refresh_tokens.remove(&tokens.refresh_token);
        }
        self.publish(AuthChange::SignedOut);
    }

    fn current_tokens(&self) -> Option<AuthTokens> {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn access_token(&self) -> AuthResult<String> {
        self.current_tokens()
            .map(|t| t.access_token)
            .ok_or(AuthError::NotAuthenticated)
    }

    fn store_tokens(&self, tokens: AuthTokens) {
        *self.tokens.lock().unwrap_or_else(PoisonError::into_inner) = Some(tokens);
    }

    fn take_tokens(&self) -> Option<AuthTokens> {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn publish(&self, change: AuthChange) {
        // No receivers is fine
        let _ = self.events.send(change);
    }
}

impl AuthGateway for InMemoryGateway {
    async fn sign_in(&self, credentials: &Credentials) -> AuthResult<UserRecord> {
        let (tokens, user) = self
            .backend
            .password_grant(&credentials.email, credentials.password.expose())
            .await?;
        self.store_tokens(tokens);
        self.publish(AuthChange::SignedIn(user.clone()));
        Ok(user)
    }

    async fn sign_up(&self, account: &NewAccount) -> AuthResult<SignUpOutcome> {
        let (tokens, user) = self
            .backend
            .sign_up(&account.email, account.password.expose())
            .await?;

        match tokens {
            Some(tokens) => {
                self.store_tokens(tokens);
                self.publish(AuthChange::SignedIn(user.clone()));
                Ok(SignUpOutcome::SignedIn(user))
            }
            None => Ok(SignUpOutcome::ConfirmationSent),
        }
    }

    async fn sign_out(&self) -> AuthResult<()> {
        let Some(tokens) = self.current_tokens() else {
            return Ok(());
        };

        match self.backend.logout(&tokens.access_token).await {
            // Already gone remotely: the session is over either way
            Ok(()) | Err(AuthError::InvalidToken) => {}
            Err(e) => return Err(e),
        }

        self.take_tokens();
        self.publish(AuthChange::SignedOut);
        Ok(())
    }

    async fn current_user(&self) -> AuthResult<Option<UserRecord>> {
        let Ok(access_token) = self.access_token() else {
            return Ok(None);
        };

        match self.backend.user(&access_token).await {
            Ok(user) => Ok(Some(user)),
            Err(AuthError::InvalidToken) => {
                self.take_tokens();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn restore_session(&self, refresh_token: &str) -> AuthResult<Option<UserRecord>> {
        match self.backend.refresh_grant(refresh_token).await {
            Ok((tokens, user)) => {
                self.store_tokens(tokens);
                Ok(Some(user))
            }
            Err(AuthError::InvalidToken) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn request_password_reset(&self, email: &Email, redirect_to: &str) -> AuthResult<()> {
        self.backend.recover(email, redirect_to).await
    }

    async fn verify_token(&self, kind: TokenKind, token: &FlowToken) -> AuthResult<UserRecord> {
        let (tokens, user) = self.backend.verify(kind, token).await?;
        self.store_tokens(tokens);

        let change = match kind {
            TokenKind::Recovery => AuthChange::PasswordRecovery(user.clone()),
            TokenKind::Invite | TokenKind::Signup => AuthChange::SignedIn(user.clone()),
        };
        self.publish(change);
        Ok(user)
    }

    async fn update_password(&self, password: &NewPassword) -> AuthResult<UserRecord> {
        let access_token = self.access_token()?;
        let user = self
            .backend
            .update_password(&access_token, password.expose())
            .await?;
        self.publish(AuthChange::UserUpdated(user.clone()));
        Ok(user)
    }

    async fn refresh_session(&self) -> AuthResult<UserRecord> {
        let refresh = self.current_tokens().map(|t| t.refresh_token);
        let Some(refresh) = refresh else {
            return Err(AuthError::NotAuthenticated);
        };

        match self.backend.refresh_grant(&refresh).await {
            Ok((tokens, user)) => {
                self.store_tokens(tokens);
                self.publish(AuthChange::TokenRefreshed(user.clone()));
                Ok(user)
            }
            Err(AuthError::InvalidToken) => {
                self.take_tokens();
                self.publish(AuthChange::SignedOut);
                Err(AuthError::InvalidToken)
            }
            Err(e) => Err(e),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }

    fn refresh_token(&self) -> Option<String> {
        self.current_tokens().map(|t| t.refresh_token)
    }

    fn refresh_due_in(&self, margin: Duration) -> Option<Duration> {
        self.current_tokens().map(|t| t.refresh_due_in(margin))
    }
}
