//! Auth Client
//!
//! One application instance's view of authentication: its gateway, its
//! session store, the login controller and the route guard, wired
//! together with a lifecycle.
//!
//! - `start` hydrates the store in the background.
//! - Out-of-band changes (expiry, refresh) flow from the gateway into the
//!   store through a listener.
//! - `refresh_if_due` rotates tokens on demand, for owners that persist the
//!   refresh token and must see every rotation.
//! - Every remote call is bounded by the request timeout and by
//!   `teardown`, after which nothing touches the store again.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio_util::sync::CancellationToken;

use crate::application::check_session::CheckSessionUseCase;
use crate::application::config::AuthConfig;
use crate::application::login_controller::{FlowResult, LoginController, LoginForm};
use crate::application::route_guard::{GuardDecision, RouteGuard};
use crate::application::session_store::{SessionStore, Subscription};
use crate::application::sign_in::SignInUseCase;
use crate::application::sign_out::SignOutUseCase;
use crate::domain::entity::{Credentials, Session, UserRecord};
use crate::domain::gateway::{AuthChange, AuthGateway, AuthListener, on_auth_state_change};
use crate::domain::value_object::{login_flow::LoginFlow, return_path::ReturnPath};
use crate::error::{AuthError, AuthResult};

/// Auth client
pub struct AuthClient<G>
where
    G: AuthGateway + Send + Sync + 'static,
{
    gateway: Arc<G>,
    store: Arc<SessionStore>,
    config: Arc<AuthConfig>,
    guard: RouteGuard,
    controller: LoginController<G>,
    sign_in: SignInUseCase<G>,
    sign_out: SignOutUseCase<G>,
    check_session: CheckSessionUseCase<G>,
    cancel: CancellationToken,
    listener: Mutex<Option<AuthListener>>,
    /// Serializes on-demand refreshes; refresh tokens are single-use
    refreshing: AsyncMutex<()>,
}

impl<G> AuthClient<G>
where
    G: AuthGateway + Send + Sync + 'static,
{
    /// Wire a client around `gateway`; the store starts out loading
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(gateway: G, config: Arc<AuthConfig>) -> Self {
        let gateway = Arc::new(gateway);
        let store = Arc::new(SessionStore::new());

        let listener = {
            let store = store.clone();
            let watched = gateway.clone();
            on_auth_state_change(gateway.as_ref(), move |change| {
                apply_change(&store, watched.as_ref(), change);
            })
        };

        Self {
            guard: RouteGuard::new(config.clone()),
            controller: LoginController::new(gateway.clone(), store.clone(), config.clone()),
            sign_in: SignInUseCase::new(gateway.clone(), store.clone()),
            sign_out: SignOutUseCase::new(gateway.clone(), store.clone()),
            check_session: CheckSessionUseCase::new(gateway.clone(), store.clone()),
            gateway,
            store,
            config,
            cancel: CancellationToken::new(),
            listener: Mutex::new(Some(listener)),
            refreshing: AsyncMutex::new(()),
        }
    }

    /// New client with hydration running in the background
    ///
    /// `persisted_refresh` is a refresh token kept from an earlier visit.
    pub fn start(gateway: G, config: Arc<AuthConfig>, persisted_refresh: Option<String>) -> Arc<Self> {
        let client = Arc::new(Self::new(gateway, config));

        let hydrating = client.clone();
        tokio::spawn(async move {
            hydrating.hydrate(persisted_refresh.as_deref()).await;
        });

        client
    }

    /// Initial session check
    ///
    /// The store always leaves loading unless the client is torn down
    /// first.
    pub async fn hydrate(&self, persisted_refresh: Option<&str>) -> Session {
        let checked = self
            .bounded(async { Ok(self.check_session.execute(persisted_refresh).await) })
            .await;

        match checked {
            Ok(session) => session,
            Err(AuthError::Cancelled) => self.store.get(),
            Err(e) => {
                tracing::warn!(error = %e, "Session check did not finish");
                self.store.resolve(None);
                self.store.get()
            }
        }
    }

    // ========================================================================
    // Session state
    // ========================================================================

    pub fn session(&self) -> Session {
        self.store.get()
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    pub fn config(&self) -> &Arc<AuthConfig> {
        &self.config
    }

    pub fn watch(&self) -> watch::Receiver<Session> {
        self.store.watch()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        self.store.subscribe(callback)
    }

    /// Guard decision for navigating to `path`
    pub fn decide(&self, path: &str) -> GuardDecision {
        self.guard.decide(&self.store.get(), path)
    }

    pub fn guard(&self) -> &RouteGuard {
        &self.guard
    }

    /// Refresh token to persist for the next visit
    pub fn refresh_token(&self) -> Option<String> {
        self.gateway.refresh_token()
    }

    pub fn is_busy(&self) -> bool {
        self.controller.is_busy()
    }

    /// Whether the access token is within `refresh_margin` of expiry
    pub fn refresh_due(&self) -> bool {
        self.gateway
            .refresh_due_in(self.config.refresh_margin)
            .is_some_and(|left| left.is_zero())
    }

    // ========================================================================
    // Operations
    // ========================================================================

    pub async fn sign_in(&self, email: &str, password: String) -> AuthResult<UserRecord> {
        let credentials = Credentials::parse(email, password)?;
        let _busy = self.controller.begin()?;
        self.bounded(self.sign_in.execute(&credentials)).await
    }

    pub async fn sign_out(&self) -> AuthResult<()> {
        self.bounded(self.sign_out.execute()).await
    }

    /// Rotate the tokens if they are due; `true` when a rotation happened
    ///
    /// A rejected refresh token ends the session. Connectivity failures keep
    /// it, to be retried on the next call.
    pub async fn refresh_if_due(&self) -> AuthResult<bool> {
        if !self.refresh_due() {
            return Ok(false);
        }

        let _turn = self.refreshing.lock().await;
        // Rotated by a concurrent caller while this one waited
        if !self.refresh_due() {
            return Ok(false);
        }

        match self.bounded(self.gateway.refresh_session()).await {
            Ok(user) => {
                if self.store.get().is_authenticated() {
                    self.store.authenticate(user);
                }
                Ok(true)
            }
            Err(e @ (AuthError::InvalidToken | AuthError::NotAuthenticated)) => {
                if self.store.clear() {
                    tracing::info!("Session ended: refresh token rejected");
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Adopt the session an implicit-flow email link carried
    pub async fn adopt_link_session(&self, refresh_token: &str) -> AuthResult<UserRecord> {
        let user = self
            .bounded(self.gateway.restore_session(refresh_token))
            .await?
            .ok_or(AuthError::InvalidToken)?;
        self.store.authenticate(user.clone());
        tracing::info!(user_id = %user.id, "Session adopted from email link");
        Ok(user)
    }

    /// User of the current session, confirmed with the remote service
    pub async fn current_user(&self) -> AuthResult<UserRecord> {
        if !self.store.get().is_authenticated() {
            return Err(AuthError::NotAuthenticated);
        }

        match self.bounded(self.gateway.current_user()).await? {
            Some(user) => {
                self.store.authenticate(user.clone());
                Ok(user)
            }
            None => {
                self.store.clear();
                Err(AuthError::NotAuthenticated)
            }
        }
    }

    /// Submit the login page form for `flow`
    pub async fn submit(
        &self,
        flow: &LoginFlow,
        form: LoginForm,
        redirect: ReturnPath,
    ) -> AuthResult<FlowResult> {
        self.bounded(self.controller.submit(flow, form, redirect))
            .await
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Cancel in-flight calls and stop listening for changes
    pub fn teardown(&self) {
        self.cancel.cancel();
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = listener {
            listener.unsubscribe();
        }
        tracing::debug!("Auth client torn down");
    }

    pub fn is_torn_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn bounded<T, F>(&self, call: F) -> AuthResult<T>
    where
        F: Future<Output = AuthResult<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(AuthError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AuthError::Cancelled),
            result = tokio::time::timeout(self.config.request_timeout, call) => {
                result.unwrap_or_else(|_| Err(AuthError::Timeout))
            }
        }
    }
}

impl<G> Drop for AuthClient<G>
where
    G: AuthGateway + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Mirror an out-of-band change into the store
///
/// Sign-ins are written by the operation that caused them. A sign-out is
/// only applied while the gateway really holds no session, so a stale
/// event cannot undo a newer sign-in.
fn apply_change<G>(store: &SessionStore, gateway: &G, change: AuthChange)
where
    G: AuthGateway + ?Sized,
{
    tracing::debug!(event = change.name(), "Auth state changed");

    match change {
        AuthChange::SignedOut => {
            if gateway.refresh_token().is_none() && store.clear() {
                tracing::info!("Session ended out-of-band");
            }
        }
        AuthChange::TokenRefreshed(user) | AuthChange::UserUpdated(user) => {
            if store.get().is_authenticated() {
                store.authenticate(user);
            }
        }
        AuthChange::SignedIn(_) | AuthChange::PasswordRecovery(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::memory::{InMemoryBackend, InMemoryGateway};
    use std::time::Duration;

    const EMAIL: &str = "test@example.com";
    const PASSWORD: &str = "validpassword123";

    fn backend() -> Arc<InMemoryBackend> {
        let backend = Arc::new(InMemoryBackend::new());
        backend.add_user(EMAIL, PASSWORD);
        backend
    }

    fn config() -> Arc<AuthConfig> {
        Arc::new(AuthConfig {
            request_timeout: Duration::from_millis(300),
            ..AuthConfig::development()
        })
    }

    fn client(backend: &Arc<InMemoryBackend>) -> AuthClient<InMemoryGateway> {
        AuthClient::new(backend.gateway(), config())
    }

    #[tokio::test]
    async fn test_hydrate_without_session_resolves_anonymous() {
        let backend = backend();
        let client = client(&backend);
        assert!(client.session().is_loading());
        assert_eq!(client.decide("/dashboard"), GuardDecision::Loading);

        let session = client.hydrate(None).await;
        assert!(!session.is_loading());
        assert!(!session.is_authenticated());
        assert!(matches!(
            client.decide("/dashboard"),
            GuardDecision::Redirect { .. }
        ));
    }

    #[tokio::test]
    async fn test_start_restores_persisted_session() {
        let backend = backend();
        let first = client(&backend);
        first.hydrate(None).await;
        first.sign_in(EMAIL, PASSWORD.to_string()).await.unwrap();
        let refresh = first.refresh_token();
        assert!(refresh.is_some());

        let second = AuthClient::start(backend.gateway(), config(), refresh);
        let session = second
            .store()
            .wait_until_loaded(Duration::from_secs(1))
            .await;
        assert!(session.is_authenticated());
        assert_eq!(
            session.user().and_then(|u| u.email.as_deref()),
            Some(EMAIL)
        );
    }

    #[tokio::test]
    async fn test_hydrate_timeout_still_resolves() {
        let backend = backend();
        backend.set_latency(Some(Duration::from_secs(2)));
        let client = client(&backend);

        let session = client.hydrate(Some("whatever")).await;
        assert!(!session.is_loading());
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_sign_in_and_out() {
        let backend = backend();
        let client = client(&backend);
        client.hydrate(None).await;

        let user = client.sign_in(EMAIL, PASSWORD.to_string()).await.unwrap();
        assert_eq!(user.email.as_deref(), Some(EMAIL));
        assert!(client.decide("/dashboard").is_allowed());

        client.sign_out().await.unwrap();
        assert!(!client.session().is_authenticated());
        assert!(client.refresh_token().is_none());
    }

    #[tokio::test]
    async fn test_invalid_input_never_reaches_backend() {
        let backend = backend();
        let client = client(&backend);
        client.hydrate(None).await;
        let calls = backend.call_count();

        let err = client
            .sign_in("bad", PASSWORD.to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
        assert_eq!(backend.call_count(), calls);
    }

    #[tokio::test]
    async fn test_slow_backend_times_out() {
        let backend = backend();
        let client = client(&backend);
        client.hydrate(None).await;

        backend.set_latency(Some(Duration::from_secs(2)));
        let err = client
            .sign_in(EMAIL, PASSWORD.to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Timeout));
        assert!(!client.session().is_authenticated());
        assert!(!client.is_busy());
    }

    #[tokio::test]
    async fn test_teardown_cancels_without_touching_store() {
        let backend = backend();
        let client = Arc::new(client(&backend));
        client.hydrate(None).await;
        let before = client.session();

        backend.set_latency(Some(Duration::from_millis(200)));
        let pending = {
            let client = client.clone();
            tokio::spawn(async move { client.sign_in(EMAIL, PASSWORD.to_string()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.teardown();

        assert!(matches!(pending.await.unwrap(), Err(AuthError::Cancelled)));
        assert!(client.is_torn_down());

        // Let the dropped backend call settle
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(client.session(), before);

        assert!(matches!(
            client.sign_out().await,
            Err(AuthError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_out_of_band_expiry_clears_store() {
        let backend = backend();
        let client = client(&backend);
        client.hydrate(None).await;
        client.sign_in(EMAIL, PASSWORD.to_string()).await.unwrap();

        let mut rx = client.watch();
        client.gateway().expire_session();

        tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|s| !s.is_authenticated()))
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            client.decide("/dashboard"),
            GuardDecision::Redirect { .. }
        ));
    }

    #[tokio::test]
    async fn test_token_refresh_keeps_session() {
        let backend = backend();
        let client = client(&backend);
        client.hydrate(None).await;
        client.sign_in(EMAIL, PASSWORD.to_string()).await.unwrap();
        let before = client.refresh_token();

        client.gateway().refresh_session().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(client.session().is_authenticated());
        assert_ne!(client.refresh_token(), before);
    }

    #[tokio::test]
    async fn test_submit_login_flow() {
        let backend = backend();
        let client = client(&backend);
        client.hydrate(None).await;

        let form = LoginForm {
            email: EMAIL.to_string(),
            password: PASSWORD.to_string(),
            password_confirmation: String::new(),
        };
        let result = client
            .submit(&LoginFlow::Login, form, ReturnPath::default())
            .await
            .unwrap();
        assert!(result.navigates());
        assert_eq!(result.redirect.as_str(), "/dashboard");
        assert!(client.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let backend = backend();
        let client = client(&backend);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = {
            let seen = seen.clone();
            client.subscribe(move |s| seen.lock().unwrap().push(s.is_authenticated()))
        };

        client.hydrate(None).await;
        client.sign_in(EMAIL, PASSWORD.to_string()).await.unwrap();
        client.sign_out().await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![false, true, false]);
    }

    fn due_config() -> Arc<AuthConfig> {
        // Tokens live 30s against a 60s margin: always due
        Arc::new(AuthConfig {
            request_timeout: Duration::from_millis(300),
            refresh_margin: Duration::from_secs(60),
            ..AuthConfig::development()
        })
    }

    #[tokio::test]
    async fn test_refresh_if_due_rotates_once() {
        let backend = backend();
        let client = Arc::new(AuthClient::new(backend.gateway(), due_config()));
        client.hydrate(None).await;
        assert!(!client.refresh_if_due().await.unwrap());

        client.sign_in(EMAIL, PASSWORD.to_string()).await.unwrap();
        assert!(!client.refresh_due());

        backend.set_access_token_ttl(30);
        client.gateway().refresh_session().await.unwrap();
        let before = client.refresh_token();
        assert!(client.refresh_due());

        // Concurrent callers: one rotation after the other, never a reuse
        backend.set_latency(Some(Duration::from_millis(50)));
        let (a, b) = tokio::join!(client.refresh_if_due(), client.refresh_if_due());
        assert!(a.unwrap() && b.unwrap());
        assert_ne!(client.refresh_token(), before);
        assert!(client.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_refresh_if_due_keeps_session_while_offline() {
        let backend = backend();
        backend.set_access_token_ttl(30);
        let client = AuthClient::new(backend.gateway(), due_config());
        client.hydrate(None).await;
        client.sign_in(EMAIL, PASSWORD.to_string()).await.unwrap();

        backend.set_offline(true);
        assert!(client.refresh_if_due().await.unwrap_err().is_connectivity());
        assert!(client.session().is_authenticated());
        assert!(client.refresh_token().is_some());

        backend.set_offline(false);
        backend.revoke_sessions(EMAIL);
        assert!(matches!(
            client.refresh_if_due().await,
            Err(AuthError::InvalidToken)
        ));
        assert!(!client.session().is_authenticated());
        assert!(client.refresh_token().is_none());
    }

    #[tokio::test]
    async fn test_adopt_link_session() {
        let backend = backend();
        let client = client(&backend);
        client.hydrate(None).await;

        assert!(matches!(
            client.adopt_link_session("forged").await,
            Err(AuthError::InvalidToken)
        ));
        assert!(!client.session().is_authenticated());

        let refresh = backend.link_session(EMAIL).unwrap();
        let user = client.adopt_link_session(&refresh).await.unwrap();
        assert_eq!(user.email.as_deref(), Some(EMAIL));
        assert!(client.session().is_authenticated());
        assert_eq!(client.current_user().await.unwrap().id, user.id);
    }

    #[tokio::test]
    async fn test_current_user_after_revocation() {
        let backend = backend();
        let client = client(&backend);
        client.hydrate(None).await;
        assert!(matches!(
            client.current_user().await,
            Err(AuthError::NotAuthenticated)
        ));

        client.sign_in(EMAIL, PASSWORD.to_string()).await.unwrap();
        backend.revoke_sessions(EMAIL);
        assert!(matches!(
            client.current_user().await,
            Err(AuthError::NotAuthenticated)
        ));
        assert!(!client.session().is_authenticated());
    }
}
