//! Auth Gateway Trait
//!
//! Interface to the remote authentication service. Implementations are in
//! the infrastructure layer.
//!
//! A gateway instance holds at most one remote session: the one of the
//! application instance that owns it.

use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::domain::entity::{Credentials, NewAccount, UserRecord};
use crate::domain::value_object::{
    email::Email,
    login_flow::{FlowToken, TokenKind},
    password::NewPassword,
};
use crate::error::AuthResult;

/// Capacity of the out-of-band event channel of a gateway
pub const AUTH_CHANGE_CAPACITY: usize = 16;

/// Out-of-band change of the remote session
#[derive(Debug, Clone, PartialEq)]
pub enum AuthChange {
    SignedIn(UserRecord),
    SignedOut,
    TokenRefreshed(UserRecord),
    UserUpdated(UserRecord),
    /// A recovery link was verified; the user must choose a new password
    PasswordRecovery(UserRecord),
}

impl AuthChange {
    /// User after the change, `None` once signed out
    pub fn user(&self) -> Option<&UserRecord> {
        match self {
            AuthChange::SignedOut => None,
            AuthChange::SignedIn(user)
            | AuthChange::TokenRefreshed(user)
            | AuthChange::UserUpdated(user)
            | AuthChange::PasswordRecovery(user) => Some(user),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AuthChange::SignedIn(_) => "SIGNED_IN",
            AuthChange::SignedOut => "SIGNED_OUT",
            AuthChange::TokenRefreshed(_) => "TOKEN_REFRESHED",
            AuthChange::UserUpdated(_) => "USER_UPDATED",
            AuthChange::PasswordRecovery(_) => "PASSWORD_RECOVERY",
        }
    }
}

/// Result of a sign-up
#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    /// Backend auto-confirmed the address and opened a session
    SignedIn(UserRecord),
    /// A confirmation link was emailed; no session yet
    ConfirmationSent,
}

/// Auth gateway trait
#[trait_variant::make(AuthGateway: Send)]
pub trait LocalAuthGateway {
    /// Email/password sign-in
    async fn sign_in(&self, credentials: &Credentials) -> AuthResult<UserRecord>;

    /// Create an account
    async fn sign_up(&self, account: &NewAccount) -> AuthResult<SignUpOutcome>;

    /// End the remote session
    async fn sign_out(&self) -> AuthResult<()>;

    /// User of the session this gateway holds, if any
    async fn current_user(&self) -> AuthResult<Option<UserRecord>>;

    /// Re-establish a persisted session from its refresh token
    async fn restore_session(&self, refresh_token: &str) -> AuthResult<Option<UserRecord>>;

    /// Email a password-reset link that lands on `redirect_to`
    async fn request_password_reset(&self, email: &Email, redirect_to: &str) -> AuthResult<()>;

    /// Exchange an emailed one-time token for a session
    async fn verify_token(&self, kind: TokenKind, token: &FlowToken) -> AuthResult<UserRecord>;

    /// Set the password of the signed-in user
    async fn update_password(&self, password: &NewPassword) -> AuthResult<UserRecord>;

    /// Rotate the held tokens now
    ///
    /// Publishes `TokenRefreshed`; a rejected refresh token drops the
    /// session and publishes `SignedOut`.
    async fn refresh_session(&self) -> AuthResult<UserRecord>;

    /// Out-of-band session changes (refresh, expiry)
    fn subscribe(&self) -> broadcast::Receiver<AuthChange>;

    /// Current refresh token, for persistence in an HttpOnly cookie
    fn refresh_token(&self) -> Option<String>;

    /// Time left before the access token is within `margin` of expiry,
    /// `None` without a session
    fn refresh_due_in(&self, margin: Duration) -> Option<Duration>;
}

/// Creates one gateway per application instance
pub trait GatewayFactory: Send + Sync + 'static {
    type Gateway: AuthGateway + Send + Sync + 'static;

    fn create(&self) -> Self::Gateway;

    /// Whether the remote service answers
    fn check_health(&self) -> impl Future<Output = AuthResult<()>> + Send;

    /// User owning `access_token`, without adopting it as a session
    fn user_for_token(
        &self,
        access_token: &str,
    ) -> impl Future<Output = AuthResult<UserRecord>> + Send;
}

// ============================================================================
// Listener
// ============================================================================

/// Scoped subscription to a gateway's auth changes
///
/// The callback runs on a background task until `unsubscribe` is called or
/// the listener is dropped.
#[derive(Debug)]
pub struct AuthListener {
    task: Option<JoinHandle<()>>,
}

impl AuthListener {
    pub fn unsubscribe(mut self) {
        self.stop();
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for AuthListener {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Invoke `callback` for every out-of-band change of `gateway`'s session
///
/// Must be called inside a tokio runtime.
pub fn on_auth_state_change<G, F>(gateway: &G, callback: F) -> AuthListener
where
    G: AuthGateway + ?Sized,
    F: Fn(AuthChange) + Send + 'static,
{
    let mut rx = gateway.subscribe();
    let task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(change) => callback(change),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Auth change listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    AuthListener { task: Some(task) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct ChannelOnly(broadcast::Sender<AuthChange>);

    impl AuthGateway for ChannelOnly {
        async fn sign_in(&self, _: &Credentials) -> AuthResult<UserRecord> {
            Err(crate::error::AuthError::InvalidCredentials)
        }
        async fn sign_up(&self, _: &NewAccount) -> AuthResult<SignUpOutcome> {
            Ok(SignUpOutcome::ConfirmationSent)
        }
        async fn sign_out(&self) -> AuthResult<()> {
            Ok(())
        }
        async fn current_user(&self) -> AuthResult<Option<UserRecord>> {
            Ok(None)
        }
        async fn restore_session(&self, _: &str) -> AuthResult<Option<UserRecord>> {
            Ok(None)
        }
        async fn request_password_reset(&self, _: &Email, _: &str) -> AuthResult<()> {
            Ok(())
        }
        async fn verify_token(&self, _: TokenKind, _: &FlowToken) -> AuthResult<UserRecord> {
            Err(crate::error::AuthError::InvalidToken)
        }
        async fn update_password(&self, _: &NewPassword) -> AuthResult<UserRecord> {
            Err(crate::error::AuthError::NotAuthenticated)
        }
        async fn refresh_session(&self) -> AuthResult<UserRecord> {
            Err(crate::error::AuthError::NotAuthenticated)
        }
        fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
            self.0.subscribe()
        }
        fn refresh_token(&self) -> Option<String> {
            None
        }
        fn refresh_due_in(&self, _: Duration) -> Option<Duration> {
            None
        }
    }

    #[tokio::test]
    async fn test_listener_receives_until_dropped() {
        let (tx, _) = broadcast::channel(AUTH_CHANGE_CAPACITY);
        let gateway = ChannelOnly(tx.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let listener = {
            let seen = seen.clone();
            on_auth_state_change(&gateway, move |change| {
                seen.lock().unwrap().push(change.name());
            })
        };
        assert!(listener.is_active());

        tx.send(AuthChange::SignedOut).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*seen.lock().unwrap(), vec!["SIGNED_OUT"]);

        listener.unsubscribe();
        tokio::time::sleep(Duration::from_millis(20)).await;
        // No receiver left once the task is gone
        assert!(tx.send(AuthChange::SignedOut).is_err());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_change_user() {
        let user = UserRecord::new("u1", None);
        assert_eq!(AuthChange::TokenRefreshed(user.clone()).user(), Some(&user));
        assert_eq!(AuthChange::SignedOut.user(), None);
    }
}
