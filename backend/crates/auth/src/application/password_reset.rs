//! Password Reset and Token Flows
//!
//! Emailed links carry a one-time token. Recovery and invite tokens open a
//! session in which the user chooses a password; signup tokens just confirm
//! the address.

use std::sync::Arc;

use crate::application::session_store::SessionStore;
use crate::domain::entity::UserRecord;
use crate::domain::gateway::AuthGateway;
use crate::domain::value_object::{
    email::Email,
    login_flow::{FlowToken, TokenKind},
    password::NewPassword,
};
use crate::error::{AuthError, AuthResult};

/// Password reset use case
pub struct PasswordResetUseCase<G>
where
    G: AuthGateway,
{
    gateway: Arc<G>,
    store: Arc<SessionStore>,
}

impl<G> PasswordResetUseCase<G>
where
    G: AuthGateway,
{
    pub fn new(gateway: Arc<G>, store: Arc<SessionStore>) -> Self {
        Self { gateway, store }
    }

    /// Ask the service to email a reset link landing on `redirect_to`
    pub async fn request(&self, email: &Email, redirect_to: &str) -> AuthResult<()> {
        self.gateway.request_password_reset(email, redirect_to).await?;
        tracing::info!(email_domain = %email.domain(), "Password reset requested");
        Ok(())
    }

    /// Exchange a one-time token for a session
    pub async fn verify(&self, kind: TokenKind, token: &FlowToken) -> AuthResult<UserRecord> {
        let user = self.gateway.verify_token(kind, token).await?;
        self.store.authenticate(user.clone());
        tracing::info!(user_id = %user.id, kind = %kind, "One-time token verified");
        Ok(user)
    }

    /// Verify the token, then set the chosen password
    ///
    /// If the password update fails after the token verified, the user
    /// stays signed in with the session the token opened.
    pub async fn set_password(
        &self,
        kind: TokenKind,
        token: &FlowToken,
        password: &NewPassword,
    ) -> AuthResult<UserRecord> {
        self.verify(kind, token).await?;
        self.choose_password(kind, password).await
    }

    /// Set the chosen password in the session an emailed link opened
    ///
    /// Without that session the link counts as spent.
    pub async fn choose_password(
        &self,
        kind: TokenKind,
        password: &NewPassword,
    ) -> AuthResult<UserRecord> {
        let user = match self.gateway.update_password(password).await {
            Err(AuthError::NotAuthenticated) => return Err(AuthError::InvalidToken),
            other => other?,
        };
        self.store.authenticate(user.clone());
        tracing::info!(user_id = %user.id, kind = %kind, "Password set");
        Ok(user)
    }
}
