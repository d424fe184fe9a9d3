//! Sign In Use Case
//!
//! Authenticates a user against the remote service and records the session.

use std::sync::Arc;

use crate::application::session_store::SessionStore;
use crate::domain::entity::{Credentials, UserRecord};
use crate::domain::gateway::AuthGateway;
use crate::error::AuthResult;

/// Sign in use case
pub struct SignInUseCase<G>
where
    G: AuthGateway,
{
    gateway: Arc<G>,
    store: Arc<SessionStore>,
}

impl<G> SignInUseCase<G>
where
    G: AuthGateway,
{
    pub fn new(gateway: Arc<G>, store: Arc<SessionStore>) -> Self {
        Self { gateway, store }
    }

    /// On failure the store is left as it was
    pub async fn execute(&self, credentials: &Credentials) -> AuthResult<UserRecord> {
        let user = self.gateway.sign_in(credentials).await?;

        self.store.authenticate(user.clone());

        tracing::info!(user_id = %user.id, "User signed in");

        Ok(user)
    }
}
