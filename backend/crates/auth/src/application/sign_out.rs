//! Sign Out Use Case
//!
//! Ends the remote session and clears the local one.

use std::sync::Arc;

use crate::application::session_store::SessionStore;
use crate::domain::gateway::AuthGateway;
use crate::error::AuthResult;

/// Sign out use case
pub struct SignOutUseCase<G>
where
    G: AuthGateway,
{
    gateway: Arc<G>,
    store: Arc<SessionStore>,
}

impl<G> SignOutUseCase<G>
where
    G: AuthGateway,
{
    pub fn new(gateway: Arc<G>, store: Arc<SessionStore>) -> Self {
        Self { gateway, store }
    }

    /// If the remote call fails the store keeps the session
    pub async fn execute(&self) -> AuthResult<()> {
        let user_id = self.store.get().user_id().map(str::to_string);

        self.gateway.sign_out().await?;
        self.store.clear();

        tracing::info!(user_id = user_id.as_deref().unwrap_or("-"), "User signed out");

        Ok(())
    }
}
