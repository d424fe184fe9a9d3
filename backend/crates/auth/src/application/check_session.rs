//! Check Session Use Case
//!
//! Startup hydration: looks for an existing remote session and resolves the
//! store's loading state whatever the outcome.

use std::sync::Arc;

use crate::application::session_store::SessionStore;
use crate::domain::entity::{Session, UserRecord};
use crate::domain::gateway::AuthGateway;
use crate::error::AuthResult;

/// Check session use case
pub struct CheckSessionUseCase<G>
where
    G: AuthGateway,
{
    gateway: Arc<G>,
    store: Arc<SessionStore>,
}

impl<G> CheckSessionUseCase<G>
where
    G: AuthGateway,
{
    pub fn new(gateway: Arc<G>, store: Arc<SessionStore>) -> Self {
        Self { gateway, store }
    }

    /// Hydrate from `persisted_refresh` when given, else from whatever
    /// session the gateway already holds
    ///
    /// Errors are logged and treated as "no session"; the store always
    /// leaves the loading state.
    pub async fn execute(&self, persisted_refresh: Option<&str>) -> Session {
        let found = self.lookup(persisted_refresh).await;

        let user = match found {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(error = %e, "Existing session check failed");
                None
            }
        };

        tracing::debug!(
            authenticated = user.is_some(),
            restored = persisted_refresh.is_some(),
            "Session check finished"
        );

        self.store.resolve(user);
        self.store.get()
    }

    async fn lookup(&self, persisted_refresh: Option<&str>) -> AuthResult<Option<UserRecord>> {
        match persisted_refresh {
            Some(token) => self.gateway.restore_session(token).await,
            None => self.gateway.current_user().await,
        }
    }
}
