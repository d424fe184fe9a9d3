//! Sign Up Use Case
//!
//! Creates an account. Depending on the backend's confirmation setting the
//! user is signed in straight away or must follow an emailed link first.

use std::sync::Arc;

use crate::application::session_store::SessionStore;
use crate::domain::entity::NewAccount;
use crate::domain::gateway::{AuthGateway, SignUpOutcome};
use crate::error::AuthResult;

/// Sign up use case
pub struct SignUpUseCase<G>
where
    G: AuthGateway,
{
    gateway: Arc<G>,
    store: Arc<SessionStore>,
}

impl<G> SignUpUseCase<G>
where
    G: AuthGateway,
{
    pub fn new(gateway: Arc<G>, store: Arc<SessionStore>) -> Self {
        Self { gateway, store }
    }

    pub async fn execute(&self, account: &NewAccount) -> AuthResult<SignUpOutcome> {
        let outcome = self.gateway.sign_up(account).await?;

        match &outcome {
            SignUpOutcome::SignedIn(user) => {
                self.store.authenticate(user.clone());
                tracing::info!(user_id = %user.id, "User signed up");
            }
            SignUpOutcome::ConfirmationSent => {
                tracing::info!(email_domain = %account.email.domain(), "Sign-up confirmation sent");
            }
        }

        Ok(outcome)
    }
}
