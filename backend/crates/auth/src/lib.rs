//! Auth (Authentication) Module
//!
//! Clean Architecture structure:
//! - `domain/` - Session, user record, login flow values, gateway trait
//! - `application/` - Session store, route guard, use cases, auth client
//! - `infra/` - Hosted (Supabase/GoTrue) and in-memory gateways
//! - `presentation/` - Pages, handlers, middleware, router
//!
//! ## Features
//! - Email/password sign-in, sign-up and sign-out against a hosted service
//! - Password reset, invite and signup-confirmation token flows on one
//!   login page
//! - Route guard with a distinct loading state
//! - Background access-token refresh with out-of-band change events
//!
//! ## Session Model
//! - One `AuthClient` per application instance (per browser in the web
//!   server), owning its `SessionStore`
//! - Every gateway call bounded by a timeout and cancelled on teardown
//! - Refresh token kept in an HttpOnly cookie for the next visit

pub mod application;
pub mod domain;
pub mod error;
pub mod infra;
pub mod presentation;

// Re-exports for convenience
pub use application::client::AuthClient;
pub use application::config::{AuthConfig, BackendKind};
pub use error::{AuthError, AuthResult, ValidationError};
pub use infra::{InMemoryBackend, SupabaseFactory};
pub use presentation::registry::ClientRegistry;
pub use presentation::router::auth_router;

// Re-export kernel error types for unified error handling
pub use kernel::error::{
    app_error::{AppError, AppResult},
    kind::ErrorKind,
};

// Convenience re-exports
pub mod config {
    pub use crate::application::config::*;
}

pub mod models {
    pub use crate::domain::entity::*;
    pub use crate::domain::value_object::*;
    pub use crate::presentation::dto::*;
}

pub mod gateway {
    pub use crate::domain::gateway::*;
}

pub mod handlers {
    pub use crate::presentation::handlers::*;
}

pub mod router {
    pub use crate::presentation::router::*;
}

pub mod middleware {
    pub use crate::presentation::middleware::*;
}
