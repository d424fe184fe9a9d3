//! Application Layer
//!
//! Use cases and application services.

pub mod check_session;
pub mod client;
pub mod config;
pub mod login_controller;
pub mod password_reset;
pub mod route_guard;
pub mod session_store;
pub mod sign_in;
pub mod sign_out;
pub mod sign_up;

// Re-exports
pub use check_session::CheckSessionUseCase;
pub use client::AuthClient;
pub use config::{AuthConfig, BackendKind};
pub use login_controller::{FlowOutcome, FlowResult, LoginController, LoginForm};
pub use password_reset::PasswordResetUseCase;
pub use route_guard::{GuardDecision, RouteGuard};
pub use session_store::{SessionStore, Subscription};
pub use sign_in::SignInUseCase;
pub use sign_out::SignOutUseCase;
pub use sign_up::SignUpUseCase;
