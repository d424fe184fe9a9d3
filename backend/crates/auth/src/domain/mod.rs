//! Domain Layer
//!
//! Contains entities, value objects, and the gateway trait.

pub mod entity;
pub mod gateway;
pub mod value_object;

// Re-exports
pub use entity::{AuthTokens, Credentials, NewAccount, Session, UserRecord};
pub use gateway::{AuthChange, AuthGateway, AuthListener, GatewayFactory, SignUpOutcome};
