//! Entity Module

pub mod auth_tokens;
pub mod credentials;
pub mod session;
pub mod user_record;

pub use auth_tokens::AuthTokens;
pub use credentials::{Credentials, NewAccount};
pub use session::Session;
pub use user_record::UserRecord;
