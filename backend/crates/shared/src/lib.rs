//! Shared Kernel - Domain-crossing minimal core
//!
//! The smallest vocabulary shared by every crate of the workspace:
//! - Common error type and result alias
//! - Typed identifiers
//!
//! Only things with the same meaning in every layer belong here.

pub mod error {
    pub mod app_error;
    pub mod conversions;
    pub mod kind;
}
pub mod id;
