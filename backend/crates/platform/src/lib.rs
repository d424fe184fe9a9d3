//! Platform Crate - Technical Infrastructure
//!
//! Shared technical foundations for the auth workspace:
//! - Environment configuration helpers
//! - Cookie building and parsing
//! - Random tokens and hashing helpers
//! - HTTP client construction with request timeouts
//! - Clear-text password policy (validated, zeroized on drop)

pub mod config;
pub mod cookie;
pub mod crypto;
pub mod http_client;
pub mod password;
