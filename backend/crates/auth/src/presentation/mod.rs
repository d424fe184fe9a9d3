//! Presentation Layer
//!
//! HTTP handlers, DTOs, pages, router, middleware and the per-browser
//! client registry.

pub mod dto;
pub mod handlers;
pub mod middleware;
pub mod pages;
pub mod registry;
pub mod router;

pub use handlers::WebState;
pub use middleware::{CurrentClient, require_session, resolve_client};
pub use registry::{ClientId, ClientRegistry};
pub use router::auth_router;
