//! Infrastructure Layer
//!
//! Gateway implementations: the hosted GoTrue service and an in-process
//! stand-in.

pub mod gotrue;
pub mod memory;
pub mod supabase;

pub use memory::{InMemoryBackend, InMemoryGateway};
pub use supabase::{SupabaseFactory, SupabaseGateway};
