//! User Record Entity
//!
//! Identity data as returned by the remote auth service. Only `id` and
//! `email` are read here; every other field is kept verbatim and passed
//! through to whoever renders it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// User record entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Remote user id (a UUID for GoTrue, opaque here)
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Everything else the service returned
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserRecord {
    pub fn new(id: impl Into<String>, email: Option<String>) -> Self {
        Self {
            id: id.into(),
            email,
            extra: Map::new(),
        }
    }

    /// Attach a pass-through field
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Email when known, id otherwise
    pub fn display_name(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.id)
    }

    /// A pass-through field
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}
