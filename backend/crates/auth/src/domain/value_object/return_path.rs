//! Return Path Value Object
//!
//! Where to send the user after a successful login. Only same-site relative
//! paths are accepted, so a crafted `redirectTo` cannot bounce the user to
//! another origin.

use serde::Serialize;
use std::fmt;

/// Post-login target when none (or an unsafe one) was requested
pub const DEFAULT_RETURN_PATH: &str = "/dashboard";

/// Maximum accepted length
const MAX_RETURN_PATH_LENGTH: usize = 2048;

/// Sanitized same-site path, query string included
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReturnPath(String);

impl ReturnPath {
    /// Accept `raw` only if it is a relative path on this site
    ///
    /// - must start with `/`
    /// - must not start with `//` or `/\` (protocol-relative URLs)
    /// - no backslashes or control characters anywhere
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();

        if raw.is_empty() || raw.len() > MAX_RETURN_PATH_LENGTH {
            return None;
        }
        if !raw.starts_with('/') || raw.starts_with("//") {
            return None;
        }
        if raw.contains('\\') || raw.chars().any(char::is_control) {
            return None;
        }

        Some(Self(raw.to_string()))
    }

    /// Sanitize an optional parameter, falling back to the default target
    pub fn or_default(raw: Option<&str>) -> Self {
        raw.and_then(Self::parse).unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the default target
    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_RETURN_PATH
    }
}

impl Default for ReturnPath {
    fn default() -> Self {
        Self(DEFAULT_RETURN_PATH.to_string())
    }
}

impl fmt::Display for ReturnPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ReturnPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
