//! Auth Tokens
//!
//! Access/refresh token pair of a remote session. Held only inside a
//! gateway; the refresh token leaves it solely to be persisted in an
//! HttpOnly cookie.

use chrono::{DateTime, Duration, Utc};
use std::fmt;

#[derive(Clone, PartialEq, Eq)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthTokens {
    /// `expires_in` as returned by the token endpoint, in seconds
    pub fn new(access_token: String, refresh_token: String, expires_in: i64) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at: Utc::now() + Duration::seconds(expires_in.max(0)),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// How long until the token should be refreshed, zero if already due
    pub fn refresh_due_in(&self, margin: std::time::Duration) -> std::time::Duration {
        let margin = Duration::from_std(margin).unwrap_or(Duration::zero());
        (self.expires_at - margin - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

impl fmt::Debug for AuthTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthTokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_due_in() {
        let tokens = AuthTokens::new("a".into(), "r".into(), 3600);
        let due = tokens.refresh_due_in(std::time::Duration::from_secs(60));
        assert!(due <= std::time::Duration::from_secs(3540));
        assert!(due > std::time::Duration::from_secs(3500));
        assert!(!tokens.is_expired());
    }

    #[test]
    fn test_already_due() {
        let tokens = AuthTokens::new("a".into(), "r".into(), 30);
        assert_eq!(
            tokens.refresh_due_in(std::time::Duration::from_secs(60)),
            std::time::Duration::ZERO
        );
        assert!(AuthTokens::new("a".into(), "r".into(), 0).is_expired());
    }

    #[test]
    fn test_debug_redaction() {
        let tokens = AuthTokens::new("access-secret".into(), "refresh-secret".into(), 60);
        let out = format!("{tokens:?}");
        assert!(!out.contains("secret"));
    }
}
