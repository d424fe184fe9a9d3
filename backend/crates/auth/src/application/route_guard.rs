//! Route Guard
//!
//! Decides whether a navigation may proceed given the current session.
//!
//! | Session | Protected path | Other path |
//! | --- | --- | --- |
//! | loading | `Loading` | `Allow` |
//! | anonymous | `Redirect` to login | `Allow` |
//! | authenticated | `Allow` | `Allow` |

use std::sync::Arc;

use url::form_urlencoded;

use crate::application::config::AuthConfig;
use crate::domain::entity::Session;
use crate::domain::value_object::return_path::ReturnPath;

/// Outcome of a guard check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    /// Send the browser to `location` (login, with `redirectTo`)
    Redirect { location: String },
    /// Initial check still running; show a neutral indicator
    Loading,
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardDecision::Allow)
    }
}

/// Route guard
#[derive(Debug, Clone)]
pub struct RouteGuard {
    config: Arc<AuthConfig>,
}

impl RouteGuard {
    pub fn new(config: Arc<AuthConfig>) -> Self {
        Self { config }
    }

    /// `path` is the requested path, query string included
    pub fn decide(&self, session: &Session, path: &str) -> GuardDecision {
        if !self.config.is_protected(path) {
            return GuardDecision::Allow;
        }
        if session.is_loading() {
            return GuardDecision::Loading;
        }
        if session.is_authenticated() {
            return GuardDecision::Allow;
        }

        GuardDecision::Redirect {
            location: self.login_location(path),
        }
    }

    /// Login path carrying the sanitized original target
    pub fn login_location(&self, requested: &str) -> String {
        match ReturnPath::parse(requested) {
            Some(target) => {
                let query = form_urlencoded::Serializer::new(String::new())
                    .append_pair("redirectTo", target.as_str())
                    .finish();
                format!("{}?{}", self.config.login_path, query)
            }
            None => self.config.login_path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::UserRecord;

    fn guard() -> RouteGuard {
        RouteGuard::new(Arc::new(AuthConfig::default()))
    }

    #[test]
    fn test_redirects_without_session() {
        let decision = guard().decide(&Session::anonymous(), "/dashboard");
        assert_eq!(
            decision,
            GuardDecision::Redirect {
                location: "/login?redirectTo=%2Fdashboard".to_string()
            }
        );
    }

    #[test]
    fn test_allows_with_session() {
        let session = Session::authenticated(UserRecord::new("u1", None));
        assert!(guard().decide(&session, "/dashboard").is_allowed());
        assert!(guard().decide(&session, "/dashboard/profile").is_allowed());
    }

    #[test]
    fn test_loading_is_neither_allow_nor_redirect() {
        assert_eq!(
            guard().decide(&Session::loading(), "/dashboard"),
            GuardDecision::Loading
        );
    }

    #[test]
    fn test_public_paths_always_allowed() {
        for path in ["/login", "/auth/callback", "/health", "/api/auth/status"] {
            assert!(guard().decide(&Session::anonymous(), path).is_allowed());
            assert!(guard().decide(&Session::loading(), path).is_allowed());
        }
    }

    #[test]
    fn test_redirect_keeps_query() {
        let decision = guard().decide(&Session::anonymous(), "/dashboard?tab=2");
        assert_eq!(
            decision,
            GuardDecision::Redirect {
                location: "/login?redirectTo=%2Fdashboard%3Ftab%3D2".to_string()
            }
        );
    }
}
