//! Session Entity
//!
//! In-memory view of the current user's authentication status. One per
//! application instance, owned by the session store.

use serde::Serialize;

use crate::domain::entity::user_record::UserRecord;

/// Authentication status of one application instance
///
/// Fields are private so `is_authenticated` and `user` cannot disagree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    is_authenticated: bool,
    user: Option<UserRecord>,
    is_loading: bool,
}

impl Session {
    /// Initial state: the existing-session check has not finished
    pub fn loading() -> Self {
        Self {
            is_authenticated: false,
            user: None,
            is_loading: true,
        }
    }

    /// Check finished, nobody signed in
    pub fn anonymous() -> Self {
        Self::resolved(None)
    }

    pub fn authenticated(user: UserRecord) -> Self {
        Self::resolved(Some(user))
    }

    pub fn resolved(user: Option<UserRecord>) -> Self {
        Self {
            is_authenticated: user.is_some(),
            user,
            is_loading: false,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn user(&self) -> Option<&UserRecord> {
        self.user.as_ref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::loading()
    }
}
