//! API DTOs (Data Transfer Objects)

use serde::{Deserialize, Serialize};

use crate::application::login_controller::LoginForm;
use crate::domain::entity::{Session, UserRecord};

// ============================================================================
// Login Form
// ============================================================================

/// Urlencoded body of `POST /login`
///
/// Fields a flow does not show are simply absent.
#[derive(Clone, Default, Deserialize)]
pub struct LoginFormRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub password_confirmation: String,
}

impl std::fmt::Debug for LoginFormRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginFormRequest")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl From<LoginFormRequest> for LoginForm {
    fn from(req: LoginFormRequest) -> Self {
        LoginForm {
            email: req.email,
            password: req.password,
            password_confirmation: req.password_confirmation,
        }
    }
}

// ============================================================================
// Session Status
// ============================================================================

/// Session status response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResponse {
    pub authenticated: bool,
    pub loading: bool,
    pub user_id: Option<String>,
    pub email: Option<String>,
}

impl From<&Session> for SessionStatusResponse {
    fn from(session: &Session) -> Self {
        let user = session.user();
        Self {
            authenticated: session.is_authenticated(),
            loading: session.is_loading(),
            user_id: user.map(|u| u.id.clone()),
            email: user.and_then(|u| u.email.clone()),
        }
    }
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `healthy` or `unhealthy`
    pub status: &'static str,
    pub timestamp: String,
    /// Browser clients currently held
    pub clients: u64,
    pub services: HealthServices,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthServices {
    pub backend: ServiceStatus,
    pub auth: ServiceStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceStatus {
    pub fn healthy() -> Self {
        Self {
            status: "healthy",
            version: None,
            error: None,
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            status: "unhealthy",
            version: None,
            error: Some(error.into()),
        }
    }

    pub fn with_version(mut self, version: &'static str) -> Self {
        self.version = Some(version);
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.error.is_none()
    }
}

// ============================================================================
// Token Verification
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct VerifyTokenResponse {
    pub valid: bool,
    pub user: UserRecord,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::UserRecord;

    #[test]
    fn test_status_serializes_camel_case() {
        let session = Session::authenticated(UserRecord::new("u1", Some("a@b.co".to_string())));
        let json = serde_json::to_value(SessionStatusResponse::from(&session)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "authenticated": true,
                "loading": false,
                "userId": "u1",
                "email": "a@b.co"
            })
        );
    }

    #[test]
    fn test_service_status_omits_empty_fields() {
        let json = serde_json::to_value(ServiceStatus::healthy()).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "healthy" }));

        let down = ServiceStatus::unhealthy("unreachable");
        assert!(!down.is_healthy());
        assert_eq!(serde_json::to_value(&down).unwrap()["error"], "unreachable");
    }

    #[test]
    fn test_form_request_missing_fields_default() {
        let req: LoginFormRequest = serde_json::from_str(r#"{"email":"a@b.co"}"#).unwrap();
        assert_eq!(req.email, "a@b.co");
        assert!(req.password.is_empty());
        assert!(!format!("{req:?}").contains("password:"));
    }
}
