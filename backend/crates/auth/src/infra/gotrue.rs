//! GoTrue Wire Format
//!
//! Request/response bodies of the Supabase auth REST API and the mapping
//! of its error bodies onto `AuthError`.
//!
//! Error bodies come in several generations:
//! - `{"error": "invalid_grant", "error_description": "..."}`
//! - `{"code": 400, "error_code": "invalid_credentials", "msg": "..."}`
//! - `{"message": "..."}` (gateway in front of the service)

use serde::{Deserialize, Serialize};

use crate::domain::entity::{AuthTokens, UserRecord};
use crate::error::{AuthError, ValidationError};

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Serialize)]
pub struct PasswordGrantRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub struct RefreshGrantRequest<'a> {
    pub refresh_token: &'a str,
}

#[derive(Debug, Serialize)]
pub struct RecoverRequest<'a> {
    pub email: &'a str,
}

/// `POST /verify`: `token` + `email` for OTP codes, `token_hash` otherwise
#[derive(Debug, Serialize)]
pub struct VerifyRequest<'a> {
    #[serde(rename = "type")]
    pub kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_hash: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct UpdateUserRequest<'a> {
    pub password: &'a str,
}

// ============================================================================
// Responses
// ============================================================================

/// Session returned by the token, verify and (auto-confirmed) signup endpoints
#[derive(Deserialize)]
pub struct SessionResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub user: UserRecord,
}

impl SessionResponse {
    pub fn into_parts(self) -> (AuthTokens, UserRecord) {
        (
            AuthTokens::new(self.access_token, self.refresh_token, self.expires_in),
            self.user,
        )
    }
}

/// `POST /signup` answers with a session when the project auto-confirms,
/// with the bare user otherwise
#[derive(Deserialize)]
#[serde(untagged)]
pub enum SignUpResponse {
    Session(SessionResponse),
    User(UserRecord),
}

/// Union of the known error body shapes
#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub error_code: Option<String>,
    pub msg: Option<String>,
    pub message: Option<String>,
}

impl ErrorBody {
    /// Lenient parse; an unreadable body becomes its raw text
    pub fn parse(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_else(|_| Self {
            message: (!raw.trim().is_empty()).then(|| raw.trim().to_string()),
            ..Self::default()
        })
    }

    /// Most specific human-readable message present
    pub fn text(&self) -> &str {
        self.error_description
            .as_deref()
            .or(self.msg.as_deref())
            .or(self.message.as_deref())
            .or(self.error.as_deref())
            .unwrap_or("")
    }

    fn code(&self) -> &str {
        self.error_code
            .as_deref()
            .or(self.error.as_deref())
            .unwrap_or("")
    }
}

// ============================================================================
// Error Mapping
// ============================================================================

/// Which call produced the error; the same code means different things
/// on different endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    PasswordGrant,
    RefreshGrant,
    SignUp,
    Logout,
    User,
    Recover,
    Verify,
    UpdateUser,
    Health,
}

/// Map a non-success response onto `AuthError`
pub fn map_error(status: u16, body: &ErrorBody, endpoint: Endpoint) -> AuthError {
    let code = body.code();
    let text = body.text().to_string();
    let lower = text.to_lowercase();

    if status == 429 || code == "over_request_rate_limit" || code == "over_email_send_rate_limit"
    {
        return AuthError::RateLimited;
    }

    if status >= 500 || endpoint == Endpoint::Health {
        return AuthError::Upstream {
            status: Some(status),
            message: text,
        };
    }

    if code == "user_already_exists" || code == "email_exists" || lower.contains("already registered")
    {
        return AuthError::EmailTaken;
    }

    if code == "email_not_confirmed" || lower.contains("email not confirmed") {
        return AuthError::EmailNotConfirmed;
    }

    if code == "invalid_credentials" || lower.contains("invalid login credentials") {
        return AuthError::InvalidCredentials;
    }

    if code == "invalid_grant" {
        return match endpoint {
            Endpoint::PasswordGrant => AuthError::InvalidCredentials,
            _ => AuthError::InvalidToken,
        };
    }

    let token_problem = matches!(
        code,
        "otp_expired"
            | "bad_jwt"
            | "session_not_found"
            | "session_expired"
            | "refresh_token_not_found"
            | "refresh_token_already_used"
            | "flow_state_expired"
    ) || lower.contains("expired")
        || (lower.contains("invalid") && lower.contains("token"));

    if status == 401 || status == 403 || token_problem {
        return match endpoint {
            Endpoint::UpdateUser if !token_problem => AuthError::NotAuthenticated,
            Endpoint::PasswordGrant if !token_problem => AuthError::InvalidCredentials,
            _ => AuthError::InvalidToken,
        };
    }

    if (status == 400 || status == 422) && !text.is_empty() {
        return ValidationError::Rejected(text).into();
    }

    AuthError::Upstream {
        status: Some(status),
        message: text,
    }
}
