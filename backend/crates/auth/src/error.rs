//! Auth Error Types
//!
//! This module provides auth-specific error variants that integrate
//! with the unified `kernel::error::AppError` system.
//!
//! Three families, all recovered locally and shown inline:
//! - validation errors, detected before any network call
//! - authentication errors, reported by the remote service
//! - connectivity errors, shown with a generic message

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kernel::error::{app_error::AppError, kind::ErrorKind};
use platform::http_client::HttpError;
use platform::password::PasswordPolicyError;
use thiserror::Error;

/// Auth-specific result type alias
pub type AuthResult<T> = Result<T, AuthError>;

/// Form input rejected before it reaches the network
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Email is required")]
    EmailRequired,

    #[error("Invalid email format")]
    InvalidEmail,

    #[error("Email must be at most {max} characters")]
    EmailTooLong { max: usize },

    #[error("{0}")]
    Password(#[from] PasswordPolicyError),

    #[error("Passwords do not match")]
    PasswordMismatch,

    /// Rejected by the remote service's own checks (e.g. its password rules)
    #[error("{0}")]
    Rejected(String),
}

/// Auth-specific error variants
#[derive(Debug, Error)]
pub enum AuthError {
    /// Form input failed client-side validation
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// Wrong email or password
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// Invite, recovery or confirmation link no longer valid
    #[error("This link is invalid or has expired")]
    InvalidToken,

    /// Sign-up with an address that already has an account
    #[error("Email already registered")]
    EmailTaken,

    /// Account exists but its address was never confirmed
    #[error("Email address has not been confirmed")]
    EmailNotConfirmed,

    /// Operation needs a signed-in user
    #[error("Not signed in")]
    NotAuthenticated,

    /// Backend throttled the request
    #[error("Too many requests")]
    RateLimited,

    /// A submission is already in flight
    #[error("A request is already in progress")]
    Busy,

    /// The owning client was torn down while the request ran
    #[error("Request cancelled")]
    Cancelled,

    /// No answer within the request timeout
    #[error("The authentication service did not respond in time")]
    Timeout,

    /// Backend unreachable
    #[error("Unable to reach the authentication service: {0}")]
    Network(String),

    /// Backend answered with something we cannot use
    #[error("Authentication service error ({status:?}): {message}")]
    Upstream { status: Option<u16>, message: String },

    /// Misconfiguration (missing URL, bad key)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.kind().status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Get the ErrorKind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::Validation(_) => ErrorKind::BadRequest,
            AuthError::InvalidCredentials | AuthError::NotAuthenticated => ErrorKind::Unauthorized,
            AuthError::InvalidToken => ErrorKind::Gone,
            AuthError::EmailNotConfirmed => ErrorKind::Forbidden,
            AuthError::EmailTaken | AuthError::Busy | AuthError::Cancelled => ErrorKind::Conflict,
            AuthError::RateLimited => ErrorKind::TooManyRequests,
            AuthError::Timeout => ErrorKind::GatewayTimeout,
            AuthError::Network(_) => ErrorKind::ServiceUnavailable,
            AuthError::Upstream { .. } => ErrorKind::BadGateway,
            AuthError::Config(_) | AuthError::Internal(_) => ErrorKind::InternalServerError,
        }
    }

    /// Whether the backend could not be reached at all
    pub fn is_connectivity(&self) -> bool {
        matches!(self, AuthError::Timeout | AuthError::Network(_))
    }

    /// Message shown next to the form
    ///
    /// Connectivity and server-side failures get a generic text; transport
    /// details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Timeout | AuthError::Network(_) => {
                "Unable to reach the authentication service. Check your connection and try again."
                    .to_string()
            }
            AuthError::Upstream { .. } | AuthError::Config(_) | AuthError::Internal(_) => {
                "Something went wrong. Please try again later.".to_string()
            }
            other => other.to_string(),
        }
    }

    fn action(&self) -> Option<&'static str> {
        match self {
            AuthError::InvalidCredentials => Some("Check your email and password and try again"),
            AuthError::InvalidToken => Some("Request a new link"),
            AuthError::EmailTaken => Some("Sign in instead, or reset your password"),
            AuthError::EmailNotConfirmed => Some("Follow the link in the confirmation email"),
            AuthError::NotAuthenticated => Some("Sign in to continue"),
            AuthError::RateLimited => Some("Wait a moment before trying again"),
            AuthError::Busy => Some("Wait for the current request to finish"),
            AuthError::Timeout | AuthError::Network(_) => Some("Check your connection and try again"),
            _ => None,
        }
    }

    /// Convert to AppError
    pub fn to_app_error(&self) -> AppError {
        let err = AppError::new(self.kind(), self.user_message());
        match self.action() {
            Some(action) => err.with_action(action),
            None => err,
        }
    }

    /// Log the error with appropriate level
    pub fn log(&self) {
        match self {
            AuthError::Config(msg) | AuthError::Internal(msg) => {
                tracing::error!(message = %msg, "Auth internal error");
            }
            AuthError::Upstream { status, message } => {
                tracing::error!(status = ?status, message = %message, "Auth backend error");
            }
            AuthError::Network(msg) => {
                tracing::warn!(error = %msg, "Auth backend unreachable");
            }
            AuthError::Timeout => {
                tracing::warn!("Auth backend request timed out");
            }
            AuthError::InvalidCredentials => {
                tracing::warn!("Invalid login attempt");
            }
            AuthError::RateLimited => {
                tracing::warn!("Auth backend rate limited the request");
            }
            _ => {
                tracing::debug!(error = %self, "Auth error");
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        self.log();
        self.to_app_error().into_response()
    }
}

impl From<PasswordPolicyError> for AuthError {
    fn from(err: PasswordPolicyError) -> Self {
        AuthError::Validation(ValidationError::Password(err))
    }
}

impl From<HttpError> for AuthError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Timeout(_) => AuthError::Timeout,
            HttpError::Connect(msg) | HttpError::Transport(msg) => AuthError::Network(msg),
            HttpError::Decode(msg) => AuthError::Upstream {
                status: None,
                message: msg,
            },
            HttpError::Build(msg) => AuthError::Config(msg),
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        HttpError::from(err).into()
    }
}
