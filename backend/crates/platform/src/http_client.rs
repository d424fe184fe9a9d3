//! HTTP Client Construction
//!
//! One `reqwest::Client` per process, built with an overall request timeout
//! so a hung backend surfaces as an error instead of a stuck page.

use std::time::Duration;

use thiserror::Error;

/// Default overall request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client settings
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Whole request, connect through body
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: Duration::from_secs(5),
            user_agent: concat!("dhg-baseline/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpClientConfig {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            request_timeout: timeout,
            connect_timeout: timeout.min(Duration::from_secs(5)),
            ..Self::default()
        }
    }
}

/// Transport-level failures, classified for display
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpError {
    /// No response within the configured timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Connection could not be established
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Response body did not match the expected shape
    #[error("Invalid response body: {0}")]
    Decode(String),

    /// Any other transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Client could not be built (TLS backend, bad settings)
    #[error("HTTP client build failed: {0}")]
    Build(String),
}

impl HttpError {
    /// Whether the failure means "could not talk to the backend at all"
    pub fn is_connectivity(&self) -> bool {
        matches!(self, HttpError::Timeout(_) | HttpError::Connect(_))
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(err: reqwest::Error) -> Self {
        // Strip the URL: it may carry query parameters we don't want in logs
        let err = err.without_url();
        if err.is_timeout() {
            HttpError::Timeout(err.to_string())
        } else if err.is_connect() {
            HttpError::Connect(err.to_string())
        } else if err.is_decode() {
            HttpError::Decode(err.to_string())
        } else if err.is_builder() {
            HttpError::Build(err.to_string())
        } else {
            HttpError::Transport(err.to_string())
        }
    }
}

/// Build the shared HTTP client
pub fn build_client(config: &HttpClientConfig) -> Result<reqwest::Client, HttpError> {
    reqwest::Client::builder()
        .timeout(config.request_timeout)
        .connect_timeout(config.connect_timeout)
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| HttpError::Build(e.to_string()))
}
