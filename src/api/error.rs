//! Remote API error taxonomy.
//!
//! Errors are classified into a [`FailureCategory`] where they are first
//! observed, so callers never inspect status codes or message text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ratelimit::RateLimitError;

/// Closed set of reasons a remote call can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureCategory {
    /// 401: the credential is missing, expired or revoked.
    Auth,
    /// 403: the caller may not touch the resource.
    Permission,
    /// 404: the resource is already gone.
    NotFound,
    /// 429 that the rate limiter could not absorb.
    RateLimited,
    /// No HTTP response was received.
    Network,
    Unknown,
}

impl FailureCategory {
    pub const ALL: [FailureCategory; 6] = [
        Self::Auth,
        Self::Permission,
        Self::NotFound,
        Self::RateLimited,
        Self::Network,
        Self::Unknown,
    ];

    /// Category implied by an HTTP status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Auth,
            403 => Self::Permission,
            404 => Self::NotFound,
            429 => Self::RateLimited,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Permission => "permission",
            Self::NotFound => "notFound",
            Self::RateLimited => "rateLimited",
            Self::Network => "network",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The server answered with a non-success status.
    #[error("{method} {path}: {status}, {body}")]
    Status {
        status: u16,
        method: &'static str,
        path: String,
        body: String,
    },

    /// The request never produced a response.
    #[error("Network error: {0}")]
    Network(String),

    /// The rate limiter gave up or dropped the request.
    #[error(transparent)]
    RateLimit(RateLimitError),

    /// The response body did not match the expected shape.
    #[error("Failed to decode response from {path}: {message}")]
    Decode { path: String, message: String },

    #[error("No auth token captured")]
    MissingCredential,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn category(&self) -> FailureCategory {
        match self {
            Self::Status { status, .. } => FailureCategory::from_status(*status),
            Self::Network(_) => FailureCategory::Network,
            Self::RateLimit(RateLimitError::RetriesExhausted { .. }) => {
                FailureCategory::RateLimited
            }
            Self::RateLimit(RateLimitError::Transport { .. }) => FailureCategory::Network,
            Self::RateLimit(RateLimitError::Dropped(_)) | Self::Decode { .. } => {
                FailureCategory::Unknown
            }
            Self::MissingCredential => FailureCategory::Auth,
        }
    }

    /// HTTP status, when the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<RateLimitError> for ApiError {
    fn from(error: RateLimitError) -> Self {
        match error {
            RateLimitError::Transport { source, .. } => Self::Network(source.0),
            other => Self::RateLimit(other),
        }
    }
}
