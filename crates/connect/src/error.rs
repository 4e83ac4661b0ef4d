//! Error types for the LMS connect crate.

use thiserror::Error;

use lmsbridge_core::lms::{classify_http_status, RetryClass};

/// Result type alias for connect operations.
pub type Result<T> = std::result::Result<T, ConnectError>;

#[derive(Debug, Error)]
pub enum ConnectError {
    /// Transport failure (connect, timeout, broken body).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Non-success response from the remote LMS or the OAuth endpoint.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No usable token for the user.
    #[error("Integration not authorized for user {user_id}")]
    NotAuthorized { user_id: String },

    #[error("{method} {path} failed after {attempts} attempt(s): {last_error}")]
    RetriesExhausted {
        method: String,
        path: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error(transparent)]
    Core(#[from] lmsbridge_core::Error),
}

impl ConnectError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn not_authorized(user_id: impl Into<String>) -> Self {
        Self::NotAuthorized {
            user_id: user_id.into(),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Api { status, .. } => classify_http_status(*status),
            Self::Http(_) => RetryClass::Retryable,
            Self::NotAuthorized { .. } => RetryClass::ReauthRequired,
            Self::Core(e) if e.is_not_authorized() => RetryClass::ReauthRequired,
            Self::Json(_)
            | Self::InvalidRequest(_)
            | Self::RetriesExhausted { .. }
            | Self::Cancelled(_)
            | Self::Core(_) => RetryClass::Permanent,
        }
    }

    /// True when the provider rejected the request itself (4xx), as opposed
    /// to failing to answer it.
    pub fn is_client_rejection(&self) -> bool {
        matches!(self, Self::Api { status, .. } if (400..500).contains(status))
    }
}

impl From<ConnectError> for lmsbridge_core::Error {
    fn from(err: ConnectError) -> Self {
        use lmsbridge_core::Error;
        match err {
            ConnectError::NotAuthorized { user_id } => Error::NotAuthorized { user_id },
            ConnectError::RetriesExhausted {
                method,
                path,
                attempts,
                last_error,
            } => Error::FatalSync {
                method,
                path,
                attempts,
                message: last_error,
            },
            ConnectError::Api { status, message } => Error::Remote { status, message },
            ConnectError::Http(e) => Error::Remote {
                status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                message: e.to_string(),
            },
            ConnectError::Json(e) => Error::Json(e),
            ConnectError::InvalidRequest(message) => Error::InvalidInput(message),
            ConnectError::Cancelled(message) => Error::Cancelled(message),
            ConnectError::Core(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_class_for_auth_error_is_reauth() {
        let err = ConnectError::api(401, "unauthorized");
        assert_eq!(err.retry_class(), RetryClass::ReauthRequired);
        assert_eq!(
            ConnectError::not_authorized("u").retry_class(),
            RetryClass::ReauthRequired
        );
    }

    #[test]
    fn only_quota_and_gateway_statuses_are_retryable() {
        assert_eq!(ConnectError::api(429, "").retry_class(), RetryClass::Retryable);
        assert_eq!(ConnectError::api(503, "").retry_class(), RetryClass::Retryable);
        assert_eq!(ConnectError::api(404, "").retry_class(), RetryClass::Permanent);
        assert_eq!(ConnectError::api(409, "").retry_class(), RetryClass::Permanent);
    }

    #[test]
    fn exhausted_retries_become_fatal_sync() {
        let err: lmsbridge_core::Error = ConnectError::RetriesExhausted {
            method: "GET".to_string(),
            path: "/api/v1/courses".to_string(),
            attempts: 4,
            last_error: "HTTP 503".to_string(),
        }
        .into();
        match err {
            lmsbridge_core::Error::FatalSync {
                method,
                path,
                attempts,
                ..
            } => {
                assert_eq!(method, "GET");
                assert_eq!(path, "/api/v1/courses");
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
