//! Error types for the admin API client.
//!
//! # Design
//! Every failure inside the pipeline collapses into one `ApiError` before it
//! reaches the caller. The variants keep the failure class typed (timeouts are
//! distinguishable from server rejections), while `code()`, `message()` and
//! `details()` project any variant onto the `{ code, message, details }` shape
//! the dashboard surfaces to users.

use std::borrow::Cow;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Code used when a failure carries no more specific code.
pub const DEFAULT_ERROR_CODE: &str = "UNKNOWN_ERROR";

/// Message used when a failure carries no human-readable message.
pub const DEFAULT_ERROR_MESSAGE: &str = "Request failed";

/// Message used when the server rejects a request without explaining why.
pub const SERVER_ERROR_MESSAGE: &str = "Server error";

/// Errors returned by `ApiClient` operations.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// No response arrived within the configured timeout; the transport call
    /// was dropped.
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The transport failed before a response was received.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-2xx status.
    #[error("{message}")]
    Http {
        status: u16,
        code: Option<String>,
        message: String,
        body: Option<Value>,
    },

    /// The response body could not be decoded into the expected envelope.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The request could not be assembled (body serialization, bad params).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// An interceptor rejected the call.
    #[error("{message}")]
    Interceptor {
        code: Option<String>,
        message: String,
    },

    /// Local file handling failed (upload source, download target).
    #[error("i/o error: {0}")]
    Io(String),
}

impl ApiError {
    /// Failure raised from inside an interceptor.
    pub fn interceptor(message: impl Into<String>) -> Self {
        ApiError::Interceptor {
            code: None,
            message: message.into(),
        }
    }

    /// Same as [`ApiError::interceptor`] with an explicit code.
    pub fn interceptor_with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::Interceptor {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    pub fn code(&self) -> Cow<'_, str> {
        match self {
            ApiError::Timeout(_) => Cow::Borrowed("TIMEOUT"),
            ApiError::Network(_) => Cow::Borrowed("NETWORK_ERROR"),
            ApiError::Http {
                code: Some(code), ..
            } => Cow::Borrowed(code),
            ApiError::Http { status, .. } => Cow::Owned(format!("HTTP_{status}")),
            ApiError::InvalidResponse(_) => Cow::Borrowed("INVALID_RESPONSE"),
            ApiError::InvalidRequest(_) => Cow::Borrowed("INVALID_REQUEST"),
            ApiError::Io(_) => Cow::Borrowed("IO_ERROR"),
            ApiError::Interceptor {
                code: Some(code), ..
            } => Cow::Borrowed(code),
            ApiError::Interceptor { code: None, .. } => Cow::Borrowed(DEFAULT_ERROR_CODE),
        }
    }

    /// Human-readable message, never empty.
    pub fn message(&self) -> String {
        let message = match self {
            ApiError::Http { message, .. } | ApiError::Interceptor { message, .. } => {
                message.clone()
            }
            other => other.to_string(),
        };
        if message.trim().is_empty() {
            DEFAULT_ERROR_MESSAGE.to_string()
        } else {
            message
        }
    }

    /// The raw server body for HTTP failures.
    pub fn details(&self) -> Option<&Value> {
        match self {
            ApiError::Http { body, .. } => body.as_ref(),
            _ => None,
        }
    }

    /// HTTP status, when the failure came from a server response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::Timeout(_))
    }

    pub fn to_object(&self) -> ErrorObject {
        ErrorObject {
            code: self.code().into_owned(),
            message: self.message(),
            details: self.details().cloned(),
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Io(err.to_string())
    }
}

/// Wire shape of an error as surfaced to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}
