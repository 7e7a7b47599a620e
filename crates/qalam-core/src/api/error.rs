use std::fmt;

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::auth::RefreshError;
use crate::locale::Locale;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Access denied: {0}")]
    AccessDenied(ErrorBody),

    #[error("Unauthorized - token may be expired")]
    Unauthorized(ErrorBody),

    #[error("Resource not found: {0}")]
    NotFound(ErrorBody),

    #[error("Rate limited - please wait before retrying")]
    RateLimited(ErrorBody),

    #[error("Server error {0}: {1}")]
    ServerError(StatusCode, ErrorBody),

    #[error("Unexpected status {0}: {1}")]
    UnexpectedStatus(StatusCode, ErrorBody),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Token refresh failed: {0}")]
    RefreshFailed(#[from] RefreshError),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Client configuration error: {0}")]
    Config(String),

    #[error("Token storage error: {0}")]
    Storage(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// A failed response body, truncated for logging, plus the server's own
/// message when the body carried one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorBody {
    pub text: String,
    pub message: Option<String>,
}

impl ErrorBody {
    pub fn new(body: &str) -> Self {
        Self {
            text: truncate_body(body),
            message: server_message(body),
        }
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Truncate a response body to avoid logging excessive data
pub(crate) fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

/// Pull a human-readable message out of a JSON error body.
///
/// Looks at `message` (a string, or an array of validation messages) and then
/// `error`. Anything else yields `None`.
fn server_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let text = match value.get("message") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("; "),
        _ => match value.get("error") {
            Some(Value::String(s)) => s.trim().to_string(),
            _ => String::new(),
        },
    };
    (!text.is_empty()).then_some(text)
}

impl ApiError {
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let body = ErrorBody::new(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized(body),
            403 => ApiError::AccessDenied(body),
            404 => ApiError::NotFound(body),
            429 => ApiError::RateLimited(body),
            500..=599 => ApiError::ServerError(status, body),
            _ => ApiError::UnexpectedStatus(status, body),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }

    fn body(&self) -> Option<&ErrorBody> {
        match self {
            ApiError::Unauthorized(b)
            | ApiError::AccessDenied(b)
            | ApiError::NotFound(b)
            | ApiError::RateLimited(b)
            | ApiError::ServerError(_, b)
            | ApiError::UnexpectedStatus(_, b) => Some(b),
            _ => None,
        }
    }

    /// Message suitable for showing to the user.
    ///
    /// Server-supplied message first, then the transport's own error text,
    /// then the localized generic message.
    pub fn user_message(&self, locale: Locale) -> String {
        if let Some(message) = self.body().and_then(|b| b.message.clone()) {
            return message;
        }
        let transport = match self {
            ApiError::NetworkError(e) => e.to_string(),
            ApiError::RefreshFailed(RefreshError::Rejected { message: Some(m), .. }) => m.clone(),
            ApiError::RefreshFailed(e) => e.to_string(),
            _ => String::new(),
        };
        if transport.trim().is_empty() {
            locale.generic_error().to_string()
        } else {
            transport
        }
    }
}

/// Classify an arbitrary failure into a message for the user.
pub fn error_message(err: &anyhow::Error, locale: Locale) -> String {
    if let Some(api) = err.downcast_ref::<ApiError>() {
        return api.user_message(locale);
    }
    if let Some(refresh) = err.downcast_ref::<RefreshError>() {
        return ApiError::RefreshFailed(refresh.clone()).user_message(locale);
    }
    let text = err.to_string();
    if text.trim().is_empty() {
        locale.generic_error().to_string()
    } else {
        text
    }
}
