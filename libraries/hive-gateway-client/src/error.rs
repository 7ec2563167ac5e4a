//! Error types for the gateway client.
//!
//! Every failed call resolves to an [`ApiError`], the closed set of outcomes
//! the client surfaces to callers and to the notification sink.

use std::fmt;
use thiserror::Error;

/// Message attached to a request aborted through its cancellation token.
pub(crate) const REQUEST_CANCELLED: &str = "Request cancelled";

/// Category of a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    ServerFault,
    Unavailable,
    Transport,
    Unknown,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::ServerFault => "server_fault",
            Self::Unavailable => "unavailable",
            Self::Transport => "transport",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Errors returned by gateway calls.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// 401 that was not (or could not be) recovered by a token refresh
    #[error("Unauthorized: {message}")]
    Unauthorized {
        message: String,
        /// Set when the session ended because the token refresh failed
        session_expired: bool,
    },

    /// 403
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// 404
    #[error("Not found: {0}")]
    NotFound(String),

    /// 422, with the per-field messages when the gateway sent them
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        fields: Vec<(String, Vec<String>)>,
    },

    /// 500
    #[error("Server error: {0}")]
    ServerFault(String),

    /// 502, 503 or 504
    #[error("Service unavailable ({status}): {message}")]
    Unavailable { status: u16, message: String },

    /// No response was received
    #[error("Network error: {0}")]
    Transport(String),

    /// Any other failure
    #[error("Unexpected error: {message}")]
    Unknown { status: Option<u16>, message: String },
}

impl ApiError {
    pub(crate) fn unauthorized(session_expired: bool) -> Self {
        let message = if session_expired {
            "Please login again"
        } else {
            "Access denied"
        };
        Self::Unauthorized {
            message: message.to_string(),
            session_expired,
        }
    }

    pub(crate) fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            status: None,
            message: message.into(),
        }
    }

    pub(crate) fn cancelled() -> Self {
        Self::Transport(REQUEST_CANCELLED.to_string())
    }

    /// Whether the caller aborted this request.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Transport(message) if message == REQUEST_CANCELLED)
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Unauthorized { .. } => OutcomeKind::Unauthorized,
            Self::Forbidden(_) => OutcomeKind::Forbidden,
            Self::NotFound(_) => OutcomeKind::NotFound,
            Self::Validation { .. } => OutcomeKind::Validation,
            Self::ServerFault(_) => OutcomeKind::ServerFault,
            Self::Unavailable { .. } => OutcomeKind::Unavailable,
            Self::Transport(_) => OutcomeKind::Transport,
            Self::Unknown { .. } => OutcomeKind::Unknown,
        }
    }

    /// Short title shown to the user for this outcome.
    pub fn title(&self) -> &'static str {
        match self {
            Self::Unauthorized {
                session_expired: true,
                ..
            } => "Session Expired",
            Self::Unauthorized { .. } => "Unauthorized",
            Self::Forbidden(_) => "Forbidden",
            Self::NotFound(_) => "Not Found",
            Self::Validation { .. } => "Validation Error",
            Self::ServerFault(_) => "Server Error",
            Self::Unavailable { .. } => "Service Unavailable",
            Self::Transport(_) => "Network Error",
            Self::Unknown { .. } => "Error",
        }
    }

    /// Human-readable message shown alongside [`ApiError::title`].
    pub fn message(&self) -> &str {
        match self {
            Self::Unauthorized { message, .. }
            | Self::Validation { message, .. }
            | Self::Unavailable { message, .. }
            | Self::Unknown { message, .. } => message,
            Self::Forbidden(message)
            | Self::NotFound(message)
            | Self::ServerFault(message)
            | Self::Transport(message) => message,
        }
    }

    /// HTTP status that produced this error, if a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { .. } => Some(401),
            Self::Forbidden(_) => Some(403),
            Self::NotFound(_) => Some(404),
            Self::Validation { .. } => Some(422),
            Self::ServerFault(_) => Some(500),
            Self::Unavailable { status, .. } => Some(*status),
            Self::Transport(_) => None,
            Self::Unknown { status, .. } => *status,
        }
    }
}

/// Errors raised while building a client from its configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid gateway URL
    #[error("Invalid gateway URL: {0}")]
    InvalidUrl(String),

    /// Invalid API version segment
    #[error("Invalid API version: {0}")]
    InvalidVersion(String),

    /// The underlying HTTP client could not be built
    #[error("HTTP client setup failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The session store could not be opened
    #[error("Session store error: {0}")]
    Session(#[from] SessionError),
}

/// Errors raised by persistent session storage.
#[derive(Error, Debug)]
pub enum SessionError {
    /// IO error while reading or writing the session file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The session file is not valid JSON
    #[error("Malformed session file: {0}")]
    Format(#[from] serde_json::Error),
}

/// Result type for gateway calls.
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_titles_follow_kind() {
        assert_eq!(ApiError::Forbidden("x".into()).title(), "Forbidden");
        assert_eq!(ApiError::Transport("x".into()).title(), "Network Error");
        assert_eq!(ApiError::unauthorized(false).title(), "Unauthorized");
        assert_eq!(ApiError::unauthorized(true).title(), "Session Expired");
        assert_eq!(ApiError::unknown("boom").title(), "Error");
    }

    #[test]
    fn test_unauthorized_messages() {
        assert_eq!(ApiError::unauthorized(false).message(), "Access denied");
        assert_eq!(ApiError::unauthorized(true).message(), "Please login again");
        assert_eq!(
            ApiError::unauthorized(true).kind(),
            OutcomeKind::Unauthorized
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::NotFound("gone".into()).status(), Some(404));
        assert_eq!(
            ApiError::Unavailable {
                status: 503,
                message: String::new()
            }
            .status(),
            Some(503)
        );
        assert_eq!(ApiError::Transport("offline".into()).status(), None);
    }

    #[test]
    fn test_cancelled_is_transport() {
        let err = ApiError::cancelled();
        assert!(err.is_cancelled());
        assert_eq!(err.kind(), OutcomeKind::Transport);
        assert!(!ApiError::Transport("offline".into()).is_cancelled());
    }
}
