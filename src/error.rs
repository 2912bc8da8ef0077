//! Error types shared by the protocol, the schema validator and the HTTP
//! client.

use std::time::Duration;

use thiserror::Error;

/// Generic text surfaced for every host-reported failure in production.
pub const GENERIC_AUTH_FAILURE: &str = "Authentication failed";

/// Text surfaced when a token payload fails validation. Never echoes the
/// offending content.
pub const INVALID_RESPONSE: &str = "Invalid authentication response";

/// Failures of a protocol operation as observed by callers.
///
/// Values are cloned into every pending request that a single event
/// rejects, so the type stays cheap and comparable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("not embedded in a host window")]
    NotEmbedded,
    #[error("too many requests, try again later")]
    RateLimited,
    #[error("no response from host within {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    HostRejected(String),
    #[error("Invalid authentication response")]
    InvalidResponse,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("file '{path}' unavailable: {reason}")]
    FileUnavailable { path: String, reason: String },
}

/// Reasons an inbound payload is rejected by the schema validator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("missing or unknown message type")]
    UnknownKind,
    #[error("field '{0}' is missing or has the wrong type")]
    MissingField(&'static str),
    #[error("token is shorter than {0} characters")]
    TokenTooShort(usize),
    #[error("timestamp outside the accepted window")]
    StaleTimestamp,
    #[error("nonce is malformed")]
    MalformedNonce,
    #[error("field '{field}' exceeds {max} characters")]
    TooLong { field: &'static str, max: usize },
}

/// Errors returned by [`crate::http::ApiClient`].
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("token unavailable: {0}")]
    Token(#[from] ProtocolError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("invalid header value for bearer token")]
    InvalidToken,
}

impl ApiError {
    /// HTTP status carried by the error, if it came from a response.
    pub fn status(&self) -> Option<reqwest::StatusCode> {
        match self {
            ApiError::Http(err) => err.status(),
            _ => None,
        }
    }
}

/// Map a validated host error string to what callers may see.
pub fn sanitize_host_error(raw: &str, production: bool) -> String {
    if production || raw.trim().is_empty() {
        GENERIC_AUTH_FAILURE.to_string()
    } else {
        raw.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_collapses_host_errors() {
        assert_eq!(
            sanitize_host_error("token expired", true),
            GENERIC_AUTH_FAILURE
        );
        assert_eq!(sanitize_host_error("token expired", false), "token expired");
        assert_eq!(sanitize_host_error("   ", false), GENERIC_AUTH_FAILURE);
    }

    #[test]
    fn host_rejection_displays_sanitized_text() {
        let err = ProtocolError::HostRejected("token expired".into());
        assert_eq!(err.to_string(), "token expired");
        assert_eq!(ProtocolError::InvalidResponse.to_string(), INVALID_RESPONSE);
    }
}
