//! Structural and temporal validation of inbound payloads.
//!
//! The validator never passes the original JSON through.  It reads the
//! fields each message kind is allowed to carry, checks them, and builds
//! a fresh typed value; every other field is dropped.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::SchemaError;
use crate::messages::{
    AUTH_ERROR, AUTH_TOKEN, FILE_CONTENT, FILE_CONTENT_ERROR, REFRESH_TOKEN, REQUEST_TOKEN,
};

pub const MIN_TOKEN_LEN: usize = 20;
pub const MIN_NONCE_LEN: usize = 10;
pub const MAX_ERROR_LEN: usize = 100;
pub const MAX_LOCALE_LEN: usize = 35;
pub const MAX_FILE_PATH_LEN: usize = 1024;
pub const MAX_FILE_CONTENT_LEN: usize = 1024 * 1024;
/// Default accepted distance between a message timestamp and local time.
pub const DEFAULT_TIMESTAMP_SKEW_MS: i64 = 5000;

static NONCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9\-_]+$").unwrap());
static LOCALE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z]{2,3}([-_][A-Za-z0-9]{2,8})*$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMessage {
    pub token: String,
    pub timestamp: i64,
    pub nonce: String,
    pub locale: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    pub error: String,
    pub timestamp: Option<i64>,
}

/// Body of `REQUEST_TOKEN` and `REFRESH_TOKEN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMessage {
    pub timestamp: i64,
    pub nonce: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContentMessage {
    pub file_path: String,
    pub content: String,
    pub timestamp: i64,
    pub nonce: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContentErrorMessage {
    pub file_path: String,
    pub error: String,
    pub timestamp: i64,
    pub nonce: String,
}

/// A narrowed, trusted view of an inbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatedMessage {
    Token(TokenMessage),
    Error(ErrorMessage),
    Request(RequestMessage),
    Refresh(RequestMessage),
    FileContent(FileContentMessage),
    FileContentError(FileContentErrorMessage),
}

impl ValidatedMessage {
    /// Nonce that must be consumed before the message is acted on.
    pub fn nonce(&self) -> Option<&str> {
        match self {
            ValidatedMessage::Token(m) => Some(&m.nonce),
            ValidatedMessage::Request(m) | ValidatedMessage::Refresh(m) => Some(&m.nonce),
            ValidatedMessage::FileContent(m) => Some(&m.nonce),
            ValidatedMessage::FileContentError(m) => Some(&m.nonce),
            ValidatedMessage::Error(_) => None,
        }
    }
}

/// Validate an untrusted payload against the schema of its `type`.
pub fn validate_inbound(
    data: &Value,
    now_ms: i64,
    skew_ms: i64,
) -> Result<ValidatedMessage, SchemaError> {
    let obj = data.as_object().ok_or(SchemaError::NotAnObject)?;
    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or(SchemaError::UnknownKind)?;
    match kind {
        AUTH_TOKEN => {
            let token = required_str(obj, "token")?;
            if token.chars().count() < MIN_TOKEN_LEN {
                return Err(SchemaError::TokenTooShort(MIN_TOKEN_LEN));
            }
            Ok(ValidatedMessage::Token(TokenMessage {
                token: token.to_string(),
                timestamp: fresh_timestamp(obj, now_ms, skew_ms)?,
                nonce: well_formed_nonce(obj)?,
                locale: optional_locale(obj),
            }))
        }
        AUTH_ERROR => {
            let error = bounded_str(obj, "error", MAX_ERROR_LEN)?;
            let timestamp = match obj.get("timestamp") {
                None | Some(Value::Null) => None,
                Some(_) => Some(fresh_timestamp(obj, now_ms, skew_ms)?),
            };
            Ok(ValidatedMessage::Error(ErrorMessage { error, timestamp }))
        }
        REQUEST_TOKEN | REFRESH_TOKEN => {
            let msg = RequestMessage {
                timestamp: fresh_timestamp(obj, now_ms, skew_ms)?,
                nonce: well_formed_nonce(obj)?,
            };
            if kind == REQUEST_TOKEN {
                Ok(ValidatedMessage::Request(msg))
            } else {
                Ok(ValidatedMessage::Refresh(msg))
            }
        }
        FILE_CONTENT => Ok(ValidatedMessage::FileContent(FileContentMessage {
            file_path: file_path(obj)?,
            content: bounded_str(obj, "content", MAX_FILE_CONTENT_LEN)?,
            timestamp: fresh_timestamp(obj, now_ms, skew_ms)?,
            nonce: well_formed_nonce(obj)?,
        })),
        FILE_CONTENT_ERROR => Ok(ValidatedMessage::FileContentError(FileContentErrorMessage {
            file_path: file_path(obj)?,
            error: bounded_str(obj, "error", MAX_ERROR_LEN)?,
            timestamp: fresh_timestamp(obj, now_ms, skew_ms)?,
            nonce: well_formed_nonce(obj)?,
        })),
        _ => Err(SchemaError::UnknownKind),
    }
}

/// Check the nonce format on its own: `[A-Za-z0-9-_]+`, at least
/// [`MIN_NONCE_LEN`] characters.
pub fn is_well_formed_nonce(nonce: &str) -> bool {
    nonce.len() >= MIN_NONCE_LEN && NONCE_RE.is_match(nonce)
}

fn required_str<'a>(obj: &'a Map<String, Value>, field: &'static str) -> Result<&'a str, SchemaError> {
    obj.get(field)
        .and_then(Value::as_str)
        .ok_or(SchemaError::MissingField(field))
}

fn bounded_str(
    obj: &Map<String, Value>,
    field: &'static str,
    max: usize,
) -> Result<String, SchemaError> {
    let value = required_str(obj, field)?;
    if value.chars().count() > max {
        return Err(SchemaError::TooLong { field, max });
    }
    Ok(value.to_string())
}

fn file_path(obj: &Map<String, Value>) -> Result<String, SchemaError> {
    let path = bounded_str(obj, "filePath", MAX_FILE_PATH_LEN)?;
    if path.trim().is_empty() {
        return Err(SchemaError::MissingField("filePath"));
    }
    Ok(path)
}

fn fresh_timestamp(obj: &Map<String, Value>, now_ms: i64, skew_ms: i64) -> Result<i64, SchemaError> {
    let ts = obj
        .get("timestamp")
        .and_then(Value::as_f64)
        .ok_or(SchemaError::MissingField("timestamp"))?;
    if !ts.is_finite() || ts <= 0.0 {
        return Err(SchemaError::StaleTimestamp);
    }
    if (ts - now_ms as f64).abs() > skew_ms as f64 {
        return Err(SchemaError::StaleTimestamp);
    }
    Ok(ts as i64)
}

fn well_formed_nonce(obj: &Map<String, Value>) -> Result<String, SchemaError> {
    let nonce = required_str(obj, "nonce")?;
    if !is_well_formed_nonce(nonce) {
        return Err(SchemaError::MalformedNonce);
    }
    Ok(nonce.to_string())
}

fn optional_locale(obj: &Map<String, Value>) -> Option<String> {
    obj.get("locale")
        .and_then(Value::as_str)
        .filter(|l| l.len() <= MAX_LOCALE_LEN && LOCALE_RE.is_match(l))
        .map(str::to_string)
}
