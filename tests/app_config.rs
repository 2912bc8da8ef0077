mod common;

use std::io::Write;

use common::EnvGuard;
use embed_auth::AppConfig;
use once_cell::sync::Lazy;
use std::sync::Mutex;
use tempfile::NamedTempFile;

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

const VARS: &[&str] = &[
    "EMBED_PROTOCOL_CONFIG",
    "EMBED_ALLOWED_ORIGINS",
    "EMBED_API_BASE_URL",
    "EMBED_HOSTNAME",
    "EMBED_LAUNCH_URL",
    "EMBED_PRODUCTION",
    "EMBED_REQUEST_TIMEOUT_MS",
    "EMBED_TOKEN_TTL_MS",
    "EMBED_HEARTBEAT_MS",
    "EMBED_RATE_LIMIT_WINDOW_MS",
    "EMBED_RATE_LIMIT_MAX",
    "EMBED_NONCE_CAPACITY",
    "EMBED_TIMESTAMP_SKEW_MS",
];

fn clean_env() -> EnvGuard {
    let mut guard = EnvGuard::new();
    for var in VARS {
        guard.remove(var);
    }
    guard
}

#[test]
fn rejects_invalid_boolean_env_values() {
    let _lock = ENV_MUTEX.lock().unwrap();
    let mut env = clean_env();
    env.set("EMBED_PRODUCTION", "maybe");
    let err = AppConfig::from_env().expect_err("expected invalid boolean to error");
    assert!(format!("{}", err).contains("EMBED_PRODUCTION"));
}

#[test]
fn rejects_invalid_integer_env_values() {
    let _lock = ENV_MUTEX.lock().unwrap();
    let mut env = clean_env();
    env.set("EMBED_REQUEST_TIMEOUT_MS", "-5");
    let err = AppConfig::from_env().expect_err("expected invalid integer to error");
    let message = format!("{}", err);
    assert!(message.contains("EMBED_REQUEST_TIMEOUT_MS"));
    assert!(message.contains("non-negative integer"));

    env.set("EMBED_REQUEST_TIMEOUT_MS", "0");
    let cfg = AppConfig::from_env().unwrap();
    assert_eq!(cfg.protocol.request_timeout_ms, 0);
}

#[test]
fn rejects_zero_heartbeat() {
    let _lock = ENV_MUTEX.lock().unwrap();
    let mut env = clean_env();
    env.set("EMBED_HEARTBEAT_MS", "0");
    assert!(AppConfig::from_env().is_err());
}

#[test]
fn reports_unreadable_and_invalid_protocol_files() {
    let _lock = ENV_MUTEX.lock().unwrap();
    let mut env = clean_env();
    env.set("EMBED_PROTOCOL_CONFIG", "/nonexistent/embed-protocol.json");
    let err = AppConfig::from_env().unwrap_err();
    assert!(format!("{:#}", err).contains("file unreadable"));

    let mut temp = NamedTempFile::new().unwrap();
    write!(temp, "{{ not json").unwrap();
    env.set("EMBED_PROTOCOL_CONFIG", temp.path().to_str().unwrap());
    let err = AppConfig::from_env().unwrap_err();
    assert!(format!("{:#}", err).contains("invalid JSON configuration"));
}

#[test]
fn launch_url_token_becomes_static_token() {
    let _lock = ENV_MUTEX.lock().unwrap();
    let mut env = clean_env();
    env.set(
        "EMBED_LAUNCH_URL",
        "https://widget.example.com/embed?token=launch-token-0123456789&lang=en",
    );
    env.set("EMBED_HOSTNAME", "reports.example.com");
    let cfg = AppConfig::from_env().unwrap();
    assert_eq!(cfg.static_token.as_deref(), Some("launch-token-0123456789"));
    assert_eq!(cfg.resolved_api_base_url(), "https://reports.example.com");
}
