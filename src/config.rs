use std::env;
use std::fs;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::security::OriginValidator;

/// Protocol tunables. Every field has a default; a JSON file named by
/// `EMBED_PROTOCOL_CONFIG` may override any subset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProtocolConfig {
    pub request_timeout_ms: u64,
    pub token_ttl_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub rate_limit_window_ms: u64,
    pub rate_limit_max: u32,
    pub nonce_capacity: usize,
    pub timestamp_skew_ms: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5000,
            token_ttl_ms: 10_000,
            heartbeat_interval_ms: 1000,
            rate_limit_window_ms: 60_000,
            rate_limit_max: 30,
            nonce_capacity: 1000,
            timestamp_skew_ms: 5000,
        }
    }
}

impl ProtocolConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_millis(self.token_ttl_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub allowed_origins: Vec<String>,
    pub api_base_url: Option<String>,
    pub hostname: String,
    /// Token taken from the launch URL; disables the host token exchange.
    pub static_token: Option<String>,
    pub production: bool,
    pub protocol: ProtocolConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            api_base_url: None,
            hostname: "localhost".to_string(),
            static_token: None,
            production: false,
            protocol: ProtocolConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let mut protocol = if let Ok(path) = env::var("EMBED_PROTOCOL_CONFIG") {
            let content = fs::read_to_string(&path).with_context(|| {
                format!(
                    "Failed to read EMBED_PROTOCOL_CONFIG '{}': file unreadable",
                    path
                )
            })?;
            serde_json::from_str::<ProtocolConfig>(&content).with_context(|| {
                format!(
                    "Failed to parse EMBED_PROTOCOL_CONFIG '{}': invalid JSON configuration",
                    path
                )
            })?
        } else {
            ProtocolConfig::default()
        };

        if let Some(v) = parse_optional_u64("EMBED_REQUEST_TIMEOUT_MS")? {
            protocol.request_timeout_ms = v;
        }
        if let Some(v) = parse_optional_u64("EMBED_TOKEN_TTL_MS")? {
            protocol.token_ttl_ms = v;
        }
        if let Some(v) = parse_optional_u64("EMBED_HEARTBEAT_MS")? {
            protocol.heartbeat_interval_ms = v;
        }
        if let Some(v) = parse_optional_u64("EMBED_RATE_LIMIT_WINDOW_MS")? {
            protocol.rate_limit_window_ms = v;
        }
        if let Some(v) = parse_optional_u64("EMBED_RATE_LIMIT_MAX")? {
            protocol.rate_limit_max = u32::try_from(v)
                .map_err(|_| anyhow!("EMBED_RATE_LIMIT_MAX is out of range"))?;
        }
        if let Some(v) = parse_optional_u64("EMBED_NONCE_CAPACITY")? {
            protocol.nonce_capacity = v as usize;
        }
        if let Some(v) = parse_optional_u64("EMBED_TIMESTAMP_SKEW_MS")? {
            protocol.timestamp_skew_ms = v;
        }
        if protocol.heartbeat_interval_ms == 0 {
            return Err(anyhow!("EMBED_HEARTBEAT_MS must be greater than zero"));
        }

        let allowed_origins = env::var("EMBED_ALLOWED_ORIGINS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if allowed_origins.is_empty() {
            tracing::warn!("EMBED_ALLOWED_ORIGINS is empty; every inbound message will be dropped");
        }

        let api_base_url = env::var("EMBED_API_BASE_URL")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let hostname = env::var("EMBED_HOSTNAME")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "localhost".to_string());

        let static_token = match env::var("EMBED_LAUNCH_URL") {
            Ok(url) if !url.trim().is_empty() => static_token_from_url(url.trim())
                .with_context(|| "Failed to parse EMBED_LAUNCH_URL".to_string())?,
            _ => None,
        };

        let production = parse_bool_env("EMBED_PRODUCTION")?.unwrap_or(false);

        Ok(Self {
            allowed_origins,
            api_base_url,
            hostname,
            static_token,
            production,
            protocol,
        })
    }

    pub fn origin_validator(&self) -> OriginValidator {
        OriginValidator::new(self.allowed_origins.iter().cloned())
    }

    /// Explicit base URL if configured, otherwise one derived from the
    /// hostname the widget is served from.
    pub fn resolved_api_base_url(&self) -> String {
        if let Some(url) = &self.api_base_url {
            return url.trim_end_matches('/').to_string();
        }
        match self.hostname.as_str() {
            "localhost" | "127.0.0.1" => "http://localhost:8000".to_string(),
            host => format!("https://{}", host),
        }
    }
}

/// Extract the `token` query parameter from the page URL the widget was
/// loaded with.
pub fn static_token_from_url(url: &str) -> Result<Option<String>> {
    let parsed = reqwest::Url::parse(url)?;
    Ok(parsed
        .query_pairs()
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty()))
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a non-negative integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
