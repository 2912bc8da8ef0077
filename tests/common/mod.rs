use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use embed_auth::messages::now_millis;
use embed_auth::{AuthChannel, HostEndpoint, LocalBus, OutboundMessage, ProtocolConfig};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

#[allow(dead_code)]
pub const ORIGIN: &str = "https://host.example.com";

/// Tracks environment variable mutations and restores originals on drop.
#[allow(dead_code)]
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

#[allow(dead_code)]
impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

#[allow(dead_code)]
pub fn channel_with(config: ProtocolConfig, production: bool) -> (Arc<AuthChannel>, HostEndpoint) {
    let (bus, host) = LocalBus::pair();
    let channel = AuthChannel::new(
        config,
        production,
        embed_auth::security::OriginValidator::new([ORIGIN]),
        bus,
    );
    (channel, host)
}

#[allow(dead_code)]
pub fn channel() -> (Arc<AuthChannel>, HostEndpoint) {
    channel_with(ProtocolConfig::default(), false)
}

#[allow(dead_code)]
pub fn token_message(nonce: &str, token: &str) -> Value {
    json!({
        "type": "AUTH_TOKEN",
        "token": token,
        "timestamp": now_millis(),
        "nonce": nonce,
    })
}

#[allow(dead_code)]
pub fn error_message(error: &str) -> Value {
    json!({
        "type": "AUTH_ERROR",
        "error": error,
        "timestamp": now_millis(),
    })
}

/// Token the simulated host hands out for its `n`-th answer.
#[allow(dead_code)]
pub fn issued_token(n: usize) -> String {
    format!("issued-token-{:04}-abcdefghij", n)
}

/// Host that answers every token request with [`issued_token`]. The
/// returned counter tracks `REFRESH_TOKEN` messages.
#[allow(dead_code)]
pub fn spawn_host(mut host: HostEndpoint) -> (Arc<AtomicUsize>, JoinHandle<()>) {
    let refreshes = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&refreshes);
    let handle = tokio::spawn(async move {
        let mut issued = 0;
        while let Some(message) = host.recv().await {
            let nonce = match &message {
                OutboundMessage::RequestToken { nonce, .. } => nonce.clone(),
                OutboundMessage::RefreshToken { nonce, .. } => {
                    seen.fetch_add(1, Ordering::SeqCst);
                    nonce.clone()
                }
                _ => continue,
            };
            host.deliver(ORIGIN, token_message(&nonce, &issued_token(issued)));
            issued += 1;
        }
    });
    (refreshes, handle)
}
