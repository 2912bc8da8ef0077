//! Core library for embed-auth.  A widget running inside a host page
//! obtains its bearer token from the host over an untrusted message
//! channel; this crate owns that exchange (origin checks, replay-safe
//! correlation, token caching, rate limiting, liveness heartbeat) and the
//! HTTP client that consumes the resulting token.

pub mod bus;
pub mod cache;
pub mod channel;
pub mod config;
pub mod correlator;
pub mod error;
pub mod heartbeat;
pub mod http;
pub mod messages;
pub mod schema;
pub mod security;

use std::sync::Arc;

use once_cell::sync::OnceCell;

pub use bus::{HostEndpoint, LocalBus, MessageBus, StdioBus};
pub use channel::{AuthChannel, AuthState, InboundOutcome};
pub use config::{AppConfig, ProtocolConfig};
pub use error::{ApiError, ProtocolError, SchemaError};
pub use heartbeat::{Heartbeat, TransportSignal};
pub use http::{ApiClient, TokenProvider, TokenSource};
pub use messages::{Envelope, OutboundMessage};

/// Process-wide channel shared by every consumer in the running widget.
static GLOBAL_CHANNEL: OnceCell<Arc<AuthChannel>> = OnceCell::new();

/// Install `channel` as the process-wide instance.  The first install
/// wins; later calls get the already-installed channel back.
pub fn install_global(channel: Arc<AuthChannel>) -> Arc<AuthChannel> {
    Arc::clone(GLOBAL_CHANNEL.get_or_init(|| channel))
}

pub fn global_channel() -> Option<Arc<AuthChannel>> {
    GLOBAL_CHANNEL.get().cloned()
}

/// Everything a widget needs, wired from one [`AppConfig`].
pub struct EmbedRuntime {
    pub config: AppConfig,
    pub channel: Arc<AuthChannel>,
    pub heartbeat: Heartbeat,
    pub api: ApiClient,
}

impl EmbedRuntime {
    pub fn from_config(config: AppConfig, bus: Arc<dyn MessageBus>) -> Result<Self, ApiError> {
        let channel = AuthChannel::new(
            config.protocol.clone(),
            config.production,
            config.origin_validator(),
            Arc::clone(&bus),
        );
        let heartbeat = Heartbeat::new(bus, config.protocol.heartbeat_interval());
        let provider: Arc<dyn TokenProvider> = channel.clone();
        let api = ApiClient::from_parts(
            config.resolved_api_base_url(),
            config.static_token.clone(),
            provider,
        )?;
        tracing::info!(
            api_base_url = %api.base_url(),
            origins = config.allowed_origins.len(),
            static_token = config.static_token.is_some(),
            "embed runtime ready"
        );
        Ok(Self {
            config,
            channel,
            heartbeat,
            api,
        })
    }

    /// The static token when one was supplied at launch, otherwise the
    /// channel's token.  A static token bypasses the host exchange.
    pub async fn token(&self) -> Result<String, ProtocolError> {
        match &self.config.static_token {
            Some(token) => Ok(token.clone()),
            None => self.channel.get_token().await,
        }
    }

    /// Mount the heartbeat. Skipped when a static token is in use.
    pub fn mount(&self) -> bool {
        if self.config.static_token.is_some() {
            return false;
        }
        self.heartbeat.start()
    }
}
