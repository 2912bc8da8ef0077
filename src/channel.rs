//! The auth channel: token requests to the host, correlation of the
//! answers, and the inbound message pipeline.
//!
//! Inbound envelopes go through four gates in a fixed order:
//!
//! 1. origin allow-list (drop silently, no other state touched)
//! 2. per-origin rate limit
//! 3. schema validation (builds a narrowed copy of the payload)
//! 4. nonce consumption (replays dropped)
//!
//! Only then does a message mutate the cache, the AuthState or a pending
//! request.  Every one of those mutations is a single synchronous step.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use zeroize::Zeroize;

use crate::bus::MessageBus;
use crate::cache::TokenCache;
use crate::config::ProtocolConfig;
use crate::correlator::{self, Correlator};
use crate::error::{sanitize_host_error, ProtocolError};
use crate::http::TokenProvider;
use crate::messages::{now_millis, Envelope, OutboundMessage, AUTH_ERROR, AUTH_TOKEN};
use crate::schema::{self, FileContentErrorMessage, FileContentMessage, ValidatedMessage};
use crate::security::{NonceStore, OriginValidator, RateLimiter};

/// Rate-limit key shared by all outbound token requests.
pub const TOKEN_REQUEST_KEY: &str = "token-request";
/// Rate-limit key shared by all outbound file-content requests.
pub const FILE_REQUEST_KEY: &str = "file-content-request";

/// Session status as seen by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    Requesting,
    Authenticated { last_validated_at: DateTime<Utc> },
    Failed { error: String },
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, AuthState::Failed { .. })
    }
}

/// What the inbound pipeline did with an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    OriginRejected,
    RateLimited,
    SchemaRejected,
    Replayed,
    /// Valid token; `resolved` tells whether it answered a pending request.
    TokenAccepted { resolved: bool },
    HostError { rejected: usize },
    FileContent { resolved: bool },
    FileContentError { rejected: bool },
    /// Valid message this side has no use for (e.g. a request echoed back).
    Ignored,
}

pub struct AuthChannel {
    config: ProtocolConfig,
    production: bool,
    origins: OriginValidator,
    nonces: NonceStore,
    limiter: RateLimiter,
    cache: TokenCache,
    tokens: Correlator<String>,
    files: Correlator<String>,
    state: Arc<watch::Sender<AuthState>>,
    locale: Mutex<Option<String>>,
    bus: Arc<dyn MessageBus>,
}

impl AuthChannel {
    /// Build the channel and subscribe it to `bus`. The bus keeps only a
    /// weak reference, so dropping the returned `Arc` detaches it.
    pub fn new(
        config: ProtocolConfig,
        production: bool,
        origins: OriginValidator,
        bus: Arc<dyn MessageBus>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(AuthState::Idle);
        let channel = Arc::new(Self {
            nonces: NonceStore::new(config.nonce_capacity),
            limiter: RateLimiter::new(),
            cache: TokenCache::new(),
            tokens: Correlator::new(config.request_timeout()),
            files: Correlator::new(config.request_timeout()),
            state: Arc::new(state),
            locale: Mutex::new(None),
            config,
            production,
            origins,
            bus: Arc::clone(&bus),
        });
        let weak: Weak<AuthChannel> = Arc::downgrade(&channel);
        bus.on_message(Arc::new(move |envelope: Envelope| {
            if let Some(channel) = weak.upgrade() {
                channel.handle_message(envelope);
            }
        }));
        channel
    }

    /// Cached token if present, otherwise a fresh request to the host.
    pub async fn get_token(&self) -> Result<String, ProtocolError> {
        if let Some(token) = self.cache.get() {
            return Ok(token);
        }
        self.request_token(false).await
    }

    /// Drop the cached token and ask the host for a new one.
    pub async fn refresh_token(&self) -> Result<String, ProtocolError> {
        self.cache.clear();
        self.request_token(true).await
    }

    async fn request_token(&self, is_refresh: bool) -> Result<String, ProtocolError> {
        if !self.bus.is_embedded() {
            tracing::warn!("token requested while not embedded in a host window");
            self.transition(AuthState::Failed {
                error: ProtocolError::NotEmbedded.to_string(),
            });
            return Err(ProtocolError::NotEmbedded);
        }

        let nonce = self.nonces.generate();
        if !self.limiter.check(
            TOKEN_REQUEST_KEY,
            self.config.rate_limit_window(),
            self.config.rate_limit_max,
        ) {
            tracing::warn!(key = TOKEN_REQUEST_KEY, "token request rate limited");
            self.transition(AuthState::Failed {
                error: ProtocolError::RateLimited.to_string(),
            });
            return Err(ProtocolError::RateLimited);
        }

        self.transition(AuthState::Requesting);
        let state = Arc::clone(&self.state);
        let timeout = self.tokens.timeout();
        let reply = self.tokens.register(&nonce, move || {
            transition(
                &state,
                AuthState::Failed {
                    error: ProtocolError::Timeout(timeout).to_string(),
                },
            );
        });

        let timestamp = now_millis();
        let message = if is_refresh {
            OutboundMessage::RefreshToken {
                timestamp,
                nonce: nonce.clone(),
            }
        } else {
            OutboundMessage::RequestToken {
                timestamp,
                nonce: nonce.clone(),
            }
        };
        if let Err(err) = self.bus.send(&message) {
            tracing::error!(error = %err, nonce = %nonce, "failed to post token request");
            self.tokens.cancel(&nonce);
            self.transition(AuthState::Failed {
                error: err.to_string(),
            });
            return Err(err);
        }
        tracing::debug!(nonce = %nonce, kind = message.kind(), "token request posted");
        correlator::wait(reply).await
    }

    /// Ask the host for the content of a source file (developer tooling).
    pub async fn request_file_content(&self, file_path: &str) -> Result<String, ProtocolError> {
        if !self.bus.is_embedded() {
            return Err(ProtocolError::NotEmbedded);
        }
        let nonce = self.nonces.generate();
        if !self.limiter.check(
            FILE_REQUEST_KEY,
            self.config.rate_limit_window(),
            self.config.rate_limit_max,
        ) {
            tracing::warn!(key = FILE_REQUEST_KEY, "file content request rate limited");
            return Err(ProtocolError::RateLimited);
        }
        let reply = self.files.register(&nonce, || {});
        let message = OutboundMessage::RequestFileContent {
            file_path: file_path.to_string(),
            nonce: nonce.clone(),
        };
        if let Err(err) = self.bus.send(&message) {
            self.files.cancel(&nonce);
            return Err(err);
        }
        correlator::wait(reply).await
    }

    /// Run one inbound envelope through the pipeline.
    pub fn handle_message(&self, mut envelope: Envelope) -> InboundOutcome {
        let outcome = self.process(&envelope);
        if envelope.kind() == Some(AUTH_TOKEN) {
            scrub_token(&mut envelope.data);
        }
        outcome
    }

    fn process(&self, envelope: &Envelope) -> InboundOutcome {
        let origin = envelope.origin.as_str();
        if !self.origins.is_allowed(origin) {
            tracing::warn!(origin = %origin, "dropping message from untrusted origin");
            return InboundOutcome::OriginRejected;
        }

        if !self.limiter.check(
            origin,
            self.config.rate_limit_window(),
            self.config.rate_limit_max,
        ) {
            tracing::warn!(origin = %origin, "inbound rate limit exceeded");
            return InboundOutcome::RateLimited;
        }

        let validated = match schema::validate_inbound(
            &envelope.data,
            now_millis(),
            self.config.timestamp_skew_ms as i64,
        ) {
            Ok(v) => v,
            Err(err) => {
                let kind = envelope.kind().unwrap_or("<none>");
                if kind == AUTH_TOKEN || kind == AUTH_ERROR {
                    tracing::error!(origin = %origin, kind, error = %err, "invalid auth message");
                    self.transition(AuthState::Failed {
                        error: ProtocolError::InvalidResponse.to_string(),
                    });
                } else {
                    tracing::debug!(origin = %origin, kind, error = %err, "ignoring unrecognised message");
                }
                return InboundOutcome::SchemaRejected;
            }
        };

        // A nonce is spent only by the kind of answer its request expects.
        let spend = match &validated {
            ValidatedMessage::Token(m) if self.files.contains(&m.nonce) => {
                tracing::warn!(origin = %origin, nonce = %m.nonce, "token carries a file request nonce");
                return InboundOutcome::Ignored;
            }
            ValidatedMessage::Token(m) => Some(m.nonce.as_str()),
            ValidatedMessage::FileContent(FileContentMessage { nonce, .. })
            | ValidatedMessage::FileContentError(FileContentErrorMessage { nonce, .. }) => {
                Some(nonce.as_str()).filter(|n| self.files.contains(n))
            }
            ValidatedMessage::Request(_) | ValidatedMessage::Refresh(_) | ValidatedMessage::Error(_) => None,
        };
        if let Some(nonce) = spend {
            if !self.nonces.validate(nonce) {
                // Duplicate delivery of an accepted message; expected under double effects.
                tracing::debug!(origin = %origin, nonce = %nonce, "duplicate nonce ignored");
                return InboundOutcome::Replayed;
            }
        }

        match validated {
            ValidatedMessage::Token(mut msg) => {
                self.cache.set(msg.token.clone(), self.config.token_ttl());
                if let Some(locale) = msg.locale.take() {
                    *self.locale.lock().unwrap_or_else(PoisonError::into_inner) = Some(locale);
                }
                self.transition(AuthState::Authenticated {
                    last_validated_at: Utc::now(),
                });
                let resolved = self.tokens.resolve(&msg.nonce, msg.token.clone());
                if !resolved {
                    tracing::debug!(nonce = %msg.nonce, "token for untracked request cached");
                }
                msg.token.zeroize();
                InboundOutcome::TokenAccepted { resolved }
            }
            ValidatedMessage::Error(msg) => {
                let error = sanitize_host_error(&msg.error, self.production);
                tracing::warn!(origin = %origin, "host reported authentication failure");
                self.transition(AuthState::Failed {
                    error: error.clone(),
                });
                let rejected = self
                    .tokens
                    .reject_all(&ProtocolError::HostRejected(error));
                InboundOutcome::HostError { rejected }
            }
            ValidatedMessage::FileContent(msg) => {
                let resolved = self.files.resolve(&msg.nonce, msg.content);
                InboundOutcome::FileContent { resolved }
            }
            ValidatedMessage::FileContentError(msg) => {
                let rejected = self.files.reject(
                    &msg.nonce,
                    ProtocolError::FileUnavailable {
                        path: msg.file_path,
                        reason: msg.error,
                    },
                );
                InboundOutcome::FileContentError { rejected }
            }
            ValidatedMessage::Request(_) | ValidatedMessage::Refresh(_) => {
                tracing::debug!(origin = %origin, "ignoring host-bound request message");
                InboundOutcome::Ignored
            }
        }
    }

    fn transition(&self, next: AuthState) {
        transition(&self.state, next);
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// Locale announced by the host with the last accepted token.
    pub fn locale(&self) -> Option<String> {
        self.locale
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn cached_token(&self) -> Option<String> {
        self.cache.get()
    }

    pub fn pending_requests(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_embedded(&self) -> bool {
        self.bus.is_embedded()
    }

    pub fn bus(&self) -> Arc<dyn MessageBus> {
        Arc::clone(&self.bus)
    }

    pub fn production(&self) -> bool {
        self.production
    }

    /// Return to the freshly-constructed state. Pending callers observe
    /// [`ProtocolError::Cancelled`].
    pub fn reset(&self) {
        self.tokens.cancel_all();
        self.files.cancel_all();
        self.cache.clear();
        self.nonces.clear();
        self.limiter.clear();
        *self.locale.lock().unwrap_or_else(PoisonError::into_inner) = None;
        transition(&self.state, AuthState::Idle);
    }
}

#[async_trait]
impl TokenProvider for AuthChannel {
    async fn get_token(&self) -> Result<String, ProtocolError> {
        AuthChannel::get_token(self).await
    }

    async fn refresh_token(&self) -> Result<String, ProtocolError> {
        AuthChannel::refresh_token(self).await
    }
}

impl std::fmt::Debug for AuthChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthChannel")
            .field("state", &self.state())
            .field("pending", &self.tokens.len())
            .field("origins", &self.origins.len())
            .finish()
    }
}

/// The only writer of AuthState.
fn transition(state: &watch::Sender<AuthState>, next: AuthState) {
    let previous = state.send_replace(next.clone());
    if previous != next {
        tracing::debug!(from = ?previous, to = ?next, "auth state transition");
    }
}

fn scrub_token(data: &mut serde_json::Value) {
    if let Some(serde_json::Value::String(token)) = data.get_mut("token") {
        token.zeroize();
    }
}
