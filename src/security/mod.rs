//! Leaf security primitives applied to every inbound message.
//!
//! Each primitive is self-contained and synchronous: a single call
//! performs its whole mutation, so the channel never observes a
//! half-updated record.  The channel runs them in the order origin →
//! rate limit → schema → nonce.

pub mod nonce;
pub mod origin;
pub mod rate_limit;

pub use self::nonce::NonceStore;
pub use self::origin::OriginValidator;
pub use self::rate_limit::RateLimiter;
