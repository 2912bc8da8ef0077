//! Single-slot bearer token cache with a proactive expiry timer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use zeroize::Zeroize;

/// Default time a token stays cached.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_millis(10_000);

struct CacheEntry {
    id: u64,
    token: String,
    expires_at: Instant,
    timer: Option<JoinHandle<()>>,
}

impl CacheEntry {
    fn discard(mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.token.zeroize();
    }
}

/// Holds at most one live token.
///
/// `set` replaces the previous entry and cancels its timer before arming
/// a new one. Expiry is also checked on `get`, so a caller never sees a
/// token past its deadline even if the timer task has not run yet.
#[derive(Clone, Default)]
pub struct TokenCache {
    slot: Arc<Mutex<Option<CacheEntry>>>,
    next_id: Arc<AtomicU64>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<String> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(entry) if Instant::now() < entry.expires_at => return Some(entry.token.clone()),
            None => return None,
            Some(_) => {}
        }
        if let Some(expired) = slot.take() {
            expired.discard();
        }
        tracing::debug!("cached token expired");
        None
    }

    pub fn set(&self, token: String, ttl: Duration) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let expires_at = Instant::now() + ttl;
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.take() {
            previous.discard();
        }
        let timer = tokio::runtime::Handle::try_current().ok().map(|handle| {
            let weak = Arc::downgrade(&self.slot);
            handle.spawn(async move {
                tokio::time::sleep_until(expires_at).await;
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                let mut slot = shared.lock().unwrap_or_else(PoisonError::into_inner);
                if slot.as_ref().map(|e| e.id) == Some(id) {
                    if let Some(mut expired) = slot.take() {
                        // This task is the timer; nothing to abort.
                        expired.timer = None;
                        expired.discard();
                    }
                    tracing::debug!("cached token expired");
                }
            })
        });
        *slot = Some(CacheEntry {
            id,
            token,
            expires_at,
            timer,
        });
    }

    pub fn clear(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = slot.take() {
            entry.discard();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.get().is_none()
    }
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cached = self
            .slot
            .lock()
            .map(|s| s.is_some())
            .unwrap_or(false);
        f.debug_struct("TokenCache").field("cached", &cached).finish()
    }
}
