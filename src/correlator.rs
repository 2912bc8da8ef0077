//! Pending-request bookkeeping keyed by correlation nonce.
//!
//! Every registered request owns a one-shot continuation and a companion
//! timer task. Resolution, rejection and timeout all go through
//! `DashMap::remove`, so whichever happens first wins and the others
//! find nothing to do.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::ProtocolError;

pub type Reply<T> = oneshot::Receiver<Result<T, ProtocolError>>;

struct PendingRequest<T> {
    reply: oneshot::Sender<Result<T, ProtocolError>>,
    timer: Option<JoinHandle<()>>,
}

impl<T> PendingRequest<T> {
    fn complete(mut self, outcome: Result<T, ProtocolError>) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        // The caller may have given up on the reply; that is not an error.
        let _ = self.reply.send(outcome);
    }
}

pub struct Correlator<T> {
    pending: Arc<DashMap<String, PendingRequest<T>>>,
    timeout: Duration,
}

impl<T: Send + 'static> Correlator<T> {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Track a request under `nonce` and arm its timeout. `on_timeout`
    /// runs only if the timer wins the race, right before the caller is
    /// rejected with [`ProtocolError::Timeout`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn register<F>(&self, nonce: &str, on_timeout: F) -> Reply<T>
    where
        F: FnOnce() + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            nonce.to_string(),
            PendingRequest {
                reply: tx,
                timer: None,
            },
        );

        let pending = Arc::clone(&self.pending);
        let key = nonce.to_string();
        let timeout = self.timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some((_, mut entry)) = pending.remove(&key) {
                tracing::warn!(nonce = %key, timeout_ms = timeout.as_millis() as u64, "request timed out");
                on_timeout();
                // We are the timer; drop our own handle rather than abort it.
                entry.timer = None;
                entry.complete(Err(ProtocolError::Timeout(timeout)));
            }
        });
        match self.pending.get_mut(nonce) {
            Some(mut entry) => entry.timer = Some(timer),
            None => timer.abort(),
        }
        rx
    }

    /// Resolve the request registered under `nonce`. Returns false when
    /// nothing is pending for it (already answered or timed out).
    pub fn resolve(&self, nonce: &str, value: T) -> bool {
        match self.pending.remove(nonce) {
            Some((_, entry)) => {
                entry.complete(Ok(value));
                true
            }
            None => false,
        }
    }

    pub fn reject(&self, nonce: &str, err: ProtocolError) -> bool {
        match self.pending.remove(nonce) {
            Some((_, entry)) => {
                entry.complete(Err(err));
                true
            }
            None => false,
        }
    }

    /// Reject every outstanding request with the same error. Returns how
    /// many were rejected.
    pub fn reject_all(&self, err: &ProtocolError) -> usize {
        let keys: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        keys.iter()
            .filter(|key| self.reject(key, err.clone()))
            .count()
    }

    /// Drop a registration without completing it; the caller observes
    /// [`ProtocolError::Cancelled`].
    pub fn cancel(&self, nonce: &str) -> bool {
        match self.pending.remove(nonce) {
            Some((_, mut entry)) => {
                if let Some(timer) = entry.timer.take() {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let keys: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.cancel(&key);
        }
    }

    pub fn contains(&self, nonce: &str) -> bool {
        self.pending.contains_key(nonce)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Await a reply, mapping a dropped sender to `Cancelled`.
pub async fn wait<T>(reply: Reply<T>) -> Result<T, ProtocolError> {
    reply.await.unwrap_or(Err(ProtocolError::Cancelled))
}
