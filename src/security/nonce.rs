use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

/// Default number of accepted nonces remembered for replay detection.
pub const DEFAULT_NONCE_CAPACITY: usize = 1000;

const RANDOM_SEGMENT_LEN: usize = 9;

/// Bounded set of consumed nonces with FIFO eviction.
///
/// A nonce is recorded only when [`NonceStore::validate`] accepts it.
/// Once `capacity` entries are held, the oldest accepted nonce is
/// forgotten first.
#[derive(Debug)]
pub struct NonceStore {
    capacity: usize,
    inner: Mutex<Seen>,
}

#[derive(Debug, Default)]
struct Seen {
    set: HashSet<String>,
    order: VecDeque<String>,
}

impl NonceStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Seen::default()),
        }
    }

    /// Produce a fresh nonce: a millisecond timestamp in base 36 followed
    /// by two independent alphanumeric segments, joined with `-`.
    pub fn generate(&self) -> String {
        generate_nonce()
    }

    /// Returns true and records the nonce if it has not been accepted
    /// before; returns false for a replay.
    pub fn validate(&self, nonce: &str) -> bool {
        let mut seen = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if seen.set.contains(nonce) {
            return false;
        }
        while seen.order.len() >= self.capacity {
            match seen.order.pop_front() {
                Some(oldest) => {
                    seen.set.remove(&oldest);
                }
                None => break,
            }
        }
        seen.set.insert(nonce.to_string());
        seen.order.push_back(nonce.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        let mut seen = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        seen.set.clear();
        seen.order.clear();
    }
}

impl Default for NonceStore {
    fn default() -> Self {
        Self::new(DEFAULT_NONCE_CAPACITY)
    }
}

fn random_segment(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn to_base36(mut value: u128) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Generate a nonce outside of any store (used by hosts and tests).
pub fn generate_nonce() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!(
        "{}-{}-{}",
        to_base36(millis),
        random_segment(RANDOM_SEGMENT_LEN),
        random_segment(RANDOM_SEGMENT_LEN)
    )
}
