//! Periodic liveness signal to the host.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::bus::MessageBus;
use crate::messages::{now_millis, OutboundMessage};

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

/// Transport health as reported by the surrounding tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSignal {
    Up,
    Down,
}

pub struct Heartbeat {
    bus: Arc<dyn MessageBus>,
    period: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Heartbeat {
    pub fn new(bus: Arc<dyn MessageBus>, period: Duration) -> Self {
        Self {
            bus,
            period,
            task: Mutex::new(None),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Begin emitting. Returns whether a heartbeat is running afterwards;
    /// calling it while already running leaves the existing interval alone.
    pub fn start(&self) -> bool {
        if !self.bus.is_embedded() {
            tracing::debug!("not embedded; heartbeat not started");
            return false;
        }
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return true;
        }
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!("no async runtime; heartbeat not started");
                return false;
            }
        };

        let bus = Arc::clone(&self.bus);
        let period = self.period;
        *task = Some(handle.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let beat = OutboundMessage::Heartbeat {
                    timestamp: now_millis(),
                };
                if let Err(err) = bus.send(&beat) {
                    tracing::debug!(error = %err, "heartbeat not delivered");
                }
            }
        }));
        tracing::debug!(period_ms = period.as_millis() as u64, "heartbeat started");
        true
    }

    /// Cancel the interval. Returns true only for the call that actually
    /// stopped it.
    pub fn stop(&self) -> bool {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match task {
            Some(task) => {
                task.abort();
                tracing::debug!("heartbeat stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    pub fn on_transport(&self, signal: TransportSignal) {
        match signal {
            TransportSignal::Up => {
                self.start();
            }
            TransportSignal::Down => {
                self.stop();
            }
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        if let Some(task) = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}
