//! Origin-tagged message transport between the widget and its host.
//!
//! The protocol only needs three things from a transport: whether a host
//! is attached at all, a way to post a message to it, and a way to be
//! told about inbound messages.  [`LocalBus`] is an in-process pair used
//! by tests and embedders; [`StdioBus`] speaks newline-delimited JSON.

use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

use crate::error::ProtocolError;
use crate::messages::{Envelope, OutboundMessage};

pub type MessageHandler = Arc<dyn Fn(Envelope) + Send + Sync>;

pub trait MessageBus: Send + Sync {
    /// True when a host window is present to talk to.
    fn is_embedded(&self) -> bool;
    fn send(&self, message: &OutboundMessage) -> Result<(), ProtocolError>;
    /// Register a handler invoked for every inbound envelope, in delivery order.
    fn on_message(&self, handler: MessageHandler);
}

#[derive(Default)]
struct HandlerSet {
    handlers: Mutex<Vec<MessageHandler>>,
}

impl HandlerSet {
    fn register(&self, handler: MessageHandler) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    fn dispatch(&self, envelope: Envelope) {
        // Snapshot so handlers may register further handlers.
        let handlers = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers {
            handler(envelope.clone());
        }
    }
}

/// Widget side of an in-process channel.
pub struct LocalBus {
    outbound: Option<mpsc::UnboundedSender<OutboundMessage>>,
    handlers: HandlerSet,
}

/// Host side of a [`LocalBus`]: receives what the widget posts and
/// delivers inbound envelopes to it.
pub struct HostEndpoint {
    outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    bus: Arc<LocalBus>,
}

impl LocalBus {
    pub fn pair() -> (Arc<LocalBus>, HostEndpoint) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bus = Arc::new(LocalBus {
            outbound: Some(tx),
            handlers: HandlerSet::default(),
        });
        let host = HostEndpoint {
            outbound: rx,
            bus: Arc::clone(&bus),
        };
        (bus, host)
    }

    /// A bus with no host behind it, as when the widget runs standalone.
    pub fn detached() -> Arc<LocalBus> {
        Arc::new(LocalBus {
            outbound: None,
            handlers: HandlerSet::default(),
        })
    }
}

impl MessageBus for LocalBus {
    fn is_embedded(&self) -> bool {
        self.outbound.is_some()
    }

    fn send(&self, message: &OutboundMessage) -> Result<(), ProtocolError> {
        let tx = self.outbound.as_ref().ok_or(ProtocolError::NotEmbedded)?;
        tx.send(message.clone())
            .map_err(|_| ProtocolError::Transport("host endpoint closed".into()))
    }

    fn on_message(&self, handler: MessageHandler) {
        self.handlers.register(handler);
    }
}

impl HostEndpoint {
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        self.outbound.recv().await
    }

    pub fn try_recv(&mut self) -> Option<OutboundMessage> {
        self.outbound.try_recv().ok()
    }

    /// Deliver a message to the widget as if posted from `origin`.
    pub fn deliver(&self, origin: &str, data: serde_json::Value) {
        self.bus.handlers.dispatch(Envelope::new(origin, data));
    }
}

/// Newline-delimited JSON transport.
///
/// Each inbound line is an [`Envelope`] (`{"origin": .., "data": ..}`);
/// each outbound message is written as one JSON object per line.
pub struct StdioBus {
    writer: Mutex<Box<dyn Write + Send>>,
    handlers: Arc<HandlerSet>,
}

impl StdioBus {
    /// Read envelopes from stdin and write messages to stdout.
    pub fn stdio() -> Arc<StdioBus> {
        Self::with_io(tokio::io::stdin(), Box::new(std::io::stdout()))
    }

    /// Spawn a reader task over `reader`; must be called inside a tokio runtime.
    pub fn with_io<R>(reader: R, writer: Box<dyn Write + Send>) -> Arc<StdioBus>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let handlers = Arc::new(HandlerSet::default());
        let bus = Arc::new(StdioBus {
            writer: Mutex::new(writer),
            handlers: Arc::clone(&handlers),
        });
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Envelope>(&line) {
                            Ok(envelope) => handlers.dispatch(envelope),
                            Err(err) => {
                                tracing::warn!(error = %err, "discarding malformed inbound line")
                            }
                        }
                    }
                    Ok(None) => {
                        tracing::info!("inbound stream closed");
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "inbound stream failed");
                        break;
                    }
                }
            }
        });
        bus
    }
}

impl MessageBus for StdioBus {
    fn is_embedded(&self) -> bool {
        true
    }

    fn send(&self, message: &OutboundMessage) -> Result<(), ProtocolError> {
        let line = serde_json::to_string(message)
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{}", line)
            .and_then(|_| writer.flush())
            .map_err(|e| ProtocolError::Transport(e.to_string()))
    }

    fn on_message(&self, handler: MessageHandler) {
        self.handlers.register(handler);
    }
}
