//! Proxy event bus
//!
//! Observability collaborators subscribe to a broadcast channel; emission
//! never blocks the request path and silently drops events when nobody
//! listens.

use tokio::sync::broadcast;

/// Events emitted by the proxy for telemetry collaborators.
#[derive(Debug, Clone)]
pub enum ProxyEvent {
    /// A request entered the proxy
    Start { method: String, path: String },
    /// Fired just before forwarding, once the target is final
    Headers { path: String, target: String },
    /// The response was handed back to the client
    End { path: String, status: u16 },
    /// The rotator selected a new public mirror
    Rotation { previous: String, next: String },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ProxyEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProxyEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ProxyEvent) {
        // A send error only means there are no subscribers right now.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
