//! Best-effort broadcast between execution contexts
//!
//! Messages reach every *other* context currently subscribed to the same
//! channel. Nothing is queued for contexts that subscribe later, and no
//! delivery is guaranteed, so leadership decisions never rely on a message
//! having arrived.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::error::Result;

/// Messages exchanged on the election channel.
///
/// Wire form: `{"type":"leader_change","holderId":"..","timestamp":123}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LeaseMessage {
    #[serde(rename_all = "camelCase")]
    LeaderChange { holder_id: String, timestamp: u64 },
    #[serde(rename_all = "camelCase")]
    LeaderReleased { holder_id: String, timestamp: u64 },
}

impl LeaseMessage {
    pub fn holder_id(&self) -> &str {
        match self {
            LeaseMessage::LeaderChange { holder_id, .. }
            | LeaseMessage::LeaderReleased { holder_id, .. } => holder_id,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            LeaseMessage::LeaderChange { timestamp, .. }
            | LeaseMessage::LeaderReleased { timestamp, .. } => *timestamp,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Publish/subscribe channel shared by the contexts of one scope.
pub trait BroadcastBus: Send + Sync {
    /// Deliver to every other subscriber of `channel`. Never echoed back.
    fn publish(&self, channel: &str, message: &LeaseMessage) -> Result<()>;

    /// Dropping the returned subscription unsubscribes.
    fn subscribe(&self, channel: &str) -> Result<Subscription>;
}

/// Receiving half of a bus subscription.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<String>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self { rx }
    }

    /// A subscription that never yields anything.
    pub fn closed() -> Self {
        let (_, rx) = mpsc::unbounded_channel();
        Self { rx }
    }

    /// Next decodable message, or `None` once the bus side is gone.
    /// Payloads that fail to decode are logged and skipped.
    pub async fn recv(&mut self) -> Option<LeaseMessage> {
        while let Some(raw) = self.rx.recv().await {
            if let Some(message) = decode(&raw) {
                return Some(message);
            }
        }
        None
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<LeaseMessage> {
        while let Ok(raw) = self.rx.try_recv() {
            if let Some(message) = decode(&raw) {
                return Some(message);
            }
        }
        None
    }
}

fn decode(raw: &str) -> Option<LeaseMessage> {
    match LeaseMessage::from_json(raw) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!(error = %e, "Dropping undecodable bus message");
            None
        }
    }
}

#[derive(Debug, Default)]
struct HubState {
    next_endpoint: u64,
    channels: HashMap<String, Vec<(u64, mpsc::UnboundedSender<String>)>>,
}

/// In-process bus hub. Each execution context takes its own
/// [`BusEndpoint`]; clones of the hub share the same channels.
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<HubState>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new endpoint with its own sender identity.
    pub fn endpoint(&self) -> BusEndpoint {
        let mut state = self.state.lock();
        state.next_endpoint += 1;
        BusEndpoint {
            hub: self.clone(),
            id: state.next_endpoint,
        }
    }

    /// Live subscribers on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        let state = self.state.lock();
        state
            .channels
            .get(channel)
            .map(|subs| subs.iter().filter(|(_, tx)| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Push a raw payload to every subscriber except `origin`.
    fn fan_out(&self, channel: &str, origin: u64, payload: String) {
        let mut state = self.state.lock();
        let Some(subscribers) = state.channels.get_mut(channel) else {
            return;
        };

        subscribers.retain(|(_, tx)| !tx.is_closed());
        for (id, tx) in subscribers.iter() {
            if *id != origin {
                let _ = tx.send(payload.clone());
            }
        }
    }
}

/// One context's view of a [`MemoryBus`].
#[derive(Debug, Clone)]
pub struct BusEndpoint {
    hub: MemoryBus,
    id: u64,
}

impl BusEndpoint {
    /// Inject an arbitrary payload, as a foreign sender would.
    pub fn publish_raw(&self, channel: &str, payload: &str) {
        self.hub.fan_out(channel, self.id, payload.to_string());
    }
}

impl BroadcastBus for BusEndpoint {
    fn publish(&self, channel: &str, message: &LeaseMessage) -> Result<()> {
        let payload = message.to_json()?;
        trace!(channel, endpoint = self.id, %payload, "Publishing bus message");
        self.hub.fan_out(channel, self.id, payload);
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.hub
            .state
            .lock()
            .channels
            .entry(channel.to_string())
            .or_default()
            .push((self.id, tx));
        Ok(Subscription::new(rx))
    }
}

/// Bus that loses every message. Only suitable for a context with no
/// siblings: a leader that lost a claim race never hears about it and keeps
/// renewing the winner's lease.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBus;

impl BroadcastBus for NullBus {
    fn publish(&self, _channel: &str, _message: &LeaseMessage) -> Result<()> {
        Ok(())
    }

    fn subscribe(&self, _channel: &str) -> Result<Subscription> {
        Ok(Subscription::closed())
    }
}
