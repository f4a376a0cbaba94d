// Lifecycle events and downstream collaborators
//
// The client core reports progress through a `Broadcaster` and hands
// delivery acknowledgements and envelope unwrapping to the application.

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

/// UI-visible lifecycle events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Proof of work is being computed for the message sent at `timestamp`
    CalculatingPoW { timestamp: u64 },
    /// Target swarm is being resolved for the message sent at `timestamp`
    ContactingNetwork { timestamp: u64 },
    /// The message sent at `timestamp` is being handed to a swarm node
    SendingMessage { timestamp: u64 },
    BuildingPaths,
    PathsBuilt,
    /// A node rejected a request because the local clock is skewed
    ClockOutOfSync,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::CalculatingPoW { .. } => "calculatingPoW",
            Event::ContactingNetwork { .. } => "contactingNetwork",
            Event::SendingMessage { .. } => "sendingMessage",
            Event::BuildingPaths => "buildingPaths",
            Event::PathsBuilt => "pathsBuilt",
            Event::ClockOutOfSync => "clockOutOfSync",
        }
    }
}

/// Sink for lifecycle events
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, event: Event);
}

/// Broadcaster that only logs
#[derive(Debug, Default, Clone)]
pub struct TracingBroadcaster;

impl Broadcaster for TracingBroadcaster {
    fn broadcast(&self, event: Event) {
        debug!("Event: {}", event.name());
    }
}

/// Broadcaster fanning events out to any number of tokio subscribers
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    sender: broadcast::Sender<Event>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn broadcast(&self, event: Event) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }
}

/// Push-notification service told that a message reached this device
pub trait DeliveryAcknowledger: Send + Sync {
    fn acknowledge_delivery(&self, hash: &str, expiration: u64, public_key: &str);
}

#[derive(Debug, Error)]
#[error("Failed to unwrap envelope: {0}")]
pub struct DecodeError(pub String);

/// Turns the raw `data` of a stored message into the application envelope
pub trait EnvelopeDecoder: Send + Sync {
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, DecodeError>;
}

/// Decoder returning the stored bytes unchanged
#[derive(Debug, Default, Clone)]
pub struct PassthroughDecoder;

impl EnvelopeDecoder for PassthroughDecoder {
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, DecodeError> {
        if data.is_empty() {
            return Err(DecodeError("empty envelope".into()));
        }
        Ok(data.to_vec())
    }
}
