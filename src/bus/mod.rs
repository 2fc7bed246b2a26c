//! Message bus seam.
//!
//! The relay loop consumes [`BusEvent`]s and subscribes topic patterns
//! through [`TopicSubscriber`]. [`mqtt`] implements both over rumqttc.

pub mod mqtt;

use crate::error::Result;
use async_trait::async_trait;

pub use mqtt::MqttClient;

/// Event forwarded from the bus client to the relay loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// Broker acknowledged a connection; 0 means accepted.
    Connected(u8),
    Message {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
}

/// Subscribes to topic patterns on the bus.
#[async_trait]
pub trait TopicSubscriber: Send + Sync {
    async fn subscribe(&self, pattern: &str) -> Result<()>;
}
