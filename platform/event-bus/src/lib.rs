//! # EventBus Abstraction
//!
//! The durable publish/subscribe bus wiring the four pipeline stages.
//!
//! ## Why This Lives in Tier 1
//!
//! The bus is a **shared runtime capability** that all stages depend on.
//! Placing it below the stage modules allows:
//! - Stages to depend on platform crates without circular dependencies
//! - Config-driven swap between NATS (production) and InMemory (dev/test)
//! - One retry/DLQ policy shared by every consumer
//!
//! ## Semantics
//!
//! Delivery is at-least-once: the bus may hand the same message to a
//! consumer more than once, so every stage keys its side effects on an
//! idempotency token. `publish` returns the broker-assigned message id,
//! which the warehouse writer reuses as its dedupe token.
//!
//! ## Implementations
//!
//! - **NatsBus**: production implementation over NATS
//! - **InMemoryBus**: test/dev implementation over broadcast channels

pub mod retry;

mod inmemory_bus;
mod nats_bus;

pub use inmemory_bus::InMemoryBus;
pub use nats_bus::NatsBus;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;

/// A message received from the event bus
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// The subject this message was published to
    pub subject: String,
    /// The message payload (UTF-8 JSON in this pipeline)
    pub payload: Vec<u8>,
    /// Broker-assigned id, unique per publication. Redeliveries of the
    /// same publication carry the same id.
    pub message_id: String,
    /// Producer-supplied attributes
    pub attributes: HashMap<String, String>,
}

impl BusMessage {
    pub fn new(subject: String, payload: Vec<u8>, message_id: String) -> Self {
        Self {
            subject,
            payload,
            message_id,
            attributes: HashMap::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: HashMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }
}

/// Errors that can occur when using the event bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message: {0}")]
    PublishError(String),

    #[error("failed to subscribe to subject: {0}")]
    SubscribeError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),
}

/// Result type for event bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Core pub/sub capability for the pipeline stages.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a payload to a subject with optional attributes.
    ///
    /// Returns the broker-assigned message id. The id is stable across
    /// redeliveries of this publication and is used downstream as a
    /// dedupe token.
    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        attributes: HashMap<String, String>,
    ) -> BusResult<String>;

    /// Subscribe to messages matching a subject pattern.
    ///
    /// Patterns support NATS wildcards: `*` matches one token,
    /// `>` matches one or more trailing tokens.
    async fn subscribe(&self, pattern: &str) -> BusResult<BoxStream<'static, BusMessage>>;
}

impl fmt::Debug for dyn EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus")
    }
}

/// Serialize an event and publish it in one step.
///
/// All pipeline envelopes travel as UTF-8 JSON; this helper keeps the
/// serialization failure inside the bus error taxonomy.
pub async fn publish_json<T: serde::Serialize + Sync>(
    bus: &dyn EventBus,
    subject: &str,
    event: &T,
) -> BusResult<String> {
    let payload =
        serde_json::to_vec(event).map_err(|e| BusError::SerializationError(e.to_string()))?;
    bus.publish(subject, payload, HashMap::new()).await
}
