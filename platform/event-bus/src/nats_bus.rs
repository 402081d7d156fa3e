//! NATS-based implementation of the EventBus trait

use crate::{BusError, BusMessage, BusResult, EventBus};
use async_nats::{Client, HeaderMap as NatsHeaderMap};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use uuid::Uuid;

/// Header carrying the message id across the wire.
///
/// Core NATS does not assign publication ids, so the publisher stamps
/// one; consumers and redelivery tooling read it back from headers.
const MSG_ID_HEADER: &str = "Pipeline-Msg-Id";

/// EventBus implementation over a NATS connection
///
/// This is the production implementation. It wraps an
/// `async_nats::Client` and carries message ids and attributes as NATS
/// headers.
#[derive(Clone)]
pub struct NatsBus {
    client: Client,
}

impl NatsBus {
    /// Create a new NatsBus from an existing NATS client
    ///
    /// # Arguments
    /// * `client` - An already-connected `async_nats::Client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Get a reference to the underlying NATS client
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl EventBus for NatsBus {
    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        attributes: HashMap<String, String>,
    ) -> BusResult<String> {
        let message_id = Uuid::new_v4().to_string();

        let mut headers = NatsHeaderMap::new();
        headers.insert(MSG_ID_HEADER, message_id.as_str());
        for (key, value) in &attributes {
            headers.insert(key.as_str(), value.as_str());
        }

        self.client
            .publish_with_headers(subject.to_string(), headers, payload.into())
            .await
            .map_err(|e| BusError::PublishError(e.to_string()))?;

        Ok(message_id)
    }

    async fn subscribe(&self, pattern: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        let subscriber = self
            .client
            .subscribe(pattern.to_string())
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        // Convert NATS messages to BusMessages
        let stream = subscriber.map(|nats_msg| {
            let mut message_id = String::new();
            let mut attributes = HashMap::new();

            if let Some(nats_headers) = nats_msg.headers {
                for (key, values) in nats_headers.iter() {
                    let Some(value) = values.first() else {
                        continue;
                    };
                    if key.to_string() == MSG_ID_HEADER {
                        message_id = value.to_string();
                    } else {
                        attributes.insert(key.to_string(), value.to_string());
                    }
                }
            }

            // Messages published outside this crate may lack an id;
            // synthesize one so consumers always have a dedupe token.
            if message_id.is_empty() {
                message_id = Uuid::new_v4().to_string();
            }

            BusMessage::new(
                nats_msg.subject.to_string(),
                nats_msg.payload.to_vec(),
                message_id,
            )
            .with_attributes(attributes)
        });

        Ok(stream.boxed())
    }
}
