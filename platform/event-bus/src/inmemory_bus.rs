//! In-memory implementation of the EventBus trait for testing and development

use crate::{BusMessage, BusResult, EventBus};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// EventBus implementation using in-memory channels
///
/// This implementation is suitable for:
/// - Unit tests (no external dependencies)
/// - Local development without a broker
/// - The CLI, which runs the first three stages in-process
///
/// Messages are broadcast to all subscribers via Tokio broadcast
/// channels; message ids are generated at publish time so consumers see
/// the same dedupe-token shape as with the production bus.
#[derive(Clone)]
pub struct InMemoryBus {
    // Global broadcast channel for all messages.
    // A large buffer avoids dropping messages in bursty tests.
    sender: Arc<broadcast::Sender<BusMessage>>,
}

impl InMemoryBus {
    /// Create a new in-memory event bus with a 1000-message buffer.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1000);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create a new in-memory event bus with a custom buffer size
    pub fn with_capacity(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Check if a subject matches a subscription pattern
    ///
    /// Supports NATS-style wildcards:
    /// - `*` matches exactly one token
    /// - `>` matches one or more tokens
    fn matches_pattern(subject: &str, pattern: &str) -> bool {
        let subject_tokens: Vec<&str> = subject.split('.').collect();
        let pattern_tokens: Vec<&str> = pattern.split('.').collect();

        let mut s_idx = 0;
        let mut p_idx = 0;

        while s_idx < subject_tokens.len() && p_idx < pattern_tokens.len() {
            let pattern_token = pattern_tokens[p_idx];

            if pattern_token == ">" {
                // `>` matches all remaining tokens
                return true;
            } else if pattern_token == "*" {
                s_idx += 1;
                p_idx += 1;
            } else if subject_tokens[s_idx] == pattern_token {
                s_idx += 1;
                p_idx += 1;
            } else {
                return false;
            }
        }

        // Both must be exhausted for a full match (unless pattern ended with `>`)
        s_idx == subject_tokens.len() && p_idx == pattern_tokens.len()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        attributes: HashMap<String, String>,
    ) -> BusResult<String> {
        let message_id = Uuid::new_v4().to_string();
        let msg = BusMessage::new(subject.to_string(), payload, message_id.clone())
            .with_attributes(attributes);

        // Broadcast to all subscribers; no receivers is not an error.
        let _ = self.sender.send(msg);

        Ok(message_id)
    }

    async fn subscribe(&self, pattern: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        let mut receiver = self.sender.subscribe();
        let pattern = pattern.to_string();

        // Filter messages based on the subscription pattern
        let stream = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(msg) => {
                        if Self::matches_pattern(&msg.subject, &pattern) {
                            yield msg;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "InMemoryBus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        };

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[test]
    fn test_pattern_matching() {
        // Exact match
        assert!(InMemoryBus::matches_pattern(
            "invoices.dlq.converter",
            "invoices.dlq.converter"
        ));

        // Single wildcard
        assert!(InMemoryBus::matches_pattern(
            "invoices.dlq.converter",
            "invoices.*.converter"
        ));
        assert!(!InMemoryBus::matches_pattern(
            "invoices.dlq.converter",
            "invoices.*"
        ));

        // Multi-level wildcard
        assert!(InMemoryBus::matches_pattern(
            "invoices.dlq.converter",
            "invoices.dlq.>"
        ));
        assert!(InMemoryBus::matches_pattern(
            "invoices.dlq.extractor",
            "invoices.>"
        ));
        assert!(!InMemoryBus::matches_pattern(
            "invoices.dlq.converter",
            "audits.>"
        ));

        // Edge cases
        assert!(InMemoryBus::matches_pattern("single", "*"));
        assert!(InMemoryBus::matches_pattern("single", ">"));
        assert!(!InMemoryBus::matches_pattern("one.two", "one"));
    }

    #[tokio::test]
    async fn test_publish_returns_unique_message_ids() {
        let bus = InMemoryBus::new();
        let id1 = bus
            .publish("invoices.uploaded", b"a".to_vec(), HashMap::new())
            .await
            .unwrap();
        let id2 = bus
            .publish("invoices.uploaded", b"b".to_vec(), HashMap::new())
            .await
            .unwrap();
        assert_ne!(id1, id2);
    }

    #[tokio::test]
    async fn test_publish_and_subscribe() {
        let bus = InMemoryBus::new();

        // Subscribe first
        let mut stream = bus.subscribe("invoices.>").await.unwrap();

        let payload = b"test message".to_vec();
        let message_id = bus
            .publish("invoices.converted", payload.clone(), HashMap::new())
            .await
            .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("timeout")
            .expect("stream ended");

        assert_eq!(msg.subject, "invoices.converted");
        assert_eq!(msg.payload, payload);
        assert_eq!(msg.message_id, message_id);
    }

    #[tokio::test]
    async fn test_attributes_travel_with_the_message() {
        let bus = InMemoryBus::new();
        let mut stream = bus.subscribe("invoices.extracted").await.unwrap();

        let mut attrs = HashMap::new();
        attrs.insert("vendor_type".to_string(), "ifood".to_string());
        bus.publish("invoices.extracted", b"{}".to_vec(), attrs)
            .await
            .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("timeout")
            .expect("stream ended");
        assert_eq!(msg.attributes.get("vendor_type").unwrap(), "ifood");
    }

    #[tokio::test]
    async fn test_multiple_messages_in_order() {
        let bus = InMemoryBus::new();
        let mut stream = bus.subscribe("invoices.>").await.unwrap();

        for i in 0..5 {
            let payload = format!("message {}", i).into_bytes();
            bus.publish(&format!("invoices.msg.{}", i), payload, HashMap::new())
                .await
                .unwrap();
        }

        for i in 0..5 {
            let msg = tokio::time::timeout(Duration::from_secs(1), stream.next())
                .await
                .expect("timeout")
                .expect("stream ended");

            assert_eq!(msg.subject, format!("invoices.msg.{}", i));
            assert_eq!(msg.payload, format!("message {}", i).into_bytes());
        }
    }

    #[tokio::test]
    async fn test_wildcard_filtering() {
        let bus = InMemoryBus::new();

        let mut stream = bus.subscribe("invoices.dlq.*").await.unwrap();

        bus.publish("invoices.dlq.converter", b"match".to_vec(), HashMap::new())
            .await
            .unwrap();
        bus.publish("invoices.uploaded", b"no match".to_vec(), HashMap::new())
            .await
            .unwrap();
        bus.publish("invoices.dlq.extractor", b"match".to_vec(), HashMap::new())
            .await
            .unwrap();

        let msg1 = tokio::time::timeout(Duration::from_millis(100), stream.next())
            .await
            .expect("timeout")
            .expect("stream ended");
        assert_eq!(msg1.subject, "invoices.dlq.converter");

        let msg2 = tokio::time::timeout(Duration::from_millis(100), stream.next())
            .await
            .expect("timeout")
            .expect("stream ended");
        assert_eq!(msg2.subject, "invoices.dlq.extractor");

        let result = tokio::time::timeout(Duration::from_millis(100), stream.next()).await;
        assert!(result.is_err(), "should timeout, no more messages");
    }

    #[tokio::test]
    async fn test_multiple_subscribers_fan_out() {
        let bus = InMemoryBus::new();

        let mut stream1 = bus.subscribe("invoices.>").await.unwrap();
        let mut stream2 = bus.subscribe("invoices.>").await.unwrap();

        let payload = b"broadcast".to_vec();
        bus.publish("invoices.classified", payload.clone(), HashMap::new())
            .await
            .unwrap();

        let msg1 = tokio::time::timeout(Duration::from_secs(1), stream1.next())
            .await
            .expect("timeout")
            .expect("stream ended");
        let msg2 = tokio::time::timeout(Duration::from_secs(1), stream2.next())
            .await
            .expect("timeout")
            .expect("stream ended");

        assert_eq!(msg1.payload, payload);
        assert_eq!(msg2.payload, payload);
    }
}
