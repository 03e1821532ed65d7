use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::protocol::{topic_matches, Envelope};

pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Publish seam shared by the in-process bus and the file relay writer.
///
/// Publication is fire-and-forget: no acknowledgement, no backpressure.
/// Implementations report errors so callers can log and retry on the next
/// cycle, but nothing in the core treats a failed publish as fatal.
pub trait Transport: Send + Sync {
    fn publish(&self, topic: &str, payload: Value, now_ms: u64) -> Result<(), BusError>;
}

/// In-process topic bus over a tokio broadcast channel.
///
/// Delivery is at-least-once per subscriber while it keeps up; a lagging
/// subscriber loses the oldest messages, which surfaces supervisory-side as
/// staleness rather than as an error here.
#[derive(Debug, Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<Envelope>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    /// Receiver paired with a topic filter; see [`topic_matches`].
    pub fn subscribe_filtered(&self, filter: &str) -> FilteredSubscription {
        FilteredSubscription {
            rx: self.tx.subscribe(),
            filter: filter.to_string(),
        }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl Transport for LocalBus {
    fn publish(&self, topic: &str, payload: Value, now_ms: u64) -> Result<(), BusError> {
        let envelope = Envelope {
            topic: topic.to_string(),
            payload,
            timestamp: now_ms,
        };
        // No subscribers means nobody cares yet, not a failure.
        let _ = self.tx.send(envelope);
        Ok(())
    }
}

/// Broadcast receiver that skips envelopes not matching its filter and
/// rides over lag gaps.
#[derive(Debug)]
pub struct FilteredSubscription {
    rx: broadcast::Receiver<Envelope>,
    filter: String,
}

impl FilteredSubscription {
    /// Next matching envelope; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) if topic_matches(&self.filter, &envelope.topic) => {
                    return Some(envelope)
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, filter = %self.filter, "bus subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Drains whatever is immediately available, for poll-style callers.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) if topic_matches(&self.filter, &envelope.topic) => {
                    return Some(envelope)
                }
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, filter = %self.filter, "bus subscriber lagged");
                    continue;
                }
                Err(_) => return None,
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    #[error("publish failed: {0}")]
    PublishFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn filtered_subscription_sees_only_matching_topics() {
        let bus = LocalBus::default();
        let mut sensors = bus.subscribe_filtered("truck/+/sensors");

        bus.publish("truck/1/state", json!({ "automatic": false }), 1)
            .unwrap();
        bus.publish("truck/2/sensors", json!({ "truck_id": 2 }), 2)
            .unwrap();

        let envelope = sensors.recv().await.unwrap();
        assert_eq!(envelope.topic, "truck/2/sensors");
        assert_eq!(envelope.timestamp, 2);
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = LocalBus::default();
        assert!(bus.publish("truck/1/sensors", json!({}), 0).is_ok());
    }
}
