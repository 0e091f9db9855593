//! In-process bus double for tests: no network, subjects are plain string
//! keys into a broadcast map. A fixture, not a production implementation.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{BusClient, BusError, BusMessage, MessageStream};

struct Topic {
    tx: broadcast::Sender<BusMessage>,
    subscriber_count: u64,
}

/// An in-memory bus: publish fans out to every active subscription on the
/// same subject; `request` publishes then waits on a reply subject.
pub struct InMemoryBus {
    topics: Mutex<HashMap<String, Topic>>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
        }
    }

    fn topic_sender(&self, subject: &str) -> broadcast::Sender<BusMessage> {
        let mut topics = self.topics.lock().expect("bus mutex poisoned");
        topics
            .entry(subject.to_string())
            .or_insert_with(|| Topic {
                tx: broadcast::channel(256).0,
                subscriber_count: 0,
            })
            .tx
            .clone()
    }

    /// Test helper: manually set a subject's apparent subscriber count,
    /// simulating a container connecting without a real subscription.
    pub fn set_subscriber_count(&self, subject: &str, count: u64) {
        let mut topics = self.topics.lock().expect("bus mutex poisoned");
        let entry = topics.entry(subject.to_string()).or_insert_with(|| Topic {
            tx: broadcast::channel(256).0,
            subscriber_count: 0,
        });
        entry.subscriber_count = count;
    }
}

#[async_trait]
impl BusClient for InMemoryBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let tx = self.topic_sender(subject);
        let _ = tx.send(BusMessage {
            subject: subject.to_string(),
            payload,
            reply_to: None,
        });
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<MessageStream, BusError> {
        let tx = self.topic_sender(subject);
        {
            let mut topics = self.topics.lock().expect("bus mutex poisoned");
            if let Some(t) = topics.get_mut(subject) {
                t.subscriber_count += 1;
            }
        }
        let rx = tx.subscribe();
        let stream = BroadcastStream::new(rx).filter_map(|r| r.ok());
        Ok(Box::pin(stream))
    }

    async fn request(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, BusError> {
        let reply_subject = format!("_INBOX.{subject}.{}", uuid_like());
        let mut reply_rx = {
            let tx = self.topic_sender(&reply_subject);
            tx.subscribe()
        };
        let tx = self.topic_sender(subject);
        let _ = tx.send(BusMessage {
            subject: subject.to_string(),
            payload,
            reply_to: Some(reply_subject.clone()),
        });
        match tokio::time::timeout(timeout, reply_rx.recv()).await {
            Ok(Ok(msg)) => Ok(msg.payload),
            _ => Err(BusError::RequestTimeout {
                subject: subject.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn subscriber_count(&self, subject: &str) -> Result<u64, BusError> {
        let topics = self.topics.lock().expect("bus mutex poisoned");
        Ok(topics.get(subject).map(|t| t.subscriber_count).unwrap_or(0))
    }
}

fn uuid_like() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_subscribe_delivers_message() {
        let bus = InMemoryBus::new();
        let mut stream = bus.subscribe("agent.coder.input").await.unwrap();
        bus.publish("agent.coder.input", b"hello".to_vec()).await.unwrap();
        let msg = tokio::time::timeout(Duration::from_millis(100), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.payload, b"hello");
    }

    #[tokio::test]
    async fn request_times_out_with_no_responder() {
        let bus = InMemoryBus::new();
        let result = bus
            .request("agent.coder.route", b"{}".to_vec(), Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(BusError::RequestTimeout { .. })));
    }

    #[tokio::test]
    async fn subscriber_count_rises_after_subscribe() {
        let bus = InMemoryBus::new();
        assert_eq!(bus.subscriber_count("agent.coder.input").await.unwrap(), 0);
        let _stream = bus.subscribe("agent.coder.input").await.unwrap();
        assert_eq!(bus.subscriber_count("agent.coder.input").await.unwrap(), 1);
    }
}
