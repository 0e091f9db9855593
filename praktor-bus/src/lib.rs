//! # praktor-bus
//!
//! Client for the hierarchical subject bus: publish,
//! subscribe, request/reply, and subject-subscriber-count polling (used by
//! the orchestrator's `ensureContainer` handshake). The bus server
//! itself — "a well-known NATS-style bus" — is an external collaborator;
//! this crate only implements the client side of its contract.

mod error;
mod memory;
mod nats;

pub use error::BusError;
pub use memory::InMemoryBus;
pub use nats::{NatsBusClient, NatsBusConfig};

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

/// One message observed on a subscription.
#[derive(Clone, Debug)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Vec<u8>,
    /// Present when the publisher expects a reply (request/reply subjects
    /// such as `agent.<id>.control`, `agent.<id>.route`, `host.ipc.<id>`).
    pub reply_to: Option<String>,
}

pub type MessageStream = BoxStream<'static, BusMessage>;

/// Client side of the subject bus. Implementations: [`NatsBusClient`] (real
/// bus) and [`InMemoryBus`] (in-process test double).
#[async_trait]
pub trait BusClient: Send + Sync {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Publishes a reply to a subject captured from an incoming message's
    /// `reply_to` (answers a request/reply call).
    async fn reply(&self, reply_subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.publish(reply_subject, payload).await
    }

    async fn subscribe(&self, subject: &str) -> Result<MessageStream, BusError>;

    async fn request(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, BusError>;

    /// Number of distinct subscribers currently bound to `subject`. Used to
    /// detect that a freshly started agent container has connected and
    /// subscribed to its input/control subjects.
    async fn subscriber_count(&self, subject: &str) -> Result<u64, BusError>;
}

/// Polls `subscriber_count(subject)` until it exceeds `baseline`, up to
/// `deadline`, sleeping `interval` between polls. Returns `true` if the
/// count rose in time, `false` on timeout (caller proceeds anyway rather
/// than blocking startup forever).
pub async fn wait_for_subscriber_rise(
    bus: &dyn BusClient,
    subject: &str,
    baseline: u64,
    deadline: Duration,
    interval: Duration,
) -> bool {
    let start = tokio::time::Instant::now();
    loop {
        match bus.subscriber_count(subject).await {
            Ok(count) if count > baseline => return true,
            _ => {}
        }
        if start.elapsed() >= deadline {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct StubBus {
        counts: Vec<u64>,
        idx: AtomicU64,
    }

    #[async_trait]
    impl BusClient for StubBus {
        async fn publish(&self, _subject: &str, _payload: Vec<u8>) -> Result<(), BusError> {
            Ok(())
        }

        async fn subscribe(&self, _subject: &str) -> Result<MessageStream, BusError> {
            unimplemented!()
        }

        async fn request(
            &self,
            _subject: &str,
            _payload: Vec<u8>,
            _timeout: Duration,
        ) -> Result<Vec<u8>, BusError> {
            unimplemented!()
        }

        async fn subscriber_count(&self, _subject: &str) -> Result<u64, BusError> {
            let i = self.idx.fetch_add(1, Ordering::SeqCst) as usize;
            Ok(*self.counts.get(i).unwrap_or(self.counts.last().unwrap()))
        }
    }

    #[tokio::test]
    async fn wait_for_subscriber_rise_returns_true_once_count_exceeds_baseline() {
        let bus: Arc<dyn BusClient> = Arc::new(StubBus {
            counts: vec![0, 0, 1],
            idx: AtomicU64::new(0),
        });
        let rose = wait_for_subscriber_rise(
            bus.as_ref(),
            "agent.coder.input",
            0,
            Duration::from_millis(50),
            Duration::from_millis(1),
        )
        .await;
        assert!(rose);
    }

    #[tokio::test]
    async fn wait_for_subscriber_rise_times_out_when_count_never_rises() {
        let bus: Arc<dyn BusClient> = Arc::new(StubBus {
            counts: vec![0],
            idx: AtomicU64::new(0),
        });
        let rose = wait_for_subscriber_rise(
            bus.as_ref(),
            "agent.coder.input",
            0,
            Duration::from_millis(20),
            Duration::from_millis(5),
        )
        .await;
        assert!(!rose);
    }
}
