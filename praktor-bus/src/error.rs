use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus connect failed: {0}")]
    Connect(String),
    #[error("publish failed on {subject}: {source}")]
    Publish {
        subject: String,
        #[source]
        source: async_nats::PublishError,
    },
    #[error("subscribe failed on {subject}: {source}")]
    Subscribe {
        subject: String,
        #[source]
        source: async_nats::SubscribeError,
    },
    #[error("request to {subject} timed out after {timeout_ms}ms")]
    RequestTimeout { subject: String, timeout_ms: u64 },
    #[error("request to {subject} failed: {source}")]
    Request {
        subject: String,
        #[source]
        source: async_nats::RequestError,
    },
    #[error("monitoring query failed: {0}")]
    Monitor(String),
    #[error("malformed payload: {0}")]
    Payload(String),
}
