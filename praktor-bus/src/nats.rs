use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;

use crate::{BusClient, BusError, BusMessage, MessageStream};

/// Connection settings for the real bus. `monitor_url` points at the NATS
/// server's HTTP monitoring endpoint (`http://host:8222` by default) and
/// backs [`NatsBusClient::subscriber_count`] — core NATS has no subject
/// subscriber count in the wire protocol itself.
#[derive(Clone, Debug)]
pub struct NatsBusConfig {
    pub server_url: String,
    pub monitor_url: String,
}

impl NatsBusConfig {
    pub fn new(server_url: impl Into<String>, monitor_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            monitor_url: monitor_url.into(),
        }
    }
}

pub struct NatsBusClient {
    client: async_nats::Client,
    monitor_url: String,
    http: reqwest::Client,
}

impl NatsBusClient {
    pub async fn connect(config: NatsBusConfig) -> Result<Self, BusError> {
        let client = async_nats::connect(&config.server_url)
            .await
            .map_err(|e| BusError::Connect(e.to_string()))?;
        Ok(Self {
            client,
            monitor_url: config.monitor_url,
            http: reqwest::Client::new(),
        })
    }
}

#[derive(Deserialize)]
struct SubszResponse {
    #[serde(default)]
    subscriptions: Vec<SubszEntry>,
}

#[derive(Deserialize)]
struct SubszEntry {
    #[serde(default)]
    subject: String,
}

#[async_trait]
impl BusClient for NatsBusClient {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|source| BusError::Publish {
                subject: subject.to_string(),
                source,
            })
    }

    async fn subscribe(&self, subject: &str) -> Result<MessageStream, BusError> {
        let sub = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|source| BusError::Subscribe {
                subject: subject.to_string(),
                source,
            })?;
        let stream = sub.map(|msg| BusMessage {
            subject: msg.subject.to_string(),
            payload: msg.payload.to_vec(),
            reply_to: msg.reply.map(|s| s.to_string()),
        });
        Ok(Box::pin(stream))
    }

    async fn request(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, BusError> {
        match tokio::time::timeout(
            timeout,
            self.client.request(subject.to_string(), payload.into()),
        )
        .await
        {
            Ok(Ok(msg)) => Ok(msg.payload.to_vec()),
            Ok(Err(source)) => Err(BusError::Request {
                subject: subject.to_string(),
                source,
            }),
            Err(_) => Err(BusError::RequestTimeout {
                subject: subject.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn subscriber_count(&self, subject: &str) -> Result<u64, BusError> {
        let url = format!("{}/subsz?subs=1", self.monitor_url.trim_end_matches('/'));
        let resp: SubszResponse = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| BusError::Monitor(e.to_string()))?
            .json()
            .await
            .map_err(|e| BusError::Monitor(e.to_string()))?;
        let count = resp
            .subscriptions
            .iter()
            .filter(|s| subject_matches(&s.subject, subject))
            .count();
        Ok(count as u64)
    }
}

/// Exact match only; the monitoring endpoint reports concrete subscriptions,
/// not wildcard patterns, so no `*`/`>` expansion is needed here.
fn subject_matches(candidate: &str, subject: &str) -> bool {
    candidate == subject
}
