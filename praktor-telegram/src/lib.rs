//! Telegram chat ingress: the one concrete external collaborator,
//! wired up end to end so the gateway is runnable, kept deliberately thin
//! since the ingress's own internals (message chunking, long-polling
//! mechanics) are out of scope for this repo's core.
//!
//! Runs in-process alongside the orchestrator rather than as a separate
//! binary talking over the bus — the topic surface has no ingress
//! subject, and routing a message requires the live [`Registry`] snapshot
//! and a [`RouteQuerier`] handle that only exist inside the gateway
//! process.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InputFile};
use tracing::{info, warn};

use praktor_core::{route, Orchestrator, OutputListener, Registry, RouteQuerier};

/// Telegram messages are capped at 4096 UTF-16 code units; chunk
/// conservatively on UTF-8 char boundaries to stay under that.
const MAX_MESSAGE_CHARS: usize = 4000;

pub struct TelegramIngressConfig {
    pub token: String,
    /// Empty means "allow everyone" (no allow-list configured).
    pub allow_from: Vec<i64>,
}

/// Long-polls Telegram for updates, routes each message through
/// [`praktor_core::router::route`], and hands it to the orchestrator. Also
/// registered as the orchestrator's [`OutputListener`] so agent replies are
/// delivered back to the chat that originated them.
pub struct TelegramIngress {
    bot: Bot,
    registry: Arc<Registry>,
    orchestrator: Arc<Orchestrator>,
    allow_from: Vec<i64>,
}

impl TelegramIngress {
    pub fn new(config: TelegramIngressConfig, registry: Arc<Registry>, orchestrator: Arc<Orchestrator>) -> Arc<Self> {
        Arc::new(Self {
            bot: Bot::new(config.token),
            registry,
            orchestrator,
            allow_from: config.allow_from,
        })
    }

    fn is_allowed(&self, chat_id: i64) -> bool {
        self.allow_from.is_empty() || self.allow_from.contains(&chat_id)
    }

    /// Starts the long-polling loop. Runs until cancelled; intended to be
    /// spawned as a `tokio::task` by the daemon alongside the orchestrator's
    /// own background loops.
    pub async fn run(self: Arc<Self>) {
        info!("telegram ingress starting long-polling");
        let handler = Update::filter_message().endpoint({
            let this = self.clone();
            move |msg: Message| {
                let this = this.clone();
                async move {
                    this.on_message(msg).await;
                    respond(())
                }
            }
        });
        Dispatcher::builder(self.bot.clone(), handler)
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;
    }

    async fn on_message(&self, msg: Message) {
        let chat_id = msg.chat.id.0;
        if !self.is_allowed(chat_id) {
            warn!(chat_id, "rejected message from chat not in allow_from");
            return;
        }
        let Some(text) = msg.text() else { return };

        let snapshot = self.registry.load();
        let routed = route(
            &snapshot,
            self.orchestrator.as_ref() as &dyn RouteQuerier,
            snapshot.smart_routing,
            text,
        )
        .await;

        let mut meta = HashMap::new();
        meta.insert("sender".to_string(), Value::String("user".to_string()));
        meta.insert("chat_id".to_string(), Value::from(chat_id));

        if !snapshot.contains(&routed.agent_id) {
            // AgentUnknown: reply directly, never enqueue.
            let _ = self
                .bot
                .send_message(ChatId(chat_id), format!("praktor: unknown agent \"{}\"", routed.agent_id))
                .await;
            return;
        }

        if let Err(e) = self
            .orchestrator
            .handle_message(&routed.agent_id, &routed.text, meta)
            .await
        {
            let _ = self
                .bot
                .send_message(ChatId(chat_id), format!("praktor: {e}"))
                .await;
        }
    }

    async fn deliver(&self, chat_id: i64, content: &str) {
        for chunk in chunk_message(content) {
            if let Err(e) = self.bot.send_message(ChatId(chat_id), chunk).await {
                warn!(chat_id, error = %e, "failed to deliver reply to telegram");
            }
        }
    }
}

/// Splits `text` into Telegram-sized chunks on char boundaries. A single
/// message that already fits is returned as one chunk (no trailing split).
fn chunk_message(text: &str) -> Vec<String> {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if current.chars().count() >= MAX_MESSAGE_CHARS {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[async_trait]
impl OutputListener for TelegramIngress {
    async fn on_result(&self, _agent_id: &str, meta: &HashMap<String, Value>, content: &str) {
        let Some(chat_id) = meta.get("chat_id").and_then(|v| v.as_i64()) else {
            return;
        };
        self.deliver(chat_id, content).await;
    }
}

/// `send_file` IPC delivery: the orchestrator's [`praktor_core::FileListener`]
/// hook, wired so agent-initiated file sends reach the originating chat.
#[async_trait]
impl praktor_core::FileListener for TelegramIngress {
    async fn on_file(&self, chat_id: Option<i64>, name: &str, data: &[u8], _mime_type: &str, caption: Option<&str>) {
        let Some(chat_id) = chat_id else { return };
        let file = InputFile::memory(data.to_vec()).file_name(name.to_string());
        let mut req = self.bot.send_document(ChatId(chat_id), file);
        if let Some(caption) = caption {
            req = req.caption(caption.to_string());
        }
        if let Err(e) = req.await {
            warn!(chat_id, error = %e, "failed to deliver file to telegram");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_message_returns_single_chunk_when_short() {
        let chunks = chunk_message("hello world");
        assert_eq!(chunks, vec!["hello world".to_string()]);
    }

    #[test]
    fn chunk_message_splits_long_text_under_limit() {
        let long = "a".repeat(9000);
        let chunks = chunk_message(&long);
        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= MAX_MESSAGE_CHARS);
        }
        assert_eq!(chunks.concat(), long);
    }
}
