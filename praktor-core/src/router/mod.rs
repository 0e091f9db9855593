//! Router: explicit `@name` parsing plus model-driven smart routing
//! with fallback to the default agent.

use async_trait::async_trait;

use crate::registry::RegistrySnapshot;

/// Anything that can answer "which agent should handle this text" via a
/// request/reply round trip to a running container.
/// The orchestrator implements this; the router only depends on the trait,
/// avoiding a dependency cycle between the two modules.
#[async_trait]
pub trait RouteQuerier: Send + Sync {
    async fn route_query(&self, agent_id: &str, text: &str) -> Option<String>;
}

/// Result of routing: the resolved agent id and the text to forward to it.
#[derive(Clone, Debug, PartialEq)]
pub struct Routed {
    pub agent_id: String,
    pub text: String,
}

/// Parses `text` for an explicit `@<id>` prefix; if none (or unknown),
/// falls back to smart routing through `querier` when enabled, and
/// finally to `snapshot.default_agent`.
pub async fn route(
    snapshot: &RegistrySnapshot,
    querier: &dyn RouteQuerier,
    smart_routing_enabled: bool,
    text: &str,
) -> Routed {
    if let Some((candidate, rest)) = parse_explicit_prefix(text) {
        if snapshot.contains(candidate) {
            return Routed {
                agent_id: candidate.to_string(),
                text: rest.to_string(),
            };
        }
    }

    if smart_routing_enabled {
        if let Some(suggested) = querier.route_query(&snapshot.default_agent, text).await {
            if snapshot.contains(&suggested) {
                return Routed {
                    agent_id: suggested,
                    text: text.to_string(),
                };
            }
        }
    }

    Routed {
        agent_id: snapshot.default_agent.clone(),
        text: text.to_string(),
    }
}

/// Splits a leading `@<token>` (and one following space, if present) off
/// `text`. Returns `None` if `text` does not start with `@`.
fn parse_explicit_prefix(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix('@')?;
    let token_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let (token, after_token) = rest.split_at(token_end);
    let after_token = after_token.strip_prefix(' ').unwrap_or(after_token);
    Some((token, after_token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{AgentDefinition, Defaults};
    use std::collections::HashMap;

    fn agent(id: &str) -> AgentDefinition {
        AgentDefinition {
            id: id.to_string(),
            display_name: id.to_string(),
            description: String::new(),
            model: None,
            image: None,
            workspace: format!("{id}-ws"),
            env: HashMap::new(),
            allowed_tools: vec![],
            files: vec![],
            nix_enabled: false,
            extensions: serde_json::Value::Null,
        }
    }

    fn snapshot() -> RegistrySnapshot {
        RegistrySnapshot {
            agents: [agent("general"), agent("coder")]
                .into_iter()
                .map(|a| (a.id.clone(), a))
                .collect(),
            default_agent: "general".to_string(),
            defaults: Defaults::default(),
            main_chat_id: None,
            smart_routing: true,
        }
    }

    struct NoRouting;

    #[async_trait]
    impl RouteQuerier for NoRouting {
        async fn route_query(&self, _agent_id: &str, _text: &str) -> Option<String> {
            None
        }
    }

    struct SuggestsCoder;

    #[async_trait]
    impl RouteQuerier for SuggestsCoder {
        async fn route_query(&self, _agent_id: &str, _text: &str) -> Option<String> {
            Some("coder".to_string())
        }
    }

    #[tokio::test]
    async fn s1_explicit_routing_strips_prefix() {
        let routed = route(&snapshot(), &NoRouting, false, "@coder fix the bug").await;
        assert_eq!(routed.agent_id, "coder");
        assert_eq!(routed.text, "fix the bug");
    }

    #[tokio::test]
    async fn s2_unknown_prefix_falls_back_to_default_with_text_untouched() {
        let routed = route(&snapshot(), &NoRouting, false, "@unknown hello").await;
        assert_eq!(routed.agent_id, "general");
        assert_eq!(routed.text, "@unknown hello");
    }

    #[tokio::test]
    async fn message_with_only_agent_prefix_yields_empty_text() {
        let routed = route(&snapshot(), &NoRouting, false, "@coder").await;
        assert_eq!(routed.agent_id, "coder");
        assert_eq!(routed.text, "");
    }

    #[tokio::test]
    async fn empty_message_falls_back_to_default() {
        let routed = route(&snapshot(), &NoRouting, false, "").await;
        assert_eq!(routed.agent_id, "general");
        assert_eq!(routed.text, "");
    }

    #[tokio::test]
    async fn smart_routing_uses_route_query_when_enabled() {
        let routed = route(&snapshot(), &SuggestsCoder, true, "help me refactor this").await;
        assert_eq!(routed.agent_id, "coder");
        assert_eq!(routed.text, "help me refactor this");
    }

    #[tokio::test]
    async fn smart_routing_disabled_ignores_querier() {
        let routed = route(&snapshot(), &SuggestsCoder, false, "help me refactor this").await;
        assert_eq!(routed.agent_id, "general");
    }

    #[tokio::test]
    async fn smart_routing_falls_back_when_querier_suggests_unknown_agent() {
        struct SuggestsUnknown;
        #[async_trait]
        impl RouteQuerier for SuggestsUnknown {
            async fn route_query(&self, _agent_id: &str, _text: &str) -> Option<String> {
                Some("ghost".to_string())
            }
        }
        let routed = route(&snapshot(), &SuggestsUnknown, true, "hello").await;
        assert_eq!(routed.agent_id, "general");
    }
}
