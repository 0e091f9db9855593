//! Wire shapes exchanged over the subjects in [`crate::topics`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `agent.<id>.input` payload: `{text, agentID, ...meta}` — `meta` is flattened
/// onto the envelope so arbitrary sender-supplied keys (`sender`, `task_id`,
/// `chat_id`, ...) ride alongside the fixed fields without a schema.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentInputEnvelope {
    pub text: String,
    #[serde(rename = "agentID")]
    pub agent_id: String,
    #[serde(flatten)]
    pub meta: Map<String, Value>,
}

impl AgentInputEnvelope {
    pub fn new(agent_id: impl Into<String>, text: impl Into<String>, meta: Map<String, Value>) -> Self {
        Self {
            text: text.into(),
            agent_id: agent_id.into(),
            meta,
        }
    }
}

/// `agent.<id>.output` payload. Only `Result` is surfaced to the user;
/// `Text` fragments are streaming chunks the orchestrator ignores for
/// delivery purposes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentOutputEnvelope {
    Text { content: String },
    Result { content: String },
}

/// `agent.<id>.control` request payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    Shutdown,
    Ping,
    Abort,
    ClearSession,
}

/// `agent.<id>.route` request payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouteRequest {
    pub text: String,
}

/// `agent.<id>.route` reply payload. The container may reply with either
/// `{"agent": "<name>"}` or a bare JSON string — both are accepted.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum RouteResponse {
    Object { agent: String },
    PlainText(String),
}

impl RouteResponse {
    pub fn agent_name(&self) -> &str {
        match self {
            RouteResponse::Object { agent } => agent,
            RouteResponse::PlainText(s) => s.trim(),
        }
    }
}

/// `host.ipc.<id>` request payload: `{type, payload}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IpcRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
}

/// `host.ipc.<id>` reply payload: either `{ok: true, ...}` or `{error: "..."}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IpcResponse {
    Ok(Value),
    Error { error: String },
}

impl IpcResponse {
    pub fn ok(value: Value) -> Self {
        let mut obj = match value {
            Value::Object(m) => m,
            other => {
                let mut m = Map::new();
                m.insert("value".to_string(), other);
                m
            }
        };
        obj.entry("ok").or_insert(Value::Bool(true));
        IpcResponse::Ok(Value::Object(obj))
    }

    pub fn error(msg: impl Into<String>) -> Self {
        IpcResponse::Error { error: msg.into() }
    }
}

/// `swarm.<id>.chat` payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SwarmChatMessage {
    pub from: String,
    pub content: String,
}

/// `events.>` broadcast envelope. `event_type` discriminates the payload for
/// UI consumers that don't want to parse `data` structurally.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_type: String,
    pub data: Value,
}

impl EventEnvelope {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn agent_input_envelope_flattens_meta() {
        let mut meta = Map::new();
        meta.insert("sender".to_string(), json!("user"));
        let env = AgentInputEnvelope::new("coder", "hello", meta);
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["text"], "hello");
        assert_eq!(v["agentID"], "coder");
        assert_eq!(v["sender"], "user");
    }

    #[test]
    fn agent_output_envelope_tags_by_type() {
        let text: AgentOutputEnvelope =
            serde_json::from_value(json!({"type": "text", "content": "partial"})).unwrap();
        assert!(matches!(text, AgentOutputEnvelope::Text { content } if content == "partial"));
        let result: AgentOutputEnvelope =
            serde_json::from_value(json!({"type": "result", "content": "final"})).unwrap();
        assert!(matches!(result, AgentOutputEnvelope::Result { content } if content == "final"));
    }

    #[test]
    fn route_response_accepts_object_or_plain_text() {
        let obj: RouteResponse = serde_json::from_value(json!({"agent": "coder"})).unwrap();
        assert_eq!(obj.agent_name(), "coder");
        let plain: RouteResponse = serde_json::from_value(json!("coder")).unwrap();
        assert_eq!(plain.agent_name(), "coder");
    }

    #[test]
    fn ipc_response_ok_sets_ok_true() {
        let resp = IpcResponse::ok(json!({"tasks": []}));
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["ok"], true);
        assert_eq!(v["tasks"], json!([]));
    }

    #[test]
    fn ipc_response_error_serializes_error_key() {
        let resp = IpcResponse::error("bad payload");
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["error"], "bad payload");
    }
}
