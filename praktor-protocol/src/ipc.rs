//! Typed payloads for the `host.ipc.<id>` dispatch table.
//!
//! [`IpcRequest::payload`](crate::envelope::IpcRequest) is untyped JSON on the
//! wire; these types are what the orchestrator's IPC dispatcher decodes it
//! into per `type`, and what handlers build before re-encoding into
//! [`crate::envelope::IpcResponse::ok`].

use serde::{Deserialize, Serialize};

/// `create_task` payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateTaskPayload {
    pub name: String,
    pub schedule: String,
    pub prompt: String,
}

/// `update_task` payload — every field but `id` is optional (partial update).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateTaskPayload {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
}

/// `delete_task` payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeleteTaskPayload {
    pub id: i64,
}

/// `swarm_message` payload — content to publish on the caller's swarm chat topic.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SwarmMessagePayload {
    pub content: String,
}

/// `extension_status` payload — reported installed state, persisted verbatim
/// for UI display (schema owned by the in-container extension runtime, not
/// this gateway).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtensionStatusPayload {
    #[serde(flatten)]
    pub state: serde_json::Value,
}

/// `send_file` payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SendFilePayload {
    pub name: String,
    pub data: String,
    pub mime_type: String,
    #[serde(default)]
    pub caption: Option<String>,
}

/// `read_user_md` / `update_user_md` payload — plain text body, when present.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct UserMdPayload {
    #[serde(default)]
    pub content: Option<String>,
}

/// One node in a `launch_swarm` payload's agent graph.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LaunchSwarmNodePayload {
    pub agent_id: String,
    pub role: String,
    pub prompt: String,
    #[serde(default)]
    pub workspace: Option<String>,
}

/// One directed (or bidirectional) edge between two roles in a `launch_swarm` payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LaunchSwarmEdgePayload {
    pub from_role: String,
    pub to_role: String,
    #[serde(default)]
    pub bidirectional: bool,
}

/// `launch_swarm` payload — an in-container agent asking the gateway to start
/// a swarm run rooted at its own chat.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LaunchSwarmPayload {
    pub name: String,
    pub task: String,
    pub lead_agent: String,
    pub nodes: Vec<LaunchSwarmNodePayload>,
    #[serde(default)]
    pub edges: Vec<LaunchSwarmEdgePayload>,
}
