//! `host.ipc.<id>` dispatch table. Each arm decodes a typed payload
//! from [`praktor_protocol::ipc`], does the work, and replies with
//! [`IpcResponse::ok`] or [`IpcResponse::error`] — never a bus error, since
//! the container is waiting on a single reply message either way.

use base64::Engine;
use chrono::Local;
use serde_json::json;

use praktor_persistence::StoreError;
use praktor_protocol::envelope::{IpcRequest, IpcResponse, SwarmChatMessage};
use praktor_protocol::ipc::{
    CreateTaskPayload, DeleteTaskPayload, ExtensionStatusPayload, LaunchSwarmPayload, SendFilePayload,
    SwarmMessagePayload, UpdateTaskPayload, UserMdPayload,
};
use praktor_protocol::topics;

use crate::scheduler::{normalize, Schedule};

use super::{Orchestrator, SwarmLaunchEdge, SwarmLaunchNode, SwarmLaunchRequest};

pub(super) async fn dispatch(orch: &Orchestrator, agent_id: &str, payload: &[u8]) -> IpcResponse {
    let request: IpcRequest = match serde_json::from_slice(payload) {
        Ok(r) => r,
        Err(e) => return IpcResponse::error(format!("malformed ipc request: {e}")),
    };

    match request.kind.as_str() {
        "create_task" => create_task(orch, agent_id, request).await,
        "list_tasks" => list_tasks(orch, agent_id).await,
        "update_task" => update_task(orch, request).await,
        "delete_task" => delete_task(orch, request).await,
        "read_user_md" => IpcResponse::ok(json!({"content": orch.read_user_md()})),
        "update_user_md" => update_user_md(orch, request),
        "swarm_message" => swarm_message(orch, agent_id, request).await,
        "launch_swarm" => launch_swarm(orch, agent_id, request).await,
        "extension_status" => extension_status(orch, agent_id, request),
        "send_file" => send_file(orch, agent_id, request).await,
        other => IpcResponse::error(format!("unknown ipc type: {other}")),
    }
}

async fn create_task(orch: &Orchestrator, agent_id: &str, request: IpcRequest) -> IpcResponse {
    let payload: CreateTaskPayload = match serde_json::from_value(request.payload) {
        Ok(p) => p,
        Err(e) => return IpcResponse::error(format!("bad create_task payload: {e}")),
    };
    let schedule = match normalize(&payload.schedule, Local::now()) {
        Ok(s) => s,
        Err(e) => return IpcResponse::error(format!("bad schedule: {e}")),
    };
    let next_run_at = schedule.next_after(Local::now()).map(|dt| dt.timestamp_millis());
    match orch
        .store()
        .create_task(agent_id, &payload.name, &schedule.to_json(), &payload.prompt, next_run_at)
        .await
    {
        Ok(task) => IpcResponse::ok(serde_json::to_value(&task).unwrap_or(json!({}))),
        Err(e) => IpcResponse::error(e.to_string()),
    }
}

async fn list_tasks(orch: &Orchestrator, agent_id: &str) -> IpcResponse {
    match orch.store().list_tasks_for_agent(agent_id).await {
        Ok(tasks) => IpcResponse::ok(json!({"tasks": tasks})),
        Err(e) => IpcResponse::error(e.to_string()),
    }
}

async fn update_task(orch: &Orchestrator, request: IpcRequest) -> IpcResponse {
    let payload: UpdateTaskPayload = match serde_json::from_value(request.payload) {
        Ok(p) => p,
        Err(e) => return IpcResponse::error(format!("bad update_task payload: {e}")),
    };
    let normalized_schedule = match &payload.schedule {
        Some(raw) => match normalize(raw, Local::now()) {
            Ok(s) => Some(s),
            Err(e) => return IpcResponse::error(format!("bad schedule: {e}")),
        },
        None => None,
    };
    let next_run_at = normalized_schedule
        .as_ref()
        .map(|s: &Schedule| s.next_after(Local::now()).map(|dt| dt.timestamp_millis()));
    let schedule_json = normalized_schedule.as_ref().map(Schedule::to_json);
    match orch
        .store()
        .update_task_definition(
            payload.id,
            payload.name.as_deref(),
            schedule_json.as_deref(),
            payload.prompt.as_deref(),
            next_run_at,
        )
        .await
    {
        Ok(()) => IpcResponse::ok(json!({})),
        Err(StoreError::NotFound(_)) => IpcResponse::error(format!("task {} not found", payload.id)),
        Err(e) => IpcResponse::error(e.to_string()),
    }
}

async fn delete_task(orch: &Orchestrator, request: IpcRequest) -> IpcResponse {
    let payload: DeleteTaskPayload = match serde_json::from_value(request.payload) {
        Ok(p) => p,
        Err(e) => return IpcResponse::error(format!("bad delete_task payload: {e}")),
    };
    match orch.store().delete_task(payload.id).await {
        Ok(()) => IpcResponse::ok(json!({})),
        Err(e) => IpcResponse::error(e.to_string()),
    }
}

fn update_user_md(orch: &Orchestrator, request: IpcRequest) -> IpcResponse {
    let payload: UserMdPayload = match serde_json::from_value(request.payload) {
        Ok(p) => p,
        Err(e) => return IpcResponse::error(format!("bad update_user_md payload: {e}")),
    };
    if let Some(content) = payload.content {
        orch.write_user_md(content);
    }
    IpcResponse::ok(json!({"content": orch.read_user_md()}))
}

async fn swarm_message(orch: &Orchestrator, agent_id: &str, request: IpcRequest) -> IpcResponse {
    let payload: SwarmMessagePayload = match serde_json::from_value(request.payload) {
        Ok(p) => p,
        Err(e) => return IpcResponse::error(format!("bad swarm_message payload: {e}")),
    };
    let Some((swarm_id, role)) = orch.swarm_chat_for(agent_id) else {
        return IpcResponse::error(format!("agent {agent_id} is not part of an active swarm run"));
    };
    let message = SwarmChatMessage { from: role, content: payload.content };
    let bytes = serde_json::to_vec(&message).unwrap_or_default();
    match orch.bus.publish(&topics::swarm_chat(&swarm_id), bytes).await {
        Ok(()) => IpcResponse::ok(json!({})),
        Err(e) => IpcResponse::error(e.to_string()),
    }
}

async fn launch_swarm(orch: &Orchestrator, agent_id: &str, request: IpcRequest) -> IpcResponse {
    let payload: LaunchSwarmPayload = match serde_json::from_value(request.payload) {
        Ok(p) => p,
        Err(e) => return IpcResponse::error(format!("bad launch_swarm payload: {e}")),
    };
    let Some(launcher) = orch.swarm_launcher() else {
        return IpcResponse::error("swarm launching is not available".to_string());
    };
    let launch_request = SwarmLaunchRequest {
        name: payload.name,
        task: payload.task,
        lead_agent: payload.lead_agent,
        nodes: payload
            .nodes
            .into_iter()
            .map(|n| SwarmLaunchNode {
                agent_id: n.agent_id,
                role: n.role,
                prompt: n.prompt,
                workspace: n.workspace,
            })
            .collect(),
        edges: payload
            .edges
            .into_iter()
            .map(|e| SwarmLaunchEdge {
                from_role: e.from_role,
                to_role: e.to_role,
                bidirectional: e.bidirectional,
            })
            .collect(),
        chat_id: orch.chat_id_for(agent_id),
    };
    match launcher.launch(launch_request).await {
        Ok(swarm_id) => IpcResponse::ok(json!({"swarm_id": swarm_id})),
        Err(e) => IpcResponse::error(e),
    }
}

fn extension_status(orch: &Orchestrator, agent_id: &str, request: IpcRequest) -> IpcResponse {
    let payload: ExtensionStatusPayload = match serde_json::from_value(request.payload) {
        Ok(p) => p,
        Err(e) => return IpcResponse::error(format!("bad extension_status payload: {e}")),
    };
    orch.record_extension_status(agent_id, payload.state);
    IpcResponse::ok(json!({}))
}

async fn send_file(orch: &Orchestrator, agent_id: &str, request: IpcRequest) -> IpcResponse {
    let payload: SendFilePayload = match serde_json::from_value(request.payload) {
        Ok(p) => p,
        Err(e) => return IpcResponse::error(format!("bad send_file payload: {e}")),
    };
    let data = match base64::engine::general_purpose::STANDARD.decode(&payload.data) {
        Ok(d) => d,
        Err(e) => return IpcResponse::error(format!("bad base64 in send_file payload: {e}")),
    };
    let chat_id = orch.chat_id_for(agent_id);
    let listeners = orch.file_listeners.read().unwrap().clone();
    for listener in listeners {
        listener
            .on_file(chat_id, &payload.name, &data, &payload.mime_type, payload.caption.as_deref())
            .await;
    }
    IpcResponse::ok(json!({}))
}
