//! Agent orchestrator: per-agent FIFO queue with a `busy` latch,
//! lazy container lifecycle with the NATS-readiness handshake, IPC
//! dispatch from container-local tools, idle reaping, and output
//! redaction/persistence/delivery.
//!
//! The FIFO-plus-latch is the system's primary correctness invariant:
//! regardless of how many producers call [`Orchestrator::handle_message`]
//! concurrently for the same agent, at most one worker task ever drains
//! that agent's queue at a time.

mod error;
mod ipc;

pub use error::OrchestratorError;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use once_cell::sync::OnceCell;
use serde_json::{Map, Value};
use std::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use praktor_bus::{wait_for_subscriber_rise, BusClient};
use praktor_container::{ContainerAdapter, ContainerSpec};
use praktor_persistence::Store;
use praktor_protocol::envelope::{AgentInputEnvelope, AgentOutputEnvelope, ControlCommand, EventEnvelope};
use praktor_protocol::topics;

use crate::registry::Registry;
use crate::router::RouteQuerier;
use crate::scheduler::TaskDispatcher;
use crate::vault::Vault;

/// Fixed non-root uid every sandbox container runs as.
const CONTAINER_UID: u32 = 1000;

/// Shared read-only instructions volume, mounted into every agent's
/// sandbox.
const SHARED_INSTRUCTIONS_VOLUME: &str = "praktor-shared-instructions";

/// Fallback idle timeout when `defaults.idle_timeout` is unset.
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 1800;

const IDLE_REAP_INTERVAL: Duration = Duration::from_secs(60);
const ROUTE_QUERY_TIMEOUT: Duration = Duration::from_secs(30);
const CONTROL_ABORT_TIMEOUT: Duration = Duration::from_secs(5);
const CONTROL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Bus-readiness handshake timing. Configurable so tests don't
/// have to wait out the real 30 s deadline.
#[derive(Clone, Copy, Debug)]
pub struct ReadyConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub grace: Duration,
}

impl Default for ReadyConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
            grace: Duration::from_millis(500),
        }
    }
}

/// Invoked once per surfaced `result` output.
#[async_trait]
pub trait OutputListener: Send + Sync {
    async fn on_result(&self, agent_id: &str, meta: &HashMap<String, Value>, content: &str);
}

/// Invoked for the `send_file` IPC call.
#[async_trait]
pub trait FileListener: Send + Sync {
    async fn on_file(&self, chat_id: Option<i64>, name: &str, data: &[u8], mime_type: &str, caption: Option<&str>);
}

/// Resolves a container-local agent id to its active collaborative swarm
/// chat topic, if any. Implemented by the swarm
/// coordinator; kept as a trait here (mirroring [`RouteQuerier`] and
/// [`TaskDispatcher`]) to avoid a dependency cycle between `orchestrator`
/// and `swarm`.
pub trait SwarmChatLookup: Send + Sync {
    fn lookup(&self, agent_id: &str) -> Option<(String, String)>;
}

/// One node of a swarm launch request's agent graph, decoupled from the
/// `launch_swarm` wire payload and from the swarm coordinator's own
/// [`praktor_persistence::SwarmNode`](praktor_persistence) row type.
#[derive(Clone, Debug)]
pub struct SwarmLaunchNode {
    pub agent_id: String,
    pub role: String,
    pub prompt: String,
    pub workspace: Option<String>,
}

/// One edge of a swarm launch request's agent graph.
#[derive(Clone, Debug)]
pub struct SwarmLaunchEdge {
    pub from_role: String,
    pub to_role: String,
    pub bidirectional: bool,
}

/// A request to start a swarm run, as seen from the orchestrator's side of
/// the `launch_swarm` IPC boundary.
#[derive(Clone, Debug)]
pub struct SwarmLaunchRequest {
    pub name: String,
    pub task: String,
    pub lead_agent: String,
    pub nodes: Vec<SwarmLaunchNode>,
    pub edges: Vec<SwarmLaunchEdge>,
    pub chat_id: Option<i64>,
}

/// Starts a swarm run from a `launch_swarm` IPC call. Implemented by the
/// swarm coordinator; kept as a trait here (mirroring [`RouteQuerier`],
/// [`TaskDispatcher`] and [`SwarmChatLookup`]) to avoid a dependency cycle
/// between `orchestrator` and `swarm`.
#[async_trait]
pub trait SwarmLauncher: Send + Sync {
    async fn launch(&self, request: SwarmLaunchRequest) -> Result<String, String>;
}

#[derive(Clone, Debug)]
struct Session {
    container_id: String,
    started_at: i64,
    last_active: i64,
}

#[derive(Clone, Debug)]
struct QueuedMessage {
    text: String,
    meta: HashMap<String, Value>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedMessage>,
    busy: bool,
}

pub struct Orchestrator {
    registry: Arc<Registry>,
    store: Store,
    bus: Arc<dyn BusClient>,
    container: Arc<dyn ContainerAdapter>,
    vault: Arc<Vault>,
    bus_url: String,
    ready: ReadyConfig,

    queues: Mutex<HashMap<String, QueueState>>,
    last_meta: Mutex<HashMap<String, HashMap<String, Value>>>,
    sessions: RwLock<HashMap<String, Session>>,
    output_listeners: RwLock<Vec<Arc<dyn OutputListener>>>,
    file_listeners: RwLock<Vec<Arc<dyn FileListener>>>,
    swarm_chat: RwLock<Option<Arc<dyn SwarmChatLookup>>>,
    swarm_launcher: RwLock<Option<Arc<dyn SwarmLauncher>>>,
    /// In-process mirror of the latest `extension_status` IPC report per
    /// agent, for UI display — the Web UI's own surface is out of
    /// scope), so this is as far as persistence goes.
    extension_status: Mutex<HashMap<String, Value>>,
    user_md: Mutex<String>,

    self_weak: OnceCell<Weak<Orchestrator>>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<Registry>,
        store: Store,
        bus: Arc<dyn BusClient>,
        container: Arc<dyn ContainerAdapter>,
        vault: Arc<Vault>,
        bus_url: impl Into<String>,
        ready: ReadyConfig,
    ) -> Arc<Self> {
        let orch = Arc::new(Self {
            registry,
            store,
            bus,
            container,
            vault,
            bus_url: bus_url.into(),
            ready,
            queues: Mutex::new(HashMap::new()),
            last_meta: Mutex::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            output_listeners: RwLock::new(Vec::new()),
            file_listeners: RwLock::new(Vec::new()),
            swarm_chat: RwLock::new(None),
            swarm_launcher: RwLock::new(None),
            extension_status: Mutex::new(HashMap::new()),
            user_md: Mutex::new(String::new()),
            self_weak: OnceCell::new(),
        });
        let _ = orch.self_weak.set(Arc::downgrade(&orch));
        orch
    }

    fn arc_self(&self) -> Arc<Self> {
        self.self_weak
            .get()
            .and_then(Weak::upgrade)
            .expect("orchestrator dropped while still handling a message")
    }

    pub fn register_output_listener(&self, listener: Arc<dyn OutputListener>) {
        self.output_listeners.write().unwrap().push(listener);
    }

    pub fn register_file_listener(&self, listener: Arc<dyn FileListener>) {
        self.file_listeners.write().unwrap().push(listener);
    }

    pub fn set_swarm_chat_lookup(&self, lookup: Arc<dyn SwarmChatLookup>) {
        *self.swarm_chat.write().unwrap() = Some(lookup);
    }

    pub fn set_swarm_launcher(&self, launcher: Arc<dyn SwarmLauncher>) {
        *self.swarm_launcher.write().unwrap() = Some(launcher);
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Agent ids with a live session, for tests and introspection.
    pub fn running_agents(&self) -> Vec<String> {
        self.sessions.read().unwrap().keys().cloned().collect()
    }

    // ---- message intake ----------------

    /// Persists and enqueues an inbound message, starting a worker if none
    /// is currently draining this agent's queue. `meta.sender` (default
    /// `"user"`) records who originated the message.
    pub async fn handle_message(
        &self,
        agent_id: &str,
        text: &str,
        meta: HashMap<String, Value>,
    ) -> Result<(), OrchestratorError> {
        if !self.registry.load().contains(agent_id) {
            return Err(OrchestratorError::AgentUnknown(agent_id.to_string()));
        }

        let sender = meta
            .get("sender")
            .and_then(|v| v.as_str())
            .unwrap_or("user")
            .to_string();
        self.store.insert_message(agent_id, &sender, text).await?;

        let event = EventEnvelope::new(
            "message",
            serde_json::json!({"agent_id": agent_id, "sender": sender, "text": text}),
        );
        let _ = self
            .bus
            .publish(&topics::events_agent(agent_id), serde_json::to_vec(&event).unwrap_or_default())
            .await;

        self.enqueue(agent_id, text, meta);
        if self.try_acquire_busy(agent_id) {
            let this = self.arc_self();
            let agent_id = agent_id.to_string();
            tokio::spawn(async move { this.run_worker(agent_id).await });
        }
        Ok(())
    }

    fn enqueue(&self, agent_id: &str, text: &str, meta: HashMap<String, Value>) {
        let mut queues = self.queues.lock().unwrap();
        queues
            .entry(agent_id.to_string())
            .or_default()
            .pending
            .push_back(QueuedMessage {
                text: text.to_string(),
                meta,
            });
    }

    fn try_acquire_busy(&self, agent_id: &str) -> bool {
        let mut queues = self.queues.lock().unwrap();
        let state = queues.entry(agent_id.to_string()).or_default();
        if state.busy {
            false
        } else {
            state.busy = true;
            true
        }
    }

    /// Drains `agent_id`'s queue one message at a time. Dequeue and the
    /// `busy -> false` transition happen under the same lock acquisition
    /// as every enqueue, so no message can arrive between "queue looks
    /// empty" and "latch released" without being picked up by a freshly
    /// spawned worker.
    async fn run_worker(self: Arc<Self>, agent_id: String) {
        loop {
            let msg = {
                let mut queues = self.queues.lock().unwrap();
                let state = queues.entry(agent_id.clone()).or_default();
                match state.pending.pop_front() {
                    Some(msg) => msg,
                    None => {
                        state.busy = false;
                        break;
                    }
                }
            };
            if let Err(e) = self.execute(&agent_id, &msg).await {
                warn!(agent_id = %agent_id, error = %e, "message execution failed");
            }
        }
    }

    async fn execute(&self, agent_id: &str, msg: &QueuedMessage) -> Result<(), OrchestratorError> {
        self.ensure_container(agent_id).await?;

        let meta: Map<String, Value> = msg.meta.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let envelope = AgentInputEnvelope::new(agent_id, msg.text.clone(), meta);
        let payload = serde_json::to_vec(&envelope).unwrap_or_default();
        self.bus.publish(&topics::agent_input(agent_id), payload).await?;

        self.last_meta.lock().unwrap().insert(agent_id.to_string(), msg.meta.clone());
        let _ = self.store.touch_session(agent_id).await;
        if let Some(session) = self.sessions.write().unwrap().get_mut(agent_id) {
            session.last_active = now_ms();
        }
        Ok(())
    }

    // ---- container lifecycle -------------------

    async fn ensure_container(&self, agent_id: &str) -> Result<(), OrchestratorError> {
        if self.sessions.read().unwrap().contains_key(agent_id) {
            return Ok(());
        }

        let snapshot = self.registry.load();
        let agent = snapshot
            .agent(agent_id)
            .ok_or_else(|| OrchestratorError::AgentUnknown(agent_id.to_string()))?
            .clone();

        let input_subject = topics::agent_input(agent_id);
        let baseline = self.bus.subscriber_count(&input_subject).await.unwrap_or(0);

        let env = self.vault.resolve_env(&agent.env).await;
        let mut extensions_value = agent.extensions.clone();
        self.vault.resolve_json_refs(&mut extensions_value).await;
        let extensions_json = if extensions_value.is_null() {
            None
        } else {
            Some(serde_json::to_string(&extensions_value).unwrap_or_default())
        };

        let spec = ContainerSpec {
            agent_id: agent_id.to_string(),
            image: snapshot.resolved_image(agent_id).unwrap_or_else(|| "praktor/agent:latest".to_string()),
            bus_url: self.bus_url.clone(),
            model: snapshot.resolved_model(agent_id).unwrap_or_default(),
            workspace_volume: format!("{}-workspace", agent.workspace),
            shared_instructions_volume: SHARED_INSTRUCTIONS_VOLUME.to_string(),
            home_volume: format!("{}-home", agent.workspace),
            allowed_tools: agent.allowed_tools.clone(),
            extensions_json,
            env,
            uid: CONTAINER_UID,
            nix_enabled: agent.nix_enabled,
        };

        let handle = self
            .container
            .start(&spec)
            .await
            .map_err(|e| OrchestratorError::ContainerStartFailed {
                agent_id: agent_id.to_string(),
                source: e,
            })?;

        for file in &agent.files {
            let reference = format!("secret:{}", file.secret_name);
            match self.vault.resolve_reference(&reference).await {
                Some(plaintext) => {
                    if let Err(e) = self
                        .container
                        .write_file(&handle.container_id, &file.target_path, &plaintext, file.mode)
                        .await
                    {
                        warn!(agent_id, target = %file.target_path, error = %e, "secret file mount failed after resolution");
                    }
                }
                None => {
                    warn!(agent_id, secret = %file.secret_name, "secret file mount skipped: resolution failed");
                }
            }
        }

        let rose = wait_for_subscriber_rise(
            self.bus.as_ref(),
            &input_subject,
            baseline,
            self.ready.timeout,
            self.ready.poll_interval,
        )
        .await;
        if rose {
            tokio::time::sleep(self.ready.grace).await;
        } else {
            warn!(agent_id, timeout_secs = self.ready.timeout.as_secs(), "bus-ready timeout; publishing anyway");
        }

        let _ = self.store.upsert_session(agent_id, &handle.container_id).await;
        self.sessions.write().unwrap().insert(
            agent_id.to_string(),
            Session {
                container_id: handle.container_id,
                started_at: now_ms(),
                last_active: now_ms(),
            },
        );
        Ok(())
    }

    async fn stop_session(&self, agent_id: &str, reason: &str) {
        let container_id = self.sessions.write().unwrap().remove(agent_id).map(|s| s.container_id);
        if let Some(container_id) = container_id {
            if let Err(e) = self.container.stop(&container_id).await {
                warn!(agent_id, error = %e, "container stop failed");
            }
        }
        let _ = self.store.delete_session(agent_id).await;
        let event = EventEnvelope::new("agent_stopped", serde_json::json!({"agent_id": agent_id, "reason": reason}));
        let _ = self
            .bus
            .publish(&topics::events_agent(agent_id), serde_json::to_vec(&event).unwrap_or_default())
            .await;
    }

    /// Stops `agent_id`'s running container, if any, so the next message
    /// lazily starts a fresh one. Used by the config reloader for mutated
    /// or removed agents.
    pub async fn stop_if_running(&self, agent_id: &str) {
        if self.sessions.read().unwrap().contains_key(agent_id) {
            self.stop_session(agent_id, "config_reload").await;
        }
    }

    /// Clears the queue and requests an in-container abort. Does
    /// not stop the container.
    pub async fn abort_session(&self, agent_id: &str) {
        if let Some(state) = self.queues.lock().unwrap().get_mut(agent_id) {
            state.pending.clear();
        }
        let payload = serde_json::to_vec(&ControlCommand::Abort).unwrap_or_default();
        let _ = self
            .bus
            .request(&topics::agent_control(agent_id), payload, CONTROL_ABORT_TIMEOUT)
            .await;
    }

    /// Requests the in-container session be cleared. Does not stop
    /// the container or touch the queue.
    pub async fn clear_session(&self, agent_id: &str) {
        let payload = serde_json::to_vec(&ControlCommand::ClearSession).unwrap_or_default();
        let _ = self
            .bus
            .request(&topics::agent_control(agent_id), payload, CONTROL_ABORT_TIMEOUT)
            .await;
    }

    /// Sends `shutdown` to every running container and stops it. The FIFO/busy latch is left to
    /// drain naturally — in-flight workers finish their current message.
    pub async fn shutdown(&self) {
        let agent_ids: Vec<String> = self.sessions.read().unwrap().keys().cloned().collect();
        for agent_id in agent_ids {
            let payload = serde_json::to_vec(&ControlCommand::Shutdown).unwrap_or_default();
            let _ = self
                .bus
                .request(&topics::agent_control(&agent_id), payload, CONTROL_SHUTDOWN_TIMEOUT)
                .await;
            self.stop_session(&agent_id, "shutdown").await;
        }
    }

    // ---- background loops ---------------------------------------------

    /// Subscribes to `agent.*.output` and surfaces `result` messages:
    /// redaction, persistence, event emission, and [`OutputListener`]
    /// dispatch. `text` fragments are ignored.
    pub fn spawn_output_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.output_loop().await })
    }

    async fn output_loop(&self) {
        let mut stream = match self.bus.subscribe(topics::agent_output_wildcard()).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to subscribe to agent output");
                return;
            }
        };
        while let Some(msg) = stream.next().await {
            let Some(agent_id) = topics::agent_id_from_subject(&msg.subject, "agent", Some("output")) else {
                continue;
            };
            let envelope: AgentOutputEnvelope = match serde_json::from_slice(&msg.payload) {
                Ok(v) => v,
                Err(_) => continue,
            };
            let AgentOutputEnvelope::Result { content } = envelope else {
                continue;
            };

            let redacted = self.vault.redact(&agent_id, &content).await.unwrap_or(content);
            let _ = self.store.insert_message(&agent_id, "agent", &redacted).await;

            let event = EventEnvelope::new("reply", serde_json::json!({"agent_id": agent_id, "content": redacted}));
            let _ = self
                .bus
                .publish(&topics::events_agent(&agent_id), serde_json::to_vec(&event).unwrap_or_default())
                .await;

            let meta = self.last_meta.lock().unwrap().get(&agent_id).cloned().unwrap_or_default();
            let listeners: Vec<Arc<dyn OutputListener>> = self.output_listeners.read().unwrap().clone();
            for listener in listeners {
                listener.on_result(&agent_id, &meta, &redacted).await;
            }
        }
    }

    /// Subscribes to `host.ipc.*` and dispatches container-tool requests.
    /// See [`ipc`] for the per-`type` handlers.
    pub fn spawn_ipc_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.ipc_loop().await })
    }

    async fn ipc_loop(&self) {
        let mut stream = match self.bus.subscribe(topics::host_ipc_wildcard()).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to subscribe to host ipc");
                return;
            }
        };
        while let Some(msg) = stream.next().await {
            let Some(agent_id) = topics::agent_id_from_subject(&msg.subject, "host.ipc", None) else {
                continue;
            };
            let Some(reply_to) = msg.reply_to.clone() else {
                continue;
            };
            let response = ipc::dispatch(self, &agent_id, &msg.payload).await;
            let payload = serde_json::to_vec(&response).unwrap_or_default();
            let _ = self.bus.reply(&reply_to, payload).await;
        }
    }

    /// Polls every minute for sessions idle past `defaults.idle_timeout`
    /// (re-read from the live registry snapshot on every tick, so a config
    /// reload takes effect without restarting this task) and stops them.
    pub fn spawn_idle_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(IDLE_REAP_INTERVAL);
            loop {
                ticker.tick().await;
                this.reap_idle().await;
            }
        })
    }

    async fn reap_idle(&self) {
        let snapshot = self.registry.load();
        let idle_secs = snapshot.defaults.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS);
        let idle_ms = (idle_secs as i64) * 1000;
        let now = now_ms();
        let to_stop: Vec<String> = self
            .sessions
            .read()
            .unwrap()
            .iter()
            .filter(|(_, s)| now - s.last_active > idle_ms)
            .map(|(id, _)| id.clone())
            .collect();
        for agent_id in to_stop {
            info!(agent_id, "reaping idle session");
            self.stop_session(&agent_id, "idle_timeout").await;
        }
    }

    // ---- helpers used by the IPC dispatcher ---------------------------

    fn swarm_chat_for(&self, agent_id: &str) -> Option<(String, String)> {
        self.swarm_chat.read().unwrap().as_ref().and_then(|l| l.lookup(agent_id))
    }

    fn swarm_launcher(&self) -> Option<Arc<dyn SwarmLauncher>> {
        self.swarm_launcher.read().unwrap().clone()
    }

    fn record_extension_status(&self, agent_id: &str, status: Value) {
        self.extension_status.lock().unwrap().insert(agent_id.to_string(), status);
    }

    pub fn extension_status_for(&self, agent_id: &str) -> Option<Value> {
        self.extension_status.lock().unwrap().get(agent_id).cloned()
    }

    fn read_user_md(&self) -> String {
        self.user_md.lock().unwrap().clone()
    }

    fn write_user_md(&self, content: String) {
        *self.user_md.lock().unwrap() = content;
    }

    fn chat_id_for(&self, agent_id: &str) -> Option<i64> {
        self.last_meta
            .lock()
            .unwrap()
            .get(agent_id)
            .and_then(|m| m.get("chat_id"))
            .and_then(|v| v.as_i64())
    }
}

fn now_ms() -> i64 {
    use std::time::SystemTime;
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl RouteQuerier for Orchestrator {
    /// Ensures the container, then a
    /// request/reply round trip on `agent.<id>.route`.
    async fn route_query(&self, agent_id: &str, text: &str) -> Option<String> {
        self.ensure_container(agent_id).await.ok()?;
        let payload = serde_json::to_vec(&praktor_protocol::envelope::RouteRequest { text: text.to_string() }).ok()?;
        let raw = self
            .bus
            .request(&topics::agent_route(agent_id), payload, ROUTE_QUERY_TIMEOUT)
            .await
            .ok()?;
        let response: praktor_protocol::envelope::RouteResponse = serde_json::from_slice(&raw).ok()?;
        Some(response.agent_name().to_string())
    }
}

#[async_trait]
impl TaskDispatcher for Orchestrator {
    async fn handle_message(
        &self,
        agent_id: &str,
        text: &str,
        meta: HashMap<String, Value>,
    ) -> Result<(), String> {
        Orchestrator::handle_message(self, agent_id, text, meta)
            .await
            .map_err(|e| e.to_string())
    }
}
