//! Swarm coordinator: builds an execution plan from a swarm request
//! and runs it wave by wave against the orchestrator, collecting each
//! node's final output as context for its dependents and running the lead
//! last with every other node's output appended.

mod error;
mod plan;

pub use error::SwarmError;
pub use plan::{build_plan, Cluster, Plan};
pub use praktor_persistence::{SwarmEdge, SwarmNode, SwarmResult};

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde_json::{json, Value};
use std::sync::Mutex;
use tokio::sync::oneshot;
use tracing::{info, warn};

use praktor_bus::BusClient;
use praktor_persistence::{Store, SwarmStatus};
use praktor_protocol::envelope::EventEnvelope;
use praktor_protocol::topics;

use crate::orchestrator::{
    Orchestrator, OutputListener, SwarmChatLookup, SwarmLaunchRequest, SwarmLauncher,
};
use crate::registry::Registry;

/// A swarm launch request.
#[derive(Clone, Debug)]
pub struct SwarmRequest {
    pub name: String,
    pub task: String,
    pub lead_agent: String,
    pub nodes: Vec<SwarmNode>,
    pub edges: Vec<SwarmEdge>,
    /// Chat the run's final results should be delivered to. Falls back to
    /// `main_chat_id` when unset.
    pub chat_id: Option<i64>,
}

pub struct SwarmCoordinator {
    store: Store,
    bus: Arc<dyn BusClient>,
    orchestrator: Arc<Orchestrator>,
    registry: Arc<Registry>,
    /// Keyed by the agent_id a node is currently running on; resolved by
    /// [`OutputListener::on_result`] to complete that node's future.
    pending: Mutex<HashMap<String, oneshot::Sender<String>>>,
    /// Keyed by container-local agent_id; consulted by the orchestrator's
    /// `swarm_message` IPC handler while a collaborative-cluster member is
    /// in flight.
    chat_members: RwLock<HashMap<String, (String, String)>>,
    self_weak: OnceCell<Weak<SwarmCoordinator>>,
}

impl SwarmCoordinator {
    pub fn new(
        store: Store,
        bus: Arc<dyn BusClient>,
        orchestrator: Arc<Orchestrator>,
        registry: Arc<Registry>,
    ) -> Arc<Self> {
        let coord = Arc::new(Self {
            store,
            bus,
            orchestrator: orchestrator.clone(),
            registry,
            pending: Mutex::new(HashMap::new()),
            chat_members: RwLock::new(HashMap::new()),
            self_weak: OnceCell::new(),
        });
        let _ = coord.self_weak.set(Arc::downgrade(&coord));
        orchestrator.register_output_listener(coord.clone() as Arc<dyn OutputListener>);
        orchestrator.set_swarm_chat_lookup(coord.clone() as Arc<dyn SwarmChatLookup>);
        orchestrator.set_swarm_launcher(coord.clone() as Arc<dyn SwarmLauncher>);
        coord
    }

    fn arc_self(&self) -> Arc<Self> {
        self.self_weak
            .get()
            .and_then(Weak::upgrade)
            .expect("swarm coordinator dropped while a run is still in flight")
    }

    /// Validates and persists a swarm request, then runs it to completion
    /// in the background. Returns the new run's id immediately so callers
    /// don't block on the whole swarm.
    pub async fn launch(&self, request: SwarmRequest) -> Result<String, SwarmError> {
        let plan = build_plan(&request.nodes, &request.edges, &request.lead_agent)?;
        let swarm_id = new_swarm_id();
        self.store
            .create_swarm_run(&swarm_id, &request.name, &request.task, &request.lead_agent, &request.nodes, &request.edges)
            .await?;
        self.emit_event(&swarm_id, "swarm_started", json!({"name": request.name})).await;

        let chat_id = request.chat_id.or_else(|| self.registry.load().main_chat_id);
        let this = self.arc_self();
        let nodes_by_role: HashMap<String, SwarmNode> =
            request.nodes.into_iter().map(|n| (n.role.clone(), n)).collect();
        let swarm_id_for_task = swarm_id.clone();
        tokio::spawn(async move {
            this.run(swarm_id_for_task, request.task, plan, nodes_by_role, chat_id).await;
        });
        Ok(swarm_id)
    }

    async fn run(
        &self,
        swarm_id: String,
        task: String,
        plan: Plan,
        nodes_by_role: HashMap<String, SwarmNode>,
        chat_id: Option<i64>,
    ) {
        let cluster_roles: std::collections::HashSet<&str> =
            plan.clusters.iter().flatten().map(String::as_str).collect();
        let mut outputs: HashMap<String, String> = HashMap::new();
        let mut results = Vec::new();

        for wave in &plan.waves {
            let is_lead_wave = wave.len() == 1 && wave[0] == plan.lead;
            let wave_results = futures::future::join_all(wave.iter().map(|role| {
                let node = nodes_by_role.get(role).cloned();
                let prompt = if is_lead_wave {
                    augment_prompt(&task, role, &plan, &outputs)
                } else {
                    let base = node.as_ref().map(|n| n.prompt.clone()).unwrap_or_default();
                    augment_prompt(&base, role, &plan, &outputs)
                };
                let is_cluster = cluster_roles.contains(role.as_str());
                async move {
                    match node {
                        Some(node) => {
                            let result = self.run_node(&swarm_id, &node, prompt, is_cluster, chat_id).await;
                            (node.role.clone(), result)
                        }
                        None => (role.clone(), Err(SwarmError::UnknownRole(role.clone()))),
                    }
                }
            }))
            .await;

            for (role, outcome) in wave_results {
                match outcome {
                    Ok(output) => {
                        self.emit_event(&swarm_id, "node_completed", json!({"role": role})).await;
                        results.push(SwarmResult { role: role.clone(), output: output.clone() });
                        outputs.insert(role, output);
                    }
                    Err(e) => {
                        warn!(swarm_id = %swarm_id, role = %role, error = %e, "swarm node failed");
                        let _ = self
                            .store
                            .update_swarm_run(&swarm_id, SwarmStatus::Failed, &results, true)
                            .await;
                        self.emit_event(&swarm_id, "swarm_failed", json!({"role": role, "error": e.to_string()}))
                            .await;
                        return;
                    }
                }
            }
        }

        let _ = self
            .store
            .update_swarm_run(&swarm_id, SwarmStatus::Completed, &results, true)
            .await;
        info!(swarm_id = %swarm_id, "swarm run completed");
        self.emit_event(&swarm_id, "swarm_completed", json!({"results": results})).await;
    }

    async fn run_node(
        &self,
        swarm_id: &str,
        node: &SwarmNode,
        prompt: String,
        is_cluster: bool,
        chat_id: Option<i64>,
    ) -> Result<String, SwarmError> {
        if is_cluster {
            self.chat_members
                .write()
                .unwrap()
                .insert(node.agent_id.clone(), (swarm_id.to_string(), node.role.clone()));
        }
        self.emit_event(swarm_id, "node_started", json!({"role": node.role})).await;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(node.agent_id.clone(), tx);

        let mut meta = HashMap::new();
        meta.insert("sender".to_string(), Value::String("swarm".to_string()));
        meta.insert("swarm_id".to_string(), Value::String(swarm_id.to_string()));
        meta.insert("role".to_string(), Value::String(node.role.clone()));
        if let Some(chat_id) = chat_id {
            meta.insert("chat_id".to_string(), Value::from(chat_id));
        }

        let dispatch = self.orchestrator.handle_message(&node.agent_id, &prompt, meta).await;
        let outcome = match dispatch {
            Ok(()) => rx
                .await
                .map_err(|_| SwarmError::NodeFailed { role: node.role.clone(), source: "no result received".to_string() }),
            Err(e) => {
                self.pending.lock().unwrap().remove(&node.agent_id);
                Err(SwarmError::NodeFailed { role: node.role.clone(), source: e.to_string() })
            }
        };

        if is_cluster {
            self.chat_members.write().unwrap().remove(&node.agent_id);
        }
        outcome
    }

    async fn emit_event(&self, swarm_id: &str, event_type: &str, data: Value) {
        let event = EventEnvelope::new(event_type, data);
        let _ = self
            .bus
            .publish(&topics::events_swarm(swarm_id), serde_json::to_vec(&event).unwrap_or_default())
            .await;
    }

    pub async fn get_run(&self, swarm_id: &str) -> Result<Option<praktor_persistence::SwarmRunRow>, SwarmError> {
        Ok(self.store.get_swarm_run(swarm_id).await?)
    }
}

fn augment_prompt(base: &str, role: &str, plan: &Plan, outputs: &HashMap<String, String>) -> String {
    let Some(deps) = plan.depends_on.get(role) else {
        return base.to_string();
    };
    if deps.is_empty() {
        return base.to_string();
    }
    let mut out = base.to_string();
    for dep in deps {
        if let Some(output) = outputs.get(dep) {
            out.push_str(&format!("\n\n---\n[{dep}]\n{output}"));
        }
    }
    out
}

fn new_swarm_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[async_trait]
impl OutputListener for SwarmCoordinator {
    async fn on_result(&self, agent_id: &str, _meta: &HashMap<String, Value>, content: &str) {
        if let Some(tx) = self.pending.lock().unwrap().remove(agent_id) {
            let _ = tx.send(content.to_string());
        }
    }
}

impl SwarmChatLookup for SwarmCoordinator {
    fn lookup(&self, agent_id: &str) -> Option<(String, String)> {
        self.chat_members.read().unwrap().get(agent_id).cloned()
    }
}

#[async_trait]
impl SwarmLauncher for SwarmCoordinator {
    async fn launch(&self, request: SwarmLaunchRequest) -> Result<String, String> {
        let nodes = request
            .nodes
            .into_iter()
            .map(|n| SwarmNode { agent_id: n.agent_id, role: n.role, prompt: n.prompt, workspace: n.workspace })
            .collect();
        let edges = request
            .edges
            .into_iter()
            .map(|e| SwarmEdge { from_role: e.from_role, to_role: e.to_role, bidirectional: e.bidirectional })
            .collect();
        let swarm_request = SwarmRequest {
            name: request.name,
            task: request.task,
            lead_agent: request.lead_agent,
            nodes,
            edges,
            chat_id: request.chat_id,
        };
        SwarmCoordinator::launch(self, swarm_request).await.map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::ReadyConfig;
    use crate::registry::{AgentDefinition, Defaults, Registry, RegistrySnapshot};
    use crate::vault::Vault;
    use praktor_bus::InMemoryBus;
    use praktor_container::InMemoryContainerAdapter;
    use praktor_protocol::envelope::AgentOutputEnvelope;
    use std::time::Duration;

    fn agent(id: &str) -> AgentDefinition {
        AgentDefinition {
            id: id.to_string(),
            display_name: id.to_string(),
            description: String::new(),
            model: Some("claude-sonnet".to_string()),
            image: Some("praktor/agent:latest".to_string()),
            workspace: format!("{id}-ws"),
            env: HashMap::new(),
            allowed_tools: vec![],
            files: vec![],
            nix_enabled: false,
            extensions: Value::Null,
        }
    }

    async fn harness() -> (Arc<SwarmCoordinator>, Arc<InMemoryBus>) {
        let store = Store::open_in_memory().unwrap();
        let snapshot = RegistrySnapshot {
            agents: [agent("researcher"), agent("writer")].into_iter().map(|a| (a.id.clone(), a)).collect(),
            default_agent: "writer".to_string(),
            defaults: Defaults::default(),
            main_chat_id: None,
            smart_routing: true,
        };
        let registry = Arc::new(Registry::new(snapshot));
        let bus = Arc::new(InMemoryBus::new());
        let container = Arc::new(InMemoryContainerAdapter::new());
        let vault = Arc::new(Vault::new(store.clone(), Some("passphrase")).unwrap());
        let ready = ReadyConfig {
            timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
            grace: Duration::from_millis(1),
        };
        let orchestrator = Orchestrator::new(
            registry.clone(),
            store.clone(),
            bus.clone() as Arc<dyn BusClient>,
            container as Arc<dyn praktor_container::ContainerAdapter>,
            vault,
            "nats://localhost:4222",
            ready,
        );
        let coordinator = SwarmCoordinator::new(store, bus.clone() as Arc<dyn BusClient>, orchestrator, registry);
        (coordinator, bus)
    }

    /// Simulates the two agent containers replying to their input with a
    /// `result` output.
    fn spawn_responders(bus: Arc<InMemoryBus>) {
        for agent_id in ["researcher", "writer"] {
            let bus = bus.clone();
            let subject = format!("agent.{agent_id}.input");
            let output_subject = format!("agent.{agent_id}.output");
            tokio::spawn(async move {
                let mut stream = bus.subscribe(&subject).await.unwrap();
                use futures::StreamExt;
                while let Some(_msg) = stream.next().await {
                    let payload = serde_json::to_vec(&AgentOutputEnvelope::Result {
                        content: format!("{agent_id} done"),
                    })
                    .unwrap();
                    bus.publish(&output_subject, payload).await.unwrap();
                }
            });
        }
    }

    #[tokio::test]
    async fn s6_pipeline_runs_lead_last_with_dependency_context() {
        let (coordinator, bus) = harness().await;
        coordinator.orchestrator.spawn_output_listener();
        spawn_responders(bus);

        let request = SwarmRequest {
            name: "blog".to_string(),
            task: "write a blog post".to_string(),
            lead_agent: "writer".to_string(),
            nodes: vec![
                SwarmNode { agent_id: "researcher".into(), role: "researcher".into(), prompt: "find facts".into(), workspace: None },
                SwarmNode { agent_id: "writer".into(), role: "writer".into(), prompt: "draft the post".into(), workspace: None },
            ],
            edges: vec![SwarmEdge { from_role: "researcher".into(), to_role: "writer".into(), bidirectional: false }],
            chat_id: None,
        };

        let swarm_id = coordinator.launch(request).await.unwrap();
        tokio::time::timeout(Duration::from_millis(500), async {
            loop {
                if let Some(run) = coordinator.get_run(&swarm_id).await.unwrap() {
                    if run.completed_at.is_some() {
                        return run;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let run = coordinator.get_run(&swarm_id).await.unwrap().unwrap();
        assert_eq!(run.status, praktor_persistence::SwarmStatus::Completed);
        assert_eq!(run.results.len(), 2);
        assert!(run.results.iter().any(|r| r.role == "writer" && r.output == "writer done"));
    }
}
