//! Agent registry: a validated, atomically-swappable snapshot of every
//! configured agent.

mod error;

pub use error::RegistryError;

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

/// One `{secret_name, target_path, mode}` file mount.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileMount {
    pub secret_name: String,
    pub target_path: String,
    #[serde(default = "default_mode")]
    pub mode: u32,
}

fn default_mode() -> u32 {
    0o600
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub model: Option<String>,
    pub image: Option<String>,
    pub workspace: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default)]
    pub files: Vec<FileMount>,
    #[serde(default)]
    pub nix_enabled: bool,
    #[serde(default)]
    pub extensions: serde_json::Value,
}

impl AgentDefinition {
    /// Fields whose change requires stopping a running container so the
    /// next message lazily starts a fresh one. Identity
    /// fields (`id`, `display_name`, `description`) are excluded — they
    /// don't affect the running sandbox.
    pub fn semantic_fields_equal(&self, other: &AgentDefinition) -> bool {
        self.model == other.model
            && self.image == other.image
            && self.workspace == other.workspace
            && self.env == other.env
            && self.allowed_tools == other.allowed_tools
            && self.files == other.files
            && self.nix_enabled == other.nix_enabled
            && self.extensions == other.extensions
    }
}

#[derive(Clone, Debug, Default)]
pub struct Defaults {
    pub model: Option<String>,
    pub image: Option<String>,
    pub max_running: Option<u32>,
    pub idle_timeout_secs: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct RegistrySnapshot {
    pub agents: HashMap<String, AgentDefinition>,
    pub default_agent: String,
    pub defaults: Defaults,
    pub main_chat_id: Option<i64>,
    /// Whether the router falls back to a `RouteQuery` round trip
    /// against the default agent before giving up and using it directly.
    pub smart_routing: bool,
}

impl RegistrySnapshot {
    pub fn agent(&self, id: &str) -> Option<&AgentDefinition> {
        self.agents.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.agents.contains_key(id)
    }

    /// Resolves an agent's model, falling back to `defaults.model`.
    pub fn resolved_model(&self, id: &str) -> Option<String> {
        self.agent(id)
            .and_then(|a| a.model.clone().or_else(|| self.defaults.model.clone()))
    }

    pub fn resolved_image(&self, id: &str) -> Option<String> {
        self.agent(id)
            .and_then(|a| a.image.clone().or_else(|| self.defaults.image.clone()))
    }
}

pub fn validate(snapshot: &RegistrySnapshot) -> Result<(), RegistryError> {
    if !snapshot.agents.contains_key(&snapshot.default_agent) {
        return Err(RegistryError::UnknownDefaultAgent(snapshot.default_agent.clone()));
    }
    Ok(())
}

/// Diff between two registry snapshots, used by the config reloader to decide which running containers must be stopped.
pub struct RegistryDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Agent ids present in both snapshots whose semantic fields changed.
    pub mutated: Vec<String>,
}

pub fn diff(old: &RegistrySnapshot, new: &RegistrySnapshot) -> RegistryDiff {
    let mut added = Vec::new();
    let mut removed = Vec::new();
    let mut mutated = Vec::new();

    for id in new.agents.keys() {
        if !old.agents.contains_key(id) {
            added.push(id.clone());
        }
    }
    for (id, old_def) in &old.agents {
        match new.agents.get(id) {
            None => removed.push(id.clone()),
            Some(new_def) => {
                if !old_def.semantic_fields_equal(new_def) {
                    mutated.push(id.clone());
                }
            }
        }
    }
    added.sort();
    removed.sort();
    mutated.sort();
    RegistryDiff { added, removed, mutated }
}

/// Atomically-swappable holder for the current snapshot.
pub struct Registry {
    current: ArcSwap<RegistrySnapshot>,
}

impl Registry {
    pub fn new(snapshot: RegistrySnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
        }
    }

    pub fn load(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    pub fn swap(&self, snapshot: RegistrySnapshot) {
        self.current.store(Arc::new(snapshot));
    }
}
