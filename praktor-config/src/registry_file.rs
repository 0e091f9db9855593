//! YAML agent-registry loading, environment overrides for
//! restart-required fields, and change-watch plumbing for the
//! config reloader.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Deserialize;
use thiserror::Error;

use praktor_core::registry::{AgentDefinition, Defaults, FileMount, RegistryError, RegistrySnapshot};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("router.default_agent is missing from the config file")]
    MissingDefaultAgent,
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct TelegramConfig {
    pub token: Option<String>,
    #[serde(default)]
    pub allow_from: Vec<i64>,
    pub main_chat_id: Option<i64>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct DefaultsConfig {
    pub model: Option<String>,
    pub image: Option<String>,
    pub max_running: Option<u32>,
    /// Seconds.
    pub idle_timeout: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RouterConfig {
    pub default_agent: Option<String>,
    /// Enables the `RouteQuery` round trip before falling back to
    /// `default_agent`. Defaults to on until explicitly turned off in YAML.
    #[serde(default = "default_smart_routing")]
    pub smart_routing: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_agent: None,
            smart_routing: default_smart_routing(),
        }
    }
}

fn default_smart_routing() -> bool {
    true
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct WebConfig {
    pub port: Option<u16>,
    pub auth: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct NatsConfig {
    pub port: Option<u16>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct VaultConfig {
    pub passphrase: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Seconds.
    pub poll_interval: Option<u64>,
}

/// One `agents.<id>` entry; the id itself comes from the map key, not this
/// struct, mirroring [`praktor_core::registry::AgentDefinition`] minus `id`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AgentConfig {
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

impl AgentConfig {
    fn into_definition(self, id: String) -> AgentDefinition {
        AgentDefinition {
            id,
            display_name: self.display_name,
            description: self.description,
            model: self.model,
            image: self.image,
            workspace: self.workspace,
            env: self.env,
            allowed_tools: self.allowed_tools,
            files: self.files,
            nix_enabled: self.nix_enabled,
            extensions: self.extensions,
        }
    }
}

/// The parsed YAML config file, before environment overrides and
/// registry validation are applied.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ConfigFile {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub nats: NatsConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Reads and parses a YAML config file from disk. Does not apply
/// environment overrides or validate — see [`load_registry_snapshot`].
pub fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_yaml::from_str(&raw)?)
}

/// Applies environment-variable overrides for the restart-required fields:
/// chat-ingress token, web port, bus (nats) port, vault
/// passphrase. Environment always wins over the YAML file.
pub fn apply_env_overrides(cfg: &mut ConfigFile) {
    if let Ok(v) = std::env::var("PRAKTOR_TELEGRAM_TOKEN") {
        cfg.telegram.token = Some(v);
    }
    if let Ok(v) = std::env::var("PRAKTOR_WEB_PORT") {
        if let Ok(port) = v.parse() {
            cfg.web.port = Some(port);
        }
    }
    if let Ok(v) = std::env::var("PRAKTOR_NATS_PORT") {
        if let Ok(port) = v.parse() {
            cfg.nats.port = Some(port);
        }
    }
    if let Ok(v) = std::env::var("PRAKTOR_VAULT_PASSPHRASE") {
        cfg.vault.passphrase = Some(v);
    }
}

/// Builds a [`RegistrySnapshot`] from a parsed config file. Does not
/// validate — call [`praktor_core::registry::validate`] on the result.
pub fn to_registry_snapshot(cfg: &ConfigFile) -> Result<RegistrySnapshot, ConfigError> {
    let default_agent = cfg
        .router
        .default_agent
        .clone()
        .ok_or(ConfigError::MissingDefaultAgent)?;

    let agents = cfg
        .agents
        .iter()
        .map(|(id, agent)| (id.clone(), agent.clone().into_definition(id.clone())))
        .collect();

    Ok(RegistrySnapshot {
        agents,
        default_agent,
        defaults: Defaults {
            model: cfg.defaults.model.clone(),
            image: cfg.defaults.image.clone(),
            max_running: cfg.defaults.max_running,
            idle_timeout_secs: cfg.defaults.idle_timeout,
        },
        main_chat_id: cfg.telegram.main_chat_id,
        smart_routing: cfg.router.smart_routing,
    })
}

/// Loads, overrides, and validates a config file in one call — the entry
/// point for both startup and config-reload.
pub fn load_registry_snapshot(path: &Path) -> Result<(RegistrySnapshot, ConfigFile), ConfigError> {
    let mut cfg = load_config_file(path)?;
    apply_env_overrides(&mut cfg);
    let snapshot = to_registry_snapshot(&cfg)?;
    praktor_core::registry::validate(&snapshot)?;
    Ok((snapshot, cfg))
}

/// A config-level field whose change is detected but not live-applied:
/// the reload loop logs a warning and keeps running
/// with the old value until the process restarts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartField {
    TelegramToken,
    WebPort,
    NatsPort,
    VaultPassphrase,
}

impl std::fmt::Display for RestartField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RestartField::TelegramToken => "telegram.token",
            RestartField::WebPort => "web.port",
            RestartField::NatsPort => "nats.port",
            RestartField::VaultPassphrase => "vault.passphrase",
        };
        f.write_str(s)
    }
}

/// Compares two already-overridden config files and reports which
/// restart-required fields changed. Live-apply fields
/// (`web.auth`, `scheduler.poll_interval`, `telegram.main_chat_id`, agent
/// definitions) are handled instead via [`praktor_core::registry::diff`]
/// and direct pushes into the orchestrator/scheduler.
pub fn restart_required_changes(old: &ConfigFile, new: &ConfigFile) -> Vec<RestartField> {
    let mut changed = Vec::new();
    if old.telegram.token != new.telegram.token {
        changed.push(RestartField::TelegramToken);
    }
    if old.web.port != new.web.port {
        changed.push(RestartField::WebPort);
    }
    if old.nats.port != new.nats.port {
        changed.push(RestartField::NatsPort);
    }
    if old.vault.passphrase != new.vault.passphrase {
        changed.push(RestartField::VaultPassphrase);
    }
    changed
}

fn content_hash(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

/// Tracks a config file's mtime and content hash so a poll loop can tell
/// "touched" from "actually changed".
pub struct ChangeWatcher {
    path: PathBuf,
    last_mtime: Option<SystemTime>,
    last_hash: Option<u64>,
}

impl ChangeWatcher {
    /// Creates a watcher and records the file's current mtime/hash as the
    /// baseline, so the first [`Self::poll`] call only fires if the file
    /// changed after construction.
    pub fn new(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let mut watcher = Self {
            path,
            last_mtime: None,
            last_hash: None,
        };
        watcher.poll()?;
        Ok(watcher)
    }

    /// Checks whether the file's mtime advanced and, if so, whether its
    /// content hash actually differs. Returns `Some(contents)` only on a
    /// confirmed change.
    pub fn poll(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        let metadata = std::fs::metadata(&self.path)?;
        let mtime = metadata.modified()?;
        if self.last_mtime == Some(mtime) {
            return Ok(None);
        }
        self.last_mtime = Some(mtime);

        let contents = std::fs::read(&self.path)?;
        let hash = content_hash(&contents);
        if self.last_hash == Some(hash) {
            return Ok(None);
        }
        self.last_hash = Some(hash);
        Ok(Some(contents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("praktor.yaml");
        std::fs::write(&path, body).unwrap();
        path
    }

    const MINIMAL: &str = r#"
router:
  default_agent: coder
agents:
  coder:
    display_name: Coder
    workspace: coder-ws
"#;

    #[test]
    fn loads_minimal_config_into_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), MINIMAL);
        let (snapshot, cfg) = load_registry_snapshot(&path).unwrap();
        assert_eq!(snapshot.default_agent, "coder");
        assert!(snapshot.contains("coder"));
        assert_eq!(cfg.router.default_agent.as_deref(), Some("coder"));
    }

    #[test]
    fn missing_default_agent_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "agents: {}\n");
        let result = load_registry_snapshot(&path);
        assert!(matches!(result, Err(ConfigError::MissingDefaultAgent)));
    }

    #[test]
    fn unknown_default_agent_fails_registry_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            "router:\n  default_agent: ghost\nagents: {}\n",
        );
        let result = load_registry_snapshot(&path);
        assert!(matches!(result, Err(ConfigError::Registry(_))));
    }

    #[test]
    fn env_override_wins_over_yaml_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            &format!("{MINIMAL}telegram:\n  token: from-yaml\n"),
        );
        std::env::set_var("PRAKTOR_TELEGRAM_TOKEN", "from-env");
        let (_, cfg) = load_registry_snapshot(&path).unwrap();
        std::env::remove_var("PRAKTOR_TELEGRAM_TOKEN");
        assert_eq!(cfg.telegram.token.as_deref(), Some("from-env"));
    }

    #[test]
    fn restart_required_changes_detects_token_and_port() {
        let mut old = ConfigFile::default();
        old.telegram.token = Some("a".to_string());
        old.web.port = Some(8080);
        let mut new = old.clone();
        new.telegram.token = Some("b".to_string());

        let changed = restart_required_changes(&old, &new);
        assert_eq!(changed, vec![RestartField::TelegramToken]);
    }

    #[test]
    fn change_watcher_fires_once_per_confirmed_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), MINIMAL);
        let mut watcher = ChangeWatcher::new(&path).unwrap();

        assert!(watcher.poll().unwrap().is_none());

        std::thread::sleep(std::time::Duration::from_millis(10));
        std::fs::write(&path, format!("{MINIMAL}\n# touched\n")).unwrap();
        let changed = watcher.poll().unwrap();
        assert!(changed.is_some());

        assert!(watcher.poll().unwrap().is_none());
    }
}
