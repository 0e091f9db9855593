use std::collections::HashMap;

/// Everything `ensureContainer` needs to start an agent's sandbox.
#[derive(Clone, Debug)]
pub struct ContainerSpec {
    pub agent_id: String,
    pub image: String,
    pub bus_url: String,
    pub model: String,
    /// `workspace` (rw), shared read-only instructions, and per-agent
    /// home/session volumes.
    pub workspace_volume: String,
    pub shared_instructions_volume: String,
    pub home_volume: String,
    pub allowed_tools: Vec<String>,
    pub extensions_json: Option<String>,
    /// Resolved secret env vars merged in alongside `AGENT_ID`/`MODEL`.
    pub env: HashMap<String, String>,
    /// Fixed non-root uid every sandbox container runs as.
    pub uid: u32,
    /// Whether the in-container nix package manager is enabled for this
    /// agent; surfaced as an env flag
    /// rather than a volume or bind mount.
    pub nix_enabled: bool,
}

impl ContainerSpec {
    /// Builds the full environment map for container start, folding in the
    /// fixed, always-present keys on top of `self.env`.
    pub fn full_env(&self) -> HashMap<String, String> {
        let mut env = self.env.clone();
        env.insert("PRAKTOR_BUS_URL".to_string(), self.bus_url.clone());
        env.insert("AGENT_ID".to_string(), self.agent_id.clone());
        env.insert("MODEL".to_string(), self.model.clone());
        if !self.allowed_tools.is_empty() {
            env.insert("ALLOWED_TOOLS".to_string(), self.allowed_tools.join(","));
        }
        if let Some(ext) = &self.extensions_json {
            env.insert("AGENT_EXTENSIONS".to_string(), ext.clone());
        }
        if self.nix_enabled {
            env.insert("NIX_ENABLED".to_string(), "1".to_string());
        }
        env
    }
}

#[derive(Clone, Debug)]
pub struct ContainerHandle {
    pub container_id: String,
}

#[derive(Clone, Debug)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_env_includes_fixed_keys_and_custom_env() {
        let mut env = HashMap::new();
        env.insert("GITHUB_TOKEN".to_string(), "secret-value".to_string());
        let spec = ContainerSpec {
            agent_id: "coder".into(),
            image: "praktor/coder:latest".into(),
            bus_url: "nats://localhost:4222".into(),
            model: "claude-sonnet".into(),
            workspace_volume: "coder-workspace".into(),
            shared_instructions_volume: "shared-instructions".into(),
            home_volume: "coder-home".into(),
            allowed_tools: vec!["bash".into(), "edit".into()],
            extensions_json: Some("{\"skills\":[]}".into()),
            env,
            uid: 1000,
            nix_enabled: false,
        };
        let full = spec.full_env();
        assert_eq!(full.get("AGENT_ID"), Some(&"coder".to_string()));
        assert_eq!(full.get("MODEL"), Some(&"claude-sonnet".to_string()));
        assert_eq!(full.get("ALLOWED_TOOLS"), Some(&"bash,edit".to_string()));
        assert_eq!(full.get("GITHUB_TOKEN"), Some(&"secret-value".to_string()));
    }
}
