//! In-memory container adapter: a fixture for orchestrator tests that never
//! touches the Docker socket. Containers are "running" as soon as `start` is
//! called and files are held in a plain map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::adapter::ContainerAdapter;
use crate::error::ContainerError;
use crate::spec::{ContainerHandle, ContainerSpec, ExecOutput};

#[derive(Default)]
pub struct InMemoryContainerAdapter {
    running: Mutex<HashMap<String, bool>>,
    files: Mutex<HashMap<(String, String), Vec<u8>>>,
    next_id: AtomicU64,
    starts_by_agent: Mutex<HashMap<String, u64>>,
}

impl InMemoryContainerAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: how many times `start` was called for `agent_id`.
    pub fn start_count_for(&self, agent_id: &str) -> u64 {
        self.starts_by_agent.lock().unwrap().get(agent_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ContainerAdapter for InMemoryContainerAdapter {
    async fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle, ContainerError> {
        let id = format!(
            "mem-{}-{}",
            spec.agent_id,
            self.next_id.fetch_add(1, Ordering::SeqCst)
        );
        self.running.lock().unwrap().insert(id.clone(), true);
        *self
            .starts_by_agent
            .lock()
            .unwrap()
            .entry(spec.agent_id.clone())
            .or_insert(0) += 1;
        Ok(ContainerHandle { container_id: id })
    }

    async fn stop(&self, container_id: &str) -> Result<(), ContainerError> {
        self.running.lock().unwrap().insert(container_id.to_string(), false);
        Ok(())
    }

    async fn is_running(&self, container_id: &str) -> Result<bool, ContainerError> {
        Ok(self
            .running
            .lock()
            .unwrap()
            .get(container_id)
            .copied()
            .unwrap_or(false))
    }

    async fn write_file(
        &self,
        container_id: &str,
        path: &str,
        contents: &[u8],
        _mode: u32,
    ) -> Result<(), ContainerError> {
        self.files
            .lock()
            .unwrap()
            .insert((container_id.to_string(), path.to_string()), contents.to_vec());
        Ok(())
    }

    async fn read_file(&self, container_id: &str, path: &str) -> Result<Vec<u8>, ContainerError> {
        self.files
            .lock()
            .unwrap()
            .get(&(container_id.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| ContainerError::FileIo(format!("no such file: {path}")))
    }

    async fn exec(&self, _container_id: &str, cmd: Vec<String>) -> Result<ExecOutput, ContainerError> {
        Ok(ExecOutput {
            exit_code: 0,
            stdout: cmd.join(" "),
            stderr: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            agent_id: "coder".into(),
            image: "praktor/coder".into(),
            bus_url: "nats://localhost:4222".into(),
            model: "claude".into(),
            workspace_volume: "coder-ws".into(),
            shared_instructions_volume: "shared".into(),
            home_volume: "coder-home".into(),
            allowed_tools: vec![],
            extensions_json: None,
            env: Map::new(),
            uid: 1000,
            nix_enabled: false,
        }
    }

    #[tokio::test]
    async fn start_then_stop_flips_running_state() {
        let adapter = InMemoryContainerAdapter::new();
        let handle = adapter.start(&spec()).await.unwrap();
        assert!(adapter.is_running(&handle.container_id).await.unwrap());
        adapter.stop(&handle.container_id).await.unwrap();
        assert!(!adapter.is_running(&handle.container_id).await.unwrap());
    }

    #[tokio::test]
    async fn write_then_read_file_round_trips() {
        let adapter = InMemoryContainerAdapter::new();
        let handle = adapter.start(&spec()).await.unwrap();
        adapter
            .write_file(&handle.container_id, "/workspace/notes.md", b"hello", 0o600)
            .await
            .unwrap();
        let got = adapter.read_file(&handle.container_id, "/workspace/notes.md").await.unwrap();
        assert_eq!(got, b"hello");
    }
}
