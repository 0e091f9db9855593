use async_trait::async_trait;

use crate::error::ContainerError;
use crate::spec::{ContainerHandle, ContainerSpec, ExecOutput};

/// Docker control-plane contract, client
/// side only): image pull is assumed to have already happened out of band;
/// this trait covers container lifecycle, exec, and tar-stream file I/O.
#[async_trait]
pub trait ContainerAdapter: Send + Sync {
    async fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle, ContainerError>;

    async fn stop(&self, container_id: &str) -> Result<(), ContainerError>;

    async fn is_running(&self, container_id: &str) -> Result<bool, ContainerError>;

    /// Writes `contents` to `path` inside the container with the given
    /// unix `mode` (file mounts default to `0600`).
    async fn write_file(
        &self,
        container_id: &str,
        path: &str,
        contents: &[u8],
        mode: u32,
    ) -> Result<(), ContainerError>;

    async fn read_file(&self, container_id: &str, path: &str) -> Result<Vec<u8>, ContainerError>;

    /// Runs `cmd` inside the container and waits for completion — used for
    /// nix-package installs (120 s deadline) and other one-off exec.
    async fn exec(&self, container_id: &str, cmd: Vec<String>) -> Result<ExecOutput, ContainerError>;
}
