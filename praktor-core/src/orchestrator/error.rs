use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("agent unknown: {0}")]
    AgentUnknown(String),
    #[error("container start failed for agent {agent_id}: {source}")]
    ContainerStartFailed {
        agent_id: String,
        source: praktor_container::ContainerError,
    },
    #[error(transparent)]
    Store(#[from] praktor_persistence::StoreError),
    #[error(transparent)]
    Bus(#[from] praktor_bus::BusError),
}
