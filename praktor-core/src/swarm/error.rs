use thiserror::Error;

#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("duplicate role in swarm graph: {0}")]
    DuplicateRole(String),
    #[error("synapse references unknown role: {0}")]
    UnknownRole(String),
    #[error("duplicate synapse between {0} and {1}")]
    DuplicateSynapse(String, String),
    #[error("swarm graph's directed projection contains a cycle")]
    Cycle,
    #[error("lead_agent does not match any role: {0}")]
    UnknownLead(String),
    #[error("node {role} failed: {source}")]
    NodeFailed { role: String, source: String },
    #[error(transparent)]
    Store(#[from] praktor_persistence::StoreError),
}
