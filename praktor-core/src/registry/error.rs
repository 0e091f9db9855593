use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("router.default_agent does not resolve to a known agent: {0}")]
    UnknownDefaultAgent(String),
}
