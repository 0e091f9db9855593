use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("docker daemon error: {0}")]
    Docker(#[from] bollard::errors::Error),
    #[error("container exec failed: {0}")]
    ExecFailed(String),
    #[error("file i/o on container failed: {0}")]
    FileIo(String),
    #[error("container not found: {0}")]
    NotFound(String),
}
