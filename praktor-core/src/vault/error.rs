use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("vault key not ready: passphrase not configured")]
    KeyNotReady,
    #[error("secret not found: {0}")]
    SecretNotFound(String),
    #[error("decrypt failed for secret {0}")]
    DecryptFailed(String),
    #[error("encrypt failed: {0}")]
    EncryptFailed(String),
    #[error(transparent)]
    Store(#[from] praktor_persistence::StoreError),
}
