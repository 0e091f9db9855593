use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid schedule expression: {0}")]
    InvalidExpression(String),
    #[error(transparent)]
    Store(#[from] praktor_persistence::StoreError),
}
