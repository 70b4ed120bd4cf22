use thiserror::Error;

#[derive(Error, Debug)]
pub enum TallyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transient storage error: {0}")]
    TransientStorage(String),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Reconciliation was not confirmed before the timeout")]
    ConfirmationTimeout,
}

pub type Result<T> = std::result::Result<T, TallyError>;
