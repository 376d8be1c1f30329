use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("backup not found: {0}")]
    BackupNotFound(u64),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("save error: {0}")]
    Save(#[from] lifeline_core::SaveError),

    #[error("store error: {0}")]
    Store(#[from] lifeline_store::StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type SdkResult<T> = Result<T, SdkError>;
