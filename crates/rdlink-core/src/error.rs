use thiserror::Error;

#[derive(Debug, Error)]
pub enum RdlinkError {
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("store actor closed")]
    StoreClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
