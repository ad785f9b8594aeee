use thiserror::Error;

#[derive(Debug, Error)]
pub enum TsuzukiError {
    #[error("parse failed: {0}")]
    Parse(String),

    #[error("relation rule error: {0}")]
    Relation(String),

    #[error("override rules invalid: {0}")]
    Override(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("feed error: {0}")]
    Feed(String),

    #[error("download error: {0}")]
    Download(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
