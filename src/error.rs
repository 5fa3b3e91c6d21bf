use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed service manifest {path}: {reason}")]
    ManifestParse { path: PathBuf, reason: String },

    #[error("extraction unavailable: {0}")]
    Extraction(String),

    #[error("document store error: {0}")]
    Store(#[from] tantivy::TantivyError),

    #[error("query not recognized: {0}")]
    QueryParse(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, IndexError>;
