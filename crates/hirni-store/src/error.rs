use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("specification not found: {0}")]
    SpecNotFound(PathBuf),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{line}: invalid JSON: {source}", path.display())]
    Json {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("{}:{line}: not a JSON object", path.display())]
    NotAnObject { path: PathBuf, line: usize },

    #[error("{}: cannot replace file: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },

    #[error("{}: {rejected} snippet(s) failed to load; refusing to rewrite", path.display())]
    RejectedSnippets { path: PathBuf, rejected: usize },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
