use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the watcher's I/O edges.
///
/// None of these are fatal: the poll loop logs them and carries on.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to list directory {path:?}: {source}")]
    ListDir { path: PathBuf, source: io::Error },

    #[error("failed to read {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        source: serde_json::Error,
    },

    #[error("failed to write {path:?}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

pub type WatchResult<T> = Result<T, WatchError>;
