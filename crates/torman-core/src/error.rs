//! Error types for the Torman core

use std::path::PathBuf;
use thiserror::Error;
use torman_types::JobId;

/// Errors that can occur in the Torman core.
///
/// None of these is fatal to the process; the registry stays usable after
/// any single job's failure.
#[derive(Debug, Error)]
pub enum TormanError {
    #[error("torrent {source_file:?} is already being transferred to {destination:?}")]
    DuplicateJob {
        source_file: PathBuf,
        destination: PathBuf,
    },

    #[error("engine rejected the torrent: {0}")]
    EngineRejected(String),

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job is already at that end of the list")]
    AtBoundary,

    #[error("operation is not valid in the session's current state")]
    InvalidState,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<TormanError> for String {
    fn from(error: TormanError) -> Self {
        error.to_string()
    }
}
