//! Durable session state
//!
//! The whole registry state is one JSON document, rewritten in full on every
//! save. Writes go through a temp file and an atomic rename, so a crash
//! mid-write can only lose the latest save, never corrupt the previous one.
//! Saves are coalesced: mutations mark the state dirty and a background task
//! writes once per debounce window.

use crate::error::TormanError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::{Mutex, Notify};
use torman_types::SavedState;
use tracing::warn;

/// How long to sit on a dirty flag before writing.
pub const SAVE_DEBOUNCE: Duration = Duration::from_secs(1);

const STATE_FILE: &str = "session.json";

/// Store for the persisted session document.
#[derive(Clone, Debug)]
pub struct PersistenceStore {
    path: PathBuf,
    /// Writers share one temp path; this keeps them from interleaving.
    write_lock: Arc<Mutex<()>>,
}

impl PersistenceStore {
    /// Create a store rooted at `data_dir`, creating the directory if needed.
    pub async fn new(data_dir: PathBuf) -> Result<Self, TormanError> {
        fs::create_dir_all(&data_dir).await?;
        Ok(Self {
            path: data_dir.join(STATE_FILE),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state. An absent or unreadable file yields the
    /// defaults; a load never fails the caller.
    pub async fn load(&self) -> SavedState {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return SavedState::default();
            }
            Err(e) => {
                warn!("could not read {}: {}", self.path.display(), e);
                return SavedState::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    "corrupt session state in {}, starting fresh: {}",
                    self.path.display(),
                    e
                );
                SavedState::default()
            }
        }
    }

    /// Overwrite the persisted document with `state`.
    ///
    /// Concurrent saves are serialized; the later writer wins.
    pub async fn save(&self, state: &SavedState) -> Result<(), TormanError> {
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| TormanError::Serialization(e.to_string()))?;

        let _guard = self.write_lock.lock().await;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &self.path).await?;

        Ok(())
    }
}

/// Coalescing dirty flag between the registry and the save task.
///
/// Any number of `mark_dirty` calls within a window collapse into a single
/// wakeup; a pending write is superseded by a later one rather than queued.
#[derive(Clone)]
pub struct SaveScheduler {
    notify: Arc<Notify>,
}

impl SaveScheduler {
    pub fn new() -> Self {
        Self {
            notify: Arc::new(Notify::new()),
        }
    }

    /// Record that persisted state has diverged. Never blocks.
    pub fn mark_dirty(&self) {
        self.notify.notify_one();
    }

    /// Wait until something marks the state dirty. A mark that happened
    /// before the call is not lost.
    pub async fn wait_dirty(&self) {
        self.notify.notified().await;
    }
}

impl Default for SaveScheduler {
    fn default() -> Self {
        Self::new()
    }
}
