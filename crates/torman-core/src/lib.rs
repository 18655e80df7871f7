//! Torman Core - torrent job manager
//!
//! Tracks an ordered collection of torrent jobs driven by an external
//! transfer engine, enforces a global upload/download budget across all
//! active sessions, and persists the whole session across restarts.

mod engine;
mod error;
mod limiter;
mod persistence;
mod rate;
mod registry;
#[cfg(test)]
mod test_util;

pub use engine::*;
pub use error::*;
pub use limiter::*;
pub use persistence::*;
pub use rate::*;
pub use registry::*;

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use torman_types::{CoreEvent, JobId, JobSnapshot, MoveDirection, SavedState};
use tracing::{info, warn};

/// The main Torman core instance.
///
/// All job mutations and session event reconciliation are serialized behind
/// one async mutex; a reactor task is the sole consumer of session events,
/// and a save task writes the persisted document after mutations, debounced.
pub struct TormanCore<E: TorrentEngine> {
    /// Ordered job collection.
    registry: Arc<AsyncMutex<JobRegistry<E>>>,
    /// Global budgets shared with every session.
    limiter: RateLimiter,
    /// Last directory and rate control positions, persisted alongside jobs.
    settings: Arc<Mutex<BaseSettings>>,
    /// Persisted document store.
    store: Arc<PersistenceStore>,
    /// Event broadcaster.
    event_tx: broadcast::Sender<CoreEvent>,
    /// Dirty flag feeding the save task.
    saver: SaveScheduler,
}

#[derive(Clone)]
struct BaseSettings {
    last_directory: PathBuf,
    upload_control: u16,
    download_control: u16,
}

impl<E: TorrentEngine> TormanCore<E> {
    /// Create a core instance, restoring any previously persisted session.
    ///
    /// Persisted rate controls are applied to the limiter before any job is
    /// restored. Saved jobs are replayed in their persisted order; entries
    /// the engine rejects (e.g. a torrent file that no longer parses) are
    /// logged and skipped rather than failing startup.
    pub async fn new(engine: E, data_dir: PathBuf) -> Result<Self, TormanError> {
        let store = Arc::new(PersistenceStore::new(data_dir).await?);
        let saved = store.load().await;

        let limiter = RateLimiter::new();
        let upload_control = saved.upload_limit_control.min(CONTROL_MAX);
        let download_control = saved.download_limit_control.min(CONTROL_MAX);
        limiter.set_upload_limit(bytes_per_sec_from_control(upload_control));
        limiter.set_download_limit(bytes_per_sec_from_control(download_control));

        let (event_tx, _) = broadcast::channel(1024);
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let saver = SaveScheduler::new();

        let mut registry = JobRegistry::new(
            Arc::new(engine),
            limiter.clone(),
            session_tx,
            event_tx.clone(),
            saver.clone(),
        );

        for record in &saved.torrents {
            match registry.add(
                &record.source_file_name,
                &record.destination_folder,
                Some(&record.resume_state),
            ) {
                Ok(id) => {
                    registry.restore_counters(id, record.uploaded_bytes, record.downloaded_bytes)
                }
                Err(e) => warn!(
                    "skipping saved torrent {}: {}",
                    record.source_file_name.display(),
                    e
                ),
            }
        }
        info!(jobs = registry.len(), "restored session state");

        let core = Self {
            registry: Arc::new(AsyncMutex::new(registry)),
            limiter,
            settings: Arc::new(Mutex::new(BaseSettings {
                last_directory: saved.last_directory,
                upload_control,
                download_control,
            })),
            store,
            event_tx,
            saver,
        };
        core.spawn_reactor(session_rx);
        core.spawn_save_loop();
        Ok(core)
    }

    /// Subscribe to core events.
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.event_tx.subscribe()
    }

    // ========================================================================
    // Job Operations
    // ========================================================================

    /// Add a torrent job. See [`JobRegistry::add`].
    pub async fn add_job(&self, source: &Path, destination: &Path) -> Result<JobId, TormanError> {
        self.registry.lock().await.add(source, destination, None)
    }

    /// Request removal of a job. See [`JobRegistry::remove`].
    pub async fn remove_job(&self, id: JobId) -> Result<(), TormanError> {
        self.registry.lock().await.remove(id)
    }

    /// Move a job one slot up or down in the priority order.
    pub async fn reorder_job(&self, id: JobId, direction: MoveDirection) -> Result<(), TormanError> {
        self.registry.lock().await.reorder(id, direction)
    }

    /// Toggle pause on a job's session.
    pub async fn pause_toggle(&self, id: JobId) -> Result<(), TormanError> {
        self.registry.lock().await.pause_toggle(id)
    }

    /// Ordered snapshot of all visible jobs.
    pub async fn jobs(&self) -> Vec<JobSnapshot> {
        self.registry.lock().await.snapshot()
    }

    /// Number of tracked jobs, pending removals included.
    pub async fn job_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    // ========================================================================
    // Rate Controls
    // ========================================================================

    /// Apply a download control value: map it through the rate curve and
    /// push the resulting limit into the shared limiter. Out-of-range values
    /// are clamped.
    pub fn set_download_control(&self, value: u16) {
        let value = value.min(CONTROL_MAX);
        self.limiter
            .set_download_limit(bytes_per_sec_from_control(value));
        self.settings.lock().download_control = value;
        self.saver.mark_dirty();
    }

    /// Apply an upload control value.
    pub fn set_upload_control(&self, value: u16) {
        let value = value.min(CONTROL_MAX);
        self.limiter
            .set_upload_limit(bytes_per_sec_from_control(value));
        self.settings.lock().upload_control = value;
        self.saver.mark_dirty();
    }

    /// Current `(download, upload)` control positions.
    pub fn controls(&self) -> (u16, u16) {
        let settings = self.settings.lock();
        (settings.download_control, settings.upload_control)
    }

    /// Current `(download, upload)` limits in bytes/sec.
    pub fn current_limits(&self) -> (u64, u64) {
        self.limiter.current_limits()
    }

    // ========================================================================
    // Session Settings
    // ========================================================================

    /// Remember the directory the user last picked a torrent from.
    pub fn set_last_directory(&self, path: &Path) {
        self.settings.lock().last_directory = path.to_path_buf();
        self.saver.mark_dirty();
    }

    pub fn last_directory(&self) -> PathBuf {
        self.settings.lock().last_directory.clone()
    }

    /// Write the persisted document now, bypassing the debounce. Used on
    /// shutdown so the latest counters and resume snapshots are not lost.
    pub async fn flush(&self) -> Result<(), TormanError> {
        let state = compose_state(&self.settings, &self.registry).await;
        self.store.save(&state).await
    }

    fn spawn_reactor(&self, mut session_rx: SessionEventReceiver) {
        let registry = self.registry.clone();
        tokio::spawn(async move {
            while let Some((id, event)) = session_rx.recv().await {
                registry.lock().await.on_session_event(id, event);
            }
        });
    }

    fn spawn_save_loop(&self) {
        let saver = self.saver.clone();
        let registry = self.registry.clone();
        let settings = self.settings.clone();
        let store = self.store.clone();
        tokio::spawn(async move {
            loop {
                saver.wait_dirty().await;
                tokio::time::sleep(SAVE_DEBOUNCE).await;
                let state = compose_state(&settings, &registry).await;
                if let Err(e) = store.save(&state).await {
                    // Non-fatal; the next mutation schedules a retry.
                    warn!("failed to persist session state: {}", e);
                }
            }
        });
    }
}

async fn compose_state<E: TorrentEngine>(
    settings: &Mutex<BaseSettings>,
    registry: &AsyncMutex<JobRegistry<E>>,
) -> SavedState {
    let torrents = registry.lock().await.saved_jobs();
    let base = settings.lock().clone();
    SavedState {
        last_directory: base.last_directory,
        upload_limit_control: base.upload_control,
        download_limit_control: base.download_control,
        torrents,
    }
}
