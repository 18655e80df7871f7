//! Ordered job registry and session event reconciliation
//!
//! All mutations and event handling run on one logical thread of control:
//! the owner serializes access (the core keeps the registry behind a single
//! async mutex), so no two operations touch the ordered sequence
//! concurrently. Commands to sessions are fire-and-forget; the registry
//! updates its records when the matching event arrives.

use crate::engine::{EventSink, SessionEventSender, TorrentEngine, TorrentSession};
use crate::error::TormanError;
use crate::limiter::RateLimiter;
use crate::persistence::SaveScheduler;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use torman_types::{
    CoreEvent, JobId, JobSnapshot, MoveDirection, SavedJob, SessionEvent, SessionState,
};
use tracing::{debug, info, warn};

/// One tracked transfer with its exclusively owned session.
struct Job<S> {
    source: PathBuf,
    destination: PathBuf,
    session: S,
    state: SessionState,
    progress_percent: u8,
    connected_peers: u32,
    seed_count: u32,
    download_rate: u64,
    upload_rate: u64,
    /// Removal was requested but the session has not yet confirmed it
    /// stopped. The job is hidden from snapshots but still counts for
    /// duplicate detection and still occupies an order slot.
    pending_removal: bool,
}

/// Ordered collection of jobs.
///
/// Jobs are keyed by [`JobId`] and the display/priority order is kept as a
/// separate id sequence, so removals never invalidate another job's handle.
/// New jobs always append at the tail; only explicit reorders change the
/// order.
pub struct JobRegistry<E: TorrentEngine> {
    engine: Arc<E>,
    jobs: HashMap<JobId, Job<E::Session>>,
    order: Vec<JobId>,
    limiter: RateLimiter,
    session_tx: SessionEventSender,
    event_tx: broadcast::Sender<CoreEvent>,
    saver: SaveScheduler,
}

impl<E: TorrentEngine> JobRegistry<E> {
    pub fn new(
        engine: Arc<E>,
        limiter: RateLimiter,
        session_tx: SessionEventSender,
        event_tx: broadcast::Sender<CoreEvent>,
        saver: SaveScheduler,
    ) -> Self {
        Self {
            engine,
            jobs: HashMap::new(),
            order: Vec::new(),
            limiter,
            session_tx,
            event_tx,
            saver,
        }
    }

    /// Add a job for the torrent at `source`, delivering into `destination`.
    ///
    /// Rejects a `(source, destination)` pair that is already tracked,
    /// including pairs whose job is still pending removal. On success the
    /// session is created, optionally seeded with `resume_state`, started,
    /// and the job is appended at the tail of the order.
    pub fn add(
        &mut self,
        source: &Path,
        destination: &Path,
        resume_state: Option<&[u8]>,
    ) -> Result<JobId, TormanError> {
        if self
            .jobs
            .values()
            .any(|job| job.source == source && job.destination == destination)
        {
            return Err(TormanError::DuplicateJob {
                source_file: source.to_path_buf(),
                destination: destination.to_path_buf(),
            });
        }

        let id = JobId::new();
        let sink = EventSink::new(id, self.session_tx.clone());
        let mut session = self
            .engine
            .create_session(source, sink, self.limiter.clone())
            .map_err(|e| TormanError::EngineRejected(e.to_string()))?;

        session.set_destination(destination);
        if let Some(blob) = resume_state {
            if !blob.is_empty() {
                session.seed_resume_state(blob);
            }
        }
        session.start();

        let name = display_name(source);
        info!(%id, name = %name, "added torrent job");

        self.jobs.insert(
            id,
            Job {
                source: source.to_path_buf(),
                destination: destination.to_path_buf(),
                session,
                state: SessionState::Preparing,
                progress_percent: 0,
                connected_peers: 0,
                seed_count: 0,
                download_rate: 0,
                upload_rate: 0,
                pending_removal: false,
            },
        );
        self.order.push(id);

        self.emit(CoreEvent::JobAdded { id, name });
        self.saver.mark_dirty();
        Ok(id)
    }

    /// Seed the restored byte counters into a freshly added job's session.
    pub fn restore_counters(&mut self, id: JobId, uploaded: u64, downloaded: u64) {
        if let Some(job) = self.jobs.get_mut(&id) {
            job.session.set_uploaded_bytes(uploaded);
            job.session.set_downloaded_bytes(downloaded);
        }
    }

    /// Request removal of a job.
    ///
    /// A job whose session is already terminal is removed synchronously.
    /// Otherwise the job enters pending removal and the session is told to
    /// stop; physical removal happens when the `Stopped` event arrives.
    /// Removing an already-pending job is a no-op.
    pub fn remove(&mut self, id: JobId) -> Result<(), TormanError> {
        let job = self.jobs.get_mut(&id).ok_or(TormanError::NotFound(id))?;

        if job.pending_removal {
            return Ok(());
        }

        if job.state.is_terminal() {
            self.detach(id);
            self.emit(CoreEvent::JobRemoved { id });
            self.saver.mark_dirty();
            return Ok(());
        }

        job.pending_removal = true;
        job.session.stop();
        info!(%id, "removal pending, waiting for session to stop");

        // Hide the job from snapshots right away.
        self.emit(CoreEvent::JobUpdated { id });
        self.saver.mark_dirty();
        Ok(())
    }

    /// Swap a job with its nearest visible neighbor in the given direction.
    ///
    /// Jobs in pending removal still occupy order slots but are hidden, so
    /// they are skipped over when picking the swap partner and do not shield
    /// a visible job from the boundary error.
    pub fn reorder(&mut self, id: JobId, direction: MoveDirection) -> Result<(), TormanError> {
        let pos = self
            .order
            .iter()
            .position(|other| *other == id)
            .ok_or(TormanError::NotFound(id))?;
        if self.is_pending(id) {
            return Err(TormanError::InvalidState);
        }

        let neighbor = match direction {
            MoveDirection::Up => self.order[..pos]
                .iter()
                .rposition(|other| !self.is_pending(*other)),
            MoveDirection::Down => self.order[pos + 1..]
                .iter()
                .position(|other| !self.is_pending(*other))
                .map(|offset| pos + 1 + offset),
        }
        .ok_or(TormanError::AtBoundary)?;

        self.order.swap(pos, neighbor);
        self.emit(CoreEvent::JobUpdated { id });
        self.saver.mark_dirty();
        Ok(())
    }

    /// Toggle the paused flag on a job's session.
    ///
    /// Valid once the session has left `Preparing` and before it reaches a
    /// terminal state; the recorded state changes when the engine reports
    /// the transition. A job in pending removal cannot be paused.
    pub fn pause_toggle(&mut self, id: JobId) -> Result<(), TormanError> {
        let job = self.jobs.get_mut(&id).ok_or(TormanError::NotFound(id))?;

        if job.pending_removal || !job.state.can_toggle_pause() {
            return Err(TormanError::InvalidState);
        }

        job.session.set_paused(job.state != SessionState::Paused);
        Ok(())
    }

    /// Reconcile one session event into the registry.
    ///
    /// This is the only place session-reported facts enter job state.
    /// Events for ids that are no longer tracked are dropped.
    pub fn on_session_event(&mut self, id: JobId, event: SessionEvent) {
        if !self.jobs.contains_key(&id) {
            debug!(%id, "dropping event for unknown job");
            return;
        }

        match event {
            SessionEvent::StateChanged(state) => {
                if let Some(job) = self.jobs.get_mut(&id) {
                    job.state = state;
                }
                self.emit(CoreEvent::JobStateChanged { id, state });
            }
            SessionEvent::ProgressUpdated(percent) => {
                let percent = percent.min(100);
                if let Some(job) = self.jobs.get_mut(&id) {
                    job.progress_percent = percent;
                }
                self.emit(CoreEvent::JobProgress { id, percent });
            }
            SessionEvent::PeerInfoUpdated { connected, seeds } => {
                if let Some(job) = self.jobs.get_mut(&id) {
                    job.connected_peers = connected;
                    job.seed_count = seeds;
                }
                self.emit(CoreEvent::JobUpdated { id });
            }
            SessionEvent::DownloadRateSampled(bytes_per_second) => {
                if let Some(job) = self.jobs.get_mut(&id) {
                    job.download_rate = bytes_per_second;
                }
                self.emit(CoreEvent::JobUpdated { id });
                self.saver.mark_dirty();
            }
            SessionEvent::UploadRateSampled(bytes_per_second) => {
                if let Some(job) = self.jobs.get_mut(&id) {
                    job.upload_rate = bytes_per_second;
                }
                self.emit(CoreEvent::JobUpdated { id });
                self.saver.mark_dirty();
            }
            SessionEvent::Stopped => {
                let pending = match self.jobs.get_mut(&id) {
                    Some(job) => {
                        job.state = SessionState::Stopped;
                        job.pending_removal
                    }
                    None => return,
                };

                if pending {
                    info!(%id, "session stopped, completing removal");
                    self.detach(id);
                    self.emit(CoreEvent::JobRemoved { id });
                } else {
                    self.emit(CoreEvent::JobStateChanged {
                        id,
                        state: SessionState::Stopped,
                    });
                }
                self.saver.mark_dirty();
            }
            SessionEvent::Failed(error) => {
                let name = self
                    .jobs
                    .get(&id)
                    .map(|job| display_name(&job.source))
                    .unwrap_or_default();
                warn!(%id, name = %name, error = %error, "session failed, dropping job");

                self.detach(id);
                self.emit(CoreEvent::SessionFailed {
                    id,
                    name,
                    message: error.to_string(),
                });
                self.saver.mark_dirty();
            }
        }
    }

    /// Ordered snapshot for the presentation layer. Jobs in pending removal
    /// are excluded.
    pub fn snapshot(&self) -> Vec<JobSnapshot> {
        self.order
            .iter()
            .filter_map(|id| self.jobs.get(id).map(|job| (*id, job)))
            .filter(|(_, job)| !job.pending_removal)
            .map(|(id, job)| JobSnapshot {
                id,
                display_name: display_name(&job.source),
                peer_summary: format!("{}/{}", job.connected_peers, job.seed_count),
                progress_percent: job.progress_percent,
                download_rate_text: format_rate(job.download_rate),
                upload_rate_text: format_rate(job.upload_rate),
                state_text: job.state.to_string(),
            })
            .collect()
    }

    /// Persisted records for all jobs, in display order. Jobs in pending
    /// removal are not persisted; they would resurrect on restart.
    pub fn saved_jobs(&self) -> Vec<SavedJob> {
        self.order
            .iter()
            .filter_map(|id| self.jobs.get(id))
            .filter(|job| !job.pending_removal)
            .map(|job| SavedJob {
                source_file_name: job.source.clone(),
                destination_folder: job.destination.clone(),
                uploaded_bytes: job.session.uploaded_bytes(),
                downloaded_bytes: job.session.downloaded_bytes(),
                resume_state: job.session.dumped_state(),
            })
            .collect()
    }

    /// Number of tracked jobs, pending removals included.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Last recorded state for a job.
    pub fn job_state(&self, id: JobId) -> Option<SessionState> {
        self.jobs.get(&id).map(|job| job.state)
    }

    fn is_pending(&self, id: JobId) -> bool {
        self.jobs.get(&id).map_or(false, |job| job.pending_removal)
    }

    /// Drop a job from the map and the order. Emits nothing; callers decide
    /// which event the removal surfaces as.
    fn detach(&mut self, id: JobId) {
        self.jobs.remove(&id);
        self.order.retain(|other| *other != id);
    }

    fn emit(&self, event: CoreEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Base name of the torrent file with any `.torrent` suffix stripped.
fn display_name(source: &Path) -> String {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| source.to_string_lossy().into_owned());

    if name.len() > 8 {
        if let Some(suffix) = name.get(name.len() - 8..) {
            if suffix.eq_ignore_ascii_case(".torrent") {
                return name[..name.len() - 8].to_string();
            }
        }
    }
    name
}

fn format_rate(bytes_per_second: u64) -> String {
    format!("{:.1} KB/s", bytes_per_second as f64 / 1024.0)
}
