//! Engine-agnostic session contract
//!
//! The registry never talks to a concrete torrent implementation. It issues
//! commands through [`TorrentSession`] and receives progress out of band
//! through the [`EventSink`] handed to the engine at session creation.

use crate::limiter::RateLimiter;
use std::path::Path;
use thiserror::Error;
use tokio::sync::mpsc;
use torman_types::{JobId, SessionEvent, SessionState};
use tracing::debug;

/// The engine could not parse or accept a torrent definition.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct EngineError(pub String);

/// Sending half of the session event channel, shared by all sessions.
pub type SessionEventSender = mpsc::UnboundedSender<(JobId, SessionEvent)>;
/// Receiving half, consumed by the core's reactor task.
pub type SessionEventReceiver = mpsc::UnboundedReceiver<(JobId, SessionEvent)>;

/// Job-bound handle a session uses to report events back to the registry.
///
/// Events sent through the same sink are delivered in order. Sending after
/// the core has shut down is harmless.
#[derive(Clone)]
pub struct EventSink {
    id: JobId,
    tx: SessionEventSender,
}

impl EventSink {
    pub(crate) fn new(id: JobId, tx: SessionEventSender) -> Self {
        Self { id, tx }
    }

    pub fn job_id(&self) -> JobId {
        self.id
    }

    pub fn emit(&self, event: SessionEvent) {
        if self.tx.send((self.id, event)).is_err() {
            debug!(id = %self.id, "session event dropped, core is gone");
        }
    }
}

/// Factory for torrent sessions.
pub trait TorrentEngine: Send + Sync + 'static {
    type Session: TorrentSession;

    /// Parse the torrent definition at `source` and create a session for it.
    ///
    /// The session must report its lifecycle through `events` and throttle
    /// its I/O against `limiter`. A parse failure is returned here; failures
    /// after creation arrive as [`SessionEvent::Failed`].
    fn create_session(
        &self,
        source: &Path,
        events: EventSink,
        limiter: RateLimiter,
    ) -> Result<Self::Session, EngineError>;
}

impl<E: TorrentEngine> TorrentEngine for std::sync::Arc<E> {
    type Session = E::Session;

    fn create_session(
        &self,
        source: &Path,
        events: EventSink,
        limiter: RateLimiter,
    ) -> Result<Self::Session, EngineError> {
        (**self).create_session(source, events, limiter)
    }
}

/// One running torrent transfer.
///
/// Commands are fire-and-forget: the caller returns immediately and learns
/// the outcome from the session's events. The engine drives all state
/// transitions; the registry only records what is reported.
pub trait TorrentSession: Send + 'static {
    fn set_destination(&mut self, path: &Path);

    /// Seed the session with a previously dumped resume snapshot.
    fn seed_resume_state(&mut self, blob: &[u8]);

    /// Restore the accumulated byte counters from a previous run.
    fn set_uploaded_bytes(&mut self, bytes: u64);
    fn set_downloaded_bytes(&mut self, bytes: u64);

    fn start(&mut self);
    fn stop(&mut self);
    fn set_paused(&mut self, paused: bool);

    fn uploaded_bytes(&self) -> u64;
    fn downloaded_bytes(&self) -> u64;

    /// Dump a resumable snapshot of the transfer, opaque to the caller.
    fn dumped_state(&self) -> Vec<u8>;

    fn current_state(&self) -> SessionState;
}
