//! Shared types for Torman
//!
//! This crate contains the data structures shared between the core
//! library, engine implementations, and any front end consuming the
//! job snapshots.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

// ============================================================================
// Job Identity
// ============================================================================

/// Stable identifier for a tracked job.
///
/// Assigned by the registry when a job is added and never reused. Jobs are
/// always addressed by id rather than by list position, so a job can be
/// looked up safely even while other jobs are being removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Direction to move a job in the priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveDirection {
    Up,
    Down,
}

// ============================================================================
// Session Types
// ============================================================================

/// State of a torrent session, as reported by the engine.
///
/// The registry never forces a state; it only issues commands and records
/// the transitions the engine reports. `Stopped` and `Failed` are terminal
/// for a session instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Preparing,
    Downloading,
    Uploading,
    Idle,
    Paused,
    Stopped,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Failed)
    }

    /// Whether a pause toggle is a valid command in this state.
    ///
    /// Valid once the session has left `Preparing` and before it reaches a
    /// terminal state.
    pub fn can_toggle_pause(&self) -> bool {
        matches!(
            self,
            SessionState::Downloading
                | SessionState::Uploading
                | SessionState::Idle
                | SessionState::Paused
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Preparing => "Preparing",
            SessionState::Downloading => "Downloading",
            SessionState::Uploading => "Uploading",
            SessionState::Idle => "Idle",
            SessionState::Paused => "Paused",
            SessionState::Stopped => "Stopped",
            SessionState::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Kind of failure reported by the engine for a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionErrorKind {
    Parse,
    Tracker,
    File,
    Protocol,
    Timeout,
    Unknown,
}

/// An asynchronous failure reported by the engine, with its own message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionError {
    pub kind: SessionErrorKind,
    pub message: String,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Events emitted by a session, delivered in order per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    StateChanged(SessionState),
    ProgressUpdated(u8),
    PeerInfoUpdated { connected: u32, seeds: u32 },
    DownloadRateSampled(u64),
    UploadRateSampled(u64),
    Stopped,
    Failed(SessionError),
}

// ============================================================================
// Presentation Types
// ============================================================================

/// One row of the ordered job list, ready for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub display_name: String,
    /// "connected/seeds" peer counts.
    pub peer_summary: String,
    pub progress_percent: u8,
    pub download_rate_text: String,
    pub upload_rate_text: String,
    pub state_text: String,
}

// ============================================================================
// Event Types
// ============================================================================

/// Events emitted by the core to its consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    JobAdded {
        id: JobId,
        name: String,
    },
    JobRemoved {
        id: JobId,
    },
    JobStateChanged {
        id: JobId,
        state: SessionState,
    },
    JobProgress {
        id: JobId,
        percent: u8,
    },
    /// Peer counts or rate samples changed; fetch a fresh snapshot.
    JobUpdated {
        id: JobId,
    },
    /// A running session failed and its job was dropped from the registry.
    SessionFailed {
        id: JobId,
        name: String,
        message: String,
    },
}

// ============================================================================
// Persisted State
// ============================================================================

/// The full persisted document, written as one overwrite per save.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedState {
    pub last_directory: PathBuf,
    pub upload_limit_control: u16,
    pub download_limit_control: u16,
    #[serde(default)]
    pub torrents: Vec<SavedJob>,
}

impl Default for SavedState {
    fn default() -> Self {
        Self {
            last_directory: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            upload_limit_control: DEFAULT_LIMIT_CONTROL,
            download_limit_control: DEFAULT_LIMIT_CONTROL,
            torrents: Vec::new(),
        }
    }
}

/// One persisted job record. The position in `SavedState::torrents` defines
/// the job's priority order on restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedJob {
    pub source_file_name: PathBuf,
    pub destination_folder: PathBuf,
    pub uploaded_bytes: u64,
    pub downloaded_bytes: u64,
    /// Opaque engine snapshot allowing the transfer to resume without
    /// renegotiating from scratch.
    #[serde(default)]
    pub resume_state: Vec<u8>,
}

/// Default slider position for both rate controls: the midpoint of the
/// control range.
pub const DEFAULT_LIMIT_CONTROL: u16 = 500;
