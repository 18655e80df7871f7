//! Stub engine and session used by registry and facade tests.

use crate::engine::{
    EngineError, EventSink, SessionEventReceiver, TorrentEngine, TorrentSession,
};
use crate::limiter::RateLimiter;
use crate::persistence::SaveScheduler;
use crate::registry::JobRegistry;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use torman_types::{CoreEvent, SessionState};

/// Commands a stub session has received, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    SetDestination(PathBuf),
    SeedResumeState(Vec<u8>),
    SetUploadedBytes(u64),
    SetDownloadedBytes(u64),
    Start,
    Stop,
    SetPaused(bool),
}

/// Record of one session the stub engine created.
#[derive(Clone)]
pub struct CreatedSession {
    pub source: PathBuf,
    pub events: EventSink,
    commands: Arc<Mutex<Vec<SessionCommand>>>,
}

impl CreatedSession {
    pub fn commands(&self) -> Vec<SessionCommand> {
        self.commands.lock().clone()
    }
}

/// Engine that records every created session and rejects sources whose file
/// name starts with "bad".
#[derive(Default)]
pub struct StubEngine {
    created: Mutex<Vec<CreatedSession>>,
}

impl StubEngine {
    pub fn created(&self) -> Vec<CreatedSession> {
        self.created.lock().clone()
    }
}

impl TorrentEngine for StubEngine {
    type Session = StubSession;

    fn create_session(
        &self,
        source: &Path,
        events: EventSink,
        _limiter: RateLimiter,
    ) -> Result<Self::Session, EngineError> {
        let rejects = source
            .file_name()
            .map(|n| n.to_string_lossy().starts_with("bad"))
            .unwrap_or(false);
        if rejects {
            return Err(EngineError(format!("cannot parse {}", source.display())));
        }

        let commands = Arc::new(Mutex::new(Vec::new()));
        self.created.lock().push(CreatedSession {
            source: source.to_path_buf(),
            events,
            commands: commands.clone(),
        });

        Ok(StubSession {
            commands,
            uploaded: 0,
            downloaded: 0,
            resume: Vec::new(),
        })
    }
}

pub struct StubSession {
    commands: Arc<Mutex<Vec<SessionCommand>>>,
    uploaded: u64,
    downloaded: u64,
    resume: Vec<u8>,
}

impl TorrentSession for StubSession {
    fn set_destination(&mut self, path: &Path) {
        self.commands
            .lock()
            .push(SessionCommand::SetDestination(path.to_path_buf()));
    }

    fn seed_resume_state(&mut self, blob: &[u8]) {
        self.resume = blob.to_vec();
        self.commands
            .lock()
            .push(SessionCommand::SeedResumeState(blob.to_vec()));
    }

    fn set_uploaded_bytes(&mut self, bytes: u64) {
        self.uploaded = bytes;
        self.commands
            .lock()
            .push(SessionCommand::SetUploadedBytes(bytes));
    }

    fn set_downloaded_bytes(&mut self, bytes: u64) {
        self.downloaded = bytes;
        self.commands
            .lock()
            .push(SessionCommand::SetDownloadedBytes(bytes));
    }

    fn start(&mut self) {
        self.commands.lock().push(SessionCommand::Start);
    }

    fn stop(&mut self) {
        self.commands.lock().push(SessionCommand::Stop);
    }

    fn set_paused(&mut self, paused: bool) {
        self.commands.lock().push(SessionCommand::SetPaused(paused));
    }

    fn uploaded_bytes(&self) -> u64 {
        self.uploaded
    }

    fn downloaded_bytes(&self) -> u64 {
        self.downloaded
    }

    fn dumped_state(&self) -> Vec<u8> {
        self.resume.clone()
    }

    fn current_state(&self) -> SessionState {
        SessionState::Preparing
    }
}

/// Everything a registry test needs besides the registry itself.
pub struct Harness {
    pub engine: Arc<StubEngine>,
    pub events: broadcast::Receiver<CoreEvent>,
    /// Kept alive so session events have somewhere to go.
    pub session_rx: SessionEventReceiver,
    pub saver: SaveScheduler,
}

/// Build a registry wired to a stub engine and fresh channels.
pub fn harness() -> (JobRegistry<StubEngine>, Harness) {
    let engine = Arc::new(StubEngine::default());
    let (event_tx, events) = broadcast::channel(256);
    let (session_tx, session_rx) = mpsc::unbounded_channel();
    let saver = SaveScheduler::new();

    let registry = JobRegistry::new(
        engine.clone(),
        RateLimiter::new(),
        session_tx,
        event_tx,
        saver.clone(),
    );

    (
        registry,
        Harness {
            engine,
            events,
            session_rx,
            saver,
        },
    )
}
