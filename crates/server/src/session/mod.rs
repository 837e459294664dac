//! Per-connection session table.
//!
//! The table lock only guards the map; per-session fields sit behind a small
//! per-session mutex, and the score is a plain atomic so the per-tick
//! propulsion pass can read it without taking any lock.

mod state;

pub use state::SessionState;

use protocol::ServerMessage;
use rand::Rng;
use rapier2d::prelude::RigidBodyHandle;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;

/// Opaque session identifier handed to the transport layer.
pub type SessionId = u64;

/// Errors returned synchronously to the caller of a session operation.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,
    #[error("user already logged")]
    AlreadyLogged,
    #[error("not logged user wants to play")]
    NotLogged,
    #[error("not playing user wants to stop playing")]
    NotPlaying,
}

/// The rectangle a client declared visible, plus its heading.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub xx: f32,
    pub yy: f32,
    pub angle: f32,
    pub turbo: bool,
}

#[derive(Debug)]
struct SessionInner {
    user_name: String,
    state: SessionState,
    viewport: Viewport,
    last_broadcast: Instant,
    /// Present iff the session is playing or the body's destruction is
    /// still pending in the world.
    body: Option<RigidBodyHandle>,
    /// Receiver half of the outbound queue, handed to the transport once.
    outbound_rx: Option<mpsc::Receiver<ServerMessage>>,
}

/// One connected viewer.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    score: AtomicU64,
    outbound: mpsc::Sender<ServerMessage>,
    inner: Mutex<SessionInner>,
}

impl Session {
    fn new(id: SessionId, start_score: u64, outbound_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(outbound_capacity);
        Self {
            id,
            score: AtomicU64::new(start_score),
            outbound: tx,
            inner: Mutex::new(SessionInner {
                user_name: String::new(),
                state: SessionState::NotLogged,
                viewport: Viewport::default(),
                last_broadcast: Instant::now(),
                body: None,
                outbound_rx: Some(rx),
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn login(&self, user_name: &str) -> Result<(), SessionError> {
        let mut inner = self.inner();
        if inner.state != SessionState::NotLogged {
            return Err(SessionError::AlreadyLogged);
        }
        inner.state = SessionState::Logged;
        inner.user_name = user_name.to_string();
        Ok(())
    }

    pub fn user_name(&self) -> String {
        self.inner().user_name.clone()
    }

    pub fn is_logged(&self) -> bool {
        self.inner().state.is_logged()
    }

    pub fn is_playing(&self) -> bool {
        self.inner().state.is_playing()
    }

    pub fn can_receive_viewport_updates(&self) -> bool {
        self.inner().state.can_receive_viewport_updates()
    }

    pub fn start_playing(&self) -> Result<(), SessionError> {
        let mut inner = self.inner();
        if !inner.state.is_logged() {
            return Err(SessionError::NotLogged);
        }
        inner.state = SessionState::Playing;
        Ok(())
    }

    pub fn stop_playing(&self) -> Result<(), SessionError> {
        let mut inner = self.inner();
        if !inner.state.is_playing() {
            return Err(SessionError::NotPlaying);
        }
        inner.state = SessionState::Logged;
        Ok(())
    }

    pub fn score(&self) -> u64 {
        self.score.load(Ordering::Relaxed)
    }

    pub fn set_score(&self, score: u64) {
        self.score.store(score, Ordering::Relaxed);
    }

    pub fn inc_score(&self, delta: u64) {
        self.score.fetch_add(delta, Ordering::Relaxed);
    }

    /// Viewport updates from sessions that are not playing are ignored, not
    /// rejected: stale clients keep streaming them after their cookie dies.
    pub fn update_viewport(&self, viewport: Viewport) {
        let mut inner = self.inner();
        if inner.state.can_receive_viewport_updates() {
            inner.viewport = viewport;
        }
    }

    /// The current viewport, or `None` unless the session is playing.
    pub fn viewport(&self) -> Option<Viewport> {
        let inner = self.inner();
        inner
            .state
            .can_receive_viewport_updates()
            .then_some(inner.viewport)
    }

    pub fn set_body(&self, handle: RigidBodyHandle) {
        self.inner().body = Some(handle);
    }

    pub fn take_body(&self) -> Option<RigidBodyHandle> {
        self.inner().body.take()
    }

    pub fn body(&self) -> Option<RigidBodyHandle> {
        self.inner().body
    }

    /// If the session is playing and its last snapshot is older than
    /// `period`, refresh the stamp and return the viewport to query.
    pub fn broadcast_due(&self, period: Duration) -> Option<Viewport> {
        let mut inner = self.inner();
        if !inner.state.can_receive_viewport_updates() {
            return None;
        }
        if inner.last_broadcast.elapsed() <= period {
            return None;
        }
        inner.last_broadcast = Instant::now();
        Some(inner.viewport)
    }

    /// Non-blocking push onto the outbound queue. Returns false when the
    /// queue is full or the receiver is gone; the caller decides whether
    /// that is worth a log line.
    pub fn push(&self, message: ServerMessage) -> bool {
        self.outbound.try_send(message).is_ok()
    }

    pub fn take_outbound(&self) -> Option<mpsc::Receiver<ServerMessage>> {
        self.inner().outbound_rx.take()
    }
}

/// The session table.
#[derive(Debug)]
pub struct Sessions {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    start_score: u64,
    outbound_capacity: usize,
}

impl Sessions {
    pub fn new(start_score: u64, outbound_capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            start_score,
            outbound_capacity,
        }
    }

    /// Create a session in the initial state and return its id.
    pub fn add(&self) -> SessionId {
        let id = random_id();
        let session = Arc::new(Session::new(id, self.start_score, self.outbound_capacity));
        self.write().insert(id, session);
        id
    }

    pub fn get(&self, id: SessionId) -> Result<Arc<Session>, SessionError> {
        self.read().get(&id).cloned().ok_or(SessionError::NotFound)
    }

    /// Remove the session row. Existing `Arc` holders finish their work, but
    /// no new operation can reach the session, which is what lets the
    /// outbound queue close cleanly.
    pub fn remove(&self, id: SessionId) -> Result<Arc<Session>, SessionError> {
        self.write().remove(&id).ok_or(SessionError::NotFound)
    }

    pub fn count(&self) -> usize {
        self.read().len()
    }

    /// Visit every session without holding the table lock during the visit.
    pub fn each(&self, mut f: impl FnMut(&Arc<Session>)) {
        let snapshot: Vec<Arc<Session>> = self.read().values().cloned().collect();
        for session in &snapshot {
            f(session);
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<SessionId, Arc<Session>>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<SessionId, Arc<Session>>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Browser clients keep ids in JS numbers, which lose integer precision past
/// 2^53; stay below it.
fn random_id() -> u64 {
    rand::rng().random::<u64>() >> 11
}
