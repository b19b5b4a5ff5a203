//! Session Store
//!
//! Server-owned home of every game session document. Each session lives in
//! a `watch` channel so subscribers always see the latest full document;
//! intermediate versions may be coalesced. Every write is a transaction on
//! a draft copy: it either replaces the document and bumps `version`, or
//! fails and leaves the document untouched.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{debug, info};

use crate::core::rng::DeterministicRng;
use crate::game::error::{GameError, GameResult};
use crate::game::events::{GameEvent, GameEventData};
use crate::game::state::{GameSession, Mutation};

/// Events buffered per session before slow subscribers start lagging.
pub const EVENT_CAPACITY: usize = 256;

// =============================================================================
// SESSION HANDLE
// =============================================================================

struct SessionSlot {
    code: String,
    state: watch::Sender<GameSession>,
    events: broadcast::Sender<GameEvent>,
    rng: Mutex<DeterministicRng>,
    closed: AtomicBool,
}

/// Shared handle to one session.
#[derive(Clone)]
pub struct SessionHandle(Arc<SessionSlot>);

impl SessionHandle {
    fn new(initial: GameSession, rng: DeterministicRng) -> Self {
        let (state, _) = watch::channel(initial.clone());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self(Arc::new(SessionSlot {
            code: initial.code,
            state,
            events,
            rng: Mutex::new(rng),
            closed: AtomicBool::new(false),
        }))
    }

    /// Game code.
    pub fn code(&self) -> &str {
        &self.0.code
    }

    /// Copy of the current document.
    pub fn read(&self) -> GameSession {
        self.0.state.borrow().clone()
    }

    /// Watch the document.
    pub fn subscribe(&self) -> watch::Receiver<GameSession> {
        self.0.state.subscribe()
    }

    /// Receive events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<GameEvent> {
        self.0.events.subscribe()
    }

    /// Whether the session has been removed from the store.
    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.0.closed.store(true, Ordering::Release);
    }

    /// Run `f` atomically against the document.
    ///
    /// `f` works on a draft; the draft replaces the document only if `f`
    /// succeeds. With `expected_version` set the transaction also fails with
    /// [`GameError::VersionConflict`] when someone else wrote first.
    pub fn transact<T>(
        &self,
        expected_version: Option<u64>,
        f: impl FnOnce(&mut GameSession) -> GameResult<T>,
    ) -> GameResult<T> {
        if self.is_closed() {
            return Err(GameError::StoreUnavailable);
        }

        let mut result = Err(GameError::StoreUnavailable);
        self.0.state.send_if_modified(|doc| {
            if let Some(expected) = expected_version {
                if doc.version != expected {
                    result = Err(GameError::VersionConflict { expected, actual: doc.version });
                    return false;
                }
            }

            let mut draft = doc.clone();
            match f(&mut draft) {
                Ok(value) => {
                    draft.version = doc.version + 1;
                    *doc = draft;
                    result = Ok(value);
                    true
                }
                Err(e) => {
                    result = Err(e);
                    false
                }
            }
        });

        if let Err(e) = &result {
            debug!(code = %self.code(), error = %e, "Transaction rejected");
        }
        result
    }

    /// [`transact`](Self::transact) with the session's RNG.
    pub fn transact_with_rng<T>(
        &self,
        expected_version: Option<u64>,
        f: impl FnOnce(&mut GameSession, &mut DeterministicRng) -> GameResult<T>,
    ) -> GameResult<T> {
        // RNG first, then the document; nothing takes them the other way round.
        let mut rng = self.0.rng.lock().map_err(|_| GameError::StoreUnavailable)?;
        self.transact(expected_version, |doc| f(doc, &mut *rng))
    }

    /// Use the session's RNG outside a transaction.
    pub fn with_rng<T>(&self, f: impl FnOnce(&mut DeterministicRng) -> T) -> GameResult<T> {
        let mut rng = self.0.rng.lock().map_err(|_| GameError::StoreUnavailable)?;
        Ok(f(&mut *rng))
    }

    /// Publish an event to current subscribers. Returns how many got it.
    pub fn publish(&self, data: GameEventData) -> usize {
        let event = GameEvent::new(self.code(), Utc::now(), data);
        // No subscribers is fine.
        self.0.events.send(event).unwrap_or(0)
    }
}

// =============================================================================
// SESSION STORE
// =============================================================================

/// All live sessions, keyed by game code.
pub struct SessionStore {
    sessions: RwLock<BTreeMap<String, SessionHandle>>,
}

/// Codes are case-insensitive on input.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

impl SessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a new session under its code.
    pub async fn create_session(&self, initial: GameSession) -> GameResult<SessionHandle> {
        let code = initial.code.clone();
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&code) {
            return Err(GameError::CodeTaken(code));
        }

        let entropy = uuid::Uuid::new_v4();
        let rng = DeterministicRng::for_game(&code, entropy.as_bytes());
        let handle = SessionHandle::new(initial, rng);
        sessions.insert(code.clone(), handle.clone());

        info!(code = %code, sessions = sessions.len(), "Session created");
        Ok(handle)
    }

    /// Look a session up.
    pub async fn find_by_code(&self, code: &str) -> GameResult<SessionHandle> {
        let code = normalize_code(code);
        let sessions = self.sessions.read().await;
        sessions.get(&code).cloned().ok_or(GameError::NotFound(code))
    }

    /// Watch a session's document.
    pub async fn subscribe(&self, code: &str) -> GameResult<watch::Receiver<GameSession>> {
        Ok(self.find_by_code(code).await?.subscribe())
    }

    /// Copy of a session's current document.
    pub async fn read_once(&self, code: &str) -> GameResult<GameSession> {
        Ok(self.find_by_code(code).await?.read())
    }

    /// Apply a raw mutation, optionally conditional on `expected_version`.
    /// Returns the new document.
    pub async fn mutate(
        &self,
        code: &str,
        mutation: Mutation,
        expected_version: Option<u64>,
    ) -> GameResult<GameSession> {
        let handle = self.find_by_code(code).await?;
        handle.transact(expected_version, |doc| {
            doc.apply(mutation);
            let mut next = doc.clone();
            next.version += 1;
            Ok(next)
        })
    }

    /// Atomic read-modify-write on a session.
    pub async fn transact<T>(
        &self,
        code: &str,
        expected_version: Option<u64>,
        f: impl FnOnce(&mut GameSession) -> GameResult<T>,
    ) -> GameResult<T> {
        self.find_by_code(code).await?.transact(expected_version, f)
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Remove sessions that ended more than `ended_ttl` ago, and sessions
    /// that never ended but saw no activity for `idle_ttl`. Outstanding
    /// handles of removed sessions fail from then on. Returns their codes.
    pub async fn cleanup(
        &self,
        ended_ttl: ChronoDuration,
        idle_ttl: ChronoDuration,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let mut sessions = self.sessions.write().await;

        let expired: Vec<String> = sessions.iter()
            .filter(|(code, handle)| {
                let doc = handle.0.state.borrow();
                if doc.ended {
                    doc.ended_at.map_or(true, |at| now - at >= ended_ttl)
                } else if now - doc.last_activity() >= idle_ttl {
                    debug!(code = %code, started = doc.started, "Dropping abandoned session");
                    true
                } else {
                    false
                }
            })
            .map(|(code, _)| code.clone())
            .collect();

        for code in &expired {
            if let Some(handle) = sessions.remove(code) {
                handle.close();
            }
        }

        if !expired.is_empty() {
            info!(removed = expired.len(), remaining = sessions.len(), "Cleaned up sessions");
        }
        expired
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
