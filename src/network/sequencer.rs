//! Draw Scheduler
//!
//! One cancellable task per session calls numbers on a fixed cadence. The
//! task stops for good once every number is out or the game ends; pausing
//! cancels it and resuming spawns a fresh one that waits out the remainder
//! of the interval.

use std::collections::BTreeMap;
use chrono::Utc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, instrument};

use crate::game::draw::{draw_next_if, DrawCadence, DrawOutcome};
use crate::game::error::GameError;
use crate::game::events::GameEventData;
use crate::network::session::SessionHandle;

struct DrawTask {
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Owns the draw task of every running session.
pub struct DrawScheduler {
    cadence: DrawCadence,
    tasks: Mutex<BTreeMap<String, DrawTask>>,
}

impl DrawScheduler {
    /// Create a scheduler with the given cadence.
    pub fn new(cadence: DrawCadence) -> Self {
        Self {
            cadence,
            tasks: Mutex::new(BTreeMap::new()),
        }
    }

    /// Draw cadence.
    pub fn cadence(&self) -> DrawCadence {
        self.cadence
    }

    /// Start calling numbers for a session.
    ///
    /// Returns `false` without doing anything if a task is already running.
    pub async fn start(&self, session: SessionHandle) -> bool {
        let code = session.code().to_string();
        let mut tasks = self.tasks.lock().await;
        if tasks.get(&code).is_some_and(|task| !task.handle.is_finished()) {
            debug!(code = %code, "Draw task already running");
            return false;
        }

        let (cancel, cancel_rx) = oneshot::channel();
        let handle = tokio::spawn(run_draw_loop(session, self.cadence, cancel_rx));
        tasks.insert(code, DrawTask { cancel, handle });
        true
    }

    /// Stop a session's task and wait for it to exit. Returns whether a
    /// running task was stopped.
    pub async fn cancel(&self, code: &str) -> bool {
        let task = self.tasks.lock().await.remove(code);
        let Some(task) = task else {
            return false;
        };

        let was_running = !task.handle.is_finished();
        let _ = task.cancel.send(());
        if let Err(e) = task.handle.await {
            warn!(code, error = %e, "Draw task failed");
        }
        was_running
    }

    /// Whether a session's task is running.
    pub async fn is_running(&self, code: &str) -> bool {
        let tasks = self.tasks.lock().await;
        tasks.get(code).is_some_and(|task| !task.handle.is_finished())
    }

    /// Stop every task.
    pub async fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        let count = tasks.len();
        for (_, task) in tasks {
            let _ = task.cancel.send(());
            let _ = task.handle.await;
        }
        info!(tasks = count, "Draw scheduler stopped");
    }
}

impl Default for DrawScheduler {
    fn default() -> Self {
        Self::new(DrawCadence::default())
    }
}

/// Call numbers until exhausted, ended or cancelled.
#[instrument(skip_all, fields(code = %session.code()))]
async fn run_draw_loop(
    session: SessionHandle,
    cadence: DrawCadence,
    mut cancel: oneshot::Receiver<()>,
) {
    loop {
        let snapshot = session.read();
        if !snapshot.started || snapshot.ended || snapshot.is_exhausted() {
            break;
        }

        let delay = cadence.next_delay(snapshot.last_draw_at, Utc::now());
        tokio::select! {
            _ = &mut cancel => {
                debug!("Draw task cancelled");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let expected = snapshot.drawn_numbers.len();
        let now = Utc::now();
        let outcome = session.transact_with_rng(None, |doc, rng| {
            let outcome = draw_next_if(doc, expected, rng, now)?;
            Ok((outcome, doc.numbers_remaining()))
        });

        match outcome {
            Ok((DrawOutcome::Drawn(number), remaining)) => {
                let next_draw_in_ms = (remaining > 0).then(|| cadence.interval.as_millis() as u64);
                session.publish(GameEventData::NumberDrawn { number, remaining, next_draw_in_ms });
                debug!(number, remaining, "Number drawn");

                if remaining == 0 {
                    session.publish(GameEventData::DrawsExhausted);
                    info!("All numbers drawn");
                    break;
                }
            }
            Ok((DrawOutcome::Exhausted, _)) => break,
            Err(GameError::DrawConflict { expected, actual }) => {
                warn!(expected, actual, "Stale draw skipped");
            }
            Err(GameError::NotStarted | GameError::AlreadyEnded | GameError::StoreUnavailable) => break,
            Err(e) => {
                warn!(error = %e, "Draw failed, stopping");
                break;
            }
        }
    }
    debug!("Draw task finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::game::state::{GameSession, RewardConfig};
    use crate::network::session::SessionStore;

    fn fast() -> DrawCadence {
        DrawCadence {
            interval: Duration::from_millis(2),
            min_delay: Duration::from_millis(1),
        }
    }

    async fn started(store: &SessionStore) -> SessionHandle {
        let doc = GameSession::new("ABC123", "host", RewardConfig::default(), Utc::now());
        let handle = store.create_session(doc).await.unwrap();
        handle.transact(None, |doc| doc.start("host")).unwrap();
        handle
    }

    #[tokio::test]
    async fn test_draws_until_exhausted() {
        let store = SessionStore::new();
        let session = started(&store).await;
        let mut events = session.subscribe_events();
        let scheduler = DrawScheduler::new(fast());

        assert!(scheduler.start(session.clone()).await);

        let mut drawn = Vec::new();
        let result = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match events.recv().await.unwrap().data {
                    GameEventData::NumberDrawn { number, .. } => drawn.push(number),
                    GameEventData::DrawsExhausted => break,
                    other => panic!("unexpected event {other:?}"),
                }
            }
        }).await;
        assert!(result.is_ok(), "draws did not finish");

        let doc = session.read();
        assert_eq!(drawn.len(), 90);
        assert!(doc.is_exhausted());
        assert_eq!(doc.current_number, drawn.last().copied());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!scheduler.is_running("ABC123").await);
    }

    #[tokio::test]
    async fn test_second_start_is_noop() {
        let store = SessionStore::new();
        let session = started(&store).await;
        let scheduler = DrawScheduler::new(DrawCadence {
            interval: Duration::from_secs(60),
            min_delay: Duration::from_millis(100),
        });

        assert!(scheduler.start(session.clone()).await);
        assert!(!scheduler.start(session.clone()).await);
        assert!(scheduler.is_running("ABC123").await);

        assert!(scheduler.cancel("ABC123").await);
        assert!(!scheduler.is_running("ABC123").await);
        assert!(session.read().drawn_numbers.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_stops_draws() {
        let store = SessionStore::new();
        let session = started(&store).await;
        let scheduler = DrawScheduler::new(fast());

        scheduler.start(session.clone()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        scheduler.cancel("ABC123").await;

        let count = session.read().drawn_numbers.len();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(session.read().drawn_numbers.len(), count);
        assert!(!scheduler.cancel("ABC123").await);
    }

    #[tokio::test]
    async fn test_not_started_game_draws_nothing() {
        let store = SessionStore::new();
        let doc = GameSession::new("LOBBY1", "host", RewardConfig::default(), Utc::now());
        let session = store.create_session(doc).await.unwrap();
        let scheduler = DrawScheduler::new(fast());

        scheduler.start(session.clone()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!scheduler.is_running("LOBBY1").await);
        assert!(session.read().drawn_numbers.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_all() {
        let store = SessionStore::new();
        let session = started(&store).await;
        let scheduler = DrawScheduler::new(DrawCadence {
            interval: Duration::from_secs(60),
            min_delay: Duration::from_millis(100),
        });

        scheduler.start(session).await;
        scheduler.shutdown().await;
        assert!(!scheduler.is_running("ABC123").await);
    }
}
