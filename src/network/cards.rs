//! Card Store
//!
//! Private per-player cards, kept out of the shared session document.
//! With a card directory configured each card is also written to
//! `<dir>/<code>/<player>.json`, so rejoining never issues a new ticket.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::game::card::PlayerCard;
use crate::game::error::{GameError, GameResult};
use crate::network::session::SessionHandle;

type CardKey = (String, String);

struct CardEntry {
    card: PlayerCard,
    // Held across a card's file write so writes of one card land in order.
    writer: Arc<Mutex<()>>,
}

/// Store of player cards.
pub struct CardStore {
    cards: RwLock<BTreeMap<CardKey, CardEntry>>,
    dir: Option<PathBuf>,
}

/// File-system safe form of a name. Anything outside `[A-Za-z0-9-]`
/// becomes `_xx` per byte.
fn escape_component(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("_{:02x}", byte));
        }
    }
    out
}

impl CardStore {
    /// Cards held in memory only.
    pub fn in_memory() -> Self {
        Self {
            cards: RwLock::new(BTreeMap::new()),
            dir: None,
        }
    }

    /// Cards mirrored to JSON files under `dir`.
    pub fn persistent(dir: impl Into<PathBuf>) -> Self {
        Self {
            cards: RwLock::new(BTreeMap::new()),
            dir: Some(dir.into()),
        }
    }

    fn game_dir(&self, code: &str) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.join(escape_component(code)))
    }

    fn card_path(&self, code: &str, player: &str) -> Option<PathBuf> {
        self.game_dir(code)
            .map(|dir| dir.join(format!("{}.json", escape_component(player))))
    }

    async fn load(path: &Path) -> Option<PlayerCard> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read card");
                return None;
            }
        };

        match serde_json::from_slice::<PlayerCard>(&bytes) {
            Ok(card) => Some(card),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Discarding unreadable card");
                None
            }
        }
    }

    // Failing to persist is logged, not fatal: the in-memory card stays
    // authoritative for this process.
    async fn save(&self, code: &str, card: &PlayerCard) {
        let Some(path) = self.card_path(code, &card.player) else {
            return;
        };

        let result = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let json = serde_json::to_vec_pretty(card)?;
            tokio::fs::write(&path, json).await?;
            Ok::<_, std::io::Error>(())
        }.await;

        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Failed to persist card");
        }
    }

    /// The player's card, issuing one from the session's RNG if needed.
    ///
    /// Disk reads and writes happen outside the store lock.
    pub async fn get_or_issue(&self, session: &SessionHandle, player: &str) -> GameResult<PlayerCard> {
        let code = session.code();
        if let Some(card) = self.get(code, player).await {
            return Ok(card);
        }

        let restored = match self.card_path(code, player) {
            Some(path) => match Self::load(&path).await {
                Some(card) if card.player == player && card.ticket.validate().is_ok() => Some(card),
                Some(_) => {
                    warn!(path = %path.display(), "Stored card does not match, issuing a new one");
                    None
                }
                None => None,
            },
            None => None,
        };

        let writer = Arc::new(Mutex::new(()));
        let write_guard = writer.clone().lock_owned().await;
        let (card, issued) = {
            let mut cards = self.cards.write().await;
            let key = (code.to_string(), player.to_string());
            if let Some(entry) = cards.get(&key) {
                // Another request got here first.
                return Ok(entry.card.clone());
            }
            let (card, issued) = match restored {
                Some(card) => {
                    debug!(code = %code, player, "Card restored from disk");
                    (card, false)
                }
                None => (session.with_rng(|rng| PlayerCard::issue(player, rng))??, true),
            };
            cards.insert(key, CardEntry { card: card.clone(), writer });
            (card, issued)
        };

        if issued {
            self.save(code, &card).await;
            debug!(code = %code, player, "Card issued");
        }
        drop(write_guard);
        Ok(card)
    }

    /// The player's card, if issued.
    pub async fn get(&self, code: &str, player: &str) -> Option<PlayerCard> {
        let cards = self.cards.read().await;
        cards.get(&(code.to_string(), player.to_string())).map(|entry| entry.card.clone())
    }

    /// Toggle a mark on the player's card against the numbers called so far.
    pub async fn toggle_mark(
        &self,
        code: &str,
        player: &str,
        number: u8,
        drawn: &BTreeSet<u8>,
    ) -> GameResult<PlayerCard> {
        let key = (code.to_string(), player.to_string());
        let writer = {
            let cards = self.cards.read().await;
            let entry = cards.get(&key).ok_or_else(|| GameError::NotMember(player.to_string()))?;
            entry.writer.clone()
        };
        let _write_guard = writer.lock().await;

        let card = {
            let mut cards = self.cards.write().await;
            let entry = cards.get_mut(&key).ok_or_else(|| GameError::NotMember(player.to_string()))?;
            entry.card.toggle_mark(number, drawn)?;
            entry.card.clone()
        };

        self.save(code, &card).await;
        Ok(card)
    }

    /// Forget every card of a game, on disk too.
    pub async fn remove_game(&self, code: &str) -> usize {
        let mut cards = self.cards.write().await;
        let before = cards.len();
        cards.retain(|(game, _), _| game != code);
        let removed = before - cards.len();

        if let Some(dir) = self.game_dir(code) {
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %dir.display(), error = %e, "Failed to remove card directory");
                }
            }
        }
        removed
    }
}

impl Default for CardStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::game::state::{GameSession, RewardConfig};
    use crate::network::session::SessionStore;

    async fn session(store: &SessionStore) -> SessionHandle {
        let doc = GameSession::new("ABC123", "host", RewardConfig::default(), Utc::now());
        store.create_session(doc).await.unwrap()
    }

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("tambola-cards-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_escape_component() {
        assert_eq!(escape_component("alice"), "alice");
        assert_eq!(escape_component("a b"), "a_20b");
        assert_eq!(escape_component("../x"), "_2e_2e_2fx");
        assert_eq!(escape_component("a_b"), "a_5fb");
    }

    #[tokio::test]
    async fn test_get_or_issue_is_stable() {
        let store = SessionStore::new();
        let handle = session(&store).await;
        let cards = CardStore::in_memory();

        let first = cards.get_or_issue(&handle, "alice").await.unwrap();
        let again = cards.get_or_issue(&handle, "alice").await.unwrap();
        assert_eq!(first, again);
        assert_eq!(cards.get("ABC123", "alice").await, Some(first));
        assert_eq!(cards.get("ABC123", "bob").await, None);
    }

    #[tokio::test]
    async fn test_toggle_mark_needs_card() {
        let cards = CardStore::in_memory();
        let err = cards.toggle_mark("ABC123", "alice", 5, &BTreeSet::from([5])).await.unwrap_err();
        assert_eq!(err, GameError::NotMember("alice".into()));
    }

    #[tokio::test]
    async fn test_concurrent_marks_across_players() {
        let dir = temp_dir();
        let store = SessionStore::new();
        let handle = session(&store).await;
        let cards = CardStore::persistent(&dir);

        let players = ["alice", "bob", "carol", "dave"];
        let mut issued = Vec::new();
        for player in players {
            issued.push(cards.get_or_issue(&handle, player).await.unwrap());
        }
        let drawn: BTreeSet<u8> = issued.iter().flat_map(|c| c.ticket.numbers()).collect();

        let marks = issued.iter().flat_map(|card| {
            card.ticket.numbers().map(|n| (card.player.clone(), n)).collect::<Vec<_>>()
        });
        let results = futures_util::future::join_all(
            marks.map(|(player, n)| {
                let cards = &cards;
                let drawn = &drawn;
                async move { cards.toggle_mark("ABC123", &player, n, drawn).await }
            }),
        ).await;
        assert!(results.iter().all(|r| r.is_ok()));

        let reopened = CardStore::persistent(&dir);
        for player in players {
            let card = cards.get("ABC123", player).await.unwrap();
            assert_eq!(card.marked.len(), 15);
            assert_eq!(reopened.get_or_issue(&handle, player).await.unwrap(), card);
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_card_survives_restart() {
        let dir = temp_dir();
        let store = SessionStore::new();
        let handle = session(&store).await;

        let issued = {
            let cards = CardStore::persistent(&dir);
            let card = cards.get_or_issue(&handle, "alice").await.unwrap();
            let number = card.ticket.numbers().next().unwrap();
            cards.toggle_mark("ABC123", "alice", number, &BTreeSet::from([number])).await.unwrap()
        };
        assert_eq!(issued.marked.len(), 1);
        assert!(dir.join("ABC123").join("alice.json").exists());

        let reopened = CardStore::persistent(&dir);
        let restored = reopened.get_or_issue(&handle, "alice").await.unwrap();
        assert_eq!(restored, issued);

        assert_eq!(reopened.remove_game("ABC123").await, 1);
        assert!(!dir.join("ABC123").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
