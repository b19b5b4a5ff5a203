//! WebSocket Game Server
//!
//! Async WebSocket server for Tambola games.
//! Routes client messages to the session store, issues cards, drives the
//! draw scheduler and fans session changes back out to every client.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::core::rng::DeterministicRng;
use crate::game::arbitration;
use crate::game::claims::ClaimKind;
use crate::game::draw::DrawCadence;
use crate::game::error::GameError;
use crate::game::events::GameEventData;
use crate::game::scoring;
use crate::game::state::{ClaimStatus, GameSession, Mutation, RewardConfig, SessionFields};
use crate::network::cards::CardStore;
use crate::network::protocol::{ClientMessage, ErrorCode, JoinedInfo, ServerError, ServerMessage};
use crate::network::sequencer::DrawScheduler;
use crate::network::session::{SessionHandle, SessionStore};
use crate::{DEFAULT_DRAW_INTERVAL_MS, MIN_DRAW_DELAY_MS};

/// Attempts at finding an unused game code.
const MAX_CODE_ATTEMPTS: usize = 16;

/// Outgoing messages buffered per client.
const CLIENT_BUFFER: usize = 64;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Connections silent for this long are closed, unless seated in a
    /// game that is in play.
    pub idle_timeout: Duration,
    /// Number calling cadence.
    pub cadence: DrawCadence,
    /// Where cards are persisted; in memory only when unset.
    pub card_dir: Option<PathBuf>,
    /// How long ended sessions are kept around.
    pub ended_session_ttl: Duration,
    /// How long a session that never ends may go without activity.
    pub idle_session_ttl: Duration,
    /// How often the cleanup loop runs.
    pub cleanup_interval: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            cadence: DrawCadence::default(),
            card_dir: None,
            ended_session_ttl: Duration::from_secs(600),
            idle_session_ttl: Duration::from_secs(2 * 60 * 60),
            cleanup_interval: Duration::from_secs(60),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "Ignoring invalid setting");
            default
        }),
        Err(_) => default,
    }
}

impl ServerConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_or("TAMBOLA_BIND_ADDR", defaults.bind_addr),
            max_connections: env_or("TAMBOLA_MAX_CONNECTIONS", defaults.max_connections),
            cadence: DrawCadence {
                interval: Duration::from_millis(env_or("TAMBOLA_DRAW_INTERVAL_MS", DEFAULT_DRAW_INTERVAL_MS)),
                min_delay: Duration::from_millis(env_or("TAMBOLA_MIN_DRAW_DELAY_MS", MIN_DRAW_DELAY_MS)),
            },
            card_dir: std::env::var("TAMBOLA_CARD_DIR").ok()
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from),
            ended_session_ttl: Duration::from_secs(
                env_or("TAMBOLA_ENDED_SESSION_TTL_SECS", defaults.ended_session_ttl.as_secs()),
            ),
            idle_session_ttl: Duration::from_secs(
                env_or("TAMBOLA_IDLE_SESSION_TTL_SECS", defaults.idle_session_ttl.as_secs()),
            ),
            ..defaults
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Game rule or store error.
    #[error("Game error: {0}")]
    Game(#[from] GameError),
}

// =============================================================================
// SERVER STATE
// =============================================================================

/// Which game a connection plays in, and as whom.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Seat {
    code: String,
    player: String,
}

/// Connected client state.
struct ConnectedClient {
    /// Current game, once created or joined.
    seat: Option<Seat>,
    /// Connection time.
    connected_at: Instant,
    /// Task relaying session updates to this client.
    forwarder: Option<JoinHandle<()>>,
}

/// State shared by every connection task.
struct ServerState {
    config: ServerConfig,
    sessions: SessionStore,
    cards: CardStore,
    scheduler: DrawScheduler,
    clients: RwLock<BTreeMap<SocketAddr, ConnectedClient>>,
    code_rng: Mutex<DeterministicRng>,
}

impl ServerState {
    fn new(config: ServerConfig) -> Self {
        let cards = match &config.card_dir {
            Some(dir) => CardStore::persistent(dir),
            None => CardStore::in_memory(),
        };
        Self {
            sessions: SessionStore::new(),
            cards,
            scheduler: DrawScheduler::new(config.cadence),
            clients: RwLock::new(BTreeMap::new()),
            code_rng: Mutex::new(DeterministicRng::from_entropy()),
            config,
        }
    }

    async fn register_client(&self, addr: SocketAddr) {
        let mut clients = self.clients.write().await;
        clients.insert(addr, ConnectedClient {
            seat: None,
            connected_at: Instant::now(),
            forwarder: None,
        });
    }

    async fn seat(&self, addr: SocketAddr) -> Result<Seat, ServerError> {
        let clients = self.clients.read().await;
        clients.get(&addr)
            .and_then(|c| c.seat.clone())
            .ok_or_else(|| ServerError::new(ErrorCode::NotInGame, "join a game first"))
    }

    async fn seated_session(&self, addr: SocketAddr) -> Result<(Seat, SessionHandle), ServerError> {
        let seat = self.seat(addr).await?;
        let handle = self.sessions.find_by_code(&seat.code).await?;
        Ok((seat, handle))
    }

    /// Whether the client is seated in a game that has started and not
    /// ended. Such clients are watching calls and may stay silent.
    async fn is_watching(&self, addr: SocketAddr) -> bool {
        let Ok((_, session)) = self.seated_session(addr).await else {
            return false;
        };
        let doc = session.read();
        doc.started && !doc.ended
    }

    /// Drop expired sessions together with their draw tasks and cards.
    async fn sweep_sessions(&self, now: DateTime<Utc>) -> Vec<String> {
        let ended_ttl = ChronoDuration::from_std(self.config.ended_session_ttl)
            .unwrap_or_else(|_| ChronoDuration::seconds(600));
        let idle_ttl = ChronoDuration::from_std(self.config.idle_session_ttl)
            .unwrap_or_else(|_| ChronoDuration::hours(2));

        let removed = self.sessions.cleanup(ended_ttl, idle_ttl, now).await;
        for code in &removed {
            self.scheduler.cancel(code).await;
            let cards = self.cards.remove_game(code).await;
            debug!(code = %code, cards, "Removed expired game");
        }
        removed
    }

    fn next_code(&self) -> Result<String, GameError> {
        let mut rng = self.code_rng.lock().map_err(|_| GameError::StoreUnavailable)?;
        Ok(rng.game_code())
    }
}

/// Relay document snapshots and events of one session to one client.
fn spawn_forwarder(session: &SessionHandle, sender: mpsc::Sender<ServerMessage>) -> JoinHandle<()> {
    let mut doc_rx = session.subscribe();
    let mut events_rx = session.subscribe_events();

    tokio::spawn(async move {
        let first = doc_rx.borrow_and_update().clone();
        if sender.send(ServerMessage::Snapshot { session: first }).await.is_err() {
            return;
        }

        loop {
            tokio::select! {
                changed = doc_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    // Intermediate versions may be skipped; the latest is what counts.
                    let session = doc_rx.borrow_and_update().clone();
                    if sender.send(ServerMessage::Snapshot { session }).await.is_err() {
                        break;
                    }
                }
                event = events_rx.recv() => {
                    match event {
                        Ok(event) => {
                            if sender.send(ServerMessage::Event(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Client fell behind on events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    })
}

fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

// =============================================================================
// GAME SERVER
// =============================================================================

/// The game server.
pub struct GameServer {
    /// Shared state.
    state: Arc<ServerState>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            state: Arc::new(ServerState::new(config)),
            shutdown_tx,
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Run the server.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.state.config.bind_addr).await?;
        info!("Game server listening on {}", self.state.config.bind_addr);

        // Spawn cleanup task
        let cleanup_state = self.state.clone();
        let cleanup_handle = tokio::spawn(async move {
            Self::run_cleanup_loop(cleanup_state).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.state.clients.read().await.len();
                            if clients_count >= self.state.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        cleanup_handle.abort();
        self.state.scheduler.shutdown().await;

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let state = self.state.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(CLIENT_BUFFER);

            state.register_client(addr).await;

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        let _ = msg_tx.send(ServerMessage::Error(ServerError::new(
                                            ErrorCode::InvalidInput,
                                            "Invalid message format",
                                        ))).await;
                                        continue;
                                    }
                                };

                                Self::handle_client_message(addr, client_msg, &state, &msg_tx).await;
                            }
                            Some(Ok(Message::Binary(_))) => {
                                let _ = msg_tx.send(ServerMessage::Error(ServerError::new(
                                    ErrorCode::InvalidInput,
                                    "Binary frames are not supported",
                                ))).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = tokio::time::sleep(state.config.idle_timeout) => {
                        if state.is_watching(addr).await {
                            continue;
                        }
                        info!("Closing idle client {}", addr);
                        break;
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Cleanup
            let removed = {
                let mut clients = state.clients.write().await;
                clients.remove(&addr)
            };
            if let Some(client) = &removed {
                if let Some(forwarder) = &client.forwarder {
                    forwarder.abort();
                }
            }

            // Let queued messages (e.g. shutdown) flush before closing.
            drop(msg_tx);
            let _ = tokio::time::timeout(Duration::from_secs(1), sender_task).await;

            if let Some(client) = removed {
                info!("Client {} cleaned up after {:?}", addr, client.connected_at.elapsed());
            }
        });
    }

    /// Handle a client message, reporting failures back to the client.
    async fn handle_client_message(
        addr: SocketAddr,
        msg: ClientMessage,
        state: &Arc<ServerState>,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let result = match msg {
            ClientMessage::CreateGame { name, config } => {
                Self::handle_create_game(addr, name, config, state, sender).await
            }
            ClientMessage::JoinGame { code, name } => {
                Self::handle_join_game(addr, code, name, state, sender).await
            }
            ClientMessage::Configure { config } => {
                Self::handle_configure(addr, config, state).await
            }
            ClientMessage::StartGame => {
                Self::handle_start_game(addr, state).await
            }
            ClientMessage::Mark { number } => {
                Self::handle_mark(addr, number, state, sender).await
            }
            ClientMessage::SubmitClaim { kind } => {
                Self::handle_submit_claim(addr, kind, state, sender).await
            }
            ClientMessage::VerifyClaim { index } => {
                Self::handle_decide_claim(addr, index, true, state, sender).await
            }
            ClientMessage::RejectClaim { index } => {
                Self::handle_decide_claim(addr, index, false, state, sender).await
            }
            ClientMessage::PauseDraws => {
                Self::handle_pause_draws(addr, state).await
            }
            ClientMessage::ResumeDraws => {
                Self::handle_resume_draws(addr, state).await
            }
            ClientMessage::EndGame => {
                Self::handle_end_game(addr, state).await
            }
            ClientMessage::SyncRequest => {
                Self::handle_sync(addr, state, sender).await
            }
            ClientMessage::Ping { timestamp } => {
                let _ = sender.send(ServerMessage::Pong {
                    timestamp,
                    server_time: now_millis(),
                }).await;
                Ok(())
            }
            ClientMessage::Leave => {
                Self::handle_leave(addr, state).await;
                Ok(())
            }
        };

        if let Err(e) = result {
            debug!("Request from {} failed: {:?} {}", addr, e.code, e.message);
            let _ = sender.send(ServerMessage::Error(e)).await;
        }
    }

    /// Seat the client in a session: issue its card, confirm, start relaying.
    async fn attach(
        addr: SocketAddr,
        session: &SessionHandle,
        player: &str,
        state: &Arc<ServerState>,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> Result<(), ServerError> {
        let card = state.cards.get_or_issue(session, player).await?;
        let is_host = session.read().is_host(player);

        Self::handle_leave(addr, state).await;

        let _ = sender.send(ServerMessage::Joined(JoinedInfo {
            code: session.code().to_string(),
            player: player.to_string(),
            is_host,
            ticket: card.ticket,
            marked: card.marked,
        })).await;

        let forwarder = spawn_forwarder(session, sender.clone());
        let mut clients = state.clients.write().await;
        match clients.get_mut(&addr) {
            Some(client) => {
                client.seat = Some(Seat {
                    code: session.code().to_string(),
                    player: player.to_string(),
                });
                client.forwarder = Some(forwarder);
            }
            None => forwarder.abort(),
        }
        Ok(())
    }

    /// Handle game creation.
    async fn handle_create_game(
        addr: SocketAddr,
        name: String,
        config: Option<RewardConfig>,
        state: &Arc<ServerState>,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> Result<(), ServerError> {
        let host = name.trim().to_string();
        if host.is_empty() {
            return Err(GameError::InvalidName.into());
        }
        let config = config.unwrap_or_default();

        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = state.next_code()?;
            let doc = GameSession::new(code, host.as_str(), config.clone(), Utc::now());
            match state.sessions.create_session(doc).await {
                Ok(session) => {
                    info!(code = %session.code(), host = %host, "Game created");
                    return Self::attach(addr, &session, &host, state, sender).await;
                }
                Err(GameError::CodeTaken(code)) => {
                    debug!(code = %code, "Game code collision, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ServerError::new(ErrorCode::ServerOverloaded, "no free game code"))
    }

    /// Handle joining or rejoining a game.
    async fn handle_join_game(
        addr: SocketAddr,
        code: String,
        name: String,
        state: &Arc<ServerState>,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> Result<(), ServerError> {
        let session = state.sessions.find_by_code(&code).await?;
        let player = name.trim().to_string();

        let added = session.transact(None, |doc| doc.add_player(&player))?;
        if added {
            info!(code = %session.code(), player = %player, "Player joined");
            session.publish(GameEventData::PlayerJoined { player: player.clone() });
        } else {
            debug!(code = %session.code(), player = %player, "Player rejoined");
        }

        Self::attach(addr, &session, &player, state, sender).await
    }

    /// Handle reward configuration: validated on a read copy, then written
    /// only if nothing changed in between.
    async fn handle_configure(
        addr: SocketAddr,
        config: RewardConfig,
        state: &Arc<ServerState>,
    ) -> Result<(), ServerError> {
        let seat = state.seat(addr).await?;
        let mut doc = state.sessions.read_once(&seat.code).await?;
        let version = doc.version;
        doc.configure(&seat.player, config.clone())?;

        let mutation = Mutation::Replace(SessionFields {
            config: Some(config.clone()),
            ..Default::default()
        });
        state.sessions.mutate(&seat.code, mutation, Some(version)).await?;

        let session = state.sessions.find_by_code(&seat.code).await?;
        session.publish(GameEventData::ConfigUpdated { config });
        Ok(())
    }

    /// Handle game start.
    async fn handle_start_game(addr: SocketAddr, state: &Arc<ServerState>) -> Result<(), ServerError> {
        let (seat, session) = state.seated_session(addr).await?;
        session.transact(None, |doc| doc.start(&seat.player))?;

        state.scheduler.start(session.clone()).await;
        let next_draw_in_ms = state.config.cadence.interval.as_millis() as u64;
        session.publish(GameEventData::GameStarted { next_draw_in_ms });
        info!(code = %seat.code, "Game started");
        Ok(())
    }

    /// Handle marking a number.
    async fn handle_mark(
        addr: SocketAddr,
        number: u8,
        state: &Arc<ServerState>,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> Result<(), ServerError> {
        let (seat, session) = state.seated_session(addr).await?;
        let drawn = session.read().drawn_numbers;
        let card = state.cards.toggle_mark(&seat.code, &seat.player, number, &drawn).await?;

        let claimable = card.satisfied_kinds();
        let _ = sender.send(ServerMessage::Marks { marked: card.marked, claimable }).await;
        Ok(())
    }

    /// Handle a prize claim.
    async fn handle_submit_claim(
        addr: SocketAddr,
        kind: ClaimKind,
        state: &Arc<ServerState>,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> Result<(), ServerError> {
        let (seat, session) = state.seated_session(addr).await?;
        let card = state.cards.get(&seat.code, &seat.player).await
            .ok_or_else(|| GameError::NotMember(seat.player.clone()))?;

        let now = Utc::now();
        let receipt = session.transact(None, |doc| arbitration::submit_claim(doc, &card, kind, now))?;

        session.publish(GameEventData::ClaimSubmitted {
            index: receipt.index,
            player: seat.player.clone(),
            kind,
            verified: receipt.status == ClaimStatus::Verified,
        });
        let _ = sender.send(ServerMessage::ClaimStatus {
            index: receipt.index,
            kind,
            status: receipt.status,
        }).await;
        Ok(())
    }

    /// Handle the host verifying or rejecting a claim.
    async fn handle_decide_claim(
        addr: SocketAddr,
        index: usize,
        accept: bool,
        state: &Arc<ServerState>,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> Result<(), ServerError> {
        let (seat, session) = state.seated_session(addr).await?;
        let (player, kind, status) = session.transact(None, |doc| {
            let claim = if accept {
                arbitration::verify_claim(doc, &seat.player, index)?
            } else {
                arbitration::reject_claim(doc, &seat.player, index)?
            };
            Ok((claim.player.clone(), claim.kind, claim.status()))
        })?;

        let event = if accept {
            GameEventData::ClaimVerified { index, player, kind }
        } else {
            GameEventData::ClaimRejected { index, player, kind }
        };
        session.publish(event);
        let _ = sender.send(ServerMessage::ClaimStatus { index, kind, status }).await;
        Ok(())
    }

    /// Handle the host pausing number calling.
    async fn handle_pause_draws(addr: SocketAddr, state: &Arc<ServerState>) -> Result<(), ServerError> {
        let (seat, session) = state.seated_session(addr).await?;
        let doc = session.read();
        doc.require_host(&seat.player)?;
        doc.require_in_play()?;

        if state.scheduler.cancel(&seat.code).await {
            session.publish(GameEventData::DrawsPaused);
            info!(code = %seat.code, "Draws paused");
        }
        Ok(())
    }

    /// Handle the host resuming number calling.
    async fn handle_resume_draws(addr: SocketAddr, state: &Arc<ServerState>) -> Result<(), ServerError> {
        let (seat, session) = state.seated_session(addr).await?;
        let doc = session.read();
        doc.require_host(&seat.player)?;
        doc.require_in_play()?;
        if doc.is_exhausted() {
            return Ok(());
        }

        if state.scheduler.start(session.clone()).await {
            let delay = state.config.cadence.next_delay(doc.last_draw_at, Utc::now());
            session.publish(GameEventData::DrawsResumed {
                next_draw_in_ms: delay.as_millis() as u64,
            });
            info!(code = %seat.code, "Draws resumed");
        }
        Ok(())
    }

    /// Handle the host ending the game.
    async fn handle_end_game(addr: SocketAddr, state: &Arc<ServerState>) -> Result<(), ServerError> {
        let (seat, session) = state.seated_session(addr).await?;
        let now = Utc::now();
        let leaderboard = session.transact(None, |doc| scoring::end_game(doc, &seat.player, now))?;

        state.scheduler.cancel(&seat.code).await;
        session.publish(GameEventData::GameEnded { leaderboard });
        Ok(())
    }

    /// Handle a resync: full document plus the client's own marks.
    async fn handle_sync(
        addr: SocketAddr,
        state: &Arc<ServerState>,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> Result<(), ServerError> {
        let (seat, session) = state.seated_session(addr).await?;
        let _ = sender.send(ServerMessage::Snapshot { session: session.read() }).await;
        if let Some(card) = state.cards.get(&seat.code, &seat.player).await {
            let claimable = card.satisfied_kinds();
            let _ = sender.send(ServerMessage::Marks { marked: card.marked, claimable }).await;
        }
        Ok(())
    }

    /// Handle leave: stop relaying the current game to this client. The
    /// player stays on the game's list and may rejoin.
    async fn handle_leave(addr: SocketAddr, state: &Arc<ServerState>) {
        let mut clients = state.clients.write().await;
        if let Some(client) = clients.get_mut(&addr) {
            if let Some(forwarder) = client.forwarder.take() {
                forwarder.abort();
            }
            if let Some(seat) = client.seat.take() {
                debug!(code = %seat.code, player = %seat.player, "Client left game");
            }
        }
    }

    /// Run cleanup loop.
    async fn run_cleanup_loop(state: Arc<ServerState>) {
        let mut interval = interval(state.config.cleanup_interval);

        loop {
            interval.tick().await;
            state.sweep_sessions(Utc::now()).await;
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.state.clients.read().await.len()
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        self.state.sessions.session_count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::GameEvent;

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            cadence: DrawCadence {
                interval: Duration::from_millis(2),
                min_delay: Duration::from_millis(1),
            },
            ..Default::default()
        }
    }

    struct TestClient {
        addr: SocketAddr,
        tx: mpsc::Sender<ServerMessage>,
        rx: mpsc::Receiver<ServerMessage>,
    }

    impl TestClient {
        async fn connect(server: &GameServer, port: u16) -> Self {
            let addr: SocketAddr = ([127, 0, 0, 1], port).into();
            server.state.register_client(addr).await;
            let (tx, rx) = mpsc::channel(1024);
            Self { addr, tx, rx }
        }

        async fn send(&self, server: &GameServer, msg: ClientMessage) {
            GameServer::handle_client_message(self.addr, msg, &server.state, &self.tx).await;
        }

        /// Next message matching `pred`, skipping anything else.
        async fn expect<T>(&mut self, mut pred: impl FnMut(ServerMessage) -> Option<T>) -> T {
            tokio::time::timeout(Duration::from_secs(10), async {
                loop {
                    let msg = self.rx.recv().await.expect("channel closed");
                    if let Some(found) = pred(msg) {
                        return found;
                    }
                }
            }).await.expect("timed out waiting for message")
        }

        async fn expect_error(&mut self) -> ServerError {
            self.expect(|m| match m {
                ServerMessage::Error(e) => Some(e),
                _ => None,
            }).await
        }

        async fn expect_event(&mut self, pred: impl Fn(&GameEventData) -> bool) -> GameEvent {
            self.expect(|m| match m {
                ServerMessage::Event(e) if pred(&e.data) => Some(e),
                _ => None,
            }).await
        }
    }

    async fn joined(client: &mut TestClient) -> JoinedInfo {
        client.expect(|m| match m {
            ServerMessage::Joined(info) => Some(info),
            _ => None,
        }).await
    }

    type ClientSocket = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<TcpStream>,
    >;

    /// A real WebSocket client served by `handle_connection`.
    async fn ws_client(server: &GameServer) -> ClientSocket {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let connecting = tokio::spawn(tokio_tungstenite::connect_async(url));
        let (stream, addr) = listener.accept().await.unwrap();
        server.handle_connection(stream, addr);
        let (socket, _) = connecting.await.unwrap().unwrap();
        socket
    }

    async fn ws_send(socket: &mut ClientSocket, msg: ClientMessage) {
        socket.send(Message::Text(msg.to_json().unwrap())).await.unwrap();
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.cadence.interval, Duration::from_secs(5));
        assert_eq!(config.cadence.min_delay, Duration::from_millis(100));
        assert!(config.card_dir.is_none());
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = GameServer::new(test_config());

        assert_eq!(server.connection_count().await, 0);
        assert_eq!(server.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let server = Arc::new(GameServer::new(test_config()));
        let running = tokio::spawn({
            let server = server.clone();
            async move { server.run().await }
        });

        // The shutdown receiver only exists once `run` is listening.
        while server.shutdown_tx.receiver_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        server.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(5), running).await
            .expect("server did not stop")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_silent_player_keeps_watching_running_game() {
        let server = GameServer::new(ServerConfig {
            idle_timeout: Duration::from_millis(150),
            cadence: DrawCadence {
                interval: Duration::from_millis(40),
                min_delay: Duration::from_millis(1),
            },
            ..test_config()
        });
        let mut socket = ws_client(&server).await;
        ws_send(&mut socket, ClientMessage::CreateGame { name: "Asha".into(), config: None }).await;
        ws_send(&mut socket, ClientMessage::StartGame).await;

        let watching_since = Instant::now();
        let mut draws = 0;
        while watching_since.elapsed() < Duration::from_millis(600) {
            let frame = tokio::time::timeout(Duration::from_secs(2), socket.next()).await
                .expect("no traffic from server");
            match frame {
                Some(Ok(Message::Text(text))) => {
                    if let ServerMessage::Event(event) = ServerMessage::from_json(&text).unwrap() {
                        if matches!(event.data, GameEventData::NumberDrawn { .. }) {
                            draws += 1;
                        }
                    }
                }
                Some(Ok(_)) => {}
                other => panic!("connection closed mid-game: {other:?}"),
            }
        }

        assert!(draws > 5, "only {draws} draws seen");
        assert_eq!(server.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_silent_lobby_client_is_closed() {
        let server = GameServer::new(ServerConfig {
            idle_timeout: Duration::from_millis(100),
            ..test_config()
        });
        let mut socket = ws_client(&server).await;
        ws_send(&mut socket, ClientMessage::CreateGame { name: "Asha".into(), config: None }).await;

        let closed = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(Ok(Message::Text(_))) = socket.next().await {}
        }).await;
        assert!(closed.is_ok(), "idle lobby client was kept open");
    }

    #[tokio::test]
    async fn test_sweep_drops_abandoned_game() {
        let server = GameServer::new(ServerConfig {
            cadence: DrawCadence {
                interval: Duration::from_secs(60),
                min_delay: Duration::from_millis(100),
            },
            ..test_config()
        });
        let mut host = TestClient::connect(&server, 1).await;
        host.send(&server, ClientMessage::CreateGame { name: "Asha".into(), config: None }).await;
        let code = joined(&mut host).await.code;
        assert!(!server.state.is_watching(host.addr).await);

        host.send(&server, ClientMessage::StartGame).await;
        assert!(server.state.is_watching(host.addr).await);
        assert!(server.state.scheduler.is_running(&code).await);
        assert!(server.state.sweep_sessions(Utc::now()).await.is_empty());

        let later = Utc::now() + ChronoDuration::hours(3);
        assert_eq!(server.state.sweep_sessions(later).await, vec![code.clone()]);
        assert_eq!(server.session_count().await, 0);
        assert!(!server.state.scheduler.is_running(&code).await);
        assert!(server.state.cards.get(&code, "Asha").await.is_none());
        assert!(!server.state.is_watching(host.addr).await);

        host.send(&server, ClientMessage::SyncRequest).await;
        assert_eq!(host.expect_error().await.code, ErrorCode::GameNotFound);
    }

    #[tokio::test]
    async fn test_create_and_join() {
        let server = GameServer::new(test_config());
        let mut host = TestClient::connect(&server, 1).await;
        let mut guest = TestClient::connect(&server, 2).await;

        host.send(&server, ClientMessage::CreateGame { name: " Asha ".into(), config: None }).await;
        let info = joined(&mut host).await;
        assert!(info.is_host);
        assert_eq!(info.player, "Asha");
        assert_eq!(info.code.len(), 6);
        info.ticket.validate().unwrap();

        guest.send(&server, ClientMessage::JoinGame { code: info.code.to_lowercase(), name: "Ravi".into() }).await;
        let guest_info = joined(&mut guest).await;
        assert!(!guest_info.is_host);
        assert_eq!(guest_info.code, info.code);

        let event = host.expect_event(|e| matches!(e, GameEventData::PlayerJoined { .. })).await;
        assert_eq!(event.player(), Some("Ravi"));

        let doc = server.state.sessions.read_once(&info.code).await.unwrap();
        assert_eq!(doc.players, vec!["Asha", "Ravi"]);
        assert_eq!(server.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_rejoin_keeps_ticket() {
        let server = GameServer::new(test_config());
        let mut host = TestClient::connect(&server, 1).await;
        host.send(&server, ClientMessage::CreateGame { name: "Asha".into(), config: None }).await;
        let code = joined(&mut host).await.code;

        let mut first = TestClient::connect(&server, 2).await;
        first.send(&server, ClientMessage::JoinGame { code: code.clone(), name: "Ravi".into() }).await;
        let ticket = joined(&mut first).await.ticket;

        let mut again = TestClient::connect(&server, 3).await;
        again.send(&server, ClientMessage::JoinGame { code: code.clone(), name: "Ravi".into() }).await;
        assert_eq!(joined(&mut again).await.ticket, ticket);

        let doc = server.state.sessions.read_once(&code).await.unwrap();
        assert_eq!(doc.players.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_code_and_missing_seat() {
        let server = GameServer::new(test_config());
        let mut client = TestClient::connect(&server, 1).await;

        client.send(&server, ClientMessage::JoinGame { code: "NOPE00".into(), name: "x".into() }).await;
        assert_eq!(client.expect_error().await.code, ErrorCode::GameNotFound);

        client.send(&server, ClientMessage::StartGame).await;
        assert_eq!(client.expect_error().await.code, ErrorCode::NotInGame);

        client.send(&server, ClientMessage::CreateGame { name: "  ".into(), config: None }).await;
        assert_eq!(client.expect_error().await.code, ErrorCode::InvalidName);
    }

    #[tokio::test]
    async fn test_host_only_actions() {
        let server = GameServer::new(test_config());
        let mut host = TestClient::connect(&server, 1).await;
        let mut guest = TestClient::connect(&server, 2).await;

        host.send(&server, ClientMessage::CreateGame { name: "Asha".into(), config: None }).await;
        let code = joined(&mut host).await.code;
        guest.send(&server, ClientMessage::JoinGame { code: code.clone(), name: "Ravi".into() }).await;
        joined(&mut guest).await;

        guest.send(&server, ClientMessage::StartGame).await;
        assert_eq!(guest.expect_error().await.code, ErrorCode::NotHost);

        guest.send(&server, ClientMessage::Configure { config: RewardConfig::empty() }).await;
        assert_eq!(guest.expect_error().await.code, ErrorCode::NotHost);

        let config = RewardConfig::empty().with(ClaimKind::FullHouse, 2);
        host.send(&server, ClientMessage::Configure { config: config.clone() }).await;
        let updated = host.expect_event(|e| matches!(e, GameEventData::ConfigUpdated { .. })).await;
        assert_eq!(updated.data, GameEventData::ConfigUpdated { config: config.clone() });
        assert_eq!(server.state.sessions.read_once(&code).await.unwrap().config, config);
    }

    #[tokio::test]
    async fn test_join_after_start_rejected_for_newcomers() {
        let server = GameServer::new(ServerConfig {
            cadence: DrawCadence {
                interval: Duration::from_secs(60),
                min_delay: Duration::from_millis(100),
            },
            ..test_config()
        });
        let mut host = TestClient::connect(&server, 1).await;
        host.send(&server, ClientMessage::CreateGame { name: "Asha".into(), config: None }).await;
        let code = joined(&mut host).await.code;
        host.send(&server, ClientMessage::StartGame).await;
        host.expect_event(|e| matches!(e, GameEventData::GameStarted { .. })).await;

        let mut late = TestClient::connect(&server, 2).await;
        late.send(&server, ClientMessage::JoinGame { code, name: "Late".into() }).await;
        assert_eq!(late.expect_error().await.code, ErrorCode::AlreadyStarted);

        host.send(&server, ClientMessage::StartGame).await;
        assert_eq!(host.expect_error().await.code, ErrorCode::AlreadyStarted);
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let server = GameServer::new(ServerConfig {
            cadence: DrawCadence {
                interval: Duration::from_secs(60),
                min_delay: Duration::from_millis(100),
            },
            ..test_config()
        });
        let mut host = TestClient::connect(&server, 1).await;
        host.send(&server, ClientMessage::CreateGame { name: "Asha".into(), config: None }).await;
        let code = joined(&mut host).await.code;

        host.send(&server, ClientMessage::PauseDraws).await;
        assert_eq!(host.expect_error().await.code, ErrorCode::NotStarted);

        host.send(&server, ClientMessage::StartGame).await;
        assert!(server.state.scheduler.is_running(&code).await);

        host.send(&server, ClientMessage::PauseDraws).await;
        host.expect_event(|e| matches!(e, GameEventData::DrawsPaused)).await;
        assert!(!server.state.scheduler.is_running(&code).await);

        host.send(&server, ClientMessage::ResumeDraws).await;
        let resumed = host.expect_event(|e| matches!(e, GameEventData::DrawsResumed { .. })).await;
        assert_eq!(resumed.data, GameEventData::DrawsResumed { next_draw_in_ms: 60_000 });
        assert!(server.state.scheduler.is_running(&code).await);
    }

    #[tokio::test]
    async fn test_full_game() {
        let server = GameServer::new(test_config());
        let mut host = TestClient::connect(&server, 1).await;
        let mut guest = TestClient::connect(&server, 2).await;

        let config = RewardConfig::empty().with(ClaimKind::FullHouse, 1);
        host.send(&server, ClientMessage::CreateGame { name: "Asha".into(), config: Some(config) }).await;
        let code = joined(&mut host).await.code;
        guest.send(&server, ClientMessage::JoinGame { code: code.clone(), name: "Ravi".into() }).await;
        let ticket = joined(&mut guest).await.ticket;

        // Claims before the start are refused.
        guest.send(&server, ClientMessage::SubmitClaim { kind: ClaimKind::FullHouse }).await;
        assert_eq!(guest.expect_error().await.code, ErrorCode::NotStarted);

        host.send(&server, ClientMessage::StartGame).await;
        guest.expect_event(|e| matches!(e, GameEventData::DrawsExhausted)).await;

        host.send(&server, ClientMessage::EndGame).await;
        let _ = host.expect_event(|e| matches!(e, GameEventData::GameEnded { .. })).await;
        host.send(&server, ClientMessage::EndGame).await;
        assert_eq!(host.expect_error().await.code, ErrorCode::AlreadyEnded);

        guest.send(&server, ClientMessage::Mark { number: ticket.numbers().next().unwrap() }).await;
        let claimable = guest.expect(|m| match m {
            ServerMessage::Marks { claimable, .. } => Some(claimable),
            _ => None,
        }).await;
        assert!(claimable.is_empty());
        guest.send(&server, ClientMessage::SubmitClaim { kind: ClaimKind::EarlyFive }).await;
        assert_eq!(guest.expect_error().await.code, ErrorCode::AlreadyEnded);
    }

    #[tokio::test]
    async fn test_claims_flow() {
        let server = GameServer::new(test_config());
        let mut host = TestClient::connect(&server, 1).await;
        let mut p1 = TestClient::connect(&server, 2).await;
        let mut p2 = TestClient::connect(&server, 3).await;

        let config = RewardConfig::empty().with(ClaimKind::FullHouse, 1);
        host.send(&server, ClientMessage::CreateGame { name: "Asha".into(), config: Some(config) }).await;
        let code = joined(&mut host).await.code;
        p1.send(&server, ClientMessage::JoinGame { code: code.clone(), name: "Ravi".into() }).await;
        let t1 = joined(&mut p1).await.ticket;
        p2.send(&server, ClientMessage::JoinGame { code: code.clone(), name: "Meera".into() }).await;
        let t2 = joined(&mut p2).await.ticket;

        host.send(&server, ClientMessage::StartGame).await;
        p1.expect_event(|e| matches!(e, GameEventData::DrawsExhausted)).await;

        for (client, ticket) in [(&mut p1, &t1), (&mut p2, &t2)] {
            for number in ticket.numbers() {
                client.send(&server, ClientMessage::Mark { number }).await;
            }
            client.expect(|m| match m {
                ServerMessage::Marks { claimable, .. } if claimable.contains(&ClaimKind::FullHouse) => Some(()),
                _ => None,
            }).await;
            client.send(&server, ClientMessage::SubmitClaim { kind: ClaimKind::FullHouse }).await;
            let status = client.expect(|m| match m {
                ServerMessage::ClaimStatus { status, .. } => Some(status),
                _ => None,
            }).await;
            assert_eq!(status, ClaimStatus::Pending);
        }

        p2.send(&server, ClientMessage::VerifyClaim { index: 0 }).await;
        assert_eq!(p2.expect_error().await.code, ErrorCode::NotHost);

        host.send(&server, ClientMessage::VerifyClaim { index: 0 }).await;
        host.expect_event(|e| matches!(e, GameEventData::ClaimVerified { index: 0, .. })).await;
        host.send(&server, ClientMessage::VerifyClaim { index: 1 }).await;
        assert_eq!(host.expect_error().await.code, ErrorCode::QuotaExhausted);
        host.send(&server, ClientMessage::RejectClaim { index: 1 }).await;
        host.expect_event(|e| matches!(e, GameEventData::ClaimRejected { index: 1, .. })).await;

        host.send(&server, ClientMessage::EndGame).await;
        let ended = p1.expect_event(|e| matches!(e, GameEventData::GameEnded { .. })).await;
        let GameEventData::GameEnded { leaderboard } = ended.data else {
            panic!("Wrong event");
        };
        assert_eq!(leaderboard[0].player, "Ravi");
        assert_eq!(leaderboard[0].total, 20);
        assert!(leaderboard[1..].iter().all(|e| e.total == 0));
    }

    #[tokio::test]
    async fn test_sync_and_ping() {
        let server = GameServer::new(test_config());
        let mut host = TestClient::connect(&server, 1).await;
        host.send(&server, ClientMessage::CreateGame { name: "Asha".into(), config: None }).await;
        let code = joined(&mut host).await.code;

        host.send(&server, ClientMessage::SyncRequest).await;
        let doc = host.expect(|m| match m {
            ServerMessage::Snapshot { session } => Some(session),
            _ => None,
        }).await;
        assert_eq!(doc.code, code);

        host.send(&server, ClientMessage::Ping { timestamp: 42 }).await;
        let echoed = host.expect(|m| match m {
            ServerMessage::Pong { timestamp, .. } => Some(timestamp),
            _ => None,
        }).await;
        assert_eq!(echoed, 42);

        host.send(&server, ClientMessage::Leave).await;
        host.send(&server, ClientMessage::SyncRequest).await;
        assert_eq!(host.expect_error().await.code, ErrorCode::NotInGame);
    }
}
