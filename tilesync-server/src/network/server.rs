//! WebSocket Game Server
//!
//! Async WebSocket server for multiplayer connections.
//! Handles joins, input routing and the fixed-rate tick loop.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock, broadcast};
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::game::entity::EntityId;
use crate::game::events::GameEvent;
use crate::game::input::InputRecord;
use crate::game::map::{ConfigError, MapConfig};
use crate::network::protocol::{ClientMessage, ServerMessage, ServerError, ErrorCode};
use crate::network::session::{MapId, SessionConfig, SessionManager, SessionError};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Idle connections are dropped after this long.
    pub connection_timeout: Duration,
    /// Tick rate for the simulation (Hz).
    pub tick_rate: u32,
    /// Map file; the default map is used when absent.
    pub map_path: Option<PathBuf>,
    /// Per-map session settings.
    pub session: SessionConfig,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            connection_timeout: Duration::from_secs(300),
            tick_rate: crate::TICK_RATE,
            map_path: None,
            session: SessionConfig::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `TILESYNC_BIND`, `TILESYNC_TICK_RATE`,
    /// `TILESYNC_MAX_CONNECTIONS` and `TILESYNC_MAP`.
    pub fn from_env() -> Result<Self, GameServerError> {
        let mut config = Self::default();

        if let Ok(bind) = std::env::var("TILESYNC_BIND") {
            config.bind_addr = bind
                .parse()
                .map_err(|_| GameServerError::InvalidConfig(format!("TILESYNC_BIND={bind}")))?;
        }
        if let Ok(rate) = std::env::var("TILESYNC_TICK_RATE") {
            config.tick_rate = rate
                .parse()
                .ok()
                .filter(|r| *r > 0)
                .ok_or_else(|| GameServerError::InvalidConfig(format!("TILESYNC_TICK_RATE={rate}")))?;
        }
        if let Ok(max) = std::env::var("TILESYNC_MAX_CONNECTIONS") {
            config.max_connections = max
                .parse()
                .map_err(|_| GameServerError::InvalidConfig(format!("TILESYNC_MAX_CONNECTIONS={max}")))?;
        }
        if let Ok(path) = std::env::var("TILESYNC_MAP") {
            config.map_path = Some(PathBuf::from(path));
        }

        Ok(config)
    }

    /// Interval between two ticks.
    pub fn tick_duration(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.tick_rate.max(1)))
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

    /// Session error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Map content could not be loaded.
    #[error("Map error: {0}")]
    Map(#[from] ConfigError),

    /// Bad configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Connected client state.
struct ConnectedClient {
    /// Entity controlled (after join).
    entity_id: Option<EntityId>,
    /// Map joined.
    map: Option<MapId>,
    /// Accepted at
    connected_at: Instant,
    /// Last message received
    last_activity: Instant,
}

type Clients = Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>;

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Session manager.
    sessions: Arc<SessionManager>,
    /// Connected clients.
    clients: Clients,
    /// Map joined by `Join`.
    default_map: Arc<RwLock<Option<MapId>>>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            sessions: Arc::new(SessionManager::new()),
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            default_map: Arc::new(RwLock::new(None)),
            shutdown_tx,
        }
    }

    /// Open a session for a map. The first map opened is the one clients join.
    pub async fn open_map(&self, map: &MapConfig) -> Result<(), GameServerError> {
        let session = self.sessions.create_session(map, self.config.session.clone()).await?;
        let events = session.read().await.subscribe_events();
        tokio::spawn(Self::run_event_log(map.id.clone(), events));
        let mut default_map = self.default_map.write().await;
        if default_map.is_none() {
            *default_map = Some(map.id.clone());
        }
        Ok(())
    }

    /// Load the configured map (or the default one) and open it.
    pub async fn open_configured_map(&self) -> Result<(), GameServerError> {
        let map = match &self.config.map_path {
            Some(path) => MapConfig::load(path)?,
            None => MapConfig::default(),
        };
        info!(map = %map.id, width = map.width, height = map.height, "opening map");
        self.open_map(&map).await
    }

    /// Trace a map's game events until its session is dropped.
    async fn run_event_log(map: MapId, mut events: broadcast::Receiver<GameEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    debug!(%map, tick = event.tick, entity = %event.data.entity().short(), data = ?event.data, "game event");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(%map, skipped, "event log fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Session manager.
    pub fn sessions(&self) -> Arc<SessionManager> {
        self.sessions.clone()
    }

    /// Run the server.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!(addr = %self.config.bind_addr, tick_rate = self.config.tick_rate, "listening");

        if self.default_map.read().await.is_none() {
            self.open_configured_map().await?;
        }

        let tick_handle = tokio::spawn(Self::run_tick_loop(
            self.sessions.clone(),
            self.config.tick_duration(),
            self.shutdown_tx.subscribe(),
        ));
        let cleanup_handle = tokio::spawn(Self::run_cleanup_loop(
            self.clients.clone(),
            self.sessions.clone(),
            self.config.connection_timeout,
        ));

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.clients.read().await.len() >= self.config.max_connections {
                                warn!(%addr, "connection limit reached, rejecting");
                                continue;
                            }
                            debug!(%addr, "connection accepted");
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!(error = %e, "accept failed");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        self.sessions.close_all("Server shutting down").await;
        tick_handle.abort();
        cleanup_handle.abort();

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let sessions = self.sessions.clone();
        let default_map = self.default_map.clone();
        let buffer = self.config.session.client_buffer;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!(%addr, error = %e, "websocket handshake failed");
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(buffer);

            // Register client
            {
                let mut clients = clients.write().await;
                clients.insert(addr, ConnectedClient {
                    entity_id: None,
                    map: None,
                    connected_at: Instant::now(),
                    last_activity: Instant::now(),
                });
            }

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!(error = %e, "failed to serialize message");
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
                        let client_msg = match msg {
                            Some(Ok(Message::Text(text))) => match ClientMessage::from_json(&text) {
                                Ok(m) => m,
                                Err(e) => {
                                    debug!(%addr, error = %e, "invalid message");
                                    let _ = msg_tx.try_send(ServerError::new(
                                        ErrorCode::InvalidMessage,
                                        "Invalid message format",
                                    ));
                                    continue;
                                }
                            },
                            Some(Ok(Message::Binary(data))) => match InputRecord::from_bytes(&data) {
                                Ok(record) => ClientMessage::input(record),
                                Err(e) => {
                                    debug!(%addr, error = %e, "invalid binary input");
                                    continue;
                                }
                            },
                            Some(Ok(Message::Close(_))) | None => {
                                debug!(%addr, "client disconnected");
                                break;
                            }
                            Some(Err(e)) => {
                                warn!(%addr, error = %e, "websocket error");
                                break;
                            }
                            _ => continue,
                        };

                        // Update activity
                        {
                            let mut clients = clients.write().await;
                            if let Some(client) = clients.get_mut(&addr) {
                                client.last_activity = Instant::now();
                            }
                        }

                        Self::handle_client_message(addr, client_msg, &clients, &sessions, &default_map, &msg_tx).await;
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.try_send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        });
                        break;
                    }
                }
            }

            Self::handle_leave(addr, &clients, &sessions).await;
            let connected_for = clients
                .write()
                .await
                .remove(&addr)
                .map(|c| c.connected_at.elapsed())
                .unwrap_or_default();
            // Let queued messages (shutdown notice) drain before closing.
            drop(msg_tx);
            let _ = tokio::time::timeout(Duration::from_millis(250), sender_task).await;

            debug!(%addr, secs = connected_for.as_secs(), "connection closed");
        });
    }

    /// Handle a client message.
    async fn handle_client_message(
        addr: SocketAddr,
        msg: ClientMessage,
        clients: &Clients,
        sessions: &Arc<SessionManager>,
        default_map: &Arc<RwLock<Option<MapId>>>,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        match msg {
            ClientMessage::Join { name } => {
                Self::handle_join(addr, name, clients, sessions, default_map, sender).await;
            }
            ClientMessage::Input { frame, input } => {
                Self::handle_input(addr, InputRecord::new(frame, input), clients, sessions, sender).await;
            }
            ClientMessage::SyncRequest => {
                let Some((entity_id, map)) = Self::joined(addr, clients).await else {
                    let _ = sender.try_send(ServerError::new(ErrorCode::NotJoined, "Join first"));
                    return;
                };
                if let Some(session) = sessions.get_session(&map).await {
                    let s = session.read().await;
                    s.send_to(&entity_id, ServerMessage::Welcome { entity_id, snapshot: s.snapshot() });
                }
            }
            ClientMessage::Ping { timestamp } => {
                let server_tick = match Self::joined(addr, clients).await {
                    Some((_, map)) => match sessions.get_session(&map).await {
                        Some(session) => session.read().await.current_tick(),
                        None => 0,
                    },
                    None => 0,
                };
                let _ = sender.try_send(ServerMessage::Pong { timestamp, server_tick });
            }
            ClientMessage::Leave => {
                Self::handle_leave(addr, clients, sessions).await;
            }
        }
    }

    /// Entity and map of a joined connection.
    async fn joined(addr: SocketAddr, clients: &Clients) -> Option<(EntityId, MapId)> {
        let clients = clients.read().await;
        let client = clients.get(&addr)?;
        Some((client.entity_id?, client.map.clone()?))
    }

    /// Handle a join request.
    async fn handle_join(
        addr: SocketAddr,
        name: String,
        clients: &Clients,
        sessions: &Arc<SessionManager>,
        default_map: &Arc<RwLock<Option<MapId>>>,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        if Self::joined(addr, clients).await.is_some() {
            let _ = sender.try_send(ServerError::new(ErrorCode::AlreadyJoined, "Already joined"));
            return;
        }

        let map = default_map.read().await.clone();
        let session = match map {
            Some(ref map) => sessions.get_session(map).await,
            None => None,
        };
        let (Some(map), Some(session)) = (map, session) else {
            let _ = sender.try_send(ServerError::new(ErrorCode::MapClosed, "No map open"));
            return;
        };

        let entity_id = {
            let mut s = session.write().await;
            match s.join(name, sender.clone()) {
                Ok((entity_id, snapshot)) => {
                    // Sent under the lock so it precedes the next tick diff.
                    s.send_to(&entity_id, ServerMessage::Welcome { entity_id, snapshot });
                    entity_id
                }
                Err(e) => {
                    let code = match &e {
                        SessionError::SessionFull => ErrorCode::ServerFull,
                        SessionError::Closed => ErrorCode::MapClosed,
                        _ => ErrorCode::InternalError,
                    };
                    let _ = sender.try_send(ServerError::new(code, e.to_string()));
                    return;
                }
            }
        };

        sessions.register_entity(entity_id, map.clone()).await;
        let mut clients = clients.write().await;
        if let Some(client) = clients.get_mut(&addr) {
            client.entity_id = Some(entity_id);
            client.map = Some(map);
        }
    }

    /// Handle an input record.
    async fn handle_input(
        addr: SocketAddr,
        record: InputRecord,
        clients: &Clients,
        sessions: &Arc<SessionManager>,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let Some((entity_id, map)) = Self::joined(addr, clients).await else {
            let _ = sender.try_send(ServerError::new(ErrorCode::NotJoined, "Join first"));
            return;
        };
        let Some(session) = sessions.get_session(&map).await else {
            let _ = sender.try_send(ServerError::new(ErrorCode::MapClosed, "Map closed"));
            return;
        };

        let mut s = session.write().await;
        match s.queue_input(&entity_id, record) {
            Ok(true) => {}
            Ok(false) => debug!(entity = %entity_id.short(), frame = record.frame, "resent input dropped"),
            Err(e) => debug!(%addr, error = %e, "input discarded"),
        }
    }

    /// Handle leave (explicit or on disconnect).
    async fn handle_leave(addr: SocketAddr, clients: &Clients, sessions: &Arc<SessionManager>) {
        let Some((entity_id, map)) = Self::joined(addr, clients).await else {
            return;
        };
        if let Some(session) = sessions.get_session(&map).await {
            session.write().await.leave(&entity_id);
        }
        sessions.unregister_entity(&entity_id).await;

        let mut clients = clients.write().await;
        if let Some(client) = clients.get_mut(&addr) {
            client.entity_id = None;
            client.map = None;
        }
    }

    /// Run the fixed-rate tick loop for every session.
    async fn run_tick_loop(
        sessions: Arc<SessionManager>,
        tick_duration: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut tick_interval = interval(tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    sessions.tick_all().await;
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    }

    /// Run cleanup loop.
    async fn run_cleanup_loop(clients: Clients, sessions: Arc<SessionManager>, idle_timeout: Duration) {
        let mut interval = interval(Duration::from_secs(60));

        loop {
            interval.tick().await;

            let now = Instant::now();
            let to_remove: Vec<_> = {
                let clients = clients.read().await;
                clients.iter()
                    .filter(|(_, c)| now.duration_since(c.last_activity) > idle_timeout)
                    .map(|(addr, _)| *addr)
                    .collect()
            };

            for addr in to_remove {
                Self::handle_leave(addr, &clients, &sessions).await;
                if clients.write().await.remove(&addr).is_some() {
                    info!(%addr, "idle client removed");
                }
            }

            sessions.cleanup().await;
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        self.sessions.session_count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.tick_rate, 60);
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.bind_addr.port(), 8080);
        assert!(config.map_path.is_none());
    }

    #[test]
    fn test_tick_duration() {
        let config = ServerConfig { tick_rate: 20, ..Default::default() };
        assert_eq!(config.tick_duration(), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_server_creation() {
        let config = ServerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..Default::default()
        };
        let server = GameServer::new(config);

        assert_eq!(server.connection_count().await, 0);
        assert_eq!(server.session_count().await, 0);

        server.open_configured_map().await.unwrap();
        assert_eq!(server.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let config = ServerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..Default::default()
        };
        let server = Arc::new(GameServer::new(config));

        let running = server.clone();
        let handle = tokio::spawn(async move { running.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
        assert_eq!(server.session_count().await, 1);
    }

    #[test]
    fn test_invalid_tick_rate_env() {
        std::env::set_var("TILESYNC_TICK_RATE", "0");
        let result = ServerConfig::from_env();
        std::env::remove_var("TILESYNC_TICK_RATE");
        assert!(matches!(result, Err(GameServerError::InvalidConfig(_))));
    }
}
