//! Map Session Management
//!
//! One [`MapSession`] per map: it owns the authoritative [`WorldState`],
//! the connected clients and the command channel scripts use. The server's
//! tick loop calls [`MapSession::run_tick`] at a fixed rate.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::core::geometry::Position;
use crate::game::command::{CommandReceiver, CommandSender};
use crate::game::diff::{EntitySnapshot, WorldSnapshot};
use crate::game::entity::{EntityId, EntityKind};
use crate::game::events::GameEvent;
use crate::game::input::InputRecord;
use crate::game::map::{ConfigError, MapConfig};
use crate::game::state::WorldState;
use crate::game::tick::{tick, EngineConfig, TickResult};
use crate::network::protocol::ServerMessage;

/// Map identifier.
pub type MapId = String;

/// Configuration for a map session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum connected clients.
    pub max_clients: usize,
    /// Where joining players appear.
    pub spawn: Position,
    /// Tick engine settings.
    pub engine: EngineConfig,
    /// Capacity of each client's outgoing queue.
    pub client_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_clients: 64,
            spawn: Position::new(0, 0),
            engine: EngineConfig::default(),
            client_buffer: 256,
        }
    }
}

/// A client connected to a session.
#[derive(Debug)]
pub struct SessionClient {
    /// Entity the client controls.
    pub entity_id: EntityId,
    /// Display name.
    pub name: String,
    /// Last watermark sent in an `InputAck`.
    pub acked: Option<u64>,
    /// Message channel to this client.
    pub sender: mpsc::Sender<ServerMessage>,
}

/// A map session.
pub struct MapSession {
    /// Map identifier.
    pub id: MapId,
    /// Session configuration.
    pub config: SessionConfig,
    /// Authoritative state.
    world: WorldState,
    /// Commands from scripts, applied at the next tick.
    commands: CommandReceiver,
    /// Handed out to scripts.
    command_tx: CommandSender,
    /// Connected clients by entity.
    clients: BTreeMap<EntityId, SessionClient>,
    /// Event broadcast channel.
    event_tx: broadcast::Sender<GameEvent>,
    /// No longer accepting clients or ticking.
    closed: bool,
}

impl MapSession {
    /// Create a session around an existing world.
    pub fn new(id: impl Into<MapId>, world: WorldState, config: SessionConfig) -> Self {
        let (command_tx, commands) = CommandSender::channel();
        let (event_tx, _) = broadcast::channel(256);

        Self {
            id: id.into(),
            config,
            world,
            commands,
            command_tx,
            clients: BTreeMap::new(),
            event_tx,
            closed: false,
        }
    }

    /// Create a session from map content.
    pub fn from_config(map: &MapConfig, config: SessionConfig) -> Result<Self, SessionError> {
        let world = WorldState::from_config(map)?;
        Ok(Self::new(map.id.clone(), world, config))
    }

    /// Sender for deferred entity commands.
    pub fn commands(&self) -> CommandSender {
        self.command_tx.clone()
    }

    /// Subscribe to game events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<GameEvent> {
        self.event_tx.subscribe()
    }

    // =========================================================================
    // Clients
    // =========================================================================

    /// Join a client: spawn its entity and return the welcome snapshot.
    pub fn join(
        &mut self,
        name: impl Into<String>,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<(EntityId, WorldSnapshot), SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        if self.clients.len() >= self.config.max_clients {
            return Err(SessionError::SessionFull);
        }

        let entity_id = self.world.spawn(EntityKind::PlayerControlled, self.config.spawn);
        let name = name.into();
        info!(map = %self.id, entity = %entity_id.short(), %name, "client joined");

        if let Ok(entity) = self.world.entity(&entity_id) {
            self.broadcast(ServerMessage::EntityJoined { snapshot: EntitySnapshot::of(entity) });
        }
        self.clients.insert(entity_id, SessionClient { entity_id, name, acked: None, sender });

        Ok((entity_id, self.world.snapshot()))
    }

    /// Remove a client and its entity.
    pub fn leave(&mut self, entity_id: &EntityId) -> bool {
        let Some(client) = self.clients.remove(entity_id) else {
            return false;
        };
        if let Err(e) = self.world.remove_entity(entity_id) {
            debug!(error = %e, "entity already gone");
        }
        info!(map = %self.id, entity = %entity_id.short(), name = %client.name, "client left");
        self.broadcast(ServerMessage::EntityRemoved { entity_id: *entity_id });
        true
    }

    /// Queue an input record for a client's entity.
    ///
    /// Returns `Ok(false)` for resends.
    pub fn queue_input(&mut self, entity_id: &EntityId, record: InputRecord) -> Result<bool, SessionError> {
        match self.world.queue_input(entity_id, record) {
            Ok(accepted) => Ok(accepted),
            Err(_) => {
                debug!(entity = %entity_id.short(), frame = record.frame, "input for unknown entity discarded");
                Err(SessionError::UnknownEntity(*entity_id))
            }
        }
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    // =========================================================================
    // Ticking
    // =========================================================================

    /// Run one tick and fan out the results.
    pub fn run_tick(&mut self) -> Option<TickResult> {
        if self.closed {
            return None;
        }

        while let Ok(command) = self.commands.try_recv() {
            self.world.defer(command);
        }
        let queued = self.world.deferred_len();
        if queued > 0 {
            debug!(map = %self.id, queued, "applying deferred commands");
        }

        let result = tick(&mut self.world, &self.config.engine);

        for event in &result.events {
            // No subscribers is fine.
            let _ = self.event_tx.send(event.clone());
        }

        if !result.diff.is_empty() || result.tick % 60 == 0 {
            self.broadcast(ServerMessage::Tick { diff: result.diff.clone() });
        }
        self.send_acks();

        Some(result)
    }

    fn send_acks(&mut self) {
        for client in self.clients.values_mut() {
            let Ok(entity) = self.world.entity(&client.entity_id) else {
                continue;
            };
            let Some(frame) = entity.last_processed_frame else {
                continue;
            };
            if client.acked != Some(frame) {
                client.acked = Some(frame);
                push(client, ServerMessage::InputAck { frame });
            }
        }
    }

    /// Send a message to every client.
    ///
    /// Uses `try_send` so one slow client never stalls the tick; a dropped
    /// diff shows up as a checksum mismatch on that client.
    pub fn broadcast(&self, message: ServerMessage) {
        for client in self.clients.values() {
            push(client, message.clone());
        }
    }

    /// Send a message to one client.
    pub fn send_to(&self, entity_id: &EntityId, message: ServerMessage) -> bool {
        self.clients.get(entity_id).is_some_and(|client| push(client, message))
    }

    /// Close the session, notifying every client.
    pub fn close(&mut self, reason: &str) {
        if self.closed {
            return;
        }
        self.broadcast(ServerMessage::Shutdown { reason: reason.to_string() });
        self.closed = true;
        info!(map = %self.id, reason, "session closed");
    }

    /// Whether the session is closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Full snapshot of the map.
    pub fn snapshot(&self) -> WorldSnapshot {
        self.world.snapshot()
    }

    /// Current tick.
    pub fn current_tick(&self) -> u64 {
        self.world.tick
    }

    /// Authoritative state.
    pub fn world(&self) -> &WorldState {
        &self.world
    }

    /// Authoritative state, mutably (between ticks only).
    pub fn world_mut(&mut self) -> &mut WorldState {
        &mut self.world
    }
}

fn push(client: &SessionClient, message: ServerMessage) -> bool {
    match client.sender.try_send(message) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(entity = %client.entity_id.short(), "client queue full, message dropped");
            false
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

/// Session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Session is full.
    #[error("Session is full")]
    SessionFull,

    /// Session closed.
    #[error("Session closed")]
    Closed,

    /// A session for this map already exists.
    #[error("Map {0} already has a session")]
    DuplicateMap(MapId),

    /// Entity not on this map.
    #[error("Unknown entity {0}")]
    UnknownEntity(EntityId),

    /// Map content rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

// =============================================================================
// SESSION MANAGER
// =============================================================================

/// Manages all active map sessions.
pub struct SessionManager {
    /// Active sessions.
    sessions: RwLock<BTreeMap<MapId, Arc<RwLock<MapSession>>>>,
    /// Entity to map mapping.
    entity_sessions: RwLock<BTreeMap<EntityId, MapId>>,
}

impl SessionManager {
    /// Create new session manager.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
            entity_sessions: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create a session for a map.
    pub async fn create_session(
        &self,
        map: &MapConfig,
        config: SessionConfig,
    ) -> Result<Arc<RwLock<MapSession>>, SessionError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&map.id) {
            return Err(SessionError::DuplicateMap(map.id.clone()));
        }

        let session = Arc::new(RwLock::new(MapSession::from_config(map, config)?));
        sessions.insert(map.id.clone(), session.clone());
        info!(map = %map.id, "session created");
        Ok(session)
    }

    /// Get a session by map id.
    pub async fn get_session(&self, id: &str) -> Option<Arc<RwLock<MapSession>>> {
        let sessions = self.sessions.read().await;
        sessions.get(id).cloned()
    }

    /// Get the session an entity lives in.
    pub async fn get_entity_session(&self, entity_id: &EntityId) -> Option<Arc<RwLock<MapSession>>> {
        let map = self.entity_sessions.read().await.get(entity_id).cloned()?;
        self.get_session(&map).await
    }

    /// Register an entity in a session.
    pub async fn register_entity(&self, entity_id: EntityId, map: MapId) {
        let mut entity_sessions = self.entity_sessions.write().await;
        entity_sessions.insert(entity_id, map);
    }

    /// Unregister an entity.
    pub async fn unregister_entity(&self, entity_id: &EntityId) {
        let mut entity_sessions = self.entity_sessions.write().await;
        entity_sessions.remove(entity_id);
    }

    /// Remove a session.
    pub async fn remove_session(&self, id: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(id);
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }

    /// Run one tick on every session, in map id order.
    pub async fn tick_all(&self) -> usize {
        let sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        let mut ticked = 0;
        for session in sessions {
            if session.write().await.run_tick().is_some() {
                ticked += 1;
            }
        }
        ticked
    }

    /// Close every session.
    pub async fn close_all(&self, reason: &str) {
        let sessions = self.sessions.read().await;
        for session in sessions.values() {
            session.write().await.close(reason);
        }
    }

    /// Cleanup closed sessions.
    pub async fn cleanup(&self) {
        let mut sessions = self.sessions.write().await;
        let mut to_remove = Vec::new();

        for (id, session) in sessions.iter() {
            if session.read().await.is_closed() {
                to_remove.push(id.clone());
            }
        }

        for id in to_remove {
            sessions.remove(&id);
        }
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
