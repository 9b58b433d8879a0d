//! Server orchestration: configuration, the system registrations, message
//! routing, and the fixed-rate tick loop.
//!
//! The tick loop owns the world. Network callbacks never touch it; they feed
//! `NetEvent`s through a channel and the loop drains that channel at the top
//! of every tick before running the systems, so two runs with the same event
//! stream produce the same world.

use crate::input::InputPipeline;
use crate::network::{self, ConnectionId, ConnectionTable, NetEvent};
use crate::physics::PhysicsAuthority;
use crate::scheduler::{Scheduler, System, SystemResult};
use crate::session::{ActionKind, ClientId, SessionManager};
use crate::utils::get_timestamp;
use crate::world::{
    Component, ComponentKind, ComponentRegistry, EntityId, World,
};
use log::{debug, info, warn};
use rand::Rng;
use shared::protocol::{
    decode_client, ChatChannel, ClientMessage, EntityState, PlayerData, ServerMessage,
    VentureAction,
};
use shared::{default_terrain, Vec2, SPAWN_POSITION};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

const MAX_CHAT_LEN: usize = 240;

type Shared<T> = Arc<Mutex<T>>;
type ServerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub tick_rate: u32,
    /// How long a disconnected client's entity survives before removal.
    pub entity_grace: Duration,
    /// How long a disconnected session record survives before removal.
    pub session_timeout: Duration,
    /// How often the session system sweeps for expiry.
    pub sweep_interval: Duration,
    /// Delta-snapshot broadcast cadence.
    pub snapshot_interval: Duration,
    /// A connection silent for this long is force-closed.
    pub heartbeat_window: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            tick_rate: 60,
            entity_grace: Duration::from_secs(60),
            session_timeout: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(1),
            snapshot_interval: Duration::from_millis(50),
            heartbeat_window: Duration::from_secs(30),
        }
    }
}

/// Lightweight group registry for the `venture` message family.
#[derive(Default)]
pub struct VentureRegistry {
    next_id: u64,
    members: HashMap<u64, Vec<ClientId>>,
    leaders: HashMap<u64, ClientId>,
    by_member: HashMap<ClientId, u64>,
}

impl VentureRegistry {
    pub fn new() -> Self {
        VentureRegistry::default()
    }

    /// Creates a venture led by `client`. Fails if the client is already in
    /// one.
    pub fn start(&mut self, client: ClientId) -> Option<u64> {
        if self.by_member.contains_key(&client) {
            return None;
        }
        self.next_id += 1;
        let id = self.next_id;
        self.members.insert(id, vec![client]);
        self.leaders.insert(id, client);
        self.by_member.insert(client, id);
        Some(id)
    }

    pub fn join(&mut self, client: ClientId, venture_id: u64) -> bool {
        if self.by_member.contains_key(&client) {
            return false;
        }
        match self.members.get_mut(&venture_id) {
            Some(members) => {
                members.push(client);
                self.by_member.insert(client, venture_id);
                true
            }
            None => false,
        }
    }

    /// Removes the client from its venture; an emptied venture is dropped.
    pub fn leave(&mut self, client: ClientId) -> Option<u64> {
        let venture_id = self.by_member.remove(&client)?;
        if let Some(members) = self.members.get_mut(&venture_id) {
            members.retain(|&m| m != client);
            if members.is_empty() {
                self.members.remove(&venture_id);
                self.leaders.remove(&venture_id);
            } else if self.leaders.get(&venture_id) == Some(&client) {
                // Leadership passes to the longest-standing member
                self.leaders.insert(venture_id, self.members[&venture_id][0]);
            }
        }
        Some(venture_id)
    }

    /// Leader-only: dissolves the venture, returning its final roster.
    pub fn complete(&mut self, client: ClientId) -> Option<(u64, Vec<ClientId>)> {
        let venture_id = *self.by_member.get(&client)?;
        if self.leaders.get(&venture_id) != Some(&client) {
            return None;
        }
        let members = self.members.remove(&venture_id)?;
        self.leaders.remove(&venture_id);
        for member in &members {
            self.by_member.remove(member);
        }
        Some((venture_id, members))
    }

    pub fn venture_of(&self, client: ClientId) -> Option<u64> {
        self.by_member.get(&client).copied()
    }

    pub fn members(&self, venture_id: u64) -> Option<&[ClientId]> {
        self.members.get(&venture_id).map(Vec::as_slice)
    }
}

/// Full authoritative snapshot of every replicated entity.
fn snapshot(world: &World) -> Vec<EntityState> {
    world
        .entities_with(&[
            ComponentKind::Transform,
            ComponentKind::Motion,
            ComponentKind::NetSync,
        ])
        .into_iter()
        .filter_map(|id| entity_state(world, id))
        .collect()
}

fn entity_state(world: &World, id: EntityId) -> Option<EntityState> {
    let transform = world.transform(id)?;
    let motion = world.motion(id)?;
    let sync = world.net_sync(id)?;
    Some(EntityState {
        id,
        position: transform.position,
        rotation: transform.rotation,
        velocity: motion.velocity,
        grounded: motion.grounded,
        last_processed_input: sync.last_processed_input,
    })
}

/// Sweeps expired entities and stale session records.
struct SessionSystem {
    sessions: Shared<SessionManager>,
    pipeline: Shared<InputPipeline>,
    physics: Shared<PhysicsAuthority>,
    table: Shared<ConnectionTable>,
    entity_grace: Duration,
    session_timeout: Duration,
    sweep_interval: Duration,
    last_sweep: Instant,
}

impl System for SessionSystem {
    fn name(&self) -> &'static str {
        "sessions"
    }

    fn update(&mut self, world: &mut World, _dt: f32) -> SystemResult {
        if self.last_sweep.elapsed() < self.sweep_interval {
            return Ok(());
        }
        self.last_sweep = Instant::now();

        let expired = self
            .sessions
            .lock()
            .unwrap()
            .expired_entities(self.entity_grace);
        for &(client, entity) in &expired {
            // Body release must precede despawn or the authority keeps a
            // colliding ghost
            self.physics.lock().unwrap().remove_body(entity);
            self.pipeline.lock().unwrap().remove_entity(entity);
            world.despawn(entity);
            info!(
                "entity {} of client {} removed after reconnect grace",
                entity, client
            );
            self.table
                .lock()
                .unwrap()
                .broadcast(&ServerMessage::PlayerLeft { player_id: entity });
        }
        let mut sessions = self.sessions.lock().unwrap();
        for &(client, _) in &expired {
            sessions.release_entities(client);
        }
        sessions.cleanup_sessions(self.session_timeout);
        Ok(())
    }
}

/// Keeps input buffers aligned with the live entity set.
struct InputSystem {
    pipeline: Shared<InputPipeline>,
}

impl System for InputSystem {
    fn name(&self) -> &'static str {
        "input"
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec!["sessions"]
    }

    fn update(&mut self, world: &mut World, _dt: f32) -> SystemResult {
        self.pipeline
            .lock()
            .unwrap()
            .retain_entities(|entity| world.contains(entity));
        Ok(())
    }
}

/// Runs the authoritative simulation step.
struct PhysicsSystem {
    physics: Shared<PhysicsAuthority>,
    pipeline: Shared<InputPipeline>,
}

impl System for PhysicsSystem {
    fn name(&self) -> &'static str {
        "physics"
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec!["input"]
    }

    fn update(&mut self, world: &mut World, dt: f32) -> SystemResult {
        let mut physics = self.physics.lock().unwrap();
        let mut pipeline = self.pipeline.lock().unwrap();
        let events = physics.step(world, &mut pipeline, dt);
        for event in events {
            debug!("physics event: {:?}", event);
        }
        Ok(())
    }
}

/// Broadcasts dirty-entity deltas on a fixed cadence.
struct SyncSystem {
    table: Shared<ConnectionTable>,
    snapshot_interval: Duration,
    last_broadcast: Instant,
}

impl System for SyncSystem {
    fn name(&self) -> &'static str {
        "sync"
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec!["physics"]
    }

    fn update(&mut self, world: &mut World, _dt: f32) -> SystemResult {
        if self.last_broadcast.elapsed() < self.snapshot_interval {
            return Ok(());
        }
        self.last_broadcast = Instant::now();

        let dirty: Vec<EntityId> = world
            .entities_with(&[
                ComponentKind::Transform,
                ComponentKind::Motion,
                ComponentKind::NetSync,
            ])
            .into_iter()
            .filter(|&id| world.net_sync(id).map(|s| s.dirty).unwrap_or(false))
            .collect();
        if dirty.is_empty() {
            return Ok(());
        }

        let entities: Vec<EntityState> = dirty
            .iter()
            .filter_map(|&id| entity_state(world, id))
            .collect();
        self.table.lock().unwrap().broadcast(&ServerMessage::EntityUpdates {
            entities,
            timestamp: get_timestamp(),
        });
        for id in dirty {
            if let Some(sync) = world.net_sync_mut(id) {
                sync.dirty = false;
            }
        }
        Ok(())
    }
}

pub struct GameServer {
    config: ServerConfig,
    local_addr: SocketAddr,
    world: World,
    scheduler: Scheduler,
    sessions: Shared<SessionManager>,
    pipeline: Shared<InputPipeline>,
    physics: Shared<PhysicsAuthority>,
    table: Shared<ConnectionTable>,
    ventures: VentureRegistry,
    events_rx: mpsc::UnboundedReceiver<NetEvent>,
    next_client_id: ClientId,
}

impl GameServer {
    /// Binds the listener and initializes the world and systems. Missing
    /// terrain or a system dependency cycle aborts startup.
    pub async fn bind(config: ServerConfig) -> Result<GameServer, ServerError> {
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let local_addr = listener.local_addr()?;

        let physics = Arc::new(Mutex::new(PhysicsAuthority::new(default_terrain())?));
        let sessions = Arc::new(Mutex::new(SessionManager::new()));
        let pipeline = Arc::new(Mutex::new(InputPipeline::new()));
        let table = Arc::new(Mutex::new(ConnectionTable::new()));

        let mut world = World::new(ComponentRegistry::with_defaults());
        let mut scheduler = Scheduler::new();
        scheduler.register(
            Box::new(SessionSystem {
                sessions: Arc::clone(&sessions),
                pipeline: Arc::clone(&pipeline),
                physics: Arc::clone(&physics),
                table: Arc::clone(&table),
                entity_grace: config.entity_grace,
                session_timeout: config.session_timeout,
                sweep_interval: config.sweep_interval,
                last_sweep: Instant::now(),
            }),
            10,
        );
        scheduler.register(
            Box::new(InputSystem {
                pipeline: Arc::clone(&pipeline),
            }),
            15,
        );
        scheduler.register(
            Box::new(PhysicsSystem {
                physics: Arc::clone(&physics),
                pipeline: Arc::clone(&pipeline),
            }),
            20,
        );
        scheduler.register(
            Box::new(SyncSystem {
                table: Arc::clone(&table),
                snapshot_interval: config.snapshot_interval,
                last_broadcast: Instant::now(),
            }),
            30,
        );
        scheduler.init_all(&mut world)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(network::run_heartbeat_monitor(
            Arc::clone(&table),
            events_tx.clone(),
            config.heartbeat_window,
        ));
        tokio::spawn(network::run_accept_loop(
            listener,
            Arc::clone(&table),
            events_tx,
        ));

        info!("server listening on {}", local_addr);
        Ok(GameServer {
            config,
            local_addr,
            world,
            scheduler,
            sessions,
            pipeline,
            physics,
            table,
            ventures: VentureRegistry::new(),
            events_rx,
            next_client_id: 0,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Runs the tick loop until ctrl-c. The accept loop and heartbeat
    /// monitor were spawned at bind time; their events queue until drained
    /// here.
    pub async fn run(mut self) -> Result<(), ServerError> {
        let tick = Duration::from_secs_f64(1.0 / self.config.tick_rate.max(1) as f64);
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_tick = Instant::now();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Instant::now();
                    // A stalled host must not produce one giant catch-up step
                    let dt = (now - last_tick).as_secs_f32().min(0.1);
                    last_tick = now;

                    while let Ok(event) = self.events_rx.try_recv() {
                        self.route_event(event);
                    }
                    self.scheduler.update_all(&mut self.world, dt);
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested");
                    break;
                }
            }
        }

        self.table.lock().unwrap().close_all();
        self.scheduler.destroy_all(&mut self.world);
        Ok(())
    }

    fn route_event(&mut self, event: NetEvent) {
        match event {
            NetEvent::Connected { connection, peer } => {
                debug!("connection {} from {} awaiting join", connection, peer);
            }
            NetEvent::Message { connection, text } => {
                self.handle_message(connection, &text);
            }
            NetEvent::Disconnected { connection } => {
                self.handle_disconnected(connection);
            }
        }
    }

    fn handle_message(&mut self, connection: ConnectionId, text: &str) {
        let message = match decode_client(text) {
            Ok(message) => message,
            Err(e) => {
                // Unknown or malformed messages are dropped, never fatal to
                // the connection
                warn!("undecodable message on connection {}: {}", connection, e);
                return;
            }
        };
        self.table.lock().unwrap().touch(connection);

        match message {
            ClientMessage::Join {
                name,
                character_class,
                resume_token,
            } => self.handle_join(connection, name, character_class, resume_token),
            ClientMessage::Input { sequence, input } => {
                self.handle_input(connection, sequence, input)
            }
            ClientMessage::Chat {
                message,
                channel,
                target_id,
            } => self.handle_chat(connection, message, channel, target_id),
            ClientMessage::Venture { action, venture_id } => {
                self.handle_venture(connection, action, venture_id)
            }
            ClientMessage::Heartbeat {} => {}
        }
    }

    fn handle_join(
        &mut self,
        connection: ConnectionId,
        name: Option<String>,
        character_class: Option<String>,
        resume_token: Option<String>,
    ) {
        if self.table.lock().unwrap().client_of(connection).is_some() {
            self.table.lock().unwrap().send_to_connection(
                connection,
                &ServerMessage::JoinError {
                    error: "already joined".to_string(),
                },
            );
            return;
        }

        // A valid resume token rebinds the old session instead of creating a
        // new one. The lookup result is copied out so the session lock is
        // released before the reconnect path takes it again.
        if let Some(token) = resume_token.as_deref() {
            let resumed = self.sessions.lock().unwrap().client_by_token(token);
            if let Some(client) = resumed {
                self.handle_reconnect(connection, client);
                return;
            }
            debug!(
                "connection {} presented unknown resume token, treating as fresh join",
                connection
            );
        }

        self.next_client_id += 1;
        let client = self.next_client_id;
        let token = format!("{:016x}", rand::thread_rng().gen::<u64>());

        let spawn = SPAWN_POSITION;
        let entity = match self.spawn_avatar(name, character_class, spawn) {
            Ok(entity) => entity,
            Err(e) => {
                warn!("failed to spawn avatar for client {}: {}", client, e);
                self.table.lock().unwrap().send_to_connection(
                    connection,
                    &ServerMessage::JoinError {
                        error: "join failed".to_string(),
                    },
                );
                return;
            }
        };
        self.physics.lock().unwrap().create_body(entity, spawn);

        {
            let mut sessions = self.sessions.lock().unwrap();
            sessions.create_session(client, token.clone(), connection);
            sessions.associate_entity(client, entity);
        }
        self.table.lock().unwrap().bind_client(connection, client);

        let player_data = self.player_data(entity);
        let table = self.table.lock().unwrap();
        table.send_to_connection(
            connection,
            &ServerMessage::JoinResponse {
                success: true,
                player_id: entity,
                player_data: player_data.clone(),
                resume_token: token,
            },
        );
        table.send_to_connection(
            connection,
            &ServerMessage::WorldState {
                entities: snapshot(&self.world),
                timestamp: get_timestamp(),
            },
        );
        table.broadcast_except(
            client,
            &ServerMessage::PlayerJoined {
                player_id: entity,
                player_data,
            },
        );
        info!("client {} joined as entity {}", client, entity);
    }

    fn handle_reconnect(&mut self, connection: ConnectionId, client: ClientId) {
        let entity = {
            let mut sessions = self.sessions.lock().unwrap();
            sessions.reconnect_session(client, connection);
            sessions.session(client).and_then(|s| s.active_entity)
        };

        // The entity may have expired during the disconnect; respawn then
        let entity = match entity {
            Some(entity) if self.world.contains(entity) => entity,
            _ => {
                let spawn = SPAWN_POSITION;
                let entity = match self.spawn_avatar(None, None, spawn) {
                    Ok(entity) => entity,
                    Err(e) => {
                        warn!("failed to respawn avatar for client {}: {}", client, e);
                        return;
                    }
                };
                self.physics.lock().unwrap().create_body(entity, spawn);
                self.sessions
                    .lock()
                    .unwrap()
                    .associate_entity(client, entity);
                entity
            }
        };

        self.table.lock().unwrap().bind_client(connection, client);
        let token = self
            .sessions
            .lock()
            .unwrap()
            .session(client)
            .map(|s| s.resume_token.clone())
            .unwrap_or_default();
        let player_data = self.player_data(entity);

        let table = self.table.lock().unwrap();
        table.send_to_connection(
            connection,
            &ServerMessage::JoinResponse {
                success: true,
                player_id: entity,
                player_data,
                resume_token: token,
            },
        );
        table.send_to_connection(
            connection,
            &ServerMessage::WorldState {
                entities: snapshot(&self.world),
                timestamp: get_timestamp(),
            },
        );
        table.broadcast_except(client, &ServerMessage::PlayerReconnected { player_id: entity });
        info!("client {} reconnected as entity {}", client, entity);
    }

    fn spawn_avatar(
        &mut self,
        name: Option<String>,
        character_class: Option<String>,
        spawn: Vec2,
    ) -> Result<EntityId, ServerError> {
        let components = vec![
            self.world.registry().build(ComponentKind::Transform, |c| {
                if let Component::Transform(t) = c {
                    t.position = spawn;
                    t.prev_position = spawn;
                }
            })?,
            self.world.registry().build(ComponentKind::Motion, |_| {})?,
            self.world.registry().build(ComponentKind::Avatar, |c| {
                if let Component::Avatar(a) = c {
                    if let Some(name) = name {
                        a.name = name;
                    }
                    if let Some(class) = character_class {
                        a.character_class = class;
                    }
                }
            })?,
            self.world
                .registry()
                .build(ComponentKind::PhysicsProxy, |_| {})?,
            self.world.registry().build(ComponentKind::NetSync, |c| {
                if let Component::NetSync(n) = c {
                    n.dirty = true;
                }
            })?,
        ];
        Ok(self.world.spawn(components)?)
    }

    fn player_data(&self, entity: EntityId) -> PlayerData {
        let avatar = self.world.avatar(entity);
        PlayerData {
            name: avatar.map(|a| a.name.clone()).unwrap_or_default(),
            character_class: avatar
                .map(|a| a.character_class.clone())
                .unwrap_or_default(),
            position: self
                .world
                .transform(entity)
                .map(|t| t.position)
                .unwrap_or(SPAWN_POSITION),
        }
    }

    fn client_and_entity(&self, connection: ConnectionId) -> Option<(ClientId, EntityId)> {
        let client = self.table.lock().unwrap().client_of(connection)?;
        let entity = self
            .sessions
            .lock()
            .unwrap()
            .session(client)
            .and_then(|s| s.active_entity)?;
        Some((client, entity))
    }

    fn handle_input(
        &mut self,
        connection: ConnectionId,
        sequence: u32,
        input: shared::protocol::InputPayload,
    ) {
        let Some((client, entity)) = self.client_and_entity(connection) else {
            debug!("input from unjoined connection {} dropped", connection);
            return;
        };
        if !self
            .sessions
            .lock()
            .unwrap()
            .check_rate_limit(client, ActionKind::Input)
        {
            debug!("input from client {} rate limited", client);
            return;
        }
        if let Err(reason) = self
            .pipeline
            .lock()
            .unwrap()
            .accept(entity, sequence, input, get_timestamp())
        {
            debug!(
                "input seq {} from client {} rejected: {:?}",
                sequence, client, reason
            );
        }
    }

    fn handle_chat(
        &mut self,
        connection: ConnectionId,
        message: String,
        channel: ChatChannel,
        target_id: Option<u64>,
    ) {
        let Some((client, entity)) = self.client_and_entity(connection) else {
            return;
        };
        if !self
            .sessions
            .lock()
            .unwrap()
            .check_rate_limit(client, ActionKind::Chat)
        {
            return;
        }
        if message.is_empty() || message.len() > MAX_CHAT_LEN {
            self.table.lock().unwrap().send_to_client(
                client,
                &ServerMessage::ChatError {
                    error: "invalid message".to_string(),
                },
            );
            return;
        }

        let from_name = self
            .world
            .avatar(entity)
            .map(|a| a.name.clone())
            .unwrap_or_default();
        let chat = ServerMessage::Chat {
            from_id: entity,
            from_name,
            channel,
            message,
        };

        match channel {
            ChatChannel::Global => {
                self.table.lock().unwrap().broadcast(&chat);
            }
            ChatChannel::Venture => {
                let members = self
                    .ventures
                    .venture_of(client)
                    .and_then(|id| self.ventures.members(id).map(<[ClientId]>::to_vec));
                match members {
                    Some(members) => {
                        self.table.lock().unwrap().broadcast_to_group(&members, &chat)
                    }
                    None => self.table.lock().unwrap().send_to_client(
                        client,
                        &ServerMessage::ChatError {
                            error: "not in a venture".to_string(),
                        },
                    ),
                }
            }
            ChatChannel::Whisper => {
                let recipient =
                    target_id.and_then(|id| self.sessions.lock().unwrap().owner_of(id));
                match recipient {
                    Some(recipient) => {
                        let table = self.table.lock().unwrap();
                        table.send_to_client(recipient, &chat);
                        // Echo so the sender's log shows the whisper too
                        if recipient != client {
                            table.send_to_client(client, &chat);
                        }
                    }
                    None => self.table.lock().unwrap().send_to_client(
                        client,
                        &ServerMessage::ChatError {
                            error: "unknown recipient".to_string(),
                        },
                    ),
                }
            }
        }
    }

    fn handle_venture(
        &mut self,
        connection: ConnectionId,
        action: VentureAction,
        venture_id: Option<u64>,
    ) {
        let Some((client, _)) = self.client_and_entity(connection) else {
            return;
        };
        if !self
            .sessions
            .lock()
            .unwrap()
            .check_rate_limit(client, ActionKind::Other)
        {
            return;
        }

        let outcome = match action {
            VentureAction::Start => self
                .ventures
                .start(client)
                .map(|id| (id, vec![client])),
            VentureAction::Join => venture_id.and_then(|id| {
                if self.ventures.join(client, id) {
                    self.ventures.members(id).map(|m| (id, m.to_vec()))
                } else {
                    None
                }
            }),
            VentureAction::Leave => self.ventures.leave(client).map(|id| {
                let mut roster = self
                    .ventures
                    .members(id)
                    .map(<[ClientId]>::to_vec)
                    .unwrap_or_default();
                // The leaver hears the update too
                roster.push(client);
                (id, roster)
            }),
            VentureAction::Complete => self.ventures.complete(client),
        };

        let Some((venture_id, recipients)) = outcome else {
            debug!(
                "venture action {:?} by client {} had no effect",
                action, client
            );
            return;
        };

        let member_ids: Vec<u64> = {
            let sessions = self.sessions.lock().unwrap();
            self.ventures
                .members(venture_id)
                .map(<[ClientId]>::to_vec)
                .unwrap_or_default()
                .iter()
                .filter_map(|&c| sessions.session(c).and_then(|s| s.active_entity))
                .collect()
        };
        self.table.lock().unwrap().broadcast_to_group(
            &recipients,
            &ServerMessage::VentureUpdate {
                venture_id,
                action,
                member_ids,
            },
        );
    }

    fn handle_disconnected(&mut self, connection: ConnectionId) {
        let client = self.table.lock().unwrap().unregister(connection);
        if let Some(client) = client {
            self.sessions.lock().unwrap().disconnect_session(client);
            self.ventures.leave(client);
        }
    }
}
