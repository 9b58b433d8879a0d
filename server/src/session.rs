//! Session lifecycle and abuse prevention for the multiplayer server.
//!
//! A session is the server-side record of one logical client across
//! reconnects: socket close marks it disconnected instead of deleting it, so
//! a rejoin within the grace period resumes control of the same entity. Rate
//! limiting lives here too; denied actions are dropped silently so abusive
//! clients get no probing feedback.

use crate::network::ConnectionId;
use crate::world::EntityId;
use log::{debug, info};
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub type ClientId = u32;

/// Rate-limit window length.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Input,
    Chat,
    Other,
}

impl ActionKind {
    /// Per-window ceiling for this action class.
    pub fn ceiling(self) -> u32 {
        match self {
            ActionKind::Input => 1800,
            ActionKind::Chat => 60,
            ActionKind::Other => 100,
        }
    }

    fn slot(self) -> usize {
        match self {
            ActionKind::Input => 0,
            ActionKind::Chat => 1,
            ActionKind::Other => 2,
        }
    }
}

#[derive(Debug)]
pub struct Session {
    pub client_id: ClientId,
    pub resume_token: String,
    pub connection: Option<ConnectionId>,
    pub owned_entities: Vec<EntityId>,
    pub active_entity: Option<EntityId>,
    pub connected: bool,
    pub first_connected_at: Instant,
    pub last_connected_at: Instant,
    /// None while connected.
    pub disconnected_at: Option<Instant>,
    pub rate_window_started: Instant,
    rate_counts: [u32; 3],
}

impl Session {
    fn new(client_id: ClientId, resume_token: String, connection: ConnectionId) -> Self {
        let now = Instant::now();
        Session {
            client_id,
            resume_token,
            connection: Some(connection),
            owned_entities: Vec::new(),
            active_entity: None,
            connected: true,
            first_connected_at: now,
            last_connected_at: now,
            disconnected_at: None,
            rate_window_started: now,
            rate_counts: [0; 3],
        }
    }

    /// Counts one action against the window and reports whether it is still
    /// under the ceiling. The window resets lazily once 60 s have elapsed.
    pub fn check_rate_limit(&mut self, action: ActionKind) -> bool {
        if self.rate_window_started.elapsed() >= RATE_WINDOW {
            self.rate_window_started = Instant::now();
            self.rate_counts = [0; 3];
        }
        let slot = action.slot();
        self.rate_counts[slot] += 1;
        self.rate_counts[slot] <= action.ceiling()
    }
}

#[derive(Default)]
pub struct SessionManager {
    sessions: HashMap<ClientId, Session>,
    /// Reverse lookup entity -> owning client.
    entity_owner: HashMap<EntityId, ClientId>,
    token_index: HashMap<String, ClientId>,
}

impl SessionManager {
    pub fn new() -> Self {
        SessionManager::default()
    }

    /// Creates a session for a freshly identified client. Fails silently
    /// (returns false) if the client id is already taken; callers are
    /// expected to check first.
    pub fn create_session(
        &mut self,
        client_id: ClientId,
        resume_token: String,
        connection: ConnectionId,
    ) -> bool {
        if self.sessions.contains_key(&client_id) {
            return false;
        }
        self.token_index.insert(resume_token.clone(), client_id);
        self.sessions
            .insert(client_id, Session::new(client_id, resume_token, connection));
        info!("session created for client {}", client_id);
        true
    }

    /// Marks the session disconnected without deleting it, which is what
    /// makes reconnection possible.
    pub fn disconnect_session(&mut self, client_id: ClientId) {
        if let Some(session) = self.sessions.get_mut(&client_id) {
            session.connected = false;
            session.connection = None;
            session.disconnected_at = Some(Instant::now());
            info!("client {} disconnected", client_id);
        }
    }

    /// Rebinds a returning client to a new connection. Entity ownership is
    /// untouched.
    pub fn reconnect_session(&mut self, client_id: ClientId, connection: ConnectionId) -> bool {
        if let Some(session) = self.sessions.get_mut(&client_id) {
            session.connected = true;
            session.connection = Some(connection);
            session.disconnected_at = None;
            session.last_connected_at = Instant::now();
            info!("client {} reconnected", client_id);
            true
        } else {
            false
        }
    }

    /// Appends to the owned-entity list; the first associated entity becomes
    /// the active one.
    pub fn associate_entity(&mut self, client_id: ClientId, entity_id: EntityId) {
        if let Some(session) = self.sessions.get_mut(&client_id) {
            session.owned_entities.push(entity_id);
            if session.active_entity.is_none() {
                session.active_entity = Some(entity_id);
            }
            self.entity_owner.insert(entity_id, client_id);
        }
    }

    pub fn session(&self, client_id: ClientId) -> Option<&Session> {
        self.sessions.get(&client_id)
    }

    pub fn session_mut(&mut self, client_id: ClientId) -> Option<&mut Session> {
        self.sessions.get_mut(&client_id)
    }

    pub fn owner_of(&self, entity_id: EntityId) -> Option<ClientId> {
        self.entity_owner.get(&entity_id).copied()
    }

    pub fn client_by_token(&self, token: &str) -> Option<ClientId> {
        self.token_index.get(token).copied()
    }

    pub fn connected_clients(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self
            .sessions
            .values()
            .filter(|s| s.connected)
            .map(|s| s.client_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn check_rate_limit(&mut self, client_id: ClientId, action: ActionKind) -> bool {
        match self.sessions.get_mut(&client_id) {
            Some(session) => session.check_rate_limit(action),
            None => false,
        }
    }

    /// Entities whose owning session has been disconnected for longer than
    /// the grace period. The caller tears down the physics body and world
    /// entity, then calls `release_entities`.
    pub fn expired_entities(&self, grace: Duration) -> Vec<(ClientId, EntityId)> {
        let mut expired = Vec::new();
        for session in self.sessions.values() {
            if let Some(disconnected_at) = session.disconnected_at {
                if disconnected_at.elapsed() > grace {
                    for &entity in &session.owned_entities {
                        expired.push((session.client_id, entity));
                    }
                }
            }
        }
        expired.sort_unstable();
        expired
    }

    /// Drops the ownership records after the world entities were removed.
    pub fn release_entities(&mut self, client_id: ClientId) {
        if let Some(session) = self.sessions.get_mut(&client_id) {
            for entity in session.owned_entities.drain(..) {
                self.entity_owner.remove(&entity);
            }
            session.active_entity = None;
        }
    }

    /// Permanently removes disconnected sessions older than `timeout`,
    /// including their reverse-lookup and token entries. Returns the removed
    /// client ids.
    pub fn cleanup_sessions(&mut self, timeout: Duration) -> Vec<ClientId> {
        let stale: Vec<ClientId> = self
            .sessions
            .values()
            .filter(|session| {
                session
                    .disconnected_at
                    .map(|at| at.elapsed() > timeout)
                    .unwrap_or(false)
            })
            .map(|session| session.client_id)
            .collect();

        for client_id in &stale {
            if let Some(session) = self.sessions.remove(client_id) {
                for entity in &session.owned_entities {
                    self.entity_owner.remove(entity);
                }
                self.token_index.remove(&session.resume_token);
                debug!("session for client {} permanently removed", client_id);
            }
        }
        stale
    }
}
