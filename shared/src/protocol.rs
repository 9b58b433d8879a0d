//! Wire protocol: a JSON `{type, data}` envelope over a persistent duplex
//! connection. Adjacent tagging makes the envelope shape explicit; a message
//! whose `type` is unknown fails to decode and the caller logs and drops it
//! without closing the connection.

use crate::Vec2;
use serde::{Deserialize, Serialize};

/// Fixed skill set. Anything outside this enum fails validation at decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Skill {
    Dash,
    Strike,
    Guard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatChannel {
    Global,
    Venture,
    Whisper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VentureAction {
    Start,
    Join,
    Leave,
    Complete,
}

/// Raw per-command input payload. All fields optional; absent means "no
/// change requested". Range checks happen in the server input pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub move_direction: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jump: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skill: Option<Skill>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gather: Option<bool>,
}

/// Authoritative per-entity snapshot carried by `worldState` and
/// `entityUpdates`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityState {
    pub id: u64,
    pub position: Vec2,
    pub rotation: f32,
    pub velocity: Vec2,
    pub grounded: bool,
    pub last_processed_input: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerData {
    pub name: String,
    pub character_class: String,
    pub position: Vec2,
}

/// Client → server messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    Join {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        character_class: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resume_token: Option<String>,
    },
    Input {
        sequence: u32,
        input: InputPayload,
    },
    Chat {
        message: String,
        channel: ChatChannel,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_id: Option<u64>,
    },
    Venture {
        action: VentureAction,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        venture_id: Option<u64>,
    },
    Heartbeat {},
}

/// Server → client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    JoinResponse {
        success: bool,
        player_id: u64,
        player_data: PlayerData,
        resume_token: String,
    },
    JoinError {
        error: String,
    },
    Chat {
        from_id: u64,
        from_name: String,
        channel: ChatChannel,
        message: String,
    },
    ChatError {
        error: String,
    },
    VentureUpdate {
        venture_id: u64,
        action: VentureAction,
        member_ids: Vec<u64>,
    },
    PlayerJoined {
        player_id: u64,
        player_data: PlayerData,
    },
    PlayerReconnected {
        player_id: u64,
    },
    PlayerLeft {
        player_id: u64,
    },
    WorldState {
        entities: Vec<EntityState>,
        timestamp: u64,
    },
    EntityUpdates {
        entities: Vec<EntityState>,
        timestamp: u64,
    },
}

pub fn encode<T: Serialize>(msg: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

pub fn decode_client(text: &str) -> Result<ClientMessage, serde_json::Error> {
    serde_json::from_str(text)
}

pub fn decode_server(text: &str) -> Result<ServerMessage, serde_json::Error> {
    serde_json::from_str(text)
}
