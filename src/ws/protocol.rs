//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::game::physics::Vec2;

/// Entity type tag as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Player,
    Bullet,
}

/// One entity as serialized into a `Data` snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySnapshot {
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub center: Vec2,
    pub radius: f32,
    /// Display name, present only for players
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMsg {
    /// Chat line, rebroadcast as `User`
    Message { message: String },

    /// Replace the pressed movement key set.
    /// Entries outside {w,a,s,d} are dropped server-side.
    Move { keys: Vec<String> },

    /// Clear the pressed movement key set
    MoveStop,

    /// Fire a bullet at the given heading (radians) from the player's center
    Bullet { rad: f32 },
}

/// Messages sent from server to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMsg {
    /// Full world snapshot, sent every snapshot tick
    Data {
        entities: HashMap<Uuid, EntitySnapshot>,
        wall: Vec<Vec2>,
    },

    /// Fire cue for other clients, no payload
    Bullet,

    /// A player was hit by someone else's bullet
    Death { name: String, by: String },

    /// A player (re)appeared
    Spawn { name: String },

    /// A player joined the room
    Join { name: String },

    /// A player left the room
    Left { name: String },

    /// Chat line
    User { name: String, message: String },
}

/// First message on every accepted socket: join result.
/// `error` is set only when the join was rejected (name conflict).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginAck {
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
}
