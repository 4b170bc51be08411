//! Application messages exchanged over a connection.

use serde::{Deserialize, Serialize};

use crate::{KeyState, Position, UserState};

/// Messages a client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Handshake request. Only valid as the very first message.
    Connect { name: String },
    /// Latest key state, authenticated by the token from `Welcome`.
    Update(ClientUpdate),
}

/// Key-state update sent periodically by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientUpdate {
    pub auth: String,
    pub name: String,
    pub keys: KeyState,
}

/// Messages the server sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Handshake accepted; carries the session's auth token.
    Welcome { auth: String },
    /// Handshake refused. The server closes the connection afterwards.
    Rejected { reason: String },
    /// Start of a world broadcast.
    Tick { tick: u64 },
    Movables(Vec<MovableView>),
    Unmovables(Vec<UnmovableView>),
}

/// Visual state owned by each element. The server stores it but does not
/// simulate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Animation {
    pub state: u32,
    pub state_delay_tick_end: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovableKind {
    Player,
    Enemy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnmovableTag {
    Wall,
    Box,
    Bomb,
}

/// Broadcast view of a movable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovableView {
    pub id: u64,
    pub kind: MovableKind,
    pub position: Position,
    pub animation: Animation,
    pub bomb_count: u32,
    /// Display name and state of the owning user, if any.
    pub owner: Option<(String, UserState)>,
}

/// Broadcast view of an unmovable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnmovableView {
    pub id: u64,
    pub kind: UnmovableTag,
    pub position: Position,
    pub animation: Animation,
    pub destroy_tick: Option<u64>,
}
