//! Wire protocol and game constants shared by the arena server and its clients.
//!
//! Every datagram carries exactly one [`Packet`], encoded with `bincode`.
//! All coordinates are pixels; one tile is [`TILE_SIZE`] pixels wide.

use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 1;

/// Pixel width and height of one map tile.
pub const TILE_SIZE: i32 = 40;
/// Delay between a bomb being placed and its detonation.
pub const FUSE_DURATION_MS: u64 = 2000;
/// Number of tiles a blast travels in each axis direction.
pub const BLAST_RADIUS: u32 = 2;
/// Period of the position broadcast loop.
pub const BROADCAST_INTERVAL_MS: u64 = 100;
/// Players needed before a pending game becomes joinable by others.
pub const MIN_PLAYERS: usize = 2;

pub type ClientId = u32;
pub type SlotId = usize;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum Facing {
    Up,
    #[default]
    Down,
    Left,
    Right,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileType {
    Empty,
    Destructible,
    Wall,
}

impl TileType {
    pub fn blocks_blast(&self) -> bool {
        !matches!(self, TileType::Empty)
    }
}

/// Lifecycle state of a lobby slot.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotState {
    #[default]
    Empty,
    SettingUp,
    Joinable,
    Full,
    InProgress,
}

/// Snapshot of a player as sent to clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerState {
    pub id: ClientId,
    pub x: f32,
    pub y: f32,
    pub facing: Facing,
    pub alive: bool,
}

/// One tile hit by a detonation, in pixel coordinates of the tile center.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Explosion {
    pub x: f32,
    pub y: f32,
    /// True when the tile was a destructible block that the blast cleared.
    pub destroyed_block: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SlotSummary {
    pub slot_id: SlotId,
    pub state: SlotState,
    pub num_players: usize,
    pub map_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    // Client -> server
    Connect {
        client_version: u32,
    },
    Heartbeat {
        timestamp: u64,
    },
    Disconnect,
    EnterLobby,
    HostGame {
        slot_id: SlotId,
    },
    SelectStage {
        map_name: String,
    },
    EnterPendingGame {
        slot_id: SlotId,
    },
    LeavePendingGame,
    StartGameOnServer,
    RegisterMap {
        width: u32,
        height: u32,
        tiles: Vec<TileType>,
    },
    MovePlayer {
        x: f32,
        y: f32,
        facing: Facing,
    },
    PlaceBomb {
        id: u32,
        x: f32,
        y: f32,
    },

    // Server -> client
    Connected {
        client_id: ClientId,
    },
    Disconnected {
        reason: String,
    },
    LobbySlots {
        slots: Vec<SlotSummary>,
    },
    SlotStateUpdate {
        slot_id: SlotId,
        state: SlotState,
        num_players: usize,
    },
    NewPlayer {
        id: ClientId,
    },
    RemovePlayer {
        id: ClientId,
    },
    StartGameOnClient {
        map_name: String,
        players: Vec<PlayerState>,
    },
    PlayerMoved {
        id: ClientId,
        x: f32,
        y: f32,
        facing: Facing,
        timestamp: u64,
    },
    /// Bomb ids are per owner and may be reused after a round reset, so a bomb
    /// is identified by `(round, owner_id, id)`.
    BombPlaced {
        id: u32,
        owner_id: ClientId,
        round: u32,
        x: f32,
        y: f32,
    },
    /// `round` is the round the bomb was placed in. A fuse that outlives its
    /// round reports no explosions.
    Detonate {
        id: u32,
        owner_id: ClientId,
        round: u32,
        explosions: Vec<Explosion>,
    },
    KillPlayer {
        id: ClientId,
    },
    Restart {
        players: Vec<PlayerState>,
    },
}
