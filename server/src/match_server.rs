//! Routing of client events to the lobby and the running matches.
//!
//! The match server never touches the network. Handlers record [`Effect`]s
//! (packets to send, fuses to arm) that the transport drains with
//! [`MatchServer::drain_effects`] and carries out. Events that refer to a
//! connection, slot, session or player that no longer exists are dropped.

use crate::lobby::Lobby;
use crate::maps::MapCatalog;
use crate::session::Session;
use crate::tile_grid::TileGrid;
use arena_shared::{
    ClientId, Explosion, Facing, Packet, SlotId, SlotState, TileType, BLAST_RADIUS,
    FUSE_DURATION_MS,
};
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Slot capacity used when the selected stage is not in the catalog.
const DEFAULT_CAPACITY: usize = 4;

/// Identifies the bomb a fuse belongs to. Looked up again when the fuse fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuseTask {
    pub match_id: SlotId,
    pub epoch: u64,
    pub round: u32,
    pub owner_id: ClientId,
    pub bomb_id: u32,
}

#[derive(Debug, Clone)]
pub enum Effect {
    Send { to: Vec<ClientId>, packet: Packet },
    Broadcast { packet: Packet },
    ScheduleFuse { task: FuseTask, delay: Duration },
}

pub struct MatchServer {
    lobby: Lobby,
    sessions: BTreeMap<SlotId, Session>,
    /// Every live connection and the slot it is assigned to, if any.
    connections: HashMap<ClientId, Option<SlotId>>,
    catalog: MapCatalog,
    fuse_duration: Duration,
    blast_radius: u32,
    next_epoch: u64,
    effects: Vec<Effect>,
}

impl MatchServer {
    pub fn new(slot_count: usize, catalog: MapCatalog) -> Self {
        Self {
            lobby: Lobby::new(slot_count),
            sessions: BTreeMap::new(),
            connections: HashMap::new(),
            catalog,
            fuse_duration: Duration::from_millis(FUSE_DURATION_MS),
            blast_radius: BLAST_RADIUS,
            next_epoch: 1,
            effects: Vec::new(),
        }
    }

    pub fn lobby(&self) -> &Lobby {
        &self.lobby
    }

    pub fn session(&self, slot_id: SlotId) -> Option<&Session> {
        self.sessions.get(&slot_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_connected(&self, client_id: ClientId) -> bool {
        self.connections.contains_key(&client_id)
    }

    pub fn slot_of(&self, client_id: ClientId) -> Option<SlotId> {
        self.connections.get(&client_id).copied().flatten()
    }

    pub fn drain_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub fn handle_connect(&mut self, client_id: ClientId) {
        self.connections.insert(client_id, None);
    }

    pub fn handle_packet(&mut self, client_id: ClientId, packet: Packet) {
        if !self.is_connected(client_id) {
            debug!("Dropping packet from unknown client {}", client_id);
            return;
        }

        match packet {
            Packet::EnterLobby => {
                let slots = self.lobby.summaries();
                self.send(vec![client_id], Packet::LobbySlots { slots });
            }
            Packet::HostGame { slot_id } => self.host_game(client_id, slot_id),
            Packet::SelectStage { map_name } => self.select_stage(client_id, &map_name),
            Packet::EnterPendingGame { slot_id } => self.enter_pending_game(client_id, slot_id),
            Packet::LeavePendingGame => self.leave(client_id),
            Packet::StartGameOnServer => self.start_game(client_id),
            Packet::RegisterMap {
                width,
                height,
                tiles,
            } => self.register_map(client_id, width, height, tiles),
            Packet::MovePlayer { x, y, facing } => self.move_player(client_id, x, y, facing),
            Packet::PlaceBomb { id, x, y } => self.place_bomb(client_id, id, x, y),
            Packet::Heartbeat { .. } => {}
            other => debug!("Unexpected packet from client {}: {:?}", client_id, other),
        }
    }

    /// Cleans up after a connection that is gone, according to its slot's state.
    pub fn handle_disconnect(&mut self, client_id: ClientId) {
        let Some(slot) = self.connections.remove(&client_id) else {
            return;
        };
        let Some(slot_id) = slot else {
            return;
        };

        match self.lobby.state(slot_id) {
            Some(SlotState::Joinable | SlotState::Full) => {
                self.leave_pending_game(client_id, slot_id);
            }
            Some(SlotState::SettingUp) => {
                if let Some(members) = self.lobby.abandon_setup(slot_id) {
                    info!("Slot {} abandoned during setup", slot_id);
                    for member in members {
                        if let Some(assigned) = self.connections.get_mut(&member) {
                            *assigned = None;
                        }
                    }
                    self.broadcast_slot_state(slot_id);
                }
            }
            Some(SlotState::InProgress) => self.leave_match(client_id, slot_id),
            Some(SlotState::Empty) | None => {}
        }
    }

    /// Resolves an expired fuse against whatever state the match is in now.
    pub fn handle_fuse(&mut self, task: FuseTask) {
        let Some(session) = self.sessions.get_mut(&task.match_id) else {
            debug!("Fuse for bomb {}/{} outlived its match", task.owner_id, task.bomb_id);
            return;
        };
        if session.epoch() != task.epoch {
            debug!("Fuse for bomb {}/{} outlived its match", task.owner_id, task.bomb_id);
            return;
        }

        let detonation = if session.round() == task.round {
            session.detonate_bomb(task.owner_id, task.bomb_id, self.blast_radius)
        } else {
            None
        };

        let (explosions, killed) = match detonation {
            Some((_, detonation)) => {
                let grid = session.grid();
                let explosions = detonation
                    .tiles
                    .iter()
                    .map(|tile| {
                        let (x, y) = grid.tile_center(tile.pos);
                        Explosion {
                            x,
                            y,
                            destroyed_block: tile.destroyed_block,
                        }
                    })
                    .collect();
                (explosions, detonation.killed_players)
            }
            None => {
                debug!("Bomb {}/{} vanished before its fuse", task.owner_id, task.bomb_id);
                (Vec::new(), Vec::new())
            }
        };

        self.send_to_match(
            task.match_id,
            Packet::Detonate {
                id: task.bomb_id,
                owner_id: task.owner_id,
                round: task.round,
                explosions,
            },
        );
        self.handle_player_deaths(task.match_id, &killed);
    }

    /// Sends every alive player's position to the members of its match.
    pub fn broadcast_positions(&mut self, timestamp: u64) {
        for (&slot_id, session) in &self.sessions {
            let members = match self.lobby.slot(slot_id) {
                Some(slot) if !slot.player_ids.is_empty() => slot.player_ids.clone(),
                _ => continue,
            };

            for player in session.alive_players() {
                self.effects.push(Effect::Send {
                    to: members.clone(),
                    packet: Packet::PlayerMoved {
                        id: player.id,
                        x: player.x,
                        y: player.y,
                        facing: player.facing,
                        timestamp,
                    },
                });
            }
        }
    }

    fn host_game(&mut self, client_id: ClientId, slot_id: SlotId) {
        if self.slot_of(client_id).is_some() {
            debug!("Client {} is already in a slot", client_id);
            return;
        }
        if self.lobby.host_game(slot_id, client_id).is_some() {
            info!("Client {} is hosting slot {}", client_id, slot_id);
            self.assign(client_id, Some(slot_id));
            self.broadcast_slot_state(slot_id);
        }
    }

    fn select_stage(&mut self, client_id: ClientId, map_name: &str) {
        let Some(slot_id) = self.slot_of(client_id) else {
            return;
        };
        let capacity = match self.catalog.get(map_name) {
            Ok(map) => map.max_players,
            Err(e) => {
                warn!("Client {} selected a stage the server cannot run: {}", client_id, e);
                DEFAULT_CAPACITY
            }
        };
        if self
            .lobby
            .select_stage(slot_id, client_id, map_name, capacity)
            .is_some()
        {
            debug!("Slot {} will play {}", slot_id, map_name);
        }
    }

    fn enter_pending_game(&mut self, client_id: ClientId, slot_id: SlotId) {
        if self.slot_of(client_id).is_some() {
            debug!("Client {} is already in a slot", client_id);
            return;
        }
        if self.lobby.enter_pending_game(slot_id, client_id).is_none() {
            debug!("Client {} cannot enter slot {}", client_id, slot_id);
            return;
        }

        self.assign(client_id, Some(slot_id));
        let others: Vec<ClientId> = self
            .members(slot_id)
            .into_iter()
            .filter(|&id| id != client_id)
            .collect();

        for &other in &others {
            self.send(vec![client_id], Packet::NewPlayer { id: other });
        }
        self.send(others, Packet::NewPlayer { id: client_id });
        self.broadcast_slot_state(slot_id);
    }

    fn leave(&mut self, client_id: ClientId) {
        let Some(slot_id) = self.slot_of(client_id) else {
            return;
        };
        match self.lobby.state(slot_id) {
            Some(SlotState::Joinable | SlotState::Full) => {
                self.leave_pending_game(client_id, slot_id);
            }
            Some(SlotState::InProgress) => self.leave_match(client_id, slot_id),
            _ => debug!("Client {} cannot leave slot {} now", client_id, slot_id),
        }
    }

    fn leave_pending_game(&mut self, client_id: ClientId, slot_id: SlotId) {
        if self.lobby.leave_pending_game(slot_id, client_id).is_none() {
            return;
        }
        self.assign(client_id, None);
        self.send_to_match(slot_id, Packet::RemovePlayer { id: client_id });
        self.broadcast_slot_state(slot_id);
    }

    fn leave_match(&mut self, client_id: ClientId, slot_id: SlotId) {
        let Some(remaining) = self.lobby.leave_match(slot_id, client_id) else {
            return;
        };
        self.assign(client_id, None);

        let removed = self
            .sessions
            .get_mut(&slot_id)
            .and_then(|session| session.remove_player(client_id));
        if removed.is_some() {
            info!("Client {} left the match in slot {}", client_id, slot_id);
            self.send_to_match(slot_id, Packet::RemovePlayer { id: client_id });
        }

        if remaining == 0 {
            self.sessions.remove(&slot_id);
            self.lobby.release(slot_id);
            info!("Match in slot {} is over, slot released", slot_id);
            self.broadcast_slot_state(slot_id);
        } else if self
            .sessions
            .get(&slot_id)
            .is_some_and(|session| session.round_over())
        {
            self.end_round(slot_id);
        }
    }

    fn start_game(&mut self, client_id: ClientId) {
        let Some(slot_id) = self.slot_of(client_id) else {
            return;
        };
        let Some((ids, map_name)) = self.lobby.startable(slot_id, client_id) else {
            debug!("Client {} cannot start slot {}", client_id, slot_id);
            return;
        };
        let ids = ids.to_vec();
        let map_name = map_name.unwrap_or_default().to_string();

        let map = match self.catalog.get(&map_name) {
            Ok(map) => map,
            Err(e) => {
                error!("Cannot start match in slot {}: {}", slot_id, e);
                return;
            }
        };
        let mut session = Session::new(self.next_epoch, map);
        if let Err(e) = session.begin_round(&ids, map) {
            error!("Cannot start match in slot {}: {}", slot_id, e);
            return;
        }

        self.next_epoch += 1;
        let players = session.player_states();
        self.sessions.insert(slot_id, session);
        self.lobby.mark_in_progress(slot_id);
        info!("Match started in slot {} on {}", slot_id, map_name);

        self.broadcast_slot_state(slot_id);
        self.send(ids, Packet::StartGameOnClient { map_name, players });
    }

    fn register_map(&mut self, client_id: ClientId, width: u32, height: u32, tiles: Vec<TileType>) {
        let Some(session) = self.session_of_mut(client_id) else {
            return;
        };
        match TileGrid::from_tiles(width, height, tiles) {
            Ok(grid) => {
                debug!("Client {} registered a {}x{} map", client_id, width, height);
                session.register_grid(grid);
            }
            Err(e) => warn!("Client {} sent bad map data: {}", client_id, e),
        }
    }

    fn move_player(&mut self, client_id: ClientId, x: f32, y: f32, facing: Facing) {
        // Movement can trail a death or a round reset; dropping it is fine.
        if let Some(session) = self.session_of_mut(client_id) {
            session.move_player(client_id, x, y, facing);
        }
    }

    fn place_bomb(&mut self, client_id: ClientId, bomb_id: u32, x: f32, y: f32) {
        let Some(slot_id) = self.slot_of(client_id) else {
            return;
        };
        let Some(session) = self.sessions.get_mut(&slot_id) else {
            return;
        };

        match session.place_bomb(client_id, bomb_id, x, y) {
            Ok(bomb) => {
                let task = FuseTask {
                    match_id: slot_id,
                    epoch: session.epoch(),
                    round: session.round(),
                    owner_id: client_id,
                    bomb_id,
                };
                self.effects.push(Effect::ScheduleFuse {
                    task,
                    delay: self.fuse_duration,
                });
                self.send_to_match(
                    slot_id,
                    Packet::BombPlaced {
                        id: bomb.id,
                        owner_id: bomb.owner_id,
                        round: task.round,
                        x: bomb.x,
                        y: bomb.y,
                    },
                );
            }
            Err(rejection) => {
                debug!("Bomb {} from client {} rejected: {:?}", bomb_id, client_id, rejection)
            }
        }
    }

    fn handle_player_deaths(&mut self, slot_id: SlotId, killed: &[ClientId]) {
        for &id in killed {
            let died = self
                .sessions
                .get_mut(&slot_id)
                .is_some_and(|session| session.kill_player(id));
            if died {
                info!("Player {} was killed in slot {}", id, slot_id);
                self.send_to_match(slot_id, Packet::KillPlayer { id });
            }
        }

        if self
            .sessions
            .get(&slot_id)
            .is_some_and(|session| session.round_over())
        {
            self.end_round(slot_id);
        }
    }

    /// Starts the next round of a match with its current members.
    fn end_round(&mut self, slot_id: SlotId) {
        let ids = self.members(slot_id);
        let Some(session) = self.sessions.get_mut(&slot_id) else {
            return;
        };
        let map = match self.catalog.get(session.map_name()) {
            Ok(map) => map,
            Err(e) => {
                error!("Cannot restart match in slot {}: {}", slot_id, e);
                return;
            }
        };
        if let Err(e) = session.begin_round(&ids, map) {
            error!("Cannot restart match in slot {}: {}", slot_id, e);
            return;
        }

        let players = session.player_states();
        self.send_to_match(slot_id, Packet::Restart { players });
    }

    fn session_of_mut(&mut self, client_id: ClientId) -> Option<&mut Session> {
        let slot_id = self.slot_of(client_id)?;
        self.sessions.get_mut(&slot_id)
    }

    fn assign(&mut self, client_id: ClientId, slot_id: Option<SlotId>) {
        if let Some(assigned) = self.connections.get_mut(&client_id) {
            *assigned = slot_id;
        }
    }

    fn members(&self, slot_id: SlotId) -> Vec<ClientId> {
        self.lobby
            .slot(slot_id)
            .map(|slot| slot.player_ids.clone())
            .unwrap_or_default()
    }

    fn send(&mut self, to: Vec<ClientId>, packet: Packet) {
        if !to.is_empty() {
            self.effects.push(Effect::Send { to, packet });
        }
    }

    fn send_to_match(&mut self, slot_id: SlotId, packet: Packet) {
        let members = self.members(slot_id);
        self.send(members, packet);
    }

    /// The only path by which lobby state reaches clients.
    fn broadcast_slot_state(&mut self, slot_id: SlotId) {
        let Some(slot) = self.lobby.slot(slot_id) else {
            return;
        };
        let packet = Packet::SlotStateUpdate {
            slot_id,
            state: slot.state,
            num_players: slot.num_players(),
        };
        self.effects.push(Effect::Broadcast { packet });
    }
}
