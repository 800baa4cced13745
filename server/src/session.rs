//! Authoritative state of one running match.
//!
//! A session owns the live grid, the players and their in-flight bombs. It
//! only mutates state and reports what happened; notifying clients and
//! scheduling fuses is left to the [`MatchServer`](crate::match_server::MatchServer).

use crate::error::ArenaError;
use crate::explosion::{self, Detonation};
use crate::maps::MapInfo;
use crate::tile_grid::{TileGrid, TilePos};
use arena_shared::{ClientId, Facing, PlayerState};
use log::{debug, info};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: ClientId,
    pub x: f32,
    pub y: f32,
    pub facing: Facing,
    pub alive: bool,
    pub spawn_point: TilePos,
}

impl Player {
    /// A living player standing on the top-left corner of its spawn tile.
    pub fn spawn(id: ClientId, spawn_point: TilePos, tile_size: i32) -> Self {
        Self {
            id,
            x: (spawn_point.x * tile_size) as f32,
            y: (spawn_point.y * tile_size) as f32,
            facing: Facing::Down,
            alive: true,
            spawn_point,
        }
    }

    pub fn to_state(&self) -> PlayerState {
        PlayerState {
            id: self.id,
            x: self.x,
            y: self.y,
            facing: self.facing,
            alive: self.alive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bomb {
    pub id: u32,
    pub owner_id: ClientId,
    /// Tile center in pixels.
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BombRejection {
    UnknownPlayer,
    DeadPlayer,
    TileOccupied,
    DuplicateId,
    /// Coordinates were NaN or infinite.
    OffMap,
}

#[derive(Debug, Clone)]
pub struct Session {
    epoch: u64,
    round: u32,
    map_name: String,
    base_grid: TileGrid,
    grid: TileGrid,
    players: BTreeMap<ClientId, Player>,
    bombs: BTreeMap<ClientId, BTreeMap<u32, Bomb>>,
    num_players_alive: usize,
    round_size: usize,
}

impl Session {
    /// Creates an empty session on the map's layout. No round is running until
    /// [`begin_round`](Self::begin_round) succeeds.
    pub fn new(epoch: u64, map: &MapInfo) -> Self {
        Self {
            epoch,
            round: 0,
            map_name: map.name.clone(),
            base_grid: map.grid.clone(),
            grid: map.grid.clone(),
            players: BTreeMap::new(),
            bombs: BTreeMap::new(),
            num_players_alive: 0,
            round_size: 0,
        }
    }

    /// Spawns every player afresh and restores the map.
    ///
    /// Fails without touching the session if the map cannot seat everyone.
    pub fn begin_round(&mut self, player_ids: &[ClientId], map: &MapInfo) -> Result<(), ArenaError> {
        let spawn_points = map.spawn_points_for(player_ids.len())?;
        let tile_size = self.base_grid.tile_size();

        let players: BTreeMap<ClientId, Player> = player_ids
            .iter()
            .zip(spawn_points)
            .map(|(&id, &spawn)| (id, Player::spawn(id, spawn, tile_size)))
            .collect();

        self.bombs = player_ids.iter().map(|&id| (id, BTreeMap::new())).collect();
        self.players = players;
        self.grid = self.base_grid.clone();
        self.num_players_alive = player_ids.len();
        self.round_size = player_ids.len();
        self.round += 1;

        info!(
            "Session {} round {} started on {} with {} players",
            self.epoch, self.round, self.map_name, self.round_size
        );
        Ok(())
    }

    /// Replaces the map layout with client-registered tile data.
    pub fn register_grid(&mut self, grid: TileGrid) {
        self.base_grid = grid.clone();
        self.grid = grid;
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn map_name(&self) -> &str {
        &self.map_name
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn num_players_alive(&self) -> usize {
        self.num_players_alive
    }

    pub fn player(&self, id: ClientId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn alive_players(&self) -> impl Iterator<Item = &Player> {
        self.players.values().filter(|p| p.alive)
    }

    pub fn player_states(&self) -> Vec<PlayerState> {
        self.players.values().map(Player::to_state).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn bomb_count(&self) -> usize {
        self.bombs.values().map(BTreeMap::len).sum()
    }

    pub fn bomb(&self, owner_id: ClientId, bomb_id: u32) -> Option<&Bomb> {
        self.bombs.get(&owner_id).and_then(|b| b.get(&bomb_id))
    }

    /// Applies a client-reported position. Unknown or dead players are ignored.
    pub fn move_player(&mut self, id: ClientId, x: f32, y: f32, facing: Facing) -> bool {
        let (x, y) = self.grid.clamp_point(x, y);
        match self.players.get_mut(&id) {
            Some(player) if player.alive => {
                player.x = x;
                player.y = y;
                player.facing = facing;
                true
            }
            _ => false,
        }
    }

    /// Stores a bomb on the tile containing `(px, py)`.
    pub fn place_bomb(
        &mut self,
        owner_id: ClientId,
        bomb_id: u32,
        px: f32,
        py: f32,
    ) -> Result<Bomb, BombRejection> {
        match self.players.get(&owner_id) {
            None => return Err(BombRejection::UnknownPlayer),
            Some(player) if !player.alive => return Err(BombRejection::DeadPlayer),
            Some(_) => {}
        }

        if !px.is_finite() || !py.is_finite() {
            return Err(BombRejection::OffMap);
        }
        let (px, py) = self.grid.clamp_point(px, py);
        let (x, y) = self.grid.find_nearest_tile_center(px, py);
        let occupied = self
            .bombs
            .values()
            .flat_map(BTreeMap::values)
            .any(|b| b.x == x && b.y == y);
        if occupied {
            return Err(BombRejection::TileOccupied);
        }

        let owned = self.bombs.entry(owner_id).or_default();
        if owned.contains_key(&bomb_id) {
            return Err(BombRejection::DuplicateId);
        }

        let bomb = Bomb {
            id: bomb_id,
            owner_id,
            x,
            y,
        };
        owned.insert(bomb_id, bomb);
        Ok(bomb)
    }

    /// Removes a bomb, dropping the owner's table once a departed owner has no bombs left.
    pub fn take_bomb(&mut self, owner_id: ClientId, bomb_id: u32) -> Option<Bomb> {
        let owned = self.bombs.get_mut(&owner_id)?;
        let bomb = owned.remove(&bomb_id);

        if owned.is_empty() && !self.players.contains_key(&owner_id) {
            self.bombs.remove(&owner_id);
        }
        bomb
    }

    /// Detonates a stored bomb: removes it, computes the blast and clears hit blocks.
    ///
    /// Players are left untouched; apply `killed_players` with [`kill_player`](Self::kill_player).
    /// Returns `None` if the bomb no longer exists.
    pub fn detonate_bomb(
        &mut self,
        owner_id: ClientId,
        bomb_id: u32,
        blast_radius: u32,
    ) -> Option<(Bomb, Detonation)> {
        let bomb = self.take_bomb(owner_id, bomb_id)?;
        let origin = self.grid.tile_of(bomb.x, bomb.y);
        let detonation = explosion::detonate(origin, &self.grid, blast_radius, &self.players);

        for tile in detonation.tiles.iter().filter(|t| t.destroyed_block) {
            self.grid.destroy_tile(tile.pos);
        }

        debug!(
            "Bomb {}/{} detonated: {} tiles, {} killed",
            owner_id,
            bomb_id,
            detonation.tiles.len(),
            detonation.killed_players.len()
        );
        Some((bomb, detonation))
    }

    /// Marks a player dead. Returns false if they were already dead or gone.
    pub fn kill_player(&mut self, id: ClientId) -> bool {
        match self.players.get_mut(&id) {
            Some(player) if player.alive => {
                player.alive = false;
                self.num_players_alive = self.num_players_alive.saturating_sub(1);
                true
            }
            _ => false,
        }
    }

    /// Removes a departed player. Their live bombs stay until their fuses fire.
    pub fn remove_player(&mut self, id: ClientId) -> Option<Player> {
        let player = self.players.remove(&id)?;
        if player.alive {
            self.num_players_alive = self.num_players_alive.saturating_sub(1);
        }
        if self.bombs.get(&id).is_some_and(BTreeMap::is_empty) {
            self.bombs.remove(&id);
        }
        Some(player)
    }

    /// A round of two or more players is over once at most one is left standing.
    pub fn round_over(&self) -> bool {
        self.round_size >= 2 && self.num_players_alive <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maps::{MapCatalog, LEVEL_ONE};
    use arena_shared::{TileType, TILE_SIZE};

    fn level_one() -> MapInfo {
        MapCatalog::builtin().get(LEVEL_ONE).unwrap().clone()
    }

    fn open_map() -> MapInfo {
        MapInfo::new(
            "open",
            &["......", "......", "......", "......", "......", "......"],
            vec![
                TilePos::new(0, 0),
                TilePos::new(5, 0),
                TilePos::new(0, 5),
                TilePos::new(5, 5),
            ],
        )
    }

    fn started(map: &MapInfo, ids: &[ClientId]) -> Session {
        let mut session = Session::new(1, map);
        session.begin_round(ids, map).unwrap();
        session
    }

    #[test]
    fn test_begin_round_assigns_spawns_in_order() {
        let map = level_one();
        let session = started(&map, &[7, 3]);

        let first = session.player(7).unwrap();
        assert_eq!(first.spawn_point, TilePos::new(2, 5));
        assert_eq!((first.x, first.y), (80.0, 200.0));
        assert!(first.alive);
        assert_eq!(first.facing, Facing::Down);

        let second = session.player(3).unwrap();
        assert_eq!(second.spawn_point, TilePos::new(13, 1));
        assert_eq!(session.num_players_alive(), 2);
        assert_eq!(session.round(), 1);
    }

    #[test]
    fn test_begin_round_is_deterministic() {
        let map = level_one();
        let mut session = started(&map, &[1, 2, 3]);
        let first: Vec<Player> = session.players().cloned().collect();

        session.kill_player(2);
        session.move_player(1, 300.0, 300.0, Facing::Left);
        session.begin_round(&[1, 2, 3], &map).unwrap();
        let second: Vec<Player> = session.players().cloned().collect();

        assert_eq!(first, second);
        assert!(session.players().all(|p| p.alive));
        assert_eq!(session.num_players_alive(), 3);
        assert_eq!(session.round(), 2);
    }

    #[test]
    fn test_begin_round_rejects_too_many_players() {
        let map = MapInfo::new("tiny", &["...", "..."], vec![TilePos::new(0, 0)]);
        let mut session = Session::new(1, &map);
        session.begin_round(&[1], &map).unwrap();

        let err = session.begin_round(&[1, 2], &map).unwrap_err();
        assert!(matches!(err, ArenaError::InsufficientSpawnPoints { needed: 2, .. }));

        // The running round is untouched.
        assert_eq!(session.round(), 1);
        assert!(session.player(1).is_some());
        assert!(session.player(2).is_none());
    }

    #[test]
    fn test_begin_round_restores_destroyed_blocks() {
        let map = MapInfo::new("blocks", &["..+", "..."], vec![TilePos::new(0, 0)]);
        let mut session = started(&map, &[1]);

        session.place_bomb(1, 1, 60.0, 20.0).unwrap();
        session.detonate_bomb(1, 1, 2);
        assert_eq!(session.grid().tile_at(2, 0), TileType::Empty);

        session.begin_round(&[1], &map).unwrap();
        assert_eq!(session.grid().tile_at(2, 0), TileType::Destructible);
    }

    #[test]
    fn test_move_player_updates_and_clamps() {
        let map = open_map();
        let mut session = started(&map, &[1]);

        assert!(session.move_player(1, 55.5, 61.0, Facing::Right));
        let player = session.player(1).unwrap();
        assert_eq!((player.x, player.y), (55.5, 61.0));
        assert_eq!(player.facing, Facing::Right);

        session.move_player(1, -20.0, 10_000.0, Facing::Up);
        let player = session.player(1).unwrap();
        assert_eq!((player.x, player.y), (0.0, (6 * TILE_SIZE - 1) as f32));
    }

    #[test]
    fn test_move_ignored_for_dead_or_unknown_player() {
        let map = open_map();
        let mut session = started(&map, &[1, 2]);
        session.kill_player(1);

        assert!(!session.move_player(1, 100.0, 100.0, Facing::Up));
        assert!(!session.move_player(42, 100.0, 100.0, Facing::Up));
        assert_eq!(session.player(1).unwrap().x, 0.0);
    }

    #[test]
    fn test_place_bomb_normalizes_position() {
        let map = open_map();
        let mut session = started(&map, &[1]);

        let bomb = session.place_bomb(1, 5, 83.0, 97.0).unwrap();
        assert_eq!((bomb.x, bomb.y), (100.0, 100.0));
        assert_eq!(bomb.owner_id, 1);
        assert_eq!(session.bomb(1, 5), Some(&bomb));
    }

    #[test]
    fn test_place_bomb_rejects_occupied_tile() {
        let map = open_map();
        let mut session = started(&map, &[1, 2]);

        session.place_bomb(1, 1, 81.0, 81.0).unwrap();
        assert_eq!(
            session.place_bomb(2, 1, 119.0, 100.0),
            Err(BombRejection::TileOccupied)
        );
        assert_eq!(session.bomb_count(), 1);
    }

    #[test]
    fn test_place_bomb_rejections() {
        let map = open_map();
        let mut session = started(&map, &[1, 2]);

        session.place_bomb(1, 1, 20.0, 20.0).unwrap();
        assert_eq!(
            session.place_bomb(1, 1, 220.0, 20.0),
            Err(BombRejection::DuplicateId)
        );
        assert_eq!(
            session.place_bomb(9, 1, 220.0, 20.0),
            Err(BombRejection::UnknownPlayer)
        );

        session.kill_player(2);
        assert_eq!(
            session.place_bomb(2, 1, 220.0, 20.0),
            Err(BombRejection::DeadPlayer)
        );
    }

    #[test]
    fn test_place_bomb_far_outside_map_lands_on_edge_tile() {
        let map = open_map();
        let mut session = started(&map, &[1]);

        let far = session.place_bomb(1, 1, 1.0e30, 1.0e30).unwrap();
        assert_eq!((far.x, far.y), (220.0, 220.0));

        let near = session.place_bomb(1, 2, -1.0e30, 20.0).unwrap();
        assert_eq!((near.x, near.y), (20.0, 20.0));

        assert_eq!(
            session.place_bomb(1, 3, f32::MAX, -1.0e30),
            Ok(Bomb {
                id: 3,
                owner_id: 1,
                x: 220.0,
                y: 20.0
            })
        );
    }

    #[test]
    fn test_place_bomb_rejects_non_finite_position() {
        let map = open_map();
        let mut session = started(&map, &[1]);

        assert_eq!(
            session.place_bomb(1, 1, f32::INFINITY, 20.0),
            Err(BombRejection::OffMap)
        );
        assert_eq!(
            session.place_bomb(1, 1, 20.0, f32::NEG_INFINITY),
            Err(BombRejection::OffMap)
        );
        assert_eq!(
            session.place_bomb(1, 1, f32::NAN, 20.0),
            Err(BombRejection::OffMap)
        );
        assert_eq!(session.bomb_count(), 0);
    }

    #[test]
    fn test_detonate_bomb_happens_once() {
        let map = open_map();
        let mut session = started(&map, &[1, 2]);

        session.place_bomb(1, 1, 100.0, 100.0).unwrap();
        let (bomb, detonation) = session.detonate_bomb(1, 1, 2).unwrap();
        assert_eq!(bomb.id, 1);
        assert_eq!(detonation.tiles.len(), 9);
        assert!(session.detonate_bomb(1, 1, 2).is_none());
        assert_eq!(session.bomb_count(), 0);
    }

    #[test]
    fn test_detonate_reports_without_killing() {
        let map = open_map();
        let mut session = started(&map, &[1, 2]);

        session.place_bomb(1, 1, 20.0, 20.0).unwrap();
        let (_, detonation) = session.detonate_bomb(1, 1, 2).unwrap();

        assert_eq!(detonation.killed_players, vec![1]);
        assert!(session.player(1).unwrap().alive);
        assert_eq!(session.num_players_alive(), 2);
    }

    #[test]
    fn test_kill_player_counts_once() {
        let map = open_map();
        let mut session = started(&map, &[1, 2, 3]);

        assert!(session.kill_player(1));
        assert!(!session.kill_player(1));
        assert!(!session.kill_player(99));
        assert_eq!(session.num_players_alive(), 2);
        assert!(!session.round_over());

        assert!(session.kill_player(2));
        assert!(session.round_over());
    }

    #[test]
    fn test_single_player_round_never_ends() {
        let map = open_map();
        let mut session = started(&map, &[1]);

        assert!(!session.round_over());
        session.kill_player(1);
        assert!(!session.round_over());
    }

    #[test]
    fn test_remove_player_keeps_live_bombs() {
        let map = open_map();
        let mut session = started(&map, &[1, 2]);

        session.place_bomb(1, 4, 20.0, 20.0).unwrap();
        let removed = session.remove_player(1).unwrap();
        assert_eq!(removed.id, 1);
        assert_eq!(session.num_players_alive(), 1);
        assert!(session.bomb(1, 4).is_some());

        assert!(session.detonate_bomb(1, 4, 2).is_some());
        assert_eq!(session.bomb_count(), 0);
        assert!(session.remove_player(1).is_none());
    }

    #[test]
    fn test_register_grid_replaces_layout() {
        let map = open_map();
        let mut session = started(&map, &[1]);

        let grid = TileGrid::from_tiles(2, 1, vec![TileType::Empty, TileType::Wall]).unwrap();
        session.register_grid(grid.clone());
        assert_eq!(session.grid(), &grid);

        session.begin_round(&[1], &map).unwrap();
        assert_eq!(session.grid(), &grid);
    }
}
