//! Blast propagation.
//!
//! A blast covers its origin tile and casts one ray per axis direction. A ray
//! stops before a wall and stops on a destructible block, which it includes.
//! Nothing here mutates the grid or the players; callers apply the result.

use crate::session::Player;
use crate::tile_grid::{TileGrid, TilePos};
use arena_shared::{ClientId, TileType};
use std::collections::{BTreeMap, HashSet};

const DIRECTIONS: [(i32, i32); 4] = [(0, -1), (0, 1), (-1, 0), (1, 0)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlastTile {
    pub pos: TilePos,
    pub destroyed_block: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Detonation {
    /// Origin first, then each ray in up, down, left, right order.
    pub tiles: Vec<BlastTile>,
    pub killed_players: Vec<ClientId>,
}

impl Detonation {
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty() && self.killed_players.is_empty()
    }
}

pub fn blast_tiles(origin: TilePos, grid: &TileGrid, blast_radius: u32) -> Vec<BlastTile> {
    let mut tiles = vec![BlastTile {
        pos: origin,
        destroyed_block: false,
    }];

    for (dx, dy) in DIRECTIONS {
        for dist in 1..=blast_radius as i32 {
            let pos = TilePos::new(origin.x + dx * dist, origin.y + dy * dist);
            match grid.tile_at(pos.x, pos.y) {
                TileType::Wall => break,
                TileType::Destructible => {
                    tiles.push(BlastTile {
                        pos,
                        destroyed_block: true,
                    });
                    break;
                }
                TileType::Empty => tiles.push(BlastTile {
                    pos,
                    destroyed_block: false,
                }),
            }
        }
    }

    tiles
}

/// Computes the tiles and living players caught by a bomb at `origin`.
pub fn detonate(
    origin: TilePos,
    grid: &TileGrid,
    blast_radius: u32,
    players: &BTreeMap<ClientId, Player>,
) -> Detonation {
    let tiles = blast_tiles(origin, grid, blast_radius);
    let hit: HashSet<TilePos> = tiles.iter().map(|t| t.pos).collect();

    let killed_players = players
        .values()
        .filter(|p| p.alive && hit.contains(&grid.tile_of(p.x, p.y)))
        .map(|p| p.id)
        .collect();

    Detonation {
        tiles,
        killed_players,
    }
}
