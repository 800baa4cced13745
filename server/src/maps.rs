//! Stage definitions known to the server.

use crate::error::ArenaError;
use crate::tile_grid::{TileGrid, TilePos};
use std::collections::HashMap;

pub const LEVEL_ONE: &str = "levelOne";

const LEVEL_ONE_ROWS: [&str; 15] = [
    "###############",
    "#...+.+.+.+...#",
    "#.#+#.#+#.#+#.#",
    "#.+.+.+.+.+.+.#",
    "#.#+#+#.#+#+#.#",
    "#..+.+.+.+.+.+#",
    "#.#+#.#+#.#...#",
    "#.+.+.+.+.+.+.#",
    "#.#+#.#+#.#+#.#",
    "#.+.+.+.+.+.+.#",
    "#.#+#.#+#.#+#.#",
    "#.+.+.+.+.+.+.#",
    "#.#+#.#+#.#+#.#",
    "#.............#",
    "###############",
];

#[derive(Debug, Clone)]
pub struct MapInfo {
    pub name: String,
    pub max_players: usize,
    /// Assigned to players in join order.
    pub spawn_points: Vec<TilePos>,
    pub grid: TileGrid,
}

impl MapInfo {
    pub fn new(name: &str, rows: &[&str], spawn_points: Vec<TilePos>) -> Self {
        Self {
            name: name.to_string(),
            max_players: spawn_points.len(),
            spawn_points,
            grid: TileGrid::from_rows(rows),
        }
    }

    /// Spawn points for `count` players, or an error if the map is too small.
    pub fn spawn_points_for(&self, count: usize) -> Result<&[TilePos], ArenaError> {
        if count > self.spawn_points.len() {
            return Err(ArenaError::InsufficientSpawnPoints {
                map: self.name.clone(),
                needed: count,
                available: self.spawn_points.len(),
            });
        }
        Ok(&self.spawn_points[..count])
    }
}

#[derive(Debug, Clone, Default)]
pub struct MapCatalog {
    maps: HashMap<String, MapInfo>,
}

impl MapCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stages shipped with the server.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.insert(MapInfo::new(
            LEVEL_ONE,
            &LEVEL_ONE_ROWS,
            vec![
                TilePos::new(2, 5),
                TilePos::new(13, 1),
                TilePos::new(2, 1),
                TilePos::new(12, 6),
            ],
        ));
        catalog
    }

    pub fn insert(&mut self, map: MapInfo) {
        self.maps.insert(map.name.clone(), map);
    }

    pub fn get(&self, name: &str) -> Result<&MapInfo, ArenaError> {
        self.maps
            .get(name)
            .ok_or_else(|| ArenaError::UnknownMap(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.maps.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_shared::TileType;

    #[test]
    fn test_level_one_dimensions() {
        let catalog = MapCatalog::builtin();
        let map = catalog.get(LEVEL_ONE).unwrap();

        assert_eq!(map.grid.width(), 15);
        assert_eq!(map.grid.height(), 15);
        assert_eq!(map.max_players, 4);
    }

    #[test]
    fn test_level_one_spawn_points_are_open() {
        let catalog = MapCatalog::builtin();
        let map = catalog.get(LEVEL_ONE).unwrap();

        for spawn in &map.spawn_points {
            assert_eq!(
                map.grid.tile_at(spawn.x, spawn.y),
                TileType::Empty,
                "spawn {:?} is blocked",
                spawn
            );
        }
    }

    #[test]
    fn test_level_one_is_walled_in() {
        let catalog = MapCatalog::builtin();
        let grid = &catalog.get(LEVEL_ONE).unwrap().grid;

        for i in 0..15 {
            assert_eq!(grid.tile_at(i, 0), TileType::Wall);
            assert_eq!(grid.tile_at(i, 14), TileType::Wall);
            assert_eq!(grid.tile_at(0, i), TileType::Wall);
            assert_eq!(grid.tile_at(14, i), TileType::Wall);
        }
    }

    #[test]
    fn test_unknown_map() {
        let catalog = MapCatalog::builtin();
        assert_eq!(
            catalog.get("levelNine").unwrap_err(),
            ArenaError::UnknownMap("levelNine".to_string())
        );
        assert!(!catalog.contains("levelNine"));
    }

    #[test]
    fn test_spawn_points_in_order() {
        let catalog = MapCatalog::builtin();
        let map = catalog.get(LEVEL_ONE).unwrap();

        let spawns = map.spawn_points_for(2).unwrap();
        assert_eq!(spawns, &[TilePos::new(2, 5), TilePos::new(13, 1)]);
    }

    #[test]
    fn test_spawn_points_exhausted() {
        let catalog = MapCatalog::builtin();
        let map = catalog.get(LEVEL_ONE).unwrap();

        assert_eq!(
            map.spawn_points_for(5).unwrap_err(),
            ArenaError::InsufficientSpawnPoints {
                map: LEVEL_ONE.to_string(),
                needed: 5,
                available: 4
            }
        );
    }
}
