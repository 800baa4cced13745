//! Tile map with pixel to tile conversion.
//!
//! Tiles are addressed by integer `(x, y)` coordinates. Pixel coordinates map
//! onto tiles by floor division with the integer tile size, so every pixel
//! belongs to exactly one tile, including negative ones.

use crate::error::ArenaError;
use arena_shared::{TileType, TILE_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TilePos {
    pub x: i32,
    pub y: i32,
}

impl TilePos {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Pixel bounds of a single tile. `right` and `bottom` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileBounds {
    pub left: i32,
    pub right: i32,
    pub top: i32,
    pub bottom: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TileGrid {
    width: i32,
    height: i32,
    tile_size: i32,
    tiles: Vec<TileType>,
}

impl TileGrid {
    /// Builds a grid from row strings: `#` wall, `+` destructible, anything else empty.
    ///
    /// Short rows are padded with walls so the grid is always rectangular.
    pub fn from_rows(rows: &[&str]) -> Self {
        let width = rows.iter().map(|row| row.chars().count()).max().unwrap_or(0);
        let mut tiles = Vec::with_capacity(width * rows.len());

        for row in rows {
            let mut len = 0;
            for c in row.chars() {
                tiles.push(match c {
                    '#' => TileType::Wall,
                    '+' => TileType::Destructible,
                    _ => TileType::Empty,
                });
                len += 1;
            }
            tiles.extend(std::iter::repeat(TileType::Wall).take(width - len));
        }

        Self {
            width: width as i32,
            height: rows.len() as i32,
            tile_size: TILE_SIZE,
            tiles,
        }
    }

    /// Builds a grid from row-major tile data, as registered by a client.
    pub fn from_tiles(width: u32, height: u32, tiles: Vec<TileType>) -> Result<Self, ArenaError> {
        let expected = width as usize * height as usize;
        if expected == 0 || tiles.len() != expected || width > i32::MAX as u32 {
            return Err(ArenaError::InvalidMapData {
                width,
                height,
                len: tiles.len(),
            });
        }

        Ok(Self {
            width: width as i32,
            height: height as i32,
            tile_size: TILE_SIZE,
            tiles,
        })
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn tile_size(&self) -> i32 {
        self.tile_size
    }

    pub fn pixel_width(&self) -> i32 {
        self.width * self.tile_size
    }

    pub fn pixel_height(&self) -> i32 {
        self.height * self.tile_size
    }

    fn index(&self, tile_x: i32, tile_y: i32) -> Option<usize> {
        if tile_x < 0 || tile_y < 0 || tile_x >= self.width || tile_y >= self.height {
            return None;
        }
        Some((tile_y * self.width + tile_x) as usize)
    }

    /// Out-of-bounds tiles read as walls.
    pub fn tile_at(&self, tile_x: i32, tile_y: i32) -> TileType {
        self.index(tile_x, tile_y)
            .map(|i| self.tiles[i])
            .unwrap_or(TileType::Wall)
    }

    pub fn tile_of(&self, px: f32, py: f32) -> TilePos {
        let size = self.tile_size as f32;
        TilePos::new((px / size).floor() as i32, (py / size).floor() as i32)
    }

    pub fn hit_test(&self, px: f32, py: f32) -> TileBounds {
        let tile = self.tile_of(px, py);
        let left = tile.x.saturating_mul(self.tile_size);
        let top = tile.y.saturating_mul(self.tile_size);

        TileBounds {
            left,
            right: left.saturating_add(self.tile_size),
            top,
            bottom: top.saturating_add(self.tile_size),
        }
    }

    pub fn tile_center(&self, tile: TilePos) -> (f32, f32) {
        let half = self.tile_size / 2;
        (
            tile.x.saturating_mul(self.tile_size).saturating_add(half) as f32,
            tile.y.saturating_mul(self.tile_size).saturating_add(half) as f32,
        )
    }

    pub fn find_nearest_tile_center(&self, px: f32, py: f32) -> (f32, f32) {
        self.tile_center(self.tile_of(px, py))
    }

    /// Clears a destructible tile. Returns false for any other tile.
    pub fn destroy_tile(&mut self, tile: TilePos) -> bool {
        match self.index(tile.x, tile.y) {
            Some(i) if self.tiles[i] == TileType::Destructible => {
                self.tiles[i] = TileType::Empty;
                true
            }
            _ => false,
        }
    }

    /// Keeps a reported position inside the map's pixel area.
    pub fn clamp_point(&self, px: f32, py: f32) -> (f32, f32) {
        let max_x = (self.pixel_width() - 1).max(0) as f32;
        let max_y = (self.pixel_height() - 1).max(0) as f32;
        (px.clamp(0.0, max_x), py.clamp(0.0, max_y))
    }
}
