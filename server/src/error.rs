//! Error types for match configuration failures.

/// Errors that abort a round before any player state is touched.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ArenaError {
    /// The selected stage is not in the map catalog.
    #[error("unknown map: {0}")]
    UnknownMap(String),

    /// The map defines fewer spawn points than there are players.
    #[error("map {map} has {available} spawn points but {needed} players joined")]
    InsufficientSpawnPoints {
        map: String,
        needed: usize,
        available: usize,
    },

    /// Tile data whose length does not match its declared dimensions.
    #[error("invalid map data: {width}x{height} grid with {len} tiles")]
    InvalidMapData { width: u32, height: u32, len: usize },
}
