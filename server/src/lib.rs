//! # Arena Server Library
//!
//! Authoritative server for a tile-based multiplayer bomb arena. Clients host
//! and join games through a fixed set of lobby slots; once a game starts the
//! server owns every player, bomb and destructible block, arms bomb fuses and
//! resolves detonations, and periodically broadcasts player positions.
//!
//! ## Architecture
//!
//! ### Single Event Stream
//! All match state is mutated from one loop. Incoming packets, client
//! timeouts, fuse expiries and the position broadcast tick are all funnelled
//! through the same `tokio::select!` in [`network::Server::run`], so match state
//! needs no locking. A fuse is never cancelled; when it fires it looks its
//! bomb up again and does nothing if the bomb, round or match is gone.
//!
//! ### Effects Instead of Sockets
//! [`match_server::MatchServer`] never touches the network. Its handlers
//! record [`match_server::Effect`]s (send to some clients, broadcast to all,
//! arm a fuse) which the network layer drains after each event. This keeps
//! the whole game rule set testable without sockets or timers.
//!
//! ## Module Organization
//!
//! - `tile_grid`: map tiles and pixel/tile conversion
//! - `explosion`: blast ray-casting and kill detection
//! - `maps`: built-in stages and their spawn points
//! - `session`: one running match, its players, bombs and rounds
//! - `lobby`: the per-slot hosting/joining state machine
//! - `match_server`: routes client events to the lobby and sessions
//! - `client_manager`: address to client id mapping and timeouts
//! - `network`: UDP transport, timers and the main loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use arena_server::config::ServerConfig;
//! use arena_server::maps::MapCatalog;
//! use arena_server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let mut server = Server::new(&config, MapCatalog::builtin()).await?;
//!
//!     // Runs until a Shutdown message arrives on the shutdown handle
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod error;
pub mod explosion;
pub mod lobby;
pub mod maps;
pub mod match_server;
pub mod network;
pub mod session;
pub mod tile_grid;
pub mod utils;
