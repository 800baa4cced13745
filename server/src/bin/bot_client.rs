//! Headless client that joins a lobby slot and wanders around dropping bombs.
//!
//! Useful for filling a match while testing the server by hand:
//!
//! ```text
//! bot_client --host-game --slot 0
//! bot_client --slot 0
//! ```

use arena_server::utils::get_timestamp;
use arena_shared::{
    ClientId, Facing, Packet, PlayerState, SlotId, SlotState, PROTOCOL_VERSION, TILE_SIZE,
};
use bincode::{deserialize, serialize};
use clap::Parser;
use log::{debug, error, info, warn};
use rand::Rng;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::interval;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Headless bot for the arena server")]
struct Args {
    /// Server address to connect to
    #[clap(short, long, default_value = "127.0.0.1:8000")]
    server: String,
    /// Lobby slot to host or join
    #[clap(long, default_value_t = 0)]
    slot: SlotId,
    /// Host the slot instead of joining it
    #[clap(long)]
    host_game: bool,
    /// Stage to select when hosting
    #[clap(short, long, default_value = "levelOne")]
    map: String,
}

/// Pixels moved per step
const STEP: f32 = TILE_SIZE as f32 / 4.0;
/// Chance per step of dropping a bomb
const BOMB_CHANCE: f64 = 0.05;

struct Bot {
    socket: UdpSocket,
    server_addr: SocketAddr,
    slot_id: SlotId,
    host: bool,
    map_name: String,
    client_id: Option<ClientId>,
    started: bool,
    alive: bool,
    position: (f32, f32),
    next_bomb_id: u32,
}

impl Bot {
    async fn new(args: Args) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = args.server.parse()?;

        Ok(Bot {
            socket,
            server_addr,
            slot_id: args.slot,
            host: args.host_game,
            map_name: args.map,
            client_id: None,
            started: false,
            alive: false,
            position: (0.0, 0.0),
            next_bomb_id: 1,
        })
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    /// Picks up this bot's own state from a start or restart snapshot
    fn spawn_from(&mut self, players: &[PlayerState]) {
        let me = players
            .iter()
            .find(|player| Some(player.id) == self.client_id);
        if let Some(me) = me {
            self.position = (me.x, me.y);
            self.alive = me.alive;
            self.started = true;
        }
    }

    async fn handle_packet(&mut self, packet: Packet) -> Result<(), Box<dyn std::error::Error>> {
        match packet {
            Packet::Connected { client_id } => {
                info!("Connected as client {}", client_id);
                self.client_id = Some(client_id);
                self.send_packet(&Packet::EnterLobby).await?;

                if self.host {
                    self.send_packet(&Packet::HostGame {
                        slot_id: self.slot_id,
                    })
                    .await?;
                    self.send_packet(&Packet::SelectStage {
                        map_name: self.map_name.clone(),
                    })
                    .await?;
                } else {
                    self.send_packet(&Packet::EnterPendingGame {
                        slot_id: self.slot_id,
                    })
                    .await?;
                }
            }
            Packet::Disconnected { reason } => {
                warn!("Server refused connection: {}", reason);
                return Err(reason.into());
            }
            Packet::SlotStateUpdate {
                slot_id,
                state,
                num_players,
            } if slot_id == self.slot_id => {
                debug!("Slot {} is {:?} with {} players", slot_id, state, num_players);
                if self.host && !self.started && state == SlotState::Joinable {
                    info!("Enough players, starting the game");
                    self.send_packet(&Packet::StartGameOnServer).await?;
                }
            }
            Packet::StartGameOnClient { map_name, players } => {
                info!("Game started on {} with {} players", map_name, players.len());
                self.spawn_from(&players);
            }
            Packet::Restart { players } => {
                info!("Round restarted");
                self.spawn_from(&players);
            }
            Packet::KillPlayer { id } if Some(id) == self.client_id => {
                info!("Killed");
                self.alive = false;
            }
            Packet::PlayerMoved { id, x, y, .. } if Some(id) == self.client_id => {
                self.position = (x, y);
            }
            Packet::Detonate {
                id,
                owner_id,
                round,
                explosions,
            } => {
                debug!(
                    "Bomb {}/{} from round {} went off over {} tiles",
                    owner_id,
                    id,
                    round,
                    explosions.len()
                );
            }
            _ => {}
        }
        Ok(())
    }

    /// One random step, sometimes dropping a bomb where the bot stands
    async fn wander(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if !self.started || !self.alive {
            return Ok(());
        }

        let (facing, drop_bomb) = {
            let mut rng = rand::thread_rng();
            let facing = match rng.gen_range(0..4) {
                0 => Facing::Up,
                1 => Facing::Down,
                2 => Facing::Left,
                _ => Facing::Right,
            };
            (facing, rng.gen_bool(BOMB_CHANCE))
        };

        let (x, y) = self.position;
        let (x, y) = match facing {
            Facing::Up => (x, y - STEP),
            Facing::Down => (x, y + STEP),
            Facing::Left => (x - STEP, y),
            Facing::Right => (x + STEP, y),
        };
        self.position = (x.max(0.0), y.max(0.0));

        self.send_packet(&Packet::MovePlayer {
            x: self.position.0,
            y: self.position.1,
            facing,
        })
        .await?;

        if drop_bomb {
            let id = self.next_bomb_id;
            self.next_bomb_id += 1;
            self.send_packet(&Packet::PlaceBomb {
                id,
                x: self.position.0,
                y: self.position.1,
            })
            .await?;
        }
        Ok(())
    }

    async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.send_packet(&Packet::Connect {
            client_version: PROTOCOL_VERSION,
        })
        .await?;

        let mut step_interval = interval(Duration::from_millis(100));
        let mut heartbeat_interval = interval(Duration::from_secs(2));
        let mut buffer = [0u8; 2048];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => {
                            if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                                self.handle_packet(packet).await?;
                            }
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = step_interval.tick() => {
                    if let Err(e) = self.wander().await {
                        error!("Error sending movement: {}", e);
                    }
                },

                _ = heartbeat_interval.tick() => {
                    if self.client_id.is_some() {
                        self.send_packet(&Packet::Heartbeat { timestamp: get_timestamp() }).await?;
                    }
                },

                _ = tokio::signal::ctrl_c() => {
                    info!("Leaving");
                    break;
                },
            }
        }

        if self.client_id.is_some() {
            let _ = self.send_packet(&Packet::Disconnect).await;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    info!("Bot connecting to {}", args.server);

    let mut bot = Bot::new(args).await?;
    bot.run().await
}
