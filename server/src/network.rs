//! Server network layer handling UDP communications and event loop coordination

use crate::client_manager::ClientManager;
use crate::config::ServerConfig;
use crate::maps::MapCatalog;
use crate::match_server::{Effect, FuseTask, MatchServer};
use crate::utils::get_timestamp;
use arena_shared::{ClientId, Packet, PROTOCOL_VERSION};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};

/// Messages sent from network tasks and timers to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    ClientTimeout {
        client_id: ClientId,
    },
    FuseExpired(FuseTask),
    Shutdown,
}

/// Messages sent from the main loop to the sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
    BroadcastPacket { packet: Packet },
}

/// Main server coordinating networking, timers and the match server
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    arena: MatchServer,
    broadcast_interval: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(
        config: &ServerConfig,
        catalog: MapCatalog,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(&config.bind_addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(
                config.max_clients,
                config.client_timeout,
            ))),
            arena: MatchServer::new(config.slot_count, catalog),
            broadcast_interval: config.broadcast_interval,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// A sender into the main loop; post [`ServerMessage::Shutdown`] to stop it.
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addrs()
                        };

                        for (client_id, addr) in client_addrs {
                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    /// Arms a fuse; it reports back to the main loop once `delay` has passed
    fn schedule_fuse(&self, task: FuseTask, delay: Duration) {
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if server_tx.send(ServerMessage::FuseExpired(task)).is_err() {
                debug!("Fuse for bomb {}/{} fired after shutdown", task.owner_id, task.bomb_id);
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: &Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket {
            packet: packet.clone(),
            addr,
        }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: Packet) {
        if let Err(e) = self.game_tx.send(GameMessage::BroadcastPacket { packet }) {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    /// Processes incoming packets; everything past the handshake goes to the match server
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect { client_version } => {
                info!(
                    "Client connecting from {} (version: {})",
                    addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    warn!("Rejecting {}: protocol version {}", addr, client_version);
                    let response = Packet::Disconnected {
                        reason: "Protocol version mismatch".to_string(),
                    };
                    self.send_packet(&response, addr);
                    return;
                }

                // Remove existing connection if present
                let existing_client_id = {
                    let clients = self.clients.read().await;
                    clients.find_client_by_addr(addr)
                };

                if let Some(existing_id) = existing_client_id {
                    info!("Removing existing client {} from {}", existing_id, addr);
                    self.clients.write().await.remove_client(&existing_id);
                    self.arena.handle_disconnect(existing_id);
                }

                let client_id = {
                    let mut clients = self.clients.write().await;
                    clients.add_client(addr)
                };

                if let Some(client_id) = client_id {
                    self.arena.handle_connect(client_id);
                    self.send_packet(&Packet::Connected { client_id }, addr);
                } else {
                    let response = Packet::Disconnected {
                        reason: "Server full".to_string(),
                    };
                    self.send_packet(&response, addr);
                }
            }

            Packet::Disconnect => {
                let client_id = {
                    let mut clients = self.clients.write().await;
                    let client_id = clients.find_client_by_addr(addr);
                    if let Some(id) = client_id {
                        clients.remove_client(&id);
                    }
                    client_id
                };

                if let Some(client_id) = client_id {
                    self.arena.handle_disconnect(client_id);
                }
            }

            other => {
                let client_id = {
                    let mut clients = self.clients.write().await;
                    clients.touch(addr)
                };

                match client_id {
                    Some(client_id) => self.arena.handle_packet(client_id, other),
                    None => warn!("Packet from unknown client at {}", addr),
                }
            }
        }
    }

    /// Carries out everything the match server asked for since the last call
    async fn dispatch_effects(&mut self) {
        let effects = self.arena.drain_effects();
        if effects.is_empty() {
            return;
        }

        let clients = self.clients.read().await;
        for effect in effects {
            match effect {
                Effect::Send { to, packet } => {
                    for client_id in to {
                        match clients.client_addr(client_id) {
                            Some(addr) => self.send_packet(&packet, addr),
                            None => debug!("Client {} is gone, dropping {:?}", client_id, packet),
                        }
                    }
                }
                Effect::Broadcast { packet } => self.broadcast_packet(packet),
                Effect::ScheduleFuse { task, delay } => self.schedule_fuse(task, delay),
            }
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut broadcast_tick = interval(self.broadcast_interval);
        broadcast_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            self.arena.handle_disconnect(client_id);
                        },
                        Some(ServerMessage::FuseExpired(task)) => {
                            self.arena.handle_fuse(task);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = broadcast_tick.tick() => {
                    self.arena.broadcast_positions(get_timestamp());
                },
            }

            self.dispatch_effects().await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_shared::SlotState;

    fn test_config(max_clients: usize) -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            max_clients,
            ..ServerConfig::default()
        }
    }

    async fn test_server(max_clients: usize) -> Server {
        Server::new(&test_config(max_clients), MapCatalog::builtin())
            .await
            .unwrap()
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn sent(server: &mut Server) -> Vec<GameMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = server.game_rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    async fn connect(server: &mut Server, port: u16) -> ClientId {
        server
            .handle_packet(
                Packet::Connect {
                    client_version: PROTOCOL_VERSION,
                },
                addr(port),
            )
            .await;

        match sent(server).pop() {
            Some(GameMessage::SendPacket {
                packet: Packet::Connected { client_id },
                ..
            }) => client_id,
            other => panic!("Expected Connected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_assigns_client_id() {
        let mut server = test_server(4).await;

        assert_eq!(connect(&mut server, 5001).await, 1);
        assert_eq!(connect(&mut server, 5002).await, 2);
        assert_eq!(server.clients.read().await.len(), 2);
        assert!(server.arena.is_connected(2));
    }

    #[tokio::test]
    async fn test_version_mismatch_rejected() {
        let mut server = test_server(4).await;
        server
            .handle_packet(Packet::Connect { client_version: 99 }, addr(5001))
            .await;

        match sent(&mut server).as_slice() {
            [GameMessage::SendPacket {
                packet: Packet::Disconnected { reason },
                addr: to,
            }] => {
                assert_eq!(reason, "Protocol version mismatch");
                assert_eq!(*to, addr(5001));
            }
            other => panic!("Unexpected messages: {:?}", other),
        }
        assert!(server.clients.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_server_full() {
        let mut server = test_server(1).await;
        connect(&mut server, 5001).await;

        server
            .handle_packet(
                Packet::Connect {
                    client_version: PROTOCOL_VERSION,
                },
                addr(5002),
            )
            .await;

        match sent(&mut server).as_slice() {
            [GameMessage::SendPacket {
                packet: Packet::Disconnected { reason },
                ..
            }] => assert_eq!(reason, "Server full"),
            other => panic!("Unexpected messages: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reconnect_replaces_previous_client() {
        let mut server = test_server(4).await;
        let first = connect(&mut server, 5001).await;
        server
            .handle_packet(Packet::HostGame { slot_id: 0 }, addr(5001))
            .await;
        server.dispatch_effects().await;
        sent(&mut server);

        let second = connect(&mut server, 5001).await;
        assert_ne!(first, second);
        assert!(!server.arena.is_connected(first));
        assert_eq!(server.arena.lobby().state(0), Some(SlotState::Empty));
        assert_eq!(server.clients.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_releases_client() {
        let mut server = test_server(4).await;
        let client_id = connect(&mut server, 5001).await;

        server.handle_packet(Packet::Disconnect, addr(5001)).await;
        assert!(server.clients.read().await.is_empty());
        assert!(!server.arena.is_connected(client_id));
    }

    #[tokio::test]
    async fn test_packet_from_unknown_address_is_dropped() {
        let mut server = test_server(4).await;
        server
            .handle_packet(Packet::HostGame { slot_id: 0 }, addr(5001))
            .await;
        server.dispatch_effects().await;

        assert!(sent(&mut server).is_empty());
        assert_eq!(server.arena.lobby().state(0), Some(SlotState::Empty));
    }

    #[tokio::test]
    async fn test_effects_are_routed_by_address() {
        let mut server = test_server(4).await;
        connect(&mut server, 5001).await;

        server.handle_packet(Packet::EnterLobby, addr(5001)).await;
        server
            .handle_packet(Packet::HostGame { slot_id: 1 }, addr(5001))
            .await;
        server.dispatch_effects().await;

        let messages = sent(&mut server);
        assert_eq!(messages.len(), 2);
        match &messages[0] {
            GameMessage::SendPacket {
                packet: Packet::LobbySlots { slots },
                addr: to,
            } => {
                assert_eq!(*to, addr(5001));
                assert_eq!(slots.len(), 4);
            }
            other => panic!("Unexpected message: {:?}", other),
        }
        match &messages[1] {
            GameMessage::BroadcastPacket {
                packet: Packet::SlotStateUpdate { slot_id, state, .. },
            } => {
                assert_eq!(*slot_id, 1);
                assert_eq!(*state, SlotState::SettingUp);
            }
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fuse_reports_back_to_main_loop() {
        let mut server = test_server(4).await;
        let task = FuseTask {
            match_id: 0,
            epoch: 1,
            round: 1,
            owner_id: 3,
            bomb_id: 7,
        };

        server.schedule_fuse(task, Duration::from_millis(5));
        let message = tokio::time::timeout(Duration::from_secs(2), server.server_rx.recv())
            .await
            .unwrap();

        match message {
            Some(ServerMessage::FuseExpired(fired)) => assert_eq!(fired, task),
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_channel_communication() {
        let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

        let msg = ServerMessage::PacketReceived {
            packet: Packet::Connect { client_version: 1 },
            addr: addr(8080),
        };
        tokio_test::assert_ok!(tx.send(msg));

        match rx.try_recv().unwrap() {
            ServerMessage::PacketReceived { packet, addr: a } => {
                assert_eq!(a, addr(8080));
                assert_eq!(packet, Packet::Connect { client_version: 1 });
            }
            _ => panic!("Unexpected message type"),
        }
    }
}
