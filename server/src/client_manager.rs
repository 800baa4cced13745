//! Connection bookkeeping for the arena server
//!
//! Maps UDP peer addresses to client ids, enforces the server's connection
//! capacity and tracks when each peer was last heard from so silent
//! connections can be dropped. Which slot or match a client belongs to is
//! not tracked here; that lives in the match server.

use arena_shared::ClientId;
use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A connected peer
#[derive(Debug)]
pub struct Client {
    /// Unique client identifier assigned by the server
    pub id: ClientId,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
}

impl Client {
    pub fn new(id: ClientId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
        }
    }

    /// Records activity from this client
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Returns true if nothing was received within `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Tracks all live connections
///
/// Client ids start at 1 and are never reused for the lifetime of the
/// server, so a stale id can never be confused with a newer connection.
pub struct ClientManager {
    clients: HashMap<ClientId, Client>,
    next_client_id: ClientId,
    max_clients: usize,
    timeout: Duration,
}

impl ClientManager {
    pub fn new(max_clients: usize, timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
            timeout,
        }
    }

    /// Registers a new connection
    ///
    /// Returns None if the server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<ClientId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr));

        Some(client_id)
    }

    /// Removes a client. Returns false if it was already gone.
    pub fn remove_client(&mut self, client_id: &ClientId) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!("Client {} disconnected", client.id);
            true
        } else {
            false
        }
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<ClientId> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    pub fn client_addr(&self, client_id: ClientId) -> Option<SocketAddr> {
        self.clients.get(&client_id).map(|client| client.addr)
    }

    /// Refreshes the last-seen time of the client behind `addr`
    ///
    /// Returns the client's id, or None for an unknown address.
    pub fn touch(&mut self, addr: SocketAddr) -> Option<ClientId> {
        let client = self.clients.values_mut().find(|client| client.addr == addr)?;
        client.touch();
        Some(client.id)
    }

    /// Removes and returns every client silent for longer than the timeout
    pub fn check_timeouts(&mut self) -> Vec<ClientId> {
        let timeout = self.timeout;
        let timed_out: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for client_id in &timed_out {
            info!("Client {} timed out", client_id);
            self.remove_client(client_id);
        }

        timed_out
    }

    /// All client ids with their addresses, for broadcasting
    pub fn get_client_addrs(&self) -> Vec<(ClientId, SocketAddr)> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    fn manager(max_clients: usize) -> ClientManager {
        ClientManager::new(max_clients, Duration::from_secs(10))
    }

    #[test]
    fn test_client_creation() {
        let addr = test_addr();
        let client = Client::new(1, addr);

        assert_eq!(client.id, 1);
        assert_eq!(client.addr, addr);
        assert!(!client.is_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn test_client_timeout() {
        let mut client = Client::new(1, test_addr());
        client.last_seen = Instant::now() - Duration::from_secs(2);
        assert!(client.is_timed_out(Duration::from_secs(1)));

        client.touch();
        assert!(!client.is_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn test_client_manager_creation() {
        let manager = manager(5);
        assert_eq!(manager.max_clients, 5);
        assert!(manager.is_empty());
        assert_eq!(manager.len(), 0);
    }

    #[test]
    fn test_add_multiple_clients() {
        let mut manager = manager(3);

        let client_id1 = manager.add_client(test_addr()).unwrap();
        let client_id2 = manager.add_client(test_addr2()).unwrap();

        assert_eq!(client_id1, 1);
        assert_eq!(client_id2, 2);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_add_client_max_capacity() {
        let mut manager = manager(1);

        assert!(manager.add_client(test_addr()).is_some());
        assert!(manager.add_client(test_addr2()).is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_ids_are_not_reused() {
        let mut manager = manager(1);

        let first = manager.add_client(test_addr()).unwrap();
        assert!(manager.remove_client(&first));
        let second = manager.add_client(test_addr()).unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn test_remove_nonexistent_client() {
        let mut manager = manager(2);

        assert!(!manager.remove_client(&999));
        assert_eq!(manager.len(), 0);
    }

    #[test]
    fn test_find_client_by_addr() {
        let mut manager = manager(2);

        let client_id1 = manager.add_client(test_addr()).unwrap();
        let client_id2 = manager.add_client(test_addr2()).unwrap();

        assert_eq!(manager.find_client_by_addr(test_addr()), Some(client_id1));
        assert_eq!(manager.client_addr(client_id2), Some(test_addr2()));

        let unknown_addr: SocketAddr = "192.168.1.1:9999".parse().unwrap();
        assert_eq!(manager.find_client_by_addr(unknown_addr), None);
        assert_eq!(manager.touch(unknown_addr), None);
    }

    #[test]
    fn test_check_timeouts_removes_silent_clients() {
        let mut manager = ClientManager::new(4, Duration::from_secs(1));

        let quiet = manager.add_client(test_addr()).unwrap();
        let active = manager.add_client(test_addr2()).unwrap();

        for client in manager.clients.values_mut() {
            client.last_seen = Instant::now() - Duration::from_secs(5);
        }
        assert_eq!(manager.touch(test_addr2()), Some(active));

        assert_eq!(manager.check_timeouts(), vec![quiet]);
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.find_client_by_addr(test_addr2()), Some(active));
    }
}
