//! Attached-client tracking for a zone server
//!
//! This module handles the server-side view of clients attached to this
//! zone, including:
//! - Join and leave, with session keys checked by a `SessionValidator`
//! - Move sequence ordering so stale datagrams are dropped
//! - Silence timeouts and cleanup
//! - Capacity limits and address lookup for the world-state broadcast
//!
//! Attachment is about who receives world state. It does not decide who
//! owns a player entity; that is the boundary scan's job.

use log::info;
use shared::PlayerId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Decides whether a client may attach with the given session key.
pub trait SessionValidator: Send + Sync {
    fn validate(&self, player_id: PlayerId, session_key: &str) -> bool;
}

/// Accepts any non-empty key.
#[derive(Debug, Default, Clone, Copy)]
pub struct NonEmptyKey;

impl SessionValidator for NonEmptyKey {
    fn validate(&self, _player_id: PlayerId, session_key: &str) -> bool {
        !session_key.trim().is_empty()
    }
}

/// A client attached to this server.
#[derive(Debug)]
pub struct AttachedClient {
    pub player_id: PlayerId,
    /// Network address for world-state pushes
    pub addr: SocketAddr,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
    /// Highest move sequence applied
    pub last_sequence: u32,
}

impl AttachedClient {
    pub fn new(player_id: PlayerId, addr: SocketAddr, now: Instant) -> Self {
        Self {
            player_id,
            addr,
            last_seen: now,
            last_sequence: 0,
        }
    }

    pub fn is_timed_out(&self, timeout: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }
}

pub struct ClientManager {
    clients: HashMap<PlayerId, AttachedClient>,
    max_clients: usize,
    timeout: Duration,
}

impl ClientManager {
    pub fn new(max_clients: usize, timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            max_clients,
            timeout,
        }
    }

    /// Attaches `player_id` at `addr`.
    ///
    /// Re-attaching an already attached player only refreshes its address,
    /// so a client retrying a join does not count twice against capacity.
    /// Returns false if the server is full.
    pub fn attach(&mut self, player_id: PlayerId, addr: SocketAddr, now: Instant) -> bool {
        if let Some(client) = self.clients.get_mut(&player_id) {
            client.addr = addr;
            client.last_seen = now;
            return true;
        }

        if self.clients.len() >= self.max_clients {
            return false;
        }

        info!("Player {} attached from {}", player_id, addr);
        self.clients
            .insert(player_id, AttachedClient::new(player_id, addr, now));
        true
    }

    pub fn detach(&mut self, player_id: PlayerId) -> bool {
        if self.clients.remove(&player_id).is_some() {
            info!("Player {} detached", player_id);
            true
        } else {
            false
        }
    }

    pub fn get(&self, player_id: PlayerId) -> Option<&AttachedClient> {
        self.clients.get(&player_id)
    }

    /// Finds the player attached from `addr`.
    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<PlayerId> {
        self.clients
            .values()
            .find(|client| client.addr == addr)
            .map(|client| client.player_id)
    }

    /// Records a move from `addr`. True when the sender is attached as
    /// `player_id` and the sequence is newer than any applied before.
    pub fn accept_move(
        &mut self,
        player_id: PlayerId,
        sequence: u32,
        addr: SocketAddr,
        now: Instant,
    ) -> bool {
        match self.clients.get_mut(&player_id) {
            Some(client) if client.addr == addr => {
                client.last_seen = now;
                if sequence > client.last_sequence {
                    client.last_sequence = sequence;
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    pub fn touch(&mut self, addr: SocketAddr, now: Instant) {
        if let Some(client) = self.clients.values_mut().find(|c| c.addr == addr) {
            client.last_seen = now;
        }
    }

    /// Detaches clients silent for longer than the timeout and returns them.
    pub fn check_timeouts(&mut self, now: Instant) -> Vec<PlayerId> {
        let timeout = self.timeout;
        let timed_out: Vec<PlayerId> = self
            .clients
            .values()
            .filter(|client| client.is_timed_out(timeout, now))
            .map(|client| client.player_id)
            .collect();

        for player_id in &timed_out {
            self.detach(*player_id);
        }

        timed_out
    }

    /// Addresses for the world-state broadcast.
    pub fn get_client_addrs(&self) -> Vec<(PlayerId, SocketAddr)> {
        self.clients
            .values()
            .map(|client| (client.player_id, client.addr))
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

    fn manager() -> ClientManager {
        ClientManager::new(2, Duration::from_secs(5))
    }

    #[test]
    fn test_non_empty_key_validator() {
        assert!(NonEmptyKey.validate(1, "token"));
        assert!(!NonEmptyKey.validate(1, ""));
        assert!(!NonEmptyKey.validate(1, "   "));
    }

    #[test]
    fn test_attach_and_detach() {
        let mut clients = manager();
        let now = Instant::now();

        assert!(clients.attach(1, test_addr(), now));
        assert_eq!(clients.len(), 1);
        assert_eq!(clients.find_by_addr(test_addr()), Some(1));

        assert!(clients.detach(1));
        assert!(!clients.detach(1));
        assert!(clients.is_empty());
    }

    #[test]
    fn test_attach_max_capacity() {
        let mut clients = manager();
        let now = Instant::now();

        assert!(clients.attach(1, test_addr(), now));
        assert!(clients.attach(2, test_addr2(), now));
        assert!(!clients.attach(3, "127.0.0.1:8082".parse().unwrap(), now));
        // Re-attaching is not a new slot.
        assert!(clients.attach(2, "127.0.0.1:8083".parse().unwrap(), now));
        assert_eq!(clients.get(2).unwrap().addr.port(), 8083);
    }

    #[test]
    fn test_accept_move_orders_sequences() {
        let mut clients = manager();
        let now = Instant::now();
        clients.attach(1, test_addr(), now);

        assert!(clients.accept_move(1, 1, test_addr(), now));
        assert!(clients.accept_move(1, 3, test_addr(), now));
        assert!(!clients.accept_move(1, 2, test_addr(), now));
        assert!(!clients.accept_move(1, 3, test_addr(), now));
        assert_eq!(clients.get(1).unwrap().last_sequence, 3);
    }

    #[test]
    fn test_accept_move_rejects_other_sender() {
        let mut clients = manager();
        let now = Instant::now();
        clients.attach(1, test_addr(), now);

        assert!(!clients.accept_move(1, 1, test_addr2(), now));
        assert!(!clients.accept_move(2, 1, test_addr(), now));
    }

    #[test]
    fn test_check_timeouts() {
        let mut clients = manager();
        let start = Instant::now();
        clients.attach(1, test_addr(), start);
        clients.attach(2, test_addr2(), start);
        clients.touch(test_addr2(), start + Duration::from_secs(4));

        let timed_out = clients.check_timeouts(start + Duration::from_secs(6));

        assert_eq!(timed_out, vec![1]);
        assert!(clients.get(1).is_none());
        assert!(clients.get(2).is_some());
    }

    #[test]
    fn test_get_client_addrs() {
        let mut clients = manager();
        let now = Instant::now();
        clients.attach(1, test_addr(), now);
        clients.attach(2, test_addr2(), now);

        let mut addrs = clients.get_client_addrs();
        addrs.sort();
        assert_eq!(addrs, vec![(1, test_addr()), (2, test_addr2())]);
    }
}
