//! Authoritative zone and player state
//!
//! `ZoneCoordinator` is plain single-threaded state. It is only ever
//! touched by the actor task in `actor`, which gives every caller a total
//! order of updates.

use crate::error::CoordinatorError;
use crate::store::{CoordinatorStore, StoredServer};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use shared::{
    AggregatedStats, PlayerId, PlayerRecord, ServerId, ServerInfo, TransferDirective, Vec2, Zone,
    ZoneGrid, ZoneStats,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub struct ServerRegistration {
    pub server_id: ServerId,
    pub endpoint: SocketAddr,
    pub zone: Zone,
    pub last_heartbeat: Instant,
}

impl ServerRegistration {
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            server_id: self.server_id.clone(),
            endpoint: self.endpoint,
            zone: self.zone,
        }
    }
}

/// Handoff issued to a player but not yet confirmed by `complete_transfer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingHandoff {
    pub target: ServerId,
    pub previous: Option<ServerId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerEntry {
    pub record: PlayerRecord,
    /// Last confirmed owner.
    pub owner: Option<ServerId>,
    pub pending: Option<PendingHandoff>,
}

impl PlayerEntry {
    pub fn new(record: PlayerRecord, owner: Option<ServerId>) -> Self {
        Self {
            record,
            owner,
            pending: None,
        }
    }

    /// Server that most likely holds the player right now: the pending
    /// target if a handoff is in flight, otherwise the confirmed owner.
    pub fn holder(&self) -> Option<&ServerId> {
        self.pending
            .as_ref()
            .map(|pending| &pending.target)
            .or(self.owner.as_ref())
    }
}

/// Row-major first-fit zone for the `count`-th server.
///
/// The scan covers a square grid of side `ceil(sqrt(count))` and grows by
/// rows, so freed cells are reused before new ones are opened.
pub fn first_free_zone(claimed: &HashMap<Zone, ServerId>, count: usize) -> Zone {
    let side = ((count.max(1) as f64).sqrt().ceil() as i32).max(1);
    let mut row = 0;
    loop {
        for x in 0..side {
            let zone = Zone::new(x, row);
            if !claimed.contains_key(&zone) {
                return zone;
            }
        }
        row += 1;
    }
}

pub struct ZoneCoordinator<S: CoordinatorStore> {
    grid: ZoneGrid,
    store: S,
    servers: HashMap<ServerId, ServerRegistration>,
    zones: HashMap<Zone, ServerId>,
    players: HashMap<PlayerId, PlayerEntry>,
    zone_stats: HashMap<Zone, ZoneStats>,
}

impl<S: CoordinatorStore> ZoneCoordinator<S> {
    /// Builds the coordinator from whatever `store` already holds.
    pub fn restore(grid: ZoneGrid, store: S, now: Instant) -> Result<Self, CoordinatorError> {
        let snapshot = store.load()?;
        let mut coordinator = Self {
            grid,
            store,
            servers: HashMap::new(),
            zones: HashMap::new(),
            players: HashMap::new(),
            zone_stats: HashMap::new(),
        };

        for (server_id, stored) in snapshot.servers {
            if let Some(holder) = coordinator.zones.get(&stored.zone) {
                warn!(
                    "Snapshot assigns zone {} to both {} and {}, keeping {}",
                    stored.zone, holder, server_id, holder
                );
                continue;
            }
            coordinator.zones.insert(stored.zone, server_id.clone());
            coordinator.servers.insert(
                server_id,
                ServerRegistration {
                    server_id: stored.server_id,
                    endpoint: stored.endpoint,
                    zone: stored.zone,
                    last_heartbeat: now,
                },
            );
        }
        coordinator.players = snapshot.players.into_iter().collect();

        if !coordinator.servers.is_empty() || !coordinator.players.is_empty() {
            info!(
                "Restored {} servers and {} players",
                coordinator.servers.len(),
                coordinator.players.len()
            );
        }

        Ok(coordinator)
    }

    pub fn grid(&self) -> ZoneGrid {
        self.grid
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn server(&self, server_id: &ServerId) -> Option<&ServerRegistration> {
        self.servers.get(server_id)
    }

    pub fn servers(&self) -> Vec<ServerInfo> {
        let mut servers: Vec<ServerInfo> = self.servers.values().map(|s| s.info()).collect();
        servers.sort_by_key(|s| s.zone);
        servers
    }

    pub fn owner_of(&self, zone: Zone) -> Option<&ServerRegistration> {
        self.zones.get(&zone).and_then(|id| self.servers.get(id))
    }

    pub fn player(&self, player_id: PlayerId) -> Option<&PlayerEntry> {
        self.players.get(&player_id)
    }

    /// Assigns `server_id` a zone. Re-registering a known id returns its
    /// existing zone without touching any state.
    pub fn register_server(
        &mut self,
        server_id: ServerId,
        endpoint: SocketAddr,
        now: Instant,
    ) -> Result<Zone, CoordinatorError> {
        if let Some(existing) = self.servers.get(&server_id) {
            debug!("Server {} re-registered, keeping zone {}", server_id, existing.zone);
            return Ok(existing.zone);
        }

        let zone = first_free_zone(&self.zones, self.servers.len() + 1);
        self.store.put_server(&StoredServer {
            server_id: server_id.clone(),
            endpoint,
            zone,
        })?;

        info!("Server {} at {} assigned zone {}", server_id, endpoint, zone);
        self.zones.insert(zone, server_id.clone());
        self.servers.insert(
            server_id.clone(),
            ServerRegistration {
                server_id,
                endpoint,
                zone,
                last_heartbeat: now,
            },
        );

        Ok(zone)
    }

    /// Removes a registration and frees its zone. Unknown ids are a no-op.
    pub fn unregister_server(&mut self, server_id: &ServerId) -> Result<(), CoordinatorError> {
        let Some(registration) = self.servers.get(server_id) else {
            return Ok(());
        };
        let zone = registration.zone;

        self.store.remove_server(server_id)?;
        self.servers.remove(server_id);
        self.zones.remove(&zone);
        self.zone_stats.remove(&zone);
        info!("Server {} unregistered, zone {} is free", server_id, zone);
        Ok(())
    }

    pub fn heartbeat(&mut self, server_id: &ServerId, now: Instant) -> Result<(), CoordinatorError> {
        match self.servers.get_mut(server_id) {
            Some(registration) => {
                registration.last_heartbeat = now;
                Ok(())
            }
            None => Err(CoordinatorError::UnknownServer(server_id.clone())),
        }
    }

    /// Unregisters every server whose last heartbeat is older than
    /// `timeout`. Returns the evicted ids.
    pub fn evict_stale(
        &mut self,
        now: Instant,
        timeout: Duration,
    ) -> Result<Vec<ServerId>, CoordinatorError> {
        let stale: Vec<ServerId> = self
            .servers
            .values()
            .filter(|s| now.saturating_duration_since(s.last_heartbeat) > timeout)
            .map(|s| s.server_id.clone())
            .collect();

        for server_id in &stale {
            warn!("Evicting server {}: no heartbeat for {:?}", server_id, timeout);
            self.unregister_server(server_id)?;
        }

        Ok(stale)
    }

    pub fn get_server_for_position(&self, position: Vec2) -> Option<ServerInfo> {
        self.owner_of(self.grid.zone_of(position)).map(|s| s.info())
    }

    /// Records `position` for the player and decides whether it must move
    /// to another server.
    ///
    /// Returns `None` when the player was unknown (it is registered with
    /// the current zone owner), when no server owns the target zone, or
    /// when the player already sits on the target server. While a handoff
    /// is unconfirmed the same directive is issued again, so a failed push
    /// is retried on the next scan.
    pub fn initiate_transfer(
        &mut self,
        player_id: PlayerId,
        position: Vec2,
    ) -> Result<Option<TransferDirective>, CoordinatorError> {
        let target = self
            .owner_of(self.grid.zone_of(position))
            .map(|s| s.info());

        let Some(mut entry) = self.players.get(&player_id).cloned() else {
            let entry = PlayerEntry::new(
                PlayerRecord::new(player_id, format!("player-{}", player_id), position),
                target.map(|t| t.server_id),
            );
            self.store.put_player(&entry)?;
            debug!("Auto-registered player {} at {}", player_id, position);
            self.players.insert(player_id, entry);
            return Ok(None);
        };

        entry.record.position = position;

        let directive = match target {
            None => None,
            Some(target) if entry.holder() == Some(&target.server_id) => {
                entry.pending.as_ref().map(|pending| TransferDirective {
                    target_server: target,
                    previous_server: pending.previous.clone(),
                    player: entry.record.clone(),
                })
            }
            Some(target) => {
                entry.pending = Some(PendingHandoff {
                    target: target.server_id.clone(),
                    previous: entry.owner.clone(),
                });
                Some(TransferDirective {
                    target_server: target,
                    previous_server: entry.owner.clone(),
                    player: entry.record.clone(),
                })
            }
        };

        self.store.put_player(&entry)?;
        self.players.insert(player_id, entry);

        if let Some(directive) = &directive {
            debug!(
                "Player {} directed from {:?} to {}",
                player_id, directive.previous_server, directive.target_server.server_id
            );
        }

        Ok(directive)
    }

    /// Confirms that `server_id` accepted the player.
    pub fn complete_transfer(
        &mut self,
        player_id: PlayerId,
        server_id: ServerId,
    ) -> Result<(), CoordinatorError> {
        let Some(mut entry) = self.players.get(&player_id).cloned() else {
            warn!("Completion for unknown player {}", player_id);
            return Ok(());
        };

        if entry.owner.as_ref() == Some(&server_id) && entry.pending.is_none() {
            return Ok(());
        }

        entry.owner = Some(server_id);
        entry.pending = None;
        self.store.put_player(&entry)?;
        self.players.insert(player_id, entry);
        Ok(())
    }

    /// Refreshes a player's record, registering it with the owner of its
    /// zone if it is new.
    pub fn update_player(&mut self, record: PlayerRecord) -> Result<(), CoordinatorError> {
        let entry = match self.players.get(&record.player_id) {
            Some(existing) => PlayerEntry {
                record,
                owner: existing.owner.clone(),
                pending: existing.pending.clone(),
            },
            None => {
                let owner = self
                    .owner_of(self.grid.zone_of(record.position))
                    .map(|s| s.server_id.clone());
                PlayerEntry::new(record, owner)
            }
        };

        self.store.put_player(&entry)?;
        self.players.insert(entry.record.player_id, entry);
        Ok(())
    }

    pub fn reset_players(&mut self) -> Result<(), CoordinatorError> {
        self.store.clear_players()?;
        let count = self.players.len();
        self.players.clear();
        info!("Reset {} player records", count);
        Ok(())
    }

    pub fn report_zone_stats(&mut self, zone: Zone, stats: ZoneStats) {
        if self.zones.contains_key(&zone) {
            self.zone_stats.insert(zone, stats);
        } else {
            debug!("Dropping stats for unowned zone {}", zone);
        }
    }

    pub fn aggregate_stats(&self, generated_at: u64) -> AggregatedStats {
        let mut zones: Vec<(Zone, ZoneStats)> =
            self.zone_stats.iter().map(|(z, s)| (*z, *s)).collect();
        zones.sort_by_key(|(zone, _)| *zone);

        AggregatedStats {
            generated_at,
            server_count: self.servers.len() as u32,
            player_records: self.players.len() as u32,
            total_entities: zones.iter().map(|(_, s)| s.entity_count).sum(),
            total_players: zones.iter().map(|(_, s)| s.player_count).sum(),
            zones,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use assert_approx_eq::assert_approx_eq;
    use std::collections::HashSet;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn coordinator() -> ZoneCoordinator<MemoryStore> {
        ZoneCoordinator::restore(ZoneGrid::default(), MemoryStore::new(), Instant::now()).unwrap()
    }

    /// Two servers side by side: a owns (0,0), b owns (1,0).
    fn two_zone_coordinator() -> ZoneCoordinator<MemoryStore> {
        let mut c = coordinator();
        let now = Instant::now();
        assert_eq!(c.register_server(ServerId::new("a"), addr(7001), now).unwrap(), Zone::new(0, 0));
        assert_eq!(c.register_server(ServerId::new("b"), addr(7002), now).unwrap(), Zone::new(1, 0));
        c
    }

    #[test]
    fn test_first_fit_row_major_assignment() {
        let mut c = coordinator();
        let now = Instant::now();
        let zones: Vec<Zone> = (0..5)
            .map(|i| {
                c.register_server(ServerId::new(format!("s{}", i)), addr(7000 + i), now)
                    .unwrap()
            })
            .collect();

        assert_eq!(
            zones,
            vec![
                Zone::new(0, 0),
                Zone::new(1, 0),
                Zone::new(0, 1),
                Zone::new(1, 1),
                Zone::new(2, 0),
            ]
        );
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut c = coordinator();
        let now = Instant::now();
        let first = c.register_server(ServerId::new("a"), addr(7001), now).unwrap();
        let again = c
            .register_server(ServerId::new("a"), addr(9999), now + Duration::from_secs(5))
            .unwrap();

        assert_eq!(first, again);
        assert_eq!(c.server_count(), 1);
        let registration = c.server(&ServerId::new("a")).unwrap();
        assert_eq!(registration.endpoint, addr(7001));
        assert_eq!(registration.last_heartbeat, now);
    }

    #[test]
    fn test_at_most_one_server_per_zone() {
        let mut c = coordinator();
        let now = Instant::now();
        for i in 0..20u16 {
            c.register_server(ServerId::new(format!("s{}", i)), addr(7000 + i), now)
                .unwrap();
            if i % 3 == 0 {
                c.unregister_server(&ServerId::new(format!("s{}", i / 2)))
                    .unwrap();
            }
        }

        let zones: Vec<Zone> = c.servers().iter().map(|s| s.zone).collect();
        let unique: HashSet<Zone> = zones.iter().copied().collect();
        assert_eq!(zones.len(), unique.len());
    }

    #[test]
    fn test_unregister_frees_zone() {
        let mut c = two_zone_coordinator();
        c.unregister_server(&ServerId::new("a")).unwrap();
        assert!(c.owner_of(Zone::new(0, 0)).is_none());

        let zone = c
            .register_server(ServerId::new("c"), addr(7003), Instant::now())
            .unwrap();
        assert_eq!(zone, Zone::new(0, 0));
    }

    #[test]
    fn test_heartbeat_unknown_server() {
        let mut c = coordinator();
        let result = c.heartbeat(&ServerId::new("ghost"), Instant::now());
        assert!(matches!(result, Err(CoordinatorError::UnknownServer(_))));
    }

    #[test]
    fn test_evict_stale_servers() {
        let mut c = coordinator();
        let start = Instant::now();
        c.register_server(ServerId::new("a"), addr(7001), start).unwrap();
        c.register_server(ServerId::new("b"), addr(7002), start).unwrap();
        c.heartbeat(&ServerId::new("b"), start + Duration::from_secs(100))
            .unwrap();

        let evicted = c
            .evict_stale(start + Duration::from_secs(150), Duration::from_secs(120))
            .unwrap();

        assert_eq!(evicted, vec![ServerId::new("a")]);
        assert!(c.owner_of(Zone::new(0, 0)).is_none());
        assert!(c.owner_of(Zone::new(1, 0)).is_some());
    }

    #[test]
    fn test_initiate_transfer_unknown_player_auto_registers() {
        let mut c = two_zone_coordinator();
        let directive = c.initiate_transfer(7, Vec2::new(499.0, 10.0)).unwrap();

        assert!(directive.is_none());
        let entry = c.player(7).unwrap();
        assert_eq!(entry.owner, Some(ServerId::new("a")));
        assert_eq!(entry.record.position, Vec2::new(499.0, 10.0));
    }

    #[test]
    fn test_initiate_transfer_across_boundary() {
        let mut c = two_zone_coordinator();
        c.initiate_transfer(7, Vec2::new(499.0, 10.0)).unwrap();

        let directive = c
            .initiate_transfer(7, Vec2::new(501.0, 10.0))
            .unwrap()
            .expect("crossing into b must produce a directive");

        assert_eq!(directive.target_server.server_id, ServerId::new("b"));
        assert_eq!(directive.target_server.endpoint, addr(7002));
        assert_eq!(directive.previous_server, Some(ServerId::new("a")));
        assert_eq!(directive.player.position, Vec2::new(501.0, 10.0));
    }

    #[test]
    fn test_initiate_transfer_idempotent_on_correct_server() {
        let mut c = two_zone_coordinator();
        c.initiate_transfer(7, Vec2::new(100.0, 10.0)).unwrap();

        let first = c.initiate_transfer(7, Vec2::new(120.0, 20.0)).unwrap();
        let after_first = c.player(7).unwrap().clone();
        let second = c.initiate_transfer(7, Vec2::new(120.0, 20.0)).unwrap();

        assert!(first.is_none());
        assert!(second.is_none());
        assert_eq!(c.player(7).unwrap(), &after_first);
        assert_eq!(after_first.record.position, Vec2::new(120.0, 20.0));
    }

    #[test]
    fn test_unconfirmed_directive_is_reissued() {
        let mut c = two_zone_coordinator();
        c.initiate_transfer(7, Vec2::new(499.0, 10.0)).unwrap();

        let first = c.initiate_transfer(7, Vec2::new(501.0, 10.0)).unwrap();
        let retry = c.initiate_transfer(7, Vec2::new(502.0, 10.0)).unwrap();

        assert!(first.is_some());
        let retry = retry.expect("pending handoff must be re-issued");
        assert_eq!(retry.target_server.server_id, ServerId::new("b"));
        assert_eq!(retry.player.position, Vec2::new(502.0, 10.0));
    }

    #[test]
    fn test_complete_transfer_settles_owner() {
        let mut c = two_zone_coordinator();
        c.initiate_transfer(7, Vec2::new(499.0, 10.0)).unwrap();
        c.initiate_transfer(7, Vec2::new(501.0, 10.0)).unwrap();
        c.complete_transfer(7, ServerId::new("b")).unwrap();

        let entry = c.player(7).unwrap();
        assert_eq!(entry.owner, Some(ServerId::new("b")));
        assert!(entry.pending.is_none());
        assert!(c.initiate_transfer(7, Vec2::new(510.0, 10.0)).unwrap().is_none());
    }

    #[test]
    fn test_lost_confirmation_does_not_strand_player() {
        let mut c = two_zone_coordinator();
        c.initiate_transfer(7, Vec2::new(499.0, 10.0)).unwrap();
        c.initiate_transfer(7, Vec2::new(501.0, 10.0)).unwrap();

        // b holds the player but the confirmation never arrived; the player
        // walks back into a's zone and b asks again.
        let back = c
            .initiate_transfer(7, Vec2::new(490.0, 10.0))
            .unwrap()
            .expect("player must be directed back to a");
        assert_eq!(back.target_server.server_id, ServerId::new("a"));
    }

    #[test]
    fn test_initiate_transfer_without_owner_returns_none() {
        let mut c = two_zone_coordinator();
        c.initiate_transfer(7, Vec2::new(499.0, 10.0)).unwrap();

        let directive = c.initiate_transfer(7, Vec2::new(1200.0, 10.0)).unwrap();

        assert!(directive.is_none());
        assert_eq!(c.player(7).unwrap().record.position, Vec2::new(1200.0, 10.0));
        assert_eq!(c.player(7).unwrap().owner, Some(ServerId::new("a")));
    }

    #[test]
    fn test_persistence_failure_surfaces_and_leaves_state() {
        let mut c = two_zone_coordinator();
        c.initiate_transfer(7, Vec2::new(499.0, 10.0)).unwrap();
        c.store_mut().set_fail_writes(true);

        let result = c.initiate_transfer(7, Vec2::new(501.0, 10.0));
        assert!(matches!(result, Err(CoordinatorError::Persistence(_))));
        assert_eq!(c.player(7).unwrap().record.position, Vec2::new(499.0, 10.0));
        assert!(c.player(7).unwrap().pending.is_none());

        let register = c.register_server(ServerId::new("c"), addr(7003), Instant::now());
        assert!(register.is_err());
        assert_eq!(c.server_count(), 2);
    }

    #[test]
    fn test_restore_from_store() {
        let mut c = two_zone_coordinator();
        c.update_player(PlayerRecord::new(3, "grace", Vec2::new(700.0, 5.0)))
            .unwrap();
        let snapshot = c.store().load().unwrap();

        let mut store = MemoryStore::new();
        for server in snapshot.servers.values() {
            store.put_server(server).unwrap();
        }
        for player in snapshot.players.values() {
            store.put_player(player).unwrap();
        }

        let restored = ZoneCoordinator::restore(ZoneGrid::default(), store, Instant::now()).unwrap();
        assert_eq!(restored.server_count(), 2);
        assert_eq!(restored.player(3).unwrap().owner, Some(ServerId::new("b")));
    }

    #[test]
    fn test_reset_players() {
        let mut c = two_zone_coordinator();
        c.initiate_transfer(1, Vec2::new(10.0, 10.0)).unwrap();
        c.initiate_transfer(2, Vec2::new(600.0, 10.0)).unwrap();
        c.reset_players().unwrap();

        assert!(c.player(1).is_none());
        assert!(c.player(2).is_none());
    }

    #[test]
    fn test_reclaimed_player_is_directed_after_reset() {
        let mut c = two_zone_coordinator();
        c.update_player(PlayerRecord::new(7, "ada", Vec2::new(100.0, 10.0)))
            .unwrap();
        c.reset_players().unwrap();

        // The record comes back owned by b although a still holds the player.
        assert!(c.initiate_transfer(7, Vec2::new(501.0, 10.0)).unwrap().is_none());
        assert_eq!(c.player(7).unwrap().owner, Some(ServerId::new("b")));

        c.complete_transfer(7, ServerId::new("a")).unwrap();
        let directive = c
            .initiate_transfer(7, Vec2::new(502.0, 10.0))
            .unwrap()
            .expect("reclaimed player must be directed to b");
        assert_eq!(directive.target_server.server_id, ServerId::new("b"));
        assert_eq!(directive.previous_server, Some(ServerId::new("a")));
    }

    #[test]
    fn test_aggregate_stats() {
        let mut c = two_zone_coordinator();
        c.report_zone_stats(
            Zone::new(0, 0),
            ZoneStats {
                entity_count: 10,
                player_count: 2,
                scan_ms: 0.4,
            },
        );
        c.report_zone_stats(
            Zone::new(1, 0),
            ZoneStats {
                entity_count: 5,
                player_count: 1,
                scan_ms: 0.2,
            },
        );
        c.report_zone_stats(Zone::new(9, 9), ZoneStats::default());

        let stats = c.aggregate_stats(1234);
        assert_eq!(stats.generated_at, 1234);
        assert_eq!(stats.server_count, 2);
        assert_eq!(stats.total_entities, 15);
        assert_eq!(stats.total_players, 3);
        assert_eq!(stats.zones.len(), 2);
        let slowest = stats
            .zones
            .iter()
            .map(|(_, zone)| zone.scan_ms)
            .fold(0.0f32, f32::max);
        assert_approx_eq!(slowest, 0.4, 1e-6);
    }
}
