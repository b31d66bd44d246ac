//! Boundary scan and outbound entity transfer
//!
//! Each scan classifies every local entity against the assigned zone and
//! pushes the ones that left to their new owner. Players go through the
//! coordinator so ownership stays single; other entities are routed by
//! position and destroyed when no server owns their destination.
//!
//! A failure for one entity is logged and counted, then the scan moves on.
//! The entity stays here and is retried on the next scan.

use crate::boundary::{classify, Crossing, ProjectileWindow};
use crate::entity::{Entity, EntityStore};
use crate::pool::{Connector, PeerConnection, PeerConnectionPool, UdpConnector};
use log::{debug, info, warn};
use shared::metrics::MetricsSink;
use shared::rpc::CoordinatorClient;
use shared::{
    EntityKind, EntitySnapshot, HandoffError, PlayerId, ServerId, ServerInfo, TransferDirective,
    TransportError, Vec2, Zone, ZoneGrid,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Ownership lookups used by the scan.
pub trait OwnershipResolver: Send + Sync + 'static {
    fn initiate_transfer(
        &self,
        player_id: PlayerId,
        position: Vec2,
    ) -> impl Future<Output = Result<Option<TransferDirective>, TransportError>> + Send;

    fn complete_transfer(
        &self,
        player_id: PlayerId,
        server_id: &ServerId,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn server_for_position(
        &self,
        position: Vec2,
    ) -> impl Future<Output = Result<Option<ServerInfo>, TransportError>> + Send;
}

impl OwnershipResolver for CoordinatorClient {
    async fn initiate_transfer(
        &self,
        player_id: PlayerId,
        position: Vec2,
    ) -> Result<Option<TransferDirective>, TransportError> {
        CoordinatorClient::initiate_transfer(self, player_id, position).await
    }

    async fn complete_transfer(
        &self,
        player_id: PlayerId,
        server_id: &ServerId,
    ) -> Result<(), TransportError> {
        CoordinatorClient::complete_transfer(self, player_id, server_id).await
    }

    async fn server_for_position(&self, position: Vec2) -> Result<Option<ServerInfo>, TransportError> {
        self.get_server_for_position(position).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferConfig {
    /// Deadline for one `TransferEntityIn` attempt.
    pub push_deadline: Duration,
    pub window: ProjectileWindow,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            push_deadline: Duration::from_secs(2),
            window: ProjectileWindow::default(),
        }
    }
}

/// Counts from one scan.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    pub scanned: usize,
    pub handed_off: usize,
    /// Players outside the zone with no server to take them.
    pub retained: usize,
    pub destroyed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    HandedOff,
    Retained,
    Destroyed,
    Kept,
}

pub struct BoundaryScanner<R, C: Connector = UdpConnector> {
    server_id: ServerId,
    grid: ZoneGrid,
    config: TransferConfig,
    resolver: Arc<R>,
    pool: Arc<PeerConnectionPool<C>>,
    metrics: Arc<dyn MetricsSink>,
}

impl<R: OwnershipResolver, C: Connector> BoundaryScanner<R, C> {
    pub fn new(
        server_id: ServerId,
        grid: ZoneGrid,
        config: TransferConfig,
        resolver: Arc<R>,
        pool: Arc<PeerConnectionPool<C>>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            server_id,
            grid,
            config,
            resolver,
            pool,
            metrics,
        }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Scans `entities` against `zone` and transfers whatever left it.
    ///
    /// The store lock is never held across a call to another process.
    pub async fn scan(&self, entities: &RwLock<EntityStore>, zone: Zone) -> ScanReport {
        let now = Instant::now();
        let (scanned, candidates) = self.collect_candidates(entities, zone, now).await;
        let mut report = ScanReport {
            scanned,
            ..ScanReport::default()
        };

        for (entity, crossing) in candidates {
            match self.transfer_one(&entity, crossing, now).await {
                Ok(Outcome::HandedOff) => {
                    entities.write().await.remove(entity.id);
                    report.handed_off += 1;
                }
                Ok(Outcome::Destroyed) => {
                    entities.write().await.remove(entity.id);
                    report.destroyed += 1;
                }
                Ok(Outcome::Retained) => report.retained += 1,
                Ok(Outcome::Kept) => {}
                Err(e) => {
                    warn!(
                        "Transfer of {:?} {} failed ({}): {}",
                        entity.kind,
                        entity.id,
                        e.kind(),
                        e
                    );
                    if let HandoffError::StaleConnection(peer) = e {
                        self.pool.invalidate(peer);
                    }
                    report.failed += 1;
                }
            }
        }

        self.metrics.counter("scan.handed_off", report.handed_off as u64);
        self.metrics.counter("scan.destroyed", report.destroyed as u64);
        self.metrics.counter("scan.failed", report.failed as u64);
        report
    }

    async fn collect_candidates(
        &self,
        entities: &RwLock<EntityStore>,
        zone: Zone,
        now: Instant,
    ) -> (usize, Vec<(Entity, Crossing)>) {
        let mut store = entities.write().await;
        let mut candidates = Vec::new();

        for entity in store.iter_mut() {
            let crossing = classify(&self.grid, zone, entity, &self.config.window);
            match crossing {
                Crossing::Inside => entity.left_origin_at = None,
                Crossing::Outside { .. } => {
                    entity.left_origin_at.get_or_insert(now);
                    candidates.push((entity.clone(), crossing));
                }
                Crossing::Leaving { .. } => candidates.push((entity.clone(), crossing)),
            }
        }

        (store.len(), candidates)
    }

    async fn transfer_one(
        &self,
        entity: &Entity,
        crossing: Crossing,
        now: Instant,
    ) -> Result<Outcome, HandoffError> {
        match entity.kind {
            EntityKind::Player => self.transfer_player(entity).await,
            _ => self.transfer_by_position(entity, crossing, now).await,
        }
    }

    async fn transfer_player(&self, entity: &Entity) -> Result<Outcome, HandoffError> {
        let Some(directive) = self
            .resolver
            .initiate_transfer(entity.id, entity.position)
            .await?
        else {
            self.reclaim_player(entity).await?;
            return Ok(Outcome::Retained);
        };

        let target = directive.target_server;
        if target.server_id == self.server_id {
            return Ok(Outcome::Retained);
        }

        if !self.push(target.endpoint, entity.snapshot(), None).await? {
            return Err(HandoffError::Protocol(format!(
                "{} declined player {}",
                target.server_id, entity.id
            )));
        }

        // Until confirmed, the coordinator keeps re-issuing the directive,
        // and the target accepts the repeat.
        if let Err(e) = self
            .resolver
            .complete_transfer(entity.id, &target.server_id)
            .await
        {
            warn!(
                "Could not confirm player {} on {}: {}",
                entity.id, target.server_id, e
            );
        }

        info!(
            "Player {} handed off from {} to {}",
            entity.id, self.server_id, target.server_id
        );
        Ok(Outcome::HandedOff)
    }

    /// Handles a player outside the zone that got no directive.
    ///
    /// Either nobody owns where it went, or the coordinator has lost track
    /// of it and recorded the destination server as its owner. In the
    /// second case this server still holds the player, so it claims the
    /// player back and the next scan receives a directive.
    async fn reclaim_player(&self, entity: &Entity) -> Result<(), HandoffError> {
        let owner = self.resolver.server_for_position(entity.position).await?;
        match owner {
            Some(owner) if owner.server_id != self.server_id => {
                info!(
                    "Coordinator places player {} on {} while {} holds it, reclaiming",
                    entity.id, owner.server_id, self.server_id
                );
                self.resolver
                    .complete_transfer(entity.id, &self.server_id)
                    .await?;
            }
            _ => debug!(
                "No transfer target for player {} at {}, keeping it",
                entity.id, entity.position
            ),
        }
        Ok(())
    }

    async fn transfer_by_position(
        &self,
        entity: &Entity,
        crossing: Crossing,
        now: Instant,
    ) -> Result<Outcome, HandoffError> {
        let destination = match crossing {
            Crossing::Inside => return Ok(Outcome::Kept),
            Crossing::Outside { zone } | Crossing::Leaving { zone } => self.grid.bounds(zone).center(),
        };

        let target = self
            .resolver
            .server_for_position(destination)
            .await?
            .filter(|t| t.server_id != self.server_id);

        let Some(target) = target else {
            if matches!(crossing, Crossing::Outside { .. }) {
                debug!(
                    "No server owns {}, destroying {:?} {}",
                    entity.position, entity.kind, entity.id
                );
                return Ok(Outcome::Destroyed);
            }
            // Still inside; it is destroyed once it actually leaves.
            return Ok(Outcome::Kept);
        };

        let left_origin_ms = entity
            .left_origin_at
            .map(|at| now.saturating_duration_since(at).as_millis() as u64);

        if self.push(target.endpoint, entity.snapshot(), left_origin_ms).await? {
            debug!("{:?} {} handed off to {}", entity.kind, entity.id, target.server_id);
            Ok(Outcome::HandedOff)
        } else {
            Ok(Outcome::Kept)
        }
    }

    /// One `TransferEntityIn` with a single retry on timeout.
    async fn push(
        &self,
        peer: SocketAddr,
        snapshot: EntitySnapshot,
        left_origin_ms: Option<u64>,
    ) -> Result<bool, HandoffError> {
        let conn = self.pool.get_or_create(peer).await?;
        let deadline = self.config.push_deadline;

        let result = match conn
            .transfer_entity_in(snapshot.clone(), left_origin_ms, deadline)
            .await
        {
            Err(e) if e.is_timeout() => {
                debug!("Transfer of {} to {} timed out, retrying once", snapshot.id, peer);
                conn.transfer_entity_in(snapshot, left_origin_ms, deadline).await
            }
            other => other,
        };

        match result {
            Ok(accepted) => Ok(accepted),
            Err(e) if conn.is_stale() => {
                debug!("Connection to {} went stale: {}", peer, e);
                Err(HandoffError::StaleConnection(peer))
            }
            Err(e) => Err(e.into()),
        }
    }
}
