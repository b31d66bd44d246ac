//! Zone server network layer: UDP front end, background tasks and tick loop
//!
//! The main loop owns packet handling and the simulation tick. Anything
//! that talks to another process (heartbeats, stats, the boundary scan)
//! runs in its own task so a slow peer never stalls the tick.

use crate::boundary::accepts_projectile;
use crate::client_manager::{ClientManager, NonEmptyKey, SessionValidator};
use crate::config::ZoneServerConfig;
use crate::entity::{Entity, EntityStore};
use crate::pool::PeerConnectionPool;
use crate::transfer::BoundaryScanner;
use log::{debug, error, info, warn};
use shared::metrics::{LogMetrics, MetricsSink};
use shared::rpc::CoordinatorClient;
use shared::transport::send_packet_impl;
use shared::utils::get_timestamp;
use shared::{
    Datagram, EntityKind, EntitySnapshot, Packet, PlayerId, PlayerRecord, RemoteError, Request,
    Response, ServerId, TransportError, Vec2, Zone, ZoneStats, MAX_PACKET_SIZE,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { player_id: PlayerId },
    Shutdown,
}

/// Messages sent from game loop to network tasks
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
        exclude: Option<PlayerId>,
    },
}

/// Asks a running `ZoneServer` to unregister and stop.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        if self.tx.send(ServerMessage::Shutdown).is_err() {
            debug!("Zone server already stopped");
        }
    }
}

/// Clears the scan-in-progress flag when the scan task ends, even if it
/// panicked.
struct ScanGuard(Arc<AtomicBool>);

impl Drop for ScanGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ZoneServer {
    config: ZoneServerConfig,
    socket: Arc<UdpSocket>,
    endpoint: SocketAddr,
    zone: Arc<watch::Sender<Zone>>,
    coordinator: Arc<CoordinatorClient>,
    pool: Arc<PeerConnectionPool>,
    scanner: Arc<BoundaryScanner<CoordinatorClient>>,
    entities: Arc<RwLock<EntityStore>>,
    clients: Arc<RwLock<ClientManager>>,
    validator: Arc<dyn SessionValidator>,
    metrics: Arc<dyn MetricsSink>,
    scanning: Arc<AtomicBool>,
    /// Duration of the last scan in milliseconds, as `f32` bits.
    last_scan_ms: Arc<AtomicU32>,
    tick: u32,
    background: Vec<JoinHandle<()>>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl ZoneServer {
    /// Binds, registers with the coordinator and returns a server ready to
    /// `run`, accepting any non-empty session key.
    pub async fn start(config: ZoneServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        Self::start_with(config, Arc::new(NonEmptyKey), Arc::new(LogMetrics)).await
    }

    pub async fn start_with(
        config: ZoneServerConfig,
        validator: Arc<dyn SessionValidator>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let config = config.validate()?;
        let socket = Arc::new(UdpSocket::bind(config.bind_addr).await?);
        let endpoint = match config.advertise_addr {
            Some(addr) => addr,
            None => socket.local_addr()?,
        };
        if endpoint.ip().is_unspecified() {
            warn!("Advertising unspecified address {}; peers may not reach it", endpoint);
        }

        let coordinator =
            Arc::new(CoordinatorClient::connect(config.coordinator_addr, config.deadlines).await?);
        let zone = coordinator
            .register_server(&config.server_id, endpoint)
            .await?;
        info!(
            "Zone server {} listening on {}, assigned zone {}",
            config.server_id, endpoint, zone
        );

        let pool = Arc::new(PeerConnectionPool::new(config.pool));
        let scanner = Arc::new(BoundaryScanner::new(
            config.server_id.clone(),
            config.grid,
            config.transfer,
            Arc::clone(&coordinator),
            Arc::clone(&pool),
            Arc::clone(&metrics),
        ));

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();
        let (zone_tx, _) = watch::channel(zone);

        Ok(ZoneServer {
            entities: Arc::new(RwLock::new(EntityStore::new(config.max_entities))),
            clients: Arc::new(RwLock::new(ClientManager::new(
                config.max_clients,
                config.client_timeout,
            ))),
            config,
            socket,
            endpoint,
            zone: Arc::new(zone_tx),
            coordinator,
            pool,
            scanner,
            validator,
            metrics,
            scanning: Arc::new(AtomicBool::new(false)),
            last_scan_ms: Arc::new(AtomicU32::new(0.0f32.to_bits())),
            tick: 0,
            background: Vec::new(),
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn server_id(&self) -> &ServerId {
        &self.config.server_id
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn zone(&self) -> Zone {
        *self.zone.borrow()
    }

    pub fn entities(&self) -> Arc<RwLock<EntityStore>> {
        Arc::clone(&self.entities)
    }

    pub fn pool(&self) -> Arc<PeerConnectionPool> {
        Arc::clone(&self.pool)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.server_tx.clone(),
        }
    }

    /// Adds an entity from the game-logic layer. Players are announced to
    /// the coordinator so later crossings produce transfer directives.
    pub async fn spawn_entity(&self, entity: Entity) -> bool {
        let announce = (entity.kind == EntityKind::Player).then(|| {
            let mut record =
                PlayerRecord::new(entity.id, format!("player-{}", entity.id), entity.position);
            record.velocity = entity.velocity;
            record.health = entity.health;
            record
        });

        if !self.entities.write().await.insert(entity) {
            return false;
        }
        if let Some(record) = announce {
            self.announce_player(record);
        }
        true
    }

    fn announce_player(&self, record: PlayerRecord) {
        let coordinator = Arc::clone(&self.coordinator);
        tokio::spawn(async move {
            let player_id = record.player_id;
            if let Err(e) = coordinator.update_player(record).await {
                warn!("Failed to announce player {}: {}", player_id, e);
            }
        });
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&mut self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        self.background.push(tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_PACKET_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match Packet::decode(&buffer[..len]) {
                        Ok(packet) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to decode packet from {}: {}", addr, e),
                    },
                    Err(e) => {
                        debug!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        }));
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        self.background.push(tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet, exclude } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addrs()
                        };

                        for (player_id, addr) in client_addrs {
                            if Some(player_id) == exclude {
                                continue;
                            }

                            if let Err(e) = send_packet_impl(&socket, &packet, addr).await {
                                debug!("Failed to send to player {}: {}", player_id, e);
                            }
                        }
                    }
                }
            }
        }));
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&mut self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        self.background.push(tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts(Instant::now())
                };

                for player_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { player_id }) {
                        error!("Failed to send timeout message: {}", e);
                        break;
                    }
                }
            }
        }));
    }

    /// Heartbeats the coordinator, registering again if it forgot us.
    fn spawn_heartbeat(&mut self) {
        let coordinator = Arc::clone(&self.coordinator);
        let zone = Arc::clone(&self.zone);
        let server_id = self.config.server_id.clone();
        let endpoint = self.endpoint;
        let every = self.config.heartbeat_interval;

        self.background.push(tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;

                match coordinator.heartbeat(&server_id).await {
                    Ok(()) => {}
                    Err(TransportError::Remote(RemoteError::NotRegistered)) => {
                        warn!("Coordinator no longer knows {}, registering again", server_id);
                        match coordinator.register_server(&server_id, endpoint).await {
                            Ok(assigned) => {
                                let previous = zone.send_replace(assigned);
                                if previous != assigned {
                                    warn!("Zone reassigned from {} to {}", previous, assigned);
                                }
                            }
                            Err(e) => warn!("Re-registration failed: {}", e),
                        }
                    }
                    Err(e) => warn!("Heartbeat failed: {}", e),
                }
            }
        }));
    }

    fn spawn_stats_reporter(&mut self) {
        let coordinator = Arc::clone(&self.coordinator);
        let entities = Arc::clone(&self.entities);
        let zone = Arc::clone(&self.zone);
        let last_scan_ms = Arc::clone(&self.last_scan_ms);
        let every = self.config.stats_interval;

        self.background.push(tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let stats = {
                    let entities = entities.read().await;
                    ZoneStats {
                        entity_count: entities.len() as u32,
                        player_count: entities.player_count() as u32,
                        scan_ms: f32::from_bits(last_scan_ms.load(Ordering::Relaxed)),
                    }
                };
                let current = *zone.borrow();

                if let Err(e) = coordinator.report_zone_stats(current, stats).await {
                    debug!("Failed to report zone stats: {}", e);
                }
            }
        }));
    }

    /// Starts a scan every scan interval. A tick that finds the previous
    /// scan still running is skipped.
    fn spawn_scan_loop(&mut self) {
        let scanner = Arc::clone(&self.scanner);
        let entities = Arc::clone(&self.entities);
        let zone = Arc::clone(&self.zone);
        let scanning = Arc::clone(&self.scanning);
        let last_scan_ms = Arc::clone(&self.last_scan_ms);
        let metrics = Arc::clone(&self.metrics);
        let every = self.config.scan_interval;

        self.background.push(tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                if scanning.swap(true, Ordering::AcqRel) {
                    debug!("Previous scan still running, skipping");
                    metrics.counter("scan.skipped", 1);
                    continue;
                }

                let guard = ScanGuard(Arc::clone(&scanning));
                let scanner = Arc::clone(&scanner);
                let entities = Arc::clone(&entities);
                let last_scan_ms = Arc::clone(&last_scan_ms);
                let metrics = Arc::clone(&metrics);
                let current = *zone.borrow();

                tokio::spawn(async move {
                    let _guard = guard;
                    let started = Instant::now();
                    let report = scanner.scan(&entities, current).await;
                    let elapsed_ms = started.elapsed().as_secs_f32() * 1000.0;

                    last_scan_ms.store(elapsed_ms.to_bits(), Ordering::Relaxed);
                    metrics.histogram("scan.duration_ms", elapsed_ms as f64);
                    if report.handed_off + report.destroyed + report.failed > 0 {
                        debug!("Scan of zone {}: {:?}", current, report);
                    }
                });
            }
        }));
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: Packet, exclude: Option<PlayerId>) {
        if let Err(e) = self
            .game_tx
            .send(GameMessage::BroadcastPacket { packet, exclude })
        {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    /// Processes incoming packets
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Request { request_id, body } => {
                let body = self.handle_request(body, addr).await;
                self.send_packet(Packet::Response { request_id, body }, addr);
            }

            Packet::Datagram(Datagram::Move {
                player_id,
                sequence,
                velocity,
            }) => {
                let accepted = {
                    let mut clients = self.clients.write().await;
                    clients.accept_move(player_id, sequence, addr, Instant::now())
                };

                if accepted {
                    let mut entities = self.entities.write().await;
                    if let Some(entity) = entities.get_mut(player_id) {
                        entity.velocity = velocity;
                    }
                }
            }

            _ => {
                warn!("Unexpected packet type from {}", addr);
            }
        }
    }

    async fn handle_request(&mut self, body: Request, addr: SocketAddr) -> Response {
        self.clients.write().await.touch(addr, Instant::now());

        match body {
            Request::Ping { timestamp } => Response::Pong { timestamp },
            Request::TransferEntityIn {
                entity,
                left_origin_ms,
            } => self.accept_transfer(entity, left_origin_ms).await,
            Request::Join {
                player_id,
                name,
                session_key,
                spawn_at,
            } => {
                self.handle_join(player_id, name, &session_key, spawn_at, addr)
                    .await
            }
            Request::Leave { player_id } => {
                self.clients.write().await.detach(player_id);
                Response::Ack
            }
            other => {
                warn!("Coordinator request sent to zone server from {}: {:?}", addr, other);
                Response::Error(RemoteError::Protocol(
                    "request belongs to the coordinator".to_string(),
                ))
            }
        }
    }

    /// Takes authority over an entity pushed by a neighbour.
    ///
    /// Accepting an entity already held here succeeds again, so a source
    /// that lost the first answer can safely repeat the push.
    async fn accept_transfer(
        &self,
        entity: EntitySnapshot,
        left_origin_ms: Option<u64>,
    ) -> Response {
        let zone = self.zone();
        let grid = self.config.grid;
        let mut entities = self.entities.write().await;

        if entities.contains(entity.id) {
            return Response::Accepted(true);
        }

        if entity.kind.is_projectile() {
            if !accepts_projectile(&grid, zone, &entity, left_origin_ms, &self.config.transfer.window) {
                debug!("Declined projectile {} at {}", entity.id, entity.position);
                return Response::Accepted(false);
            }
        } else if !grid.contains(zone, entity.position) {
            warn!(
                "Refused {:?} {} at {}: outside zone {}",
                entity.kind, entity.id, entity.position, zone
            );
            return Response::Error(RemoteError::AuthorityConflict);
        }

        if entities.is_full() {
            warn!("Refused entity {}: at capacity", entity.id);
            return Response::Error(RemoteError::CapacityExceeded);
        }

        info!("Accepted {:?} {} at {}", entity.kind, entity.id, entity.position);
        entities.insert(Entity::from_snapshot(entity));
        self.metrics.counter("transfer.accepted", 1);
        Response::Accepted(true)
    }

    async fn handle_join(
        &self,
        player_id: PlayerId,
        name: String,
        session_key: &str,
        spawn_at: Option<Vec2>,
        addr: SocketAddr,
    ) -> Response {
        if !self.validator.validate(player_id, session_key) {
            warn!("Rejected join for player {} from {}", player_id, addr);
            return Response::Error(RemoteError::Unauthorized);
        }

        let zone = self.zone();
        let position = {
            let mut entities = self.entities.write().await;
            match (entities.get(player_id).map(|e| e.position), spawn_at) {
                (Some(position), _) => Some(position),
                (None, Some(position)) => {
                    if !self.config.grid.contains(zone, position) {
                        return Response::Error(RemoteError::AuthorityConflict);
                    }
                    if !entities.insert(Entity::new(player_id, EntityKind::Player, position)) {
                        return Response::Error(RemoteError::CapacityExceeded);
                    }
                    self.announce_player(PlayerRecord::new(player_id, name, position));
                    Some(position)
                }
                // The handoff carrying this player has not arrived yet.
                (None, None) => None,
            }
        };

        if !self.clients.write().await.attach(player_id, addr, Instant::now()) {
            return Response::Error(RemoteError::CapacityExceeded);
        }

        Response::Joined {
            server_id: self.config.server_id.clone(),
            zone,
            position,
        }
    }

    /// Advances the simulation and pushes world state to attached clients
    async fn tick(&mut self, dt: f32) {
        let entities = {
            let mut store = self.entities.write().await;
            store.advance(dt);
            store.snapshots()
        };
        self.tick = self.tick.wrapping_add(1);

        if self.clients.read().await.is_empty() {
            return;
        }

        for part in Datagram::world_state_chunks(self.tick, get_timestamp(), self.zone(), entities) {
            self.broadcast_packet(Packet::Datagram(part), None);
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        // Initialize concurrent tasks
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();
        self.spawn_heartbeat();
        self.spawn_stats_reporter();
        self.spawn_scan_loop();
        self.background.push(self.pool.spawn_sweeper());

        let mut tick_interval = interval(self.config.tick_interval);
        let mut last_tick = Instant::now();

        info!("Zone server {} started", self.config.server_id);

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        }
                        Some(ServerMessage::ClientTimeout { player_id }) => {
                            info!("Player {} timed out", player_id);
                        }
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Zone server shutting down");
                            break;
                        }
                    }
                }

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;

                    self.tick(dt).await;

                    if self.tick % 200 == 0 {
                        let entity_count = self.entities.read().await.len();
                        debug!(
                            "Tick {}: {} entities, {} pooled connections",
                            self.tick,
                            entity_count,
                            self.pool.len()
                        );
                    }
                }
            }
        }

        self.stop_background();
        if let Err(e) = self.coordinator.unregister_server(&self.config.server_id).await {
            warn!("Failed to unregister {}: {}", self.config.server_id, e);
        }
        Ok(())
    }

    fn stop_background(&mut self) {
        for task in self.background.drain(..) {
            task.abort();
        }
    }
}

impl Drop for ZoneServer {
    fn drop(&mut self) {
        self.stop_background();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordinator::{CoordinatorConfig, MemoryStore};
    use shared::rpc::{join, leave, transfer_entity_in};
    use shared::transport::Connection;
    use std::net::{IpAddr, Ipv4Addr};

    async fn start_coordinator() -> SocketAddr {
        let config = CoordinatorConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..CoordinatorConfig::default()
        };
        let (_handle, mut server) = coordinator::start(&config, MemoryStore::new()).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = server.run().await;
        });
        addr
    }

    fn config(id: &str, coordinator_addr: SocketAddr) -> ZoneServerConfig {
        ZoneServerConfig {
            server_id: ServerId::new(id),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            coordinator_addr,
            ..ZoneServerConfig::default()
        }
    }

    async fn running(
        id: &str,
        coordinator_addr: SocketAddr,
    ) -> (SocketAddr, Arc<RwLock<EntityStore>>, ShutdownHandle) {
        let mut server = ZoneServer::start(config(id, coordinator_addr)).await.unwrap();
        let endpoint = server.endpoint();
        let entities = server.entities();
        let shutdown = server.shutdown_handle();
        tokio::spawn(async move {
            let _ = server.run().await;
        });
        (endpoint, entities, shutdown)
    }

    fn snapshot(id: u64, kind: EntityKind, position: Vec2) -> EntitySnapshot {
        Entity::new(id, kind, position).snapshot()
    }

    #[test]
    fn test_server_message_creation() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080);
        let msg = ServerMessage::PacketReceived {
            packet: Packet::Datagram(Datagram::Move {
                player_id: 1,
                sequence: 1,
                velocity: Vec2::ZERO,
            }),
            addr,
        };

        match msg {
            ServerMessage::PacketReceived { addr: a, .. } => assert_eq!(a, addr),
            _ => panic!("Expected PacketReceived message"),
        }
    }

    #[tokio::test]
    async fn test_start_registers_with_coordinator() {
        let coordinator_addr = start_coordinator().await;
        let server = ZoneServer::start(config("a", coordinator_addr)).await.unwrap();

        assert_eq!(server.zone(), Zone::new(0, 0));
        assert_eq!(server.server_id(), &ServerId::new("a"));
    }

    #[tokio::test]
    async fn test_transfer_in_is_idempotent() {
        let coordinator_addr = start_coordinator().await;
        let (endpoint, entities, _shutdown) = running("a", coordinator_addr).await;
        let conn = Connection::connect(endpoint).await.unwrap();
        let entity = snapshot(5, EntityKind::Player, Vec2::new(100.0, 100.0));
        let deadline = Duration::from_secs(2);

        assert!(transfer_entity_in(&conn, entity.clone(), None, deadline).await.unwrap());
        assert!(transfer_entity_in(&conn, entity, None, deadline).await.unwrap());
        assert_eq!(entities.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_transfer_in_outside_zone_conflicts() {
        let coordinator_addr = start_coordinator().await;
        let (endpoint, entities, _shutdown) = running("a", coordinator_addr).await;
        let conn = Connection::connect(endpoint).await.unwrap();

        let result = transfer_entity_in(
            &conn,
            snapshot(6, EntityKind::Enemy, Vec2::new(900.0, 100.0)),
            None,
            Duration::from_secs(2),
        )
        .await;

        assert!(matches!(
            result,
            Err(TransportError::Remote(RemoteError::AuthorityConflict))
        ));
        assert!(entities.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_projectile_outside_window_declined() {
        let coordinator_addr = start_coordinator().await;
        let (endpoint, _entities, _shutdown) = running("a", coordinator_addr).await;
        let conn = Connection::connect(endpoint).await.unwrap();

        let far = snapshot(7, EntityKind::Bullet, Vec2::new(900.0, 100.0));
        let accepted = transfer_entity_in(&conn, far, None, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(!accepted);

        let recent = snapshot(8, EntityKind::Bullet, Vec2::new(900.0, 100.0));
        let accepted = transfer_entity_in(&conn, recent, Some(100), Duration::from_secs(2))
            .await
            .unwrap();
        assert!(accepted);
    }

    #[tokio::test]
    async fn test_join_validates_session_key() {
        let coordinator_addr = start_coordinator().await;
        let (endpoint, entities, _shutdown) = running("a", coordinator_addr).await;
        let conn = Connection::connect(endpoint).await.unwrap();
        let deadline = Duration::from_secs(2);

        let rejected = join(&conn, 1, "ann", "", Some(Vec2::new(10.0, 10.0)), deadline).await;
        assert!(matches!(
            rejected,
            Err(TransportError::Remote(RemoteError::Unauthorized))
        ));

        let ack = join(&conn, 1, "ann", "key", Some(Vec2::new(10.0, 10.0)), deadline)
            .await
            .unwrap();
        assert_eq!(ack.server_id, ServerId::new("a"));
        assert_eq!(ack.position, Some(Vec2::new(10.0, 10.0)));
        assert!(entities.read().await.contains(1));

        leave(&conn, 1, deadline).await.unwrap();
    }

    #[tokio::test]
    async fn test_join_before_handoff_arrives() {
        let coordinator_addr = start_coordinator().await;
        let (endpoint, _entities, _shutdown) = running("a", coordinator_addr).await;
        let conn = Connection::connect(endpoint).await.unwrap();

        let ack = join(&conn, 2, "bo", "key", None, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(ack.position, None);
        assert_eq!(ack.zone, Zone::new(0, 0));
    }

    #[tokio::test]
    async fn test_shutdown_unregisters() {
        let coordinator_addr = start_coordinator().await;
        let (_endpoint, _entities, shutdown) = running("a", coordinator_addr).await;
        let client = CoordinatorClient::connect(coordinator_addr, Default::default())
            .await
            .unwrap();

        assert!(client
            .get_server_for_position(Vec2::new(10.0, 10.0))
            .await
            .unwrap()
            .is_some());

        shutdown.shutdown();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(client
            .get_server_for_position(Vec2::new(10.0, 10.0))
            .await
            .unwrap()
            .is_none());
    }
}
