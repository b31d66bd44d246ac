//! Client session: one live link to the zone server that owns the player
//!
//! Every tick the session predicts its own position, feeds it to the
//! transition controller and the health monitor, and sends a `Move`
//! datagram. When the controller commits, the link moves to the server of
//! the new zone inside a `TransitionScope`, so the background timers stay
//! quiet while the link is swapped. A lost link is re-established with
//! exponential backoff.

use crate::backoff::ReconnectBackoff;
use crate::config::ClientConfig;
use crate::error::SessionError;
use crate::health::{Anomaly, HealthMonitor};
use crate::timers::TimerGroup;
use crate::transition::{ClientTransitionController, Decision, TransitionState};
use log::{debug, info, warn};
use shared::rpc::{self, CoordinatorClient};
use shared::transport::Connection;
use shared::{Datagram, ServerInfo, TransportError, Vec2, Zone};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

const ANOMALY_HISTORY: usize = 64;

/// Open connection to one zone server and the datagrams it pushes.
pub struct ServerLink {
    info: ServerInfo,
    connection: Arc<Connection>,
    datagrams: mpsc::UnboundedReceiver<Datagram>,
}

impl ServerLink {
    async fn open(info: ServerInfo) -> Result<Self, TransportError> {
        let (connection, datagrams) = Connection::connect_with_datagrams(info.endpoint).await?;
        debug!("Connected to server {} at {}", info.server_id, info.endpoint);
        Ok(Self {
            info,
            connection: Arc::new(connection),
            datagrams,
        })
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }
}

/// Messages from timers and detached tasks to the session loop.
enum Signal {
    Probe(Result<Duration, TransportError>),
    Watchdog,
    Stats,
    Prewarmed { zone: Zone, link: Box<ServerLink> },
    PrewarmFailed { zone: Zone, reason: String },
    MoveFailed(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionStats {
    pub ticks: u64,
    pub world_states: u64,
    pub switches: u64,
    pub failed_switches: u64,
    pub reconnects: u64,
    pub failed_moves: u64,
    /// Switches that reused a connection opened while pending.
    pub prewarm_hits: u64,
    pub last_rtt: Option<Duration>,
}

pub struct ClientSession {
    config: ClientConfig,
    coordinator: Arc<CoordinatorClient>,
    link: Option<ServerLink>,
    /// Connection probed by the heartbeat timer.
    current: Arc<RwLock<Option<Arc<Connection>>>>,
    prewarmed: Option<(Zone, ServerLink)>,
    prewarming: Option<Zone>,

    controller: ClientTransitionController,
    backoff: ReconnectBackoff,
    reconnect_at: Option<Instant>,
    health: HealthMonitor,
    anomalies: VecDeque<Anomaly>,

    timers: TimerGroup,
    timer_tasks: Vec<JoinHandle<()>>,
    signal_tx: mpsc::UnboundedSender<Signal>,
    signal_rx: mpsc::UnboundedReceiver<Signal>,

    position: Vec2,
    velocity: Vec2,
    sequence: u32,
    last_tick: Instant,
    last_world_state: Instant,
    stats: SessionStats,
}

impl ClientSession {
    /// Joins the zone server that owns `config.spawn_at` and starts the
    /// background timers.
    pub async fn connect(config: ClientConfig) -> Result<Self, SessionError> {
        let coordinator = Arc::new(
            CoordinatorClient::connect(config.coordinator_addr, config.deadlines).await?,
        );

        let spawn_zone = config.grid.zone_of(config.spawn_at);
        let info = coordinator
            .get_server_for_position(config.spawn_at)
            .await?
            .ok_or(SessionError::NoServer(spawn_zone))?;
        let link = ServerLink::open(info).await?;

        let ack = rpc::join(
            &link.connection,
            config.player_id,
            &config.name,
            &config.session_key,
            Some(config.spawn_at),
            config.deadlines.reliable,
        )
        .await?;
        let position = ack.position.unwrap_or(config.spawn_at);

        info!(
            "Player {} joined server {} in zone {} at {}",
            config.player_id, ack.server_id, ack.zone, position
        );

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let now = Instant::now();

        let mut session = Self {
            coordinator,
            current: Arc::new(RwLock::new(Some(Arc::clone(&link.connection)))),
            link: Some(link),
            prewarmed: None,
            prewarming: None,
            controller: ClientTransitionController::new(config.grid, config.transition, ack.zone),
            backoff: ReconnectBackoff::new(config.backoff),
            reconnect_at: None,
            health: HealthMonitor::new(config.health),
            anomalies: VecDeque::new(),
            timers: TimerGroup::new(),
            timer_tasks: Vec::new(),
            signal_tx,
            signal_rx,
            position,
            velocity: Vec2::ZERO,
            sequence: 0,
            last_tick: now,
            last_world_state: now,
            stats: SessionStats::default(),
            config,
        };
        session.spawn_timers();

        Ok(session)
    }

    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn velocity(&self) -> Vec2 {
        self.velocity
    }

    pub fn set_velocity(&mut self, velocity: Vec2) {
        self.velocity = velocity;
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    pub fn connected_server(&self) -> Option<&ServerInfo> {
        self.link.as_ref().map(ServerLink::info)
    }

    pub fn connected_zone(&self) -> Option<Zone> {
        self.link.as_ref().map(|link| link.info.zone)
    }

    pub fn controller(&self) -> &ClientTransitionController {
        &self.controller
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn timers(&self) -> &TimerGroup {
        &self.timers
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Most recent anomalies, oldest first.
    pub fn anomalies(&self) -> impl Iterator<Item = &Anomaly> {
        self.anomalies.iter()
    }

    fn spawn_timers(&mut self) {
        let current = Arc::clone(&self.current);
        let signals = self.signal_tx.clone();
        let deadline = self.config.deadlines.heartbeat;
        let heartbeat = self
            .timers
            .spawn("heartbeat", self.config.heartbeat_interval, move || {
                let current = Arc::clone(&current);
                let signals = signals.clone();
                async move {
                    let connection = current.read().await.clone();
                    if let Some(connection) = connection {
                        let _ = signals.send(Signal::Probe(rpc::ping(&connection, deadline).await));
                    }
                }
            });

        let signals = self.signal_tx.clone();
        let watchdog = self.timers.spawn(
            "world_state_watchdog",
            self.config.watchdog_interval,
            move || {
                let _ = signals.send(Signal::Watchdog);
                std::future::ready(())
            },
        );

        let signals = self.signal_tx.clone();
        let stats = self
            .timers
            .spawn("network_stats", self.config.stats_interval, move || {
                let _ = signals.send(Signal::Stats);
                std::future::ready(())
            });

        self.timer_tasks = vec![heartbeat, watchdog, stats];
    }

    /// Runs the session until `stop` completes or reconnecting gives up.
    /// The link stays attached; call `leave` to detach.
    pub async fn run_until<F>(&mut self, stop: F) -> Result<(), SessionError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(stop);

        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.last_tick = Instant::now();

        loop {
            tokio::select! {
                _ = &mut stop => return Ok(()),

                _ = ticker.tick() => {
                    self.on_tick(Instant::now()).await?;
                }

                Some(datagram) = next_datagram(&mut self.link) => {
                    self.on_datagram(datagram, Instant::now());
                }

                Some(signal) = self.signal_rx.recv() => {
                    self.on_signal(signal, Instant::now()).await;
                }
            }
        }
    }

    async fn on_tick(&mut self, now: Instant) -> Result<(), SessionError> {
        let dt = now.saturating_duration_since(self.last_tick).as_secs_f32();
        self.last_tick = now;
        self.stats.ticks += 1;
        self.position = self.position + self.velocity * dt;

        if self.link.is_none() {
            return self.try_reconnect(now).await;
        }

        let connected = self.connected_zone();
        let local = self.config.grid.zone_of(self.position);
        for anomaly in self.health.observe_zones(local, connected, now) {
            self.report(anomaly);
        }

        match self.controller.update(self.position, connected, now) {
            Decision::Stay => {}
            Decision::Pending { candidate } => self.prewarm(candidate),
            Decision::Commit { from, to } => {
                info!("Transition {} -> {}", from, to);
                self.commit(to).await;
            }
            Decision::ForcedCommit { from, to, mismatch } => {
                warn!(
                    "Forced transition {} -> {} after {:?} of mismatch",
                    from, to, mismatch
                );
                self.commit(to).await;
            }
        }

        self.send_move();
        Ok(())
    }

    fn on_datagram(&mut self, datagram: Datagram, now: Instant) {
        match datagram {
            Datagram::WorldState {
                tick,
                zone,
                entities,
                ..
            } => {
                self.last_world_state = now;
                self.stats.world_states += 1;

                if let Some(own) = entities.iter().find(|e| e.id == self.config.player_id) {
                    if let Some(anomaly) = self.health.observe_position(own.position) {
                        self.report(anomaly);
                    }
                    self.position = own.position;
                }

                debug!(
                    "World state {} from zone {}: {} entities",
                    tick,
                    zone,
                    entities.len()
                );
            }
            Datagram::ZoneStatistics(stats) => {
                debug!("Zone statistics from {} servers", stats.server_count);
            }
            Datagram::Move { .. } => {
                warn!("Unexpected move datagram from server");
            }
        }
    }

    async fn on_signal(&mut self, signal: Signal, now: Instant) {
        match signal {
            Signal::Probe(Ok(rtt)) => {
                self.stats.last_rtt = Some(rtt);
                self.backoff.reset();
                self.health.record_outcome(true);
            }
            Signal::Probe(Err(e)) => {
                debug!("Heartbeat failed: {}", e);
                self.health.record_outcome(false);
            }
            Signal::Watchdog => {
                let Some(link) = &self.link else {
                    return;
                };
                let silence = now.saturating_duration_since(self.last_world_state);
                if link.connection.is_stale() {
                    self.lose_link("connection is stale").await;
                } else if silence > self.config.world_state_timeout {
                    self.lose_link("no world state").await;
                }
            }
            Signal::Stats => {
                info!(
                    "Session: zone {:?}, rtt {:?}, success {:.0}%, {} switches ({} failed), {} reconnects, {} world states",
                    self.connected_zone(),
                    self.stats.last_rtt,
                    self.health.success_rate() * 100.0,
                    self.stats.switches,
                    self.stats.failed_switches,
                    self.stats.reconnects,
                    self.stats.world_states
                );
            }
            Signal::Prewarmed { zone, link } => {
                if self.prewarming == Some(zone) {
                    self.prewarming = None;
                }
                let still_pending = matches!(
                    self.controller.state(),
                    TransitionState::PendingConfirm { candidate, .. } if candidate == zone
                );
                if still_pending {
                    debug!("Pre-connected to server {} for zone {}", link.info.server_id, zone);
                    self.prewarmed = Some((zone, *link));
                }
            }
            Signal::PrewarmFailed { zone, reason } => {
                if self.prewarming == Some(zone) {
                    self.prewarming = None;
                }
                debug!("Pre-connect for zone {} failed: {}", zone, reason);
            }
            Signal::MoveFailed(reason) => {
                self.stats.failed_moves += 1;
                debug!("Move send failed: {}", reason);
            }
        }
    }

    fn report(&mut self, anomaly: Anomaly) {
        warn!("Anomaly: {}", anomaly);
        if self.anomalies.len() == ANOMALY_HISTORY {
            self.anomalies.pop_front();
        }
        self.anomalies.push_back(anomaly);
    }

    /// Position used to look up the server of `zone`.
    fn locate(&self, zone: Zone) -> Vec2 {
        if self.config.grid.zone_of(self.position) == zone {
            self.position
        } else {
            self.config.grid.bounds(zone).center()
        }
    }

    /// Opens a connection to the candidate's server in the background.
    fn prewarm(&mut self, candidate: Zone) {
        let ready = matches!(&self.prewarmed, Some((zone, _)) if *zone == candidate);
        if ready || self.prewarming == Some(candidate) {
            return;
        }
        self.prewarming = Some(candidate);

        let coordinator = Arc::clone(&self.coordinator);
        let signals = self.signal_tx.clone();
        let position = self.locate(candidate);

        tokio::spawn(async move {
            let result = match coordinator.get_server_for_position(position).await {
                Ok(Some(info)) => ServerLink::open(info).await.map_err(|e| e.to_string()),
                Ok(None) => Err(format!("no server owns zone {}", candidate)),
                Err(e) => Err(e.to_string()),
            };

            let _ = signals.send(match result {
                Ok(link) => Signal::Prewarmed {
                    zone: candidate,
                    link: Box::new(link),
                },
                Err(reason) => Signal::PrewarmFailed {
                    zone: candidate,
                    reason,
                },
            });
        });
    }

    /// Moves the link to the server of `target` with the timers paused.
    /// Returns whether the client ended up attached there.
    async fn commit(&mut self, target: Zone) -> bool {
        if self.connected_zone() == Some(target) {
            return true;
        }

        let _scope = self.timers.scope();
        let started = Instant::now();
        self.health.commit_started(started);

        let stuck_after = self.config.health.stuck_transition;
        let success = match timeout(stuck_after, self.switch_to(target, None)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("Transition to zone {} failed: {}", target, e);
                false
            }
            Err(_) => {
                let anomaly = self
                    .health
                    .check_stuck(Instant::now())
                    .unwrap_or(Anomaly::StuckTransition {
                        elapsed: started.elapsed(),
                    });
                self.report(anomaly);
                false
            }
        };

        self.health.commit_finished(success);
        if success {
            self.stats.switches += 1;
        } else {
            self.stats.failed_switches += 1;
        }
        success
    }

    /// Joins the server of `target` and releases the previous one.
    /// `spawn_at` is set only when the player may need to be recreated.
    async fn switch_to(&mut self, target: Zone, spawn_at: Option<Vec2>) -> Result<(), SessionError> {
        let link = match self.prewarmed.take() {
            Some((zone, link)) if zone == target && !link.connection.is_stale() => {
                self.stats.prewarm_hits += 1;
                link
            }
            _ => {
                let info = self
                    .coordinator
                    .get_server_for_position(self.locate(target))
                    .await?
                    .ok_or(SessionError::NoServer(target))?;
                ServerLink::open(info).await?
            }
        };

        let ack = rpc::join(
            &link.connection,
            self.config.player_id,
            &self.config.name,
            &self.config.session_key,
            spawn_at,
            self.config.deadlines.reliable,
        )
        .await?;

        if let Some(position) = ack.position {
            self.position = position;
        }
        self.health.clear_position();
        self.last_world_state = Instant::now();
        *self.current.write().await = Some(Arc::clone(&link.connection));

        info!("Attached to server {} for zone {}", ack.server_id, ack.zone);

        if let Some(previous) = self.link.replace(link) {
            self.release(previous);
        }
        Ok(())
    }

    /// Detaches from a server in the background; failure only costs the
    /// server a client timeout.
    fn release(&self, link: ServerLink) {
        let player_id = self.config.player_id;
        let deadline = self.config.deadlines.reliable;

        tokio::spawn(async move {
            if let Err(e) = rpc::leave(&link.connection, player_id, deadline).await {
                debug!("Leave from server {} failed: {}", link.info.server_id, e);
            }
        });
    }

    async fn lose_link(&mut self, reason: &str) {
        if let Some(link) = self.link.take() {
            warn!("Lost server {}: {}", link.info.server_id, reason);
            link.connection.close();
        }
        self.prewarmed = None;
        *self.current.write().await = None;
    }

    fn schedule_reconnect(&mut self, now: Instant) -> Result<Instant, SessionError> {
        let delay = self.backoff.next_delay().ok_or(SessionError::Exhausted {
            attempts: self.backoff.attempts(),
        })?;
        info!(
            "Reconnect attempt {} in {:?}",
            self.backoff.attempts(),
            delay
        );
        let at = now + delay;
        self.reconnect_at = Some(at);
        Ok(at)
    }

    async fn try_reconnect(&mut self, now: Instant) -> Result<(), SessionError> {
        let due = match self.reconnect_at {
            Some(at) => at,
            None => self.schedule_reconnect(now)?,
        };
        if now < due {
            return Ok(());
        }

        let zone = self.config.grid.zone_of(self.position);
        let position = self.position;
        let _scope = self.timers.scope();

        match self.switch_to(zone, Some(position)).await {
            Ok(()) => {
                info!("Reconnected after {} attempts", self.backoff.attempts());
                self.controller.reset_to(zone);
                self.backoff.reset();
                self.reconnect_at = None;
                self.health.record_outcome(true);
                self.stats.reconnects += 1;
            }
            Err(e) => {
                warn!("Reconnect attempt {} failed: {}", self.backoff.attempts(), e);
                self.health.record_outcome(false);
                self.schedule_reconnect(Instant::now())?;
            }
        }
        Ok(())
    }

    /// Sends the current velocity as a detached datagram with its own
    /// deadline; failures come back as signals.
    fn send_move(&mut self) {
        let Some(link) = &self.link else {
            return;
        };
        self.sequence = self.sequence.wrapping_add(1);

        let connection = Arc::clone(&link.connection);
        let datagram = Datagram::Move {
            player_id: self.config.player_id,
            sequence: self.sequence,
            velocity: self.velocity,
        };
        let deadline = self.config.move_deadline;
        let failures = self.signal_tx.clone();

        tokio::spawn(async move {
            let reason = match timeout(deadline, connection.send_unreliable(datagram)).await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("send exceeded {:?}", deadline),
            };
            let _ = failures.send(Signal::MoveFailed(reason));
        });
    }

    /// Detaches from the connected server.
    pub async fn leave(&mut self) {
        self.prewarmed = None;
        *self.current.write().await = None;

        if let Some(link) = self.link.take() {
            match rpc::leave(&link.connection, self.config.player_id, self.config.deadlines.reliable).await {
                Ok(()) => info!("Left server {}", link.info.server_id),
                Err(e) => warn!("Leave from server {} failed: {}", link.info.server_id, e),
            }
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        for task in &self.timer_tasks {
            task.abort();
        }
    }
}

async fn next_datagram(link: &mut Option<ServerLink>) -> Option<Datagram> {
    match link {
        Some(link) => link.datagrams.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordinator::{CoordinatorConfig, MemoryStore};
    use server::{ZoneServer, ZoneServerConfig};
    use shared::ServerId;
    use std::net::SocketAddr;
    use tokio::time::sleep;
    use tokio_test::assert_ok;

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

    async fn start_server(id: &str, coordinator_addr: SocketAddr) {
        let config = ZoneServerConfig {
            server_id: ServerId::new(id),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            coordinator_addr,
            ..ZoneServerConfig::default()
        };
        let mut server = ZoneServer::start(config).await.unwrap();
        tokio::spawn(async move {
            let _ = server.run().await;
        });
    }

    fn client_config(coordinator_addr: SocketAddr, spawn_at: Vec2) -> ClientConfig {
        ClientConfig {
            player_id: 42,
            name: "ada".to_string(),
            coordinator_addr,
            spawn_at,
            ..ClientConfig::default()
        }
    }

    #[tokio::test]
    async fn test_connect_joins_owner_of_spawn_zone() {
        let coordinator_addr = start_coordinator().await;
        start_server("a", coordinator_addr).await;

        let session = assert_ok!(
            ClientSession::connect(client_config(coordinator_addr, Vec2::new(100.0, 100.0))).await
        );

        assert!(session.is_connected());
        assert_eq!(session.connected_zone(), Some(Zone::new(0, 0)));
        assert_eq!(session.connected_server().unwrap().server_id, ServerId::new("a"));
        assert_eq!(session.position(), Vec2::new(100.0, 100.0));
    }

    #[tokio::test]
    async fn test_connect_without_owner_fails() {
        let coordinator_addr = start_coordinator().await;

        let result = ClientSession::connect(client_config(coordinator_addr, Vec2::new(100.0, 100.0))).await;

        assert!(matches!(result, Err(SessionError::NoServer(zone)) if zone == Zone::new(0, 0)));
    }

    #[tokio::test]
    async fn test_session_receives_world_state() {
        let coordinator_addr = start_coordinator().await;
        start_server("a", coordinator_addr).await;

        let mut session = ClientSession::connect(client_config(coordinator_addr, Vec2::new(100.0, 100.0)))
            .await
            .unwrap();
        session
            .run_until(sleep(Duration::from_millis(400)))
            .await
            .unwrap();

        assert!(session.stats().world_states > 0);
        assert!(session.is_connected());

        session.leave().await;
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_session_switches_server_when_crossing() {
        let coordinator_addr = start_coordinator().await;
        start_server("a", coordinator_addr).await;
        start_server("b", coordinator_addr).await;

        let mut session = ClientSession::connect(client_config(coordinator_addr, Vec2::new(480.0, 100.0)))
            .await
            .unwrap();
        session.set_velocity(Vec2::new(100.0, 0.0));

        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline && session.connected_zone() != Some(Zone::new(1, 0)) {
            session
                .run_until(sleep(Duration::from_millis(100)))
                .await
                .unwrap();
        }

        assert_eq!(session.connected_zone(), Some(Zone::new(1, 0)));
        assert_eq!(session.connected_server().unwrap().server_id, ServerId::new("b"));
        assert!(session.controller().commits() >= 1);
        assert!(session.stats().switches >= 1);
        assert!(session.position().x > 500.0);
        assert!(session.timers().pause_count() >= 1);
        assert_eq!(session.timers().pause_count(), session.timers().resume_count());
        assert!(!session.timers().is_paused());
    }

    #[tokio::test]
    async fn test_commit_to_connected_zone_is_a_no_op() {
        let coordinator_addr = start_coordinator().await;
        start_server("a", coordinator_addr).await;

        let mut session = ClientSession::connect(client_config(coordinator_addr, Vec2::new(100.0, 100.0)))
            .await
            .unwrap();

        assert!(session.commit(Zone::new(0, 0)).await);
        assert_eq!(session.timers().pause_count(), 0);
        assert_eq!(session.stats().switches, 0);
    }

    #[tokio::test]
    async fn test_failed_commit_resumes_timers() {
        let coordinator_addr = start_coordinator().await;
        start_server("a", coordinator_addr).await;

        let mut session = ClientSession::connect(client_config(coordinator_addr, Vec2::new(100.0, 100.0)))
            .await
            .unwrap();

        // No server owns zone (1, 0).
        assert!(!session.commit(Zone::new(1, 0)).await);

        assert_eq!(session.connected_zone(), Some(Zone::new(0, 0)));
        assert_eq!(session.stats().failed_switches, 1);
        assert_eq!(session.timers().pause_count(), 1);
        assert_eq!(session.timers().resume_count(), 1);
        assert!(!session.health().is_committing());
    }

    #[tokio::test]
    async fn test_lost_link_schedules_reconnect() {
        let coordinator_addr = start_coordinator().await;
        start_server("a", coordinator_addr).await;

        let mut session = ClientSession::connect(client_config(coordinator_addr, Vec2::new(100.0, 100.0)))
            .await
            .unwrap();

        session.lose_link("test").await;
        assert!(!session.is_connected());

        let now = Instant::now();
        session.try_reconnect(now).await.unwrap();
        assert!(!session.is_connected());
        assert_eq!(session.backoff.attempts(), 1);

        session.try_reconnect(now + Duration::from_secs(1)).await.unwrap();
        assert!(session.is_connected());
        assert_eq!(session.stats().reconnects, 1);
        assert_eq!(session.backoff.attempts(), 0);
    }
}
