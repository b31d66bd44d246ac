//! Keyed cache of connections to peer zone servers
//!
//! Lookups go straight to a concurrent map. Only the creation path takes a
//! lock, and that lock is per peer, so two callers racing for the same cold
//! peer open one connection between them while other peers are unaffected.
//! The pool never retries: a failed connect or call is returned as is.

use dashmap::DashMap;
use log::{debug, info};
use shared::error::{require_nonzero, ConfigError};
use shared::rpc::transfer_entity_in;
use shared::transport::Connection;
use shared::{EntitySnapshot, TransportError};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// A link to one peer as seen by the pool.
pub trait PeerConnection: Send + Sync + 'static {
    fn is_stale(&self) -> bool;

    fn close(&self);

    fn transfer_entity_in(
        &self,
        entity: EntitySnapshot,
        left_origin_ms: Option<u64>,
        deadline: Duration,
    ) -> impl Future<Output = Result<bool, TransportError>> + Send;
}

/// Opens new peer connections for the pool.
pub trait Connector: Send + Sync + 'static {
    type Conn: PeerConnection;

    fn connect(
        &self,
        peer: SocketAddr,
    ) -> impl Future<Output = Result<Self::Conn, TransportError>> + Send;
}

impl PeerConnection for Connection {
    fn is_stale(&self) -> bool {
        Connection::is_stale(self)
    }

    fn close(&self) {
        Connection::close(self)
    }

    async fn transfer_entity_in(
        &self,
        entity: EntitySnapshot,
        left_origin_ms: Option<u64>,
        deadline: Duration,
    ) -> Result<bool, TransportError> {
        transfer_entity_in(self, entity, left_origin_ms, deadline).await
    }
}

/// Opens real UDP connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct UdpConnector;

impl Connector for UdpConnector {
    type Conn = Connection;

    async fn connect(&self, peer: SocketAddr) -> Result<Connection, TransportError> {
        Connection::connect(peer).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolConfig {
    /// Entries unused for longer than this are evicted by the sweep.
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero("pool_idle_timeout", self.idle_timeout)?;
        require_nonzero("pool_sweep_interval", self.sweep_interval)
    }
}

struct PoolEntry<T> {
    conn: Arc<T>,
    last_used: Mutex<Instant>,
}

impl<T> PoolEntry<T> {
    fn new(conn: Arc<T>, now: Instant) -> Self {
        Self {
            conn,
            last_used: Mutex::new(now),
        }
    }

    fn touch(&self, now: Instant) {
        if let Ok(mut last_used) = self.last_used.lock() {
            *last_used = (*last_used).max(now);
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        match self.last_used.lock() {
            Ok(last_used) => now.saturating_duration_since(*last_used),
            Err(_) => Duration::ZERO,
        }
    }

    /// Nobody outside the pool holds the connection.
    fn is_unreferenced(&self) -> bool {
        Arc::strong_count(&self.conn) == 1
    }
}

pub struct PeerConnectionPool<C: Connector = UdpConnector> {
    connector: C,
    config: PoolConfig,
    entries: DashMap<SocketAddr, Arc<PoolEntry<C::Conn>>>,
    creation_locks: DashMap<SocketAddr, Arc<tokio::sync::Mutex<()>>>,
    created: AtomicU64,
    evicted: AtomicU64,
}

impl PeerConnectionPool<UdpConnector> {
    pub fn new(config: PoolConfig) -> Self {
        Self::with_connector(UdpConnector, config)
    }
}

impl<C: Connector> PeerConnectionPool<C> {
    pub fn with_connector(connector: C, config: PoolConfig) -> Self {
        Self {
            connector,
            config,
            entries: DashMap::new(),
            creation_locks: DashMap::new(),
            created: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, peer: SocketAddr) -> bool {
        self.entries.contains_key(&peer)
    }

    /// Connections opened since the pool was created.
    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Connections removed by the sweep or for being stale.
    pub fn evicted_count(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Returns a live cached connection to `peer` or opens one.
    pub async fn get_or_create(&self, peer: SocketAddr) -> Result<Arc<C::Conn>, TransportError> {
        if let Some(conn) = self.lookup(peer) {
            return Ok(conn);
        }

        let lock = self
            .creation_locks
            .entry(peer)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .value()
            .clone();
        let _guard = lock.lock().await;

        // Another caller may have connected while we waited.
        if let Some(conn) = self.lookup(peer) {
            return Ok(conn);
        }

        let conn = Arc::new(self.connector.connect(peer).await?);
        self.entries.insert(
            peer,
            Arc::new(PoolEntry::new(Arc::clone(&conn), Instant::now())),
        );
        self.created.fetch_add(1, Ordering::Relaxed);
        debug!("Pooled new connection to {}", peer);
        Ok(conn)
    }

    /// Opens a connection ahead of an expected handoff.
    pub async fn prewarm(&self, peer: SocketAddr) -> Result<(), TransportError> {
        self.get_or_create(peer).await.map(|_| ())
    }

    /// Drops the entry for `peer` so the next lookup reconnects.
    pub fn invalidate(&self, peer: SocketAddr) {
        if let Some((_, entry)) = self.entries.remove(&peer) {
            entry.conn.close();
            self.release_creation_lock(peer);
            self.evicted.fetch_add(1, Ordering::Relaxed);
            info!("Evicted connection to {}", peer);
        }
    }

    /// Forgets the creation lock for `peer` unless a caller still holds it.
    fn release_creation_lock(&self, peer: SocketAddr) {
        self.creation_locks
            .remove_if(&peer, |_, lock| Arc::strong_count(lock) == 1);
    }

    fn lookup(&self, peer: SocketAddr) -> Option<Arc<C::Conn>> {
        let entry = self.entries.get(&peer).map(|e| Arc::clone(e.value()))?;

        if entry.conn.is_stale() {
            let removed = self
                .entries
                .remove_if(&peer, |_, current| Arc::ptr_eq(current, &entry));
            if removed.is_some() {
                entry.conn.close();
                self.release_creation_lock(peer);
                self.evicted.fetch_add(1, Ordering::Relaxed);
                info!("Evicted stale connection to {}", peer);
            }
            return None;
        }

        entry.touch(Instant::now());
        Some(Arc::clone(&entry.conn))
    }

    /// Removes entries idle longer than the idle timeout that no caller
    /// still holds. Returns how many were removed.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let idle_timeout = self.config.idle_timeout;
        let candidates: Vec<SocketAddr> = self
            .entries
            .iter()
            .filter(|e| e.value().idle_for(now) > idle_timeout)
            .map(|e| *e.key())
            .collect();

        let mut removed = 0;
        for peer in candidates {
            // Re-checked under the shard lock: a lookup may have raced us.
            let evicted = self.entries.remove_if(&peer, |_, entry| {
                Arc::strong_count(entry) == 1
                    && entry.is_unreferenced()
                    && entry.idle_for(now) > idle_timeout
            });
            if let Some((_, entry)) = evicted {
                entry.conn.close();
                self.release_creation_lock(peer);
                removed += 1;
                debug!("Evicted idle connection to {}", peer);
            }
        }

        if removed > 0 {
            self.evicted.fetch_add(removed as u64, Ordering::Relaxed);
            info!("Pool sweep evicted {} idle connection(s)", removed);
        }
        removed
    }

    /// Runs `evict_idle` every sweep interval until the pool is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let pool: Weak<Self> = Arc::downgrade(self);
        let every = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match pool.upgrade() {
                    Some(pool) => {
                        pool.evict_idle(Instant::now());
                    }
                    None => break,
                }
            }
        })
    }
}
