//! Persistence seam for coordinator state
//!
//! The coordinator writes through to a `CoordinatorStore` before applying a
//! mutation in memory, so a failed write leaves both copies unchanged and
//! the error reaches the caller.

use crate::registry::PlayerEntry;
use bincode::{deserialize, serialize};
use log::info;
use serde::{Deserialize, Serialize};
use shared::{PlayerId, ServerId, Zone};
use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::block_in_place;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Persisted form of a server registration. Heartbeat times are not
/// persisted; restored servers get a fresh heartbeat window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredServer {
    pub server_id: ServerId,
    pub endpoint: SocketAddr,
    pub zone: Zone,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub servers: BTreeMap<ServerId, StoredServer>,
    pub players: BTreeMap<PlayerId, PlayerEntry>,
}

pub trait CoordinatorStore: Send + 'static {
    fn load(&self) -> Result<Snapshot, StoreError>;
    fn put_server(&mut self, server: &StoredServer) -> Result<(), StoreError>;
    fn remove_server(&mut self, server_id: &ServerId) -> Result<(), StoreError>;
    fn put_player(&mut self, player: &PlayerEntry) -> Result<(), StoreError>;
    fn clear_players(&mut self) -> Result<(), StoreError>;
}

/// In-process store. `failing()` builds one whose writes always fail.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Snapshot,
    fail_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            snapshot: Snapshot::default(),
            fail_writes: true,
        }
    }

    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

impl CoordinatorStore for MemoryStore {
    fn load(&self) -> Result<Snapshot, StoreError> {
        Ok(self.snapshot.clone())
    }

    fn put_server(&mut self, server: &StoredServer) -> Result<(), StoreError> {
        self.check_writable()?;
        self.snapshot
            .servers
            .insert(server.server_id.clone(), server.clone());
        Ok(())
    }

    fn remove_server(&mut self, server_id: &ServerId) -> Result<(), StoreError> {
        self.check_writable()?;
        self.snapshot.servers.remove(server_id);
        Ok(())
    }

    fn put_player(&mut self, player: &PlayerEntry) -> Result<(), StoreError> {
        self.check_writable()?;
        self.snapshot
            .players
            .insert(player.record.player_id, player.clone());
        Ok(())
    }

    fn clear_players(&mut self) -> Result<(), StoreError> {
        self.check_writable()?;
        self.snapshot.players.clear();
        Ok(())
    }
}

/// Bincode snapshot file rewritten on every mutation.
///
/// Each write goes to a temporary file that is renamed over the snapshot,
/// and the in-memory copy only changes after the rename succeeds.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    snapshot: Snapshot,
}

impl FileStore {
    /// Opens `path`, loading an existing snapshot if there is one.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let snapshot = if path.exists() {
            let data = fs::read(&path)?;
            let snapshot: Snapshot = deserialize(&data)?;
            info!(
                "Loaded snapshot from {} ({} servers, {} players)",
                path.display(),
                snapshot.servers.len(),
                snapshot.players.len()
            );
            snapshot
        } else {
            Snapshot::default()
        };

        Ok(Self { path, snapshot })
    }

    fn commit(&mut self, next: Snapshot) -> Result<(), StoreError> {
        let data = serialize(&next)?;
        let tmp = self.path.with_extension("tmp");
        let write = || -> std::io::Result<()> {
            fs::write(&tmp, &data)?;
            fs::rename(&tmp, &self.path)
        };

        // The coordinator task calls this on every mutation. On a worker
        // thread the write must not stall the other tasks scheduled there.
        let on_worker = Handle::try_current()
            .map(|handle| handle.runtime_flavor() == RuntimeFlavor::MultiThread)
            .unwrap_or(false);
        if on_worker {
            block_in_place(write)?;
        } else {
            write()?;
        }

        self.snapshot = next;
        Ok(())
    }
}

impl CoordinatorStore for FileStore {
    fn load(&self) -> Result<Snapshot, StoreError> {
        Ok(self.snapshot.clone())
    }

    fn put_server(&mut self, server: &StoredServer) -> Result<(), StoreError> {
        let mut next = self.snapshot.clone();
        next.servers.insert(server.server_id.clone(), server.clone());
        self.commit(next)
    }

    fn remove_server(&mut self, server_id: &ServerId) -> Result<(), StoreError> {
        let mut next = self.snapshot.clone();
        next.servers.remove(server_id);
        self.commit(next)
    }

    fn put_player(&mut self, player: &PlayerEntry) -> Result<(), StoreError> {
        let mut next = self.snapshot.clone();
        next.players.insert(player.record.player_id, player.clone());
        self.commit(next)
    }

    fn clear_players(&mut self) -> Result<(), StoreError> {
        let mut next = self.snapshot.clone();
        next.players.clear();
        self.commit(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{PlayerRecord, Vec2};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "coordinator-store-{}-{}.bin",
            name,
            std::process::id()
        ))
    }

    fn test_server() -> StoredServer {
        StoredServer {
            server_id: ServerId::new("a"),
            endpoint: "127.0.0.1:7000".parse().unwrap(),
            zone: Zone::new(0, 0),
        }
    }

    #[test]
    fn test_memory_store_round_trip() {
        let mut store = MemoryStore::new();
        store.put_server(&test_server()).unwrap();
        store
            .put_player(&PlayerEntry::new(
                PlayerRecord::new(1, "ada", Vec2::new(1.0, 1.0)),
                Some(ServerId::new("a")),
            ))
            .unwrap();

        let snapshot = store.load().unwrap();
        assert_eq!(snapshot.servers.len(), 1);
        assert_eq!(snapshot.players.len(), 1);

        store.remove_server(&ServerId::new("a")).unwrap();
        store.clear_players().unwrap();
        let snapshot = store.load().unwrap();
        assert!(snapshot.servers.is_empty());
        assert!(snapshot.players.is_empty());
    }

    #[test]
    fn test_failing_store_rejects_writes() {
        let mut store = MemoryStore::failing();
        assert!(matches!(
            store.put_server(&test_server()),
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.load().unwrap().servers.is_empty());
    }

    #[test]
    fn test_file_store_persists_across_reopen() {
        let path = temp_path("reopen");
        let _ = fs::remove_file(&path);

        {
            let mut store = FileStore::open(&path).unwrap();
            store.put_server(&test_server()).unwrap();
        }

        let reopened = FileStore::open(&path).unwrap();
        let snapshot = reopened.load().unwrap();
        assert_eq!(
            snapshot.servers.get(&ServerId::new("a")),
            Some(&test_server())
        );

        let _ = fs::remove_file(&path);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_file_store_writes_from_coordinator_task() {
        use crate::actor::CoordinatorHandle;
        use crate::registry::ZoneCoordinator;
        use shared::ZoneGrid;
        use std::time::Instant;

        let path = temp_path("actor");
        let _ = fs::remove_file(&path);

        let store = FileStore::open(&path).unwrap();
        let coordinator = ZoneCoordinator::restore(ZoneGrid::default(), store, Instant::now()).unwrap();
        let (handle, _task) = CoordinatorHandle::spawn(coordinator, 16);

        handle
            .register_server(ServerId::new("a"), "127.0.0.1:7001".parse().unwrap())
            .await
            .unwrap();
        handle
            .update_player(PlayerRecord::new(4, "lin", Vec2::new(10.0, 10.0)))
            .await
            .unwrap();

        let snapshot = FileStore::open(&path).unwrap().load().unwrap();
        assert!(snapshot.servers.contains_key(&ServerId::new("a")));
        assert_eq!(
            snapshot.players.get(&4).map(|p| p.owner.clone()),
            Some(Some(ServerId::new("a")))
        );

        let _ = fs::remove_file(&path);
    }
}
