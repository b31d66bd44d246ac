//! # Zone Coordinator
//!
//! The single authority that maps zones to zone servers and tracks the last
//! known state of every player.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! `ZoneCoordinator` holds registrations, the zone map and player records.
//! It assigns zones first-fit in row-major order and computes transfer
//! directives. It is plain state with no locking of its own.
//!
//! ### Actor Module (`actor`)
//! Moves the coordinator into one task behind a bounded mailbox, so every
//! mutation is applied in a single total order. `CoordinatorHandle` is the
//! cloneable entry point, and also drives the stale-server sweep and the
//! statistics stream.
//!
//! ### Store Module (`store`)
//! Write-through persistence. A failed write is returned to the caller and
//! the in-memory state is left as it was.
//!
//! ### Network Module (`network`)
//! UDP front end answering the coordinator request surface.

pub mod actor;
pub mod config;
pub mod error;
pub mod network;
pub mod registry;
pub mod store;

pub use actor::CoordinatorHandle;
pub use config::CoordinatorConfig;
pub use error::CoordinatorError;
pub use network::CoordinatorServer;
pub use registry::ZoneCoordinator;
pub use store::{CoordinatorStore, FileStore, MemoryStore};

use std::time::Instant;

/// Restores the coordinator from `store`, starts its actor and the stale
/// sweep, and binds the UDP front end.
pub async fn start<S: CoordinatorStore>(
    config: &CoordinatorConfig,
    store: S,
) -> Result<(CoordinatorHandle, CoordinatorServer), Box<dyn std::error::Error>> {
    let coordinator = ZoneCoordinator::restore(config.grid, store, Instant::now())?;
    let (handle, _actor) = CoordinatorHandle::spawn(coordinator, config.mailbox_capacity);
    handle.spawn_stale_sweeper(config.sweep_interval, config.heartbeat_timeout);
    let server = CoordinatorServer::bind(config.bind_addr, handle.clone()).await?;
    Ok((handle, server))
}
