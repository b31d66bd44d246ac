//! # Zone Server Library
//!
//! A zone server is authoritative for every entity inside one grid cell of
//! the world. It simulates them, streams world state to attached clients,
//! and hands entities to the neighbouring server when they cross out.
//!
//! ## Core Responsibilities
//!
//! ### Boundary Scan
//! Every scan interval the server classifies each local entity against its
//! assigned zone. Players that left are routed through the coordinator,
//! which names the new owner; other entities are routed by position and
//! destroyed when nobody owns their destination. Projectiles are handed
//! over slightly early, using a short lookahead, so they do not pop at the
//! boundary.
//!
//! ### Inbound Transfers
//! `TransferEntityIn` is idempotent. A repeated push of an entity already
//! held here succeeds, which makes at-least-once delivery from the source
//! safe.
//!
//! ### Client Attachment
//! Clients join with a session key, send unreliable `Move` datagrams and
//! receive `WorldState` every tick until they leave or fall silent.
//!
//! ## Module Organization
//!
//! ### Entity Module (`entity`)
//! Entity state and the local store with its capacity limit.
//!
//! ### Boundary Module (`boundary`)
//! Pure crossing classification and the projectile acceptance window.
//!
//! ### Pool Module (`pool`)
//! `PeerConnectionPool`: cached connections to peer servers, created under
//! a per-peer lock and swept when idle.
//!
//! ### Transfer Module (`transfer`)
//! The scan itself. Failures are per entity and never abort a scan.
//!
//! ### Client Manager Module (`client_manager`)
//! Attached clients, move ordering and silence timeouts.
//!
//! ### Network Module (`network`)
//! UDP front end, background tasks and the tick loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::{ZoneServer, ZoneServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Registers with the coordinator at 127.0.0.1:7000 and gets a zone
//!     let mut server = ZoneServer::start(ZoneServerConfig::default()).await?;
//!
//!     // Runs until shut down:
//!     // - answers transfers, joins and pings
//!     // - scans for boundary crossings every 100ms
//!     // - heartbeats the coordinator and reports zone stats
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod boundary;
pub mod client_manager;
pub mod config;
pub mod entity;
pub mod network;
pub mod pool;
pub mod transfer;

pub use client_manager::{NonEmptyKey, SessionValidator};
pub use config::ZoneServerConfig;
pub use entity::{Entity, EntityStore};
pub use network::{ShutdownHandle, ZoneServer};
pub use pool::{PeerConnectionPool, PoolConfig};
pub use transfer::{BoundaryScanner, OwnershipResolver, ScanReport, TransferConfig};
