//! # Shared Zone Handoff Library
//!
//! Types and primitives used by every process in the zone handoff system:
//! the coordinator, the zone servers and the game clients.
//!
//! ## Module Organization
//!
//! ### Zone Module (`zone`)
//! The world is cut into fixed-size rectangular cells. `ZoneGrid::zone_of`
//! is the single function every process uses to decide which cell a
//! position belongs to, so it must stay pure and deterministic.
//!
//! ### Protocol Module (`protocol`)
//! The `Packet` enum carried over UDP. Requests and responses form the
//! reliable (acknowledged) class, datagrams form the unreliable class.
//!
//! ### Transport Module (`transport`)
//! A `Connection` wraps a connected UDP socket and matches responses to
//! in-flight requests. Every call carries a caller-chosen deadline and the
//! transport never retries on its own.
//!
//! ### RPC Module (`rpc`)
//! Typed wrappers for the coordinator and zone server request surface.
//!
//! ### Error Module (`error`)
//! Transport errors and the handoff error taxonomy callers use to decide
//! between retrying, re-resolving and giving up.

pub mod error;
pub mod metrics;
pub mod protocol;
pub mod rpc;
pub mod transport;
pub mod utils;
pub mod zone;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul, Sub};

pub use error::{ConfigError, HandoffError, TransportError};
pub use protocol::{
    AggregatedStats, Datagram, Delivery, EntityKind, EntitySnapshot, Packet, PlayerRecord,
    RemoteError, Request, Response, ServerInfo, TransferDirective, ZoneStats,
};
pub use zone::{Zone, ZoneBounds, ZoneGrid};

pub const PROTOCOL_VERSION: u32 = 1;

/// Side length of a zone in world units.
pub const DEFAULT_CELL_SIZE: f32 = 500.0;

/// Receive buffer size; large enough for any UDP payload.
pub const MAX_PACKET_SIZE: usize = 65_507;

pub type PlayerId = u64;
pub type EntityId = u64;

/// Identity of a zone server process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerId(pub String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position or velocity in world space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn distance(self, other: Vec2) -> f32 {
        (other - self).length()
    }
}

impl Add for Vec2 {
    type Output = Vec2;

    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Vec2;

    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Vec2;

    fn mul(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

impl fmt::Display for Vec2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1}, {:.1})", self.x, self.y)
    }
}
