//! Wire protocol shared by the coordinator, zone servers and clients
//!
//! Every UDP payload is one bincode-encoded `Packet`. Requests and responses
//! are matched by `request_id` and make up the reliable delivery class:
//! the sender waits for an acknowledgement until its deadline and decides
//! itself whether to retry. Datagrams are fire-and-forget.

use crate::error::TransportError;
use crate::{EntityId, PlayerId, ServerId, Vec2, Zone, MAX_PACKET_SIZE};
use bincode::{deserialize, serialize};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use thiserror::Error;

/// Delivery class of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Acknowledged by a response; the caller may retry.
    Reliable,
    /// Best effort; never retried by the transport.
    Unreliable,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Request { request_id: u64, body: Request },
    Response { request_id: u64, body: Response },
    Datagram(Datagram),
}

impl Packet {
    pub fn delivery(&self) -> Delivery {
        match self {
            Packet::Request { .. } | Packet::Response { .. } => Delivery::Reliable,
            Packet::Datagram(_) => Delivery::Unreliable,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, TransportError> {
        let data = serialize(self)?;
        if data.len() > MAX_PACKET_SIZE {
            return Err(TransportError::Oversized(data.len()));
        }
        Ok(data)
    }

    pub fn decode(data: &[u8]) -> Result<Packet, TransportError> {
        Ok(deserialize(data)?)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Request {
    Ping {
        timestamp: u64,
    },

    // Coordinator surface
    RegisterServer {
        server_id: ServerId,
        endpoint: SocketAddr,
    },
    UnregisterServer {
        server_id: ServerId,
    },
    Heartbeat {
        server_id: ServerId,
    },
    InitiateTransfer {
        player_id: PlayerId,
        position: Vec2,
    },
    CompleteTransfer {
        player_id: PlayerId,
        server_id: ServerId,
    },
    UpdatePlayer {
        record: PlayerRecord,
    },
    ResetPlayers,
    GetServerForPosition {
        position: Vec2,
    },
    ReportZoneStats {
        zone: Zone,
        stats: ZoneStats,
    },
    SubscribeZoneStats {
        interval_ms: u64,
    },
    UnsubscribeZoneStats,

    // Zone server surface
    TransferEntityIn {
        entity: EntitySnapshot,
        /// Milliseconds since a projectile left its origin zone, if it has.
        left_origin_ms: Option<u64>,
    },
    Join {
        player_id: PlayerId,
        name: String,
        session_key: String,
        /// Set only on the first join of a session; later joins attach to
        /// an entity that was handed off by the previous server.
        spawn_at: Option<Vec2>,
    },
    Leave {
        player_id: PlayerId,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Response {
    Pong {
        timestamp: u64,
    },
    Ack,
    Zone(Zone),
    Directive(Option<TransferDirective>),
    Accepted(bool),
    Server(Option<ServerInfo>),
    Joined {
        server_id: ServerId,
        zone: Zone,
        position: Option<Vec2>,
    },
    Error(RemoteError),
}

/// Failure reported by the remote side of a request.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Error)]
pub enum RemoteError {
    #[error("server is not registered")]
    NotRegistered,
    #[error("zone ownership changed")]
    AuthorityConflict,
    #[error("capacity exceeded")]
    CapacityExceeded,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("session rejected")]
    Unauthorized,
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Datagram {
    Move {
        player_id: PlayerId,
        sequence: u32,
        velocity: Vec2,
    },
    WorldState {
        tick: u32,
        timestamp: u64,
        zone: Zone,
        entities: Vec<EntitySnapshot>,
    },
    ZoneStatistics(AggregatedStats),
}

/// Snapshots carried by one `WorldState` datagram. At 32 bytes each this
/// stays well under `MAX_PACKET_SIZE`.
pub const WORLD_STATE_CHUNK: usize = 1024;

impl Datagram {
    /// Splits a world state into datagrams that each fit one packet. All
    /// parts share `tick`, and an empty world still yields one datagram.
    pub fn world_state_chunks(
        tick: u32,
        timestamp: u64,
        zone: Zone,
        entities: Vec<EntitySnapshot>,
    ) -> Vec<Datagram> {
        if entities.len() <= WORLD_STATE_CHUNK {
            return vec![Datagram::WorldState {
                tick,
                timestamp,
                zone,
                entities,
            }];
        }

        entities
            .chunks(WORLD_STATE_CHUNK)
            .map(|chunk| Datagram::WorldState {
                tick,
                timestamp,
                zone,
                entities: chunk.to_vec(),
            })
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Player,
    Enemy,
    Bullet,
    Building,
}

impl EntityKind {
    pub fn is_projectile(self) -> bool {
        matches!(self, EntityKind::Bullet)
    }
}

/// Transferable state of one entity.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub kind: EntityKind,
    pub position: Vec2,
    pub velocity: Vec2,
    pub health: f32,
}

/// Last known state of a player as tracked by the coordinator.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerRecord {
    pub player_id: PlayerId,
    pub name: String,
    pub position: Vec2,
    pub velocity: Vec2,
    pub health: f32,
}

impl PlayerRecord {
    pub fn new(player_id: PlayerId, name: impl Into<String>, position: Vec2) -> Self {
        Self {
            player_id,
            name: name.into(),
            position,
            velocity: Vec2::ZERO,
            health: 100.0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ServerInfo {
    pub server_id: ServerId,
    pub endpoint: SocketAddr,
    pub zone: Zone,
}

/// Instruction from the coordinator to move a player to another server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TransferDirective {
    pub target_server: ServerInfo,
    pub previous_server: Option<ServerId>,
    pub player: PlayerRecord,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct ZoneStats {
    pub entity_count: u32,
    pub player_count: u32,
    pub scan_ms: f32,
}

/// Cluster-wide statistics pushed to stats subscribers.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct AggregatedStats {
    pub generated_at: u64,
    pub server_count: u32,
    pub player_records: u32,
    pub total_entities: u32,
    pub total_players: u32,
    pub zones: Vec<(Zone, ZoneStats)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_delivery_class() {
        let request = Packet::Request {
            request_id: 1,
            body: Request::Ping { timestamp: 5 },
        };
        let response = Packet::Response {
            request_id: 1,
            body: Response::Ack,
        };
        let datagram = Packet::Datagram(Datagram::Move {
            player_id: 3,
            sequence: 9,
            velocity: Vec2::new(1.0, 0.0),
        });

        assert_eq!(request.delivery(), Delivery::Reliable);
        assert_eq!(response.delivery(), Delivery::Reliable);
        assert_eq!(datagram.delivery(), Delivery::Unreliable);
    }

    #[test]
    fn test_large_world_state_is_split_into_sendable_datagrams() {
        let entities: Vec<EntitySnapshot> = (0..2500u64)
            .map(|id| EntitySnapshot {
                id,
                kind: EntityKind::Enemy,
                position: Vec2::new(id as f32, 20.0),
                velocity: Vec2::new(1.0, -1.0),
                health: 100.0,
            })
            .collect();

        let whole = Packet::Datagram(Datagram::WorldState {
            tick: 3,
            timestamp: 0,
            zone: Zone::new(0, 0),
            entities: entities.clone(),
        });
        assert!(matches!(whole.encode(), Err(TransportError::Oversized(_))));

        let chunks = Datagram::world_state_chunks(3, 0, Zone::new(0, 0), entities);
        assert_eq!(chunks.len(), 3);

        let mut carried = 0;
        for chunk in chunks {
            if let Datagram::WorldState { tick, entities, .. } = &chunk {
                assert_eq!(*tick, 3);
                carried += entities.len();
            }
            assert!(Packet::Datagram(chunk).encode().is_ok());
        }
        assert_eq!(carried, 2500);
    }

    #[test]
    fn test_empty_world_state_is_one_datagram() {
        let chunks = Datagram::world_state_chunks(1, 0, Zone::new(0, 0), Vec::new());
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_packet_serialization_transfer_entity_in() {
        let entity = EntitySnapshot {
            id: 77,
            kind: EntityKind::Bullet,
            position: Vec2::new(499.5, 20.0),
            velocity: Vec2::new(300.0, 0.0),
            health: 1.0,
        };
        let packet = Packet::Request {
            request_id: 42,
            body: Request::TransferEntityIn {
                entity: entity.clone(),
                left_origin_ms: Some(120),
            },
        };

        let data = packet.encode().unwrap();
        match Packet::decode(&data).unwrap() {
            Packet::Request {
                request_id,
                body:
                    Request::TransferEntityIn {
                        entity: decoded,
                        left_origin_ms,
                    },
            } => {
                assert_eq!(request_id, 42);
                assert_eq!(decoded, entity);
                assert_eq!(left_origin_ms, Some(120));
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_directive() {
        let directive = TransferDirective {
            target_server: ServerInfo {
                server_id: ServerId::new("b"),
                endpoint: "127.0.0.1:9001".parse().unwrap(),
                zone: Zone::new(1, 0),
            },
            previous_server: Some(ServerId::new("a")),
            player: PlayerRecord::new(7, "ada", Vec2::new(501.0, 3.0)),
        };
        let packet = Packet::Response {
            request_id: 8,
            body: Response::Directive(Some(directive.clone())),
        };

        match Packet::decode(&packet.encode().unwrap()).unwrap() {
            Packet::Response {
                body: Response::Directive(Some(decoded)),
                ..
            } => assert_eq!(decoded, directive),
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_malformed_packet_rejected() {
        let garbage = [0xffu8, 0xff, 0xff, 0xff, 0x01];
        assert!(Packet::decode(&garbage).is_err());
        assert!(Packet::decode(&[]).is_err());
    }

    #[test]
    fn test_only_bullets_are_projectiles() {
        assert!(EntityKind::Bullet.is_projectile());
        assert!(!EntityKind::Player.is_projectile());
        assert!(!EntityKind::Enemy.is_projectile());
        assert!(!EntityKind::Building.is_projectile());
    }
}
