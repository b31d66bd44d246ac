//! Typed request wrappers over `Connection`

use crate::error::TransportError;
use crate::protocol::{
    EntitySnapshot, PlayerRecord, Request, Response, ServerInfo, TransferDirective, ZoneStats,
};
use crate::transport::Connection;
use crate::utils::get_timestamp;
use crate::{PlayerId, ServerId, Vec2, Zone};
use std::net::SocketAddr;
use std::time::Duration;

/// Deadlines applied to reliable calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RpcDeadlines {
    /// Transfers and coordinator lookups.
    pub reliable: Duration,
    /// Heartbeats and pings; shorter so a dead peer is noticed quickly.
    pub heartbeat: Duration,
}

impl Default for RpcDeadlines {
    fn default() -> Self {
        Self {
            reliable: Duration::from_secs(3),
            heartbeat: Duration::from_secs(1),
        }
    }
}

fn unexpected(response: Response) -> TransportError {
    TransportError::UnexpectedResponse(format!("{:?}", response))
}

fn expect_ack(response: Response) -> Result<(), TransportError> {
    match response {
        Response::Ack => Ok(()),
        other => Err(unexpected(other)),
    }
}

/// Sends a ping and returns the measured round trip.
pub async fn ping(connection: &Connection, deadline: Duration) -> Result<Duration, TransportError> {
    let started = std::time::Instant::now();
    match connection
        .call(
            Request::Ping {
                timestamp: get_timestamp(),
            },
            deadline,
        )
        .await?
    {
        Response::Pong { .. } => Ok(started.elapsed()),
        other => Err(unexpected(other)),
    }
}

/// Pushes one entity to a zone server. `Ok(false)` means the target
/// declined it (for example a projectile outside its acceptance window).
pub async fn transfer_entity_in(
    connection: &Connection,
    entity: EntitySnapshot,
    left_origin_ms: Option<u64>,
    deadline: Duration,
) -> Result<bool, TransportError> {
    match connection
        .call(
            Request::TransferEntityIn {
                entity,
                left_origin_ms,
            },
            deadline,
        )
        .await?
    {
        Response::Accepted(accepted) => Ok(accepted),
        other => Err(unexpected(other)),
    }
}

/// Result of joining a zone server.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinAck {
    pub server_id: ServerId,
    pub zone: Zone,
    pub position: Option<Vec2>,
}

pub async fn join(
    connection: &Connection,
    player_id: PlayerId,
    name: &str,
    session_key: &str,
    spawn_at: Option<Vec2>,
    deadline: Duration,
) -> Result<JoinAck, TransportError> {
    let request = Request::Join {
        player_id,
        name: name.to_string(),
        session_key: session_key.to_string(),
        spawn_at,
    };
    match connection.call(request, deadline).await? {
        Response::Joined {
            server_id,
            zone,
            position,
        } => Ok(JoinAck {
            server_id,
            zone,
            position,
        }),
        other => Err(unexpected(other)),
    }
}

pub async fn leave(
    connection: &Connection,
    player_id: PlayerId,
    deadline: Duration,
) -> Result<(), TransportError> {
    expect_ack(connection.call(Request::Leave { player_id }, deadline).await?)
}

/// Typed client for the coordinator's request surface.
pub struct CoordinatorClient {
    connection: Connection,
    deadlines: RpcDeadlines,
}

impl CoordinatorClient {
    pub async fn connect(addr: SocketAddr, deadlines: RpcDeadlines) -> Result<Self, TransportError> {
        Ok(Self {
            connection: Connection::connect(addr).await?,
            deadlines,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn deadlines(&self) -> RpcDeadlines {
        self.deadlines
    }

    async fn call(&self, request: Request) -> Result<Response, TransportError> {
        self.connection.call(request, self.deadlines.reliable).await
    }

    pub async fn ping(&self) -> Result<Duration, TransportError> {
        ping(&self.connection, self.deadlines.heartbeat).await
    }

    pub async fn register_server(
        &self,
        server_id: &ServerId,
        endpoint: SocketAddr,
    ) -> Result<Zone, TransportError> {
        let request = Request::RegisterServer {
            server_id: server_id.clone(),
            endpoint,
        };
        match self.call(request).await? {
            Response::Zone(zone) => Ok(zone),
            other => Err(unexpected(other)),
        }
    }

    pub async fn unregister_server(&self, server_id: &ServerId) -> Result<(), TransportError> {
        expect_ack(
            self.call(Request::UnregisterServer {
                server_id: server_id.clone(),
            })
            .await?,
        )
    }

    pub async fn heartbeat(&self, server_id: &ServerId) -> Result<(), TransportError> {
        let request = Request::Heartbeat {
            server_id: server_id.clone(),
        };
        expect_ack(
            self.connection
                .call(request, self.deadlines.heartbeat)
                .await?,
        )
    }

    pub async fn initiate_transfer(
        &self,
        player_id: PlayerId,
        position: Vec2,
    ) -> Result<Option<TransferDirective>, TransportError> {
        match self
            .call(Request::InitiateTransfer {
                player_id,
                position,
            })
            .await?
        {
            Response::Directive(directive) => Ok(directive),
            other => Err(unexpected(other)),
        }
    }

    pub async fn complete_transfer(
        &self,
        player_id: PlayerId,
        server_id: &ServerId,
    ) -> Result<(), TransportError> {
        expect_ack(
            self.call(Request::CompleteTransfer {
                player_id,
                server_id: server_id.clone(),
            })
            .await?,
        )
    }

    pub async fn update_player(&self, record: PlayerRecord) -> Result<(), TransportError> {
        expect_ack(self.call(Request::UpdatePlayer { record }).await?)
    }

    pub async fn reset_players(&self) -> Result<(), TransportError> {
        expect_ack(self.call(Request::ResetPlayers).await?)
    }

    pub async fn get_server_for_position(
        &self,
        position: Vec2,
    ) -> Result<Option<ServerInfo>, TransportError> {
        match self.call(Request::GetServerForPosition { position }).await? {
            Response::Server(info) => Ok(info),
            other => Err(unexpected(other)),
        }
    }

    pub async fn report_zone_stats(&self, zone: Zone, stats: ZoneStats) -> Result<(), TransportError> {
        expect_ack(self.call(Request::ReportZoneStats { zone, stats }).await?)
    }

    /// Asks the coordinator to push `ZoneStatistics` datagrams to this
    /// connection every `interval` until unsubscribed.
    pub async fn subscribe_zone_stats(&self, interval: Duration) -> Result<(), TransportError> {
        expect_ack(
            self.call(Request::SubscribeZoneStats {
                interval_ms: interval.as_millis() as u64,
            })
            .await?,
        )
    }

    pub async fn unsubscribe_zone_stats(&self) -> Result<(), TransportError> {
        expect_ack(self.call(Request::UnsubscribeZoneStats).await?)
    }
}
