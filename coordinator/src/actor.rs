//! Single-writer access to the coordinator
//!
//! `ZoneCoordinator` is moved into one task that drains a bounded mailbox.
//! `CoordinatorHandle` is the only way in: each call sends a command with a
//! oneshot reply channel and awaits the answer.

use crate::error::CoordinatorError;
use crate::registry::{PlayerEntry, ZoneCoordinator};
use crate::store::CoordinatorStore;
use log::{debug, error, info};
use shared::utils::get_timestamp;
use shared::{
    AggregatedStats, PlayerId, PlayerRecord, ServerId, ServerInfo, TransferDirective, Vec2, Zone,
    ZoneStats,
};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

type Reply<T> = oneshot::Sender<Result<T, CoordinatorError>>;

enum Command {
    RegisterServer {
        server_id: ServerId,
        endpoint: SocketAddr,
        reply: Reply<Zone>,
    },
    UnregisterServer {
        server_id: ServerId,
        reply: Reply<()>,
    },
    Heartbeat {
        server_id: ServerId,
        reply: Reply<()>,
    },
    EvictStale {
        timeout: Duration,
        reply: Reply<Vec<ServerId>>,
    },
    InitiateTransfer {
        player_id: PlayerId,
        position: Vec2,
        reply: Reply<Option<TransferDirective>>,
    },
    CompleteTransfer {
        player_id: PlayerId,
        server_id: ServerId,
        reply: Reply<()>,
    },
    UpdatePlayer {
        record: PlayerRecord,
        reply: Reply<()>,
    },
    ResetPlayers {
        reply: Reply<()>,
    },
    GetServerForPosition {
        position: Vec2,
        reply: Reply<Option<ServerInfo>>,
    },
    ReportZoneStats {
        zone: Zone,
        stats: ZoneStats,
        reply: Reply<()>,
    },
    AggregateStats {
        reply: Reply<AggregatedStats>,
    },
    Player {
        player_id: PlayerId,
        reply: Reply<Option<PlayerEntry>>,
    },
    Servers {
        reply: Reply<Vec<ServerInfo>>,
    },
}

fn apply<S: CoordinatorStore>(coordinator: &mut ZoneCoordinator<S>, command: Command) {
    // A dropped reply receiver means the caller gave up; nothing to do.
    match command {
        Command::RegisterServer {
            server_id,
            endpoint,
            reply,
        } => {
            let _ = reply.send(coordinator.register_server(server_id, endpoint, Instant::now()));
        }
        Command::UnregisterServer { server_id, reply } => {
            let _ = reply.send(coordinator.unregister_server(&server_id));
        }
        Command::Heartbeat { server_id, reply } => {
            let _ = reply.send(coordinator.heartbeat(&server_id, Instant::now()));
        }
        Command::EvictStale { timeout, reply } => {
            let _ = reply.send(coordinator.evict_stale(Instant::now(), timeout));
        }
        Command::InitiateTransfer {
            player_id,
            position,
            reply,
        } => {
            let _ = reply.send(coordinator.initiate_transfer(player_id, position));
        }
        Command::CompleteTransfer {
            player_id,
            server_id,
            reply,
        } => {
            let _ = reply.send(coordinator.complete_transfer(player_id, server_id));
        }
        Command::UpdatePlayer { record, reply } => {
            let _ = reply.send(coordinator.update_player(record));
        }
        Command::ResetPlayers { reply } => {
            let _ = reply.send(coordinator.reset_players());
        }
        Command::GetServerForPosition { position, reply } => {
            let _ = reply.send(Ok(coordinator.get_server_for_position(position)));
        }
        Command::ReportZoneStats { zone, stats, reply } => {
            coordinator.report_zone_stats(zone, stats);
            let _ = reply.send(Ok(()));
        }
        Command::AggregateStats { reply } => {
            let _ = reply.send(Ok(coordinator.aggregate_stats(get_timestamp())));
        }
        Command::Player { player_id, reply } => {
            let _ = reply.send(Ok(coordinator.player(player_id).cloned()));
        }
        Command::Servers { reply } => {
            let _ = reply.send(Ok(coordinator.servers()));
        }
    }
}

/// Cloneable handle to the coordinator task.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Command>,
}

impl CoordinatorHandle {
    /// Moves `coordinator` into its own task and returns the handle.
    pub fn spawn<S: CoordinatorStore>(
        mut coordinator: ZoneCoordinator<S>,
        mailbox_capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Command>(mailbox_capacity.max(1));

        let task = tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                apply(&mut coordinator, command);
            }
            info!("Coordinator mailbox closed");
        });

        (Self { tx }, task)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, CoordinatorError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| CoordinatorError::MailboxClosed)?;
        response.await.map_err(|_| CoordinatorError::MailboxClosed)?
    }

    pub async fn register_server(
        &self,
        server_id: ServerId,
        endpoint: SocketAddr,
    ) -> Result<Zone, CoordinatorError> {
        self.request(|reply| Command::RegisterServer {
            server_id,
            endpoint,
            reply,
        })
        .await
    }

    pub async fn unregister_server(&self, server_id: ServerId) -> Result<(), CoordinatorError> {
        self.request(|reply| Command::UnregisterServer { server_id, reply })
            .await
    }

    pub async fn heartbeat(&self, server_id: ServerId) -> Result<(), CoordinatorError> {
        self.request(|reply| Command::Heartbeat { server_id, reply })
            .await
    }

    pub async fn evict_stale(&self, timeout: Duration) -> Result<Vec<ServerId>, CoordinatorError> {
        self.request(|reply| Command::EvictStale { timeout, reply })
            .await
    }

    pub async fn initiate_transfer(
        &self,
        player_id: PlayerId,
        position: Vec2,
    ) -> Result<Option<TransferDirective>, CoordinatorError> {
        self.request(|reply| Command::InitiateTransfer {
            player_id,
            position,
            reply,
        })
        .await
    }

    pub async fn complete_transfer(
        &self,
        player_id: PlayerId,
        server_id: ServerId,
    ) -> Result<(), CoordinatorError> {
        self.request(|reply| Command::CompleteTransfer {
            player_id,
            server_id,
            reply,
        })
        .await
    }

    pub async fn update_player(&self, record: PlayerRecord) -> Result<(), CoordinatorError> {
        self.request(|reply| Command::UpdatePlayer { record, reply })
            .await
    }

    pub async fn reset_players(&self) -> Result<(), CoordinatorError> {
        self.request(|reply| Command::ResetPlayers { reply }).await
    }

    pub async fn get_server_for_position(
        &self,
        position: Vec2,
    ) -> Result<Option<ServerInfo>, CoordinatorError> {
        self.request(|reply| Command::GetServerForPosition { position, reply })
            .await
    }

    pub async fn report_zone_stats(
        &self,
        zone: Zone,
        stats: ZoneStats,
    ) -> Result<(), CoordinatorError> {
        self.request(|reply| Command::ReportZoneStats { zone, stats, reply })
            .await
    }

    pub async fn aggregate_stats(&self) -> Result<AggregatedStats, CoordinatorError> {
        self.request(|reply| Command::AggregateStats { reply }).await
    }

    pub async fn player(&self, player_id: PlayerId) -> Result<Option<PlayerEntry>, CoordinatorError> {
        self.request(|reply| Command::Player { player_id, reply })
            .await
    }

    pub async fn servers(&self) -> Result<Vec<ServerInfo>, CoordinatorError> {
        self.request(|reply| Command::Servers { reply }).await
    }

    /// Pushes aggregated stats every `every` until the receiver is dropped
    /// or the coordinator stops.
    pub fn stream_zone_statistics(&self, every: Duration) -> mpsc::Receiver<AggregatedStats> {
        let (tx, rx) = mpsc::channel(8);
        let handle = self.clone();

        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = ticker.tick() => {
                        let stats = match handle.aggregate_stats().await {
                            Ok(stats) => stats,
                            Err(e) => {
                                debug!("Stopping stats stream: {}", e);
                                break;
                            }
                        };
                        if tx.send(stats).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        rx
    }

    /// Spawns the sweep that evicts servers silent for longer than
    /// `timeout`.
    pub fn spawn_stale_sweeper(&self, every: Duration, timeout: Duration) -> JoinHandle<()> {
        let handle = self.clone();

        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match handle.evict_stale(timeout).await {
                    Ok(evicted) if !evicted.is_empty() => {
                        info!("Evicted {} stale servers", evicted.len());
                    }
                    Ok(_) => {}
                    Err(CoordinatorError::MailboxClosed) => break,
                    Err(e) => error!("Stale sweep failed: {}", e),
                }
            }
        })
    }
}
