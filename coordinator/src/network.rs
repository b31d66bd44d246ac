//! UDP front end for the coordinator
//!
//! One task reads packets off the socket and hands each request to its own
//! task, which calls into the `CoordinatorHandle` and answers the sender.
//! Ordering between mutations is decided by the actor mailbox, not here.

use crate::actor::CoordinatorHandle;
use crate::error::CoordinatorError;
use log::{debug, error, info, warn};
use shared::transport::{send_packet_impl, send_response};
use shared::{Datagram, Packet, Request, Response, MAX_PACKET_SIZE};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Messages sent from network tasks to the main loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    #[allow(dead_code)]
    Shutdown,
}

type Subscriptions = Arc<Mutex<HashMap<SocketAddr, JoinHandle<()>>>>;

/// Smallest accepted stats push interval.
const MIN_STATS_INTERVAL: Duration = Duration::from_millis(50);

pub struct CoordinatorServer {
    socket: Arc<UdpSocket>,
    handle: CoordinatorHandle,
    subscriptions: Subscriptions,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl CoordinatorServer {
    pub async fn bind(
        addr: SocketAddr,
        handle: CoordinatorHandle,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Coordinator listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(CoordinatorServer {
            socket,
            handle,
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
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
                        Err(e) => warn!("Failed to deserialize packet from {}: {}", addr, e),
                    },
                    Err(e) => {
                        debug!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Main loop; returns when the receiver stops.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();

        loop {
            match self.server_rx.recv().await {
                Some(ServerMessage::PacketReceived {
                    packet: Packet::Request { request_id, body },
                    addr,
                }) => {
                    let socket = Arc::clone(&self.socket);
                    let handle = self.handle.clone();
                    let subscriptions = Arc::clone(&self.subscriptions);

                    tokio::spawn(async move {
                        let response =
                            handle_request(&socket, &handle, &subscriptions, body, addr).await;
                        if let Err(e) = send_response(&socket, request_id, response, addr).await {
                            warn!("Failed to answer {}: {}", addr, e);
                        }
                    });
                }
                Some(ServerMessage::PacketReceived { addr, .. }) => {
                    warn!("Unexpected packet type from {}", addr);
                }
                Some(ServerMessage::Shutdown) | None => {
                    info!("Coordinator shutting down");
                    break;
                }
            }
        }

        self.stop_subscriptions();
        Ok(())
    }

    fn stop_subscriptions(&self) {
        if let Ok(mut subscriptions) = self.subscriptions.lock() {
            for (_, task) in subscriptions.drain() {
                task.abort();
            }
        }
    }
}

fn into_response<T>(
    result: Result<T, CoordinatorError>,
    ok: impl FnOnce(T) -> Response,
) -> Response {
    match result {
        Ok(value) => ok(value),
        Err(e) => {
            if matches!(e, CoordinatorError::Persistence(_)) {
                error!("Coordinator write failed: {}", e);
            }
            Response::Error(e.to_remote())
        }
    }
}

async fn handle_request(
    socket: &Arc<UdpSocket>,
    handle: &CoordinatorHandle,
    subscriptions: &Subscriptions,
    request: Request,
    addr: SocketAddr,
) -> Response {
    match request {
        Request::Ping { timestamp } => Response::Pong { timestamp },
        Request::RegisterServer {
            server_id,
            endpoint,
        } => into_response(
            handle.register_server(server_id, endpoint).await,
            Response::Zone,
        ),
        Request::UnregisterServer { server_id } => {
            into_response(handle.unregister_server(server_id).await, |_| Response::Ack)
        }
        Request::Heartbeat { server_id } => {
            into_response(handle.heartbeat(server_id).await, |_| Response::Ack)
        }
        Request::InitiateTransfer {
            player_id,
            position,
        } => into_response(
            handle.initiate_transfer(player_id, position).await,
            Response::Directive,
        ),
        Request::CompleteTransfer {
            player_id,
            server_id,
        } => into_response(
            handle.complete_transfer(player_id, server_id).await,
            |_| Response::Ack,
        ),
        Request::UpdatePlayer { record } => {
            into_response(handle.update_player(record).await, |_| Response::Ack)
        }
        Request::ResetPlayers => into_response(handle.reset_players().await, |_| Response::Ack),
        Request::GetServerForPosition { position } => into_response(
            handle.get_server_for_position(position).await,
            Response::Server,
        ),
        Request::ReportZoneStats { zone, stats } => into_response(
            handle.report_zone_stats(zone, stats).await,
            |_| Response::Ack,
        ),
        Request::SubscribeZoneStats { interval_ms } => {
            let every = Duration::from_millis(interval_ms).max(MIN_STATS_INTERVAL);
            subscribe(socket, handle, subscriptions, addr, every);
            Response::Ack
        }
        Request::UnsubscribeZoneStats => {
            if let Ok(mut subscriptions) = subscriptions.lock() {
                if let Some(task) = subscriptions.remove(&addr) {
                    task.abort();
                    info!("Stats subscriber {} left", addr);
                }
            }
            Response::Ack
        }
        Request::TransferEntityIn { .. } | Request::Join { .. } | Request::Leave { .. } => {
            Response::Error(shared::RemoteError::Protocol(
                "zone server request sent to coordinator".to_string(),
            ))
        }
    }
}

/// Starts (or restarts) a push of aggregated stats to `addr`.
fn subscribe(
    socket: &Arc<UdpSocket>,
    handle: &CoordinatorHandle,
    subscriptions: &Subscriptions,
    addr: SocketAddr,
    every: Duration,
) {
    let mut stream = handle.stream_zone_statistics(every);
    let socket = Arc::clone(socket);

    let task = tokio::spawn(async move {
        while let Some(stats) = stream.recv().await {
            let packet = Packet::Datagram(Datagram::ZoneStatistics(stats));
            if let Err(e) = send_packet_impl(&socket, &packet, addr).await {
                debug!("Stats push to {} failed: {}", addr, e);
            }
        }
    });

    if let Ok(mut subscriptions) = subscriptions.lock() {
        if let Some(previous) = subscriptions.insert(addr, task) {
            previous.abort();
        }
        info!("Stats subscriber {} every {:?}", addr, every);
    }
}
