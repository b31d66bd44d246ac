//! UDP transport with reliable request/response and unreliable datagrams
//!
//! A `Connection` owns a UDP socket connected to one peer. A background
//! receiver task routes responses to the waiting caller by request id and
//! forwards datagrams to an optional channel. Calls never retry: a missing
//! response surfaces as `TransportError::Timeout` once the caller's deadline
//! passes.

use crate::error::TransportError;
use crate::protocol::{Datagram, Packet, Request, Response};
use crate::MAX_PACKET_SIZE;
use dashmap::DashMap;
use log::{debug, warn};
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

type PendingCalls = Arc<DashMap<u64, oneshot::Sender<Response>>>;

/// Encodes `packet` and sends it to `addr` on an unconnected socket.
pub async fn send_packet_impl(
    socket: &UdpSocket,
    packet: &Packet,
    addr: SocketAddr,
) -> Result<(), TransportError> {
    let data = packet.encode()?;
    socket.send_to(&data, addr).await?;
    Ok(())
}

/// Answers a request received on a server socket.
pub async fn send_response(
    socket: &UdpSocket,
    request_id: u64,
    body: Response,
    addr: SocketAddr,
) -> Result<(), TransportError> {
    send_packet_impl(socket, &Packet::Response { request_id, body }, addr).await
}

/// Local address to bind when talking to `peer`.
fn local_bind_addr(peer: SocketAddr) -> SocketAddr {
    let ip = match peer.ip() {
        IpAddr::V4(ip) if ip.is_loopback() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(ip) if ip.is_loopback() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}

/// Client side of a peer link.
pub struct Connection {
    peer: SocketAddr,
    socket: Arc<UdpSocket>,
    pending: PendingCalls,
    next_request_id: AtomicU64,
    stale: Arc<AtomicBool>,
    receiver: JoinHandle<()>,
}

impl Connection {
    /// Connects to `peer`, dropping any datagrams the peer pushes.
    pub async fn connect(peer: SocketAddr) -> Result<Self, TransportError> {
        Self::open(peer, None).await
    }

    /// Connects to `peer` and returns a channel of datagrams it pushes.
    pub async fn connect_with_datagrams(
        peer: SocketAddr,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Datagram>), TransportError> {
        let (datagram_tx, datagram_rx) = mpsc::unbounded_channel();
        let connection = Self::open(peer, Some(datagram_tx)).await?;
        Ok((connection, datagram_rx))
    }

    async fn open(
        peer: SocketAddr,
        datagrams: Option<mpsc::UnboundedSender<Datagram>>,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(local_bind_addr(peer)).await?;
        socket.connect(peer).await?;
        let socket = Arc::new(socket);
        let pending: PendingCalls = Arc::new(DashMap::new());
        let stale = Arc::new(AtomicBool::new(false));

        let receiver = spawn_receiver(
            Arc::clone(&socket),
            Arc::clone(&pending),
            Arc::clone(&stale),
            peer,
            datagrams,
        );

        debug!("Opened connection to {}", peer);

        Ok(Connection {
            peer,
            socket,
            pending,
            next_request_id: AtomicU64::new(1),
            stale,
            receiver,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    /// True once the socket reported the peer unreachable or the connection
    /// was closed. A stale connection should be replaced, not reused.
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// Number of calls waiting for a response.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Sends a reliable request and waits up to `deadline` for its response.
    ///
    /// `Response::Error` from the peer is returned as
    /// `TransportError::Remote`.
    pub async fn call(&self, body: Request, deadline: Duration) -> Result<Response, TransportError> {
        if self.receiver.is_finished() {
            return Err(TransportError::Closed);
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (response_tx, response_rx) = oneshot::channel();
        self.pending.insert(request_id, response_tx);

        let data = match (Packet::Request { request_id, body }).encode() {
            Ok(data) => data,
            Err(e) => {
                self.pending.remove(&request_id);
                return Err(e);
            }
        };

        if let Err(e) = self.socket.send(&data).await {
            self.pending.remove(&request_id);
            return Err(e.into());
        }

        match timeout(deadline, response_rx).await {
            Ok(Ok(Response::Error(remote))) => Err(TransportError::Remote(remote)),
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.pending.remove(&request_id);
                Err(TransportError::Timeout {
                    request_id,
                    deadline,
                })
            }
        }
    }

    /// Best-effort send; never retried.
    pub async fn send_unreliable(&self, datagram: Datagram) -> Result<(), TransportError> {
        let data = Packet::Datagram(datagram).encode()?;
        self.socket.send(&data).await?;
        Ok(())
    }

    /// Stops the receiver and fails every in-flight call with `Closed`.
    pub fn close(&self) {
        self.receiver.abort();
        self.stale.store(true, Ordering::Release);
        self.pending.clear();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

/// Spawns the task that reads from the connected socket.
fn spawn_receiver(
    socket: Arc<UdpSocket>,
    pending: PendingCalls,
    stale: Arc<AtomicBool>,
    peer: SocketAddr,
    datagrams: Option<mpsc::UnboundedSender<Datagram>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buffer = vec![0u8; MAX_PACKET_SIZE];

        loop {
            match socket.recv(&mut buffer).await {
                Ok(len) => match Packet::decode(&buffer[..len]) {
                    Ok(Packet::Response { request_id, body }) => {
                        stale.store(false, Ordering::Release);
                        match pending.remove(&request_id) {
                            Some((_, waiter)) => {
                                let _ = waiter.send(body);
                            }
                            None => debug!("Late response {} from {}", request_id, peer),
                        }
                    }
                    Ok(Packet::Datagram(datagram)) => {
                        if let Some(tx) = &datagrams {
                            if tx.send(datagram).is_err() {
                                debug!("Datagram consumer for {} went away", peer);
                            }
                        }
                    }
                    Ok(Packet::Request { .. }) => {
                        warn!("Ignoring request sent to client socket by {}", peer);
                    }
                    Err(e) => {
                        warn!("Failed to deserialize packet from {}: {}", peer, e);
                    }
                },
                Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                    stale.store(true, Ordering::Release);
                    debug!("Peer {} refused connection", peer);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(e) => {
                    warn!("Error receiving from {}: {}", peer, e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    })
}
