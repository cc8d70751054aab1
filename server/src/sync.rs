//! Sync server handling the unreliable channel
//!
//! One receive loop feeds a bounded queue drained by a fixed pool of workers.
//! Every datagram is handled on its own:
//! 1. Decode the frame and any move payload, dropping it if malformed
//! 2. Record the sender as the session's data address (last writer wins)
//! 3. Drop it if no active session holds the auth id
//! 4. Apply the move update
//! 5. Broadcast a fresh snapshot to every bound session and to the sender
//!
//! Nothing orders datagrams against each other. A stale move processed after
//! a newer one briefly wins until the next update arrives.

use crate::error::{DatagramError, ServerError};
use crate::registry::{AddressBinding, MoveOutcome, SessionRegistry};
use crate::supervisor::shutdown_requested;
use log::{debug, error, info, warn};
use shared::{Frame, Packet, PacketType};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;

const RECV_BUFFER_SIZE: usize = 2048;

/// Auth id carried by server broadcasts, never issued to a session
pub const BROADCAST_AUTH_ID: u32 = 0;

#[derive(Debug)]
struct Datagram {
    bytes: Vec<u8>,
    from: SocketAddr,
}

pub struct SyncServer {
    socket: Arc<UdpSocket>,
    registry: Arc<SessionRegistry>,
    workers: usize,
    queue_depth: usize,
}

impl SyncServer {
    pub async fn bind(
        addr: &str,
        registry: Arc<SessionRegistry>,
        workers: usize,
        queue_depth: usize,
    ) -> Result<Self, ServerError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        info!("Sync server listening on {}", socket.local_addr()?);

        Ok(Self {
            socket: Arc::new(socket),
            registry,
            workers: workers.max(1),
            queue_depth: queue_depth.max(1),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receives datagrams until shutdown is signalled, then lets the workers
    /// drain the queue and waits for them to exit
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ServerError> {
        let (queue_tx, queue_rx) = mpsc::channel::<Datagram>(self.queue_depth);
        let queue_rx = Arc::new(Mutex::new(queue_rx));

        let mut workers = JoinSet::new();
        for worker_id in 0..self.workers {
            workers.spawn(run_worker(
                worker_id,
                Arc::clone(&queue_rx),
                Arc::clone(&self.socket),
                Arc::clone(&self.registry),
            ));
        }

        let mut buffer = [0u8; RECV_BUFFER_SIZE];

        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,

                received = self.socket.recv_from(&mut buffer) => match received {
                    Ok((len, from)) => {
                        let datagram = Datagram {
                            bytes: buffer[..len].to_vec(),
                            from,
                        };
                        match queue_tx.try_send(datagram) {
                            Ok(()) => {}
                            Err(TrySendError::Full(datagram)) => {
                                debug!("Sync queue full, dropping datagram from {}", datagram.from);
                            }
                            Err(TrySendError::Closed(_)) => {
                                error!("All sync workers exited");
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
            }
        }

        drop(queue_tx);

        let mut result = Ok(());
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Sync worker failed: {}", e);
                result = Err(ServerError::Task(e));
            }
        }

        info!("Sync server stopped");
        result
    }
}

async fn run_worker(
    worker_id: usize,
    queue: Arc<Mutex<mpsc::Receiver<Datagram>>>,
    socket: Arc<UdpSocket>,
    registry: Arc<SessionRegistry>,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(datagram) = next else {
            break;
        };

        match handle_datagram(&socket, &registry, &datagram.bytes, datagram.from).await {
            Ok(sent) => debug!(
                "Worker {} fanned out sync to {} addresses",
                worker_id, sent
            ),
            Err(e @ (DatagramError::Malformed(_) | DatagramError::Unauthorized(_))) => {
                debug!("Dropping datagram from {}: {}", datagram.from, e)
            }
            Err(e) => warn!("Datagram from {} failed: {}", datagram.from, e),
        }
    }
}

/// Runs the full per-datagram pipeline, returning how many sync frames went out
pub async fn handle_datagram(
    socket: &UdpSocket,
    registry: &SessionRegistry,
    bytes: &[u8],
    from: SocketAddr,
) -> Result<usize, DatagramError> {
    let frame = Frame::decode(bytes)?;

    // a move of the wrong width must not rebind the sender
    let movement = match frame.packet_type() {
        Some(PacketType::Move) => match Packet::from_frame(&frame)? {
            Some(Packet::Move { session_id, x, y }) => Some((session_id, x, y)),
            _ => None,
        },
        _ => None,
    };

    match registry.bind_data_address(frame.auth_id, from) {
        AddressBinding::Unknown => return Err(DatagramError::Unauthorized(frame.auth_id)),
        AddressBinding::Bound => debug!("Data address {} bound", from),
        AddressBinding::Migrated { previous } => {
            info!("Data address migrated from {} to {}", previous, from)
        }
        AddressBinding::Unchanged => {}
    }

    if let Some((session_id, x, y)) = movement {
        apply_move(registry, frame.auth_id, session_id, x, y);
    }

    broadcast(socket, registry, from).await
}

fn apply_move(registry: &SessionRegistry, auth_id: u32, session_id: u32, x: u32, y: u32) {
    match registry.move_session(auth_id, session_id, f64::from(x), f64::from(y)) {
        MoveOutcome::Applied => {}
        MoveOutcome::Foreign { own_session_id } => warn!(
            "Session {} sent a move for session {}, ignoring",
            own_session_id, session_id
        ),
        // evicted since the address was bound
        MoveOutcome::Unknown => {}
    }
}

async fn broadcast(
    socket: &UdpSocket,
    registry: &SessionRegistry,
    sender: SocketAddr,
) -> Result<usize, DatagramError> {
    let (positions, mut targets) = registry.broadcast_view();
    if !targets.contains(&sender) {
        targets.push(sender);
    }

    let bytes = Packet::Sync { positions }
        .encode(BROADCAST_AUTH_ID)
        .map_err(DatagramError::Encode)?;

    let mut sent = 0;
    for addr in targets {
        match socket.send_to(&bytes, addr).await {
            Ok(_) => sent += 1,
            Err(e) => warn!("Failed to send sync to {}: {}", addr, e),
        }
    }
    Ok(sent)
}
