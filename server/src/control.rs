//! Control server handling the reliable channel
//!
//! Each accepted connection runs in its own task and walks through
//! `Connected -> Authenticating -> Onboarded -> Active -> Closed`:
//! - The first frame must be a join request, otherwise the connection is
//!   dropped without a reply
//! - A successful join allocates a session and answers with its session id,
//!   keyed by the new auth id
//! - The map and a snapshot of the peers follow immediately
//! - The connection then only watches for a disconnect notice or for the peer
//!   going away
//!
//! Whatever ends a connection, its session is evicted from the registry before
//! the task exits.

use crate::error::{ConnectionError, ServerError};
use crate::registry::{Allocation, SessionRegistry};
use crate::supervisor::shutdown_requested;
use crate::world::WorldMap;
use log::{debug, error, info, warn};
use shared::{decode_name, DisconnectReason, Frame, Packet, PacketType};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;

const READ_CHUNK_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Authenticating,
    Onboarded,
    Active,
    Closed,
}

/// Accepts control connections and spawns one task per connection
pub struct ControlServer {
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
    world: Arc<WorldMap>,
}

impl ControlServer {
    pub async fn bind(
        addr: &str,
        registry: Arc<SessionRegistry>,
        world: Arc<WorldMap>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        info!("Control server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            registry,
            world,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until shutdown is signalled, then waits for every
    /// connection task to finish its cleanup
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ServerError> {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("Connection request from {}", peer);
                        let connection = Connection::new(
                            stream,
                            peer,
                            Arc::clone(&self.registry),
                            Arc::clone(&self.world),
                        );
                        connections.spawn(connection.run(shutdown.clone()));
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },

                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!("Connection task failed: {}", e);
                    }
                }
            }
        }

        drop(self.listener);
        debug!(
            "Control server stopping, {} connections open",
            connections.len()
        );

        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                error!("Connection task failed: {}", e);
            }
        }

        info!("Control server stopped");
        Ok(())
    }
}

/// Evicts the session when dropped, covering early returns, cancellation and panics
struct SessionGuard {
    registry: Arc<SessionRegistry>,
    allocation: Allocation,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.deactivate(self.allocation.auth_id);
    }
}

struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    buffer: Vec<u8>,
    state: ConnectionState,
    registry: Arc<SessionRegistry>,
    world: Arc<WorldMap>,
}

impl Connection {
    fn new(
        stream: TcpStream,
        peer: SocketAddr,
        registry: Arc<SessionRegistry>,
        world: Arc<WorldMap>,
    ) -> Self {
        Self {
            stream,
            peer,
            buffer: Vec::new(),
            state: ConnectionState::Connected,
            registry,
            world,
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        debug!("{}: {:?} -> {:?}", self.peer, self.state, next);
        self.state = next;
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let result = self.session(&mut shutdown).await;
        self.transition(ConnectionState::Closed);

        match result {
            Ok(()) => {}
            Err(ConnectionError::Closed) => debug!("{} closed the connection", self.peer),
            Err(ConnectionError::Shutdown) => debug!("Closing {} for shutdown", self.peer),
            Err(e @ (ConnectionError::Rejected(_) | ConnectionError::Exhausted(_))) => {
                warn!("Rejected handshake from {}: {}", self.peer, e)
            }
            Err(e) => warn!("Connection {} failed: {}", self.peer, e),
        }
    }

    async fn session(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), ConnectionError> {
        self.transition(ConnectionState::Authenticating);
        let guard = self.authenticate(shutdown).await?;

        self.onboard(guard.allocation).await?;
        self.transition(ConnectionState::Onboarded);

        info!("{} authorized as session {}", self.peer, guard.allocation.session_id);
        self.transition(ConnectionState::Active);
        self.serve(guard.allocation, shutdown).await
    }

    async fn authenticate(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionGuard, ConnectionError> {
        let frame = self.read_frame(shutdown).await?;

        let name = match Packet::from_frame(&frame) {
            Ok(Some(Packet::JoinRequest { name })) => decode_name(&name),
            _ => return Err(ConnectionError::Rejected(frame.kind)),
        };

        let allocation = self.registry.allocate(self.peer, &name)?;
        let guard = SessionGuard {
            registry: Arc::clone(&self.registry),
            allocation,
        };

        let response = Packet::JoinResponse {
            session_id: allocation.session_id,
        };
        self.send(&response, allocation.auth_id).await?;

        Ok(guard)
    }

    async fn onboard(&mut self, allocation: Allocation) -> Result<(), ConnectionError> {
        debug!("Sending map data to session {}", allocation.session_id);
        let map = Packet::MapData {
            tiles: self.world.tiles().to_vec(),
        };
        self.send(&map, allocation.auth_id).await?;

        let peers = Packet::InitialData {
            positions: self.registry.snapshot(Some(allocation.auth_id)),
        };
        self.send(&peers, allocation.auth_id).await
    }

    /// Waits for a disconnect notice or for the peer to go away
    async fn serve(
        &mut self,
        allocation: Allocation,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), ConnectionError> {
        loop {
            let frame = self.read_frame(shutdown).await?;

            if frame.packet_type() != Some(PacketType::Disconnect) {
                debug!(
                    "Ignoring frame type {} on control channel of session {}",
                    frame.kind, allocation.session_id
                );
                continue;
            }

            if frame.auth_id != allocation.auth_id {
                warn!(
                    "Session {} sent a disconnect carrying a foreign auth id",
                    allocation.session_id
                );
            }

            match Packet::from_frame(&frame) {
                Ok(Some(Packet::Disconnect { reason })) => {
                    match DisconnectReason::from_code(reason) {
                        Some(reason) => info!(
                            "Session {} disconnecting ({:?})",
                            allocation.session_id, reason
                        ),
                        None => info!(
                            "Session {} disconnecting (reason code {})",
                            allocation.session_id, reason
                        ),
                    }
                }
                _ => info!(
                    "Session {} disconnecting with malformed notice",
                    allocation.session_id
                ),
            }
            return Ok(());
        }
    }

    async fn read_frame(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Frame, ConnectionError> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        loop {
            if let Some(frame) = Frame::take_from(&mut self.buffer)? {
                return Ok(frame);
            }

            let read = tokio::select! {
                read = self.stream.read(&mut chunk) => read?,
                _ = shutdown_requested(shutdown) => return Err(ConnectionError::Shutdown),
            };

            if read == 0 {
                return Err(ConnectionError::Closed);
            }
            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }

    async fn send(&mut self, packet: &Packet, auth_id: u32) -> Result<(), ConnectionError> {
        let bytes = packet.encode(auth_id)?;
        self.stream.write_all(&bytes).await?;
        Ok(())
    }
}
