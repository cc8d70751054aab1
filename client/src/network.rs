use log::{debug, info, warn};
use shared::{
    CodecError, DisconnectReason, Frame, MalformedFrame, Packet, PacketType, Snapshot,
    MAX_DATAGRAM_SIZE,
};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{timeout, timeout_at, Instant};

const READ_CHUNK_SIZE: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("server closed the control connection")]
    Closed,
    #[error("expected {expected:?} during handshake, got frame type {actual}")]
    UnexpectedFrame { expected: PacketType, actual: u32 },
    #[error("invalid address {0}")]
    Address(String),
    #[error(transparent)]
    Malformed(#[from] MalformedFrame),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

/// A joined session: control stream plus a datagram socket aimed at the sync server
#[derive(Debug)]
pub struct Client {
    control: TcpStream,
    data: UdpSocket,
    auth_id: u32,
    session_id: u32,
    map: Vec<u8>,
    initial_peers: Snapshot,
}

impl Client {
    /// Performs the full handshake and returns once onboarding data has arrived
    pub async fn connect(
        control_addr: &str,
        data_addr: &str,
        name: &str,
    ) -> Result<Self, ClientError> {
        let data_addr: SocketAddr = data_addr
            .parse()
            .map_err(|_| ClientError::Address(data_addr.to_string()))?;

        info!("Connecting to control server at {}", control_addr);
        let mut control = TcpStream::connect(control_addr).await?;
        control
            .write_all(&Packet::join_request(name).encode(0)?)
            .await?;

        let mut buffer = Vec::new();

        let response = read_frame(&mut control, &mut buffer).await?;
        let session_id = match Packet::from_frame(&response)? {
            Some(Packet::JoinResponse { session_id }) => session_id,
            _ => return Err(unexpected(PacketType::JoinResponse, &response)),
        };
        let auth_id = response.auth_id;

        let frame = read_frame(&mut control, &mut buffer).await?;
        let map = match Packet::from_frame(&frame)? {
            Some(Packet::MapData { tiles }) => tiles,
            _ => return Err(unexpected(PacketType::MapData, &frame)),
        };

        let frame = read_frame(&mut control, &mut buffer).await?;
        let initial_peers = match Packet::from_frame(&frame)? {
            Some(Packet::InitialData { positions }) => positions,
            _ => return Err(unexpected(PacketType::InitialData, &frame)),
        };

        let local: SocketAddr = if data_addr.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        }
        .parse()
        .map_err(|_| ClientError::Address(data_addr.to_string()))?;
        let data = UdpSocket::bind(local).await?;
        data.connect(data_addr).await?;

        info!(
            "Joined as session {} ({} map bytes, {} peers)",
            session_id,
            map.len(),
            initial_peers.len()
        );

        Ok(Self {
            control,
            data,
            auth_id,
            session_id,
            map,
            initial_peers,
        })
    }

    pub fn auth_id(&self) -> u32 {
        self.auth_id
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn map(&self) -> &[u8] {
        &self.map
    }

    /// Peers that were active when this session joined
    pub fn initial_peers(&self) -> &Snapshot {
        &self.initial_peers
    }

    pub fn local_data_addr(&self) -> io::Result<SocketAddr> {
        self.data.local_addr()
    }

    /// Registers the data address without moving
    pub async fn announce(&self) -> Result<(), ClientError> {
        self.send_frame(&Frame::new(PacketType::Sync, self.auth_id, Vec::new()))
            .await
    }

    pub async fn send_move(&self, x: u32, y: u32) -> Result<(), ClientError> {
        let packet = Packet::Move {
            session_id: self.session_id,
            x,
            y,
        };
        self.send_frame(&packet.to_frame(self.auth_id)?).await
    }

    /// Sends an arbitrary frame over the data channel
    pub async fn send_frame(&self, frame: &Frame) -> Result<(), ClientError> {
        self.data.send(&frame.encode()).await?;
        Ok(())
    }

    /// Waits up to `wait` for the next snapshot, skipping anything else
    pub async fn recv_sync(&self, wait: Duration) -> Result<Option<Snapshot>, ClientError> {
        let mut datagram = vec![0u8; MAX_DATAGRAM_SIZE];

        let deadline = Instant::now() + wait;
        loop {
            let len = match timeout_at(deadline, self.data.recv(&mut datagram)).await {
                Ok(received) => received?,
                Err(_) => return Ok(None),
            };

            let decoded = Frame::decode(&datagram[..len])
                .map_err(CodecError::from)
                .and_then(|frame| Packet::from_frame(&frame));
            match decoded {
                Ok(Some(Packet::Sync { positions })) => return Ok(Some(positions)),
                Ok(_) => debug!("Ignoring non-sync datagram"),
                Err(e) => warn!("Dropping malformed datagram: {}", e),
            }
        }
    }

    /// Sends a disconnect notice and waits briefly for the server to close
    pub async fn disconnect(mut self, reason: DisconnectReason) -> Result<(), ClientError> {
        let bytes = Packet::disconnect(reason).encode(self.auth_id)?;
        self.control.write_all(&bytes).await?;

        let mut chunk = [0u8; READ_CHUNK_SIZE];
        match timeout(Duration::from_secs(1), self.control.read(&mut chunk)).await {
            Ok(Ok(0)) => debug!("Server closed session {}", self.session_id),
            Ok(Ok(_)) => debug!("Unexpected bytes after disconnect"),
            Ok(Err(e)) => debug!("Control stream error after disconnect: {}", e),
            Err(_) => warn!("Server kept session {} open after disconnect", self.session_id),
        }
        Ok(())
    }
}

async fn read_frame(stream: &mut TcpStream, buffer: &mut Vec<u8>) -> Result<Frame, ClientError> {
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        if let Some(frame) = Frame::take_from(buffer)? {
            return Ok(frame);
        }
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Err(ClientError::Closed);
        }
        buffer.extend_from_slice(&chunk[..read]);
    }
}

fn unexpected(expected: PacketType, frame: &Frame) -> ClientError {
    ClientError::UnexpectedFrame {
        expected,
        actual: frame.kind,
    }
}
