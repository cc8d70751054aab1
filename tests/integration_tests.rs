//! Integration tests for the session server and client
//!
//! These tests run both servers on ephemeral loopback ports and drive them
//! with real sockets.

use client::Client;
use server::{Server, ServerConfig, WorldMap};
use shared::{DisconnectReason, Frame, Packet, PacketType, Position, Snapshot};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{sleep, timeout, Instant};
use tokio_test::{assert_err, assert_ok};

const WAIT: Duration = Duration::from_millis(500);

async fn start_server() -> Server {
    start_with(ServerConfig::ephemeral()).await
}

async fn start_with(config: ServerConfig) -> Server {
    Server::start(&config, WorldMap::default())
        .await
        .expect("Failed to start server")
}

async fn join(server: &Server, name: &str) -> Client {
    let control_addr = server.control_addr().to_string();
    let data_addr = server.data_addr().to_string();
    let client = Client::connect(
        &control_addr,
        &data_addr,
        name,
    );
    timeout(WAIT, client)
        .await
        .expect("Handshake timed out")
        .expect("Handshake failed")
}

/// Polls until `condition` holds or a second has passed
async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Reads one frame from a raw control stream
async fn read_raw_frame(stream: &mut TcpStream, buffer: &mut Vec<u8>) -> Option<Frame> {
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(frame) = Frame::take_from(buffer).unwrap() {
            return Some(frame);
        }
        match timeout(WAIT, stream.read(&mut chunk)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => return None,
            Ok(Ok(n)) => buffer.extend_from_slice(&chunk[..n]),
        }
    }
}

/// HANDSHAKE TESTS
mod handshake_tests {
    use super::*;

    /// A join is answered with a session id, a fresh auth id, then onboarding
    #[tokio::test]
    async fn join_assigns_increasing_session_ids() {
        let server = start_server().await;

        let warmup = join(&server, "warmup").await;
        let alice = join(&server, "alice").await;
        let bob = join(&server, "bob").await;

        assert_eq!(warmup.session_id(), 1);
        assert_eq!(alice.session_id(), 2);
        assert_eq!(bob.session_id(), 3);

        assert_ne!(alice.auth_id(), 0);
        assert_ne!(bob.auth_id(), 0);
        assert_ne!(alice.auth_id(), bob.auth_id());
        assert_ne!(alice.auth_id(), warmup.auth_id());

        let session = server.registry().get(alice.auth_id()).unwrap();
        assert_eq!(session.name, "alice");
        assert_eq!(session.session_id, 2);

        server.stop().await.unwrap();
    }

    /// Onboarding carries the map and every other session, never the joiner
    #[tokio::test]
    async fn onboarding_sends_map_and_peers() {
        let server = start_server().await;

        let first = join(&server, "first").await;
        assert!(first.initial_peers().is_empty());
        assert_eq!(first.map(), server.world().tiles());

        let second = join(&server, "second").await;
        let peers = second.initial_peers();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[&first.session_id()], Position::default());
        assert!(!peers.contains_key(&second.session_id()));

        server.stop().await.unwrap();
    }

    /// Checks the handshake byte for byte without the client library
    #[tokio::test]
    async fn raw_handshake_wire_format() {
        let server = start_server().await;
        let mut stream = TcpStream::connect(server.control_addr()).await.unwrap();
        stream
            .write_all(&Packet::join_request("raw").encode(0).unwrap())
            .await
            .unwrap();

        let mut buffer = Vec::new();
        let response = read_raw_frame(&mut stream, &mut buffer).await.unwrap();
        assert_eq!(response.packet_type(), Some(PacketType::JoinResponse));
        assert_eq!(response.payload, 1u32.to_le_bytes());
        assert_ne!(response.auth_id, 0);

        let map = read_raw_frame(&mut stream, &mut buffer).await.unwrap();
        assert_eq!(map.packet_type(), Some(PacketType::MapData));
        assert_eq!(map.auth_id, response.auth_id);
        assert_eq!(map.payload.len(), 576);

        let initial = read_raw_frame(&mut stream, &mut buffer).await.unwrap();
        assert_eq!(initial.packet_type(), Some(PacketType::InitialData));
        let peers: Snapshot = bincode::deserialize(&initial.payload).unwrap();
        assert!(peers.is_empty());

        server.stop().await.unwrap();
    }

    /// A connection whose first frame is not a join is closed without a session
    #[tokio::test]
    async fn non_join_first_frame_is_rejected() {
        let server = start_server().await;
        let mut stream = TcpStream::connect(server.control_addr()).await.unwrap();

        let movement = Packet::Move {
            session_id: 1,
            x: 1,
            y: 1,
        };
        stream
            .write_all(&movement.encode(1).unwrap())
            .await
            .unwrap();

        let mut buffer = Vec::new();
        assert!(read_raw_frame(&mut stream, &mut buffer).await.is_none());
        assert!(server.registry().is_empty());

        server.stop().await.unwrap();
    }

    /// A full id space turns new joins away without affecting live sessions
    #[tokio::test]
    async fn exhausted_id_space_rejects_join() {
        let server = start_with(ServerConfig {
            auth_id_space: 3,
            ..ServerConfig::ephemeral()
        })
        .await;

        let a = join(&server, "a").await;
        let b = join(&server, "b").await;
        let control_addr = server.control_addr().to_string();
        let data_addr = server.data_addr().to_string();
        let rejected = Client::connect(
            &control_addr,
            &data_addr,
            "c",
        );
        assert_err!(timeout(WAIT, rejected).await.unwrap());
        assert_eq!(server.registry().len(), 2);
        assert_eq!(server.rejected_joins(), 1);

        // A freed id can be handed out again
        assert_ok!(a.disconnect(DisconnectReason::Expected).await);
        assert!(eventually(|| server.registry().len() == 1).await);
        let c = join(&server, "c").await;
        assert_eq!(c.session_id(), 3);
        assert_ne!(c.auth_id(), b.auth_id());

        server.stop().await.unwrap();
    }
}

/// DATA CHANNEL TESTS
mod sync_tests {
    use super::*;

    /// A move from one session reaches every bound session
    #[tokio::test]
    async fn move_is_broadcast_to_all_sessions() {
        let server = start_server().await;
        let one = join(&server, "one").await;
        let two = join(&server, "two").await;
        assert_eq!(one.session_id(), 1);

        two.announce().await.unwrap();
        let announced = two.recv_sync(WAIT).await.unwrap().unwrap();
        assert_eq!(announced.len(), 2);

        one.send_move(10, 20).await.unwrap();

        for client in [&one, &two] {
            let positions = client.recv_sync(WAIT).await.unwrap().unwrap();
            assert_eq!(positions[&1], Position::new(10.0, 20.0));
            assert_eq!(positions[&2], Position::default());
        }

        server.stop().await.unwrap();
    }

    /// Datagrams with an unknown auth id change nothing and get no reply
    #[tokio::test]
    async fn unknown_auth_id_is_dropped() {
        let server = start_server().await;
        let alice = join(&server, "alice").await;
        alice.announce().await.unwrap();
        assert!(alice.recv_sync(WAIT).await.unwrap().is_some());

        let bogus = (1..).find(|id| server.registry().get(*id).is_none()).unwrap();
        let spoofer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let movement = Packet::Move {
            session_id: alice.session_id(),
            x: 99,
            y: 99,
        };
        spoofer
            .send_to(&movement.encode(bogus).unwrap(), server.data_addr())
            .await
            .unwrap();

        let mut buffer = [0u8; 2048];
        assert_err!(
            timeout(Duration::from_millis(200), spoofer.recv_from(&mut buffer)).await
        );
        assert!(alice.recv_sync(Duration::from_millis(200)).await.unwrap().is_none());
        assert_eq!(
            server.registry().snapshot(None)[&alice.session_id()],
            Position::default()
        );

        server.stop().await.unwrap();
    }

    /// Frames with a bad magic number are discarded before any session lookup
    #[tokio::test]
    async fn bad_magic_is_discarded() {
        let server = start_server().await;
        let alice = join(&server, "alice").await;

        let mut bytes = Packet::Move {
            session_id: alice.session_id(),
            x: 3,
            y: 4,
        }
        .encode(alice.auth_id())
        .unwrap();
        bytes[..4].copy_from_slice(&0xCAFE_BABEu32.to_le_bytes());

        alice.announce().await.unwrap();
        assert!(alice.recv_sync(WAIT).await.unwrap().is_some());
        let bound = server.registry().get(alice.auth_id()).unwrap().data_addr;

        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        raw.send_to(&bytes, server.data_addr()).await.unwrap();

        assert!(alice.recv_sync(Duration::from_millis(200)).await.unwrap().is_none());
        let session = server.registry().get(alice.auth_id()).unwrap();
        assert_eq!(session.position, Position::default());
        assert_eq!(session.data_addr, bound);

        server.stop().await.unwrap();
    }
}

/// LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    /// An abrupt close removes the session from later snapshots
    #[tokio::test]
    async fn abrupt_close_evicts_session() {
        let server = start_server().await;
        let stays = join(&server, "stays").await;
        let leaves = join(&server, "leaves").await;
        let gone = leaves.session_id();

        drop(leaves);
        assert!(eventually(|| !server.registry().snapshot(None).contains_key(&gone)).await);

        stays.announce().await.unwrap();
        let positions = stays.recv_sync(WAIT).await.unwrap().unwrap();
        assert!(!positions.contains_key(&gone));
        assert!(positions.contains_key(&stays.session_id()));

        server.stop().await.unwrap();
    }

    /// A disconnect notice evicts the session and the server closes the stream
    #[tokio::test]
    async fn disconnect_notice_evicts_session() {
        let server = start_server().await;
        let client = join(&server, "polite").await;
        let auth_id = client.auth_id();

        assert_ok!(client.disconnect(DisconnectReason::Expected).await);
        assert!(eventually(|| server.registry().get(auth_id).is_none()).await);

        server.stop().await.unwrap();
    }

    /// Stopping waits for both servers and leaves no session behind
    #[tokio::test]
    async fn stop_evicts_every_session() {
        let server = start_server().await;
        let clients = vec![join(&server, "a").await, join(&server, "b").await];
        for client in &clients {
            client.announce().await.unwrap();
        }
        let registry = std::sync::Arc::clone(server.registry());
        assert_eq!(registry.len(), 2);

        timeout(Duration::from_secs(2), server.stop())
            .await
            .unwrap()
            .unwrap();
        assert!(registry.is_empty());
    }
}
