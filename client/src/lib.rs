//! # Session Client Library
//!
//! Headless client for the session server. It performs the join handshake
//! over the control stream, then talks to the sync server over datagrams.
//!
//! ## Connection Flow
//!
//! 1. Open the control stream and send a join request with a display name
//! 2. Read the join response; its header carries the secret auth id
//! 3. Read the world map and the positions of peers already present
//! 4. Bind a datagram socket and start sending moves tagged with the auth id
//!
//! Every accepted datagram makes the server broadcast a full snapshot, so a
//! client learns about peers by listening on the same socket it sends from.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! [`Client`] owns both sockets and exposes the protocol operations.
//!
//! ### Game Module (`game`)
//! [`ClientGameState`] keeps the latest snapshot and reports which sessions
//! joined, left or moved since the previous one.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::Client;
//! use shared::DisconnectReason;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::connect("127.0.0.1:8881", "127.0.0.1:8888", "alice").await?;
//!
//!     client.send_move(10, 20).await?;
//!     if let Some(positions) = client.recv_sync(Duration::from_millis(500)).await? {
//!         println!("{} sessions in view", positions.len());
//!     }
//!
//!     client.disconnect(DisconnectReason::Expected).await?;
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod network;

pub use game::{ClientGameState, SyncDelta};
pub use network::{Client, ClientError};
