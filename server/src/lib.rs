//! # Session Server Library
//!
//! This library implements the server side of a small real-time multiplayer
//! session protocol. Clients join over a reliable stream, then exchange
//! position updates and world snapshots over datagrams.
//!
//! ## Core Responsibilities
//!
//! ### Session Lifecycle
//! Every client connection goes through a short handshake:
//! - The client sends a join request carrying its display name
//! - The server allocates a secret auth id and a public session id
//! - The server replies with the session id, the world map, and the
//!   positions of every other active session
//!
//! The session stays active for as long as the control connection is open.
//! It is evicted when the client sends a disconnect notice, when the stream
//! fails, or when the server shuts down.
//!
//! ### Position Synchronization
//! Datagrams tagged with a valid auth id bind the sender's address to that
//! session. A move datagram updates the session's position, and every valid
//! datagram triggers a snapshot broadcast to all bound sessions.
//!
//! ## Architecture Design
//!
//! ### Shared Registry
//! A single [`SessionRegistry`] is shared between the control and sync
//! servers. Each operation holds its lock briefly and never across an await,
//! so eviction can run from a destructor.
//!
//! ### Task Layout
//! - **Control Server**: one accept loop plus one task per connection
//! - **Sync Server**: one receive loop feeding a bounded queue and a fixed
//!   pool of workers
//! - **Supervisor**: owns the shutdown signal and waits for both servers
//!
//! ## Module Organization
//!
//! - The packet codec lives in the `shared` crate
//! - [`registry`]: auth and session id allocation plus per-session state
//! - [`control`]: handshake and lifecycle over TCP
//! - [`sync`]: datagram validation, move updates and snapshot fan-out
//! - [`supervisor`]: startup and coordinated shutdown
//! - [`world`]: map asset loading
//! - [`config`] and [`error`]: runtime settings and error types
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::{Server, ServerConfig, WorldMap};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let server = Server::start(&config, WorldMap::default()).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!
//!     // Returns once both servers stopped and every session was evicted
//!     server.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Ordering
//!
//! Datagrams are processed concurrently by the worker pool with no sequence
//! numbers. Updates from one client can be applied out of order, and the last
//! update processed wins.

pub mod config;
pub mod control;
pub mod error;
pub mod registry;
pub mod supervisor;
pub mod sync;
pub mod world;

pub use config::ServerConfig;
pub use error::{ConnectionError, DatagramError, ServerError};
pub use registry::{
    AddressBinding, Allocation, MoveOutcome, RegistryError, Session, SessionRegistry,
};
pub use supervisor::Server;
pub use world::{MapError, WorldMap};
