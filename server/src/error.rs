//! Error taxonomy for the session server
//!
//! Errors are scoped to what they can take down: a [`ConnectionError`] ends one
//! control connection, a [`DatagramError`] drops one datagram, and only a
//! [`ServerError`] reaches the supervisor.

use crate::registry::RegistryError;
use crate::world::MapError;
use shared::{CodecError, MalformedFrame};
use std::io;

/// Reasons one control connection ends
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("peer closed the connection")]
    Closed,
    #[error("server is shutting down")]
    Shutdown,
    #[error("handshake rejected: first frame was type {0}, not a join request")]
    Rejected(u32),
    #[error(transparent)]
    Malformed(#[from] MalformedFrame),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Exhausted(#[from] RegistryError),
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

/// Reasons a datagram is dropped without response
#[derive(Debug, thiserror::Error)]
pub enum DatagramError {
    #[error(transparent)]
    Malformed(#[from] CodecError),
    #[error("no active session for auth id {0}")]
    Unauthorized(u32),
    #[error("failed to encode snapshot: {0}")]
    Encode(CodecError),
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

impl From<MalformedFrame> for DatagramError {
    fn from(err: MalformedFrame) -> Self {
        DatagramError::Malformed(CodecError::MalformedFrame(err))
    }
}

/// Failures fatal to a server component
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error(transparent)]
    Map(#[from] MapError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("component task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
