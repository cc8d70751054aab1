//! Session registry shared by the control and sync servers
//!
//! This module owns every piece of per-session state the server keeps:
//! - Auth id allocation from a bounded id space
//! - Public session id assignment
//! - Control and data channel addresses
//! - Last known position and liveness
//!
//! All access goes through [`SessionRegistry`], whose methods take a single
//! internal mutex. Nothing outside this module ever sees the underlying map,
//! so a snapshot can never observe a half-written session.

use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{Position, Snapshot, MAX_SNAPSHOT_ENTRIES};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::ops::Range;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Exclusive upper bound of the auth id space
///
/// Id 0 is reserved: clients send it before they hold a token and treat it as
/// a rejection when it comes back. Random allocation stays collision-free only
/// while active sessions remain well below this ceiling.
pub const AUTH_ID_SPACE: u32 = 20_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("all {capacity} auth ids are in use")]
    Exhausted { capacity: usize },
}

/// One authenticated client
#[derive(Debug, Clone)]
pub struct Session {
    /// Private routing token, valid on both channels
    pub auth_id: u32,
    /// Public identifier broadcast to peers
    pub session_id: u32,
    /// Display name from the join request
    pub name: String,
    /// Peer address of the control connection
    pub control_addr: SocketAddr,
    /// Source address of the latest datagram, unset until the first one arrives
    pub data_addr: Option<SocketAddr>,
    pub position: Position,
    pub active: bool,
}

/// Result of a move update checked against the sender's own session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Applied,
    /// The move named a session other than the sender's
    Foreign { own_session_id: u32 },
    /// No active session holds the auth id
    Unknown,
}

/// Identifiers handed out by [`SessionRegistry::allocate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub auth_id: u32,
    pub session_id: u32,
}

/// Result of recording a datagram's source address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressBinding {
    /// First datagram for this session
    Bound,
    /// Same address as before
    Unchanged,
    /// Session moved to a new address, last writer wins
    Migrated { previous: SocketAddr },
    /// No active session holds this auth id
    Unknown,
}

struct RegistryState {
    sessions: HashMap<u32, Session>,
    next_session_id: u32,
    rejected_joins: u64,
    rng: StdRng,
}

pub struct SessionRegistry {
    state: Mutex<RegistryState>,
    id_space: Range<u32>,
}

impl SessionRegistry {
    /// Creates a registry over the default id space `1..AUTH_ID_SPACE`
    ///
    /// A seed makes auth id allocation reproducible; without one the
    /// generator is seeded from the operating system.
    pub fn new(seed: Option<u64>) -> Self {
        Self::with_id_space(1..AUTH_ID_SPACE, seed)
    }

    pub fn with_id_space(id_space: Range<u32>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            state: Mutex::new(RegistryState {
                sessions: HashMap::new(),
                next_session_id: 1,
                rejected_joins: 0,
                rng,
            }),
            id_space,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Most sessions this registry holds at once
    ///
    /// Bounded by the id space and by how many entries one `SYNC` datagram
    /// can carry, whichever is smaller.
    pub fn capacity(&self) -> usize {
        self.id_space.len().min(MAX_SNAPSHOT_ENTRIES)
    }

    /// Joins turned away because the registry was full
    pub fn rejected_joins(&self) -> u64 {
        self.lock().rejected_joins
    }

    /// Creates a session for a freshly accepted control connection
    ///
    /// The auth id is drawn uniformly from the ids not currently in use and
    /// the session id is strictly greater than every one issued before.
    /// Fails with [`RegistryError::Exhausted`] once the registry is at capacity.
    pub fn allocate(
        &self,
        control_addr: SocketAddr,
        name: &str,
    ) -> Result<Allocation, RegistryError> {
        let mut state = self.lock();
        let capacity = self.capacity();
        let in_use = state.sessions.len();

        if in_use >= capacity {
            state.rejected_joins += 1;
            return Err(RegistryError::Exhausted { capacity });
        }

        let space = self.id_space.len();
        let auth_id = if in_use * 2 < space {
            // Sparse table: rejection sampling is uniform and terminates quickly
            loop {
                let candidate = state.rng.gen_range(self.id_space.clone());
                if !state.sessions.contains_key(&candidate) {
                    break candidate;
                }
            }
        } else {
            let nth = state.rng.gen_range(0..space - in_use);
            let free = self
                .id_space
                .clone()
                .filter(|id| !state.sessions.contains_key(id))
                .nth(nth);
            match free {
                Some(id) => id,
                None => return Err(RegistryError::Exhausted { capacity }),
            }
        };

        let session_id = state.next_session_id;
        state.next_session_id += 1;

        state.sessions.insert(
            auth_id,
            Session {
                auth_id,
                session_id,
                name: name.to_string(),
                control_addr,
                data_addr: None,
                position: Position::default(),
                active: true,
            },
        );

        info!(
            "Session {} ({:?}) joined from {}",
            session_id, name, control_addr
        );

        Ok(Allocation {
            auth_id,
            session_id,
        })
    }

    /// Records the source address of a datagram carrying `auth_id`
    pub fn bind_data_address(&self, auth_id: u32, addr: SocketAddr) -> AddressBinding {
        let mut state = self.lock();
        let Some(session) = state.sessions.get_mut(&auth_id).filter(|s| s.active) else {
            return AddressBinding::Unknown;
        };

        match session.data_addr.replace(addr) {
            None => AddressBinding::Bound,
            Some(previous) if previous == addr => AddressBinding::Unchanged,
            Some(previous) => AddressBinding::Migrated { previous },
        }
    }

    /// Overwrites a session's position
    ///
    /// Returns false, logging a warning, if no active session holds `auth_id`.
    pub fn update_position(&self, auth_id: u32, x: f64, y: f64) -> bool {
        let mut state = self.lock();
        match state.sessions.get_mut(&auth_id).filter(|s| s.active) {
            Some(session) => {
                session.position = Position::new(x, y);
                true
            }
            None => {
                warn!("Position update for unknown auth id {}", auth_id);
                false
            }
        }
    }

    /// Applies a move only if `session_id` is the sender's own, under one lock
    pub fn move_session(&self, auth_id: u32, session_id: u32, x: f64, y: f64) -> MoveOutcome {
        let mut state = self.lock();
        match state.sessions.get_mut(&auth_id).filter(|s| s.active) {
            Some(session) if session.session_id == session_id => {
                session.position = Position::new(x, y);
                MoveOutcome::Applied
            }
            Some(session) => MoveOutcome::Foreign {
                own_session_id: session.session_id,
            },
            None => MoveOutcome::Unknown,
        }
    }

    /// Marks a session inactive and evicts it
    ///
    /// Idempotent: returns the evicted session the first time and None after.
    pub fn deactivate(&self, auth_id: u32) -> Option<Session> {
        let mut session = self.lock().sessions.remove(&auth_id)?;
        session.active = false;
        info!("Session {} left", session.session_id);
        Some(session)
    }

    /// Deactivates every session, returning how many were evicted
    pub fn deactivate_all(&self) -> usize {
        let evicted: Vec<Session> = self
            .lock()
            .sessions
            .drain()
            .map(|(_, session)| session)
            .collect();

        for session in &evicted {
            info!("Session {} left (shutdown)", session.session_id);
        }
        evicted.len()
    }

    /// Point-in-time copy of every active session's position
    ///
    /// `excluding` names an auth id whose own entry is left out, used when a
    /// session is shown only its peers.
    pub fn snapshot(&self, excluding: Option<u32>) -> Snapshot {
        let state = self.lock();
        Self::collect_snapshot(&state, excluding)
    }

    /// Snapshot plus the data addresses to send it to, taken under one lock
    pub fn broadcast_view(&self) -> (Snapshot, Vec<SocketAddr>) {
        let state = self.lock();
        let addrs = state
            .sessions
            .values()
            .filter(|s| s.active)
            .filter_map(|s| s.data_addr)
            .collect();
        (Self::collect_snapshot(&state, None), addrs)
    }

    fn collect_snapshot(state: &RegistryState, excluding: Option<u32>) -> Snapshot {
        state
            .sessions
            .values()
            .filter(|s| s.active && Some(s.auth_id) != excluding)
            .map(|s| (s.session_id, s.position))
            .collect()
    }

    pub fn get(&self, auth_id: u32) -> Option<Session> {
        self.lock().sessions.get(&auth_id).cloned()
    }

    /// Copies of all active sessions ordered by session id, for status output
    pub fn sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .lock()
            .sessions
            .values()
            .filter(|s| s.active)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.session_id);
        sessions
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().sessions.is_empty()
    }
}
