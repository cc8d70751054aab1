use log::debug;
use shared::{Position, Snapshot};

/// What changed between two consecutive snapshots
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SyncDelta {
    pub joined: Vec<u32>,
    pub left: Vec<u32>,
    pub moved: Vec<u32>,
}

impl SyncDelta {
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty() && self.moved.is_empty()
    }
}

/// Client-side picture of the world, rebuilt from every snapshot
#[derive(Debug, Clone)]
pub struct ClientGameState {
    pub session_id: u32,
    pub map: Vec<u8>,
    pub positions: Snapshot,
    pub snapshots_applied: u64,
}

impl ClientGameState {
    pub fn new(session_id: u32, map: Vec<u8>, initial_peers: Snapshot) -> Self {
        let mut positions = initial_peers;
        positions.entry(session_id).or_default();
        Self {
            session_id,
            map,
            positions,
            snapshots_applied: 0,
        }
    }

    /// Replaces the known positions with the server's and reports the difference
    pub fn apply_sync(&mut self, snapshot: Snapshot) -> SyncDelta {
        let mut delta = SyncDelta::default();

        for (id, position) in &snapshot {
            match self.positions.get(id) {
                None => delta.joined.push(*id),
                Some(previous) if previous != position => delta.moved.push(*id),
                Some(_) => {}
            }
        }
        delta.left = self
            .positions
            .keys()
            .filter(|id| !snapshot.contains_key(id))
            .copied()
            .collect();

        self.positions = snapshot;
        self.snapshots_applied += 1;

        if !delta.is_empty() {
            debug!(
                "Snapshot {}: {} joined, {} left, {} moved",
                self.snapshots_applied,
                delta.joined.len(),
                delta.left.len(),
                delta.moved.len()
            );
        }
        delta
    }

    pub fn own_position(&self) -> Option<Position> {
        self.positions.get(&self.session_id).copied()
    }

    /// Positions of every session except this one
    pub fn peers(&self) -> impl Iterator<Item = (&u32, &Position)> {
        self.positions
            .iter()
            .filter(move |(id, _)| **id != self.session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn snapshot(entries: &[(u32, f64, f64)]) -> Snapshot {
        entries
            .iter()
            .map(|&(id, x, y)| (id, Position::new(x, y)))
            .collect()
    }

    #[test]
    fn test_new_includes_self_at_origin() {
        let state = ClientGameState::new(3, vec![b'0'; 4], snapshot(&[(1, 5.0, 5.0)]));
        assert_eq!(state.own_position(), Some(Position::default()));
        assert_eq!(state.peers().count(), 1);
    }

    #[test]
    fn test_apply_sync_reports_changes() {
        let mut state = ClientGameState::new(2, Vec::new(), snapshot(&[(1, 0.0, 0.0)]));

        let delta = state.apply_sync(snapshot(&[(2, 1.0, 0.0), (4, 0.0, 0.0)]));
        assert_eq!(delta.joined, vec![4]);
        assert_eq!(delta.left, vec![1]);
        assert_eq!(delta.moved, vec![2]);
        assert_eq!(state.snapshots_applied, 1);

        let own = state.own_position().unwrap();
        assert_approx_eq!(own.x, 1.0);
        assert_approx_eq!(own.y, 0.0);
    }

    #[test]
    fn test_identical_snapshot_is_empty_delta() {
        let mut state = ClientGameState::new(1, Vec::new(), Snapshot::new());
        assert!(state.apply_sync(snapshot(&[(1, 0.0, 0.0)])).is_empty());
    }
}
