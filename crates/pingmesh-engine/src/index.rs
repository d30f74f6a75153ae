//! Shared index of in-flight probes
//!
//! Two coupled structures, always mutated together under the engine's write
//! lock: an ordered map from insertion token to probe, and a reverse map from
//! `(destination, sequence)` to token. Every probe shares the engine-wide
//! timeout, so insertion order equals deadline order and the first entry of
//! the ordered map is always the earliest deadline. (Heterogeneous timeouts
//! would need a min-heap here instead.)

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;

use crate::probe::Probe;

/// Opaque, monotonically increasing insertion id. Stands in for the list-node
/// handle a pointer-based design would store in the reverse map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct ProbeToken(u64);

#[derive(Default)]
pub(crate) struct ProbeIndex {
    next_token: u64,
    by_deadline: BTreeMap<ProbeToken, Probe>,
    by_key: HashMap<IpAddr, HashMap<u16, ProbeToken>>,
}

impl ProbeIndex {
    /// Append a probe. FIFO order; the caller holds the write lock and is
    /// responsible for the expirer entry guard before releasing it.
    pub fn insert(&mut self, probe: Probe) -> ProbeToken {
        let token = ProbeToken(self.next_token);
        self.next_token += 1;
        self.by_deadline.insert(token, probe);
        self.by_key
            .entry(probe.ip)
            .or_default()
            .insert(probe.seq, token);
        token
    }

    /// Unlink a probe from both structures.
    pub fn remove_by_key(&mut self, ip: IpAddr, seq: u16) -> Option<Probe> {
        let seqs = self.by_key.get_mut(&ip)?;
        let token = seqs.remove(&seq)?;
        if seqs.is_empty() {
            self.by_key.remove(&ip);
        }
        self.by_deadline.remove(&token)
    }

    /// Copy of the earliest-deadline probe, so the caller can release the
    /// lock before sleeping on it.
    pub fn peek_earliest(&self) -> Option<Probe> {
        self.by_deadline.first_key_value().map(|(_, probe)| *probe)
    }

    /// Resolve a key to its token. Read-lock sufficient; an absent key means
    /// the probe already got its terminal event.
    pub fn lookup(&self, ip: IpAddr, seq: u16) -> Option<ProbeToken> {
        self.by_key.get(&ip)?.get(&seq).copied()
    }

    /// Drop every residual probe for a destination. Used at prober teardown
    /// so a cancelled run cannot strand entries.
    pub fn remove_destination(&mut self, ip: IpAddr) -> usize {
        let Some(seqs) = self.by_key.remove(&ip) else {
            return 0;
        };
        let removed = seqs.len();
        for (_, token) in seqs {
            self.by_deadline.remove(&token);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.by_deadline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_deadline.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn probe(ip: &str, seq: u16, offset_ms: u64) -> Probe {
        let sent_at = Instant::now() + Duration::from_millis(offset_ms);
        Probe {
            ip: ip.parse().unwrap(),
            seq,
            sent_at,
            deadline: sent_at + Duration::from_secs(1),
            fake_drop: false,
        }
    }

    #[test]
    fn insert_then_remove_couples_both_structures() {
        let mut index = ProbeIndex::default();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        index.insert(probe("10.0.0.1", 0, 0));
        index.insert(probe("10.0.0.1", 1, 1));
        assert_eq!(index.len(), 2);
        assert!(index.lookup(ip, 0).is_some());
        assert!(index.lookup(ip, 1).is_some());

        let removed = index.remove_by_key(ip, 0).unwrap();
        assert_eq!(removed.seq, 0);
        assert!(index.lookup(ip, 0).is_none());
        assert_eq!(index.len(), 1);

        assert!(index.remove_by_key(ip, 0).is_none());

        index.remove_by_key(ip, 1).unwrap();
        assert!(index.is_empty());
        assert!(index.peek_earliest().is_none());
    }

    #[test]
    fn peek_earliest_is_fifo() {
        let mut index = ProbeIndex::default();
        index.insert(probe("10.0.0.1", 5, 0));
        index.insert(probe("10.0.0.2", 9, 1));

        let head = index.peek_earliest().unwrap();
        assert_eq!(head.seq, 5);

        // Head deadline never exceeds any other entry's deadline
        let ip: IpAddr = "10.0.0.2".parse().unwrap();
        let other = index.remove_by_key(ip, 9).unwrap();
        assert!(head.deadline <= other.deadline);
    }

    #[test]
    fn head_advances_when_removed_out_of_band() {
        let mut index = ProbeIndex::default();
        let first: IpAddr = "10.0.0.1".parse().unwrap();
        index.insert(probe("10.0.0.1", 0, 0));
        index.insert(probe("10.0.0.2", 0, 1));

        index.remove_by_key(first, 0).unwrap();
        let head = index.peek_earliest().unwrap();
        assert_eq!(head.ip, "10.0.0.2".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn remove_destination_drops_residuals() {
        let mut index = ProbeIndex::default();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        for seq in 0..4 {
            index.insert(probe("10.0.0.1", seq, seq as u64));
        }
        index.insert(probe("10.0.0.2", 0, 10));

        assert_eq!(index.remove_destination(ip), 4);
        assert_eq!(index.len(), 1);
        assert!(index.lookup(ip, 2).is_none());
        assert_eq!(index.remove_destination(ip), 0);
    }

    #[test]
    fn same_sequence_on_two_destinations_does_not_collide() {
        let mut index = ProbeIndex::default();
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();
        index.insert(probe("10.0.0.1", 3, 0));
        index.insert(probe("10.0.0.2", 3, 1));

        index.remove_by_key(a, 3).unwrap();
        assert!(index.lookup(b, 3).is_some());
    }
}
