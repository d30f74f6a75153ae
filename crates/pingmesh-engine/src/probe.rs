//! Probe and terminal-event types

use std::net::IpAddr;
use std::time::{Duration, Instant};

/// One outstanding Echo Request awaiting a terminal event.
///
/// Created by a prober at issuance, destroyed when either a receiver matches
/// the reply or the expirer fires the deadline.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Probe {
    pub ip: IpAddr,
    pub seq: u16,
    pub sent_at: Instant,
    pub deadline: Instant,
    /// Sender skipped the wire write for this probe, so it can only expire.
    pub fake_drop: bool,
}

/// Passed from a receiver (or the fake-success expirer path) to the prober.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PingSuccess {
    pub seq: u16,
    pub sent_at: Instant,
    pub received_at: Instant,
    pub rtt: Duration,
}

/// Passed from the expirer to the prober on timeout.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PingExpired {
    pub seq: u16,
    pub sent_at: Instant,
}

/// Collapse v4-mapped-v6 addresses (`::ffff:a.b.c.d`) onto their IPv4 form so
/// a destination has exactly one index key and one socket family.
pub(crate) fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapped_v6_collapses_to_v4() {
        let mapped: IpAddr = "::ffff:127.0.0.1".parse().unwrap();
        assert_eq!(canonical_ip(mapped), "127.0.0.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn plain_addresses_are_untouched() {
        let v4: IpAddr = "192.0.2.1".parse().unwrap();
        let v6: IpAddr = "2001:db8::1".parse().unwrap();
        assert_eq!(canonical_ip(v4), v4);
        assert_eq!(canonical_ip(v6), v6);
    }
}
