//! Network primitives for the pingmesh echo engine

pub mod icmp;
pub mod pair;
pub mod ping_group;
pub mod socket;

pub use icmp::{build_echo_request, parse_echo_reply, EchoReply, WireError, ECHO_HEADER_LEN};
pub use pair::{SocketError, SocketPair};
pub use socket::IcmpSocket;

use std::fmt;
use std::net::IpAddr;

/// IP address family, selecting which of the pair's sockets carries a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    /// Family of an address. Callers are expected to canonicalise
    /// v4-mapped-v6 addresses beforehand; here `::ffff:a.b.c.d` is V6.
    pub fn of(ip: IpAddr) -> Family {
        if ip.is_ipv4() {
            Family::V4
        } else {
            Family::V6
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::V4 => write!(f, "v4"),
            Family::V6 => write!(f, "v6"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_of_addresses() {
        assert_eq!(Family::of("127.0.0.1".parse().unwrap()), Family::V4);
        assert_eq!(Family::of("::1".parse().unwrap()), Family::V6);
        assert_eq!(Family::of("2001:db8::1".parse().unwrap()), Family::V6);
    }
}
