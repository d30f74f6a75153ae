//! `net.ipv4.ping_group_range` handling
//!
//! Non-privileged ICMP datagram sockets are only available to processes whose
//! gid falls inside the `net.ipv4.ping_group_range` sysctl (the same knob
//! covers ICMPv6 sockets). A privileged process may widen the range itself;
//! everything else gets an error telling the operator what to run.

use std::io;

#[cfg(target_os = "linux")]
use caps::{CapSet, Capability};

/// Name of the sysctl gating non-privileged ICMP sockets.
pub const PING_GROUP_RANGE_SYSCTL: &str = "net.ipv4.ping_group_range";

/// Range value admitting every gid on the system.
pub const FULL_GROUP_RANGE: &str = "0 2147483647";

/// Operator remediation, quoted verbatim in socket-open errors.
pub const WIDEN_HINT: &str =
    "run: sudo sysctl -w net.ipv4.ping_group_range=\"0 2147483647\"";

#[cfg(target_os = "linux")]
const PING_GROUP_RANGE_PATH: &str = "/proc/sys/net/ipv4/ping_group_range";

/// Whether this process holds `CAP_NET_ADMIN` and so may rewrite the sysctl.
pub fn can_widen_group_range() -> bool {
    #[cfg(target_os = "linux")]
    {
        caps::read(None, CapSet::Effective)
            .map(|effective| effective.contains(&Capability::CAP_NET_ADMIN))
            .unwrap_or(false)
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

/// Widen `net.ipv4.ping_group_range` to admit every gid.
///
/// Requires privilege; callers should gate on [`can_widen_group_range`].
pub fn widen_group_range() -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        std::fs::write(PING_GROUP_RANGE_PATH, FULL_GROUP_RANGE)
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "ping_group_range is a Linux sysctl",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hint_names_the_sysctl() {
        assert!(WIDEN_HINT.contains(PING_GROUP_RANGE_SYSCTL));
        assert!(WIDEN_HINT.contains(FULL_GROUP_RANGE));
    }
}
