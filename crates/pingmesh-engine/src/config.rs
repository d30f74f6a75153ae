//! Engine configuration

use std::time::Duration;

/// Tuning knobs for an [`Engine`](crate::Engine).
///
/// `timeout` bounds each probe: the deadline is stamped when the probe enters
/// the index (after lock acquisition, so queueing delay counts against it).
/// `read_deadline` is the base receive deadline per receiver; idle receivers
/// scale it up by the consecutive-timeout back-off.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-probe deadline, added to the send time.
    pub timeout: Duration,

    /// Base receive deadline, before back-off multiplication.
    pub read_deadline: Duration,

    /// Reader concurrency for the IPv4 socket.
    pub receivers_v4: usize,

    /// Reader concurrency for the IPv6 socket.
    pub receivers_v6: usize,

    /// Stagger receiver start times so their read deadlines do not align.
    pub splay_receivers: bool,

    /// Synthesize successes without opening sockets (test mode). Probes
    /// drawn as drops still expire genuinely.
    pub fake_success: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            read_deadline: Duration::from_millis(500),
            receivers_v4: 2,
            receivers_v6: 2,
            splay_receivers: true,
            fake_success: false,
        }
    }
}
