//! Socket readers
//!
//! Each family's socket is drained by a small group of receiver tasks. A
//! receiver blocks on the socket with a deadline, decodes the reply, matches
//! it against the probe index, and delivers the success. Untrusted input
//! never crashes a receiver; undecodable and unknown packets are dropped.
//!
//! Idle receivers widen their read deadline by a step function of the
//! consecutive-timeouts streak, trading shutdown latency for fewer wakeups
//! on quiet sockets.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use pingmesh_net::{parse_echo_reply, Family, IcmpSocket};

use crate::engine::Shared;
use crate::probe::{canonical_ip, PingSuccess};

/// Non-privileged ICMP datagram sockets deliver only the ICMP payload, so a
/// small buffer is plenty.
pub(crate) const RECEIVE_BUFFER_MAX: usize = 200;

const STREAK_LOW: u32 = 5;
const STREAK_MEDIUM: u32 = 10;
const STREAK_HIGH: u32 = 20;

const MULTI_LOW: f64 = 2.0;
const MULTI_MEDIUM: f64 = 10.0;
const MULTI_HIGH: f64 = 20.0;

/// Deadline multiplier for a consecutive-timeouts streak.
pub(crate) fn backoff_multiplier(streak: u32) -> f64 {
    backoff_table(
        streak,
        STREAK_LOW,
        STREAK_MEDIUM,
        STREAK_HIGH,
        MULTI_LOW,
        MULTI_MEDIUM,
        MULTI_HIGH,
    )
}

// Separated from the constants for table testing.
fn backoff_table(
    streak: u32,
    low: u32,
    medium: u32,
    high: u32,
    m_low: f64,
    m_medium: f64,
    m_high: f64,
) -> f64 {
    if streak >= high {
        m_high
    } else if streak >= medium {
        m_medium
    } else if streak >= low {
        m_low
    } else {
        1.0
    }
}

pub(crate) async fn run(
    shared: Arc<Shared>,
    socket: Arc<IcmpSocket>,
    family: Family,
    index: usize,
    all: CancellationToken,
    group: CancellationToken,
    start_delay: Duration,
) {
    assert!(
        !shared.config.fake_success,
        "receivers must not be started in fake-success mode"
    );

    if !start_delay.is_zero() {
        tokio::select! {
            _ = tokio::time::sleep(start_delay) => {}
            _ = all.cancelled() => return,
            _ = group.cancelled() => return,
        }
    }
    debug!(%family, index, "receiver running");

    let mut buf = [0u8; RECEIVE_BUFFER_MAX];
    let mut streak: u32 = 0;

    loop {
        let read_deadline = shared
            .config
            .read_deadline
            .mul_f64(backoff_multiplier(streak));

        tokio::select! {
            _ = all.cancelled() => break,
            _ = group.cancelled() => break,
            read = timeout(read_deadline, socket.recv_from(&mut buf)) => match read {
                Err(_elapsed) => {
                    streak += 1;
                    trace!(%family, index, streak, "read deadline elapsed");
                }
                Ok(Err(e)) => {
                    // Not a timeout and not untrusted input: the socket
                    // itself is broken and the engine cannot limp on.
                    error!(%family, index, error = %e, "receiver I/O error, terminating");
                    std::process::exit(1);
                }
                Ok(Ok((len, peer))) => {
                    streak = 0;
                    let received_at = Instant::now();
                    handle_reply(&shared, family, &buf[..len], peer, received_at);
                }
            }
        }

        if all.is_cancelled() || group.is_cancelled() {
            break;
        }
    }

    debug!(%family, index, "receiver stopped");
}

fn handle_reply(
    shared: &Shared,
    family: Family,
    bytes: &[u8],
    peer: IpAddr,
    received_at: Instant,
) {
    let reply = match parse_echo_reply(family, bytes) {
        Ok(reply) => reply,
        Err(e) => {
            warn!(%family, %peer, error = %e, "dropping undecodable packet");
            return;
        }
    };

    let ip = canonical_ip(peer);
    let seq = reply.seq;

    // Cheap read-lock lookup first; late replies and duplicates are the
    // common miss and shouldn't contend with writers.
    if shared.state.read().index.lookup(ip, seq).is_none() {
        debug!(%ip, seq, "late or unknown echo reply, dropping");
        return;
    }

    let mut state = shared.state.write();
    // Rechecked under the write lock: the expirer may have won the race.
    let Some(probe) = state.index.remove_by_key(ip, seq) else {
        debug!(%ip, seq, "probe expired between lookup and removal");
        return;
    };

    let success = PingSuccess {
        seq,
        sent_at: probe.sent_at,
        received_at,
        rtt: received_at.duration_since(probe.sent_at),
    };
    // try_send on a channel sized to the probe count never blocks, so it is
    // safe while the removal's write lock is still held.
    match state.channels.get(&ip) {
        Some(ch) => {
            if let Err(e) = ch.success_tx.try_send(success) {
                debug!(%ip, seq, error = %e, "success event dropped");
            }
        }
        None => debug!(%ip, seq, "no channels registered for reply"),
    }
    trace!(%ip, seq, rtt = ?success.rtt, "echo reply matched");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backoff_steps() {
        let cases = [
            (0, 1.0),
            (STREAK_LOW - 1, 1.0),
            (STREAK_LOW, 2.0),
            (STREAK_MEDIUM, 10.0),
            (STREAK_HIGH, 20.0),
            (1000, 20.0),
        ];
        for (streak, expected) in cases {
            assert_eq!(backoff_multiplier(streak), expected, "streak {streak}");
        }
    }

    #[test]
    fn backoff_table_with_alternate_thresholds() {
        let cases = [
            (0, 1.0),
            (1, 1.0),
            (9, 1.0),
            (10, 1.0),
            (19, 1.0),
            (20, 2.0),
            (29, 2.0),
            (30, 3.0),
            (31, 3.0),
        ];
        for (streak, expected) in cases {
            assert_eq!(
                backoff_table(streak, 10, 20, 30, 1.0, 2.0, 3.0),
                expected,
                "streak {streak}"
            );
        }
    }

    #[test]
    fn backoff_never_shrinks_the_deadline() {
        for streak in 0..100 {
            assert!(backoff_multiplier(streak) >= 1.0);
        }
    }
}
