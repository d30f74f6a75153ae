//! Engine-scoped socket pair
//!
//! One ICMP datagram socket per address family, opened together at engine
//! start and closed together at engine stop. Opening retries once; the retry
//! is where a sufficiently privileged process widens the kernel's
//! `ping_group_range` first.

use std::io;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::ping_group::{self, WIDEN_HINT};
use crate::socket::IcmpSocket;
use crate::Family;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error(
        "cannot open non-privileged ICMP {family} socket: {source}; \
         ensure this process runs with a gid inside net.ipv4.ping_group_range, or {WIDEN_HINT}"
    )]
    Open {
        family: Family,
        #[source]
        source: io::Error,
    },
}

/// The v4 and v6 sockets shared by every receiver and prober.
pub struct SocketPair {
    v4: Arc<IcmpSocket>,
    v6: Arc<IcmpSocket>,
}

impl SocketPair {
    /// Open both family sockets, retrying each once.
    pub fn open() -> Result<Self, SocketError> {
        Ok(Self {
            v4: Arc::new(open_with_retry(Family::V4)?),
            v6: Arc::new(open_with_retry(Family::V6)?),
        })
    }

    /// Handle to the socket serving `family`.
    pub fn socket(&self, family: Family) -> Arc<IcmpSocket> {
        match family {
            Family::V4 => Arc::clone(&self.v4),
            Family::V6 => Arc::clone(&self.v6),
        }
    }
}

fn open_with_retry(family: Family) -> Result<IcmpSocket, SocketError> {
    match IcmpSocket::open(family) {
        Ok(socket) => Ok(socket),
        Err(first) => {
            warn!(%family, error = %first, "ICMP socket open refused, retrying once");
            if ping_group::can_widen_group_range() {
                match ping_group::widen_group_range() {
                    Ok(()) => info!(
                        sysctl = ping_group::PING_GROUP_RANGE_SYSCTL,
                        "widened ping group range before retry"
                    ),
                    Err(e) => warn!(error = %e, "could not widen ping group range"),
                }
            }
            IcmpSocket::open(family).map_err(|source| SocketError::Open { family, source })
        }
    }
}
