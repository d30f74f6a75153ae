//! Error types for the echo engine

use thiserror::Error;

/// Errors surfaced across the engine's public API.
///
/// Contract violations (double start, pinging an unstarted engine, two
/// concurrent probers on one destination) are programmer errors and panic
/// instead; see the crate documentation.
#[derive(Debug, Error)]
pub enum Error {
    /// The kernel refused the ICMP datagram sockets even after the retry.
    /// The message names the sysctl the operator has to widen.
    #[error(transparent)]
    Socket(#[from] pingmesh_net::SocketError),
}

pub type Result<T> = std::result::Result<T, Error>;
