//! Non-privileged ICMP datagram sockets
//!
//! Safe async wrapper around `IPPROTO_ICMP`/`IPPROTO_ICMPV6` datagram
//! sockets. These do not require `CAP_NET_RAW`; on Linux the process gid must
//! fall inside `net.ipv4.ping_group_range`. The kernel fills the echo
//! identifier and demultiplexes replies per socket, so the receive path only
//! ever sees ICMP payload bytes (no IP header).

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::mem::MaybeUninit;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::unix::AsyncFd;
use tracing::trace;

use crate::Family;

/// One ICMP datagram socket, integrated with Tokio for async I/O.
pub struct IcmpSocket {
    inner: AsyncFd<Socket>,
    family: Family,
}

impl IcmpSocket {
    /// Open a non-blocking ICMP datagram socket bound to the wildcard
    /// address of its family (`0.0.0.0` or `::`).
    pub fn open(family: Family) -> io::Result<Self> {
        let (domain, protocol, bind_addr) = match family {
            Family::V4 => (
                Domain::IPV4,
                Protocol::ICMPV4,
                SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0),
            ),
            Family::V6 => (
                Domain::IPV6,
                Protocol::ICMPV6,
                SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0),
            ),
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(protocol))?;
        socket.set_nonblocking(true)?;
        socket.bind(&bind_addr.into())?;
        trace!(%family, "opened non-privileged ICMP datagram socket");

        Ok(Self {
            inner: AsyncFd::new(socket)?,
            family,
        })
    }

    /// Send one echo request datagram to `target` (port is ignored by the
    /// kernel for ICMP; callers pass 0).
    pub async fn send_to(&self, buf: &[u8], target: &SocketAddr) -> io::Result<usize> {
        loop {
            let mut guard = self.inner.writable().await?;
            match guard.try_io(|fd| fd.get_ref().send_to(buf, &(*target).into())) {
                Ok(written) => return written,
                Err(_would_block) => continue,
            }
        }
    }

    /// Receive one ICMP datagram.
    ///
    /// Returns the byte count and the replying host's IP. Datagram ICMP
    /// peers carry no port, so only the address is surfaced; the bytes are
    /// ICMP payload with no IP header to strip.
    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, IpAddr)> {
        loop {
            let mut guard = self.inner.readable().await?;
            let attempt = guard.try_io(|fd| {
                // socket2 reads into possibly-uninitialized memory; an
                // initialized byte slice is a valid view of that.
                let uninit =
                    unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) };
                fd.get_ref().recv_from(uninit)
            });
            match attempt {
                Ok(Ok((n, peer))) => {
                    let ip = peer
                        .as_socket()
                        .map(|addr| addr.ip())
                        .ok_or_else(|| {
                            io::Error::other("ICMP datagram without an IP source address")
                        })?;
                    return Ok((n, ip));
                }
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
    }

    /// The address family this socket serves.
    pub fn family(&self) -> Family {
        self.family
    }
}
