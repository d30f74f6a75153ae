//! ICMP echo packet handling
//!
//! Construction of ICMPv4/ICMPv6 Echo Requests and parsing of Echo Replies.
//! Only the echo message family is handled here; the engine does not classify
//! other ICMP message types.

use pnet::packet::icmp::{
    checksum, echo_reply::EchoReplyPacket, echo_request::MutableEchoRequestPacket, IcmpCode,
    IcmpPacket, IcmpTypes,
};
use pnet::packet::icmpv6::{
    echo_reply::EchoReplyPacket as EchoReplyPacketV6,
    echo_request::MutableEchoRequestPacket as MutableEchoRequestPacketV6, Icmpv6Code, Icmpv6Packet,
    Icmpv6Types,
};
use pnet::packet::Packet;
use thiserror::Error;

use crate::Family;

/// Wire size of the echo header: type, code, checksum, identifier, sequence.
pub const ECHO_HEADER_LEN: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// Fewer than [`ECHO_HEADER_LEN`] bytes on the wire.
    #[error("message too short: {0} bytes")]
    MessageTooShort(usize),

    #[error("buffer too small for an echo request")]
    BufferTooSmall,

    #[error("not an ICMP echo reply (type {0})")]
    NotEchoReply(u8),
}

/// Decoded Echo Reply header.
///
/// The identifier is carried along but callers are not expected to validate
/// it: the kernel filters replies per datagram socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoReply {
    pub identifier: u16,
    pub seq: u16,
}

/// Construct an Echo Request for the given family, returning the wire length.
///
/// An empty payload is valid; `buffer` must hold at least [`ECHO_HEADER_LEN`]
/// bytes. The ICMPv6 checksum is left to the kernel, which computes it over
/// the pseudo-header for non-privileged datagram sockets.
pub fn build_echo_request(
    family: Family,
    buffer: &mut [u8],
    identifier: u16,
    sequence: u16,
) -> Result<usize, WireError> {
    match family {
        Family::V4 => build_echo_request_v4(buffer, identifier, sequence),
        Family::V6 => build_echo_request_v6(buffer, identifier, sequence),
    }
}

fn build_echo_request_v4(
    buffer: &mut [u8],
    identifier: u16,
    sequence: u16,
) -> Result<usize, WireError> {
    let mut packet = MutableEchoRequestPacket::new(buffer).ok_or(WireError::BufferTooSmall)?;

    packet.set_icmp_type(IcmpTypes::EchoRequest);
    packet.set_icmp_code(IcmpCode::new(0));
    packet.set_identifier(identifier);
    packet.set_sequence_number(sequence);

    // Checksum over the immutable view. The kernel would also fill in a zero
    // checksum on DGRAM ICMP sockets.
    let view = IcmpPacket::new(packet.packet()).ok_or(WireError::BufferTooSmall)?;
    let sum = checksum(&view);
    packet.set_checksum(sum);

    Ok(packet.packet().len())
}

fn build_echo_request_v6(
    buffer: &mut [u8],
    identifier: u16,
    sequence: u16,
) -> Result<usize, WireError> {
    let mut packet = MutableEchoRequestPacketV6::new(buffer).ok_or(WireError::BufferTooSmall)?;

    packet.set_icmpv6_type(Icmpv6Types::EchoRequest);
    packet.set_icmpv6_code(Icmpv6Code::new(0));
    packet.set_identifier(identifier);
    packet.set_sequence_number(sequence);

    Ok(packet.packet().len())
}

/// Parse an Echo Reply header for the given family.
///
/// Inputs shorter than [`ECHO_HEADER_LEN`] are rejected with
/// [`WireError::MessageTooShort`]; other ICMP message types with
/// [`WireError::NotEchoReply`].
pub fn parse_echo_reply(family: Family, buffer: &[u8]) -> Result<EchoReply, WireError> {
    if buffer.len() < ECHO_HEADER_LEN {
        return Err(WireError::MessageTooShort(buffer.len()));
    }
    match family {
        Family::V4 => parse_echo_reply_v4(buffer),
        Family::V6 => parse_echo_reply_v6(buffer),
    }
}

fn parse_echo_reply_v4(buffer: &[u8]) -> Result<EchoReply, WireError> {
    let packet = IcmpPacket::new(buffer).ok_or(WireError::MessageTooShort(buffer.len()))?;
    if packet.get_icmp_type() != IcmpTypes::EchoReply {
        return Err(WireError::NotEchoReply(packet.get_icmp_type().0));
    }
    let reply = EchoReplyPacket::new(buffer).ok_or(WireError::MessageTooShort(buffer.len()))?;
    Ok(EchoReply {
        identifier: reply.get_identifier(),
        seq: reply.get_sequence_number(),
    })
}

fn parse_echo_reply_v6(buffer: &[u8]) -> Result<EchoReply, WireError> {
    let packet = Icmpv6Packet::new(buffer).ok_or(WireError::MessageTooShort(buffer.len()))?;
    if packet.get_icmpv6_type() != Icmpv6Types::EchoReply {
        return Err(WireError::NotEchoReply(packet.get_icmpv6_type().0));
    }
    let reply = EchoReplyPacketV6::new(buffer).ok_or(WireError::MessageTooShort(buffer.len()))?;
    Ok(EchoReply {
        identifier: reply.get_identifier(),
        seq: reply.get_sequence_number(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_build_then_parse() {
        let mut buffer = [0u8; 64];
        let size = build_echo_request(Family::V4, &mut buffer, 1234, 7).unwrap();
        assert_eq!(size, 64);

        let packet = IcmpPacket::new(&buffer[..size]).unwrap();
        assert_eq!(packet.get_icmp_type(), IcmpTypes::EchoRequest);

        // Flip the type byte to simulate the Echo Reply
        buffer[0] = 0;

        let reply = parse_echo_reply(Family::V4, &buffer[..size]).unwrap();
        assert_eq!(reply.identifier, 1234);
        assert_eq!(reply.seq, 7);
    }

    #[test]
    fn v6_build_then_parse() {
        let mut buffer = [0u8; ECHO_HEADER_LEN];
        let size = build_echo_request(Family::V6, &mut buffer, 40000, 65535).unwrap();
        assert_eq!(size, ECHO_HEADER_LEN);

        // 129 = ICMPv6 Echo Reply
        buffer[0] = 129;

        let reply = parse_echo_reply(Family::V6, &buffer[..size]).unwrap();
        assert_eq!(reply.identifier, 40000);
        assert_eq!(reply.seq, 65535);
    }

    #[test]
    fn short_input_is_rejected() {
        let buffer = [0u8; 7];
        assert_eq!(
            parse_echo_reply(Family::V4, &buffer),
            Err(WireError::MessageTooShort(7))
        );
        assert_eq!(
            parse_echo_reply(Family::V6, &[]),
            Err(WireError::MessageTooShort(0))
        );
    }

    #[test]
    fn non_reply_types_are_rejected() {
        let mut buffer = [0u8; ECHO_HEADER_LEN];
        buffer[0] = 11; // Time Exceeded
        assert_eq!(
            parse_echo_reply(Family::V4, &buffer),
            Err(WireError::NotEchoReply(11))
        );

        buffer[0] = 128; // v6 Echo Request, not a reply
        assert_eq!(
            parse_echo_reply(Family::V6, &buffer),
            Err(WireError::NotEchoReply(128))
        );
    }

    #[test]
    fn empty_payload_request_fits_header_buffer() {
        let mut buffer = [0u8; ECHO_HEADER_LEN];
        let size = build_echo_request(Family::V4, &mut buffer, 1, 0).unwrap();
        assert_eq!(size, ECHO_HEADER_LEN);
    }

    #[test]
    fn undersized_build_buffer_is_rejected() {
        let mut buffer = [0u8; 4];
        assert_eq!(
            build_echo_request(Family::V4, &mut buffer, 1, 0),
            Err(WireError::BufferTooSmall)
        );
    }
}
