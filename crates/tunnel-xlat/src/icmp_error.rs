//! ICMP errors generated by the translator itself.
//!
//! Sent from the configured router address back to the sender of a packet
//! that could not be forwarded (hop limit reached, MTU exceeded). The
//! offending packet is quoted as far as the error fits in 576 / 1280 bytes.

use crate::buffer::PacketQueue;
use crate::checksum::{compute_checksum_parts, ipv6_pseudo_header_sum};
use crate::config::TranslatorConfig;
use crate::error::{DropReason, XlatResult};
use crate::icmp::{ICMPV4_ERROR_MAX_SIZE, ICMPV6_ERROR_MAX_SIZE};
use crate::packet::{
    Ipv4Header, Ipv4Packet, Ipv6Header, Ipv6Packet, ICMP_HEADER_SIZE, IPV4_HEADER_SIZE,
    IPV6_HEADER_SIZE, PROTO_ICMP, PROTO_ICMPV6,
};
/// Whether an IPv4 sender may receive an ICMP error (RFC 1812 section 4.3.2.7).
fn may_answer_ipv4(packet: &Ipv4Packet<'_>) -> bool {
    !(packet.is_icmp_error()
        || packet.is_non_first_fragment()
        || packet.src.is_unspecified()
        || packet.src.is_multicast()
        || packet.src.is_broadcast()
        || packet.src.is_loopback())
}

/// Whether an IPv6 sender may receive an ICMPv6 error (RFC 4443 section 2.4).
fn may_answer_ipv6(packet: &Ipv6Packet<'_>) -> bool {
    !(packet.is_icmp_error()
        || packet.is_non_first_fragment()
        || packet.src.is_unspecified()
        || packet.src.is_multicast()
        || packet.src.is_loopback())
}

/// Queue an ICMPv4 error about `offending` from the router address.
///
/// Returns `Err(reason)` when the sender must not get an error, so the
/// packet counts as dropped for that reason.
pub(crate) fn emit_icmpv4_error(
    config: &TranslatorConfig,
    out: &mut PacketQueue,
    offending: &Ipv4Packet<'_>,
    icmp_type: u8,
    code: u8,
    rest: [u8; 4],
    reason: DropReason,
) -> XlatResult<()> {
    if !may_answer_ipv4(offending) {
        return Err(reason);
    }

    let room = ICMPV4_ERROR_MAX_SIZE - IPV4_HEADER_SIZE - ICMP_HEADER_SIZE;
    let quote = &offending.bytes[..offending.bytes.len().min(room)];

    let mut icmp = [icmp_type, code, 0, 0, rest[0], rest[1], rest[2], rest[3]];
    let checksum = compute_checksum_parts(0, &[&icmp, quote]);
    icmp[2..4].copy_from_slice(&checksum.to_be_bytes());

    let header = Ipv4Header {
        tos: 0,
        total_len: (IPV4_HEADER_SIZE + ICMP_HEADER_SIZE + quote.len()) as u16,
        id: 0,
        flags_offset: 0,
        ttl: config.generated_packet_ttl,
        protocol: PROTO_ICMP,
        src: config.router_ipv4,
        dst: offending.src,
    };

    log::trace!(
        "Sending ICMP {}/{} from {} to {}",
        icmp_type,
        code,
        config.router_ipv4,
        offending.src
    );
    out.push_with_header(&header.to_bytes(), &[&icmp, quote]);
    Ok(())
}

/// Queue an ICMPv6 error about `offending` from the router address.
pub(crate) fn emit_icmpv6_error(
    config: &TranslatorConfig,
    out: &mut PacketQueue,
    offending: &Ipv6Packet<'_>,
    icmp_type: u8,
    code: u8,
    rest: [u8; 4],
    reason: DropReason,
) -> XlatResult<()> {
    if !may_answer_ipv6(offending) {
        return Err(reason);
    }

    let room = ICMPV6_ERROR_MAX_SIZE - IPV6_HEADER_SIZE - ICMP_HEADER_SIZE;
    let quote = &offending.bytes[..offending.bytes.len().min(room)];
    let icmp_len = ICMP_HEADER_SIZE + quote.len();

    let src = config.router_ipv6;
    let dst = offending.src;
    let mut icmp = [icmp_type, code, 0, 0, rest[0], rest[1], rest[2], rest[3]];
    let pseudo = ipv6_pseudo_header_sum(src, dst, PROTO_ICMPV6, icmp_len as u32);
    let checksum = compute_checksum_parts(pseudo, &[&icmp, quote]);
    icmp[2..4].copy_from_slice(&checksum.to_be_bytes());

    let header = Ipv6Header {
        traffic_class: 0,
        payload_len: icmp_len as u16,
        next_header: PROTO_ICMPV6,
        hop_limit: config.generated_packet_ttl,
        src,
        dst,
    };

    log::trace!("Sending ICMPv6 {}/{} from {} to {}", icmp_type, code, src, dst);
    out.push_with_header(&header.to_bytes(), &[&icmp, quote]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{compute_checksum, is_valid_transport_checksum_ipv6};
    use crate::config::tests::nat64_config;
    use crate::packet::{IPV4_FLAG_DF, PROTO_UDP};
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn ipv4_packet(src: Ipv4Addr, protocol: u8, payload: &[u8]) -> Vec<u8> {
        let mut packet = Ipv4Header {
            tos: 0,
            total_len: (IPV4_HEADER_SIZE + payload.len()) as u16,
            id: 0,
            flags_offset: IPV4_FLAG_DF,
            ttl: 1,
            protocol,
            src,
            dst: Ipv4Addr::new(192, 0, 2, 1),
        }
        .to_bytes()
        .to_vec();
        packet.extend_from_slice(payload);
        packet
    }

    #[test]
    fn test_icmpv4_time_exceeded() {
        let config = nat64_config();
        let mut out = PacketQueue::with_capacity(1500);
        let raw = ipv4_packet(Ipv4Addr::new(198, 51, 100, 1), PROTO_UDP, &[0u8; 1000]);
        let packet = Ipv4Packet::parse(&raw).unwrap();

        emit_icmpv4_error(&config, &mut out, &packet, 11, 0, [0; 4], DropReason::TtlExpired).unwrap();

        let reply = Ipv4Packet::parse(out.get(0).unwrap()).unwrap();
        assert_eq!(reply.bytes.len(), ICMPV4_ERROR_MAX_SIZE);
        assert_eq!(reply.src, config.router_ipv4);
        assert_eq!(reply.dst, Ipv4Addr::new(198, 51, 100, 1));
        assert_eq!(reply.ttl, config.generated_packet_ttl);
        assert_eq!(&reply.payload[..2], &[11, 0]);
        assert_eq!(compute_checksum(reply.payload), 0);
        assert_eq!(&reply.payload[8..28], &raw[..20]);
    }

    #[test]
    fn test_no_error_about_icmp_error_or_broadcast() {
        let config = nat64_config();
        let mut out = PacketQueue::with_capacity(1500);

        let raw = ipv4_packet(Ipv4Addr::new(198, 51, 100, 1), PROTO_ICMP, &[3, 1, 0, 0, 0, 0, 0, 0]);
        let packet = Ipv4Packet::parse(&raw).unwrap();
        assert_eq!(
            emit_icmpv4_error(&config, &mut out, &packet, 11, 0, [0; 4], DropReason::TtlExpired),
            Err(DropReason::TtlExpired)
        );

        let raw = ipv4_packet(Ipv4Addr::BROADCAST, PROTO_UDP, &[0; 8]);
        let packet = Ipv4Packet::parse(&raw).unwrap();
        assert!(emit_icmpv4_error(&config, &mut out, &packet, 11, 0, [0; 4], DropReason::TtlExpired).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn test_icmpv6_packet_too_big() {
        let config = nat64_config();
        let mut out = PacketQueue::with_capacity(2000);
        let sender: Ipv6Addr = "2001:db8::5".parse().unwrap();
        let mut raw = Ipv6Header {
            traffic_class: 0,
            payload_len: 1400,
            next_header: PROTO_UDP,
            hop_limit: 64,
            src: sender,
            dst: "64:ff9b::198.51.100.1".parse().unwrap(),
        }
        .to_bytes()
        .to_vec();
        raw.extend_from_slice(&[0u8; 1400]);
        let packet = Ipv6Packet::parse(&raw).unwrap();

        emit_icmpv6_error(&config, &mut out, &packet, 2, 0, 1520u32.to_be_bytes(), DropReason::MtuExceeded).unwrap();

        let reply = Ipv6Packet::parse(out.get(0).unwrap()).unwrap();
        assert_eq!(reply.bytes.len(), ICMPV6_ERROR_MAX_SIZE);
        assert_eq!(reply.src, config.router_ipv6);
        assert_eq!(reply.dst, sender);
        assert_eq!(reply.protocol, PROTO_ICMPV6);
        assert_eq!(&reply.payload[4..8], &1520u32.to_be_bytes());
        assert!(is_valid_transport_checksum_ipv6(reply.src, reply.dst, PROTO_ICMPV6, reply.payload));
    }

    #[test]
    fn test_no_icmpv6_error_to_multicast_source() {
        let config = nat64_config();
        let mut out = PacketQueue::with_capacity(2000);
        let mut raw = Ipv6Header {
            traffic_class: 0,
            payload_len: 8,
            next_header: PROTO_UDP,
            hop_limit: 1,
            src: "ff02::1".parse().unwrap(),
            dst: "64:ff9b::198.51.100.1".parse().unwrap(),
        }
        .to_bytes()
        .to_vec();
        raw.extend_from_slice(&[0u8; 8]);
        let packet = Ipv6Packet::parse(&raw).unwrap();

        assert!(emit_icmpv6_error(&config, &mut out, &packet, 3, 0, [0; 4], DropReason::TtlExpired).is_err());
        assert!(out.is_empty());
    }
}
