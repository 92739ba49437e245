//! IPv6 -> IPv4 header translation (RFC 7915 section 5).

use crate::addr::{translate_icmp_error_6to4, translate_main_6to4};
use crate::buffer::PacketQueue;
use crate::checksum::{
    adjust_checksum_6to4, compute_checksum_parts, ipv4_pseudo_header_sum,
    is_valid_transport_checksum_ipv6,
};
use crate::config::{TranslatorConfig, MIN_IPV6_MTU};
use crate::error::{DropReason, XlatResult};
use crate::icmp::{translate_icmpv6_to_icmpv4, ICMPV6_PACKET_TOO_BIG, ICMPV6_TIME_EXCEEDED};
use crate::icmp_error::emit_icmpv6_error;
use crate::packet::{
    ipv4_flags_offset, Fragment, Ipv4Header, Ipv6Packet, IPV4_HEADER_SIZE, PROTO_ICMP,
    PROTO_ICMPV6, PROTO_TCP, PROTO_UDP, TCP_HEADER_MIN_SIZE, UDP_HEADER_SIZE,
};
use std::net::Ipv4Addr;

/// Translate one IPv6 packet, queueing the result(s) in `out`.
///
/// `next_id` supplies the IPv4 identification when a packet without a
/// fragment header has to be fragmented.
pub(crate) fn translate(
    config: &TranslatorConfig,
    buf: &[u8],
    out: &mut PacketQueue,
    scratch: &mut Vec<u8>,
    next_id: &mut u16,
) -> XlatResult<()> {
    let packet = Ipv6Packet::parse(buf)?;

    let addrs = if packet.is_icmp_error() {
        translate_icmp_error_6to4(config, packet.src, packet.dst)
    } else {
        translate_main_6to4(config, packet.src, packet.dst)
    };
    let (src, dst) = addrs.ok_or(DropReason::UntranslatableAddress)?;

    if packet.hop_limit <= 1 {
        return emit_icmpv6_error(
            config,
            out,
            &packet,
            ICMPV6_TIME_EXCEEDED,
            0,
            [0; 4],
            DropReason::TtlExpired,
        );
    }

    // An atomic fragment keeps its identification but is otherwise unfragmented
    let fragmented = packet.fragment.filter(Fragment::is_fragmented);
    let (id, dont_fragment) = match packet.fragment {
        Some(frag) => (frag.id as u16, false),
        None => (0, true),
    };

    let mut header = Ipv4Header {
        tos: if config.copy_dscp_and_ecn_6to4 { packet.traffic_class } else { 0 },
        total_len: 0,
        id,
        flags_offset: ipv4_flags_offset(dont_fragment, fragmented),
        ttl: packet.hop_limit - 1,
        protocol: packet.protocol,
        src,
        dst,
    };

    let payload = packet.payload;
    match packet.protocol {
        PROTO_ICMPV6 => {
            if fragmented.is_some() {
                return Err(DropReason::FragmentedIcmp);
            }
            header.protocol = PROTO_ICMP;
            let message = translate_icmpv6_to_icmpv4(config, payload, packet.src, packet.dst)?;
            let trailing = message.trailing().unwrap_or_default();
            emit(config, out, scratch, next_id, &packet, header, &[message.lead_in(), trailing])
        }
        PROTO_TCP | PROTO_UDP if !packet.is_non_first_fragment() => {
            let offset = if packet.protocol == PROTO_TCP { 16 } else { 6 };
            let checksum = transport_checksum(config, &packet, src, dst, fragmented.is_some())?;
            let checksum = checksum.to_be_bytes();
            emit(
                config,
                out,
                scratch,
                next_id,
                &packet,
                header,
                &[&payload[..offset], &checksum, &payload[offset + 2..]],
            )
        }
        _ => emit(config, out, scratch, next_id, &packet, header, &[payload]),
    }
}

/// Compute the IPv4 TCP/UDP checksum for a segment or first fragment.
fn transport_checksum(
    config: &TranslatorConfig,
    packet: &Ipv6Packet<'_>,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    first_fragment: bool,
) -> XlatResult<u16> {
    let protocol = packet.protocol;
    let segment = packet.payload;
    let (offset, min_len, check) = if protocol == PROTO_TCP {
        (16, TCP_HEADER_MIN_SIZE, config.checksum.tcp)
    } else {
        (6, UDP_HEADER_SIZE, config.checksum.udp)
    };

    if segment.len() < if first_fragment { offset + 2 } else { min_len } {
        return Err(DropReason::Truncated);
    }

    let old = u16::from_be_bytes([segment[offset], segment[offset + 1]]);

    if protocol == PROTO_UDP && old == 0 {
        // Zero UDP checksums are invalid in IPv6
        if config.checksum.udp {
            return Err(DropReason::UdpZeroChecksum);
        }
        if first_fragment {
            return Ok(0);
        }
    } else if first_fragment {
        return Ok(adjust_checksum_6to4(
            old,
            packet.src,
            packet.dst,
            src,
            dst,
            protocol,
            segment.len() as u16,
        ));
    } else if check && !is_valid_transport_checksum_ipv6(packet.src, packet.dst, protocol, segment) {
        return Err(DropReason::BadChecksum);
    }

    let pseudo = ipv4_pseudo_header_sum(src, dst, protocol, segment.len() as u16);
    let checksum = compute_checksum_parts(pseudo, &[&segment[..offset], &segment[offset + 2..]]);
    Ok(if protocol == PROTO_UDP && checksum == 0 { 0xFFFF } else { checksum })
}

/// Queue the translated packet, fragmenting or answering with Packet Too Big
/// when it exceeds the IPv4 outbound MTU.
fn emit(
    config: &TranslatorConfig,
    out: &mut PacketQueue,
    scratch: &mut Vec<u8>,
    next_id: &mut u16,
    packet: &Ipv6Packet<'_>,
    mut header: Ipv4Header,
    parts: &[&[u8]],
) -> XlatResult<()> {
    let payload_len: usize = parts.iter().map(|part| part.len()).sum();
    let mtu = config.ipv4_outbound_mtu as usize;

    if IPV4_HEADER_SIZE + payload_len <= mtu {
        header.total_len = (IPV4_HEADER_SIZE + payload_len) as u16;
        out.push_with_header(&header.to_bytes(), parts);
        return Ok(());
    }

    // Without a fragment header the sender can still lower its packet size,
    // unless it is already at the IPv6 minimum MTU
    if packet.fragment.is_none() && packet.bytes.len() > MIN_IPV6_MTU as usize {
        let mtu6 = (config.ipv4_outbound_mtu as u32 + 20).max(MIN_IPV6_MTU as u32);
        return emit_icmpv6_error(
            config,
            out,
            packet,
            ICMPV6_PACKET_TOO_BIG,
            0,
            mtu6.to_be_bytes(),
            DropReason::MtuExceeded,
        );
    }

    scratch.clear();
    for part in parts {
        scratch.extend_from_slice(part);
    }

    if packet.fragment.is_none() {
        header.id = *next_id;
        *next_id = next_id.wrapping_add(1);
    }

    let base_offset = packet.fragment.map_or(0, |frag| frag.offset);
    let more_after = packet.fragment.is_some_and(|frag| frag.more);
    let max_chunk = (mtu - IPV4_HEADER_SIZE) & !7;

    let mut pos = 0;
    while pos < scratch.len() {
        let end = (pos + max_chunk).min(scratch.len());
        let fragment = Fragment {
            id: header.id as u32,
            offset: base_offset + pos,
            more: end < scratch.len() || more_after,
        };
        header.total_len = (IPV4_HEADER_SIZE + end - pos) as u16;
        header.flags_offset = ipv4_flags_offset(false, Some(fragment));
        out.push_with_header(&header.to_bytes(), &[&scratch[pos..end]]);
        pos = end;
    }

    log::trace!("Fragmented translated packet into {} IPv4 fragments", out.len());
    Ok(())
}
