//! IPv4 -> IPv6 header translation (RFC 7915 section 4).

use crate::addr::{translate_icmp_error_4to6, translate_main_4to6};
use crate::buffer::PacketQueue;
use crate::checksum::{
    adjust_checksum_4to6, compute_checksum_parts, ipv6_pseudo_header_sum,
    is_valid_ipv4_header_checksum, is_valid_transport_checksum_ipv4,
};
use crate::config::TranslatorConfig;
use crate::error::{DropReason, XlatResult};
use crate::icmp::{translate_icmpv4_to_icmpv6, ICMPV4_DEST_UNREACHABLE, ICMPV4_TIME_EXCEEDED};
use crate::icmp_error::emit_icmpv4_error;
use crate::packet::{
    fragment_header, Fragment, Ipv4Packet, Ipv6Header, IPV6_FRAGMENT_HEADER_SIZE,
    IPV6_HEADER_SIZE, NH_FRAGMENT, PROTO_ICMP, PROTO_ICMPV6, PROTO_TCP, PROTO_UDP,
    TCP_HEADER_MIN_SIZE, UDP_HEADER_SIZE,
};
use std::net::Ipv6Addr;

/// Translate one IPv4 packet, queueing the result(s) in `out`.
pub(crate) fn translate(
    config: &TranslatorConfig,
    buf: &[u8],
    out: &mut PacketQueue,
    scratch: &mut Vec<u8>,
) -> XlatResult<()> {
    let packet = Ipv4Packet::parse(buf)?;

    if config.checksum.ipv4_header && !is_valid_ipv4_header_checksum(packet.header()) {
        return Err(DropReason::BadChecksum);
    }

    let addrs = if packet.is_icmp_error() {
        translate_icmp_error_4to6(config, packet.src, packet.dst)
    } else {
        translate_main_4to6(config, packet.src, packet.dst)
    };
    let (src, dst) = addrs.ok_or(DropReason::UntranslatableAddress)?;

    if packet.ttl <= 1 {
        return emit_icmpv4_error(
            config,
            out,
            &packet,
            ICMPV4_TIME_EXCEEDED,
            0,
            [0; 4],
            DropReason::TtlExpired,
        );
    }

    let header = Ipv6Header {
        traffic_class: if config.copy_dscp_and_ecn_4to6 { packet.tos } else { 0 },
        payload_len: 0,
        next_header: packet.protocol,
        hop_limit: packet.ttl - 1,
        src,
        dst,
    };

    let payload = packet.payload;
    match packet.protocol {
        PROTO_ICMP => {
            if packet.fragment.is_some() {
                return Err(DropReason::FragmentedIcmp);
            }
            let message = translate_icmpv4_to_icmpv6(config, payload, src, dst)?;
            let trailing = message.trailing().unwrap_or_default();
            let header = Ipv6Header {
                next_header: PROTO_ICMPV6,
                ..header
            };
            emit(config, out, scratch, &packet, header, &[message.lead_in(), trailing])
        }
        PROTO_TCP | PROTO_UDP if !packet.is_non_first_fragment() => {
            let offset = if packet.protocol == PROTO_TCP { 16 } else { 6 };
            let checksum = transport_checksum(config, &packet, src, dst)?;
            let checksum = checksum.to_be_bytes();
            emit(
                config,
                out,
                scratch,
                &packet,
                header,
                &[&payload[..offset], &checksum, &payload[offset + 2..]],
            )
        }
        _ => emit(config, out, scratch, &packet, header, &[payload]),
    }
}

/// Compute the IPv6 TCP/UDP checksum for a segment or first fragment.
fn transport_checksum(
    config: &TranslatorConfig,
    packet: &Ipv4Packet<'_>,
    src: Ipv6Addr,
    dst: Ipv6Addr,
) -> XlatResult<u16> {
    let protocol = packet.protocol;
    let segment = packet.payload;
    let first_fragment = packet.fragment.is_some();
    let (offset, min_len, check) = if protocol == PROTO_TCP {
        (16, TCP_HEADER_MIN_SIZE, config.checksum.tcp)
    } else {
        (6, UDP_HEADER_SIZE, config.checksum.udp)
    };

    if segment.len() < if first_fragment { offset + 2 } else { min_len } {
        return Err(DropReason::Truncated);
    }

    let old = u16::from_be_bytes([segment[offset], segment[offset + 1]]);
    let udp_without_checksum = protocol == PROTO_UDP && old == 0;

    if first_fragment {
        // Only part of the datagram is here, so a missing checksum cannot be computed
        return adjust_checksum_4to6(
            old,
            packet.src,
            packet.dst,
            src,
            dst,
            protocol,
            segment.len() as u16,
        )
        .ok_or(DropReason::UdpZeroChecksum);
    }

    if check && !udp_without_checksum && !is_valid_transport_checksum_ipv4(packet.src, packet.dst, protocol, segment) {
        return Err(DropReason::BadChecksum);
    }

    let pseudo = ipv6_pseudo_header_sum(src, dst, protocol, segment.len() as u32);
    let checksum = compute_checksum_parts(pseudo, &[&segment[..offset], &segment[offset + 2..]]);
    Ok(if protocol == PROTO_UDP && checksum == 0 { 0xFFFF } else { checksum })
}

/// Queue the translated packet, splitting it into IPv6 fragments or answering
/// with "fragmentation needed" when it exceeds the IPv6 outbound MTU.
fn emit(
    config: &TranslatorConfig,
    out: &mut PacketQueue,
    scratch: &mut Vec<u8>,
    packet: &Ipv4Packet<'_>,
    mut header: Ipv6Header,
    parts: &[&[u8]],
) -> XlatResult<()> {
    let payload_len: usize = parts.iter().map(|part| part.len()).sum();
    let mtu = config.ipv6_outbound_mtu as usize;
    let upper_protocol = header.next_header;

    let ext_len = if packet.fragment.is_some() { IPV6_FRAGMENT_HEADER_SIZE } else { 0 };
    if IPV6_HEADER_SIZE + ext_len + payload_len <= mtu {
        header.payload_len = (ext_len + payload_len) as u16;
        match packet.fragment {
            Some(frag) => {
                header.next_header = NH_FRAGMENT;
                let mut headers = [0u8; IPV6_HEADER_SIZE + IPV6_FRAGMENT_HEADER_SIZE];
                headers[..IPV6_HEADER_SIZE].copy_from_slice(&header.to_bytes());
                headers[IPV6_HEADER_SIZE..].copy_from_slice(&fragment_header(upper_protocol, frag));
                out.push_with_header(&headers, parts);
            }
            None => {
                out.push_with_header(&header.to_bytes(), parts);
            }
        }
        return Ok(());
    }

    if packet.dont_fragment {
        let mtu4 = (mtu - 20) as u16;
        let mtu4 = mtu4.to_be_bytes();
        return emit_icmpv4_error(
            config,
            out,
            packet,
            ICMPV4_DEST_UNREACHABLE,
            4,
            [0, 0, mtu4[0], mtu4[1]],
            DropReason::MtuExceeded,
        );
    }

    scratch.clear();
    for part in parts {
        scratch.extend_from_slice(part);
    }

    let base_offset = packet.fragment.map_or(0, |frag| frag.offset);
    let more_after = packet.fragment.is_some_and(|frag| frag.more);
    let max_chunk = (mtu - IPV6_HEADER_SIZE - IPV6_FRAGMENT_HEADER_SIZE) & !7;
    header.next_header = NH_FRAGMENT;

    let mut pos = 0;
    while pos < scratch.len() {
        let end = (pos + max_chunk).min(scratch.len());
        let fragment = Fragment {
            id: packet.id as u32,
            offset: base_offset + pos,
            more: end < scratch.len() || more_after,
        };
        header.payload_len = (IPV6_FRAGMENT_HEADER_SIZE + end - pos) as u16;

        let mut headers = [0u8; IPV6_HEADER_SIZE + IPV6_FRAGMENT_HEADER_SIZE];
        headers[..IPV6_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        headers[IPV6_HEADER_SIZE..].copy_from_slice(&fragment_header(upper_protocol, fragment));
        out.push_with_header(&headers, &[&scratch[pos..end]]);
        pos = end;
    }

    log::trace!("Fragmented translated packet into {} IPv6 fragments", out.len());
    Ok(())
}
