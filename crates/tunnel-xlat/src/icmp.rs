//! ICMP <-> ICMPv6 translation (RFC 7915 sections 4.2, 4.3, 5.2, 5.3).
//!
//! A translated message is described by an [`IcmpMessage`]: a small, owned
//! lead-in holding every rewritten byte (ICMP header, embedded IP header, the
//! first bytes of the embedded transport header) and an optional trailing
//! slice borrowed straight from the input buffer. The caller writes both parts
//! behind the outer IP header without copying the trailing part twice.

use crate::addr::{translate_embedded_4to6, translate_embedded_6to4};
use crate::checksum::{
    adjust_icmp_checksum_4to6, adjust_icmp_checksum_6to4, compute_checksum_parts, fold_checksum,
    ipv6_pseudo_header_sum, is_valid_transport_checksum_ipv6, ones_complement_sum,
};
use crate::config::TranslatorConfig;
use crate::error::{DropReason, XlatResult};
use crate::packet::{
    fragment_header, ipv4_flags_offset, Fragment, Ipv4Header, Ipv4Packet, Ipv6Header, Ipv6Packet,
    ICMP_HEADER_SIZE, IPV4_HEADER_SIZE, IPV6_FRAGMENT_HEADER_SIZE, IPV6_HEADER_SIZE, NH_FRAGMENT,
    PROTO_ICMP, PROTO_ICMPV6,
};
use std::net::Ipv6Addr;

pub const ICMPV4_ECHO_REPLY: u8 = 0;
pub const ICMPV4_DEST_UNREACHABLE: u8 = 3;
pub const ICMPV4_ECHO_REQUEST: u8 = 8;
pub const ICMPV4_TIME_EXCEEDED: u8 = 11;
pub const ICMPV4_PARAMETER_PROBLEM: u8 = 12;

pub const ICMPV6_DEST_UNREACHABLE: u8 = 1;
pub const ICMPV6_PACKET_TOO_BIG: u8 = 2;
pub const ICMPV6_TIME_EXCEEDED: u8 = 3;
pub const ICMPV6_PARAMETER_PROBLEM: u8 = 4;
pub const ICMPV6_ECHO_REQUEST: u8 = 128;
pub const ICMPV6_ECHO_REPLY: u8 = 129;

/// Largest ICMPv4 error datagram (RFC 1812 section 4.3.2.3).
pub const ICMPV4_ERROR_MAX_SIZE: usize = 576;

/// Largest ICMPv6 error datagram (RFC 4443 section 2.4).
pub const ICMPV6_ERROR_MAX_SIZE: usize = 1280;

/// Embedded transport bytes kept in an ICMPv4 lead-in.
const ICMPV4_EMBEDDED_TRANSPORT_BYTES: usize = 4;

/// Embedded transport bytes kept in an ICMPv6 lead-in.
const ICMPV6_EMBEDDED_TRANSPORT_BYTES: usize = 8;

/// Path MTU plateaus from RFC 1191 section 7.
const MTU_PLATEAUS: [u16; 10] = [32000, 17914, 8166, 4352, 2002, 1492, 1006, 508, 296, 68];

/// A translated ICMP message: rewritten lead-in plus borrowed remainder.
///
/// Whenever `trailing` is present, the lead-in length is a multiple of 8.
#[derive(Debug, Clone)]
pub struct IcmpMessage<'a, const N: usize> {
    lead_in: [u8; N],
    lead_in_len: usize,
    trailing: Option<&'a [u8]>,
}

/// Translated ICMPv4 message (8 + 20 + 4 byte lead-in, with headroom).
pub type Icmpv4Message<'a> = IcmpMessage<'a, 36>;

/// Translated ICMPv6 message (8 + 40 + 8 + 8 byte lead-in, with headroom).
pub type Icmpv6Message<'a> = IcmpMessage<'a, 72>;

impl<'a, const N: usize> IcmpMessage<'a, N> {
    fn new() -> Self {
        Self {
            lead_in: [0u8; N],
            lead_in_len: 0,
            trailing: None,
        }
    }

    #[inline]
    pub fn lead_in(&self) -> &[u8] {
        &self.lead_in[..self.lead_in_len]
    }

    #[inline]
    pub fn trailing(&self) -> Option<&'a [u8]> {
        self.trailing
    }

    #[inline]
    pub fn trailing_len(&self) -> usize {
        self.trailing.map_or(0, <[u8]>::len)
    }

    /// Total ICMP message length.
    #[inline]
    pub fn len(&self) -> usize {
        self.lead_in_len + self.trailing_len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn icmp_type(&self) -> u8 {
        self.lead_in[0]
    }

    pub fn code(&self) -> u8 {
        self.lead_in[1]
    }

    fn push(&mut self, bytes: &[u8]) {
        self.lead_in[self.lead_in_len..self.lead_in_len + bytes.len()].copy_from_slice(bytes);
        self.lead_in_len += bytes.len();
    }

    fn write_header(&mut self, icmp_type: u8, code: u8, rest: [u8; 4]) {
        self.push(&[icmp_type, code, 0, 0]);
        self.push(&rest);
    }

    /// Attach the borrowed remainder, cut so the message fits `max_len`.
    fn set_trailing(&mut self, trailing: &'a [u8], max_len: usize) {
        let room = max_len.saturating_sub(self.lead_in_len);
        let trailing = &trailing[..trailing.len().min(room)];
        self.trailing = (!trailing.is_empty()).then_some(trailing);
    }

    fn set_checksum(&mut self, checksum: u16) {
        self.lead_in[2..4].copy_from_slice(&checksum.to_be_bytes());
    }

    /// Ones' complement sum of lead-in and trailing slice.
    fn checksum_with(&self, initial: u32) -> u16 {
        match self.trailing {
            Some(trailing) => compute_checksum_parts(initial, &[self.lead_in(), trailing]),
            None => compute_checksum_parts(initial, &[self.lead_in()]),
        }
    }
}

#[inline]
fn rest_of_header(message: &[u8]) -> [u8; 4] {
    [message[4], message[5], message[6], message[7]]
}

/// Translate an ICMPv6 message (starting at its type byte) to ICMPv4.
///
/// `in_src` / `in_dst` are the outer IPv6 addresses, needed to verify the
/// incoming checksum. The returned message carries a valid ICMPv4 checksum.
pub fn translate_icmpv6_to_icmpv4<'a>(
    config: &TranslatorConfig,
    message: &'a [u8],
    in_src: Ipv6Addr,
    in_dst: Ipv6Addr,
) -> XlatResult<Icmpv4Message<'a>> {
    if message.len() < ICMP_HEADER_SIZE {
        return Err(DropReason::Truncated);
    }

    if config.checksum.icmpv6 && !is_valid_transport_checksum_ipv6(in_src, in_dst, PROTO_ICMPV6, message) {
        return Err(DropReason::BadChecksum);
    }

    let icmp_type = message[0];
    let code = message[1];
    let untranslatable = DropReason::UntranslatableIcmp { icmp_type, code };
    let mut out = Icmpv4Message::new();

    let (out_type, out_code, rest) = match (icmp_type, code) {
        (ICMPV6_ECHO_REQUEST | ICMPV6_ECHO_REPLY, _) => {
            let out_type = if icmp_type == ICMPV6_ECHO_REQUEST {
                ICMPV4_ECHO_REQUEST
            } else {
                ICMPV4_ECHO_REPLY
            };
            out.write_header(out_type, 0, rest_of_header(message));
            out.set_trailing(&message[ICMP_HEADER_SIZE..], usize::MAX);
            let checksum = out.checksum_with(0);
            out.set_checksum(checksum);
            return Ok(out);
        }
        (ICMPV6_DEST_UNREACHABLE, 0 | 2 | 3) => (ICMPV4_DEST_UNREACHABLE, 1, [0; 4]),
        (ICMPV6_DEST_UNREACHABLE, 1) => (ICMPV4_DEST_UNREACHABLE, 10, [0; 4]),
        (ICMPV6_DEST_UNREACHABLE, 4) => (ICMPV4_DEST_UNREACHABLE, 3, [0; 4]),
        (ICMPV6_PACKET_TOO_BIG, 0) => {
            let mtu6 = u32::from_be_bytes(rest_of_header(message));
            let mtu4 = mtu6
                .saturating_sub(20)
                .min(config.ipv4_outbound_mtu as u32)
                .min(u16::MAX as u32) as u16;
            let mtu = mtu4.to_be_bytes();
            (ICMPV4_DEST_UNREACHABLE, 4, [0, 0, mtu[0], mtu[1]])
        }
        (ICMPV6_TIME_EXCEEDED, 0 | 1) => (ICMPV4_TIME_EXCEEDED, code, [0; 4]),
        (ICMPV6_PARAMETER_PROBLEM, 0) => {
            let pointer = u32::from_be_bytes(rest_of_header(message));
            let mapped = map_pointer_6to4(pointer).ok_or(untranslatable)?;
            (ICMPV4_PARAMETER_PROBLEM, 0, [mapped, 0, 0, 0])
        }
        (ICMPV6_PARAMETER_PROBLEM, 1) => (ICMPV4_DEST_UNREACHABLE, 2, [0; 4]),
        _ => return Err(untranslatable),
    };

    out.write_header(out_type, out_code, rest);
    translate_embedded_ipv6(config, &message[ICMP_HEADER_SIZE..], &mut out)?;
    let checksum = out.checksum_with(0);
    out.set_checksum(checksum);
    Ok(out)
}

/// Rewrite the IPv6 packet quoted in an ICMPv6 error as an IPv4 packet.
fn translate_embedded_ipv6<'a>(
    config: &TranslatorConfig,
    embedded: &'a [u8],
    out: &mut Icmpv4Message<'a>,
) -> XlatResult<()> {
    let inner = Ipv6Packet::parse_embedded(embedded)?;

    let src = translate_embedded_6to4(config, inner.src).ok_or(DropReason::UntranslatableAddress)?;
    let dst = translate_embedded_6to4(config, inner.dst).ok_or(DropReason::UntranslatableAddress)?;

    let upper_len = inner.declared_upper_len();
    let total_len =
        u16::try_from(IPV4_HEADER_SIZE + upper_len).map_err(|_| DropReason::EmbeddedTooLong)?;

    let fragment = inner.fragment.filter(Fragment::is_fragmented);
    let (id, flags_offset) = match fragment {
        Some(frag) => (frag.id as u16, ipv4_flags_offset(false, Some(frag))),
        None => (0, ipv4_flags_offset(true, None)),
    };

    let header = Ipv4Header {
        tos: if config.copy_dscp_and_ecn_6to4 { inner.traffic_class } else { 0 },
        total_len,
        id,
        flags_offset,
        ttl: inner.hop_limit,
        protocol: if inner.protocol == PROTO_ICMPV6 { PROTO_ICMP } else { inner.protocol },
        src,
        dst,
    };
    out.push(&header.to_bytes());

    let payload = inner.payload;
    let head_len = payload.len().min(ICMPV4_EMBEDDED_TRANSPORT_BYTES);
    let mut head = [0u8; ICMPV4_EMBEDDED_TRANSPORT_BYTES];
    head[..head_len].copy_from_slice(&payload[..head_len]);

    if inner.protocol == PROTO_ICMPV6 && !inner.is_non_first_fragment() {
        rewrite_embedded_icmpv6_echo(&mut head[..head_len], &inner, upper_len)?;
    }

    out.push(&head[..head_len]);
    out.set_trailing(&payload[head_len..], ICMPV4_ERROR_MAX_SIZE - IPV4_HEADER_SIZE);
    Ok(())
}

/// Turn the start of an embedded ICMPv6 echo into ICMPv4, fixing its checksum.
fn rewrite_embedded_icmpv6_echo(head: &mut [u8], inner: &Ipv6Packet<'_>, upper_len: usize) -> XlatResult<()> {
    if head.len() < 4 {
        return Err(DropReason::Truncated);
    }

    let new_type = match head[0] {
        ICMPV6_ECHO_REQUEST => ICMPV4_ECHO_REQUEST,
        ICMPV6_ECHO_REPLY => ICMPV4_ECHO_REPLY,
        icmp_type => {
            return Err(DropReason::UntranslatableIcmp {
                icmp_type,
                code: head[1],
            })
        }
    };

    let old_type_code = u16::from_be_bytes([head[0], head[1]]);
    let new_type_code = u16::from_be_bytes([new_type, head[1]]);
    let old_checksum = u16::from_be_bytes([head[2], head[3]]);
    let checksum = adjust_icmp_checksum_6to4(
        old_checksum,
        old_type_code,
        new_type_code,
        inner.src,
        inner.dst,
        upper_len as u32,
    );

    head[0] = new_type;
    head[2..4].copy_from_slice(&checksum.to_be_bytes());
    Ok(())
}

/// Translate an ICMPv4 message (starting at its type byte) to ICMPv6.
///
/// `out_src` / `out_dst` are the addresses of the outgoing IPv6 header; the
/// returned message carries a valid ICMPv6 checksum over that pseudo-header.
pub fn translate_icmpv4_to_icmpv6<'a>(
    config: &TranslatorConfig,
    message: &'a [u8],
    out_src: Ipv6Addr,
    out_dst: Ipv6Addr,
) -> XlatResult<Icmpv6Message<'a>> {
    if message.len() < ICMP_HEADER_SIZE {
        return Err(DropReason::Truncated);
    }

    if config.checksum.icmpv4 && fold_checksum(ones_complement_sum(message)) != 0xFFFF {
        return Err(DropReason::BadChecksum);
    }

    let icmp_type = message[0];
    let code = message[1];
    let untranslatable = DropReason::UntranslatableIcmp { icmp_type, code };
    let mut out = Icmpv6Message::new();

    let (out_type, out_code, rest) = match (icmp_type, code) {
        (ICMPV4_ECHO_REQUEST | ICMPV4_ECHO_REPLY, _) => {
            let out_type = if icmp_type == ICMPV4_ECHO_REQUEST {
                ICMPV6_ECHO_REQUEST
            } else {
                ICMPV6_ECHO_REPLY
            };
            out.write_header(out_type, 0, rest_of_header(message));
            out.set_trailing(&message[ICMP_HEADER_SIZE..], usize::MAX);
            finish_icmpv6(&mut out, out_src, out_dst);
            return Ok(out);
        }
        (ICMPV4_DEST_UNREACHABLE, 0 | 1 | 5 | 6 | 7 | 8 | 11 | 12) => (ICMPV6_DEST_UNREACHABLE, 0, [0; 4]),
        (ICMPV4_DEST_UNREACHABLE, 2) => (ICMPV6_PARAMETER_PROBLEM, 1, 6u32.to_be_bytes()),
        (ICMPV4_DEST_UNREACHABLE, 3) => (ICMPV6_DEST_UNREACHABLE, 4, [0; 4]),
        (ICMPV4_DEST_UNREACHABLE, 4) => {
            let mtu4 = u16::from_be_bytes([message[6], message[7]]);
            let mtu6 = packet_too_big_mtu(config, mtu4, &message[ICMP_HEADER_SIZE..]);
            (ICMPV6_PACKET_TOO_BIG, 0, mtu6.to_be_bytes())
        }
        (ICMPV4_DEST_UNREACHABLE, 9 | 10 | 13 | 15) => (ICMPV6_DEST_UNREACHABLE, 1, [0; 4]),
        (ICMPV4_TIME_EXCEEDED, 0 | 1) => (ICMPV6_TIME_EXCEEDED, code, [0; 4]),
        (ICMPV4_PARAMETER_PROBLEM, 0 | 2) => {
            let mapped = map_pointer_4to6(message[4]).ok_or(untranslatable)?;
            (ICMPV6_PARAMETER_PROBLEM, 0, (mapped as u32).to_be_bytes())
        }
        _ => return Err(untranslatable),
    };

    out.write_header(out_type, out_code, rest);
    translate_embedded_ipv4(config, &message[ICMP_HEADER_SIZE..], &mut out)?;
    finish_icmpv6(&mut out, out_src, out_dst);
    Ok(out)
}

fn finish_icmpv6(out: &mut Icmpv6Message<'_>, src: Ipv6Addr, dst: Ipv6Addr) {
    let pseudo = ipv6_pseudo_header_sum(src, dst, PROTO_ICMPV6, out.len() as u32);
    let checksum = out.checksum_with(pseudo);
    out.set_checksum(checksum);
}

/// MTU reported in an ICMPv6 Packet Too Big built from ICMPv4 "fragmentation needed".
fn packet_too_big_mtu(config: &TranslatorConfig, mtu4: u16, embedded: &[u8]) -> u32 {
    let mtu4 = if mtu4 == 0 {
        // Pre-RFC 1191 routers report zero; estimate from the quoted total length
        let total_len = if embedded.len() >= 4 {
            u16::from_be_bytes([embedded[2], embedded[3]])
        } else {
            0
        };
        MTU_PLATEAUS
            .iter()
            .copied()
            .find(|&plateau| plateau < total_len)
            .unwrap_or(68)
    } else {
        mtu4
    };

    (mtu4 as u32 + 20)
        .min(config.ipv6_outbound_mtu as u32)
        .max(crate::config::MIN_IPV6_MTU as u32)
}

/// Rewrite the IPv4 packet quoted in an ICMPv4 error as an IPv6 packet.
fn translate_embedded_ipv4<'a>(
    config: &TranslatorConfig,
    embedded: &'a [u8],
    out: &mut Icmpv6Message<'a>,
) -> XlatResult<()> {
    let inner = Ipv4Packet::parse_embedded(embedded)?;

    let src = translate_embedded_4to6(config, inner.src);
    let dst = translate_embedded_4to6(config, inner.dst);

    let upper_len = inner.declared_payload_len();
    let protocol = if inner.protocol == PROTO_ICMP { PROTO_ICMPV6 } else { inner.protocol };
    let fragment = inner.fragment.filter(Fragment::is_fragmented);
    let ext_len = if fragment.is_some() { IPV6_FRAGMENT_HEADER_SIZE } else { 0 };
    let payload_len = u16::try_from(upper_len + ext_len).map_err(|_| DropReason::EmbeddedTooLong)?;

    let header = Ipv6Header {
        traffic_class: if config.copy_dscp_and_ecn_4to6 { inner.tos } else { 0 },
        payload_len,
        next_header: if fragment.is_some() { NH_FRAGMENT } else { protocol },
        hop_limit: inner.ttl,
        src,
        dst,
    };
    out.push(&header.to_bytes());
    if let Some(frag) = fragment {
        out.push(&fragment_header(protocol, frag));
    }

    let payload = inner.payload;
    let head_len = payload.len().min(ICMPV6_EMBEDDED_TRANSPORT_BYTES);
    let mut head = [0u8; ICMPV6_EMBEDDED_TRANSPORT_BYTES];
    head[..head_len].copy_from_slice(&payload[..head_len]);

    if inner.protocol == PROTO_ICMP && !inner.is_non_first_fragment() {
        rewrite_embedded_icmpv4_echo(&mut head[..head_len], src, dst, upper_len)?;
    }

    out.push(&head[..head_len]);
    out.set_trailing(&payload[head_len..], ICMPV6_ERROR_MAX_SIZE - IPV6_HEADER_SIZE);
    Ok(())
}

fn rewrite_embedded_icmpv4_echo(
    head: &mut [u8],
    src: Ipv6Addr,
    dst: Ipv6Addr,
    upper_len: usize,
) -> XlatResult<()> {
    if head.len() < 4 {
        return Err(DropReason::Truncated);
    }

    let new_type = match head[0] {
        ICMPV4_ECHO_REQUEST => ICMPV6_ECHO_REQUEST,
        ICMPV4_ECHO_REPLY => ICMPV6_ECHO_REPLY,
        icmp_type => {
            return Err(DropReason::UntranslatableIcmp {
                icmp_type,
                code: head[1],
            })
        }
    };

    let old_type_code = u16::from_be_bytes([head[0], head[1]]);
    let new_type_code = u16::from_be_bytes([new_type, head[1]]);
    let old_checksum = u16::from_be_bytes([head[2], head[3]]);
    let checksum =
        adjust_icmp_checksum_4to6(old_checksum, old_type_code, new_type_code, src, dst, upper_len as u32);

    head[0] = new_type;
    head[2..4].copy_from_slice(&checksum.to_be_bytes());
    Ok(())
}

/// Map an ICMPv6 Parameter Problem pointer to the IPv4 header field.
fn map_pointer_6to4(pointer: u32) -> Option<u8> {
    match pointer {
        0 => Some(0),       // Version / traffic class
        1 => Some(1),       // Traffic class
        4 | 5 => Some(2),   // Payload length -> total length
        6 => Some(9),       // Next header -> protocol
        7 => Some(8),       // Hop limit -> TTL
        8..=23 => Some(12), // Source address
        24..=39 => Some(16), // Destination address
        _ => None,
    }
}

/// Map an ICMPv4 Parameter Problem pointer to the IPv6 header field.
fn map_pointer_4to6(pointer: u8) -> Option<u8> {
    match pointer {
        0 => Some(0),
        1 => Some(1),
        2 | 3 => Some(4),
        8 => Some(7),
        9 => Some(6),
        12..=15 => Some(8),
        16..=19 => Some(24),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{compute_checksum, transport_checksum_ipv6};
    use crate::config::tests::nat64_config;
    use crate::packet::PROTO_TCP;
    use std::net::Ipv4Addr;

    fn remote6() -> Ipv6Addr {
        "64:ff9b::198.51.100.1".parse().unwrap()
    }

    /// Build an ICMPv6 message with a valid checksum.
    fn icmpv6(src: Ipv6Addr, dst: Ipv6Addr, icmp_type: u8, code: u8, rest: [u8; 4], body: &[u8]) -> Vec<u8> {
        let mut msg = vec![icmp_type, code, 0, 0];
        msg.extend_from_slice(&rest);
        msg.extend_from_slice(body);
        let checksum = transport_checksum_ipv6(src, dst, PROTO_ICMPV6, &msg);
        msg[2..4].copy_from_slice(&checksum.to_be_bytes());
        msg
    }

    /// Build an ICMPv4 message with a valid checksum.
    fn icmpv4(icmp_type: u8, code: u8, rest: [u8; 4], body: &[u8]) -> Vec<u8> {
        let mut msg = vec![icmp_type, code, 0, 0];
        msg.extend_from_slice(&rest);
        msg.extend_from_slice(body);
        let checksum = compute_checksum(&msg);
        msg[2..4].copy_from_slice(&checksum.to_be_bytes());
        msg
    }

    fn assemble<const N: usize>(msg: &IcmpMessage<'_, N>) -> Vec<u8> {
        let mut bytes = msg.lead_in().to_vec();
        if let Some(trailing) = msg.trailing() {
            bytes.extend_from_slice(trailing);
        }
        bytes
    }

    /// IPv6 packet carrying a TCP header of `tcp_len` bytes, as a host sent it.
    fn embedded_ipv6_tcp(src: Ipv6Addr, dst: Ipv6Addr, tcp_len: usize) -> Vec<u8> {
        let mut packet = Ipv6Header {
            traffic_class: 0,
            payload_len: tcp_len as u16,
            next_header: PROTO_TCP,
            hop_limit: 63,
            src,
            dst,
        }
        .to_bytes()
        .to_vec();
        let mut tcp = vec![0u8; tcp_len];
        tcp[0..2].copy_from_slice(&40000u16.to_be_bytes());
        tcp[2..4].copy_from_slice(&443u16.to_be_bytes());
        for (i, byte) in tcp.iter_mut().enumerate().skip(4) {
            *byte = i as u8;
        }
        packet.extend_from_slice(&tcp);
        packet
    }

    #[test]
    fn test_echo_request_6to4() {
        let config = nat64_config();
        let msg = icmpv6(config.translator_ipv6, remote6(), 128, 0, [0x12, 0x34, 0, 1], b"ping");

        let out = translate_icmpv6_to_icmpv4(&config, &msg, config.translator_ipv6, remote6()).unwrap();
        assert_eq!(out.icmp_type(), ICMPV4_ECHO_REQUEST);
        assert_eq!(out.lead_in().len(), 8);
        assert_eq!(out.trailing(), Some(&b"ping"[..]));

        let bytes = assemble(&out);
        assert_eq!(&bytes[4..8], &[0x12, 0x34, 0, 1]);
        assert_eq!(compute_checksum(&bytes), 0);
    }

    #[test]
    fn test_echo_reply_4to6() {
        let config = nat64_config();
        let msg = icmpv4(0, 0, [0xab, 0xcd, 0, 7], &[1, 2, 3]);

        let out = translate_icmpv4_to_icmpv6(&config, &msg, remote6(), config.translator_ipv6).unwrap();
        assert_eq!(out.icmp_type(), ICMPV6_ECHO_REPLY);

        let bytes = assemble(&out);
        assert!(is_valid_transport_checksum_ipv6(
            remote6(),
            config.translator_ipv6,
            PROTO_ICMPV6,
            &bytes
        ));
    }

    #[test]
    fn test_bad_icmpv6_checksum_dropped() {
        let config = nat64_config();
        let mut msg = icmpv6(config.translator_ipv6, remote6(), 128, 0, [0, 1, 0, 1], b"x");
        msg[8] ^= 0xFF;

        assert_eq!(
            translate_icmpv6_to_icmpv4(&config, &msg, config.translator_ipv6, remote6()).unwrap_err(),
            DropReason::BadChecksum
        );

        let mut config = config;
        config.checksum.icmpv6 = false;
        assert!(translate_icmpv6_to_icmpv4(&config, &msg, config.translator_ipv6, remote6()).is_ok());
    }

    #[test]
    fn test_packet_too_big_with_embedded_tcp() {
        let config = nat64_config();
        // The translator host's TCP segment towards a remote IPv4 host bounced back
        let embedded = embedded_ipv6_tcp(config.translator_ipv6, remote6(), 40);
        let router: Ipv6Addr = "64:ff9b::203.0.113.1".parse().unwrap();
        let msg = icmpv6(router, config.translator_ipv6, 2, 0, 1400u32.to_be_bytes(), &embedded);

        let out = translate_icmpv6_to_icmpv4(&config, &msg, router, config.translator_ipv6).unwrap();
        assert_eq!((out.icmp_type(), out.code()), (3, 4));

        let lead = out.lead_in();
        assert_eq!(lead.len(), 32);
        assert_eq!(u16::from_be_bytes([lead[6], lead[7]]), 1380);

        // Embedded IPv4 header
        let inner = &lead[8..28];
        assert_eq!(inner[0], 0x45);
        assert_eq!(u16::from_be_bytes([inner[2], inner[3]]), 60);
        assert_eq!(inner[8], 63);
        assert_eq!(inner[9], PROTO_TCP);
        assert_eq!(Ipv4Addr::new(inner[12], inner[13], inner[14], inner[15]), config.translator_ipv4);
        assert_eq!(Ipv4Addr::new(inner[16], inner[17], inner[18], inner[19]), Ipv4Addr::new(198, 51, 100, 1));

        // Ports unchanged, rest of TCP header borrowed from the input
        assert_eq!(u16::from_be_bytes([lead[28], lead[29]]), 40000);
        assert_eq!(u16::from_be_bytes([lead[30], lead[31]]), 443);
        let trailing = out.trailing().unwrap();
        assert_eq!(trailing.len(), 36);
        assert_eq!(trailing.as_ptr(), embedded_tail_ptr(&msg, 8 + 40 + 4));

        assert_eq!(compute_checksum(&assemble(&out)), 0);
    }

    fn embedded_tail_ptr(msg: &[u8], offset: usize) -> *const u8 {
        msg[offset..].as_ptr()
    }

    #[test]
    fn test_packet_too_big_mtu_clamped_to_ipv4_mtu() {
        let mut config = nat64_config();
        config.ipv4_outbound_mtu = 1200;
        let embedded = embedded_ipv6_tcp(config.translator_ipv6, remote6(), 20);
        let msg = icmpv6(remote6(), config.translator_ipv6, 2, 0, 9000u32.to_be_bytes(), &embedded);

        let out = translate_icmpv6_to_icmpv4(&config, &msg, remote6(), config.translator_ipv6).unwrap();
        assert_eq!(u16::from_be_bytes([out.lead_in()[6], out.lead_in()[7]]), 1200);
    }

    #[test]
    fn test_short_embedded_transport_kept_in_lead_in() {
        let config = nat64_config();
        let embedded = embedded_ipv6_tcp(config.translator_ipv6, remote6(), 20);
        let msg = icmpv6(remote6(), config.translator_ipv6, 1, 4, [0; 4], &embedded[..43]);

        let out = translate_icmpv6_to_icmpv4(&config, &msg, remote6(), config.translator_ipv6).unwrap();
        assert_eq!((out.icmp_type(), out.code()), (3, 3));
        assert_eq!(out.lead_in().len(), 8 + 20 + 3);
        assert!(out.trailing().is_none());
    }

    #[test]
    fn test_icmpv4_error_truncated_to_576() {
        let config = nat64_config();
        let embedded = embedded_ipv6_tcp(config.translator_ipv6, remote6(), 1200);
        let msg = icmpv6(remote6(), config.translator_ipv6, 3, 0, [0; 4], &embedded);

        let out = translate_icmpv6_to_icmpv4(&config, &msg, remote6(), config.translator_ipv6).unwrap();
        assert_eq!(out.len() + IPV4_HEADER_SIZE, ICMPV4_ERROR_MAX_SIZE);
        assert_eq!(out.lead_in().len() % 8, 0);
        assert_eq!(compute_checksum(&assemble(&out)), 0);
    }

    #[test]
    fn test_embedded_address_outside_prefix_dropped() {
        let config = nat64_config();
        let embedded = embedded_ipv6_tcp(config.translator_ipv6, "2001:db8::99".parse().unwrap(), 20);
        let msg = icmpv6(remote6(), config.translator_ipv6, 1, 0, [0; 4], &embedded);

        assert_eq!(
            translate_icmpv6_to_icmpv4(&config, &msg, remote6(), config.translator_ipv6).unwrap_err(),
            DropReason::UntranslatableAddress
        );
    }

    #[test]
    fn test_untranslatable_types_dropped() {
        let config = nat64_config();
        // Neighbor solicitation
        let msg = icmpv6(remote6(), config.translator_ipv6, 135, 0, [0; 4], &[0; 16]);
        assert_eq!(
            translate_icmpv6_to_icmpv4(&config, &msg, remote6(), config.translator_ipv6).unwrap_err(),
            DropReason::UntranslatableIcmp {
                icmp_type: 135,
                code: 0
            }
        );

        // ICMPv4 timestamp request
        let msg = icmpv4(13, 0, [0; 4], &[0; 12]);
        assert!(translate_icmpv4_to_icmpv6(&config, &msg, remote6(), config.translator_ipv6).is_err());
    }

    #[test]
    fn test_parameter_problem_pointer_mapping() {
        assert_eq!(map_pointer_6to4(7), Some(8));
        assert_eq!(map_pointer_6to4(30), Some(16));
        assert_eq!(map_pointer_6to4(2), None);
        assert_eq!(map_pointer_4to6(9), Some(6));
        assert_eq!(map_pointer_4to6(17), Some(24));
        assert_eq!(map_pointer_4to6(10), None);
    }

    /// IPv4 packet as quoted by a router, `data_len` bytes of transport data.
    fn embedded_ipv4(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, transport: &[u8], total_len: u16) -> Vec<u8> {
        let mut packet = Ipv4Header {
            tos: 0,
            total_len,
            id: 0,
            flags_offset: crate::packet::IPV4_FLAG_DF,
            ttl: 1,
            protocol,
            src,
            dst,
        }
        .to_bytes()
        .to_vec();
        packet.extend_from_slice(transport);
        packet
    }

    #[test]
    fn test_time_exceeded_4to6_embedded_in_prefix() {
        let config = nat64_config();
        let remote = Ipv4Addr::new(198, 51, 100, 1);
        let mut udp = vec![0u8; 16];
        udp[0..2].copy_from_slice(&5353u16.to_be_bytes());
        let embedded = embedded_ipv4(config.translator_ipv4, remote, 17, &udp, 36);
        let msg = icmpv4(11, 0, [0; 4], &embedded);
        let router6: Ipv6Addr = "64:ff9b::10.1.1.1".parse().unwrap();

        let out = translate_icmpv4_to_icmpv6(&config, &msg, router6, config.translator_ipv6).unwrap();
        assert_eq!((out.icmp_type(), out.code()), (3, 0));

        let lead = out.lead_in();
        assert_eq!(lead.len(), 8 + 40 + 8);
        let inner = &lead[8..48];
        assert_eq!(inner[0] >> 4, 6);
        assert_eq!(u16::from_be_bytes([inner[4], inner[5]]), 16);
        assert_eq!(inner[6], 17);
        assert_eq!(crate::packet::ipv6_from_slice(&inner[8..24]), config.translator_ipv6);
        assert_eq!(crate::packet::ipv6_from_slice(&inner[24..40]), remote6());
        assert_eq!(out.trailing().map(<[u8]>::len), Some(8));

        assert!(is_valid_transport_checksum_ipv6(
            router6,
            config.translator_ipv6,
            PROTO_ICMPV6,
            &assemble(&out)
        ));
    }

    #[test]
    fn test_fragmentation_needed_mtu() {
        let config = nat64_config();
        let embedded = embedded_ipv4(config.translator_ipv4, Ipv4Addr::new(198, 51, 100, 1), 6, &[0; 8], 1500);

        let msg = icmpv4(3, 4, [0, 0, 0x05, 0x78], &embedded); // MTU 1400
        let out = translate_icmpv4_to_icmpv6(&config, &msg, remote6(), config.translator_ipv6).unwrap();
        assert_eq!((out.icmp_type(), out.code()), (2, 0));
        assert_eq!(u32::from_be_bytes([out.lead_in()[4], out.lead_in()[5], out.lead_in()[6], out.lead_in()[7]]), 1420);

        // Never below the IPv6 minimum MTU
        let msg = icmpv4(3, 4, [0, 0, 0x02, 0x40], &embedded); // MTU 576
        let out = translate_icmpv4_to_icmpv6(&config, &msg, remote6(), config.translator_ipv6).unwrap();
        assert_eq!(u32::from_be_bytes([out.lead_in()[4], out.lead_in()[5], out.lead_in()[6], out.lead_in()[7]]), 1280);
    }

    #[test]
    fn test_fragmentation_needed_zero_mtu_uses_plateau() {
        let mut config = nat64_config();
        config.ipv6_outbound_mtu = 9000;
        let embedded = embedded_ipv4(config.translator_ipv4, Ipv4Addr::new(198, 51, 100, 1), 6, &[0; 8], 4000);
        let msg = icmpv4(3, 4, [0; 4], &embedded);

        let out = translate_icmpv4_to_icmpv6(&config, &msg, remote6(), config.translator_ipv6).unwrap();
        // Largest plateau below 4000 is 2002
        assert_eq!(u32::from_be_bytes([out.lead_in()[4], out.lead_in()[5], out.lead_in()[6], out.lead_in()[7]]), 2022);
    }

    #[test]
    fn test_embedded_echo_rewritten() {
        let config = nat64_config();
        let remote = Ipv4Addr::new(198, 51, 100, 1);

        // Echo request from the translator's IPv4 side, as an ICMPv4 host built it
        let mut echo = vec![8, 0, 0, 0, 0x11, 0x22, 0, 5, b'a', b'b', b'c', b'd'];
        let checksum = compute_checksum(&echo);
        echo[2..4].copy_from_slice(&checksum.to_be_bytes());
        let embedded = embedded_ipv4(config.translator_ipv4, remote, PROTO_ICMP, &echo, 32);
        let msg = icmpv4(11, 0, [0; 4], &embedded);

        let out = translate_icmpv4_to_icmpv6(&config, &msg, remote6(), config.translator_ipv6).unwrap();
        let bytes = assemble(&out);
        let inner_echo = &bytes[48..];
        assert_eq!(inner_echo[0], ICMPV6_ECHO_REQUEST);
        assert!(is_valid_transport_checksum_ipv6(
            config.translator_ipv6,
            remote6(),
            PROTO_ICMPV6,
            inner_echo
        ));
    }

    #[test]
    fn test_error_inside_error_dropped() {
        let config = nat64_config();
        let inner_error = icmpv4(3, 3, [0; 4], &[0; 28]);
        let embedded = embedded_ipv4(config.translator_ipv4, Ipv4Addr::new(198, 51, 100, 1), PROTO_ICMP, &inner_error, 56);
        let msg = icmpv4(11, 0, [0; 4], &embedded);

        assert!(matches!(
            translate_icmpv4_to_icmpv6(&config, &msg, remote6(), config.translator_ipv6),
            Err(DropReason::UntranslatableIcmp { icmp_type: 3, .. })
        ));
    }

    #[test]
    fn test_embedded_wrong_version_dropped() {
        let config = nat64_config();
        let embedded = embedded_ipv6_tcp(config.translator_ipv6, remote6(), 20);
        let msg = icmpv4(3, 1, [0; 4], &embedded);

        assert_eq!(
            translate_icmpv4_to_icmpv6(&config, &msg, remote6(), config.translator_ipv6).unwrap_err(),
            DropReason::UnsupportedVersion(6)
        );
    }

    #[test]
    fn test_lead_in_multiple_of_eight_with_trailing() {
        let config = nat64_config();
        let embedded = embedded_ipv4(
            config.translator_ipv4,
            Ipv4Addr::new(198, 51, 100, 1),
            PROTO_TCP,
            &[7u8; 100],
            120,
        );
        let msg = icmpv4(3, 3, [0; 4], &embedded);

        let out = translate_icmpv4_to_icmpv6(&config, &msg, remote6(), config.translator_ipv6).unwrap();
        assert!(out.trailing().is_some());
        assert_eq!(out.lead_in().len() % 8, 0);
    }
}
