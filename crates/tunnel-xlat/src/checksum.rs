//! Internet checksum engine.
//!
//! Translation changes the checksum inputs in three ways:
//! - IPv4 carries a header checksum, IPv6 does not
//! - TCP/UDP checksums cover a pseudo-header whose layout differs per family
//! - ICMPv6 checksums cover a pseudo-header, ICMPv4 checksums do not
//!
//! Whole-segment recomputation is used whenever the full segment is present.
//! First fragments only carry part of the segment, so their checksums are
//! adjusted incrementally with the pseudo-header delta (RFC 1624).

use crate::packet::{PROTO_ICMPV6, PROTO_UDP};
use std::net::{Ipv4Addr, Ipv6Addr};

/// Compute the ones' complement sum of 16-bit words in a byte slice.
///
/// This is the core operation for IP/TCP/UDP checksum calculation.
#[inline]
pub fn ones_complement_sum(data: &[u8]) -> u32 {
    let mut sum: u32 = 0;

    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }

    // Odd trailing byte is padded with zero
    if let Some(&byte) = chunks.remainder().first() {
        sum += (byte as u32) << 8;
    }

    sum
}

/// Fold a 32-bit sum into a 16-bit ones' complement value.
#[inline]
pub fn fold_checksum(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

/// Compute the final ones' complement checksum.
#[inline]
pub fn compute_checksum(data: &[u8]) -> u16 {
    !fold_checksum(ones_complement_sum(data))
}

/// Compute a checksum over several discontiguous parts.
///
/// Every part except the last must have an even length, otherwise the 16-bit
/// word alignment of the following part would shift.
pub fn compute_checksum_parts(initial: u32, parts: &[&[u8]]) -> u16 {
    let mut sum = initial;
    for part in parts {
        sum = fold_checksum(sum) as u32 + fold_checksum(ones_complement_sum(part)) as u32;
    }
    !fold_checksum(sum)
}

/// Compute IPv4 header checksum.
///
/// The checksum field in the header should be set to 0 before calling this.
pub fn ipv4_header_checksum(header: &[u8]) -> u16 {
    debug_assert!(header.len() >= 20 && header.len() % 4 == 0);
    compute_checksum(header)
}

/// Check an IPv4 header including its checksum field.
#[inline]
pub fn is_valid_ipv4_header_checksum(header: &[u8]) -> bool {
    fold_checksum(ones_complement_sum(header)) == 0xFFFF
}

/// Compute IPv4 pseudo-header contribution to TCP/UDP checksum.
pub fn ipv4_pseudo_header_sum(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, length: u16) -> u32 {
    let src = src.octets();
    let dst = dst.octets();

    let mut sum: u32 = 0;
    sum += u16::from_be_bytes([src[0], src[1]]) as u32;
    sum += u16::from_be_bytes([src[2], src[3]]) as u32;
    sum += u16::from_be_bytes([dst[0], dst[1]]) as u32;
    sum += u16::from_be_bytes([dst[2], dst[3]]) as u32;
    sum += protocol as u32;
    sum += length as u32;
    sum
}

/// Compute IPv6 pseudo-header contribution to TCP/UDP/ICMPv6 checksum.
pub fn ipv6_pseudo_header_sum(src: Ipv6Addr, dst: Ipv6Addr, next_header: u8, length: u32) -> u32 {
    let mut sum = ones_complement_sum(&src.octets());
    sum += ones_complement_sum(&dst.octets());

    // Upper-layer packet length (32-bit, summed as two 16-bit values)
    sum += length >> 16;
    sum += length & 0xFFFF;

    // Next header (padded to 32 bits, upper 3 bytes are zero)
    sum += next_header as u32;

    sum
}

/// Compute a TCP/UDP checksum over a complete segment with an IPv4 pseudo-header.
///
/// The checksum field inside `segment` must be zero.
pub fn transport_checksum_ipv4(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, segment: &[u8]) -> u16 {
    let pseudo = ipv4_pseudo_header_sum(src, dst, protocol, segment.len() as u16);
    let checksum = !fold_checksum(pseudo + ones_complement_sum(segment));
    if protocol == PROTO_UDP && checksum == 0 {
        0xFFFF
    } else {
        checksum
    }
}

/// Compute a TCP/UDP/ICMPv6 checksum over a complete message with an IPv6 pseudo-header.
///
/// The checksum field inside `segment` must be zero.
pub fn transport_checksum_ipv6(src: Ipv6Addr, dst: Ipv6Addr, next_header: u8, segment: &[u8]) -> u16 {
    let pseudo = ipv6_pseudo_header_sum(src, dst, next_header, segment.len() as u32);
    let checksum = !fold_checksum(pseudo + ones_complement_sum(segment));
    // UDP checksum of 0 is transmitted as 0xFFFF in IPv6
    if next_header == PROTO_UDP && checksum == 0 {
        0xFFFF
    } else {
        checksum
    }
}

/// Verify a TCP/UDP segment (checksum field included) against an IPv4 pseudo-header.
pub fn is_valid_transport_checksum_ipv4(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, segment: &[u8]) -> bool {
    let pseudo = ipv4_pseudo_header_sum(src, dst, protocol, segment.len() as u16);
    fold_checksum(pseudo + ones_complement_sum(segment)) == 0xFFFF
}

/// Verify a TCP/UDP/ICMPv6 message (checksum field included) against an IPv6 pseudo-header.
pub fn is_valid_transport_checksum_ipv6(src: Ipv6Addr, dst: Ipv6Addr, next_header: u8, segment: &[u8]) -> bool {
    let pseudo = ipv6_pseudo_header_sum(src, dst, next_header, segment.len() as u32);
    fold_checksum(pseudo + ones_complement_sum(segment)) == 0xFFFF
}

/// Update a checksum incrementally when a 16-bit value changes.
///
/// This uses the algorithm from RFC 1624 for efficient checksum updates.
/// `old_checksum` is the current checksum (already complemented),
/// `old_value` is the old 16-bit value, `new_value` is the new 16-bit value.
#[inline]
pub fn update_checksum_16(old_checksum: u16, old_value: u16, new_value: u16) -> u16 {
    // HC' = ~(~HC + ~m + m') from RFC 1624
    let hc = !old_checksum as u32;
    let m = !old_value as u32;
    let m_prime = new_value as u32;

    !fold_checksum(hc + m + m_prime)
}

/// Replace a folded sum contribution inside an existing checksum.
///
/// `HC' = ~(~HC + ~old + new)`; the inversion of `old` is done on 16 bits
/// to avoid a 32-bit complement.
#[inline]
fn replace_sum(old_checksum: u16, old_sum: u32, new_sum: u32) -> u16 {
    let hc = !old_checksum as u32;
    let old_folded = fold_checksum(old_sum);
    let new_folded = fold_checksum(new_sum) as u32;
    !fold_checksum(hc + (!old_folded) as u32 + new_folded)
}

/// Adjust TCP/UDP checksum for IPv6-to-IPv4 translation.
///
/// This adjusts the checksum to account for the pseudo-header change
/// from IPv6 to IPv4 format.
///
/// # UDP Zero-Checksum Handling
///
/// In IPv6, UDP checksum is mandatory and should never be 0x0000. If
/// `old_checksum == 0x0000` and `protocol == 17` (UDP), this function returns
/// 0x0000 to keep the "no checksum" semantics of IPv4 UDP.
pub fn adjust_checksum_6to4(
    old_checksum: u16,
    src6: Ipv6Addr,
    dst6: Ipv6Addr,
    src4: Ipv4Addr,
    dst4: Ipv4Addr,
    protocol: u8,
    payload_len: u16,
) -> u16 {
    if protocol == PROTO_UDP && old_checksum == 0 {
        return 0;
    }

    let old_pseudo = ipv6_pseudo_header_sum(src6, dst6, protocol, payload_len as u32);
    let new_pseudo = ipv4_pseudo_header_sum(src4, dst4, protocol, payload_len);

    let adjusted = replace_sum(old_checksum, old_pseudo, new_pseudo);
    if protocol == PROTO_UDP && adjusted == 0 {
        0xFFFF
    } else {
        adjusted
    }
}

/// Adjust TCP/UDP checksum for IPv4-to-IPv6 translation.
///
/// Returns `None` for the IPv4 UDP zero-checksum case (protocol 17 with
/// `old_checksum == 0`), because IPv6 requires a checksum and the caller
/// must recompute the full UDP checksum.
pub fn adjust_checksum_4to6(
    old_checksum: u16,
    src4: Ipv4Addr,
    dst4: Ipv4Addr,
    src6: Ipv6Addr,
    dst6: Ipv6Addr,
    protocol: u8,
    payload_len: u16,
) -> Option<u16> {
    if protocol == PROTO_UDP && old_checksum == 0 {
        return None;
    }

    let old_pseudo = ipv4_pseudo_header_sum(src4, dst4, protocol, payload_len);
    let new_pseudo = ipv6_pseudo_header_sum(src6, dst6, protocol, payload_len as u32);

    let adjusted = replace_sum(old_checksum, old_pseudo, new_pseudo);
    if protocol == PROTO_UDP && adjusted == 0 {
        Some(0xFFFF)
    } else {
        Some(adjusted)
    }
}

/// Adjust an ICMP checksum for ICMPv4-to-ICMPv6 translation of a partial message.
///
/// Used for ICMP echo messages embedded in error messages, where only the
/// first bytes are available: the type/code word changes and the IPv6
/// pseudo-header gets added.
pub fn adjust_icmp_checksum_4to6(
    old_checksum: u16,
    old_type_code: u16,
    new_type_code: u16,
    src6: Ipv6Addr,
    dst6: Ipv6Addr,
    message_len: u32,
) -> u16 {
    let checksum = update_checksum_16(old_checksum, old_type_code, new_type_code);
    let pseudo = ipv6_pseudo_header_sum(src6, dst6, PROTO_ICMPV6, message_len);
    replace_sum(checksum, 0, pseudo)
}

/// Adjust an ICMP checksum for ICMPv6-to-ICMPv4 translation of a partial message.
pub fn adjust_icmp_checksum_6to4(
    old_checksum: u16,
    old_type_code: u16,
    new_type_code: u16,
    src6: Ipv6Addr,
    dst6: Ipv6Addr,
    message_len: u32,
) -> u16 {
    let pseudo = ipv6_pseudo_header_sum(src6, dst6, PROTO_ICMPV6, message_len);
    let checksum = replace_sum(old_checksum, pseudo, 0);
    update_checksum_16(checksum, old_type_code, new_type_code)
}
