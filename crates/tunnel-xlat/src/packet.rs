//! IPv4 / IPv6 header parsing and construction.
//!
//! Parsers borrow from the input buffer and never copy payload bytes.
//! Builders produce fixed-size header arrays that are pushed into the output
//! queue next to borrowed payload slices.

use crate::checksum::ipv4_header_checksum;
use crate::error::{DropReason, XlatResult};
use std::net::{Ipv4Addr, Ipv6Addr};

/// IPv4 header size (without options).
pub const IPV4_HEADER_SIZE: usize = 20;

/// IPv6 header size (fixed).
pub const IPV6_HEADER_SIZE: usize = 40;

/// IPv6 fragment extension header size.
pub const IPV6_FRAGMENT_HEADER_SIZE: usize = 8;

/// Minimum TCP header size.
pub const TCP_HEADER_MIN_SIZE: usize = 20;

/// UDP header size.
pub const UDP_HEADER_SIZE: usize = 8;

/// ICMP / ICMPv6 header size (type, code, checksum, 4 bytes rest-of-header).
pub const ICMP_HEADER_SIZE: usize = 8;

/// Largest packet an IPv4 or IPv6 length field can describe.
pub const MAX_PACKET_SIZE: usize = 65535;

pub const PROTO_ICMP: u8 = 1;
pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;
pub const PROTO_ICMPV6: u8 = 58;

pub const NH_HOP_BY_HOP: u8 = 0;
pub const NH_ROUTING: u8 = 43;
pub const NH_FRAGMENT: u8 = 44;
pub const NH_DESTINATION_OPTIONS: u8 = 60;

/// IPv4 "don't fragment" flag.
pub const IPV4_FLAG_DF: u16 = 0x4000;

/// IPv4 "more fragments" flag.
pub const IPV4_FLAG_MF: u16 = 0x2000;

const IPV4_OFFSET_MASK: u16 = 0x1FFF;

/// Fragmentation state of a packet, common to both families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    /// Identification, zero-extended for IPv4.
    pub id: u32,
    /// Offset of this fragment's payload in bytes.
    pub offset: usize,
    /// More fragments follow.
    pub more: bool,
}

impl Fragment {
    #[inline]
    pub fn is_first(&self) -> bool {
        self.offset == 0
    }

    /// True unless this is an atomic fragment (offset 0, no more fragments).
    #[inline]
    pub fn is_fragmented(&self) -> bool {
        self.offset != 0 || self.more
    }
}

/// A parsed IPv4 packet borrowing from the input buffer.
#[derive(Debug, Clone, Copy)]
pub struct Ipv4Packet<'a> {
    /// Whole packet, header included, cut to the declared total length.
    pub bytes: &'a [u8],
    pub header_len: usize,
    /// Total length as declared in the header.
    pub total_len: usize,
    pub tos: u8,
    pub id: u16,
    pub dont_fragment: bool,
    pub fragment: Option<Fragment>,
    pub ttl: u8,
    pub protocol: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub payload: &'a [u8],
}

impl<'a> Ipv4Packet<'a> {
    /// Parse a complete IPv4 packet. Bytes past the total length are ignored.
    pub fn parse(buf: &'a [u8]) -> XlatResult<Self> {
        Self::parse_inner(buf, false)
    }

    /// Parse an IPv4 packet quoted inside an ICMP error, which is usually
    /// shorter than its declared total length.
    pub fn parse_embedded(buf: &'a [u8]) -> XlatResult<Self> {
        Self::parse_inner(buf, true)
    }

    fn parse_inner(buf: &'a [u8], embedded: bool) -> XlatResult<Self> {
        if buf.len() < IPV4_HEADER_SIZE {
            return Err(DropReason::Truncated);
        }

        let version = buf[0] >> 4;
        if version != 4 {
            return Err(DropReason::UnsupportedVersion(version));
        }

        let header_len = (buf[0] & 0x0F) as usize * 4;
        if header_len < IPV4_HEADER_SIZE {
            return Err(DropReason::Malformed);
        }
        if buf.len() < header_len {
            return Err(DropReason::Truncated);
        }

        let total_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if total_len < header_len {
            return Err(DropReason::Malformed);
        }

        let bytes = if embedded {
            &buf[..buf.len().min(total_len)]
        } else {
            if buf.len() < total_len {
                return Err(DropReason::Truncated);
            }
            &buf[..total_len]
        };

        let flags_offset = u16::from_be_bytes([buf[6], buf[7]]);
        let offset = ((flags_offset & IPV4_OFFSET_MASK) as usize) * 8;
        let more = flags_offset & IPV4_FLAG_MF != 0;
        let id = u16::from_be_bytes([buf[4], buf[5]]);

        let fragment = (offset != 0 || more).then_some(Fragment {
            id: id as u32,
            offset,
            more,
        });

        Ok(Self {
            bytes,
            header_len,
            total_len,
            tos: buf[1],
            id,
            dont_fragment: flags_offset & IPV4_FLAG_DF != 0,
            fragment,
            ttl: buf[8],
            protocol: buf[9],
            src: Ipv4Addr::new(buf[12], buf[13], buf[14], buf[15]),
            dst: Ipv4Addr::new(buf[16], buf[17], buf[18], buf[19]),
            payload: &bytes[header_len..],
        })
    }

    #[inline]
    pub fn header(&self) -> &'a [u8] {
        &self.bytes[..self.header_len]
    }

    #[inline]
    pub fn is_non_first_fragment(&self) -> bool {
        self.fragment.is_some_and(|f| !f.is_first())
    }

    /// Length of the transport payload as declared by the header.
    #[inline]
    pub fn declared_payload_len(&self) -> usize {
        self.total_len - self.header_len
    }

    /// True for ICMPv4 error messages (as opposed to queries).
    pub fn is_icmp_error(&self) -> bool {
        self.protocol == PROTO_ICMP
            && !self.is_non_first_fragment()
            && self.payload.first().is_some_and(|&t| is_icmpv4_error_type(t))
    }
}

/// A parsed IPv6 packet borrowing from the input buffer.
///
/// Hop-by-Hop, Destination Options and Routing headers (with no segments
/// left) are skipped; a Fragment header is decoded into [`Fragment`].
#[derive(Debug, Clone, Copy)]
pub struct Ipv6Packet<'a> {
    /// Whole packet cut to the declared payload length.
    pub bytes: &'a [u8],
    /// Payload length as declared in the fixed header.
    pub payload_len: usize,
    pub traffic_class: u8,
    pub hop_limit: u8,
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
    /// Upper-layer protocol after the skipped extension headers.
    pub protocol: u8,
    pub fragment: Option<Fragment>,
    /// Offset of the upper-layer payload inside `bytes`.
    pub payload_offset: usize,
    pub payload: &'a [u8],
}

impl<'a> Ipv6Packet<'a> {
    /// Parse a complete IPv6 packet. Bytes past the payload length are ignored.
    pub fn parse(buf: &'a [u8]) -> XlatResult<Self> {
        Self::parse_inner(buf, false)
    }

    /// Parse an IPv6 packet quoted inside an ICMPv6 error.
    pub fn parse_embedded(buf: &'a [u8]) -> XlatResult<Self> {
        Self::parse_inner(buf, true)
    }

    fn parse_inner(buf: &'a [u8], embedded: bool) -> XlatResult<Self> {
        if buf.len() < IPV6_HEADER_SIZE {
            return Err(DropReason::Truncated);
        }

        let version = buf[0] >> 4;
        if version != 6 {
            return Err(DropReason::UnsupportedVersion(version));
        }

        let payload_len = u16::from_be_bytes([buf[4], buf[5]]) as usize;
        let declared = IPV6_HEADER_SIZE + payload_len;
        let bytes = if embedded {
            &buf[..buf.len().min(declared)]
        } else {
            if buf.len() < declared {
                return Err(DropReason::Truncated);
            }
            &buf[..declared]
        };

        let mut next_header = buf[6];
        let mut pos = IPV6_HEADER_SIZE;
        let mut fragment = None;

        loop {
            match next_header {
                NH_HOP_BY_HOP | NH_DESTINATION_OPTIONS | NH_ROUTING => {
                    if bytes.len() < pos + 8 {
                        return Err(DropReason::Truncated);
                    }
                    if next_header == NH_ROUTING && bytes[pos + 3] != 0 {
                        return Err(DropReason::UnsupportedExtensionHeader(NH_ROUTING));
                    }
                    let ext_len = (bytes[pos + 1] as usize + 1) * 8;
                    next_header = bytes[pos];
                    pos += ext_len;
                    if bytes.len() < pos {
                        return Err(DropReason::Truncated);
                    }
                }
                NH_FRAGMENT => {
                    if fragment.is_some() {
                        return Err(DropReason::Malformed);
                    }
                    if bytes.len() < pos + IPV6_FRAGMENT_HEADER_SIZE {
                        return Err(DropReason::Truncated);
                    }
                    let offset_flags = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]);
                    let frag = Fragment {
                        id: u32::from_be_bytes([
                            bytes[pos + 4],
                            bytes[pos + 5],
                            bytes[pos + 6],
                            bytes[pos + 7],
                        ]),
                        offset: (offset_flags >> 3) as usize * 8,
                        more: offset_flags & 1 != 0,
                    };
                    next_header = bytes[pos];
                    pos += IPV6_FRAGMENT_HEADER_SIZE;
                    fragment = Some(frag);

                    // Headers after the fragment header only exist in the first fragment
                    if !frag.is_first() {
                        break;
                    }
                }
                _ => break,
            }
        }

        Ok(Self {
            bytes,
            payload_len,
            traffic_class: ((buf[0] & 0x0F) << 4) | (buf[1] >> 4),
            hop_limit: buf[7],
            src: ipv6_from_slice(&buf[8..24]),
            dst: ipv6_from_slice(&buf[24..40]),
            protocol: next_header,
            fragment,
            payload_offset: pos,
            payload: &bytes[pos..],
        })
    }

    #[inline]
    pub fn is_non_first_fragment(&self) -> bool {
        self.fragment.is_some_and(|f| !f.is_first())
    }

    /// Length of the upper-layer payload as declared by the headers.
    #[inline]
    pub fn declared_upper_len(&self) -> usize {
        (IPV6_HEADER_SIZE + self.payload_len).saturating_sub(self.payload_offset)
    }

    /// True for ICMPv6 error messages (types below 128).
    pub fn is_icmp_error(&self) -> bool {
        self.protocol == PROTO_ICMPV6
            && !self.is_non_first_fragment()
            && self.payload.first().is_some_and(|&t| t < 128)
    }
}

/// ICMPv4 types that carry an embedded packet.
#[inline]
pub fn is_icmpv4_error_type(icmp_type: u8) -> bool {
    matches!(icmp_type, 3 | 4 | 5 | 11 | 12)
}

#[inline]
pub(crate) fn ipv6_from_slice(bytes: &[u8]) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&bytes[..16]);
    Ipv6Addr::from(octets)
}

/// Fields of an outgoing IPv4 header without options.
#[derive(Debug, Clone, Copy)]
pub struct Ipv4Header {
    pub tos: u8,
    pub total_len: u16,
    pub id: u16,
    /// Flags and fragment offset word (offset in 8-byte units).
    pub flags_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl Ipv4Header {
    /// Serialize the header with a valid checksum.
    pub fn to_bytes(&self) -> [u8; IPV4_HEADER_SIZE] {
        let mut header = [0u8; IPV4_HEADER_SIZE];
        header[0] = 0x45; // Version 4, IHL 5
        header[1] = self.tos;
        header[2..4].copy_from_slice(&self.total_len.to_be_bytes());
        header[4..6].copy_from_slice(&self.id.to_be_bytes());
        header[6..8].copy_from_slice(&self.flags_offset.to_be_bytes());
        header[8] = self.ttl;
        header[9] = self.protocol;
        header[12..16].copy_from_slice(&self.src.octets());
        header[16..20].copy_from_slice(&self.dst.octets());

        let checksum = ipv4_header_checksum(&header);
        header[10..12].copy_from_slice(&checksum.to_be_bytes());
        header
    }
}

/// Fields of an outgoing fixed IPv6 header.
#[derive(Debug, Clone, Copy)]
pub struct Ipv6Header {
    pub traffic_class: u8,
    pub payload_len: u16,
    pub next_header: u8,
    pub hop_limit: u8,
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
}

impl Ipv6Header {
    pub fn to_bytes(&self) -> [u8; IPV6_HEADER_SIZE] {
        let mut header = [0u8; IPV6_HEADER_SIZE];
        header[0] = 0x60 | (self.traffic_class >> 4);
        header[1] = self.traffic_class << 4; // Flow label is zero
        header[4..6].copy_from_slice(&self.payload_len.to_be_bytes());
        header[6] = self.next_header;
        header[7] = self.hop_limit;
        header[8..24].copy_from_slice(&self.src.octets());
        header[24..40].copy_from_slice(&self.dst.octets());
        header
    }
}

/// Serialize an IPv6 fragment extension header.
pub fn fragment_header(next_header: u8, fragment: Fragment) -> [u8; IPV6_FRAGMENT_HEADER_SIZE] {
    let mut header = [0u8; IPV6_FRAGMENT_HEADER_SIZE];
    header[0] = next_header;
    let offset_flags = (((fragment.offset / 8) as u16) << 3) | fragment.more as u16;
    header[2..4].copy_from_slice(&offset_flags.to_be_bytes());
    header[4..8].copy_from_slice(&fragment.id.to_be_bytes());
    header
}

/// Build the IPv4 flags/offset word for a fragment.
#[inline]
pub fn ipv4_flags_offset(dont_fragment: bool, fragment: Option<Fragment>) -> u16 {
    let mut word = if dont_fragment { IPV4_FLAG_DF } else { 0 };
    if let Some(frag) = fragment {
        word |= ((frag.offset / 8) as u16) & IPV4_OFFSET_MASK;
        if frag.more {
            word |= IPV4_FLAG_MF;
        }
    }
    word
}
