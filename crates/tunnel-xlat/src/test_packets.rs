//! Packet builders shared by the unit tests.

use crate::checksum::{transport_checksum_ipv4, transport_checksum_ipv6};
use crate::packet::{
    fragment_header, Fragment, Ipv4Header, Ipv6Header, IPV4_FLAG_DF, IPV6_FRAGMENT_HEADER_SIZE,
    IPV6_HEADER_SIZE, NH_FRAGMENT, PROTO_ICMP, PROTO_ICMPV6, PROTO_TCP, PROTO_UDP,
};
use std::net::{Ipv4Addr, Ipv6Addr};

fn tcp_segment(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut tcp = Vec::with_capacity(20 + payload.len());
    tcp.extend_from_slice(&src_port.to_be_bytes());
    tcp.extend_from_slice(&dst_port.to_be_bytes());
    tcp.extend_from_slice(&1u32.to_be_bytes()); // Sequence number
    tcp.extend_from_slice(&0u32.to_be_bytes()); // Ack number
    tcp.push(0x50); // Data offset 5
    tcp.push(0x02); // SYN
    tcp.extend_from_slice(&1024u16.to_be_bytes()); // Window
    tcp.extend_from_slice(&[0, 0]); // Checksum placeholder
    tcp.extend_from_slice(&[0, 0]); // Urgent pointer
    tcp.extend_from_slice(payload);
    tcp
}

fn udp_datagram(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let len = 8 + payload.len();
    let mut udp = Vec::with_capacity(len);
    udp.extend_from_slice(&src_port.to_be_bytes());
    udp.extend_from_slice(&dst_port.to_be_bytes());
    udp.extend_from_slice(&(len as u16).to_be_bytes());
    udp.extend_from_slice(&[0, 0]);
    udp.extend_from_slice(payload);
    udp
}

fn icmp_echo(icmp_type: u8, identifier: u16, sequence: u16, payload: &[u8]) -> Vec<u8> {
    let mut icmp = vec![icmp_type, 0, 0, 0];
    icmp.extend_from_slice(&identifier.to_be_bytes());
    icmp.extend_from_slice(&sequence.to_be_bytes());
    icmp.extend_from_slice(payload);
    icmp
}

/// Wrap a transport segment in an IPv4 header with DF set and TTL 64.
pub(crate) fn ipv4_packet(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, segment: &[u8]) -> Vec<u8> {
    let mut packet = Ipv4Header {
        tos: 0,
        total_len: (20 + segment.len()) as u16,
        id: 0,
        flags_offset: IPV4_FLAG_DF,
        ttl: 64,
        protocol,
        src,
        dst,
    }
    .to_bytes()
    .to_vec();
    packet.extend_from_slice(segment);
    packet
}

/// Wrap an upper-layer payload in a fixed IPv6 header with hop limit 64.
pub(crate) fn ipv6_packet(src: Ipv6Addr, dst: Ipv6Addr, next_header: u8, segment: &[u8]) -> Vec<u8> {
    let mut packet = Ipv6Header {
        traffic_class: 0,
        payload_len: segment.len() as u16,
        next_header,
        hop_limit: 64,
        src,
        dst,
    }
    .to_bytes()
    .to_vec();
    packet.extend_from_slice(segment);
    packet
}

pub(crate) fn ipv4_tcp(src: Ipv4Addr, dst: Ipv4Addr, src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut tcp = tcp_segment(src_port, dst_port, payload);
    let checksum = transport_checksum_ipv4(src, dst, PROTO_TCP, &tcp);
    tcp[16..18].copy_from_slice(&checksum.to_be_bytes());
    ipv4_packet(src, dst, PROTO_TCP, &tcp)
}

pub(crate) fn ipv4_udp(src: Ipv4Addr, dst: Ipv4Addr, src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut udp = udp_datagram(src_port, dst_port, payload);
    let checksum = transport_checksum_ipv4(src, dst, PROTO_UDP, &udp);
    udp[6..8].copy_from_slice(&checksum.to_be_bytes());
    ipv4_packet(src, dst, PROTO_UDP, &udp)
}

/// ICMPv4 echo request (type 8) or reply (type 0).
pub(crate) fn ipv4_icmp_echo(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    icmp_type: u8,
    identifier: u16,
    sequence: u16,
    payload: &[u8],
) -> Vec<u8> {
    let mut icmp = icmp_echo(icmp_type, identifier, sequence, payload);
    let checksum = crate::checksum::compute_checksum(&icmp);
    icmp[2..4].copy_from_slice(&checksum.to_be_bytes());
    ipv4_packet(src, dst, PROTO_ICMP, &icmp)
}

pub(crate) fn ipv6_tcp(src: Ipv6Addr, dst: Ipv6Addr, src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut tcp = tcp_segment(src_port, dst_port, payload);
    let checksum = transport_checksum_ipv6(src, dst, PROTO_TCP, &tcp);
    tcp[16..18].copy_from_slice(&checksum.to_be_bytes());
    ipv6_packet(src, dst, PROTO_TCP, &tcp)
}

pub(crate) fn ipv6_udp(src: Ipv6Addr, dst: Ipv6Addr, src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut udp = udp_datagram(src_port, dst_port, payload);
    let checksum = transport_checksum_ipv6(src, dst, PROTO_UDP, &udp);
    udp[6..8].copy_from_slice(&checksum.to_be_bytes());
    ipv6_packet(src, dst, PROTO_UDP, &udp)
}

/// ICMPv6 echo request (type 128) or reply (type 129).
pub(crate) fn ipv6_icmp_echo(
    src: Ipv6Addr,
    dst: Ipv6Addr,
    icmp_type: u8,
    identifier: u16,
    sequence: u16,
    payload: &[u8],
) -> Vec<u8> {
    let mut icmp = icmp_echo(icmp_type, identifier, sequence, payload);
    let checksum = transport_checksum_ipv6(src, dst, PROTO_ICMPV6, &icmp);
    icmp[2..4].copy_from_slice(&checksum.to_be_bytes());
    ipv6_packet(src, dst, PROTO_ICMPV6, &icmp)
}

/// Insert a fragment header right after the fixed header of `packet`.
///
/// The payload length is set from the resulting packet size.
pub(crate) fn ipv6_with_fragment_header(packet: &[u8], id: u32, offset: usize, more: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(packet.len() + IPV6_FRAGMENT_HEADER_SIZE);
    out.extend_from_slice(&packet[..IPV6_HEADER_SIZE]);
    out.extend_from_slice(&fragment_header(packet[6], Fragment { id, offset, more }));
    out.extend_from_slice(&packet[IPV6_HEADER_SIZE..]);

    out[6] = NH_FRAGMENT;
    let payload_len = (out.len() - IPV6_HEADER_SIZE) as u16;
    out[4..6].copy_from_slice(&payload_len.to_be_bytes());
    out
}
