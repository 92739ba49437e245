//! Address translation engine.
//!
//! IPv4 addresses are embedded into the last 32 bits of the configured /96
//! prefix (RFC 6052). On top of that, each addressing mode decides which side
//! of a packet uses the prefix and which side uses the translator's own
//! address pair:
//!
//! ```text
//!            6to4 source     6to4 destination   4to6 source     4to6 destination
//! NAT64      translator_ip   prefix             prefix          translator_ip
//! CLAT       prefix          translator_ip      translator_ip   prefix
//! SIIT       prefix          prefix (local)     prefix (local)  prefix
//! ```
//!
//! Main packets additionally go through [`is_translatable_ipv4`]. Addresses
//! inside ICMP errors (and the outer addresses of ICMP errors, which are often
//! sent by routers with private addresses) are exempt from it.

use crate::config::{AddressingMode, TranslatorConfig};
use std::net::{Ipv4Addr, Ipv6Addr};

/// Ranges that are never translated.
const ALWAYS_BLOCKED: &[(u32, u8)] = &[
    (0x0000_0000, 8),  // 0.0.0.0/8
    (0x7F00_0000, 8),  // 127.0.0.0/8
    (0xE000_0000, 4),  // 224.0.0.0/4
    (0xF000_0000, 4),  // 240.0.0.0/4, includes 255.255.255.255
];

/// Private and special-purpose ranges, translated only when allowed.
const PRIVATE: &[(u32, u8)] = &[
    (0x0A00_0000, 8),  // 10.0.0.0/8
    (0x6440_0000, 10), // 100.64.0.0/10
    (0xA9FE_0000, 16), // 169.254.0.0/16
    (0xAC10_0000, 12), // 172.16.0.0/12
    (0xC000_0000, 24), // 192.0.0.0/24
    (0xC0A8_0000, 16), // 192.168.0.0/16
    (0xC612_0000, 15), // 198.18.0.0/15
];

#[inline]
fn in_ranges(addr: Ipv4Addr, ranges: &[(u32, u8)]) -> bool {
    let addr = u32::from(addr);
    ranges.iter().any(|&(network, len)| {
        let mask = u32::MAX << (32 - len as u32);
        addr & mask == network
    })
}

/// Check whether an IPv4 address may appear in a translated main packet.
pub fn is_translatable_ipv4(config: &TranslatorConfig, addr: Ipv4Addr) -> bool {
    if in_ranges(addr, ALWAYS_BLOCKED) {
        return false;
    }
    config.allow_translation_of_private_ips || !in_ranges(addr, PRIVATE)
}

/// Check if an IPv6 address lies in the translator prefix.
#[inline]
pub fn is_under_prefix(prefix: Ipv6Addr, addr: Ipv6Addr) -> bool {
    addr.octets()[..12] == prefix.octets()[..12]
}

/// Extract the IPv4 address embedded in a prefix address.
#[inline]
pub fn extract_ipv4_from_prefix(prefix: Ipv6Addr, addr: Ipv6Addr) -> Option<Ipv4Addr> {
    if !is_under_prefix(prefix, addr) {
        return None;
    }
    let octets = addr.octets();
    Some(Ipv4Addr::new(octets[12], octets[13], octets[14], octets[15]))
}

/// Embed an IPv4 address into the translator prefix.
#[inline]
pub fn embed_ipv4_in_prefix(prefix: Ipv6Addr, addr: Ipv4Addr) -> Ipv6Addr {
    let mut octets = prefix.octets();
    octets[12..].copy_from_slice(&addr.octets());
    Ipv6Addr::from(octets)
}

pub fn nat64_clat_6to4_translator_ip(config: &TranslatorConfig, addr: Ipv6Addr) -> Option<Ipv4Addr> {
    (addr == config.translator_ipv6).then_some(config.translator_ipv4)
}

pub fn nat64_clat_4to6_translator_ip(config: &TranslatorConfig, addr: Ipv4Addr) -> Option<Ipv6Addr> {
    (addr == config.translator_ipv4).then_some(config.translator_ipv6)
}

pub fn nat64_clat_6to4_prefix_main(config: &TranslatorConfig, addr: Ipv6Addr) -> Option<Ipv4Addr> {
    extract_ipv4_from_prefix(config.prefix, addr).filter(|&a4| is_translatable_ipv4(config, a4))
}

pub fn nat64_clat_4to6_prefix_main(config: &TranslatorConfig, addr: Ipv4Addr) -> Option<Ipv6Addr> {
    is_translatable_ipv4(config, addr).then(|| embed_ipv4_in_prefix(config.prefix, addr))
}

pub fn siit_6to4_prefix_main(config: &TranslatorConfig, addr: Ipv6Addr) -> Option<Ipv4Addr> {
    nat64_clat_6to4_prefix_main(config, addr)
}

pub fn siit_4to6_prefix_main(config: &TranslatorConfig, addr: Ipv4Addr) -> Option<Ipv6Addr> {
    nat64_clat_4to6_prefix_main(config, addr)
}

/// Like [`siit_6to4_prefix_main`], but the translator's own address maps to
/// its IPv4 counterpart so the translator host itself can be reached.
pub fn siit_6to4_prefix_main_local(config: &TranslatorConfig, addr: Ipv6Addr) -> Option<Ipv4Addr> {
    if addr == config.translator_ipv6 {
        return Some(config.translator_ipv4);
    }
    siit_6to4_prefix_main(config, addr)
}

pub fn siit_4to6_prefix_main_local(config: &TranslatorConfig, addr: Ipv4Addr) -> Option<Ipv6Addr> {
    if addr == config.translator_ipv4 {
        return Some(config.translator_ipv6);
    }
    siit_4to6_prefix_main(config, addr)
}

/// Prefix extraction without the translatability check.
pub fn prefix_6to4_icmp_error(config: &TranslatorConfig, addr: Ipv6Addr) -> Option<Ipv4Addr> {
    extract_ipv4_from_prefix(config.prefix, addr)
}

/// Prefix embedding without the translatability check; never fails.
pub fn prefix_4to6_icmp_error(config: &TranslatorConfig, addr: Ipv4Addr) -> Ipv6Addr {
    embed_ipv4_in_prefix(config.prefix, addr)
}

/// Translate the source and destination of an IPv6 main packet.
pub fn translate_main_6to4(
    config: &TranslatorConfig,
    src: Ipv6Addr,
    dst: Ipv6Addr,
) -> Option<(Ipv4Addr, Ipv4Addr)> {
    match config.mode {
        AddressingMode::Nat64 => Some((
            nat64_clat_6to4_translator_ip(config, src)?,
            nat64_clat_6to4_prefix_main(config, dst)?,
        )),
        AddressingMode::Clat => Some((
            nat64_clat_6to4_prefix_main(config, src)?,
            nat64_clat_6to4_translator_ip(config, dst)?,
        )),
        AddressingMode::Siit => Some((
            siit_6to4_prefix_main(config, src)?,
            siit_6to4_prefix_main_local(config, dst)?,
        )),
    }
}

/// Translate the source and destination of an IPv4 main packet.
pub fn translate_main_4to6(
    config: &TranslatorConfig,
    src: Ipv4Addr,
    dst: Ipv4Addr,
) -> Option<(Ipv6Addr, Ipv6Addr)> {
    match config.mode {
        AddressingMode::Nat64 => Some((
            nat64_clat_4to6_prefix_main(config, src)?,
            nat64_clat_4to6_translator_ip(config, dst)?,
        )),
        AddressingMode::Clat => Some((
            nat64_clat_4to6_translator_ip(config, src)?,
            nat64_clat_4to6_prefix_main(config, dst)?,
        )),
        AddressingMode::Siit => Some((
            siit_4to6_prefix_main_local(config, src)?,
            siit_4to6_prefix_main(config, dst)?,
        )),
    }
}

/// Translate an address found inside an ICMPv6 error.
pub fn translate_embedded_6to4(config: &TranslatorConfig, addr: Ipv6Addr) -> Option<Ipv4Addr> {
    if addr == config.translator_ipv6 {
        return Some(config.translator_ipv4);
    }
    prefix_6to4_icmp_error(config, addr)
}

/// Translate an address found inside an ICMPv4 error.
pub fn translate_embedded_4to6(config: &TranslatorConfig, addr: Ipv4Addr) -> Ipv6Addr {
    if addr == config.translator_ipv4 {
        return config.translator_ipv6;
    }
    prefix_4to6_icmp_error(config, addr)
}

/// Translate the outer addresses of an ICMPv6 error message.
///
/// The translator side keeps the mode's strict rule; the remote side skips
/// the translatability check.
pub fn translate_icmp_error_6to4(
    config: &TranslatorConfig,
    src: Ipv6Addr,
    dst: Ipv6Addr,
) -> Option<(Ipv4Addr, Ipv4Addr)> {
    match config.mode {
        AddressingMode::Nat64 => Some((
            nat64_clat_6to4_translator_ip(config, src)?,
            prefix_6to4_icmp_error(config, dst)?,
        )),
        AddressingMode::Clat => Some((
            prefix_6to4_icmp_error(config, src)?,
            nat64_clat_6to4_translator_ip(config, dst)?,
        )),
        AddressingMode::Siit => Some((
            translate_embedded_6to4(config, src)?,
            translate_embedded_6to4(config, dst)?,
        )),
    }
}

/// Translate the outer addresses of an ICMPv4 error message.
pub fn translate_icmp_error_4to6(
    config: &TranslatorConfig,
    src: Ipv4Addr,
    dst: Ipv4Addr,
) -> Option<(Ipv6Addr, Ipv6Addr)> {
    match config.mode {
        AddressingMode::Nat64 => Some((
            prefix_4to6_icmp_error(config, src),
            nat64_clat_4to6_translator_ip(config, dst)?,
        )),
        AddressingMode::Clat => Some((
            nat64_clat_4to6_translator_ip(config, src)?,
            prefix_4to6_icmp_error(config, dst),
        )),
        AddressingMode::Siit => Some((
            translate_embedded_4to6(config, src),
            translate_embedded_4to6(config, dst),
        )),
    }
}
