//! Translator configuration.
//!
//! [`TranslatorConfig`] is built once at startup (usually by the config-file
//! layer), validated, and then shared read-only between worker threads.

use crate::error::XlatError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Default outbound MTU for both families.
pub const DEFAULT_OUTBOUND_MTU: u16 = 1500;

/// Smallest MTU an IPv4 link may have (RFC 791).
pub const MIN_IPV4_MTU: u16 = 68;

/// Smallest MTU an IPv6 link may have (RFC 8200).
pub const MIN_IPV6_MTU: u16 = 1280;

/// Default TTL / hop limit of ICMP errors generated by the translator.
pub const DEFAULT_GENERATED_PACKET_TTL: u8 = 224;

/// Default NAT64 well-known prefix (RFC 6052).
pub const DEFAULT_PREFIX: Ipv6Addr = Ipv6Addr::new(0x64, 0xff9b, 0, 0, 0, 0, 0, 0);

/// How addresses are mapped between the two families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressingMode {
    /// Network-side translator: IPv6 clients reach the IPv4 internet through
    /// a single translator IPv4 address.
    Nat64,
    /// Client-side translator: a single IPv4 host reaches the internet through
    /// a prefix-embedded IPv6 address.
    Clat,
    /// Both sides are prefix-embedded (RFC 7915 stateless translation).
    Siit,
}

impl fmt::Display for AddressingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AddressingMode::Nat64 => "nat64",
            AddressingMode::Clat => "clat",
            AddressingMode::Siit => "siit",
        };
        f.write_str(name)
    }
}

impl FromStr for AddressingMode {
    type Err = XlatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nat64" => Ok(AddressingMode::Nat64),
            "clat" => Ok(AddressingMode::Clat),
            "siit" => Ok(AddressingMode::Siit),
            other => Err(XlatError::Config(format!(
                "Invalid addressing mode '{}' (expected nat64, clat or siit)",
                other
            ))),
        }
    }
}

/// Which incoming checksums are verified before translation.
///
/// Outgoing checksums are always correct regardless of these flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumChecks {
    pub ipv4_header: bool,
    pub icmpv4: bool,
    pub icmpv6: bool,
    pub tcp: bool,
    pub udp: bool,
}

impl Default for ChecksumChecks {
    fn default() -> Self {
        Self {
            ipv4_header: true,
            icmpv4: true,
            icmpv6: true,
            tcp: false,
            udp: false,
        }
    }
}

/// Immutable translator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranslatorConfig {
    pub mode: AddressingMode,
    /// IPv6 /96 prefix used to embed IPv4 addresses.
    pub prefix: Ipv6Addr,
    pub translator_ipv4: Ipv4Addr,
    pub translator_ipv6: Ipv6Addr,
    /// Source of ICMP errors generated towards IPv4 hosts.
    pub router_ipv4: Ipv4Addr,
    /// Source of ICMP errors generated towards IPv6 hosts.
    pub router_ipv6: Ipv6Addr,
    pub ipv4_outbound_mtu: u16,
    pub ipv6_outbound_mtu: u16,
    pub allow_translation_of_private_ips: bool,
    pub copy_dscp_and_ecn_6to4: bool,
    pub copy_dscp_and_ecn_4to6: bool,
    pub checksum: ChecksumChecks,
    pub generated_packet_ttl: u8,
}

impl TranslatorConfig {
    /// Create a configuration with default tunables for the given addresses.
    pub fn new(
        mode: AddressingMode,
        prefix: Ipv6Addr,
        translator_ipv4: Ipv4Addr,
        translator_ipv6: Ipv6Addr,
        router_ipv4: Ipv4Addr,
        router_ipv6: Ipv6Addr,
    ) -> Self {
        Self {
            mode,
            prefix,
            translator_ipv4,
            translator_ipv6,
            router_ipv4,
            router_ipv6,
            ipv4_outbound_mtu: DEFAULT_OUTBOUND_MTU,
            ipv6_outbound_mtu: DEFAULT_OUTBOUND_MTU,
            allow_translation_of_private_ips: false,
            copy_dscp_and_ecn_6to4: true,
            copy_dscp_and_ecn_4to6: true,
            checksum: ChecksumChecks::default(),
            generated_packet_ttl: DEFAULT_GENERATED_PACKET_TTL,
        }
    }

    /// Check every invariant the packet path relies on.
    pub fn validate(&self) -> Result<(), XlatError> {
        if self.prefix.octets()[12..] != [0, 0, 0, 0] {
            return Err(XlatError::Config(format!(
                "Translator prefix {} must have its last 4 bytes set to zero",
                self.prefix
            )));
        }

        if self.translator_ipv4 == self.router_ipv4 {
            return Err(XlatError::Config(format!(
                "Translator IPv4 address {} must differ from the router IPv4 address",
                self.translator_ipv4
            )));
        }

        if self.translator_ipv6 == self.router_ipv6 {
            return Err(XlatError::Config(format!(
                "Translator IPv6 address {} must differ from the router IPv6 address",
                self.translator_ipv6
            )));
        }

        if self.ipv4_outbound_mtu < MIN_IPV4_MTU {
            return Err(XlatError::Config(format!(
                "IPv4 outbound MTU {} is below the minimum of {}",
                self.ipv4_outbound_mtu, MIN_IPV4_MTU
            )));
        }

        if self.ipv6_outbound_mtu < MIN_IPV6_MTU {
            return Err(XlatError::Config(format!(
                "IPv6 outbound MTU {} is below the minimum of {}",
                self.ipv6_outbound_mtu, MIN_IPV6_MTU
            )));
        }

        if self.generated_packet_ttl == 0 {
            return Err(XlatError::Config(
                "Generated packet TTL must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
