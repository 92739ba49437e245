//! Stateless IPv4/IPv6 packet translation.
//!
//! Implements SIIT (RFC 7915) header translation with three addressing
//! modes: NAT64, CLAT and plain SIIT. Addresses are mapped through an
//! RFC 6052 /96 prefix. Nothing here keeps per-flow state; every packet is
//! translated on its own, which lets several workers share one
//! [`TranslatorConfig`].
//!
//! The entry point is [`TranslatorContext::translate`]. A packet either
//! yields one or more output packets (the translated packet, its fragments,
//! or an ICMP error for the sender) or is dropped with a [`DropReason`].

pub mod addr;
pub mod buffer;
pub mod checksum;
pub mod config;
pub mod context;
pub mod error;
pub mod icmp;
mod icmp_error;
pub mod packet;
mod xlat_4to6;
mod xlat_6to4;

#[cfg(test)]
mod test_packets;

pub use buffer::PacketQueue;
pub use config::{AddressingMode, ChecksumChecks, TranslatorConfig};
pub use context::TranslatorContext;
pub use error::{DropReason, XlatError, XlatResult};
