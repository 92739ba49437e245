//! Error types for the translator.
//!
//! Two classes exist. [`XlatError`] covers fatal startup problems (invalid
//! configuration, I/O setup). [`DropReason`] covers per-packet outcomes: a
//! packet that cannot be translated is dropped and the loop continues.

use thiserror::Error;

/// Fatal translator errors.
#[derive(Debug, Error)]
pub enum XlatError {
    /// Configuration invariant violated.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error while setting up or running the packet loop.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl XlatError {
    /// Returns true if this error must terminate the process.
    ///
    /// Configuration errors are never recoverable. I/O errors are fatal too,
    /// except for interrupted system calls which the worker loop retries.
    pub fn is_fatal(&self) -> bool {
        match self {
            XlatError::Config(_) => true,
            XlatError::Io(e) => e.kind() != std::io::ErrorKind::Interrupted,
        }
    }
}

/// Why a single packet was not translated.
///
/// Carries no heap data so it can be returned from the packet path without
/// allocating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DropReason {
    /// Buffer shorter than the headers it claims to carry.
    #[error("packet truncated")]
    Truncated,

    /// Header fields are inconsistent (bad IHL, length fields, ...).
    #[error("malformed packet")]
    Malformed,

    /// Version nibble is neither 4 nor 6, or does not match the direction.
    #[error("unsupported IP version {0}")]
    UnsupportedVersion(u8),

    /// Source or destination address cannot be mapped to the other family.
    #[error("untranslatable address")]
    UntranslatableAddress,

    /// ICMP type/code without a counterpart in the other family.
    #[error("untranslatable ICMP message (type {icmp_type}, code {code})")]
    UntranslatableIcmp { icmp_type: u8, code: u8 },

    /// Input checksum verification failed.
    #[error("bad checksum")]
    BadChecksum,

    /// ICMP messages are only translated when not fragmented.
    #[error("fragmented ICMP message")]
    FragmentedIcmp,

    /// IPv6 extension header that cannot be translated.
    #[error("unsupported IPv6 extension header {0}")]
    UnsupportedExtensionHeader(u8),

    /// Embedded packet length does not fit the translated length field.
    #[error("embedded packet too long")]
    EmbeddedTooLong,

    /// Translated packet exceeds the outbound MTU and cannot be fragmented.
    #[error("outbound MTU exceeded")]
    MtuExceeded,

    /// TTL or hop limit would reach zero.
    #[error("TTL expired")]
    TtlExpired,

    /// UDP datagram without checksum that cannot be recomputed.
    #[error("zero UDP checksum on fragmented datagram")]
    UdpZeroChecksum,
}

/// Result type alias for the per-packet path.
pub type XlatResult<T> = Result<T, DropReason>;
