//! Output packet queue.
//!
//! A translation produces zero, one or several packets (fragments). They are
//! stored back to back in a single byte buffer that is reused for every
//! packet, so the hot path does not allocate once the buffer has grown.

use std::ops::Range;

/// Output buffer holding the packets produced by one translation.
#[derive(Debug, Default)]
pub struct PacketQueue {
    data: Vec<u8>,
    packets: Vec<Range<usize>>,
}

impl PacketQueue {
    /// Create a queue with `capacity` bytes reserved for packet data.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            packets: Vec::with_capacity(64),
        }
    }

    /// Drop all queued packets, keeping the allocations.
    #[inline]
    pub fn clear(&mut self) {
        self.data.clear();
        self.packets.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Get the packet at `index`.
    pub fn get(&self, index: usize) -> Option<&[u8]> {
        self.packets.get(index).map(|range| &self.data[range.clone()])
    }

    /// Iterate over the queued packets in output order.
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.packets.iter().map(move |range| &self.data[range.clone()])
    }

    /// Append a packet made of a freshly built header and payload parts.
    pub fn push_with_header(&mut self, header: &[u8], parts: &[&[u8]]) {
        let start = self.data.len();
        self.data.extend_from_slice(header);
        for part in parts {
            self.data.extend_from_slice(part);
        }
        self.packets.push(start..self.data.len());
    }
}
