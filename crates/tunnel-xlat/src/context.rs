//! Per-worker translation context.

use crate::buffer::PacketQueue;
use crate::config::TranslatorConfig;
use crate::error::{DropReason, XlatResult};
use crate::packet::MAX_PACKET_SIZE;
use crate::{xlat_4to6, xlat_6to4};
use rand::Rng;
use std::sync::Arc;

/// State owned by one translation worker.
///
/// The configuration is shared read-only between workers; the buffers are
/// private and reused for every packet.
pub struct TranslatorContext {
    config: Arc<TranslatorConfig>,
    in_buffer: Box<[u8]>,
    output: PacketQueue,
    scratch: Vec<u8>,
    /// IPv4 identification for datagrams this worker fragments itself.
    next_fragment_id: u16,
}

impl TranslatorContext {
    pub fn new(config: Arc<TranslatorConfig>) -> Self {
        Self {
            config,
            in_buffer: vec![0u8; MAX_PACKET_SIZE].into_boxed_slice(),
            output: PacketQueue::with_capacity(2 * MAX_PACKET_SIZE),
            scratch: Vec::with_capacity(MAX_PACKET_SIZE),
            next_fragment_id: rand::rng().random(),
        }
    }

    pub fn config(&self) -> &TranslatorConfig {
        &self.config
    }

    /// Buffer the next inbound packet is read into.
    pub fn in_buffer_mut(&mut self) -> &mut [u8] {
        &mut self.in_buffer
    }

    /// Packets produced by the last successful translation.
    pub fn output(&self) -> &PacketQueue {
        &self.output
    }

    /// Translate the first `len` bytes of the input buffer.
    ///
    /// The IP version nibble selects the direction. On `Err` the output queue
    /// is empty and the packet has been dropped.
    pub fn translate(&mut self, len: usize) -> XlatResult<()> {
        self.output.clear();
        let len = len.min(self.in_buffer.len());
        let buf = &self.in_buffer[..len];

        let result = match buf.first().map(|b| b >> 4) {
            Some(4) => xlat_4to6::translate(&self.config, buf, &mut self.output, &mut self.scratch),
            Some(6) => xlat_6to4::translate(
                &self.config,
                buf,
                &mut self.output,
                &mut self.scratch,
                &mut self.next_fragment_id,
            ),
            Some(version) => Err(DropReason::UnsupportedVersion(version)),
            None => Err(DropReason::Truncated),
        };

        if let Err(reason) = result {
            self.output.clear();
            log::trace!("Dropped {}-byte packet: {}", len, reason);
        }
        result
    }

    /// Translate an IPv4 packet given as a slice instead of the input buffer.
    pub fn translate_4to6(&mut self, packet: &[u8]) -> XlatResult<()> {
        self.output.clear();
        let result = xlat_4to6::translate(&self.config, packet, &mut self.output, &mut self.scratch);
        if result.is_err() {
            self.output.clear();
        }
        result
    }

    /// Translate an IPv6 packet given as a slice instead of the input buffer.
    pub fn translate_6to4(&mut self, packet: &[u8]) -> XlatResult<()> {
        self.output.clear();
        let result = xlat_6to4::translate(
            &self.config,
            packet,
            &mut self.output,
            &mut self.scratch,
            &mut self.next_fragment_id,
        );
        if result.is_err() {
            self.output.clear();
        }
        result
    }
}
