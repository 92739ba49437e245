//! Translation worker threads.
//!
//! Each worker owns a [`TranslatorContext`] and its own duplicated read/write
//! handles, and runs a blocking read -> translate -> write loop. The
//! configuration is the only shared state.

use crate::device::PacketChannel;
use anyhow::{Context, Result};
use std::io::{Read, Write};
use std::sync::Arc;
use std::thread;
use tunnel_xlat::{TranslatorConfig, TranslatorContext, XlatError};

/// Translate packets from `reader` to `writer` until end of input.
pub fn run_loop<R: Read, W: Write>(
    ctx: &mut TranslatorContext,
    reader: &mut R,
    writer: &mut W,
) -> Result<(), XlatError> {
    loop {
        let len = match reader.read(ctx.in_buffer_mut()) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) => {
                let err = XlatError::from(e);
                if err.is_fatal() {
                    return Err(err);
                }
                continue;
            }
        };

        if ctx.translate(len).is_err() {
            continue;
        }

        for packet in ctx.output().iter() {
            write_packet(writer, packet)?;
        }
    }
}

fn write_packet<W: Write>(writer: &mut W, packet: &[u8]) -> Result<(), XlatError> {
    loop {
        match writer.write(packet) {
            Ok(n) if n == packet.len() => return Ok(()),
            Ok(n) => {
                log::warn!("Short write: {} of {} bytes", n, packet.len());
                return Ok(());
            }
            Err(e) => {
                let err = XlatError::from(e);
                if err.is_fatal() {
                    return Err(err);
                }
            }
        }
    }
}

fn worker_main(index: usize, config: Arc<TranslatorConfig>, mut channel: PacketChannel) {
    let mut ctx = TranslatorContext::new(config);
    log::debug!("Worker {} started", index);

    match run_loop(&mut ctx, &mut channel.reader, &mut channel.writer) {
        Ok(()) => log::info!("Worker {}: input closed", index),
        Err(e) => {
            log::error!("Worker {}: {}", index, e);
            std::process::exit(1);
        }
    }
}

/// Start `threads` workers on duplicates of `channel` and wait for them.
pub fn run_workers(config: Arc<TranslatorConfig>, channel: PacketChannel, threads: usize) -> Result<()> {
    let mut handles = Vec::with_capacity(threads);
    for index in 0..threads {
        let worker_channel = channel
            .try_clone()
            .context("Failed to duplicate packet descriptors")?;
        let config = Arc::clone(&config);
        let handle = thread::Builder::new()
            .name(format!("xlat-worker-{}", index))
            .spawn(move || worker_main(index, config, worker_channel))
            .context("Failed to spawn worker thread")?;
        handles.push(handle);
    }
    drop(channel);

    log::info!("Started {} translator thread(s)", threads);
    for handle in handles {
        if handle.join().is_err() {
            anyhow::bail!("Worker thread panicked");
        }
    }
    Ok(())
}
