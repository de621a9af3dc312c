//! Ordering-writer loops, one per output shape.
//!
//! Each runs on the dedicated emit thread: receive a block envelope from
//! the order queue (FIFO, so submission order), wait on its completion
//! channel for the digest, consult and update the dedup index, emit, and
//! recycle the envelope into the pool. The sinks are returned to the
//! coordinator when the queue closes so `close` can write the trailer.
//!
//! On the first sink error the loop latches it and switches to drain
//! mode: envelopes keep flowing back to the pool but nothing more is
//! emitted, so the chunker and the hash workers can never wedge on a
//! full queue behind a dead output.

use std::io::Write;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use crate::block::{Block, BlockId, Fragment};
use crate::error::{ErrorLatch, Result, SunderError};
use crate::index::DedupIndex;
use crate::varint::write_uvarint;

pub(crate) type Sink = Box<dyn Write + Send>;

/// Sinks handed back by the emit thread for trailer writing.
pub(crate) enum EmitterOutput {
    Split { index: Sink, blocks: Sink },
    Single { stream: Sink },
    Fragment,
}

/// Wait for a block's digest. The reply arrives exactly once per
/// hand-off; a closed channel means a worker died mid-block.
fn wait_hashed(block: &Block, err: &ErrorLatch) -> Option<crate::block::Hashed> {
    match block.done_rx.recv() {
        Ok(hashed) => Some(hashed),
        Err(_) => {
            err.set(SunderError::Internal("completion channel closed"));
            None
        }
    }
}

/// Split-stream variant: index entries on one sink, unique payloads on
/// the other.
pub(crate) fn run_split(
    mut index_sink: Sink,
    mut block_sink: Sink,
    order_rx: Receiver<Block>,
    pool_tx: Sender<Block>,
    err: ErrorLatch,
    max_size: usize,
    max_blocks: u64,
) -> EmitterOutput {
    let mut dedup = DedupIndex::new(max_blocks);
    let mut failed = false;
    let mut processed: u64 = 0;

    for mut block in order_rx.iter() {
        let Some(hashed) = wait_hashed(&block, &err) else {
            break;
        };
        block.data = hashed.data;

        if !failed {
            if let Err(e) = emit_split_block(
                &mut index_sink,
                &mut block_sink,
                &mut dedup,
                &block,
                &hashed.digest,
                max_size,
            ) {
                warn!(error = %e, block = block.n, "emit failed; draining remaining blocks");
                err.set(e);
                failed = true;
            }
        }
        processed += 1;
        if recycle(&pool_tx, block).is_err() {
            break;
        }
    }
    debug!(blocks = processed, "split-stream writer exited");
    EmitterOutput::Split {
        index: index_sink,
        blocks: block_sink,
    }
}

fn emit_split_block(
    idx: &mut Sink,
    blks: &mut Sink,
    dedup: &mut DedupIndex,
    block: &Block,
    digest: &BlockId,
    max_size: usize,
) -> Result<()> {
    match dedup.lookup(digest) {
        None => {
            blks.write_all(&block.data)?;
            write_uvarint(idx, 0)?;
            write_uvarint(idx, (max_size - block.data.len()) as u64)?;
        }
        Some(m) => {
            if m >= block.n {
                return Err(SunderError::NonPositiveOffset);
            }
            write_uvarint(idx, block.n - m)?;
        }
    }
    dedup.record(*digest, block.n);
    dedup.evict_overfill();
    Ok(())
}

/// Single-stream variant: index entries and payloads interleaved on one
/// sink. The distance bound is a wire-format invariant here, so a match
/// beyond `max_blocks` is treated as unseen.
pub(crate) fn run_single(
    mut stream: Sink,
    order_rx: Receiver<Block>,
    pool_tx: Sender<Block>,
    err: ErrorLatch,
    max_size: usize,
    max_blocks: u64,
) -> EmitterOutput {
    let mut dedup = DedupIndex::new(max_blocks);
    let mut failed = false;
    let mut processed: u64 = 0;

    for mut block in order_rx.iter() {
        let Some(hashed) = wait_hashed(&block, &err) else {
            break;
        };
        block.data = hashed.data;

        if !failed {
            if let Err(e) = emit_single_block(
                &mut stream,
                &mut dedup,
                &block,
                &hashed.digest,
                max_size,
                max_blocks,
            ) {
                warn!(error = %e, block = block.n, "emit failed; draining remaining blocks");
                err.set(e);
                failed = true;
            }
        }
        processed += 1;
        if recycle(&pool_tx, block).is_err() {
            break;
        }
    }
    debug!(blocks = processed, "single-stream writer exited");
    EmitterOutput::Single { stream }
}

fn emit_single_block(
    out: &mut Sink,
    dedup: &mut DedupIndex,
    block: &Block,
    digest: &BlockId,
    max_size: usize,
    max_blocks: u64,
) -> Result<()> {
    let mut matched = dedup.lookup(digest);
    if let Some(m) = matched {
        if max_blocks > 0 && block.n - m > max_blocks {
            matched = None;
        }
    }
    match matched {
        None => {
            write_uvarint(out, 0)?;
            write_uvarint(out, (max_size - block.data.len()) as u64)?;
            out.write_all(&block.data)?;
        }
        Some(m) => {
            if m >= block.n {
                return Err(SunderError::NonPositiveOffset);
            }
            write_uvarint(out, block.n - m)?;
        }
    }
    dedup.record(*digest, block.n);
    dedup.evict_stale(block.n);
    Ok(())
}

/// Fragment variant: structured records on a channel instead of framed
/// bytes. The index is a pure membership set and never evicts. Dropping
/// the sender on exit closes the channel.
pub(crate) fn run_fragment(
    frags: Sender<Fragment>,
    order_rx: Receiver<Block>,
    pool_tx: Sender<Block>,
    err: ErrorLatch,
) -> EmitterOutput {
    let mut seen = DedupIndex::new(0);
    let mut failed = false;
    let mut next: u64 = 0;

    for mut block in order_rx.iter() {
        let Some(hashed) = wait_hashed(&block, &err) else {
            break;
        };
        block.data = hashed.data;

        if !failed {
            let new = !seen.contains(&hashed.digest);
            if new {
                seen.record(hashed.digest, 0);
            }
            // The envelope is recycled below, so the record owns a copy.
            let fragment = Fragment {
                hash: hashed.digest,
                payload: block.data.clone(),
                new,
                n: next,
            };
            if frags.send(fragment).is_err() {
                warn!(block = block.n, "fragment receiver dropped; draining remaining blocks");
                err.set(SunderError::Internal("fragment receiver dropped"));
                failed = true;
            } else {
                next += 1;
            }
        }
        if recycle(&pool_tx, block).is_err() {
            break;
        }
    }
    debug!(fragments = next, "fragment writer exited");
    EmitterOutput::Fragment
}

/// Clear the envelope and hand it back to the pool.
fn recycle(pool_tx: &Sender<Block>, mut block: Block) -> std::result::Result<(), ()> {
    block.data.clear();
    block.n = 0;
    pool_tx.send(block).map_err(|_| ())
}
