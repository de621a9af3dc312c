//! Block boundary detection.
//!
//! Three interchangeable strategies share one contract: `write` absorbs
//! every input byte and emits any number of finished blocks as a side
//! effect; `split` force-flushes the current tail so a new block begins
//! with the next write.

mod entropy;
mod rolling;

pub(crate) use entropy::EntropyChunker;
pub(crate) use rolling::RollingChunker;

use crossbeam_channel::{Receiver, Sender};

use crate::block::{Block, HashJob};
use crate::error::{Result, SunderError};

/// Input-splitting strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Fixed-size blocks. Fastest; duplicates are only found at aligned
    /// positions, so `split` is useful to re-align the search.
    Fixed,
    /// Content-defined blocks cut by an order-1 rolling hash. Average
    /// block size is roughly a quarter of the maximum; minimum is a
    /// sixty-fourth.
    Dynamic,
    /// Content-defined blocks cut by a byte-frequency predictor.
    DynamicEntropy,
}

/// Boundary threshold for the content-defined strategies. A 32-bit hash
/// below this value ends a block, tuned so the expected block size lands
/// near `max_size / 4`.
pub(super) fn max_hash_for(max_size: usize) -> u32 {
    let fragment = (max_size as f64 / 4096.0).log2();
    (22.0 - fragment).exp2() as u32
}

/// Chunker-facing half of the coordinator: the partial block under
/// construction plus the channels of the hashing/ordering pipeline.
///
/// `cur.len()` is the write offset; its capacity is always `max_size`,
/// so the hot path never allocates.
#[derive(Debug)]
pub(crate) struct Engine {
    pub(crate) cur: Vec<u8>,
    pub(crate) max_size: usize,
    /// Next block number to assign; 1-origin.
    pub(crate) nblocks: u64,
    pool: Receiver<Block>,
    hash_tx: Option<Sender<HashJob>>,
    order_tx: Option<Sender<Block>>,
}

impl Engine {
    pub(crate) fn new(
        max_size: usize,
        pool: Receiver<Block>,
        hash_tx: Sender<HashJob>,
        order_tx: Sender<Block>,
    ) -> Self {
        Engine {
            cur: Vec::with_capacity(max_size),
            max_size,
            nblocks: 1,
            pool,
            hash_tx: Some(hash_tx),
            order_tx: Some(order_tx),
        }
    }

    /// Seal `cur` as a finished block: acquire an envelope from the pool
    /// (may block), swap payload vecs so the chunker keeps a full-capacity
    /// buffer, stamp the block number, and hand the payload to the hash
    /// queue before the envelope joins the order queue. The hasher must
    /// see a block no later than the ordering writer waits on it.
    pub(crate) fn emit_block(&mut self) -> Result<()> {
        let hash_tx = self.hash_tx.as_ref().ok_or(SunderError::Closed)?;
        let order_tx = self.order_tx.as_ref().ok_or(SunderError::Closed)?;

        let mut block = self
            .pool
            .recv()
            .map_err(|_| SunderError::Internal("buffer pool closed"))?;
        std::mem::swap(&mut block.data, &mut self.cur);
        block.n = self.nblocks;
        self.nblocks += 1;

        let data = std::mem::take(&mut block.data);
        let reply = block.done_tx.clone();
        hash_tx
            .send(HashJob { data, reply })
            .map_err(|_| SunderError::Internal("hash queue closed"))?;
        order_tx
            .send(block)
            .map_err(|_| SunderError::Internal("order queue closed"))?;
        Ok(())
    }

    /// Drop the queue senders so the hash workers and the ordering writer
    /// drain out and exit.
    pub(crate) fn shutdown_queues(&mut self) {
        self.hash_tx = None;
        self.order_tx = None;
    }
}

#[derive(Debug)]
pub(crate) enum Chunker {
    Fixed,
    Rolling(RollingChunker),
    Entropy(EntropyChunker),
}

impl Chunker {
    pub(crate) fn new(mode: Mode, max_size: usize) -> Self {
        match mode {
            Mode::Fixed => Chunker::Fixed,
            Mode::Dynamic => Chunker::Rolling(RollingChunker::new(max_size)),
            Mode::DynamicEntropy => Chunker::Entropy(EntropyChunker::new(max_size)),
        }
    }

    pub(crate) fn write(&mut self, eng: &mut Engine, buf: &[u8]) -> Result<()> {
        match self {
            Chunker::Fixed => write_fixed(eng, buf),
            Chunker::Rolling(chunker) => chunker.write(eng, buf),
            Chunker::Entropy(chunker) => chunker.write(eng, buf),
        }
    }

    /// Force a boundary. No-op while no partial block is buffered, so a
    /// repeated split flushes nothing extra.
    pub(crate) fn split(&mut self, eng: &mut Engine) -> Result<()> {
        if eng.cur.is_empty() {
            return Ok(());
        }
        eng.emit_block()?;
        match self {
            Chunker::Fixed => {}
            Chunker::Rolling(chunker) => chunker.reset(),
            Chunker::Entropy(chunker) => chunker.reset(),
        }
        Ok(())
    }
}

fn write_fixed(eng: &mut Engine, mut buf: &[u8]) -> Result<()> {
    while !buf.is_empty() {
        let room = eng.max_size - eng.cur.len();
        let take = room.min(buf.len());
        eng.cur.extend_from_slice(&buf[..take]);
        buf = &buf[take..];
        if eng.cur.len() == eng.max_size {
            eng.emit_block()?;
        }
    }
    Ok(())
}
