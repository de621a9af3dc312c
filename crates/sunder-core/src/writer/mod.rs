//! Coordinator: wires the chunker, hash workers, buffer pool, and
//! ordering writer together behind a `Write`-style facade.

mod emit;

use std::io::{self, Write};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::debug;

use crate::block::{block_pool, buffer_multiplier, Block, Fragment, HashJob, HASH_SIZE};
use crate::chunker::{Chunker, Engine, Mode};
use crate::error::{ErrorLatch, Result, SunderError};
use crate::hasher;
use crate::varint::{write_uvarint, END_OF_STREAM};

use emit::{EmitterOutput, Sink};

/// The smallest permitted maximum block size.
pub const MIN_BLOCK_SIZE: usize = 512;

#[derive(Debug)]
enum Variant {
    Split,
    Single,
    Fragment,
}

enum Target {
    Split { index: Sink, blocks: Sink },
    Single { stream: Sink },
    Fragment { frags: Sender<Fragment> },
}

/// Streaming deduplicator.
///
/// Bytes written in are cut into blocks by the configured [`Mode`],
/// hashed on a worker pool, and emitted in submission order: inline on
/// first sight, as a back-reference when the content was seen before.
/// [`close`](Writer::close) must be called to flush the trailer; dropping
/// an unclosed writer shuts the pipeline down without one.
#[derive(Debug)]
pub struct Writer {
    engine: Engine,
    chunker: Chunker,
    err: ErrorLatch,
    hashers: Vec<JoinHandle<()>>,
    emitter: Option<JoinHandle<EmitterOutput>>,
    variant: Variant,
    max_blocks: u64,
    closed: bool,
}

struct Pipes {
    engine: Engine,
    hash_rx: Receiver<HashJob>,
    order_rx: Receiver<Block>,
    pool_tx: Sender<Block>,
    ncpu: usize,
}

fn plumbing(max_size: usize) -> Pipes {
    let ncpu = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let depth = ncpu * buffer_multiplier(max_size);
    let (hash_tx, hash_rx) = bounded(depth);
    let (order_tx, order_rx) = bounded(depth);
    let (pool_tx, pool_rx) = block_pool(depth, max_size);
    Pipes {
        engine: Engine::new(max_size, pool_rx, hash_tx, order_tx),
        hash_rx,
        order_rx,
        pool_tx,
        ncpu,
    }
}

impl Writer {
    /// Split-stream deduplicator: index entries on `index`, unique block
    /// payloads on `blocks`.
    ///
    /// `max_memory` caps the memory a decoder needs by limiting how far
    /// back a match may reach (`max_memory / max_size` blocks); 0 leaves
    /// the reach unbounded. Fails if `max_size` is below
    /// [`MIN_BLOCK_SIZE`]; on error nothing has been spawned or written.
    pub fn new<I, B>(index: I, blocks: B, mode: Mode, max_size: usize, max_memory: u64) -> Result<Writer>
    where
        I: Write + Send + 'static,
        B: Write + Send + 'static,
    {
        if max_size < MIN_BLOCK_SIZE {
            return Err(SunderError::BlockSizeTooSmall);
        }
        let max_blocks = max_memory / max_size as u64;
        let mut index_sink: Sink = Box::new(index);
        write_uvarint(&mut index_sink, 1)?;
        write_uvarint(&mut index_sink, max_size as u64)?;
        Self::start(
            mode,
            max_size,
            max_blocks,
            Target::Split {
                index: index_sink,
                blocks: Box::new(blocks),
            },
        )
    }

    /// Single-stream deduplicator: index entries and payloads interleaved
    /// on one sink, readable with bounded memory.
    ///
    /// `max_memory` must hold at least one block; the derived block count
    /// is a hard cap on back-reference distance.
    pub fn new_stream<W>(out: W, mode: Mode, max_size: usize, max_memory: u64) -> Result<Writer>
    where
        W: Write + Send + 'static,
    {
        if max_size < MIN_BLOCK_SIZE {
            return Err(SunderError::BlockSizeTooSmall);
        }
        if max_memory < max_size as u64 {
            return Err(SunderError::MaxMemoryTooSmall);
        }
        let max_blocks = max_memory / max_size as u64;
        let mut stream: Sink = Box::new(out);
        write_uvarint(&mut stream, 2)?;
        write_uvarint(&mut stream, max_size as u64)?;
        write_uvarint(&mut stream, max_blocks)?;
        Self::start(mode, max_size, max_blocks, Target::Single { stream })
    }

    /// Splitter: every block is delivered as a [`Fragment`] on `frags`
    /// with its digest and a first-sight flag; no framed output.
    ///
    /// The channel must keep accepting fragments while data is written.
    /// The seen-digest set never evicts, so memory grows with the number
    /// of distinct blocks. The channel is closed when [`close`] drains
    /// the final fragment.
    ///
    /// [`close`]: Writer::close
    pub fn new_splitter(frags: Sender<Fragment>, mode: Mode, max_size: usize) -> Result<Writer> {
        if max_size < MIN_BLOCK_SIZE {
            return Err(SunderError::BlockSizeTooSmall);
        }
        Self::start(mode, max_size, 0, Target::Fragment { frags })
    }

    fn start(mode: Mode, max_size: usize, max_blocks: u64, target: Target) -> Result<Writer> {
        let Pipes {
            engine,
            hash_rx,
            order_rx,
            pool_tx,
            ncpu,
        } = plumbing(max_size);
        let err = ErrorLatch::new();
        let hashers = hasher::spawn(ncpu, hash_rx);

        let variant = match &target {
            Target::Split { .. } => Variant::Split,
            Target::Single { .. } => Variant::Single,
            Target::Fragment { .. } => Variant::Fragment,
        };
        let emit_err = err.clone();
        let emitter = std::thread::spawn(move || match target {
            Target::Split { index, blocks } => {
                emit::run_split(index, blocks, order_rx, pool_tx, emit_err, max_size, max_blocks)
            }
            Target::Single { stream } => {
                emit::run_single(stream, order_rx, pool_tx, emit_err, max_size, max_blocks)
            }
            Target::Fragment { frags } => emit::run_fragment(frags, order_rx, pool_tx, emit_err),
        });

        debug!(?mode, max_size, max_blocks, workers = ncpu, "dedup writer started");
        Ok(Writer {
            engine,
            chunker: Chunker::new(mode, max_size),
            err,
            hashers,
            emitter: Some(emitter),
            variant,
            max_blocks,
            closed: false,
        })
    }

    fn write_bytes(&mut self, buf: &[u8]) -> Result<usize> {
        if let Some(err) = self.err.get() {
            return Err(err);
        }
        if self.closed {
            return Err(SunderError::Closed);
        }
        self.chunker.write(&mut self.engine, buf)?;
        Ok(buf.len())
    }

    /// Force a block boundary so a new block begins with the next write.
    /// No-op when no partial block is buffered.
    pub fn split(&mut self) -> Result<()> {
        if self.closed {
            return Err(SunderError::Closed);
        }
        self.chunker.split(&mut self.engine)
    }

    /// Number of blocks cut so far. Blocks may still be in flight to the
    /// output.
    pub fn blocks(&self) -> u64 {
        self.engine.nblocks - 1
    }

    /// Flush the pipeline and write the end-of-stream trailer.
    ///
    /// Idempotent: the first call performs the shutdown, every call
    /// returns the latched error state.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return self.err.result();
        }
        // The fragment variant flushes its tail as a final block; the
        // stream formats carry the tail in the trailer instead.
        if matches!(self.variant, Variant::Fragment) {
            if let Err(err) = self.chunker.split(&mut self.engine) {
                self.err.set(err);
            }
        }
        self.closed = true;
        self.engine.shutdown_queues();
        for handle in self.hashers.drain(..) {
            let _ = handle.join();
        }
        let output = match self.emitter.take() {
            Some(handle) => match handle.join() {
                Ok(output) => Some(output),
                Err(_) => {
                    self.err.set(SunderError::Internal("ordering writer panicked"));
                    None
                }
            },
            None => None,
        };
        if let Some(output) = output {
            if let Err(err) = self.write_trailer(output) {
                self.err.set(err);
            }
        }
        debug!(blocks = self.blocks(), "dedup writer closed");
        self.err.result()
    }

    /// End-of-stream trailer: the varint sentinel, the padding that
    /// encodes the tail length, the tail bytes, and a continuation flag
    /// that this writer always leaves zero.
    fn write_trailer(&self, output: EmitterOutput) -> Result<()> {
        let tail = &self.engine.cur;
        let padding = (self.engine.max_size - tail.len()) as u64;
        match output {
            EmitterOutput::Split {
                mut index,
                mut blocks,
            } => {
                write_uvarint(&mut index, END_OF_STREAM)?;
                write_uvarint(&mut index, padding)?;
                write_uvarint(&mut index, 0)?;
                blocks.write_all(tail)?;
                blocks.flush()?;
                index.flush()?;
            }
            EmitterOutput::Single { mut stream } => {
                write_uvarint(&mut stream, END_OF_STREAM)?;
                write_uvarint(&mut stream, padding)?;
                stream.write_all(tail)?;
                write_uvarint(&mut stream, 0)?;
                stream.flush()?;
            }
            EmitterOutput::Fragment => {}
        }
        Ok(())
    }

    /// Approximate maximum encoder and decoder memory, in that order, for
    /// deduplicating `bytes` bytes. Analytic estimate; saturates at
    /// `i64::MAX`.
    pub fn mem_use(&self, bytes: u64) -> (i64, i64) {
        let max_size = self.engine.max_size as u64;
        let mut blocks = bytes.div_ceil(max_size);
        if self.max_blocks > 0 {
            blocks = blocks.min(self.max_blocks);
        }
        let decoder = blocks as u128 * max_size as u128;
        // Digest, block number, and per-entry map overhead.
        let per_entry = (HASH_SIZE + 8 + 24) as u128;
        let encoder = blocks as u128 * per_entry;
        (saturate_i64(encoder), saturate_i64(decoder))
    }
}

fn saturate_i64(v: u128) -> i64 {
    v.try_into().unwrap_or(i64::MAX)
}

impl Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf).map_err(io::Error::other)
    }

    /// Blocks are cut by the chunker and the trailer by [`Writer::close`];
    /// there is nothing to flush in between.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // Best-effort teardown without a trailer: close the queues and
        // join the pipeline threads so a leaked writer cannot leak them.
        self.engine.shutdown_queues();
        for handle in self.hashers.drain(..) {
            let _ = handle.join();
        }
        if let Some(handle) = self.emitter.take() {
            let _ = handle.join();
        }
    }
}
