//! Block identity, the recyclable block envelope, and the buffer pool.

use std::fmt;

use crossbeam_channel::{bounded, Receiver, Sender};
use sha1::{Digest, Sha1};

/// Size of the content digest in bytes.
pub const HASH_SIZE: usize = 20;

/// 20-byte SHA-1 content digest of a block payload.
///
/// SHA-1 is the on-wire identity of this format: readers match blocks by
/// these bytes, so the algorithm cannot change without breaking streams.
/// The use case is content identity, not adversarial resistance.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub [u8; HASH_SIZE]);

impl BlockId {
    pub fn compute(data: &[u8]) -> Self {
        let digest = Sha1::digest(data);
        let mut out = [0u8; HASH_SIZE];
        out.copy_from_slice(&digest);
        BlockId(out)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

/// A chunked fragment delivered by the splitter variant.
#[derive(Debug, Clone)]
pub struct Fragment {
    /// Content digest of the payload.
    pub hash: BlockId,
    /// Owned copy of the fragment bytes.
    pub payload: Vec<u8>,
    /// True when this digest had not been seen before.
    pub new: bool,
    /// 0-origin fragment ordinal.
    pub n: u64,
}

/// A hashed payload travelling back over a block's completion channel.
pub(crate) struct Hashed {
    pub(crate) data: Vec<u8>,
    pub(crate) digest: BlockId,
}

/// A payload queued for hashing, carrying the reply side of the owning
/// block's completion channel.
pub(crate) struct HashJob {
    pub(crate) data: Vec<u8>,
    pub(crate) reply: Sender<Hashed>,
}

/// Reusable block envelope. The payload vec and the one-shot completion
/// channel are allocated once and live as long as the pool; the envelope
/// is owned by exactly one stage at a time.
pub(crate) struct Block {
    /// 1-origin block number, stamped at boundary time.
    pub(crate) n: u64,
    pub(crate) data: Vec<u8>,
    pub(crate) done_tx: Sender<Hashed>,
    pub(crate) done_rx: Receiver<Hashed>,
}

impl Block {
    fn with_capacity(max_size: usize) -> Self {
        let (done_tx, done_rx) = bounded(1);
        Block {
            n: 0,
            data: Vec::with_capacity(max_size),
            done_tx,
            done_rx,
        }
    }
}

/// Pool sizing factor: keep roughly 256 KiB of buffers queued per worker
/// so small block sizes still keep the hashers fed.
pub(crate) fn buffer_multiplier(max_size: usize) -> usize {
    ((256 << 10) / max_size).max(2)
}

/// Build the pre-filled envelope pool. Receiving from an empty pool
/// blocks, which is the engine's only backpressure mechanism; the pool
/// capacity is therefore also the bound on in-flight blocks.
pub(crate) fn block_pool(count: usize, max_size: usize) -> (Sender<Block>, Receiver<Block>) {
    let (tx, rx) = bounded(count);
    for _ in 0..count {
        tx.send(Block::with_capacity(max_size))
            .expect("pool channel sized to its contents");
    }
    (tx, rx)
}
