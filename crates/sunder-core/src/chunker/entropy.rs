//! Byte-frequency boundary detection.
//!
//! Same rolling hash as the order-1 strategy, but the multiplier is
//! chosen by how common the byte has been within the current block: the
//! first `min_fragment` bytes of each block prime a histogram, and from
//! then on bytes at or above the average count roll gently while rare
//! bytes shift history out.

use crate::chunker::rolling::{HIT_MULTIPLIER, MISS_MULTIPLIER};
use crate::chunker::Engine;
use crate::error::Result;

#[derive(Debug)]
pub(crate) struct EntropyChunker {
    h: u32,
    /// Byte counts for the current block's priming prefix.
    hist: [u16; 256],
    hist_len: usize,
    /// A count at or above this marks a byte as common.
    avg_hist: u16,
    min_fragment: usize,
    max_fragment: usize,
    max_hash: u32,
}

impl EntropyChunker {
    pub(crate) fn new(max_size: usize) -> Self {
        let min_fragment = (max_size / 32).clamp(512, 65_535);
        EntropyChunker {
            h: 0,
            hist: [0u16; 256],
            hist_len: 0,
            avg_hist: (min_fragment / 255) as u16,
            min_fragment,
            max_fragment: max_size,
            max_hash: super::max_hash_for(max_size),
        }
    }

    pub(crate) fn write(&mut self, eng: &mut Engine, buf: &[u8]) -> Result<()> {
        let mut rest = buf;
        while !rest.is_empty() {
            // Phase 1: prime the histogram over the first min_fragment
            // bytes of each block. No hash, no boundary checks.
            if self.hist_len < self.min_fragment {
                let take = (self.min_fragment - self.hist_len).min(rest.len());
                for &c in &rest[..take] {
                    self.hist[c as usize] += 1;
                    eng.cur.push(c);
                }
                self.hist_len += take;
                rest = &rest[take..];
                // min_fragment and max_fragment coincide at the smallest
                // block size; the size cap still applies the moment
                // priming completes.
                if eng.cur.len() >= self.max_fragment {
                    eng.emit_block()?;
                    self.reset();
                }
                continue;
            }

            // Phase 2: hash with the multiplier picked by frequency. The
            // histogram itself is frozen until the next block primes it.
            let mut h = self.h;
            let mut consumed = rest.len();
            let mut boundary = false;
            for (i, &c) in rest.iter().enumerate() {
                if self.hist[c as usize] >= self.avg_hist {
                    h = h.wrapping_add(c as u32 + 1).wrapping_mul(HIT_MULTIPLIER);
                } else {
                    h = h.wrapping_add(c as u32 + 1).wrapping_mul(MISS_MULTIPLIER);
                }
                eng.cur.push(c);

                let off = eng.cur.len();
                if (off >= self.min_fragment && h < self.max_hash) || off >= self.max_fragment {
                    consumed = i + 1;
                    boundary = true;
                    break;
                }
            }
            if boundary {
                eng.emit_block()?;
                self.reset();
            } else {
                self.h = h;
            }
            rest = &rest[consumed..];
        }
        Ok(())
    }

    /// Post-boundary reset: the next block primes a fresh histogram.
    pub(crate) fn reset(&mut self) {
        self.h = 0;
        self.hist = [0u16; 256];
        self.hist_len = 0;
    }
}
