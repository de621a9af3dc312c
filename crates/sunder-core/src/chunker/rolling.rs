//! ZPAQ-style rolling-hash boundary detection.
//!
//! The 32-bit hash depends on roughly the last 32 bytes the order-1 model
//! mispredicted, so edits resynchronize quickly: an insertion or deletion
//! upstream of that window does not move later boundaries. Unlike a Rabin
//! filter there is no fixed window and no inverse multiply at the window
//! exit; the window length is controlled by the two multipliers below.

use crate::chunker::Engine;
use crate::error::Result;

/// Applied when the order-1 model predicted the byte. Odd, so a correct
/// prediction rotates no history out of the hash.
pub(super) const HIT_MULTIPLIER: u32 = 314_159_265;
/// Applied on a misprediction. Even but not divisible by four, shifting
/// one bit of history out per miss.
pub(super) const MISS_MULTIPLIER: u32 = 271_828_182;

#[derive(Debug)]
pub(crate) struct RollingChunker {
    /// Rolling hash over the misprediction window.
    h: u32,
    /// Previous input byte; the order-1 context.
    c1: u8,
    /// Order-1 model: previous byte → predicted next byte.
    o1: [u8; 256],
    min_fragment: usize,
    max_fragment: usize,
    max_hash: u32,
}

impl RollingChunker {
    pub(crate) fn new(max_size: usize) -> Self {
        RollingChunker {
            h: 0,
            c1: 0,
            o1: [0u8; 256],
            min_fragment: max_size / 64,
            max_fragment: max_size,
            max_hash: super::max_hash_for(max_size),
        }
    }

    pub(crate) fn write(&mut self, eng: &mut Engine, buf: &[u8]) -> Result<()> {
        let mut h = self.h;
        let mut c1 = self.c1;
        for &c in buf {
            if c == self.o1[c1 as usize] {
                h = h.wrapping_add(c as u32 + 1).wrapping_mul(HIT_MULTIPLIER);
            } else {
                h = h.wrapping_add(c as u32 + 1).wrapping_mul(MISS_MULTIPLIER);
            }
            self.o1[c1 as usize] = c;
            c1 = c;
            eng.cur.push(c);

            let off = eng.cur.len();
            if (off >= self.min_fragment && h < self.max_hash) || off >= self.max_fragment {
                eng.emit_block()?;
                h = 0;
                c1 = 0;
            }
        }
        self.h = h;
        self.c1 = c1;
        Ok(())
    }

    /// Post-boundary reset. The order-1 model is kept: predictions carry
    /// across block boundaries.
    pub(crate) fn reset(&mut self) {
        self.h = 0;
        self.c1 = 0;
    }
}
