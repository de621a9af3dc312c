//! Streaming block deduplication.
//!
//! [`Writer`] splits an incoming byte stream into fixed-size or
//! content-defined blocks, hashes them on a worker pool, and emits every
//! block either inline or as a back-reference to an earlier identical
//! block.
//! Output is an index/data stream pair ([`Writer::new`]), a single
//! self-contained stream ([`Writer::new_stream`]), or a channel of
//! [`Fragment`] records ([`Writer::new_splitter`]).

pub mod block;
pub mod chunker;
pub mod error;
pub mod writer;

mod hasher;
mod index;
mod varint;

pub use block::{BlockId, Fragment, HASH_SIZE};
pub use chunker::Mode;
pub use error::{Result, SunderError};
pub use writer::{Writer, MIN_BLOCK_SIZE};

#[cfg(test)]
mod testutil;
