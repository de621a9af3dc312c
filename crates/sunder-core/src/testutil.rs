use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

/// Shared in-memory sink; clones observe the same buffer, so a test can
/// hand one copy to a writer thread and read the other after close.
#[derive(Clone, Default)]
pub struct MemSink {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl MemSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.buf.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.buf.lock().unwrap().len()
    }
}

impl Write for MemSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sink that fails with an I/O error once `limit` bytes have been taken.
pub struct FailingSink {
    remaining: usize,
}

impl FailingSink {
    pub fn after(limit: usize) -> Self {
        Self { remaining: limit }
    }
}

impl Write for FailingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.remaining < buf.len() {
            return Err(io::Error::new(io::ErrorKind::Other, "sink full"));
        }
        self.remaining -= buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; len];
    rng.fill_bytes(&mut data);
    data
}

/// Varint encoding of `v`, for composing expected stream bytes.
pub fn uv(v: u64) -> Vec<u8> {
    let mut buf = [0u8; crate::varint::MAX_VARINT_LEN];
    let n = crate::varint::put_uvarint(&mut buf, v);
    buf[..n].to_vec()
}

/// Read one unsigned varint at `*pos`, advancing it.
pub fn read_uvarint(data: &[u8], pos: &mut usize) -> u64 {
    let mut value: u64 = 0;
    let mut shift = 0;
    loop {
        let byte = data[*pos];
        *pos += 1;
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return value;
        }
        shift += 7;
    }
}

/// Reconstruct the original stream from a format-1 index/data pair.
/// Panics on any framing violation, which is exactly what a test wants.
pub fn decode_split(index: &[u8], blocks: &[u8]) -> Vec<u8> {
    let mut pos = 0;
    assert_eq!(read_uvarint(index, &mut pos), 1, "format tag");
    let max_size = read_uvarint(index, &mut pos) as usize;

    let mut data_pos = 0;
    let mut seen: Vec<Vec<u8>> = Vec::new();
    let mut out = Vec::new();
    loop {
        let token = read_uvarint(index, &mut pos);
        if token == u64::MAX {
            let tail_len = max_size - read_uvarint(index, &mut pos) as usize;
            assert_eq!(read_uvarint(index, &mut pos), 0, "continuation flag");
            assert_eq!(pos, index.len(), "index trailing garbage");
            let tail = &blocks[data_pos..data_pos + tail_len];
            assert_eq!(data_pos + tail_len, blocks.len(), "data trailing garbage");
            out.extend_from_slice(tail);
            return out;
        }
        if token == 0 {
            let len = max_size - read_uvarint(index, &mut pos) as usize;
            let payload = blocks[data_pos..data_pos + len].to_vec();
            data_pos += len;
            out.extend_from_slice(&payload);
            seen.push(payload);
        } else {
            let offset = token as usize;
            assert!(offset <= seen.len(), "back-reference out of range");
            let payload = seen[seen.len() - offset].clone();
            out.extend_from_slice(&payload);
            seen.push(payload);
        }
    }
}

/// Reconstruct the original stream from a format-2 single stream.
/// Returns the payload bytes; asserts the declared back-reference bound.
pub fn decode_stream(stream: &[u8]) -> Vec<u8> {
    let mut pos = 0;
    assert_eq!(read_uvarint(stream, &mut pos), 2, "format tag");
    let max_size = read_uvarint(stream, &mut pos) as usize;
    let max_blocks = read_uvarint(stream, &mut pos);

    let mut seen: Vec<Vec<u8>> = Vec::new();
    let mut out = Vec::new();
    loop {
        let token = read_uvarint(stream, &mut pos);
        if token == u64::MAX {
            let tail_len = max_size - read_uvarint(stream, &mut pos) as usize;
            let tail = &stream[pos..pos + tail_len];
            pos += tail_len;
            assert_eq!(read_uvarint(stream, &mut pos), 0, "continuation flag");
            assert_eq!(pos, stream.len(), "stream trailing garbage");
            out.extend_from_slice(tail);
            return out;
        }
        if token == 0 {
            let len = max_size - read_uvarint(stream, &mut pos) as usize;
            let payload = stream[pos..pos + len].to_vec();
            pos += len;
            out.extend_from_slice(&payload);
            seen.push(payload);
        } else {
            let offset = token as usize;
            assert!(offset <= seen.len(), "back-reference out of range");
            if max_blocks > 0 {
                assert!(
                    offset as u64 <= max_blocks,
                    "back-reference {offset} exceeds bound {max_blocks}"
                );
            }
            let payload = seen[seen.len() - offset].clone();
            out.extend_from_slice(&payload);
            seen.push(payload);
        }
    }
}
