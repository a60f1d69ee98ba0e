//! Byte-buffer pool — contract-only per the specification's §4.1.
//!
//! Scoped acquisition with guaranteed release: `get()` hands out a
//! `PooledBuffer`, whose `Drop` impl returns the underlying storage to the
//! pool's free list regardless of how the caller's scope exits (success,
//! early return, or panic unwind). Callers must `reset()` before reuse;
//! `get()` never fails except by propagating the underlying I/O error
//! inside `read_from`.

use std::io::Read;
use std::sync::{Arc, Mutex};

use bytes::BytesMut;

#[derive(Clone, Default)]
pub struct BufferPool {
    free: Arc<Mutex<Vec<BytesMut>>>,
}

impl BufferPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a buffer. Its length is 0 unless retained storage from a
    /// prior release was reused without a reset — callers must reset
    /// before use in that case.
    pub fn get(&self) -> PooledBuffer {
        let buf = self
            .free
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop()
            .unwrap_or_default();
        PooledBuffer {
            buf,
            pool: self.free.clone(),
        }
    }
}

pub struct PooledBuffer {
    buf: BytesMut,
    pool: Arc<Mutex<Vec<BytesMut>>>,
}

impl PooledBuffer {
    pub fn write(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn write_byte(&mut self, b: u8) {
        self.buf.extend_from_slice(&[b]);
    }

    pub fn write_string(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
    }

    /// Reads from `reader` until EOF, appending to the buffer.
    pub fn read_from(&mut self, mut reader: impl Read) -> std::io::Result<usize> {
        let mut chunk = [0u8; 8192];
        let mut total = 0;
        loop {
            let n = reader.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            self.buf.extend_from_slice(&chunk[..n]);
            total += n;
        }
        Ok(total)
    }

    pub fn write_to(&self, mut writer: impl std::io::Write) -> std::io::Result<()> {
        writer.write_all(&self.buf)
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let returned = std::mem::take(&mut self.buf);
        self.pool
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(returned);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_acquire_release_roundtrip() {
        let pool = BufferPool::new();
        {
            let mut buf = pool.get();
            buf.write(b"hello");
            assert_eq!(buf.bytes(), b"hello");
        }
        // buffer returned to free list on drop
        let mut buf2 = pool.get();
        buf2.reset();
        assert!(buf2.is_empty());
    }

    #[test]
    fn read_from_reader_accumulates() {
        let pool = BufferPool::new();
        let mut buf = pool.get();
        let n = buf.read_from(&b"abcdef"[..]).expect("read");
        assert_eq!(n, 6);
        assert_eq!(buf.bytes(), b"abcdef");
    }
}
