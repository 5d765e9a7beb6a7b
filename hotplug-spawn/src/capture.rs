//! Caller-owned buffer receiving a helper's standard output.

use bytes::{BufMut, BytesMut};

/// Bounded append-only byte buffer.
///
/// At most `capacity - 1` bytes are stored so that the NUL-terminated view
/// always fits in `capacity`. Bytes beyond that are dropped.
#[derive(Debug, Clone)]
pub struct CaptureBuffer {
    buf: BytesMut,
    capacity: usize,
}

impl CaptureBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(1).saturating_sub(self.buf.len())
    }

    /// Appends as much of `data` as fits and returns the number of bytes
    /// taken.
    pub fn append(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.remaining());
        self.buf.put_slice(&data[..n]);
        n
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Collected bytes followed by a terminating NUL.
    pub fn as_bytes_with_nul(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.buf.len() + 1);
        out.extend_from_slice(&self.buf);
        out.push(0);
        out
    }

    /// Lossy text view, as used for `result` substitutions.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
