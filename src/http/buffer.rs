//! A byte buffer with an appendable tail and a consumable head.
//!
//! Each connection owns two of these: bytes arrive from the transport at
//! the tail of the inbound buffer and the parser trims what it has consumed
//! from the head; the response writer appends to the outbound buffer and
//! the sender trims what the OS accepted.
use std::io;

#[derive(Debug, Default)]
pub struct Buffer {
    bytes: Vec<u8>,
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer { bytes: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The unconsumed bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Appends bytes at the tail.
    pub fn extend(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    /// Drops `n` bytes from the head.
    pub fn consume(&mut self, n: usize) {
        self.bytes.drain(..n);
    }

    /// Removes and returns `n` bytes from the head.
    pub fn take(&mut self, n: usize) -> Vec<u8> {
        let rest = self.bytes.split_off(n);
        ::std::mem::replace(&mut self.bytes, rest)
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Performs one read from `r` into the tail, growing by at most `max`
    /// bytes. Returns the number of bytes read; `Ok(0)` is end-of-stream.
    pub fn read_from<R: io::Read>(&mut self, r: &mut R, max: usize) -> io::Result<usize> {
        let start = self.bytes.len();
        self.bytes.resize(start + max, 0);
        let result = r.read(&mut self.bytes[start..]);
        let n = *result.as_ref().unwrap_or(&0);
        self.bytes.truncate(start + n);
        result
    }
}
