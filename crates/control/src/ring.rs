// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use parking_lot::Mutex;

/// Fixed-capacity circular byte log of recent PTY output.
///
/// Holds its own lock so appends and snapshots may race; this lock is
/// strictly inner to the control-plane lock. Append boundaries are not
/// preserved; the subscriber-side terminal emulator is the authority on
/// interpreting the byte stream.
#[derive(Debug)]
pub struct RingBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
}

#[derive(Debug)]
struct Inner {
    buf: Vec<u8>,
    write_pos: usize,
    total_written: u64,
}

impl RingBuffer {
    /// Create a new ring buffer with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 { 64 * 1024 } else { capacity };
        Self {
            inner: Mutex::new(Inner {
                buf: vec![0u8; capacity],
                write_pos: 0,
                total_written: 0,
            }),
            capacity,
        }
    }

    /// Append data, discarding the oldest bytes once capacity is exceeded.
    pub fn append(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        for chunk in data.chunks(self.capacity) {
            let start = inner.write_pos;
            let end = start + chunk.len();

            if end <= self.capacity {
                inner.buf[start..end].copy_from_slice(chunk);
            } else {
                let first = self.capacity - start;
                inner.buf[start..self.capacity].copy_from_slice(&chunk[..first]);
                inner.buf[..chunk.len() - first].copy_from_slice(&chunk[first..]);
            }

            inner.write_pos = end % self.capacity;
            inner.total_written += chunk.len() as u64;
        }
    }

    /// Copy out the current contents: a contiguous suffix of the global byte
    /// stream of length `min(total_written, capacity)`.
    pub fn snapshot(&self) -> Vec<u8> {
        let inner = self.inner.lock();
        let available = inner.total_written.min(self.capacity as u64) as usize;
        if available == 0 {
            return Vec::new();
        }

        let start = if inner.write_pos >= available {
            inner.write_pos - available
        } else {
            self.capacity - (available - inner.write_pos)
        };

        let mut out = Vec::with_capacity(available);
        if start + available <= self.capacity {
            out.extend_from_slice(&inner.buf[start..start + available]);
        } else {
            out.extend_from_slice(&inner.buf[start..self.capacity]);
            out.extend_from_slice(&inner.buf[..available - (self.capacity - start)]);
        }
        out
    }

    /// Total bytes ever appended through this buffer.
    pub fn total_written(&self) -> u64 {
        self.inner.lock().total_written
    }
}

#[cfg(test)]
#[path = "ring_tests.rs"]
mod tests;
