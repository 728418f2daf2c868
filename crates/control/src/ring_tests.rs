// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn empty_snapshot() {
    let ring = RingBuffer::new(16);
    assert!(ring.snapshot().is_empty());
    assert_eq!(ring.total_written(), 0);
}

#[test]
fn sequential_appends() {
    let ring = RingBuffer::new(16);
    ring.append(b"hello");
    ring.append(b" world");

    assert_eq!(ring.snapshot(), b"hello world".to_vec());
    assert_eq!(ring.total_written(), 11);
}

#[test]
fn wrap_around_keeps_suffix() {
    let ring = RingBuffer::new(8);
    ring.append(b"abcdef"); // 6 bytes, write_pos=6
    ring.append(b"ghij"); // wraps: write_pos=2

    // total_written=10, capacity=8: the two oldest bytes are gone
    assert_eq!(ring.snapshot(), b"cdefghij".to_vec());
    assert_eq!(ring.total_written(), 10);
}

#[test]
fn exact_capacity_append() {
    let ring = RingBuffer::new(4);
    ring.append(b"abcd");
    assert_eq!(ring.snapshot(), b"abcd".to_vec());
}

#[test]
fn overwrite_full_buffer() {
    let ring = RingBuffer::new(4);
    ring.append(b"abcd");
    ring.append(b"efgh");
    assert_eq!(ring.snapshot(), b"efgh".to_vec());
}

#[test]
fn oversized_append_keeps_tail() {
    let ring = RingBuffer::new(4);
    ring.append(b"abcdefghij");
    assert_eq!(ring.snapshot(), b"ghij".to_vec());
    assert_eq!(ring.total_written(), 10);
}

#[test]
fn snapshot_is_suffix_of_stream() {
    // Property 4: snapshot == suffix of everything appended, len = min(W, C).
    let ring = RingBuffer::new(32);
    let mut stream = Vec::new();
    for i in 0..20u8 {
        let chunk = vec![b'a' + (i % 26); (i as usize % 7) + 1];
        stream.extend_from_slice(&chunk);
        ring.append(&chunk);

        let snap = ring.snapshot();
        assert_eq!(snap.len(), stream.len().min(32));
        assert_eq!(&stream[stream.len() - snap.len()..], &snap[..]);
    }
}

#[test]
fn zero_capacity_falls_back_to_default() {
    let ring = RingBuffer::new(0);
    ring.append(b"data");
    assert_eq!(ring.snapshot(), b"data".to_vec());
}
