//! Scatter/gather buffer cursor (spec §4.5).
//!
//! Ported from `original_source/src/vfs/cairn/evpl_iovec_cursor.h`'s
//! `copy`/`skip`/`move` trio. The original threads raw pointers through
//! caller-managed refcounts (`evpl_iovec_addref`); spec §9 calls this out for
//! redesign ("model buffers as shared-ownership handles whose last holder
//! frees the backing memory; the cursor's move operation returns new shared
//! handles"). Here an [`IoVec`] is a cheaply-cloned view (`Arc<[u8]>` plus a
//! byte range) and `move_` returns fresh [`IoVec`]s sharing the same
//! backing allocation, matching the teacher's `allocator::slice::Slice`
//! range-bounded iteration style.

use std::sync::Arc;

/// A reference-counted view into a byte buffer.
#[derive(Clone)]
pub struct IoVec {
    buf: Arc<[u8]>,
    start: usize,
    end: usize,
}

impl IoVec {
    pub fn from_vec(data: Vec<u8>) -> Self {
        let len = data.len();
        Self { buf: Arc::from(data.into_boxed_slice()), start: 0, end: len }
    }

    pub fn from_shared(buf: Arc<[u8]>) -> Self {
        let end = buf.len();
        Self { buf, start: 0, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    /// Returns a new [`IoVec`] sharing this one's backing allocation,
    /// narrowed to `[offset, offset+len)` relative to this view.
    fn sub(&self, offset: usize, len: usize) -> IoVec {
        let start = self.start + offset;
        let end = start + len;
        assert!(end <= self.end, "iovec sub-range out of bounds");
        IoVec { buf: Arc::clone(&self.buf), start, end }
    }
}

/// Walks a sequence of [`IoVec`]s as a single byte stream.
pub struct IoVecCursor {
    iovs: Vec<IoVec>,
    index: usize,
    offset: usize,
}

impl IoVecCursor {
    pub fn new(iovs: Vec<IoVec>) -> Self {
        Self { iovs, index: 0, offset: 0 }
    }

    /// Total bytes remaining ahead of the cursor.
    pub fn remaining(&self) -> usize {
        self.iovs[self.index..]
            .iter()
            .enumerate()
            .map(|(i, iov)| if i == 0 { iov.len() - self.offset } else { iov.len() })
            .sum()
    }

    fn advance_if_exhausted(&mut self) {
        while self.index < self.iovs.len() && self.offset == self.iovs[self.index].len() {
            self.index += 1;
            self.offset = 0;
        }
    }

    /// Copies `length` bytes from the cursor into `out`. Panics if fewer
    /// than `length` bytes remain, matching the original's `abort()` on
    /// under-run: callers are expected to have validated lengths up front.
    pub fn copy(&mut self, out: &mut [u8]) {
        let length = out.len();
        let mut left = length;
        let mut written = 0;
        while left > 0 {
            self.advance_if_exhausted();
            assert!(self.index < self.iovs.len(), "iovec cursor underrun");
            let iov = &self.iovs[self.index];
            let avail = iov.len() - self.offset;
            let chunk = left.min(avail);
            out[written..written + chunk]
                .copy_from_slice(&iov.as_slice()[self.offset..self.offset + chunk]);
            self.offset += chunk;
            written += chunk;
            left -= chunk;
        }
    }

    /// Skips `length` bytes without copying.
    pub fn skip(&mut self, length: usize) {
        let mut left = length;
        while left > 0 {
            self.advance_if_exhausted();
            assert!(self.index < self.iovs.len(), "iovec cursor underrun");
            let iov = &self.iovs[self.index];
            let avail = iov.len() - self.offset;
            let chunk = left.min(avail);
            self.offset += chunk;
            left -= chunk;
        }
    }

    /// Produces a fresh vector of [`IoVec`]s covering the next `length`
    /// bytes, each a shared-ownership slice of the underlying buffers (the
    /// "addref" of the original). Advances the cursor past them.
    pub fn move_(&mut self, length: usize) -> Vec<IoVec> {
        let mut left = length;
        let mut out = Vec::new();
        while left > 0 {
            self.advance_if_exhausted();
            assert!(self.index < self.iovs.len(), "iovec cursor underrun");
            let iov = &self.iovs[self.index];
            let avail = iov.len() - self.offset;
            let chunk = left.min(avail);
            out.push(iov.sub(self.offset, chunk));
            self.offset += chunk;
            left -= chunk;
        }
        out
    }
}

/// Concatenates a list of iovecs into one owned buffer; used at the
/// boundaries where a back end must hand a contiguous slice to its storage
/// layer (a RocksDB `put`, a `pwrite`).
pub fn flatten(iovs: &[IoVec]) -> Vec<u8> {
    let mut out = Vec::with_capacity(iovs.iter().map(IoVec::len).sum());
    for iov in iovs {
        out.extend_from_slice(iov.as_slice());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_spans_multiple_iovecs() {
        let iovs = vec![
            IoVec::from_vec(vec![1, 2, 3]),
            IoVec::from_vec(vec![4, 5]),
            IoVec::from_vec(vec![6, 7, 8, 9]),
        ];
        let mut cursor = IoVecCursor::new(iovs);
        let mut out = [0u8; 7];
        cursor.copy(&mut out);
        assert_eq!(out, [1, 2, 3, 4, 5, 6, 7]);
        let mut rest = [0u8; 2];
        cursor.copy(&mut rest);
        assert_eq!(rest, [8, 9]);
    }

    #[test]
    fn skip_then_copy() {
        let iovs = vec![IoVec::from_vec(vec![1, 2, 3, 4, 5])];
        let mut cursor = IoVecCursor::new(iovs);
        cursor.skip(2);
        let mut out = [0u8; 3];
        cursor.copy(&mut out);
        assert_eq!(out, [3, 4, 5]);
    }

    #[test]
    fn move_shares_backing_storage() {
        let iovs = vec![IoVec::from_vec(vec![1, 2, 3, 4, 5, 6])];
        let mut cursor = IoVecCursor::new(iovs);
        let moved = cursor.move_(4);
        assert_eq!(flatten(&moved), vec![1, 2, 3, 4]);
        let rest = cursor.move_(2);
        assert_eq!(flatten(&rest), vec![5, 6]);
    }

    #[test]
    #[should_panic(expected = "underrun")]
    fn copy_past_end_panics() {
        let iovs = vec![IoVec::from_vec(vec![1, 2])];
        let mut cursor = IoVecCursor::new(iovs);
        let mut out = [0u8; 3];
        cursor.copy(&mut out);
    }
}
