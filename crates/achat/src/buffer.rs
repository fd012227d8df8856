//! `ByteBuffer`: growable FIFO byte store backing each channel direction.
//!
//! A single contiguous allocation with two cursors:
//!
//! ```text
//!   0          offset             end              capacity
//!   |  drained  |    live data     |   free space   |
//! ```
//!
//! Invariant: `offset <= end <= capacity`. Consuming from the front only
//! moves `offset`; the dead prefix is reclaimed lazily, either when the
//! buffer drains completely or when an append would otherwise have to grow.
//!
//! `reserve()` hands out writable space at `end` so socket reads can land
//! directly in the buffer; `truncate()` gives back whatever was not filled.
//!
//! Storage is zeroed before it is released (`free()`, `Drop`, and the old
//! block on growth), so stale message bytes never reach the allocator.

use achat_core::constants::{
    BUFFER_ALLOC_SIZE, BUFFER_DEFAULT_SIZE, BUFFER_MAX_CHUNK, BUFFER_MAX_LEN,
};
use achat_core::error::{AchatError, Result};

use std::fmt;
use tracing::trace;
use zeroize::Zeroize;

pub struct ByteBuffer {
    /// Backing storage. `data.len()` is the allocated capacity.
    data: Vec<u8>,
    /// First live byte.
    offset: usize,
    /// One past the last live byte.
    end: usize,
}

impl ByteBuffer {
    /// Allocate a buffer with the default capacity.
    pub fn new() -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(BUFFER_DEFAULT_SIZE)
            .map_err(|_| AchatError::OutOfMemory)?;
        data.resize(BUFFER_DEFAULT_SIZE, 0);
        Ok(Self { data, offset: 0, end: 0 })
    }

    /// Number of live bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.offset
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.offset == self.end
    }

    /// Allocated size in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.end
    }

    /// The live window, `len()` bytes starting at the first unconsumed byte.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.offset..self.end]
    }

    /// Drop all live data. Memory is not zeroed; see `scrub()`.
    #[inline]
    pub fn clear(&mut self) {
        self.offset = 0;
        self.end = 0;
    }

    /// Zero the whole allocation and reset the cursors.
    pub fn scrub(&mut self) {
        self.data.as_mut_slice().zeroize();
        self.clear();
    }

    /// Zero and release the storage. A later `reserve()` allocates afresh.
    pub fn free(&mut self) {
        if self.data.is_empty() {
            return;
        }
        self.data.as_mut_slice().zeroize();
        self.data = Vec::new();
        self.clear();
    }

    /// Copy `bytes` onto the end of the buffer.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Err(AchatError::InvalidParameter("empty append"));
        }
        let dst = self.reserve(bytes.len())?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    /// Extend the live window by `len` bytes and return them for the caller
    /// to fill in place.
    ///
    /// The returned bytes hold unspecified content until written. Callers that
    /// fill less than `len` must `truncate()` the remainder.
    pub fn reserve(&mut self, len: usize) -> Result<&mut [u8]> {
        if len == 0 {
            return Err(AchatError::InvalidParameter("zero-length reserve"));
        }
        if len > BUFFER_MAX_CHUNK {
            return Err(AchatError::Capacity { requested: len });
        }

        // Fully drained: start over at the front.
        if self.offset == self.end {
            self.clear();
        }

        loop {
            if len <= self.data.len() - self.end {
                let start = self.end;
                self.end += len;
                return Ok(&mut self.data[start..self.end]);
            }
            if self.compact() {
                continue;
            }
            self.grow(len)?;
        }
    }

    /// Drop `len` bytes from the front.
    pub fn consume(&mut self, len: usize) -> Result<()> {
        if len > self.len() {
            return Err(AchatError::Underflow { requested: len, available: self.len() });
        }
        self.offset += len;
        if self.offset == self.end {
            self.clear();
        }
        Ok(())
    }

    /// Drop `len` bytes from the back, undoing a reserve or append.
    pub fn truncate(&mut self, len: usize) -> Result<()> {
        if len > self.len() {
            return Err(AchatError::Underflow { requested: len, available: self.len() });
        }
        self.end -= len;
        Ok(())
    }

    /// Move the live window to the front when the dead prefix is large
    /// enough to be worth a copy. Returns whether anything moved.
    fn compact(&mut self) -> bool {
        let threshold = (self.data.len() / 2).min(BUFFER_MAX_CHUNK);
        if self.offset == 0 || self.offset < threshold {
            return false;
        }
        let live = self.len();
        self.data.copy_within(self.offset..self.end, 0);
        self.offset = 0;
        self.end = live;
        trace!(live, capacity = self.data.len(), "buffer compacted");
        true
    }

    fn grow(&mut self, len: usize) -> Result<()> {
        let current = self.data.len();
        let new_size = current
            .checked_add(len)
            .and_then(|n| n.checked_next_multiple_of(BUFFER_ALLOC_SIZE))
            .filter(|&n| n <= BUFFER_MAX_LEN)
            .ok_or(AchatError::Capacity { requested: len })?;

        // Fresh allocation rather than realloc, so the old block can be
        // zeroed before it goes back to the allocator.
        let mut data = Vec::new();
        data.try_reserve_exact(new_size)
            .map_err(|_| AchatError::OutOfMemory)?;
        data.resize(new_size, 0);

        let live = self.len();
        data[..live].copy_from_slice(self.as_slice());
        let mut old = std::mem::replace(&mut self.data, data);
        old.as_mut_slice().zeroize();
        self.offset = 0;
        self.end = live;

        trace!(from = current, to = new_size, live, "buffer grown");
        Ok(())
    }
}

impl Drop for ByteBuffer {
    fn drop(&mut self) {
        self.free();
    }
}

// Never print contents: the buffer may hold message payloads.
impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("offset", &self.offset)
            .field("end", &self.end)
            .field("capacity", &self.data.len())
            .finish()
    }
}
