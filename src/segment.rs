/*
 * Segments are the contiguous blocks records are written into. The item
 * buffer owns one writable segment at a time, once it runs out of room that
 * segment is frozen (its capacity is cut down to what was written) and a new
 * one takes its place. Frozen segments are never written again.
 *
 * Memory either comes from the buffer itself (heap, freed when the segment is
 * dropped) or from a writing client, in which case dropping the storage is
 * how the memory is handed back to the client.
 */
use crate::constants::ITEM_ALIGNMENT;
use crate::error::{Error, ErrorKind};
use std::fmt;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SEGMENT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(u64);

impl SegmentId {
    /// Process wide, increasing, never 0.
    pub fn generate() -> SegmentId {
        return SegmentId(NEXT_SEGMENT_ID.fetch_add(1, Ordering::Relaxed));
    }

    pub fn from_raw(value: u64) -> SegmentId {
        return SegmentId(value);
    }

    pub fn to_raw(self) -> u64 {
        return self.0;
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "segment#{}", self.0)
    }
}

/// Where a record starts: the segment it lives in and its byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemLocation {
    pub segment: SegmentId,
    pub offset: usize,
}

/// Raw bytes backing a segment. The first byte must be 8 byte aligned.
pub trait SegmentStorage: Send + Sync {
    fn as_slice(&self) -> &[u8];

    fn as_mut_slice(&mut self) -> &mut [u8];

    /// File descriptor for storage that can be shared with another process.
    fn raw_fd(&self) -> Option<RawFd> {
        return None;
    }
}

// u64 words keep the storage aligned for any item we accept
struct HeapStorage {
    words: Vec<u64>,
}

impl HeapStorage {
    fn allocate(n_bytes: usize) -> Result<HeapStorage, Error> {
        assert!(n_bytes % ITEM_ALIGNMENT == 0);
        let n_words = n_bytes / ITEM_ALIGNMENT;
        let mut words: Vec<u64> = Vec::new();
        if let Err(err) = words.try_reserve_exact(n_words) {
            return Err(Error::new(
                ErrorKind::SegmentAllocation,
                format!("Failed to allocate a segment of {} bytes: {}", n_bytes, err),
            ));
        }
        words.resize(n_words, 0);
        return Ok(HeapStorage { words: words });
    }
}

impl SegmentStorage for HeapStorage {
    fn as_slice(&self) -> &[u8] {
        let n_bytes = self.words.len() * ITEM_ALIGNMENT;
        unsafe {
            return std::slice::from_raw_parts(self.words.as_ptr() as *const u8, n_bytes);
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        let n_bytes = self.words.len() * ITEM_ALIGNMENT;
        unsafe {
            return std::slice::from_raw_parts_mut(self.words.as_mut_ptr() as *mut u8, n_bytes);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentOrigin {
    /// Allocated and freed by the item buffer.
    Buffer,
    /// Supplied by a writing client (or received from another process).
    Client,
}

pub struct Segment {
    identifier: SegmentId,
    storage: Box<dyn SegmentStorage>,
    // usable bytes, cut down to the written length once frozen
    capacity: usize,
    origin: SegmentOrigin,
}

impl Segment {
    pub(crate) fn allocate(capacity: usize) -> Result<Segment, Error> {
        let storage = HeapStorage::allocate(capacity)?;
        return Ok(Segment {
            identifier: SegmentId::generate(),
            storage: Box::new(storage),
            capacity: capacity,
            origin: SegmentOrigin::Buffer,
        });
    }

    /// Wraps client memory with a freshly generated identifier.
    pub fn from_client(storage: Box<dyn SegmentStorage>) -> Segment {
        return Segment::with_identifier(SegmentId::generate(), storage);
    }

    pub fn with_identifier(identifier: SegmentId, storage: Box<dyn SegmentStorage>) -> Segment {
        let capacity = storage.as_slice().len();
        return Segment {
            identifier: identifier,
            storage: storage,
            capacity: capacity,
            origin: SegmentOrigin::Client,
        };
    }

    pub fn identifier(&self) -> SegmentId {
        return self.identifier;
    }

    pub fn capacity(&self) -> usize {
        return self.capacity;
    }

    pub fn origin(&self) -> SegmentOrigin {
        return self.origin;
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        return self.storage.raw_fd();
    }

    pub fn is_aligned(&self) -> bool {
        return self.storage.as_slice().as_ptr() as usize % ITEM_ALIGNMENT == 0;
    }

    pub fn data(&self) -> &[u8] {
        return &self.storage.as_slice()[..self.capacity];
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        let capacity = self.capacity;
        return &mut self.storage.as_mut_slice()[..capacity];
    }

    /// Limits the segment to its first `len` bytes.
    pub(crate) fn truncate(&mut self, len: usize) {
        assert!(
            len <= self.capacity,
            "Cannot grow {} from {} to {} bytes",
            self.identifier,
            self.capacity,
            len
        );
        self.capacity = len;
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("identifier", &self.identifier)
            .field("capacity", &self.capacity)
            .field("origin", &self.origin)
            .finish()
    }
}
