//! Globally addressable memory
//!
//! The matcher only ever needs one thing from a memory handle: the rank that owns it, which keys
//! the pending table. That is the [`GlobalAddress`] trait. Everything else about a handle is
//! opaque and passed through to the copy engine unchanged.
//!
//! [`GlobalPtr`] and [`Segments`] provide a concrete address space that lives inside one process,
//! one byte segment per rank. It backs the [`LoopbackEngine`](../engine/struct.LoopbackEngine.html)
//! and is what tests and demos communicate through.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use conv::ConvUtil;

use crate::error::{Error, Result};
use crate::{Count, Rank};

/// A handle to memory that may live in another process.
pub trait GlobalAddress: Copy + fmt::Debug + Send + Sync + 'static {
    /// The rank whose address space the handle points into.
    fn owning_rank(&self) -> Rank;
}

/// An address in the segment of some rank.
///
/// A pointer made with [`GlobalPtr::at_rank()`] names only the rank. A sender that does not know
/// the remote buffer passes such a pointer as the destination of its half: it is enough to key
/// the match, and the receiver's half supplies the actual buffer.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct GlobalPtr {
    rank: Rank,
    offset: Option<usize>,
}

impl GlobalPtr {
    /// A pointer to `offset` bytes into the segment of `rank`.
    ///
    /// No bounds are checked, see [`Segments::ptr()`] for a checked constructor.
    pub fn new(rank: Rank, offset: usize) -> Self {
        GlobalPtr {
            rank,
            offset: Some(offset),
        }
    }

    /// A pointer that identifies `rank` but no memory within it.
    pub fn at_rank(rank: Rank) -> Self {
        GlobalPtr { rank, offset: None }
    }

    /// Offset into the segment, `None` for a rank-only pointer.
    pub fn offset(&self) -> Option<usize> {
        self.offset
    }

    /// `true` for a rank-only pointer.
    pub fn is_null(&self) -> bool {
        self.offset.is_none()
    }

    /// Pointer `bytes` further into the same segment.
    ///
    /// A rank-only pointer stays rank-only. Returns `None` if the offset overflows.
    pub fn checked_add(&self, bytes: usize) -> Option<Self> {
        match self.offset {
            Some(offset) => offset
                .checked_add(bytes)
                .map(|offset| GlobalPtr::new(self.rank, offset)),
            None => Some(*self),
        }
    }
}

impl GlobalAddress for GlobalPtr {
    fn owning_rank(&self) -> Rank {
        self.rank
    }
}

impl fmt::Debug for GlobalPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(offset) => write!(f, "{}:{:#x}", self.rank, offset),
            None => write!(f, "{}:null", self.rank),
        }
    }
}

/// One byte segment per rank, shared by every handle cloned from it.
///
/// # Examples
///
/// ```
/// use pgas_rendezvous::memory::Segments;
///
/// let segments = Segments::new(2, 16);
/// let a = segments.ptr(0, 0).unwrap();
/// let b = segments.ptr(1, 8).unwrap();
/// segments.write(a, &[1, 2, 3]).unwrap();
/// segments.copy(a, b, 3).unwrap();
/// assert_eq!(segments.read(b, 3).unwrap(), vec![1, 2, 3]);
/// ```
#[derive(Clone)]
pub struct Segments {
    segments: Arc<Vec<Mutex<Vec<u8>>>>,
    bytes_per_rank: usize,
}

impl Segments {
    /// `ranks` zeroed segments of `bytes_per_rank` bytes each.
    pub fn new(ranks: usize, bytes_per_rank: usize) -> Self {
        let segments = (0..ranks)
            .map(|_| Mutex::new(vec![0; bytes_per_rank]))
            .collect();
        Segments {
            segments: Arc::new(segments),
            bytes_per_rank,
        }
    }

    /// Number of ranks with a segment.
    pub fn ranks(&self) -> usize {
        self.segments.len()
    }

    /// Size of each segment in bytes.
    pub fn bytes_per_rank(&self) -> usize {
        self.bytes_per_rank
    }

    /// A pointer to `offset` bytes into the segment of `rank`.
    pub fn ptr(&self, rank: Rank, offset: usize) -> Result<GlobalPtr> {
        self.index(rank)?;
        if offset > self.bytes_per_rank {
            return Err(self.out_of_bounds(rank, offset, 0));
        }
        Ok(GlobalPtr::new(rank, offset))
    }

    /// Store `data` at `ptr`.
    pub fn write(&self, ptr: GlobalPtr, data: &[u8]) -> Result<()> {
        let range = self.range(ptr, data.len())?;
        let mut segment = self.segment(ptr.owning_rank())?;
        segment[range].copy_from_slice(data);
        Ok(())
    }

    /// Load `len` bytes from `ptr`.
    pub fn read(&self, ptr: GlobalPtr, len: Count) -> Result<Vec<u8>> {
        let range = self.range(ptr, len)?;
        Ok(self.segment(ptr.owning_rank())?[range].to_vec())
    }

    /// Copy `nbytes` from `src` to `dst`.
    ///
    /// Overlapping ranges within one segment behave like `memmove`.
    pub fn copy(&self, src: GlobalPtr, dst: GlobalPtr, nbytes: Count) -> Result<()> {
        let src_range = self.range(src, nbytes)?;
        let dst_range = self.range(dst, nbytes)?;
        if src.owning_rank() == dst.owning_rank() {
            let mut segment = self.segment(src.owning_rank())?;
            segment.copy_within(src_range, dst_range.start);
        } else {
            // One segment lock at a time.
            let data = self.segment(src.owning_rank())?[src_range].to_vec();
            let mut segment = self.segment(dst.owning_rank())?;
            segment[dst_range].copy_from_slice(&data);
        }
        Ok(())
    }

    fn index(&self, rank: Rank) -> Result<usize> {
        rank.value_as::<usize>()
            .ok()
            .filter(|&index| index < self.segments.len())
            .ok_or(Error::RankOutOfRange {
                rank,
                size: self.segments.len(),
            })
    }

    fn segment(&self, rank: Rank) -> Result<MutexGuard<'_, Vec<u8>>> {
        let index = self.index(rank)?;
        Ok(self.segments[index]
            .lock()
            .expect("segment mutex poisoned"))
    }

    fn range(&self, ptr: GlobalPtr, len: usize) -> Result<std::ops::Range<usize>> {
        let rank = ptr.owning_rank();
        let offset = ptr.offset().ok_or(Error::NullAddress(rank))?;
        match offset.checked_add(len) {
            Some(end) if end <= self.bytes_per_rank => Ok(offset..end),
            _ => Err(self.out_of_bounds(rank, offset, len)),
        }
    }

    fn out_of_bounds(&self, rank: Rank, offset: usize, len: usize) -> Error {
        Error::OutOfBounds {
            rank,
            offset,
            len,
            capacity: self.bytes_per_rank,
        }
    }
}

impl fmt::Debug for Segments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segments")
            .field("ranks", &self.ranks())
            .field("bytes_per_rank", &self.bytes_per_rank)
            .finish()
    }
}
