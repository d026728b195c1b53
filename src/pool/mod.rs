//! Memory pool - best-fit arena allocator with growth chaining
//!
//! Design: Three-layer architecture:
//! 1. Block headers tiling each segment (metadata, validation)
//! 2. Segments (search, split, lazy coalescing)
//! 3. The pool handle (chain traversal, growth, locking discipline)
//!
//! ```text
//!   Pool handle ──► [ segment #2 (newest, largest) ] ──► [ segment #1 ] ──► [ segment #0 ]
//!                     ┌────┬──────┬────┬──────────┐
//!                     │hdr │ busy │hdr │   free   │ ...
//!                     └────┴──────┴────┴──────────┘
//! ```
//!
//! The handle never changes identity. When growth chains on a new segment it
//! becomes the head of the chain, so the handle describes the larger store
//! and the old store turns into the next link; existing payloads never move.

mod header;
mod region;
mod report;
mod segment;


pub use header::{ALIGNMENT, HEADER_SIZE, MIN_BLOCK_SIZE};
pub use report::{BlockInfo, PoolStats, SegmentInfo};

use core::fmt;
use core::num::NonZeroUsize;
use core::ops::{BitOr, BitOrAssign};
use std::io;

use parking_lot::Mutex;

use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::logging;
use header::align_up;
use report::SegmentSnapshot;
use segment::Segment;

/// Requests above this never fit any region the system can hand out.
const MAX_REQUEST: usize = isize::MAX as usize / 2;

/// Pool behavior switches
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolFlags(u8);

impl PoolFlags {
    pub const NONE: Self = Self(0);
    /// Chain a new, larger segment when every segment is exhausted.
    pub const EXPAND: Self = Self(0x02);
    /// Reuse the most recently freed block when it is large enough,
    /// skipping the best-fit scan. Trades fragmentation for O(1) reuse.
    pub const FAST: Self = Self(0x04);

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for PoolFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PoolFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for PoolFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::EXPAND) {
            names.push("EXPAND");
        }
        if self.contains(Self::FAST) {
            names.push("FAST");
        }
        if names.is_empty() {
            names.push("NONE");
        }
        write!(f, "PoolFlags({})", names.join(" | "))
    }
}

/// Payload address handed out by a pool
///
/// Only meaningful to the pool that produced it. Any value may be presented
/// back; the pool validates it before touching memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PoolPtr(NonZeroUsize);

impl PoolPtr {
    /// Wrap a raw address (which may or may not name a live block)
    #[inline]
    pub fn from_addr(addr: usize) -> Option<Self> {
        NonZeroUsize::new(addr).map(Self)
    }

    #[inline]
    pub fn addr(self) -> usize {
        self.0.get()
    }

    /// Address `bytes` further on, e.g. an interior pointer
    #[inline]
    pub fn offset(self, bytes: usize) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }
}

impl fmt::Display for PoolPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.addr())
    }
}

/// Payload size actually reserved for a request of `request` bytes
fn block_size(request: usize) -> Result<usize> {
    if request > MAX_REQUEST {
        return Err(PoolError::SizeOverflow { size: request });
    }
    align_up(request.max(MIN_BLOCK_SIZE)).ok_or(PoolError::SizeOverflow { size: request })
}

fn ptr_at(segment: &Segment, offset: usize) -> PoolPtr {
    // Payload addresses sit inside a live allocation and are never zero.
    PoolPtr(NonZeroUsize::new(segment.payload_addr(offset)).unwrap_or(NonZeroUsize::MIN))
}

fn logged<T>(op: &'static str, result: Result<T>) -> Result<T> {
    if let Err(err) = &result {
        logging::log_rejected(op, err);
    }
    result
}

/// Chain state guarded by the pool lock
struct PoolInner {
    flags: PoolFlags,
    /// Head first; the head is always the largest, most recent store.
    segments: Vec<Segment>,
    next_id: usize,
    growth_factor: f64,
}

impl PoolInner {
    /// Segment index and header offset of the live block at `ptr`
    fn locate(&self, ptr: PoolPtr) -> Result<(usize, usize)> {
        self.segments
            .iter()
            .enumerate()
            .find_map(|(index, segment)| segment.resolve(ptr.addr()).map(|offset| (index, offset)))
            .ok_or(PoolError::InvalidPointer { addr: ptr.addr() })
    }

    fn header(&self, (index, offset): (usize, usize)) -> Option<header::BlockHeader> {
        self.segments[index].header(offset)
    }

    fn alloc(&mut self, request: usize) -> Result<PoolPtr> {
        let size = block_size(request)?;
        let fast = self.flags.contains(PoolFlags::FAST);

        for segment in &mut self.segments {
            if let Some(offset) = segment.alloc(size, fast) {
                return Ok(ptr_at(segment, offset));
            }
        }

        if !self.flags.contains(PoolFlags::EXPAND) {
            return Err(PoolError::Exhausted { size: request });
        }

        self.grow(size)?;
        let head = &mut self.segments[0];
        head.alloc(size, fast)
            .map(|offset| ptr_at(head, offset))
            .ok_or(PoolError::Exhausted { size: request })
    }

    /// Chain on a segment large enough for a `size`-byte block.
    ///
    /// On failure the existing chain is untouched.
    fn grow(&mut self, size: usize) -> Result<()> {
        let largest = self.segments.iter().map(Segment::size).max().unwrap_or(0);
        let wanted = largest
            .checked_add(size)
            .and_then(|n| n.checked_add(HEADER_SIZE))
            .ok_or(PoolError::SizeOverflow { size })?;
        let scaled = (wanted as f64 * self.growth_factor) as usize;
        let capacity = align_up(scaled.max(wanted)).ok_or(PoolError::SizeOverflow { size })?;

        let segment = Segment::new(self.next_id, capacity)
            .ok_or(PoolError::OutOfMemory { size: capacity })?;
        logging::log_growth(segment.id(), largest, capacity);

        self.next_id += 1;
        self.segments.insert(0, segment);
        Ok(())
    }

    fn free(&mut self, ptr: PoolPtr) -> Result<()> {
        let at @ (index, offset) = self.locate(ptr)?;
        if self.header(at).is_some_and(|h| h.is_locked()) {
            return Err(PoolError::Locked { addr: ptr.addr() });
        }
        self.segments[index].release(offset);
        Ok(())
    }

    fn realloc(&mut self, ptr: PoolPtr, request: usize) -> Result<PoolPtr> {
        let at = self.locate(ptr)?;
        let old_len = match self.header(at) {
            Some(h) if h.is_locked() => return Err(PoolError::Locked { addr: ptr.addr() }),
            Some(h) => h.size,
            None => return Err(PoolError::InvalidPointer { addr: ptr.addr() }),
        };

        let fresh = self.alloc(request)?;

        // Growth may have shifted chain positions; resolve both again.
        let src = self.locate(ptr)?;
        let dst = self.locate(fresh)?;
        self.copy_between(src, dst, old_len.min(request));
        self.segments[src.0].release(src.1);
        Ok(fresh)
    }

    fn copy_between(&mut self, (si, so): (usize, usize), (di, doff): (usize, usize), len: usize) {
        if si == di {
            self.segments[si].copy_payload(so, doff, len);
            return;
        }
        let (src, dst) = if si < di {
            let (head, tail) = self.segments.split_at_mut(di);
            (&head[si], &mut tail[0])
        } else {
            let (head, tail) = self.segments.split_at_mut(si);
            (&tail[0], &mut head[di])
        };
        dst.payload_mut(doff)[..len].copy_from_slice(&src.payload(so)[..len]);
    }

    fn snapshot(&self) -> Vec<SegmentSnapshot> {
        self.segments.iter().map(SegmentSnapshot::capture).collect()
    }
}

/// Arena handle
///
/// All operations take `&self` and run inside one pool-wide critical
/// section, growth included, so a pool can be shared across threads.
pub struct Pool {
    inner: Mutex<PoolInner>,
}

impl Pool {
    /// Create a pool with default configuration
    pub fn create(size: usize, flags: PoolFlags) -> Option<Self> {
        Self::try_create(size, flags).ok()
    }

    pub fn try_create(size: usize, flags: PoolFlags) -> Result<Self> {
        Self::with_config(size, flags, &PoolConfig::default())
    }

    /// Create a pool whose capacity is `size` rounded up to the configured
    /// floor and the word size, holding one free block.
    pub fn with_config(size: usize, flags: PoolFlags, config: &PoolConfig) -> Result<Self> {
        config.validate()?;
        let capacity = align_up(size.max(config.min_pool_size))
            .ok_or(PoolError::SizeOverflow { size })?;
        let segment = Segment::new(0, capacity).ok_or(PoolError::OutOfMemory { size: capacity })?;
        logging::log_pool_create(capacity, flags);

        Ok(Self {
            inner: Mutex::new(PoolInner {
                flags,
                segments: vec![segment],
                next_id: 1,
                growth_factor: config.growth_factor,
            }),
        })
    }

    /// Release the pool and every segment of its chain.
    pub fn destroy(self) {
        drop(self);
    }

    /// Free everything at once: grown segments are dropped and the head
    /// (largest) segment goes back to a single free block.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.segments.truncate(1);
        if let Some(head) = inner.segments.first_mut() {
            head.reset();
            logging::log_pool_reset(head.size());
        }
    }

    /// Capacity of the head segment
    pub fn size(&self) -> usize {
        self.inner.lock().segments.first().map_or(0, Segment::size)
    }

    pub fn flags(&self) -> PoolFlags {
        self.inner.lock().flags
    }

    /// Number of segments in the growth chain
    pub fn segment_count(&self) -> usize {
        self.inner.lock().segments.len()
    }

    pub fn alloc(&self, size: usize) -> Option<PoolPtr> {
        self.try_alloc(size).ok()
    }

    pub fn try_alloc(&self, size: usize) -> Result<PoolPtr> {
        let result = self.inner.lock().alloc(size);
        if let Ok(ptr) = &result {
            logging::log_allocation(size, ptr.addr());
        }
        logged("alloc", result)
    }

    /// Allocate `size * count` bytes, zero filled
    pub fn zeroed_alloc(&self, size: usize, count: usize) -> Option<PoolPtr> {
        self.try_zeroed_alloc(size, count).ok()
    }

    pub fn try_zeroed_alloc(&self, size: usize, count: usize) -> Result<PoolPtr> {
        let total = size
            .checked_mul(count)
            .ok_or(PoolError::SizeOverflow { size: usize::MAX });
        let result = total.and_then(|total| {
            let mut inner = self.inner.lock();
            let ptr = inner.alloc(total)?;
            let (index, offset) = inner.locate(ptr)?;
            inner.segments[index].payload_mut(offset).fill(0);
            Ok(ptr)
        });
        logged("zeroed_alloc", result)
    }

    /// Copy `text` plus a NUL terminator into a fresh block
    pub fn dup_str(&self, text: &str) -> Option<PoolPtr> {
        let result = {
            let mut inner = self.inner.lock();
            inner.alloc(text.len() + 1).and_then(|ptr| {
                let (index, offset) = inner.locate(ptr)?;
                let payload = inner.segments[index].payload_mut(offset);
                payload[..text.len()].copy_from_slice(text.as_bytes());
                payload[text.len()] = 0;
                Ok(ptr)
            })
        };
        logged("dup_str", result).ok()
    }

    /// Move `ptr` into a fresh block of `size` bytes
    ///
    /// Fails for invalid or locked pointers and when no block can be found;
    /// the original block is left untouched on failure.
    pub fn realloc(&self, ptr: PoolPtr, size: usize) -> Option<PoolPtr> {
        self.try_realloc(ptr, size).ok()
    }

    pub fn try_realloc(&self, ptr: PoolPtr, size: usize) -> Result<PoolPtr> {
        logged("realloc", self.inner.lock().realloc(ptr, size))
    }

    pub fn free(&self, ptr: PoolPtr) -> bool {
        self.try_free(ptr).is_ok()
    }

    pub fn try_free(&self, ptr: PoolPtr) -> Result<()> {
        let result = self.inner.lock().free(ptr);
        if result.is_ok() {
            logging::log_free(ptr.addr());
        }
        logged("free", result)
    }

    /// Pin a live block: it can be neither freed nor moved until unlocked.
    pub fn lock(&self, ptr: PoolPtr) -> bool {
        self.try_lock(ptr).is_ok()
    }

    pub fn try_lock(&self, ptr: PoolPtr) -> Result<()> {
        let mut inner = self.inner.lock();
        let result = inner
            .locate(ptr)
            .map(|(index, offset)| inner.segments[index].set_locked(offset, true));
        logged("lock", result)
    }

    pub fn unlock(&self, ptr: PoolPtr) -> bool {
        self.try_unlock(ptr).is_ok()
    }

    pub fn try_unlock(&self, ptr: PoolPtr) -> Result<()> {
        let mut inner = self.inner.lock();
        let result = inner.locate(ptr).and_then(|at @ (index, offset)| {
            if !inner.header(at).is_some_and(|h| h.is_locked()) {
                return Err(PoolError::NotLocked { addr: ptr.addr() });
            }
            inner.segments[index].set_locked(offset, false);
            Ok(())
        });
        logged("unlock", result)
    }

    pub fn is_locked(&self, ptr: PoolPtr) -> bool {
        let inner = self.inner.lock();
        inner
            .locate(ptr)
            .ok()
            .and_then(|at| inner.header(at))
            .is_some_and(|h| h.is_locked())
    }

    /// Payload bytes reserved for `ptr` (the rounded block size)
    pub fn payload_len(&self, ptr: PoolPtr) -> Option<usize> {
        let inner = self.inner.lock();
        let at = inner.locate(ptr).ok()?;
        inner.header(at).map(|h| h.size)
    }

    /// Run `f` over the payload of `ptr`.
    ///
    /// The pool stays locked while `f` runs; `f` must not call back into
    /// the same pool.
    pub fn with_bytes<R>(&self, ptr: PoolPtr, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let inner = self.inner.lock();
        let (index, offset) = inner.locate(ptr).ok()?;
        Some(f(inner.segments[index].payload(offset)))
    }

    /// Mutable variant of [`with_bytes`](Self::with_bytes)
    pub fn with_bytes_mut<R>(&self, ptr: PoolPtr, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        let mut inner = self.inner.lock();
        let (index, offset) = inner.locate(ptr).ok()?;
        Some(f(inner.segments[index].payload_mut(offset)))
    }

    /// Copy of the whole payload of `ptr`
    pub fn read(&self, ptr: PoolPtr) -> Option<Vec<u8>> {
        self.with_bytes(ptr, <[u8]>::to_vec)
    }

    /// Write `data` at `offset` within the payload of `ptr`
    pub fn write(&self, ptr: PoolPtr, offset: usize, data: &[u8]) -> bool {
        self.with_bytes_mut(ptr, |payload| match offset.checked_add(data.len()) {
            Some(end) if end <= payload.len() => {
                payload[offset..end].copy_from_slice(data);
                true
            }
            _ => false,
        })
        .unwrap_or(false)
    }

    /// Visit every block of every segment, head segment first, blocks in
    /// address order. Works on a snapshot, so `visitor` may use the pool.
    pub fn walk(&self, mut visitor: impl FnMut(&SegmentInfo, &BlockInfo)) {
        let snapshots = self.inner.lock().snapshot();
        for snapshot in &snapshots {
            for block in &snapshot.blocks {
                visitor(&snapshot.info, block);
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        let snapshots = self.inner.lock().snapshot();
        report::collect_stats(&snapshots)
    }

    /// Human-readable occupancy report with per-block bars `bar_width` wide
    pub fn dump<W: io::Write>(&self, out: &mut W, bar_width: usize) -> io::Result<()> {
        let snapshots = self.inner.lock().snapshot();
        report::render(out, &snapshots, bar_width)
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Pool")
            .field("flags", &inner.flags)
            .field("segments", &inner.segments.len())
            .field("size", &inner.segments.first().map_or(0, Segment::size))
            .finish()
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        let capacity = inner.segments.iter().map(Segment::size).sum();
        logging::log_pool_destroy(inner.segments.len(), capacity);
    }
}
