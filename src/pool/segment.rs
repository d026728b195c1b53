//! Segment - one arena of the growth chain
//!
//! A segment is a single region tiled by header+payload blocks. Starting at
//! offset 0, each `HEADER_SIZE + size` step lands exactly on the next header
//! until the walk runs past the region.
//!
//! Design:
//! - Best-fit search with exact-match early exit
//! - Optional O(1) reuse of the last freed block (fast mode)
//! - Lazy coalescing, only when a search fails on a dirty segment

use std::collections::BTreeSet;

use super::header::{BlockFlags, BlockHeader, ALIGNMENT, HEADER_SIZE, MIN_BLOCK_SIZE};
use super::region::Region;
use crate::logging;

/// One contiguous arena
pub(crate) struct Segment {
    id: usize,
    region: Region,
    /// A block was freed or taken since the last successful coalescing pass.
    dirty: bool,
    /// Header offset of the most recently freed or split-off free block.
    last: Option<usize>,
    /// Offsets of every header on the block tiling. Payload bytes that
    /// happen to look like a header are never in here.
    headers: BTreeSet<usize>,
}

impl Segment {
    /// Create a segment holding a single free block spanning `size` bytes.
    pub fn new(id: usize, size: usize) -> Option<Self> {
        debug_assert!(size >= HEADER_SIZE + MIN_BLOCK_SIZE);
        debug_assert_eq!(size % ALIGNMENT, 0);

        let region = Region::new(size)?;
        let mut segment = Self {
            id,
            region,
            dirty: false,
            last: None,
            headers: BTreeSet::new(),
        };
        segment.format();
        Some(segment)
    }

    /// Reinitialize to one free block; every outstanding pointer becomes invalid.
    pub fn reset(&mut self) {
        self.region.as_mut_slice().fill(0);
        self.format();
    }

    fn format(&mut self) {
        let size = self.size();
        self.write_header(0, BlockHeader::free(size - HEADER_SIZE));
        self.dirty = false;
        self.last = Some(0);
        self.headers.clear();
        self.headers.insert(0);
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.region.size()
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Lowest valid payload address
    #[inline]
    pub fn min(&self) -> usize {
        self.region.addr() + HEADER_SIZE
    }

    /// Highest valid payload address
    #[inline]
    pub fn max(&self) -> usize {
        self.region.addr() + self.size() - MIN_BLOCK_SIZE
    }

    /// Payload address of the block whose header sits at `offset`
    #[inline]
    pub fn payload_addr(&self, offset: usize) -> usize {
        self.region.addr() + offset + HEADER_SIZE
    }

    /// Header at `offset`, if one with a valid signature fits there.
    pub fn header(&self, offset: usize) -> Option<BlockHeader> {
        let end = offset.checked_add(HEADER_SIZE)?;
        if end > self.size() {
            return None;
        }
        let header = BlockHeader::read(&self.region.as_slice()[offset..end]);
        header.is_valid().then_some(header)
    }

    fn write_header(&mut self, offset: usize, header: BlockHeader) {
        header.write(&mut self.region.as_mut_slice()[offset..offset + HEADER_SIZE]);
    }

    /// Blocks in address order as `(header offset, header)`.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            segment: self,
            offset: Some(0),
        }
    }

    /// Map a payload address to the header offset of the live block it names.
    ///
    /// Bounds are checked first; the tiling, signature and `BUSY` checks
    /// only run for addresses inside this segment.
    pub fn resolve(&self, addr: usize) -> Option<usize> {
        if addr < self.min() || addr > self.max() {
            return None;
        }
        let offset = addr - self.region.addr() - HEADER_SIZE;
        if offset % ALIGNMENT != 0 || !self.headers.contains(&offset) {
            return None;
        }
        let header = self.header(offset)?;
        let end = offset.checked_add(header.span())?;
        if !header.is_busy() || end > self.size() {
            return None;
        }
        Some(offset)
    }

    /// Allocate a block of exactly `size` payload bytes (already rounded).
    ///
    /// Returns the header offset. Retries once after coalescing if the
    /// segment is dirty and the pass merged anything.
    pub fn alloc(&mut self, size: usize, fast: bool) -> Option<usize> {
        let candidate = match self.find_fit(size, fast) {
            Some(offset) => offset,
            None if self.dirty && self.coalesce() > 0 => self.find_fit(size, fast)?,
            None => return None,
        };
        self.take(candidate, size)?;
        Some(candidate)
    }

    /// Locate a free block of at least `size` bytes.
    fn find_fit(&self, size: usize, fast: bool) -> Option<usize> {
        if fast {
            if let Some(last) = self.last.filter(|last| self.headers.contains(last)) {
                if let Some(header) = self.header(last) {
                    if !header.is_busy() && header.size >= size {
                        return Some(last);
                    }
                }
            }
        }

        let mut best: Option<(usize, usize)> = None;
        for (offset, header) in self.blocks() {
            if header.is_busy() || header.size < size {
                continue;
            }
            if header.size == size {
                return Some(offset);
            }
            match best {
                Some((_, best_size)) if best_size <= header.size => {}
                _ => best = Some((offset, header.size)),
            }
        }
        best.map(|(offset, _)| offset)
    }

    /// Mark the free block at `offset` busy, splitting off the tail when
    /// it can hold a header plus a minimum block.
    ///
    /// `None` leaves the segment untouched; search results always carry a
    /// free header, so this only fires on a corrupted region.
    fn take(&mut self, offset: usize, size: usize) -> Option<()> {
        let header = self.header(offset).filter(|h| !h.is_busy() && h.size >= size);
        debug_assert!(header.is_some(), "fit at {offset} is not a free block");
        let mut header = header?;

        if header.size >= size + HEADER_SIZE + MIN_BLOCK_SIZE {
            let rest = offset + HEADER_SIZE + size;
            self.write_header(rest, BlockHeader::free(header.size - size - HEADER_SIZE));
            self.headers.insert(rest);
            header.size = size;
            self.last = Some(rest);
        } else if self.last == Some(offset) {
            self.last = None;
        }

        header.flags = BlockFlags::BUSY;
        self.write_header(offset, header);
        self.dirty = true;
        Some(())
    }

    /// Clear `BUSY` on the live block at `offset`.
    pub fn release(&mut self, offset: usize) {
        if let Some(mut header) = self.header(offset) {
            header.flags = BlockFlags::FREE;
            self.write_header(offset, header);
            self.dirty = true;
            self.last = Some(offset);
        }
    }

    /// Set or clear `LOCKED` on the live block at `offset`.
    pub fn set_locked(&mut self, offset: usize, locked: bool) {
        if let Some(mut header) = self.header(offset) {
            if locked {
                header.flags.insert(BlockFlags::LOCKED);
            } else {
                header.flags.remove(BlockFlags::LOCKED);
            }
            self.write_header(offset, header);
        }
    }

    /// Merge every run of adjacent free blocks; returns the number of merges.
    ///
    /// Absorbed headers are erased so stale pointers into them fail the
    /// signature check afterwards.
    pub fn coalesce(&mut self) -> usize {
        let _perf = logging::perf::track("segment_coalesce");
        let mut merges = 0;
        let mut offset = 0;

        while let Some(mut header) = self.header(offset) {
            let Some(next) = offset.checked_add(header.span()) else {
                break;
            };
            let Some(neighbor) = self.header(next) else {
                break;
            };
            if header.is_busy() || neighbor.is_busy() {
                offset = next;
                continue;
            }

            header.size += neighbor.span();
            self.write_header(offset, header);
            BlockHeader::erase(&mut self.region.as_mut_slice()[next..]);
            self.headers.remove(&next);
            if self.last == Some(next) {
                self.last = Some(offset);
            }
            merges += 1;
        }

        if merges > 0 {
            self.dirty = false;
        }
        logging::log_coalesce(self.id, merges);
        merges
    }

    /// Payload bytes of the block at `offset`
    pub fn payload(&self, offset: usize) -> &[u8] {
        let size = self.header(offset).map_or(0, |h| h.size);
        let start = offset + HEADER_SIZE;
        &self.region.as_slice()[start..start + size]
    }

    /// Mutable payload bytes of the block at `offset`
    pub fn payload_mut(&mut self, offset: usize) -> &mut [u8] {
        let size = self.header(offset).map_or(0, |h| h.size);
        let start = offset + HEADER_SIZE;
        &mut self.region.as_mut_slice()[start..start + size]
    }

    /// Copy `len` payload bytes from block `from` to block `to` of this segment.
    pub fn copy_payload(&mut self, from: usize, to: usize, len: usize) {
        let src = from + HEADER_SIZE;
        self.region
            .as_mut_slice()
            .copy_within(src..src + len, to + HEADER_SIZE);
    }
}

/// Address-order walk over a segment's blocks
pub(crate) struct Blocks<'a> {
    segment: &'a Segment,
    offset: Option<usize>,
}

impl Iterator for Blocks<'_> {
    type Item = (usize, BlockHeader);

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.offset?;
        let Some(header) = self.segment.header(offset) else {
            if offset < self.segment.size() {
                logging::log_corruption(self.segment.id, offset);
            }
            self.offset = None;
            return None;
        };
        self.offset = offset.checked_add(header.span());
        Some((offset, header))
    }
}
