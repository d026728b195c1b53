//! Backing storage - one contiguous byte range per segment
//!
//! Design: acquired straight from the global allocator so a failed request
//! surfaces as `None` instead of aborting the process.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;
use std::slice;

/// Base alignment of every region; keeps payloads word aligned.
const REGION_ALIGN: usize = 16;

/// Owned byte range, released on drop
pub(crate) struct Region {
    start: NonNull<u8>,
    layout: Layout,
}

// The region is exclusively owned; access goes through `&self`/`&mut self`.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Allocate a zeroed region of `size` bytes
    pub fn new(size: usize) -> Option<Self> {
        if size == 0 {
            return None;
        }
        let layout = Layout::from_size_align(size, REGION_ALIGN).ok()?;

        // SAFETY: layout has non-zero size.
        let start = NonNull::new(unsafe { alloc_zeroed(layout) })?;

        Some(Self { start, layout })
    }

    /// Address of the first byte
    #[inline]
    pub fn addr(&self) -> usize {
        self.start.as_ptr() as usize
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `start` points to `layout.size()` initialized bytes owned by self.
        unsafe { slice::from_raw_parts(self.start.as_ptr(), self.layout.size()) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees exclusive access.
        unsafe { slice::from_raw_parts_mut(self.start.as_ptr(), self.layout.size()) }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with this exact layout.
        unsafe {
            dealloc(self.start.as_ptr(), self.layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_is_zeroed_and_aligned() {
        let region = Region::new(4096).expect("region");
        assert_eq!(region.size(), 4096);
        assert_eq!(region.addr() % REGION_ALIGN, 0);
        assert!(region.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn zero_sized_region_rejected() {
        assert!(Region::new(0).is_none());
    }

    #[test]
    fn impossible_region_rejected() {
        assert!(Region::new(usize::MAX - 64).is_none());
    }
}
