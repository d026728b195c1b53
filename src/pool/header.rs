//! Block metadata - the fixed header prefixed to every payload
//!
//! Design: 16-byte little-endian record read and written at byte offsets
//! inside a segment, so the block chain never needs raw pointer walking.
//!
//! ```text
//!   0        4        8                16
//!   ┌────────┬────────┬────────────────┬──────────────────────┐
//!   │ sig    │ flags  │ size (payload) │ payload ...          │
//!   └────────┴────────┴────────────────┴──────────────────────┘
//!                                      ▲
//!                                      └── address handed to callers
//! ```

use core::mem;

/// Magic value written into every live header.
pub const BLOCK_SIGNATURE: u32 = 0x1515_B10C;

/// Bytes occupied by a block header.
pub const HEADER_SIZE: usize = 16;

/// Payload sizes are rounded to the machine word.
pub const ALIGNMENT: usize = mem::size_of::<usize>();

/// Smallest payload a block may carry, also the smallest split remainder.
pub const MIN_BLOCK_SIZE: usize = HEADER_SIZE;

/// Round `value` up to the next multiple of `ALIGNMENT`, `None` on overflow.
#[inline]
pub const fn align_up(value: usize) -> Option<usize> {
    match value.checked_add(ALIGNMENT - 1) {
        Some(v) => Some(v & !(ALIGNMENT - 1)),
        None => None,
    }
}

/// Per-block state bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockFlags(u32);

impl BlockFlags {
    pub const FREE: Self = Self(0);
    pub const BUSY: Self = Self(0x01);
    /// Pinned; only meaningful together with `BUSY`.
    pub const LOCKED: Self = Self(0x02);

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & (Self::BUSY.0 | Self::LOCKED.0))
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

/// Decoded block header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub signature: u32,
    pub flags: BlockFlags,
    pub size: usize,
}

impl BlockHeader {
    /// Header for a fresh free block
    #[inline]
    pub const fn free(size: usize) -> Self {
        Self {
            signature: BLOCK_SIGNATURE,
            flags: BlockFlags::FREE,
            size,
        }
    }

    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.signature == BLOCK_SIGNATURE
    }

    #[inline]
    pub const fn is_busy(&self) -> bool {
        self.flags.contains(BlockFlags::BUSY)
    }

    #[inline]
    pub const fn is_locked(&self) -> bool {
        self.is_busy() && self.flags.contains(BlockFlags::LOCKED)
    }

    /// Header plus payload, saturating on a corrupted size
    #[inline]
    pub const fn span(&self) -> usize {
        HEADER_SIZE.saturating_add(self.size)
    }

    /// Decode from the first `HEADER_SIZE` bytes of `bytes`.
    pub fn read(bytes: &[u8]) -> Self {
        let mut sig = [0u8; 4];
        let mut flags = [0u8; 4];
        let mut size = [0u8; 8];
        sig.copy_from_slice(&bytes[0..4]);
        flags.copy_from_slice(&bytes[4..8]);
        size.copy_from_slice(&bytes[8..16]);

        Self {
            signature: u32::from_le_bytes(sig),
            flags: BlockFlags::from_bits(u32::from_le_bytes(flags)),
            // Saturate so a corrupted size on 32-bit targets still terminates the walk.
            size: usize::try_from(u64::from_le_bytes(size)).unwrap_or(usize::MAX),
        }
    }

    /// Encode into the first `HEADER_SIZE` bytes of `bytes`.
    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0..4].copy_from_slice(&self.signature.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.flags.bits().to_le_bytes());
        bytes[8..16].copy_from_slice(&(self.size as u64).to_le_bytes());
    }

    /// Destroy a header that has been absorbed by a neighbor.
    #[inline]
    pub fn erase(bytes: &mut [u8]) {
        bytes[..HEADER_SIZE].fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0), Some(0));
        assert_eq!(align_up(1), Some(ALIGNMENT));
        assert_eq!(align_up(ALIGNMENT), Some(ALIGNMENT));
        assert_eq!(align_up(ALIGNMENT + 1), Some(ALIGNMENT * 2));
        assert_eq!(align_up(usize::MAX), None);
    }

    #[test]
    fn header_encoding_is_sixteen_bytes() {
        let mut buf = [0xFFu8; 32];
        let mut header = BlockHeader::free(104);
        header.flags.insert(BlockFlags::BUSY);
        header.write(&mut buf);

        assert_eq!(&buf[HEADER_SIZE..], &[0xFF; 16]);
        let back = BlockHeader::read(&buf);
        assert_eq!(back, header);
        assert!(back.is_valid());
        assert!(back.is_busy());
        assert!(!back.is_locked());
        assert_eq!(back.span(), 120);
    }

    #[test]
    fn locked_requires_busy() {
        let mut header = BlockHeader::free(32);
        header.flags.insert(BlockFlags::LOCKED);
        assert!(!header.is_locked());

        header.flags.insert(BlockFlags::BUSY);
        assert!(header.is_locked());

        header.flags.remove(BlockFlags::LOCKED);
        assert!(!header.is_locked());
    }

    #[test]
    fn corrupted_size_saturates_span() {
        let header = BlockHeader {
            size: usize::MAX - 4,
            ..BlockHeader::free(0)
        };
        assert_eq!(header.span(), usize::MAX);
    }

    #[test]
    fn erased_header_is_invalid() {
        let mut buf = [0u8; HEADER_SIZE];
        BlockHeader::free(64).write(&mut buf);
        BlockHeader::erase(&mut buf);
        assert!(!BlockHeader::read(&buf).is_valid());
    }
}
