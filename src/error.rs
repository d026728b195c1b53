//! Error taxonomy for pool operations
//!
//! Every failure is reported as a value; the Option/bool convenience
//! surface on [`Pool`](crate::Pool) collapses these into `None`/`false`.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The system allocator could not supply a backing region.
    #[error("backing allocation of {size} bytes failed")]
    OutOfMemory { size: usize },

    /// Address outside every segment, bad signature, or block not in use.
    #[error("address {addr:#x} is not a live block of this pool")]
    InvalidPointer { addr: usize },

    /// The block is pinned and may not be freed or moved.
    #[error("block at {addr:#x} is locked")]
    Locked { addr: usize },

    /// Unlock of a block that is not pinned.
    #[error("block at {addr:#x} is not locked")]
    NotLocked { addr: usize },

    /// No segment can satisfy the request and the pool may not grow.
    #[error("no free block of {size} bytes and pool is not growable")]
    Exhausted { size: usize },

    /// Request size overflows the allocator's arithmetic.
    #[error("requested size {size} is too large")]
    SizeOverflow { size: usize },

    #[error("configuration error: {0}")]
    Config(String),
}

impl PoolError {
    /// Short machine-readable tag, used as a structured logging field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OutOfMemory { .. } => "out_of_memory",
            Self::InvalidPointer { .. } => "invalid_pointer",
            Self::Locked { .. } => "locked",
            Self::NotLocked { .. } => "not_locked",
            Self::Exhausted { .. } => "exhausted",
            Self::SizeOverflow { .. } => "size_overflow",
            Self::Config(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_address() {
        let err = PoolError::InvalidPointer { addr: 0x1000 };
        assert_eq!(err.to_string(), "address 0x1000 is not a live block of this pool");
        assert_eq!(err.kind(), "invalid_pointer");

        let err = PoolError::Locked { addr: 0x20 };
        assert_eq!(err.to_string(), "block at 0x20 is locked");
    }
}
