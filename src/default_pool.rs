//! Default pool - a lazily created, growable pool for call sites that do
//! not want to thread an explicit handle around
//!
//! The owner decides its lifetime: the backing memory goes away when the
//! `DefaultPool` is dropped or [`release`](DefaultPool::release)d.

use once_cell::sync::OnceCell;
use std::io;

use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::pool::{BlockInfo, Pool, PoolFlags, PoolPtr, PoolStats, SegmentInfo};

pub struct DefaultPool {
    config: PoolConfig,
    pool: OnceCell<Pool>,
}

impl DefaultPool {
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    /// Configuration taken from `MEMPOOL_*` environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self::with_config(PoolConfig::from_env()?))
    }

    pub fn with_config(config: PoolConfig) -> Self {
        Self {
            config,
            pool: OnceCell::new(),
        }
    }

    /// The underlying pool, created on first use
    pub fn pool(&self) -> Result<&Pool> {
        self.pool.get_or_try_init(|| {
            let mut flags = PoolFlags::EXPAND;
            if self.config.default_fast {
                flags |= PoolFlags::FAST;
            }
            Pool::with_config(self.config.default_pool_size, flags, &self.config)
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.pool.get().is_some()
    }

    /// Destroy the pool; the next call creates a fresh one.
    pub fn release(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.destroy();
        }
    }

    /// Free every block but keep the pool's head segment around.
    pub fn reset(&self) {
        if let Some(pool) = self.existing() {
            pool.reset();
        }
    }

    pub fn alloc(&self, size: usize) -> Option<PoolPtr> {
        self.pool().ok()?.alloc(size)
    }

    pub fn try_alloc(&self, size: usize) -> Result<PoolPtr> {
        self.pool()?.try_alloc(size)
    }

    pub fn zeroed_alloc(&self, size: usize, count: usize) -> Option<PoolPtr> {
        self.pool().ok()?.zeroed_alloc(size, count)
    }

    pub fn dup_str(&self, text: &str) -> Option<PoolPtr> {
        self.pool().ok()?.dup_str(text)
    }

    pub fn realloc(&self, ptr: PoolPtr, size: usize) -> Option<PoolPtr> {
        self.existing()?.realloc(ptr, size)
    }

    pub fn try_realloc(&self, ptr: PoolPtr, size: usize) -> Result<PoolPtr> {
        self.live(ptr)?.try_realloc(ptr, size)
    }

    pub fn free(&self, ptr: PoolPtr) -> bool {
        self.existing().is_some_and(|pool| pool.free(ptr))
    }

    pub fn try_free(&self, ptr: PoolPtr) -> Result<()> {
        self.live(ptr)?.try_free(ptr)
    }

    pub fn lock(&self, ptr: PoolPtr) -> bool {
        self.existing().is_some_and(|pool| pool.lock(ptr))
    }

    pub fn try_lock(&self, ptr: PoolPtr) -> Result<()> {
        self.live(ptr)?.try_lock(ptr)
    }

    pub fn unlock(&self, ptr: PoolPtr) -> bool {
        self.existing().is_some_and(|pool| pool.unlock(ptr))
    }

    pub fn try_unlock(&self, ptr: PoolPtr) -> Result<()> {
        self.live(ptr)?.try_unlock(ptr)
    }

    pub fn is_locked(&self, ptr: PoolPtr) -> bool {
        self.existing().is_some_and(|pool| pool.is_locked(ptr))
    }

    pub fn payload_len(&self, ptr: PoolPtr) -> Option<usize> {
        self.existing()?.payload_len(ptr)
    }

    pub fn read(&self, ptr: PoolPtr) -> Option<Vec<u8>> {
        self.existing()?.read(ptr)
    }

    pub fn write(&self, ptr: PoolPtr, offset: usize, data: &[u8]) -> bool {
        self.existing().is_some_and(|pool| pool.write(ptr, offset, data))
    }

    pub fn walk(&self, visitor: impl FnMut(&SegmentInfo, &BlockInfo)) {
        if let Some(pool) = self.existing() {
            pool.walk(visitor);
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.existing().map(Pool::stats).unwrap_or_default()
    }

    pub fn dump<W: io::Write>(&self, out: &mut W, bar_width: usize) -> io::Result<()> {
        match self.existing() {
            Some(pool) => pool.dump(out, bar_width),
            None => writeln!(out, "default pool not initialized"),
        }
    }

    /// Pointer-taking calls never need to create the pool: no pointer can
    /// belong to a pool that does not exist yet.
    fn existing(&self) -> Option<&Pool> {
        self.pool.get()
    }

    fn live(&self, ptr: PoolPtr) -> Result<&Pool> {
        self.existing()
            .ok_or(PoolError::InvalidPointer { addr: ptr.addr() })
    }
}

impl Default for DefaultPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_on_first_allocation() {
        let pool = DefaultPool::new();
        assert!(!pool.is_initialized());

        let ptr = pool.alloc(32).expect("alloc");
        assert!(pool.is_initialized());
        assert!(pool.pool().unwrap().flags().contains(PoolFlags::EXPAND));
        assert!(pool.free(ptr));
    }

    #[test]
    fn pointer_calls_do_not_create_pool() {
        let pool = DefaultPool::new();
        let bogus = PoolPtr::from_addr(0x1000).unwrap();

        assert!(!pool.free(bogus));
        assert!(!pool.lock(bogus));
        assert!(pool.realloc(bogus, 16).is_none());
        assert!(!pool.is_initialized());
    }

    #[test]
    fn release_discards_pool() {
        let mut pool = DefaultPool::new();
        let ptr = pool.dup_str("hello").expect("dup");
        pool.release();

        assert!(!pool.is_initialized());
        assert!(pool.read(ptr).is_none());
        assert!(pool.alloc(8).is_some());
    }

    #[test]
    fn fallible_calls_forward_to_pool() {
        let pool = DefaultPool::new();
        let bogus = PoolPtr::from_addr(0x1000).unwrap();
        assert_eq!(
            pool.try_lock(bogus),
            Err(PoolError::InvalidPointer { addr: 0x1000 })
        );
        assert!(pool.try_realloc(bogus, 8).is_err());
        assert!(!pool.is_initialized());

        let ptr = pool.alloc(24).expect("alloc");
        assert_eq!(pool.payload_len(ptr), Some(24));
        assert_eq!(pool.try_unlock(ptr), Err(PoolError::NotLocked { addr: ptr.addr() }));
        pool.try_lock(ptr).expect("lock");
        assert!(matches!(pool.try_realloc(ptr, 64), Err(PoolError::Locked { .. })));
        pool.try_unlock(ptr).expect("unlock");
        let moved = pool.try_realloc(ptr, 64).expect("realloc");

        pool.reset();
        assert!(pool.is_initialized());
        assert!(pool.payload_len(moved).is_none());
        assert_eq!(pool.stats().busy_blocks, 0);
    }

    #[test]
    fn fast_flag_from_config() {
        let config = PoolConfig {
            default_fast: true,
            ..PoolConfig::default()
        };
        let pool = DefaultPool::with_config(config);
        let flags = pool.pool().expect("pool").flags();
        assert!(flags.contains(PoolFlags::FAST | PoolFlags::EXPAND));
    }
}
