//! mempool - arena memory pools with best-fit allocation, lazy
//! coalescing, growth chaining and block pinning
//!
//! A [`Pool`] owns one or more contiguous segments, each tiled by
//! header+payload blocks. Callers get opaque [`PoolPtr`] addresses back and
//! reach the bytes through the pool, which validates every pointer by
//! bounds and header signature before touching memory.
//!
//! ```rust
//! use mempool::{Pool, PoolFlags};
//!
//! let pool = Pool::create(1024, PoolFlags::EXPAND).expect("pool");
//! let ptr = pool.dup_str("hello").expect("alloc");
//! assert_eq!(pool.read(ptr).unwrap()[..6], *b"hello\0");
//!
//! assert!(pool.lock(ptr));
//! assert!(!pool.free(ptr));
//! assert!(pool.unlock(ptr));
//! assert!(pool.free(ptr));
//! ```
//!
//! Growth never moves existing blocks: a new, larger segment is chained in
//! front of the old ones and the handle keeps describing the head.

pub mod config;
pub mod default_pool;
pub mod error;
pub mod logging;
pub mod pool;

pub use config::PoolConfig;
pub use default_pool::DefaultPool;
pub use error::PoolError;
pub use pool::{
    BlockInfo, Pool, PoolFlags, PoolPtr, PoolStats, SegmentInfo, ALIGNMENT, HEADER_SIZE,
    MIN_BLOCK_SIZE,
};
