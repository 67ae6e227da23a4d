// Packet buffer pool.
//
// A fixed-capacity arena of equally sized buffers. Every buffer is allocated
// once in `MemPool::create`; afterwards acquiring and releasing only moves
// slot ownership between the shared free ring, per-worker caches and `Mbuf`
// handles.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arrayvec::ArrayVec;
use crossbeam::queue::ArrayQueue;

use super::mbuf::Mbuf;
use crate::api::{Errno, Result};

/// Headroom reserved at the front of each buffer.
pub const MBUF_HEADROOM: usize = 128;

/// Default data room size (2048 bytes of usable space + headroom).
pub const DEFAULT_MBUF_DATA_ROOM_SIZE: u16 = 2048 + MBUF_HEADROOM as u16;

/// Largest per-worker cache a pool accepts.
pub const MEMPOOL_CACHE_MAX_SIZE: u32 = 512;

/// One pre-allocated buffer. Exactly one of the free ring, a cache or an
/// `Mbuf` holds a given slot at any time.
pub(crate) struct Slot {
    pub(crate) id: u32,
    pub(crate) buf: Box<[u8]>,
}

struct PoolShared {
    name: String,
    free: ArrayQueue<Slot>,
    capacity: u32,
    cache_size: u32,
    data_room_size: u16,
    /// Buffers currently held by `Mbuf` handles.
    in_use: AtomicUsize,
}

/// Configuration for creating a MemPool
#[derive(Debug, Clone)]
pub struct MemPoolConfig {
    /// Number of buffers in the pool
    pub num_mbufs: u32,
    /// Per-worker cache size (0 disables caching)
    pub cache_size: u32,
    /// Size of each buffer, headroom included
    pub data_room_size: u16,
}

impl Default for MemPoolConfig {
    fn default() -> Self {
        Self {
            num_mbufs: 8191, // 2^13 - 1
            cache_size: 250,
            data_room_size: DEFAULT_MBUF_DATA_ROOM_SIZE,
        }
    }
}

impl MemPoolConfig {
    /// Create a new MemPoolConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of buffers in the pool.
    pub fn num_mbufs(mut self, n: u32) -> Self {
        self.num_mbufs = n;
        self
    }

    /// Set the per-worker cache size.
    ///
    /// Set to 0 to disable caching. Must not exceed `num_mbufs / 1.5`.
    pub fn cache_size(mut self, size: u32) -> Self {
        self.cache_size = size;
        self
    }

    /// Set the data room size (including [`MBUF_HEADROOM`]).
    pub fn data_room_size(mut self, size: u16) -> Self {
        self.data_room_size = size;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.num_mbufs == 0 || self.data_room_size as usize <= MBUF_HEADROOM {
            return Err(Errno::EINVAL);
        }
        if self.cache_size > MEMPOOL_CACHE_MAX_SIZE
            || cache_flush_thresh(self.cache_size as usize) > self.num_mbufs as usize
        {
            return Err(Errno::EINVAL);
        }
        Ok(())
    }
}

fn cache_flush_thresh(size: usize) -> usize {
    size * 3 / 2
}

/// Fixed-capacity pool of packet buffers.
///
/// Cloning is cheap and yields another handle to the same pool. The storage
/// is freed once the last handle and the last `Mbuf` drawn from it are gone.
#[derive(Clone)]
pub struct MemPool {
    inner: Arc<PoolShared>,
}

impl MemPool {
    /// Create a new pool, allocating every buffer up front.
    ///
    /// Fails with `EINVAL` for an invalid configuration and `ENOMEM` if the
    /// buffers cannot be allocated.
    pub fn create<S>(name: S, config: &MemPoolConfig) -> Result<Self>
    where
        S: Into<String>,
    {
        config.validate()?;

        let free = ArrayQueue::new(config.num_mbufs as usize);
        let size = config.data_room_size as usize;
        for id in 0..config.num_mbufs {
            let mut buf = Vec::new();
            buf.try_reserve_exact(size).map_err(|_| Errno::ENOMEM)?;
            buf.resize(size, 0u8);
            let slot = Slot {
                id,
                buf: buf.into_boxed_slice(),
            };
            if free.push(slot).is_err() {
                return Err(Errno::ENOMEM);
            }
        }

        Ok(MemPool {
            inner: Arc::new(PoolShared {
                name: name.into(),
                free,
                capacity: config.num_mbufs,
                cache_size: config.cache_size,
                data_room_size: config.data_room_size,
                in_use: AtomicUsize::new(0),
            }),
        })
    }

    /// Create a pool with default configuration
    pub fn create_default<S>(name: S, num_mbufs: u32) -> Result<Self>
    where
        S: Into<String>,
    {
        let config = MemPoolConfig {
            num_mbufs,
            cache_size: 0,
            ..Default::default()
        };
        Self::create(name, &config)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Total number of buffers in the pool.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.inner.capacity
    }

    #[inline]
    pub fn cache_size(&self) -> u32 {
        self.inner.cache_size
    }

    /// Get the data room size for buffers in this pool.
    #[inline]
    pub fn data_room_size(&self) -> u16 {
        self.inner.data_room_size
    }

    /// Usable bytes per buffer (data room minus headroom).
    #[inline]
    pub fn mbuf_capacity(&self) -> usize {
        self.inner.data_room_size as usize - MBUF_HEADROOM
    }

    /// Number of buffers not held by any `Mbuf`.
    ///
    /// This includes buffers parked in a [`MemPoolCache`], which only that
    /// cache can hand out; [`MemPool::ring_count`] is what `try_alloc` can
    /// reach.
    #[inline]
    pub fn avail_count(&self) -> u32 {
        (self.inner.capacity as usize).saturating_sub(self.in_use_count()) as u32
    }

    /// Number of buffers in the shared ring, excluding worker caches.
    #[inline]
    pub fn ring_count(&self) -> u32 {
        self.inner.free.len() as u32
    }

    /// Number of buffers currently held by `Mbuf` handles.
    #[inline]
    pub fn in_use_count(&self) -> usize {
        self.inner.in_use.load(Ordering::Acquire)
    }

    /// True when every buffer is back in the pool.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.in_use_count() == 0
    }

    /// Whether both handles refer to the same pool.
    #[inline]
    pub fn ptr_eq(&self, other: &MemPool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Try to allocate one buffer from the shared ring.
    ///
    /// Returns `None` if the pool is exhausted.
    #[inline]
    pub fn try_alloc(&self) -> Option<Mbuf> {
        let slot = self.inner.free.pop()?;
        Some(Mbuf::from_slot(slot, self.clone()))
    }

    /// Allocate up to `n` buffers into `pkts`, bounded by its remaining
    /// capacity.
    ///
    /// Never blocks: an exhausted pool yields fewer buffers, possibly none.
    /// Returns the number of buffers added.
    #[inline]
    pub fn alloc_bulk<const N: usize>(&self, pkts: &mut ArrayVec<Mbuf, N>, n: usize) -> usize {
        let want = n.min(pkts.remaining_capacity());
        let mut count = 0;
        while count < want {
            match self.try_alloc() {
                Some(mbuf) => {
                    pkts.push(mbuf);
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    /// Return a buffer to the pool immediately.
    ///
    /// Equivalent to dropping it; the buffer always goes back to the pool
    /// it was drawn from.
    #[inline]
    pub fn release(&self, mbuf: Mbuf) {
        debug_assert!(mbuf.pool().ptr_eq(self), "mbuf released to a foreign pool");
        mbuf.free();
    }

    /// Create a per-worker cache in front of this pool.
    pub fn cache(&self) -> MemPoolCache {
        MemPoolCache::new(self.clone())
    }

    pub(crate) fn mark_in_use(&self) {
        self.inner.in_use.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn mark_released(&self) {
        self.inner.in_use.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn put_free(&self, slot: Slot) {
        // The ring is sized to hold every slot, so a push cannot fail while
        // ownership is respected.
        let pushed = self.inner.free.push(slot);
        debug_assert!(pushed.is_ok(), "mempool free ring overflow");
    }

    fn take_free(&self) -> Option<Slot> {
        self.inner.free.pop()
    }
}

impl std::fmt::Debug for MemPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemPool")
            .field("name", &self.inner.name)
            .field("capacity", &self.inner.capacity)
            .field("avail", &self.avail_count())
            .field("cache_size", &self.inner.cache_size)
            .finish()
    }
}

/// Per-worker buffer cache.
///
/// Owned by a single worker, so it needs no synchronization. It refills from
/// the shared ring in chunks of `cache_size` and spills back once it holds
/// more than 1.5 times that. Cached buffers count as available.
pub struct MemPoolCache {
    pool: MemPool,
    objs: Vec<Slot>,
    size: usize,
    flush_thresh: usize,
}

impl MemPoolCache {
    fn new(pool: MemPool) -> Self {
        let size = pool.cache_size() as usize;
        let flush_thresh = cache_flush_thresh(size);
        Self {
            pool,
            objs: Vec::with_capacity(flush_thresh + 1),
            size,
            flush_thresh,
        }
    }

    /// The pool backing this cache.
    pub fn pool(&self) -> &MemPool {
        &self.pool
    }

    /// Number of free buffers currently held locally.
    pub fn len(&self) -> usize {
        self.objs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objs.is_empty()
    }

    /// Allocate one buffer, refilling from the shared ring when empty.
    #[inline]
    pub fn alloc(&mut self) -> Option<Mbuf> {
        if self.size == 0 {
            return self.pool.try_alloc();
        }
        if self.objs.is_empty() {
            self.refill();
        }
        let slot = self.objs.pop()?;
        Some(Mbuf::from_slot(slot, self.pool.clone()))
    }

    /// Allocate up to `n` buffers into `pkts`. Returns the number added.
    #[inline]
    pub fn alloc_bulk<const N: usize>(&mut self, pkts: &mut ArrayVec<Mbuf, N>, n: usize) -> usize {
        let want = n.min(pkts.remaining_capacity());
        let mut count = 0;
        while count < want {
            match self.alloc() {
                Some(mbuf) => {
                    pkts.push(mbuf);
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    /// Return a buffer through the cache.
    ///
    /// Buffers from a different pool go straight back to their own pool.
    #[inline]
    pub fn free(&mut self, mbuf: Mbuf) {
        if self.size == 0 || !mbuf.pool().ptr_eq(&self.pool) {
            mbuf.free();
            return;
        }
        self.objs.push(mbuf.into_slot());
        if self.objs.len() >= self.flush_thresh {
            self.flush_to(self.size);
        }
    }

    /// Spill every cached buffer back to the shared ring.
    pub fn flush(&mut self) {
        self.flush_to(0);
    }

    fn refill(&mut self) {
        while self.objs.len() < self.size {
            match self.pool.take_free() {
                Some(slot) => self.objs.push(slot),
                None => break,
            }
        }
    }

    fn flush_to(&mut self, keep: usize) {
        while self.objs.len() > keep {
            if let Some(slot) = self.objs.pop() {
                self.pool.put_free(slot);
            }
        }
    }
}

impl Drop for MemPoolCache {
    fn drop(&mut self) {
        self.flush();
    }
}
