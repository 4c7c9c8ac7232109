use std::{mem::ManuallyDrop, ptr::NonNull, sync::Arc};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{host_region, HostMemory};
use crate::{
    device::{Allocator, MappedRegion, Memory},
    Result,
};

/// Max size of all pooled blocks, in bytes.
/// Currently 1GB.
const MAX_POOLED_BYTES: usize = 1024 * 1024 * 1024;

/// Tracks pool usage statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    /// Current total capacity of all pooled blocks, in bytes.
    pub current_size: usize,
    /// Number of times a block was reused instead of allocated.
    pub hits: usize,
    /// Number of times a new block was allocated.
    pub misses: usize,
    /// Number of times a block was dropped due to pool size cap.
    pub drops: usize,
}

#[derive(Debug)]
struct BlockPool {
    free: Vec<HostMemory>,
    max_bytes: usize,
    metrics: PoolMetrics,
}

type SharedPool = Arc<Mutex<BlockPool>>;

/// Host allocator that recycles released blocks.
///
/// Blocks dropped by their owner go back to the pool and are handed out again
/// smallest-fit. Cloning shares the pool.
#[derive(Debug, Clone)]
pub struct PooledAllocator {
    pool: SharedPool,
}

impl Default for PooledAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PooledAllocator {
    pub fn new() -> Self {
        Self::with_capacity(MAX_POOLED_BYTES)
    }

    /// Pool holding at most `max_bytes` of idle blocks. Once the idle total
    /// exceeds half of that, the largest blocks are released.
    pub fn with_capacity(max_bytes: usize) -> Self {
        Self {
            pool: Arc::new(Mutex::new(BlockPool {
                free: Vec::new(),
                max_bytes,
                metrics: PoolMetrics::default(),
            })),
        }
    }

    /// Returns a snapshot of current pool metrics.
    pub fn metrics(&self) -> PoolMetrics {
        self.pool.lock().metrics.clone()
    }

    /// Number of idle blocks waiting for reuse.
    pub fn idle_blocks(&self) -> usize {
        self.pool.lock().free.len()
    }
}

impl Allocator for PooledAllocator {
    fn allocate(&self, nbytes: usize) -> Result<Box<dyn Memory>> {
        let block = self.pool.lock().take(nbytes);
        let block = match block {
            Some(block) => block,
            None => HostMemory::new(nbytes)?,
        };
        Ok(Box::new(PooledMemory {
            block: ManuallyDrop::new(block),
            len: nbytes,
            pool: self.pool.clone(),
        }))
    }

    fn on_host(&self) -> bool {
        true
    }
}

impl BlockPool {
    /// Grab the smallest idle block holding at least `nbytes`, zeroed.
    fn take(&mut self, nbytes: usize) -> Option<HostMemory> {
        let idx = self
            .free
            .iter()
            .enumerate()
            .filter(|(_, b)| b.capacity() >= nbytes)
            .min_by_key(|(_, b)| b.capacity())
            .map(|(i, _)| i);

        let Some(idx) = idx else {
            // record an allocation miss
            self.metrics.misses += 1;
            return None;
        };

        // record a reuse hit
        self.metrics.hits += 1;
        let mut block = self.free.swap_remove(idx);
        self.metrics.current_size = self.metrics.current_size.saturating_sub(block.capacity());
        block.as_mut_slice().fill(0);
        trace!(nbytes, capacity = block.capacity(), "reused pooled block");

        debug_assert_eq!(
            self.metrics.current_size,
            self.free.iter().map(HostMemory::capacity).sum::<usize>()
        );
        Some(block)
    }

    /// Return a block back into the pool for reuse.
    fn recycle(&mut self, block: HostMemory) {
        let bytes = block.capacity();
        if self.metrics.current_size + bytes <= self.max_bytes {
            self.metrics.current_size += bytes;
            self.free.push(block);
            self.trim_excess();
        } else {
            // record a dropped block due to cap
            self.metrics.drops += 1;
        }
    }

    /// Remove largest blocks until total pooled bytes ≤ half the cap.
    fn trim_excess(&mut self) {
        let threshold = self.max_bytes / 2;
        while self.metrics.current_size > threshold {
            let Some((idx, _)) = self
                .free
                .iter()
                .enumerate()
                .max_by_key(|(_, b)| b.capacity())
            else {
                break;
            };
            let block = self.free.swap_remove(idx);
            self.metrics.current_size = self.metrics.current_size.saturating_sub(block.capacity());
            debug!(capacity = block.capacity(), "trimmed pooled block");
        }

        debug_assert_eq!(
            self.metrics.current_size,
            self.free.iter().map(HostMemory::capacity).sum::<usize>()
        );
    }
}

/// Pooled block that returns to its pool on drop.
#[derive(Debug)]
pub struct PooledMemory {
    block: ManuallyDrop<HostMemory>,
    len: usize,
    pool: SharedPool,
}

impl Drop for PooledMemory {
    fn drop(&mut self) {
        // SAFETY: the block is not touched again after being taken.
        let block = unsafe { ManuallyDrop::take(&mut self.block) };
        self.pool.lock().recycle(block);
    }
}

impl Memory for PooledMemory {
    fn size(&self) -> usize {
        self.len
    }

    fn on_host(&self) -> bool {
        true
    }

    fn host_ptr(&self) -> Option<NonNull<u8>> {
        Some(self.block.ptr())
    }

    fn map(&mut self, offset: usize, nbytes: usize) -> Result<MappedRegion> {
        host_region(self.block.ptr(), self.len, offset, nbytes)
    }

    fn unmap(&mut self) -> Result<()> {
        Ok(())
    }
}
