use std::{alloc::Layout, ptr::NonNull};

use tracing::debug;

use crate::{
    device::{Allocator, MappedRegion, Memory, MEMORY_ALIGNMENT},
    Context, Error, Result,
};

pub(crate) mod pool;

pub use pool::{PoolMetrics, PooledAllocator};

/// Allocates aligned memory straight from the global allocator.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostAllocator;

impl Allocator for HostAllocator {
    fn allocate(&self, nbytes: usize) -> Result<Box<dyn Memory>> {
        Ok(Box::new(HostMemory::new(nbytes)?))
    }

    fn on_host(&self) -> bool {
        true
    }
}

/// Zero-initialized, `MEMORY_ALIGNMENT`-aligned host memory.
#[derive(Debug)]
pub struct HostMemory {
    ptr: NonNull<u8>,
    /// Requested size; the layout is at least one byte.
    len: usize,
    layout: Layout,
}

// SAFETY: the block is uniquely owned and only reachable through `&mut self`
// or through pointers whose use the caller synchronizes.
unsafe impl Send for HostMemory {}

impl HostMemory {
    pub fn new(nbytes: usize) -> Result<Self> {
        // Zero sized layouts are not allowed by the global allocator.
        let layout = Layout::from_size_align(nbytes.max(1), MEMORY_ALIGNMENT)
            .context("invalid host memory layout")?;
        // SAFETY: layout has non-zero size.
        let raw = unsafe { std::alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or_else(|| Error::Allocation { nbytes }.bt())?;
        debug!(nbytes, "allocated host memory");
        Ok(Self {
            ptr,
            len: nbytes,
            layout,
        })
    }

    pub(crate) fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Usable capacity in bytes, exactly as requested.
    pub fn capacity(&self) -> usize {
        self.len
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for len <= layout.size() initialized bytes.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr is valid for len bytes and uniquely borrowed.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for HostMemory {
    fn drop(&mut self) {
        // SAFETY: ptr was returned by alloc_zeroed with this layout.
        unsafe { std::alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl Memory for HostMemory {
    fn size(&self) -> usize {
        self.len
    }

    fn on_host(&self) -> bool {
        true
    }

    fn host_ptr(&self) -> Option<NonNull<u8>> {
        Some(self.ptr)
    }

    fn map(&mut self, offset: usize, nbytes: usize) -> Result<MappedRegion> {
        host_region(self.ptr, self.size(), offset, nbytes)
    }

    fn unmap(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Pass-through mapping shared by all host-resident memory.
pub(crate) fn host_region(
    base: NonNull<u8>,
    size: usize,
    offset: usize,
    nbytes: usize,
) -> Result<MappedRegion> {
    let end = offset.saturating_add(nbytes);
    if end > size {
        return Err(Error::CapacityExceeded {
            required: end,
            capacity: size,
        }
        .bt());
    }
    // SAFETY: offset <= size, so the result stays within the allocation.
    let ptr = unsafe { base.add(offset) };
    Ok(MappedRegion { ptr, pitch: vec![] })
}
