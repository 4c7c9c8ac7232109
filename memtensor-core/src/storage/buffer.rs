use std::{fmt, ptr::NonNull, sync::Arc};

use tracing::{debug, trace};

use super::{Access, MapState};
use crate::{
    device::{Allocator, MappedRegion, Memory},
    Error, Result,
};

/// Linear memory obtained from an allocator.
pub struct Buffer {
    memory: Box<dyn Memory>,
    allocator: Arc<dyn Allocator>,
    map: MapState,
}

// SAFETY: the only non-Send field is the cached mapped pointer, which points
// into `memory` and moves with it.
unsafe impl Send for Buffer {}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.memory.size())
            .field("on_host", &self.memory.on_host())
            .field("map_depth", &self.map.depth)
            .finish()
    }
}

impl Buffer {
    pub fn new(allocator: Arc<dyn Allocator>, nbytes: usize) -> Result<Self> {
        let memory = allocator.allocate(nbytes)?;
        Ok(Self {
            memory,
            allocator,
            map: MapState::default(),
        })
    }

    pub fn size(&self) -> usize {
        self.memory.size()
    }

    pub fn on_host(&self) -> bool {
        self.memory.on_host()
    }

    pub fn is_mapped(&self) -> bool {
        self.map.is_mapped()
    }

    pub fn raw_ptr(&self) -> Result<NonNull<u8>> {
        self.memory
            .host_ptr()
            .or(self.map.ptr())
            .ok_or_else(|| Error::NotMapped.bt())
    }

    /// Grow to at least `nbytes`. Never shrinks.
    ///
    /// Growth reallocates: contents are not preserved and earlier pointers
    /// become dangling.
    pub fn resize(&mut self, nbytes: usize) -> Result<()> {
        if nbytes <= self.size() {
            return Ok(());
        }
        if self.map.is_mapped() {
            return Err(Error::MappedResize.bt());
        }
        debug!(from = self.size(), to = nbytes, "growing buffer");
        self.memory = self.allocator.allocate(nbytes)?;
        Ok(())
    }

    pub fn map(&mut self, access: Access) -> Result<MappedRegion> {
        self.map.check(access)?;
        let region = self.memory.map(0, self.memory.size())?;
        trace!(depth = self.map.depth + 1, ?access, "mapped buffer");
        Ok(self.map.enter(region, access))
    }

    pub fn unmap(&mut self) -> Result<()> {
        self.map.leave()?;
        self.memory.unmap()
    }
}
