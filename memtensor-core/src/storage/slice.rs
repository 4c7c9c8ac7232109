use std::ptr::NonNull;

use super::{Access, MapState, SharedStorage, Storage};
use crate::{bail, device::MappedRegion, Error, Result};

/// Non-owning window `[offset, offset + len)` into a shared linear buffer.
///
/// Used when one allocation backs several tensors. Slices never release the
/// parent; keeping it alive is the `Arc`'s job.
#[derive(Debug)]
pub struct BufferSlice {
    parent: SharedStorage,
    offset: usize,
    len: usize,
    map: MapState,
}

// SAFETY: see `Buffer`.
unsafe impl Send for BufferSlice {}

impl BufferSlice {
    pub fn new(parent: &SharedStorage, offset: usize, len: usize) -> Result<Self> {
        {
            let storage = parent.lock();
            if !matches!(&*storage, Storage::Buffer(_)) {
                bail!("cannot slice {} storage, only buffers", storage.kind());
            }
            let parent_size = storage.size();
            if offset.saturating_add(len) > parent_size {
                return Err(Error::SliceOutOfBounds {
                    offset,
                    len,
                    parent: parent_size,
                }
                .bt());
            }
        }
        Ok(Self {
            parent: parent.clone(),
            offset,
            len,
            map: MapState::default(),
        })
    }

    pub fn parent(&self) -> &SharedStorage {
        &self.parent
    }

    pub fn size(&self) -> usize {
        self.len
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn on_host(&self) -> bool {
        self.parent.lock().on_host()
    }

    pub fn is_mapped(&self) -> bool {
        self.map.is_mapped()
    }

    pub fn raw_ptr(&self) -> Result<NonNull<u8>> {
        if let Some(ptr) = self.map.ptr() {
            return Ok(ptr);
        }
        let base = self.parent.lock().raw_ptr()?;
        // SAFETY: offset + len lies within the parent, checked at construction.
        Ok(unsafe { base.add(self.offset) })
    }

    /// Slices cannot grow past the window they were created with.
    pub fn resize(&mut self, nbytes: usize) -> Result<()> {
        if nbytes > self.len {
            return Err(Error::CapacityExceeded {
                required: nbytes,
                capacity: self.len,
            }
            .bt());
        }
        Ok(())
    }

    pub fn map(&mut self, access: Access) -> Result<MappedRegion> {
        self.map.check(access)?;
        let parent = self.parent.lock().map(access)?;
        // SAFETY: offset lies within the parent, and buffers never shrink.
        let ptr = unsafe { parent.ptr.add(self.offset) };
        Ok(self.map.enter(
            MappedRegion {
                ptr,
                pitch: parent.pitch,
            },
            access,
        ))
    }

    pub fn unmap(&mut self) -> Result<()> {
        self.map.leave()?;
        self.parent.lock().unmap()
    }
}
