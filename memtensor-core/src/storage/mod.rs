use std::{ptr::NonNull, sync::Arc};

use parking_lot::Mutex;

use crate::{device::MappedRegion, Error, Result};

mod buffer;
mod image;
mod slice;

pub use buffer::Buffer;
pub use image::Image;
pub use slice::BufferSlice;

/// Storage owned outside of any single tensor.
///
/// The lock is only held for the duration of individual storage calls, never
/// across a mapping, so tensors sharing one parent buffer can be mapped at once.
pub type SharedStorage = Arc<Mutex<Storage>>;

/// How a mapping will be used.
///
/// Any number of `Read` mappings may be live at once; a `Write` mapping is
/// exclusive. Slices take the same access on their parent, so two windows of
/// one buffer are never writable at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Backing store of a tensor.
#[derive(Debug)]
pub enum Storage {
    /// Linear memory, host or accelerator resident.
    Buffer(Buffer),
    /// 2-D accelerator image with its own physical layout.
    Image(Image),
    /// Borrowed window into a shared linear buffer.
    Slice(BufferSlice),
}

impl Storage {
    /// Wrap for sharing with tensors that borrow it.
    pub fn shared(self) -> SharedStorage {
        Arc::new(Mutex::new(self))
    }

    /// Capacity in bytes.
    pub fn size(&self) -> usize {
        match self {
            Self::Buffer(b) => b.size(),
            Self::Image(i) => i.size(),
            Self::Slice(s) => s.size(),
        }
    }

    /// Byte offset into the underlying allocation.
    pub fn offset(&self) -> usize {
        match self {
            Self::Slice(s) => s.offset(),
            Self::Buffer(_) | Self::Image(_) => 0,
        }
    }

    pub fn on_host(&self) -> bool {
        match self {
            Self::Buffer(b) => b.on_host(),
            Self::Image(_) => false,
            Self::Slice(s) => s.on_host(),
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Self::Image(_))
    }

    /// Physical `[width, height]` of image storage.
    pub fn image_shape(&self) -> Option<[usize; 2]> {
        match self {
            Self::Image(i) => Some(i.image_shape()),
            Self::Buffer(_) | Self::Slice(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer",
            Self::Image(_) => "image",
            Self::Slice(_) => "slice",
        }
    }

    pub fn is_mapped(&self) -> bool {
        match self {
            Self::Buffer(b) => b.is_mapped(),
            Self::Image(i) => i.is_mapped(),
            Self::Slice(s) => s.is_mapped(),
        }
    }

    /// Host address of the first byte.
    ///
    /// Fails with [`Error::NotMapped`] for accelerator memory outside a mapping.
    pub fn raw_ptr(&self) -> Result<NonNull<u8>> {
        match self {
            Self::Buffer(b) => b.raw_ptr(),
            Self::Image(i) => i.raw_ptr(),
            Self::Slice(s) => s.raw_ptr(),
        }
    }

    /// Ensure at least `nbytes` of capacity.
    pub fn resize(&mut self, nbytes: usize) -> Result<()> {
        match self {
            Self::Buffer(b) => b.resize(nbytes),
            Self::Image(_) => Err(Error::ImageResize.bt()),
            Self::Slice(s) => s.resize(nbytes),
        }
    }

    /// Fails with [`Error::MapConflict`] when `access` clashes with a live
    /// mapping.
    pub fn map(&mut self, access: Access) -> Result<MappedRegion> {
        match self {
            Self::Buffer(b) => b.map(access),
            Self::Image(i) => i.map(access),
            Self::Slice(s) => s.map(access),
        }
    }

    pub fn unmap(&mut self) -> Result<()> {
        match self {
            Self::Buffer(b) => b.unmap(),
            Self::Image(i) => i.unmap(),
            Self::Slice(s) => s.unmap(),
        }
    }

    /// Zero every byte of the storage.
    pub fn clear(&mut self) -> Result<()> {
        let size = self.size();
        let region = self.map(Access::Write)?;
        // SAFETY: a mapped region is valid for `size` bytes until unmap.
        unsafe { std::ptr::write_bytes(region.ptr.as_ptr(), 0, size) };
        self.unmap()
    }
}

/// Map bookkeeping shared by the storage kinds that own memory.
#[derive(Debug, Default)]
struct MapState {
    depth: usize,
    writer: bool,
    region: Option<MappedRegion>,
}

impl MapState {
    fn check(&self, access: Access) -> Result<()> {
        if self.writer || (access == Access::Write && self.depth > 0) {
            return Err(Error::MapConflict.bt());
        }
        Ok(())
    }

    /// Callers run [`MapState::check`] before mapping the memory.
    fn enter(&mut self, region: MappedRegion, access: Access) -> MappedRegion {
        self.depth += 1;
        self.writer = access == Access::Write;
        self.region.insert(region).clone()
    }

    fn leave(&mut self) -> Result<()> {
        if self.depth == 0 {
            return Err(Error::NotMapped.bt());
        }
        self.depth -= 1;
        if self.depth == 0 {
            self.writer = false;
            self.region = None;
        }
        Ok(())
    }

    fn ptr(&self) -> Option<NonNull<u8>> {
        self.region.as_ref().map(|r| r.ptr)
    }

    fn is_mapped(&self) -> bool {
        self.depth > 0
    }
}
