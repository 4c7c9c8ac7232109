use std::{fmt, ptr::NonNull};

use super::{Access, MapState};
use crate::{
    device::{Allocator, MappedRegion, Memory},
    DataType, Error, Result,
};

/// 2-D accelerator image.
///
/// Texels are only reachable from the host while mapped, and the mapped rows
/// are laid out with the pitch returned by [`Image::map`]. Images never grow.
pub struct Image {
    memory: Box<dyn Memory>,
    image_shape: [usize; 2],
    dtype: DataType,
    map: MapState,
}

// SAFETY: see `Buffer`.
unsafe impl Send for Image {}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("image_shape", &self.image_shape)
            .field("dtype", &self.dtype)
            .field("map_depth", &self.map.depth)
            .finish()
    }
}

impl Image {
    pub fn new(allocator: &dyn Allocator, image_shape: [usize; 2], dtype: DataType) -> Result<Self> {
        let memory = allocator.allocate_image(image_shape, dtype)?;
        Ok(Self {
            image_shape: memory.image_shape().unwrap_or(image_shape),
            memory,
            dtype,
            map: MapState::default(),
        })
    }

    /// Physical `[width, height]` in texels.
    pub fn image_shape(&self) -> [usize; 2] {
        self.image_shape
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn size(&self) -> usize {
        self.memory.size()
    }

    pub fn is_mapped(&self) -> bool {
        self.map.is_mapped()
    }

    pub fn raw_ptr(&self) -> Result<NonNull<u8>> {
        self.map.ptr().ok_or_else(|| Error::NotMapped.bt())
    }

    pub fn map(&mut self, access: Access) -> Result<MappedRegion> {
        self.map.check(access)?;
        let region = self.memory.map(0, self.memory.size())?;
        Ok(self.map.enter(region, access))
    }

    pub fn unmap(&mut self) -> Result<()> {
        self.map.leave()?;
        self.memory.unmap()
    }
}
