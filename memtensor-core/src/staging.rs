//! Memory model of a discrete accelerator.
//!
//! Device memory is never host addressable. Mapping copies the device contents
//! into a host staging area and the last unmap writes them back, which is the
//! contract accelerator drivers give for buffers and images alike.

use std::ptr::NonNull;

use tracing::{debug, trace};

use crate::{
    cpu_storage::{host_region, HostMemory},
    device::{Allocator, MappedRegion, Memory},
    DataType, Error, Result,
};

/// Row pitch alignment of staged images, in bytes.
pub const IMAGE_ROW_ALIGNMENT: usize = 64;

/// Channels per image texel (RGBA).
pub const IMAGE_CHANNELS: usize = 4;

/// Allocator for [`StagedMemory`] buffers and images.
#[derive(Debug, Clone, Copy, Default)]
pub struct StagingAllocator;

impl Allocator for StagingAllocator {
    fn allocate(&self, nbytes: usize) -> Result<Box<dyn Memory>> {
        Ok(Box::new(StagedMemory::buffer(nbytes)?))
    }

    fn allocate_image(&self, image_shape: [usize; 2], dtype: DataType) -> Result<Box<dyn Memory>> {
        Ok(Box::new(StagedMemory::image(image_shape, dtype)?))
    }

    fn on_host(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy)]
struct ImageLayout {
    shape: [usize; 2],
    row_pitch: usize,
}

#[derive(Debug)]
pub struct StagedMemory {
    device: HostMemory,
    staging: Option<HostMemory>,
    map_depth: usize,
    /// Host visible extent. For images this is `row_pitch * height`, the
    /// span the reported pitch addresses.
    len: usize,
    image: Option<ImageLayout>,
}

impl StagedMemory {
    pub fn buffer(nbytes: usize) -> Result<Self> {
        debug!(nbytes, "allocated staged buffer");
        Ok(Self {
            device: HostMemory::new(nbytes)?,
            staging: None,
            map_depth: 0,
            len: nbytes,
            image: None,
        })
    }

    pub fn image(shape: [usize; 2], dtype: DataType) -> Result<Self> {
        let texel = IMAGE_CHANNELS * dtype.size_of()?;
        let row_pitch = (shape[0] * texel).next_multiple_of(IMAGE_ROW_ALIGNMENT);
        debug!(width = shape[0], height = shape[1], row_pitch, %dtype, "allocated staged image");
        let len = row_pitch * shape[1];
        Ok(Self {
            device: HostMemory::new(len)?,
            staging: None,
            map_depth: 0,
            len,
            image: Some(ImageLayout { shape, row_pitch }),
        })
    }

    pub fn is_mapped(&self) -> bool {
        self.map_depth > 0
    }

    fn pitch(&self) -> Vec<usize> {
        match self.image {
            Some(ImageLayout { shape, row_pitch }) => vec![row_pitch, row_pitch * shape[1]],
            None => vec![],
        }
    }
}

impl Memory for StagedMemory {
    fn size(&self) -> usize {
        self.len
    }

    fn on_host(&self) -> bool {
        false
    }

    fn host_ptr(&self) -> Option<NonNull<u8>> {
        None
    }

    fn map(&mut self, offset: usize, nbytes: usize) -> Result<MappedRegion> {
        let staging = match &mut self.staging {
            Some(staging) => staging,
            slot @ None => {
                let mut staging = HostMemory::new(self.device.capacity())?;
                staging.as_mut_slice().copy_from_slice(self.device.as_slice());
                slot.insert(staging)
            }
        };
        let region = host_region(staging.ptr(), self.len, offset, nbytes)?;
        self.map_depth += 1;
        trace!(offset, nbytes, depth = self.map_depth, "mapped staged memory");
        Ok(MappedRegion {
            ptr: region.ptr,
            pitch: self.pitch(),
        })
    }

    fn unmap(&mut self) -> Result<()> {
        if self.map_depth == 0 {
            return Err(Error::NotMapped.bt());
        }
        self.map_depth -= 1;
        if self.map_depth == 0 {
            if let Some(staging) = self.staging.take() {
                self.device.as_mut_slice().copy_from_slice(staging.as_slice());
            }
            trace!("unmapped staged memory");
        }
        Ok(())
    }

    fn image_shape(&self) -> Option<[usize; 2]> {
        self.image.map(|layout| layout.shape)
    }
}
