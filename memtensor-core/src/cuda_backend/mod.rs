use std::{fmt, ptr::NonNull, sync::Arc};

use cudarc::driver::{CudaContext, CudaSlice, CudaStream};
use error::{CudaError, WrapErr};
use tracing::{debug, trace};

use crate::{
    cpu_storage::host_region,
    device::{Allocator, MappedRegion, Memory},
    Error, Result,
};

pub(crate) mod error;

/// Linear device memory on one CUDA device.
///
/// Images are not supported.
#[derive(Clone)]
pub struct CudaAllocator {
    ordinal: usize,
    stream: Arc<CudaStream>,
}

impl CudaAllocator {
    pub fn new(ordinal: usize) -> Result<Self> {
        let context = CudaContext::new(ordinal).map_err(|cuda| CudaError::Context { cuda, ordinal })?;
        let stream = context.new_stream().w()?;
        Ok(Self { ordinal, stream })
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }
}

impl fmt::Debug for CudaAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CudaAllocator")
            .field("ordinal", &self.ordinal)
            .finish()
    }
}

impl Allocator for CudaAllocator {
    fn allocate(&self, nbytes: usize) -> Result<Box<dyn Memory>> {
        let slice = self.stream.alloc_zeros::<u8>(nbytes.max(1)).w()?;
        debug!(ordinal = self.ordinal, nbytes, "allocated device memory");
        Ok(Box::new(CudaMemory {
            slice,
            len: nbytes,
            stream: self.stream.clone(),
            staging: None,
            map_depth: 0,
        }))
    }

    fn on_host(&self) -> bool {
        false
    }
}

/// Device memory mapped through a host staging copy.
pub struct CudaMemory {
    slice: CudaSlice<u8>,
    len: usize,
    stream: Arc<CudaStream>,
    staging: Option<Vec<u8>>,
    map_depth: usize,
}

impl fmt::Debug for CudaMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CudaMemory")
            .field("len", &self.len)
            .field("map_depth", &self.map_depth)
            .finish()
    }
}

impl Memory for CudaMemory {
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
            slot @ None => slot.insert(self.stream.memcpy_dtov(&self.slice).w()?),
        };
        let base = NonNull::new(staging.as_mut_ptr()).ok_or_else(|| Error::NotMapped.bt())?;
        let region = host_region(base, self.len, offset, nbytes)?;
        self.map_depth += 1;
        trace!(offset, nbytes, depth = self.map_depth, "mapped device memory");
        Ok(region)
    }

    fn unmap(&mut self) -> Result<()> {
        if self.map_depth == 0 {
            return Err(Error::NotMapped.bt());
        }
        self.map_depth -= 1;
        if self.map_depth == 0 {
            if let Some(staging) = self.staging.take() {
                self.stream.memcpy_htod(&staging, &mut self.slice).w()?;
                self.stream.synchronize().w()?;
            }
        }
        Ok(())
    }
}
