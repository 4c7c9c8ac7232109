use std::{
    fmt::Debug,
    ptr::NonNull,
    sync::{Arc, OnceLock},
};

#[cfg(feature = "cuda")]
use crate::cuda_backend::CudaAllocator;
use crate::{cpu_storage::HostAllocator, staging::StagingAllocator, DataType, Error, Result};

/// Alignment of every allocation handed out by the host allocators.
pub const MEMORY_ALIGNMENT: usize = 64;

/// Host view of a mapped region.
#[derive(Debug, Clone)]
pub struct MappedRegion {
    pub ptr: NonNull<u8>,
    /// Physical pitch in bytes per dimension. Empty for linear memory,
    /// `[row_pitch, slice_pitch]` for images.
    pub pitch: Vec<usize>,
}

/// A block of memory obtained from an [`Allocator`].
///
/// Dropping the block releases it back to whoever produced it.
pub trait Memory: Send + Debug {
    /// Capacity in bytes.
    fn size(&self) -> usize;

    /// Whether the memory is directly host addressable.
    fn on_host(&self) -> bool;

    /// Host pointer to the start of the block when [`Memory::on_host`] holds.
    fn host_ptr(&self) -> Option<NonNull<u8>>;

    /// Make `[offset, offset + nbytes)` host visible.
    ///
    /// Calls nest: every successful `map` must be paired with one `unmap`.
    fn map(&mut self, offset: usize, nbytes: usize) -> Result<MappedRegion>;

    fn unmap(&mut self) -> Result<()>;

    /// Physical `[width, height]` for image memory.
    fn image_shape(&self) -> Option<[usize; 2]> {
        None
    }
}

/// Source of storage for tensors that own their memory.
pub trait Allocator: Send + Sync + Debug {
    fn allocate(&self, nbytes: usize) -> Result<Box<dyn Memory>>;

    /// Create a 2-D RGBA image of `image_shape` texels holding `dtype` channels.
    fn allocate_image(
        &self,
        _image_shape: [usize; 2],
        _dtype: DataType,
    ) -> Result<Box<dyn Memory>> {
        Err(Error::ImageUnsupported.bt())
    }

    fn on_host(&self) -> bool;
}

/// The process-wide host allocator.
pub fn cpu_allocator() -> Arc<dyn Allocator> {
    static CPU: OnceLock<Arc<dyn Allocator>> = OnceLock::new();
    CPU.get_or_init(|| Arc::new(HostAllocator)).clone()
}

/// A concrete device that tensors can be allocated on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Device {
    #[cfg(feature = "cuda")]
    Cuda(usize),
    /// Discrete accelerator memory model, see [`StagingAllocator`].
    Staging,
    Cpu,
}

impl Device {
    pub fn allocator(&self) -> Result<Arc<dyn Allocator>> {
        match self {
            #[cfg(feature = "cuda")]
            Self::Cuda(ordinal) => Ok(Arc::new(CudaAllocator::new(*ordinal)?)),
            Self::Staging => Ok(Arc::new(StagingAllocator)),
            Self::Cpu => Ok(cpu_allocator()),
        }
    }
}
