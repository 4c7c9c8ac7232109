//! Memtensor provides one tensor handle over heterogeneous memory.
//!
//! A [`Tensor`] carries a shape, an element type tag and a single backing
//! [`Storage`]: a linear [`Buffer`] in host, pooled or accelerator memory, a 2-D
//! accelerator [`Image`], or a [`BufferSlice`] borrowed from a shared buffer.
//! No computation happens here; the crate manages identity, shape and storage of
//! the data that kernels read and write.
//!
//! ## A quick guide
//! - Create a tensor from an [`Allocator`] (or a [`Device`]); storage is made on
//!   the first [`Tensor::resize`] or [`Tensor::resize_image`].
//! - Or borrow storage someone else owns with [`Tensor::with_buffer`],
//!   [`Tensor::with_slice`] or [`Tensor::resize_with_buffer`].
//! - Before touching bytes, take a [`MappingGuard`] with [`Tensor::map`] or
//!   [`Tensor::map_mut`]. For host memory it is free; for accelerator memory it
//!   makes the data visible until the guard drops.
//!
//! ```
//! use memtensor_core::{DataType, Device, Tensor};
//!
//! let mut t = Tensor::on_device(&Device::Staging, DataType::Float).unwrap();
//! t.resize([2, 3]).unwrap();
//! t.copy_from(&[1f32, 2., 3., 4., 5., 6.]).unwrap();
//!
//! let guard = t.map().unwrap();
//! assert_eq!(guard.as_slice::<f32>().unwrap(), &[1., 2., 3., 4., 5., 6.]);
//! ```

mod cpu_storage;
#[cfg(feature = "cuda")]
mod cuda_backend;
mod device;
mod dtype;
mod error;
mod staging;
mod storage;
mod tensor;

pub use cpu_storage::{HostAllocator, HostMemory, PoolMetrics, PooledAllocator};
#[cfg(feature = "cuda")]
pub use cuda_backend::{CudaAllocator, CudaMemory};
pub use device::{cpu_allocator, Allocator, Device, MappedRegion, Memory, MEMORY_ALIGNMENT};
pub use dtype::{DType, DataType};
pub use error::{Context, Error, Result};
pub use staging::{StagedMemory, StagingAllocator, IMAGE_CHANNELS, IMAGE_ROW_ALIGNMENT};
pub use storage::{Access, Buffer, BufferSlice, Image, SharedStorage, Storage};
pub use tensor::{
    MappingGuard, MappingGuardMut, Tensor, EXTRA_BUFFER_PAD_SIZE, PARALLEL_COPY_THRESHOLD,
};
