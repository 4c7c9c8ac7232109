use std::{fmt, sync::Arc};

use parking_lot::{Mutex, MutexGuard};
use rayon::prelude::*;

use super::{MappingGuard, MappingGuardMut, PARALLEL_COPY_CHUNK, PARALLEL_COPY_THRESHOLD};
use crate::{
    device::{cpu_allocator, Allocator, Device},
    storage::{BufferSlice, SharedStorage, Storage},
    DType, DataType, Error, Result,
};

/// Who is responsible for releasing a tensor's storage.
pub(super) enum Binding {
    /// No storage yet; created on the first resize.
    Unbound,
    /// Created by the tensor and released with it.
    Owned(Mutex<Storage>),
    /// Owned elsewhere. Dropping the tensor only drops its handle.
    Borrowed(SharedStorage),
}

impl Binding {
    pub(super) fn cell(&self) -> Option<&Mutex<Storage>> {
        match self {
            Self::Unbound => None,
            Self::Owned(storage) => Some(storage),
            Self::Borrowed(storage) => Some(storage.as_ref()),
        }
    }
}

/// A shaped, typed handle over host, pooled or accelerator memory.
///
/// Storage is created lazily by the resize family, or borrowed from the caller.
/// Accelerator storage must be mapped (see [`Tensor::map`]) before its bytes are
/// touched from the host.
pub struct Tensor {
    pub(super) allocator: Option<Arc<dyn Allocator>>,
    pub(super) dtype: DataType,
    pub(super) shape: Vec<usize>,
    pub(super) image_shape: Vec<usize>,
    pub(super) binding: Binding,
    pub(super) name: String,
}

impl Default for Tensor {
    fn default() -> Self {
        Self::new(cpu_allocator(), DataType::Float)
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("name", &self.name)
            .field("dtype", &self.dtype)
            .field("shape", &self.shape)
            .field("image_shape", &self.image_shape)
            .field("owns_storage", &self.owns_storage())
            .finish()
    }
}

impl Tensor {
    /// Tensor whose storage will be created through `allocator`.
    pub fn new(allocator: Arc<dyn Allocator>, dtype: DataType) -> Self {
        Self {
            allocator: Some(allocator),
            dtype,
            shape: vec![],
            image_shape: vec![],
            binding: Binding::Unbound,
            name: String::new(),
        }
    }

    pub fn on_device(device: &Device, dtype: DataType) -> Result<Self> {
        Ok(Self::new(device.allocator()?, dtype))
    }

    /// Tensor borrowing externally owned storage.
    pub fn with_buffer(buffer: SharedStorage, dtype: DataType) -> Self {
        Self {
            allocator: None,
            dtype,
            shape: vec![],
            image_shape: vec![],
            binding: Binding::Borrowed(buffer),
            name: String::new(),
        }
    }

    /// Tensor over a window of a shared buffer. Never owns storage.
    pub fn with_slice(slice: BufferSlice, dtype: DataType) -> Self {
        Self::with_buffer(Storage::Slice(slice).shared(), dtype)
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn set_dtype(&mut self, dtype: DataType) {
        self.dtype = dtype;
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Logical `[width, height]` when backed by an image, empty otherwise.
    pub fn image_shape(&self) -> &[usize] {
        &self.image_shape
    }

    /// Number of dimensions.
    pub fn dim_size(&self) -> usize {
        self.shape.len()
    }

    pub fn dim(&self, index: usize) -> Result<usize> {
        self.shape.get(index).copied().ok_or_else(|| {
            Error::DimOutOfRange {
                index,
                rank: self.shape.len(),
            }
            .bt()
        })
    }

    /// Number of elements.
    ///
    /// Every shape is validated by the resize family before it is committed,
    /// so the product cannot overflow.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// Number of bytes covered by the logical shape.
    pub fn raw_size(&self) -> Result<usize> {
        checked_raw_size(&self.shape, self.dtype)
    }

    pub fn size_of_type(&self) -> Result<usize> {
        self.dtype.size_of()
    }

    pub fn owns_storage(&self) -> bool {
        matches!(self.binding, Binding::Owned(_))
    }

    pub fn has_storage(&self) -> bool {
        self.binding.cell().is_some()
    }

    /// Backed by an accelerator image.
    pub fn has_image(&self) -> bool {
        self.binding.cell().is_some_and(|storage| {
            let storage = storage.lock();
            storage.is_image() && !storage.on_host()
        })
    }

    /// Backed by accelerator-resident linear memory.
    pub fn has_buffer(&self) -> bool {
        self.binding.cell().is_some_and(|storage| {
            let storage = storage.lock();
            !storage.is_image() && !storage.on_host()
        })
    }

    /// Capacity of the storage in bytes.
    pub fn capacity(&self) -> Result<usize> {
        Ok(self.lock()?.size())
    }

    pub fn buffer_offset(&self) -> Result<usize> {
        Ok(self.lock()?.offset())
    }

    /// Run `f` against the storage while it is locked.
    pub fn with_storage<R>(&self, f: impl FnOnce(&Storage) -> R) -> Result<R> {
        let storage = self.lock()?;
        Ok(f(&storage))
    }

    pub fn set_source_op_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The backing storage, locked until the guard drops.
    pub fn underlying_buffer(&self) -> Result<MutexGuard<'_, Storage>> {
        self.lock()
    }

    pub(super) fn lock(&self) -> Result<MutexGuard<'_, Storage>> {
        let storage = self.binding.cell().ok_or_else(|| Error::NullStorage.bt())?;
        Ok(storage.lock())
    }

    /// Address of the first byte.
    ///
    /// Accelerator storage only has one while mapped; the pointer is invalidated
    /// by the next growth or unmap.
    pub fn raw_data(&self) -> Result<*const u8> {
        Ok(self.lock()?.raw_ptr()?.as_ptr().cast_const())
    }

    pub fn raw_mutable_data(&mut self) -> Result<*mut u8> {
        Ok(self.lock()?.raw_ptr()?.as_ptr())
    }

    /// [`Tensor::raw_data`] reinterpreted as `T`. The element type is not checked.
    pub fn data<T: DType>(&self) -> Result<*const T> {
        Ok(self.raw_data()?.cast())
    }

    pub fn mutable_data<T: DType>(&mut self) -> Result<*mut T> {
        Ok(self.raw_mutable_data()?.cast())
    }

    /// Make the storage host visible until the guard drops.
    pub fn map(&self) -> Result<MappingGuard<'_>> {
        MappingGuard::new(Some(self))
    }

    pub fn map_mut(&mut self) -> Result<MappingGuardMut<'_>> {
        MappingGuardMut::new(self)
    }

    /// Zero the whole storage.
    pub fn clear(&mut self) -> Result<()> {
        self.lock()?.clear()
    }

    /// Copy `src` to the start of the storage.
    pub fn copy_bytes(&mut self, src: &[u8]) -> Result<()> {
        let mut guard = self.map_mut()?;
        let dst = guard.as_bytes_mut();
        if src.len() > dst.len() {
            return Err(Error::CapacityExceeded {
                required: src.len(),
                capacity: dst.len(),
            }
            .bt());
        }
        let dst = &mut dst[..src.len()];
        if src.len() >= PARALLEL_COPY_THRESHOLD {
            dst.par_chunks_mut(PARALLEL_COPY_CHUNK)
                .zip(src.par_chunks(PARALLEL_COPY_CHUNK))
                .for_each(|(d, s)| d.copy_from_slice(s));
        } else {
            dst.copy_from_slice(src);
        }
        Ok(())
    }

    /// Copy exactly [`Tensor::size`] elements.
    pub fn copy_from<T: DType>(&mut self, src: &[T]) -> Result<()> {
        if src.len() != self.size() {
            return Err(Error::LengthMismatch {
                src: src.len(),
                dst: self.size(),
            }
            .bt());
        }
        self.copy_bytes(bytemuck::cast_slice(src))
    }

    /// Become a copy of `other`: same type, shape, storage kind and contents.
    ///
    /// On failure before any byte is written the tensor is left as it was.
    pub fn copy(&mut self, other: &Tensor) -> Result<()> {
        let nbytes = other.raw_size()?;
        if !other.has_storage() {
            return Err(Error::NullStorage.bt());
        }
        let previous = self.dtype;
        self.dtype = other.dtype;
        if let Err(e) = self.resize_like(other) {
            self.dtype = previous;
            return Err(e);
        }
        let src = other.map()?;
        let bytes = src.as_bytes();
        if nbytes > bytes.len() {
            return Err(Error::CapacityExceeded {
                required: nbytes,
                capacity: bytes.len(),
            }
            .bt());
        }
        self.copy_bytes(&bytes[..nbytes])
    }
}

/// Byte size of `shape` elements of `dtype`, refusing shapes whose size does
/// not fit in `usize`.
pub(super) fn checked_raw_size(shape: &[usize], dtype: DataType) -> Result<usize> {
    let width = dtype.size_of()?;
    shape
        .iter()
        .try_fold(width, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| {
            Error::ShapeOverflow {
                shape: shape.to_vec(),
                dtype,
            }
            .bt()
        })
}
