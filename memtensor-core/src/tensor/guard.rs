use std::{
    marker::PhantomData,
    ops::Deref,
    ptr::NonNull,
};

use parking_lot::Mutex;
use tracing::warn;

use super::Tensor;
use crate::{
    storage::{Access, Storage},
    DType, Error, Result,
};

/// Keeps a tensor's storage host visible for the guard's lifetime.
///
/// Acquisition maps the storage; dropping the guard unmaps it exactly once,
/// on every exit path. Moving the guard moves that obligation with it. For host
/// storage both steps are pass-through.
///
/// Read guards over one storage coexist, also across tensors borrowing it. They
/// are refused while a [`MappingGuardMut`] over the same bytes is live.
pub struct MappingGuard<'a> {
    storage: Option<&'a Mutex<Storage>>,
    ptr: NonNull<u8>,
    len: usize,
    elements: usize,
    mapped_image_pitch: Vec<usize>,
}

impl<'a> MappingGuard<'a> {
    /// Guard over nothing; unmaps nothing.
    pub fn none() -> Self {
        Self {
            storage: None,
            ptr: NonNull::dangling(),
            len: 0,
            elements: 0,
            mapped_image_pitch: vec![],
        }
    }

    /// Map `tensor` for reading when present. A present tensor must have
    /// storage.
    pub fn new(tensor: Option<&'a Tensor>) -> Result<Self> {
        Self::with_access(tensor, Access::Read)
    }

    fn with_access(tensor: Option<&'a Tensor>, access: Access) -> Result<Self> {
        let Some(tensor) = tensor else {
            return Ok(Self::none());
        };
        let storage = tensor
            .binding
            .cell()
            .ok_or_else(|| Error::NullStorage.bt())?;
        let (region, len) = {
            let mut locked = storage.lock();
            (locked.map(access)?, locked.size())
        };
        Ok(Self {
            storage: Some(storage),
            ptr: region.ptr,
            len,
            elements: tensor.size(),
            mapped_image_pitch: region.pitch,
        })
    }

    /// Physical pitch in bytes: `[row_pitch, slice_pitch]` for images, empty
    /// for linear storage.
    pub fn mapped_image_pitch(&self) -> &[usize] {
        &self.mapped_image_pitch
    }

    pub fn is_mapped(&self) -> bool {
        self.storage.is_some()
    }

    /// The whole storage capacity.
    pub fn as_bytes(&self) -> &[u8] {
        if self.storage.is_none() {
            return &[];
        }
        // SAFETY: the mapping is valid for `len` bytes until this guard drops.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// The tensor's elements as `T`. The element type is not checked against
    /// the tensor's tag.
    pub fn as_slice<T: DType>(&self) -> Result<&[T]> {
        let bytes = element_bytes::<T>(self.as_bytes(), self.elements)?;
        bytemuck::try_cast_slice(bytes).map_err(|_| misaligned::<T>(bytes))
    }
}

impl Drop for MappingGuard<'_> {
    fn drop(&mut self) {
        if let Some(storage) = self.storage.take() {
            if let Err(e) = storage.lock().unmap() {
                warn!("failed to unmap storage: {e}");
            }
        }
    }
}

/// A [`MappingGuard`] that also grants write access.
///
/// The mapping is exclusive: it is refused with [`Error::MapConflict`] while any
/// other guard maps the same storage, or the parent of a slice.
pub struct MappingGuardMut<'a> {
    inner: MappingGuard<'a>,
    _tensor: PhantomData<&'a mut Tensor>,
}

impl<'a> MappingGuardMut<'a> {
    pub(super) fn new(tensor: &'a mut Tensor) -> Result<Self> {
        Ok(Self {
            inner: MappingGuard::with_access(Some(&*tensor), Access::Write)?,
            _tensor: PhantomData,
        })
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        if self.inner.storage.is_none() {
            return &mut [];
        }
        // SAFETY: as for `as_bytes`. The write mapping is exclusive, so no
        // other guard can view these bytes while this borrow lives.
        unsafe { std::slice::from_raw_parts_mut(self.inner.ptr.as_ptr(), self.inner.len) }
    }

    pub fn as_mut_slice<T: DType>(&mut self) -> Result<&mut [T]> {
        let elements = self.inner.elements;
        let bytes = element_bytes_mut::<T>(self.as_bytes_mut(), elements)?;
        let addr = bytes.as_ptr() as usize;
        bytemuck::try_cast_slice_mut(bytes).map_err(|_| {
            Error::Misaligned {
                addr,
                dtype: T::NAME,
            }
            .bt()
        })
    }
}

impl<'a> Deref for MappingGuardMut<'a> {
    type Target = MappingGuard<'a>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

fn element_bytes<T: DType>(bytes: &[u8], elements: usize) -> Result<&[u8]> {
    let nbytes = elements * size_of::<T>();
    bytes.get(..nbytes).ok_or_else(|| {
        Error::CapacityExceeded {
            required: nbytes,
            capacity: bytes.len(),
        }
        .bt()
    })
}

fn element_bytes_mut<T: DType>(bytes: &mut [u8], elements: usize) -> Result<&mut [u8]> {
    let nbytes = elements * size_of::<T>();
    let capacity = bytes.len();
    bytes.get_mut(..nbytes).ok_or_else(|| {
        Error::CapacityExceeded {
            required: nbytes,
            capacity,
        }
        .bt()
    })
}

fn misaligned<T: DType>(bytes: &[u8]) -> Error {
    Error::Misaligned {
        addr: bytes.as_ptr() as usize,
        dtype: T::NAME,
    }
    .bt()
}
