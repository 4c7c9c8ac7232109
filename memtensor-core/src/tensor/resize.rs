use parking_lot::Mutex;
use tracing::debug;

use super::{
    handle::{checked_raw_size, Binding},
    Tensor, EXTRA_BUFFER_PAD_SIZE,
};
use crate::{
    storage::{Buffer, Image, SharedStorage, Storage},
    Error, Result,
};

// Every entry point validates before committing: on error the tensor keeps its
// previous shape, image shape and binding.
impl Tensor {
    fn raw_size_of(&self, shape: &[usize]) -> Result<usize> {
        checked_raw_size(shape, self.dtype)
    }

    fn image_bound(&self) -> bool {
        self.binding
            .cell()
            .is_some_and(|storage| storage.lock().is_image())
    }

    /// Replace owned storage through `build`, which sees the tensor unbound.
    /// The old storage is only released once `build` succeeds.
    fn rebind_owned(&mut self, build: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        let previous = std::mem::replace(&mut self.binding, Binding::Unbound);
        if let Err(e) = build(self) {
            self.binding = previous;
            return Err(e);
        }
        debug!(name = %self.name, "released owned storage of the other kind");
        Ok(())
    }

    /// Set the shape, growing linear storage when it is too small.
    ///
    /// Unbound tensors allocate `raw_size + EXTRA_BUFFER_PAD_SIZE` bytes and
    /// own them. Bound storage is grown, never shrunk; growth invalidates raw
    /// pointers taken earlier.
    pub fn resize(&mut self, shape: impl Into<Vec<usize>>) -> Result<()> {
        let shape = shape.into();
        let needed = self
            .raw_size_of(&shape)?
            .checked_add(EXTRA_BUFFER_PAD_SIZE)
            .ok_or_else(|| {
                Error::ShapeOverflow {
                    shape: shape.clone(),
                    dtype: self.dtype,
                }
                .bt()
            })?;
        match self.binding.cell() {
            None => {
                let allocator = self
                    .allocator
                    .clone()
                    .ok_or_else(|| Error::NoAllocator.bt())?;
                let buffer = Buffer::new(allocator, needed)?;
                debug!(name = %self.name, ?shape, nbytes = needed, "allocated tensor buffer");
                self.binding = Binding::Owned(Mutex::new(Storage::Buffer(buffer)));
            }
            Some(storage) => grow(&mut storage.lock(), needed)?,
        }
        self.shape = shape;
        self.image_shape.clear();
        Ok(())
    }

    /// Change the logical shape without touching storage.
    pub fn reshape(&mut self, shape: impl Into<Vec<usize>>) -> Result<()> {
        let shape = shape.into();
        let required = self.raw_size_of(&shape)?;
        let capacity = self.capacity()?;
        if required > capacity {
            return Err(Error::CapacityExceeded { required, capacity }.bt());
        }
        self.shape = shape;
        Ok(())
    }

    /// Rebind to `buffer`, releasing owned storage first. The result is
    /// always borrowed.
    pub fn resize_with_buffer(
        &mut self,
        shape: impl Into<Vec<usize>>,
        buffer: SharedStorage,
    ) -> Result<()> {
        if self.image_bound() {
            return Err(wrong_path("resize_with_buffer", "image", "resize_image"));
        }
        let shape = shape.into();
        let required = self.raw_size_of(&shape)?;
        let capacity = buffer.lock().size();
        if required > capacity {
            return Err(Error::CapacityExceeded { required, capacity }.bt());
        }
        debug!(name = %self.name, ?shape, "rebinding tensor to external buffer");
        self.binding = Binding::Borrowed(buffer);
        self.shape = shape;
        self.image_shape.clear();
        Ok(())
    }

    /// Set the shape of an image-backed tensor.
    ///
    /// Unbound tensors create an image of `image_shape`. Existing images are
    /// reused when they are at least `image_shape` on both axes; they cannot
    /// grow.
    pub fn resize_image(
        &mut self,
        shape: impl Into<Vec<usize>>,
        image_shape: [usize; 2],
    ) -> Result<()> {
        let shape = shape.into();
        let required = self.raw_size_of(&shape)?;
        match self.binding.cell() {
            None => {
                let allocator = self
                    .allocator
                    .clone()
                    .ok_or_else(|| Error::NoAllocator.bt())?;
                let image = Image::new(allocator.as_ref(), image_shape, self.dtype)?;
                if required > image.size() {
                    return Err(Error::CapacityExceeded {
                        required,
                        capacity: image.size(),
                    }
                    .bt());
                }
                debug!(name = %self.name, ?shape, ?image_shape, "allocated tensor image");
                self.binding = Binding::Owned(Mutex::new(Storage::Image(image)));
            }
            Some(storage) => check_image(&storage.lock(), &self.name, image_shape, required)?,
        }
        self.shape = shape;
        self.image_shape = image_shape.to_vec();
        Ok(())
    }

    /// Take on `other`'s shape and storage kind.
    ///
    /// Owned storage of the wrong kind is replaced; on failure the tensor keeps
    /// its previous storage.
    pub fn resize_like(&mut self, other: &Tensor) -> Result<()> {
        let shape = other.shape.clone();
        if other.image_bound() {
            let image_shape = match other.image_shape[..] {
                [w, h] => [w, h],
                _ => other
                    .with_storage(|s| s.image_shape())?
                    .ok_or_else(|| Error::msg("image tensor without an image shape"))?,
            };
            if self.owns_storage() && !self.image_bound() {
                self.rebind_owned(|t| t.resize_image(shape, image_shape))
            } else {
                self.resize_image(shape, image_shape)
            }
        } else if self.owns_storage() && self.image_bound() {
            self.rebind_owned(|t| t.resize(shape))
        } else {
            self.resize(shape)
        }
    }
}

fn grow(storage: &mut Storage, needed: usize) -> Result<()> {
    if storage.is_image() {
        return Err(wrong_path("resize", "image", "resize_image"));
    }
    if needed > storage.size() {
        storage.resize(needed)?;
    }
    Ok(())
}

fn check_image(storage: &Storage, name: &str, logical: [usize; 2], required: usize) -> Result<()> {
    let Some(physical) = storage.image_shape() else {
        return Err(wrong_path("resize_image", storage.kind(), "resize"));
    };
    if logical[0] > physical[0] || logical[1] > physical[1] {
        return Err(Error::ImageBounds {
            name: name.to_string(),
            physical,
            logical,
        }
        .bt());
    }
    if required > storage.size() {
        return Err(Error::CapacityExceeded {
            required,
            capacity: storage.size(),
        }
        .bt());
    }
    Ok(())
}

fn wrong_path(op: &'static str, kind: &'static str, hint: &'static str) -> Error {
    Error::WrongResizePath { op, kind, hint }.bt()
}
