use std::sync::Arc;

use memtensor_core::{
    cpu_allocator, Buffer, BufferSlice, DataType, Device, Error, Image, StagingAllocator, Storage,
    Tensor, EXTRA_BUFFER_PAD_SIZE,
};

fn shared_buffer(device: &Device, nbytes: usize) -> memtensor_core::SharedStorage {
    Storage::Buffer(Buffer::new(device.allocator().unwrap(), nbytes).unwrap()).shared()
}

#[test]
fn resize_with_buffer_borrows() {
    let external = shared_buffer(&Device::Cpu, 64);
    let mut t = Tensor::default();
    t.resize([100]).unwrap();
    assert!(t.owns_storage());

    t.resize_with_buffer([4, 4], external.clone()).unwrap();
    assert!(!t.owns_storage());
    assert_eq!(t.shape(), &[4, 4]);
    assert_eq!(Arc::strong_count(&external), 2);

    drop(t);
    assert_eq!(Arc::strong_count(&external), 1);
    assert_eq!(external.lock().size(), 64);
}

#[test]
fn resize_with_buffer_checks_capacity() {
    let external = shared_buffer(&Device::Cpu, 16);
    let mut t = Tensor::default();
    let err = t.resize_with_buffer([5], external).unwrap_err();
    assert!(matches!(
        err.inner(),
        Error::CapacityExceeded {
            required: 20,
            capacity: 16
        }
    ));
    assert!(!t.has_storage());
}

#[test]
fn resize_with_buffer_refuses_images() {
    let mut t = Tensor::new(Arc::new(StagingAllocator), DataType::Float);
    t.resize_image([4], [1, 1]).unwrap();
    let err = t
        .resize_with_buffer([4], shared_buffer(&Device::Staging, 64))
        .unwrap_err();
    assert!(matches!(err.inner(), Error::WrongResizePath { .. }));
    assert!(t.has_image());
}

#[test]
fn borrowed_growth_is_visible_to_the_owner() {
    let external = shared_buffer(&Device::Cpu, 8);
    let mut t = Tensor::with_buffer(external.clone(), DataType::Float);
    t.resize([64]).unwrap();
    assert!(!t.owns_storage());
    assert!(external.lock().size() >= 256 + EXTRA_BUFFER_PAD_SIZE);
}

#[test]
fn borrowed_tensors_share_contents() {
    let external = shared_buffer(&Device::Staging, 64);
    let mut writer = Tensor::with_buffer(external.clone(), DataType::Int32);
    writer.reshape([4]).unwrap();
    writer.copy_from(&[5i32, 6, 7, 8]).unwrap();

    let mut reader = Tensor::with_buffer(external, DataType::Int32);
    reader.reshape([4]).unwrap();
    let guard = reader.map().unwrap();
    assert_eq!(guard.as_slice::<i32>().unwrap(), &[5, 6, 7, 8]);
}

#[test]
fn borrowed_image_reports_physical_shape() {
    let image = Image::new(&StagingAllocator, [8, 2], DataType::Float).unwrap();
    assert_eq!(image.image_shape(), [8, 2]);
    assert_eq!(image.size(), 8 * 2 * 4 * 4);
    let t = Tensor::with_buffer(Storage::Image(image).shared(), DataType::Float);
    assert!(t.has_image());
    assert!(!t.owns_storage());
    assert_eq!(
        t.with_storage(|s| s.image_shape()).unwrap(),
        Some([8, 2])
    );

    let mut owned = Tensor::default();
    owned.resize([4]).unwrap();
    assert_eq!(owned.with_storage(|s| s.kind()).unwrap(), "buffer");
    assert_eq!(owned.with_storage(|s| s.image_shape()).unwrap(), None);
}

#[test]
fn slices_partition_a_parent() {
    let len = 64 * 4 + EXTRA_BUFFER_PAD_SIZE;
    let parent = shared_buffer(&Device::Cpu, 2 * len);

    let mut first = Tensor::with_slice(
        BufferSlice::new(&parent, 0, len).unwrap(),
        DataType::Float,
    );
    let mut second = Tensor::with_slice(
        BufferSlice::new(&parent, len, len).unwrap(),
        DataType::Float,
    );
    first.resize([64]).unwrap();
    second.resize([64]).unwrap();
    assert!(!first.owns_storage());
    assert_eq!(second.buffer_offset().unwrap(), len);
    assert_eq!(second.underlying_buffer().unwrap().kind(), "slice");
    assert_eq!(second.capacity().unwrap(), len);

    first.copy_from(&[1f32; 64]).unwrap();
    second.copy_from(&[2f32; 64]).unwrap();

    let whole = Tensor::with_buffer(parent.clone(), DataType::Float);
    let guard = whole.map().unwrap();
    let bytes = guard.as_bytes();
    assert_eq!(&bytes[..4], 1f32.to_ne_bytes());
    assert_eq!(&bytes[len..len + 4], 2f32.to_ne_bytes());
    drop(guard);

    let err = first.resize([65]).unwrap_err();
    assert!(matches!(err.inner(), Error::CapacityExceeded { .. }));
    assert_eq!(first.shape(), &[64]);

    drop(first);
    drop(second);
    drop(whole);
    assert_eq!(Arc::strong_count(&parent), 1);
}

#[test]
fn slices_of_staged_buffers_map_through_the_parent() {
    let parent = shared_buffer(&Device::Staging, 128);
    let slice = BufferSlice::new(&parent, 32, 64).unwrap();
    let mut t = Tensor::with_slice(slice, DataType::UInt8);
    t.reshape([4]).unwrap();
    t.copy_bytes(&[9, 9, 9, 9]).unwrap();
    assert!(!parent.lock().is_mapped());

    let whole = Tensor::with_buffer(parent, DataType::UInt8);
    let guard = whole.map().unwrap();
    assert_eq!(&guard.as_bytes()[32..36], &[9, 9, 9, 9]);
    assert_eq!(guard.as_bytes()[31], 0);
}

#[test]
fn slice_bounds_are_checked() {
    let parent = shared_buffer(&Device::Cpu, 100);
    let err = BufferSlice::new(&parent, 64, 64).unwrap_err();
    assert!(matches!(
        err.inner(),
        Error::SliceOutOfBounds {
            offset: 64,
            len: 64,
            parent: 100
        }
    ));
    assert!(BufferSlice::new(&parent, 36, 64).is_ok());
}

#[test]
fn slices_need_a_linear_parent() {
    let image = Image::new(&StagingAllocator, [2, 2], DataType::Float).unwrap();
    let parent = Storage::Image(image).shared();
    assert!(BufferSlice::new(&parent, 0, 16).is_err());
}

#[test]
fn device_allocators() {
    assert!(Device::Cpu.allocator().unwrap().on_host());
    assert!(!Device::Staging.allocator().unwrap().on_host());
    let t = Tensor::on_device(&Device::Cpu, DataType::Int8).unwrap();
    assert_eq!(t.dtype(), DataType::Int8);
    assert!(Arc::ptr_eq(
        &cpu_allocator(),
        &Device::Cpu.allocator().unwrap()
    ));
}
