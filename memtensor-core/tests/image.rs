use std::sync::Arc;

use memtensor_core::{
    cpu_allocator, DataType, Error, Image, Storage, StagingAllocator, Tensor, IMAGE_ROW_ALIGNMENT,
};

fn staged(dtype: DataType) -> Tensor {
    Tensor::new(Arc::new(StagingAllocator), dtype)
}

#[test]
fn resize_image_within_physical_bounds() {
    let image = Image::new(&StagingAllocator, [64, 64], DataType::Float).unwrap();
    let storage = Storage::Image(image).shared();
    let mut t = Tensor::with_buffer(storage, DataType::Float);
    t.set_source_op_name("conv1");

    t.resize_image([10, 10, 3], [8, 8]).unwrap();
    assert_eq!(t.shape(), &[10, 10, 3]);
    assert_eq!(t.image_shape(), &[8, 8]);
    assert!(t.has_image());
    assert!(!t.has_buffer());

    let err = t.resize_image([10, 10, 3], [100, 100]).unwrap_err();
    match err.inner() {
        Error::ImageBounds {
            name,
            physical,
            logical,
        } => {
            assert_eq!(name, "conv1");
            assert_eq!(*physical, [64, 64]);
            assert_eq!(*logical, [100, 100]);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(t.image_shape(), &[8, 8]);
}

#[test]
fn shrinking_reuses_the_image() {
    let mut t = staged(DataType::Float);
    t.resize_image([4, 4, 4], [4, 4]).unwrap();
    assert!(t.owns_storage());
    let capacity = t.capacity().unwrap();

    t.resize_image([2, 2, 4], [2, 2]).unwrap();
    assert_eq!(t.shape(), &[2, 2, 4]);
    assert_eq!(t.capacity().unwrap(), capacity);

    assert!(t.resize_image([4, 4, 4], [4, 5]).is_err());
    assert!(t.resize_image([4, 4, 4], [5, 4]).is_err());
    assert!(t.resize_image([4, 4, 4], [4, 4]).is_ok());
}

#[test]
fn image_too_small_for_shape() {
    let mut t = staged(DataType::Float);
    let err = t.resize_image([100], [2, 2]).unwrap_err();
    assert!(matches!(err.inner(), Error::CapacityExceeded { .. }));
    assert!(!t.has_storage());
}

#[test]
fn resize_on_image_is_refused() {
    let mut t = staged(DataType::Float);
    t.resize_image([2, 2], [1, 1]).unwrap();
    let err = t.resize([4]).unwrap_err();
    assert!(matches!(err.inner(), Error::WrongResizePath { .. }));
    assert_eq!(t.shape(), &[2, 2]);
    assert_eq!(t.image_shape(), &[1, 1]);
}

#[test]
fn resize_image_on_buffer_is_refused() {
    let mut t = staged(DataType::Float);
    t.resize([16]).unwrap();
    let err = t.resize_image([16], [1, 4]).unwrap_err();
    assert!(matches!(err.inner(), Error::WrongResizePath { .. }));
    assert!(t.image_shape().is_empty());
}

#[test]
fn host_allocator_has_no_images() {
    let mut t = Tensor::new(cpu_allocator(), DataType::Float);
    let err = t.resize_image([4], [1, 1]).unwrap_err();
    assert!(matches!(err.inner(), Error::ImageUnsupported));
}

#[test]
fn mapping_reports_pitch() {
    let mut t = staged(DataType::Float);
    t.resize_image([3, 4], [3, 1]).unwrap();
    let guard = t.map().unwrap();
    let row_pitch = (3 * 4 * size_of::<f32>()).next_multiple_of(IMAGE_ROW_ALIGNMENT);
    assert_eq!(guard.mapped_image_pitch(), &[row_pitch, row_pitch]);
}

#[test]
fn buffer_mapping_has_no_pitch() {
    let mut t = staged(DataType::Float);
    t.resize([4]).unwrap();
    assert!(t.has_buffer());
    let guard = t.map().unwrap();
    assert!(guard.mapped_image_pitch().is_empty());
}

#[test]
fn resize_like_switches_storage_kind() {
    let mut image = staged(DataType::Float);
    image.resize_image([2, 8], [1, 4]).unwrap();
    let mut linear = staged(DataType::Float);
    linear.resize([3, 3]).unwrap();

    let mut t = staged(DataType::Float);
    t.resize([100]).unwrap();
    assert!(!t.has_image());

    t.resize_like(&image).unwrap();
    assert!(t.has_image());
    assert!(t.owns_storage());
    assert_eq!(t.shape(), &[2, 8]);
    assert_eq!(t.image_shape(), &[1, 4]);

    t.resize_like(&linear).unwrap();
    assert!(!t.has_image());
    assert!(t.image_shape().is_empty());
    assert_eq!(t.shape(), &[3, 3]);
}

#[test]
fn copy_image_tensor() {
    let mut a = staged(DataType::Float);
    a.resize_image([4, 4], [1, 4]).unwrap();
    let values: Vec<f32> = (0..16).map(|i| i as f32 * 0.5).collect();
    a.copy_from(&values).unwrap();

    let mut b = staged(DataType::UInt8);
    b.copy(&a).unwrap();
    assert_eq!(b.dtype(), DataType::Float);
    assert!(b.has_image());
    assert_eq!(b.image_shape(), &[1, 4]);

    let ga = a.map().unwrap();
    let gb = b.map().unwrap();
    let n = a.raw_size().unwrap();
    assert_eq!(&ga.as_bytes()[..n], &gb.as_bytes()[..n]);
    assert_eq!(gb.as_slice::<f32>().unwrap(), values.as_slice());
}

#[test]
fn copy_image_needs_image_capable_allocator() {
    let mut a = staged(DataType::Float);
    a.resize_image([4], [1, 1]).unwrap();

    let mut b = Tensor::new(cpu_allocator(), DataType::Int8);
    b.resize([8]).unwrap();
    b.copy_from(&[1i8, 2, 3, 4, 5, 6, 7, 8]).unwrap();
    let err = b.copy(&a).unwrap_err();
    assert!(matches!(err.inner(), Error::ImageUnsupported));
    assert_eq!(b.dtype(), DataType::Int8);
    assert!(b.has_storage());
    assert!(b.owns_storage());
    assert_eq!(b.shape(), &[8]);
    let guard = b.map().unwrap();
    assert_eq!(guard.as_slice::<i8>().unwrap(), &[1, 2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn failed_resize_like_keeps_storage() {
    let mut image = staged(DataType::Float);
    image.resize_image([4], [1, 1]).unwrap();

    let mut t = Tensor::new(cpu_allocator(), DataType::Float);
    t.resize([8]).unwrap();
    let capacity = t.capacity().unwrap();
    assert!(t.resize_like(&image).is_err());
    assert!(t.has_storage());
    assert!(!t.has_image());
    assert_eq!(t.shape(), &[8]);
    assert_eq!(t.capacity().unwrap(), capacity);

    t.copy_from(&[3f32; 8]).unwrap();
    assert!(t.resize_like(&image).is_err());
    let guard = t.map().unwrap();
    assert_eq!(guard.as_slice::<f32>().unwrap(), &[3f32; 8]);
}

#[test]
fn every_texel_is_reachable_through_the_pitch() {
    let (width, height) = (3, 2);
    let texel = 4 * size_of::<f32>();
    let mut t = staged(DataType::Float);
    t.resize_image([height, width, 4], [width, height]).unwrap();

    {
        let mut guard = t.map_mut().unwrap();
        let row_pitch = guard.mapped_image_pitch()[0];
        assert_eq!(guard.mapped_image_pitch()[1], row_pitch * height);
        assert_eq!(guard.as_bytes().len(), row_pitch * height);

        let last = row_pitch * (height - 1) + (width - 1) * texel;
        let bytes = guard.as_bytes_mut();
        bytes[last..last + texel].copy_from_slice(bytemuck::cast_slice(&[9f32; 4]));
    }

    {
        let guard = t.map().unwrap();
        let row_pitch = guard.mapped_image_pitch()[0];
        let last = row_pitch * (height - 1) + (width - 1) * texel;
        let texels: &[f32] = bytemuck::cast_slice(&guard.as_bytes()[last..last + texel]);
        assert_eq!(texels, &[9., 9., 9., 9.]);
    }

    t.clear().unwrap();
    let guard = t.map().unwrap();
    assert!(guard.as_bytes().iter().all(|&b| b == 0));
}
