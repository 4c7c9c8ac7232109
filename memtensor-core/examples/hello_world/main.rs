use std::sync::Arc;

use memtensor_core::{
    Buffer, BufferSlice, DataType, Device, Result, StagingAllocator, Storage, Tensor,
    EXTRA_BUFFER_PAD_SIZE,
};

fn main() -> Result<()> {
    // Accelerator-style tensor: bytes are only reachable through a guard.
    let mut input = Tensor::on_device(&Device::Staging, DataType::Float)?;
    input.set_source_op_name("input");
    input.resize([3, 4])?;
    input.copy_from(&(0..12).map(|i| i as f32).collect::<Vec<_>>())?;
    println!("{}", input.debug_string()?);

    // Same contents on the host.
    let mut host = Tensor::on_device(&Device::Cpu, DataType::Int8)?;
    host.copy(&input)?;
    assert_eq!(host.dtype(), DataType::Float);
    {
        let mut guard = host.map_mut()?;
        for x in guard.as_mut_slice::<f32>()? {
            *x *= 2.;
        }
    }

    // An image tensor and its pitch.
    let mut image = Tensor::new(Arc::new(StagingAllocator), DataType::Float);
    image.resize_image([2, 3, 4], [3, 2])?;
    let pitch = image.map()?.mapped_image_pitch().to_vec();
    println!("image {:?} pitch {pitch:?}", image.image_shape());

    // Two tensors sharing one arena.
    let len = 12 * 4 + EXTRA_BUFFER_PAD_SIZE;
    let arena = Storage::Buffer(Buffer::new(Device::Cpu.allocator()?, 2 * len)?).shared();
    let mut a = Tensor::with_slice(BufferSlice::new(&arena, 0, len)?, DataType::Float);
    let mut b = Tensor::with_slice(BufferSlice::new(&arena, len, len)?, DataType::Float);
    a.copy(&host)?;
    b.copy(&input)?;
    println!("{}", a.debug_string()?);
    println!("{}", b.debug_string()?);
    Ok(())
}
