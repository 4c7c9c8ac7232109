use std::sync::Arc;

use memtensor_core::{Allocator, DataType, Memory, PoolMetrics, PooledAllocator, Tensor};

#[test]
fn released_tensors_feed_the_pool() {
    let pool = PooledAllocator::new();
    let mut a = Tensor::new(Arc::new(pool.clone()), DataType::Float);
    a.resize([256]).unwrap();
    a.copy_from(&[3f32; 256]).unwrap();
    assert_eq!(pool.idle_blocks(), 0);
    drop(a);
    assert_eq!(pool.idle_blocks(), 1);

    let mut b = Tensor::new(Arc::new(pool.clone()), DataType::Float);
    b.resize([128]).unwrap();
    assert_eq!(pool.idle_blocks(), 0);

    let metrics = pool.metrics();
    assert_eq!(metrics.hits, 1);
    assert_eq!(metrics.misses, 1);
    assert_eq!(metrics.current_size, 0);

    // Reused blocks come back zeroed.
    let guard = b.map().unwrap();
    assert!(guard.as_slice::<f32>().unwrap().iter().all(|&x| x == 0.));
}

#[test]
fn smallest_fit_is_preferred() {
    let pool = PooledAllocator::new();
    let small = pool.allocate(128).unwrap();
    let large = pool.allocate(4096).unwrap();
    drop(large);
    drop(small);
    assert_eq!(pool.idle_blocks(), 2);

    let reused = pool.allocate(100).unwrap();
    assert_eq!(reused.size(), 100);
    assert_eq!(pool.metrics().current_size, 4096);
}

#[test]
fn blocks_over_the_cap_are_dropped() {
    let pool = PooledAllocator::with_capacity(1024);
    drop(pool.allocate(2048).unwrap());
    assert_eq!(
        pool.metrics(),
        PoolMetrics {
            current_size: 0,
            hits: 0,
            misses: 1,
            drops: 1,
        }
    );
}

#[test]
fn idle_bytes_are_trimmed_to_half_the_cap() {
    let pool = PooledAllocator::with_capacity(2048);
    drop(pool.allocate(1500).unwrap());
    assert_eq!(pool.idle_blocks(), 0);
    assert_eq!(pool.metrics().current_size, 0);

    drop(pool.allocate(512).unwrap());
    assert_eq!(pool.idle_blocks(), 1);
    assert_eq!(pool.metrics().current_size, 512);
}
