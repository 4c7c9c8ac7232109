mod debug;
mod guard;
mod handle;
mod resize;

pub use guard::{MappingGuard, MappingGuardMut};
pub use handle::Tensor;

/// Extra bytes appended to every buffer a tensor grows, so wide vector loads
/// at the tail of the last dimension stay inside the allocation.
#[cfg(any(feature = "tail-pad", target_arch = "aarch64"))]
pub const EXTRA_BUFFER_PAD_SIZE: usize = 64;
#[cfg(not(any(feature = "tail-pad", target_arch = "aarch64")))]
pub const EXTRA_BUFFER_PAD_SIZE: usize = 0;

/// Copies at least this large are split across the rayon pool.
pub const PARALLEL_COPY_THRESHOLD: usize = 1 << 20;

const PARALLEL_COPY_CHUNK: usize = 64 * 1024;
