pub mod allocator;
pub mod cpu;
pub mod kernels;

pub use allocator::{Allocator, CountingAllocator, SystemAllocator};
pub use cpu::{CpuArray, CpuBackend, CpuBackendConfig};

use arraycontext::ArrayContext;

/// Context over a default [`CpuBackend`].
pub fn cpu_context() -> ArrayContext<CpuBackend> {
    ArrayContext::new(CpuBackend::new())
}
