use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use arraycontext::{BackendError, BackendResult};

/// Accounting hook consulted before the backend materializes a result buffer.
///
/// A context and every context forked from it share one allocator.
pub trait Allocator: Send + Sync + fmt::Debug {
    /// Records a buffer of `bytes`; an error refuses the allocation.
    fn allocate(&self, bytes: usize) -> BackendResult<()>;
}

/// Accepts every allocation.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl Allocator for SystemAllocator {
    fn allocate(&self, _bytes: usize) -> BackendResult<()> {
        Ok(())
    }
}

/// Counts allocations, optionally refusing past a byte budget.
#[derive(Debug, Default)]
pub struct CountingAllocator {
    allocations: AtomicUsize,
    bytes: AtomicUsize,
    limit: Option<usize>,
}

impl CountingAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        CountingAllocator {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> usize {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl Allocator for CountingAllocator {
    fn allocate(&self, bytes: usize) -> BackendResult<()> {
        let total = self.bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        if let Some(limit) = self.limit {
            if total > limit {
                self.bytes.fetch_sub(bytes, Ordering::Relaxed);
                return Err(BackendError::execution(format!(
                    "allocation of {bytes} bytes exceeds the {limit} byte budget"
                )));
            }
        }
        self.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
