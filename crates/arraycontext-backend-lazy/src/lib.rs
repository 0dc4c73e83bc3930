pub mod graph;
pub mod lazy;

pub use graph::{EvalStats, Node};
pub use lazy::{LazyArray, LazyBackend, LazyBackendConfig};

use arraycontext::ArrayContext;

/// Context over a default [`LazyBackend`].
pub fn lazy_context() -> ArrayContext<LazyBackend> {
    ArrayContext::new(LazyBackend::new())
}
