extern crate self as arraycontext;

pub use linkme;

pub mod backend;
pub mod container;
pub mod context;
pub mod dtype;
pub mod env;
pub mod error;
pub mod host;
pub mod namespace;
pub mod ops;
pub mod shape;
pub mod tag;

pub use arraycontext_macros::ArrayContainer;
pub use backend::{ArrayBackend, BackendError, BackendResult, Capabilities, ContextId, LeafArray};
pub use container::{Key, Scalar, Value};
pub use context::ArrayContext;
pub use dtype::DType;
pub use error::{Error, Result};
pub use host::{ArrayData, HostArray};
pub use namespace::Namespace;
pub use ops::{MemoryOrder, NormOrd};
pub use tag::{Axis, AxisTaggable, Tag, TagSet, Taggable};
