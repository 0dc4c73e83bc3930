//! Backend contract: the leaf-level operations an array engine provides.
//!
//! Backends see normalized arguments only. Axis normalization, broadcasting checks,
//! order resolution and context binding happen in [`crate::ArrayContext`] before a
//! backend method is invoked.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::container::Scalar;
use crate::dtype::DType;
use crate::host::HostArray;
use crate::ops::{BinaryOp, ComparisonOp, Layout, MemoryOrder, ReduceKind, UnaryOp};
use crate::tag::AxisTaggable;

/// Failures reported by backend routines.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendError {
    /// The backend declines the operation or flag combination.
    Unimplemented { op: &'static str, reason: String },
    Execution { message: String },
    DTypeNotSupported { op: &'static str, dtype: DType },
}

impl BackendError {
    pub fn unimplemented(op: &'static str, reason: impl Into<String>) -> Self {
        BackendError::Unimplemented {
            op,
            reason: reason.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution {
            message: message.into(),
        }
    }

    pub fn dtype_not_supported(op: &'static str, dtype: DType) -> Self {
        BackendError::DTypeNotSupported { op, dtype }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Unimplemented { op, reason } => {
                write!(f, "{op} is not implemented: {reason}")
            }
            BackendError::Execution { message } => {
                write!(f, "backend execution failure: {message}")
            }
            BackendError::DTypeNotSupported { op, dtype } => {
                write!(f, "{op} does not support dtype {dtype}")
            }
        }
    }
}

impl std::error::Error for BackendError {}

/// Convenience alias for results returned by backend routines.
pub type BackendResult<T> = Result<T, BackendError>;

/// Feature flags a backend advertises to numerical code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub permits_inplace_modification: bool,
    pub permits_advanced_indexing: bool,
    pub supports_nonscalar_broadcasting: bool,
    /// When `false`, truth values are stored as `int8`.
    pub supports_bool: bool,
}

impl Capabilities {
    /// Dtype of comparison and logical results.
    pub fn logical_dtype(&self) -> DType {
        if self.supports_bool {
            DType::Bool
        } else {
            DType::I8
        }
    }
}

/// Identity of one context instance; leaves record the context they are bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    pub fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ContextId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// A backend-owned array.
pub trait LeafArray: AxisTaggable + Clone + fmt::Debug + Send + Sync + 'static {
    fn shape(&self) -> &[usize];

    fn dtype(&self) -> DType;

    /// Context the array is bound to; `None` once frozen.
    fn context_id(&self) -> Option<ContextId>;

    fn ndim(&self) -> usize {
        self.shape().len()
    }

    fn size(&self) -> usize {
        self.shape().iter().product()
    }

    fn is_frozen(&self) -> bool {
        self.context_id().is_none()
    }
}

/// Array engine driven by an [`crate::ArrayContext`].
///
/// Operations produce untagged arrays bound to this backend's context; only `freeze`,
/// `thaw` and `astype` carry tags over from their input.
pub trait ArrayBackend: Send + Sync + 'static {
    type Array: LeafArray;

    /// Returns a human-readable backend identifier (e.g., `"cpu"`, `"lazy"`).
    fn backend_name(&self) -> &str;

    fn context_id(&self) -> ContextId;

    fn capabilities(&self) -> Capabilities;

    /// Unary functions the namespace exposes by name.
    fn native_functions(&self) -> &[UnaryOp];

    /// Independent instance with the same configuration and a fresh context id.
    fn fork(&self) -> Self
    where
        Self: Sized;

    fn empty(&self, shape: &[usize], dtype: DType) -> BackendResult<Self::Array>;

    fn full(&self, shape: &[usize], dtype: DType, value: Scalar) -> BackendResult<Self::Array>;

    fn zeros(&self, shape: &[usize], dtype: DType) -> BackendResult<Self::Array> {
        self.full(shape, dtype, Scalar::Int(0))
    }

    fn from_host(&self, host: &HostArray) -> BackendResult<Self::Array>;

    /// Copies to the host; a synchronization barrier.
    fn to_host(&self, array: &Self::Array) -> BackendResult<HostArray>;

    /// Detaches `array` from the context; a synchronization barrier.
    fn freeze(&self, array: &Self::Array) -> BackendResult<Self::Array>;

    /// Binds a frozen array to this context.
    fn thaw(&self, array: &Self::Array) -> BackendResult<Self::Array>;

    fn astype(&self, array: &Self::Array, dtype: DType) -> BackendResult<Self::Array>;

    fn unary(&self, op: UnaryOp, array: &Self::Array) -> BackendResult<Self::Array>;

    /// Broadcasting binary op; shapes are already known to be compatible.
    fn binary(
        &self,
        op: BinaryOp,
        lhs: &Self::Array,
        rhs: &Self::Array,
    ) -> BackendResult<Self::Array>;

    fn compare(
        &self,
        op: ComparisonOp,
        lhs: &Self::Array,
        rhs: &Self::Array,
    ) -> BackendResult<Self::Array>;

    fn select(
        &self,
        condition: &Self::Array,
        on_true: &Self::Array,
        on_false: &Self::Array,
    ) -> BackendResult<Self::Array>;

    /// Reduces over `axes` (sorted, unique, in range).
    fn reduce(
        &self,
        kind: ReduceKind,
        array: &Self::Array,
        axes: &[usize],
    ) -> BackendResult<Self::Array>;

    /// Conjugated dot product of two equally sized arrays, as a 0-d array.
    fn vdot(&self, lhs: &Self::Array, rhs: &Self::Array) -> BackendResult<Self::Array>;

    /// `order` is `C`, `F` or `K`; `A` is resolved by the caller.
    fn reshape(
        &self,
        array: &Self::Array,
        shape: &[usize],
        order: MemoryOrder,
    ) -> BackendResult<Self::Array>;

    fn layout(&self, array: &Self::Array) -> Layout;

    fn transpose(&self, array: &Self::Array, perm: &[usize]) -> BackendResult<Self::Array>;

    fn concatenate(&self, arrays: &[&Self::Array], axis: usize) -> BackendResult<Self::Array>;

    fn stack(&self, arrays: &[&Self::Array], axis: usize) -> BackendResult<Self::Array>;

    fn broadcast_to(&self, array: &Self::Array, shape: &[usize]) -> BackendResult<Self::Array>;
}
