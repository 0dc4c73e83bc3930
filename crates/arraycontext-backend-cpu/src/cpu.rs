use std::fmt;
use std::sync::Arc;

use arraycontext::backend::{ArrayBackend, Capabilities, ContextId, LeafArray};
use arraycontext::container::TypeKey;
use arraycontext::host::{ArrayData, HostArray};
use arraycontext::ops::{BinaryOp, ComparisonOp, Layout, MemoryOrder, ReduceKind, UnaryOp};
use arraycontext::tag::{untagged_axes, Axis, AxisTaggable, TagSet, Taggable};
use arraycontext::{BackendError, BackendResult, DType, Error, Scalar};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::allocator::{Allocator, SystemAllocator};
use crate::kernels;

/// Array owned by a [`CpuBackend`].
#[derive(Clone)]
pub struct CpuArray {
    data: ArrayData,
    tags: TagSet,
    axes: Arc<[Axis]>,
    context: Option<ContextId>,
}

impl CpuArray {
    pub fn new(data: ArrayData, context: Option<ContextId>) -> Self {
        let axes = untagged_axes(data.shape().len());
        CpuArray {
            data,
            tags: TagSet::new(),
            axes,
            context,
        }
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    fn with_context(&self, context: Option<ContextId>) -> Self {
        CpuArray {
            context,
            ..self.clone()
        }
    }
}

impl fmt::Debug for CpuArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuArray")
            .field("data", &self.data)
            .field("tags", &self.tags)
            .field("context", &self.context)
            .finish()
    }
}

impl Taggable for CpuArray {
    fn tags(&self) -> &TagSet {
        &self.tags
    }

    fn with_tags(&self, tags: TagSet) -> Self {
        CpuArray {
            tags,
            ..self.clone()
        }
    }
}

impl AxisTaggable for CpuArray {
    fn axes(&self) -> &[Axis] {
        &self.axes
    }

    fn with_axes_unchecked(&self, axes: Arc<[Axis]>) -> Self {
        CpuArray {
            axes,
            ..self.clone()
        }
    }
}

impl LeafArray for CpuArray {
    fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    fn dtype(&self) -> DType {
        self.data.dtype()
    }

    fn context_id(&self) -> Option<ContextId> {
        self.context
    }
}

#[arraycontext::linkme::distributed_slice(arraycontext::container::LEAF_TYPES)]
static CPU_ARRAY_LEAF: fn() -> TypeKey = TypeKey::of::<CpuArray>;

/// Deserializable settings for [`CpuBackend`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuBackendConfig {
    /// When `false`, truth values are stored as `int8`.
    pub supports_bool: bool,
    pub supports_nonscalar_broadcasting: bool,
    /// Functions resolvable by name; `None` exposes every unary op.
    pub functions: Option<Vec<String>>,
}

impl Default for CpuBackendConfig {
    fn default() -> Self {
        CpuBackendConfig {
            supports_bool: true,
            supports_nonscalar_broadcasting: true,
            functions: None,
        }
    }
}

/// Eager backend evaluating every operation with [`crate::kernels`].
pub struct CpuBackend {
    id: ContextId,
    config: CpuBackendConfig,
    functions: Vec<UnaryOp>,
    allocator: Arc<dyn Allocator>,
}

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend {
            id: ContextId::fresh(),
            config: CpuBackendConfig::default(),
            functions: UnaryOp::ALL.to_vec(),
            allocator: Arc::new(SystemAllocator),
        }
    }

    /// Backend with `config`; unknown function names fail with an attribute error.
    pub fn with_config(config: CpuBackendConfig) -> Result<Self, Error> {
        Self::with_allocator(config, Arc::new(SystemAllocator))
    }

    pub fn with_allocator(
        config: CpuBackendConfig,
        allocator: Arc<dyn Allocator>,
    ) -> Result<Self, Error> {
        let functions = match &config.functions {
            None => UnaryOp::ALL.to_vec(),
            Some(names) => names
                .iter()
                .map(|name| name.parse::<UnaryOp>())
                .collect::<Result<Vec<_>, _>>()?,
        };
        let id = ContextId::fresh();
        debug!(
            "cpu backend {id}: {} functions, supports_bool={}",
            functions.len(),
            config.supports_bool
        );
        Ok(CpuBackend {
            id,
            config,
            functions,
            allocator,
        })
    }

    pub fn config(&self) -> &CpuBackendConfig {
        &self.config
    }

    pub fn allocator(&self) -> &Arc<dyn Allocator> {
        &self.allocator
    }

    fn logical(&self) -> DType {
        self.capabilities().logical_dtype()
    }

    /// Wraps a freshly computed buffer, charging it to the allocator.
    fn fresh(&self, data: ArrayData) -> BackendResult<CpuArray> {
        self.allocator
            .allocate(data.len() * data.dtype().size_in_bytes())?;
        Ok(CpuArray::new(data, Some(self.id)))
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn dtype_error(op: &'static str, dtype: DType) -> impl FnOnce(Error) -> BackendError {
    move |_| BackendError::dtype_not_supported(op, dtype)
}

impl ArrayBackend for CpuBackend {
    type Array = CpuArray;

    fn backend_name(&self) -> &str {
        "cpu"
    }

    fn context_id(&self) -> ContextId {
        self.id
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            permits_inplace_modification: false,
            permits_advanced_indexing: false,
            supports_nonscalar_broadcasting: self.config.supports_nonscalar_broadcasting,
            supports_bool: self.config.supports_bool,
        }
    }

    fn native_functions(&self) -> &[UnaryOp] {
        &self.functions
    }

    fn fork(&self) -> Self {
        let id = ContextId::fresh();
        debug!("cpu backend {id} forked from {}", self.id);
        CpuBackend {
            id,
            config: self.config.clone(),
            functions: self.functions.clone(),
            allocator: Arc::clone(&self.allocator),
        }
    }

    fn empty(&self, shape: &[usize], dtype: DType) -> BackendResult<CpuArray> {
        self.zeros(shape, dtype)
    }

    fn full(&self, shape: &[usize], dtype: DType, value: Scalar) -> BackendResult<CpuArray> {
        self.fresh(kernels::full(shape, dtype, value))
    }

    fn from_host(&self, host: &HostArray) -> BackendResult<CpuArray> {
        self.fresh(host.data().to_standard_layout())
    }

    fn to_host(&self, array: &CpuArray) -> BackendResult<HostArray> {
        Ok(HostArray::new(array.data.clone()))
    }

    fn freeze(&self, array: &CpuArray) -> BackendResult<CpuArray> {
        Ok(array.with_context(None))
    }

    fn thaw(&self, array: &CpuArray) -> BackendResult<CpuArray> {
        Ok(array.with_context(Some(self.id)))
    }

    fn astype(&self, array: &CpuArray, dtype: DType) -> BackendResult<CpuArray> {
        let converted = self.fresh(array.data.astype(dtype))?;
        Ok(CpuArray {
            tags: array.tags.clone(),
            axes: Arc::clone(&array.axes),
            ..converted
        })
    }

    fn unary(&self, op: UnaryOp, array: &CpuArray) -> BackendResult<CpuArray> {
        let out = op
            .result_dtype(array.dtype(), self.logical())
            .map_err(dtype_error(op.name(), array.dtype()))?;
        self.fresh(kernels::unary(op, &array.data, out))
    }

    fn binary(&self, op: BinaryOp, lhs: &CpuArray, rhs: &CpuArray) -> BackendResult<CpuArray> {
        let out = op.result_dtype(lhs.dtype(), rhs.dtype(), self.logical());
        self.fresh(kernels::binary(op, &lhs.data, &rhs.data, out)?)
    }

    fn compare(
        &self,
        op: ComparisonOp,
        lhs: &CpuArray,
        rhs: &CpuArray,
    ) -> BackendResult<CpuArray> {
        self.fresh(kernels::compare(op, &lhs.data, &rhs.data, self.logical())?)
    }

    fn select(
        &self,
        condition: &CpuArray,
        on_true: &CpuArray,
        on_false: &CpuArray,
    ) -> BackendResult<CpuArray> {
        let out = on_true.dtype().promote(on_false.dtype());
        self.fresh(kernels::select(
            &condition.data,
            &on_true.data,
            &on_false.data,
            out,
        )?)
    }

    fn reduce(&self, kind: ReduceKind, array: &CpuArray, axes: &[usize]) -> BackendResult<CpuArray> {
        let out = kind.result_dtype(array.dtype(), self.logical());
        self.fresh(kernels::reduce(kind, &array.data, axes, out))
    }

    fn vdot(&self, lhs: &CpuArray, rhs: &CpuArray) -> BackendResult<CpuArray> {
        let out = BinaryOp::Multiply.result_dtype(lhs.dtype(), rhs.dtype(), self.logical());
        self.fresh(kernels::vdot(&lhs.data, &rhs.data, out)?)
    }

    fn reshape(
        &self,
        array: &CpuArray,
        shape: &[usize],
        order: MemoryOrder,
    ) -> BackendResult<CpuArray> {
        if order == MemoryOrder::K {
            return Err(BackendError::unimplemented(
                "reshape",
                "order 'K' is not supported by the cpu backend",
            ));
        }
        self.fresh(kernels::reshape(&array.data, shape, order)?)
    }

    fn layout(&self, array: &CpuArray) -> Layout {
        Layout {
            c_contiguous: array.data.is_standard_layout(),
            f_contiguous: array.data.is_fortran_layout(),
        }
    }

    fn transpose(&self, array: &CpuArray, perm: &[usize]) -> BackendResult<CpuArray> {
        Ok(CpuArray::new(
            kernels::transpose(&array.data, perm),
            Some(self.id),
        ))
    }

    fn concatenate(&self, arrays: &[&CpuArray], axis: usize) -> BackendResult<CpuArray> {
        let (inputs, out) = join_inputs(arrays)?;
        self.fresh(kernels::join_arrays(&inputs, axis, false, out)?)
    }

    fn stack(&self, arrays: &[&CpuArray], axis: usize) -> BackendResult<CpuArray> {
        let (inputs, out) = join_inputs(arrays)?;
        self.fresh(kernels::join_arrays(&inputs, axis, true, out)?)
    }

    fn broadcast_to(&self, array: &CpuArray, shape: &[usize]) -> BackendResult<CpuArray> {
        self.fresh(kernels::broadcast_to(&array.data, shape)?)
    }
}

fn join_inputs<'a>(arrays: &[&'a CpuArray]) -> BackendResult<(Vec<&'a ArrayData>, DType)> {
    let first = arrays
        .first()
        .ok_or_else(|| BackendError::execution("need at least one array to join"))?;
    let out = arrays
        .iter()
        .fold(first.dtype(), |acc, array| acc.promote(array.dtype()));
    Ok((arrays.iter().map(|array| &array.data).collect(), out))
}
