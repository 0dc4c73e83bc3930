use std::fmt;
use std::sync::Arc;

use arraycontext::backend::{ArrayBackend, Capabilities, ContextId, LeafArray};
use arraycontext::container::TypeKey;
use arraycontext::env;
use arraycontext::host::HostArray;
use arraycontext::ops::{BinaryOp, ComparisonOp, Layout, MemoryOrder, ReduceKind, UnaryOp};
use arraycontext::shape::{broadcast_shapes, concat_shape, permuted_shape, reduced_shape, stack_shape};
use arraycontext::tag::{untagged_axes, Axis, AxisTaggable, TagSet, Taggable};
use arraycontext::{BackendError, BackendResult, DType, Error, Scalar};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::graph::{evaluate, EvalStats, Node, NodeOp};

/// Functions the expression graph exposes by name.
pub const LAZY_FUNCTIONS: [UnaryOp; 17] = [
    UnaryOp::Abs,
    UnaryOp::Sin,
    UnaryOp::Cos,
    UnaryOp::Tan,
    UnaryOp::Arctan,
    UnaryOp::Sinh,
    UnaryOp::Cosh,
    UnaryOp::Tanh,
    UnaryOp::Exp,
    UnaryOp::Log,
    UnaryOp::Log10,
    UnaryOp::Sqrt,
    UnaryOp::Floor,
    UnaryOp::Ceil,
    UnaryOp::Conj,
    UnaryOp::Negative,
    UnaryOp::LogicalNot,
];

/// Handle to a recorded expression.
#[derive(Clone)]
pub struct LazyArray {
    node: Arc<Node>,
    tags: TagSet,
    axes: Arc<[Axis]>,
    context: Option<ContextId>,
}

impl LazyArray {
    fn new(node: Arc<Node>, context: Option<ContextId>) -> Self {
        let axes = untagged_axes(node.shape().len());
        LazyArray {
            node,
            tags: TagSet::new(),
            axes,
            context,
        }
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Whether the expression already has a value.
    pub fn is_evaluated(&self) -> bool {
        self.node.is_evaluated()
    }

    fn with_node(&self, node: Arc<Node>, context: Option<ContextId>) -> Self {
        LazyArray {
            node,
            context,
            ..self.clone()
        }
    }
}

impl fmt::Debug for LazyArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyArray")
            .field("node", &self.node)
            .field("tags", &self.tags)
            .field("context", &self.context)
            .finish()
    }
}

impl Taggable for LazyArray {
    fn tags(&self) -> &TagSet {
        &self.tags
    }

    fn with_tags(&self, tags: TagSet) -> Self {
        LazyArray {
            tags,
            ..self.clone()
        }
    }
}

impl AxisTaggable for LazyArray {
    fn axes(&self) -> &[Axis] {
        &self.axes
    }

    fn with_axes_unchecked(&self, axes: Arc<[Axis]>) -> Self {
        LazyArray {
            axes,
            ..self.clone()
        }
    }
}

impl LeafArray for LazyArray {
    fn shape(&self) -> &[usize] {
        self.node.shape()
    }

    fn dtype(&self) -> DType {
        self.node.dtype()
    }

    fn context_id(&self) -> Option<ContextId> {
        self.context
    }
}

#[arraycontext::linkme::distributed_slice(arraycontext::container::LEAF_TYPES)]
static LAZY_ARRAY_LEAF: fn() -> TypeKey = TypeKey::of::<LazyArray>;

/// Deserializable settings for [`LazyBackend`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LazyBackendConfig {
    /// Evaluate each node as soon as it is recorded. Defaults to `ARRAYCONTEXT_EAGER`.
    pub eager: bool,
    /// Functions resolvable by name; `None` selects [`LAZY_FUNCTIONS`].
    pub functions: Option<Vec<String>>,
}

impl Default for LazyBackendConfig {
    fn default() -> Self {
        LazyBackendConfig {
            eager: env::eager_enabled(),
            functions: None,
        }
    }
}

/// Backend recording expression graphs and evaluating them at `freeze`/`to_host`.
pub struct LazyBackend {
    id: ContextId,
    config: LazyBackendConfig,
    functions: Vec<UnaryOp>,
    stats: Arc<EvalStats>,
}

fn shape_error(err: Error) -> BackendError {
    BackendError::execution(err.to_string())
}

impl LazyBackend {
    pub fn new() -> Self {
        LazyBackend {
            id: ContextId::fresh(),
            config: LazyBackendConfig::default(),
            functions: LAZY_FUNCTIONS.to_vec(),
            stats: Arc::default(),
        }
    }

    /// Backend with `config`; unknown function names fail with an attribute error.
    pub fn with_config(config: LazyBackendConfig) -> Result<Self, Error> {
        let functions = match &config.functions {
            None => LAZY_FUNCTIONS.to_vec(),
            Some(names) => names
                .iter()
                .map(|name| name.parse::<UnaryOp>())
                .collect::<Result<Vec<_>, _>>()?,
        };
        let id = ContextId::fresh();
        debug!("lazy backend {id}: eager={}", config.eager);
        Ok(LazyBackend {
            id,
            config,
            functions,
            stats: Arc::default(),
        })
    }

    pub fn config(&self) -> &LazyBackendConfig {
        &self.config
    }

    pub fn stats(&self) -> &EvalStats {
        &self.stats
    }

    /// Bool is stored as `int8`.
    fn storage(dtype: DType) -> DType {
        if dtype.is_bool() {
            DType::I8
        } else {
            dtype
        }
    }

    fn logical(&self) -> DType {
        self.capabilities().logical_dtype()
    }

    fn record(&self, op: NodeOp, shape: &[usize], dtype: DType) -> BackendResult<LazyArray> {
        let node = Node::new(op, shape.to_vec(), dtype);
        if self.config.eager {
            evaluate(&node, &self.stats)?;
        }
        Ok(LazyArray::new(node, Some(self.id)))
    }

    /// Evaluates everything `array` depends on.
    fn flush(&self, array: &LazyArray) -> BackendResult<Arc<Node>> {
        if !array.is_evaluated() {
            let pending = array.node.pending();
            debug!("lazy backend {}: flushing {pending} pending nodes", self.id);
            self.stats.record_flush();
        }
        evaluate(&array.node, &self.stats).map(Node::data)
    }
}

impl Default for LazyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ArrayBackend for LazyBackend {
    type Array = LazyArray;

    fn backend_name(&self) -> &str {
        "lazy"
    }

    fn context_id(&self) -> ContextId {
        self.id
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            permits_inplace_modification: false,
            permits_advanced_indexing: false,
            supports_nonscalar_broadcasting: true,
            supports_bool: false,
        }
    }

    fn native_functions(&self) -> &[UnaryOp] {
        &self.functions
    }

    fn fork(&self) -> Self {
        let id = ContextId::fresh();
        debug!("lazy backend {id} forked from {}", self.id);
        LazyBackend {
            id,
            config: self.config.clone(),
            functions: self.functions.clone(),
            stats: Arc::default(),
        }
    }

    fn empty(&self, shape: &[usize], dtype: DType) -> BackendResult<LazyArray> {
        self.zeros(shape, dtype)
    }

    fn full(&self, shape: &[usize], dtype: DType, value: Scalar) -> BackendResult<LazyArray> {
        self.record(NodeOp::Full(value), shape, Self::storage(dtype))
    }

    fn from_host(&self, host: &HostArray) -> BackendResult<LazyArray> {
        let data = host.data().astype(Self::storage(host.dtype()));
        Ok(LazyArray::new(
            Node::data(data.to_standard_layout()),
            Some(self.id),
        ))
    }

    fn to_host(&self, array: &LazyArray) -> BackendResult<HostArray> {
        let node = self.flush(array)?;
        evaluate(&node, &self.stats).map(HostArray::new)
    }

    fn freeze(&self, array: &LazyArray) -> BackendResult<LazyArray> {
        let node = self.flush(array)?;
        Ok(array.with_node(node, None))
    }

    fn thaw(&self, array: &LazyArray) -> BackendResult<LazyArray> {
        Ok(array.with_node(Arc::clone(&array.node), Some(self.id)))
    }

    fn astype(&self, array: &LazyArray, dtype: DType) -> BackendResult<LazyArray> {
        let converted = self.record(
            NodeOp::Astype(Arc::clone(&array.node)),
            array.shape(),
            Self::storage(dtype),
        )?;
        Ok(LazyArray {
            tags: array.tags.clone(),
            axes: Arc::clone(&array.axes),
            ..converted
        })
    }

    fn unary(&self, op: UnaryOp, array: &LazyArray) -> BackendResult<LazyArray> {
        let out = op
            .result_dtype(array.dtype(), self.logical())
            .map_err(|_| BackendError::dtype_not_supported(op.name(), array.dtype()))?;
        self.record(
            NodeOp::Unary(op, Arc::clone(&array.node)),
            array.shape(),
            out,
        )
    }

    fn binary(&self, op: BinaryOp, lhs: &LazyArray, rhs: &LazyArray) -> BackendResult<LazyArray> {
        let shape = broadcast_shapes(&[lhs.shape(), rhs.shape()]).map_err(shape_error)?;
        let out = op.result_dtype(lhs.dtype(), rhs.dtype(), self.logical());
        self.record(
            NodeOp::Binary(op, Arc::clone(&lhs.node), Arc::clone(&rhs.node)),
            &shape,
            out,
        )
    }

    fn compare(
        &self,
        op: ComparisonOp,
        lhs: &LazyArray,
        rhs: &LazyArray,
    ) -> BackendResult<LazyArray> {
        let shape = broadcast_shapes(&[lhs.shape(), rhs.shape()]).map_err(shape_error)?;
        self.record(
            NodeOp::Compare(op, Arc::clone(&lhs.node), Arc::clone(&rhs.node)),
            &shape,
            self.logical(),
        )
    }

    fn select(
        &self,
        condition: &LazyArray,
        on_true: &LazyArray,
        on_false: &LazyArray,
    ) -> BackendResult<LazyArray> {
        let shape = broadcast_shapes(&[condition.shape(), on_true.shape(), on_false.shape()])
            .map_err(shape_error)?;
        let out = on_true.dtype().promote(on_false.dtype());
        self.record(
            NodeOp::Select(
                Arc::clone(&condition.node),
                Arc::clone(&on_true.node),
                Arc::clone(&on_false.node),
            ),
            &shape,
            out,
        )
    }

    fn reduce(
        &self,
        kind: ReduceKind,
        array: &LazyArray,
        axes: &[usize],
    ) -> BackendResult<LazyArray> {
        let shape = reduced_shape(array.shape(), axes);
        let out = kind.result_dtype(array.dtype(), self.logical());
        self.record(
            NodeOp::Reduce(kind, Arc::clone(&array.node), axes.to_vec()),
            &shape,
            out,
        )
    }

    fn vdot(&self, lhs: &LazyArray, rhs: &LazyArray) -> BackendResult<LazyArray> {
        if lhs.size() != rhs.size() {
            return Err(BackendError::execution(format!(
                "vdot operands have different sizes ({} and {})",
                lhs.size(),
                rhs.size()
            )));
        }
        let out = BinaryOp::Multiply.result_dtype(lhs.dtype(), rhs.dtype(), self.logical());
        self.record(
            NodeOp::Vdot(Arc::clone(&lhs.node), Arc::clone(&rhs.node)),
            &[],
            out,
        )
    }

    fn reshape(
        &self,
        array: &LazyArray,
        shape: &[usize],
        order: MemoryOrder,
    ) -> BackendResult<LazyArray> {
        // Graph values have no physical layout; K reads in row-major order.
        let order = match order {
            MemoryOrder::K => MemoryOrder::C,
            other => other,
        };
        self.record(
            NodeOp::Reshape(Arc::clone(&array.node), order),
            shape,
            array.dtype(),
        )
    }

    fn layout(&self, array: &LazyArray) -> Layout {
        Layout::row_major(array.ndim())
    }

    fn transpose(&self, array: &LazyArray, perm: &[usize]) -> BackendResult<LazyArray> {
        let shape = permuted_shape(array.shape(), perm);
        self.record(
            NodeOp::Transpose(Arc::clone(&array.node), perm.to_vec()),
            &shape,
            array.dtype(),
        )
    }

    fn concatenate(&self, arrays: &[&LazyArray], axis: usize) -> BackendResult<LazyArray> {
        let (nodes, shapes, out) = join_inputs(arrays)?;
        let shape = concat_shape(&shapes, axis as isize).map_err(shape_error)?;
        self.record(NodeOp::Concatenate(nodes, axis), &shape, out)
    }

    fn stack(&self, arrays: &[&LazyArray], axis: usize) -> BackendResult<LazyArray> {
        let (nodes, shapes, out) = join_inputs(arrays)?;
        let shape = stack_shape(&shapes, axis as isize).map_err(shape_error)?;
        self.record(NodeOp::Stack(nodes, axis), &shape, out)
    }

    fn broadcast_to(&self, array: &LazyArray, shape: &[usize]) -> BackendResult<LazyArray> {
        self.record(
            NodeOp::BroadcastTo(Arc::clone(&array.node)),
            shape,
            array.dtype(),
        )
    }
}

type JoinInputs<'a> = (Vec<Arc<Node>>, Vec<&'a [usize]>, DType);

fn join_inputs<'a>(arrays: &[&'a LazyArray]) -> BackendResult<JoinInputs<'a>> {
    let first = arrays
        .first()
        .ok_or_else(|| BackendError::execution("need at least one array to join"))?;
    let out = arrays
        .iter()
        .fold(first.dtype(), |acc, array| acc.promote(array.dtype()));
    let nodes = arrays.iter().map(|array| Arc::clone(&array.node)).collect();
    let shapes = arrays.iter().map(|array| array.shape()).collect();
    Ok((nodes, shapes, out))
}
