//! Expression nodes recorded by the lazy backend and their memoized evaluation.
//!
//! Each node knows its shape and dtype when it is recorded; its value is computed at most
//! once, on the first flush that reaches it, using the CPU kernels. A computed node drops
//! its operation, and with it the references to its inputs, so only live handles keep
//! intermediate buffers alive.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use arraycontext::host::ArrayData;
use arraycontext::ops::{BinaryOp, ComparisonOp, MemoryOrder, ReduceKind, UnaryOp};
use arraycontext::{BackendError, BackendResult, DType, Scalar};
use arraycontext_backend_cpu::kernels;
use log::trace;

/// Operation producing a node from its inputs.
#[derive(Debug)]
pub(crate) enum NodeOp {
    Full(Scalar),
    Astype(Arc<Node>),
    Unary(UnaryOp, Arc<Node>),
    Binary(BinaryOp, Arc<Node>, Arc<Node>),
    Compare(ComparisonOp, Arc<Node>, Arc<Node>),
    Select(Arc<Node>, Arc<Node>, Arc<Node>),
    Reduce(ReduceKind, Arc<Node>, Vec<usize>),
    Vdot(Arc<Node>, Arc<Node>),
    Reshape(Arc<Node>, MemoryOrder),
    Transpose(Arc<Node>, Vec<usize>),
    Concatenate(Vec<Arc<Node>>, usize),
    Stack(Vec<Arc<Node>>, usize),
    BroadcastTo(Arc<Node>),
}

impl NodeOp {
    fn name(&self) -> &'static str {
        match self {
            NodeOp::Full(_) => "full",
            NodeOp::Astype(_) => "astype",
            NodeOp::Unary(op, _) => op.name(),
            NodeOp::Binary(op, _, _) => op.name(),
            NodeOp::Compare(op, _, _) => op.name(),
            NodeOp::Select(..) => "where",
            NodeOp::Reduce(kind, _, _) => kind.name(),
            NodeOp::Vdot(..) => "vdot",
            NodeOp::Reshape(..) => "reshape",
            NodeOp::Transpose(..) => "transpose",
            NodeOp::Concatenate(..) => "concatenate",
            NodeOp::Stack(..) => "stack",
            NodeOp::BroadcastTo(_) => "broadcast_to",
        }
    }

    fn inputs(&self) -> Vec<&Arc<Node>> {
        match self {
            NodeOp::Full(_) => Vec::new(),
            NodeOp::Astype(a)
            | NodeOp::Unary(_, a)
            | NodeOp::Reduce(_, a, _)
            | NodeOp::Reshape(a, _)
            | NodeOp::Transpose(a, _)
            | NodeOp::BroadcastTo(a) => vec![a],
            NodeOp::Binary(_, a, b) | NodeOp::Compare(_, a, b) | NodeOp::Vdot(a, b) => {
                vec![a, b]
            }
            NodeOp::Select(c, t, f) => vec![c, t, f],
            NodeOp::Concatenate(inputs, _) | NodeOp::Stack(inputs, _) => inputs.iter().collect(),
        }
    }

    fn into_inputs(self) -> Vec<Arc<Node>> {
        match self {
            NodeOp::Full(_) => Vec::new(),
            NodeOp::Astype(a)
            | NodeOp::Unary(_, a)
            | NodeOp::Reduce(_, a, _)
            | NodeOp::Reshape(a, _)
            | NodeOp::Transpose(a, _)
            | NodeOp::BroadcastTo(a) => vec![a],
            NodeOp::Binary(_, a, b) | NodeOp::Compare(_, a, b) | NodeOp::Vdot(a, b) => {
                vec![a, b]
            }
            NodeOp::Select(c, t, f) => vec![c, t, f],
            NodeOp::Concatenate(inputs, _) | NodeOp::Stack(inputs, _) => inputs,
        }
    }

    /// Runs the kernel; every input must already hold its value.
    fn apply(&self, shape: &[usize], out: DType) -> BackendResult<ArrayData> {
        Ok(match self {
            NodeOp::Full(value) => kernels::full(shape, out, *value),
            NodeOp::Astype(a) => value_of(a)?.astype(out),
            NodeOp::Unary(op, a) => kernels::unary(*op, value_of(a)?, out),
            NodeOp::Binary(op, a, b) => kernels::binary(*op, value_of(a)?, value_of(b)?, out)?,
            NodeOp::Compare(op, a, b) => {
                kernels::compare(*op, value_of(a)?, value_of(b)?, out)?
            }
            NodeOp::Select(c, t, f) => {
                kernels::select(value_of(c)?, value_of(t)?, value_of(f)?, out)?
            }
            NodeOp::Reduce(kind, a, axes) => kernels::reduce(*kind, value_of(a)?, axes, out),
            NodeOp::Vdot(a, b) => kernels::vdot(value_of(a)?, value_of(b)?, out)?,
            NodeOp::Reshape(a, order) => kernels::reshape(value_of(a)?, shape, *order)?,
            NodeOp::Transpose(a, perm) => kernels::transpose(value_of(a)?, perm).to_standard_layout(),
            NodeOp::Concatenate(inputs, axis) => join(inputs, *axis, false, out)?,
            NodeOp::Stack(inputs, axis) => join(inputs, *axis, true, out)?,
            NodeOp::BroadcastTo(a) => kernels::broadcast_to(value_of(a)?, shape)?,
        })
    }
}

fn value_of(node: &Node) -> BackendResult<&ArrayData> {
    node.value.get().ok_or_else(|| {
        BackendError::execution(format!("input `{}` was not evaluated before its consumer", node.name))
    })
}

fn join(inputs: &[Arc<Node>], axis: usize, stack: bool, out: DType) -> BackendResult<ArrayData> {
    let values = inputs
        .iter()
        .map(|node| value_of(node))
        .collect::<BackendResult<Vec<_>>>()?;
    kernels::join_arrays(&values, axis, stack, out)
}

/// One recorded array expression.
pub struct Node {
    name: &'static str,
    /// Cleared once `value` is set.
    op: Mutex<Option<NodeOp>>,
    shape: Vec<usize>,
    dtype: DType,
    value: OnceLock<ArrayData>,
}

impl Node {
    pub(crate) fn new(op: NodeOp, shape: Vec<usize>, dtype: DType) -> Arc<Node> {
        Arc::new(Node {
            name: op.name(),
            op: Mutex::new(Some(op)),
            shape,
            dtype,
            value: OnceLock::new(),
        })
    }

    /// Already-materialized node.
    pub(crate) fn data(data: ArrayData) -> Arc<Node> {
        let value = OnceLock::new();
        let shape = data.shape().to_vec();
        let dtype = data.dtype();
        let _ = value.set(data);
        Arc::new(Node {
            name: "data",
            op: Mutex::new(None),
            shape,
            dtype,
            value,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn is_evaluated(&self) -> bool {
        self.value.get().is_some()
    }

    fn inputs(&self) -> Vec<Arc<Node>> {
        let op = self.op.lock().unwrap_or_else(PoisonError::into_inner);
        op.as_ref()
            .map(|op| op.inputs().into_iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of distinct unevaluated nodes reachable from `self`.
    pub fn pending(self: &Arc<Self>) -> usize {
        let mut seen = HashSet::new();
        let mut stack = vec![Arc::clone(self)];
        while let Some(node) = stack.pop() {
            if node.is_evaluated() || !seen.insert(Arc::as_ptr(&node)) {
                continue;
            }
            stack.extend(node.inputs());
        }
        seen.len()
    }

    /// Computes this node from evaluated inputs, then releases them.
    fn compute(&self, stats: &EvalStats) -> BackendResult<()> {
        let mut op = self.op.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_evaluated() {
            return Ok(());
        }
        let data = op
            .as_ref()
            .ok_or_else(|| BackendError::execution(format!("node `{}` has no operation", self.name)))?
            .apply(&self.shape, self.dtype)?;
        trace!("evaluated {} -> {:?} {}", self.name, self.shape, self.dtype);
        stats.evaluations.fetch_add(1, Ordering::Relaxed);
        let _ = self.value.set(data);
        let released = op.take();
        drop(op);
        drop(released);
        Ok(())
    }
}

impl Drop for Node {
    // Unlinks uniquely owned inputs one at a time so long chains do not recurse.
    fn drop(&mut self) {
        let op = self
            .op
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(op) = op else {
            return;
        };
        let mut orphans = op.into_inputs();
        while let Some(node) = orphans.pop() {
            if let Ok(mut node) = Arc::try_unwrap(node) {
                let op = node
                    .op
                    .get_mut()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(op) = op {
                    orphans.extend(op.into_inputs());
                }
            }
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("op", &self.name)
            .field("shape", &self.shape)
            .field("dtype", &self.dtype)
            .field("evaluated", &self.is_evaluated())
            .finish()
    }
}

/// Counters describing how much work the backend has executed.
#[derive(Debug, Default)]
pub struct EvalStats {
    evaluations: AtomicUsize,
    flushes: AtomicUsize,
}

impl EvalStats {
    /// Nodes computed so far.
    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::Relaxed)
    }

    /// Barriers that found pending work.
    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::Relaxed)
    }

    pub(crate) fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }
}

/// Computes `root`, reusing every value already materialized in its graph.
///
/// Nodes are visited in post-order from an explicit worklist, so the depth of the graph
/// does not bound the evaluation.
pub(crate) fn evaluate(root: &Arc<Node>, stats: &EvalStats) -> BackendResult<ArrayData> {
    let mut work = vec![(Arc::clone(root), false)];
    while let Some((node, inputs_ready)) = work.pop() {
        if node.is_evaluated() {
            continue;
        }
        if inputs_ready {
            node.compute(stats)?;
            continue;
        }
        let inputs = node.inputs();
        work.push((node, true));
        work.extend(
            inputs
                .into_iter()
                .filter(|input| !input.is_evaluated())
                .map(|input| (input, false)),
        );
    }
    value_of(root).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arraycontext::host::HostArray;

    fn leaf(values: &[f64]) -> Arc<Node> {
        Node::data(HostArray::from_slice(values).into_data())
    }

    #[test]
    fn evaluation_releases_inputs() {
        let stats = EvalStats::default();
        let x = leaf(&[1.0, 4.0]);
        let root = Node::new(NodeOp::Unary(UnaryOp::Sqrt, Arc::clone(&x)), vec![2], DType::F64);
        assert_eq!(Arc::strong_count(&x), 2);
        assert_eq!(root.pending(), 1);

        let value = evaluate(&root, &stats).unwrap();
        assert_eq!(value.to_vec::<f64>(), vec![1.0, 2.0]);
        assert_eq!(Arc::strong_count(&x), 1);
        assert_eq!(root.pending(), 0);
        assert_eq!(stats.evaluations(), 1);
    }

    #[test]
    fn deep_chains_evaluate_and_drop_iteratively() {
        let stats = EvalStats::default();
        let one = leaf(&[1.0]);
        let mut node = leaf(&[0.0]);
        for _ in 0..200_000 {
            node = Node::new(
                NodeOp::Binary(BinaryOp::Add, node, Arc::clone(&one)),
                vec![1],
                DType::F64,
            );
        }
        assert_eq!(evaluate(&node, &stats).unwrap().to_vec::<f64>(), vec![200_000.0]);
        drop(node);

        let mut unevaluated = leaf(&[0.0]);
        for _ in 0..200_000 {
            unevaluated = Node::new(
                NodeOp::Unary(UnaryOp::Negative, unevaluated),
                vec![1],
                DType::F64,
            );
        }
        drop(unevaluated);
    }
}
