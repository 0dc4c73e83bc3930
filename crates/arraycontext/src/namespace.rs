//! NumPy-like functions over nested containers.
//!
//! Every function walks its container arguments with the traversal engine and calls the
//! backend on the leaves. Scalars are accepted wherever an array is, and are weakly
//! typed against the array they meet.

use std::collections::HashMap;

use log::trace;

use crate::backend::{ArrayBackend, LeafArray};
use crate::container::{
    decompose, is_container, map, map_reduce, multimap, multimap_reduce, Scalar, Value,
};
use crate::context::ArrayContext;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::ops::{BinaryOp, ComparisonOp, MemoryOrder, NormOrd, ReduceKind, UnaryOp};
use crate::shape::{
    broadcast_shapes, check_broadcast_to, concat_shape, normalize_axes, normalize_axis,
    num_elements, resolve_permutation, resolve_reshape, stack_shape,
};

/// Leaf-level argument: a backend array or a scalar.
enum Operand<'v, A> {
    Array(&'v A),
    Scalar(Scalar),
}

/// The numeric namespace of one [`ArrayContext`].
pub struct Namespace<'a, B: ArrayBackend> {
    ctx: &'a ArrayContext<B>,
}

impl<B: ArrayBackend> Clone for Namespace<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: ArrayBackend> Copy for Namespace<'_, B> {}

/// A unary function resolved by name.
pub struct NamedFunction<'a, B: ArrayBackend> {
    ns: Namespace<'a, B>,
    op: UnaryOp,
}

impl<B: ArrayBackend> NamedFunction<'_, B> {
    pub fn name(&self) -> &'static str {
        self.op.name()
    }

    pub fn op(&self) -> UnaryOp {
        self.op
    }

    pub fn call(&self, x: &Value) -> Result<Value> {
        self.ns.unary(self.op, x)
    }
}

macro_rules! unary_functions {
    ($($name:ident => $op:ident),* $(,)?) => {
        $(
            pub fn $name(&self, x: &Value) -> Result<Value> {
                self.unary(UnaryOp::$op, x)
            }
        )*
    };
}

macro_rules! binary_functions {
    ($($name:ident => $op:ident),* $(,)?) => {
        $(
            pub fn $name(&self, a: &Value, b: &Value) -> Result<Value> {
                self.binary(BinaryOp::$op, a, b)
            }
        )*
    };
}

macro_rules! comparison_functions {
    ($($name:ident => $op:ident),* $(,)?) => {
        $(
            pub fn $name(&self, a: &Value, b: &Value) -> Result<Value> {
                self.compare(ComparisonOp::$op, a, b)
            }
        )*
    };
}

impl<'a, B: ArrayBackend> Namespace<'a, B> {
    pub(crate) fn new(ctx: &'a ArrayContext<B>) -> Self {
        Namespace { ctx }
    }

    pub fn context(&self) -> &'a ArrayContext<B> {
        self.ctx
    }

    fn backend(&self) -> &'a B {
        self.ctx.backend()
    }

    fn logical_dtype(&self) -> DType {
        self.ctx.capabilities().logical_dtype()
    }

    /// Resolves `name` through the context's function table.
    pub fn function(&self, name: &str) -> Result<NamedFunction<'a, B>> {
        let op = self
            .ctx
            .lookup_function(name)
            .ok_or_else(|| Error::Attribute(name.to_string()))?;
        Ok(NamedFunction { ns: *self, op })
    }

    fn operand<'v>(&self, value: &'v Value) -> Result<Operand<'v, B::Array>> {
        match value.as_scalar() {
            Some(scalar) => Ok(Operand::Scalar(scalar)),
            None => Ok(Operand::Array(self.ctx.bound_leaf(value)?)),
        }
    }

    fn scalar_array(&self, scalar: Scalar, dtype: DType) -> Result<B::Array> {
        Ok(self.backend().full(&[], dtype, scalar)?)
    }

    /// The 0-d `int8` false value returned when `array_equal` meets mismatched types.
    fn false_sentinel(&self) -> Result<B::Array> {
        self.scalar_array(Scalar::Int(0), DType::I8)
    }

    fn check_broadcast(&self, shapes: &[&[usize]]) -> Result<()> {
        let out = broadcast_shapes(shapes)?;
        if !self.ctx.supports_nonscalar_broadcasting() {
            let nonscalar = shapes
                .iter()
                .filter(|s| num_elements(s) != 1 && s[..] != out[..])
                .count();
            if nonscalar > 0 {
                return Err(Error::not_implemented(
                    "broadcast",
                    format!("backend only broadcasts scalars, got shapes {shapes:?}"),
                ));
            }
        }
        Ok(())
    }

    // Unary functions.

    /// Applies `op` to every leaf. Scalar leaves produce scalars.
    pub fn unary(&self, op: UnaryOp, x: &Value) -> Result<Value> {
        let logical = self.logical_dtype();
        map(
            |leaf| match self.operand(leaf)? {
                Operand::Scalar(s) => Ok(Value::scalar(scalar_unary(op, s)?)),
                Operand::Array(a) => {
                    op.result_dtype(a.dtype(), logical)?;
                    Ok(Value::new(self.backend().unary(op, a)?))
                }
            },
            x,
        )
    }

    unary_functions! {
        abs => Abs,
        sin => Sin,
        cos => Cos,
        tan => Tan,
        arcsin => Arcsin,
        arccos => Arccos,
        arctan => Arctan,
        sinh => Sinh,
        cosh => Cosh,
        tanh => Tanh,
        exp => Exp,
        log => Log,
        log10 => Log10,
        sqrt => Sqrt,
        conj => Conj,
        isnan => Isnan,
        negative => Negative,
        logical_not => LogicalNot,
    }

    // Binary functions.

    fn binary_leaf(&self, op: BinaryOp, a: &Value, b: &Value) -> Result<Value> {
        match (self.operand(a)?, self.operand(b)?) {
            (Operand::Scalar(x), Operand::Scalar(y)) => Ok(Value::scalar(scalar_binary(op, x, y))),
            (Operand::Array(x), Operand::Scalar(y)) => {
                let y = self.scalar_array(y, y.weak_dtype(x.dtype()))?;
                Ok(Value::new(self.backend().binary(op, x, &y)?))
            }
            (Operand::Scalar(x), Operand::Array(y)) => {
                let x = self.scalar_array(x, x.weak_dtype(y.dtype()))?;
                Ok(Value::new(self.backend().binary(op, &x, y)?))
            }
            (Operand::Array(x), Operand::Array(y)) => {
                self.check_broadcast(&[x.shape(), y.shape()])?;
                Ok(Value::new(self.backend().binary(op, x, y)?))
            }
        }
    }

    /// Broadcasting elementwise `op` over two arguments walked in lock step.
    pub fn binary(&self, op: BinaryOp, a: &Value, b: &Value) -> Result<Value> {
        multimap(|args| self.binary_leaf(op, &args[0], &args[1]), &[a.clone(), b.clone()])
    }

    binary_functions! {
        add => Add,
        subtract => Subtract,
        multiply => Multiply,
        divide => Divide,
        maximum => Maximum,
        minimum => Minimum,
        arctan2 => Arctan2,
        logical_and => LogicalAnd,
        logical_or => LogicalOr,
    }

    fn compare_leaf(&self, op: ComparisonOp, a: &Value, b: &Value) -> Result<Value> {
        let (x, y) = match (self.operand(a)?, self.operand(b)?) {
            (Operand::Scalar(x), Operand::Scalar(y)) => {
                return Ok(Value::scalar(op.apply(x.to_f64(), y.to_f64())));
            }
            (Operand::Array(x), Operand::Scalar(y)) => {
                (x.clone(), self.scalar_array(y, y.weak_dtype(x.dtype()))?)
            }
            (Operand::Scalar(x), Operand::Array(y)) => {
                (self.scalar_array(x, x.weak_dtype(y.dtype()))?, y.clone())
            }
            (Operand::Array(x), Operand::Array(y)) => {
                self.check_broadcast(&[x.shape(), y.shape()])?;
                (x.clone(), y.clone())
            }
        };
        Ok(Value::new(self.backend().compare(op, &x, &y)?))
    }

    pub fn compare(&self, op: ComparisonOp, a: &Value, b: &Value) -> Result<Value> {
        multimap(|args| self.compare_leaf(op, &args[0], &args[1]), &[a.clone(), b.clone()])
    }

    comparison_functions! {
        equal => Equal,
        not_equal => NotEqual,
        less => Less,
        less_equal => LessEqual,
        greater => Greater,
        greater_equal => GreaterEqual,
    }

    /// Elementwise `condition ? on_true : on_false` with broadcasting.
    pub fn r#where(&self, condition: &Value, on_true: &Value, on_false: &Value) -> Result<Value> {
        multimap(
            |args| self.where_leaf(&args[0], &args[1], &args[2]),
            &[condition.clone(), on_true.clone(), on_false.clone()],
        )
    }

    fn where_leaf(&self, condition: &Value, on_true: &Value, on_false: &Value) -> Result<Value> {
        let condition = match self.operand(condition)? {
            Operand::Array(c) => c.clone(),
            Operand::Scalar(s) => self.scalar_array(s, self.logical_dtype())?,
        };
        let (t, f) = match (self.operand(on_true)?, self.operand(on_false)?) {
            (Operand::Array(t), Operand::Array(f)) => (t.clone(), f.clone()),
            (Operand::Array(t), Operand::Scalar(f)) => {
                (t.clone(), self.scalar_array(f, f.weak_dtype(t.dtype()))?)
            }
            (Operand::Scalar(t), Operand::Array(f)) => {
                (self.scalar_array(t, t.weak_dtype(f.dtype()))?, f.clone())
            }
            (Operand::Scalar(t), Operand::Scalar(f)) => {
                let dtype = t.default_dtype().promote(f.default_dtype());
                (self.scalar_array(t, dtype)?, self.scalar_array(f, dtype)?)
            }
        };
        self.check_broadcast(&[condition.shape(), t.shape(), f.shape()])?;
        Ok(Value::new(self.backend().select(&condition, &t, &f)?))
    }

    // Reductions.

    fn leaf_array(&self, value: &Value) -> Result<B::Array> {
        match self.operand(value)? {
            Operand::Array(a) => Ok(a.clone()),
            Operand::Scalar(s) => self.scalar_array(s, s.default_dtype()),
        }
    }

    fn reduce_leaf(&self, kind: ReduceKind, value: &Value, axis: Option<&[isize]>) -> Result<B::Array> {
        let array = self.leaf_array(value)?;
        let axes = normalize_axes(axis, array.ndim())?;
        if !kind.has_identity() && axes.iter().any(|&ax| array.shape()[ax] == 0) {
            return Err(Error::value_error(format!(
                "zero-size array to reduction operation {kind} which has no identity"
            )));
        }
        Ok(self.backend().reduce(kind, &array, &axes)?)
    }

    fn combine(&self, op: BinaryOp, lhs: B::Array, rhs: B::Array) -> Result<B::Array> {
        self.check_broadcast(&[lhs.shape(), rhs.shape()])?;
        Ok(self.backend().binary(op, &lhs, &rhs)?)
    }

    /// Reduces every leaf with the backend, then folds the leaf results across the
    /// container with the matching elementwise op. `axis` applies within each leaf.
    pub fn reduce(&self, kind: ReduceKind, x: &Value, axis: Option<&[isize]>) -> Result<Value> {
        trace!("{kind} over `{}`", x.type_name());
        let reduced = map_reduce(
            |lhs, rhs| self.combine(kind.combiner(), lhs, rhs),
            |leaf| self.reduce_leaf(kind, leaf, axis),
            x,
        )?;
        Ok(Value::new(reduced))
    }

    pub fn sum(&self, x: &Value, axis: Option<&[isize]>) -> Result<Value> {
        self.reduce(ReduceKind::Sum, x, axis)
    }

    pub fn min(&self, x: &Value, axis: Option<&[isize]>) -> Result<Value> {
        self.reduce(ReduceKind::Min, x, axis)
    }

    pub fn max(&self, x: &Value, axis: Option<&[isize]>) -> Result<Value> {
        self.reduce(ReduceKind::Max, x, axis)
    }

    pub fn any(&self, x: &Value) -> Result<Value> {
        self.reduce(ReduceKind::Any, x, None)
    }

    pub fn all(&self, x: &Value) -> Result<Value> {
        self.reduce(ReduceKind::All, x, None)
    }

    /// Conjugated dot product summed over every pair of matching leaves.
    pub fn vdot(&self, a: &Value, b: &Value) -> Result<Value> {
        let result = multimap_reduce(
            |lhs, rhs| self.combine(BinaryOp::Add, lhs, rhs),
            |args| {
                let x = self.leaf_array(&args[0])?;
                let y = self.leaf_array(&args[1])?;
                if x.size() != y.size() {
                    return Err(Error::value_error(format!(
                        "vdot: vectors have different sizes ({} and {})",
                        x.size(),
                        y.size()
                    )));
                }
                Ok(self.backend().vdot(&x, &y)?)
            },
            &[a.clone(), b.clone()],
        )?;
        Ok(Value::new(result))
    }

    /// Vector norm over every entry of every leaf, as a 0-d array.
    pub fn linalg_norm(&self, x: &Value, ord: NormOrd) -> Result<Value> {
        let result = match ord {
            NormOrd::Two => {
                let squares = map_reduce(
                    |lhs, rhs| self.combine(BinaryOp::Add, lhs, rhs),
                    |leaf| {
                        let a = self.leaf_array(leaf)?;
                        let magnitude = self.backend().unary(UnaryOp::Abs, &a)?;
                        let squared =
                            self.backend()
                                .binary(BinaryOp::Multiply, &magnitude, &magnitude)?;
                        let axes: Vec<usize> = (0..squared.ndim()).collect();
                        Ok(self.backend().reduce(ReduceKind::Sum, &squared, &axes)?)
                    },
                    x,
                )?;
                self.backend().unary(UnaryOp::Sqrt, &squares)?
            }
            NormOrd::Inf => map_reduce(
                |lhs, rhs| self.combine(BinaryOp::Maximum, lhs, rhs),
                |leaf| {
                    let a = self.leaf_array(leaf)?;
                    let magnitude = self.backend().unary(UnaryOp::Abs, &a)?;
                    self.reduce_leaf(ReduceKind::Max, &Value::new(magnitude), None)
                },
                x,
            )?,
        };
        Ok(Value::new(result))
    }

    // Equality.

    /// Structural and elementwise equality as a 0-d truth value.
    ///
    /// Mismatched types at any position produce a 0-d `int8` false instead of an error.
    /// Tags do not participate.
    pub fn array_equal(&self, a: &Value, b: &Value) -> Result<Value> {
        Ok(Value::new(self.equal_rec(a, b)?))
    }

    /// [`Namespace::array_equal`] transferred to the host as a `bool`.
    pub fn array_equal_host(&self, a: &Value, b: &Value) -> Result<bool> {
        let result = self.equal_rec(a, b)?;
        self.ctx.to_host(&result)?.item::<bool>()
    }

    fn equal_rec(&self, a: &Value, b: &Value) -> Result<B::Array> {
        if a.type_key() != b.type_key() {
            return self.false_sentinel();
        }
        if is_container(a) {
            let parts_a = decompose(a)?;
            let mut parts_b: HashMap<_, _> = decompose(b)?.into_iter().collect();
            if parts_a.len() != parts_b.len() {
                return self.false_sentinel();
            }
            let mut acc: Option<B::Array> = None;
            for (key, part_a) in parts_a {
                let Some(part_b) = parts_b.remove(&key) else {
                    return self.false_sentinel();
                };
                let child = self.equal_rec(&part_a, &part_b)?;
                acc = Some(match acc {
                    None => child,
                    Some(acc) => self.backend().binary(BinaryOp::LogicalAnd, &acc, &child)?,
                });
            }
            return acc.ok_or_else(|| {
                Error::value_error(format!(
                    "container of type `{}` has no parts; empty containers cannot be compared",
                    a.type_name()
                ))
            });
        }
        match (self.operand(a)?, self.operand(b)?) {
            (Operand::Scalar(x), Operand::Scalar(y)) => {
                self.scalar_array(Scalar::Bool(x.to_f64() == y.to_f64()), self.logical_dtype())
            }
            (Operand::Array(x), Operand::Array(y)) => {
                if x.shape() != y.shape() {
                    return self.false_sentinel();
                }
                let equal = self.backend().compare(ComparisonOp::Equal, x, y)?;
                let axes: Vec<usize> = (0..equal.ndim()).collect();
                Ok(self.backend().reduce(ReduceKind::All, &equal, &axes)?)
            }
            _ => self.false_sentinel(),
        }
    }

    // Shape manipulation.

    /// Reshapes every leaf; one entry of `shape` may be `-1`.
    pub fn reshape(&self, x: &Value, shape: &[isize], order: MemoryOrder) -> Result<Value> {
        map(
            |leaf| {
                let array = self.ctx.bound_leaf(leaf)?;
                let target = resolve_reshape(array.shape(), shape)?;
                let order = self.backend().layout(array).resolve(order)?;
                Ok(Value::new(self.backend().reshape(array, &target, order)?))
            },
            x,
        )
    }

    pub fn ravel(&self, x: &Value, order: MemoryOrder) -> Result<Value> {
        self.reshape(x, &[-1], order)
    }

    /// Permutes the axes of every leaf; `None` reverses them.
    pub fn transpose(&self, x: &Value, axes: Option<&[usize]>) -> Result<Value> {
        map(
            |leaf| {
                let array = self.ctx.bound_leaf(leaf)?;
                let perm = resolve_permutation(array.ndim(), axes)?;
                Ok(Value::new(self.backend().transpose(array, &perm)?))
            },
            x,
        )
    }

    fn bound_leaves<'v>(&self, args: &'v [Value]) -> Result<Vec<&'v B::Array>> {
        args.iter().map(|v| self.ctx.bound_leaf(v)).collect()
    }

    /// Joins matching leaves of `arrays` along an existing axis.
    pub fn concatenate(&self, arrays: &[Value], axis: isize) -> Result<Value> {
        if arrays.is_empty() {
            return Err(Error::value_error("need at least one array to concatenate"));
        }
        multimap(
            |args| {
                let leaves = self.bound_leaves(args)?;
                let shapes: Vec<&[usize]> = leaves.iter().map(|a| a.shape()).collect();
                concat_shape(&shapes, axis)?;
                let axis = normalize_axis(axis, shapes[0].len())?;
                Ok(Value::new(self.backend().concatenate(&leaves, axis)?))
            },
            arrays,
        )
    }

    /// Joins matching leaves of `arrays` along a new axis.
    pub fn stack(&self, arrays: &[Value], axis: isize) -> Result<Value> {
        if arrays.is_empty() {
            return Err(Error::value_error("need at least one array to stack"));
        }
        multimap(
            |args| {
                let leaves = self.bound_leaves(args)?;
                let shapes: Vec<&[usize]> = leaves.iter().map(|a| a.shape()).collect();
                stack_shape(&shapes, axis)?;
                let axis = normalize_axis(axis, shapes[0].len() + 1)?;
                Ok(Value::new(self.backend().stack(&leaves, axis)?))
            },
            arrays,
        )
    }

    pub fn broadcast_to(&self, x: &Value, shape: &[usize]) -> Result<Value> {
        map(
            |leaf| {
                let array = self.leaf_array(leaf)?;
                check_broadcast_to(array.shape(), shape)?;
                Ok(Value::new(self.backend().broadcast_to(&array, shape)?))
            },
            x,
        )
    }

    // Allocation by example.

    pub fn full_like(&self, x: &Value, fill: impl Into<Scalar>) -> Result<Value> {
        let fill = fill.into();
        map(
            |leaf| match self.operand(leaf)? {
                Operand::Scalar(_) => Ok(Value::scalar(fill)),
                Operand::Array(a) => Ok(Value::new(self.backend().full(
                    a.shape(),
                    a.dtype(),
                    fill,
                )?)),
            },
            x,
        )
    }

    pub fn zeros_like(&self, x: &Value) -> Result<Value> {
        self.full_like(x, Scalar::Int(0))
    }

    pub fn ones_like(&self, x: &Value) -> Result<Value> {
        self.full_like(x, Scalar::Int(1))
    }
}

fn scalar_unary(op: UnaryOp, s: Scalar) -> Result<Scalar> {
    let x = s.to_f64();
    Ok(match (op, s) {
        (UnaryOp::Isnan | UnaryOp::LogicalNot, _) => Scalar::Bool(op.apply_f64(x) != 0.0),
        (UnaryOp::Negative, Scalar::Bool(_)) => {
            return Err(Error::type_error(
                "negative is not supported for booleans; use logical_not",
            ))
        }
        (
            UnaryOp::Abs | UnaryOp::Negative | UnaryOp::Floor | UnaryOp::Ceil | UnaryOp::Conj,
            Scalar::Int(i),
        ) => Scalar::Int(op.apply_f64(i as f64) as i64),
        _ => Scalar::Float(op.apply_f64(x)),
    })
}

fn scalar_binary(op: BinaryOp, x: Scalar, y: Scalar) -> Scalar {
    match (op, x, y) {
        (BinaryOp::LogicalAnd | BinaryOp::LogicalOr, _, _) => {
            Scalar::Bool(op.apply_f64(x.to_f64(), y.to_f64()) != 0.0)
        }
        (_, Scalar::Int(a), Scalar::Int(b)) if op.is_integral() => Scalar::Int(op.apply_i64(a, b)),
        _ => Scalar::Float(op.apply_f64(x.to_f64(), y.to_f64())),
    }
}
