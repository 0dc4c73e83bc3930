//! Reference kernels over [`ArrayData`].
//!
//! Every kernel takes the result dtype decided by `arraycontext::ops`, computes in `i64`,
//! `f64` or `bool`, and casts the result. The deferred backend evaluates its graphs with
//! these same functions.

use arraycontext::dispatch_array_data;
use arraycontext::host::{ArrayData, Element};
use arraycontext::ops::{BinaryOp, ComparisonOp, ReduceKind, UnaryOp};
use arraycontext::shape::broadcast_shapes;
use arraycontext::{BackendError, BackendResult, DType, MemoryOrder, Scalar};
use ndarray::{ArcArray, Array, ArrayD, Axis as NdAxis, IxDyn, ShapeBuilder, Zip};

fn broadcast_error(shapes: &[&[usize]]) -> BackendError {
    BackendError::execution(format!("shapes {shapes:?} cannot be broadcast together"))
}

fn common_shape(shapes: &[&[usize]]) -> BackendResult<Vec<usize>> {
    broadcast_shapes(shapes)
        .map(|dims| dims.to_vec())
        .map_err(|_| broadcast_error(shapes))
}

fn zip2<A, B, R, F>(
    a: &ArcArray<A, IxDyn>,
    b: &ArcArray<B, IxDyn>,
    shape: &[usize],
    f: F,
) -> BackendResult<ArrayD<R>>
where
    A: Clone,
    B: Clone,
    F: Fn(A, B) -> R,
{
    let av = a
        .broadcast(IxDyn(shape))
        .ok_or_else(|| broadcast_error(&[a.shape(), shape]))?;
    let bv = b
        .broadcast(IxDyn(shape))
        .ok_or_else(|| broadcast_error(&[b.shape(), shape]))?;
    Ok(Zip::from(av)
        .and(bv)
        .map_collect(|x, y| f(x.clone(), y.clone())))
}

fn wrap<T: Element>(array: ArrayD<T>) -> ArrayData {
    ArrayData::from_array(array)
}

/// Array of `shape` filled with `value`, without an `f64` round trip for integers.
pub fn full(shape: &[usize], dtype: DType, value: Scalar) -> ArrayData {
    match value {
        Scalar::Int(i) => {
            wrap(ArrayD::from_elem(IxDyn(shape), i)).astype(dtype)
        }
        Scalar::Bool(b) => wrap(ArrayD::from_elem(IxDyn(shape), b)).astype(dtype),
        Scalar::Float(x) => ArrayData::full(shape, dtype, x),
    }
}

/// Elementwise unary op producing `out`.
pub fn unary(op: UnaryOp, input: &ArrayData, out: DType) -> ArrayData {
    match op {
        UnaryOp::Isnan => {
            let values = input.cast::<f64>();
            wrap(values.mapv(|x| x.is_nan())).astype(out)
        }
        UnaryOp::LogicalNot => {
            let values = input.cast::<bool>();
            wrap(values.mapv(|x| !x)).astype(out)
        }
        UnaryOp::Abs | UnaryOp::Negative | UnaryOp::Floor | UnaryOp::Ceil | UnaryOp::Conj
            if !input.dtype().is_float() =>
        {
            if input.dtype().is_bool() {
                return input.astype(out);
            }
            let values = input.cast::<i64>();
            let mapped = match op {
                UnaryOp::Abs => values.mapv(i64::wrapping_abs),
                UnaryOp::Negative => values.mapv(i64::wrapping_neg),
                _ => values.to_owned(),
            };
            wrap(mapped).astype(out)
        }
        _ => {
            let values = input.cast::<f64>();
            wrap(values.mapv(|x| op.apply_f64(x))).astype(out)
        }
    }
}

/// Broadcasting binary op producing `out`.
pub fn binary(op: BinaryOp, lhs: &ArrayData, rhs: &ArrayData, out: DType) -> BackendResult<ArrayData> {
    let shape = common_shape(&[lhs.shape(), rhs.shape()])?;
    let result = match op {
        BinaryOp::LogicalAnd | BinaryOp::LogicalOr => {
            let and = op == BinaryOp::LogicalAnd;
            wrap(zip2(&lhs.cast::<bool>(), &rhs.cast::<bool>(), &shape, |a, b| {
                if and {
                    a && b
                } else {
                    a || b
                }
            })?)
        }
        _ if op.is_integral() && !out.is_float() => wrap(zip2(
            &lhs.cast::<i64>(),
            &rhs.cast::<i64>(),
            &shape,
            |a, b| op.apply_i64(a, b),
        )?),
        _ => wrap(zip2(
            &lhs.cast::<f64>(),
            &rhs.cast::<f64>(),
            &shape,
            |a, b| op.apply_f64(a, b),
        )?),
    };
    Ok(result.astype(out))
}

/// Broadcasting comparison producing `out` (`bool` or `int8`).
pub fn compare(
    op: ComparisonOp,
    lhs: &ArrayData,
    rhs: &ArrayData,
    out: DType,
) -> BackendResult<ArrayData> {
    let shape = common_shape(&[lhs.shape(), rhs.shape()])?;
    let common = lhs.dtype().promote(rhs.dtype());
    let result = if common.is_float() {
        zip2(&lhs.cast::<f64>(), &rhs.cast::<f64>(), &shape, |a, b| op.apply(a, b))?
    } else {
        zip2(&lhs.cast::<i64>(), &rhs.cast::<i64>(), &shape, |a, b| op.apply(a, b))?
    };
    Ok(wrap(result).astype(out))
}

/// `condition ? on_true : on_false` with three-way broadcasting.
pub fn select(
    condition: &ArrayData,
    on_true: &ArrayData,
    on_false: &ArrayData,
    out: DType,
) -> BackendResult<ArrayData> {
    let shape = common_shape(&[condition.shape(), on_true.shape(), on_false.shape()])?;
    let condition = condition.cast::<bool>();
    let cv = condition
        .broadcast(IxDyn(&shape))
        .ok_or_else(|| broadcast_error(&[condition.shape(), &shape]))?;
    fn pick<T: Element>(
        cv: ndarray::ArrayViewD<'_, bool>,
        on_true: &ArrayData,
        on_false: &ArrayData,
        shape: &[usize],
    ) -> BackendResult<ArrayData> {
        let t = on_true.cast::<T>();
        let f = on_false.cast::<T>();
        let tv = t
            .broadcast(IxDyn(shape))
            .ok_or_else(|| broadcast_error(&[t.shape(), shape]))?;
        let fv = f
            .broadcast(IxDyn(shape))
            .ok_or_else(|| broadcast_error(&[f.shape(), shape]))?;
        Ok(wrap(
            Zip::from(cv)
                .and(tv)
                .and(fv)
                .map_collect(|&c, &x, &y| if c { x } else { y }),
        ))
    }
    match out {
        DType::Bool => pick::<bool>(cv, on_true, on_false, &shape),
        DType::I8 => pick::<i8>(cv, on_true, on_false, &shape),
        DType::I32 => pick::<i32>(cv, on_true, on_false, &shape),
        DType::I64 => pick::<i64>(cv, on_true, on_false, &shape),
        DType::F32 => pick::<f32>(cv, on_true, on_false, &shape),
        DType::F64 => pick::<f64>(cv, on_true, on_false, &shape),
    }
}

fn fold_axes<T, F>(array: ArcArray<T, IxDyn>, axes: &[usize], init: T, f: F) -> ArrayD<T>
where
    T: Clone,
    F: Fn(T, T) -> T,
{
    let mut current = array.into_owned();
    for &axis in axes.iter().rev() {
        current = current.fold_axis(NdAxis(axis), init.clone(), |acc, x| {
            f(acc.clone(), x.clone())
        });
    }
    current
}

/// Reduces over `axes` (sorted, unique) producing `out`.
pub fn reduce(kind: ReduceKind, input: &ArrayData, axes: &[usize], out: DType) -> ArrayData {
    let float = input.dtype().is_float();
    let result = match kind {
        ReduceKind::Any => wrap(fold_axes(input.cast::<bool>(), axes, false, |a, b| a || b)),
        ReduceKind::All => wrap(fold_axes(input.cast::<bool>(), axes, true, |a, b| a && b)),
        ReduceKind::Sum if float => wrap(fold_axes(input.cast::<f64>(), axes, 0.0, |a, b| a + b)),
        ReduceKind::Sum => wrap(fold_axes(input.cast::<i64>(), axes, 0, i64::wrapping_add)),
        ReduceKind::Min | ReduceKind::Max if float => {
            let (init, op) = if kind == ReduceKind::Min {
                (f64::INFINITY, BinaryOp::Minimum)
            } else {
                (f64::NEG_INFINITY, BinaryOp::Maximum)
            };
            wrap(fold_axes(input.cast::<f64>(), axes, init, |a, b| op.apply_f64(a, b)))
        }
        ReduceKind::Min => wrap(fold_axes(input.cast::<i64>(), axes, i64::MAX, i64::min)),
        ReduceKind::Max => wrap(fold_axes(input.cast::<i64>(), axes, i64::MIN, i64::max)),
    };
    result.astype(out)
}

/// Sum of elementwise products over the flattened inputs (real data, so no conjugation).
pub fn vdot(lhs: &ArrayData, rhs: &ArrayData, out: DType) -> BackendResult<ArrayData> {
    if lhs.len() != rhs.len() {
        return Err(BackendError::execution(format!(
            "vdot operands have different sizes ({} and {})",
            lhs.len(),
            rhs.len()
        )));
    }
    let result = if out.is_float() {
        let a = lhs.cast::<f64>();
        let b = rhs.cast::<f64>();
        let total: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        wrap(ArrayD::from_elem(IxDyn(&[]), total))
    } else {
        let a = lhs.cast::<i64>();
        let b = rhs.cast::<i64>();
        let total = a
            .iter()
            .zip(b.iter())
            .fold(0i64, |acc, (x, y)| acc.wrapping_add(x.wrapping_mul(*y)));
        wrap(ArrayD::from_elem(IxDyn(&[]), total))
    };
    Ok(result.astype(out))
}

/// Reshape reading and writing elements in `order` (`C` or `F`).
pub fn reshape(input: &ArrayData, shape: &[usize], order: MemoryOrder) -> BackendResult<ArrayData> {
    let fortran = match order {
        MemoryOrder::C => false,
        MemoryOrder::F => true,
        other => {
            return Err(BackendError::unimplemented(
                "reshape",
                format!("order '{other}' must be resolved before reaching the kernels"),
            ))
        }
    };
    dispatch_array_data!(input, a => {
        let result = if fortran {
            let values: Vec<_> = a.t().iter().copied().collect();
            Array::from_shape_vec(IxDyn(shape).f(), values)
        } else {
            let values: Vec<_> = a.iter().copied().collect();
            Array::from_shape_vec(IxDyn(shape), values)
        };
        result
            .map(|array| Element::wrap(array.into_shared()))
            .map_err(|err| BackendError::execution(format!("reshape failed: {err}")))
    })
}

/// Axis permutation sharing the input buffer.
pub fn transpose(input: &ArrayData, perm: &[usize]) -> ArrayData {
    dispatch_array_data!(input, a => Element::wrap(a.clone().permuted_axes(IxDyn(perm))))
}

fn join<T: Element>(
    inputs: &[&ArrayData],
    axis: usize,
    stack: bool,
) -> BackendResult<ArrayData> {
    let arrays: Vec<ArcArray<T, IxDyn>> = inputs.iter().map(|data| data.cast::<T>()).collect();
    let views: Vec<_> = arrays.iter().map(|a| a.view()).collect();
    let joined = if stack {
        ndarray::stack(NdAxis(axis), &views)
    } else {
        ndarray::concatenate(NdAxis(axis), &views)
    };
    joined
        .map(wrap)
        .map_err(|err| BackendError::execution(format!("join failed: {err}")))
}

/// Concatenation (`stack == false`) or stacking along a new axis, cast to `out`.
pub fn join_arrays(
    inputs: &[&ArrayData],
    axis: usize,
    stack: bool,
    out: DType,
) -> BackendResult<ArrayData> {
    match out {
        DType::Bool => join::<bool>(inputs, axis, stack),
        DType::I8 => join::<i8>(inputs, axis, stack),
        DType::I32 => join::<i32>(inputs, axis, stack),
        DType::I64 => join::<i64>(inputs, axis, stack),
        DType::F32 => join::<f32>(inputs, axis, stack),
        DType::F64 => join::<f64>(inputs, axis, stack),
    }
}

/// Dense copy of `input` broadcast to `shape`.
pub fn broadcast_to(input: &ArrayData, shape: &[usize]) -> BackendResult<ArrayData> {
    dispatch_array_data!(input, a => {
        let view = a
            .broadcast(IxDyn(shape))
            .ok_or_else(|| broadcast_error(&[a.shape(), shape]))?;
        Ok(Element::wrap(view.to_owned().into_shared()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arraycontext::HostArray;

    fn data(shape: &[usize], values: Vec<f64>) -> ArrayData {
        HostArray::from_vec(shape, values).unwrap().into_data()
    }

    #[test]
    fn binary_broadcasts_rows() {
        let a = data(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = data(&[3], vec![10.0, 20.0, 30.0]);
        let out = binary(BinaryOp::Add, &a, &b, DType::F64).unwrap();
        assert_eq!(out.shape(), &[2, 3]);
        assert_eq!(
            out.to_vec::<f64>(),
            vec![11.0, 22.0, 33.0, 14.0, 25.0, 36.0]
        );
    }

    #[test]
    fn fortran_reshape_reads_columns() {
        let a = data(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let out = reshape(&a, &[6], MemoryOrder::F).unwrap();
        assert_eq!(out.to_vec::<f64>(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn reduce_over_one_axis() {
        let a = data(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let rows = reduce(ReduceKind::Sum, &a, &[1], DType::F64);
        assert_eq!(rows.to_vec::<f64>(), vec![6.0, 15.0]);
        let cols = reduce(ReduceKind::Max, &a, &[0], DType::F64);
        assert_eq!(cols.to_vec::<f64>(), vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn transposed_view_is_not_contiguous() {
        let a = data(&[2, 3, 4], (0..24).map(f64::from).collect());
        let t = transpose(&a, &[1, 0, 2]);
        assert_eq!(t.shape(), &[3, 2, 4]);
        assert!(!t.is_standard_layout());
        assert!(!t.is_fortran_layout());
    }
}
