//! Shape bookkeeping shared by every backend: broadcasting, axis normalization, and the
//! output shapes of the structural operations.
//!
//! Backends that defer execution (see `arraycontext-backend-lazy`) infer result shapes from
//! these helpers before any data exists, so eager and deferred backends agree by
//! construction.

use smallvec::SmallVec;

use crate::error::{Error, Result};

/// Inline storage for the dimensions of one array.
pub type Dims = SmallVec<[usize; 4]>;

/// Computes the total number of elements implied by a shape.
pub fn num_elements(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// NumPy broadcasting of any number of shapes.
pub fn broadcast_shapes(shapes: &[&[usize]]) -> Result<Dims> {
    let ndim = shapes.iter().map(|s| s.len()).max().unwrap_or(0);
    let mut out: Dims = SmallVec::from_elem(1, ndim);
    for shape in shapes {
        let offset = ndim - shape.len();
        for (i, &dim) in shape.iter().enumerate() {
            let slot = &mut out[offset + i];
            if *slot == 1 {
                *slot = dim;
            } else if dim != 1 && dim != *slot {
                return Err(Error::value_error(format!(
                    "shapes {:?} cannot be broadcast together",
                    shapes
                )));
            }
        }
    }
    Ok(out)
}

/// Checks that `shape` can be broadcast to `target` (one-directional).
pub fn check_broadcast_to(shape: &[usize], target: &[usize]) -> Result<()> {
    if shape.len() > target.len() {
        return Err(Error::value_error(format!(
            "cannot broadcast shape {shape:?} to lower-rank shape {target:?}"
        )));
    }
    let offset = target.len() - shape.len();
    for (i, &dim) in shape.iter().enumerate() {
        if dim != 1 && dim != target[offset + i] {
            return Err(Error::value_error(format!(
                "cannot broadcast shape {shape:?} to {target:?}"
            )));
        }
    }
    Ok(())
}

/// Resolves a possibly negative axis against `ndim`.
pub fn normalize_axis(axis: isize, ndim: usize) -> Result<usize> {
    let resolved = if axis < 0 { axis + ndim as isize } else { axis };
    if resolved < 0 || resolved as usize >= ndim {
        return Err(Error::index_error(format!(
            "axis {axis} is out of bounds for array of dimension {ndim}"
        )));
    }
    Ok(resolved as usize)
}

/// Resolves a reduction axis selection; `None` selects every axis.
///
/// The result is sorted and free of duplicates.
pub fn normalize_axes(axes: Option<&[isize]>, ndim: usize) -> Result<Dims> {
    let Some(axes) = axes else {
        return Ok((0..ndim).collect());
    };
    let mut out: Dims = SmallVec::with_capacity(axes.len());
    for &axis in axes {
        let resolved = normalize_axis(axis, ndim)?;
        if out.contains(&resolved) {
            return Err(Error::value_error(format!("duplicate value in axes: {axis}")));
        }
        out.push(resolved);
    }
    out.sort_unstable();
    Ok(out)
}

/// Shape left after reducing over the (normalized) `axes`.
pub fn reduced_shape(shape: &[usize], axes: &[usize]) -> Dims {
    shape
        .iter()
        .enumerate()
        .filter(|(i, _)| !axes.contains(i))
        .map(|(_, &d)| d)
        .collect()
}

/// Resolves a requested reshape target, inferring at most one `-1` entry.
pub fn resolve_reshape(shape: &[usize], target: &[isize]) -> Result<Dims> {
    let total = num_elements(shape);
    let mut inferred = None;
    let mut known = 1usize;
    let mut out: Dims = SmallVec::with_capacity(target.len());
    for (i, &dim) in target.iter().enumerate() {
        match dim {
            -1 => {
                if inferred.replace(i).is_some() {
                    return Err(Error::value_error("can only specify one unknown dimension"));
                }
                out.push(0);
            }
            d if d < 0 => {
                return Err(Error::value_error(format!("invalid reshape dimension {d}")));
            }
            d => {
                known *= d as usize;
                out.push(d as usize);
            }
        }
    }
    match inferred {
        Some(i) => {
            if known == 0 || total % known != 0 {
                return Err(Error::value_error(format!(
                    "cannot reshape array of size {total} into shape {target:?}"
                )));
            }
            out[i] = total / known;
        }
        None if known != total => {
            return Err(Error::value_error(format!(
                "cannot reshape array of size {total} into shape {target:?}"
            )));
        }
        None => {}
    }
    Ok(out)
}

/// Validates an axis permutation; `None` reverses the axes.
pub fn resolve_permutation(ndim: usize, axes: Option<&[usize]>) -> Result<Dims> {
    let Some(axes) = axes else {
        return Ok((0..ndim).rev().collect());
    };
    if axes.len() != ndim {
        return Err(Error::value_error(format!(
            "axes {axes:?} don't match array of dimension {ndim}"
        )));
    }
    let mut seen = vec![false; ndim];
    for &axis in axes {
        if axis >= ndim {
            return Err(Error::index_error(format!(
                "axis {axis} is out of bounds for array of dimension {ndim}"
            )));
        }
        if std::mem::replace(&mut seen[axis], true) {
            return Err(Error::value_error(format!("repeated axis in transpose: {axis}")));
        }
    }
    Ok(axes.iter().copied().collect())
}

pub fn permuted_shape(shape: &[usize], perm: &[usize]) -> Dims {
    perm.iter().map(|&axis| shape[axis]).collect()
}

/// Output shape of concatenating `shapes` along `axis`.
pub fn concat_shape(shapes: &[&[usize]], axis: isize) -> Result<Dims> {
    let first = shapes
        .first()
        .ok_or_else(|| Error::value_error("need at least one array to concatenate"))?;
    let axis = normalize_axis(axis, first.len())?;
    let mut out: Dims = first.iter().copied().collect();
    for shape in &shapes[1..] {
        if shape.len() != first.len() {
            return Err(Error::value_error(
                "all input arrays must have the same number of dimensions",
            ));
        }
        for (i, (&a, &b)) in first.iter().zip(shape.iter()).enumerate() {
            if i != axis && a != b {
                return Err(Error::value_error(format!(
                    "input array dimensions must match except along axis {axis}: {first:?} vs {shape:?}"
                )));
            }
        }
        out[axis] += shape[axis];
    }
    Ok(out)
}

/// Output shape of stacking equally shaped arrays along a new `axis`.
pub fn stack_shape(shapes: &[&[usize]], axis: isize) -> Result<Dims> {
    let first = shapes
        .first()
        .ok_or_else(|| Error::value_error("need at least one array to stack"))?;
    if shapes.iter().any(|s| s != first) {
        return Err(Error::value_error("all input arrays must have the same shape"));
    }
    let axis = normalize_axis(axis, first.len() + 1)?;
    let mut out: Dims = first.iter().copied().collect();
    out.insert(axis, shapes.len());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcasting_aligns_trailing_axes() {
        let out = broadcast_shapes(&[&[3, 1], &[4]]).unwrap();
        assert_eq!(out.as_slice(), &[3, 4]);
        assert!(broadcast_shapes(&[&[3], &[4]]).is_err());
    }

    #[test]
    fn reshape_infers_single_unknown() {
        assert_eq!(resolve_reshape(&[2, 6], &[3, -1]).unwrap().as_slice(), &[3, 4]);
        assert!(resolve_reshape(&[2, 6], &[-1, -1]).is_err());
        assert!(resolve_reshape(&[2, 6], &[5, -1]).is_err());
    }

    #[test]
    fn axis_normalization_rejects_out_of_range() {
        assert_eq!(normalize_axis(-1, 3).unwrap(), 2);
        assert!(matches!(normalize_axis(3, 3), Err(Error::Index(_))));
    }
}
