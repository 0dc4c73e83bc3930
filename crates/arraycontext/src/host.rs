//! Host-resident arrays used to move data in and out of a context.
//!
//! `HostArray` is the exchange format of `from_host`/`to_host`. It is a registered leaf
//! type, so host arrays can sit inside containers and be transferred with
//! `from_host_value`.

use std::fmt;

use ndarray::{ArcArray, Array, ArrayD, IxDyn, ShapeBuilder};

use crate::dtype::DType;
use crate::error::{Error, Result};

/// Dynamically typed, reference-counted n-d buffer.
#[derive(Clone, PartialEq)]
pub enum ArrayData {
    Bool(ArcArray<bool, IxDyn>),
    I8(ArcArray<i8, IxDyn>),
    I32(ArcArray<i32, IxDyn>),
    I64(ArcArray<i64, IxDyn>),
    F32(ArcArray<f32, IxDyn>),
    F64(ArcArray<f64, IxDyn>),
}

/// Runs `$body` with `$arr` bound to the typed array inside an [`ArrayData`].
#[macro_export]
macro_rules! dispatch_array_data {
    ($data:expr, $arr:ident => $body:expr) => {
        match $data {
            $crate::host::ArrayData::Bool($arr) => $body,
            $crate::host::ArrayData::I8($arr) => $body,
            $crate::host::ArrayData::I32($arr) => $body,
            $crate::host::ArrayData::I64($arr) => $body,
            $crate::host::ArrayData::F32($arr) => $body,
            $crate::host::ArrayData::F64($arr) => $body,
        }
    };
}

/// Scalar element types storable in an [`ArrayData`].
pub trait Element: Copy + PartialOrd + fmt::Debug + Send + Sync + 'static {
    const DTYPE: DType;

    fn to_f64(self) -> f64;
    fn to_i64(self) -> i64;
    fn from_f64(value: f64) -> Self;
    fn from_i64(value: i64) -> Self;
    fn wrap(array: ArcArray<Self, IxDyn>) -> ArrayData;
    fn unwrap_ref(data: &ArrayData) -> Option<&ArcArray<Self, IxDyn>>;

    /// NumPy `astype` semantics, routed through `i64` between integer types and
    /// through `f64` whenever a float is involved.
    fn cast_from<S: Element>(value: S) -> Self {
        if S::DTYPE.is_float() || Self::DTYPE.is_float() {
            Self::from_f64(value.to_f64())
        } else {
            Self::from_i64(value.to_i64())
        }
    }
}

macro_rules! impl_numeric_element {
    ($ty:ty, $variant:ident) => {
        impl Element for $ty {
            const DTYPE: DType = DType::$variant;

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn to_i64(self) -> i64 {
                self as i64
            }

            fn from_f64(value: f64) -> Self {
                value as $ty
            }

            fn from_i64(value: i64) -> Self {
                value as $ty
            }

            fn wrap(array: ArcArray<Self, IxDyn>) -> ArrayData {
                ArrayData::$variant(array)
            }

            fn unwrap_ref(data: &ArrayData) -> Option<&ArcArray<Self, IxDyn>> {
                match data {
                    ArrayData::$variant(array) => Some(array),
                    _ => None,
                }
            }
        }
    };
}

impl_numeric_element!(i8, I8);
impl_numeric_element!(i32, I32);
impl_numeric_element!(i64, I64);
impl_numeric_element!(f32, F32);
impl_numeric_element!(f64, F64);

impl Element for bool {
    const DTYPE: DType = DType::Bool;

    fn to_f64(self) -> f64 {
        if self {
            1.0
        } else {
            0.0
        }
    }

    fn to_i64(self) -> i64 {
        self as i64
    }

    // NaN is truthy, as in NumPy.
    fn from_f64(value: f64) -> Self {
        value != 0.0
    }

    fn from_i64(value: i64) -> Self {
        value != 0
    }

    fn wrap(array: ArcArray<Self, IxDyn>) -> ArrayData {
        ArrayData::Bool(array)
    }

    fn unwrap_ref(data: &ArrayData) -> Option<&ArcArray<Self, IxDyn>> {
        match data {
            ArrayData::Bool(array) => Some(array),
            _ => None,
        }
    }
}

impl ArrayData {
    pub fn from_array<T: Element>(array: ArrayD<T>) -> Self {
        T::wrap(array.into_shared())
    }

    /// Array of `shape` filled with `value` cast to `dtype`.
    pub fn full(shape: &[usize], dtype: DType, value: f64) -> Self {
        fn fill<T: Element>(shape: &[usize], value: f64) -> ArrayData {
            ArrayData::from_array(ArrayD::from_elem(IxDyn(shape), T::from_f64(value)))
        }
        match dtype {
            DType::Bool => fill::<bool>(shape, value),
            DType::I8 => fill::<i8>(shape, value),
            DType::I32 => fill::<i32>(shape, value),
            DType::I64 => fill::<i64>(shape, value),
            DType::F32 => fill::<f32>(shape, value),
            DType::F64 => fill::<f64>(shape, value),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            ArrayData::Bool(_) => DType::Bool,
            ArrayData::I8(_) => DType::I8,
            ArrayData::I32(_) => DType::I32,
            ArrayData::I64(_) => DType::I64,
            ArrayData::F32(_) => DType::F32,
            ArrayData::F64(_) => DType::F64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        dispatch_array_data!(self, a => a.shape())
    }

    pub fn len(&self) -> usize {
        dispatch_array_data!(self, a => a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Typed view of the buffer, converting when the dtype differs.
    pub fn cast<T: Element>(&self) -> ArcArray<T, IxDyn> {
        if let Some(array) = T::unwrap_ref(self) {
            return array.clone();
        }
        dispatch_array_data!(self, a => a.mapv(T::cast_from).into_shared())
    }

    pub fn astype(&self, dtype: DType) -> ArrayData {
        if self.dtype() == dtype {
            return self.clone();
        }
        match dtype {
            DType::Bool => ArrayData::Bool(self.cast()),
            DType::I8 => ArrayData::I8(self.cast()),
            DType::I32 => ArrayData::I32(self.cast()),
            DType::I64 => ArrayData::I64(self.cast()),
            DType::F32 => ArrayData::F32(self.cast()),
            DType::F64 => ArrayData::F64(self.cast()),
        }
    }

    /// Elements in logical (row-major) order.
    pub fn to_vec<T: Element>(&self) -> Vec<T> {
        self.cast::<T>().iter().copied().collect()
    }

    pub fn is_standard_layout(&self) -> bool {
        dispatch_array_data!(self, a => a.is_standard_layout())
    }

    /// Column-major contiguity; 0-d and 1-d arrays are both C and F contiguous.
    pub fn is_fortran_layout(&self) -> bool {
        dispatch_array_data!(self, a => a.t().is_standard_layout())
    }

    /// Dense row-major copy (no copy when already standard layout).
    pub fn to_standard_layout(&self) -> ArrayData {
        dispatch_array_data!(self, a => {
            if a.is_standard_layout() {
                self.clone()
            } else {
                Element::wrap(a.as_standard_layout().into_owned().into_shared())
            }
        })
    }

    /// Dense column-major copy.
    pub fn to_fortran_layout(&self) -> ArrayData {
        dispatch_array_data!(self, a => {
            let shape = a.shape().to_vec();
            let values: Vec<_> = a.t().iter().copied().collect();
            match Array::from_shape_vec(IxDyn(&shape).f(), values) {
                Ok(array) => Element::wrap(array.into_shared()),
                Err(_) => self.clone(),
            }
        })
    }
}

impl fmt::Debug for ArrayData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        dispatch_array_data!(self, a => write!(f, "{}{:?}", self.dtype(), a))
    }
}

/// Host array with NumPy-like construction helpers.
#[derive(Clone, PartialEq)]
pub struct HostArray {
    data: ArrayData,
}

impl HostArray {
    pub fn new(data: ArrayData) -> Self {
        HostArray { data }
    }

    /// Builds a row-major array from `values`.
    pub fn from_vec<T: Element>(shape: &[usize], values: Vec<T>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != values.len() {
            return Err(Error::value_error(format!(
                "cannot build array of shape {shape:?} from {} values",
                values.len()
            )));
        }
        let array = Array::from_shape_vec(IxDyn(shape), values)
            .map_err(|err| Error::value_error(err.to_string()))?;
        Ok(HostArray::new(ArrayData::from_array(array)))
    }

    /// One-dimensional array.
    pub fn from_slice<T: Element>(values: &[T]) -> Self {
        HostArray::new(ArrayData::from_array(
            Array::from_vec(values.to_vec()).into_dyn(),
        ))
    }

    pub fn from_array<T: Element>(array: ArrayD<T>) -> Self {
        HostArray::new(ArrayData::from_array(array))
    }

    /// Zero-dimensional array.
    pub fn scalar<T: Element>(value: T) -> Self {
        HostArray::new(ArrayData::from_array(ArrayD::from_elem(IxDyn(&[]), value)))
    }

    pub fn zeros(shape: &[usize], dtype: DType) -> Self {
        HostArray::new(ArrayData::full(shape, dtype, 0.0))
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn into_data(self) -> ArrayData {
        self.data
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn astype(&self, dtype: DType) -> HostArray {
        HostArray::new(self.data.astype(dtype))
    }

    pub fn to_vec<T: Element>(&self) -> Vec<T> {
        self.data.to_vec()
    }

    /// Value of a single-element array.
    pub fn item<T: Element>(&self) -> Result<T> {
        if self.len() != 1 {
            return Err(Error::value_error(format!(
                "only size-1 arrays can be converted to scalars, got shape {:?}",
                self.shape()
            )));
        }
        self.to_vec::<T>()
            .into_iter()
            .next()
            .ok_or_else(|| Error::value_error("empty array"))
    }

    pub fn view<T: Element>(&self) -> Option<&ArcArray<T, IxDyn>> {
        T::unwrap_ref(&self.data)
    }
}

impl fmt::Debug for HostArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HostArray").field(&self.data).finish()
    }
}

impl From<ArrayData> for HostArray {
    fn from(data: ArrayData) -> Self {
        HostArray::new(data)
    }
}
