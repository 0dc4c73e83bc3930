//! Catalog of the leaf operations every backend implements, with their result dtypes.
//!
//! Result dtypes are decided here, not in the backends, so deferred backends can infer
//! them before evaluation and eager backends cannot drift from them.

use std::fmt;
use std::str::FromStr;

use crate::dtype::DType;
use crate::error::{Error, Result};

/// Elementwise single-argument functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Abs,
    Sin,
    Cos,
    Tan,
    Arcsin,
    Arccos,
    Arctan,
    Sinh,
    Cosh,
    Tanh,
    Exp,
    Log,
    Log10,
    Log2,
    Sqrt,
    Floor,
    Ceil,
    Conj,
    Isnan,
    Negative,
    LogicalNot,
}

impl UnaryOp {
    pub const ALL: [UnaryOp; 21] = [
        UnaryOp::Abs,
        UnaryOp::Sin,
        UnaryOp::Cos,
        UnaryOp::Tan,
        UnaryOp::Arcsin,
        UnaryOp::Arccos,
        UnaryOp::Arctan,
        UnaryOp::Sinh,
        UnaryOp::Cosh,
        UnaryOp::Tanh,
        UnaryOp::Exp,
        UnaryOp::Log,
        UnaryOp::Log10,
        UnaryOp::Log2,
        UnaryOp::Sqrt,
        UnaryOp::Floor,
        UnaryOp::Ceil,
        UnaryOp::Conj,
        UnaryOp::Isnan,
        UnaryOp::Negative,
        UnaryOp::LogicalNot,
    ];

    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Abs => "abs",
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
            UnaryOp::Tan => "tan",
            UnaryOp::Arcsin => "arcsin",
            UnaryOp::Arccos => "arccos",
            UnaryOp::Arctan => "arctan",
            UnaryOp::Sinh => "sinh",
            UnaryOp::Cosh => "cosh",
            UnaryOp::Tanh => "tanh",
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
            UnaryOp::Log10 => "log10",
            UnaryOp::Log2 => "log2",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Floor => "floor",
            UnaryOp::Ceil => "ceil",
            UnaryOp::Conj => "conj",
            UnaryOp::Isnan => "isnan",
            UnaryOp::Negative => "negative",
            UnaryOp::LogicalNot => "logical_not",
        }
    }

    /// Result dtype for `input`; `logical` is the backend's truth-value dtype.
    pub fn result_dtype(self, input: DType, logical: DType) -> Result<DType> {
        match self {
            UnaryOp::Isnan | UnaryOp::LogicalNot => Ok(logical),
            UnaryOp::Negative if input.is_bool() => Err(Error::type_error(
                "negative is not supported for boolean arrays; use logical_not",
            )),
            UnaryOp::Abs | UnaryOp::Floor | UnaryOp::Ceil | UnaryOp::Conj | UnaryOp::Negative => {
                Ok(input)
            }
            _ => Ok(input.float_result()),
        }
    }

    /// Applies the op to one value promoted to `f64`.
    pub fn apply_f64(self, x: f64) -> f64 {
        match self {
            UnaryOp::Abs => x.abs(),
            UnaryOp::Sin => x.sin(),
            UnaryOp::Cos => x.cos(),
            UnaryOp::Tan => x.tan(),
            UnaryOp::Arcsin => x.asin(),
            UnaryOp::Arccos => x.acos(),
            UnaryOp::Arctan => x.atan(),
            UnaryOp::Sinh => x.sinh(),
            UnaryOp::Cosh => x.cosh(),
            UnaryOp::Tanh => x.tanh(),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Log10 => x.log10(),
            UnaryOp::Log2 => x.log2(),
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Floor => x.floor(),
            UnaryOp::Ceil => x.ceil(),
            UnaryOp::Conj => x,
            UnaryOp::Isnan => bool_to_f64(x.is_nan()),
            UnaryOp::Negative => -x,
            UnaryOp::LogicalNot => bool_to_f64(x == 0.0),
        }
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for UnaryOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        UnaryOp::ALL
            .into_iter()
            .find(|op| op.name() == s)
            .ok_or_else(|| Error::Attribute(s.to_string()))
    }
}

/// Elementwise two-argument functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Maximum,
    Minimum,
    Arctan2,
    LogicalAnd,
    LogicalOr,
}

impl BinaryOp {
    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Subtract => "subtract",
            BinaryOp::Multiply => "multiply",
            BinaryOp::Divide => "divide",
            BinaryOp::Maximum => "maximum",
            BinaryOp::Minimum => "minimum",
            BinaryOp::Arctan2 => "arctan2",
            BinaryOp::LogicalAnd => "logical_and",
            BinaryOp::LogicalOr => "logical_or",
        }
    }

    /// Result dtype under NumPy promotion. Boolean arithmetic widens to `int64`.
    pub fn result_dtype(self, lhs: DType, rhs: DType, logical: DType) -> DType {
        let common = lhs.promote(rhs);
        match self {
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr => logical,
            BinaryOp::Divide | BinaryOp::Arctan2 => common.float_result(),
            BinaryOp::Maximum | BinaryOp::Minimum => common,
            BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply => {
                if common.is_bool() {
                    DType::I64
                } else {
                    common
                }
            }
        }
    }

    /// Whether integer operands can be combined without a float round trip.
    pub fn is_integral(self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Subtract
                | BinaryOp::Multiply
                | BinaryOp::Maximum
                | BinaryOp::Minimum
        )
    }

    pub fn apply_f64(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Subtract => a - b,
            BinaryOp::Multiply => a * b,
            BinaryOp::Divide => a / b,
            // NaN propagates through maximum/minimum, unlike f64::max.
            BinaryOp::Maximum => {
                if a.is_nan() || b.is_nan() {
                    f64::NAN
                } else {
                    a.max(b)
                }
            }
            BinaryOp::Minimum => {
                if a.is_nan() || b.is_nan() {
                    f64::NAN
                } else {
                    a.min(b)
                }
            }
            BinaryOp::Arctan2 => a.atan2(b),
            BinaryOp::LogicalAnd => bool_to_f64(a != 0.0 && b != 0.0),
            BinaryOp::LogicalOr => bool_to_f64(a != 0.0 || b != 0.0),
        }
    }

    /// Integer path for [`BinaryOp::is_integral`] ops; wraps on overflow.
    pub fn apply_i64(self, a: i64, b: i64) -> i64 {
        match self {
            BinaryOp::Add => a.wrapping_add(b),
            BinaryOp::Subtract => a.wrapping_sub(b),
            BinaryOp::Multiply => a.wrapping_mul(b),
            BinaryOp::Maximum => a.max(b),
            BinaryOp::Minimum => a.min(b),
            other => other.apply_f64(a as f64, b as f64) as i64,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Elementwise comparisons; results use the backend's truth-value dtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl ComparisonOp {
    pub fn name(self) -> &'static str {
        match self {
            ComparisonOp::Equal => "equal",
            ComparisonOp::NotEqual => "not_equal",
            ComparisonOp::Less => "less",
            ComparisonOp::LessEqual => "less_equal",
            ComparisonOp::Greater => "greater",
            ComparisonOp::GreaterEqual => "greater_equal",
        }
    }

    pub fn apply<T: PartialOrd>(self, a: T, b: T) -> bool {
        match self {
            ComparisonOp::Equal => a == b,
            ComparisonOp::NotEqual => a != b,
            ComparisonOp::Less => a < b,
            ComparisonOp::LessEqual => a <= b,
            ComparisonOp::Greater => a > b,
            ComparisonOp::GreaterEqual => a >= b,
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reductions available both within a leaf and across a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceKind {
    Sum,
    Min,
    Max,
    Any,
    All,
}

impl ReduceKind {
    pub fn name(self) -> &'static str {
        match self {
            ReduceKind::Sum => "sum",
            ReduceKind::Min => "min",
            ReduceKind::Max => "max",
            ReduceKind::Any => "any",
            ReduceKind::All => "all",
        }
    }

    /// Binary op folding per-leaf results across a container.
    pub fn combiner(self) -> BinaryOp {
        match self {
            ReduceKind::Sum => BinaryOp::Add,
            ReduceKind::Min => BinaryOp::Minimum,
            ReduceKind::Max => BinaryOp::Maximum,
            ReduceKind::Any => BinaryOp::LogicalOr,
            ReduceKind::All => BinaryOp::LogicalAnd,
        }
    }

    pub fn result_dtype(self, input: DType, logical: DType) -> DType {
        match self {
            ReduceKind::Sum => input.sum_result(),
            ReduceKind::Min | ReduceKind::Max => input,
            ReduceKind::Any | ReduceKind::All => logical,
        }
    }

    /// Reductions without an identity reject zero-size inputs.
    pub fn has_identity(self) -> bool {
        !matches!(self, ReduceKind::Min | ReduceKind::Max)
    }
}

impl fmt::Display for ReduceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Memory-order flag accepted by `reshape` and `ravel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryOrder {
    /// Row-major.
    #[default]
    C,
    /// Column-major.
    F,
    /// F if the input is Fortran-contiguous and not C-contiguous, C if C-contiguous.
    A,
    /// Physical order of the input; backend-defined.
    K,
}

impl FromStr for MemoryOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "C" => Ok(MemoryOrder::C),
            "F" => Ok(MemoryOrder::F),
            "A" => Ok(MemoryOrder::A),
            "K" => Ok(MemoryOrder::K),
            other => Err(Error::value_error(format!(
                "order must be one of 'C', 'F', 'A' or 'K' (got '{other}')"
            ))),
        }
    }
}

impl fmt::Display for MemoryOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemoryOrder::C => "C",
            MemoryOrder::F => "F",
            MemoryOrder::A => "A",
            MemoryOrder::K => "K",
        };
        f.write_str(s)
    }
}

/// Physical contiguity reported by a backend for one leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Layout {
    pub c_contiguous: bool,
    pub f_contiguous: bool,
}

impl Layout {
    /// Layout of a freshly allocated dense row-major buffer.
    pub fn row_major(ndim: usize) -> Self {
        Layout {
            c_contiguous: true,
            f_contiguous: ndim <= 1,
        }
    }

    /// Resolves `A` against this layout; other orders pass through.
    pub fn resolve(self, order: MemoryOrder) -> Result<MemoryOrder> {
        match order {
            MemoryOrder::A => {
                if self.c_contiguous {
                    Ok(MemoryOrder::C)
                } else if self.f_contiguous {
                    Ok(MemoryOrder::F)
                } else {
                    Err(Error::value_error(
                        "order 'A' requires a C- or Fortran-contiguous array",
                    ))
                }
            }
            other => Ok(other),
        }
    }
}

/// Vector norm selectors for `linalg_norm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NormOrd {
    /// Euclidean norm over every entry of every leaf.
    Two,
    /// Largest absolute entry.
    Inf,
}

fn bool_to_f64(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_a_resolves_from_layout() {
        let c = Layout::row_major(2);
        assert_eq!(c.resolve(MemoryOrder::A).unwrap(), MemoryOrder::C);
        let f = Layout {
            c_contiguous: false,
            f_contiguous: true,
        };
        assert_eq!(f.resolve(MemoryOrder::A).unwrap(), MemoryOrder::F);
        assert!(Layout::default().resolve(MemoryOrder::A).is_err());
    }

    #[test]
    fn unknown_order_is_value_error() {
        assert!(matches!("Z".parse::<MemoryOrder>(), Err(Error::Value(_))));
    }

    #[test]
    fn boolean_arithmetic_widens() {
        assert_eq!(
            BinaryOp::Add.result_dtype(DType::Bool, DType::Bool, DType::Bool),
            DType::I64
        );
        assert!(UnaryOp::Negative.result_dtype(DType::Bool, DType::Bool).is_err());
    }
}
