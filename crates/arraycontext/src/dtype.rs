//! Enumerates the scalar element types understood by every array backend.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Logical dtype identifier shared between host arrays and backend leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// Boolean truth values.
    Bool,
    /// 8-bit signed integer; doubles as the false sentinel for backends without booleans.
    I8,
    I32,
    I64,
    /// 32-bit IEEE-754 float.
    F32,
    /// 64-bit IEEE-754 float.
    F64,
}

impl DType {
    pub fn is_bool(self) -> bool {
        matches!(self, DType::Bool)
    }

    pub fn is_integer(self) -> bool {
        matches!(self, DType::I8 | DType::I32 | DType::I64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::Bool | DType::I8 => 1,
            DType::I32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }

    /// NumPy-style name (`float64`, `int8`, ...).
    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::I8 => "int8",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::F32 => "float32",
            DType::F64 => "float64",
        }
    }

    /// Common dtype of two operands under NumPy promotion.
    ///
    /// Integers combined with `f32` stay `f32` only when the integer fits the mantissa
    /// (`bool`, `int8`); wider integers promote to `f64`.
    pub fn promote(self, other: DType) -> DType {
        match (self.is_float(), other.is_float()) {
            (true, true) => self.max(other),
            (false, false) => self.max(other),
            (true, false) => float_with_int(self, other),
            (false, true) => float_with_int(other, self),
        }
    }

    /// Result dtype of transcendental math on this dtype.
    pub fn float_result(self) -> DType {
        match self {
            DType::F32 => DType::F32,
            DType::Bool | DType::I8 => DType::F32,
            _ => DType::F64,
        }
    }

    /// Accumulator dtype used by `sum`: integers widen to `int64`.
    pub fn sum_result(self) -> DType {
        if self.is_float() {
            self
        } else {
            DType::I64
        }
    }
}

fn float_with_int(float: DType, int: DType) -> DType {
    match (float, int) {
        (DType::F32, DType::Bool | DType::I8) => DType::F32,
        _ => DType::F64,
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bool" => Ok(DType::Bool),
            "int8" | "i8" => Ok(DType::I8),
            "int32" | "i32" => Ok(DType::I32),
            "int64" | "i64" => Ok(DType::I64),
            "float32" | "f32" => Ok(DType::F32),
            "float64" | "f64" => Ok(DType::F64),
            other => Err(Error::type_error(format!("unknown dtype `{other}`"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_follows_numpy() {
        assert_eq!(DType::I32.promote(DType::I64), DType::I64);
        assert_eq!(DType::I8.promote(DType::F32), DType::F32);
        assert_eq!(DType::I32.promote(DType::F32), DType::F64);
        assert_eq!(DType::Bool.promote(DType::Bool), DType::Bool);
        assert_eq!(DType::F32.promote(DType::F64), DType::F64);
    }

    #[test]
    fn parses_numpy_names() {
        assert_eq!("float32".parse::<DType>().unwrap(), DType::F32);
        assert!("complex64".parse::<DType>().is_err());
    }
}
