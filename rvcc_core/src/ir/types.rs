//! The IR's closed set of primitive types (spec §3.1).
//!
//! Aggregates never appear as a first-class `DataType`: array shapes are carried as
//! side data on the handful of operations that need them (`Alloca`, `Gep`, global
//! declarations). Every SSA value in the IR is one of these eight scalars.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    Void,
    I1,
    I8,
    I32,
    I64,
    F32,
    F64,
    Ptr,
}

impl DataType {
    pub fn is_integer(self) -> bool {
        matches!(self, DataType::I1 | DataType::I8 | DataType::I32 | DataType::I64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, DataType::F32 | DataType::F64)
    }

    /// Numeric-promotion rank used by the builder's mismatched-operand coercion:
    /// float > i64 > i32 (i1 widens to i32 before comparison).
    pub fn promotion_rank(self) -> u8 {
        match self {
            DataType::F64 => 5,
            DataType::F32 => 4,
            DataType::I64 => 3,
            DataType::I32 => 2,
            DataType::I8 => 1,
            DataType::I1 => 0,
            DataType::Void | DataType::Ptr => 0,
        }
    }

    pub fn size_bytes(self) -> u32 {
        match self {
            DataType::Void => 0,
            DataType::I1 | DataType::I8 => 1,
            DataType::I32 | DataType::F32 => 4,
            DataType::I64 | DataType::F64 | DataType::Ptr => 8,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::Void => "void",
            DataType::I1 => "i1",
            DataType::I8 => "i8",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
            DataType::Ptr => "ptr",
        };
        write!(f, "{s}")
    }
}
