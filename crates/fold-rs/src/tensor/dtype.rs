//! Enumerates the scalar element types carried by graph tensors.

use serde::{Deserialize, Serialize};

/// Logical dtype identifier shared between graph attributes and kernel payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// 1-byte boolean.
    I1,
    /// 32-bit signed integer, primarily for shapes and indices.
    Si32,
    /// 64-bit signed integer.
    Si64,
    /// 32-bit floating point following IEEE-754 semantics.
    F32,
    /// 64-bit floating point.
    F64,
}

impl DType {
    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::I1 => 1,
            DType::Si32 | DType::F32 => 4,
            DType::Si64 | DType::F64 => 8,
        }
    }

    /// Returns `true` when the dtype is a floating-point representation.
    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    /// Returns `true` when the dtype is a signed integer.
    pub fn is_integer(self) -> bool {
        matches!(self, DType::Si32 | DType::Si64)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DType::I1 => "i1",
            DType::Si32 => "si32",
            DType::Si64 => "si64",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
