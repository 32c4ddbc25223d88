//! Dense host tensor carried by `Const` attributes, kernel inputs/outputs and fetch results.

use std::sync::Arc;

use serde::{ser::SerializeStruct, Deserialize, Serialize};
use thiserror::Error;

use super::{dtype::DType, shape::Shape};

/// Tensor metadata coupling dtype and shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: DType,
    pub shape: Shape,
}

impl TensorSpec {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        Self { dtype, shape }
    }

    /// Returns total byte length implied by the spec.
    pub fn byte_len(&self) -> usize {
        self.shape.num_elements() * self.dtype.size_in_bytes()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TensorError {
    #[error("tensor data length ({len}) does not match shape {shape}")]
    LengthMismatch { len: usize, shape: Shape },
    #[error("expected {expected} tensor, found {actual}")]
    DTypeMismatch { expected: DType, actual: DType },
}

/// Immutable dense tensor. Payload bytes are little-endian and shared on clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tensor {
    spec: TensorSpec,
    bytes: Arc<[u8]>,
}

impl Tensor {
    /// Wraps raw little-endian bytes, validating the length against the spec.
    pub fn from_bytes(spec: TensorSpec, bytes: Arc<[u8]>) -> Result<Self, TensorError> {
        if bytes.len() != spec.byte_len() {
            return Err(TensorError::LengthMismatch {
                len: bytes.len(),
                shape: spec.shape,
            });
        }
        Ok(Self { spec, bytes })
    }

    /// Constructs an `F32` tensor from raw values.
    pub fn from_f32(shape: Shape, data: &[f32]) -> Result<Self, TensorError> {
        check_len(&shape, data.len())?;
        let bytes = encode(data.iter().map(|v| v.to_le_bytes()));
        Ok(Self {
            spec: TensorSpec::new(DType::F32, shape),
            bytes,
        })
    }

    /// Constructs an `Si32` tensor from raw values.
    pub fn from_i32(shape: Shape, data: &[i32]) -> Result<Self, TensorError> {
        check_len(&shape, data.len())?;
        let bytes = encode(data.iter().map(|v| v.to_le_bytes()));
        Ok(Self {
            spec: TensorSpec::new(DType::Si32, shape),
            bytes,
        })
    }

    pub fn scalar_f32(value: f32) -> Self {
        Self {
            spec: TensorSpec::new(DType::F32, Shape::scalar()),
            bytes: encode(std::iter::once(value.to_le_bytes())),
        }
    }

    pub fn scalar_i32(value: i32) -> Self {
        Self {
            spec: TensorSpec::new(DType::Si32, Shape::scalar()),
            bytes: encode(std::iter::once(value.to_le_bytes())),
        }
    }

    pub fn spec(&self) -> &TensorSpec {
        &self.spec
    }

    pub fn dtype(&self) -> DType {
        self.spec.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.spec.shape
    }

    /// Returns the total number of elements stored in the tensor.
    pub fn len(&self) -> usize {
        self.spec.shape.num_elements()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Decodes the payload as `f32` values.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>, TensorError> {
        self.expect_dtype(DType::F32)?;
        Ok(self
            .bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Decodes the payload as `i32` values.
    pub fn to_i32_vec(&self) -> Result<Vec<i32>, TensorError> {
        self.expect_dtype(DType::Si32)?;
        Ok(self
            .bytes
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    fn expect_dtype(&self, expected: DType) -> Result<(), TensorError> {
        if self.spec.dtype != expected {
            return Err(TensorError::DTypeMismatch {
                expected,
                actual: self.spec.dtype,
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tensor<{}, {}>", self.spec.dtype, self.spec.shape)?;
        match self.spec.dtype {
            DType::F32 => {
                if let Ok(values) = self.to_f32_vec() {
                    write!(f, " {:?}", preview(&values))?;
                }
            }
            DType::Si32 => {
                if let Ok(values) = self.to_i32_vec() {
                    write!(f, " {:?}", preview(&values))?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl Serialize for Tensor {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("Tensor", 2)?;
        state.serialize_field("spec", &self.spec)?;
        state.serialize_field("bytes", self.bytes.as_ref())?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for Tensor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct TensorHelper {
            spec: TensorSpec,
            bytes: Vec<u8>,
        }

        let helper = TensorHelper::deserialize(deserializer)?;
        Tensor::from_bytes(helper.spec, Arc::from(helper.bytes)).map_err(serde::de::Error::custom)
    }
}

fn check_len(shape: &Shape, len: usize) -> Result<(), TensorError> {
    if len != shape.num_elements() {
        return Err(TensorError::LengthMismatch {
            len,
            shape: shape.clone(),
        });
    }
    Ok(())
}

fn encode<const N: usize>(values: impl Iterator<Item = [u8; N]>) -> Arc<[u8]> {
    let mut bytes = Vec::new();
    for chunk in values {
        bytes.extend_from_slice(&chunk);
    }
    Arc::from(bytes.into_boxed_slice())
}

fn preview<T: Copy>(values: &[T]) -> &[T] {
    &values[..values.len().min(8)]
}
