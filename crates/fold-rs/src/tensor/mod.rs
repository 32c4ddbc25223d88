//! Dense tensor values flowing through graph attributes and kernels.
//!
//! Tensors here are host-resident and immutable: `Const` nodes carry them as
//! attributes, kernels consume and produce them, and the constant folder
//! fetches them back from an isolated execution.

pub mod dtype;
mod host_tensor;
pub mod shape;

pub use dtype::DType;
pub use host_tensor::{Tensor, TensorError, TensorSpec};
pub use shape::Shape;
