//! Constant folding for dataflow graphs.
//!
//! The crate is split the way the pass uses it:
//!
//! - [`tensor`]: dense host tensors carried by literals and kernel values.
//! - [`graph`]: the arena graph, op registry and traversal helpers.
//! - [`runtime`]: kernels, devices, the rendezvous and the local executor the
//!   isolated constant graph runs on.
//! - [`optimizer`]: the constant-folding pass and the pipeline that repeats it
//!   until the graph stops changing.
//!
//! Kernels for compute ops live outside this crate behind
//! [`runtime::KernelRuntime`]; `fold-rs-backend-ref-cpu` provides a reference
//! implementation.

mod env;
pub mod graph;
pub mod optimizer;
pub mod runtime;
pub mod tensor;

pub use graph::{Graph, Node, NodeBuilder, NodeId, OpRegistry};
pub use optimizer::{fold_constants, ConstantFolder, ConstantFoldingOptions};
pub use tensor::{DType, Shape, Tensor};
