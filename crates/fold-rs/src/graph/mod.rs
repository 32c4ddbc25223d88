//! Dataflow graph representation.
//!
//! A [`Graph`] owns its nodes and edges in an arena addressed by stable
//! [`NodeId`] handles. Data edges connect an output port to an input port;
//! control edges use [`CONTROL_SLOT`] on both ends and only impose ordering.
//! Op metadata comes from an [`OpRegistry`] shared by `Arc` between a graph
//! and any graph copied out of it.

mod algorithm;
mod arena;
mod builder;
mod edge;
mod node;
mod registry;
mod tensor_id;
mod text;
pub mod topology;

use thiserror::Error;

pub use algorithm::{reverse_dfs, topological_order};
pub use arena::Graph;
pub use builder::{NodeBuilder, NodeOut};
pub use edge::{Edge, EdgeId, CONTROL_SLOT};
pub use node::{AttrValue, Node, NodeClass, NodeDef, NodeId};
pub use registry::{Arity, OpDef, OpRegistry, OutputTypes};
pub use tensor_id::TensorId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("node `{node}` uses unregistered op `{op}`")]
    UnknownOp { node: String, op: String },
    #[error("node {node} does not exist")]
    NodeNotFound { node: NodeId },
    #[error("edge {edge:?} does not exist")]
    EdgeNotFound { edge: EdgeId },
    #[error("node {node} has no port {port}")]
    InvalidPort { node: NodeId, port: i32 },
    #[error("invalid edge {src} -> {dst}: {reason}")]
    InvalidEdge {
        src: NodeId,
        dst: NodeId,
        reason: String,
    },
    #[error("node `{node}` is missing attribute `{attr}`")]
    MissingAttr { node: String, attr: String },
    #[error("invalid node `{node}`: {reason}")]
    InvalidNode { node: String, reason: String },
    #[error("a node named `{name}` already exists")]
    DuplicateName { name: String },
    #[error("sentinel node {node} cannot be copied or removed")]
    SentinelMutation { node: NodeId },
}
