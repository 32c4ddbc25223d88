use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::tensor::{DType, Shape, Tensor};

use super::edge::EdgeId;

/// Stable arena handle for a node. Handles are never reused within a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Typed node attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Tensor(Tensor),
    Type(DType),
    Shape(Shape),
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl AttrValue {
    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            AttrValue::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<DType> {
        match self {
            AttrValue::Type(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<Tensor> for AttrValue {
    fn from(value: Tensor) -> Self {
        AttrValue::Tensor(value)
    }
}

impl From<DType> for AttrValue {
    fn from(value: DType) -> Self {
        AttrValue::Type(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

/// Serializable node definition: everything about a node except its wiring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    pub name: String,
    pub op: String,
    pub attrs: BTreeMap<String, AttrValue>,
}

impl NodeDef {
    pub fn new(name: impl Into<String>, op: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: op.into(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.get(key)
    }
}

/// Structural category of a node, derived from its op name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeClass {
    Source,
    Sink,
    Constant,
    Send,
    Recv,
    Switch,
    Merge,
    Enter,
    Exit,
    NextIteration,
    Other,
}

impl NodeClass {
    pub(crate) fn from_op(op: &str) -> Self {
        match op {
            SOURCE_OP => NodeClass::Source,
            SINK_OP => NodeClass::Sink,
            "Const" => NodeClass::Constant,
            "_Send" => NodeClass::Send,
            "_Recv" => NodeClass::Recv,
            "Switch" => NodeClass::Switch,
            "Merge" => NodeClass::Merge,
            "Enter" => NodeClass::Enter,
            "Exit" => NodeClass::Exit,
            "NextIteration" => NodeClass::NextIteration,
            _ => NodeClass::Other,
        }
    }

    pub fn is_control_flow(self) -> bool {
        matches!(
            self,
            NodeClass::Switch
                | NodeClass::Merge
                | NodeClass::Enter
                | NodeClass::Exit
                | NodeClass::NextIteration
        )
    }
}

pub(crate) const SOURCE_OP: &str = "_SOURCE";
pub(crate) const SINK_OP: &str = "_SINK";

/// A node stored in the graph arena.
#[derive(Debug, Clone)]
pub struct Node {
    pub(super) id: NodeId,
    pub(super) def: NodeDef,
    pub(super) class: NodeClass,
    pub(super) input_types: Vec<DType>,
    pub(super) output_types: Vec<DType>,
    pub(super) in_edges: SmallVec<[EdgeId; 4]>,
    pub(super) out_edges: SmallVec<[EdgeId; 4]>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn op(&self) -> &str {
        &self.def.op
    }

    pub fn def(&self) -> &NodeDef {
        &self.def
    }

    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.def.attrs.get(key)
    }

    pub fn class(&self) -> NodeClass {
        self.class
    }

    pub fn input_types(&self) -> &[DType] {
        &self.input_types
    }

    pub fn output_types(&self) -> &[DType] {
        &self.output_types
    }

    pub fn num_inputs(&self) -> usize {
        self.input_types.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.output_types.len()
    }

    pub fn is_source(&self) -> bool {
        self.class == NodeClass::Source
    }

    pub fn is_sink(&self) -> bool {
        self.class == NodeClass::Sink
    }

    /// True for SOURCE and SINK.
    pub fn is_sentinel(&self) -> bool {
        matches!(self.class, NodeClass::Source | NodeClass::Sink)
    }

    pub fn is_constant(&self) -> bool {
        self.class == NodeClass::Constant
    }

    pub fn is_send(&self) -> bool {
        self.class == NodeClass::Send
    }

    pub fn is_recv(&self) -> bool {
        self.class == NodeClass::Recv
    }

    pub fn is_control_flow(&self) -> bool {
        self.class.is_control_flow()
    }

    pub fn in_edge_ids(&self) -> &[EdgeId] {
        &self.in_edges
    }

    pub fn out_edge_ids(&self) -> &[EdgeId] {
        &self.out_edges
    }
}
