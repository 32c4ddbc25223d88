use std::collections::BTreeMap;

use crate::tensor::Tensor;

use super::arena::Graph;
use super::node::{AttrValue, NodeDef, NodeId};
use super::GraphError;

/// Reference to one output of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeOut {
    pub node: NodeId,
    pub index: usize,
}

impl NodeOut {
    pub fn new(node: NodeId, index: usize) -> Self {
        Self { node, index }
    }
}

impl From<NodeId> for NodeOut {
    fn from(node: NodeId) -> Self {
        Self { node, index: 0 }
    }
}

/// Fluent constructor that validates a node against its op definition and
/// wires its inputs.
pub struct NodeBuilder {
    name: String,
    op: String,
    inputs: Vec<NodeOut>,
    control_inputs: Vec<NodeId>,
    attrs: BTreeMap<String, AttrValue>,
}

impl NodeBuilder {
    pub fn new(name: impl Into<String>, op: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: op.into(),
            inputs: Vec::new(),
            control_inputs: Vec::new(),
            attrs: BTreeMap::new(),
        }
    }

    /// Builder for a `Const` node carrying `value`.
    pub fn constant(name: impl Into<String>, value: Tensor) -> Self {
        let dtype = value.dtype();
        Self::new(name, "Const")
            .attr("dtype", dtype)
            .attr("value", value)
    }

    pub fn input(mut self, input: impl Into<NodeOut>) -> Self {
        self.inputs.push(input.into());
        self
    }

    pub fn inputs<I, T>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<NodeOut>,
    {
        self.inputs.extend(inputs.into_iter().map(Into::into));
        self
    }

    pub fn control_input(mut self, node: NodeId) -> Self {
        self.control_inputs.push(node);
        self
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    /// Validates the node, adds it to `graph`, and connects its inputs.
    pub fn finalize(self, graph: &mut Graph) -> Result<NodeId, GraphError> {
        let op_def = graph
            .registry()
            .lookup(&self.op)
            .ok_or_else(|| GraphError::UnknownOp {
                node: self.name.clone(),
                op: self.op.clone(),
            })?;

        if !op_def.inputs.accepts(self.inputs.len()) {
            return Err(GraphError::InvalidNode {
                node: self.name,
                reason: format!(
                    "{} does not accept {} data inputs",
                    op_def.name,
                    self.inputs.len()
                ),
            });
        }
        for key in &op_def.required_attrs {
            if !self.attrs.contains_key(*key) {
                return Err(GraphError::MissingAttr {
                    node: self.name,
                    attr: key.to_string(),
                });
            }
        }

        let mut input_types = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            let producer = graph
                .node(input.node)
                .ok_or(GraphError::NodeNotFound { node: input.node })?;
            let dtype = producer
                .output_types()
                .get(input.index)
                .copied()
                .ok_or(GraphError::InvalidPort {
                    node: input.node,
                    port: input.index as i32,
                })?;
            input_types.push(dtype);
        }
        let output_types = op_def.output_types(&self.name, &input_types, &self.attrs)?;

        let def = NodeDef {
            name: self.name,
            op: self.op,
            attrs: self.attrs,
        };
        let id = graph.add_node(def, input_types, output_types)?;
        if let Err(err) = connect(graph, id, &self.inputs, &self.control_inputs) {
            graph.remove_node(id)?;
            return Err(err);
        }
        Ok(id)
    }
}

fn connect(
    graph: &mut Graph,
    id: NodeId,
    inputs: &[NodeOut],
    control_inputs: &[NodeId],
) -> Result<(), GraphError> {
    for (port, input) in inputs.iter().enumerate() {
        graph.add_edge(input.node, input.index as i32, id, port as i32)?;
    }
    for control in control_inputs {
        graph.add_control_edge(*control, id)?;
    }
    Ok(())
}
