//! Arena-backed dataflow graph with stable node handles.
//!
//! Nodes and edges live in slot vectors indexed by their ids; removing an
//! entity empties its slot and the id is never handed out again, so
//! handle-keyed side tables stay valid across mutation. Slot 0 holds the
//! SOURCE sentinel and slot 1 the SINK sentinel.

use std::collections::HashMap;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::tensor::DType;

use super::edge::{Edge, EdgeId, CONTROL_SLOT};
use super::node::{Node, NodeClass, NodeDef, NodeId, SINK_OP, SOURCE_OP};
use super::registry::OpRegistry;
use super::GraphError;

/// Mutable dataflow graph. Structural mutation requires exclusive access.
#[derive(Debug, Clone)]
pub struct Graph {
    registry: Arc<OpRegistry>,
    nodes: Vec<Option<Node>>,
    edges: Vec<Option<Edge>>,
    names: HashMap<String, NodeId>,
    num_nodes: usize,
    num_edges: usize,
    name_counter: u64,
}

impl Graph {
    pub const SOURCE: NodeId = NodeId(0);
    pub const SINK: NodeId = NodeId(1);

    /// Creates an empty graph containing only the SOURCE and SINK sentinels.
    pub fn new(registry: Arc<OpRegistry>) -> Self {
        let mut graph = Graph {
            registry,
            nodes: Vec::new(),
            edges: Vec::new(),
            names: HashMap::new(),
            num_nodes: 0,
            num_edges: 0,
            name_counter: 0,
        };
        graph.push_node(NodeDef::new(SOURCE_OP, SOURCE_OP), Vec::new(), Vec::new());
        graph.push_node(NodeDef::new(SINK_OP, SINK_OP), Vec::new(), Vec::new());
        graph
    }

    pub fn registry(&self) -> &Arc<OpRegistry> {
        &self.registry
    }

    pub fn source_node(&self) -> NodeId {
        Self::SOURCE
    }

    pub fn sink_node(&self) -> NodeId {
        Self::SINK
    }

    /// Adds a node with already resolved input and output types.
    ///
    /// Prefer [`super::NodeBuilder`], which infers types and wires inputs.
    pub fn add_node(
        &mut self,
        def: NodeDef,
        input_types: Vec<DType>,
        output_types: Vec<DType>,
    ) -> Result<NodeId, GraphError> {
        if !self.registry.contains(&def.op) {
            return Err(GraphError::UnknownOp {
                node: def.name,
                op: def.op,
            });
        }
        if self.names.contains_key(&def.name) {
            return Err(GraphError::DuplicateName { name: def.name });
        }
        let name = def.name.clone();
        let id = self.push_node(def, input_types, output_types);
        self.names.insert(name, id);
        Ok(id)
    }

    /// Copies `node` (definition and types, no edges) into this graph.
    pub fn copy_node(&mut self, node: &Node) -> Result<NodeId, GraphError> {
        if node.is_sentinel() {
            return Err(GraphError::SentinelMutation { node: node.id() });
        }
        self.add_node(
            node.def.clone(),
            node.input_types.clone(),
            node.output_types.clone(),
        )
    }

    /// Removes a node and every edge incident to it, returning its definition.
    pub fn remove_node(&mut self, id: NodeId) -> Result<NodeDef, GraphError> {
        let node = self.node(id).ok_or(GraphError::NodeNotFound { node: id })?;
        if node.is_sentinel() {
            return Err(GraphError::SentinelMutation { node: id });
        }
        let incident: Vec<EdgeId> = node
            .in_edges
            .iter()
            .chain(node.out_edges.iter())
            .copied()
            .collect();
        for edge in incident {
            self.remove_edge(edge)?;
        }
        let node = self.nodes[id.index()]
            .take()
            .ok_or(GraphError::NodeNotFound { node: id })?;
        self.num_nodes -= 1;
        self.names.remove(&node.def.name);
        Ok(node.def)
    }

    /// Adds a data edge `src:src_output -> dst:dst_input`, or a control edge when
    /// both ports are [`CONTROL_SLOT`].
    pub fn add_edge(
        &mut self,
        src: NodeId,
        src_output: i32,
        dst: NodeId,
        dst_input: i32,
    ) -> Result<EdgeId, GraphError> {
        let src_node = self.node(src).ok_or(GraphError::NodeNotFound { node: src })?;
        let dst_node = self.node(dst).ok_or(GraphError::NodeNotFound { node: dst })?;
        if src_node.is_sink() || dst_node.is_source() {
            return Err(GraphError::InvalidEdge {
                src,
                dst,
                reason: "edges cannot leave SINK or enter SOURCE".into(),
            });
        }
        let is_control = src_output == CONTROL_SLOT || dst_input == CONTROL_SLOT;
        if is_control {
            if src_output != dst_input {
                return Err(GraphError::InvalidEdge {
                    src,
                    dst,
                    reason: "control edges must use the control slot on both ends".into(),
                });
            }
        } else {
            if src_node.is_sentinel() || dst_node.is_sentinel() {
                return Err(GraphError::InvalidEdge {
                    src,
                    dst,
                    reason: "sentinels only take control edges".into(),
                });
            }
            if src_output < 0 || src_output as usize >= src_node.num_outputs() {
                return Err(GraphError::InvalidPort {
                    node: src,
                    port: src_output,
                });
            }
            if dst_input < 0 || dst_input as usize >= dst_node.num_inputs() {
                return Err(GraphError::InvalidPort {
                    node: dst,
                    port: dst_input,
                });
            }
            if self.input_edge(dst, dst_input as usize).is_some() {
                return Err(GraphError::InvalidEdge {
                    src,
                    dst,
                    reason: format!("input {dst_input} is already connected"),
                });
            }
        }

        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(Some(Edge {
            id,
            src,
            src_output,
            dst,
            dst_input,
        }));
        self.num_edges += 1;
        if let Some(node) = self.nodes[src.index()].as_mut() {
            node.out_edges.push(id);
        }
        if let Some(node) = self.nodes[dst.index()].as_mut() {
            node.in_edges.push(id);
        }
        Ok(id)
    }

    pub fn add_control_edge(&mut self, src: NodeId, dst: NodeId) -> Result<EdgeId, GraphError> {
        self.add_edge(src, CONTROL_SLOT, dst, CONTROL_SLOT)
    }

    pub fn remove_edge(&mut self, id: EdgeId) -> Result<Edge, GraphError> {
        let edge = self
            .edges
            .get_mut(id.0 as usize)
            .and_then(Option::take)
            .ok_or(GraphError::EdgeNotFound { edge: id })?;
        self.num_edges -= 1;
        if let Some(node) = self.nodes[edge.src.index()].as_mut() {
            node.out_edges.retain(|e| *e != id);
        }
        if let Some(node) = self.nodes[edge.dst.index()].as_mut() {
            node.in_edges.retain(|e| *e != id);
        }
        Ok(edge)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Live nodes in id order, sentinels included.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.nodes.iter().filter_map(Option::as_ref)
    }

    /// Live non-sentinel nodes in id order.
    pub fn op_nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.nodes().filter(|n| !n.is_sentinel())
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> + '_ {
        self.edges.iter().filter_map(Option::as_ref)
    }

    pub fn in_edges(&self, id: NodeId) -> impl Iterator<Item = &Edge> + '_ {
        self.node(id)
            .into_iter()
            .flat_map(|n| n.in_edges.iter())
            .filter_map(move |e| self.edge(*e))
    }

    pub fn out_edges(&self, id: NodeId) -> impl Iterator<Item = &Edge> + '_ {
        self.node(id)
            .into_iter()
            .flat_map(|n| n.out_edges.iter())
            .filter_map(move |e| self.edge(*e))
    }

    /// Returns the data edge feeding `dst` at `input`, if connected.
    pub fn input_edge(&self, dst: NodeId, input: usize) -> Option<&Edge> {
        self.in_edges(dst)
            .find(|e| !e.is_control() && e.dst_input as usize == input)
    }

    /// Producers of `dst`'s data inputs, ordered by input port.
    pub fn data_inputs(&self, dst: NodeId) -> Vec<(NodeId, usize)> {
        let mut inputs: SmallVec<[(i32, NodeId, usize); 4]> = self
            .in_edges(dst)
            .filter(|e| !e.is_control())
            .map(|e| (e.dst_input, e.src, e.src_output as usize))
            .collect();
        inputs.sort_unstable_by_key(|(port, _, _)| *port);
        inputs.into_iter().map(|(_, src, out)| (src, out)).collect()
    }

    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    /// Returns a fresh name derived from `prefix` that no live node uses and no
    /// other call has returned.
    pub fn new_name(&mut self, prefix: &str) -> String {
        loop {
            let name = format!("{prefix}/_{}", self.name_counter);
            self.name_counter += 1;
            if !self.names.contains_key(&name) {
                return name;
            }
        }
    }

    /// Live node count including the two sentinels.
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_op_nodes(&self) -> usize {
        self.num_nodes - 2
    }

    pub fn num_edges(&self) -> usize {
        self.num_edges
    }

    /// Upper bound (exclusive) on node ids handed out so far.
    pub fn num_node_ids(&self) -> usize {
        self.nodes.len()
    }

    fn push_node(
        &mut self,
        def: NodeDef,
        input_types: Vec<DType>,
        output_types: Vec<DType>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let class = NodeClass::from_op(&def.op);
        self.nodes.push(Some(Node {
            id,
            def,
            class,
            input_types,
            output_types,
            in_edges: SmallVec::new(),
            out_edges: SmallVec::new(),
        }));
        self.num_nodes += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeBuilder;
    use crate::tensor::Tensor;

    #[test]
    fn removed_ids_are_not_reused() {
        let mut g = Graph::new(OpRegistry::standard());
        let a = NodeBuilder::constant("a", Tensor::scalar_f32(1.0))
            .finalize(&mut g)
            .unwrap();
        let neg = NodeBuilder::new("neg", "Neg").input(a).finalize(&mut g).unwrap();
        assert_eq!(g.num_edges(), 1);

        g.remove_node(a).unwrap();
        assert!(!g.contains(a));
        assert_eq!(g.num_edges(), 0);
        assert!(g.in_edges(neg).next().is_none());

        let b = NodeBuilder::constant("b", Tensor::scalar_f32(2.0))
            .finalize(&mut g)
            .unwrap();
        assert!(b.index() > neg.index());
        assert_eq!(g.num_op_nodes(), 2);
    }

    #[test]
    fn sentinels_cannot_be_removed() {
        let mut g = Graph::new(OpRegistry::standard());
        assert!(matches!(
            g.remove_node(Graph::SINK),
            Err(GraphError::SentinelMutation { .. })
        ));
        assert_eq!(g.num_nodes(), 2);
    }

    #[test]
    fn generated_names_are_unique() {
        let mut g = Graph::new(OpRegistry::standard());
        NodeBuilder::constant("add/_1", Tensor::scalar_f32(1.0))
            .finalize(&mut g)
            .unwrap();
        assert_eq!(g.new_name("add"), "add/_0");
        assert_eq!(g.new_name("add"), "add/_2");
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut g = Graph::new(OpRegistry::standard());
        let first = NodeBuilder::constant("n", Tensor::scalar_f32(2.0))
            .finalize(&mut g)
            .unwrap();
        let err = NodeBuilder::constant("n", Tensor::scalar_f32(7.0))
            .finalize(&mut g)
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateName { ref name } if name == "n"));
        assert_eq!(g.num_op_nodes(), 1);
        assert_eq!(g.find_node("n"), Some(first));

        g.remove_node(first).unwrap();
        assert_eq!(g.find_node("n"), None);
        NodeBuilder::constant("n", Tensor::scalar_f32(7.0))
            .finalize(&mut g)
            .unwrap();
    }
}
