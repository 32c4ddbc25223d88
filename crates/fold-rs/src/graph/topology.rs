use std::collections::HashMap;
use std::fmt;

use super::arena::Graph;
use super::node::NodeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    DanglingEdge { src: NodeId, dst: NodeId },
    UnconnectedInput { node: NodeId, input: usize },
    Cycle { node: NodeId },
}

impl fmt::Display for TopologyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyError::DanglingEdge { src, dst } => {
                write!(f, "edge {src} -> {dst} references a removed node")
            }
            TopologyError::UnconnectedInput { node, input } => {
                write!(f, "input {input} of node {node} is not connected")
            }
            TopologyError::Cycle { node } => write!(f, "cycle through node {node}"),
        }
    }
}

impl std::error::Error for TopologyError {}

/// Checks that every edge joins live nodes, every data input is connected,
/// and the graph is acyclic.
pub fn validate_graph(graph: &Graph) -> Result<(), TopologyError> {
    for edge in graph.edges() {
        if !graph.contains(edge.src()) || !graph.contains(edge.dst()) {
            return Err(TopologyError::DanglingEdge {
                src: edge.src(),
                dst: edge.dst(),
            });
        }
    }

    for node in graph.op_nodes() {
        for input in 0..node.num_inputs() {
            if graph.input_edge(node.id(), input).is_none() {
                return Err(TopologyError::UnconnectedInput {
                    node: node.id(),
                    input,
                });
            }
        }
    }

    // Kahn's algorithm; anything left with pending producers sits on a cycle.
    let mut pending: HashMap<NodeId, usize> = graph
        .nodes()
        .map(|n| (n.id(), n.in_edge_ids().len()))
        .collect();
    let mut ready: Vec<NodeId> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut visited = 0usize;
    while let Some(id) = ready.pop() {
        visited += 1;
        for edge in graph.out_edges(id) {
            if let Some(count) = pending.get_mut(&edge.dst()) {
                *count -= 1;
                if *count == 0 {
                    ready.push(edge.dst());
                }
            }
        }
    }
    if visited != graph.num_nodes() {
        let node = pending
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(id, _)| *id)
            .min()
            .unwrap_or(Graph::SINK);
        return Err(TopologyError::Cycle { node });
    }
    Ok(())
}
