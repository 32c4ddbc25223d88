use std::collections::{BTreeSet, HashMap};

use crate::graph::{Graph, GraphError, NodeId};

use super::discover::FoldableSet;

/// Isolated-graph node to the original node whose value it computes, in
/// discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundaryMap {
    entries: Vec<(NodeId, NodeId)>,
}

impl BoundaryMap {
    pub fn entries(&self) -> &[(NodeId, NodeId)] {
        &self.entries
    }

    pub fn originals(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.iter().map(|(_, original)| *original)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct ExtractedGraph {
    pub graph: Graph,
    pub boundary: BoundaryMap,
    /// Ops the isolated graph instantiates, for diagnostics.
    pub ops: BTreeSet<String>,
}

/// Copies the foldable nodes and the edges between them into a fresh graph
/// sharing `original`'s op registry.
///
/// A member is a boundary node when one of its out-edges reaches a non-member
/// other than SINK. Literals are never boundary nodes: their value is already
/// in the graph.
pub fn extract_constant_graph(
    original: &Graph,
    foldable: &FoldableSet,
) -> Result<ExtractedGraph, GraphError> {
    let mut graph = Graph::new(original.registry().clone());
    let mut node_map: HashMap<NodeId, NodeId> = HashMap::with_capacity(foldable.len() + 2);
    node_map.insert(original.source_node(), graph.source_node());
    node_map.insert(original.sink_node(), graph.sink_node());
    let mut ops = BTreeSet::new();

    for &id in foldable.nodes() {
        let node = original.node(id).ok_or(GraphError::NodeNotFound { node: id })?;
        let added = graph.copy_node(node)?;
        node_map.insert(id, added);
        ops.insert(node.op().to_string());
        for edge in original.in_edges(id) {
            let src = *node_map
                .get(&edge.src())
                .ok_or(GraphError::InvalidEdge {
                    src: edge.src(),
                    dst: id,
                    reason: "producer is outside the foldable set".into(),
                })?;
            graph.add_edge(src, edge.src_output(), added, edge.dst_input())?;
        }
    }

    let mut boundary = BoundaryMap::default();
    for &id in foldable.nodes() {
        if original.node(id).is_some_and(|n| n.is_constant()) {
            continue;
        }
        let feeds_outside = original
            .out_edges(id)
            .any(|e| e.dst() != original.sink_node() && !foldable.contains(e.dst()));
        if feeds_outside {
            boundary.entries.push((node_map[&id], id));
        }
    }

    Ok(ExtractedGraph {
        graph,
        boundary,
        ops,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeBuilder, OpRegistry};
    use crate::optimizer::constant_folding::discover::find_constant_foldable_nodes;
    use crate::optimizer::constant_folding::ConstantFoldingOptions;
    use crate::tensor::{DType, Tensor};

    #[test]
    fn boundary_covers_members_with_outside_consumers() {
        let mut g = Graph::new(OpRegistry::standard());
        let a = NodeBuilder::constant("a", Tensor::scalar_f32(1.0))
            .finalize(&mut g)
            .unwrap();
        let b = NodeBuilder::constant("b", Tensor::scalar_f32(2.0))
            .finalize(&mut g)
            .unwrap();
        let add = NodeBuilder::new("add", "Add")
            .input(a)
            .input(b)
            .finalize(&mut g)
            .unwrap();
        let x = NodeBuilder::new("x", "Placeholder")
            .attr("dtype", DType::F32)
            .finalize(&mut g)
            .unwrap();
        NodeBuilder::new("mul", "Mul")
            .input(add)
            .input(x)
            .finalize(&mut g)
            .unwrap();

        let set = find_constant_foldable_nodes(&g, &ConstantFoldingOptions::default());
        let extracted = extract_constant_graph(&g, &set).unwrap();

        assert_eq!(extracted.graph.num_op_nodes(), 3);
        assert_eq!(extracted.boundary.len(), 1);
        assert_eq!(extracted.boundary.originals().next(), Some(add));
        let copy = extracted.boundary.entries()[0].0;
        assert_eq!(extracted.graph.node(copy).unwrap().name(), "add");
        assert_eq!(extracted.graph.data_inputs(copy).len(), 2);
        assert!(extracted.ops.contains("Const") && extracted.ops.contains("Add"));
        // The original graph is untouched.
        assert_eq!(g.num_op_nodes(), 5);
    }

    #[test]
    fn literals_shared_with_outside_consumers_are_not_boundary() {
        let mut g = Graph::new(OpRegistry::standard());
        let c = NodeBuilder::constant("c", Tensor::scalar_f32(3.0))
            .finalize(&mut g)
            .unwrap();
        let x = NodeBuilder::new("x", "Placeholder")
            .attr("dtype", DType::F32)
            .finalize(&mut g)
            .unwrap();
        NodeBuilder::new("add", "Add")
            .input(c)
            .input(x)
            .finalize(&mut g)
            .unwrap();
        let neg = NodeBuilder::new("neg", "Neg").input(c).finalize(&mut g).unwrap();
        NodeBuilder::new("mul", "Mul")
            .input(neg)
            .input(x)
            .finalize(&mut g)
            .unwrap();

        let set = find_constant_foldable_nodes(&g, &ConstantFoldingOptions::default());
        assert!(set.contains(c));
        let extracted = extract_constant_graph(&g, &set).unwrap();
        assert_eq!(extracted.boundary.originals().collect::<Vec<_>>(), vec![neg]);
    }

    #[test]
    fn region_without_outside_consumers_has_empty_boundary() {
        let mut g = Graph::new(OpRegistry::standard());
        let a = NodeBuilder::constant("a", Tensor::scalar_f32(1.0))
            .finalize(&mut g)
            .unwrap();
        let neg = NodeBuilder::new("neg", "Neg").input(a).finalize(&mut g).unwrap();
        g.add_control_edge(neg, g.sink_node()).unwrap();

        let set = find_constant_foldable_nodes(&g, &ConstantFoldingOptions::default());
        let extracted = extract_constant_graph(&g, &set).unwrap();
        assert!(extracted.boundary.is_empty());
    }
}
