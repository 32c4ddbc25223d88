use std::collections::HashSet;

use crate::graph::{reverse_dfs, Graph, NodeId};

use super::classify::is_constant_foldable;
use super::ConstantFoldingOptions;

/// Foldable nodes in data-flow order, with O(1) membership.
#[derive(Debug, Clone, Default)]
pub struct FoldableSet {
    order: Vec<NodeId>,
    members: HashSet<NodeId>,
}

impl FoldableSet {
    fn insert(&mut self, id: NodeId) {
        if self.members.insert(id) {
            self.order.push(id);
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.members.contains(&id)
    }

    /// Members, producers before consumers.
    pub fn nodes(&self) -> &[NodeId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Collects every node whose value is determined by literals alone.
///
/// A non-literal node joins the set when it is individually foldable, has at
/// least one data input, and every producer (control producers included) is
/// already a member. Edges from SOURCE only order execution and are ignored.
/// When no computation joined the set the result is empty: re-materialising
/// existing literals gains nothing.
pub fn find_constant_foldable_nodes(graph: &Graph, options: &ConstantFoldingOptions) -> FoldableSet {
    let mut set = FoldableSet::default();
    let mut internal_node_inserted = false;

    reverse_dfs(graph, |node| {
        if node.is_sentinel() || !is_constant_foldable(graph, node, options) {
            return;
        }
        let parents_foldable = graph
            .in_edges(node.id())
            .filter(|e| e.src() != graph.source_node())
            .all(|e| set.contains(e.src()));
        if node.is_constant() {
            if parents_foldable {
                set.insert(node.id());
            }
            return;
        }
        if node.num_inputs() > 0 && parents_foldable {
            set.insert(node.id());
            internal_node_inserted = true;
        }
    });

    if !internal_node_inserted {
        return FoldableSet::default();
    }
    log::debug!("found {} constant foldable nodes", set.len());
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeBuilder, OpRegistry};
    use crate::tensor::{DType, Tensor};

    #[test]
    fn literals_alone_yield_nothing() {
        let mut g = Graph::new(OpRegistry::standard());
        NodeBuilder::constant("a", Tensor::scalar_f32(1.0))
            .finalize(&mut g)
            .unwrap();
        NodeBuilder::constant("b", Tensor::scalar_f32(2.0))
            .finalize(&mut g)
            .unwrap();
        let set = find_constant_foldable_nodes(&g, &ConstantFoldingOptions::default());
        assert!(set.is_empty());
    }

    #[test]
    fn closure_stops_at_placeholders() {
        let mut g = Graph::new(OpRegistry::standard());
        let a = NodeBuilder::constant("a", Tensor::scalar_f32(1.0))
            .finalize(&mut g)
            .unwrap();
        let neg = NodeBuilder::new("neg", "Neg").input(a).finalize(&mut g).unwrap();
        let x = NodeBuilder::new("x", "Placeholder")
            .attr("dtype", DType::F32)
            .finalize(&mut g)
            .unwrap();
        let add = NodeBuilder::new("add", "Add")
            .input(neg)
            .input(x)
            .finalize(&mut g)
            .unwrap();
        let sq = NodeBuilder::new("sq", "Square")
            .input(add)
            .finalize(&mut g)
            .unwrap();

        let set = find_constant_foldable_nodes(&g, &ConstantFoldingOptions::default());
        assert_eq!(set.nodes(), &[a, neg]);
        assert!(!set.contains(add));
        assert!(!set.contains(sq));
        assert!(!set.contains(x));
    }

    #[test]
    fn control_input_from_outside_blocks_membership() {
        let mut g = Graph::new(OpRegistry::standard());
        let a = NodeBuilder::constant("a", Tensor::scalar_f32(1.0))
            .finalize(&mut g)
            .unwrap();
        let x = NodeBuilder::new("x", "Placeholder")
            .attr("dtype", DType::F32)
            .finalize(&mut g)
            .unwrap();
        let free = NodeBuilder::new("free", "Neg").input(a).finalize(&mut g).unwrap();
        let gated = NodeBuilder::new("gated", "Abs")
            .input(a)
            .control_input(x)
            .finalize(&mut g)
            .unwrap();

        let set = find_constant_foldable_nodes(&g, &ConstantFoldingOptions::default());
        assert!(set.contains(free));
        assert!(!set.contains(gated));
    }

    #[test]
    fn producers_precede_consumers() {
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
        let neg = NodeBuilder::new("neg", "Neg").input(add).finalize(&mut g).unwrap();

        let set = find_constant_foldable_nodes(&g, &ConstantFoldingOptions::default());
        let pos = |id| set.nodes().iter().position(|n| *n == id).unwrap();
        assert!(pos(a) < pos(add));
        assert!(pos(b) < pos(add));
        assert!(pos(add) < pos(neg));
    }
}
