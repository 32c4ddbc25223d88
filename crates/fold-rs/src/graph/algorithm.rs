//! Traversal orders over a [`Graph`].

use std::collections::HashSet;

use super::arena::Graph;
use super::node::{Node, NodeId};

/// Walks the graph backwards along in-edges and calls `leave` on each node
/// once all of its producers have been left, so callbacks observe data-flow
/// order (producers before consumers).
///
/// The walk starts from SINK and from every node without out-edges, so every
/// node is visited exactly once whether or not it reaches SINK. Producers are
/// explored in ascending id order, which keeps the result deterministic.
pub fn reverse_dfs<F>(graph: &Graph, mut leave: F)
where
    F: FnMut(&Node),
{
    let mut roots: Vec<NodeId> = vec![graph.sink_node()];
    roots.extend(
        graph
            .nodes()
            .filter(|n| !n.is_sink() && n.out_edge_ids().is_empty())
            .map(Node::id),
    );

    let mut visited: HashSet<NodeId> = HashSet::with_capacity(graph.num_nodes());
    // (node, leaving) pairs; a node is pushed again with `leaving = true`
    // beneath its producers.
    let mut stack: Vec<(NodeId, bool)> = Vec::new();
    for root in roots.into_iter().rev() {
        stack.push((root, false));
        while let Some((id, leaving)) = stack.pop() {
            if leaving {
                if let Some(node) = graph.node(id) {
                    leave(node);
                }
                continue;
            }
            if !visited.insert(id) {
                continue;
            }
            stack.push((id, true));
            let mut producers: Vec<NodeId> = graph.in_edges(id).map(|e| e.src()).collect();
            producers.sort_unstable();
            producers.dedup();
            for producer in producers.into_iter().rev() {
                if !visited.contains(&producer) {
                    stack.push((producer, false));
                }
            }
        }
    }
}

/// Returns every node in data-flow order, sentinels included.
pub fn topological_order(graph: &Graph) -> Vec<NodeId> {
    let mut order = Vec::with_capacity(graph.num_nodes());
    reverse_dfs(graph, |n| order.push(n.id()));
    order
}
