use std::collections::HashSet;

use crate::graph::{Graph, GraphError, NodeBuilder, NodeId, CONTROL_SLOT};
use crate::runtime::FetchResult;
use crate::tensor::Tensor;

use super::discover::FoldableSet;
use super::extract::BoundaryMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteStats {
    pub replaced: usize,
    pub removed: usize,
}

/// Replaces `id` with a `Const` holding `value` and moves every out-edge onto
/// it: data edges leave from output 0, control edges stay control edges.
///
/// The literal is built before `id` is touched, so a failure to build it
/// leaves the graph as it was.
pub fn replace_node_with_constant(
    graph: &mut Graph,
    id: NodeId,
    value: Tensor,
) -> Result<NodeId, GraphError> {
    let name = graph
        .node(id)
        .ok_or(GraphError::NodeNotFound { node: id })?
        .name()
        .to_string();
    let old_edges: Vec<(bool, NodeId, i32)> = graph
        .out_edges(id)
        .map(|e| (e.is_control(), e.dst(), e.dst_input()))
        .collect();

    let literal_name = graph.new_name(&name);
    let literal = NodeBuilder::constant(literal_name, value).finalize(graph)?;
    graph.remove_node(id)?;
    for (is_control, dst, dst_input) in old_edges {
        if is_control {
            graph.add_edge(literal, CONTROL_SLOT, dst, CONTROL_SLOT)?;
        } else {
            graph.add_edge(literal, 0, dst, dst_input)?;
        }
    }
    Ok(literal)
}

/// Applies fetched values to the boundary nodes in order, stopping at the first
/// missing one, then deletes folded nodes nothing live depends on any more.
pub fn apply_folded_results<'a, I>(
    graph: &mut Graph,
    foldable: &FoldableSet,
    boundary: &BoundaryMap,
    fetched: I,
) -> Result<RewriteStats, GraphError>
where
    I: IntoIterator<Item = &'a FetchResult>,
{
    let mut stats = RewriteStats::default();
    for (original, result) in boundary.originals().zip(fetched) {
        if log::log_enabled!(log::Level::Debug) {
            if let Some(node) = graph.node(original) {
                log::debug!("replacing {} ({}) with constant {}", node.name(), node.op(), result.tensor);
            }
        }
        replace_node_with_constant(graph, original, result.tensor.clone())?;
        stats.replaced += 1;
    }
    if stats.replaced == 0 {
        return Ok(stats);
    }

    for id in orphaned(graph, foldable) {
        graph.remove_node(id)?;
        stats.removed += 1;
    }
    Ok(stats)
}

/// Folded nodes still in the graph whose outputs reach no surviving node.
fn orphaned(graph: &Graph, foldable: &FoldableSet) -> Vec<NodeId> {
    let candidates: HashSet<NodeId> = foldable
        .nodes()
        .iter()
        .copied()
        .filter(|id| graph.contains(*id))
        .collect();

    let mut kept: HashSet<NodeId> = HashSet::new();
    loop {
        let before = kept.len();
        for &id in &candidates {
            if kept.contains(&id) {
                continue;
            }
            let referenced = graph.out_edges(id).any(|e| {
                let dst = e.dst();
                dst != graph.sink_node() && (!candidates.contains(&dst) || kept.contains(&dst))
            });
            if referenced {
                kept.insert(id);
            }
        }
        if kept.len() == before {
            break;
        }
    }

    // Deterministic removal order.
    foldable
        .nodes()
        .iter()
        .copied()
        .filter(|id| candidates.contains(id) && !kept.contains(id))
        .collect()
}
