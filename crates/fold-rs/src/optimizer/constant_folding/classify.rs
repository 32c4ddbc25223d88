use crate::graph::{Graph, Node};

use super::ConstantFoldingOptions;

/// Whether `node` may be evaluated ahead of time, ignoring its inputs.
///
/// Literals always qualify. Everything else must be a registered stateless op
/// with a single output, must not be a control-flow or transfer node, and must
/// pass the caller's `consider` predicate.
pub fn is_constant_foldable(graph: &Graph, node: &Node, options: &ConstantFoldingOptions) -> bool {
    if node.is_constant() {
        return true;
    }
    if node.is_sentinel() {
        return false;
    }
    let stateless = graph
        .registry()
        .lookup(node.op())
        .is_some_and(|def| !def.is_stateful);
    if !stateless {
        return false;
    }
    if !options.considers(node) {
        return false;
    }
    if node.is_control_flow() || node.is_send() || node.is_recv() {
        return false;
    }
    node.num_outputs() == 1
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::graph::{Arity, NodeBuilder, OpDef, OpRegistry, OutputTypes};
    use crate::tensor::{DType, Tensor};

    fn graph() -> Graph {
        Graph::new(OpRegistry::standard())
    }

    #[test]
    fn stateful_and_control_flow_ops_are_rejected() {
        let mut g = graph();
        let c = NodeBuilder::constant("c", Tensor::scalar_f32(1.0))
            .finalize(&mut g)
            .unwrap();
        let p = NodeBuilder::constant("p", Tensor::scalar_i32(0))
            .finalize(&mut g)
            .unwrap();
        let rand = NodeBuilder::new("rand", "RandomUniform")
            .input(p)
            .attr("dtype", DType::F32)
            .finalize(&mut g)
            .unwrap();
        let enter = NodeBuilder::new("enter", "Enter")
            .input(c)
            .finalize(&mut g)
            .unwrap();
        let neg = NodeBuilder::new("neg", "Neg")
            .input(c)
            .finalize(&mut g)
            .unwrap();

        let opts = ConstantFoldingOptions::default();
        assert!(is_constant_foldable(&g, g.node(c).unwrap(), &opts));
        assert!(!is_constant_foldable(&g, g.node(rand).unwrap(), &opts));
        assert!(!is_constant_foldable(&g, g.node(enter).unwrap(), &opts));
        assert!(is_constant_foldable(&g, g.node(neg).unwrap(), &opts));
    }

    #[test]
    fn consider_predicate_excludes_but_never_constants() {
        let mut g = graph();
        let c = NodeBuilder::constant("keep/c", Tensor::scalar_f32(1.0))
            .finalize(&mut g)
            .unwrap();
        let neg = NodeBuilder::new("keep/neg", "Neg")
            .input(c)
            .finalize(&mut g)
            .unwrap();
        let opts = ConstantFoldingOptions {
            consider: Some(Arc::new(|n: &Node| !n.name().starts_with("keep/"))),
        };
        assert!(is_constant_foldable(&g, g.node(c).unwrap(), &opts));
        assert!(!is_constant_foldable(&g, g.node(neg).unwrap(), &opts));
    }

    #[test]
    fn multi_output_nodes_are_rejected() {
        let mut g = graph();
        g.registry().register(OpDef::new(
            "Unpack2",
            Arity::Fixed(1),
            OutputTypes::SameAsInput(2),
        ));
        let c = NodeBuilder::constant("c", Tensor::scalar_f32(1.0))
            .finalize(&mut g)
            .unwrap();
        let unpack = NodeBuilder::new("unpack", "Unpack2")
            .input(c)
            .finalize(&mut g)
            .unwrap();
        let opts = ConstantFoldingOptions::default();
        assert!(!is_constant_foldable(&g, g.node(unpack).unwrap(), &opts));
    }
}
