use std::sync::Arc;

use fold_rs::graph::{Graph, NodeBuilder, NodeId, OpRegistry};
use fold_rs::optimizer::{
    default_optimizer, ConstantFolder, ConstantFoldingOptions, FoldConfig, OptimizeContext,
    Optimizer, PipelineOptimizer,
};
use fold_rs::runtime::{CpuDeviceProvider, ExecutionContext};
use fold_rs::tensor::{DType, Tensor};
use fold_rs_backend_ref_cpu::CpuKernelRuntime;

fn folder() -> anyhow::Result<Arc<ConstantFolder>> {
    let exec = ExecutionContext::from_provider(&CpuDeviceProvider, 1)?;
    Ok(Arc::new(ConstantFolder::new(
        exec,
        Arc::new(CpuKernelRuntime::new()),
    )))
}

/// `out = x * abs(neg(c) + d)`, where only `x` is an input.
fn chain_graph() -> anyhow::Result<(Graph, NodeId)> {
    let mut graph = Graph::new(OpRegistry::standard());
    let c = NodeBuilder::constant("c", Tensor::scalar_f32(5.0)).finalize(&mut graph)?;
    let d = NodeBuilder::constant("d", Tensor::scalar_f32(1.0)).finalize(&mut graph)?;
    let neg = NodeBuilder::new("neg", "Neg").input(c).finalize(&mut graph)?;
    let add = NodeBuilder::new("add", "Add")
        .input(neg)
        .input(d)
        .finalize(&mut graph)?;
    let abs = NodeBuilder::new("abs", "Abs").input(add).finalize(&mut graph)?;
    let x = NodeBuilder::new("x", "Placeholder")
        .attr("dtype", DType::F32)
        .finalize(&mut graph)?;
    let out = NodeBuilder::new("out", "Mul")
        .input(x)
        .input(abs)
        .finalize(&mut graph)?;
    Ok((graph, out))
}

#[test]
fn fixed_point_stops_once_folding_converges() -> anyhow::Result<()> {
    let (mut graph, out) = chain_graph()?;
    let config = FoldConfig::default();
    let optimizer =
        PipelineOptimizer::new(folder()?, ConstantFoldingOptions::default(), &config);
    let mut cx = OptimizeContext::new();

    let result = optimizer.optimize(&mut graph, &mut cx);

    assert!(result.changed);
    assert_eq!(result.iterations, 2);
    assert_eq!(result.rewrites_applied, 1);
    assert_eq!(result.erased_nodes, 4);
    assert_eq!(graph.num_op_nodes(), 3);
    let (literal, _) = graph.data_inputs(out)[1];
    let value = graph
        .node(literal)
        .and_then(|n| n.attr("value"))
        .and_then(|v| v.as_tensor())
        .map(|t| t.to_f32_vec())
        .transpose()?;
    assert_eq!(value, Some(vec![4.0]));

    let again = optimizer.optimize(&mut graph, &mut cx);
    assert!(!again.changed);
    Ok(())
}

#[test]
fn iteration_bound_is_respected() -> anyhow::Result<()> {
    let (mut graph, _) = chain_graph()?;
    let config = FoldConfig {
        max_iterations: 1,
        ..FoldConfig::default()
    };
    let optimizer =
        PipelineOptimizer::new(folder()?, ConstantFoldingOptions::default(), &config);
    let result = optimizer.optimize(&mut graph, &mut OptimizeContext::new());
    assert!(result.changed);
    assert_eq!(result.iterations, 1);
    Ok(())
}

#[test]
fn disabled_pipeline_leaves_graph_alone() -> anyhow::Result<()> {
    let (mut graph, _) = chain_graph()?;
    let before = graph.to_string();
    let config = FoldConfig {
        enabled: false,
        ..FoldConfig::default()
    };
    let optimizer =
        PipelineOptimizer::new(folder()?, ConstantFoldingOptions::default(), &config);
    let result = optimizer.optimize(&mut graph, &mut OptimizeContext::new());
    assert!(!result.changed);
    assert_eq!(graph.to_string(), before);
    Ok(())
}

#[test]
fn default_optimizer_folds_on_its_own_cpu_context() -> anyhow::Result<()> {
    let (mut graph, out) = chain_graph()?;
    let optimizer = default_optimizer(
        Arc::new(CpuKernelRuntime::new()),
        ConstantFoldingOptions::default(),
    );
    let result = optimizer.optimize(&mut graph, &mut OptimizeContext::new());
    assert!(result.changed);
    let (literal, _) = graph.data_inputs(out)[1];
    assert!(graph.node(literal).is_some_and(|n| n.is_constant()));
    Ok(())
}
