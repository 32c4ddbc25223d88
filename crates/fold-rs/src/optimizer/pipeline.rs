use std::sync::Arc;

use crate::graph::Graph;
use crate::optimizer::constant_folding::{ConstantFolder, ConstantFoldingOptions, ConstantFoldingPass};
use crate::optimizer::{FoldConfig, GraphPass, OptimizeContext, Optimizer, PassResult};

pub enum Step {
    Pass(Arc<dyn GraphPass>),
    FixedPoint { max_iters: usize, steps: Vec<Step> },
}

pub struct PipelineBuilder {
    steps: Vec<Step>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn pass(&mut self, pass: Arc<dyn GraphPass>) {
        self.steps.push(Step::Pass(pass));
    }

    pub fn fixed_point<F>(&mut self, max_iters: usize, build: F)
    where
        F: FnOnce(&mut PipelineBuilder),
    {
        let mut inner = PipelineBuilder::new();
        build(&mut inner);
        self.steps.push(Step::FixedPoint {
            max_iters: max_iters.max(1),
            steps: inner.steps,
        });
    }

    pub fn finish(self) -> Vec<Step> {
        self.steps
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct PipelineOptimizer {
    steps: Vec<Step>,
}

impl PipelineOptimizer {
    /// Re-runs constant folding until it reports no change or
    /// `config.max_iterations` rounds have run. An empty pipeline when folding
    /// is disabled.
    pub fn new(
        folder: Arc<ConstantFolder>,
        options: ConstantFoldingOptions,
        config: &FoldConfig,
    ) -> Self {
        let mut builder = PipelineBuilder::new();
        if config.enabled {
            builder.fixed_point(config.max_iterations, |p| {
                p.pass(Arc::new(ConstantFoldingPass::new(folder, options)));
            });
        }
        Self::from_steps(builder.finish())
    }

    pub fn from_steps(steps: Vec<Step>) -> Self {
        Self { steps }
    }
}

impl Optimizer for PipelineOptimizer {
    fn optimize(&self, graph: &mut Graph, cx: &mut OptimizeContext) -> PassResult {
        let mut result = PassResult::default();
        run_steps(&self.steps, graph, cx, &mut result);
        result
    }
}

fn run_steps(
    steps: &[Step],
    graph: &mut Graph,
    cx: &mut OptimizeContext,
    totals: &mut PassResult,
) -> bool {
    let mut changed_any = false;
    for step in steps {
        match step {
            Step::Pass(pass) => {
                let stats = pass.run(graph, cx);
                changed_any |= stats.changed;
                *totals = totals.merge(stats);
                log::debug!(
                    "pass {}: changed={} rewrites={} erased={} nodes={}",
                    pass.name(),
                    stats.changed,
                    stats.rewrites_applied,
                    stats.erased_nodes,
                    graph.num_op_nodes()
                );
            }
            Step::FixedPoint { max_iters, steps } => {
                let mut iter = 0usize;
                loop {
                    if iter >= *max_iters {
                        break;
                    }
                    iter += 1;
                    let mut local = PassResult::default();
                    let changed = run_steps(steps, graph, cx, &mut local);
                    *totals = totals.merge(local);
                    changed_any |= changed;
                    if !changed {
                        break;
                    }
                }
            }
        }
    }
    changed_any
}
