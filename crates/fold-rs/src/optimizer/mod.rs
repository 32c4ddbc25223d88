//! Graph optimization passes and the driver that sequences them.
//!
//! Passes implement [`GraphPass`]; a [`PipelineOptimizer`] runs them in order,
//! repeating [`Step::FixedPoint`] groups until they stop changing the graph.
//! Constant folding is the pass this crate provides.

pub mod constant_folding;
mod context;
pub mod hashing;
mod pipeline;

use std::sync::Arc;

use crate::graph::Graph;
use crate::runtime::KernelRuntime;

pub use constant_folding::{
    fold_constants, ConstantFolder, ConstantFoldingOptions, ConstantFoldingPass, FoldError,
    FoldStats,
};
pub use context::{FoldConfig, OptimizeContext};
pub use pipeline::{PipelineBuilder, PipelineOptimizer, Step};

/// Result returned by a [`GraphPass`] after it runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassResult {
    /// Whether the pass changed the graph.
    pub changed: bool,
    /// Number of times the pass body ran.
    pub iterations: usize,
    /// Nodes replaced by the pass.
    pub rewrites_applied: usize,
    /// Nodes removed by the pass.
    pub erased_nodes: usize,
}

impl PassResult {
    /// Merges two run results, accumulating statistics.
    pub fn merge(self, other: PassResult) -> PassResult {
        PassResult {
            changed: self.changed || other.changed,
            iterations: self.iterations + other.iterations,
            rewrites_applied: self.rewrites_applied + other.rewrites_applied,
            erased_nodes: self.erased_nodes + other.erased_nodes,
        }
    }
}

pub trait GraphPass: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, graph: &mut Graph, cx: &mut OptimizeContext) -> PassResult;
}

pub trait Optimizer: Send + Sync {
    fn optimize(&self, graph: &mut Graph, cx: &mut OptimizeContext) -> PassResult;
}

/// Builds the default pipeline from environment-derived configuration, folding
/// on a CPU context sized by [`FoldConfig::worker_threads`].
pub fn default_optimizer(
    runtime: Arc<dyn KernelRuntime>,
    options: ConstantFoldingOptions,
) -> Arc<dyn Optimizer> {
    let config = FoldConfig::from_env();
    let folder = Arc::new(ConstantFolder::from_config(&config, runtime));
    Arc::new(PipelineOptimizer::new(folder, options, &config))
}
