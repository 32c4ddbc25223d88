//! Constant folding: evaluates the parts of a graph that depend only on
//! literals and replaces them with `Const` nodes.
//!
//! One pass runs these stages in order:
//!
//! 1. [`discover`] finds the literal-closed, individually foldable nodes
//!    ([`classify`]), in data-flow order.
//! 2. [`extract`] copies them into an isolated graph and records which of them
//!    feed the rest of the original graph.
//! 3. [`fetch`] hangs a `_Send` off each of those outputs.
//! 4. [`execute`] runs the isolated graph on a CPU execution context and reads
//!    the sends back from a private rendezvous.
//! 5. [`rewrite`] swaps each fetched node for a literal and deletes the folded
//!    nodes left without consumers.
//!
//! Discovery and extraction only read the original graph. It is mutated in
//! stage 5 alone, so an error in any earlier stage leaves it untouched.

pub mod classify;
pub mod discover;
pub mod execute;
pub mod extract;
pub mod fetch;
pub mod rewrite;

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use thiserror::Error;

use crate::graph::{Graph, GraphError, Node, NodeOut};
use crate::optimizer::hashing::{fnv1a_bytes, fnv1a_init, fnv1a_u64};
use crate::optimizer::{FoldConfig, GraphPass, OptimizeContext, PassResult};
use crate::runtime::{
    CpuDeviceProvider, DeviceError, DeviceProvider, ExecutionContext, ExecutorError, KernelRuntime,
};

pub use classify::is_constant_foldable;
pub use discover::{find_constant_foldable_nodes, FoldableSet};
pub use execute::{run_and_collect, ExecutionOutcome};
pub use extract::{extract_constant_graph, BoundaryMap, ExtractedGraph};
pub use fetch::{attach_fetches, FetchNode};
pub use rewrite::{apply_folded_results, replace_node_with_constant, RewriteStats};

pub type ConsiderFn = Arc<dyn Fn(&Node) -> bool + Send + Sync>;

/// Caller policy for a fold pass.
#[derive(Clone, Default)]
pub struct ConstantFoldingOptions {
    /// Nodes for which this returns `false` are never folded. Literals are
    /// exempt.
    pub consider: Option<ConsiderFn>,
}

impl ConstantFoldingOptions {
    pub fn with_consider<F>(consider: F) -> Self
    where
        F: Fn(&Node) -> bool + Send + Sync + 'static,
    {
        Self {
            consider: Some(Arc::new(consider)),
        }
    }

    pub(crate) fn considers(&self, node: &Node) -> bool {
        self.consider.as_ref().map_or(true, |consider| consider(node))
    }
}

impl fmt::Debug for ConstantFoldingOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstantFoldingOptions")
            .field("consider", &self.consider.is_some())
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum FoldError {
    #[error("fetch `{name}` is not an output of the constant graph")]
    UnknownFetch { name: String },
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

/// Diagnostics for one fold pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FoldStats {
    /// Boundary nodes replaced by literals.
    pub replaced: usize,
    /// Interior folded nodes deleted afterwards.
    pub removed: usize,
    /// Fetches attached to the isolated graph.
    pub fetched: usize,
    /// Why the pass stopped before applying every fetch.
    pub aborted: Option<String>,
    /// Region skipped because an earlier attempt on it changed nothing.
    pub skipped_known_failure: bool,
}

impl FoldStats {
    pub fn changed(&self) -> bool {
        self.replaced > 0
    }
}

enum ContextSource {
    Ready(ExecutionContext),
    SharedCpu,
    Provider {
        provider: Arc<dyn DeviceProvider>,
        worker_threads: usize,
        cell: OnceCell<ExecutionContext>,
    },
}

/// Resources a fold pass executes with: where the isolated graph runs and
/// which runtime builds its kernels.
pub struct ConstantFolder {
    source: ContextSource,
    runtime: Arc<dyn KernelRuntime>,
}

impl ConstantFolder {
    pub fn new(exec: ExecutionContext, runtime: Arc<dyn KernelRuntime>) -> Self {
        Self {
            source: ContextSource::Ready(exec),
            runtime,
        }
    }

    /// Runs on the process-wide CPU context, created on first use.
    pub fn shared_cpu(runtime: Arc<dyn KernelRuntime>) -> Self {
        Self {
            source: ContextSource::SharedCpu,
            runtime,
        }
    }

    /// Builds a context from `provider` on first use. A failed attempt is
    /// retried by the next pass.
    pub fn with_provider(
        provider: Arc<dyn DeviceProvider>,
        worker_threads: usize,
        runtime: Arc<dyn KernelRuntime>,
    ) -> Self {
        Self {
            source: ContextSource::Provider {
                provider,
                worker_threads,
                cell: OnceCell::new(),
            },
            runtime,
        }
    }

    /// Folds on a local CPU context with `config.worker_threads` workers,
    /// created on first use.
    pub fn from_config(config: &FoldConfig, runtime: Arc<dyn KernelRuntime>) -> Self {
        Self::with_provider(Arc::new(CpuDeviceProvider), config.worker_threads, runtime)
    }

    pub fn runtime(&self) -> &Arc<dyn KernelRuntime> {
        &self.runtime
    }

    fn execution_context(&self) -> Result<ExecutionContext, DeviceError> {
        match &self.source {
            ContextSource::Ready(exec) => Ok(exec.clone()),
            ContextSource::SharedCpu => ExecutionContext::shared_cpu(),
            ContextSource::Provider {
                provider,
                worker_threads,
                cell,
            } => cell
                .get_or_try_init(|| {
                    ExecutionContext::from_provider(provider.as_ref(), *worker_threads)
                })
                .cloned(),
        }
    }

    /// Runs one fold pass with a throwaway failure cache.
    pub fn try_fold(
        &self,
        graph: &mut Graph,
        options: &ConstantFoldingOptions,
    ) -> Result<FoldStats, FoldError> {
        self.fold(graph, options, &mut OptimizeContext::default())
    }

    /// Runs one fold pass, skipping regions `cx` has already seen fail.
    pub fn fold(
        &self,
        graph: &mut Graph,
        options: &ConstantFoldingOptions,
        cx: &mut OptimizeContext,
    ) -> Result<FoldStats, FoldError> {
        let exec = self.execution_context()?;

        let foldable = find_constant_foldable_nodes(graph, options);
        if foldable.is_empty() {
            log::debug!("no constant foldable nodes found");
            return Ok(FoldStats::default());
        }

        let ExtractedGraph {
            graph: mut constant_graph,
            boundary,
            ops,
        } = extract_constant_graph(graph, &foldable)?;
        if boundary.is_empty() {
            log::debug!("no constant nodes found that feed into the original graph");
            return Ok(FoldStats::default());
        }
        log::debug!(
            "constant foldable {} : {} (ops: {:?})",
            constant_graph.num_node_ids(),
            graph.num_node_ids(),
            ops
        );

        let failure_key = region_fingerprint(&constant_graph);
        if cx.is_failed_fold_key(failure_key) {
            log::debug!("skipping constant region {failure_key:016x}: folding it failed before");
            return Ok(FoldStats {
                skipped_known_failure: true,
                ..FoldStats::default()
            });
        }

        let outputs: Vec<NodeOut> = boundary
            .entries()
            .iter()
            .map(|(copy, _)| NodeOut::from(*copy))
            .collect();
        let fetches = attach_fetches(&mut constant_graph, exec.device().attributes(), &outputs)?;

        let outcome = match run_and_collect(constant_graph, &fetches, &exec, self.runtime.clone()) {
            Ok(outcome) => outcome,
            Err(err) => {
                cx.record_failed_fold_key(failure_key);
                return Err(err);
            }
        };

        let aborted = match &outcome.status {
            Err(err) => Some(err.to_string()),
            Ok(()) => outcome.results.iter().find_map(|result| match result {
                Err(err) => Some(err.to_string()),
                Ok(fetched) if fetched.is_dead => Some("fetched a dead tensor".to_string()),
                Ok(_) => None,
            }),
        };

        let rewrite = apply_folded_results(graph, &foldable, &boundary, outcome.successful_prefix())?;
        if rewrite.replaced == 0 {
            cx.record_failed_fold_key(failure_key);
        }
        if let Some(reason) = &aborted {
            log::debug!(
                "constant folding applied {} of {} fetches: {reason}",
                rewrite.replaced,
                fetches.len()
            );
        }

        Ok(FoldStats {
            replaced: rewrite.replaced,
            removed: rewrite.removed,
            fetched: fetches.len(),
            aborted,
            skipped_known_failure: false,
        })
    }
}

/// Folds constants in `graph`, returning whether it changed.
///
/// Failures never escape: they are logged and reported as "no change", or as
/// "changed" when some replacements landed before the failure.
pub fn fold_constants(
    graph: &mut Graph,
    options: &ConstantFoldingOptions,
    folder: &ConstantFolder,
) -> bool {
    match folder.try_fold(graph, options) {
        Ok(stats) => stats.changed(),
        Err(FoldError::Device(err)) => {
            log::info!("cannot find a device and/or a thread pool to do constant folding on: {err}");
            false
        }
        Err(err) => {
            log::warn!("constant folding failed: {err}");
            false
        }
    }
}

/// Fingerprint of an isolated graph, stable across passes over an unchanged
/// original graph.
fn region_fingerprint(graph: &Graph) -> u64 {
    let mut hash = fnv1a_init();
    for node in graph.op_nodes() {
        hash = fnv1a_bytes(hash, b"node");
        if let Ok(bytes) = bincode::serialize(node.def()) {
            hash = fnv1a_bytes(hash, &bytes);
        }
    }
    for edge in graph.edges() {
        hash = fnv1a_bytes(hash, b"edge");
        hash = fnv1a_u64(hash, u64::from(edge.src().0));
        hash = fnv1a_u64(hash, edge.src_output() as u64);
        hash = fnv1a_u64(hash, u64::from(edge.dst().0));
        hash = fnv1a_u64(hash, edge.dst_input() as u64);
    }
    hash
}

/// [`GraphPass`] adapter so folding can run inside a pipeline.
pub struct ConstantFoldingPass {
    folder: Arc<ConstantFolder>,
    options: ConstantFoldingOptions,
}

impl ConstantFoldingPass {
    const NAME: &'static str = "constant-folding";

    pub fn new(folder: Arc<ConstantFolder>, options: ConstantFoldingOptions) -> Self {
        Self { folder, options }
    }
}

impl GraphPass for ConstantFoldingPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut Graph, cx: &mut OptimizeContext) -> PassResult {
        match self.folder.fold(graph, &self.options, cx) {
            Ok(stats) => PassResult {
                changed: stats.changed(),
                iterations: 1,
                rewrites_applied: stats.replaced,
                erased_nodes: stats.removed,
            },
            Err(err) => {
                log::warn!("constant folding failed: {err}");
                PassResult {
                    iterations: 1,
                    ..PassResult::default()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;
    use crate::runtime::{Device, KernelError, OpKernel};

    struct NoKernels;

    impl KernelRuntime for NoKernels {
        fn name(&self) -> &str {
            "none"
        }

        fn create_kernel(&self, node: &Node, _: &Device) -> Result<Box<dyn OpKernel>, KernelError> {
            Err(KernelError::unimplemented(node.op(), "no kernels"))
        }
    }

    #[test]
    fn configured_worker_threads_size_the_pool() {
        let config = FoldConfig {
            worker_threads: 3,
            ..FoldConfig::default()
        };
        let folder = ConstantFolder::from_config(&config, Arc::new(NoKernels));
        let exec = folder.execution_context().unwrap();
        assert_eq!(exec.pool().current_num_threads(), 3);
        assert_eq!(exec.device().device_type(), crate::runtime::CPU_DEVICE_TYPE);
    }
}
