use std::sync::Arc;

use crate::graph::Graph;
use crate::runtime::{
    ExecutionContext, ExecutorArgs, ExecutorError, FetchResult, KernelRuntime, LocalExecutor,
    LocalExecutorParams, Rendezvous, RendezvousError, SimpleRendezvous,
};

use super::fetch::FetchNode;
use super::FoldError;

/// What one isolated run produced.
pub struct ExecutionOutcome {
    /// Completion status reported by the executor.
    pub status: Result<(), ExecutorError>,
    /// One entry per fetch, in fetch order.
    pub results: Vec<Result<FetchResult, RendezvousError>>,
}

impl ExecutionOutcome {
    /// Leading fetched tensors up to the first failed or dead fetch.
    pub fn successful_prefix(&self) -> impl Iterator<Item = &FetchResult> + '_ {
        self.results
            .iter()
            .map_while(|result| result.as_ref().ok().filter(|fetched| !fetched.is_dead))
    }
}

/// Runs `graph` to completion on `exec` with kernels freshly built by `runtime`,
/// then reads back every fetch from a rendezvous private to this run.
///
/// Kernel failures do not fail the call: fetches produced before the failure
/// are still returned. Only an executor that cannot be built is an error.
pub fn run_and_collect(
    graph: Graph,
    fetches: &[FetchNode],
    exec: &ExecutionContext,
    runtime: Arc<dyn KernelRuntime>,
) -> Result<ExecutionOutcome, FoldError> {
    let executor = LocalExecutor::new(
        graph,
        LocalExecutorParams {
            device: exec.device().clone(),
            runtime,
        },
    )?;
    let rendezvous = Arc::new(SimpleRendezvous::new());
    let status = executor.run(ExecutorArgs {
        rendezvous: rendezvous.clone(),
        pool: exec.pool().clone(),
    });
    if let Err(err) = &status {
        log::debug!("constant folding execution failed: {err}");
    }

    let results = fetches
        .iter()
        .map(|fetch| rendezvous.recv(&fetch.key))
        .collect();
    Ok(ExecutionOutcome { status, results })
}
