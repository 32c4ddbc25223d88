//! Dataflow executor for a single graph on a single device.
//!
//! Every op node runs once its producers have finished. Kernels are created
//! fresh for each executor, dispatched on a rayon pool, and completion is
//! reported once through a callback. A kernel failure, panics included, stops
//! its downstream nodes only; independent branches keep running and the first failure
//! becomes the reported status.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use rayon::ThreadPool;
use thiserror::Error;

use crate::graph::topology::{validate_graph, TopologyError};
use crate::graph::{Graph, NodeId};

use super::device::Device;
use super::lock;
use super::kernel::{self, Entry, KernelContext, KernelError, KernelRuntime, OpKernel};
use super::rendezvous::Rendezvous;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    #[error("graph cannot be executed: {0}")]
    InvalidGraph(#[from] TopologyError),
    #[error("failed to create kernel for `{node}`: {source}")]
    KernelCreation { node: String, source: KernelError },
    #[error("node `{node}` failed: {source}")]
    Kernel { node: String, source: KernelError },
    #[error("executor was already started")]
    AlreadyStarted,
    #[error("execution ended without reporting completion")]
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Created,
    Running,
    Completed,
    Failed,
}

pub struct LocalExecutorParams {
    pub device: Arc<Device>,
    pub runtime: Arc<dyn KernelRuntime>,
}

pub struct ExecutorArgs {
    pub rendezvous: Arc<dyn Rendezvous>,
    pub pool: Arc<ThreadPool>,
}

pub type DoneCallback = Box<dyn FnOnce(Result<(), ExecutorError>) + Send>;

struct Consumer {
    dst: usize,
    src_output: i32,
    dst_input: i32,
}

struct NodeItem {
    id: NodeId,
    kernel: Box<dyn OpKernel>,
    num_inputs: usize,
    num_producers: usize,
    consumers: Vec<Consumer>,
}

struct Inner {
    graph: Graph,
    device: Arc<Device>,
    items: Vec<NodeItem>,
    state: Mutex<ExecutorState>,
}

/// Owns a graph and the kernels built for it. Runs at most once.
pub struct LocalExecutor {
    inner: Arc<Inner>,
}

impl LocalExecutor {
    /// Validates `graph` and creates a kernel for each op node.
    pub fn new(graph: Graph, params: LocalExecutorParams) -> Result<Self, ExecutorError> {
        validate_graph(&graph)?;

        let mut slot_of = vec![usize::MAX; graph.num_node_ids()];
        for (slot, node) in graph.op_nodes().enumerate() {
            slot_of[node.id().index()] = slot;
        }

        let mut items = Vec::with_capacity(graph.num_op_nodes());
        for node in graph.op_nodes() {
            let kernel = kernel::create_kernel(params.runtime.as_ref(), node, &params.device)
                .map_err(|source| ExecutorError::KernelCreation {
                    node: node.name().to_string(),
                    source,
                })?;
            let num_producers = graph
                .in_edges(node.id())
                .filter(|e| slot_of[e.src().index()] != usize::MAX)
                .count();
            let consumers = graph
                .out_edges(node.id())
                .filter(|e| slot_of[e.dst().index()] != usize::MAX)
                .map(|e| Consumer {
                    dst: slot_of[e.dst().index()],
                    src_output: e.src_output(),
                    dst_input: e.dst_input(),
                })
                .collect();
            items.push(NodeItem {
                id: node.id(),
                kernel,
                num_inputs: node.num_inputs(),
                num_producers,
                consumers,
            });
        }
        log::debug!(
            "created executor for {} nodes on {} using {}",
            items.len(),
            params.device.name(),
            params.runtime.name()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                graph,
                device: params.device,
                items,
                state: Mutex::new(ExecutorState::Created),
            }),
        })
    }

    pub fn state(&self) -> ExecutorState {
        *lock(&self.inner.state)
    }

    pub fn graph(&self) -> &Graph {
        &self.inner.graph
    }

    /// Starts execution on `args.pool` and returns immediately. `done` fires
    /// exactly once, on a pool thread or on the caller's thread when there is
    /// nothing to run.
    pub fn run_async(&self, args: ExecutorArgs, done: DoneCallback) {
        {
            let mut state = lock(&self.inner.state);
            if *state != ExecutorState::Created {
                drop(state);
                done(Err(ExecutorError::AlreadyStarted));
                return;
            }
            *state = ExecutorState::Running;
        }

        let items = &self.inner.items;
        let ready: Vec<usize> = (0..items.len())
            .filter(|slot| items[*slot].num_producers == 0)
            .collect();
        if ready.is_empty() {
            *lock(&self.inner.state) = ExecutorState::Completed;
            done(Ok(()));
            return;
        }

        let run = Arc::new(Run {
            rendezvous: args.rendezvous,
            pool: args.pool,
            table: Mutex::new(RunTable {
                pending: items.iter().map(|item| item.num_producers).collect(),
                inputs: items.iter().map(|item| vec![None; item.num_inputs]).collect(),
                dead: vec![false; items.len()],
                poisoned: vec![false; items.len()],
                outstanding: ready.len(),
                first_error: None,
                done: Some(done),
            }),
        });
        for slot in ready {
            schedule(&self.inner, &run, slot);
        }
    }

    /// Runs to completion, blocking the calling thread on the completion signal.
    pub fn run(&self, args: ExecutorArgs) -> Result<(), ExecutorError> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.run_async(
            args,
            Box::new(move |status| {
                let _ = tx.send(status);
            }),
        );
        rx.recv().unwrap_or(Err(ExecutorError::Abandoned))
    }
}

struct Run {
    rendezvous: Arc<dyn Rendezvous>,
    pool: Arc<ThreadPool>,
    table: Mutex<RunTable>,
}

struct RunTable {
    pending: Vec<usize>,
    inputs: Vec<Vec<Option<Entry>>>,
    /// Node was skipped because of dead inputs.
    dead: Vec<bool>,
    /// An upstream kernel failed; the node will not run.
    poisoned: Vec<bool>,
    outstanding: usize,
    first_error: Option<ExecutorError>,
    done: Option<DoneCallback>,
}

enum Outcome {
    Outputs(Vec<Entry>),
    Dead,
    Failed,
}

fn schedule(inner: &Arc<Inner>, run: &Arc<Run>, slot: usize) {
    let inner = Arc::clone(inner);
    let task_run = Arc::clone(run);
    run.pool.spawn(move || process(&inner, &task_run, slot));
}

fn process(inner: &Arc<Inner>, run: &Arc<Run>, slot: usize) {
    let item = &inner.items[slot];
    let (inputs, poisoned, dead_control) = {
        let mut table = lock(&run.table);
        let inputs: Vec<Entry> = std::mem::take(&mut table.inputs[slot])
            .into_iter()
            .map(|entry| entry.unwrap_or(Entry::Dead))
            .collect();
        (inputs, table.poisoned[slot], table.dead[slot])
    };

    let mut error = None;
    let outcome = if poisoned {
        Outcome::Failed
    } else if dead_control
        || (inputs.iter().any(Entry::is_dead) && !item.kernel.accepts_dead_inputs())
    {
        Outcome::Dead
    } else {
        match compute(inner, run, item, &inputs) {
            Ok(outputs) => Outcome::Outputs(outputs),
            Err(source) => {
                let node = inner
                    .graph
                    .node(item.id)
                    .map(|n| n.name().to_string())
                    .unwrap_or_else(|| item.id.to_string());
                log::debug!("kernel for `{node}` failed: {source}");
                error = Some(ExecutorError::Kernel { node, source });
                Outcome::Failed
            }
        }
    };

    let mut ready = Vec::new();
    let finished = {
        let mut table = lock(&run.table);
        if let Some(err) = error {
            table.first_error.get_or_insert(err);
        }
        for consumer in &item.consumers {
            match &outcome {
                Outcome::Failed => table.poisoned[consumer.dst] = true,
                Outcome::Dead if consumer.dst_input < 0 => table.dead[consumer.dst] = true,
                Outcome::Dead => {
                    table.inputs[consumer.dst][consumer.dst_input as usize] = Some(Entry::Dead)
                }
                Outcome::Outputs(_) if consumer.dst_input < 0 => {}
                Outcome::Outputs(outputs) => {
                    let entry = outputs
                        .get(consumer.src_output as usize)
                        .cloned()
                        .unwrap_or(Entry::Dead);
                    table.inputs[consumer.dst][consumer.dst_input as usize] = Some(entry);
                }
            }
            table.pending[consumer.dst] -= 1;
            if table.pending[consumer.dst] == 0 {
                ready.push(consumer.dst);
            }
        }
        table.outstanding = table.outstanding + ready.len() - 1;
        if table.outstanding == 0 {
            Some((table.done.take(), table.first_error.take()))
        } else {
            None
        }
    };

    for next in ready {
        schedule(inner, run, next);
    }

    if let Some((done, first_error)) = finished {
        let status = match first_error {
            Some(err) => {
                *lock(&inner.state) = ExecutorState::Failed;
                Err(err)
            }
            None => {
                *lock(&inner.state) = ExecutorState::Completed;
                Ok(())
            }
        };
        if let Some(done) = done {
            done(status);
        }
    }
}

fn compute(
    inner: &Inner,
    run: &Run,
    item: &NodeItem,
    inputs: &[Entry],
) -> Result<Vec<Entry>, KernelError> {
    let node = inner
        .graph
        .node(item.id)
        .ok_or_else(|| KernelError::Internal(format!("node {} vanished", item.id)))?;
    let mut ctx = KernelContext::new(node, &inner.device, run.rendezvous.as_ref(), inputs);
    panic::catch_unwind(AssertUnwindSafe(|| item.kernel.compute(&mut ctx))).map_err(
        |payload| KernelError::Internal(format!("kernel panicked: {}", panic_message(&*payload))),
    )??;
    ctx.into_outputs()
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string payload"
    }
}
