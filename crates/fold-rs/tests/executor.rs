use std::sync::Arc;

use fold_rs::graph::{Graph, Node, NodeBuilder, NodeOut, OpRegistry};
use fold_rs::optimizer::constant_folding::attach_fetches;
use fold_rs::runtime::{
    CpuDeviceProvider, Device, ExecutionContext, ExecutorArgs, ExecutorError, ExecutorState,
    KernelContext, KernelError, KernelRuntime, LocalExecutor, LocalExecutorParams, OpKernel,
    Rendezvous, RendezvousError, SimpleRendezvous,
};
use fold_rs::tensor::Tensor;
use fold_rs_backend_ref_cpu::CpuKernelRuntime;

/// Routes its input to output 1 when the predicate is non-zero, else to
/// output 0; the other output is dead.
struct SwitchKernel;

impl OpKernel for SwitchKernel {
    fn compute(&self, ctx: &mut KernelContext<'_>) -> Result<(), KernelError> {
        let value = ctx.input(0)?.clone();
        let taken = usize::from(ctx.input(1)?.to_i32_vec()?.first() != Some(&0));
        ctx.set_output(taken, value)?;
        ctx.set_output_dead(1 - taken)
    }
}

/// Reference CPU kernels plus `Switch`.
struct WithSwitch(CpuKernelRuntime);

impl KernelRuntime for WithSwitch {
    fn name(&self) -> &str {
        "ref-cpu+switch"
    }

    fn create_kernel(&self, node: &Node, device: &Device) -> Result<Box<dyn OpKernel>, KernelError> {
        match node.op() {
            "Switch" => Ok(Box::new(SwitchKernel)),
            _ => self.0.create_kernel(node, device),
        }
    }
}

fn setup(runtime: Arc<dyn KernelRuntime>) -> anyhow::Result<(ExecutionContext, LocalExecutorParams)> {
    let exec = ExecutionContext::from_provider(&CpuDeviceProvider, 2)?;
    let params = LocalExecutorParams {
        device: exec.device().clone(),
        runtime,
    };
    Ok((exec, params))
}

#[test]
fn executor_runs_once_and_reports_completion() -> anyhow::Result<()> {
    let mut graph = Graph::new(OpRegistry::standard());
    let a = NodeBuilder::constant("a", Tensor::scalar_f32(1.0)).finalize(&mut graph)?;
    let b = NodeBuilder::constant("b", Tensor::scalar_f32(2.0)).finalize(&mut graph)?;
    let sum = NodeBuilder::new("sum", "Add")
        .input(a)
        .input(b)
        .finalize(&mut graph)?;
    let (exec, params) = setup(Arc::new(CpuKernelRuntime::new()))?;
    let fetches = attach_fetches(&mut graph, &exec.device().attributes().clone(), &[sum.into()])?;
    let executor = LocalExecutor::new(graph, params)?;
    assert_eq!(executor.state(), ExecutorState::Created);

    let rendezvous = Arc::new(SimpleRendezvous::new());
    executor.run(ExecutorArgs {
        rendezvous: rendezvous.clone(),
        pool: exec.pool().clone(),
    })?;
    assert_eq!(executor.state(), ExecutorState::Completed);
    let fetched = rendezvous.recv(&fetches[0].key)?;
    assert!(!fetched.is_dead);
    assert_eq!(fetched.tensor.to_f32_vec()?, vec![3.0]);

    let again = executor.run(ExecutorArgs {
        rendezvous,
        pool: exec.pool().clone(),
    });
    assert_eq!(again, Err(ExecutorError::AlreadyStarted));
    assert_eq!(executor.state(), ExecutorState::Completed);
    Ok(())
}

#[test]
fn failure_stops_only_downstream_nodes() -> anyhow::Result<()> {
    let mut graph = Graph::new(OpRegistry::standard());
    let ok = NodeBuilder::constant("ok", Tensor::scalar_i32(5)).finalize(&mut graph)?;
    let zero = NodeBuilder::constant("zero", Tensor::scalar_i32(0)).finalize(&mut graph)?;
    let good = NodeBuilder::new("good", "Neg").input(ok).finalize(&mut graph)?;
    let bad = NodeBuilder::new("bad", "Div")
        .input(ok)
        .input(zero)
        .finalize(&mut graph)?;
    let after_bad = NodeBuilder::new("after_bad", "Abs").input(bad).finalize(&mut graph)?;
    let (exec, params) = setup(Arc::new(CpuKernelRuntime::new()))?;
    let device = exec.device().attributes().clone();
    let fetches = attach_fetches(&mut graph, &device, &[good.into(), after_bad.into()])?;
    assert!(graph.contains(good));

    let executor = LocalExecutor::new(graph, params)?;
    let rendezvous = Arc::new(SimpleRendezvous::new());
    let status = executor.run(ExecutorArgs {
        rendezvous: rendezvous.clone(),
        pool: exec.pool().clone(),
    });

    match status {
        Err(ExecutorError::Kernel { node, .. }) => assert_eq!(node, "bad"),
        other => panic!("unexpected status {other:?}"),
    }
    assert_eq!(executor.state(), ExecutorState::Failed);
    assert_eq!(rendezvous.recv(&fetches[0].key)?.tensor.to_i32_vec()?, vec![-5]);
    assert!(matches!(
        rendezvous.recv(&fetches[1].key),
        Err(RendezvousError::NotFound { .. })
    ));
    Ok(())
}

#[test]
fn dead_values_propagate_and_cannot_be_sent() -> anyhow::Result<()> {
    let mut graph = Graph::new(OpRegistry::standard());
    let value = NodeBuilder::constant("value", Tensor::scalar_f32(8.0)).finalize(&mut graph)?;
    let pred = NodeBuilder::constant("pred", Tensor::scalar_i32(0)).finalize(&mut graph)?;
    let switch = NodeBuilder::new("switch", "Switch")
        .input(value)
        .input(pred)
        .finalize(&mut graph)?;
    let taken = NodeBuilder::new("taken", "Identity")
        .input(NodeOut::new(switch, 0))
        .finalize(&mut graph)?;
    let untaken = NodeBuilder::new("untaken", "Neg")
        .input(NodeOut::new(switch, 1))
        .finalize(&mut graph)?;
    let (exec, params) = setup(Arc::new(WithSwitch(CpuKernelRuntime::new())))?;
    let device = exec.device().attributes().clone();
    let fetches = attach_fetches(&mut graph, &device, &[taken.into(), untaken.into()])?;

    let executor = LocalExecutor::new(graph, params)?;
    let rendezvous = Arc::new(SimpleRendezvous::new());
    let status = executor.run(ExecutorArgs {
        rendezvous: rendezvous.clone(),
        pool: exec.pool().clone(),
    });

    match status {
        Err(ExecutorError::Kernel { source, .. }) => assert!(matches!(
            source,
            KernelError::Rendezvous(RendezvousError::DeadTensor { .. })
        )),
        other => panic!("unexpected status {other:?}"),
    }
    assert_eq!(rendezvous.recv(&fetches[0].key)?.tensor.to_f32_vec()?, vec![8.0]);
    assert!(rendezvous.recv(&fetches[1].key).is_err());
    Ok(())
}

#[test]
fn unknown_kernel_fails_construction() -> anyhow::Result<()> {
    let mut graph = Graph::new(OpRegistry::standard());
    let p = NodeBuilder::constant("p", Tensor::scalar_i32(1)).finalize(&mut graph)?;
    NodeBuilder::new("rand", "RandomUniform")
        .input(p)
        .attr("dtype", fold_rs::tensor::DType::F32)
        .finalize(&mut graph)?;
    let (_exec, params) = setup(Arc::new(CpuKernelRuntime::new()))?;

    match LocalExecutor::new(graph, params) {
        Err(ExecutorError::KernelCreation { node, source }) => {
            assert_eq!(node, "rand");
            assert!(matches!(source, KernelError::Unimplemented { .. }));
        }
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("executor should not build"),
    }
    Ok(())
}

#[test]
fn empty_graph_completes_immediately() -> anyhow::Result<()> {
    let graph = Graph::new(OpRegistry::standard());
    let (exec, params) = setup(Arc::new(CpuKernelRuntime::new()))?;
    let executor = LocalExecutor::new(graph, params)?;
    executor.run(ExecutorArgs {
        rendezvous: Arc::new(SimpleRendezvous::new()),
        pool: exec.pool().clone(),
    })?;
    assert_eq!(executor.state(), ExecutorState::Completed);
    Ok(())
}

struct PanicKernel;

impl OpKernel for PanicKernel {
    fn compute(&self, _: &mut KernelContext<'_>) -> Result<(), KernelError> {
        panic!("kernel bug")
    }
}

/// Reference CPU kernels, except `Neg` panics.
struct PanickingNeg(CpuKernelRuntime);

impl KernelRuntime for PanickingNeg {
    fn name(&self) -> &str {
        "ref-cpu+panic"
    }

    fn create_kernel(&self, node: &Node, device: &Device) -> Result<Box<dyn OpKernel>, KernelError> {
        match node.op() {
            "Neg" => Ok(Box::new(PanicKernel)),
            _ => self.0.create_kernel(node, device),
        }
    }
}

#[test]
fn panicking_kernel_fails_its_node() -> anyhow::Result<()> {
    let mut graph = Graph::new(OpRegistry::standard());
    let c = NodeBuilder::constant("c", Tensor::scalar_f32(3.0)).finalize(&mut graph)?;
    let abs = NodeBuilder::new("abs", "Abs").input(c).finalize(&mut graph)?;
    NodeBuilder::new("neg", "Neg").input(c).finalize(&mut graph)?;
    let (exec, params) = setup(Arc::new(PanickingNeg(CpuKernelRuntime::new())))?;
    let device = exec.device().attributes().clone();
    let fetches = attach_fetches(&mut graph, &device, &[abs.into()])?;

    let executor = LocalExecutor::new(graph, params)?;
    let rendezvous = Arc::new(SimpleRendezvous::new());
    let status = executor.run(ExecutorArgs {
        rendezvous: rendezvous.clone(),
        pool: exec.pool().clone(),
    });

    match status {
        Err(ExecutorError::Kernel { node, source: KernelError::Internal(message) }) => {
            assert_eq!(node, "neg");
            assert!(message.contains("kernel bug"), "{message}");
        }
        other => panic!("unexpected status {other:?}"),
    }
    assert_eq!(executor.state(), ExecutorState::Failed);
    assert_eq!(rendezvous.recv(&fetches[0].key)?.tensor.to_f32_vec()?, vec![3.0]);
    Ok(())
}
