//! Per-node kernel interface consumed by the local executor.
//!
//! Kernels are opaque to the executor: a [`KernelRuntime`] turns a node into an
//! [`OpKernel`], and the executor hands each kernel a [`KernelContext`] holding
//! resolved inputs and empty output slots.

use thiserror::Error;

use crate::graph::{AttrValue, Node};
use crate::tensor::{Tensor, TensorError};

use super::device::Device;
use super::rendezvous::{create_key, Rendezvous, RendezvousError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{op} is not implemented: {reason}")]
    Unimplemented { op: String, reason: String },
    #[error("output {index} was already set")]
    DuplicateOutput { index: usize },
    #[error("kernel did not produce output {index}")]
    MissingOutput { index: usize },
    #[error("node has no output {index}")]
    OutputOutOfRange { index: usize },
    #[error("input {index} is dead")]
    DeadInput { index: usize },
    #[error("missing attribute `{0}`")]
    MissingAttr(String),
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error(transparent)]
    Rendezvous(#[from] RendezvousError),
    #[error("internal: {0}")]
    Internal(String),
}

impl KernelError {
    pub fn unimplemented(op: impl Into<String>, reason: impl Into<String>) -> Self {
        KernelError::Unimplemented {
            op: op.into(),
            reason: reason.into(),
        }
    }
}

/// A value flowing along a data edge during execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Value(Tensor),
    /// Never produced (e.g. an untaken branch).
    Dead,
}

impl Entry {
    pub fn is_dead(&self) -> bool {
        matches!(self, Entry::Dead)
    }
}

/// Executable form of one node.
pub trait OpKernel: Send + Sync {
    fn compute(&self, ctx: &mut KernelContext<'_>) -> Result<(), KernelError>;

    /// Kernels that return `false` are skipped when any input is dead and
    /// their outputs become dead.
    fn accepts_dead_inputs(&self) -> bool {
        false
    }
}

/// Opaque per-node kernel factory. Implementations must create kernels that
/// share no mutable state with kernels created earlier.
pub trait KernelRuntime: Send + Sync {
    fn name(&self) -> &str;

    fn create_kernel(&self, node: &Node, device: &Device)
        -> Result<Box<dyn OpKernel>, KernelError>;
}

pub struct KernelContext<'a> {
    node: &'a Node,
    device: &'a Device,
    rendezvous: &'a dyn Rendezvous,
    inputs: &'a [Entry],
    outputs: Vec<Option<Entry>>,
}

impl<'a> KernelContext<'a> {
    pub fn new(
        node: &'a Node,
        device: &'a Device,
        rendezvous: &'a dyn Rendezvous,
        inputs: &'a [Entry],
    ) -> Self {
        Self {
            node,
            device,
            rendezvous,
            inputs,
            outputs: vec![None; node.num_outputs()],
        }
    }

    pub fn node(&self) -> &Node {
        self.node
    }

    pub fn device(&self) -> &Device {
        self.device
    }

    pub fn rendezvous(&self) -> &dyn Rendezvous {
        self.rendezvous
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn input(&self, index: usize) -> Result<&Tensor, KernelError> {
        match self.inputs.get(index) {
            Some(Entry::Value(tensor)) => Ok(tensor),
            Some(Entry::Dead) => Err(KernelError::DeadInput { index }),
            None => Err(KernelError::InvalidArgument(format!(
                "{} has {} inputs, requested input {index}",
                self.node.name(),
                self.inputs.len()
            ))),
        }
    }

    pub fn input_is_dead(&self, index: usize) -> bool {
        self.inputs.get(index).is_some_and(Entry::is_dead)
    }

    pub fn attr(&self, key: &str) -> Result<&AttrValue, KernelError> {
        self.node
            .attr(key)
            .ok_or_else(|| KernelError::MissingAttr(key.to_string()))
    }

    /// Stores output `index`. Each output may be written exactly once.
    pub fn set_output(&mut self, index: usize, tensor: Tensor) -> Result<(), KernelError> {
        self.set_entry(index, Entry::Value(tensor))
    }

    pub fn set_output_dead(&mut self, index: usize) -> Result<(), KernelError> {
        self.set_entry(index, Entry::Dead)
    }

    /// Consumes the context, returning every output or the first unset slot.
    pub fn into_outputs(self) -> Result<Vec<Entry>, KernelError> {
        self.outputs
            .into_iter()
            .enumerate()
            .map(|(index, slot)| slot.ok_or(KernelError::MissingOutput { index }))
            .collect()
    }

    fn set_entry(&mut self, index: usize, entry: Entry) -> Result<(), KernelError> {
        let slot = self
            .outputs
            .get_mut(index)
            .ok_or(KernelError::OutputOutOfRange { index })?;
        if slot.is_some() {
            return Err(KernelError::DuplicateOutput { index });
        }
        *slot = Some(entry);
        Ok(())
    }
}

/// Emits the tensor stored in the node's `value` attribute.
pub struct ConstKernel {
    value: Tensor,
}

impl ConstKernel {
    pub fn new(node: &Node) -> Result<Self, KernelError> {
        let value = node
            .attr("value")
            .and_then(AttrValue::as_tensor)
            .cloned()
            .ok_or_else(|| KernelError::MissingAttr("value".into()))?;
        Ok(Self { value })
    }
}

impl OpKernel for ConstKernel {
    fn compute(&self, ctx: &mut KernelContext<'_>) -> Result<(), KernelError> {
        ctx.set_output(0, self.value.clone())
    }
}

/// Publishes its single input to the rendezvous under the node's `tensor_name`.
pub struct SendKernel {
    key: String,
}

impl SendKernel {
    pub fn new(node: &Node) -> Result<Self, KernelError> {
        let str_attr = |key: &str| {
            node.attr(key)
                .and_then(AttrValue::as_str)
                .ok_or_else(|| KernelError::MissingAttr(key.to_string()))
        };
        let incarnation = node
            .attr("send_device_incarnation")
            .and_then(AttrValue::as_int)
            .unwrap_or(0) as u64;
        let key = create_key(
            str_attr("send_device")?,
            incarnation,
            str_attr("recv_device")?,
            str_attr("tensor_name")?,
        );
        Ok(Self { key })
    }
}

impl OpKernel for SendKernel {
    fn compute(&self, ctx: &mut KernelContext<'_>) -> Result<(), KernelError> {
        if ctx.input_is_dead(0) {
            // Dead values still go through the rendezvous, which decides their fate.
            let placeholder = Tensor::scalar_f32(0.0);
            ctx.rendezvous().send(&self.key, placeholder, true)?;
            return Ok(());
        }
        let value = ctx.input(0)?.clone();
        ctx.rendezvous().send(&self.key, value, false)?;
        Ok(())
    }

    fn accepts_dead_inputs(&self) -> bool {
        true
    }
}

pub struct NoOpKernel;

impl OpKernel for NoOpKernel {
    fn compute(&self, _ctx: &mut KernelContext<'_>) -> Result<(), KernelError> {
        Ok(())
    }
}

/// Creates the kernels the executor provides itself, deferring everything else
/// to `runtime`.
pub(crate) fn create_kernel(
    runtime: &dyn KernelRuntime,
    node: &Node,
    device: &Device,
) -> Result<Box<dyn OpKernel>, KernelError> {
    match node.op() {
        "Const" => Ok(Box::new(ConstKernel::new(node)?)),
        "_Send" => Ok(Box::new(SendKernel::new(node)?)),
        "NoOp" => Ok(Box::new(NoOpKernel)),
        _ => runtime.create_kernel(node, device),
    }
}
