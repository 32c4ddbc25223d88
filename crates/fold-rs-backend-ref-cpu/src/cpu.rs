use std::sync::Arc;

use fold_rs::graph::Node;
use fold_rs::runtime::{Device, KernelContext, KernelError, KernelRuntime, OpKernel, CPU_DEVICE_TYPE};
use fold_rs::tensor::{DType, Shape, Tensor};

/// Hook consulted before the built-in kernel runs. Returning `Some` replaces
/// the built-in computation for that invocation.
pub trait CpuKernelInterceptor: Send + Sync {
    fn try_execute(&self, ctx: &mut KernelContext<'_>) -> Option<Result<(), KernelError>>;
}

#[derive(Default)]
pub struct NoopInterceptor;

impl CpuKernelInterceptor for NoopInterceptor {
    fn try_execute(&self, _ctx: &mut KernelContext<'_>) -> Option<Result<(), KernelError>> {
        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Maximum,
    Minimum,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Identity,
    Neg,
    Abs,
    Square,
    Exp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CpuOp {
    Binary(BinaryOp),
    Unary(UnaryOp),
}

impl CpuOp {
    fn from_name(op: &str) -> Option<Self> {
        let op = match op {
            "Add" => CpuOp::Binary(BinaryOp::Add),
            "Sub" => CpuOp::Binary(BinaryOp::Sub),
            "Mul" => CpuOp::Binary(BinaryOp::Mul),
            "Div" => CpuOp::Binary(BinaryOp::Div),
            "Maximum" => CpuOp::Binary(BinaryOp::Maximum),
            "Minimum" => CpuOp::Binary(BinaryOp::Minimum),
            "Identity" => CpuOp::Unary(UnaryOp::Identity),
            "Neg" => CpuOp::Unary(UnaryOp::Neg),
            "Abs" => CpuOp::Unary(UnaryOp::Abs),
            "Square" => CpuOp::Unary(UnaryOp::Square),
            "Exp" => CpuOp::Unary(UnaryOp::Exp),
            _ => return None,
        };
        Some(op)
    }
}

/// Reference kernel runtime for elementwise `F32` and `Si32` ops on the CPU.
#[derive(Clone)]
pub struct GenericCpuRuntime<I: CpuKernelInterceptor> {
    interceptor: Arc<I>,
}

impl<I: CpuKernelInterceptor> GenericCpuRuntime<I> {
    pub fn with_interceptor(interceptor: I) -> Self {
        Self {
            interceptor: Arc::new(interceptor),
        }
    }

    pub fn with_arc(interceptor: Arc<I>) -> Self {
        Self { interceptor }
    }

    pub fn interceptor(&self) -> &I {
        self.interceptor.as_ref()
    }
}

impl GenericCpuRuntime<NoopInterceptor> {
    pub fn new() -> Self {
        Self::with_interceptor(NoopInterceptor)
    }
}

impl Default for GenericCpuRuntime<NoopInterceptor> {
    fn default() -> Self {
        Self::new()
    }
}

pub type CpuKernelRuntime = GenericCpuRuntime<NoopInterceptor>;

impl<I: CpuKernelInterceptor + 'static> KernelRuntime for GenericCpuRuntime<I> {
    fn name(&self) -> &str {
        "ref-cpu"
    }

    fn create_kernel(
        &self,
        node: &Node,
        device: &Device,
    ) -> Result<Box<dyn OpKernel>, KernelError> {
        if device.device_type() != CPU_DEVICE_TYPE {
            return Err(KernelError::unimplemented(
                node.op(),
                format!("no kernel for device type {}", device.device_type()),
            ));
        }
        let op = CpuOp::from_name(node.op())
            .ok_or_else(|| KernelError::unimplemented(node.op(), "operation not supported in ref-cpu runtime"))?;
        Ok(Box::new(CpuKernel {
            op,
            interceptor: Arc::clone(&self.interceptor),
        }))
    }
}

struct CpuKernel<I: CpuKernelInterceptor> {
    op: CpuOp,
    interceptor: Arc<I>,
}

impl<I: CpuKernelInterceptor> OpKernel for CpuKernel<I> {
    fn compute(&self, ctx: &mut KernelContext<'_>) -> Result<(), KernelError> {
        if let Some(result) = self.interceptor.try_execute(ctx) {
            return result;
        }
        let output = match self.op {
            CpuOp::Binary(op) => op_binary(ctx.input(0)?, ctx.input(1)?, op)?,
            CpuOp::Unary(op) => op_unary(ctx.input(0)?, op)?,
        };
        ctx.set_output(0, output)
    }
}

/// Output shape of a binary op: equal shapes, or one side a single element.
fn broadcast_shape(lhs: &Tensor, rhs: &Tensor) -> Result<Shape, KernelError> {
    if lhs.shape() == rhs.shape() || rhs.shape().num_elements() == 1 {
        Ok(lhs.shape().clone())
    } else if lhs.shape().num_elements() == 1 {
        Ok(rhs.shape().clone())
    } else {
        Err(KernelError::InvalidArgument(format!(
            "incompatible shapes {} and {}",
            lhs.shape(),
            rhs.shape()
        )))
    }
}

fn zip_broadcast<T: Copy, R>(
    a: &[T],
    b: &[T],
    len: usize,
    mut f: impl FnMut(T, T) -> Result<R, KernelError>,
) -> Result<Vec<R>, KernelError> {
    let pick = |values: &[T], i: usize| if values.len() == 1 { values[0] } else { values[i] };
    (0..len).map(|i| f(pick(a, i), pick(b, i))).collect()
}

fn op_binary(lhs: &Tensor, rhs: &Tensor, op: BinaryOp) -> Result<Tensor, KernelError> {
    if lhs.dtype() != rhs.dtype() {
        return Err(KernelError::InvalidArgument(format!(
            "binary operands differ in dtype: {} vs {}",
            lhs.dtype(),
            rhs.dtype()
        )));
    }
    let shape = broadcast_shape(lhs, rhs)?;
    let len = shape.num_elements();
    match lhs.dtype() {
        DType::F32 => {
            let (a, b) = (lhs.to_f32_vec()?, rhs.to_f32_vec()?);
            let values = zip_broadcast(&a, &b, len, |x, y| {
                Ok(match op {
                    BinaryOp::Add => x + y,
                    BinaryOp::Sub => x - y,
                    BinaryOp::Mul => x * y,
                    BinaryOp::Div => x / y,
                    BinaryOp::Maximum => x.max(y),
                    BinaryOp::Minimum => x.min(y),
                })
            })?;
            Ok(Tensor::from_f32(shape, &values)?)
        }
        DType::Si32 => {
            let (a, b) = (lhs.to_i32_vec()?, rhs.to_i32_vec()?);
            let values = zip_broadcast(&a, &b, len, |x, y| match op {
                BinaryOp::Add => Ok(x.wrapping_add(y)),
                BinaryOp::Sub => Ok(x.wrapping_sub(y)),
                BinaryOp::Mul => Ok(x.wrapping_mul(y)),
                BinaryOp::Div => x
                    .checked_div(y)
                    .ok_or_else(|| KernelError::InvalidArgument("integer division by zero".into())),
                BinaryOp::Maximum => Ok(x.max(y)),
                BinaryOp::Minimum => Ok(x.min(y)),
            })?;
            Ok(Tensor::from_i32(shape, &values)?)
        }
        other => Err(KernelError::unimplemented(
            format!("{op:?}"),
            format!("dtype {other} not supported in ref-cpu runtime"),
        )),
    }
}

fn op_unary(input: &Tensor, op: UnaryOp) -> Result<Tensor, KernelError> {
    if op == UnaryOp::Identity {
        return Ok(input.clone());
    }
    let shape = input.shape().clone();
    match input.dtype() {
        DType::F32 => {
            let values: Vec<f32> = input
                .to_f32_vec()?
                .into_iter()
                .map(|x| match op {
                    UnaryOp::Identity => x,
                    UnaryOp::Neg => -x,
                    UnaryOp::Abs => x.abs(),
                    UnaryOp::Square => x * x,
                    UnaryOp::Exp => x.exp(),
                })
                .collect();
            Ok(Tensor::from_f32(shape, &values)?)
        }
        DType::Si32 if op != UnaryOp::Exp => {
            let values: Vec<i32> = input
                .to_i32_vec()?
                .into_iter()
                .map(|x| match op {
                    UnaryOp::Neg => x.wrapping_neg(),
                    UnaryOp::Abs => x.wrapping_abs(),
                    UnaryOp::Square => x.wrapping_mul(x),
                    UnaryOp::Identity | UnaryOp::Exp => x,
                })
                .collect();
            Ok(Tensor::from_i32(shape, &values)?)
        }
        other => Err(KernelError::unimplemented(
            format!("{op:?}"),
            format!("dtype {other} not supported in ref-cpu runtime"),
        )),
    }
}
