pub mod cpu;

pub use cpu::{
    BinaryOp, CpuKernelInterceptor, CpuKernelRuntime, GenericCpuRuntime, NoopInterceptor, UnaryOp,
};
