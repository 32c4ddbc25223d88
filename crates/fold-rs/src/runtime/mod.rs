//! Execution machinery: kernels, devices, rendezvous and the local executor.

pub mod device;
pub mod executor;
pub mod kernel;
pub mod rendezvous;

pub use device::{
    CpuDeviceProvider, Device, DeviceAttributes, DeviceError, DeviceProvider, ExecutionContext,
    CPU_DEVICE_TYPE, LOCAL_CPU_DEVICE,
};
pub use executor::{
    DoneCallback, ExecutorArgs, ExecutorError, ExecutorState, LocalExecutor, LocalExecutorParams,
};
pub use kernel::{Entry, KernelContext, KernelError, KernelRuntime, OpKernel};
pub use rendezvous::{
    create_key, FetchResult, ParsedKey, RecvCallback, Rendezvous, RendezvousError,
    SimpleRendezvous,
};

/// Locks `mutex`, recovering the guard if a holder panicked. Every critical
/// section here leaves its table consistent before it can panic.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
