//! Devices and the execution context the folder runs on.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use rayon::{ThreadPool, ThreadPoolBuilder};
use thiserror::Error;

pub const CPU_DEVICE_TYPE: &str = "CPU";
pub const LOCAL_CPU_DEVICE: &str = "/device:CPU:0";

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no {device_type} device is available")]
    Unavailable { device_type: String },
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAttributes {
    pub name: String,
    pub device_type: String,
    /// Distinguishes restarts of the same named device.
    pub incarnation: u64,
}

#[derive(Debug)]
pub struct Device {
    attrs: DeviceAttributes,
}

impl Device {
    pub fn new(attrs: DeviceAttributes) -> Self {
        Self { attrs }
    }

    pub fn name(&self) -> &str {
        &self.attrs.name
    }

    pub fn device_type(&self) -> &str {
        &self.attrs.device_type
    }

    pub fn incarnation(&self) -> u64 {
        self.attrs.incarnation
    }

    pub fn attributes(&self) -> &DeviceAttributes {
        &self.attrs
    }
}

pub trait DeviceProvider: Send + Sync {
    fn device_type(&self) -> &str;

    fn create_device(&self) -> Result<Device, DeviceError>;
}

/// Provides the single local CPU device.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuDeviceProvider;

impl DeviceProvider for CpuDeviceProvider {
    fn device_type(&self) -> &str {
        CPU_DEVICE_TYPE
    }

    fn create_device(&self) -> Result<Device, DeviceError> {
        Ok(Device::new(DeviceAttributes {
            name: LOCAL_CPU_DEVICE.to_string(),
            device_type: CPU_DEVICE_TYPE.to_string(),
            incarnation: 0,
        }))
    }
}

/// Device plus the worker pool kernels are scheduled on.
#[derive(Clone)]
pub struct ExecutionContext {
    device: Arc<Device>,
    pool: Arc<ThreadPool>,
}

impl ExecutionContext {
    pub fn new(device: Arc<Device>, pool: Arc<ThreadPool>) -> Self {
        Self { device, pool }
    }

    pub fn from_provider(
        provider: &dyn DeviceProvider,
        worker_threads: usize,
    ) -> Result<Self, DeviceError> {
        let device = provider.create_device()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(worker_threads.max(1))
            .thread_name(|index| format!("fold-worker-{index}"))
            .build()?;
        Ok(Self::new(Arc::new(device), Arc::new(pool)))
    }

    /// Process-wide CPU context, created on first use and never torn down.
    pub fn shared_cpu() -> Result<Self, DeviceError> {
        static SHARED: OnceCell<ExecutionContext> = OnceCell::new();
        SHARED
            .get_or_try_init(|| {
                let threads = crate::env::fold_worker_threads();
                log::debug!("creating shared CPU execution context with {threads} worker(s)");
                Self::from_provider(&CpuDeviceProvider, threads)
            })
            .cloned()
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn pool(&self) -> &Arc<ThreadPool> {
        &self.pool
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("device", &self.device.name())
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}
