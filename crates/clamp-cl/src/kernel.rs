//! Kernels: argument slots and iteration domains.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::buffer::DeviceBuffer;
use crate::driver::{ComputeDriver, KernelArg};
use crate::error::{CheckStatus, Result};

/// Iteration domain of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    OneD { x: usize },
    TwoD { x: usize, y: usize },
}

impl Default for Domain {
    /// The unconfigured domain; dispatching it is rejected by the driver.
    fn default() -> Self {
        Self::OneD { x: 0 }
    }
}

impl Domain {
    pub fn dims(&self) -> u32 {
        match self {
            Self::OneD { .. } => 1,
            Self::TwoD { .. } => 2,
        }
    }

    /// Global work size, one entry per dimension.
    pub fn global_size(&self) -> Vec<usize> {
        match *self {
            Self::OneD { x } => vec![x],
            Self::TwoD { x, y } => vec![x, y],
        }
    }

    /// Work-group size: always one work-item per dimension.
    pub fn local_size(&self) -> Vec<usize> {
        vec![1; self.dims() as usize]
    }

    /// Total work-items in the domain.
    pub fn work_items(&self) -> usize {
        self.global_size().iter().product()
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OneD { x } => write!(f, "[{x}]"),
            Self::TwoD { x, y } => write!(f, "[{x}x{y}]"),
        }
    }
}

/// A value that can be bound to a kernel parameter slot.
pub trait KernelArgument<D: ComputeDriver> {
    fn kind(&self) -> &'static str;

    fn apply(self, driver: &D, raw: &mut D::Kernel, slot: u32) -> Result<()>;
}

impl<D: ComputeDriver> KernelArgument<D> for &DeviceBuffer<D> {
    fn kind(&self) -> &'static str {
        "buffer"
    }

    fn apply(self, driver: &D, raw: &mut D::Kernel, slot: u32) -> Result<()> {
        self.with_storage(|storage| {
            driver.set_kernel_arg(raw, slot, KernelArg::Buffer(&storage.memory)).check("set_kernel_arg")
        })
    }
}

impl<D: ComputeDriver> KernelArgument<D> for &Arc<DeviceBuffer<D>> {
    fn kind(&self) -> &'static str {
        "buffer"
    }

    fn apply(self, driver: &D, raw: &mut D::Kernel, slot: u32) -> Result<()> {
        Arc::as_ref(self).apply(driver, raw, slot)
    }
}

impl<D: ComputeDriver> KernelArgument<D> for i32 {
    fn kind(&self) -> &'static str {
        "int"
    }

    fn apply(self, driver: &D, raw: &mut D::Kernel, slot: u32) -> Result<()> {
        driver.set_kernel_arg(raw, slot, KernelArg::Int(self)).check("set_kernel_arg")
    }
}

impl<D: ComputeDriver> KernelArgument<D> for f32 {
    fn kind(&self) -> &'static str {
        "float"
    }

    fn apply(self, driver: &D, raw: &mut D::Kernel, slot: u32) -> Result<()> {
        driver.set_kernel_arg(raw, slot, KernelArg::Float(self)).check("set_kernel_arg")
    }
}

struct KernelState<D: ComputeDriver> {
    raw: D::Kernel,
    domain: Domain,
}

/// A callable entry point extracted from a [`CompiledProgram`](crate::CompiledProgram).
///
/// Handed out as a shared handle, so several kernels of one program can be
/// bound and dispatched in any order. Slots are overwritten on rebinding. The
/// domain is whatever the most recent `set_domain*` call configured.
pub struct Kernel<D: ComputeDriver> {
    name: String,
    state: Mutex<KernelState<D>>,
    driver: Arc<D>,
}

impl<D: ComputeDriver> Kernel<D> {
    pub(crate) fn new(name: String, raw: D::Kernel, driver: Arc<D>) -> Self {
        Self { name, state: Mutex::new(KernelState { raw, domain: Domain::default() }), driver }
    }

    // Every update is a single driver call or assignment, so a poisoned lock
    // still guards consistent state.
    fn state(&self) -> MutexGuard<'_, KernelState<D>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> Domain {
        self.state().domain
    }

    /// Run `f` on the driver's kernel handle.
    pub fn with_raw<R>(&self, f: impl FnOnce(&D::Kernel) -> R) -> R {
        f(&self.state().raw)
    }

    /// Bind `arg` to parameter `slot`, replacing any earlier binding.
    ///
    /// A binding the driver rejects (bad index, wrong size) is fatal.
    pub fn bind<A: KernelArgument<D>>(&self, slot: u32, arg: A) -> Result<()> {
        debug!(kernel = %self.name, slot, kind = arg.kind(), "binding argument");
        arg.apply(&self.driver, &mut self.state().raw, slot)
    }

    /// Configure a 1D domain of `x` work-items.
    pub fn set_domain(&self, x: usize) {
        self.state().domain = Domain::OneD { x };
    }

    /// Configure a 2D domain of `x` by `y` work-items.
    ///
    /// A zero `y` leaves the second extent unset, giving a 1D domain.
    pub fn set_domain_2d(&self, x: usize, y: usize) {
        self.state().domain = if y == 0 { Domain::OneD { x } } else { Domain::TwoD { x, y } };
    }
}

impl<D: ComputeDriver> fmt::Debug for Kernel<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel").field("name", &self.name).field("domain", &self.domain()).finish()
    }
}
