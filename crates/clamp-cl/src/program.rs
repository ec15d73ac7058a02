//! Compiled programs and kernel extraction.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::driver::{ComputeDriver, StatusCode};
use crate::error::{ClampError, Result, driver_error};
use crate::kernel::Kernel;
use crate::policy::Recover;

/// A program built for every device in the runtime's context.
///
/// Keeps a handle to each [`Kernel`] extracted from it. Kernels are declared
/// before the program handle so the program's references drop first.
pub struct CompiledProgram<D: ComputeDriver> {
    kernels: Vec<Arc<Kernel<D>>>,
    raw: D::Program,
    build_log: String,
    driver: Arc<D>,
}

impl<D: ComputeDriver> CompiledProgram<D> {
    pub(crate) fn new(raw: D::Program, build_log: String, driver: Arc<D>) -> Self {
        Self { kernels: Vec::new(), raw, build_log, driver }
    }

    /// Extract entry point `name` as a new kernel tracked by this program.
    ///
    /// The returned handle does not borrow the program, so kernels extracted
    /// earlier stay usable. An unknown name is [`ClampError::KernelNotFound`];
    /// any other driver failure is fatal.
    pub fn try_kernel(&mut self, name: &str) -> Result<Arc<Kernel<D>>> {
        let raw = match self.driver.create_kernel(&self.raw, name) {
            Ok(raw) => raw,
            Err(status) if status == StatusCode::INVALID_KERNEL_NAME => {
                return Err(ClampError::KernelNotFound { name: name.to_string(), status });
            }
            Err(status) => return Err(driver_error(status, "create_kernel")),
        };
        debug!(kernel = name, count = self.kernels.len() + 1, "kernel extracted");
        let kernel = Arc::new(Kernel::new(name.to_string(), raw, Arc::clone(&self.driver)));
        self.kernels.push(Arc::clone(&kernel));
        Ok(kernel)
    }

    /// Like [`try_kernel`](Self::try_kernel) but an unknown name yields
    /// `Ok(None)`, leaving the kernel set unchanged.
    pub fn get_kernel(&mut self, name: &str) -> Result<Option<Arc<Kernel<D>>>> {
        self.try_kernel(name).absent()
    }

    /// A previously extracted kernel, by extraction order.
    pub fn kernel(&self, position: usize) -> Option<Arc<Kernel<D>>> {
        self.kernels.get(position).cloned()
    }

    pub fn kernels(&self) -> impl Iterator<Item = &Kernel<D>> {
        self.kernels.iter().map(|k| &**k)
    }

    pub fn kernel_count(&self) -> usize {
        self.kernels.len()
    }

    /// Compiler output from the successful build.
    pub fn build_log(&self) -> &str {
        &self.build_log
    }

    /// The driver's program handle.
    pub fn raw(&self) -> &D::Program {
        &self.raw
    }
}

impl<D: ComputeDriver> fmt::Debug for CompiledProgram<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledProgram").field("kernels", &self.kernels).finish()
    }
}
