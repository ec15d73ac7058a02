//! Host-side runtime for dispatching compute kernels to accelerator devices.
//!
//! The crate wraps platform discovery, context and queue lifetimes, device
//! buffers with host mirrors, program compilation, argument binding and
//! 1D/2D dispatch behind a small ownership hierarchy:
//!
//! ```text
//! Runtime ──► LogicalDevice ──► DeviceBuffer
//!    │
//!    └──────► CompiledProgram ──► Kernel
//! ```
//!
//! All platform calls go through a [`ComputeDriver`](driver::ComputeDriver).
//! [`HostDriver`](driver::HostDriver) runs kernels as host closures and is
//! always available; `OpenClDriver` (feature `opencl-runtime`) talks to a real
//! OpenCL ICD.
//!
//! Failures are split by [`ClampError::severity`]: driver, build and transfer
//! failures are fatal, while a missing source file, a bad device index, an
//! unknown kernel name or freeing a foreign buffer are recoverable. The
//! methods named after the runtime's operations return `Ok(None)` (or
//! `Ok(false)`) for recoverable failures; the `try_*` forms return the full
//! error. [`policy`] turns fatal errors into process termination on request.
//!
//! ```
//! use clamp_cl::Runtime;
//! use clamp_cl::driver::HostDriver;
//!
//! let driver = HostDriver::new().with_kernel("twice", |item, args| {
//!     let i = item.global_id(0);
//!     let v: f32 = args.load(0, i)?;
//!     args.store(0, i, v * 2.0)
//! });
//! let runtime = Runtime::new(driver)?;
//! let device = runtime.create_logical_device(0)?.expect("device 0");
//! let mut program =
//!     runtime.compile_from_source("__kernel void twice(__global float* data) {}")?;
//! let kernel = program.get_kernel("twice")?.expect("kernel");
//!
//! let buffer = device.allocate(size_of::<f32>(), 4)?;
//! device.write_slice(&buffer, &[1.0f32, 2.0, 3.0, 4.0])?;
//! kernel.bind(0, &buffer)?;
//! kernel.set_domain(4);
//! device.dispatch(&kernel)?;
//! device.wait_idle()?;
//! assert_eq!(device.read_vec::<f32>(&buffer)?, vec![2.0, 4.0, 6.0, 8.0]);
//! # Ok::<(), clamp_cl::ClampError>(())
//! ```

pub mod buffer;
pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod kernel;
pub mod policy;
pub mod program;
pub mod runtime;
pub mod source;

pub use buffer::{BufferId, DeviceBuffer};
pub use config::{ConfigError, RuntimeConfig};
pub use device::{Completion, LogicalDevice};
pub use driver::{ComputeDriver, DeviceType, StatusCode};
pub use error::{ClampError, Result, Severity, check_status};
pub use kernel::{Domain, Kernel, KernelArgument};
pub use policy::{OrAbort, Recover};
pub use program::CompiledProgram;
pub use runtime::Runtime;
