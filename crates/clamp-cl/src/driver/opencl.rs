//! [`ComputeDriver`] over the system OpenCL ICD loader via `opencl3`.
//!
//! Only compiled with the `opencl-runtime` feature.

use std::ptr;

use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::{
    CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_GPU, Device,
};
use opencl3::error_codes::ClError;
use opencl3::event::Event;
use opencl3::kernel::Kernel;
use opencl3::memory::{Buffer, CL_MEM_READ_WRITE, ClMem};
use opencl3::platform::{Platform, get_platforms};
use opencl3::program::Program;
use opencl3::types::{CL_BLOCKING, cl_device_id, cl_device_type};
use tracing::{debug, warn};

use super::{BuildFailure, ComputeDriver, DeviceType, DriverResult, KernelArg, StatusCode};

fn status(err: ClError) -> StatusCode {
    StatusCode::from_raw(err.0)
}

fn cl_device_type(device_type: DeviceType) -> cl_device_type {
    match device_type {
        DeviceType::Gpu => CL_DEVICE_TYPE_GPU,
        DeviceType::Accelerator => CL_DEVICE_TYPE_ACCELERATOR,
        DeviceType::All => CL_DEVICE_TYPE_ALL,
    }
}

/// A device id under the shared context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClDevice(cl_device_id);

// SAFETY: device ids are immutable handles owned by the ICD for the life of
// the process; OpenCL API calls taking them are thread-safe.
unsafe impl Send for ClDevice {}
unsafe impl Sync for ClDevice {}

impl ClDevice {
    pub fn id(&self) -> cl_device_id {
        self.0
    }
}

/// A built program with the build log captured at build time.
pub struct ClProgram {
    program: Program,
    log: String,
}

impl ClProgram {
    pub fn program(&self) -> &Program {
        &self.program
    }
}

/// The OpenCL driver. Stateless; every handle it hands out owns its
/// underlying OpenCL object.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenClDriver;

impl OpenClDriver {
    pub fn new() -> Self {
        Self
    }

    fn collect_build_log(program: &Program, devices: &[cl_device_id]) -> String {
        let mut log = String::new();
        for &device in devices {
            match program.get_build_log(device) {
                Ok(text) => log.push_str(&text),
                Err(e) => warn!(code = e.0, "build log unavailable"),
            }
        }
        log
    }
}

impl ComputeDriver for OpenClDriver {
    type Platform = Platform;
    type Context = Context;
    type Device = ClDevice;
    type Queue = CommandQueue;
    type Memory = Buffer<u8>;
    type Program = ClProgram;
    type Kernel = Kernel;
    type Event = Event;

    fn name(&self) -> &'static str {
        "opencl"
    }

    fn platforms(&self) -> DriverResult<Vec<Platform>> {
        get_platforms().map_err(status)
    }

    fn platform_vendor(&self, platform: &Platform) -> DriverResult<String> {
        platform.vendor().map_err(status)
    }

    fn create_context(&self, platform: &Platform, device_type: DeviceType) -> DriverResult<Context> {
        let ids = platform.get_devices(cl_device_type(device_type)).map_err(status)?;
        if ids.is_empty() {
            return Err(StatusCode::DEVICE_NOT_FOUND);
        }
        debug!(devices = ids.len(), %device_type, "creating OpenCL context");
        Context::from_devices(&ids, &[], None, ptr::null_mut()).map_err(status)
    }

    fn context_devices(&self, context: &Context) -> DriverResult<Vec<ClDevice>> {
        Ok(context.devices().iter().copied().map(ClDevice).collect())
    }

    fn device_name(&self, device: &ClDevice) -> DriverResult<String> {
        Device::new(device.0).name().map_err(status)
    }

    fn create_queue(&self, context: &Context, device: &ClDevice) -> DriverResult<CommandQueue> {
        // SAFETY: `device.0` was obtained from `context.devices()`.
        unsafe { CommandQueue::create_with_properties(context, device.0, 0, 0) }.map_err(status)
    }

    fn create_buffer(&self, context: &Context, size: usize) -> DriverResult<Buffer<u8>> {
        // SAFETY: no host pointer is supplied, so the runtime owns the storage.
        unsafe { Buffer::<u8>::create(context, CL_MEM_READ_WRITE, size, ptr::null_mut()) }
            .map_err(status)
    }

    fn build_program(
        &self,
        context: &Context,
        source: &str,
        options: &str,
    ) -> Result<ClProgram, BuildFailure> {
        let mut program = Program::create_from_source(context, source)
            .map_err(|e| BuildFailure { status: status(e), log: String::new() })?;
        let built = program.build(context.devices(), options);
        let log = Self::collect_build_log(&program, context.devices());
        match built {
            Ok(()) => Ok(ClProgram { program, log }),
            Err(e) => Err(BuildFailure { status: status(e), log }),
        }
    }

    fn program_build_log(&self, program: &ClProgram) -> DriverResult<String> {
        Ok(program.log.clone())
    }

    fn create_kernel(&self, program: &ClProgram, name: &str) -> DriverResult<Kernel> {
        Kernel::create(&program.program, name).map_err(status)
    }

    fn set_kernel_arg(
        &self,
        kernel: &mut Kernel,
        index: u32,
        arg: KernelArg<'_, Buffer<u8>>,
    ) -> DriverResult<()> {
        // SAFETY: each argument is passed with the exact size of its value;
        // the driver validates it against the kernel's parameter.
        unsafe {
            match arg {
                KernelArg::Buffer(mem) => kernel.set_arg(index, &mem.get()),
                KernelArg::Int(v) => kernel.set_arg(index, &v),
                KernelArg::Float(v) => kernel.set_arg(index, &v),
            }
        }
        .map_err(status)
    }

    fn enqueue_kernel(
        &self,
        queue: &CommandQueue,
        kernel: &Kernel,
        global: &[usize],
        local: &[usize],
    ) -> DriverResult<Event> {
        if global.len() != local.len() {
            return Err(StatusCode::INVALID_WORK_DIMENSION);
        }
        // SAFETY: both size arrays hold `global.len()` entries and outlive
        // the call; no event wait list is passed.
        unsafe {
            queue.enqueue_nd_range_kernel(
                kernel.get(),
                global.len() as u32,
                ptr::null(),
                global.as_ptr(),
                local.as_ptr(),
                &[],
            )
        }
        .map_err(status)
    }

    fn wait_event(&self, event: &Event) -> DriverResult<()> {
        event.wait().map_err(status)
    }

    fn read_buffer(&self, queue: &CommandQueue, memory: &Buffer<u8>, dst: &mut [u8]) -> DriverResult<()> {
        // SAFETY: blocking read into a slice the caller sized to the buffer.
        unsafe { queue.enqueue_read_buffer(memory, CL_BLOCKING, 0, dst, &[]) }
            .map(|_| ())
            .map_err(status)
    }

    fn write_buffer(&self, queue: &CommandQueue, memory: &mut Buffer<u8>, src: &[u8]) -> DriverResult<()> {
        // SAFETY: blocking write from a slice the caller sized to the buffer.
        unsafe { queue.enqueue_write_buffer(memory, CL_BLOCKING, 0, src, &[]) }
            .map(|_| ())
            .map_err(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_type_mapping() {
        assert_eq!(cl_device_type(DeviceType::Gpu), CL_DEVICE_TYPE_GPU);
        assert_eq!(cl_device_type(DeviceType::All), CL_DEVICE_TYPE_ALL);
    }

    #[test]
    fn cl_error_maps_to_status() {
        assert_eq!(status(ClError(-46)), StatusCode::INVALID_KERNEL_NAME);
    }

    #[test]
    #[ignore = "requires OpenCL runtime - run with --ignored on GPU machine"]
    fn enumerates_platforms() {
        let driver = OpenClDriver::new();
        let platforms = driver.platforms().unwrap();
        assert!(!platforms.is_empty());
        assert!(!driver.platform_vendor(&platforms[0]).unwrap().is_empty());
    }
}
