//! The compute-driver boundary.
//!
//! Everything the runtime asks of the underlying platform goes through
//! [`ComputeDriver`]: platform discovery, context/queue creation, buffer
//! allocation, program builds, argument binding, enqueue and transfers.
//! Every call reports failure as a raw [`StatusCode`]; turning that into a
//! [`ClampError`](crate::error::ClampError) is the caller's job and happens
//! in exactly one place, [`check_status`](crate::error::check_status).
//!
//! Two drivers ship with the crate:
//!
//! | Driver           | Availability                | Backing                         |
//! |------------------|-----------------------------|---------------------------------|
//! | [`HostDriver`]   | always                      | in-process reference execution  |
//! | `OpenClDriver`   | feature `opencl-runtime`    | system ICD loader via `opencl3` |

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod host;
#[cfg(feature = "opencl-runtime")]
pub mod opencl;

pub use host::HostDriver;
#[cfg(feature = "opencl-runtime")]
pub use opencl::OpenClDriver;

// ── Status codes ─────────────────────────────────────────────────────────────

/// Raw status returned by a driver call.
///
/// Numbering follows the OpenCL status codes so that values coming out of a
/// real ICD and out of [`HostDriver`] read the same in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(pub i32);

impl StatusCode {
    pub const SUCCESS: Self = Self(0);
    pub const DEVICE_NOT_FOUND: Self = Self(-1);
    pub const MEM_OBJECT_ALLOCATION_FAILURE: Self = Self(-4);
    pub const OUT_OF_RESOURCES: Self = Self(-5);
    pub const BUILD_PROGRAM_FAILURE: Self = Self(-11);
    pub const EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST: Self = Self(-14);
    pub const INVALID_VALUE: Self = Self(-30);
    pub const INVALID_DEVICE: Self = Self(-33);
    pub const INVALID_PROGRAM_EXECUTABLE: Self = Self(-45);
    pub const INVALID_KERNEL_NAME: Self = Self(-46);
    pub const INVALID_ARG_INDEX: Self = Self(-49);
    pub const INVALID_ARG_VALUE: Self = Self(-50);
    pub const INVALID_ARG_SIZE: Self = Self(-51);
    pub const INVALID_KERNEL_ARGS: Self = Self(-52);
    pub const INVALID_WORK_DIMENSION: Self = Self(-53);
    pub const INVALID_WORK_GROUP_SIZE: Self = Self(-54);
    pub const INVALID_BUFFER_SIZE: Self = Self(-61);
    pub const INVALID_GLOBAL_WORK_SIZE: Self = Self(-63);
    pub const PLATFORM_NOT_FOUND: Self = Self(-1001);

    pub const fn from_raw(code: i32) -> Self {
        Self(code)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Symbolic name for well-known codes.
    pub const fn name(self) -> Option<&'static str> {
        Some(match self.0 {
            0 => "CL_SUCCESS",
            -1 => "CL_DEVICE_NOT_FOUND",
            -4 => "CL_MEM_OBJECT_ALLOCATION_FAILURE",
            -5 => "CL_OUT_OF_RESOURCES",
            -11 => "CL_BUILD_PROGRAM_FAILURE",
            -14 => "CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST",
            -30 => "CL_INVALID_VALUE",
            -33 => "CL_INVALID_DEVICE",
            -45 => "CL_INVALID_PROGRAM_EXECUTABLE",
            -46 => "CL_INVALID_KERNEL_NAME",
            -49 => "CL_INVALID_ARG_INDEX",
            -50 => "CL_INVALID_ARG_VALUE",
            -51 => "CL_INVALID_ARG_SIZE",
            -52 => "CL_INVALID_KERNEL_ARGS",
            -53 => "CL_INVALID_WORK_DIMENSION",
            -54 => "CL_INVALID_WORK_GROUP_SIZE",
            -61 => "CL_INVALID_BUFFER_SIZE",
            -63 => "CL_INVALID_GLOBAL_WORK_SIZE",
            -1001 => "CL_PLATFORM_NOT_FOUND_KHR",
            _ => return None,
        })
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} {name}", self.0),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Result of a single driver call.
pub type DriverResult<T> = std::result::Result<T, StatusCode>;

/// A failed program build together with the compiler's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFailure {
    pub status: StatusCode,
    pub log: String,
}

// ── Call parameters ──────────────────────────────────────────────────────────

/// Class of devices a context is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    #[default]
    Gpu,
    Accelerator,
    All,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpu => write!(f, "gpu"),
            Self::Accelerator => write!(f, "accelerator"),
            Self::All => write!(f, "all"),
        }
    }
}

impl std::str::FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gpu" => Ok(Self::Gpu),
            "accelerator" => Ok(Self::Accelerator),
            "all" => Ok(Self::All),
            other => Err(format!("unknown device type: {other}")),
        }
    }
}

/// A value bound to one kernel parameter slot.
#[derive(Debug)]
pub enum KernelArg<'a, M> {
    Buffer(&'a M),
    Int(i32),
    Float(f32),
}

impl<M> KernelArg<'_, M> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
        }
    }
}

// ── The driver trait ─────────────────────────────────────────────────────────

/// Calls the runtime issues into a compute platform.
///
/// Handle types are associated so each driver keeps its own concrete
/// objects and no downcasting is needed at the seams. Transfers are always
/// blocking and always cover the whole buffer.
pub trait ComputeDriver {
    type Platform;
    type Context;
    type Device: Clone;
    type Queue;
    type Memory;
    type Program;
    type Kernel;
    type Event;

    /// Short driver name for logs.
    fn name(&self) -> &'static str;

    fn platforms(&self) -> DriverResult<Vec<Self::Platform>>;

    fn platform_vendor(&self, platform: &Self::Platform) -> DriverResult<String>;

    fn create_context(
        &self,
        platform: &Self::Platform,
        device_type: DeviceType,
    ) -> DriverResult<Self::Context>;

    fn context_devices(&self, context: &Self::Context) -> DriverResult<Vec<Self::Device>>;

    fn device_name(&self, device: &Self::Device) -> DriverResult<String>;

    /// Create an in-order command queue bound to `device`.
    fn create_queue(
        &self,
        context: &Self::Context,
        device: &Self::Device,
    ) -> DriverResult<Self::Queue>;

    /// Allocate a read/write device buffer of `size` bytes.
    fn create_buffer(&self, context: &Self::Context, size: usize) -> DriverResult<Self::Memory>;

    /// Compile `source` for every device in `context`.
    fn build_program(
        &self,
        context: &Self::Context,
        source: &str,
        options: &str,
    ) -> Result<Self::Program, BuildFailure>;

    /// Compiler output of a successful build; may be empty.
    fn program_build_log(&self, program: &Self::Program) -> DriverResult<String>;

    fn create_kernel(&self, program: &Self::Program, name: &str) -> DriverResult<Self::Kernel>;

    fn set_kernel_arg(
        &self,
        kernel: &mut Self::Kernel,
        index: u32,
        arg: KernelArg<'_, Self::Memory>,
    ) -> DriverResult<()>;

    /// Enqueue `kernel` over `global` work-items; returns without waiting.
    fn enqueue_kernel(
        &self,
        queue: &Self::Queue,
        kernel: &Self::Kernel,
        global: &[usize],
        local: &[usize],
    ) -> DriverResult<Self::Event>;

    fn wait_event(&self, event: &Self::Event) -> DriverResult<()>;

    fn read_buffer(
        &self,
        queue: &Self::Queue,
        memory: &Self::Memory,
        dst: &mut [u8],
    ) -> DriverResult<()>;

    fn write_buffer(
        &self,
        queue: &Self::Queue,
        memory: &mut Self::Memory,
        src: &[u8],
    ) -> DriverResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_includes_symbol() {
        assert_eq!(StatusCode::INVALID_ARG_INDEX.to_string(), "-49 CL_INVALID_ARG_INDEX");
    }

    #[test]
    fn status_display_unknown_code_is_numeric() {
        assert_eq!(StatusCode(-9999).to_string(), "-9999");
        assert!(StatusCode(-9999).name().is_none());
    }

    #[test]
    fn only_zero_is_success() {
        assert!(StatusCode::SUCCESS.is_success());
        assert!(!StatusCode::OUT_OF_RESOURCES.is_success());
        assert_eq!(StatusCode::from_raw(-5), StatusCode::OUT_OF_RESOURCES);
    }

    #[test]
    fn device_type_parse_is_case_insensitive() {
        assert_eq!("GPU".parse::<DeviceType>(), Ok(DeviceType::Gpu));
        assert_eq!("accelerator".parse::<DeviceType>(), Ok(DeviceType::Accelerator));
        assert!("fpga".parse::<DeviceType>().is_err());
    }

    #[test]
    fn kernel_arg_kind_names() {
        assert_eq!(KernelArg::<()>::Int(1).kind(), "int");
        assert_eq!(KernelArg::<()>::Float(1.0).kind(), "float");
        assert_eq!(KernelArg::Buffer(&()).kind(), "buffer");
    }
}
