//! The runtime: platform discovery, the shared context, and the factories
//! for logical devices and compiled programs.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info};

use crate::config::RuntimeConfig;
use crate::device::LogicalDevice;
use crate::driver::{BuildFailure, ComputeDriver, StatusCode};
use crate::error::{CheckStatus, ClampError, Result, driver_error, poisoned};
use crate::policy::Recover;
use crate::program::CompiledProgram;

/// Platform facts shared with logical devices for diagnostics.
#[derive(Debug)]
pub(crate) struct PlatformInfo {
    pub(crate) vendor: String,
}

/// Host-side runtime bound to the first platform the driver reports.
///
/// Owns the context shared by every device on that platform and a
/// fixed-size table of lazily opened [`LogicalDevice`]s, one per physical
/// device.
///
/// ```
/// use clamp_cl::Runtime;
/// use clamp_cl::driver::HostDriver;
///
/// let runtime = Runtime::new(HostDriver::new().with_devices(2)).unwrap();
/// assert_eq!(runtime.device_count(), 2);
///
/// let first = runtime.create_logical_device(0).unwrap().unwrap();
/// let again = runtime.create_logical_device(0).unwrap().unwrap();
/// assert!(std::sync::Arc::ptr_eq(&first, &again));
/// assert!(runtime.create_logical_device(-1).unwrap().is_none());
/// ```
pub struct Runtime<D: ComputeDriver> {
    slots: Mutex<Box<[Option<Arc<LogicalDevice<D>>>]>>,
    devices: Vec<D::Device>,
    context: Arc<D::Context>,
    info: Arc<PlatformInfo>,
    config: RuntimeConfig,
    driver: Arc<D>,
}

impl<D: ComputeDriver> Runtime<D> {
    /// Bind to the driver's first platform with default settings.
    pub fn new(driver: D) -> Result<Self> {
        Self::with_config(driver, RuntimeConfig::default())
    }

    pub fn with_config(driver: D, config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        let driver = Arc::new(driver);

        let platform = match driver.platforms() {
            Ok(mut platforms) if !platforms.is_empty() => platforms.swap_remove(0),
            Ok(_) => return Err(no_platform(StatusCode::PLATFORM_NOT_FOUND)),
            Err(status) => return Err(no_platform(status)),
        };
        let vendor = driver.platform_vendor(&platform).check("platform_vendor")?;
        info!(driver = driver.name(), vendor = %vendor, "using compute platform");

        let no_devices = || {
            error!(vendor = %vendor, device_type = %config.device_type, "no devices under context");
            ClampError::NoDevices { vendor: vendor.clone(), device_type: config.device_type.to_string() }
        };
        let context = match driver.create_context(&platform, config.device_type) {
            Ok(context) => context,
            Err(status) if status == StatusCode::DEVICE_NOT_FOUND => return Err(no_devices()),
            Err(status) => return Err(driver_error(status, "create_context")),
        };
        let devices = driver.context_devices(&context).check("context_devices")?;
        if devices.is_empty() {
            return Err(no_devices());
        }
        info!(devices = devices.len(), device_type = %config.device_type, "context created");

        let slots = (0..devices.len()).map(|_| None).collect::<Vec<_>>().into_boxed_slice();
        Ok(Self {
            slots: Mutex::new(slots),
            devices,
            context: Arc::new(context),
            info: Arc::new(PlatformInfo { vendor }),
            config,
            driver,
        })
    }

    // ── Devices ─────────────────────────────────────────────────

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// The logical device at `index`, opening it on first request.
    ///
    /// Negative or out-of-range indices are [`ClampError::InvalidDeviceIndex`].
    pub fn try_logical_device<I>(&self, index: I) -> Result<Arc<LogicalDevice<D>>>
    where
        I: TryInto<usize> + fmt::Display + Copy,
    {
        let count = self.devices.len();
        let slot = index
            .try_into()
            .ok()
            .filter(|&i| i < count)
            .ok_or_else(|| ClampError::InvalidDeviceIndex { index: index.to_string(), count })?;

        let mut slots = self.slots.lock().map_err(poisoned)?;
        if let Some(device) = &slots[slot] {
            return Ok(Arc::clone(device));
        }
        let device = Arc::new(LogicalDevice::open(
            slot,
            Arc::clone(&self.driver),
            Arc::clone(&self.context),
            self.devices[slot].clone(),
            Arc::downgrade(&self.info),
        )?);
        slots[slot] = Some(Arc::clone(&device));
        Ok(device)
    }

    /// Like [`try_logical_device`](Self::try_logical_device) but an invalid
    /// index yields `Ok(None)`.
    pub fn create_logical_device<I>(&self, index: I) -> Result<Option<Arc<LogicalDevice<D>>>>
    where
        I: TryInto<usize> + fmt::Display + Copy,
    {
        self.try_logical_device(index).absent()
    }

    /// Name of physical device `index`, or `None` when out of range.
    pub fn device_name(&self, index: usize) -> Result<Option<String>> {
        match self.devices.get(index) {
            Some(device) => self.driver.device_name(device).check("device_name").map(Some),
            None => Ok(None),
        }
    }

    // ── Programs ────────────────────────────────────────────────

    /// Read `path` and compile it. A file that cannot be read, or is not
    /// UTF-8, is [`ClampError::SourceUnreadable`]; a build failure is fatal.
    pub fn try_compile_from_file(&self, path: impl AsRef<Path>) -> Result<CompiledProgram<D>> {
        let path = path.as_ref();
        let unreadable = |source| ClampError::SourceUnreadable { path: path.to_path_buf(), source };
        let bytes = fs::read(path).map_err(unreadable)?;
        debug!(path = %path.display(), bytes = bytes.len(), "kernel source loaded");
        let source = String::from_utf8(bytes)
            .map_err(|e| unreadable(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        self.compile_from_source(&source)
    }

    /// Like [`try_compile_from_file`](Self::try_compile_from_file) but an
    /// unreadable file yields `Ok(None)`.
    pub fn compile_from_file(&self, path: impl AsRef<Path>) -> Result<Option<CompiledProgram<D>>> {
        self.try_compile_from_file(path).absent()
    }

    /// Compile `source` for every device in the context using the
    /// configured build options.
    pub fn compile_from_source(&self, source: &str) -> Result<CompiledProgram<D>> {
        let options = &self.config.build_options;
        match self.driver.build_program(&self.context, source, options) {
            Ok(raw) => {
                let log = self.driver.program_build_log(&raw).check("program_build_log")?;
                info!(options = %options, "program built");
                if self.config.log_build_success && !log.trim().is_empty() {
                    debug!(log = %log, "build log");
                }
                Ok(CompiledProgram::new(raw, log, Arc::clone(&self.driver)))
            }
            Err(BuildFailure { status, log }) => {
                let status =
                    if status.is_success() { StatusCode::BUILD_PROGRAM_FAILURE } else { status };
                error!(operation = "build_program", code = status.raw(), "program build failed");
                Err(ClampError::Build { status, log })
            }
        }
    }

    // ── Accessors ───────────────────────────────────────────────

    pub fn platform_vendor(&self) -> &str {
        &self.info.vendor
    }

    /// The shared context handle.
    pub fn context(&self) -> &D::Context {
        &self.context
    }

    pub fn raw_devices(&self) -> &[D::Device] {
        &self.devices
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

fn no_platform(status: StatusCode) -> ClampError {
    error!(operation = "get_platforms", code = status.raw(), "no compute platform");
    ClampError::NoPlatform { status }
}

impl<D: ComputeDriver> fmt::Debug for Runtime<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("driver", &self.driver.name())
            .field("vendor", &self.info.vendor)
            .field("devices", &self.devices.len())
            .finish()
    }
}
