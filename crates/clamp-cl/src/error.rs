//! Error types and the status-check chokepoint.
//!
//! Failures split into two tiers. Fatal errors mean the device, driver or
//! kernel program is unusable; recoverable errors are caller mistakes the
//! runtime reports and then ignores. [`ClampError::severity`] is the only
//! place that partition is defined.

use std::path::PathBuf;

use thiserror::Error;
use tracing::error;

use crate::buffer::BufferId;
use crate::config::ConfigError;
use crate::driver::{DriverResult, StatusCode};

/// How the top-level policy treats an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Terminate: continuing would operate on broken device state.
    Fatal,
    /// Report and continue; the operation yields an absent value.
    Recoverable,
}

/// Errors produced by the runtime.
#[derive(Debug, Error)]
pub enum ClampError {
    #[error("no compute platform found ({status})")]
    NoPlatform { status: StatusCode },

    #[error("platform '{vendor}' exposes no {device_type} devices")]
    NoDevices { vendor: String, device_type: String },

    #[error("{operation} failed ({status})")]
    Driver { operation: &'static str, status: StatusCode },

    #[error("program build failed ({status})")]
    Build { status: StatusCode, log: String },

    #[error("could not read kernel source {}: {source}", path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("device index {index} out of range (device count {count})")]
    InvalidDeviceIndex { index: String, count: usize },

    #[error("kernel '{name}' not found in program ({status})")]
    KernelNotFound { name: String, status: StatusCode },

    #[error("buffer {buffer} is not owned by device {device}")]
    BufferNotOwned { buffer: BufferId, device: usize },

    #[error("buffer {buffer} was used after it was freed")]
    BufferReleased { buffer: BufferId },

    #[error("wait on device {device} before any dispatch")]
    NoDispatch { device: usize },

    #[error("host data is {actual} bytes but the buffer holds {expected} bytes")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ClampError {
    pub fn severity(&self) -> Severity {
        match self {
            Self::SourceUnreadable { .. }
            | Self::InvalidDeviceIndex { .. }
            | Self::KernelNotFound { .. }
            | Self::BufferNotOwned { .. } => Severity::Recoverable,
            Self::NoPlatform { .. }
            | Self::NoDevices { .. }
            | Self::Driver { .. }
            | Self::Build { .. }
            | Self::BufferReleased { .. }
            | Self::NoDispatch { .. }
            | Self::SizeMismatch { .. }
            | Self::LockPoisoned(_)
            | Self::Config(_) => Severity::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Operation label and driver status, when the error carries one.
    pub fn status(&self) -> Option<(&'static str, StatusCode)> {
        match self {
            Self::Driver { operation, status } => Some((*operation, *status)),
            Self::NoPlatform { status } => Some(("get_platforms", *status)),
            Self::Build { status, .. } => Some(("build_program", *status)),
            Self::KernelNotFound { status, .. } => Some(("create_kernel", *status)),
            _ => None,
        }
    }
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, ClampError>;

/// Convert a non-success driver status into a fatal error.
///
/// Logs the operation label and numeric code. Every driver call made by the
/// runtime funnels through here.
pub fn check_status(status: StatusCode, operation: &'static str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    Err(driver_error(status, operation))
}

/// Build the fatal error for a failed driver call and log it.
///
/// A driver that reports success through the error path is still treated as
/// a failure.
pub(crate) fn driver_error(status: StatusCode, operation: &'static str) -> ClampError {
    let status = if status.is_success() { StatusCode::OUT_OF_RESOURCES } else { status };
    error!(operation, code = status.raw(), "driver call failed: {status}");
    ClampError::Driver { operation, status }
}

/// Attach an operation label to a raw driver result.
pub(crate) trait CheckStatus<T> {
    fn check(self, operation: &'static str) -> Result<T>;
}

impl<T> CheckStatus<T> for DriverResult<T> {
    fn check(self, operation: &'static str) -> Result<T> {
        self.map_err(|status| driver_error(status, operation))
    }
}

pub(crate) fn poisoned<E: std::fmt::Display>(err: E) -> ClampError {
    ClampError::LockPoisoned(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_status_passes_success() {
        assert!(check_status(StatusCode::SUCCESS, "noop").is_ok());
    }

    #[test]
    fn check_status_carries_operation_and_code() {
        let err = check_status(StatusCode::OUT_OF_RESOURCES, "enqueue_kernel").unwrap_err();
        match err {
            ClampError::Driver { operation, status } => {
                assert_eq!(operation, "enqueue_kernel");
                assert_eq!(status.raw(), -5);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn check_extension_labels_driver_failure() {
        let raw: DriverResult<u8> = Err(StatusCode::INVALID_ARG_SIZE);
        let err = raw.check("set_kernel_arg").unwrap_err();
        assert_eq!(err.to_string(), "set_kernel_arg failed (-51 CL_INVALID_ARG_SIZE)");
        assert!(err.is_fatal());
    }

    #[test]
    fn check_extension_treats_misreported_success_as_failure() {
        let raw: DriverResult<u8> = Err(StatusCode::SUCCESS);
        assert!(raw.check("read_buffer").is_err());
    }

    #[test]
    fn recoverable_partition() {
        let recoverable = [
            ClampError::SourceUnreadable {
                path: "/nope".into(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            },
            ClampError::InvalidDeviceIndex { index: "-1".into(), count: 1 },
            ClampError::KernelNotFound {
                name: "k".into(),
                status: StatusCode::INVALID_KERNEL_NAME,
            },
            ClampError::BufferNotOwned { buffer: BufferId::new(0, 1), device: 1 },
        ];
        for err in &recoverable {
            assert_eq!(err.severity(), Severity::Recoverable, "{err}");
        }
    }

    #[test]
    fn fatal_partition() {
        let fatal = [
            ClampError::NoPlatform { status: StatusCode::PLATFORM_NOT_FOUND },
            ClampError::NoDevices { vendor: "v".into(), device_type: "gpu".into() },
            ClampError::Driver { operation: "create_queue", status: StatusCode::INVALID_DEVICE },
            ClampError::Build { status: StatusCode::BUILD_PROGRAM_FAILURE, log: String::new() },
            ClampError::BufferReleased { buffer: BufferId::new(0, 3) },
            ClampError::NoDispatch { device: 0 },
            ClampError::SizeMismatch { expected: 4, actual: 8 },
            ClampError::LockPoisoned("x".into()),
        ];
        for err in &fatal {
            assert!(err.is_fatal(), "{err}");
        }
    }

    #[test]
    fn status_accessor() {
        let err = ClampError::Build { status: StatusCode::BUILD_PROGRAM_FAILURE, log: "x".into() };
        assert_eq!(err.status(), Some(("build_program", StatusCode::BUILD_PROGRAM_FAILURE)));
        assert_eq!(ClampError::NoDispatch { device: 0 }.status(), None);
    }
}
