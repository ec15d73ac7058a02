//! Top-level error policy.
//!
//! Operations return [`Result`]; this module decides what happens next.
//! Recoverable errors become an absent value through [`Recover::absent`].
//! Fatal errors can be turned into process termination with
//! [`OrAbort::or_abort`] or [`exit_on_fatal`], which print the operation
//! label and status to stderr (and a failed build's log to stdout) first.

use std::io::Write;

use tracing::warn;

use crate::error::{ClampError, Result};

/// Exit code used when a fatal error terminates the process.
pub const FATAL_EXIT_CODE: i32 = 1;

/// Map recoverable errors to `Ok(None)`; fatal errors pass through.
pub trait Recover<T> {
    fn absent(self) -> Result<Option<T>>;
}

impl<T> Recover<T> for Result<T> {
    fn absent(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(err) if !err.is_fatal() => {
                warn!(error = %err, "recoverable failure; returning absent");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

/// Terminate the process on a fatal error.
pub trait OrAbort<T> {
    /// Returns the value, or a recoverable error unchanged. A fatal error
    /// never returns.
    fn or_abort(self) -> Result<T>;
}

impl<T> OrAbort<T> for Result<T> {
    fn or_abort(self) -> Result<T> {
        match self {
            Err(err) if err.is_fatal() => terminate(&err),
            other => other,
        }
    }
}

/// What the policy layer prints for a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalReport {
    /// Build log, for build failures.
    pub stdout: Option<String>,
    pub stderr: String,
}

pub fn fatal_report(err: &ClampError) -> FatalReport {
    let stderr = match err.status() {
        Some((operation, status)) => format!("ERROR: {operation} ({status})"),
        None => format!("ERROR: {err}"),
    };
    let stdout = match err {
        ClampError::Build { log, .. } => Some(log.clone()),
        _ => None,
    };
    FatalReport { stdout, stderr }
}

/// Print the fatal report and exit with [`FATAL_EXIT_CODE`].
pub fn terminate(err: &ClampError) -> ! {
    let report = fatal_report(err);
    if let Some(log) = &report.stdout {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(log.as_bytes());
        let _ = out.flush();
    }
    eprintln!("{}", report.stderr);
    std::process::exit(FATAL_EXIT_CODE)
}

/// Terminate if `err` is fatal; otherwise return.
pub fn exit_on_fatal(err: &ClampError) {
    if err.is_fatal() {
        terminate(err);
    }
}
