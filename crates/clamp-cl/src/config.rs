//! Runtime settings: built-in defaults, an optional `[clamp]` TOML table and
//! `CLAMP_*` environment overrides, applied in that order.

use std::io;
use std::path::{Path, PathBuf};
use std::{env, fs};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::driver::DeviceType;

/// Build option applied to every program unless overridden.
pub const DEFAULT_BUILD_OPTIONS: &str = "-cl-fast-relaxed-math";

const ENV_BUILD_OPTIONS: &str = "CLAMP_BUILD_OPTIONS";
const ENV_DEVICE_TYPE: &str = "CLAMP_DEVICE_TYPE";
const ENV_LOG_BUILD_SUCCESS: &str = "CLAMP_LOG_BUILD_SUCCESS";

/// Why a configuration could not be produced.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("build options rejected: {0}")]
    BuildOptions(&'static str),

    #[error("{key}={value:?} is not a valid setting")]
    Env { key: &'static str, value: String },
}

/// Layout of a config file; only the `[clamp]` table is read.
#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    clamp: RuntimeConfig,
}

/// Settings a [`Runtime`](crate::Runtime) is constructed with.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Options passed to every program build.
    pub build_options: String,
    /// Device class the shared context is scoped to.
    pub device_type: DeviceType,
    /// Log the build log at debug level even when a build succeeds.
    pub log_build_success: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            build_options: DEFAULT_BUILD_OPTIONS.to_string(),
            device_type: DeviceType::Gpu,
            log_build_success: false,
        }
    }
}

impl RuntimeConfig {
    /// Read the `[clamp]` table of the TOML file at `path`. A missing file
    /// gives the defaults.
    pub fn from_toml(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "config file not found; using defaults");
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Read { path: path.to_path_buf(), source }),
        };
        let file: ConfigFile = toml::from_str(&text)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        Ok(file.clamp)
    }

    /// Defaults with `CLAMP_*` environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.apply_env()?;
        Ok(cfg)
    }

    /// File (when given), then environment, then [`validate`](Self::validate).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(path) => Self::from_toml(path)?,
            None => Self::default(),
        };
        cfg.apply_env()?;
        cfg.validate()?;
        debug!(options = %cfg.build_options, device_type = %cfg.device_type, "runtime config loaded");
        Ok(cfg)
    }

    /// Overwrite each field whose `CLAMP_*` variable is set.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = env::var(ENV_BUILD_OPTIONS) {
            self.build_options = v;
        }
        if let Ok(v) = env::var(ENV_DEVICE_TYPE) {
            self.device_type =
                v.parse().map_err(|_| ConfigError::Env { key: ENV_DEVICE_TYPE, value: v.clone() })?;
        }
        if let Ok(v) = env::var(ENV_LOG_BUILD_SUCCESS) {
            self.log_build_success = flag(ENV_LOG_BUILD_SUCCESS, v)?;
        }
        Ok(())
    }

    /// Reject option strings no driver would accept.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.build_options.contains('\0') {
            return Err(ConfigError::BuildOptions("must not contain NUL"));
        }
        if self.build_options.contains(['\n', '\r']) {
            return Err(ConfigError::BuildOptions("must be a single line"));
        }
        Ok(())
    }
}

fn flag(key: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Env { key, value }),
    }
}
