//! Runtime options and TOML configuration.
//!
//! [`Options`] is the in-memory option store read by `initialize`. The
//! TOML file wraps it together with the host backend topology, using a
//! layered lookup: explicit path, `ACCELENV_CONFIG`, the system location,
//! then compiled-in defaults.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::{host, HostBackend, HostPlatform};
use crate::error::{AccelError, Result};

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "ACCELENV_CONFIG";

/// System-wide config location.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/accelenv/accelenv.toml";

pub const DEFAULT_BUILD_OPTIONS: &str = "-I.";
pub const DEFAULT_MAX_KERNEL_SOURCES: usize = 200;
pub const DEFAULT_MAX_KERNELS: usize = 500;

/// Keys accepted by [`Options::set`] and [`Options::get`].
pub const OPTION_KEYS: [&str; 5] = [
    "platform_idx",
    "device_idx",
    "build_options",
    "max_kernel_sources",
    "max_kernels",
];

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Selection and build options. `-1` indices mean "pick automatically".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub platform_idx: i32,
    pub device_idx: i32,
    pub build_options: String,
    pub max_kernel_sources: usize,
    pub max_kernels: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            platform_idx: -1,
            device_idx: -1,
            build_options: DEFAULT_BUILD_OPTIONS.to_string(),
            max_kernel_sources: DEFAULT_MAX_KERNEL_SOURCES,
            max_kernels: DEFAULT_MAX_KERNELS,
        }
    }
}

impl Options {
    /// Set one option from its string form.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "platform_idx" => self.platform_idx = parse_index(key, value)?,
            "device_idx" => self.device_idx = parse_index(key, value)?,
            "build_options" => self.build_options = value.to_string(),
            "max_kernel_sources" => self.max_kernel_sources = parse_limit(key, value)?,
            "max_kernels" => self.max_kernels = parse_limit(key, value)?,
            _ => {
                return Err(AccelError::InvalidArgument(format!(
                    "unknown option '{}'",
                    key
                )))
            }
        }
        debug!(key, value, "option set");
        Ok(())
    }

    /// Current value of one option as a string.
    pub fn get(&self, key: &str) -> Result<String> {
        Ok(match key {
            "platform_idx" => self.platform_idx.to_string(),
            "device_idx" => self.device_idx.to_string(),
            "build_options" => self.build_options.clone(),
            "max_kernel_sources" => self.max_kernel_sources.to_string(),
            "max_kernels" => self.max_kernels.to_string(),
            _ => {
                return Err(AccelError::InvalidArgument(format!(
                    "unknown option '{}'",
                    key
                )))
            }
        })
    }

    /// Reject values a TOML file could carry but `set` never accepts.
    pub fn validate(&self) -> Result<()> {
        for (key, idx) in [("platform_idx", self.platform_idx), ("device_idx", self.device_idx)] {
            if idx < -1 {
                return Err(AccelError::InvalidArgument(format!(
                    "{} must be >= -1, got {}",
                    key, idx
                )));
            }
        }
        if self.max_kernel_sources == 0 || self.max_kernels == 0 {
            return Err(AccelError::InvalidArgument(
                "limits must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_index(key: &str, value: &str) -> Result<i32> {
    let idx: i32 = value.trim().parse().map_err(|_| {
        AccelError::InvalidArgument(format!("{} expects an integer, got '{}'", key, value))
    })?;
    if idx < -1 {
        return Err(AccelError::InvalidArgument(format!(
            "{} must be >= -1, got {}",
            key, idx
        )));
    }
    Ok(idx)
}

fn parse_limit(key: &str, value: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(AccelError::InvalidArgument(format!(
            "{} expects a positive integer, got '{}'",
            key, value
        ))),
    }
}

// ---------------------------------------------------------------------------
// Host topology
// ---------------------------------------------------------------------------

/// Topology of the reference backend used by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub platforms: Vec<HostPlatform>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            platforms: host::reference_topology(),
        }
    }
}

impl HostConfig {
    pub fn backend(&self) -> HostBackend {
        HostBackend::new(self.platforms.clone())
    }
}

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

/// Root of the TOML configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccelConfig {
    #[serde(default)]
    pub options: Options,
    #[serde(default)]
    pub host: HostConfig,
}

impl AccelConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .options
            .validate()
            .with_context(|| format!("invalid options in {}", path.display()))?;
        info!(path = %path.display(), platforms = config.host.platforms.len(), "loaded configuration");
        Ok(config)
    }

    /// Load from an explicit path, failing hard if it cannot be read;
    /// otherwise fall back to [`AccelConfig::load_or_default`].
    pub fn resolve(explicit: Option<&Path>) -> anyhow::Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => Ok(Self::load_or_default()),
        }
    }

    /// Try `ACCELENV_CONFIG`, then the system path, then defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "ACCELENV_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}
