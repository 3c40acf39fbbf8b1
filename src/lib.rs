//! accelenv -- shared compute accelerator environment for media filters.
//!
//! This crate provides device discovery, a reference-counted compute
//! session shared by many independent callers, a registry of kernel
//! sources compiled on demand, named kernel handles, and mapped buffer
//! transfers, all behind a pluggable [`backend::ComputeBackend`].

pub mod backend;
pub mod buffer;
pub mod catalog;
pub mod config;
pub mod env;
pub mod error;
pub mod kernel;
pub mod registry;
pub mod selftest;

use std::sync::Arc;

pub use backend::{BackendStatus, ComputeBackend, DeviceClass, MemFlags};
pub use buffer::{DeviceBuffer, MAX_IMAGE_PLANES};
pub use catalog::{DeviceCatalog, DeviceEntry, PlatformEntry};
pub use config::{AccelConfig, Options};
pub use env::{AccelEnv, EnvState, ExternalEnvironment, SelectedDevice};
pub use error::{AccelError, Result};
pub use kernel::{KernelHandle, MAX_KERNEL_NAME_SIZE};

/// Build an environment on the host reference backend described by `config`.
pub fn host_env(config: &AccelConfig) -> AccelEnv {
    tracing::debug!(platforms = config.host.platforms.len(), "using host reference backend");
    AccelEnv::with_options(Arc::new(config.host.backend()), config.options.clone())
}
