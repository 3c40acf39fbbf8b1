//! Device catalog: every platform and its devices, grouped GPU, CPU, DEFAULT.

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::backend::{BackendStatus, ComputeBackend, DeviceClass, DeviceId, PlatformId};
use crate::error::{AccelError, Result};

/// One device as seen during enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceEntry {
    pub id: DeviceId,
    pub class: DeviceClass,
    pub name: String,
}

/// One platform and the devices it exposes, in class order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformEntry {
    pub id: PlatformId,
    pub vendor: String,
    pub devices: Vec<DeviceEntry>,
}

/// Snapshot of the platforms and devices visible to a backend.
///
/// Indices into `platforms` and into each platform's `devices` are the
/// selection coordinates used by `platform_idx` / `device_idx`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceCatalog {
    pub platforms: Vec<PlatformEntry>,
}

impl DeviceCatalog {
    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }

    pub fn platform_count(&self) -> usize {
        self.platforms.len()
    }

    pub fn device_count(&self) -> usize {
        self.platforms.iter().map(|p| p.devices.len()).sum()
    }

    pub fn platform(&self, idx: usize) -> Option<&PlatformEntry> {
        self.platforms.get(idx)
    }

    pub fn device(&self, platform_idx: usize, device_idx: usize) -> Option<&DeviceEntry> {
        self.platforms.get(platform_idx)?.devices.get(device_idx)
    }

    /// Index of the first platform that has at least one device.
    pub fn first_populated(&self) -> Option<usize> {
        self.platforms.iter().position(|p| !p.devices.is_empty())
    }

    /// Drop every entry.
    pub fn free(&mut self) {
        self.platforms.clear();
    }
}

/// Enumerate platforms and devices.
///
/// Only the platform list itself is fatal; a vendor, class or device name
/// that cannot be read is logged and skipped.
pub fn build_catalog(backend: &dyn ComputeBackend) -> Result<DeviceCatalog> {
    let platform_ids = backend.platform_ids().map_err(|status| {
        error!(backend = backend.name(), status = %status, "could not get platform IDs");
        AccelError::backend("clGetPlatformIDs", status)
    })?;
    debug!(count = platform_ids.len(), "platforms found");

    let mut platforms = Vec::with_capacity(platform_ids.len());
    for (p_idx, &platform_id) in platform_ids.iter().enumerate() {
        let vendor = backend.platform_vendor(platform_id).unwrap_or_else(|status| {
            warn!(platform = p_idx, status = %status, "could not get platform vendor");
            String::new()
        });

        let mut devices = Vec::new();
        for class in DeviceClass::ALL {
            let ids = match backend.device_ids(platform_id, class) {
                Ok(ids) => ids,
                Err(status) if status == BackendStatus::DEVICE_NOT_FOUND => {
                    debug!(platform = p_idx, class = %class, "no devices of class");
                    continue;
                }
                Err(status) => {
                    warn!(platform = p_idx, class = %class, status = %status, "could not get device IDs");
                    continue;
                }
            };
            for id in ids {
                match backend.device_name(id) {
                    Ok(name) => devices.push(DeviceEntry { id, class, name }),
                    Err(status) => {
                        warn!(platform = p_idx, device = %id, status = %status, "could not get device name");
                    }
                }
            }
        }

        debug!(platform = p_idx, vendor = %vendor, devices = devices.len(), "platform enumerated");
        platforms.push(PlatformEntry {
            id: platform_id,
            vendor,
            devices,
        });
    }

    Ok(DeviceCatalog { platforms })
}
