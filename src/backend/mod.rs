//! Compute backend seam.
//!
//! The environment manager never talks to a native compute API directly; it
//! goes through [`ComputeBackend`]. Handles are opaque copyable ids so the
//! manager can store them without owning backend memory.

pub mod host;
pub mod status;

pub use host::{HostBackend, HostDevice, HostFault, HostPlatform, ReleaseLog};
pub use status::BackendStatus;

use std::fmt;
use std::ops::BitOr;
use std::ptr::NonNull;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! backend_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }
    };
}

backend_handle!(
    /// Platform identity as reported by the backend.
    PlatformId
);
backend_handle!(
    /// Device identity as reported by the backend.
    DeviceId
);
backend_handle!(
    /// Context handle.
    ContextId
);
backend_handle!(
    /// Command queue handle.
    QueueId
);
backend_handle!(
    /// Program handle.
    ProgramId
);
backend_handle!(
    /// Kernel object handle.
    KernelId
);
backend_handle!(
    /// Device memory object handle.
    MemId
);

/// Device classes queried during enumeration, in catalog order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Gpu,
    Cpu,
    Default,
}

impl DeviceClass {
    /// Enumeration order used when building a catalog.
    pub const ALL: [DeviceClass; 3] = [DeviceClass::Gpu, DeviceClass::Cpu, DeviceClass::Default];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Gpu => "GPU",
            Self::Cpu => "CPU",
            Self::Default => "DEFAULT",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for DeviceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gpu" => Ok(Self::Gpu),
            "cpu" => Ok(Self::Cpu),
            "default" => Ok(Self::Default),
            other => Err(format!("unknown device class '{}'", other)),
        }
    }
}

/// Memory object flags passed through to the backend at buffer creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemFlags(u32);

impl MemFlags {
    pub const READ_WRITE: Self = Self(1 << 0);
    pub const WRITE_ONLY: Self = Self(1 << 1);
    pub const READ_ONLY: Self = Self(1 << 2);
    pub const USE_HOST_PTR: Self = Self(1 << 3);
    pub const ALLOC_HOST_PTR: Self = Self(1 << 4);
    pub const COPY_HOST_PTR: Self = Self(1 << 5);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for MemFlags {
    fn default() -> Self {
        Self::READ_WRITE
    }
}

impl BitOr for MemFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Direction of a host mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapAccess {
    Read,
    Write,
}

/// A failed program build: the status plus the backend's build log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFailure {
    pub status: BackendStatus,
    pub log: String,
}

impl From<BackendStatus> for BuildFailure {
    fn from(status: BackendStatus) -> Self {
        Self {
            status,
            log: String::new(),
        }
    }
}

/// Native compute API as seen by the environment manager.
///
/// Every call is synchronous. `map_buffer` blocks until the mapping is
/// ready.
///
/// # Safety
///
/// The buffer layer turns the pointer returned by a successful
/// `map_buffer` into a byte slice. Implementors must guarantee that:
///
/// - the pointer is valid for reads of `len` bytes, and for writes of
///   `len` bytes when mapped with [`MapAccess::Write`], until the matching
///   `unmap_buffer` call;
/// - a write mapping is exclusive: while it is live, every other
///   `map_buffer` call on the same memory object fails;
/// - the memory is not released or moved while any mapping is live.
pub unsafe trait ComputeBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    fn platform_ids(&self) -> Result<Vec<PlatformId>, BackendStatus>;
    fn platform_vendor(&self, platform: PlatformId) -> Result<String, BackendStatus>;
    fn device_ids(
        &self,
        platform: PlatformId,
        class: DeviceClass,
    ) -> Result<Vec<DeviceId>, BackendStatus>;
    fn device_name(&self, device: DeviceId) -> Result<String, BackendStatus>;

    /// Create a context covering the devices of `class` on `platform`.
    fn create_context(
        &self,
        platform: PlatformId,
        class: DeviceClass,
    ) -> Result<ContextId, BackendStatus>;
    fn release_context(&self, context: ContextId) -> Result<(), BackendStatus>;

    fn create_queue(&self, context: ContextId, device: DeviceId)
        -> Result<QueueId, BackendStatus>;
    fn release_queue(&self, queue: QueueId) -> Result<(), BackendStatus>;

    fn create_program(&self, context: ContextId, source: &str) -> Result<ProgramId, BackendStatus>;
    fn build_program(
        &self,
        program: ProgramId,
        device: DeviceId,
        options: &str,
    ) -> Result<(), BuildFailure>;
    fn release_program(&self, program: ProgramId) -> Result<(), BackendStatus>;

    fn create_kernel(&self, program: ProgramId, name: &str) -> Result<KernelId, BackendStatus>;
    fn release_kernel(&self, kernel: KernelId) -> Result<(), BackendStatus>;

    fn create_buffer(
        &self,
        context: ContextId,
        flags: MemFlags,
        size: usize,
        host_data: Option<&[u8]>,
    ) -> Result<MemId, BackendStatus>;
    fn release_buffer(&self, mem: MemId) -> Result<(), BackendStatus>;

    fn map_buffer(
        &self,
        queue: QueueId,
        mem: MemId,
        access: MapAccess,
        offset: usize,
        len: usize,
    ) -> Result<NonNull<u8>, BackendStatus>;
    fn unmap_buffer(
        &self,
        queue: QueueId,
        mem: MemId,
        mapped: NonNull<u8>,
    ) -> Result<(), BackendStatus>;
}
