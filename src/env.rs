//! Shared compute environment.
//!
//! One [`AccelEnv`] owns at most one session (platform, device, context,
//! queue) plus the registry of kernel sources compiled against it. Clones
//! share everything. `initialize` and `uninitialize` are reference counted;
//! only the last balancing `uninitialize` tears the session down, and only
//! once no kernel handle is outstanding.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::{
    ComputeBackend, ContextId, DeviceClass, DeviceId, PlatformId, QueueId,
};
use crate::catalog::{build_catalog, DeviceCatalog};
use crate::config::Options;
use crate::error::{AccelError, Result};
use crate::registry::KernelRegistry;

/// Backend objects owned by the caller and lent to the environment.
///
/// The context and queue of an adopted environment are never released by
/// this crate. Programs it builds on them are, at teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalEnvironment {
    pub platform: PlatformId,
    pub device: DeviceId,
    pub class: DeviceClass,
    pub context: ContextId,
    pub queue: QueueId,
}

impl ExternalEnvironment {
    pub fn new(
        platform: PlatformId,
        device: DeviceId,
        class: DeviceClass,
        context: ContextId,
        queue: QueueId,
    ) -> Self {
        Self {
            platform,
            device,
            class,
            context,
            queue,
        }
    }
}

/// Lifecycle of the shared environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EnvState {
    Uninitialized,
    Ready,
    /// Reference count reached zero while kernel handles were outstanding.
    Draining,
}

/// The device the session runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectedDevice {
    /// Catalog coordinates; `None` for an adopted environment.
    pub platform_index: Option<usize>,
    pub device_index: Option<usize>,
    pub platform: PlatformId,
    pub device: DeviceId,
    pub class: DeviceClass,
    pub name: String,
    pub adopted: bool,
}

/// Handles a transfer needs, readable without the environment lock.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SessionHandles {
    pub context: ContextId,
    pub queue: QueueId,
}

enum Session {
    Managed {
        device: DeviceId,
        context: ContextId,
        queue: QueueId,
    },
    /// Caller-owned context and queue. Teardown never releases them, but
    /// programs this crate built on the adopted context are released.
    Adopted(ExternalEnvironment),
}

impl Session {
    fn handles(&self) -> SessionHandles {
        match self {
            Session::Managed { context, queue, .. } => SessionHandles {
                context: *context,
                queue: *queue,
            },
            Session::Adopted(ext) => SessionHandles {
                context: ext.context,
                queue: ext.queue,
            },
        }
    }

    fn device(&self) -> DeviceId {
        match self {
            Session::Managed { device, .. } => *device,
            Session::Adopted(ext) => ext.device,
        }
    }
}

/// Everything guarded by the environment lock.
pub(crate) struct EnvInner {
    pub(crate) options: Options,
    pub(crate) registry: KernelRegistry,
    pub(crate) reference_count: usize,
    pub(crate) active_kernels: usize,
    pub(crate) state: EnvState,
    session: Option<Session>,
    selected: Option<SelectedDevice>,
    catalog: Option<DeviceCatalog>,
    session_id: Option<Uuid>,
}

impl EnvInner {
    fn new(options: Options) -> Self {
        Self {
            options,
            registry: KernelRegistry::new(),
            reference_count: 0,
            active_kernels: 0,
            state: EnvState::Uninitialized,
            session: None,
            selected: None,
            catalog: None,
            session_id: None,
        }
    }

    pub(crate) fn queue(&self) -> Option<QueueId> {
        self.session.as_ref().map(|s| s.handles().queue)
    }
}

struct Shared {
    backend: Arc<dyn ComputeBackend>,
    inner: Mutex<EnvInner>,
    handles: RwLock<Option<SessionHandles>>,
}

/// Handle to a shared compute environment.
#[derive(Clone)]
pub struct AccelEnv {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for AccelEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccelEnv")
            .field("backend", &self.shared.backend.name())
            .field("status", &self.status())
            .finish()
    }
}

impl AccelEnv {
    pub fn new(backend: Arc<dyn ComputeBackend>) -> Self {
        Self::with_options(backend, Options::default())
    }

    pub fn with_options(backend: Arc<dyn ComputeBackend>, options: Options) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                inner: Mutex::new(EnvInner::new(options)),
                handles: RwLock::new(None),
            }),
        }
    }

    pub fn backend(&self) -> &dyn ComputeBackend {
        self.shared.backend.as_ref()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, EnvInner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn session_handles(&self) -> Option<SessionHandles> {
        *self
            .shared
            .handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_handles(&self, handles: Option<SessionHandles>) {
        *self
            .shared
            .handles
            .write()
            .unwrap_or_else(PoisonError::into_inner) = handles;
    }

    // -----------------------------------------------------------------------
    // Discovery and options
    // -----------------------------------------------------------------------

    /// A fresh snapshot of every platform and device.
    pub fn get_device_list(&self) -> Result<DeviceCatalog> {
        build_catalog(self.backend())
    }

    pub fn set_option(&self, key: &str, value: &str) -> Result<()> {
        self.lock().options.set(key, value)
    }

    pub fn get_option(&self, key: &str) -> Result<String> {
        self.lock().options.get(key)
    }

    /// Restore every option to its default.
    pub fn reset_options(&self) {
        self.lock().options = Options::default();
    }

    pub fn options(&self) -> Options {
        self.lock().options.clone()
    }

    /// Register OpenCL C source text for compilation at the next
    /// `initialize`. Identical text is registered once.
    pub fn register_kernel_source(&self, source: &str) -> Result<()> {
        let mut inner = self.lock();
        let limit = inner.options.max_kernel_sources;
        inner.registry.register(source, limit).map(|_| ())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Open (or join) the shared session and compile pending sources.
    ///
    /// `external` is adopted only when no session exists yet.
    pub fn initialize(&self, external: Option<&ExternalEnvironment>) -> Result<()> {
        let backend = self.backend();
        let mut inner = self.lock();

        let fresh = if inner.session.is_none() {
            Some(match external {
                Some(ext) => adopt(backend, ext),
                None => open_session(backend, &inner.options)?,
            })
        } else {
            if external.is_some() {
                warn!("session already exists, ignoring external environment");
            }
            None
        };

        let (session, device) = match (&fresh, &inner.session) {
            (Some(opened), _) => (opened.session.handles(), opened.session.device()),
            (None, Some(existing)) => (existing.handles(), existing.device()),
            (None, None) => {
                return Err(AccelError::InvalidConfiguration(
                    "no session available".to_string(),
                ))
            }
        };

        let build_options = inner.options.build_options.clone();
        let compiled = if inner.registry.source_count() == 0 {
            error!("no kernel source registered");
            Err(AccelError::InvalidConfiguration(
                "no kernel source registered".to_string(),
            ))
        } else {
            inner
                .registry
                .compile_pending(backend, session.context, device, &build_options)
                .map(|_| ())
        };

        if let Err(e) = compiled {
            if let Some(opened) = fresh {
                close_session(backend, opened.session);
            }
            return Err(e);
        }

        if let Some(opened) = fresh {
            let id = Uuid::new_v4();
            info!(
                session = %id,
                backend = backend.name(),
                device = %opened.selected.name,
                class = %opened.selected.class,
                adopted = opened.selected.adopted,
                "compute session opened"
            );
            inner.session = Some(opened.session);
            inner.selected = Some(opened.selected);
            inner.catalog = opened.catalog;
            inner.session_id = Some(id);
            self.publish_handles(Some(session));
        }

        inner.reference_count += 1;
        inner.state = EnvState::Ready;
        debug!(
            reference_count = inner.reference_count,
            programs = inner.registry.programs().len(),
            "initialize complete"
        );
        Ok(())
    }

    /// Drop one reference. The last one tears the session down unless
    /// kernel handles are still outstanding.
    pub fn uninitialize(&self) {
        let mut inner = self.lock();

        if inner.reference_count == 0 {
            if inner.state == EnvState::Draining && inner.active_kernels == 0 {
                self.teardown(&mut inner);
            } else {
                warn!(
                    state = ?inner.state,
                    "uninitialize called more times than initialize"
                );
            }
            return;
        }

        inner.reference_count -= 1;
        if inner.reference_count > 0 {
            debug!(reference_count = inner.reference_count, "environment still referenced");
            return;
        }

        if inner.active_kernels > 0 {
            info!(
                active_kernels = inner.active_kernels,
                "kernel handles outstanding, deferring teardown"
            );
            inner.state = EnvState::Draining;
            return;
        }

        self.teardown(&mut inner);
    }

    /// Finish a deferred teardown once the last kernel handle is gone.
    pub(crate) fn teardown_if_drained(&self, inner: &mut EnvInner) {
        if inner.state == EnvState::Draining
            && inner.reference_count == 0
            && inner.active_kernels == 0
        {
            self.teardown(inner);
        }
    }

    fn teardown(&self, inner: &mut EnvInner) {
        let backend = self.backend();
        self.publish_handles(None);

        inner.registry.release_programs(backend);
        if let Some(session) = inner.session.take() {
            close_session(backend, session);
        }
        inner.catalog = None;
        inner.selected = None;
        inner.state = EnvState::Uninitialized;
        match inner.session_id.take() {
            Some(id) => info!(session = %id, "compute session closed"),
            None => info!("compute session closed"),
        }
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn status(&self) -> EnvState {
        self.lock().state
    }

    pub fn reference_count(&self) -> usize {
        self.lock().reference_count
    }

    pub fn active_kernel_count(&self) -> usize {
        self.lock().active_kernels
    }

    pub fn program_count(&self) -> usize {
        self.lock().registry.programs().len()
    }

    pub fn source_count(&self) -> usize {
        self.lock().registry.source_count()
    }

    pub fn selected_device(&self) -> Option<SelectedDevice> {
        self.lock().selected.clone()
    }

    /// Catalog the session was selected from; `None` when adopted or idle.
    pub fn session_catalog(&self) -> Option<DeviceCatalog> {
        self.lock().catalog.clone()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.lock().session_id
    }
}

/// A session created by this `initialize` call, not yet committed.
struct Opened {
    session: Session,
    selected: SelectedDevice,
    catalog: Option<DeviceCatalog>,
}

fn adopt(backend: &dyn ComputeBackend, ext: &ExternalEnvironment) -> Opened {
    info!(context = %ext.context, queue = %ext.queue, "adopting external environment");
    let name = backend.device_name(ext.device).unwrap_or_else(|status| {
        warn!(device = %ext.device, status = %status, "could not get adopted device name");
        String::new()
    });
    Opened {
        selected: SelectedDevice {
            platform_index: None,
            device_index: None,
            platform: ext.platform,
            device: ext.device,
            class: ext.class,
            name,
            adopted: true,
        },
        session: Session::Adopted(ext.clone()),
        catalog: None,
    }
}

/// Pick `(platform, device)` catalog indices from the options.
fn select(catalog: &DeviceCatalog, options: &Options) -> Result<(usize, usize)> {
    let platform_idx = if options.platform_idx >= 0 {
        let idx = options.platform_idx as usize;
        let platform = catalog.platform(idx).ok_or_else(|| {
            error!(platform = idx, available = catalog.platform_count(), "platform index does not exist");
            AccelError::InvalidConfiguration(format!("platform index {} does not exist", idx))
        })?;
        if platform.devices.is_empty() {
            error!(platform = idx, "no devices on requested platform");
            return Err(AccelError::InvalidConfiguration(format!(
                "platform {} has no devices",
                idx
            )));
        }
        idx
    } else {
        catalog.first_populated().ok_or_else(|| {
            error!("no platform with a usable device");
            AccelError::InvalidConfiguration("no platform with a usable device".to_string())
        })?
    };

    let device_count = catalog.platforms[platform_idx].devices.len();
    let device_idx = if options.device_idx >= 0 {
        let idx = options.device_idx as usize;
        if idx >= device_count {
            error!(platform = platform_idx, device = idx, available = device_count, "device index does not exist");
            return Err(AccelError::InvalidConfiguration(format!(
                "device index {} does not exist on platform {}",
                idx, platform_idx
            )));
        }
        idx
    } else {
        0
    };

    Ok((platform_idx, device_idx))
}

fn open_session(backend: &dyn ComputeBackend, options: &Options) -> Result<Opened> {
    // Re-enumerated on every session open. Never cached across sessions.
    let catalog = build_catalog(backend)?;
    let (p_idx, d_idx) = select(&catalog, options)?;
    let platform = &catalog.platforms[p_idx];
    let entry = &platform.devices[d_idx];
    debug!(
        platform = p_idx,
        vendor = %platform.vendor,
        device = d_idx,
        name = %entry.name,
        "device selected"
    );

    let context = backend
        .create_context(platform.id, entry.class)
        .map_err(|status| {
            error!(status = %status, "could not create context");
            AccelError::backend("clCreateContextFromType", status)
        })?;

    let queue = match backend.create_queue(context, entry.id) {
        Ok(queue) => queue,
        Err(status) => {
            error!(status = %status, "could not create command queue");
            if let Err(release) = backend.release_context(context) {
                error!(context = %context, status = %release, "could not release context");
            }
            return Err(AccelError::backend("clCreateCommandQueue", status));
        }
    };

    let selected = SelectedDevice {
        platform_index: Some(p_idx),
        device_index: Some(d_idx),
        platform: platform.id,
        device: entry.id,
        class: entry.class,
        name: entry.name.clone(),
        adopted: false,
    };
    Ok(Opened {
        session: Session::Managed {
            device: entry.id,
            context,
            queue,
        },
        selected,
        catalog: Some(catalog),
    })
}

/// Release what the session owns. Adopted objects belong to the caller.
fn close_session(backend: &dyn ComputeBackend, session: Session) {
    match session {
        Session::Managed { context, queue, .. } => {
            if let Err(status) = backend.release_queue(queue) {
                error!(queue = %queue, status = %status, "could not release command queue");
            }
            if let Err(status) = backend.release_context(context) {
                error!(context = %context, status = %status, "could not release context");
            }
        }
        Session::Adopted(ext) => {
            debug!(context = %ext.context, queue = %ext.queue, "leaving adopted context and queue to caller");
        }
    }
}
