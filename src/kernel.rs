//! Named kernel handles resolved against the compiled programs.

use tracing::{debug, error, warn};

use crate::backend::{KernelId, ProgramId, QueueId};
use crate::env::AccelEnv;
use crate::error::{AccelError, Result};

/// Longest kernel name accepted, counting a trailing NUL.
pub const MAX_KERNEL_NAME_SIZE: usize = 150;

/// A kernel object bound to the shared command queue.
///
/// Bound handles count as outstanding and hold off environment teardown
/// until passed to [`AccelEnv::release_kernel`].
#[derive(Debug, Default)]
pub struct KernelHandle {
    name: String,
    kernel: Option<KernelId>,
    program: Option<ProgramId>,
    queue: Option<QueueId>,
}

impl KernelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_bound(&self) -> bool {
        self.kernel.is_some()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kernel(&self) -> Option<KernelId> {
        self.kernel
    }

    /// Program the name resolved in.
    pub fn program(&self) -> Option<ProgramId> {
        self.program
    }

    pub fn queue(&self) -> Option<QueueId> {
        self.queue
    }
}

impl Drop for KernelHandle {
    fn drop(&mut self) {
        if let Some(kernel) = self.kernel {
            warn!(kernel = %kernel, name = %self.name, "kernel handle dropped while bound");
        }
    }
}

impl AccelEnv {
    /// Bind `handle` to the first compiled program that defines `name`.
    ///
    /// Does nothing when the handle is already bound.
    pub fn create_kernel(&self, handle: &mut KernelHandle, name: &str) -> Result<()> {
        if handle.is_bound() {
            debug!(name = %handle.name, "kernel handle already bound");
            return Ok(());
        }

        let backend = self.backend();
        let mut inner = self.lock();

        if inner.registry.programs().is_empty() {
            error!(name, "no compiled program to create a kernel from");
            return Err(AccelError::InvalidConfiguration(
                "no compiled program, initialize first".to_string(),
            ));
        }
        if name.len() + 1 > MAX_KERNEL_NAME_SIZE {
            error!(len = name.len(), "kernel name too long");
            return Err(AccelError::InvalidArgument(format!(
                "kernel name must be shorter than {} bytes",
                MAX_KERNEL_NAME_SIZE
            )));
        }
        let limit = inner.options.max_kernels;
        if inner.active_kernels >= limit {
            error!(limit, "too many kernel handles");
            return Err(AccelError::CapacityExceeded { limit });
        }

        let mut resolved = None;
        for &program in inner.registry.programs() {
            match backend.create_kernel(program, name) {
                Ok(kernel) => {
                    resolved = Some((program, kernel));
                    break;
                }
                Err(status) => {
                    debug!(program = %program, name, status = %status, "kernel not in program");
                }
            }
        }
        let (program, kernel) = resolved.ok_or_else(|| {
            error!(name, "kernel not found in any compiled program");
            AccelError::NotFound {
                name: name.to_string(),
            }
        })?;

        handle.name = name.to_string();
        handle.kernel = Some(kernel);
        handle.program = Some(program);
        handle.queue = inner.queue();
        inner.active_kernels += 1;
        debug!(
            name,
            program = %program,
            active_kernels = inner.active_kernels,
            "kernel created"
        );
        Ok(())
    }

    /// Release a bound handle. A draining environment is torn down once
    /// its last handle is released.
    pub fn release_kernel(&self, handle: &mut KernelHandle) {
        let Some(kernel) = handle.kernel.take() else {
            return;
        };

        let backend = self.backend();
        let mut inner = self.lock();

        if let Err(status) = backend.release_kernel(kernel) {
            error!(kernel = %kernel, name = %handle.name, status = %status, "could not release kernel");
        }
        handle.name.clear();
        handle.program = None;
        handle.queue = None;
        match inner.active_kernels.checked_sub(1) {
            Some(left) => inner.active_kernels = left,
            None => warn!(
                kernel = %kernel,
                "kernel released with no active kernels; was it created by another environment?"
            ),
        }
        debug!(active_kernels = inner.active_kernels, "kernel released");

        self.teardown_if_drained(&mut inner);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::HostBackend;
    use crate::env::EnvState;

    const SRC: &str = "__kernel void blend(__global uchar *d) { d[0] = 1; }\n";

    fn ready() -> (Arc<HostBackend>, AccelEnv) {
        let backend = Arc::new(HostBackend::default());
        let env = AccelEnv::new(backend.clone());
        env.register_kernel_source(SRC).unwrap();
        env.initialize(None).unwrap();
        (backend, env)
    }

    #[test]
    fn test_requires_program() {
        let env = AccelEnv::new(Arc::new(HostBackend::default()));
        let mut handle = KernelHandle::new();
        assert!(matches!(
            env.create_kernel(&mut handle, "blend"),
            Err(AccelError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_name_length_limit() {
        let (_backend, env) = ready();
        let mut handle = KernelHandle::new();
        let long = "k".repeat(MAX_KERNEL_NAME_SIZE);
        assert!(matches!(
            env.create_kernel(&mut handle, &long),
            Err(AccelError::InvalidArgument(_))
        ));
        // 149 bytes plus the terminator fits, it is just not defined.
        let longest = "k".repeat(MAX_KERNEL_NAME_SIZE - 1);
        assert!(matches!(
            env.create_kernel(&mut handle, &longest),
            Err(AccelError::NotFound { .. })
        ));
        env.uninitialize();
    }

    #[test]
    fn test_bound_handle_is_noop() {
        let (backend, env) = ready();
        let mut handle = KernelHandle::new();
        env.create_kernel(&mut handle, "blend").unwrap();
        let kernel = handle.kernel();
        env.create_kernel(&mut handle, "blend").unwrap();
        assert_eq!(handle.kernel(), kernel);
        assert_eq!(env.active_kernel_count(), 1);
        assert_eq!(backend.live_kernels(), 1);

        env.release_kernel(&mut handle);
        assert!(!handle.is_bound());
        assert_eq!(env.active_kernel_count(), 0);
        // Releasing again is a no-op.
        env.release_kernel(&mut handle);
        assert_eq!(backend.release_log().kernels.len(), 1);
        env.uninitialize();
    }

    #[test]
    fn test_kernel_limit() {
        let (_backend, env) = ready();
        env.set_option("max_kernels", "1").unwrap();
        let mut first = KernelHandle::new();
        let mut second = KernelHandle::new();
        env.create_kernel(&mut first, "blend").unwrap();
        assert!(matches!(
            env.create_kernel(&mut second, "blend"),
            Err(AccelError::CapacityExceeded { limit: 1 })
        ));
        env.release_kernel(&mut first);
        env.uninitialize();
    }

    #[test]
    fn test_release_completes_deferred_teardown() {
        let (backend, env) = ready();
        let mut handle = KernelHandle::new();
        env.create_kernel(&mut handle, "blend").unwrap();

        env.uninitialize();
        assert_eq!(env.status(), EnvState::Draining);
        assert_eq!(backend.live_contexts(), 1);

        env.release_kernel(&mut handle);
        assert_eq!(env.status(), EnvState::Uninitialized);
        assert_eq!(backend.live_contexts(), 0);
        assert_eq!(backend.live_programs(), 0);
    }

    #[test]
    fn test_release_on_other_env_leaves_counts_alone() {
        let (backend, owner) = ready();
        let other = AccelEnv::new(backend.clone());
        let mut handle = KernelHandle::new();
        owner.create_kernel(&mut handle, "blend").unwrap();

        other.release_kernel(&mut handle);
        assert!(!handle.is_bound());
        assert_eq!(other.active_kernel_count(), 0);
        assert_eq!(other.status(), EnvState::Uninitialized);
        assert_eq!(owner.active_kernel_count(), 1);
        assert_eq!(backend.live_kernels(), 0);

        owner.uninitialize();
        assert_eq!(owner.status(), EnvState::Draining);
    }
}
