//! Kernel source registry and batched compiler.
//!
//! Sources accumulate for the life of an environment. Everything registered
//! since the last successful build is concatenated into one program at the
//! next `initialize`.

use tracing::{debug, error, info};

use crate::backend::{ComputeBackend, ContextId, DeviceId, ProgramId};
use crate::error::{AccelError, Result};

#[derive(Debug, Clone)]
struct KernelSource {
    text: String,
    is_compiled: bool,
}

/// Registered sources plus the programs built from them, in order.
#[derive(Debug, Default)]
pub struct KernelRegistry {
    sources: Vec<KernelSource>,
    programs: Vec<ProgramId>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `text` unless an identical source is already registered.
    ///
    /// Returns `false` for a duplicate.
    pub fn register(&mut self, text: &str, max_sources: usize) -> Result<bool> {
        if self.sources.iter().any(|s| s.text == text) {
            info!(len = text.len(), "kernel source already registered");
            return Ok(false);
        }
        if self.sources.len() >= max_sources {
            error!(limit = max_sources, "cannot register more kernel sources");
            return Err(AccelError::CapacityExceeded { limit: max_sources });
        }
        self.sources.push(KernelSource {
            text: text.to_string(),
            is_compiled: false,
        });
        debug!(index = self.sources.len() - 1, "kernel source registered");
        Ok(true)
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn pending_count(&self) -> usize {
        self.sources.iter().filter(|s| !s.is_compiled).count()
    }

    pub fn programs(&self) -> &[ProgramId] {
        &self.programs
    }

    /// Build every pending source into one new program.
    ///
    /// Returns `None` when nothing was pending. On failure the pending
    /// sources stay pending and no program is kept.
    pub fn compile_pending(
        &mut self,
        backend: &dyn ComputeBackend,
        context: ContextId,
        device: DeviceId,
        build_options: &str,
    ) -> Result<Option<ProgramId>> {
        let pending: Vec<usize> = self
            .sources
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.is_compiled)
            .map(|(i, _)| i)
            .collect();
        if pending.is_empty() {
            return Ok(None);
        }

        let combined: String = pending
            .iter()
            .map(|&i| self.sources[i].text.as_str())
            .collect();

        let program = backend.create_program(context, &combined).map_err(|status| {
            error!(status = %status, "could not create program from kernel sources");
            AccelError::backend("clCreateProgramWithSource", status)
        })?;

        if let Err(failure) = backend.build_program(program, device, build_options) {
            error!(
                status = %failure.status,
                options = build_options,
                "program build failed"
            );
            if !failure.log.is_empty() {
                error!("build log:\n{}", failure.log);
            }
            if let Err(status) = backend.release_program(program) {
                error!(program = %program, status = %status, "could not release failed program");
            }
            return Err(AccelError::Compilation {
                status: failure.status,
                log: failure.log,
            });
        }

        for i in pending.iter().copied() {
            self.sources[i].is_compiled = true;
        }
        self.programs.push(program);
        info!(
            program = %program,
            sources = pending.len(),
            total_programs = self.programs.len(),
            "kernel sources compiled"
        );
        Ok(Some(program))
    }

    /// Release every program and mark all sources pending again.
    ///
    /// Failures are logged; the program list is emptied regardless.
    pub fn release_programs(&mut self, backend: &dyn ComputeBackend) {
        for program in self.programs.drain(..) {
            if let Err(status) = backend.release_program(program) {
                error!(program = %program, status = %status, "could not release program");
            }
        }
        for source in &mut self.sources {
            source.is_compiled = false;
        }
    }
}
