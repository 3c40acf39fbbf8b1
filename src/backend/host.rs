//! In-process reference backend.
//!
//! Buffers live in host memory and programs are "compiled" by extracting
//! `__kernel void name(...)` entry points from OpenCL C text. Every object
//! carries release accounting, and individual calls can be made to fail,
//! so the environment manager can be exercised without a GPU.

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    BackendStatus, BuildFailure, ComputeBackend, ContextId, DeviceClass, DeviceId, KernelId,
    MapAccess, MemFlags, MemId, PlatformId, ProgramId, QueueId,
};

/// A simulated device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostDevice {
    pub name: String,
    pub class: DeviceClass,
}

/// A simulated platform with its devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostPlatform {
    pub vendor: String,
    #[serde(default)]
    pub devices: Vec<HostDevice>,
}

impl HostPlatform {
    pub fn new(vendor: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
            devices: Vec::new(),
        }
    }

    pub fn with_device(mut self, name: impl Into<String>, class: DeviceClass) -> Self {
        self.devices.push(HostDevice {
            name: name.into(),
            class,
        });
        self
    }
}

/// Backend calls that can be forced to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostFault {
    PlatformIds,
    PlatformVendor,
    DeviceIds,
    DeviceName,
    CreateContext,
    CreateQueue,
    CreateProgram,
    CreateBuffer,
    Map,
    Unmap,
    ReleaseKernel,
    ReleaseBuffer,
    ReleaseProgram,
    ReleaseQueue,
    ReleaseContext,
}

/// Every object the backend was asked to release, in call order.
///
/// Failed releases are recorded too: the caller asked, the backend refused.
#[derive(Debug, Clone, Default)]
pub struct ReleaseLog {
    pub contexts: Vec<ContextId>,
    pub queues: Vec<QueueId>,
    pub programs: Vec<ProgramId>,
    pub kernels: Vec<KernelId>,
    pub buffers: Vec<MemId>,
}

struct ContextRec {
    #[allow(dead_code)]
    platform: PlatformId,
    class: DeviceClass,
}

struct ProgramRec {
    source: String,
    entry_points: Vec<String>,
    built: bool,
}

struct BufferRec {
    data: Vec<u8>,
    /// Live mappings as (address, access).
    maps: Vec<(usize, MapAccess)>,
}

#[derive(Default)]
struct HostState {
    next_id: u64,
    contexts: HashMap<ContextId, ContextRec>,
    queues: HashMap<QueueId, DeviceId>,
    programs: HashMap<ProgramId, ProgramRec>,
    kernels: HashMap<KernelId, (ProgramId, String)>,
    buffers: HashMap<MemId, BufferRec>,
    faults: HashMap<HostFault, Option<BackendStatus>>,
    released: ReleaseLog,
    builds: usize,
}

impl HostState {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        0x1000 + self.next_id
    }

    fn check(&self, fault: HostFault, status: BackendStatus) -> Result<(), BackendStatus> {
        match self.faults.get(&fault) {
            Some(injected) => Err(injected.unwrap_or(status)),
            None => Ok(()),
        }
    }
}

/// Reference backend backed by host memory.
pub struct HostBackend {
    platforms: Vec<HostPlatform>,
    state: Mutex<HostState>,
}

/// One platform with a GPU and a CPU device.
pub fn reference_topology() -> Vec<HostPlatform> {
    vec![HostPlatform::new("accelenv reference")
        .with_device("Reference GPU", DeviceClass::Gpu)
        .with_device("Reference CPU", DeviceClass::Cpu)]
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new(reference_topology())
    }
}

impl HostBackend {
    pub fn new(platforms: Vec<HostPlatform>) -> Self {
        Self {
            platforms,
            state: Mutex::new(HostState::default()),
        }
    }

    pub fn platforms(&self) -> &[HostPlatform] {
        &self.platforms
    }

    /// Make every subsequent call of `fault`'s kind fail.
    pub fn inject_fault(&self, fault: HostFault) {
        self.state().faults.insert(fault, None);
    }

    /// Like [`HostBackend::inject_fault`], failing with `status`.
    pub fn inject_fault_status(&self, fault: HostFault, status: BackendStatus) {
        self.state().faults.insert(fault, Some(status));
    }

    pub fn clear_fault(&self, fault: HostFault) {
        self.state().faults.remove(&fault);
    }

    pub fn clear_faults(&self) {
        self.state().faults.clear();
    }

    /// Snapshot of everything released so far.
    pub fn release_log(&self) -> ReleaseLog {
        self.state().released.clone()
    }

    /// Number of `build_program` calls, successful or not.
    pub fn build_count(&self) -> usize {
        self.state().builds
    }

    pub fn live_contexts(&self) -> usize {
        self.state().contexts.len()
    }

    pub fn live_queues(&self) -> usize {
        self.state().queues.len()
    }

    pub fn live_programs(&self) -> usize {
        self.state().programs.len()
    }

    pub fn live_kernels(&self) -> usize {
        self.state().kernels.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.state().buffers.len()
    }

    /// Source text a program was created from.
    pub fn program_source(&self, program: ProgramId) -> Option<String> {
        self.state().programs.get(&program).map(|p| p.source.clone())
    }

    /// Program a kernel object was created from.
    pub fn kernel_program(&self, kernel: KernelId) -> Option<ProgramId> {
        self.state().kernels.get(&kernel).map(|(p, _)| *p)
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn platform_index(&self, platform: PlatformId) -> Option<usize> {
        let idx = platform.0.checked_sub(1)? as usize;
        (idx < self.platforms.len()).then_some(idx)
    }

    fn device(&self, device: DeviceId) -> Option<&HostDevice> {
        let p = (device.0 >> 32).checked_sub(1)? as usize;
        let d = (device.0 & 0xffff_ffff).checked_sub(1)? as usize;
        self.platforms.get(p)?.devices.get(d)
    }
}

fn device_id(platform: usize, device: usize) -> DeviceId {
    DeviceId(((platform as u64 + 1) << 32) | (device as u64 + 1))
}

/// Entry points declared as `__kernel void name(` or `kernel void name(`.
pub fn kernel_entry_points(source: &str) -> Vec<String> {
    let tokens: Vec<&str> = source
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .collect();

    let mut names = Vec::new();
    for window in tokens.windows(3) {
        if (window[0] == "__kernel" || window[0] == "kernel") && window[1] == "void" {
            names.push(window[2].to_string());
        }
    }
    names
}

fn check_source(source: &str) -> Result<(), String> {
    let mut log = Vec::new();
    for (n, line) in source.lines().enumerate() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("#error") {
            log.push(format!("<source>:{}: error: {}", n + 1, rest.trim()));
        }
    }

    let mut depth: i64 = 0;
    for c in source.chars() {
        match c {
            '{' => depth += 1,
            '}' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            break;
        }
    }
    if depth != 0 {
        log.push("<source>: error: unbalanced braces".to_string());
    }

    if log.is_empty() {
        Ok(())
    } else {
        Err(log.join("\n"))
    }
}

// SAFETY: buffer storage is a vector that is never reallocated and
// cannot be released while `maps` is non-empty. `map_buffer` bounds-checks
// the range and refuses a write mapping alongside any other mapping.
unsafe impl ComputeBackend for HostBackend {
    fn name(&self) -> &str {
        "host"
    }

    fn platform_ids(&self) -> Result<Vec<PlatformId>, BackendStatus> {
        self.state()
            .check(HostFault::PlatformIds, BackendStatus::OUT_OF_RESOURCES)?;
        Ok((0..self.platforms.len())
            .map(|i| PlatformId(i as u64 + 1))
            .collect())
    }

    fn platform_vendor(&self, platform: PlatformId) -> Result<String, BackendStatus> {
        self.state()
            .check(HostFault::PlatformVendor, BackendStatus::OUT_OF_RESOURCES)?;
        let idx = self
            .platform_index(platform)
            .ok_or(BackendStatus::INVALID_PLATFORM)?;
        Ok(self.platforms[idx].vendor.clone())
    }

    fn device_ids(
        &self,
        platform: PlatformId,
        class: DeviceClass,
    ) -> Result<Vec<DeviceId>, BackendStatus> {
        self.state()
            .check(HostFault::DeviceIds, BackendStatus::OUT_OF_RESOURCES)?;
        let p = self
            .platform_index(platform)
            .ok_or(BackendStatus::INVALID_PLATFORM)?;
        let ids: Vec<DeviceId> = self.platforms[p]
            .devices
            .iter()
            .enumerate()
            .filter(|(_, d)| d.class == class)
            .map(|(d, _)| device_id(p, d))
            .collect();
        if ids.is_empty() {
            return Err(BackendStatus::DEVICE_NOT_FOUND);
        }
        Ok(ids)
    }

    fn device_name(&self, device: DeviceId) -> Result<String, BackendStatus> {
        self.state()
            .check(HostFault::DeviceName, BackendStatus::OUT_OF_RESOURCES)?;
        self.device(device)
            .map(|d| d.name.clone())
            .ok_or(BackendStatus::INVALID_DEVICE)
    }

    fn create_context(
        &self,
        platform: PlatformId,
        class: DeviceClass,
    ) -> Result<ContextId, BackendStatus> {
        let p = self
            .platform_index(platform)
            .ok_or(BackendStatus::INVALID_PLATFORM)?;
        if !self.platforms[p].devices.iter().any(|d| d.class == class) {
            return Err(BackendStatus::DEVICE_NOT_FOUND);
        }

        let mut state = self.state();
        state.check(HostFault::CreateContext, BackendStatus::OUT_OF_RESOURCES)?;
        let id = ContextId(state.next());
        state.contexts.insert(id, ContextRec { platform, class });
        debug!(context = %id, platform = %platform, "host context created");
        Ok(id)
    }

    fn release_context(&self, context: ContextId) -> Result<(), BackendStatus> {
        let mut state = self.state();
        state.released.contexts.push(context);
        state.check(HostFault::ReleaseContext, BackendStatus::INVALID_CONTEXT)?;
        state
            .contexts
            .remove(&context)
            .map(|_| ())
            .ok_or(BackendStatus::INVALID_CONTEXT)
    }

    fn create_queue(
        &self,
        context: ContextId,
        device: DeviceId,
    ) -> Result<QueueId, BackendStatus> {
        let class = self
            .device(device)
            .map(|d| d.class)
            .ok_or(BackendStatus::INVALID_DEVICE)?;

        let mut state = self.state();
        state.check(HostFault::CreateQueue, BackendStatus::OUT_OF_RESOURCES)?;
        let ctx = state
            .contexts
            .get(&context)
            .ok_or(BackendStatus::INVALID_CONTEXT)?;
        if ctx.class != class {
            return Err(BackendStatus::INVALID_DEVICE);
        }
        let id = QueueId(state.next());
        state.queues.insert(id, device);
        Ok(id)
    }

    fn release_queue(&self, queue: QueueId) -> Result<(), BackendStatus> {
        let mut state = self.state();
        state.released.queues.push(queue);
        state.check(HostFault::ReleaseQueue, BackendStatus::INVALID_COMMAND_QUEUE)?;
        state
            .queues
            .remove(&queue)
            .map(|_| ())
            .ok_or(BackendStatus::INVALID_COMMAND_QUEUE)
    }

    fn create_program(&self, context: ContextId, source: &str) -> Result<ProgramId, BackendStatus> {
        let mut state = self.state();
        state.check(HostFault::CreateProgram, BackendStatus::OUT_OF_HOST_MEMORY)?;
        if !state.contexts.contains_key(&context) {
            return Err(BackendStatus::INVALID_CONTEXT);
        }
        if source.is_empty() {
            return Err(BackendStatus::INVALID_VALUE);
        }
        let id = ProgramId(state.next());
        state.programs.insert(
            id,
            ProgramRec {
                source: source.to_string(),
                entry_points: Vec::new(),
                built: false,
            },
        );
        Ok(id)
    }

    fn build_program(
        &self,
        program: ProgramId,
        device: DeviceId,
        options: &str,
    ) -> Result<(), BuildFailure> {
        if self.device(device).is_none() {
            return Err(BackendStatus::INVALID_DEVICE.into());
        }

        let mut state = self.state();
        state.builds += 1;

        if let Some(bad) = options.split_whitespace().find(|o| !o.starts_with('-')) {
            return Err(BuildFailure {
                status: BackendStatus::INVALID_BUILD_OPTIONS,
                log: format!("unrecognized build option '{}'", bad),
            });
        }

        let rec = state
            .programs
            .get_mut(&program)
            .ok_or(BackendStatus::INVALID_PROGRAM)?;
        check_source(&rec.source).map_err(|log| BuildFailure {
            status: BackendStatus::BUILD_PROGRAM_FAILURE,
            log,
        })?;
        rec.entry_points = kernel_entry_points(&rec.source);
        rec.built = true;
        debug!(program = %program, kernels = rec.entry_points.len(), "host program built");
        Ok(())
    }

    fn release_program(&self, program: ProgramId) -> Result<(), BackendStatus> {
        let mut state = self.state();
        state.released.programs.push(program);
        state.check(HostFault::ReleaseProgram, BackendStatus::INVALID_PROGRAM)?;
        state
            .programs
            .remove(&program)
            .map(|_| ())
            .ok_or(BackendStatus::INVALID_PROGRAM)
    }

    fn create_kernel(&self, program: ProgramId, name: &str) -> Result<KernelId, BackendStatus> {
        let mut state = self.state();
        let rec = state
            .programs
            .get(&program)
            .ok_or(BackendStatus::INVALID_PROGRAM)?;
        if !rec.built {
            return Err(BackendStatus::INVALID_PROGRAM_EXECUTABLE);
        }
        if !rec.entry_points.iter().any(|k| k == name) {
            return Err(BackendStatus::INVALID_KERNEL_NAME);
        }
        let id = KernelId(state.next());
        state.kernels.insert(id, (program, name.to_string()));
        Ok(id)
    }

    fn release_kernel(&self, kernel: KernelId) -> Result<(), BackendStatus> {
        let mut state = self.state();
        state.released.kernels.push(kernel);
        state.check(HostFault::ReleaseKernel, BackendStatus::INVALID_KERNEL)?;
        state
            .kernels
            .remove(&kernel)
            .map(|_| ())
            .ok_or(BackendStatus::INVALID_KERNEL)
    }

    fn create_buffer(
        &self,
        context: ContextId,
        flags: MemFlags,
        size: usize,
        host_data: Option<&[u8]>,
    ) -> Result<MemId, BackendStatus> {
        if size == 0 {
            return Err(BackendStatus::INVALID_BUFFER_SIZE);
        }
        let copies_host = flags.contains(MemFlags::COPY_HOST_PTR) || flags.contains(MemFlags::USE_HOST_PTR);
        if copies_host != host_data.is_some() {
            return Err(BackendStatus::INVALID_HOST_PTR);
        }

        let mut state = self.state();
        state.check(
            HostFault::CreateBuffer,
            BackendStatus::MEM_OBJECT_ALLOCATION_FAILURE,
        )?;
        if !state.contexts.contains_key(&context) {
            return Err(BackendStatus::INVALID_CONTEXT);
        }

        let mut data = vec![0u8; size];
        if let Some(init) = host_data {
            if init.len() > size {
                return Err(BackendStatus::INVALID_HOST_PTR);
            }
            data[..init.len()].copy_from_slice(init);
        }
        let id = MemId(state.next());
        state.buffers.insert(id, BufferRec { data, maps: Vec::new() });
        Ok(id)
    }

    fn release_buffer(&self, mem: MemId) -> Result<(), BackendStatus> {
        let mut state = self.state();
        state.released.buffers.push(mem);
        state.check(HostFault::ReleaseBuffer, BackendStatus::INVALID_MEM_OBJECT)?;
        match state.buffers.get(&mem) {
            None => Err(BackendStatus::INVALID_MEM_OBJECT),
            Some(rec) if !rec.maps.is_empty() => Err(BackendStatus::INVALID_OPERATION),
            Some(_) => {
                state.buffers.remove(&mem);
                Ok(())
            }
        }
    }

    fn map_buffer(
        &self,
        queue: QueueId,
        mem: MemId,
        access: MapAccess,
        offset: usize,
        len: usize,
    ) -> Result<NonNull<u8>, BackendStatus> {
        let mut state = self.state();
        state.check(HostFault::Map, BackendStatus::MAP_FAILURE)?;
        if !state.queues.contains_key(&queue) {
            return Err(BackendStatus::INVALID_COMMAND_QUEUE);
        }
        let rec = state
            .buffers
            .get_mut(&mem)
            .ok_or(BackendStatus::INVALID_MEM_OBJECT)?;
        let end = offset
            .checked_add(len)
            .ok_or(BackendStatus::INVALID_VALUE)?;
        if end > rec.data.len() {
            return Err(BackendStatus::INVALID_VALUE);
        }
        let exclusive = access == MapAccess::Write;
        if rec
            .maps
            .iter()
            .any(|&(_, live)| exclusive || live == MapAccess::Write)
        {
            return Err(BackendStatus::INVALID_OPERATION);
        }
        // SAFETY: `offset + len <= data.len()` was checked above. The vector
        // is never resized, and `as_mut_ptr` does not retag earlier mappings.
        let base = unsafe { rec.data.as_mut_ptr().add(offset) };
        let ptr = NonNull::new(base).ok_or(BackendStatus::MAP_FAILURE)?;
        rec.maps.push((ptr.as_ptr() as usize, access));
        Ok(ptr)
    }

    fn unmap_buffer(
        &self,
        queue: QueueId,
        mem: MemId,
        mapped: NonNull<u8>,
    ) -> Result<(), BackendStatus> {
        let mut state = self.state();
        if !state.queues.contains_key(&queue) {
            return Err(BackendStatus::INVALID_COMMAND_QUEUE);
        }
        let failing = state.faults.get(&HostFault::Unmap).copied();
        let rec = state
            .buffers
            .get_mut(&mem)
            .ok_or(BackendStatus::INVALID_MEM_OBJECT)?;
        let addr = mapped.as_ptr() as usize;
        let live = rec
            .maps
            .iter()
            .position(|&(at, _)| at == addr)
            .ok_or(BackendStatus::INVALID_VALUE)?;
        rec.maps.swap_remove(live);
        if let Some(injected) = failing {
            return Err(injected.unwrap_or(BackendStatus::OUT_OF_RESOURCES));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: &str = r#"
__kernel void blend(__global uchar *dst, __global const uchar *src)
{
    dst[get_global_id(0)] = src[get_global_id(0)];
}

kernel void fade(__global float *buf) { buf[0] = 0.0f; }
"#;

    fn backend() -> HostBackend {
        HostBackend::default()
    }

    #[test]
    fn test_entry_points() {
        assert_eq!(kernel_entry_points(SRC), vec!["blend", "fade"]);
        assert!(kernel_entry_points("float helper(float x) { return x; }").is_empty());
    }

    #[test]
    fn test_enumeration_by_class() {
        let b = backend();
        let platforms = b.platform_ids().unwrap();
        assert_eq!(platforms.len(), 1);
        let gpus = b.device_ids(platforms[0], DeviceClass::Gpu).unwrap();
        assert_eq!(gpus.len(), 1);
        assert_eq!(b.device_name(gpus[0]).unwrap(), "Reference GPU");
        assert_eq!(
            b.device_ids(platforms[0], DeviceClass::Default),
            Err(BackendStatus::DEVICE_NOT_FOUND)
        );
    }

    #[test]
    fn test_build_and_create_kernel() {
        let b = backend();
        let p = b.platform_ids().unwrap()[0];
        let dev = b.device_ids(p, DeviceClass::Gpu).unwrap()[0];
        let ctx = b.create_context(p, DeviceClass::Gpu).unwrap();
        let prog = b.create_program(ctx, SRC).unwrap();

        assert_eq!(
            b.create_kernel(prog, "blend"),
            Err(BackendStatus::INVALID_PROGRAM_EXECUTABLE)
        );
        b.build_program(prog, dev, "-I.").unwrap();
        assert!(b.create_kernel(prog, "blend").is_ok());
        assert_eq!(
            b.create_kernel(prog, "missing"),
            Err(BackendStatus::INVALID_KERNEL_NAME)
        );
    }

    #[test]
    fn test_build_failure_carries_log() {
        let b = backend();
        let p = b.platform_ids().unwrap()[0];
        let dev = b.device_ids(p, DeviceClass::Gpu).unwrap()[0];
        let ctx = b.create_context(p, DeviceClass::Gpu).unwrap();
        let prog = b
            .create_program(ctx, "#error missing include\n__kernel void k() {")
            .unwrap();
        let err = b.build_program(prog, dev, "").unwrap_err();
        assert_eq!(err.status, BackendStatus::BUILD_PROGRAM_FAILURE);
        assert!(err.log.contains("missing include"));
        assert!(err.log.contains("unbalanced braces"));
    }

    #[test]
    fn test_bad_build_option() {
        let b = backend();
        let p = b.platform_ids().unwrap()[0];
        let dev = b.device_ids(p, DeviceClass::Gpu).unwrap()[0];
        let ctx = b.create_context(p, DeviceClass::Gpu).unwrap();
        let prog = b.create_program(ctx, SRC).unwrap();
        let err = b.build_program(prog, dev, "-I. fast").unwrap_err();
        assert_eq!(err.status, BackendStatus::INVALID_BUILD_OPTIONS);
    }

    #[test]
    fn test_mapped_buffer_cannot_be_released() {
        let b = backend();
        let p = b.platform_ids().unwrap()[0];
        let dev = b.device_ids(p, DeviceClass::Gpu).unwrap()[0];
        let ctx = b.create_context(p, DeviceClass::Gpu).unwrap();
        let q = b.create_queue(ctx, dev).unwrap();
        let mem = b
            .create_buffer(ctx, MemFlags::READ_WRITE, 16, None)
            .unwrap();

        let ptr = b.map_buffer(q, mem, MapAccess::Write, 0, 16).unwrap();
        assert_eq!(b.release_buffer(mem), Err(BackendStatus::INVALID_OPERATION));
        b.unmap_buffer(q, mem, ptr).unwrap();
        assert!(b.release_buffer(mem).is_ok());
        assert_eq!(b.live_buffers(), 0);
    }

    #[test]
    fn test_write_mapping_is_exclusive() {
        let b = backend();
        let p = b.platform_ids().unwrap()[0];
        let dev = b.device_ids(p, DeviceClass::Gpu).unwrap()[0];
        let ctx = b.create_context(p, DeviceClass::Gpu).unwrap();
        let q = b.create_queue(ctx, dev).unwrap();
        let mem = b
            .create_buffer(ctx, MemFlags::READ_WRITE, 16, None)
            .unwrap();

        let w = b.map_buffer(q, mem, MapAccess::Write, 0, 16).unwrap();
        assert_eq!(
            b.map_buffer(q, mem, MapAccess::Write, 0, 16),
            Err(BackendStatus::INVALID_OPERATION)
        );
        assert_eq!(
            b.map_buffer(q, mem, MapAccess::Read, 8, 8),
            Err(BackendStatus::INVALID_OPERATION)
        );
        b.unmap_buffer(q, mem, w).unwrap();

        let r1 = b.map_buffer(q, mem, MapAccess::Read, 0, 16).unwrap();
        let r2 = b.map_buffer(q, mem, MapAccess::Read, 0, 16).unwrap();
        assert_eq!(
            b.map_buffer(q, mem, MapAccess::Write, 0, 4),
            Err(BackendStatus::INVALID_OPERATION)
        );
        b.unmap_buffer(q, mem, r1).unwrap();
        b.unmap_buffer(q, mem, r2).unwrap();
        assert_eq!(b.unmap_buffer(q, mem, r1), Err(BackendStatus::INVALID_VALUE));

        let w = b.map_buffer(q, mem, MapAccess::Write, 0, 16).unwrap();
        b.unmap_buffer(q, mem, w).unwrap();
        assert!(b.release_buffer(mem).is_ok());
    }

    #[test]
    fn test_map_out_of_range() {
        let b = backend();
        let p = b.platform_ids().unwrap()[0];
        let dev = b.device_ids(p, DeviceClass::Gpu).unwrap()[0];
        let ctx = b.create_context(p, DeviceClass::Gpu).unwrap();
        let q = b.create_queue(ctx, dev).unwrap();
        let mem = b
            .create_buffer(ctx, MemFlags::READ_WRITE, 8, None)
            .unwrap();
        assert_eq!(
            b.map_buffer(q, mem, MapAccess::Read, 4, 8),
            Err(BackendStatus::INVALID_VALUE)
        );
    }

    #[test]
    fn test_fault_injection() {
        let b = backend();
        b.inject_fault(HostFault::PlatformIds);
        assert!(b.platform_ids().is_err());
        b.clear_faults();
        assert!(b.platform_ids().is_ok());

        b.inject_fault_status(HostFault::PlatformIds, BackendStatus::OUT_OF_HOST_MEMORY);
        assert_eq!(b.platform_ids(), Err(BackendStatus::OUT_OF_HOST_MEMORY));
    }

    #[test]
    fn test_queue_device_must_match_context_class() {
        let b = backend();
        let p = b.platform_ids().unwrap()[0];
        let cpu = b.device_ids(p, DeviceClass::Cpu).unwrap()[0];
        let ctx = b.create_context(p, DeviceClass::Gpu).unwrap();
        assert_eq!(b.create_queue(ctx, cpu), Err(BackendStatus::INVALID_DEVICE));
    }
}
