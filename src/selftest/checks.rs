use rand::Rng;
use tracing::warn;

use super::{ComponentResult, TestStatus, SELFTEST_KERNEL, SELFTEST_SOURCE};
use crate::backend::MemFlags;
use crate::env::{AccelEnv, EnvState};
use crate::error::Result;
use crate::kernel::KernelHandle;

const ROUND_TRIP_BYTES: usize = 4096;

/// Luma and chroma plane sizes of a tiny frame, written after a header gap.
const IMAGE_PLANES: [usize; 2] = [100, 50];
const IMAGE_OFFSET: usize = 10;

fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill(&mut data[..]);
    data
}

pub fn check_devices(env: &AccelEnv) -> ComponentResult {
    match env.get_device_list() {
        Ok(catalog) if catalog.device_count() == 0 => ComponentResult {
            component: "Devices".to_string(),
            status: TestStatus::Warning,
            details: format!("{} platform(s), no devices", catalog.platform_count()),
            remediation: Some("Install a compute driver or add a device to the host topology.".to_string()),
        },
        Ok(catalog) => ComponentResult::pass(
            "Devices",
            format!(
                "{} platform(s), {} device(s)",
                catalog.platform_count(),
                catalog.device_count()
            ),
        ),
        Err(e) => ComponentResult::fail("Devices", format!("Enumeration failed: {}", e), None),
    }
}

pub fn check_initialize(env: &AccelEnv) -> ComponentResult {
    let result = env
        .register_kernel_source(SELFTEST_SOURCE)
        .and_then(|_| env.initialize(None));
    match result {
        Ok(()) => {
            let details = env
                .selected_device()
                .map(|d| format!("{} ({})", d.name, d.class))
                .unwrap_or_else(|| "session open".to_string());
            ComponentResult::pass("Initialize", details)
        }
        Err(e) => ComponentResult::fail(
            "Initialize",
            e.to_string(),
            Some("Check platform_idx / device_idx against `accelenv devices`."),
        ),
    }
}

pub fn check_kernel(env: &AccelEnv) -> ComponentResult {
    let mut handle = KernelHandle::new();
    let result = env.create_kernel(&mut handle, SELFTEST_KERNEL);
    env.release_kernel(&mut handle);
    match result {
        Ok(()) => ComponentResult::pass("Kernel", format!("resolved {}", SELFTEST_KERNEL)),
        Err(e) => ComponentResult::fail("Kernel", e.to_string(), None),
    }
}

fn buffer_round_trip(env: &AccelEnv) -> Result<bool> {
    let payload = random_bytes(ROUND_TRIP_BYTES);
    let mut buffer = env.create_buffer(payload.len(), MemFlags::READ_WRITE, None)?;
    let mut readback = vec![0u8; payload.len()];
    let result = env
        .write(&mut buffer, &payload)
        .and_then(|_| env.read(&mut readback, &buffer));
    env.release_buffer(&mut buffer);
    result.map(|_| readback == payload)
}

pub fn check_buffer_round_trip(env: &AccelEnv) -> ComponentResult {
    match buffer_round_trip(env) {
        Ok(true) => ComponentResult::pass("Buffer", format!("{} bytes round-tripped", ROUND_TRIP_BYTES)),
        Ok(false) => ComponentResult::fail("Buffer", "Read-back differs from written data", None),
        Err(e) => ComponentResult::fail("Buffer", e.to_string(), None),
    }
}

fn image_round_trip(env: &AccelEnv) -> Result<bool> {
    let planes: Vec<Vec<u8>> = IMAGE_PLANES.iter().map(|&n| random_bytes(n)).collect();
    let total: usize = IMAGE_PLANES.iter().sum();
    let mut buffer = env.create_buffer(IMAGE_OFFSET + total, MemFlags::READ_WRITE, None)?;

    let sources: Vec<&[u8]> = planes.iter().map(Vec::as_slice).collect();
    let mut back: Vec<Vec<u8>> = IMAGE_PLANES.iter().map(|&n| vec![0u8; n]).collect();
    let result = env.write_image(&mut buffer, IMAGE_OFFSET, &sources).and_then(|_| {
        let mut targets: Vec<&mut [u8]> = back.iter_mut().map(Vec::as_mut_slice).collect();
        env.read_image_at(&mut targets, &buffer, IMAGE_OFFSET)
    });
    env.release_buffer(&mut buffer);
    result.map(|_| back == planes)
}

pub fn check_image_round_trip(env: &AccelEnv) -> ComponentResult {
    match image_round_trip(env) {
        Ok(true) => ComponentResult::pass(
            "Image",
            format!("{} planes at offset {}", IMAGE_PLANES.len(), IMAGE_OFFSET),
        ),
        Ok(false) => ComponentResult::fail("Image", "Plane read-back differs from written data", None),
        Err(e) => ComponentResult::fail("Image", e.to_string(), None),
    }
}

pub fn check_uninitialize(env: &AccelEnv) -> ComponentResult {
    env.uninitialize();
    match env.status() {
        EnvState::Uninitialized => ComponentResult::pass("Teardown", "session closed"),
        EnvState::Ready => ComponentResult::pass(
            "Teardown",
            format!("still referenced ({} holder(s))", env.reference_count()),
        ),
        EnvState::Draining => {
            warn!(active_kernels = env.active_kernel_count(), "teardown deferred");
            ComponentResult {
                component: "Teardown".to_string(),
                status: TestStatus::Warning,
                details: format!("{} kernel handle(s) outstanding", env.active_kernel_count()),
                remediation: Some("Release every kernel handle before shutdown.".to_string()),
            }
        }
    }
}
