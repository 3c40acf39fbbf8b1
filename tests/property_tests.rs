//! Property-based tests for the registry, lifecycle and transfer layer.

use std::sync::Arc;

use accelenv::backend::{HostBackend, MemFlags};
use accelenv::{AccelEnv, AccelError, EnvState, MAX_IMAGE_PLANES};
use proptest::prelude::*;

// ── Strategies ──────────────────────────────────────────────────────────────

/// A small OpenCL C source defining one kernel named after `n`.
fn arb_source() -> impl Strategy<Value = String> {
    (0u32..16).prop_map(|n| format!("__kernel void k{n}(__global uchar *d) {{ d[0] = {n}; }}\n"))
}

fn arb_planes() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..=MAX_IMAGE_PLANES)
}

fn ready() -> (Arc<HostBackend>, AccelEnv) {
    let backend = Arc::new(HostBackend::default());
    let env = AccelEnv::new(backend.clone());
    env.register_kernel_source("__kernel void base() {}\n").unwrap();
    env.initialize(None).unwrap();
    (backend, env)
}

// ── Property tests ───────────────────────────────────────────────────────────

proptest! {
    /// N initialize calls need exactly N uninitialize calls to tear down.
    #[test]
    fn balanced_calls_tear_down_once(n in 1usize..8) {
        let backend = Arc::new(HostBackend::default());
        let env = AccelEnv::new(backend.clone());
        env.register_kernel_source("__kernel void base() {}\n").unwrap();

        for _ in 0..n {
            env.initialize(None).unwrap();
        }
        for _ in 0..n - 1 {
            env.uninitialize();
            prop_assert_eq!(env.status(), EnvState::Ready);
        }
        prop_assert!(backend.release_log().contexts.is_empty());
        env.uninitialize();
        prop_assert_eq!(env.status(), EnvState::Uninitialized);
        prop_assert_eq!(backend.release_log().contexts.len(), 1);
    }

    /// Registering sources in any order with repeats keeps one entry per
    /// distinct text and builds each text exactly once.
    #[test]
    fn duplicates_never_compile_twice(sources in prop::collection::vec(arb_source(), 1..24)) {
        let backend = Arc::new(HostBackend::default());
        let env = AccelEnv::new(backend.clone());
        for s in &sources {
            env.register_kernel_source(s).unwrap();
        }
        let mut distinct = sources.clone();
        distinct.sort();
        distinct.dedup();
        prop_assert_eq!(env.source_count(), distinct.len());

        env.initialize(None).unwrap();
        env.initialize(None).unwrap();
        prop_assert_eq!(backend.build_count(), 1);
        prop_assert_eq!(env.program_count(), 1);
        env.uninitialize();
        env.uninitialize();
    }

    /// Bytes written are the bytes read back.
    #[test]
    fn write_read_identity(data in prop::collection::vec(any::<u8>(), 1..512)) {
        let (_backend, env) = ready();
        let mut buf = env.create_buffer(data.len(), MemFlags::READ_WRITE, None).unwrap();
        env.write(&mut buf, &data).unwrap();
        let mut out = vec![0u8; data.len()];
        env.read(&mut out, &buf).unwrap();
        env.release_buffer(&mut buf);
        env.uninitialize();
        prop_assert_eq!(out, data);
    }

    /// Image transfers succeed exactly when the planes fit after the offset,
    /// and fitting planes read back unchanged.
    #[test]
    fn image_fits_or_is_rejected(
        planes in arb_planes(),
        offset in 0usize..32,
        capacity in 1usize..300,
    ) {
        let (_backend, env) = ready();
        let mut buf = env.create_buffer(capacity, MemFlags::READ_WRITE, None).unwrap();
        let total: usize = planes.iter().map(Vec::len).sum();
        let sources: Vec<&[u8]> = planes.iter().map(Vec::as_slice).collect();

        let written = env.write_image(&mut buf, offset, &sources);
        if total + offset > capacity {
            prop_assert!(matches!(written, Err(AccelError::InvalidArgument(_))));
        } else {
            prop_assert!(written.is_ok());
            let mut back: Vec<Vec<u8>> = planes.iter().map(|p| vec![0u8; p.len()]).collect();
            {
                let mut targets: Vec<&mut [u8]> = back.iter_mut().map(Vec::as_mut_slice).collect();
                env.read_image_at(&mut targets, &buf, offset).unwrap();
            }
            prop_assert_eq!(back, planes);
        }
        env.release_buffer(&mut buf);
        env.uninitialize();
    }
}
