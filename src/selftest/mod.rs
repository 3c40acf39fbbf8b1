//! Operator self-test: drive one full environment lifecycle against the
//! active backend and report each stage.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::env::AccelEnv;

mod checks;

/// OpenCL C registered by the self-test.
pub const SELFTEST_SOURCE: &str = r#"
__kernel void accelenv_selftest_copy(__global const uchar *src, __global uchar *dst)
{
    size_t i = get_global_id(0);
    dst[i] = src[i];
}
"#;

/// Kernel name resolved by the self-test.
pub const SELFTEST_KERNEL: &str = "accelenv_selftest_copy";

/// Run every stage in order. A stage whose prerequisite failed is skipped.
pub fn run(env: &AccelEnv) -> SelfTestReport {
    info!(backend = env.backend().name(), "Self-test: exercising compute environment...");

    let mut results = vec![checks::check_devices(env)];

    let initialized = checks::check_initialize(env);
    let ready = initialized.status == TestStatus::Pass;
    results.push(initialized);

    if ready {
        results.push(checks::check_kernel(env));
        results.push(checks::check_buffer_round_trip(env));
        results.push(checks::check_image_round_trip(env));
        results.push(checks::check_uninitialize(env));
    } else {
        for component in ["Kernel", "Buffer", "Image", "Teardown"] {
            results.push(ComponentResult::skipped(component, "environment did not initialize"));
        }
    }

    info!("Self-test complete. {} check(s) run.", results.len());
    SelfTestReport {
        generated_at: Utc::now(),
        backend: env.backend().name().to_string(),
        results,
    }
}

#[derive(Debug, Serialize)]
pub struct SelfTestReport {
    pub generated_at: DateTime<Utc>,
    pub backend: String,
    pub results: Vec<ComponentResult>,
}

impl SelfTestReport {
    /// True when no stage failed.
    pub fn passed(&self) -> bool {
        self.results.iter().all(|r| r.status != TestStatus::Fail)
    }
}

/// Self-test result for one stage.
#[derive(Debug, Serialize, Clone)]
pub struct ComponentResult {
    pub component: String,
    pub status: TestStatus,
    pub details: String,
    pub remediation: Option<String>,
}

impl ComponentResult {
    fn pass(component: &str, details: impl Into<String>) -> Self {
        Self {
            component: component.to_string(),
            status: TestStatus::Pass,
            details: details.into(),
            remediation: None,
        }
    }

    fn fail(component: &str, details: impl Into<String>, remediation: Option<&str>) -> Self {
        Self {
            component: component.to_string(),
            status: TestStatus::Fail,
            details: details.into(),
            remediation: remediation.map(str::to_string),
        }
    }

    fn skipped(component: &str, details: impl Into<String>) -> Self {
        Self {
            component: component.to_string(),
            status: TestStatus::Skipped,
            details: details.into(),
            remediation: None,
        }
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Pass,
    Fail,
    Warning,
    Skipped,
}

impl TestStatus {
    pub fn label(&self) -> &'static str {
        match self {
            TestStatus::Pass => "PASS",
            TestStatus::Fail => "FAIL",
            TestStatus::Warning => "WARN",
            TestStatus::Skipped => "SKIP",
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::{HostBackend, HostFault, HostPlatform};
    use crate::env::EnvState;

    #[test]
    fn test_reference_backend_passes() {
        let env = AccelEnv::new(Arc::new(HostBackend::default()));
        let report = run(&env);
        assert!(report.passed(), "{:?}", report.results);
        assert_eq!(report.results.len(), 6);
        assert_eq!(env.status(), EnvState::Uninitialized);
    }

    #[test]
    fn test_no_devices_skips_later_stages() {
        let env = AccelEnv::new(Arc::new(HostBackend::new(vec![HostPlatform::new("empty")])));
        let report = run(&env);
        assert!(!report.passed());
        assert_eq!(report.results[1].status, TestStatus::Fail);
        assert!(report.results[2..]
            .iter()
            .all(|r| r.status == TestStatus::Skipped));
    }

    #[test]
    fn test_map_fault_fails_transfers_only() {
        let backend = Arc::new(HostBackend::default());
        backend.inject_fault(HostFault::Map);
        let env = AccelEnv::new(backend);
        let report = run(&env);
        let status = |name: &str| {
            report
                .results
                .iter()
                .find(|r| r.component == name)
                .map(|r| r.status)
        };
        assert_eq!(status("Kernel"), Some(TestStatus::Pass));
        assert_eq!(status("Buffer"), Some(TestStatus::Fail));
        assert_eq!(status("Image"), Some(TestStatus::Fail));
        assert_eq!(status("Teardown"), Some(TestStatus::Pass));
    }
}
