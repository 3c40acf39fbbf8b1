//! TOML configuration loading.

use std::io::Write;

use accelenv::backend::DeviceClass;
use accelenv::config::AccelConfig;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_full_config() {
    let file = write_config(
        r#"
        [options]
        platform_idx = 1
        device_idx = 0
        build_options = "-I. -cl-mad-enable"
        max_kernel_sources = 16
        max_kernels = 32

        [[host.platforms]]
        vendor = "First"
        devices = []

        [[host.platforms]]
        vendor = "Second"
        devices = [{ name = "Second GPU", class = "gpu" }]
        "#,
    );

    let cfg = AccelConfig::load(file.path()).unwrap();
    assert_eq!(cfg.options.platform_idx, 1);
    assert_eq!(cfg.options.max_kernels, 32);
    assert_eq!(cfg.host.platforms.len(), 2);
    assert_eq!(cfg.host.platforms[1].devices[0].class, DeviceClass::Gpu);

    let env = accelenv::host_env(&cfg);
    env.register_kernel_source("__kernel void k() {}\n").unwrap();
    env.initialize(None).unwrap();
    let selected = env.selected_device().unwrap();
    assert_eq!(selected.platform_index, Some(1));
    assert_eq!(selected.name, "Second GPU");
    env.uninitialize();
}

#[test]
fn test_empty_file_uses_defaults() {
    let file = write_config("");
    let cfg = AccelConfig::load(file.path()).unwrap();
    assert_eq!(cfg.options.build_options, "-I.");
    assert_eq!(cfg.host.platforms.len(), 1);
    assert_eq!(cfg.host.platforms[0].devices.len(), 2);
}

#[test]
fn test_parse_error_names_file() {
    let file = write_config("[options\nplatform_idx = ");
    let err = AccelConfig::load(file.path()).unwrap_err();
    let msg = format!("{:#}", err);
    assert!(msg.contains("failed to parse config file"), "{}", msg);
    assert!(msg.contains(&file.path().display().to_string()), "{}", msg);
}

#[test]
fn test_invalid_index_rejected() {
    let file = write_config("[options]\nplatform_idx = -3\n");
    assert!(AccelConfig::load(file.path()).is_err());
}

#[test]
fn test_missing_explicit_path_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.toml");
    assert!(AccelConfig::resolve(Some(&missing)).is_err());
}
