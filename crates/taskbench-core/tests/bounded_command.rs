#![cfg(unix)]

use std::time::{Duration, Instant};

use taskbench_core::execution::{BoundedExecutor, CommandSpec, ProcessSpawnRequest};
use taskbench_core::models::CoreErrorKind;

fn temp_path(name: &str) -> std::path::PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("time should be after epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("taskbench-{name}-{nanos}"))
}

#[test]
fn command_finishing_in_time_returns_output() {
    let executor = BoundedExecutor::new();
    let request = ProcessSpawnRequest::new("echo", CommandSpec::shell("echo bounded"))
        .timeout(Duration::from_secs(5));

    let output = executor.run_command(request).expect("command should finish");
    assert!(output.succeeded());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "bounded");
}

#[test]
fn expired_command_is_killed_with_its_descendants() {
    let marker = temp_path("orphan");
    let script = format!("(sleep 1; touch '{}') & sleep 30", marker.display());
    let executor = BoundedExecutor::new();
    let request =
        ProcessSpawnRequest::new("hang", CommandSpec::shell(script)).timeout(Duration::from_millis(200));

    let started = Instant::now();
    let error = executor.run_command(request).expect_err("command should time out");

    assert_eq!(error.kind, CoreErrorKind::Timeout);
    assert!(started.elapsed() < Duration::from_secs(5));

    std::thread::sleep(Duration::from_millis(1500));
    assert!(!marker.exists(), "background child survived the timeout");
}

#[test]
fn bounded_command_requires_a_timeout() {
    let executor = BoundedExecutor::new();
    let request = ProcessSpawnRequest::new("echo", CommandSpec::shell("echo unbounded"));

    let error = executor.run_command(request).expect_err("timeout is mandatory");
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);
}
