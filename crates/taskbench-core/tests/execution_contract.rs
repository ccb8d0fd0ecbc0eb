use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use taskbench_core::execution::{
    BoundedExecutor, CommandSpec, ExecutionResult, ProcessExecutor, ProcessExitStatus,
    ProcessOutput, ProcessSpawnRequest, ProcessTerminationMode, ProcessWaitFuture, RunningProcess,
    spawn_validated,
};
use taskbench_core::models::{CoreError, CoreErrorKind};

#[derive(Clone)]
struct FakeExecutor {
    captured: Arc<Mutex<Option<ProcessSpawnRequest>>>,
    output: ProcessOutput,
    terminate_calls: Arc<Mutex<Vec<ProcessTerminationMode>>>,
}

impl FakeExecutor {
    fn new(output: ProcessOutput) -> Self {
        Self {
            captured: Arc::new(Mutex::new(None)),
            output,
            terminate_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn captured_request(&self) -> Option<ProcessSpawnRequest> {
        self.captured.lock().ok()?.clone()
    }

    fn terminate_count(&self) -> usize {
        self.terminate_calls
            .lock()
            .map(|calls| calls.len())
            .unwrap_or(0)
    }
}

struct FakeProcess {
    pid: Option<u32>,
    output: ProcessOutput,
    terminate_calls: Arc<Mutex<Vec<ProcessTerminationMode>>>,
}

impl RunningProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn terminate(&self, mode: ProcessTerminationMode) -> ExecutionResult<()> {
        let mut calls = self
            .terminate_calls
            .lock()
            .map_err(|_| CoreError::new(CoreErrorKind::Internal, "terminate lock poisoned"))?;
        calls.push(mode);
        Ok(())
    }

    fn wait(self: Box<Self>) -> ProcessWaitFuture {
        let output = self.output.clone();
        Box::pin(async move { Ok(output) })
    }
}

impl ProcessExecutor for FakeExecutor {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Box<dyn RunningProcess>> {
        let mut captured = self
            .captured
            .lock()
            .map_err(|_| CoreError::new(CoreErrorKind::Internal, "capture lock poisoned"))?;
        *captured = Some(request);

        Ok(Box::new(FakeProcess {
            pid: Some(4242),
            output: self.output.clone(),
            terminate_calls: self.terminate_calls.clone(),
        }))
    }
}

fn successful_output(stdout: &[u8]) -> ProcessOutput {
    let now = SystemTime::now();
    ProcessOutput {
        status: ProcessExitStatus::ExitCode(0),
        stdout: stdout.to_vec(),
        stderr: Vec::new(),
        started_at: now,
        finished_at: now,
    }
}

#[test]
fn request_validation_rejects_empty_program() {
    let request = ProcessSpawnRequest::new("execute", CommandSpec::new("")).task("files/rename");

    let error = request.validate().expect_err("expected validation failure");
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);
    assert!(error.message.starts_with("execute:"));
}

#[test]
fn request_validation_rejects_zero_timeout() {
    let request = ProcessSpawnRequest::new(
        "execute",
        CommandSpec::new("python3").args(["-m", "http.server"]),
    )
    .timeout(Duration::ZERO);

    let error = request
        .validate()
        .expect_err("expected timeout validation failure");
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);
    assert!(error.message.contains("timeout"));
}

#[tokio::test]
async fn validated_spawn_uses_structured_args_and_supports_termination() {
    let output = successful_output(b"ok");
    let executor = FakeExecutor::new(output.clone());

    let request = ProcessSpawnRequest::new(
        "execute",
        CommandSpec::new("python3")
            .args(["-m", "pip", "install", "--quiet", "numpy"])
            .env("PIP_DISABLE_PIP_VERSION_CHECK", "1")
            .working_dir(PathBuf::from("/tmp")),
    )
    .task("python/numpy_mean")
    .timeout(Duration::from_secs(10));

    let handle = spawn_validated(&executor, request).expect("validated spawn should succeed");
    assert_eq!(handle.pid(), Some(4242));

    handle
        .terminate(ProcessTerminationMode::Graceful {
            grace_period: Duration::from_secs(2),
        })
        .expect("terminate should succeed");

    let result = handle.wait().await.expect("wait should succeed");
    assert_eq!(result, output);

    let captured = executor
        .captured_request()
        .expect("executor should capture spawn request");
    assert_eq!(captured.command.program, PathBuf::from("python3"));
    assert_eq!(
        captured.command.args,
        vec!["-m", "pip", "install", "--quiet", "numpy"]
    );
    assert_eq!(
        captured.command.env.get("PIP_DISABLE_PIP_VERSION_CHECK"),
        Some(&"1".to_string())
    );
    assert_eq!(captured.command.working_dir, Some(PathBuf::from("/tmp")));
    assert_eq!(captured.task.as_deref(), Some("python/numpy_mean"));
    assert_eq!(executor.terminate_count(), 1);
}

#[test]
fn bounded_executor_routes_commands_through_its_process_executor() {
    let fake = FakeExecutor::new(successful_output(b"routed"));
    let executor = BoundedExecutor::with_process_executor(Arc::new(fake.clone()));

    let request = ProcessSpawnRequest::new("execute", CommandSpec::shell("true"))
        .timeout(Duration::from_secs(1));
    let output = executor.run_command(request).expect("fake command should succeed");

    assert_eq!(output.stdout, b"routed".to_vec());
    let captured = fake.captured_request().expect("request should be captured");
    assert_eq!(captured.label, "execute");
}
