//! Hard wall-clock bounds around blocking external interactions.
//!
//! Two isolation flavours are offered. [`BoundedExecutor::run_command`] runs the work in
//! its own process group and kills the whole group when the bound expires, so nothing
//! survives a timeout. [`BoundedExecutor::run`] runs an in-process closure on a dedicated
//! thread; threads cannot be forcibly stopped, so on timeout the worker is detached and
//! may keep running in the background until it finishes on its own. Callers must treat
//! a timeout from either flavour as fatal to the attempt that issued it.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use crate::execution::{
    ExecutionResult, ProcessExecutor, ProcessOutput, ProcessSpawnRequest, TokioProcessExecutor,
    spawn_validated,
};
use crate::models::{CoreError, CoreErrorKind};

#[derive(Clone)]
pub struct BoundedExecutor {
    processes: Arc<dyn ProcessExecutor>,
}

impl Default for BoundedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundedExecutor {
    pub fn new() -> Self {
        Self::with_process_executor(Arc::new(TokioProcessExecutor))
    }

    pub fn with_process_executor(processes: Arc<dyn ProcessExecutor>) -> Self {
        Self { processes }
    }

    /// Runs `operation` on a worker thread and waits at most `timeout` for it.
    pub fn run<T, F>(&self, timeout: Duration, label: &str, operation: F) -> ExecutionResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> ExecutionResult<T> + Send + 'static,
    {
        if timeout.is_zero() {
            return Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("{label}: timeout must be greater than zero"),
            ));
        }

        let (sender, receiver) = mpsc::sync_channel(1);
        thread::Builder::new()
            .name(format!("bounded-{label}"))
            .spawn(move || {
                let outcome = catch_unwind(AssertUnwindSafe(operation));
                // The caller may have given up already; a closed channel is expected then.
                let _ = sender.send(outcome);
            })
            .map_err(|error| {
                CoreError::new(
                    CoreErrorKind::Internal,
                    format!("{label}: failed to spawn worker thread: {error}"),
                )
            })?;

        match receiver.recv_timeout(timeout) {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(CoreError::new(
                CoreErrorKind::Internal,
                format!("{label}: worker panicked: {}", panic_message(panic.as_ref())),
            )),
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    label,
                    timeout_ms = timeout.as_millis() as u64,
                    "bounded operation timed out; worker thread detached"
                );
                Err(timeout_error(label, timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(CoreError::new(
                CoreErrorKind::Internal,
                format!("{label}: worker exited without reporting a result"),
            )),
        }
    }

    /// Runs a command in its own process group; the group is killed when the request's
    /// timeout expires. Must not be called from inside an async runtime.
    pub fn run_command(&self, request: ProcessSpawnRequest) -> ExecutionResult<ProcessOutput> {
        if request.timeout.is_none() {
            return Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("{}: bounded command requires a timeout", request.label),
            ));
        }

        let label = request.label.clone();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| {
                CoreError::new(
                    CoreErrorKind::Internal,
                    format!("{label}: failed to build process runtime: {error}"),
                )
            })?;

        runtime.block_on(async {
            let process = spawn_validated(self.processes.as_ref(), request)?;
            process.wait().await
        })
    }
}

fn timeout_error(label: &str, timeout: Duration) -> CoreError {
    CoreError::new(
        CoreErrorKind::Timeout,
        format!("{label}: timed out after {}ms", timeout.as_millis()),
    )
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
