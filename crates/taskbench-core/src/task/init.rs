//! Named initialization handlers.
//!
//! A task resolves each `func` of its `initialize` list against the category's local
//! registry first and falls back to the global handlers of its sort.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;
use std::process::{Child, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::execution::{BoundedExecutor, CommandSpec, ProcessSpawnRequest};
use crate::models::{CoreError, CoreErrorKind, TaskSort};
use crate::session::Session;

pub type InitResult = Result<bool, CoreError>;

pub type InitHandler =
    Arc<dyn Fn(&mut InitContext<'_>, &Map<String, Value>) -> InitResult + Send + Sync>;

/// What a handler may touch while it runs.
pub struct InitContext<'a> {
    pub session: &'a mut dyn Session,
    pub executor: &'a BoundedExecutor,
    pub task: &'a str,
    pub timeout: Duration,
}

#[derive(Clone, Default)]
pub struct InitRegistry {
    handlers: BTreeMap<String, InitHandler>,
}

impl InitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handlers every task of `sort` can use.
    pub fn global(sort: TaskSort) -> Self {
        match sort {
            TaskSort::Raw => Self::new()
                .with("touch", raw_touch)
                .with("download", raw_download)
                .with("execute", raw_execute)
                .with("launch", raw_launch),
            TaskSort::Vm => Self::new()
                .with("touch", vm_touch)
                .with("execute", vm_execute)
                .with("launch", vm_launch),
        }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&mut InitContext<'_>, &Map<String, Value>) -> InitResult + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

    pub fn with<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut InitContext<'_>, &Map<String, Value>) -> InitResult + Send + Sync + 'static,
    {
        self.register(name, handler);
        self
    }

    /// Layers `local` on top; local entries win on name clashes.
    pub fn overlay(mut self, local: &InitRegistry) -> Self {
        for (name, handler) in &local.handlers {
            self.handlers.insert(name.clone(), handler.clone());
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&InitHandler> {
        self.handlers.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

fn raw_touch(context: &mut InitContext<'_>, args: &Map<String, Value>) -> InitResult {
    let path = expand_home(required_str(args, "touch", "path")?);
    let text = optional_str(args, "touch", "text")?
        .unwrap_or_default()
        .to_string();

    context.executor.run(context.timeout, "touch", move || {
        ensure_parent(&path)?;
        std::fs::write(&path, text)
            .map_err(|error| handler_error("touch", &format!("'{}': {error}", path.display())))?;
        Ok(true)
    })
}

fn raw_download(context: &mut InitContext<'_>, args: &Map<String, Value>) -> InitResult {
    let url = required_str(args, "download", "url")?.to_string();
    let path = expand_home(required_str(args, "download", "path")?);
    let timeout = context.timeout;

    context.executor.run(timeout, "download", move || {
        let response = ureq::get(&url)
            .timeout(timeout)
            .call()
            .map_err(|error| handler_error("download", &format!("'{url}': {error}")))?;

        ensure_parent(&path)?;
        let mut file = File::create(&path)
            .map_err(|error| handler_error("download", &format!("'{}': {error}", path.display())))?;
        std::io::copy(&mut response.into_reader(), &mut file)
            .map_err(|error| handler_error("download", &format!("'{url}': {error}")))?;
        Ok(true)
    })
}

fn raw_execute(context: &mut InitContext<'_>, args: &Map<String, Value>) -> InitResult {
    let (argv, shell) = command_argv(args)?;
    let command = command_spec(&argv, shell);

    let request = ProcessSpawnRequest::new("execute", command)
        .task(context.task)
        .timeout(context.timeout);
    let output = context.executor.run_command(request)?;

    if !output.succeeded() {
        tracing::warn!(
            task = context.task,
            status = ?output.status,
            stderr = %String::from_utf8_lossy(&output.stderr),
            "init command failed"
        );
    }
    Ok(output.succeeded())
}

/// Starts the program detached in its own process group and returns once it is spawned.
fn raw_launch(context: &mut InitContext<'_>, args: &Map<String, Value>) -> InitResult {
    let (argv, shell) = command_argv(args)?;
    let spec = command_spec(&argv, shell);
    spec.validate("launch")?;

    let mut command = std::process::Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let child = command
        .spawn()
        .map_err(|error| handler_error("launch", &format!("'{}': {error}", argv.join(" "))))?;
    tracing::debug!(task = context.task, pid = child.id(), "launched init program");
    if let Err(error) = reap_detached(child, context.task) {
        tracing::warn!(task = context.task, %error, "could not start reaper for launched program");
    }
    Ok(true)
}

/// Waits for `child` on a background thread so it never lingers as a zombie.
fn reap_detached(mut child: Child, task: &str) -> std::io::Result<JoinHandle<Option<ExitStatus>>> {
    let task = task.to_string();
    std::thread::Builder::new()
        .name(format!("reap-{}", child.id()))
        .spawn(move || match child.wait() {
            Ok(status) => {
                tracing::debug!(task = %task, pid = child.id(), %status, "launched program exited");
                Some(status)
            }
            Err(error) => {
                tracing::warn!(task = %task, pid = child.id(), %error, "failed to wait for launched program");
                None
            }
        })
}

fn vm_touch(context: &mut InitContext<'_>, args: &Map<String, Value>) -> InitResult {
    let path = required_str(args, "touch", "path")?;
    let text = optional_str(args, "touch", "text")?.unwrap_or_default();
    context.session.write_file(path, text)
}

fn vm_execute(context: &mut InitContext<'_>, args: &Map<String, Value>) -> InitResult {
    let (argv, shell) = command_argv(args)?;
    context.session.run_command(&argv, shell)
}

fn vm_launch(context: &mut InitContext<'_>, args: &Map<String, Value>) -> InitResult {
    let (argv, shell) = command_argv(args)?;
    context.session.launch(&argv, shell)
}

fn command_spec(argv: &[String], shell: bool) -> CommandSpec {
    if shell {
        CommandSpec::shell(argv.join(" "))
    } else {
        CommandSpec::new(&argv[0]).args(argv[1..].iter().cloned())
    }
}

/// `command` is a string or a list of strings; strings are split on whitespace unless
/// `shell` is set.
fn command_argv(args: &Map<String, Value>) -> Result<(Vec<String>, bool), CoreError> {
    let shell = match args.get("shell") {
        None => false,
        Some(Value::Bool(shell)) => *shell,
        Some(_) => return Err(argument_error("execute", "'shell' must be a boolean")),
    };

    let argv = match args.get("command") {
        Some(Value::String(text)) if shell => vec![text.clone()],
        Some(Value::String(text)) => text.split_whitespace().map(str::to_string).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| argument_error("execute", "'command' entries must be strings"))
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(argument_error(
                "execute",
                "'command' must be a string or a list of strings",
            ));
        }
        None => return Err(argument_error("execute", "missing 'command'")),
    };

    if argv.is_empty() {
        return Err(argument_error("execute", "'command' must not be empty"));
    }
    Ok((argv, shell))
}

fn required_str<'a>(
    args: &'a Map<String, Value>,
    func: &str,
    key: &str,
) -> Result<&'a str, CoreError> {
    optional_str(args, func, key)?
        .ok_or_else(|| argument_error(func, &format!("missing '{key}'")))
}

fn optional_str<'a>(
    args: &'a Map<String, Value>,
    func: &str,
    key: &str,
) -> Result<Option<&'a str>, CoreError> {
    match args.get(key) {
        None => Ok(None),
        Some(Value::String(value)) => Ok(Some(value)),
        Some(_) => Err(argument_error(func, &format!("'{key}' must be a string"))),
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

fn ensure_parent(path: &std::path::Path) -> Result<(), CoreError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .map_err(|error| {
                handler_error("init", &format!("'{}': {error}", parent.display()))
            }),
        _ => Ok(()),
    }
}

fn argument_error(func: &str, message: &str) -> CoreError {
    CoreError::config(format!("init '{func}': {message}"))
}

fn handler_error(func: &str, message: &str) -> CoreError {
    CoreError::new(
        CoreErrorKind::InitializationFailed,
        format!("init '{func}': {message}"),
    )
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, Value, json};

    use super::{InitRegistry, command_argv, expand_home, reap_detached};
    use crate::models::TaskSort;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("test helper takes objects"),
        }
    }

    #[test]
    fn global_handlers_depend_on_sort() {
        let raw: Vec<_> = InitRegistry::global(TaskSort::Raw).names().map(str::to_string).collect();
        let vm: Vec<_> = InitRegistry::global(TaskSort::Vm).names().map(str::to_string).collect();
        assert_eq!(raw, vec!["download", "execute", "launch", "touch"]);
        assert_eq!(vm, vec!["execute", "launch", "touch"]);
    }

    #[test]
    fn local_handlers_override_global_ones() {
        let local = InitRegistry::new().with("touch", |_, _| Ok(false));
        let registry = InitRegistry::global(TaskSort::Raw).overlay(&local);
        assert!(registry.get("download").is_some());
        assert!(std::sync::Arc::ptr_eq(
            registry.get("touch").unwrap(),
            local.get("touch").unwrap()
        ));
    }

    #[test]
    fn command_forms() {
        let (argv, shell) = command_argv(&object(json!({"command": "echo  hi"}))).unwrap();
        assert_eq!(argv, vec!["echo", "hi"]);
        assert!(!shell);

        let (argv, shell) =
            command_argv(&object(json!({"command": "echo hi | wc", "shell": true}))).unwrap();
        assert_eq!(argv, vec!["echo hi | wc"]);
        assert!(shell);

        let (argv, _) = command_argv(&object(json!({"command": ["ls", "-l"]}))).unwrap();
        assert_eq!(argv, vec!["ls", "-l"]);

        assert!(command_argv(&object(json!({"command": "  "}))).is_err());
        assert!(command_argv(&object(json!({"command": 3}))).is_err());
        assert!(command_argv(&object(json!({}))).is_err());
    }

    #[test]
    fn only_home_prefix_is_expanded() {
        assert_eq!(expand_home("/tmp/a"), std::path::PathBuf::from("/tmp/a"));
        assert_eq!(expand_home("a~/b"), std::path::PathBuf::from("a~/b"));
    }

    #[cfg(unix)]
    #[test]
    fn launched_programs_are_waited_for() {
        let child = std::process::Command::new("/bin/sh")
            .args(["-c", "exit 4"])
            .spawn()
            .unwrap();

        let reaper = reap_detached(child, "launch").unwrap();
        let status = reaper.join().unwrap().expect("exit status should be collected");

        assert_eq!(status.code(), Some(4));
    }
}
