//! Contract for the controllable targets tasks drive.
//!
//! A session is entered once per task, or once per task group when consecutive tasks
//! can share it, and exited on every path through [`SessionGuard`].

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{CoreError, CoreErrorKind};

pub type SessionResult<T> = Result<T, CoreError>;

/// Shared handle; tasks of one group hold clones of the same handle.
pub type SessionHandle = Arc<Mutex<dyn Session>>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationKind {
    Textual,
    Screenshot,
    A11yTree,
    SetOfMarks,
    Schedule,
}

/// Pixel box `(x, y, width, height)` of one interactable element.
pub type MarkTag = [i64; 4];

#[derive(Clone, Debug, PartialEq)]
pub enum Observation {
    Text(String),
    Image(Vec<u8>),
    /// Annotated screenshot; split into image + accessibility tree before proposing.
    Marks {
        tags: Vec<MarkTag>,
        image: Vec<u8>,
        a11y_tree: String,
    },
}

pub type Observations = BTreeMap<ObservationKind, Observation>;

pub trait Session: Send {
    fn version(&self) -> &str;

    fn is_gui(&self) -> bool;

    fn is_entered(&self) -> bool;

    fn enter(&mut self) -> SessionResult<()>;

    fn exit(&mut self) -> SessionResult<()>;

    /// Called instead of `enter` when a task starts inside an already-entered session.
    fn resume(&mut self) -> SessionResult<()> {
        Ok(())
    }

    /// Returns the target to the state every task initializes from. The default
    /// restarts the session.
    fn reset_baseline(&mut self, _snapshot: Option<&str>) -> SessionResult<bool> {
        self.exit()?;
        self.enter()?;
        Ok(true)
    }

    fn observe(&mut self, kind: ObservationKind) -> SessionResult<Observation>;

    /// Executes target code. `Some(true)` effective, `Some(false)` no-op or failure,
    /// `None` when the effect cannot be classified.
    fn execute(&mut self, code: &str) -> SessionResult<Option<bool>>;

    fn write_file(&mut self, _path: &str, _data: &str) -> SessionResult<bool> {
        Err(unsupported("write_file"))
    }

    fn run_command(&mut self, _command: &[String], _shell: bool) -> SessionResult<bool> {
        Err(unsupported("run_command"))
    }

    /// Starts a long-running program inside the target without waiting for it.
    fn launch(&mut self, _command: &[String], _shell: bool) -> SessionResult<bool> {
        Err(unsupported("launch"))
    }

    fn record_start(&mut self) {}

    fn record_stop(&mut self, _destination: &Path) {}

    /// True when tasks of different session instances of this kind may still share one
    /// group, e.g. stateless targets.
    fn instance_agnostic(&self) -> bool {
        false
    }

    /// Wall-clock budget handed to the proposer for each step.
    fn proposal_timeout(&self) -> Duration {
        Duration::from_secs(480)
    }
}

/// Locks a session, recovering from poisoning so a panic in one task does not
/// disable the session for the rest of the run.
pub fn lock_session(handle: &SessionHandle) -> MutexGuard<'_, dyn Session + 'static> {
    handle.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
        tracing::warn!("recovering session lock poisoned by an earlier panic");
        poisoned.into_inner()
    })
}

/// Keeps a session entered for its lifetime.
pub struct SessionGuard {
    handle: SessionHandle,
}

impl SessionGuard {
    pub fn enter(handle: &SessionHandle) -> SessionResult<Self> {
        lock_session(handle).enter()?;
        Ok(Self {
            handle: handle.clone(),
        })
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Err(error) = lock_session(&self.handle).exit() {
            tracing::warn!(
                kind = ?error.kind,
                message = %error.message,
                "failed to exit session"
            );
        }
    }
}

pub fn same_session(first: &SessionHandle, second: &SessionHandle) -> bool {
    Arc::ptr_eq(first, second)
}

fn unsupported(operation: &str) -> CoreError {
    CoreError::new(
        CoreErrorKind::SessionFailure,
        format!("session does not support '{operation}'"),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{
        Observation, ObservationKind, Session, SessionGuard, SessionHandle, SessionResult,
        same_session,
    };

    #[derive(Default)]
    struct CountingSession {
        entered: bool,
        enters: usize,
        exits: usize,
    }

    impl Session for CountingSession {
        fn version(&self) -> &str {
            "1.0"
        }

        fn is_gui(&self) -> bool {
            false
        }

        fn is_entered(&self) -> bool {
            self.entered
        }

        fn enter(&mut self) -> SessionResult<()> {
            self.entered = true;
            self.enters += 1;
            Ok(())
        }

        fn exit(&mut self) -> SessionResult<()> {
            self.entered = false;
            self.exits += 1;
            Ok(())
        }

        fn observe(&mut self, _kind: ObservationKind) -> SessionResult<Observation> {
            Ok(Observation::Text(String::new()))
        }

        fn execute(&mut self, _code: &str) -> SessionResult<Option<bool>> {
            Ok(None)
        }
    }

    #[test]
    fn guard_exits_on_drop_even_when_unwinding() {
        let session = Arc::new(Mutex::new(CountingSession::default()));
        let handle: SessionHandle = session.clone();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = SessionGuard::enter(&handle).unwrap();
            panic!("task blew up");
        }));

        assert!(outcome.is_err());
        let session = session.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        assert_eq!(session.enters, 1);
        assert_eq!(session.exits, 1);
        assert!(!session.entered);
    }

    #[test]
    fn default_baseline_reset_restarts_the_session() {
        let mut session = CountingSession::default();
        session.enter().unwrap();
        assert!(session.reset_baseline(None).unwrap());
        assert_eq!(session.enters, 2);
        assert_eq!(session.exits, 1);
        assert!(session.entered);
    }

    #[test]
    fn session_identity_is_pointer_identity() {
        let first: SessionHandle = Arc::new(Mutex::new(CountingSession::default()));
        let second: SessionHandle = Arc::new(Mutex::new(CountingSession::default()));
        assert!(same_session(&first, &first.clone()));
        assert!(!same_session(&first, &second));
    }
}
