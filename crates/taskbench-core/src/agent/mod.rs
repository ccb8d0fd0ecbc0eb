//! Seam to the component that turns observations into actions.

use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::models::{
    ActionOutcome, ActionResult, AllowedActions, Category, CoreError, Primitive, StopSignal,
};
use crate::session::{MarkTag, Observations, Session};

pub type ProposalResult<T> = Result<T, CoreError>;

pub type ProposerHandle = Arc<Mutex<dyn ActionProposer>>;

/// Seconds a bare `WAIT` pauses for.
pub const DEFAULT_WAIT_SECS: u64 = 5;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StepProgress {
    pub index: u32,
    pub budget: u32,
}

pub struct ProposalRequest<'a> {
    pub progress: StepProgress,
    pub instruction: &'a str,
    pub observations: &'a Observations,
    pub allowed: &'a AllowedActions,
    pub mark_tags: Option<&'a [MarkTag]>,
    pub category: &'a Category,
    pub timeout: Duration,
}

pub enum Proposal {
    Actions(Vec<Box<dyn CodeAction>>),
    /// Debug mode: batches run back to back with an observation refresh after each.
    Batches(Vec<Vec<Box<dyn CodeAction>>>),
}

pub trait ActionProposer: Send {
    fn propose(&mut self, request: ProposalRequest<'_>) -> ProposalResult<Proposal>;
}

pub trait CodeAction: Debug + Send {
    fn invoke(
        &self,
        session: &mut dyn Session,
        allowed: &AllowedActions,
    ) -> ProposalResult<ActionResult>;
}

pub fn lock_proposer(handle: &ProposerHandle) -> MutexGuard<'_, dyn ActionProposer + 'static> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A block of target code, or a primitive when it starts with an allowed primitive name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CodeBlock {
    pub code: String,
    pub prefix: String,
}

impl CodeBlock {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            prefix: String::new(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn script(&self) -> String {
        [self.prefix.trim(), self.code.as_str()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn invoke_primitive(&self, primitive: Primitive) -> ActionResult {
        let mut words = self.code.split_whitespace().skip(1);
        if let Some(kind) = primitive.stop_kind() {
            return ActionResult::Stop(StopSignal::new(kind, words));
        }

        if primitive == Primitive::Wait {
            let span = match words.next().map(str::parse::<u64>) {
                None => Some(DEFAULT_WAIT_SECS),
                Some(Ok(secs)) => Some(secs),
                Some(Err(_)) => None,
            };
            match span {
                Some(secs) => std::thread::sleep(Duration::from_secs(secs)),
                None => tracing::error!(code = %self.code, "malformed WAIT primitive"),
            }
        }

        ActionResult::Continue(ActionOutcome::Undecided)
    }
}

impl CodeAction for CodeBlock {
    fn invoke(
        &self,
        session: &mut dyn Session,
        allowed: &AllowedActions,
    ) -> ProposalResult<ActionResult> {
        if let Some(primitive) = allowed.match_code(&self.code) {
            return Ok(self.invoke_primitive(primitive));
        }

        let outcome = session.execute(&self.script())?;
        Ok(ActionResult::Continue(ActionOutcome::from(outcome)))
    }
}
