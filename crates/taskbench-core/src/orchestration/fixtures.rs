//! Small sessions and tasks shared by the orchestration unit tests.

use std::sync::{Arc, Mutex};

use crate::agent::{ActionProposer, CodeAction, CodeBlock, Proposal, ProposalRequest, ProposalResult};
use crate::config::{Pacing, TaskOptions};
use crate::execution::BoundedExecutor;
use crate::models::TaskDefinition;
use crate::orchestration::descriptor::TaskDescriptor;
use crate::session::{Observation, ObservationKind, Session, SessionHandle, SessionResult};
use crate::task::{InitRegistry, StopOnlyEvaluator, Task, TaskBinding};

#[derive(Default)]
pub(crate) struct StubSession {
    pub agnostic: bool,
    pub entered: bool,
    pub enters: usize,
}

impl Session for StubSession {
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
        Ok(())
    }

    fn observe(&mut self, _kind: ObservationKind) -> SessionResult<Observation> {
        Ok(Observation::Text(String::new()))
    }

    fn execute(&mut self, _code: &str) -> SessionResult<Option<bool>> {
        Ok(None)
    }

    fn instance_agnostic(&self) -> bool {
        self.agnostic
    }
}

struct FinishingProposer;

impl ActionProposer for FinishingProposer {
    fn propose(&mut self, _request: ProposalRequest<'_>) -> ProposalResult<Proposal> {
        let done: Box<dyn CodeAction> = Box::new(CodeBlock::new("DONE"));
        Ok(Proposal::Actions(vec![done]))
    }
}

pub(crate) fn stub_session(agnostic: bool) -> (Arc<Mutex<StubSession>>, SessionHandle) {
    let session = Arc::new(Mutex::new(StubSession {
        agnostic,
        ..StubSession::default()
    }));
    let handle: SessionHandle = session.clone();
    (session, handle)
}

/// A `Raw:Shell` task that stops with `DONE` on its first step and expects exactly that.
pub(crate) fn finishing_descriptor(name: &str, session: SessionHandle) -> TaskDescriptor {
    let body = r#"{"type": "Shell", "sort": "Raw", "steps": 2, "instruction": "Finish.",
        "version": "1.0", "initialize": [], "evaluate": [{"type": "stop", "value": "DONE"}]}"#;
    let definition = TaskDefinition::from_json_str(name, body).expect("definition should parse");
    let binding = TaskBinding {
        session,
        proposer: Arc::new(Mutex::new(FinishingProposer)),
        local_init: InitRegistry::new(),
        evaluator: Arc::new(StopOnlyEvaluator),
    };
    let options = TaskOptions {
        pacing: Pacing::IMMEDIATE,
        ..TaskOptions::default()
    };
    let task = Task::new(definition, binding, options, BoundedExecutor::new())
        .expect("task should build");
    TaskDescriptor::new("shell", task)
}
