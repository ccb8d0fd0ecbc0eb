//! One benchmark episode: initialize the target, let the proposer act, judge the result.

pub mod eval;
pub mod init;

pub use eval::{CategoryEvaluator, EvalOutcome, StopOnlyEvaluator, scan_rules};
pub use init::{InitContext, InitHandler, InitRegistry, InitResult};

use std::collections::BTreeSet;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::{
    ActionProposer, CodeAction, Proposal, ProposalRequest, ProposerHandle, StepProgress,
    lock_proposer,
};
use crate::config::TaskOptions;
use crate::execution::BoundedExecutor;
use crate::models::{
    ActionOutcome, ActionResult, AllowedActions, Category, CoreError, CoreErrorKind, EvalRule,
    Primitive, StopSignal, TaskDefinition, TaskSort, TaskState,
};
use crate::session::{
    MarkTag, Observation, ObservationKind, Observations, SessionGuard, SessionHandle,
    lock_session,
};

pub type TaskResult<T> = Result<T, CoreError>;

/// Initialization attempts before a task gives up.
pub const CONFIG_RETRY: usize = 5;

/// Everything a category supplies to the tasks it owns.
#[derive(Clone)]
pub struct TaskBinding {
    pub session: SessionHandle,
    pub proposer: ProposerHandle,
    pub local_init: InitRegistry,
    pub evaluator: Arc<dyn CategoryEvaluator>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StepOutcome {
    Continued { liquid: bool },
    Stopped(StopSignal),
}

pub struct Task {
    definition: TaskDefinition,
    category: Category,
    steps: u32,
    rules: Vec<EvalRule>,
    allowed: AllowedActions,
    observation_kinds: BTreeSet<ObservationKind>,
    init: InitRegistry,
    session: SessionHandle,
    proposer: ProposerHandle,
    evaluator: Arc<dyn CategoryEvaluator>,
    executor: BoundedExecutor,
    options: TaskOptions,
    record_path: Option<PathBuf>,
    state: TaskState,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Task")
            .field("name", &self.definition.name)
            .field("category", &self.category)
            .field("steps", &self.steps)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Task {
    pub fn new(
        definition: TaskDefinition,
        binding: TaskBinding,
        options: TaskOptions,
        executor: BoundedExecutor,
    ) -> TaskResult<Self> {
        let category = definition.category();
        let is_gui = {
            let session = lock_session(&binding.session);
            if session.version() != definition.version {
                return Err(CoreError::config(format!(
                    "task '{}' targets version {} but the session runs {}",
                    definition.name,
                    definition.version,
                    session.version()
                ))
                .attributed(&definition.name, &category));
            }
            session.is_gui()
        };

        binding
            .evaluator
            .validate(&definition.evaluate)
            .map_err(|error| error.attributed(&definition.name, &category))?;

        let mut allowed = AllowedActions::standard();
        if options.expose_answer {
            allowed.insert(Primitive::Ans);
        }
        for rule in &definition.evaluate {
            if let EvalRule::EarlyStop { expected, .. } = rule {
                allowed.insert(Primitive::from(*expected));
            }
        }

        let observation_kinds = match definition.sort {
            TaskSort::Vm => options.observation_kinds.clone(),
            TaskSort::Raw if is_gui => BTreeSet::from([ObservationKind::Screenshot]),
            TaskSort::Raw => BTreeSet::from([ObservationKind::Textual]),
        };

        Ok(Self {
            steps: definition.steps,
            rules: definition.evaluate.clone(),
            init: InitRegistry::global(definition.sort).overlay(&binding.local_init),
            category,
            allowed,
            observation_kinds,
            session: binding.session,
            proposer: binding.proposer,
            evaluator: binding.evaluator,
            executor,
            options,
            record_path: None,
            state: TaskState::Loaded,
            definition,
        })
    }

    /// Where the session should leave its recording of the step loop.
    pub fn set_record_path(&mut self, path: impl Into<PathBuf>) {
        self.record_path = Some(path.into());
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn category(&self) -> &Category {
        &self.category
    }

    pub fn definition(&self) -> &TaskDefinition {
        &self.definition
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Current step budget; lowered by penalties.
    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn allowed_actions(&self) -> &AllowedActions {
        &self.allowed
    }

    pub fn observation_kinds(&self) -> &BTreeSet<ObservationKind> {
        &self.observation_kinds
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Runs the whole episode and returns the verdict.
    ///
    /// Enters the session unless it is already entered by an enclosing group, in which
    /// case it is resumed and left entered.
    pub fn run(&mut self) -> TaskResult<bool> {
        tracing::info!(
            task = %self.definition.name,
            category = %self.category,
            instruction = %self.definition.instruction,
            "task started"
        );

        let entered = lock_session(&self.session).is_entered();
        let _guard = if entered {
            lock_session(&self.session).resume().map_err(|error| self.attribute(error))?;
            None
        } else {
            Some(SessionGuard::enter(&self.session).map_err(|error| self.attribute(error))?)
        };

        self.initialize()?;
        let signal = if self.options.manual {
            self.manual_signal()?
        } else {
            self.predict()?
        };

        tracing::info!(
            task = %self.definition.name,
            stop = %signal.kind,
            "starting evaluation"
        );
        self.evaluate(&signal)
    }

    /// Brings the target to the task's starting condition, retrying from a fresh
    /// baseline up to [`CONFIG_RETRY`] times.
    pub fn initialize(&mut self) -> TaskResult<()> {
        self.transition(TaskState::Loaded, TaskState::Initializing)?;

        for attempt in 1..=CONFIG_RETRY {
            if self.initialize_attempt(attempt) {
                self.state = TaskState::Ready;
                tracing::debug!(task = %self.definition.name, attempt, "task initialized");
                return Ok(());
            }
        }

        Err(self.attribute(CoreError::new(
            CoreErrorKind::InitializationFailed,
            format!("initialization failed after {CONFIG_RETRY} attempts"),
        )))
    }

    fn initialize_attempt(&self, attempt: usize) -> bool {
        let name = self.definition.name.as_str();

        match lock_session(&self.session).reset_baseline(self.definition.snapshot.as_deref()) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(task = name, attempt, "baseline reset declined");
                return false;
            }
            Err(error) => {
                tracing::warn!(
                    task = name,
                    attempt,
                    kind = ?error.kind,
                    message = %error.message,
                    "baseline reset failed"
                );
                return false;
            }
        }

        for call in &self.definition.initialize {
            pause(self.options.pacing.action_interval());

            let Some(handler) = self.init.get(&call.func) else {
                tracing::error!(task = name, func = %call.func, "no init handler with this name");
                return false;
            };

            let outcome = {
                let mut session = lock_session(&self.session);
                let mut context = InitContext {
                    session: &mut *session,
                    executor: &self.executor,
                    task: name,
                    timeout: self.options.init_timeout(),
                };
                (**handler)(&mut context, &call.args)
            };
            pause(call.wait);

            match outcome {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(task = name, attempt, func = %call.func, "init call reported failure");
                    return false;
                }
                Err(error) => {
                    tracing::error!(
                        task = name,
                        attempt,
                        func = %call.func,
                        kind = ?error.kind,
                        message = %error.message,
                        "init call failed"
                    );
                    return false;
                }
            }
        }

        true
    }

    /// Runs the step loop until a stop primitive fires or the budget runs out.
    pub fn predict(&mut self) -> TaskResult<StopSignal> {
        self.transition(TaskState::Ready, TaskState::Stepping)?;

        lock_session(&self.session).record_start();
        let outcome = self.step_loop();
        if let Some(path) = &self.record_path {
            lock_session(&self.session).record_stop(path);
        }

        outcome.map_err(|error| self.attribute(error))
    }

    fn step_loop(&mut self) -> TaskResult<StopSignal> {
        let penalty = self.definition.penalty;
        let mut liquid = 0u32;
        let mut index = 0u32;

        while index < self.steps {
            let is_liquid = match self.step(index)? {
                StepOutcome::Stopped(signal) => return Ok(signal),
                StepOutcome::Continued { liquid } => liquid,
            };
            index += 1;

            liquid = if is_liquid { liquid + 1 } else { 0 };
            if liquid >= penalty.threshold {
                liquid = 0;
                self.steps = self.steps.saturating_sub(penalty.reduction).max(index);
                tracing::warn!(
                    task = %self.definition.name,
                    steps = self.steps,
                    threshold = penalty.threshold,
                    "step budget reduced after consecutive ineffective steps"
                );
            }
        }

        Ok(StopSignal::timeout())
    }

    /// One observe → propose → act cycle. A step is liquid when no action in it was
    /// effective or undecided.
    pub fn step(&mut self, index: u32) -> TaskResult<StepOutcome> {
        let (observations, mark_tags) = self.observe()?;
        let timeout = lock_session(&self.session).proposal_timeout();

        let proposal = {
            let mut proposer = lock_proposer(&self.proposer);
            propose(
                &mut *proposer,
                ProposalRequest {
                    progress: StepProgress {
                        index,
                        budget: self.steps,
                    },
                    instruction: &self.definition.instruction,
                    observations: &observations,
                    allowed: &self.allowed,
                    mark_tags: mark_tags.as_deref(),
                    category: &self.category,
                    timeout,
                },
            )?
        };

        let (batches, refresh) = match proposal {
            Proposal::Actions(actions) => (vec![actions], false),
            Proposal::Batches(batches) => (batches, true),
        };

        let mut liquid = true;
        for batch in &batches {
            for action in batch {
                match self.invoke(action.as_ref())? {
                    ActionResult::Stop(signal) => return Ok(StepOutcome::Stopped(signal)),
                    ActionResult::Continue(ActionOutcome::NoOp) => {}
                    ActionResult::Continue(_) => liquid = false,
                }
            }

            if refresh {
                let (observations, _) = self.observe()?;
                tracing::debug!(
                    task = %self.definition.name,
                    step = index,
                    kinds = ?observations.keys().collect::<Vec<_>>(),
                    "observation refreshed after batch"
                );
            }
        }

        Ok(StepOutcome::Continued { liquid })
    }

    fn invoke(&self, action: &dyn CodeAction) -> TaskResult<ActionResult> {
        tracing::debug!(task = %self.definition.name, action = ?action, "invoking action");
        let result = {
            let mut session = lock_session(&self.session);
            action.invoke(&mut *session, &self.allowed)?
        };
        if matches!(result, ActionResult::Continue(_)) {
            pause(self.options.pacing.action_interval());
        }
        Ok(result)
    }

    fn observe(&self) -> TaskResult<(Observations, Option<Vec<MarkTag>>)> {
        let mut session = lock_session(&self.session);
        let mut observations = Observations::new();
        let mut mark_tags = None;

        for kind in &self.observation_kinds {
            match session.observe(*kind)? {
                Observation::Marks {
                    tags,
                    image,
                    a11y_tree,
                } => {
                    observations.insert(ObservationKind::SetOfMarks, Observation::Image(image));
                    observations.insert(ObservationKind::A11yTree, Observation::Text(a11y_tree));
                    mark_tags = Some(tags);
                }
                observation => {
                    observations.insert(*kind, observation);
                }
            }
        }

        Ok((observations, mark_tags))
    }

    /// Judges the stop signal the episode produced. Every early-stop rule is checked
    /// here; domain rules go to the category evaluator in one call once all of them
    /// matched. Only legal right after the step loop (or manual stop) finished.
    pub fn evaluate(&mut self, signal: &StopSignal) -> TaskResult<bool> {
        self.transition(TaskState::Stepping, TaskState::Evaluating)?;

        let verdict = match scan_rules(&mut self.rules, signal) {
            EvalOutcome::Matched(verdict) => verdict,
            EvalOutcome::Deferred(rules) => {
                let mut session = lock_session(&self.session);
                self.evaluator.evaluate(&mut *session, &rules)
            }
        };

        self.state = if verdict {
            TaskState::Passed
        } else {
            TaskState::Failed
        };
        tracing::info!(task = %self.definition.name, verdict, "task evaluated");
        Ok(verdict)
    }

    fn manual_signal(&mut self) -> TaskResult<StopSignal> {
        self.transition(TaskState::Ready, TaskState::Stepping)?;
        if let Some(answer) = &self.definition.answer {
            tracing::info!(task = %self.definition.name, answer = %answer, "reference answer");
        }

        eprint!("Finish task manually: ");
        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|error| {
                self.attribute(CoreError::new(
                    CoreErrorKind::Internal,
                    format!("failed to read manual stop signal: {error}"),
                ))
            })?;

        Ok(StopSignal::parse_manual(&line))
    }

    fn transition(&mut self, expected: TaskState, next: TaskState) -> TaskResult<()> {
        if self.state != expected {
            return Err(self.attribute(transition_error(self.state, next)));
        }
        self.state = next;
        Ok(())
    }

    fn attribute(&self, error: CoreError) -> CoreError {
        error.attributed(&self.definition.name, &self.category)
    }
}

fn propose(
    proposer: &mut dyn ActionProposer,
    request: ProposalRequest<'_>,
) -> TaskResult<Proposal> {
    proposer.propose(request).map_err(|error| match error.kind {
        CoreErrorKind::ProposalFailure | CoreErrorKind::Timeout => error,
        _ => CoreError::new(CoreErrorKind::ProposalFailure, error.to_string()),
    })
}

fn transition_error(from: TaskState, to: TaskState) -> CoreError {
    CoreError::new(
        CoreErrorKind::InvalidInput,
        format!("cannot move task from {from:?} to {to:?}"),
    )
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        std::thread::sleep(duration);
    }
}
