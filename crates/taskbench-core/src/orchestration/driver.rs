//! Builds a run from a tasks tree and executes it task by task.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;

use crate::agent::ProposerHandle;
use crate::config::DriverConfig;
use crate::execution::BoundedExecutor;
use crate::models::{Category, CoreError, TaskDefinition};
use crate::orchestration::OrchestrationResult;
use crate::orchestration::counter::RunCounter;
use crate::orchestration::descriptor::{TaskDescriptor, order};
use crate::orchestration::discovery::{DiscoveredFile, discover, load_definitions, select};
use crate::orchestration::group::TaskGroups;
use crate::persistence::{CompletionRecord, CompletionStore, FsCompletionStore};
use crate::session::SessionHandle;
use crate::sqlite::SqliteCompletionStore;
use crate::task::{CategoryEvaluator, InitRegistry, Task, TaskBinding, TaskResult};

/// File name the session's recording of a task is written to, inside the task's log dir.
pub const RECORDING_FILE: &str = "record.mp4";

pub type SessionFactory = Arc<dyn Fn() -> TaskResult<SessionHandle> + Send + Sync>;

/// How a category's tasks get their session, local init handlers and evaluator.
#[derive(Clone)]
pub struct CategoryEntry {
    pub session: SessionFactory,
    pub local_init: InitRegistry,
    pub evaluator: Arc<dyn CategoryEvaluator>,
}

impl CategoryEntry {
    pub fn new<F>(session: F, evaluator: Arc<dyn CategoryEvaluator>) -> Self
    where
        F: Fn() -> TaskResult<SessionHandle> + Send + Sync + 'static,
    {
        Self {
            session: Arc::new(session),
            local_init: InitRegistry::new(),
            evaluator,
        }
    }

    pub fn local_init(mut self, registry: InitRegistry) -> Self {
        self.local_init = registry;
        self
    }
}

/// The categories a run knows how to drive, plus the proposer all tasks share.
#[derive(Clone)]
pub struct Catalog {
    proposer: ProposerHandle,
    categories: BTreeMap<Category, CategoryEntry>,
}

impl Catalog {
    pub fn new(proposer: ProposerHandle) -> Self {
        Self {
            proposer,
            categories: BTreeMap::new(),
        }
    }

    pub fn register(mut self, category: Category, entry: CategoryEntry) -> Self {
        self.categories.insert(category, entry);
        self
    }

    pub fn get(&self, category: &Category) -> Option<&CategoryEntry> {
        self.categories.get(category)
    }
}

#[derive(Debug)]
pub enum PlanOutcome {
    Checked { tasks: usize },
    Ran(RunCounter),
    Failed(CoreError),
}

pub struct Tester {
    config: DriverConfig,
    store: Box<dyn CompletionStore>,
    descriptors: Vec<TaskDescriptor>,
    rejected: Vec<(PathBuf, CoreError)>,
}

impl Tester {
    /// Discovers, shards and loads the configured tasks. Only invalid driver parameters
    /// fail; per-file problems are logged and the file is left out.
    pub fn new(config: DriverConfig, catalog: &Catalog) -> OrchestrationResult<Self> {
        let store = open_store(&config)?;
        Self::with_store(config, catalog, store)
    }

    pub fn with_store(
        config: DriverConfig,
        catalog: &Catalog,
        store: Box<dyn CompletionStore>,
    ) -> OrchestrationResult<Self> {
        config.validate()?;

        let files = select(
            discover(&config.tasks_path)?,
            &config.exclude,
            config.shards,
            config.shard_index,
        )?;
        let definitions = load_definitions(files);
        let mut rejected = definitions.rejected;

        let executor = BoundedExecutor::new();
        let mut sessions: BTreeMap<Category, SessionHandle> = BTreeMap::new();
        let mut descriptors = Vec::new();

        for (file, definition) in definitions.loaded {
            let path = file.path.clone();
            match build_descriptor(file, definition, &config, catalog, &executor, &mut sessions) {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(error) => {
                    tracing::error!(
                        path = %path.display(),
                        kind = ?error.kind,
                        message = %error.message,
                        "task loading failed; skipped"
                    );
                    rejected.push((path, error));
                }
            }
        }

        order(&mut descriptors);
        tracing::info!(
            tasks = descriptors.len(),
            rejected = rejected.len(),
            "task plan built"
        );

        Ok(Self {
            config,
            store,
            descriptors,
            rejected,
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn descriptors(&self) -> &[TaskDescriptor] {
        &self.descriptors
    }

    /// Definition files left out of the run and why.
    pub fn rejected(&self) -> &[(PathBuf, CoreError)] {
        &self.rejected
    }

    /// Runs every task once, sequentially, and returns the tally.
    pub fn run(&mut self) -> RunCounter {
        let counter = run_descriptors(
            &mut self.descriptors,
            &*self.store,
            self.config.ignore,
            self.config.optimize,
        );

        tracing::info!(summary = %counter, "run finished");
        let cooldown = self.config.task.pacing.cooldown();
        if !cooldown.is_zero() {
            std::thread::sleep(cooldown);
        }
        counter
    }

    /// Builds and, unless `check_only`, runs each configuration in order. A configuration
    /// that fails does not stop the ones after it.
    pub fn plan(
        configs: impl IntoIterator<Item = DriverConfig>,
        check_only: bool,
        catalog: &Catalog,
    ) -> Vec<PlanOutcome> {
        configs
            .into_iter()
            .map(|config| {
                let outcome = Self::new(config, catalog).and_then(|mut tester| {
                    if check_only {
                        Ok(PlanOutcome::Checked {
                            tasks: tester.descriptors().len(),
                        })
                    } else {
                        Ok(PlanOutcome::Ran(tester.run()))
                    }
                });

                outcome.unwrap_or_else(|error| {
                    tracing::error!(
                        kind = ?error.kind,
                        message = %error.message,
                        "plan entry failed"
                    );
                    PlanOutcome::Failed(error)
                })
            })
            .collect()
    }
}

/// Completion store a configuration asks for, migrated and ready to use.
pub fn open_store(config: &DriverConfig) -> OrchestrationResult<Box<dyn CompletionStore>> {
    match &config.results_db {
        Some(path) => {
            let store = SqliteCompletionStore::new(path);
            store.migrate_to_latest()?;
            Ok(Box::new(store))
        }
        None => Ok(Box::new(FsCompletionStore::new(&config.logs_path))),
    }
}

fn build_descriptor(
    file: DiscoveredFile,
    definition: TaskDefinition,
    config: &DriverConfig,
    catalog: &Catalog,
    executor: &BoundedExecutor,
    sessions: &mut BTreeMap<Category, SessionHandle>,
) -> TaskResult<TaskDescriptor> {
    let category = definition.category();
    let entry = catalog.get(&category).ok_or_else(|| {
        CoreError::config(format!("no session is registered for category '{category}'"))
    })?;

    let session = match sessions.get(&category) {
        Some(session) => session.clone(),
        None => {
            let session = (entry.session)()?;
            sessions.insert(category.clone(), session.clone());
            session
        }
    };

    let binding = TaskBinding {
        session,
        proposer: catalog.proposer.clone(),
        local_init: entry.local_init.clone(),
        evaluator: entry.evaluator.clone(),
    };
    let task = Task::new(definition, binding, config.task.clone(), executor.clone())?;
    let mut descriptor = TaskDescriptor::new(&file.infix, task);
    let recording = config.logs_path.join(descriptor.ident()).join(RECORDING_FILE);
    descriptor.task_mut().set_record_path(recording);

    Ok(descriptor)
}

/// Executes `descriptors` in order, inside shared group sessions when `optimize` is set.
/// Groups that fail the session check fall back to running every task on its own.
fn run_descriptors(
    descriptors: &mut Vec<TaskDescriptor>,
    store: &dyn CompletionStore,
    ignore: bool,
    optimize: bool,
) -> RunCounter {
    let mut counter = RunCounter::default();

    if optimize {
        let mut groups = TaskGroups::new(std::mem::take(descriptors));
        let grouped = groups.run(store, ignore, |descriptor| {
            execute(descriptor, store, ignore, &mut counter)
        });
        *descriptors = groups.into_descriptors();

        match grouped {
            Ok(()) => return counter,
            Err(error) => tracing::error!(
                kind = ?error.kind,
                message = %error.message,
                "task groups are inconsistent; running tasks one by one"
            ),
        }
    }

    for descriptor in descriptors.iter_mut() {
        execute(descriptor, store, ignore, &mut counter);
    }
    counter
}

fn execute(
    descriptor: &mut TaskDescriptor,
    store: &dyn CompletionStore,
    ignore: bool,
    counter: &mut RunCounter,
) {
    let ident = descriptor.ident().to_string();

    if ignore {
        match store.is_complete(&ident) {
            Ok(true) => {
                counter.ignore(&ident);
                return;
            }
            Ok(false) => {}
            Err(error) => tracing::warn!(
                ident = %ident,
                message = %error.message,
                "completion lookup failed; running task"
            ),
        }
    } else if let Err(error) = store.clear(&ident) {
        tracing::warn!(ident = %ident, message = %error.message, "failed to clear earlier result");
    }

    match catch_unwind(AssertUnwindSafe(|| descriptor.run())) {
        Ok(Ok(passed)) => {
            if passed {
                counter.pass(&ident);
            } else {
                counter.fail(&ident);
            }

            let record =
                CompletionRecord::new(&ident, passed).category(descriptor.category().to_string());
            if let Err(error) = store.record(&record) {
                tracing::error!(ident = %ident, message = %error.message, "failed to record result");
            }
        }
        Ok(Err(error)) => counter.skip(&ident, &error),
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|text| (*text).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            counter.skip(&ident, &format_args!("task panicked: {reason}"));
        }
    }
}
