use crate::models::{Category, TaskSort};
use crate::orchestration::OrchestrationResult;
use crate::persistence::CompletionStore;
use crate::task::{Task, TaskResult};

/// A loaded task together with its run-wide identifier.
#[derive(Debug)]
pub struct TaskDescriptor {
    ident: String,
    task: Task,
}

impl TaskDescriptor {
    /// `infix` is the task's directory relative to the tasks root, `/`-separated.
    pub fn new(infix: &str, task: Task) -> Self {
        Self {
            ident: task_ident(infix, task.name()),
            task,
        }
    }

    pub fn ident(&self) -> &str {
        &self.ident
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn task_mut(&mut self) -> &mut Task {
        &mut self.task
    }

    pub fn category(&self) -> &Category {
        self.task.category()
    }

    pub fn sort_key(&self) -> (TaskSort, &str) {
        let category = self.task.category();
        (category.sort, category.kind.as_str())
    }

    /// True when the store has no record for this task yet.
    pub fn snoop(&self, store: &dyn CompletionStore) -> OrchestrationResult<bool> {
        Ok(!store.is_complete(&self.ident)?)
    }

    pub fn run(&mut self) -> TaskResult<bool> {
        self.task.run()
    }
}

pub fn task_ident(infix: &str, name: &str) -> String {
    let infix = infix.trim_matches('/');
    if infix.is_empty() {
        name.to_string()
    } else {
        format!("{infix}/{name}")
    }
}

/// Stable sort by `(sort, type)`; `Raw` first, discovery order kept within a key.
pub fn order(descriptors: &mut [TaskDescriptor]) {
    descriptors.sort_by(|left, right| left.sort_key().cmp(&right.sort_key()));
}
