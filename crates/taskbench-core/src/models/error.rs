use crate::models::Category;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    InvalidConfig,
    InitializationFailed,
    InvalidInput,
    Timeout,
    SessionFailure,
    ProposalFailure,
    ProcessFailure,
    StorageFailure,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub task: Option<String>,
    pub category: Option<Category>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            task: None,
            category: None,
            kind,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::InvalidConfig, message)
    }

    /// Fills in task attribution without overwriting what the origin already set.
    pub fn attributed(self, task: &str, category: &Category) -> Self {
        Self {
            task: self.task.or_else(|| Some(task.to_string())),
            category: self.category.or_else(|| Some(category.clone())),
            kind: self.kind,
            message: self.message,
        }
    }
}
