//! Durable record of finished tasks, keyed by task identifier.

pub mod fs_store;

pub use fs_store::{FsCompletionStore, RESULT_FILE};

use std::time::SystemTime;

use crate::models::CoreError;

pub type PersistenceResult<T> = Result<T, CoreError>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompletionRecord {
    pub ident: String,
    /// `sort:type` of the task, when the store keeps it.
    pub category: Option<String>,
    pub passed: bool,
    pub recorded_at: SystemTime,
}

impl CompletionRecord {
    pub fn new(ident: impl Into<String>, passed: bool) -> Self {
        Self {
            ident: ident.into(),
            category: None,
            passed,
            recorded_at: SystemTime::now(),
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

pub trait MigrationStore: Send + Sync {
    fn current_version(&self) -> PersistenceResult<i64>;

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()>;
}

pub trait CompletionStore: Send + Sync {
    fn is_complete(&self, ident: &str) -> PersistenceResult<bool>;

    /// Replaces any earlier record for the same identifier.
    fn record(&self, record: &CompletionRecord) -> PersistenceResult<()>;

    /// Removing a missing record is not an error.
    fn clear(&self, ident: &str) -> PersistenceResult<()>;

    /// All records, ordered by identifier.
    fn list(&self) -> PersistenceResult<Vec<CompletionRecord>>;
}
