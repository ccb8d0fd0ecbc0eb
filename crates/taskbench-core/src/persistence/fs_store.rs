use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::WalkDir;

use crate::models::{CoreError, CoreErrorKind};
use crate::persistence::{CompletionRecord, CompletionStore, PersistenceResult};

/// Name of the per-task verdict file: `1` passed, `0` failed.
pub const RESULT_FILE: &str = "result.out";

/// Keeps each verdict in `<root>/<ident>/result.out`, next to the task's other output.
#[derive(Clone, Debug)]
pub struct FsCompletionStore {
    root: PathBuf,
}

impl FsCompletionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn task_dir(&self, ident: &str) -> PathBuf {
        self.root.join(ident)
    }

    fn result_path(&self, ident: &str) -> PathBuf {
        self.task_dir(ident).join(RESULT_FILE)
    }
}

impl CompletionStore for FsCompletionStore {
    fn is_complete(&self, ident: &str) -> PersistenceResult<bool> {
        Ok(self.result_path(ident).is_file())
    }

    fn record(&self, record: &CompletionRecord) -> PersistenceResult<()> {
        let dir = self.task_dir(&record.ident);
        fs::create_dir_all(&dir).map_err(|error| io_error("record", &dir, error))?;

        let path = dir.join(RESULT_FILE);
        let verdict = if record.passed { "1" } else { "0" };
        fs::write(&path, verdict).map_err(|error| io_error("record", &path, error))
    }

    fn clear(&self, ident: &str) -> PersistenceResult<()> {
        let path = self.result_path(ident);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(io_error("clear", &path, error)),
        }
    }

    fn list(&self) -> PersistenceResult<Vec<CompletionRecord>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.map_err(|error| {
                storage_error("list", format!("walking '{}': {error}", self.root.display()))
            })?;
            if !entry.file_type().is_file() || entry.file_name() != RESULT_FILE {
                continue;
            }

            let Some(ident) = entry
                .path()
                .parent()
                .and_then(|dir| dir.strip_prefix(&self.root).ok())
                .and_then(Path::to_str)
                .filter(|ident| !ident.is_empty())
            else {
                continue;
            };

            let text =
                fs::read_to_string(entry.path()).map_err(|error| io_error("list", entry.path(), error))?;
            let recorded_at = entry
                .metadata()
                .ok()
                .and_then(|metadata| metadata.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);

            records.push(CompletionRecord {
                ident: ident.to_string(),
                category: None,
                passed: text.trim() == "1",
                recorded_at,
            });
        }

        records.sort_by(|left, right| left.ident.cmp(&right.ident));
        Ok(records)
    }
}

fn io_error(operation: &str, path: &Path, error: std::io::Error) -> CoreError {
    storage_error(operation, format!("'{}': {error}", path.display()))
}

fn storage_error(operation: &str, message: String) -> CoreError {
    CoreError::new(
        CoreErrorKind::StorageFailure,
        format!("results store {operation} failed: {message}"),
    )
}
