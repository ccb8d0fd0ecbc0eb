use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::models::{CoreError, TaskDefinition, definition_name};
use crate::orchestration::OrchestrationResult;
use crate::orchestration::descriptor::task_ident;
use crate::orchestration::shard::shard_range;

/// A definition file found under the tasks root.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    /// Directory relative to the tasks root, `/`-separated; empty at the root.
    pub infix: String,
    pub ident: String,
}

/// Lists definition files in sorted depth-first order. A file path is a tree of one.
/// Unreadable entries are logged and left out.
pub fn discover(tasks_path: &Path) -> OrchestrationResult<Vec<DiscoveredFile>> {
    if !tasks_path.exists() {
        return Err(CoreError::config(format!(
            "tasks path '{}' does not exist",
            tasks_path.display()
        )));
    }

    if tasks_path.is_file() {
        return Ok(describe(tasks_path, "").into_iter().collect());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(tasks_path).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                tracing::error!(
                    path = ?error.path(),
                    message = %error,
                    "failed to read task tree entry; skipped"
                );
                continue;
            }
        };

        if !entry.file_type().is_file() || !is_definition(entry.path()) {
            continue;
        }

        let infix = entry
            .path()
            .parent()
            .and_then(|parent| parent.strip_prefix(tasks_path).ok())
            .map(|relative| {
                relative
                    .components()
                    .map(|component| component.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_default();

        if let Some(file) = describe(entry.path(), &infix) {
            files.push(file);
        }
    }

    Ok(files)
}

/// Drops excluded identifiers, then keeps this shard's contiguous slice.
pub fn select(
    files: Vec<DiscoveredFile>,
    exclude: &BTreeSet<String>,
    shards: usize,
    shard_index: usize,
) -> OrchestrationResult<Vec<DiscoveredFile>> {
    let remaining: Vec<_> = files
        .into_iter()
        .filter(|file| !exclude.contains(&file.ident))
        .collect();
    let range = shard_range(remaining.len(), shards, shard_index)?;
    tracing::info!(
        shard = shard_index,
        shards,
        start = range.start,
        end = range.end,
        available = remaining.len(),
        "selected shard"
    );

    Ok(remaining.into_iter().skip(range.start).take(range.len()).collect())
}

pub struct LoadedDefinitions {
    pub loaded: Vec<(DiscoveredFile, TaskDefinition)>,
    pub rejected: Vec<(PathBuf, CoreError)>,
}

/// Parses every file, keeping the first of any identifier seen twice.
pub fn load_definitions(files: Vec<DiscoveredFile>) -> LoadedDefinitions {
    let mut seen = HashSet::new();
    let mut result = LoadedDefinitions {
        loaded: Vec::new(),
        rejected: Vec::new(),
    };

    for file in files {
        if !seen.insert(file.ident.clone()) {
            let error = CoreError::config(format!(
                "duplicate task identifier '{}' from '{}'",
                file.ident,
                file.path.display()
            ));
            tracing::error!(path = %file.path.display(), message = %error.message, "config loading failed; skipped");
            result.rejected.push((file.path, error));
            continue;
        }

        match TaskDefinition::load(&file.path) {
            Ok(definition) => result.loaded.push((file, definition)),
            Err(error) => {
                tracing::error!(
                    path = %file.path.display(),
                    message = %error.message,
                    "config loading failed; skipped"
                );
                result.rejected.push((file.path, error));
            }
        }
    }

    result
}

fn is_definition(path: &Path) -> bool {
    path.extension().is_some_and(|extension| extension == "json")
}

fn describe(path: &Path, infix: &str) -> Option<DiscoveredFile> {
    let Some(name) = definition_name(path) else {
        tracing::warn!(path = %path.display(), "cannot derive task name; skipped");
        return None;
    };

    Some(DiscoveredFile {
        path: path.to_path_buf(),
        infix: infix.to_string(),
        ident: task_ident(infix, name),
    })
}
