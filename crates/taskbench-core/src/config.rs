use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::models::{CoreError, CoreErrorKind};
use crate::session::ObservationKind;

/// Fixed pauses between interactions. Zero everywhere in tests.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct Pacing {
    pub action_interval_ms: u64,
    pub cooldown_secs: u64,
}

impl Pacing {
    pub const IMMEDIATE: Pacing = Pacing {
        action_interval_ms: 0,
        cooldown_secs: 0,
    };

    pub fn action_interval(&self) -> Duration {
        Duration::from_millis(self.action_interval_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            action_interval_ms: 1_000,
            cooldown_secs: 10,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct TaskOptions {
    /// Observation kinds captured each step by VM tasks; Raw tasks pick one from the
    /// session's GUI flag.
    pub observation_kinds: BTreeSet<ObservationKind>,
    /// Read the stop signal from stdin instead of running the step loop.
    pub manual: bool,
    /// Offer `ANS` to the proposer even when no rule expects an answer.
    pub expose_answer: bool,
    pub init_timeout_secs: u64,
    pub pacing: Pacing,
}

impl TaskOptions {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            observation_kinds: BTreeSet::from([ObservationKind::Screenshot]),
            manual: false,
            expose_answer: false,
            init_timeout_secs: 240,
            pacing: Pacing::default(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct DriverConfig {
    pub tasks_path: PathBuf,
    pub logs_path: PathBuf,
    /// Keep completion records in this SQLite file instead of `result.out` markers.
    #[serde(default)]
    pub results_db: Option<PathBuf>,
    /// Skip tasks that already have a completion record.
    #[serde(default = "default_true")]
    pub ignore: bool,
    /// Share one session across consecutive same-category tasks.
    #[serde(default = "default_true")]
    pub optimize: bool,
    #[serde(default = "default_shards")]
    pub shards: usize,
    #[serde(default)]
    pub shard_index: usize,
    /// Identifiers completed elsewhere; dropped before sharding.
    #[serde(default)]
    pub exclude: BTreeSet<String>,
    #[serde(default)]
    pub task: TaskOptions,
}

impl DriverConfig {
    pub fn new(tasks_path: impl Into<PathBuf>, logs_path: impl Into<PathBuf>) -> Self {
        Self {
            tasks_path: tasks_path.into(),
            logs_path: logs_path.into(),
            results_db: None,
            ignore: true,
            optimize: true,
            shards: 1,
            shard_index: 0,
            exclude: BTreeSet::new(),
            task: TaskOptions::default(),
        }
    }

    pub fn shard(mut self, shards: usize, shard_index: usize) -> Self {
        self.shards = shards;
        self.shard_index = shard_index;
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.shards == 0 {
            return Err(invalid_parameter("shard count must be at least 1"));
        }

        if self.shard_index >= self.shards {
            return Err(invalid_parameter(&format!(
                "shard index {} is out of range for {} shards",
                self.shard_index, self.shards
            )));
        }

        if !self.tasks_path.exists() {
            return Err(invalid_parameter(&format!(
                "tasks path '{}' does not exist",
                self.tasks_path.display()
            )));
        }

        Ok(())
    }
}

/// Reads a batch plan: a JSON array of driver configurations.
pub fn load_plan(path: &Path) -> Result<Vec<DriverConfig>, CoreError> {
    let text = std::fs::read_to_string(path).map_err(|error| {
        CoreError::config(format!("failed to read plan '{}': {error}", path.display()))
    })?;
    serde_json::from_str(&text).map_err(|error| {
        CoreError::config(format!("malformed plan '{}': {error}", path.display()))
    })
}

fn invalid_parameter(message: &str) -> CoreError {
    CoreError::new(CoreErrorKind::InvalidInput, message)
}

fn default_true() -> bool {
    true
}

fn default_shards() -> usize {
    1
}
