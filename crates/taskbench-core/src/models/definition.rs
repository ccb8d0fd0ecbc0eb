use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::models::{Category, CoreError, StopKind, TaskSort};

/// `type` value that marks an early-stop evaluation rule.
pub const EARLY_STOP_RULE: &str = "stop";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Penalty {
    pub threshold: u32,
    pub reduction: u32,
}

impl Penalty {
    pub const DISABLED: Penalty = Penalty {
        threshold: u32::MAX,
        reduction: 0,
    };

    /// Parses `"<threshold>:<reduction>"`.
    pub fn parse(text: &str) -> Result<Self, CoreError> {
        let (threshold, reduction) = text
            .trim()
            .split_once(':')
            .ok_or_else(|| malformed_penalty(text))?;
        let threshold: u32 = threshold.trim().parse().map_err(|_| malformed_penalty(text))?;
        let reduction: u32 = reduction.trim().parse().map_err(|_| malformed_penalty(text))?;

        if threshold == 0 {
            return Err(CoreError::config(format!(
                "penalty threshold must be at least 1 in '{text}'"
            )));
        }

        Ok(Self {
            threshold,
            reduction,
        })
    }
}

impl Default for Penalty {
    fn default() -> Self {
        Self::DISABLED
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InitCall {
    pub func: String,
    pub wait: Duration,
    pub args: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum EvalRule {
    EarlyStop {
        expected: StopKind,
        args: Option<Vec<String>>,
    },
    /// Category-specific check; `body` is the full rule object.
    Domain { kind: String, body: Map<String, Value> },
}

impl EvalRule {
    pub fn stop(expected: StopKind) -> Self {
        Self::EarlyStop {
            expected,
            args: None,
        }
    }

    pub fn answer(args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::EarlyStop {
            expected: StopKind::Ans,
            args: Some(args.into_iter().map(Into::into).collect()),
        }
    }

    pub fn is_early_stop(&self) -> bool {
        matches!(self, Self::EarlyStop { .. })
    }

    fn from_object(index: usize, object: Map<String, Value>) -> Result<Self, CoreError> {
        let kind = match object.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(_) => return Err(rule_error(index, "'type' must be a string")),
            None => return Err(rule_error(index, "missing 'type'")),
        };

        if kind != EARLY_STOP_RULE {
            return Ok(Self::Domain { kind, body: object });
        }

        let expected = match object.get("value") {
            Some(Value::String(value)) => value
                .parse::<StopKind>()
                .map_err(|error| rule_error(index, &error.message))?,
            Some(_) => return Err(rule_error(index, "'value' must be a string")),
            None => return Err(rule_error(index, "early-stop rule is missing 'value'")),
        };

        let args = match object.get("args") {
            None => None,
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .map(|item| {
                        item.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| rule_error(index, "'args' entries must be strings"))
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Some(_) => return Err(rule_error(index, "'args' must be a list")),
        };

        if expected == StopKind::Ans && args.is_none() {
            return Err(rule_error(index, "ANS rule requires an 'args' list"));
        }

        Ok(Self::EarlyStop { expected, args })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TaskDefinition {
    pub name: String,
    pub kind: String,
    pub sort: TaskSort,
    pub steps: u32,
    pub instruction: String,
    pub version: String,
    pub initialize: Vec<InitCall>,
    pub evaluate: Vec<EvalRule>,
    pub answer: Option<Value>,
    pub penalty: Penalty,
    pub snapshot: Option<String>,
}

#[derive(Deserialize)]
struct RawDefinition {
    #[serde(rename = "type")]
    kind: String,
    sort: String,
    steps: u32,
    instruction: String,
    version: String,
    initialize: Vec<RawInitCall>,
    evaluate: Vec<Map<String, Value>>,
    #[serde(default)]
    ans: Option<Value>,
    #[serde(default)]
    penalty: Option<String>,
    #[serde(default)]
    snapshot: Option<String>,
}

#[derive(Deserialize)]
struct RawInitCall {
    func: String,
    #[serde(default)]
    wait: u64,
    #[serde(flatten)]
    args: Map<String, Value>,
}

impl TaskDefinition {
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let name = definition_name(path).ok_or_else(|| {
            CoreError::config(format!("cannot derive task name from '{}'", path.display()))
        })?;
        let text = std::fs::read_to_string(path).map_err(|error| {
            CoreError::config(format!("failed to read '{}': {error}", path.display()))
        })?;

        Self::from_json_str(name, &text)
    }

    pub fn from_json_str(name: &str, text: &str) -> Result<Self, CoreError> {
        let raw: RawDefinition = serde_json::from_str(text)
            .map_err(|error| CoreError::config(format!("task '{name}': {error}")))?;

        let sort = raw
            .sort
            .parse::<TaskSort>()
            .map_err(|error| CoreError::config(format!("task '{name}': {}", error.message)))?;

        let evaluate = raw
            .evaluate
            .into_iter()
            .enumerate()
            .map(|(index, object)| EvalRule::from_object(index, object))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|error| CoreError::config(format!("task '{name}': {}", error.message)))?;

        let penalty = match raw.penalty.as_deref() {
            Some(text) => Penalty::parse(text)
                .map_err(|error| CoreError::config(format!("task '{name}': {}", error.message)))?,
            None => Penalty::DISABLED,
        };

        let initialize = raw
            .initialize
            .into_iter()
            .map(|call| InitCall {
                func: call.func,
                wait: Duration::from_secs(call.wait),
                args: call.args,
            })
            .collect();

        Ok(Self {
            name: name.to_string(),
            kind: raw.kind,
            sort,
            steps: raw.steps,
            instruction: raw.instruction,
            version: raw.version,
            initialize,
            evaluate,
            answer: raw.ans,
            penalty,
            snapshot: raw.snapshot,
        })
    }

    pub fn category(&self) -> Category {
        Category::new(self.sort, self.kind.clone())
    }
}

/// Task name of a definition file: its file name up to the first `.`.
pub fn definition_name(path: &Path) -> Option<&str> {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.split('.').next())
        .filter(|name| !name.is_empty())
}

fn malformed_penalty(text: &str) -> CoreError {
    CoreError::config(format!(
        "penalty must look like '<threshold>:<reduction>', got '{text}'"
    ))
}

fn rule_error(index: usize, message: &str) -> CoreError {
    CoreError::config(format!("evaluate[{index}]: {message}"))
}
