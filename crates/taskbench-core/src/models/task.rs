use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::CoreError;

/// Session flavour a task runs against. Declaration order is scheduling order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum TaskSort {
    Raw,
    #[serde(rename = "VM")]
    Vm,
}

impl TaskSort {
    pub const ALL: [TaskSort; 2] = [TaskSort::Raw, TaskSort::Vm];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "Raw",
            Self::Vm => "VM",
        }
    }
}

impl FromStr for TaskSort {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|sort| sort.as_str() == value)
            .ok_or_else(|| {
                CoreError::config(format!(
                    "unknown task sort '{value}' (expected one of Raw, VM)"
                ))
            })
    }
}

impl Display for TaskSort {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `(sort, type)` pair used for ordering, grouping and session lookup.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Category {
    pub sort: TaskSort,
    pub kind: String,
}

impl Category {
    pub fn new(sort: TaskSort, kind: impl Into<String>) -> Self {
        Self {
            sort,
            kind: kind.into(),
        }
    }

    pub fn raw(kind: impl Into<String>) -> Self {
        Self::new(TaskSort::Raw, kind)
    }

    pub fn vm(kind: impl Into<String>) -> Self {
        Self::new(TaskSort::Vm, kind)
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.sort, self.kind)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TaskState {
    Loaded,
    Initializing,
    Ready,
    Stepping,
    Evaluating,
    Passed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Passed | Self::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::{Category, TaskSort};

    #[test]
    fn stateless_sorts_before_stateful() {
        let mut categories = vec![
            Category::vm("KAlgebra"),
            Category::raw("Lean"),
            Category::raw("ChimeraX"),
        ];
        categories.sort();
        assert_eq!(
            categories,
            vec![
                Category::raw("ChimeraX"),
                Category::raw("Lean"),
                Category::vm("KAlgebra"),
            ]
        );
    }

    #[test]
    fn sort_names_round_trip_through_parsing() {
        assert_eq!("VM".parse::<TaskSort>().unwrap(), TaskSort::Vm);
        assert_eq!("Raw".parse::<TaskSort>().unwrap(), TaskSort::Raw);
        assert!("vm".parse::<TaskSort>().is_err());
    }
}
