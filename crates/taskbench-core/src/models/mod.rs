pub mod definition;
pub mod error;
pub mod signal;
pub mod task;

pub use definition::{
    EARLY_STOP_RULE, EvalRule, InitCall, Penalty, TaskDefinition, definition_name,
};
pub use error::{CoreError, CoreErrorKind};
pub use signal::{
    ActionOutcome, ActionResult, AllowedActions, Primitive, StopKind, StopSignal,
};
pub use task::{Category, TaskSort, TaskState};
