pub mod counter;
pub mod descriptor;
pub mod discovery;
pub mod driver;
#[cfg(test)]
mod fixtures;
pub mod group;
pub mod shard;

pub use counter::RunCounter;
pub use descriptor::{TaskDescriptor, order, task_ident};
pub use discovery::{DiscoveredFile, LoadedDefinitions, discover, load_definitions, select};
pub use driver::{
    Catalog, CategoryEntry, PlanOutcome, RECORDING_FILE, SessionFactory, Tester, open_store,
};
pub use group::{TaskGroups, partition_runs};
pub use shard::shard_range;

use crate::models::CoreError;

pub type OrchestrationResult<T> = Result<T, CoreError>;
