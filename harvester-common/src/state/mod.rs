mod base;
mod datasource;
mod execution;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
mod record;
mod stats;
mod task;

pub use base::BaseDbTrait;
pub use datasource::{DataSourceDbTrait, DataSourceFilter};
pub use execution::ExecutionDbTrait;
pub use record::RecordDbTrait;
pub use stats::StatsDbTrait;
pub use task::{TaskDbTrait, TaskFilter};

/// Combined trait for all database operations
/// Should be used through dyn dispatch at the top level
/// to pass the complete database interface
pub trait DatabaseTrait:
    DataSourceDbTrait + TaskDbTrait + ExecutionDbTrait + RecordDbTrait + StatsDbTrait
{
}
