use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    common::{Page, Pagination},
    error::Error,
    execution::{ExecutionFilter, ExecutionOutcome, NewExecution, TaskExecution},
};

use super::base::BaseDbTrait;

#[async_trait]
pub trait ExecutionDbTrait: BaseDbTrait {
    /// Inserts a `running` execution row and returns its id
    async fn create_execution(&self, execution: NewExecution) -> Result<i64, Error>;

    /// Moves a `running` execution to its terminal status
    /// ---
    /// Fails with `Conflict` if the row was already finalized,
    /// each attempt resolves exactly once.
    async fn finalize_execution(
        &self,
        id: i64,
        outcome: ExecutionOutcome,
        end_time: DateTime<Utc>,
    ) -> Result<(), Error>;

    async fn get_execution(&self, id: i64) -> Result<Option<TaskExecution>, Error>;

    /// Lists executions, most recent start first
    async fn list_executions(
        &self,
        filter: ExecutionFilter,
        pagination: Pagination,
    ) -> Result<Page<TaskExecution>, Error>;

    async fn count_running_executions(&self, task_id: i64) -> Result<u64, Error>;

    /// Fails every `running` row owned by `worker_id`
    /// ---
    /// Called on startup, such rows were orphaned by a previous process.
    /// Returns the number of rows touched.
    async fn fail_orphaned_executions(
        &self,
        worker_id: &str,
        error_message: &str,
        end_time: DateTime<Utc>,
    ) -> Result<u64, Error>;
}
