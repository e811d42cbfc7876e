use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    common::{Page, Pagination},
    error::Error,
    task::{Task, TaskDraft, TaskStatus},
};

use super::base::BaseDbTrait;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    /// Case-insensitive match on name or description
    pub search: Option<String>,
}

#[async_trait]
pub trait TaskDbTrait: BaseDbTrait {
    async fn get_task(&self, id: i64) -> Result<Option<Task>, Error>;

    /// Lists tasks, newest first
    async fn list_tasks(&self, filter: TaskFilter, pagination: Pagination)
    -> Result<Page<Task>, Error>;

    /// All enabled tasks that carry a cron expression
    /// ---
    /// Used to seed the scheduler's fire set on startup.
    async fn list_schedulable_tasks(&self) -> Result<Vec<Task>, Error>;

    /// Stores a new task
    /// ---
    /// `next_run_time` starts out null, the scheduler owns it.
    async fn create_task(&self, draft: TaskDraft) -> Result<Task, Error>;

    /// Replaces the user-editable fields of a task
    async fn update_task(&self, id: i64, draft: TaskDraft) -> Result<Task, Error>;

    /// Sets the status and the derived fire time in one write
    async fn set_task_status(
        &self,
        id: i64,
        status: TaskStatus,
        next_run_time: Option<DateTime<Utc>>,
    ) -> Result<(), Error>;

    async fn set_next_run_time(
        &self,
        id: i64,
        next_run_time: Option<DateTime<Utc>>,
    ) -> Result<(), Error>;

    /// Deletes a task together with its executions and records
    async fn delete_task(&self, id: i64) -> Result<(), Error>;
}
