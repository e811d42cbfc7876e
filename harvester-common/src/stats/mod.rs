use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{TaskStatus, TaskType};

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct OverviewStats {
    pub total_tasks: u64,
    pub enabled_tasks: u64,
    pub total_executions: u64,
    pub success_executions: u64,
    pub failed_executions: u64,
    pub running_executions: u64,

    /// Sum of `records_collected` over successful executions
    pub total_records: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TaskStats {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub total_runs: u64,
    pub success_runs: u64,
    pub failed_runs: u64,
    pub total_records: u64,
    pub last_run_time: Option<DateTime<Utc>>,
}
