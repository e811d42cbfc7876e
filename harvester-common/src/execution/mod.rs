use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TaskExecution {
    pub id: i64,
    pub task_id: i64,

    /// Denormalized for display, `None` once the task is gone
    pub task_name: Option<String>,
    pub worker_id: String,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub records_collected: u64,

    /// Attempts made before this one within the same logical run
    pub retry_count: u32,
    pub error_message: Option<String>,
}

#[derive(Clone, Debug, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
}

/// Row created when the engine dispatches an attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct NewExecution {
    pub task_id: i64,
    pub worker_id: String,
    pub retry_count: u32,
    pub start_time: DateTime<Utc>,
}

/// Terminal state of one attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum ExecutionOutcome {
    Success { records_collected: u64 },
    Failed { error_message: String },
}

impl ExecutionOutcome {
    pub fn status(&self) -> ExecutionStatus {
        match self {
            ExecutionOutcome::Success { .. } => ExecutionStatus::Success,
            ExecutionOutcome::Failed { .. } => ExecutionStatus::Failed,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecutionFilter {
    pub task_id: Option<i64>,
    pub status: Option<ExecutionStatus>,
}
