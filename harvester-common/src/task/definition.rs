use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::{datasource::DataSourceType, error::Error, schedule::CronSchedule};

pub const DEFAULT_REPLICAS: u32 = 1;
pub const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub data_source_id: i64,
    pub cron: Option<String>,
    pub status: TaskStatus,

    /// Max concurrent in-flight executions
    pub replicas: u32,

    /// Per-attempt deadline in seconds
    pub execution_timeout: u64,
    pub max_retries: u32,

    /// Merged over the data source config at run time
    pub config: Option<serde_json::Value>,

    /// Derived by the scheduler, never written by API callers
    pub next_run_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn is_schedulable(&self) -> bool {
        self.status == TaskStatus::Enabled && self.cron.as_deref().is_some_and(|c| !c.trim().is_empty())
    }

    /// Builds the user-editable part of an existing task.
    pub fn to_draft(&self) -> TaskDraft {
        TaskDraft {
            name: self.name.clone(),
            description: self.description.clone(),
            task_type: self.task_type,
            data_source_id: self.data_source_id,
            cron: self.cron.clone(),
            status: self.status,
            replicas: self.replicas,
            execution_timeout: self.execution_timeout,
            max_retries: self.max_retries,
            config: self.config.clone(),
        }
    }
}

#[derive(Clone, Debug, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    WebRpa,
    Api,
    Database,
}

impl TaskType {
    /// The data source type a task of this type must reference.
    pub fn data_source_type(&self) -> DataSourceType {
        match self {
            TaskType::WebRpa => DataSourceType::Web,
            TaskType::Api => DataSourceType::Api,
            TaskType::Database => DataSourceType::Database,
        }
    }
}

#[derive(Clone, Debug, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Enabled,
    Disabled,
}

/// User-supplied task fields, used for both create and full update.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskDraft {
    pub name: String,
    pub description: Option<String>,
    pub task_type: TaskType,
    pub data_source_id: i64,
    pub cron: Option<String>,
    pub status: TaskStatus,
    pub replicas: u32,
    pub execution_timeout: u64,
    pub max_retries: u32,
    pub config: Option<serde_json::Value>,
}

impl TaskDraft {
    /// Validates field ranges and the cron expression.
    /// ---
    /// An empty cron string is normalised to `None` (manual-only task).
    /// Referential checks against the data source happen in the caller,
    /// which has access to the store.
    pub fn validate(mut self) -> Result<Self, Error> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput("task name must not be empty".to_string()));
        }

        if self.replicas < 1 {
            return Err(Error::InvalidInput("replicas must be at least 1".to_string()));
        }

        if self.execution_timeout == 0 {
            return Err(Error::InvalidInput(
                "execution_timeout must be greater than 0".to_string(),
            ));
        }

        if let Some(config) = &self.config {
            if !config.is_object() {
                return Err(Error::InvalidInput(
                    "task config override must be a JSON object".to_string(),
                ));
            }
        }

        self.cron = self
            .cron
            .take()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        if let Some(expr) = &self.cron {
            CronSchedule::parse(expr)?;
        }

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> TaskDraft {
        TaskDraft {
            name: "news".to_string(),
            description: None,
            task_type: TaskType::WebRpa,
            data_source_id: 1,
            cron: Some("0 * * * *".to_string()),
            status: TaskStatus::Enabled,
            replicas: DEFAULT_REPLICAS,
            execution_timeout: DEFAULT_EXECUTION_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            config: None,
        }
    }

    #[test]
    fn task_type_uses_kebab_case_on_the_wire() {
        assert_eq!(TaskType::WebRpa.to_string(), "web-rpa");
        assert_eq!("web-rpa".parse::<TaskType>().ok(), Some(TaskType::WebRpa));
        assert_eq!(
            serde_json::to_value(TaskType::WebRpa).ok(),
            Some(serde_json::json!("web-rpa"))
        );
    }

    #[test]
    fn blank_cron_means_manual_only() {
        let d = TaskDraft {
            cron: Some("   ".to_string()),
            ..draft()
        }
        .validate()
        .expect("valid");
        assert_eq!(d.cron, None);
    }

    #[test]
    fn malformed_cron_is_rejected_synchronously() {
        let err = TaskDraft {
            cron: Some("every monday".to_string()),
            ..draft()
        }
        .validate()
        .expect_err("should fail");
        assert!(matches!(err, Error::InvalidCronExpression { .. }));
    }

    #[test]
    fn zero_replicas_rejected() {
        let err = TaskDraft {
            replicas: 0,
            ..draft()
        }
        .validate()
        .expect_err("should fail");
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
