//! Request and response bodies of the REST surface.

use harvester_common::{
    common::{Page, Pagination},
    datasource::{DataSource, DataSourceDraft, DataSourceStatus, DataSourceType},
    error::Error,
    execution::ExecutionStatus,
    task::{
        DEFAULT_EXECUTION_TIMEOUT_SECS, DEFAULT_MAX_RETRIES, DEFAULT_REPLICAS, Task, TaskDraft,
        TaskStatus, TaskType,
    },
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub(crate) struct PageMeta {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
}

impl PageMeta {
    pub fn new(pagination: Pagination, total: u64) -> Self {
        Self {
            page: pagination.page(),
            limit: pagination.limit,
            total,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ListResponse<T> {
    pub items: Vec<T>,
    pub pagination: PageMeta,
}

impl<T> ListResponse<T> {
    pub fn new(page: Page<T>, pagination: Pagination) -> Self {
        Self {
            pagination: PageMeta::new(pagination, page.total),
            items: page.items,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PageQuery {
    pub page: Option<u64>,
    #[serde(alias = "limit")]
    pub page_size: Option<u64>,
}

impl PageQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination::from_page(self.page, self.page_size)
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct TaskListQuery {
    pub page: Option<u64>,
    #[serde(alias = "limit")]
    pub page_size: Option<u64>,
    pub status: Option<TaskStatus>,
    pub search: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct DataSourceListQuery {
    pub page: Option<u64>,
    #[serde(alias = "limit")]
    pub page_size: Option<u64>,
    #[serde(rename = "type")]
    pub source_type: Option<DataSourceType>,
    pub status: Option<DataSourceStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ExecutionListQuery {
    pub page: Option<u64>,
    #[serde(alias = "limit")]
    pub page_size: Option<u64>,
    pub status: Option<ExecutionStatus>,
    pub task_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ExecuteQuery {
    /// Wait for a free replica slot instead of failing with `TaskBusy`
    #[serde(default)]
    pub queue: bool,
}

/// Body of `POST /tasks` and `PUT /tasks/{id}`.
/// ---
/// On update every absent field keeps its stored value. On create the
/// defaults of [TaskDraft] apply and `name`, `type` and
/// `data_source_id` are required.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct TaskRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub task_type: Option<TaskType>,
    pub data_source_id: Option<i64>,
    pub cron: Option<String>,
    pub status: Option<TaskStatus>,
    pub replicas: Option<u32>,
    pub execution_timeout: Option<u64>,
    pub max_retries: Option<u32>,
    pub config: Option<Value>,
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, Error> {
    value.ok_or_else(|| Error::InvalidInput(format!("field '{field}' is required")))
}

impl TaskRequest {
    pub fn into_new_draft(self) -> Result<TaskDraft, Error> {
        Ok(TaskDraft {
            name: required(self.name, "name")?,
            description: self.description,
            task_type: required(self.task_type, "type")?,
            data_source_id: required(self.data_source_id, "data_source_id")?,
            cron: self.cron,
            status: self.status.unwrap_or(TaskStatus::Enabled),
            replicas: self.replicas.unwrap_or(DEFAULT_REPLICAS),
            execution_timeout: self
                .execution_timeout
                .unwrap_or(DEFAULT_EXECUTION_TIMEOUT_SECS),
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            config: self.config.filter(|c| !c.is_null()),
        })
    }

    pub fn apply_to(self, task: &Task) -> TaskDraft {
        let current = task.to_draft();
        TaskDraft {
            name: self.name.unwrap_or(current.name),
            description: self.description.or(current.description),
            task_type: self.task_type.unwrap_or(current.task_type),
            data_source_id: self.data_source_id.unwrap_or(current.data_source_id),
            cron: self.cron.or(current.cron),
            status: self.status.unwrap_or(current.status),
            replicas: self.replicas.unwrap_or(current.replicas),
            execution_timeout: self.execution_timeout.unwrap_or(current.execution_timeout),
            max_retries: self.max_retries.unwrap_or(current.max_retries),
            config: match self.config {
                Some(Value::Null) => None,
                Some(config) => Some(config),
                None => current.config,
            },
        }
    }
}

/// Body of `POST /datasources` and `PUT /datasources/{id}`.
/// ---
/// `config` may be a JSON object or a string holding one.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct DataSourceRequest {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub source_type: Option<DataSourceType>,
    pub status: Option<DataSourceStatus>,
    pub config: Option<Value>,
    pub description: Option<String>,
}

fn decode_config(config: Value) -> Result<Value, Error> {
    match config {
        Value::String(raw) => serde_json::from_str(&raw)
            .map_err(|e| Error::InvalidInput(format!("config is not valid JSON: {e}"))),
        other => Ok(other),
    }
}

impl DataSourceRequest {
    pub fn into_new_draft(self) -> Result<DataSourceDraft, Error> {
        Ok(DataSourceDraft {
            name: required(self.name, "name")?,
            source_type: required(self.source_type, "type")?,
            status: self.status.unwrap_or(DataSourceStatus::Active),
            config: decode_config(required(self.config, "config")?)?,
            description: self.description,
        })
    }

    pub fn apply_to(self, datasource: &DataSource) -> Result<DataSourceDraft, Error> {
        Ok(DataSourceDraft {
            name: self.name.unwrap_or_else(|| datasource.name.clone()),
            source_type: self.source_type.unwrap_or(datasource.source_type),
            status: self.status.unwrap_or(datasource.status),
            config: match self.config {
                Some(config) => decode_config(config)?,
                None => datasource.config.clone(),
            },
            description: self.description.or_else(|| datasource.description.clone()),
        })
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AcceptedRun {
    pub task_id: i64,
    pub queued: bool,
}
