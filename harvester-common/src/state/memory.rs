//! In-process `DatabaseTrait` used by tests across the workspace.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    common::{Page, Pagination},
    datasource::{DataSource, DataSourceDraft},
    error::Error,
    execution::{ExecutionFilter, ExecutionOutcome, ExecutionStatus, NewExecution, TaskExecution},
    record::{Record, StoredRecord},
    stats::{OverviewStats, TaskStats},
    task::{Task, TaskDraft, TaskStatus},
};

use super::{
    BaseDbTrait, DataSourceDbTrait, DataSourceFilter, DatabaseTrait, ExecutionDbTrait,
    RecordDbTrait, StatsDbTrait, TaskDbTrait, TaskFilter,
};

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    datasources: BTreeMap<i64, DataSource>,
    tasks: BTreeMap<i64, Task>,
    executions: BTreeMap<i64, TaskExecution>,
    records: BTreeMap<i64, StoredRecord>,

    /// High-water mark of simultaneously running executions per task
    peak_running: HashMap<i64, u64>,

    /// `set_next_run_time` calls left to fail
    failing_next_run_writes: usize,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn running_for(&self, task_id: i64) -> u64 {
        self.executions
            .values()
            .filter(|e| e.task_id == task_id && e.status == ExecutionStatus::Running)
            .count() as u64
    }
}

#[derive(Debug, Default)]
pub struct MemoryStateDb {
    tables: RwLock<Tables>,
}

impl MemoryStateDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// All executions of a task in insertion order.
    pub async fn executions_for(&self, task_id: i64) -> Vec<TaskExecution> {
        self.tables
            .read()
            .await
            .executions
            .values()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect()
    }

    pub async fn records_for(&self, task_id: i64) -> Vec<StoredRecord> {
        self.tables
            .read()
            .await
            .records
            .values()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect()
    }

    /// Makes the next `count` writes of a fire time fail.
    pub async fn fail_next_run_time_writes(&self, count: usize) {
        self.tables.write().await.failing_next_run_writes = count;
    }

    pub async fn peak_running(&self, task_id: i64) -> u64 {
        self.tables
            .read()
            .await
            .peak_running
            .get(&task_id)
            .copied()
            .unwrap_or(0)
    }
}

fn paginate<T: Clone>(items: Vec<T>, pagination: Pagination) -> Page<T> {
    let total = items.len() as u64;
    let items = items
        .into_iter()
        .skip(pagination.offset as usize)
        .take(pagination.limit as usize)
        .collect();

    Page::new(items, total)
}

#[async_trait]
impl BaseDbTrait for MemoryStateDb {
    async fn ping(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[async_trait]
impl DataSourceDbTrait for MemoryStateDb {
    async fn get_datasource(&self, id: i64) -> Result<Option<DataSource>, Error> {
        Ok(self.tables.read().await.datasources.get(&id).cloned())
    }

    async fn list_datasources(
        &self,
        filter: DataSourceFilter,
        pagination: Pagination,
    ) -> Result<Page<DataSource>, Error> {
        let tables = self.tables.read().await;
        let items: Vec<DataSource> = tables
            .datasources
            .values()
            .rev()
            .filter(|d| filter.source_type.is_none_or(|t| d.source_type == t))
            .filter(|d| filter.status.is_none_or(|s| d.status == s))
            .cloned()
            .collect();

        Ok(paginate(items, pagination))
    }

    async fn create_datasource(&self, draft: DataSourceDraft) -> Result<DataSource, Error> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let datasource = DataSource {
            id: tables.next_id(),
            name: draft.name,
            source_type: draft.source_type,
            status: draft.status,
            config: draft.config,
            description: draft.description,
            created_at: now,
            updated_at: now,
        };
        tables.datasources.insert(datasource.id, datasource.clone());

        Ok(datasource)
    }

    async fn update_datasource(&self, id: i64, draft: DataSourceDraft) -> Result<DataSource, Error> {
        let mut tables = self.tables.write().await;
        let datasource = tables
            .datasources
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("DataSource", id))?;

        datasource.name = draft.name;
        datasource.source_type = draft.source_type;
        datasource.status = draft.status;
        datasource.config = draft.config;
        datasource.description = draft.description;
        datasource.updated_at = Utc::now();

        Ok(datasource.clone())
    }

    async fn delete_datasource(&self, id: i64) -> Result<(), Error> {
        let mut tables = self.tables.write().await;
        if !tables.datasources.contains_key(&id) {
            return Err(Error::not_found("DataSource", id));
        }

        if let Some(task) = tables
            .tasks
            .values()
            .find(|t| t.data_source_id == id && t.status == TaskStatus::Enabled)
        {
            return Err(Error::Conflict(format!(
                "data source {id} is referenced by enabled task {}",
                task.id
            )));
        }

        tables.datasources.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl TaskDbTrait for MemoryStateDb {
    async fn get_task(&self, id: i64) -> Result<Option<Task>, Error> {
        Ok(self.tables.read().await.tasks.get(&id).cloned())
    }

    async fn list_tasks(&self, filter: TaskFilter, pagination: Pagination) -> Result<Page<Task>, Error> {
        let tables = self.tables.read().await;
        let needle = filter.search.map(|s| s.to_lowercase());
        let items: Vec<Task> = tables
            .tasks
            .values()
            .rev()
            .filter(|t| filter.status.is_none_or(|s| t.status == s))
            .filter(|t| {
                needle.as_deref().is_none_or(|n| {
                    t.name.to_lowercase().contains(n)
                        || t.description
                            .as_deref()
                            .is_some_and(|d| d.to_lowercase().contains(n))
                })
            })
            .cloned()
            .collect();

        Ok(paginate(items, pagination))
    }

    async fn list_schedulable_tasks(&self) -> Result<Vec<Task>, Error> {
        Ok(self
            .tables
            .read()
            .await
            .tasks
            .values()
            .filter(|t| t.is_schedulable())
            .cloned()
            .collect())
    }

    async fn create_task(&self, draft: TaskDraft) -> Result<Task, Error> {
        let mut tables = self.tables.write().await;
        if !tables.datasources.contains_key(&draft.data_source_id) {
            return Err(Error::not_found("DataSource", draft.data_source_id));
        }

        let now = Utc::now();
        let task = Task {
            id: tables.next_id(),
            name: draft.name,
            description: draft.description,
            task_type: draft.task_type,
            data_source_id: draft.data_source_id,
            cron: draft.cron,
            status: draft.status,
            replicas: draft.replicas,
            execution_timeout: draft.execution_timeout,
            max_retries: draft.max_retries,
            config: draft.config,
            next_run_time: None,
            created_at: now,
            updated_at: now,
        };
        tables.tasks.insert(task.id, task.clone());

        Ok(task)
    }

    async fn update_task(&self, id: i64, draft: TaskDraft) -> Result<Task, Error> {
        let mut tables = self.tables.write().await;
        if !tables.datasources.contains_key(&draft.data_source_id) {
            return Err(Error::not_found("DataSource", draft.data_source_id));
        }

        let task = tables
            .tasks
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("Task", id))?;

        task.name = draft.name;
        task.description = draft.description;
        task.task_type = draft.task_type;
        task.data_source_id = draft.data_source_id;
        task.cron = draft.cron;
        task.status = draft.status;
        task.replicas = draft.replicas;
        task.execution_timeout = draft.execution_timeout;
        task.max_retries = draft.max_retries;
        task.config = draft.config;
        task.updated_at = Utc::now();

        Ok(task.clone())
    }

    async fn set_task_status(
        &self,
        id: i64,
        status: TaskStatus,
        next_run_time: Option<DateTime<Utc>>,
    ) -> Result<(), Error> {
        let mut tables = self.tables.write().await;
        let task = tables
            .tasks
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("Task", id))?;

        task.status = status;
        task.next_run_time = next_run_time;
        task.updated_at = Utc::now();

        Ok(())
    }

    async fn set_next_run_time(
        &self,
        id: i64,
        next_run_time: Option<DateTime<Utc>>,
    ) -> Result<(), Error> {
        let mut tables = self.tables.write().await;
        if tables.failing_next_run_writes > 0 {
            tables.failing_next_run_writes -= 1;
            return Err(Error::Database(format!(
                "write of next_run_time for task {id} failed"
            )));
        }

        let task = tables
            .tasks
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("Task", id))?;

        task.next_run_time = next_run_time;

        Ok(())
    }

    async fn delete_task(&self, id: i64) -> Result<(), Error> {
        let mut tables = self.tables.write().await;
        if tables.tasks.remove(&id).is_none() {
            return Err(Error::not_found("Task", id));
        }

        tables.executions.retain(|_, e| e.task_id != id);
        tables.records.retain(|_, r| r.task_id != id);

        Ok(())
    }
}

#[async_trait]
impl ExecutionDbTrait for MemoryStateDb {
    async fn create_execution(&self, execution: NewExecution) -> Result<i64, Error> {
        let mut tables = self.tables.write().await;
        let task_name = tables.tasks.get(&execution.task_id).map(|t| t.name.clone());
        let id = tables.next_id();

        tables.executions.insert(
            id,
            TaskExecution {
                id,
                task_id: execution.task_id,
                task_name,
                worker_id: execution.worker_id,
                status: ExecutionStatus::Running,
                start_time: execution.start_time,
                end_time: None,
                records_collected: 0,
                retry_count: execution.retry_count,
                error_message: None,
            },
        );

        let running = tables.running_for(execution.task_id);
        let peak = tables.peak_running.entry(execution.task_id).or_default();
        *peak = (*peak).max(running);

        Ok(id)
    }

    async fn finalize_execution(
        &self,
        id: i64,
        outcome: ExecutionOutcome,
        end_time: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mut tables = self.tables.write().await;
        let execution = tables
            .executions
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("TaskExecution", id))?;

        if execution.status != ExecutionStatus::Running {
            return Err(Error::Conflict(format!("execution {id} is already finalized")));
        }

        execution.status = outcome.status();
        execution.end_time = Some(end_time);
        match outcome {
            ExecutionOutcome::Success { records_collected } => {
                execution.records_collected = records_collected;
            }
            ExecutionOutcome::Failed { error_message } => {
                execution.error_message = Some(error_message);
            }
        }

        Ok(())
    }

    async fn get_execution(&self, id: i64) -> Result<Option<TaskExecution>, Error> {
        Ok(self.tables.read().await.executions.get(&id).cloned())
    }

    async fn list_executions(
        &self,
        filter: ExecutionFilter,
        pagination: Pagination,
    ) -> Result<Page<TaskExecution>, Error> {
        let tables = self.tables.read().await;
        let mut items: Vec<TaskExecution> = tables
            .executions
            .values()
            .filter(|e| filter.task_id.is_none_or(|t| e.task_id == t))
            .filter(|e| filter.status.is_none_or(|s| e.status == s))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.start_time.cmp(&a.start_time).then(b.id.cmp(&a.id)));

        Ok(paginate(items, pagination))
    }

    async fn count_running_executions(&self, task_id: i64) -> Result<u64, Error> {
        Ok(self.tables.read().await.running_for(task_id))
    }

    async fn fail_orphaned_executions(
        &self,
        worker_id: &str,
        error_message: &str,
        end_time: DateTime<Utc>,
    ) -> Result<u64, Error> {
        let mut tables = self.tables.write().await;
        let mut touched = 0;
        for execution in tables.executions.values_mut().filter(|e| {
            e.worker_id == worker_id && e.status == ExecutionStatus::Running
        }) {
            execution.status = ExecutionStatus::Failed;
            execution.end_time = Some(end_time);
            execution.error_message = Some(error_message.to_string());
            touched += 1;
        }

        Ok(touched)
    }
}

#[async_trait]
impl RecordDbTrait for MemoryStateDb {
    async fn save_records(
        &self,
        task_id: i64,
        execution_id: i64,
        records: Vec<Record>,
    ) -> Result<u64, Error> {
        let mut tables = self.tables.write().await;
        let count = records.len() as u64;
        let now = Utc::now();
        for data in records {
            let id = tables.next_id();
            tables.records.insert(
                id,
                StoredRecord {
                    id,
                    task_id,
                    execution_id,
                    data,
                    collected_at: now,
                },
            );
        }

        Ok(count)
    }

    async fn list_records(
        &self,
        task_id: i64,
        pagination: Pagination,
    ) -> Result<Page<StoredRecord>, Error> {
        let tables = self.tables.read().await;
        let items: Vec<StoredRecord> = tables
            .records
            .values()
            .rev()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect();

        Ok(paginate(items, pagination))
    }
}

#[async_trait]
impl StatsDbTrait for MemoryStateDb {
    async fn overview_stats(&self) -> Result<OverviewStats, Error> {
        let tables = self.tables.read().await;
        let count_status = |status: ExecutionStatus| {
            tables
                .executions
                .values()
                .filter(|e| e.status == status)
                .count() as u64
        };

        Ok(OverviewStats {
            total_tasks: tables.tasks.len() as u64,
            enabled_tasks: tables
                .tasks
                .values()
                .filter(|t| t.status == TaskStatus::Enabled)
                .count() as u64,
            total_executions: tables.executions.len() as u64,
            success_executions: count_status(ExecutionStatus::Success),
            failed_executions: count_status(ExecutionStatus::Failed),
            running_executions: count_status(ExecutionStatus::Running),
            total_records: tables
                .executions
                .values()
                .filter(|e| e.status == ExecutionStatus::Success)
                .map(|e| e.records_collected)
                .sum(),
        })
    }

    async fn task_stats(&self) -> Result<Vec<TaskStats>, Error> {
        let tables = self.tables.read().await;

        Ok(tables
            .tasks
            .values()
            .map(|task| {
                let runs: Vec<&TaskExecution> = tables
                    .executions
                    .values()
                    .filter(|e| e.task_id == task.id)
                    .collect();

                TaskStats {
                    id: task.id,
                    name: task.name.clone(),
                    task_type: task.task_type,
                    status: task.status,
                    total_runs: runs.len() as u64,
                    success_runs: runs
                        .iter()
                        .filter(|e| e.status == ExecutionStatus::Success)
                        .count() as u64,
                    failed_runs: runs
                        .iter()
                        .filter(|e| e.status == ExecutionStatus::Failed)
                        .count() as u64,
                    total_records: runs.iter().map(|e| e.records_collected).sum(),
                    last_run_time: runs.iter().map(|e| e.start_time).max(),
                }
            })
            .collect())
    }
}

impl DatabaseTrait for MemoryStateDb {}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        datasource::{DataSourceStatus, DataSourceType},
        task::TaskType,
    };

    async fn seeded() -> (MemoryStateDb, DataSource) {
        let db = MemoryStateDb::new();
        let ds = db
            .create_datasource(DataSourceDraft {
                name: "site".to_string(),
                source_type: DataSourceType::Web,
                status: DataSourceStatus::Active,
                config: json!({"url": "https://example.com"}),
                description: None,
            })
            .await
            .expect("create datasource");
        (db, ds)
    }

    fn draft(data_source_id: i64, status: TaskStatus) -> TaskDraft {
        TaskDraft {
            name: "crawl".to_string(),
            description: Some("front page".to_string()),
            task_type: TaskType::WebRpa,
            data_source_id,
            cron: Some("0 * * * *".to_string()),
            status,
            replicas: 1,
            execution_timeout: 30,
            max_retries: 2,
            config: None,
        }
    }

    #[tokio::test]
    async fn datasource_referenced_by_enabled_task_cannot_be_deleted() {
        let (db, ds) = seeded().await;
        let task = db
            .create_task(draft(ds.id, TaskStatus::Enabled))
            .await
            .expect("create task");

        assert!(matches!(
            db.delete_datasource(ds.id).await,
            Err(Error::Conflict(_))
        ));

        db.set_task_status(task.id, TaskStatus::Disabled, None)
            .await
            .expect("disable");
        assert!(db.delete_datasource(ds.id).await.is_ok());
    }

    #[tokio::test]
    async fn executions_finalize_exactly_once() {
        let (db, ds) = seeded().await;
        let task = db
            .create_task(draft(ds.id, TaskStatus::Enabled))
            .await
            .expect("create task");

        let id = db
            .create_execution(NewExecution {
                task_id: task.id,
                worker_id: "w1".to_string(),
                retry_count: 0,
                start_time: Utc::now(),
            })
            .await
            .expect("create execution");

        db.finalize_execution(id, ExecutionOutcome::Success { records_collected: 4 }, Utc::now())
            .await
            .expect("finalize");

        assert!(matches!(
            db.finalize_execution(
                id,
                ExecutionOutcome::Failed {
                    error_message: "late".to_string()
                },
                Utc::now()
            )
            .await,
            Err(Error::Conflict(_))
        ));

        let stats = db.overview_stats().await.expect("stats");
        assert_eq!(stats.success_executions, 1);
        assert_eq!(stats.total_records, 4);
    }
}
