use std::sync::Arc;

use chrono::Utc;
use harvester_common::{
    error::Error,
    execution::{ExecutionOutcome, NewExecution},
    record::Record,
    state::DatabaseTrait,
};
use tracing::{debug, error, warn};

pub const ORPHANED_EXECUTION_MESSAGE: &str = "worker restarted";

/// Durable history of attempts.
/// ---
/// Every attempt gets its own `running` row before the connector is
/// invoked and is finalized exactly once afterwards.
#[derive(Debug, Clone)]
pub struct ExecutionTracker {
    state_manager: Arc<dyn DatabaseTrait>,
    worker_id: String,
}

impl ExecutionTracker {
    pub fn new(state_manager: Arc<dyn DatabaseTrait>, worker_id: String) -> Self {
        Self {
            state_manager,
            worker_id,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Opens a `running` row for attempt `retry_count` (0-based).
    pub async fn start_attempt(&self, task_id: i64, retry_count: u32) -> Result<i64, Error> {
        let id = self
            .state_manager
            .create_execution(NewExecution {
                task_id,
                worker_id: self.worker_id.clone(),
                retry_count,
                start_time: Utc::now(),
            })
            .await?;

        debug!(
            "Tracker [{}]: execution {} started for task {} (retry {})",
            self.worker_id, id, task_id, retry_count
        );
        Ok(id)
    }

    /// Stores the collected records, then marks the attempt successful.
    /// ---
    /// If the records cannot be stored, the attempt is marked failed with
    /// the storage error instead and that error is returned.
    pub async fn finish_success(
        &self,
        task_id: i64,
        execution_id: i64,
        records: Vec<Record>,
    ) -> Result<u64, Error> {
        let saved = match self
            .state_manager
            .save_records(task_id, execution_id, records)
            .await
        {
            Ok(saved) => saved,
            Err(e) => {
                error!(
                    "Tracker [{}]: failed to store records of execution {}: {}",
                    self.worker_id, execution_id, e
                );
                self.finish_failure(execution_id, &e).await;
                return Err(e);
            }
        };

        self.state_manager
            .finalize_execution(
                execution_id,
                ExecutionOutcome::Success {
                    records_collected: saved,
                },
                Utc::now(),
            )
            .await?;

        Ok(saved)
    }

    /// Marks the attempt failed with `cause` as its message.
    /// ---
    /// Storage errors are logged; the row is then recovered as orphaned
    /// on the next startup.
    pub async fn finish_failure(&self, execution_id: i64, cause: &Error) {
        let outcome = ExecutionOutcome::Failed {
            error_message: cause.to_string(),
        };

        if let Err(e) = self
            .state_manager
            .finalize_execution(execution_id, outcome, Utc::now())
            .await
        {
            error!(
                "Tracker [{}]: failed to finalize execution {}: {}",
                self.worker_id, execution_id, e
            );
        }
    }

    /// Fails rows this worker left `running` in a previous life.
    pub async fn recover_orphans(&self) -> Result<u64, Error> {
        let touched = self
            .state_manager
            .fail_orphaned_executions(&self.worker_id, ORPHANED_EXECUTION_MESSAGE, Utc::now())
            .await?;

        if touched > 0 {
            warn!(
                "Tracker [{}]: marked {} orphaned execution(s) as failed",
                self.worker_id, touched
            );
        }
        Ok(touched)
    }
}

#[cfg(test)]
mod tests {
    use harvester_common::{
        datasource::{DataSourceDraft, DataSourceStatus, DataSourceType},
        execution::ExecutionStatus,
        state::{DataSourceDbTrait, ExecutionDbTrait, TaskDbTrait, memory::MemoryStateDb},
        task::{TaskDraft, TaskStatus, TaskType},
    };
    use serde_json::json;

    use super::*;

    async fn db_with_task() -> (Arc<MemoryStateDb>, i64) {
        let db = Arc::new(MemoryStateDb::new());
        let ds = db
            .create_datasource(DataSourceDraft {
                name: "shop".to_string(),
                source_type: DataSourceType::Web,
                status: DataSourceStatus::Active,
                config: json!({"url": "https://shop.local"}),
                description: None,
            })
            .await
            .unwrap();
        let task = db
            .create_task(TaskDraft {
                name: "prices".to_string(),
                description: None,
                task_type: TaskType::WebRpa,
                data_source_id: ds.id,
                cron: None,
                status: TaskStatus::Enabled,
                replicas: 1,
                execution_timeout: 30,
                max_retries: 0,
                config: None,
            })
            .await
            .unwrap();
        (db, task.id)
    }

    #[tokio::test]
    async fn success_stores_records_and_count() {
        let (db, task_id) = db_with_task().await;
        let tracker = ExecutionTracker::new(db.clone(), "w1".to_string());

        let id = tracker.start_attempt(task_id, 0).await.unwrap();
        let mut record = Record::new();
        record.insert("price".to_string(), json!("9.99"));
        let saved = tracker
            .finish_success(task_id, id, vec![record.clone(), record])
            .await
            .unwrap();

        assert_eq!(saved, 2);
        let execution = db.get_execution(id).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Success);
        assert_eq!(execution.records_collected, 2);
        assert!(execution.end_time.is_some());
        assert_eq!(db.records_for(task_id).await.len(), 2);
    }

    #[tokio::test]
    async fn failure_keeps_the_error_message() {
        let (db, task_id) = db_with_task().await;
        let tracker = ExecutionTracker::new(db.clone(), "w1".to_string());

        let id = tracker.start_attempt(task_id, 1).await.unwrap();
        tracker
            .finish_failure(id, &Error::ConnectivityFailure("connection refused".into()))
            .await;

        let execution = db.get_execution(id).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.retry_count, 1);
        assert!(execution.error_message.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn recovery_only_touches_own_running_rows() {
        let (db, task_id) = db_with_task().await;
        let mine = ExecutionTracker::new(db.clone(), "w1".to_string());
        let other = ExecutionTracker::new(db.clone(), "w2".to_string());

        let orphan = mine.start_attempt(task_id, 0).await.unwrap();
        let done = mine.start_attempt(task_id, 0).await.unwrap();
        mine.finish_success(task_id, done, Vec::new()).await.unwrap();
        let foreign = other.start_attempt(task_id, 0).await.unwrap();

        assert_eq!(mine.recover_orphans().await.unwrap(), 1);

        let orphan = db.get_execution(orphan).await.unwrap().unwrap();
        assert_eq!(orphan.status, ExecutionStatus::Failed);
        assert_eq!(orphan.error_message.as_deref(), Some(ORPHANED_EXECUTION_MESSAGE));
        assert_eq!(
            db.get_execution(done).await.unwrap().unwrap().status,
            ExecutionStatus::Success
        );
        assert_eq!(
            db.get_execution(foreign).await.unwrap().unwrap().status,
            ExecutionStatus::Running
        );
    }
}
