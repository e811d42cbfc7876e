use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use harvester_common::{
    error::Error,
    execution::ExecutionStatus,
    stats::{OverviewStats, TaskStats},
    state::StatsDbTrait,
    task::TaskStatus,
};
use sea_orm::{
    ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
    prelude::Expr,
    sea_query::{Alias, Func},
};

use crate::{
    db::PostgresStateDb,
    entities::{collection_tasks, task_executions},
    mapping::{db_error_to_domain, task_to_domain},
};

/// Aggregates of one `(task_id, status)` group
type StatusGroup = (i64, String, i64, Option<i64>, Option<DateTime<FixedOffset>>);

fn as_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

impl PostgresStateDb {
    async fn count_executions(&self, status: ExecutionStatus) -> Result<u64, Error> {
        task_executions::Entity::find()
            .filter(task_executions::Column::Status.eq(status.to_string()))
            .count(&self.conn)
            .await
            .map_err(db_error_to_domain)
    }
}

#[async_trait]
impl StatsDbTrait for PostgresStateDb {
    async fn overview_stats(&self) -> Result<OverviewStats, Error> {
        let total_tasks = collection_tasks::Entity::find()
            .count(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        let enabled_tasks = collection_tasks::Entity::find()
            .filter(collection_tasks::Column::Status.eq(TaskStatus::Enabled.to_string()))
            .count(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        let total_executions = task_executions::Entity::find()
            .count(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        // SUM over bigint is numeric in Postgres, cast it back
        let total_records: Option<i64> = task_executions::Entity::find()
            .select_only()
            .column_as(
                Expr::expr(Func::sum(Expr::col(task_executions::Column::RecordsCollected)))
                    .cast_as(Alias::new("bigint")),
                "total_records",
            )
            .filter(task_executions::Column::Status.eq(ExecutionStatus::Success.to_string()))
            .into_tuple::<Option<i64>>()
            .one(&self.conn)
            .await
            .map_err(db_error_to_domain)?
            .flatten();

        Ok(OverviewStats {
            total_tasks,
            enabled_tasks,
            total_executions,
            success_executions: self.count_executions(ExecutionStatus::Success).await?,
            failed_executions: self.count_executions(ExecutionStatus::Failed).await?,
            running_executions: self.count_executions(ExecutionStatus::Running).await?,
            total_records: total_records.map(as_count).unwrap_or_default(),
        })
    }

    async fn task_stats(&self) -> Result<Vec<TaskStats>, Error> {
        let tasks = collection_tasks::Entity::find()
            .order_by_asc(collection_tasks::Column::Id)
            .all(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        let groups: Vec<StatusGroup> = task_executions::Entity::find()
            .select_only()
            .column(task_executions::Column::TaskId)
            .column(task_executions::Column::Status)
            .column_as(
                Expr::expr(Func::count(Expr::col(task_executions::Column::Id)))
                    .cast_as(Alias::new("bigint")),
                "runs",
            )
            .column_as(
                Expr::expr(Func::sum(Expr::col(task_executions::Column::RecordsCollected)))
                    .cast_as(Alias::new("bigint")),
                "records",
            )
            .column_as(
                Expr::expr(Func::max(Expr::col(task_executions::Column::StartTime))),
                "last_start",
            )
            .group_by(task_executions::Column::TaskId)
            .group_by(task_executions::Column::Status)
            .into_tuple()
            .all(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        let mut by_task: HashMap<i64, Vec<StatusGroup>> = HashMap::new();
        for group in groups {
            by_task.entry(group.0).or_default().push(group);
        }

        tasks
            .into_iter()
            .map(|model| {
                let task = task_to_domain(model)?;
                let mut stats = TaskStats {
                    id: task.id,
                    name: task.name,
                    task_type: task.task_type,
                    status: task.status,
                    total_runs: 0,
                    success_runs: 0,
                    failed_runs: 0,
                    total_records: 0,
                    last_run_time: None,
                };

                for (_, status, runs, records, last_start) in
                    by_task.remove(&task.id).unwrap_or_default()
                {
                    let runs = as_count(runs);
                    stats.total_runs += runs;
                    stats.total_records += records.map(as_count).unwrap_or_default();
                    if status == ExecutionStatus::Success.to_string() {
                        stats.success_runs += runs;
                    } else if status == ExecutionStatus::Failed.to_string() {
                        stats.failed_runs += runs;
                    }

                    let last_start: Option<DateTime<Utc>> = last_start.map(Into::into);
                    if last_start > stats.last_run_time {
                        stats.last_run_time = last_start;
                    }
                }

                Ok(stats)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use harvester_common::{
        execution::{ExecutionOutcome, NewExecution},
        state::{DataSourceDbTrait, ExecutionDbTrait, TaskDbTrait},
    };

    use super::*;
    use crate::trait_impl::test_support::{datasource_draft, sqlite_db, task_draft};

    #[tokio::test]
    async fn empty_store_reports_zeroes() {
        let db = sqlite_db().await;
        assert_eq!(
            db.overview_stats().await.expect("stats"),
            OverviewStats::default()
        );
        assert!(db.task_stats().await.expect("stats").is_empty());
    }

    #[tokio::test]
    async fn counters_follow_execution_outcomes() {
        let db = sqlite_db().await;
        let ds = db
            .create_datasource(datasource_draft("site"))
            .await
            .expect("ds");
        let busy = db
            .create_task(task_draft(ds.id, TaskStatus::Enabled))
            .await
            .expect("task");
        let idle = db
            .create_task(task_draft(ds.id, TaskStatus::Disabled))
            .await
            .expect("task");

        let start = Utc::now();
        let mut last = start;
        for (i, outcome) in [
            Some(ExecutionOutcome::Success {
                records_collected: 5,
            }),
            Some(ExecutionOutcome::Failed {
                error_message: "Timeout: attempt exceeded 60s".to_string(),
            }),
            Some(ExecutionOutcome::Success {
                records_collected: 7,
            }),
            None,
        ]
        .into_iter()
        .enumerate()
        {
            last = start + Duration::seconds(i as i64);
            let id = db
                .create_execution(NewExecution {
                    task_id: busy.id,
                    worker_id: "w1".to_string(),
                    retry_count: 0,
                    start_time: last,
                })
                .await
                .expect("execution");
            if let Some(outcome) = outcome {
                db.finalize_execution(id, outcome, Utc::now())
                    .await
                    .expect("finalize");
            }
        }

        let overview = db.overview_stats().await.expect("overview");
        assert_eq!(
            overview,
            OverviewStats {
                total_tasks: 2,
                enabled_tasks: 1,
                total_executions: 4,
                success_executions: 2,
                failed_executions: 1,
                running_executions: 1,
                total_records: 12,
            }
        );

        let per_task = db.task_stats().await.expect("task stats");
        assert_eq!(per_task.len(), 2);
        assert_eq!(per_task[0].id, busy.id);
        assert_eq!(per_task[0].total_runs, 4);
        assert_eq!(per_task[0].success_runs, 2);
        assert_eq!(per_task[0].failed_runs, 1);
        assert_eq!(per_task[0].total_records, 12);
        assert_eq!(
            per_task[0].last_run_time.map(|t| t.timestamp()),
            Some(last.timestamp())
        );
        assert_eq!(per_task[1].id, idle.id);
        assert_eq!(per_task[1].total_runs, 0);
        assert_eq!(per_task[1].last_run_time, None);
    }
}
