use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harvester_common::{
    common::{Page, Pagination},
    error::Error,
    execution::{ExecutionFilter, ExecutionOutcome, ExecutionStatus, NewExecution, TaskExecution},
    state::ExecutionDbTrait,
};
use sea_orm::{
    ActiveModelTrait,
    ActiveValue::{NotSet, Set},
    ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
    prelude::Expr,
};

use crate::{
    db::PostgresStateDb,
    entities::{collection_tasks, task_executions},
    mapping::{db_error_to_domain, execution_to_domain, to_db_int, to_db_time},
};

fn filter_condition(filter: &ExecutionFilter) -> Condition {
    let mut condition = Condition::all();
    if let Some(task_id) = filter.task_id {
        condition = condition.add(task_executions::Column::TaskId.eq(task_id));
    }
    if let Some(status) = filter.status {
        condition = condition.add(task_executions::Column::Status.eq(status.to_string()));
    }
    condition
}

#[async_trait]
impl ExecutionDbTrait for PostgresStateDb {
    async fn create_execution(&self, execution: NewExecution) -> Result<i64, Error> {
        let model = task_executions::ActiveModel {
            id: NotSet,
            task_id: Set(execution.task_id),
            worker_id: Set(execution.worker_id),
            status: Set(ExecutionStatus::Running.to_string()),
            start_time: Set(to_db_time(execution.start_time)),
            end_time: Set(None),
            records_collected: Set(0),
            retry_count: Set(to_db_int(execution.retry_count, "retry_count")?),
            error_message: Set(None),
        }
        .insert(&self.conn)
        .await
        .map_err(db_error_to_domain)?;

        Ok(model.id)
    }

    async fn finalize_execution(
        &self,
        id: i64,
        outcome: ExecutionOutcome,
        end_time: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mut update = task_executions::Entity::update_many()
            .col_expr(
                task_executions::Column::Status,
                Expr::value(outcome.status().to_string()),
            )
            .col_expr(
                task_executions::Column::EndTime,
                Expr::value(to_db_time(end_time)),
            );

        update = match outcome {
            ExecutionOutcome::Success { records_collected } => update.col_expr(
                task_executions::Column::RecordsCollected,
                Expr::value(to_db_int::<i64, _>(records_collected, "records_collected")?),
            ),
            ExecutionOutcome::Failed { error_message } => update.col_expr(
                task_executions::Column::ErrorMessage,
                Expr::value(error_message),
            ),
        };

        // Guarded on `running` so a row resolves exactly once
        let res = update
            .filter(task_executions::Column::Id.eq(id))
            .filter(task_executions::Column::Status.eq(ExecutionStatus::Running.to_string()))
            .exec(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        if res.rows_affected > 0 {
            return Ok(());
        }

        match task_executions::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .map_err(db_error_to_domain)?
        {
            Some(_) => Err(Error::Conflict(format!("execution {id} is already finalized"))),
            None => Err(Error::not_found("TaskExecution", id)),
        }
    }

    async fn get_execution(&self, id: i64) -> Result<Option<TaskExecution>, Error> {
        task_executions::Entity::find_by_id(id)
            .find_also_related(collection_tasks::Entity)
            .one(&self.conn)
            .await
            .map_err(db_error_to_domain)?
            .map(|(execution, task)| execution_to_domain(execution, task))
            .transpose()
    }

    async fn list_executions(
        &self,
        filter: ExecutionFilter,
        pagination: Pagination,
    ) -> Result<Page<TaskExecution>, Error> {
        let total = task_executions::Entity::find()
            .filter(filter_condition(&filter))
            .count(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        let rows = task_executions::Entity::find()
            .filter(filter_condition(&filter))
            .find_also_related(collection_tasks::Entity)
            .order_by_desc(task_executions::Column::StartTime)
            .order_by_desc(task_executions::Column::Id)
            .limit(pagination.limit)
            .offset(pagination.offset)
            .all(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        let items = rows
            .into_iter()
            .map(|(execution, task)| execution_to_domain(execution, task))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(items, total))
    }

    async fn count_running_executions(&self, task_id: i64) -> Result<u64, Error> {
        task_executions::Entity::find()
            .filter(task_executions::Column::TaskId.eq(task_id))
            .filter(task_executions::Column::Status.eq(ExecutionStatus::Running.to_string()))
            .count(&self.conn)
            .await
            .map_err(db_error_to_domain)
    }

    async fn fail_orphaned_executions(
        &self,
        worker_id: &str,
        error_message: &str,
        end_time: DateTime<Utc>,
    ) -> Result<u64, Error> {
        let res = task_executions::Entity::update_many()
            .col_expr(
                task_executions::Column::Status,
                Expr::value(ExecutionStatus::Failed.to_string()),
            )
            .col_expr(
                task_executions::Column::EndTime,
                Expr::value(to_db_time(end_time)),
            )
            .col_expr(
                task_executions::Column::ErrorMessage,
                Expr::value(error_message.to_string()),
            )
            .filter(task_executions::Column::WorkerId.eq(worker_id))
            .filter(task_executions::Column::Status.eq(ExecutionStatus::Running.to_string()))
            .exec(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        Ok(res.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use harvester_common::{
        state::{DataSourceDbTrait, TaskDbTrait},
        task::TaskStatus,
    };

    use super::*;
    use crate::trait_impl::test_support::{datasource_draft, sqlite_db, task_draft};

    async fn seeded_task(db: &PostgresStateDb) -> i64 {
        let ds = db
            .create_datasource(datasource_draft("site"))
            .await
            .expect("ds");
        db.create_task(task_draft(ds.id, TaskStatus::Enabled))
            .await
            .expect("task")
            .id
    }

    fn new_execution(task_id: i64, worker_id: &str, retry_count: u32) -> NewExecution {
        NewExecution {
            task_id,
            worker_id: worker_id.to_string(),
            retry_count,
            start_time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn execution_resolves_exactly_once() {
        let db = sqlite_db().await;
        let task_id = seeded_task(&db).await;
        let id = db
            .create_execution(new_execution(task_id, "w1", 0))
            .await
            .expect("create");

        assert_eq!(db.count_running_executions(task_id).await.expect("count"), 1);

        db.finalize_execution(
            id,
            ExecutionOutcome::Success {
                records_collected: 12,
            },
            Utc::now(),
        )
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

        let stored = db.get_execution(id).await.expect("get").expect("exists");
        assert_eq!(stored.status, ExecutionStatus::Success);
        assert_eq!(stored.records_collected, 12);
        assert_eq!(stored.task_name.as_deref(), Some("crawl"));
        assert!(stored.end_time.is_some());
        assert_eq!(db.count_running_executions(task_id).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn finalizing_an_unknown_execution_is_not_found() {
        let db = sqlite_db().await;
        assert!(matches!(
            db.finalize_execution(
                77,
                ExecutionOutcome::Failed {
                    error_message: "x".to_string()
                },
                Utc::now()
            )
            .await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn listing_is_most_recent_first_and_filterable() {
        let db = sqlite_db().await;
        let task_id = seeded_task(&db).await;
        let base = Utc::now();

        let mut ids = Vec::new();
        for (offset, retry) in [(0, 0), (1, 1), (2, 2)] {
            let id = db
                .create_execution(NewExecution {
                    start_time: base + Duration::seconds(offset),
                    ..new_execution(task_id, "w1", retry)
                })
                .await
                .expect("create");
            ids.push(id);
        }
        db.finalize_execution(
            ids[0],
            ExecutionOutcome::Failed {
                error_message: "Connectivity Failure: refused".to_string(),
            },
            Utc::now(),
        )
        .await
        .expect("finalize");

        let all = db
            .list_executions(
                ExecutionFilter {
                    task_id: Some(task_id),
                    status: None,
                },
                Pagination::default(),
            )
            .await
            .expect("list");
        let listed: Vec<i64> = all.items.iter().map(|e| e.id).collect();
        assert_eq!(listed, vec![ids[2], ids[1], ids[0]]);
        assert_eq!(all.items[0].retry_count, 2);

        let failed = db
            .list_executions(
                ExecutionFilter {
                    task_id: None,
                    status: Some(ExecutionStatus::Failed),
                },
                Pagination::default(),
            )
            .await
            .expect("list");
        assert_eq!(failed.total, 1);
        assert_eq!(
            failed.items[0].error_message.as_deref(),
            Some("Connectivity Failure: refused")
        );
    }

    #[tokio::test]
    async fn orphan_recovery_only_touches_this_workers_running_rows() {
        let db = sqlite_db().await;
        let task_id = seeded_task(&db).await;
        let mine = db
            .create_execution(new_execution(task_id, "w1", 0))
            .await
            .expect("create");
        let theirs = db
            .create_execution(new_execution(task_id, "w2", 0))
            .await
            .expect("create");

        let touched = db
            .fail_orphaned_executions("w1", "worker restarted", Utc::now())
            .await
            .expect("recover");
        assert_eq!(touched, 1);

        let mine = db.get_execution(mine).await.expect("get").expect("exists");
        assert_eq!(mine.status, ExecutionStatus::Failed);
        assert_eq!(mine.error_message.as_deref(), Some("worker restarted"));

        let theirs = db.get_execution(theirs).await.expect("get").expect("exists");
        assert_eq!(theirs.status, ExecutionStatus::Running);
    }
}
