use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harvester_common::{
    common::{Page, Pagination},
    error::Error,
    state::{TaskDbTrait, TaskFilter},
    task::{Task, TaskDraft, TaskStatus},
};
use sea_orm::{
    ActiveModelTrait,
    ActiveValue::{NotSet, Set},
    ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, TransactionTrait,
    prelude::Expr,
    sea_query::Func,
};

use crate::{
    db::PostgresStateDb,
    entities::{collected_records, collection_tasks, data_sources, task_executions},
    mapping::{db_error_to_domain, task_to_domain, to_db_int, to_db_time},
};

async fn ensure_datasource_exists<C: ConnectionTrait>(conn: &C, id: i64) -> Result<(), Error> {
    match data_sources::Entity::find_by_id(id)
        .one(conn)
        .await
        .map_err(db_error_to_domain)?
    {
        Some(_) => Ok(()),
        None => Err(Error::not_found("DataSource", id)),
    }
}

fn search_condition(needle: &str) -> Condition {
    let pattern = format!("%{}%", needle.to_lowercase());

    Condition::any()
        .add(Expr::expr(Func::lower(Expr::col(collection_tasks::Column::Name))).like(pattern.clone()))
        .add(
            Expr::expr(Func::lower(Expr::col(collection_tasks::Column::Description)))
                .like(pattern),
        )
}

#[async_trait]
impl TaskDbTrait for PostgresStateDb {
    async fn get_task(&self, id: i64) -> Result<Option<Task>, Error> {
        collection_tasks::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .map_err(db_error_to_domain)?
            .map(task_to_domain)
            .transpose()
    }

    async fn list_tasks(
        &self,
        filter: TaskFilter,
        pagination: Pagination,
    ) -> Result<Page<Task>, Error> {
        let mut query = collection_tasks::Entity::find();
        if let Some(status) = filter.status {
            query = query.filter(collection_tasks::Column::Status.eq(status.to_string()));
        }
        if let Some(needle) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
            query = query.filter(search_condition(needle.trim()));
        }

        let total = query
            .clone()
            .count(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        let models = query
            .order_by_desc(collection_tasks::Column::Id)
            .limit(pagination.limit)
            .offset(pagination.offset)
            .all(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        let items = models
            .into_iter()
            .map(task_to_domain)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(items, total))
    }

    async fn list_schedulable_tasks(&self) -> Result<Vec<Task>, Error> {
        let models = collection_tasks::Entity::find()
            .filter(collection_tasks::Column::Status.eq(TaskStatus::Enabled.to_string()))
            .filter(collection_tasks::Column::Cron.is_not_null())
            .order_by_asc(collection_tasks::Column::Id)
            .all(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        let tasks = models
            .into_iter()
            .map(task_to_domain)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(tasks.into_iter().filter(Task::is_schedulable).collect())
    }

    async fn create_task(&self, draft: TaskDraft) -> Result<Task, Error> {
        ensure_datasource_exists(&self.conn, draft.data_source_id).await?;

        let now = to_db_time(Utc::now());
        let model = collection_tasks::ActiveModel {
            id: NotSet,
            name: Set(draft.name),
            description: Set(draft.description),
            task_type: Set(draft.task_type.to_string()),
            data_source_id: Set(draft.data_source_id),
            cron: Set(draft.cron),
            status: Set(draft.status.to_string()),
            replicas: Set(to_db_int(draft.replicas, "replicas")?),
            execution_timeout: Set(to_db_int(draft.execution_timeout, "execution_timeout")?),
            max_retries: Set(to_db_int(draft.max_retries, "max_retries")?),
            config: Set(draft.config),
            next_run_time: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.conn)
        .await
        .map_err(db_error_to_domain)?;

        task_to_domain(model)
    }

    async fn update_task(&self, id: i64, draft: TaskDraft) -> Result<Task, Error> {
        ensure_datasource_exists(&self.conn, draft.data_source_id).await?;

        let existing = collection_tasks::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .map_err(db_error_to_domain)?
            .ok_or_else(|| Error::not_found("Task", id))?;

        let mut active: collection_tasks::ActiveModel = existing.into();
        active.name = Set(draft.name);
        active.description = Set(draft.description);
        active.task_type = Set(draft.task_type.to_string());
        active.data_source_id = Set(draft.data_source_id);
        active.cron = Set(draft.cron);
        active.status = Set(draft.status.to_string());
        active.replicas = Set(to_db_int(draft.replicas, "replicas")?);
        active.execution_timeout = Set(to_db_int(draft.execution_timeout, "execution_timeout")?);
        active.max_retries = Set(to_db_int(draft.max_retries, "max_retries")?);
        active.config = Set(draft.config);
        active.updated_at = Set(to_db_time(Utc::now()));

        let model = active.update(&self.conn).await.map_err(db_error_to_domain)?;

        task_to_domain(model)
    }

    async fn set_task_status(
        &self,
        id: i64,
        status: TaskStatus,
        next_run_time: Option<DateTime<Utc>>,
    ) -> Result<(), Error> {
        let res = collection_tasks::Entity::update_many()
            .col_expr(collection_tasks::Column::Status, Expr::value(status.to_string()))
            .col_expr(
                collection_tasks::Column::NextRunTime,
                Expr::value(next_run_time.map(to_db_time)),
            )
            .col_expr(
                collection_tasks::Column::UpdatedAt,
                Expr::value(to_db_time(Utc::now())),
            )
            .filter(collection_tasks::Column::Id.eq(id))
            .exec(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        if res.rows_affected == 0 {
            return Err(Error::not_found("Task", id));
        }

        Ok(())
    }

    async fn set_next_run_time(
        &self,
        id: i64,
        next_run_time: Option<DateTime<Utc>>,
    ) -> Result<(), Error> {
        let res = collection_tasks::Entity::update_many()
            .col_expr(
                collection_tasks::Column::NextRunTime,
                Expr::value(next_run_time.map(to_db_time)),
            )
            .filter(collection_tasks::Column::Id.eq(id))
            .exec(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        if res.rows_affected == 0 {
            return Err(Error::not_found("Task", id));
        }

        Ok(())
    }

    async fn delete_task(&self, id: i64) -> Result<(), Error> {
        let txn = self.conn.begin().await.map_err(db_error_to_domain)?;

        collected_records::Entity::delete_many()
            .filter(collected_records::Column::TaskId.eq(id))
            .exec(&txn)
            .await
            .map_err(db_error_to_domain)?;

        task_executions::Entity::delete_many()
            .filter(task_executions::Column::TaskId.eq(id))
            .exec(&txn)
            .await
            .map_err(db_error_to_domain)?;

        let res = collection_tasks::Entity::delete_by_id(id)
            .exec(&txn)
            .await
            .map_err(db_error_to_domain)?;

        if res.rows_affected == 0 {
            txn.rollback().await.map_err(db_error_to_domain)?;
            return Err(Error::not_found("Task", id));
        }

        txn.commit().await.map_err(db_error_to_domain)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use harvester_common::{
        execution::NewExecution,
        state::{DataSourceDbTrait, ExecutionDbTrait, RecordDbTrait},
    };
    use serde_json::json;

    use super::*;
    use crate::trait_impl::test_support::{datasource_draft, sqlite_db, task_draft};

    #[tokio::test]
    async fn create_requires_an_existing_datasource() {
        let db = sqlite_db().await;
        assert!(matches!(
            db.create_task(task_draft(99, TaskStatus::Enabled)).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn task_fields_survive_the_round_trip() {
        let db = sqlite_db().await;
        let ds = db
            .create_datasource(datasource_draft("site"))
            .await
            .expect("ds");
        let created = db
            .create_task(task_draft(ds.id, TaskStatus::Enabled))
            .await
            .expect("task");

        let task = db.get_task(created.id).await.expect("get").expect("exists");
        assert_eq!(task.replicas, 2);
        assert_eq!(task.execution_timeout, 60);
        assert_eq!(task.max_retries, 3);
        assert_eq!(task.cron.as_deref(), Some("*/5 * * * *"));
        assert_eq!(task.config, Some(json!({"selectors": {"title": "h1"}})));
        assert_eq!(task.next_run_time, None);
    }

    #[tokio::test]
    async fn search_is_case_insensitive_over_name_and_description() {
        let db = sqlite_db().await;
        let ds = db
            .create_datasource(datasource_draft("site"))
            .await
            .expect("ds");
        db.create_task(task_draft(ds.id, TaskStatus::Enabled))
            .await
            .expect("task");
        db.create_task(TaskDraft {
            name: "prices".to_string(),
            description: None,
            ..task_draft(ds.id, TaskStatus::Disabled)
        })
        .await
        .expect("task");

        let by_description = db
            .list_tasks(
                TaskFilter {
                    status: None,
                    search: Some("HEADLINES".to_string()),
                },
                Pagination::default(),
            )
            .await
            .expect("list");
        assert_eq!(by_description.total, 1);
        assert_eq!(by_description.items[0].name, "crawl");

        let disabled = db
            .list_tasks(
                TaskFilter {
                    status: Some(TaskStatus::Disabled),
                    search: None,
                },
                Pagination::default(),
            )
            .await
            .expect("list");
        assert_eq!(disabled.total, 1);
        assert_eq!(disabled.items[0].name, "prices");
    }

    #[tokio::test]
    async fn only_enabled_tasks_with_cron_are_schedulable() {
        let db = sqlite_db().await;
        let ds = db
            .create_datasource(datasource_draft("site"))
            .await
            .expect("ds");
        let scheduled = db
            .create_task(task_draft(ds.id, TaskStatus::Enabled))
            .await
            .expect("task");
        db.create_task(TaskDraft {
            cron: None,
            ..task_draft(ds.id, TaskStatus::Enabled)
        })
        .await
        .expect("manual");
        db.create_task(task_draft(ds.id, TaskStatus::Disabled))
            .await
            .expect("disabled");

        let ids: Vec<i64> = db
            .list_schedulable_tasks()
            .await
            .expect("list")
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![scheduled.id]);
    }

    #[tokio::test]
    async fn status_and_next_run_time_are_written_together() {
        let db = sqlite_db().await;
        let ds = db
            .create_datasource(datasource_draft("site"))
            .await
            .expect("ds");
        let task = db
            .create_task(task_draft(ds.id, TaskStatus::Disabled))
            .await
            .expect("task");

        let next = Utc.with_ymd_and_hms(2025, 3, 1, 12, 5, 0).unwrap();
        db.set_task_status(task.id, TaskStatus::Enabled, Some(next))
            .await
            .expect("enable");

        let stored = db.get_task(task.id).await.expect("get").expect("exists");
        assert_eq!(stored.status, TaskStatus::Enabled);
        assert_eq!(stored.next_run_time, Some(next));

        db.set_next_run_time(task.id, Some(next + Duration::minutes(5)))
            .await
            .expect("advance");
        let stored = db.get_task(task.id).await.expect("get").expect("exists");
        assert_eq!(stored.next_run_time, Some(next + Duration::minutes(5)));

        assert!(matches!(
            db.set_next_run_time(4242, None).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn delete_cascades_to_executions_and_records() {
        let db = sqlite_db().await;
        let ds = db
            .create_datasource(datasource_draft("site"))
            .await
            .expect("ds");
        let task = db
            .create_task(task_draft(ds.id, TaskStatus::Enabled))
            .await
            .expect("task");
        let exec_id = db
            .create_execution(NewExecution {
                task_id: task.id,
                worker_id: "w1".to_string(),
                retry_count: 0,
                start_time: Utc::now(),
            })
            .await
            .expect("execution");
        let mut record = harvester_common::record::Record::new();
        record.insert("title".to_string(), json!("hello"));
        db.save_records(task.id, exec_id, vec![record])
            .await
            .expect("records");

        db.delete_task(task.id).await.expect("delete");

        assert!(db.get_task(task.id).await.expect("get").is_none());
        assert!(db.get_execution(exec_id).await.expect("get").is_none());
        assert_eq!(
            db.list_records(task.id, Pagination::default())
                .await
                .expect("records")
                .total,
            0
        );
        assert!(matches!(
            db.delete_task(task.id).await,
            Err(Error::NotFound { .. })
        ));
    }
}
