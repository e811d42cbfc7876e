use async_trait::async_trait;
use chrono::Utc;
use harvester_common::{
    common::{Page, Pagination},
    error::Error,
    record::{Record, StoredRecord},
    state::RecordDbTrait,
};
use sea_orm::{
    ActiveValue::{NotSet, Set},
    ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
    TransactionTrait,
};

use crate::{
    db::PostgresStateDb,
    entities::collected_records,
    mapping::{db_error_to_domain, record_to_domain, to_db_time},
};

const INSERT_CHUNK_SIZE: usize = 500;

#[async_trait]
impl RecordDbTrait for PostgresStateDb {
    async fn save_records(
        &self,
        task_id: i64,
        execution_id: i64,
        records: Vec<Record>,
    ) -> Result<u64, Error> {
        if records.is_empty() {
            return Ok(0);
        }

        let count = records.len() as u64;
        let collected_at = to_db_time(Utc::now());
        let models: Vec<collected_records::ActiveModel> = records
            .into_iter()
            .map(|data| collected_records::ActiveModel {
                id: NotSet,
                task_id: Set(task_id),
                execution_id: Set(execution_id),
                data: Set(serde_json::Value::Object(data)),
                collected_at: Set(collected_at),
            })
            .collect();

        let txn = self.conn.begin().await.map_err(db_error_to_domain)?;

        for chunk in models.chunks(INSERT_CHUNK_SIZE) {
            if let Err(db_err) = collected_records::Entity::insert_many(chunk.to_vec())
                .exec(&txn)
                .await
            {
                txn.rollback().await.map_err(db_error_to_domain)?;
                return Err(db_error_to_domain(db_err));
            }
        }

        txn.commit().await.map_err(db_error_to_domain)?;

        Ok(count)
    }

    async fn list_records(
        &self,
        task_id: i64,
        pagination: Pagination,
    ) -> Result<Page<StoredRecord>, Error> {
        let query =
            collected_records::Entity::find().filter(collected_records::Column::TaskId.eq(task_id));

        let total = query
            .clone()
            .count(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        let models = query
            .order_by_desc(collected_records::Column::Id)
            .limit(pagination.limit)
            .offset(pagination.offset)
            .all(&self.conn)
            .await
            .map_err(db_error_to_domain)?;

        let items = models
            .into_iter()
            .map(record_to_domain)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(items, total))
    }
}

#[cfg(test)]
mod tests {
    use harvester_common::{
        execution::NewExecution,
        state::{DataSourceDbTrait, ExecutionDbTrait, TaskDbTrait},
        task::TaskStatus,
    };
    use serde_json::json;

    use super::*;
    use crate::trait_impl::test_support::{datasource_draft, sqlite_db, task_draft};

    fn record(title: &str) -> Record {
        let mut record = Record::new();
        record.insert("title".to_string(), json!(title));
        record.insert("rank".to_string(), json!(1));
        record
    }

    #[tokio::test]
    async fn records_page_newest_first() {
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

        let saved = db
            .save_records(task.id, exec_id, vec![record("a"), record("b"), record("c")])
            .await
            .expect("save");
        assert_eq!(saved, 3);
        assert_eq!(db.save_records(task.id, exec_id, vec![]).await.expect("empty"), 0);

        let page = db
            .list_records(task.id, Pagination::from_page(Some(1), Some(2)))
            .await
            .expect("list");
        assert_eq!(page.total, 3);
        let titles: Vec<&serde_json::Value> =
            page.items.iter().filter_map(|r| r.data.get("title")).collect();
        assert_eq!(titles, vec![&json!("c"), &json!("b")]);
        assert_eq!(page.items[0].execution_id, exec_id);
    }
}
