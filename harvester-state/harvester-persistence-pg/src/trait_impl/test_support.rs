use harvester_common::{
    datasource::{DataSourceDraft, DataSourceStatus, DataSourceType},
    task::{TaskDraft, TaskStatus, TaskType},
};
use sea_orm::ConnectOptions;
use serde_json::json;

use crate::db::PostgresStateDb;

/// Fresh in-memory SQLite store with the full schema applied.
pub(crate) async fn sqlite_db() -> PostgresStateDb {
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).sqlx_logging(false);

    let db = PostgresStateDb::connect_with(opt)
        .await
        .expect("connect sqlite");
    db.run_migrations().await.expect("migrate");
    db
}

pub(crate) fn datasource_draft(name: &str) -> DataSourceDraft {
    DataSourceDraft {
        name: name.to_string(),
        source_type: DataSourceType::Web,
        status: DataSourceStatus::Active,
        config: json!({"url": "https://example.com"}),
        description: None,
    }
}

pub(crate) fn task_draft(data_source_id: i64, status: TaskStatus) -> TaskDraft {
    TaskDraft {
        name: "crawl".to_string(),
        description: Some("Front page headlines".to_string()),
        task_type: TaskType::WebRpa,
        data_source_id,
        cron: Some("*/5 * * * *".to_string()),
        status,
        replicas: 2,
        execution_timeout: 60,
        max_retries: 3,
        config: Some(json!({"selectors": {"title": "h1"}})),
    }
}
