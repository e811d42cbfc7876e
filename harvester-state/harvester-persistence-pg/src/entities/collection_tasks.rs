use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "collection_tasks")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(column_type = "Text")]
    pub name: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,
    #[sea_orm(column_name = "type")]
    pub task_type: String,
    pub data_source_id: i64,
    #[sea_orm(column_type = "Text", nullable)]
    pub cron: Option<String>,
    pub status: String,
    pub replicas: i32,
    pub execution_timeout: i64,
    pub max_retries: i32,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub config: Option<Json>,
    pub next_run_time: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::task_executions::Entity")]
    TaskExecutions,
    #[sea_orm(has_many = "super::collected_records::Entity")]
    CollectedRecords,
}

impl Related<super::task_executions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TaskExecutions.def()
    }
}

impl Related<super::collected_records::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CollectedRecords.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
