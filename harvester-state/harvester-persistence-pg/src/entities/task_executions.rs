use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "task_executions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub task_id: i64,
    #[sea_orm(column_type = "Text")]
    pub worker_id: String,
    pub status: String,
    pub start_time: DateTimeWithTimeZone,
    pub end_time: Option<DateTimeWithTimeZone>,
    pub records_collected: i64,
    pub retry_count: i32,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::collection_tasks::Entity",
        from = "Column::TaskId",
        to = "super::collection_tasks::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    CollectionTasks,
    #[sea_orm(has_many = "super::collected_records::Entity")]
    CollectedRecords,
}

impl Related<super::collection_tasks::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CollectionTasks.def()
    }
}

impl Related<super::collected_records::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CollectedRecords.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
