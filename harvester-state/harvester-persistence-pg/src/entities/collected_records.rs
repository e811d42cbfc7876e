use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "collected_records")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub task_id: i64,
    pub execution_id: i64,
    #[sea_orm(column_type = "JsonBinary")]
    pub data: Json,
    pub collected_at: DateTimeWithTimeZone,
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
    #[sea_orm(
        belongs_to = "super::task_executions::Entity",
        from = "Column::ExecutionId",
        to = "super::task_executions::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    TaskExecutions,
}

impl Related<super::collection_tasks::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CollectionTasks.def()
    }
}

impl Related<super::task_executions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TaskExecutions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
