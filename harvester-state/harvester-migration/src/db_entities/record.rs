use sea_orm_migration::prelude::*;

#[derive(Iden)]
#[iden = "collected_records"]
pub enum CollectedRecord {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "task_id"]
    TaskId,
    #[iden = "execution_id"]
    ExecutionId,
    #[iden = "data"]
    Data,
    #[iden = "collected_at"]
    CollectedAt,
}
