use sea_orm_migration::prelude::*;

#[derive(Iden)]
#[iden = "task_executions"]
pub enum TaskExecution {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "task_id"]
    TaskId,
    #[iden = "worker_id"]
    WorkerId,
    #[iden = "status"]
    Status,
    #[iden = "start_time"]
    StartTime,
    #[iden = "end_time"]
    EndTime,
    #[iden = "records_collected"]
    RecordsCollected,
    #[iden = "retry_count"]
    RetryCount,
    #[iden = "error_message"]
    ErrorMessage,
}
