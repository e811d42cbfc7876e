use sea_orm_migration::prelude::*;

#[derive(Iden)]
#[iden = "collection_tasks"]
pub enum CollectionTask {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "name"]
    Name,
    #[iden = "description"]
    Description,
    #[iden = "type"]
    TaskType,
    #[iden = "data_source_id"]
    DataSourceId,
    #[iden = "cron"]
    Cron,
    #[iden = "status"]
    Status,
    #[iden = "replicas"]
    Replicas,
    #[iden = "execution_timeout"]
    ExecutionTimeout,
    #[iden = "max_retries"]
    MaxRetries,
    #[iden = "config"]
    Config,
    #[iden = "next_run_time"]
    NextRunTime,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}
