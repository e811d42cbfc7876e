use sea_orm_migration::prelude::*;

use crate::db_entities::{CollectedRecord, CollectionTask, DataSource, TaskExecution};

const IDX_TASKS_STATUS: &str = "idx_collection_tasks_status";
const IDX_TASKS_DATA_SOURCE_ID: &str = "idx_collection_tasks_data_source_id";
const IDX_EXECUTIONS_TASK_ID_START_TIME: &str = "idx_task_executions_task_id_start_time";
const IDX_EXECUTIONS_STATUS: &str = "idx_task_executions_status";
const IDX_EXECUTIONS_WORKER_ID_STATUS: &str = "idx_task_executions_worker_id_status";
const IDX_RECORDS_TASK_ID: &str = "idx_collected_records_task_id";
const IDX_RECORDS_EXECUTION_ID: &str = "idx_collected_records_execution_id";

const IDX_NAMES: &[&str] = &[
    IDX_TASKS_STATUS,
    IDX_TASKS_DATA_SOURCE_ID,
    IDX_EXECUTIONS_TASK_ID_START_TIME,
    IDX_EXECUTIONS_STATUS,
    IDX_EXECUTIONS_WORKER_ID_STATUS,
    IDX_RECORDS_TASK_ID,
    IDX_RECORDS_EXECUTION_ID,
];

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DataSource::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DataSource::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DataSource::Name).text().not_null())
                    .col(ColumnDef::new(DataSource::SourceType).string_len(16).not_null())
                    .col(ColumnDef::new(DataSource::Status).string_len(16).not_null())
                    .col(ColumnDef::new(DataSource::Config).json_binary().not_null())
                    .col(ColumnDef::new(DataSource::Description).text())
                    .col(
                        ColumnDef::new(DataSource::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(DataSource::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CollectionTask::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CollectionTask::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CollectionTask::Name).text().not_null())
                    .col(ColumnDef::new(CollectionTask::Description).text())
                    .col(ColumnDef::new(CollectionTask::TaskType).string_len(16).not_null())
                    // No foreign key: a disabled task may outlive its data source
                    .col(
                        ColumnDef::new(CollectionTask::DataSourceId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(CollectionTask::Cron).text())
                    .col(ColumnDef::new(CollectionTask::Status).string_len(16).not_null())
                    .col(
                        ColumnDef::new(CollectionTask::Replicas)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(CollectionTask::ExecutionTimeout)
                            .big_integer()
                            .not_null()
                            .default(3600),
                    )
                    .col(
                        ColumnDef::new(CollectionTask::MaxRetries)
                            .integer()
                            .not_null()
                            .default(3),
                    )
                    .col(ColumnDef::new(CollectionTask::Config).json_binary())
                    .col(ColumnDef::new(CollectionTask::NextRunTime).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(CollectionTask::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CollectionTask::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(TaskExecution::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TaskExecution::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TaskExecution::TaskId).big_integer().not_null())
                    .col(ColumnDef::new(TaskExecution::WorkerId).text().not_null())
                    .col(ColumnDef::new(TaskExecution::Status).string_len(16).not_null())
                    .col(
                        ColumnDef::new(TaskExecution::StartTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(TaskExecution::EndTime).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(TaskExecution::RecordsCollected)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(TaskExecution::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(TaskExecution::ErrorMessage).text())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_task_execution_task")
                            .from(TaskExecution::Table, TaskExecution::TaskId)
                            .to(CollectionTask::Table, CollectionTask::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CollectedRecord::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CollectedRecord::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CollectedRecord::TaskId).big_integer().not_null())
                    .col(
                        ColumnDef::new(CollectedRecord::ExecutionId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(CollectedRecord::Data).json_binary().not_null())
                    .col(
                        ColumnDef::new(CollectedRecord::CollectedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_collected_record_task")
                            .from(CollectedRecord::Table, CollectedRecord::TaskId)
                            .to(CollectionTask::Table, CollectionTask::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_collected_record_execution")
                            .from(CollectedRecord::Table, CollectedRecord::ExecutionId)
                            .to(TaskExecution::Table, TaskExecution::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(IDX_TASKS_STATUS)
                    .table(CollectionTask::Table)
                    .col(CollectionTask::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(IDX_TASKS_DATA_SOURCE_ID)
                    .table(CollectionTask::Table)
                    .col(CollectionTask::DataSourceId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(IDX_EXECUTIONS_TASK_ID_START_TIME)
                    .table(TaskExecution::Table)
                    .col(TaskExecution::TaskId)
                    .col(TaskExecution::StartTime)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(IDX_EXECUTIONS_STATUS)
                    .table(TaskExecution::Table)
                    .col(TaskExecution::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(IDX_EXECUTIONS_WORKER_ID_STATUS)
                    .table(TaskExecution::Table)
                    .col(TaskExecution::WorkerId)
                    .col(TaskExecution::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(IDX_RECORDS_TASK_ID)
                    .table(CollectedRecord::Table)
                    .col(CollectedRecord::TaskId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(IDX_RECORDS_EXECUTION_ID)
                    .table(CollectedRecord::Table)
                    .col(CollectedRecord::ExecutionId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for idx_name in IDX_NAMES {
            manager
                .drop_index(Index::drop().name(*idx_name).if_exists().to_owned())
                .await?;
        }

        manager
            .drop_table(
                Table::drop()
                    .table(CollectedRecord::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(
                Table::drop()
                    .table(TaskExecution::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(
                Table::drop()
                    .table(CollectionTask::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(DataSource::Table).if_exists().to_owned())
            .await?;

        Ok(())
    }
}
