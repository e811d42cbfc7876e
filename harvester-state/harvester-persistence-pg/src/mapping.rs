use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Utc};
use harvester_common::{
    datasource::DataSource,
    error::Error,
    execution::TaskExecution,
    record::StoredRecord,
    task::Task,
};
use sea_orm::DbErr;

use crate::entities::{collected_records, collection_tasks, data_sources, task_executions};

pub(crate) fn db_error_to_domain(e: DbErr) -> Error {
    Error::Database(e.to_string())
}

pub(crate) fn to_db_time(time: DateTime<Utc>) -> DateTime<FixedOffset> {
    time.into()
}

fn parse_column<T>(value: &str, column: &str) -> Result<T, Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| {
        Error::Internal(format!("Failed to parse {column} value '{value}': {e}"))
    })
}

fn non_negative<T, S>(value: S, column: &str) -> Result<T, Error>
where
    T: TryFrom<S>,
    S: Copy + std::fmt::Display,
{
    T::try_from(value)
        .map_err(|_| Error::Internal(format!("Column {column} holds out of range value {value}")))
}

pub(crate) fn datasource_to_domain(model: data_sources::Model) -> Result<DataSource, Error> {
    Ok(DataSource {
        id: model.id,
        name: model.name,
        source_type: parse_column(&model.source_type, "data_sources.type")?,
        status: parse_column(&model.status, "data_sources.status")?,
        config: model.config,
        description: model.description,
        created_at: model.created_at.into(),
        updated_at: model.updated_at.into(),
    })
}

pub(crate) fn task_to_domain(model: collection_tasks::Model) -> Result<Task, Error> {
    Ok(Task {
        id: model.id,
        name: model.name,
        description: model.description,
        task_type: parse_column(&model.task_type, "collection_tasks.type")?,
        data_source_id: model.data_source_id,
        cron: model.cron,
        status: parse_column(&model.status, "collection_tasks.status")?,
        replicas: non_negative(model.replicas, "collection_tasks.replicas")?,
        execution_timeout: non_negative(
            model.execution_timeout,
            "collection_tasks.execution_timeout",
        )?,
        max_retries: non_negative(model.max_retries, "collection_tasks.max_retries")?,
        config: model.config,
        next_run_time: model.next_run_time.map(Into::into),
        created_at: model.created_at.into(),
        updated_at: model.updated_at.into(),
    })
}

pub(crate) fn execution_to_domain(
    model: task_executions::Model,
    task: Option<collection_tasks::Model>,
) -> Result<TaskExecution, Error> {
    Ok(TaskExecution {
        id: model.id,
        task_id: model.task_id,
        task_name: task.map(|t| t.name),
        worker_id: model.worker_id,
        status: parse_column(&model.status, "task_executions.status")?,
        start_time: model.start_time.into(),
        end_time: model.end_time.map(Into::into),
        records_collected: non_negative(
            model.records_collected,
            "task_executions.records_collected",
        )?,
        retry_count: non_negative(model.retry_count, "task_executions.retry_count")?,
        error_message: model.error_message,
    })
}

pub(crate) fn record_to_domain(model: collected_records::Model) -> Result<StoredRecord, Error> {
    let data = match model.data {
        serde_json::Value::Object(map) => map,
        other => {
            return Err(Error::Internal(format!(
                "Record {} holds a non-object payload: {}",
                model.id, other
            )));
        }
    };

    Ok(StoredRecord {
        id: model.id,
        task_id: model.task_id,
        execution_id: model.execution_id,
        data,
        collected_at: model.collected_at.into(),
    })
}

/// Converts an unsigned domain counter into the signed column type.
pub(crate) fn to_db_int<T, S>(value: S, column: &str) -> Result<T, Error>
where
    T: TryFrom<S>,
    S: Copy + std::fmt::Display,
{
    T::try_from(value)
        .map_err(|_| Error::InvalidInput(format!("{column} value {value} is too large")))
}

// Implementing From<T> for the entities would tie the domain crate to SeaORM,
// so the conversions live here as free functions.
