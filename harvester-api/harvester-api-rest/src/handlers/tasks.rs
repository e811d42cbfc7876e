use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use harvester_common::{
    common::Pagination,
    error::Error,
    record::Record,
    state::TaskFilter,
    task::{Task, TaskDraft, TaskStatus},
};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::{
    dto::{AcceptedRun, ExecuteQuery, ListResponse, PageMeta, PageQuery, TaskListQuery, TaskRequest},
    error::ApiResult,
    handlers::coordinator,
    server::AppState,
};

/// Longest string value shown by the record preview
const PREVIEW_VALUE_MAX_CHARS: usize = 500;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, Error> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| Error::InvalidInput(rejection.body_text()))
}

async fn load_task(state: &AppState, id: i64) -> Result<Task, Error> {
    state
        .db
        .get_task(id)
        .await?
        .ok_or_else(|| Error::not_found("Task", id))
}

/// Validates the draft and its data source reference.
/// ---
/// The referenced data source must exist and match the task type.
async fn checked_draft(state: &AppState, draft: TaskDraft) -> Result<TaskDraft, Error> {
    let draft = draft.validate()?;

    let datasource = state
        .db
        .get_datasource(draft.data_source_id)
        .await?
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "data source {} does not exist",
                draft.data_source_id
            ))
        })?;

    let expected = draft.task_type.data_source_type();
    if datasource.source_type != expected {
        return Err(Error::InvalidInput(format!(
            "a {} task needs a {} data source, data source {} is {}",
            draft.task_type, expected, datasource.id, datasource.source_type
        )));
    }

    Ok(draft)
}

pub(crate) async fn list(
    State(state): State<AppState>,
    Query(query): Query<TaskListQuery>,
) -> ApiResult<Json<ListResponse<Task>>> {
    let pagination = Pagination::from_page(query.page, query.page_size);
    let page = state
        .db
        .list_tasks(
            TaskFilter {
                status: query.status,
                search: query.search.filter(|s| !s.trim().is_empty()),
            },
            pagination,
        )
        .await?;

    Ok(Json(ListResponse::new(page, pagination)))
}

pub(crate) async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Task>> {
    Ok(Json(load_task(&state, id).await?))
}

pub(crate) async fn create(
    State(state): State<AppState>,
    payload: Result<Json<TaskRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let draft = checked_draft(&state, body(payload)?.into_new_draft()?).await?;
    let task = state.db.create_task(draft).await?;

    coordinator::schedule_task(&state.coordinator_cmd_tx, task.id).await?;
    info!("API: created task {} ({})", task.id, task.name);

    Ok((StatusCode::CREATED, Json(load_task(&state, task.id).await?)))
}

pub(crate) async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    payload: Result<Json<TaskRequest>, JsonRejection>,
) -> ApiResult<Json<Task>> {
    let request = body(payload)?;
    let existing = load_task(&state, id).await?;
    let draft = checked_draft(&state, request.apply_to(&existing)).await?;

    state.db.update_task(id, draft).await?;
    coordinator::schedule_task(&state.coordinator_cmd_tx, id).await?;

    Ok(Json(load_task(&state, id).await?))
}

/// Deletes a task once nothing of it is in flight.
pub(crate) async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    load_task(&state, id).await?;

    let in_flight = coordinator::in_flight_runs(&state.coordinator_cmd_tx, id).await?;
    let running = state.db.count_running_executions(id).await?;
    if in_flight > 0 || running > 0 {
        return Err(Error::Conflict(format!(
            "task {id} has runs in flight, stop it before deleting"
        ))
        .into());
    }

    state.db.delete_task(id).await?;
    coordinator::unschedule_task(&state.coordinator_cmd_tx, id).await?;
    info!("API: deleted task {}", id);

    Ok(StatusCode::NO_CONTENT)
}

/// Enables the task and puts it on the cron clock.
pub(crate) async fn run(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Task>> {
    let task = load_task(&state, id).await?;
    if task.status != TaskStatus::Enabled {
        state
            .db
            .set_task_status(id, TaskStatus::Enabled, task.next_run_time)
            .await?;
    }

    coordinator::schedule_task(&state.coordinator_cmd_tx, id).await?;

    Ok(Json(load_task(&state, id).await?))
}

/// Disables the task and cancels whatever of it is queued or running.
/// ---
/// The coordinator writes the disabled status itself, so the task leaves
/// the cron clock and the store in one step.
pub(crate) async fn stop(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Task>> {
    load_task(&state, id).await?;

    let cancelled = coordinator::stop_task(&state.coordinator_cmd_tx, id).await?;
    info!("API: stopped task {}, {} run(s) cancelled", id, cancelled);

    Ok(Json(load_task(&state, id).await?))
}

/// Triggers one manual run.
/// ---
/// Fails with `TaskBusy` when every replica slot is taken, unless the
/// caller passes `?queue=true` to wait for a slot.
pub(crate) async fn execute(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<ExecuteQuery>,
) -> ApiResult<(StatusCode, Json<AcceptedRun>)> {
    load_task(&state, id).await?;
    coordinator::execute_task(&state.coordinator_cmd_tx, id, !query.queue).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedRun {
            task_id: id,
            queued: query.queue,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub(crate) struct RecordPreview {
    items: Vec<Record>,
    columns: Vec<String>,
    pagination: PageMeta,
}

fn truncate_value(value: Value) -> Value {
    match value {
        Value::String(s) if s.chars().count() > PREVIEW_VALUE_MAX_CHARS => {
            let mut cut: String = s.chars().take(PREVIEW_VALUE_MAX_CHARS).collect();
            cut.push_str("...");
            Value::String(cut)
        }
        other => other,
    }
}

/// Columns in order of first appearance across the page.
fn preview_columns(items: &[Record]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for key in items.iter().flat_map(|record| record.keys()) {
        if !columns.iter().any(|c| c == key) {
            columns.push(key.clone());
        }
    }
    columns
}

pub(crate) async fn data(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<RecordPreview>> {
    load_task(&state, id).await?;

    let pagination = query.pagination();
    let page = state.db.list_records(id, pagination).await?;
    let total = page.total;

    let items: Vec<Record> = page
        .items
        .into_iter()
        .map(|stored| {
            stored
                .data
                .into_iter()
                .map(|(key, value)| (key, truncate_value(value)))
                .collect()
        })
        .collect();

    Ok(Json(RecordPreview {
        columns: preview_columns(&items),
        items,
        pagination: PageMeta::new(pagination, total),
    }))
}
