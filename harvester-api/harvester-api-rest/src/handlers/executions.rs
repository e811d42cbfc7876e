use axum::{
    Json,
    extract::{Path, Query, State},
};
use harvester_common::{
    common::Pagination,
    error::Error,
    execution::{ExecutionFilter, TaskExecution},
};

use crate::{
    dto::{ExecutionListQuery, ListResponse},
    error::ApiResult,
    server::AppState,
};

pub(crate) async fn list(
    State(state): State<AppState>,
    Query(query): Query<ExecutionListQuery>,
) -> ApiResult<Json<ListResponse<TaskExecution>>> {
    let pagination = Pagination::from_page(query.page, query.page_size);
    let page = state
        .db
        .list_executions(
            ExecutionFilter {
                task_id: query.task_id,
                status: query.status,
            },
            pagination,
        )
        .await?;

    Ok(Json(ListResponse::new(page, pagination)))
}

pub(crate) async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<TaskExecution>> {
    let execution = state
        .db
        .get_execution(id)
        .await?
        .ok_or_else(|| Error::not_found("TaskExecution", id))?;

    Ok(Json(execution))
}

pub(crate) async fn list_for_task(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
    Query(query): Query<ExecutionListQuery>,
) -> ApiResult<Json<ListResponse<TaskExecution>>> {
    if state.db.get_task(task_id).await?.is_none() {
        return Err(Error::not_found("Task", task_id).into());
    }

    let pagination = Pagination::from_page(query.page, query.page_size);
    let page = state
        .db
        .list_executions(
            ExecutionFilter {
                task_id: Some(task_id),
                status: query.status,
            },
            pagination,
        )
        .await?;

    Ok(Json(ListResponse::new(page, pagination)))
}
