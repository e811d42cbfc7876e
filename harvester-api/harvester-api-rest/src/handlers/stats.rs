use axum::{Json, extract::State};
use harvester_common::stats::{OverviewStats, TaskStats};

use crate::{error::ApiResult, server::AppState};

pub(crate) async fn overview(State(state): State<AppState>) -> ApiResult<Json<OverviewStats>> {
    Ok(Json(state.db.overview_stats().await?))
}

pub(crate) async fn per_task(State(state): State<AppState>) -> ApiResult<Json<Vec<TaskStats>>> {
    Ok(Json(state.db.task_stats().await?))
}
