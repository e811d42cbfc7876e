use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use harvester_common::{
    common::Pagination,
    datasource::DataSource,
    error::Error,
    state::DataSourceFilter,
};
use harvester_connector::{ConnectionProbe, StructurePreview};
use tracing::info;

use crate::{
    dto::{DataSourceListQuery, DataSourceRequest, ListResponse},
    error::ApiResult,
    server::AppState,
};

async fn load_datasource(state: &AppState, id: i64) -> Result<DataSource, Error> {
    state
        .db
        .get_datasource(id)
        .await?
        .ok_or_else(|| Error::not_found("DataSource", id))
}

fn body(payload: Result<Json<DataSourceRequest>, JsonRejection>) -> Result<DataSourceRequest, Error> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| Error::InvalidInput(rejection.body_text()))
}

pub(crate) async fn list(
    State(state): State<AppState>,
    Query(query): Query<DataSourceListQuery>,
) -> ApiResult<Json<ListResponse<DataSource>>> {
    let pagination = Pagination::from_page(query.page, query.page_size);
    let page = state
        .db
        .list_datasources(
            DataSourceFilter {
                source_type: query.source_type,
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
) -> ApiResult<Json<DataSource>> {
    Ok(Json(load_datasource(&state, id).await?))
}

pub(crate) async fn create(
    State(state): State<AppState>,
    payload: Result<Json<DataSourceRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<DataSource>)> {
    let draft = body(payload)?.into_new_draft()?.validate()?;
    let datasource = state.db.create_datasource(draft).await?;
    info!("API: created data source {} ({})", datasource.id, datasource.name);

    Ok((StatusCode::CREATED, Json(datasource)))
}

/// Updates a data source and drops its cached browser session,
/// so the next run logs in with the new settings.
pub(crate) async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    payload: Result<Json<DataSourceRequest>, JsonRejection>,
) -> ApiResult<Json<DataSource>> {
    let request = body(payload)?;
    let existing = load_datasource(&state, id).await?;
    let draft = request.apply_to(&existing)?.validate()?;

    let datasource = state.db.update_datasource(id, draft).await?;
    state.connectors.sessions().invalidate(id);

    Ok(Json(datasource))
}

pub(crate) async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.db.delete_datasource(id).await?;
    state.connectors.sessions().invalidate(id);
    info!("API: deleted data source {}", id);

    Ok(StatusCode::NO_CONTENT)
}

/// Probes connectivity. A failed probe is still a 200 answer,
/// its `status` field tells the outcome.
pub(crate) async fn test(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ConnectionProbe>> {
    let config = load_datasource(&state, id).await?.typed_config()?;

    Ok(Json(state.connectors.test_connection(&config).await))
}

pub(crate) async fn preview(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<StructurePreview>> {
    let config = load_datasource(&state, id).await?.typed_config()?;
    let preview = state.connectors.preview(id, &config).await?;

    Ok(Json(preview))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::handlers::test_support::{FakeCoordinator, TestApp};

    async fn create_web_source(app: &TestApp) -> i64 {
        let (status, ds) = app
            .request(
                Method::POST,
                "/api/v1/datasources",
                Some(json!({
                    "name": "news",
                    "type": "web",
                    "config": "{\"url\": \"https://example.com\"}"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        ds["id"].as_i64().expect("id")
    }

    #[tokio::test]
    async fn create_accepts_a_string_config() {
        let app = TestApp::new(FakeCoordinator::default()).await;
        let id = create_web_source(&app).await;

        let (status, ds) = app
            .request(Method::GET, &format!("/api/v1/datasources/{id}"), None)
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(ds["status"], "active");
        assert_eq!(ds["config"], json!({"url": "https://example.com"}));
    }

    #[tokio::test]
    async fn config_must_match_its_type() {
        let app = TestApp::new(FakeCoordinator::default()).await;

        let (status, body) = app
            .request(
                Method::POST,
                "/api/v1/datasources",
                Some(json!({"name": "db", "type": "database", "config": {"url": "x"}})),
            )
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_input");
    }

    #[tokio::test]
    async fn delete_is_refused_while_an_enabled_task_references_it() {
        let app = TestApp::new(FakeCoordinator::default()).await;
        let id = create_web_source(&app).await;
        app.create_task(id, None).await;

        let (status, body) = app
            .request(Method::DELETE, &format!("/api/v1/datasources/{id}"), None)
            .await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "conflict");
    }

    #[tokio::test]
    async fn unreferenced_source_is_deleted() {
        let app = TestApp::new(FakeCoordinator::default()).await;
        let id = create_web_source(&app).await;

        let (status, _) = app
            .request(Method::DELETE, &format!("/api/v1/datasources/{id}"), None)
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = app
            .request(Method::GET, &format!("/api/v1/datasources/{id}"), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_filters_by_type() {
        let app = TestApp::new(FakeCoordinator::default()).await;
        create_web_source(&app).await;
        let (status, _) = app
            .request(
                Method::POST,
                "/api/v1/datasources",
                Some(json!({
                    "name": "feed",
                    "type": "api",
                    "config": {"url": "https://example.com/api"}
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = app
            .request(Method::GET, "/api/v1/datasources?type=api", None)
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pagination"]["total"], 1);
        assert_eq!(body["items"][0]["name"], "feed");
    }

    #[tokio::test]
    async fn preview_failure_carries_its_reason() {
        let app = TestApp::new(FakeCoordinator::default()).await;
        let (status, ds) = app
            .request(
                Method::POST,
                "/api/v1/datasources",
                Some(json!({
                    "name": "warehouse",
                    "type": "database",
                    "config": {
                        "dialect": "postgres",
                        "host": "localhost",
                        "port": 5432,
                        "user": "reader",
                        "password": "secret",
                        "database": "shop"
                    }
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = app
            .request(
                Method::POST,
                &format!("/api/v1/datasources/{}/preview", ds["id"]),
                None,
            )
            .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "unsupported");
    }
}
