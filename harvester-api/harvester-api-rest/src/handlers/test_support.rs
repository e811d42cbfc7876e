//! In-process harness driving the router against the memory store.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use harvester_common::{
    coordinator::CoordinatorCommand,
    error::Error,
    state::{DatabaseTrait, memory::MemoryStateDb},
    task::TaskStatus,
};
use harvester_connector::{ConnectorSettings, Connectors, rpa::HttpDriver};
use jsonwebtoken::{EncodingKey, Header};
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};
use tower::ServiceExt;

use crate::{
    auth::Claims,
    server::{AppState, router},
};

pub(crate) const TEST_SECRET: &str = "test-secret";

#[derive(Debug, Default)]
struct FakeState {
    busy: HashSet<i64>,
    in_flight: HashMap<i64, usize>,
    commands: Vec<String>,
}

/// Answers coordinator commands and remembers them.
/// ---
/// Like the real coordinator, a stop also marks the task disabled.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeCoordinator {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCoordinator {
    pub async fn set_busy(&self, task_id: i64) {
        self.state.lock().await.busy.insert(task_id);
    }

    pub async fn set_in_flight(&self, task_id: i64, runs: usize) {
        self.state.lock().await.in_flight.insert(task_id, runs);
    }

    fn spawn(&self, mut rx: mpsc::Receiver<CoordinatorCommand>, db: Arc<dyn DatabaseTrait>) {
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                let mut state = state.lock().await;
                match command {
                    CoordinatorCommand::ScheduleTask {
                        task_id,
                        response_oneshot,
                    } => {
                        state.commands.push(format!("schedule:{task_id}"));
                        let _ = response_oneshot.send(Ok(None));
                    }
                    CoordinatorCommand::UnscheduleTask {
                        task_id,
                        response_oneshot,
                    } => {
                        state.commands.push(format!("unschedule:{task_id}"));
                        let _ = response_oneshot.send(Ok(()));
                    }
                    CoordinatorCommand::ExecuteTask {
                        task_id,
                        best_effort,
                        response_oneshot,
                    } => {
                        state.commands.push(format!("execute:{task_id}"));
                        let outcome = if best_effort && state.busy.contains(&task_id) {
                            Err(Error::TaskBusy {
                                task_id,
                                replicas: 1,
                            })
                        } else {
                            Ok(())
                        };
                        let _ = response_oneshot.send(outcome);
                    }
                    CoordinatorCommand::StopTask {
                        task_id,
                        response_oneshot,
                    } => {
                        state.commands.push(format!("stop:{task_id}"));
                        let outcome = db
                            .set_task_status(task_id, TaskStatus::Disabled, None)
                            .await
                            .map(|()| state.in_flight.remove(&task_id).unwrap_or(0));
                        let _ = response_oneshot.send(outcome);
                    }
                    CoordinatorCommand::InFlightRuns {
                        task_id,
                        response_oneshot,
                    } => {
                        let runs = state.in_flight.get(&task_id).copied().unwrap_or(0);
                        let _ = response_oneshot.send(runs);
                    }
                }
            }
        });
    }
}

pub(crate) fn token_for(subject: &str, secret: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: subject.to_string(),
        exp: now + 3600,
        iat: Some(now),
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("token")
}

pub(crate) struct TestApp {
    pub router: Router,
    pub db: Arc<dyn DatabaseTrait>,
    pub coordinator: FakeCoordinator,
    token: String,
}

impl TestApp {
    pub async fn new(coordinator: FakeCoordinator) -> Self {
        let db: Arc<dyn DatabaseTrait> = Arc::new(MemoryStateDb::new());
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        coordinator.spawn(cmd_rx, Arc::clone(&db));

        let connectors = Connectors::new(ConnectorSettings {
            driver: Arc::new(HttpDriver::new().expect("driver")),
            session_reuse: chrono::Duration::hours(24),
        })
        .expect("connectors");

        let state = AppState::new(Arc::clone(&db), cmd_tx, connectors, TEST_SECRET);

        Self {
            router: router(state),
            db,
            coordinator,
            token: token_for("tester", TEST_SECRET),
        }
    }

    pub async fn commands(&self) -> Vec<String> {
        self.coordinator.state.lock().await.commands.clone()
    }

    /// Sends a request with an optional bearer token.
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };

        (status, value)
    }

    /// Sends an authenticated request.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        self.send(method, uri, body, Some(&self.token)).await
    }

    pub async fn create_task(&self, data_source_id: i64, cron: Option<&str>) -> i64 {
        let (status, task) = self
            .request(
                Method::POST,
                "/api/v1/tasks",
                Some(json!({
                    "name": "headlines",
                    "description": "Front page headlines",
                    "type": "web-rpa",
                    "data_source_id": data_source_id,
                    "cron": cron
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{task}");
        task["id"].as_i64().expect("task id")
    }
}
