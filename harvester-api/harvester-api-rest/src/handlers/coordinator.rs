use chrono::{DateTime, Utc};
use harvester_common::{coordinator::CoordinatorCommand, error::Error};
use tokio::sync::{mpsc, oneshot};
use tracing::error;

/// Sends one command to the coordinator and waits for its answer.
async fn dispatch<T>(
    tx: &mpsc::Sender<CoordinatorCommand>,
    name: &str,
    build: impl FnOnce(oneshot::Sender<T>) -> CoordinatorCommand,
) -> Result<T, Error> {
    let (response_tx, response_rx) = oneshot::channel::<T>();

    if let Err(send_err) = tx.send(build(response_tx)).await {
        error!("API: failed to send {} command to coordinator: {}", name, send_err);
        return Err(Error::ChannelComm(
            "coordinator is unavailable, the service may be shutting down".to_string(),
        ));
    }

    response_rx.await.map_err(|recv_err| {
        error!("API: no response from coordinator for {}: {}", name, recv_err);
        Error::ChannelComm(format!("no response from coordinator for {name}"))
    })
}

pub(crate) async fn schedule_task(
    tx: &mpsc::Sender<CoordinatorCommand>,
    task_id: i64,
) -> Result<Option<DateTime<Utc>>, Error> {
    dispatch(tx, "ScheduleTask", |response_oneshot| {
        CoordinatorCommand::ScheduleTask {
            task_id,
            response_oneshot,
        }
    })
    .await?
}

pub(crate) async fn unschedule_task(
    tx: &mpsc::Sender<CoordinatorCommand>,
    task_id: i64,
) -> Result<(), Error> {
    dispatch(tx, "UnscheduleTask", |response_oneshot| {
        CoordinatorCommand::UnscheduleTask {
            task_id,
            response_oneshot,
        }
    })
    .await?
}

pub(crate) async fn execute_task(
    tx: &mpsc::Sender<CoordinatorCommand>,
    task_id: i64,
    best_effort: bool,
) -> Result<(), Error> {
    dispatch(tx, "ExecuteTask", |response_oneshot| {
        CoordinatorCommand::ExecuteTask {
            task_id,
            best_effort,
            response_oneshot,
        }
    })
    .await?
}

pub(crate) async fn stop_task(
    tx: &mpsc::Sender<CoordinatorCommand>,
    task_id: i64,
) -> Result<usize, Error> {
    dispatch(tx, "StopTask", |response_oneshot| CoordinatorCommand::StopTask {
        task_id,
        response_oneshot,
    })
    .await?
}

pub(crate) async fn in_flight_runs(
    tx: &mpsc::Sender<CoordinatorCommand>,
    task_id: i64,
) -> Result<usize, Error> {
    dispatch(tx, "InFlightRuns", |response_oneshot| {
        CoordinatorCommand::InFlightRuns {
            task_id,
            response_oneshot,
        }
    })
    .await
}
