use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::error::Error;

/// Requests accepted by the coordinator's main loop.
/// ---
/// The API layer mutates the store and then uses these to let the
/// scheduler and engine react. Every command carries a oneshot for the
/// outcome so callers can surface errors synchronously.
#[derive(Debug)]
pub enum CoordinatorCommand {
    /// Reloads a task from the store and (re)computes its fire time.
    /// Disabled or cron-less tasks leave the fire set.
    ScheduleTask {
        task_id: i64,
        /// Send the stored `next_run_time` or `Error` back to the caller
        response_oneshot: oneshot::Sender<Result<Option<DateTime<Utc>>, Error>>,
    },
    /// Removes a task from the fire set without touching in-flight runs.
    UnscheduleTask {
        task_id: i64,
        response_oneshot: oneshot::Sender<Result<(), Error>>,
    },
    /// Manual trigger, bypasses the cron clock.
    /// `best_effort` fails fast with `TaskBusy` instead of queueing.
    ExecuteTask {
        task_id: i64,
        best_effort: bool,
        response_oneshot: oneshot::Sender<Result<(), Error>>,
    },
    /// Unschedules the task, marks it disabled in the store and cancels
    /// its queued, waiting and running runs. An interrupted attempt is
    /// recorded as failed. Sends back the number of runs that were
    /// signalled.
    StopTask {
        task_id: i64,
        response_oneshot: oneshot::Sender<Result<usize, Error>>,
    },
    /// Number of queued or running runs of a task in this process.
    InFlightRuns {
        task_id: i64,
        response_oneshot: oneshot::Sender<usize>,
    },
}
