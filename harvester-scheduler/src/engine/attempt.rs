use std::{sync::Arc, time::Duration};

use harvester_common::{
    config::merge_override, datasource::DataSourceConfig, error::Error, record::Record,
    task::Task,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{RunContext, RunOutcome, RunSummary};

/// Drives the attempts of one run until success, a terminal failure or a
/// stop request.
/// ---
/// Attempt `k` (0-based) is recorded with `retry_count = k`. A failure is
/// retried only while attempts remain and the error is transient; the
/// wait before retry `k` follows the retry policy and ends early on stop
/// or shutdown. A worker slot is taken per attempt and given back before
/// the wait.
pub(super) async fn run_attempts(
    ctx: &RunContext,
    task: &Task,
    cancel: &CancellationToken,
) -> RunSummary {
    let worker = ctx.tracker.worker_id();
    let max_attempts = task.max_retries.saturating_add(1);
    let mut last_error = None;

    for attempt in 0..max_attempts {
        if attempt > 0 {
            let delay = ctx.retry.delay_for(attempt);
            info!(
                "Engine [{}]: task {} retry {}/{} in {:?}",
                worker, task.id, attempt, task.max_retries, delay
            );

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    return RunSummary::new(task.id, attempt, RunOutcome::Cancelled);
                }
                _ = ctx.shutdown.cancelled() => {
                    return RunSummary::new(task.id, attempt, RunOutcome::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let _worker = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                return RunSummary::new(task.id, attempt, RunOutcome::Cancelled);
            }
            _ = ctx.shutdown.cancelled() => {
                return RunSummary::new(task.id, attempt, RunOutcome::Cancelled);
            }
            permit = Arc::clone(&ctx.workers).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return RunSummary::new(task.id, attempt, RunOutcome::Cancelled),
            },
        };

        let execution_id = match ctx.tracker.start_attempt(task.id, attempt).await {
            Ok(id) => id,
            Err(e) => {
                warn!(
                    "Engine [{}]: could not record attempt of task {}: {}",
                    worker, task.id, e
                );
                return RunSummary::new(task.id, attempt, RunOutcome::Failed { error: e.to_string() });
            }
        };

        let _active = ctx.enter_attempt(execution_id, task.id);

        let result = tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(Error::Cancelled("stop requested".to_string())),
            _ = ctx.interrupt.cancelled() => {
                Err(Error::Cancelled("service shutting down".to_string()))
            }
            result = collect_once(ctx, task) => result,
        };

        match result {
            Ok(records) => {
                let collected = records.len();
                return match ctx.tracker.finish_success(task.id, execution_id, records).await {
                    Ok(saved) => {
                        info!(
                            "Engine [{}]: task {} execution {} collected {} record(s)",
                            worker, task.id, execution_id, saved
                        );
                        RunSummary::new(task.id, attempt + 1, RunOutcome::Succeeded { records: saved })
                    }
                    Err(e) => {
                        warn!(
                            "Engine [{}]: task {} collected {} record(s) but storing failed: {}",
                            worker, task.id, collected, e
                        );
                        RunSummary::new(task.id, attempt + 1, RunOutcome::Failed { error: e.to_string() })
                    }
                };
            }
            Err(e) => {
                warn!(
                    "Engine [{}]: task {} execution {} failed: {}",
                    worker, task.id, execution_id, e
                );
                ctx.tracker.finish_failure(execution_id, &e).await;

                if matches!(e, Error::Cancelled(_)) {
                    return RunSummary::new(task.id, attempt + 1, RunOutcome::Cancelled);
                }
                if !e.is_retriable() {
                    return RunSummary::new(task.id, attempt + 1, RunOutcome::Failed { error: e.to_string() });
                }
                last_error = Some(e);
            }
        }
    }

    let error = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no attempt was made".to_string());
    warn!(
        "Engine [{}]: task {} failed after {} attempt(s)",
        worker, task.id, max_attempts
    );
    RunSummary::new(task.id, max_attempts, RunOutcome::Failed { error })
}

/// One connector pass with the task's deadline.
async fn collect_once(ctx: &RunContext, task: &Task) -> Result<Vec<Record>, Error> {
    let config = resolve_config(ctx, task).await?;
    let deadline = Duration::from_secs(task.execution_timeout);

    tokio::time::timeout(deadline, ctx.collector.collect(task.data_source_id, &config))
        .await
        .map_err(|_| Error::Timeout(task.execution_timeout))?
}

/// Data source config with the task override merged on top.
async fn resolve_config(ctx: &RunContext, task: &Task) -> Result<DataSourceConfig, Error> {
    let datasource = ctx
        .state_manager
        .get_datasource(task.data_source_id)
        .await?
        .ok_or_else(|| Error::not_found("DataSource", task.data_source_id))?;

    let merged = merge_override(&datasource.config, task.config.as_ref());
    DataSourceConfig::from_value(datasource.source_type, merged)
}
