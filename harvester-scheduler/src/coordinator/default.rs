use std::{sync::Arc, time::Duration};

use chrono::Utc;
use futures::{StreamExt, stream::FuturesUnordered};
use harvester_common::{
    coordinator::CoordinatorCommand, error::Error, state::DatabaseTrait, task::TaskStatus,
};
use tokio::{
    sync::mpsc,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    engine::{ExecutionEngine, RunOutcome, RunSummary, Trigger},
    scheduler::Scheduler,
    tracker::ExecutionTracker,
};

use super::{CoordinatorConfig, MonitoredRun};

/// How long interrupted attempts get to record their failure at shutdown
const INTERRUPT_SETTLE: Duration = Duration::from_secs(5);

/// Main loop of the service.
/// ---
/// Owns the scheduler and the engine. Multiplexes API commands, the
/// scheduler clock and run completions on one task, so the fire set is
/// never touched concurrently.
pub struct Coordinator {
    pub worker_id: String,
    pub config: CoordinatorConfig,
    pub state_manager: Arc<dyn DatabaseTrait>,
    scheduler: Scheduler,
    engine: ExecutionEngine,
    tracker: ExecutionTracker,
    active_runs: FuturesUnordered<MonitoredRun>,
    api_command_rx: mpsc::Receiver<CoordinatorCommand>,
    shutdown: CancellationToken,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        state_manager: Arc<dyn DatabaseTrait>,
        engine: ExecutionEngine,
        tracker: ExecutionTracker,
        api_command_rx: mpsc::Receiver<CoordinatorCommand>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            worker_id: tracker.worker_id().to_string(),
            config,
            scheduler: Scheduler::new(Arc::clone(&state_manager)),
            state_manager,
            engine,
            tracker,
            active_runs: FuturesUnordered::new(),
            api_command_rx,
            shutdown,
        }
    }

    /// Runs until the shutdown token fires, then drains in-flight runs.
    pub async fn run_main_loop(&mut self) -> Result<(), Error> {
        self.recover_state_on_startup().await?;

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Coordinator [{}]: running, tick every {:?}",
            self.worker_id, self.config.tick_interval
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    info!("Coordinator [{}]: shutdown requested", self.worker_id);
                    break;
                }

                Some(command) = self.api_command_rx.recv() => {
                    self.handle_command(command).await;
                }

                _ = ticker.tick() => {
                    self.on_tick().await;
                }

                Some((task_id, join_outcome)) = self.active_runs.next(), if !self.active_runs.is_empty() => {
                    self.on_run_finished(task_id, join_outcome);
                }
            }
        }

        self.drain().await;
        Ok(())
    }

    /// Fails rows orphaned by a previous process and seeds the fire set.
    async fn recover_state_on_startup(&mut self) -> Result<(), Error> {
        self.tracker.recover_orphans().await?;
        self.scheduler.init(Utc::now()).await?;
        Ok(())
    }

    async fn on_tick(&mut self) {
        for task_id in self.scheduler.tick(Utc::now()).await {
            match self.engine.submit(task_id, Trigger::Scheduled).await {
                Ok(handle) => self.active_runs.push(MonitoredRun::new(task_id, handle)),
                Err(e) => warn!(
                    "Coordinator [{}]: scheduled trigger of task {} rejected: {}",
                    self.worker_id, task_id, e
                ),
            }
        }
    }

    async fn handle_command(&mut self, command: CoordinatorCommand) {
        match command {
            CoordinatorCommand::ScheduleTask {
                task_id,
                response_oneshot,
            } => {
                let result = self.scheduler.schedule(task_id, Utc::now()).await;
                if let Err(e) = &result {
                    warn!("Coordinator [{}]: scheduling task {} failed: {}", self.worker_id, task_id, e);
                }
                let _ = response_oneshot.send(result);
            }
            CoordinatorCommand::UnscheduleTask {
                task_id,
                response_oneshot,
            } => {
                let result = self.scheduler.unschedule(task_id).await.map(|_| ());
                self.engine.forget(task_id);
                let _ = response_oneshot.send(result);
            }
            CoordinatorCommand::ExecuteTask {
                task_id,
                best_effort,
                response_oneshot,
            } => {
                let result = self
                    .engine
                    .submit(task_id, Trigger::Manual { best_effort })
                    .await
                    .map(|handle| {
                        self.active_runs.push(MonitoredRun::new(task_id, handle));
                    });
                let _ = response_oneshot.send(result);
            }
            CoordinatorCommand::StopTask {
                task_id,
                response_oneshot,
            } => {
                let result = self.stop_task(task_id).await;
                if let Err(e) = &result {
                    warn!("Coordinator [{}]: stopping task {} failed: {}", self.worker_id, task_id, e);
                }
                let _ = response_oneshot.send(result);
            }
            CoordinatorCommand::InFlightRuns {
                task_id,
                response_oneshot,
            } => {
                let _ = response_oneshot.send(self.engine.in_flight(task_id));
            }
        }
    }

    /// Unschedules and disables a task, then cancels its runs.
    /// ---
    /// Runs on the coordinator task, so no tick can fire the task between
    /// the store write and the cancellation.
    async fn stop_task(&mut self, task_id: i64) -> Result<usize, Error> {
        self.scheduler.unschedule(task_id).await?;
        self.state_manager
            .set_task_status(task_id, TaskStatus::Disabled, None)
            .await?;
        Ok(self.engine.stop_task(task_id))
    }

    fn on_run_finished(
        &self,
        task_id: i64,
        join_outcome: Result<RunSummary, tokio::task::JoinError>,
    ) {
        match join_outcome {
            Ok(summary) => match summary.outcome {
                RunOutcome::Succeeded { records } => debug!(
                    "Coordinator [{}]: run of task {} succeeded after {} attempt(s), {} record(s)",
                    self.worker_id, task_id, summary.attempts, records
                ),
                RunOutcome::Failed { error } => warn!(
                    "Coordinator [{}]: run of task {} failed after {} attempt(s): {}",
                    self.worker_id, task_id, summary.attempts, error
                ),
                RunOutcome::Cancelled => info!(
                    "Coordinator [{}]: run of task {} cancelled",
                    self.worker_id, task_id
                ),
            },
            Err(join_error) if join_error.is_cancelled() => {
                warn!("Coordinator [{}]: run of task {} was aborted", self.worker_id, task_id);
            }
            Err(join_error) => {
                error!(
                    "Coordinator [{}]: run of task {} panicked: {:?}",
                    self.worker_id, task_id, join_error
                );
            }
        }
    }

    /// Waits for in-flight runs up to the grace period, then interrupts them.
    /// ---
    /// Runs queued for a slot or waiting for a retry have already returned
    /// when the shutdown token fired; what is left are running attempts.
    /// Interrupted attempts record themselves as failed. Runs that still
    /// have not returned after `INTERRUPT_SETTLE` are aborted and their
    /// rows left to orphan recovery.
    async fn drain(&mut self) {
        if self.active_runs.is_empty() {
            return;
        }

        info!(
            "Coordinator [{}]: waiting up to {:?} for {} run(s) to finish",
            self.worker_id,
            self.config.shutdown_grace,
            self.active_runs.len()
        );
        if self.wait_for_runs(self.config.shutdown_grace).await {
            info!("Coordinator [{}]: all runs drained", self.worker_id);
            return;
        }

        warn!(
            "Coordinator [{}]: grace period over, interrupting {} run(s)",
            self.worker_id,
            self.active_runs.len()
        );
        self.engine.interrupt_running();
        if self.wait_for_runs(INTERRUPT_SETTLE).await {
            return;
        }

        for (execution_id, task_id) in self.engine.running_executions() {
            error!(
                "Coordinator [{}]: aborting execution {} of task {}, its row is recovered on next start",
                self.worker_id, execution_id, task_id
            );
        }
        for run in self.active_runs.iter() {
            run.abort();
        }
        while let Some((task_id, join_outcome)) = self.active_runs.next().await {
            self.on_run_finished(task_id, join_outcome);
        }
    }

    /// Collects finished runs for up to `limit`; `true` once none is left.
    async fn wait_for_runs(&mut self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            match tokio::time::timeout_at(deadline, self.active_runs.next()).await {
                Ok(Some((task_id, join_outcome))) => self.on_run_finished(task_id, join_outcome),
                Ok(None) => return true,
                Err(_) => return false,
            }
        }
    }
}
