mod attempt;
mod retry;

pub use retry::RetryPolicy;

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering},
    },
};

use harvester_common::{
    error::Error,
    state::DatabaseTrait,
    task::{Task, TaskStatus},
};
use harvester_connector::Collector;
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::tracker::ExecutionTracker;

/// What caused a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// Cron clock, waits for a free replica slot
    Scheduled,

    /// Operator request; `best_effort` fails fast with `TaskBusy`
    /// instead of waiting for a slot
    Manual { best_effort: bool },
}

#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    Succeeded { records: u64 },
    Failed { error: String },
    Cancelled,
}

/// Result of one run, across all of its attempts.
#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub task_id: i64,

    /// Attempts that were recorded
    pub attempts: u32,
    pub outcome: RunOutcome,
}

impl RunSummary {
    fn new(task_id: i64, attempts: u32, outcome: RunOutcome) -> Self {
        Self {
            task_id,
            attempts,
            outcome,
        }
    }
}

pub struct EngineConfig {
    /// Process-wide cap on concurrently running attempts
    pub max_workers: usize,
    pub retry: RetryPolicy,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Shared by every run spawned by the engine.
#[derive(Debug)]
struct RunContext {
    state_manager: Arc<dyn DatabaseTrait>,
    collector: Arc<dyn Collector>,
    tracker: ExecutionTracker,
    retry: RetryPolicy,
    workers: Arc<Semaphore>,
    shutdown: CancellationToken,

    /// Fired once shutdown stops waiting for running attempts
    interrupt: CancellationToken,

    /// Running attempts, execution id to task id
    active: Mutex<BTreeMap<i64, i64>>,
}

impl RunContext {
    fn enter_attempt(&self, execution_id: i64, task_id: i64) -> ActiveAttempt<'_> {
        lock(&self.active).insert(execution_id, task_id);
        ActiveAttempt {
            ctx: self,
            execution_id,
        }
    }
}

/// Lists an execution as running in this process while alive.
struct ActiveAttempt<'a> {
    ctx: &'a RunContext,
    execution_id: i64,
}

impl Drop for ActiveAttempt<'_> {
    fn drop(&mut self) {
        lock(&self.ctx.active).remove(&self.execution_id);
    }
}

/// Takes one unit off a shrink debt, if there is any.
fn settle_one(debt: &AtomicUsize) -> bool {
    debt.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1))
        .is_ok()
}

/// A held replica slot.
/// ---
/// Goes back to the semaphore on drop, unless the task shrank while it
/// was held: the permit is then retired to pay one unit of the debt.
struct ReplicaPermit {
    permit: Option<OwnedSemaphorePermit>,
    debt: Arc<AtomicUsize>,
}

impl Drop for ReplicaPermit {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            if settle_one(&self.debt) {
                permit.forget();
            }
        }
    }
}

/// Per-task concurrency bookkeeping.
#[derive(Debug)]
struct TaskSlots {
    semaphore: Arc<Semaphore>,
    replicas: u32,

    /// Permits still to retire after a shrink, paid by held permits
    /// as they are released
    debt: Arc<AtomicUsize>,

    /// Cancelled by a stop request, then replaced
    cancel: CancellationToken,
    in_flight: Arc<AtomicUsize>,
}

impl TaskSlots {
    fn new(replicas: u32) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(replicas as usize)),
            replicas,
            debt: Arc::new(AtomicUsize::new(0)),
            cancel: CancellationToken::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Moves the semaphore to `replicas` total permits in place.
    /// ---
    /// Growing first cancels outstanding debt, then adds permits.
    /// Shrinking retires free permits at once; permits held by running
    /// attempts are retired as they come back.
    fn resize(&mut self, replicas: u32) {
        let (old, new) = (self.replicas as usize, replicas as usize);

        if new > old {
            let mut grow = new - old;
            while grow > 0 && settle_one(&self.debt) {
                grow -= 1;
            }
            self.semaphore.add_permits(grow);
        } else if new < old {
            let shrink = old - new;
            self.debt.fetch_add(shrink, Ordering::SeqCst);

            let retired = self.semaphore.forget_permits(shrink);
            let mut overpaid = 0;
            for _ in 0..retired {
                if !settle_one(&self.debt) {
                    overpaid += 1;
                }
            }
            self.semaphore.add_permits(overpaid);
        }

        self.replicas = replicas;
    }

    fn permit(&self, permit: OwnedSemaphorePermit) -> ReplicaPermit {
        ReplicaPermit {
            permit: Some(permit),
            debt: Arc::clone(&self.debt),
        }
    }
}

enum Slot {
    Held(ReplicaPermit),
    Queued {
        semaphore: Arc<Semaphore>,
        debt: Arc<AtomicUsize>,
    },
}

/// Decrements a task's in-flight counter when the run ends, however it ends.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Turns triggers into runs.
/// ---
/// Each task may hold at most `replicas` running attempts; waiting
/// triggers queue in arrival order on the task's semaphore. A second,
/// process-wide semaphore caps running attempts across all tasks and is
/// held only while an attempt runs, never across a retry wait.
///
/// A changed replica count resizes the task's semaphore in place, so the
/// bound covers old and new runs alike.
#[derive(Debug)]
pub struct ExecutionEngine {
    ctx: Arc<RunContext>,
    slots: Mutex<HashMap<i64, TaskSlots>>,
}

impl ExecutionEngine {
    pub fn new(
        config: EngineConfig,
        state_manager: Arc<dyn DatabaseTrait>,
        collector: Arc<dyn Collector>,
        tracker: ExecutionTracker,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            ctx: Arc::new(RunContext {
                state_manager,
                collector,
                tracker,
                retry: config.retry,
                workers: Arc::new(Semaphore::new(config.max_workers.max(1))),
                shutdown,
                interrupt: CancellationToken::new(),
                active: Mutex::new(BTreeMap::new()),
            }),
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<i64, TaskSlots>> {
        lock(&self.slots)
    }

    /// Accepts a trigger for `task_id` and spawns its run.
    /// ---
    /// Fails with `TaskBusy` when a best-effort trigger finds every
    /// replica slot taken, with `Conflict` when a scheduled trigger names
    /// a task that is no longer enabled, and with `Cancelled` once
    /// shutdown began.
    pub async fn submit(
        &self,
        task_id: i64,
        trigger: Trigger,
    ) -> Result<JoinHandle<RunSummary>, Error> {
        if self.ctx.shutdown.is_cancelled() {
            return Err(Error::Cancelled("engine is shutting down".to_string()));
        }

        let task = self
            .ctx
            .state_manager
            .get_task(task_id)
            .await?
            .ok_or_else(|| Error::not_found("Task", task_id))?;

        if trigger == Trigger::Scheduled && task.status != TaskStatus::Enabled {
            return Err(Error::Conflict(format!(
                "task {} is disabled, scheduled trigger dropped",
                task.id
            )));
        }

        let (slot, cancel, in_flight) = {
            let mut slots = self.slots();
            let entry = slots
                .entry(task.id)
                .or_insert_with(|| TaskSlots::new(task.replicas));

            if entry.replicas != task.replicas {
                debug!(
                    "Engine [{}]: task {} replicas changed {} -> {}",
                    self.ctx.tracker.worker_id(),
                    task.id,
                    entry.replicas,
                    task.replicas
                );
                entry.resize(task.replicas);
            }

            let slot = match trigger {
                Trigger::Manual { best_effort: true } => {
                    let permit = Arc::clone(&entry.semaphore)
                        .try_acquire_owned()
                        .map_err(|_| Error::TaskBusy {
                            task_id: task.id,
                            replicas: task.replicas,
                        })?;
                    Slot::Held(entry.permit(permit))
                }
                Trigger::Scheduled | Trigger::Manual { best_effort: false } => Slot::Queued {
                    semaphore: Arc::clone(&entry.semaphore),
                    debt: Arc::clone(&entry.debt),
                },
            };

            (slot, entry.cancel.clone(), InFlight::enter(&entry.in_flight))
        };

        debug!(
            "Engine [{}]: accepted {:?} trigger for task {}",
            self.ctx.tracker.worker_id(),
            trigger,
            task.id
        );

        let ctx = Arc::clone(&self.ctx);
        Ok(tokio::spawn(async move {
            let _in_flight = in_flight;
            run(ctx, task, trigger, slot, cancel).await
        }))
    }

    /// Cancels every queued and running run of a task.
    /// ---
    /// Queued triggers and pending retries are dropped; running attempts
    /// are interrupted and recorded as failed. Returns the number of runs
    /// signalled. Later triggers start from a fresh token.
    pub fn stop_task(&self, task_id: i64) -> usize {
        let mut slots = self.slots();
        let Some(entry) = slots.get_mut(&task_id) else {
            return 0;
        };

        let signalled = entry.in_flight.load(Ordering::SeqCst);
        entry.cancel.cancel();
        entry.cancel = CancellationToken::new();

        info!(
            "Engine [{}]: stop requested for task {}, {} run(s) signalled",
            self.ctx.tracker.worker_id(),
            task_id,
            signalled
        );
        signalled
    }

    /// Interrupts every running attempt of every task.
    /// ---
    /// Used once the shutdown grace period is over: each interrupted
    /// attempt is recorded as failed before its run returns.
    pub fn interrupt_running(&self) {
        self.ctx.interrupt.cancel();
    }

    /// `(execution_id, task_id)` of the attempts running right now.
    pub fn running_executions(&self) -> Vec<(i64, i64)> {
        lock(&self.ctx.active)
            .iter()
            .map(|(&execution_id, &task_id)| (execution_id, task_id))
            .collect()
    }

    /// Queued plus running runs of a task in this process.
    pub fn in_flight(&self, task_id: i64) -> usize {
        self.slots()
            .get(&task_id)
            .map(|entry| entry.in_flight.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn total_in_flight(&self) -> usize {
        self.slots()
            .values()
            .map(|entry| entry.in_flight.load(Ordering::SeqCst))
            .sum()
    }

    /// Forgets the slots of a deleted task.
    pub fn forget(&self, task_id: i64) {
        let mut slots = self.slots();
        if slots
            .get(&task_id)
            .is_some_and(|entry| entry.in_flight.load(Ordering::SeqCst) == 0)
        {
            slots.remove(&task_id);
        }
    }
}

/// Whether a queued scheduled run may still start.
async fn still_enabled(ctx: &RunContext, task_id: i64) -> bool {
    match ctx.state_manager.get_task(task_id).await {
        Ok(Some(task)) => task.status == TaskStatus::Enabled,
        Ok(None) => false,
        Err(e) => {
            warn!(
                "Engine [{}]: could not re-read task {}, starting anyway: {}",
                ctx.tracker.worker_id(),
                task_id,
                e
            );
            true
        }
    }
}

async fn run(
    ctx: Arc<RunContext>,
    task: Task,
    trigger: Trigger,
    slot: Slot,
    cancel: CancellationToken,
) -> RunSummary {
    let cancelled = || RunSummary::new(task.id, 0, RunOutcome::Cancelled);

    let _replica = match slot {
        Slot::Held(permit) => permit,
        Slot::Queued { semaphore, debt } => tokio::select! {
            biased;

            _ = cancel.cancelled() => return cancelled(),
            _ = ctx.shutdown.cancelled() => return cancelled(),
            permit = semaphore.acquire_owned() => match permit {
                Ok(permit) => ReplicaPermit {
                    permit: Some(permit),
                    debt,
                },
                Err(_) => return cancelled(),
            },
        },
    };

    if trigger == Trigger::Scheduled && !still_enabled(&ctx, task.id).await {
        info!(
            "Engine [{}]: task {} was disabled while queued, run dropped",
            ctx.tracker.worker_id(),
            task.id
        );
        return cancelled();
    }

    attempt::run_attempts(&ctx, &task, &cancel).await
}
