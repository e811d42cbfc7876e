mod registry;

pub use registry::{DueTrigger, FireSet};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use harvester_common::{
    error::Error, schedule::CronSchedule, state::DatabaseTrait, task::Task,
};
use tracing::{debug, info, warn};

/// Cron clock over the task store.
/// ---
/// Owns the fire set and keeps each task's persisted `next_run_time`
/// in step with it. The coordinator drives it with `tick`.
#[derive(Debug)]
pub struct Scheduler {
    state_manager: Arc<dyn DatabaseTrait>,
    fire_set: FireSet,
}

impl Scheduler {
    pub fn new(state_manager: Arc<dyn DatabaseTrait>) -> Self {
        Self {
            state_manager,
            fire_set: FireSet::new(),
        }
    }

    /// Loads every enabled task with a cron expression.
    /// ---
    /// Fire times are recomputed from `now`; values persisted by a previous
    /// process are overwritten, never fired retroactively. A task whose
    /// expression no longer parses is logged and left out.
    pub async fn init(&mut self, now: DateTime<Utc>) -> Result<usize, Error> {
        let tasks = self.state_manager.list_schedulable_tasks().await?;

        for task in tasks {
            if let Err(e) = self.arm(&task, now).await {
                warn!("Scheduler: skipping task {} ({}): {}", task.id, task.name, e);
            }
        }

        info!("Scheduler: initialized with {} scheduled task(s)", self.fire_set.len());
        Ok(self.fire_set.len())
    }

    /// Re-reads a task and (re)arms or disarms it.
    /// ---
    /// Returns the persisted fire time, `None` when the task is disabled
    /// or manual-only.
    pub async fn schedule(
        &mut self,
        task_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, Error> {
        let task = self
            .state_manager
            .get_task(task_id)
            .await?
            .ok_or_else(|| Error::not_found("Task", task_id))?;

        if !task.is_schedulable() {
            self.fire_set.remove(task_id);
            self.state_manager.set_next_run_time(task_id, None).await?;
            debug!("Scheduler: task {} is not schedulable, removed", task_id);
            return Ok(None);
        }

        self.arm(&task, now).await.map(Some)
    }

    /// Drops a task from the fire set and clears its persisted fire time.
    /// ---
    /// A task already deleted from the store only leaves the fire set.
    pub async fn unschedule(&mut self, task_id: i64) -> Result<bool, Error> {
        let removed = self.fire_set.remove(task_id);

        match self.state_manager.set_next_run_time(task_id, None).await {
            Ok(()) | Err(Error::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        if removed {
            debug!("Scheduler: task {} unscheduled", task_id);
        }
        Ok(removed)
    }

    pub fn next_run(&self, task_id: i64) -> Option<DateTime<Utc>> {
        self.fire_set.next_run(task_id)
    }

    /// Advances the clock to `now` and returns the tasks to trigger.
    /// ---
    /// Each due task is re-read first: one that was disabled or deleted
    /// since it was armed leaves the fire set instead of firing. The
    /// following fire time is persisted before a task is handed out, so a
    /// crash between tick and dispatch never replays the slot. A task
    /// whose write fails is put back at its elapsed fire time and retried
    /// on the next tick; the others are unaffected.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Vec<i64> {
        let due = self.fire_set.due(now);
        let mut fired = Vec::with_capacity(due.len());

        for trigger in due {
            match self.advance(&trigger).await {
                Ok(true) => fired.push(trigger.task_id),
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        "Scheduler: could not advance task {}, retrying next tick: {}",
                        trigger.task_id, e
                    );
                    self.fire_set.rewind(trigger.task_id, trigger.fire_at);
                }
            }
        }

        fired
    }

    /// Persists the following fire time of a due task.
    /// ---
    /// Returns `false` when the task must not fire.
    async fn advance(&mut self, trigger: &DueTrigger) -> Result<bool, Error> {
        let task_id = trigger.task_id;

        let task = match self.state_manager.get_task(task_id).await? {
            Some(task) => task,
            None => {
                warn!("Scheduler: task {} vanished from the store, unscheduling", task_id);
                self.fire_set.remove(task_id);
                return Ok(false);
            }
        };

        if !task.is_schedulable() {
            debug!("Scheduler: task {} is no longer schedulable, removed", task_id);
            self.unschedule(task_id).await?;
            return Ok(false);
        }

        match self
            .state_manager
            .set_next_run_time(task_id, trigger.next)
            .await
        {
            Ok(()) => {}
            Err(Error::NotFound { .. }) => {
                warn!("Scheduler: task {} vanished from the store, unscheduling", task_id);
                self.fire_set.remove(task_id);
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        match trigger.next {
            Some(next) => debug!(
                "Scheduler: task {} due at {}, next at {}",
                task_id, trigger.fire_at, next
            ),
            None => info!(
                "Scheduler: task {} due at {}, its expression has no further occurrence",
                task_id, trigger.fire_at
            ),
        }
        Ok(true)
    }

    async fn arm(&mut self, task: &Task, now: DateTime<Utc>) -> Result<DateTime<Utc>, Error> {
        let expr = task.cron.as_deref().unwrap_or_default();
        let schedule = CronSchedule::parse(expr)?;
        let next = self.fire_set.upsert(task.id, schedule, now)?;

        self.state_manager.set_next_run_time(task.id, Some(next)).await?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use harvester_common::{
        datasource::{DataSourceDraft, DataSourceStatus, DataSourceType},
        state::{DataSourceDbTrait, TaskDbTrait, memory::MemoryStateDb},
        task::{TaskDraft, TaskStatus, TaskType},
    };
    use serde_json::json;

    use super::*;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, h, m, 0).single().unwrap()
    }

    async fn seeded() -> Arc<MemoryStateDb> {
        let db = Arc::new(MemoryStateDb::new());
        db.create_datasource(DataSourceDraft {
            name: "feed".to_string(),
            source_type: DataSourceType::Api,
            status: DataSourceStatus::Active,
            config: json!({"url": "http://feed.local/items"}),
            description: None,
        })
        .await
        .unwrap();
        db
    }

    async fn add_task(db: &MemoryStateDb, cron: Option<&str>, status: TaskStatus) -> Task {
        db.create_task(TaskDraft {
            name: "pull".to_string(),
            description: None,
            task_type: TaskType::Api,
            data_source_id: 1,
            cron: cron.map(str::to_string),
            status,
            replicas: 1,
            execution_timeout: 60,
            max_retries: 0,
            config: None,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn init_recomputes_next_run_from_now() {
        let db = seeded().await;
        let hourly = add_task(&db, Some("0 * * * *"), TaskStatus::Enabled).await;
        let manual = add_task(&db, None, TaskStatus::Enabled).await;
        let disabled = add_task(&db, Some("0 * * * *"), TaskStatus::Disabled).await;
        db.set_next_run_time(hourly.id, Some(at(3, 0))).await.unwrap();

        let mut scheduler = Scheduler::new(db.clone());
        let count = scheduler.init(at(9, 30)).await.unwrap();

        assert_eq!(count, 1);
        let stored = db.get_task(hourly.id).await.unwrap().unwrap();
        assert_eq!(stored.next_run_time, Some(at(10, 0)));
        assert_eq!(scheduler.next_run(manual.id), None);
        assert_eq!(scheduler.next_run(disabled.id), None);
    }

    #[tokio::test]
    async fn tick_persists_next_fire_time_of_due_tasks() {
        let db = seeded().await;
        let task = add_task(&db, Some("*/10 * * * *"), TaskStatus::Enabled).await;
        let mut scheduler = Scheduler::new(db.clone());
        scheduler.init(at(9, 55)).await.unwrap();

        assert!(scheduler.tick(at(9, 59)).await.is_empty());
        assert_eq!(scheduler.tick(at(10, 0)).await, vec![task.id]);

        let stored = db.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.next_run_time, Some(at(10, 10)));
    }

    #[tokio::test]
    async fn schedule_of_disabled_task_clears_next_run_time() {
        let db = seeded().await;
        let task = add_task(&db, Some("0 * * * *"), TaskStatus::Enabled).await;
        let mut scheduler = Scheduler::new(db.clone());
        scheduler.init(at(9, 0)).await.unwrap();

        db.set_task_status(task.id, TaskStatus::Disabled, None).await.unwrap();
        let next = scheduler.schedule(task.id, at(9, 5)).await.unwrap();

        assert_eq!(next, None);
        assert!(scheduler.tick(at(9, 0) + Duration::hours(3)).await.is_empty());
        assert_eq!(db.get_task(task.id).await.unwrap().unwrap().next_run_time, None);
    }

    #[tokio::test]
    async fn schedule_of_unknown_task_is_not_found() {
        let db = seeded().await;
        let mut scheduler = Scheduler::new(db);

        let err = scheduler.schedule(42, at(9, 0)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn unschedule_stops_firing_and_clears_next_run_time() {
        let db = seeded().await;
        let task = add_task(&db, Some("* * * * *"), TaskStatus::Enabled).await;
        let mut scheduler = Scheduler::new(db.clone());
        scheduler.init(at(9, 0)).await.unwrap();

        assert!(scheduler.unschedule(task.id).await.unwrap());
        assert!(!scheduler.unschedule(task.id).await.unwrap());
        assert!(scheduler.tick(at(9, 10)).await.is_empty());
        assert_eq!(db.get_task(task.id).await.unwrap().unwrap().next_run_time, None);
    }

    #[tokio::test]
    async fn unschedule_of_a_deleted_task_only_leaves_the_fire_set() {
        let db = seeded().await;
        let task = add_task(&db, Some("* * * * *"), TaskStatus::Enabled).await;
        let mut scheduler = Scheduler::new(db.clone());
        scheduler.init(at(9, 0)).await.unwrap();
        db.delete_task(task.id).await.unwrap();

        assert!(scheduler.unschedule(task.id).await.unwrap());
    }

    #[tokio::test]
    async fn tick_skips_a_task_disabled_since_it_was_armed() {
        let db = seeded().await;
        let task = add_task(&db, Some("0 * * * *"), TaskStatus::Enabled).await;
        let mut scheduler = Scheduler::new(db.clone());
        scheduler.init(at(9, 30)).await.unwrap();

        db.set_task_status(task.id, TaskStatus::Disabled, Some(at(10, 0)))
            .await
            .unwrap();

        assert!(scheduler.tick(at(10, 0)).await.is_empty());
        assert_eq!(scheduler.next_run(task.id), None);
        assert_eq!(db.get_task(task.id).await.unwrap().unwrap().next_run_time, None);
        assert!(scheduler.tick(at(11, 0)).await.is_empty());
    }

    #[tokio::test]
    async fn failed_write_delays_only_that_task() {
        let db = seeded().await;
        let first = add_task(&db, Some("0 * * * *"), TaskStatus::Enabled).await;
        let second = add_task(&db, Some("0 * * * *"), TaskStatus::Enabled).await;
        let mut scheduler = Scheduler::new(db.clone());
        scheduler.init(at(9, 30)).await.unwrap();

        db.fail_next_run_time_writes(1).await;
        assert_eq!(scheduler.tick(at(10, 0)).await, vec![second.id]);
        assert_eq!(scheduler.next_run(first.id), Some(at(10, 0)));

        assert_eq!(scheduler.tick(at(10, 1)).await, vec![first.id]);
        let stored = db.get_task(first.id).await.unwrap().unwrap();
        assert_eq!(stored.next_run_time, Some(at(11, 0)));
        assert!(scheduler.tick(at(10, 2)).await.is_empty());
    }

    #[tokio::test]
    async fn last_occurrence_fires_and_clears_next_run_time() {
        let db = seeded().await;
        let task = add_task(&db, Some("0 0 1 1 *"), TaskStatus::Enabled).await;
        let horizon = Utc.with_ymd_and_hms(5000, 1, 1, 0, 0, 0).single().unwrap();
        let mut scheduler = Scheduler::new(db.clone());
        scheduler
            .init(Utc.with_ymd_and_hms(4999, 6, 1, 0, 0, 0).single().unwrap())
            .await
            .unwrap();

        assert_eq!(scheduler.tick(horizon).await, vec![task.id]);
        assert_eq!(scheduler.next_run(task.id), None);
        assert_eq!(db.get_task(task.id).await.unwrap().unwrap().next_run_time, None);
    }
}
