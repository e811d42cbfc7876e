use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use harvester_common::{error::Error, schedule::CronSchedule};

#[derive(Debug)]
struct Entry {
    schedule: CronSchedule,
    next: DateTime<Utc>,
}

/// A trigger that came due during a tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DueTrigger {
    pub task_id: i64,

    /// The fire time that elapsed
    pub fire_at: DateTime<Utc>,

    /// Fire time computed for the following run, `None` when the
    /// expression has no further occurrence and the task left the set
    pub next: Option<DateTime<Utc>>,
}

/// Ordered set of pending fire times, one per scheduled task.
/// ---
/// Pure bookkeeping with an injected clock: nothing here reads the
/// wall clock or touches the store.
#[derive(Debug, Default)]
pub struct FireSet {
    queue: BTreeSet<(DateTime<Utc>, i64)>,
    entries: HashMap<i64, Entry>,
}

impl FireSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a task, returning its first fire time after `now`.
    pub fn upsert(
        &mut self,
        task_id: i64,
        schedule: CronSchedule,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, Error> {
        let next = schedule.next_after(now)?;
        self.remove(task_id);

        self.queue.insert((next, task_id));
        self.entries.insert(task_id, Entry { schedule, next });
        Ok(next)
    }

    pub fn remove(&mut self, task_id: i64) -> bool {
        match self.entries.remove(&task_id) {
            Some(entry) => {
                self.queue.remove(&(entry.next, task_id));
                true
            }
            None => false,
        }
    }

    /// Puts a task back at `fire_at`, undoing the advance made by `due`.
    pub fn rewind(&mut self, task_id: i64, fire_at: DateTime<Utc>) -> bool {
        let Some(entry) = self.entries.get_mut(&task_id) else {
            return false;
        };

        self.queue.remove(&(entry.next, task_id));
        entry.next = fire_at;
        self.queue.insert((fire_at, task_id));
        true
    }

    pub fn next_run(&self, task_id: i64) -> Option<DateTime<Utc>> {
        self.entries.get(&task_id).map(|e| e.next)
    }

    pub fn contains(&self, task_id: i64) -> bool {
        self.entries.contains_key(&task_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pops every entry with a fire time at or before `now`.
    /// ---
    /// Each popped task is re-armed at its first occurrence strictly after
    /// `now`, so a clock that fell behind fires once rather than once per
    /// missed slot. A task whose expression has no future occurrence still
    /// fires this once, then leaves the set with `next: None`.
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<DueTrigger> {
        let mut fired = Vec::new();

        while let Some(&(fire_at, task_id)) = self.queue.first() {
            if fire_at > now {
                break;
            }
            self.queue.pop_first();

            let Some(entry) = self.entries.get_mut(&task_id) else {
                continue;
            };

            let next = match entry.schedule.next_after(now) {
                Ok(next) => {
                    entry.next = next;
                    self.queue.insert((next, task_id));
                    Some(next)
                }
                Err(_) => {
                    self.entries.remove(&task_id);
                    None
                }
            };
            fired.push(DueTrigger {
                task_id,
                fire_at,
                next,
            });
        }

        fired
    }
}
