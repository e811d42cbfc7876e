use async_trait::async_trait;

use crate::{
    error::Error,
    stats::{OverviewStats, TaskStats},
};

use super::base::BaseDbTrait;

#[async_trait]
pub trait StatsDbTrait: BaseDbTrait {
    async fn overview_stats(&self) -> Result<OverviewStats, Error>;

    /// Per-task run counters, ordered by task id
    async fn task_stats(&self) -> Result<Vec<TaskStats>, Error>;
}
