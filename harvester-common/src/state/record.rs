use async_trait::async_trait;

use crate::{
    common::{Page, Pagination},
    error::Error,
    record::{Record, StoredRecord},
};

use super::base::BaseDbTrait;

#[async_trait]
pub trait RecordDbTrait: BaseDbTrait {
    /// Persists the records collected by one execution
    async fn save_records(
        &self,
        task_id: i64,
        execution_id: i64,
        records: Vec<Record>,
    ) -> Result<u64, Error>;

    /// Lists a task's records, newest first
    async fn list_records(
        &self,
        task_id: i64,
        pagination: Pagination,
    ) -> Result<Page<StoredRecord>, Error>;
}
