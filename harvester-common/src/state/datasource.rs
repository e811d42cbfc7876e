use async_trait::async_trait;

use crate::{
    common::{Page, Pagination},
    datasource::{DataSource, DataSourceDraft, DataSourceStatus, DataSourceType},
    error::Error,
};

use super::base::BaseDbTrait;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataSourceFilter {
    pub source_type: Option<DataSourceType>,
    pub status: Option<DataSourceStatus>,
}

#[async_trait]
pub trait DataSourceDbTrait: BaseDbTrait {
    async fn get_datasource(&self, id: i64) -> Result<Option<DataSource>, Error>;

    /// Lists data sources, newest first
    async fn list_datasources(
        &self,
        filter: DataSourceFilter,
        pagination: Pagination,
    ) -> Result<Page<DataSource>, Error>;

    async fn create_datasource(&self, draft: DataSourceDraft) -> Result<DataSource, Error>;

    async fn update_datasource(&self, id: i64, draft: DataSourceDraft) -> Result<DataSource, Error>;

    /// Deletes a data source
    /// ---
    /// Fails with `Conflict` while an enabled task references it.
    async fn delete_datasource(&self, id: i64) -> Result<(), Error>;
}
